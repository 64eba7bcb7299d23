use std::path::PathBuf;
use std::sync::{Arc, mpsc};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{DefaultBodyLimit, FromRef, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tokprob_engine::probe::{ProbeHandle, ProbeQueue, ProbeRequest};
use tokprob_engine::settings::Settings;
use tokprob_engine::{ErrorKind, LlamaCppModel, ProbeError, TokenModel};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Token probability query server
#[derive(Parser, Debug)]
#[command(name = "tokprob-server")]
#[command(about = "HTTP server for next-token probability queries", long_about = None)]
struct Args {
    /// Enable verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug mode (exposes /api/tokenize endpoint)
    #[arg(long)]
    debug: bool,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Worker threads, each with its own model context
    #[arg(long)]
    workers: Option<usize>,

    /// Model variant id from the registry
    #[arg(short, long)]
    model: Option<String>,

    /// Direct GGUF file path (overrides --model)
    #[arg(long)]
    gguf: Option<PathBuf>,

    /// External tokenizer.json for --gguf
    #[arg(long)]
    tokenizer_json: Option<PathBuf>,

    /// Context window size (0 = model training context)
    #[arg(short = 'c', long)]
    n_ctx: Option<u32>,

    /// Layers to offload to the GPU
    #[arg(short = 'g', long)]
    n_gpu_layers: Option<u32>,

    /// Settings file (default: platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn settings(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => Settings::load_from(path)
                .with_context(|| format!("Failed to read {}", path.display()))?,
            None => Settings::load()?,
        };
        self.apply(&mut settings);
        Ok(settings)
    }

    /// Command-line flags override the settings file.
    fn apply(&self, settings: &mut Settings) {
        if let Some(variant) = &self.model {
            settings.model.variant = variant.clone();
        }
        if let Some(gguf) = &self.gguf {
            settings.model.gguf = Some(gguf.clone());
            settings.model.tokenizer_json = self.tokenizer_json.clone();
        }
        if let Some(n) = self.n_ctx {
            settings.model.n_ctx = n;
        }
        if let Some(n) = self.n_gpu_layers {
            settings.model.n_gpu_layers = n;
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(host) = &self.host {
            settings.server.host = host.clone();
        }
        if let Some(workers) = self.workers {
            settings.server.workers = workers;
        }
    }
}

#[derive(Clone)]
struct AppState {
    query: QueryState,
    info: ModelInfo,
    model: Arc<LlamaCppModel>,
    /// Debug mode enabled (--debug flag)
    debug_mode: bool,
}

/// What `/api/probe` needs: the worker queue and the name to report.
#[derive(Clone)]
struct QueryState {
    probe: ProbeHandle,
    model_name: String,
}

impl FromRef<AppState> for QueryState {
    fn from_ref(state: &AppState) -> Self {
        state.query.clone()
    }
}

impl FromRef<AppState> for ModelInfo {
    fn from_ref(state: &AppState) -> Self {
        state.info.clone()
    }
}

#[derive(Debug, Serialize)]
struct TokenResult {
    token: String,
    token_id: i32,
    fragment: String,
    probability: f32,
}

#[derive(Debug, Serialize)]
struct ProbeResponse {
    results: Vec<TokenResult>,
    prompt_tokens: usize,
    inference_time_ms: f64,
    model: String,
}

/// Loaded model as reported by `/api/model`.
#[derive(Debug, Clone, Serialize)]
struct ModelInfo {
    name: String,
    /// Longest prompt a worker context accepts
    n_ctx: usize,
    n_vocab: usize,
}

/// Error body: `{ "error": "...", "kind": "client" | "server" }`
enum ApiError {
    Query(ProbeError),
    /// Request body that is not a valid JSON request
    Rejected(JsonRejection),
}

impl From<ProbeError> for ApiError {
    fn from(e: ProbeError) -> Self {
        ApiError::Query(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Rejected(rejection)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Rejected(rejection) => {
                tracing::debug!("rejected body: {}", rejection.body_text());
                (rejection.status(), "client", rejection.body_text())
            }
            ApiError::Query(e) => {
                let (status, kind) = match (&e, e.kind()) {
                    (ProbeError::WorkerUnavailable, _) => {
                        (StatusCode::SERVICE_UNAVAILABLE, "server")
                    }
                    (_, ErrorKind::Client) => (StatusCode::BAD_REQUEST, "client"),
                    (_, ErrorKind::Server) => (StatusCode::INTERNAL_SERVER_ERROR, "server"),
                };
                if kind == "server" {
                    tracing::error!("query failed: {:?}", e);
                } else {
                    tracing::debug!("rejected query: {}", e);
                }
                (status, kind, e.to_string())
            }
        };
        let body = Json(serde_json::json!({
            "error": message,
            "kind": kind,
        }));
        (status, body).into_response()
    }
}

/// Worker startup outcome: the context length it enforces, or why it failed.
type WorkerReady = std::result::Result<usize, String>;

fn spawn_workers(
    model: &Arc<LlamaCppModel>,
    queue: ProbeQueue,
    settings: &Settings,
    ready: mpsc::Sender<WorkerReady>,
) -> Result<Vec<std::thread::JoinHandle<()>>> {
    let probe = settings.probe.probe();
    let mut workers = Vec::with_capacity(settings.server.workers);

    for i in 0..settings.server.workers.max(1) {
        let model = Arc::clone(model);
        let queue = queue.clone();
        let ready = ready.clone();
        let handle = std::thread::Builder::new()
            .name(format!("probe-worker-{}", i))
            .spawn(move || {
                let mut session = match model.session() {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::error!("worker {} could not create a context: {:?}", i, e);
                        let _ = ready.send(Err(e.to_string()));
                        return;
                    }
                };
                let _ = ready.send(Ok(session.context_length()));
                drop(ready);
                let served = queue.serve(&probe, &mut session);
                tracing::debug!("worker {} stopped after {} queries", i, served);
            })
            .context("failed to spawn worker thread")?;
        workers.push(handle);
    }
    Ok(workers)
}

/// Wait until every worker has reported in.
///
/// Returns the smallest context length among the started workers, which is
/// the limit every query is held to. Fails when no worker started.
fn await_workers(ready: &mpsc::Receiver<WorkerReady>, count: usize) -> Result<usize> {
    let mut n_ctx: Option<usize> = None;
    let mut last_error = None;
    for _ in 0..count {
        match ready.recv() {
            Ok(Ok(len)) => n_ctx = Some(n_ctx.map_or(len, |n| n.min(len))),
            Ok(Err(e)) => last_error = Some(e),
            // Sender gone without a report: the worker thread died.
            Err(_) => break,
        }
    }
    match (n_ctx, last_error) {
        (Some(n), _) => Ok(n),
        (None, Some(e)) => anyhow::bail!("no worker could create a context: {}", e),
        (None, None) => anyhow::bail!("no worker started"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    tokprob_cli::init_tracing("tokprob_server", args.verbose);

    let settings = args.settings()?;
    let model_settings = settings.model.clone();
    let (model, model_name) =
        tokio::task::spawn_blocking(move || tokprob_cli::load_model(&model_settings)).await??;
    let model = Arc::new(model);
    tracing::info!("Model '{}' loaded", model_name);

    let (probe, queue) = ProbeQueue::bounded(settings.server.queue_depth);
    let (ready_tx, ready_rx) = mpsc::channel();
    let workers = spawn_workers(&model, queue, &settings, ready_tx)?;
    let worker_count = workers.len();
    let n_ctx =
        tokio::task::spawn_blocking(move || await_workers(&ready_rx, worker_count)).await??;
    tracing::info!(
        "Started {} worker(s), prompts up to {} tokens",
        worker_count,
        n_ctx
    );

    if args.debug {
        tracing::info!("Debug mode enabled - tokenization API available at /api/tokenize");
    }

    let state = AppState {
        query: QueryState {
            probe,
            model_name: model_name.clone(),
        },
        info: ModelInfo {
            name: model_name,
            n_ctx,
            n_vocab: model.n_vocab(),
        },
        model,
        debug_mode: args.debug,
    };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build router
    let mut app = Router::new()
        .route("/api/probe", post(probe_handler))
        .route("/api/model", get(model_handler))
        .route("/health", get(health_handler));

    // Add debug-only routes
    if args.debug {
        app = app.route("/api/tokenize", post(tokenize_handler));
    }

    let app = app
        .layer(DefaultBodyLimit::max(256 * 1024)) // 256 KB
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let bind_addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Server listening on http://{}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("failed to run server")?;

    // Router state is gone, so the queue is closed and workers drain out
    tracing::info!("Shutting down, waiting for workers");
    for worker in workers {
        if worker.join().is_err() {
            tracing::warn!("worker thread panicked");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "tokprob"
    }))
}

async fn model_handler(State(info): State<ModelInfo>) -> Json<ModelInfo> {
    Json(info)
}

async fn probe_handler(
    State(state): State<QueryState>,
    payload: std::result::Result<Json<ProbeRequest>, JsonRejection>,
) -> std::result::Result<Json<ProbeResponse>, ApiError> {
    let Json(req) = payload?;
    let start = std::time::Instant::now();
    let report = state.probe.submit(req).await?;
    let inference_time_ms = start.elapsed().as_secs_f64() * 1000.0;

    let results = report
        .entries
        .into_iter()
        .map(|row| TokenResult {
            token: row.piece,
            token_id: row.token_id,
            fragment: row.fragment,
            probability: row.probability,
        })
        .collect();

    Ok(Json(ProbeResponse {
        results,
        prompt_tokens: report.prompt_tokens,
        inference_time_ms,
        model: state.model_name,
    }))
}

/// Tokenize request (debug mode only)
#[derive(Debug, Deserialize)]
struct TokenizeRequest {
    text: String,
    #[serde(default)]
    add_bos: bool,
}

#[derive(Debug, Serialize)]
struct TokenInfo {
    id: i32,
    text: String,
}

#[derive(Debug, Serialize)]
struct TokenizeResponse {
    tokens: Vec<TokenInfo>,
    text: String,
    model: String,
}

/// Handle tokenization request (debug mode only)
async fn tokenize_handler(
    State(state): State<AppState>,
    payload: std::result::Result<Json<TokenizeRequest>, JsonRejection>,
) -> std::result::Result<Json<TokenizeResponse>, ApiError> {
    let Json(req) = payload?;
    if !state.debug_mode {
        return Err(ProbeError::InvalidInput(
            "Tokenize API is only available in debug mode".to_string(),
        )
        .into());
    }

    let tokens = state.model.tokenize(&req.text, req.add_bos)?;
    let tokens = tokens
        .into_iter()
        .map(|token| TokenInfo {
            id: token.0,
            text: state.model.decode_token_for_display(token),
        })
        .collect();

    Ok(Json(TokenizeResponse {
        tokens,
        text: req.text,
        model: state.info.name.clone(),
    }))
}
