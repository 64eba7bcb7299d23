//! llama.cpp based GGUF inference via the llama-cpp-2 crate.
//!
//! [`LlamaCppModel`] owns the loaded weights and vocabulary. Evaluation
//! happens in a [`LlamaCppSession`], which borrows the model and owns one
//! llama.cpp context (attention cache included).

use super::{LlamaToken, TokenBatch, TokenModel};
use crate::error::ProbeError;
type Result<T> = crate::error::Result<T>;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::OnceLock;

/// Global llama.cpp backend (can only be initialized once)
static LLAMA_BACKEND: OnceLock<std::result::Result<LlamaBackend, String>> = OnceLock::new();

/// Get or initialize the global llama.cpp backend
fn get_backend() -> Result<&'static LlamaBackend> {
    let result = LLAMA_BACKEND.get_or_init(|| {
        let mut backend = LlamaBackend::init().map_err(|e| e.to_string())?;
        backend.void_logs();
        Ok(backend)
    });
    match result {
        Ok(backend) => Ok(backend),
        Err(e) => Err(ProbeError::ModelLoad(
            format!("Failed to initialize llama.cpp backend: {}", e).into(),
        )),
    }
}

/// Convert bytes to hex display format for partial UTF-8 sequences
fn bytes_to_hex_display(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("<{:02X}>", b)).collect()
}

/// Render raw token bytes for display.
///
/// Valid UTF-8 without control characters is returned as-is; anything else
/// (byte-fallback tokens, partial sequences) is shown as hex.
pub fn piece_for_display(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) if s.chars().all(|c| !c.is_control() || c == ' ' || c == '\n') => s.to_string(),
        _ => bytes_to_hex_display(bytes),
    }
}

/// Load and configure an external HuggingFace tokenizer from a `tokenizer.json` file.
fn load_tokenizer<P: AsRef<Path>>(path: P) -> Result<tokenizers::Tokenizer> {
    let mut tokenizer =
        tokenizers::Tokenizer::from_file(path.as_ref()).map_err(ProbeError::TokenizerLoad)?;
    // Padding tokens would shift the final position; truncation would hide
    // an oversized prompt from the context check.
    tokenizer.with_padding(None);
    tokenizer
        .with_truncation(None)
        .map_err(ProbeError::TokenizerLoad)?;
    Ok(tokenizer)
}

/// Build LlamaContextParams for a session.
///
/// A prompt is submitted as one logical batch, so `n_batch` spans the whole
/// context. `n_ubatch` stays at the llama.cpp default; llama.cpp splits the
/// batch into micro-batches and the last position's logits stay readable.
fn context_params(n_ctx: u32, n_threads: u32) -> Result<LlamaContextParams> {
    let n_ctx_nz = NonZeroU32::new(n_ctx)
        .ok_or_else(|| ProbeError::ModelLoad("context length must be non-zero".into()))?;
    let params = LlamaContextParams::default()
        .with_n_ctx(Some(n_ctx_nz))
        .with_n_batch(n_ctx);
    if n_threads > 0 {
        Ok(params
            .with_n_threads(n_threads as i32)
            .with_n_threads_batch(n_threads as i32))
    } else {
        Ok(params)
    }
}

/// Longest prompt a context accepts in a single decode.
///
/// llama.cpp may pad the context above the requested size while the batch
/// stays at the requested size, so both bound the prompt.
fn usable_context(ctx_n_ctx: u32, ctx_n_batch: u32) -> usize {
    ctx_n_ctx.min(ctx_n_batch) as usize
}

/// Load-time options for a model and the contexts created from it.
#[derive(Debug, Clone)]
pub struct ModelOptions {
    /// Context window per session (0 = the model's training context)
    pub n_ctx: u32,
    /// Layers offloaded to the GPU (0 = CPU only)
    pub n_gpu_layers: u32,
    /// Threads for inference (0 = llama.cpp default)
    pub n_threads: u32,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            n_ctx: 512,
            n_gpu_layers: 0,
            n_threads: 0,
        }
    }
}

/// A GGUF model loaded through llama.cpp.
pub struct LlamaCppModel {
    model: LlamaModel,
    n_ctx: u32,
    n_threads: u32,
    /// Optional HuggingFace tokenizer used instead of the GGUF vocabulary.
    external_tokenizer: Option<tokenizers::Tokenizer>,
}

impl LlamaCppModel {
    /// Load a GGUF model using llama.cpp's built-in tokenizer.
    pub fn from_file<P: AsRef<Path>>(path: P, options: &ModelOptions) -> Result<Self> {
        let backend = get_backend()?;

        let model_params = LlamaModelParams::default().with_n_gpu_layers(options.n_gpu_layers);

        let model = LlamaModel::load_from_file(backend, path.as_ref(), &model_params)
            .map_err(|e| ProbeError::ModelLoad(e.into()))?;

        let n_ctx = if options.n_ctx == 0 {
            model.n_ctx_train()
        } else {
            options.n_ctx
        };

        tracing::info!(
            "Loaded {} (n_vocab={}, n_ctx={}, n_gpu_layers={})",
            path.as_ref().display(),
            model.n_vocab(),
            n_ctx,
            options.n_gpu_layers
        );

        Ok(Self {
            model,
            n_ctx,
            n_threads: options.n_threads,
            external_tokenizer: None,
        })
    }

    /// Load a GGUF model and tokenize with an external `tokenizer.json`.
    pub fn from_file_with_tokenizer<P: AsRef<Path>, T: AsRef<Path>>(
        path: P,
        tokenizer_json: T,
        options: &ModelOptions,
    ) -> Result<Self> {
        let mut model = Self::from_file(path, options)?;
        model.external_tokenizer = Some(load_tokenizer(tokenizer_json)?);
        Ok(model)
    }

    /// Context window requested for every session of this model.
    ///
    /// A session may accept fewer tokens; see [`TokenModel::context_length`].
    pub fn n_ctx(&self) -> u32 {
        self.n_ctx
    }

    pub fn n_vocab(&self) -> usize {
        self.model.n_vocab() as usize
    }

    /// Create an evaluation session with its own context.
    pub fn session(&self) -> Result<LlamaCppSession<'_>> {
        LlamaCppSession::new(self)
    }

    /// Tokenize a string, with or without a leading BOS token.
    pub fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<LlamaToken>> {
        match &self.external_tokenizer {
            Some(tokenizer) => {
                let encoding = tokenizer
                    .encode(text, add_bos)
                    .map_err(ProbeError::Inference)?;
                Ok(encoding
                    .get_ids()
                    .iter()
                    .map(|&id| LlamaToken(id as i32))
                    .collect())
            }
            None => {
                let add_bos = if add_bos { AddBos::Always } else { AddBos::Never };
                self.model
                    .str_to_token(text, add_bos)
                    .map_err(|e| ProbeError::Inference(e.into()))
            }
        }
    }

    /// Decode a single token for display purposes.
    ///
    /// For byte-level BPE tokens that represent partial UTF-8 sequences,
    /// this returns a hex representation like `<E3>` instead of replacement characters.
    pub fn decode_token_for_display(&self, token: LlamaToken) -> String {
        match self.model.token_to_piece_bytes(token, 32, true, None) {
            Ok(bytes) => piece_for_display(&bytes),
            Err(_) => format!("<{}>", token.0),
        }
    }
}

/// One llama.cpp context bound to a [`LlamaCppModel`].
///
/// Creating a context is expensive; a session is meant to be kept alive
/// and reused. Every decode clears the KV cache first, so queries never
/// observe each other.
pub struct LlamaCppSession<'a> {
    model: &'a LlamaCppModel,
    ctx: LlamaContext<'a>,
    n_ctx: usize,
    /// Batch index whose logits the last successful decode produced
    logits_index: Option<usize>,
}

impl<'a> LlamaCppSession<'a> {
    pub fn new(model: &'a LlamaCppModel) -> Result<Self> {
        let backend = get_backend()?;
        let ctx = model
            .model
            .new_context(backend, context_params(model.n_ctx, model.n_threads)?)
            .map_err(|e| ProbeError::Inference(e.into()))?;
        let n_ctx = usable_context(ctx.n_ctx(), ctx.n_batch());
        tracing::debug!(
            "Session context: n_ctx={}, n_batch={}, usable={}",
            ctx.n_ctx(),
            ctx.n_batch(),
            n_ctx
        );

        Ok(Self {
            model,
            ctx,
            n_ctx,
            logits_index: None,
        })
    }
}

impl TokenModel for LlamaCppSession<'_> {
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<LlamaToken>> {
        self.model.tokenize(text, add_bos)
    }

    fn token_to_piece(&self, token: LlamaToken) -> String {
        self.model.decode_token_for_display(token)
    }

    fn context_length(&self) -> usize {
        self.n_ctx
    }

    fn vocab_size(&self) -> usize {
        self.model.n_vocab()
    }

    fn decode(&mut self, batch: &TokenBatch) -> Result<()> {
        self.logits_index = None;
        self.ctx.clear_kv_cache();

        let mut llama_batch = LlamaBatch::new(batch.len().max(1), 1);
        for entry in batch.entries() {
            llama_batch
                .add(entry.token, entry.pos, &[entry.seq_id], entry.logits)
                .map_err(|e| ProbeError::Inference(e.into()))?;
        }

        self.ctx
            .decode(&mut llama_batch)
            .map_err(|e| ProbeError::Inference(e.into()))?;

        self.logits_index = batch.logits_index();
        Ok(())
    }

    fn logits_ith(&self, index: usize) -> Result<&[f32]> {
        if self.logits_index != Some(index) {
            return Err(ProbeError::inference(format!(
                "no logits were computed for batch index {}",
                index
            )));
        }
        let logits = self.ctx.get_logits_ith(index as i32);
        Ok(&logits[..self.model.n_vocab().min(logits.len())])
    }
}
