//! One-shot token probability query.
//!
//! ```text
//! tokprob -m qwen2.5-0.5b-instruct-q4 -p "Hello my name is" -t "H,e,l,o"
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokprob_engine::ProbeError;
use tokprob_engine::probe::{Normalization, ProbeReport, ProbeRequest, TokenProbability};
use tokprob_engine::settings::Settings;

/// Print the probability of each target fragment's token right after a prompt
#[derive(Parser, Debug)]
#[command(name = "tokprob")]
#[command(about = "Next-token probabilities for chosen targets", long_about = None)]
struct Cli {
    /// Prompt text
    #[arg(short, long, default_value = "Hello my name is")]
    prompt: String,

    /// Comma-separated target fragments, e.g. "H,e,l,o"
    #[arg(short, long)]
    targets: Option<String>,

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

    /// Threads for inference (0 = llama.cpp default)
    #[arg(long)]
    threads: Option<u32>,

    /// Do not prepend the start-of-sequence token to the prompt
    #[arg(long)]
    no_bos: bool,

    /// Exponentiate raw logits without subtracting the maximum
    #[arg(long)]
    naive_softmax: bool,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    /// Settings file (default: platform config dir)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Enable verbose logging (debug level)
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
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
        let model = &mut settings.model;
        if let Some(variant) = &self.model {
            model.variant = variant.clone();
        }
        if let Some(gguf) = &self.gguf {
            model.gguf = Some(gguf.clone());
            model.tokenizer_json = self.tokenizer_json.clone();
        }
        if let Some(n) = self.n_ctx {
            model.n_ctx = n;
        }
        if let Some(n) = self.n_gpu_layers {
            model.n_gpu_layers = n;
        }
        if let Some(n) = self.threads {
            model.n_threads = n;
        }
        if self.no_bos {
            settings.probe.add_bos = false;
        }
        if self.naive_softmax {
            settings.probe.normalization = Normalization::Naive;
        }
    }
}

fn format_row(row: &TokenProbability) -> String {
    format!(
        "Token {}: prob = {:.6}, token = {}",
        row.token_id, row.probability, row.piece
    )
}

fn print_report(report: &ProbeReport) {
    for row in &report.entries {
        println!("{}", format_row(row));
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    tokprob_cli::init_tracing("tokprob", cli.verbose);

    // Reject a missing target list before paying for a model load
    let targets = cli.targets.clone().unwrap_or_default();
    if targets.is_empty() {
        return Err(
            ProbeError::InvalidInput("-t/--targets is missing or empty".to_string()).into(),
        );
    }

    let settings = cli.settings()?;
    let (model, name) = tokprob_cli::load_model(&settings.model)?;
    tracing::info!("Model '{}' ready", name);

    let mut session = model.session()?;
    let report = settings
        .probe
        .probe()
        .query(&mut session, &ProbeRequest::new(&cli.prompt, targets))?;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}
