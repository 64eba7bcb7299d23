//! Shared startup code for the tokprob binaries.

use anyhow::{Context, Result};
use tokprob_engine::model::{get_path_by_id, get_tokenizer_path_by_id, registry};
use tokprob_engine::settings::ModelSettings;
use tokprob_engine::{LlamaCppModel, ProbeError};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the tracing subscriber.
///
/// Default: info level, with `verbose`: debug level. `RUST_LOG` overrides both.
pub fn init_tracing(bin: &str, verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let default_filter =
        format!("{bin}={level},tokprob_cli={level},tokprob_engine={level},tower_http={level}");

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load the model described by `settings`.
///
/// A local GGUF path wins over the registry variant. Returns the model and a
/// display name for it.
pub fn load_model(settings: &ModelSettings) -> Result<(LlamaCppModel, String)> {
    let options = settings.options();

    if let Some(gguf) = &settings.gguf {
        tracing::info!("Loading GGUF from {}...", gguf.display());
        let model = match &settings.tokenizer_json {
            Some(tok) => LlamaCppModel::from_file_with_tokenizer(gguf, tok, &options),
            None => LlamaCppModel::from_file(gguf, &options),
        }
        .with_context(|| format!("Failed to load GGUF from {}", gguf.display()))?;
        let name = gguf
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "custom".to_string());
        return Ok((model, name));
    }

    let variant_id = &settings.variant;
    let (_family, variant) = registry()
        .find_variant(variant_id)
        .ok_or_else(|| ProbeError::UnknownVariant(variant_id.to_string()))?;

    tracing::info!("Downloading/loading model variant: {} ...", variant_id);
    let path = get_path_by_id(variant_id)?;
    let model = match get_tokenizer_path_by_id(variant_id)? {
        Some(tok) => {
            tracing::info!("Using external tokenizer: {}", tok.display());
            LlamaCppModel::from_file_with_tokenizer(&path, &tok, &options)?
        }
        None => LlamaCppModel::from_file(&path, &options)?,
    };
    Ok((model, variant.display_name.clone()))
}
