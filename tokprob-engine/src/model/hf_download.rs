//! HuggingFace model download utilities
//!
//! Downloads GGUF models (and optional tokenizers) from HuggingFace Hub and
//! caches them locally. Model definitions come from [`super::model_config`].

use super::model_config::{ModelFamily, VariantConfig, registry};
use crate::error::ProbeError;
type Result<T> = crate::error::Result<T>;
use hf_hub::{Repo, RepoType, api::sync::ApiBuilder};
use std::path::PathBuf;

/// Download a file from a HuggingFace model repository.
///
/// Returns the local path; files are cached under `~/.cache/huggingface/hub/`.
/// `HF_TOKEN` is used when set (required for private repositories).
pub fn download_file(repo_id: &str, filename: &str) -> Result<PathBuf> {
    let mut builder = ApiBuilder::new();
    if let Ok(token) = std::env::var("HF_TOKEN") {
        builder = builder.with_token(Some(token));
    }
    let api = builder
        .build()
        .map_err(|e| ProbeError::Download(e.into()))?;

    let repo = api.repo(Repo::new(repo_id.to_string(), RepoType::Model));

    tracing::info!("Downloading {} from {}...", filename, repo_id);

    let path = repo
        .get(filename)
        .map_err(|e| ProbeError::Download(e.into()))?;

    tracing::info!("Downloaded to {:?}", path);

    Ok(path)
}

/// Get local path for a variant, downloading if not cached.
pub fn get_variant_path(family: &ModelFamily, variant: &VariantConfig) -> Result<PathBuf> {
    download_file(&family.repo_id, &variant.filename)
}

/// Local path to the family's external `tokenizer.json`, if it has one.
pub fn get_tokenizer_path(family: &ModelFamily) -> Result<Option<PathBuf>> {
    family
        .tokenizer_repo_id
        .as_deref()
        .map(|repo| download_file(repo, "tokenizer.json"))
        .transpose()
}

/// Look up a variant id in the global registry and return its local GGUF path.
pub fn get_path_by_id(variant_id: &str) -> Result<PathBuf> {
    let (family, variant) = registry()
        .find_variant(variant_id)
        .ok_or_else(|| ProbeError::UnknownVariant(variant_id.to_string()))?;
    get_variant_path(family, variant)
}

/// Look up a variant id and return its external tokenizer path, if any.
pub fn get_tokenizer_path_by_id(variant_id: &str) -> Result<Option<PathBuf>> {
    let (family, _variant) = registry()
        .find_variant(variant_id)
        .ok_or_else(|| ProbeError::UnknownVariant(variant_id.to_string()))?;
    get_tokenizer_path(family)
}
