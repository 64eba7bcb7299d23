//! Model collaborator: tokenization, one decode step and logits access.
//!
//! The query pipeline only talks to a model through [`TokenModel`]. The
//! llama.cpp implementation lives in [`llamacpp`]; tests use an in-memory
//! scripted model.

mod batch;
pub mod hf_download;
pub mod llamacpp;
pub mod model_config;

#[cfg(test)]
pub(crate) mod mock;

pub use batch::{BatchEntry, TokenBatch};
pub use hf_download::{
    download_file, get_path_by_id, get_tokenizer_path, get_tokenizer_path_by_id, get_variant_path,
};
pub use llama_cpp_2::token::LlamaToken;
pub use llamacpp::{LlamaCppModel, LlamaCppSession, ModelOptions};
pub use model_config::{ModelFamily, ModelRegistry, VariantConfig, registry};

type Result<T> = crate::error::Result<T>;

/// A loaded model context able to run a single evaluation step.
///
/// `decode` takes `&mut self`: a context holds attention-cache state and
/// must never see two decodes at once.
pub trait TokenModel {
    /// Tokenize `text`, optionally prepending the start-of-sequence token.
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<LlamaToken>>;

    /// Display string for a single token.
    fn token_to_piece(&self, token: LlamaToken) -> String;

    /// Maximum number of tokens a single decode may cover.
    fn context_length(&self) -> usize;

    /// Number of entries in every logits vector.
    fn vocab_size(&self) -> usize;

    /// Evaluate `batch`, replacing any previous evaluation state.
    fn decode(&mut self, batch: &TokenBatch) -> Result<()>;

    /// Logits for the batch entry at `index`.
    ///
    /// Only valid after a successful [`decode`](Self::decode) whose batch
    /// flagged that entry for logits output.
    fn logits_ith(&self, index: usize) -> Result<&[f32]>;
}
