//! Targeted token-probability queries.
//!
//! A query tokenizes the prompt, runs one decode, normalizes the logits at
//! the final position and reports the probability of each target token:
//!
//! ```text
//! prompt ─ tokenize ─ decode ─ logits ─ normalize ─┐
//! targets ─ split ─ tokenize (no BOS) ─────────────┴─ report
//! ```

pub mod executor;
pub mod report;
pub mod softmax;
pub mod targets;
pub mod worker;

pub use executor::evaluate_last_position;
pub use report::{TokenProbability, report};
pub use softmax::{Normalization, normalize};
pub use targets::{TargetEntry, resolve_targets};
pub use worker::{ProbeHandle, ProbeQueue};

use serde::{Deserialize, Serialize};

use crate::error::ProbeError;
use crate::model::TokenModel;
type Result<T> = crate::error::Result<T>;

/// A prompt and the comma-separated fragments to score after it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeRequest {
    #[serde(default)]
    pub prompt: String,
    /// Comma-separated fragments, e.g. `"H,e,l,o"`
    #[serde(default)]
    pub target_chars: String,
}

impl ProbeRequest {
    pub fn new(prompt: impl Into<String>, target_chars: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            target_chars: target_chars.into(),
        }
    }
}

/// Result of one query.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    /// Number of prompt tokens evaluated (BOS included)
    pub prompt_tokens: usize,
    /// One row per target token, in target order
    pub entries: Vec<TokenProbability>,
}

/// Query pipeline configuration.
#[derive(Debug, Clone, Copy)]
pub struct TokenProbe {
    /// Prepend BOS to the prompt (targets never get one)
    pub add_bos: bool,
    pub normalization: Normalization,
}

impl Default for TokenProbe {
    fn default() -> Self {
        Self {
            add_bos: true,
            normalization: Normalization::Stable,
        }
    }
}

impl TokenProbe {
    /// Run one query against `model`.
    ///
    /// Input validation happens before the model is touched. Any failure
    /// aborts the query; no partial report is produced.
    pub fn query<M: TokenModel + ?Sized>(
        &self,
        model: &mut M,
        request: &ProbeRequest,
    ) -> Result<ProbeReport> {
        let fragments = targets::split_targets(&request.target_chars)?;
        if request.prompt.is_empty() {
            return Err(ProbeError::InvalidInput("prompt is empty".to_string()));
        }

        let prompt = model.tokenize(&request.prompt, self.add_bos)?;
        tracing::debug!(
            "prompt '{}' -> {} tokens, {} target fragments",
            request.prompt,
            prompt.len(),
            fragments.len()
        );

        let logits = evaluate_last_position(model, &prompt)?;
        let distribution = normalize(logits, self.normalization).inspect_err(|e| {
            tracing::error!("aborting query, model produced unusable logits: {}", e);
        })?;

        let targets = targets::resolve_fragments(model, &fragments)?;
        Ok(ProbeReport {
            prompt_tokens: prompt.len(),
            entries: report(model, &distribution, &targets),
        })
    }
}
