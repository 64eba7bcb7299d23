//! Single-step inference: one decode over the full prompt.

use crate::error::ProbeError;
use crate::model::{LlamaToken, TokenBatch, TokenModel};
type Result<T> = crate::error::Result<T>;

/// Evaluate `prompt` in one batch and return the logits at its last position.
///
/// The context check happens before anything is submitted to the model; an
/// oversized prompt is never truncated. A failed decode is returned as-is
/// and not retried.
pub fn evaluate_last_position<'m, M: TokenModel + ?Sized>(
    model: &'m mut M,
    prompt: &[LlamaToken],
) -> Result<&'m [f32]> {
    if prompt.is_empty() {
        return Err(ProbeError::InvalidInput(
            "prompt produced no tokens".to_string(),
        ));
    }
    let n_ctx = model.context_length();
    if prompt.len() > n_ctx {
        return Err(ProbeError::ContextOverflow {
            n_tokens: prompt.len(),
            n_ctx,
        });
    }

    let batch = TokenBatch::for_prompt(prompt);
    let last = batch.len() - 1;
    tracing::debug!(
        "decoding {} prompt tokens (n_ctx={}), logits at index {}",
        batch.len(),
        n_ctx,
        last
    );
    model.decode(&batch)?;

    let vocab_size = model.vocab_size();
    let logits = model.logits_ith(last)?;
    if logits.len() != vocab_size {
        return Err(ProbeError::inference(format!(
            "expected {} logits, got {}",
            vocab_size,
            logits.len()
        )));
    }
    Ok(logits)
}
