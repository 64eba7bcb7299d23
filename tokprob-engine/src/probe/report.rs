//! Joins a probability distribution with the resolved target tokens.

use serde::Serialize;

use super::targets::TargetEntry;
use crate::model::TokenModel;

/// Probability the model assigned to one target token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenProbability {
    pub token_id: i32,
    /// Fragment of the target list this token came from
    pub fragment: String,
    /// Display string of the token itself
    pub piece: String,
    pub probability: f32,
}

/// Look up every target in `distribution`, in target order.
///
/// Duplicate targets are reported once per occurrence with identical
/// probabilities.
pub fn report<M: TokenModel + ?Sized>(
    model: &M,
    distribution: &[f32],
    targets: &[TargetEntry],
) -> Vec<TokenProbability> {
    targets
        .iter()
        .map(|target| {
            let probability = usize::try_from(target.token.0)
                .ok()
                .and_then(|i| distribution.get(i).copied())
                .unwrap_or_else(|| {
                    tracing::warn!(
                        "token {} is outside the vocabulary ({})",
                        target.token.0,
                        distribution.len()
                    );
                    0.0
                });
            TokenProbability {
                token_id: target.token.0,
                fragment: target.fragment.clone(),
                piece: model.token_to_piece(target.token),
                probability,
            }
        })
        .collect()
}
