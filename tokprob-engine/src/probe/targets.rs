//! Target-set resolution: comma-separated fragments to token ids.

use crate::error::ProbeError;
use crate::model::{LlamaToken, TokenModel};
type Result<T> = crate::error::Result<T>;

/// Fragment separator. There is no escaping; a fragment cannot contain it.
pub const FRAGMENT_DELIMITER: char = ',';

/// A target token together with the fragment it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetEntry {
    pub fragment: String,
    pub token: LlamaToken,
}

/// Split a raw target list into its non-empty fragments.
///
/// Runs before any model work: an empty list, or one made only of
/// delimiters, is a malformed request.
pub fn split_targets(raw: &str) -> Result<Vec<&str>> {
    if raw.is_empty() {
        return Err(ProbeError::InvalidInput(
            "target list is empty".to_string(),
        ));
    }
    let fragments: Vec<&str> = raw
        .split(FRAGMENT_DELIMITER)
        .filter(|f| !f.is_empty())
        .collect();
    if fragments.is_empty() {
        return Err(ProbeError::InvalidInput(format!(
            "target list '{}' contains no fragments",
            raw
        )));
    }
    Ok(fragments)
}

/// Tokenize each fragment independently, without a BOS token.
///
/// Order is preserved across and within fragments, duplicates included.
/// A fragment that yields no tokens contributes nothing.
pub fn resolve_fragments<M: TokenModel + ?Sized>(
    model: &M,
    fragments: &[&str],
) -> Result<Vec<TargetEntry>> {
    let mut entries = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        let tokens = model.tokenize(fragment, false)?;
        if tokens.is_empty() {
            tracing::debug!("target fragment '{}' produced no tokens", fragment);
        }
        entries.extend(tokens.into_iter().map(|token| TargetEntry {
            fragment: fragment.to_string(),
            token,
        }));
    }
    Ok(entries)
}

/// Split and tokenize a raw comma-separated target list.
pub fn resolve_targets<M: TokenModel + ?Sized>(model: &M, raw: &str) -> Result<Vec<TargetEntry>> {
    let fragments = split_targets(raw)?;
    resolve_fragments(model, &fragments)
}
