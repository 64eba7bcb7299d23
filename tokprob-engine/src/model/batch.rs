use super::LlamaToken;

/// One token slot in an evaluation batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchEntry {
    pub token: LlamaToken,
    pub pos: i32,
    pub seq_id: i32,
    pub logits: bool,
}

/// Tokens submitted together for one decode.
#[derive(Debug, Clone, Default)]
pub struct TokenBatch {
    entries: Vec<BatchEntry>,
}

impl TokenBatch {
    /// Lay out a prompt for a single decode step.
    ///
    /// Positions run 0..n on sequence 0. Only the final entry requests
    /// logits; the continuation after the full prompt is all a query reads.
    pub fn for_prompt(tokens: &[LlamaToken]) -> Self {
        let last = tokens.len().saturating_sub(1);
        let entries = tokens
            .iter()
            .enumerate()
            .map(|(i, &token)| BatchEntry {
                token,
                pos: i as i32,
                seq_id: 0,
                logits: i == last,
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[BatchEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Batch-local index of the last entry that requests logits.
    pub fn logits_index(&self) -> Option<usize> {
        self.entries.iter().rposition(|e| e.logits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(ids: &[i32]) -> Vec<LlamaToken> {
        ids.iter().map(|&id| LlamaToken(id)).collect()
    }

    #[test]
    fn test_positions_are_sequential() {
        let batch = TokenBatch::for_prompt(&tokens(&[1, 15043, 590, 1024]));
        let positions: Vec<i32> = batch.entries().iter().map(|e| e.pos).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);
        assert!(batch.entries().iter().all(|e| e.seq_id == 0));
    }

    #[test]
    fn test_only_last_entry_emits_logits() {
        let batch = TokenBatch::for_prompt(&tokens(&[1, 2, 3]));
        let flags: Vec<bool> = batch.entries().iter().map(|e| e.logits).collect();
        assert_eq!(flags, vec![false, false, true]);
        assert_eq!(batch.logits_index(), Some(2));
    }

    #[test]
    fn test_single_token_prompt() {
        let batch = TokenBatch::for_prompt(&tokens(&[1]));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.logits_index(), Some(0));
    }

    #[test]
    fn test_empty_prompt() {
        let batch = TokenBatch::for_prompt(&[]);
        assert!(batch.is_empty());
        assert_eq!(batch.logits_index(), None);
    }
}
