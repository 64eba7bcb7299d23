//! In-memory scripted model for unit tests.

use super::{LlamaToken, TokenBatch, TokenModel};
use crate::error::ProbeError;

type Result<T> = crate::error::Result<T>;

pub(crate) const BOS: LlamaToken = LlamaToken(0);

/// Character-level model: token `i + 1` is the `i`-th character of the
/// vocabulary string, token 0 is BOS. Characters outside the vocabulary
/// tokenize to nothing.
pub(crate) struct MockModel {
    vocab: Vec<char>,
    logits: Vec<f32>,
    n_ctx: usize,
    pub(crate) fail_decode: bool,
    pub(crate) decode_calls: usize,
    pub(crate) last_batch: Option<TokenBatch>,
    decoded: Option<usize>,
}

impl MockModel {
    pub(crate) fn new() -> Self {
        let vocab: Vec<char> = " HelomyanisW,.!".chars().collect();
        let n_vocab = vocab.len() + 1;
        let logits = (0..n_vocab).map(|i| (i % 5) as f32 * 0.75 - 1.0).collect();
        Self {
            vocab,
            logits,
            n_ctx: 64,
            fail_decode: false,
            decode_calls: 0,
            last_batch: None,
            decoded: None,
        }
    }

    pub(crate) fn with_n_ctx(mut self, n_ctx: usize) -> Self {
        self.n_ctx = n_ctx;
        self
    }

    pub(crate) fn with_logits(mut self, logits: Vec<f32>) -> Self {
        assert_eq!(logits.len(), self.vocab.len() + 1);
        self.logits = logits;
        self
    }

    pub(crate) fn token_of(&self, c: char) -> LlamaToken {
        let idx = self.vocab.iter().position(|&v| v == c).expect("char in vocab");
        LlamaToken(idx as i32 + 1)
    }
}

impl TokenModel for MockModel {
    fn tokenize(&self, text: &str, add_bos: bool) -> Result<Vec<LlamaToken>> {
        let mut tokens = Vec::new();
        if add_bos {
            tokens.push(BOS);
        }
        tokens.extend(
            text.chars()
                .filter_map(|c| self.vocab.iter().position(|&v| v == c))
                .map(|i| LlamaToken(i as i32 + 1)),
        );
        Ok(tokens)
    }

    fn token_to_piece(&self, token: LlamaToken) -> String {
        match token.0 {
            0 => "<s>".to_string(),
            id => self
                .vocab
                .get(id as usize - 1)
                .map(|c| c.to_string())
                .unwrap_or_else(|| format!("<{}>", id)),
        }
    }

    fn context_length(&self) -> usize {
        self.n_ctx
    }

    fn vocab_size(&self) -> usize {
        self.logits.len()
    }

    fn decode(&mut self, batch: &TokenBatch) -> Result<()> {
        self.decode_calls += 1;
        self.last_batch = Some(batch.clone());
        if self.fail_decode {
            self.decoded = None;
            return Err(ProbeError::inference("scripted decode failure"));
        }
        self.decoded = batch.logits_index();
        Ok(())
    }

    fn logits_ith(&self, index: usize) -> Result<&[f32]> {
        match self.decoded {
            Some(i) if i == index => Ok(&self.logits),
            _ => Err(ProbeError::inference(format!(
                "no logits at batch index {}",
                index
            ))),
        }
    }
}
