//! Error types for probability queries

/// Errors that can occur while loading a model or answering a query.
#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("prompt is {n_tokens} tokens but the context holds {n_ctx}")]
    ContextOverflow { n_tokens: usize, n_ctx: usize },

    #[error("inference failed")]
    Inference(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("numeric fault: {0}")]
    Numeric(String),

    #[error("unknown model variant: '{0}'")]
    UnknownVariant(String),

    #[error("download failed")]
    Download(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("model load failed")]
    ModelLoad(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("tokenizer load failed")]
    TokenizerLoad(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("no query worker is running")]
    WorkerUnavailable,
}

/// Who is at fault for an error, as seen by a front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or oversized request; retrying unchanged will not help.
    Client,
    /// Model, runtime or service failure.
    Server,
}

impl ProbeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProbeError::InvalidInput(_)
            | ProbeError::ContextOverflow { .. }
            | ProbeError::UnknownVariant(_) => ErrorKind::Client,
            ProbeError::Inference(_)
            | ProbeError::Numeric(_)
            | ProbeError::Download(_)
            | ProbeError::ModelLoad(_)
            | ProbeError::TokenizerLoad(_)
            | ProbeError::WorkerUnavailable => ErrorKind::Server,
        }
    }

    /// Shorthand for wrapping a message as an inference failure.
    pub(crate) fn inference(msg: impl Into<String>) -> Self {
        ProbeError::Inference(msg.into().into())
    }
}

pub type Result<T> = std::result::Result<T, ProbeError>;
