pub mod error;
pub mod model;
pub mod probe;
pub mod settings;

pub use error::{ErrorKind, ProbeError};
pub use model::{LlamaCppModel, LlamaCppSession, ModelOptions, TokenBatch, TokenModel};
pub use probe::{
    Normalization, ProbeHandle, ProbeQueue, ProbeReport, ProbeRequest, TokenProbability,
    TokenProbe,
};
pub use settings::Settings;
