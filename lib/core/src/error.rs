use crate::progress::Stage;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad table shape; never retried.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Provider transport/quota/auth failure that survived the retry budget.
    #[error("Embedding service error after {attempts} attempt(s): {message}")]
    EmbeddingService { message: String, attempts: usize },

    /// Provider answered, but the payload does not describe one vector per input.
    #[error("Malformed embedding response: {0}")]
    MalformedEmbeddingResponse(String),

    #[error("Cancelled during {0} stage")]
    Cancelled(Stage),

    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    /// Short machine-readable kind, used in logs and progress messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::MalformedInput(_) => "malformed-input",
            Error::EmbeddingService { .. } => "embedding-service",
            Error::MalformedEmbeddingResponse(_) => "malformed-embedding-response",
            Error::Cancelled(_) => "cancelled",
            Error::InternalInvariant(_) => "internal-invariant",
            Error::InvalidConfig(_) => "invalid-config",
            Error::Io(_) => "io",
        }
    }
}
