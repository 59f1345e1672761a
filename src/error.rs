use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for hsdl
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration value
    #[error("configuration error: {message}")]
    Config {
        message: String,
        key: Option<String>,
    },

    /// Transport failure, timeout or non-success status
    #[error("network error: {0}")]
    Network(String),

    /// Server did not report the resource size
    #[error("essential header \"content-length\" is missing for {0}")]
    MissingContentLength(String),

    /// Assembled artifact does not match the size the server announced
    #[error("downloaded size ({actual} B) does not tally with the size given by server ({expected} B)")]
    SizeMismatch {
        expected: u64,
        actual: u64,
    },

    /// Timestamp or bound outside the range a stopwatch can answer for
    #[error("invalid range: {0}")]
    InvalidRange(String),

    /// Operation not allowed in the current state (double start, paused submit...)
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A worker task panicked or was cancelled
    #[error("worker failed: {0}")]
    Worker(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Shorthand for a configuration error tied to a key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Network(e.to_string())
    }
}
