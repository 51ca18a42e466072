/// Error types for the Sparklink client core
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SparkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// The REST backend rejected the request.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Realtime channel could not be opened or broke mid-flight.
    #[error("channel error: {0}")]
    Channel(String),

    /// Request/ack call attempted without an open connection.
    #[error("not connected")]
    NotConnected,

    /// No acknowledgement arrived within the bounded wait.
    #[error("no acknowledgement for {event} within {timeout_ms}ms")]
    AckTimeout { event: &'static str, timeout_ms: u64 },

    /// The server acknowledged the request with an error status.
    #[error("server rejected {event}: {message}")]
    Rejected { event: &'static str, message: String },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("configuration error: {0}")]
    Config(String),

    /// Caller supplied an unusable argument (empty id, bad input).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("authentication error: {0}")]
    Auth(String),
}

pub type Result<T> = std::result::Result<T, SparkError>;
