use thiserror::Error;

#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Bad call-site input, e.g. an out-of-range timestamp or a metric kind
    /// the historical API does not accept.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("missing credential: {0} is not set")]
    MissingCredential(&'static str),

    #[error("metrics API error: {0}")]
    Api(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The background thread that owns the HTTP client has stopped.
    #[error("series submission worker is not running")]
    WorkerStopped,

    #[error("transport setup failed: {0}")]
    Transport(#[from] std::io::Error),
}

/// Result type for metric and span operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;
