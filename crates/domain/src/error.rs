/// Shared error type used across all browseragent crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("cancelled")]
    Cancelled,

    /// Raw non-success reply, raised by adapters and transports. The gateway
    /// decides whether it is an auth rejection or a provider error.
    #[error("protocol error (HTTP {status}): {body}")]
    Protocol { status: u16, body: String },

    #[error("provider {provider}: {message}")]
    Provider {
        provider: String,
        status: Option<u16>,
        message: String,
    },

    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("malformed stream event: {0}")]
    MalformedEvent(String),

    #[error("compaction: {0}")]
    Compaction(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// HTTP status carried by the error, when one is known.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Protocol { status, .. } => Some(*status),
            Error::Provider { status, .. } => *status,
            _ => None,
        }
    }

    /// A 401 from the upstream service.
    pub fn is_auth_rejection(&self) -> bool {
        self.status() == Some(401)
    }

    /// Timeout, abort, or transport-level failure.
    pub fn is_network(&self) -> bool {
        matches!(self, Error::Http(_) | Error::Timeout(_) | Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
