/// Shared error type used across all ensemble crates.
///
/// Domain-level refusals (a denied kill, a policy deny, an unsafe resource
/// grant) are **values** returned by the relevant subsystem, not variants
/// here. This enum covers API misuse and infrastructure failures only.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("bad request: {0}")]
    Request(String),

    #[error("lifecycle: {0}")]
    Lifecycle(String),

    #[error("{0} is disposed")]
    Disposed(&'static str),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True when the error indicates use of an already-disposed subsystem.
    pub fn is_disposed(&self) -> bool {
        matches!(self, Error::Disposed(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
