use thiserror::Error;

/// Errors reported by the external collaborators (admin api, command executor).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ApiError {
    #[error("domain {0} no longer exists")]
    NoSuchDomain(String),

    #[error("admin api unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ApiError {
    pub fn is_stale(&self) -> bool {
        matches!(self, ApiError::NoSuchDomain(_))
    }
}

#[derive(Debug, Error)]
pub enum TrayError {
    #[error("snapshot provider unavailable: {0}")]
    ProviderUnavailable(#[source] ApiError),

    #[error("unknown device {0}")]
    UnknownDevice(String),

    #[error("domain {0} is not running")]
    DomainNotRunning(String),

    #[error("cannot target {target}: {reason}")]
    InvalidTarget { target: String, reason: String },
}

impl TrayError {
    pub fn provider(err: ApiError) -> Self {
        TrayError::ProviderUnavailable(err)
    }
}
