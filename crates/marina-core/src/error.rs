use thiserror::Error;

/// Failure reported by a persistence backend. Backends flatten their native
/// errors into a message; the coordinator treats every variant the same way.
#[derive(Debug, Error)]
#[error("store backend error: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Typed outcome of a hosting operation.
///
/// The first seven variants are expected, user-facing rejections and are
/// never retried by the system. `Storage` and `WorkerStart` are logged with
/// full context and surfaced generically; the revalidation sweep is the
/// designed recovery path for any state they leave behind.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("rate limited; retry in {retry_after}s")]
    RateLimited { retry_after: u64 },
    /// Covers malformed structure, a failed liveness check, and an
    /// undecodable identity. Deliberately coarse so callers cannot tell
    /// which check rejected the credential.
    #[error("credential validation failed")]
    ValidationFailed,
    #[error("this account is blacklisted and cannot be hosted")]
    Blacklisted,
    #[error("requester is not authorized to host accounts")]
    Unauthorized,
    #[error("hosting limit of {limit} reached")]
    QuotaExceeded { limit: u32 },
    #[error("no hosted account matches that identifier")]
    NotFound,
    #[error("that account is not hosted by you")]
    NotOwned,
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("worker failed to start: {0}")]
    WorkerStart(String),
}

impl From<StoreError> for HostError {
    fn from(err: StoreError) -> Self {
        HostError::Storage(err.0)
    }
}

impl HostError {
    /// Whether the error should be shown to the user as-is. Internal
    /// failures get a generic message at the presentation boundary.
    pub fn is_user_facing(&self) -> bool {
        !matches!(self, HostError::Storage(_) | HostError::WorkerStart(_))
    }
}
