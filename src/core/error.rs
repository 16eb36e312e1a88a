use thiserror::Error;

/// Error kinds surfaced by the tier engines.
///
/// None of these are fatal to a batch: every tier converts them into a
/// per-URL record and continues. `Auth` is the one kind raised eagerly at
/// client construction, before any URL is attempted.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("credentials error: {0}")]
    Auth(String),

    #[error("content rejected: {0}")]
    ClassifierReject(String),

    #[error("{0}")]
    Exhausted(String),
}

impl FetchError {
    /// Map a reqwest failure onto the taxonomy.
    pub fn from_reqwest(err: reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(timeout_secs)
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}
