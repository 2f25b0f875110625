use thiserror::Error;

/// Failures surfaced by the Karbon API client.
///
/// Callers treat most of these as "proceed with what we have": secondary
/// collections degrade to empty results. Only the primary timesheet fetch
/// turns one of these into a process-level failure.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{endpoint} returned HTTP {status}: {reason}")]
    Status {
        endpoint: String,
        status: u16,
        reason: String,
    },

    #[error("gave up on {endpoint} after {attempts} attempts: {reason}")]
    RetriesExhausted {
        endpoint: String,
        attempts: u32,
        reason: String,
    },

    #[error("transport error for {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("invalid JSON from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
