//! Structured errors for the external service clients.
//!
//! The completion and embedding services both signal throttling in a way the
//! orchestrators must distinguish from genuine failures: rate limits are
//! retried with backoff, everything else follows the component's failure
//! policy. Modeling `Throttled` as its own variant keeps that dispatch typed
//! instead of string-matching status codes.

use thiserror::Error;

/// Error returned by the completion and embedding service clients.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service signalled rate limiting (HTTP 429). Retryable.
    #[error("service rate limited")]
    Throttled,

    /// The service rejected the request or failed server-side.
    #[error("service error {status}: {message}")]
    Api { status: u16, message: String },

    /// The request never produced an HTTP response.
    #[error("network error: {0}")]
    Network(String),

    /// The response arrived but could not be interpreted.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ServiceError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, ServiceError::Throttled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttled_is_distinguishable() {
        assert!(ServiceError::Throttled.is_throttled());
        assert!(!ServiceError::Api {
            status: 500,
            message: "boom".into()
        }
        .is_throttled());
        assert!(!ServiceError::Network("reset".into()).is_throttled());
    }
}
