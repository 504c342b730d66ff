use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    /// The remote answered 429; `retry_after_secs` mirrors the `Retry-After` header.
    #[error("Rate limited by remote (retry after {retry_after_secs:?}s)")]
    RateLimited { retry_after_secs: Option<u64> },

    /// Server-side or network failure worth retrying.
    #[error("Remote unavailable: {0}")]
    Unavailable(String),

    #[error("Remote resource not found: {0}")]
    NotFound(String),
}

impl BridgeError {
    /// Whether a retry with backoff may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, BridgeError::Unavailable(_))
    }

    /// Whether this error is a throttling signal rather than a failure.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, BridgeError::RateLimited { .. })
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(BridgeError::Unavailable("503".to_string()).is_transient());
        assert!(!BridgeError::NotFound("page".to_string()).is_transient());
        assert!(BridgeError::RateLimited {
            retry_after_secs: Some(5)
        }
        .is_rate_limited());
        assert!(!BridgeError::OperationFailed("bad".to_string()).is_rate_limited());
    }

    #[test]
    fn test_rate_limited_display() {
        let error = BridgeError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert_eq!(
            error.to_string(),
            "Rate limited by remote (retry after Some(30)s)"
        );
    }
}
