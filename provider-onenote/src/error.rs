//! Error types for the OneNote provider

use bridge_traits::error::BridgeError;
use thiserror::Error;

/// OneNote provider errors
#[derive(Error, Debug)]
pub enum OneNoteError {
    /// Access token rejected (401/403)
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Graph returned a non-retryable error status
    #[error("Graph API error (status {status_code}): {message}")]
    ApiError { status_code: u16, message: String },

    /// Graph throttled the request (429)
    #[error("Rate limited by Graph, retry after {retry_after_seconds:?} seconds")]
    RateLimited { retry_after_seconds: Option<u64> },

    /// Graph answered 5xx
    #[error("Graph service unavailable (status {status_code})")]
    ServiceUnavailable { status_code: u16 },

    #[error("Resource not found: {resource}")]
    NotFound { resource: String },

    /// Failed to parse API response
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

/// Result type for OneNote operations
pub type Result<T> = std::result::Result<T, OneNoteError>;

impl From<OneNoteError> for BridgeError {
    fn from(error: OneNoteError) -> Self {
        match error {
            OneNoteError::RateLimited {
                retry_after_seconds,
            } => BridgeError::RateLimited {
                retry_after_secs: retry_after_seconds,
            },
            OneNoteError::ServiceUnavailable { status_code } => {
                BridgeError::Unavailable(format!("Graph returned status {}", status_code))
            }
            OneNoteError::NotFound { resource } => BridgeError::NotFound(resource),
            OneNoteError::AuthenticationFailed(msg) => {
                BridgeError::OperationFailed(format!("Authentication failed: {}", msg))
            }
            OneNoteError::ApiError {
                status_code,
                message,
            } => BridgeError::OperationFailed(format!(
                "API error (status {}): {}",
                status_code, message
            )),
            OneNoteError::ParseError(msg) => {
                BridgeError::OperationFailed(format!("Parse error: {}", msg))
            }
            OneNoteError::Bridge(e) => e,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = OneNoteError::ApiError {
            status_code: 400,
            message: "Bad request".to_string(),
        };

        assert_eq!(error.to_string(), "Graph API error (status 400): Bad request");
    }

    #[test]
    fn test_error_conversion() {
        let throttled: BridgeError = OneNoteError::RateLimited {
            retry_after_seconds: Some(30),
        }
        .into();
        assert!(matches!(
            throttled,
            BridgeError::RateLimited {
                retry_after_secs: Some(30)
            }
        ));

        let unavailable: BridgeError = OneNoteError::ServiceUnavailable { status_code: 503 }.into();
        assert!(unavailable.is_transient());

        let missing: BridgeError = OneNoteError::NotFound {
            resource: "page p1".to_string(),
        }
        .into();
        assert!(matches!(missing, BridgeError::NotFound(_)));

        let auth: BridgeError = OneNoteError::AuthenticationFailed("expired".to_string()).into();
        assert!(matches!(auth, BridgeError::OperationFailed(_)));
    }
}
