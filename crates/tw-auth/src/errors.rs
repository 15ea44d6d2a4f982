use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

use crate::validation::FieldErrors;

/// Errors raised by high-level client operations
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("No pending registration - register before verifying")]
    NotRegistered,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Error half of every dispatched request
///
/// The dispatcher never panics or throws for expected auth conditions; callers
/// branch on this value instead.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error {status}")]
    Http { status: StatusCode, body: Value },

    /// The body could not be decoded. `status` is the status of the response
    /// that carried it, so a 401 with an HTML body is still a 401.
    #[error("Failed to parse response (HTTP {status}): {message}")]
    Parse {
        status: StatusCode,
        body: String,
        message: String,
    },

    #[error("Failed to encode request body: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid header value: {0}")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Refresh endpoint returned HTTP {status} without a usable credential pair")]
    InvalidRefreshResponse { status: StatusCode },

    #[error("Request pipeline failed: {0}")]
    Internal(String),
}

impl ApiError {
    /// HTTP status behind the error, unwrapping parse failures to the
    /// status of the response that failed to parse
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Http { status, .. }
            | Self::Parse { status, .. }
            | Self::InvalidRefreshResponse { status } => Some(*status),
            Self::Network(e) => e.status(),
            _ => None,
        }
    }

    /// Whether this error should start the refresh protocol
    pub fn is_unauthorized(&self) -> bool {
        match self {
            // A refresh rejection is terminal, never a trigger for another refresh
            Self::InvalidRefreshResponse { .. } => false,
            _ => self.status() == Some(StatusCode::UNAUTHORIZED),
        }
    }
}

/// Persistence failures
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("Stored data is corrupted or was encrypted with another key")]
    CorruptedStore,

    #[error("Keyring error: {0}")]
    Keyring(String),

    #[error("Storage is locked by another process")]
    LockTimeout,

    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),

    #[error("No passphrase available to unlock storage")]
    PassphraseUnavailable,

    #[error("Storage lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, AuthError>;

/// Result of a dispatched request
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_error_keeps_original_status() {
        let err = ApiError::Parse {
            status: StatusCode::UNAUTHORIZED,
            body: "<html>Unauthorized</html>".to_string(),
            message: "expected value at line 1 column 1".to_string(),
        };

        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert!(err.is_unauthorized());
    }

    #[test]
    fn other_statuses_are_not_unauthorized() {
        let forbidden = ApiError::Http {
            status: StatusCode::FORBIDDEN,
            body: Value::Null,
        };
        let parse_ok = ApiError::Parse {
            status: StatusCode::OK,
            body: "not json".to_string(),
            message: "expected value".to_string(),
        };

        assert!(!forbidden.is_unauthorized());
        assert!(!parse_ok.is_unauthorized());
        assert!(!ApiError::Internal("boom".to_string()).is_unauthorized());
    }

    #[test]
    fn refresh_rejection_never_retriggers_refresh() {
        let err = ApiError::InvalidRefreshResponse {
            status: StatusCode::UNAUTHORIZED,
        };

        assert_eq!(err.status(), Some(StatusCode::UNAUTHORIZED));
        assert!(!err.is_unauthorized());
    }
}
