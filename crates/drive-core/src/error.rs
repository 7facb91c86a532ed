//! Unified error taxonomy for the Drive SDK
//!
//! The public surface reports every failure through one closed enum. Per-node
//! cryptographic failures are never raised from iteration surfaces; they are
//! folded into degraded nodes instead. Transport, rate-limit, and integrity
//! failures do surface as errors.

use crate::identifiers::UidParseError;
use crate::telemetry::TelemetryErrorKind;
use serde::{Deserialize, Serialize};

/// Convenience alias used across the SDK crates.
pub type Result<T> = std::result::Result<T, DriveError>;

/// API response code for a missing entity, carried by [`DriveError::NotFound`].
pub const API_CODE_NOT_FOUND: u64 = 2501;

/// Unified error type for all Drive SDK operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum DriveError {
    /// The operation was cancelled through its abort token.
    #[error("operation aborted")]
    Aborted,

    /// Inputs violate a precondition (empty or malformed names, bad UIDs).
    #[error("invalid input: {message}")]
    Validation {
        /// What precondition was violated.
        message: String,
    },

    /// The fetcher reported that the network is offline.
    #[error("offline: {message}")]
    Offline {
        /// Transport detail.
        message: String,
    },

    /// A request or transfer exceeded its timeout.
    #[error("timed out: {message}")]
    Timeout {
        /// Transport detail.
        message: String,
    },

    /// Any other transport fault.
    #[error("network error: {message}")]
    Network {
        /// Transport detail.
        message: String,
    },

    /// The 429 circuit breaker is open, or the server rate-limited us beyond
    /// the retry budget.
    #[error("rate limited: {message}")]
    RateLimited {
        /// What tripped the limit.
        message: String,
        /// Server-suggested wait, in seconds, when known.
        retry_after_secs: Option<u64>,
    },

    /// The 5xx circuit breaker is open, or the server failed irrecoverably.
    #[error("server error: {message}")]
    Server {
        /// Failure detail.
        message: String,
    },

    /// Non-2xx response without a typed JSON error body.
    #[error("http error {status}: {message}")]
    ApiHttp {
        /// HTTP status code.
        status: u16,
        /// Server message, when present.
        message: String,
    },

    /// Typed JSON error body with a non-OK code.
    #[error("api error {code}: {message}")]
    ApiCode {
        /// Envelope `Code` value.
        code: u64,
        /// Server-provided error string.
        message: String,
    },

    /// Specialization of [`DriveError::ApiCode`] for code 2501.
    #[error("not found: {message}")]
    NotFound {
        /// What was missing.
        message: String,
    },

    /// An OpenPGP operation failed while decrypting a field.
    #[error("decryption failed: {message}")]
    Decryption {
        /// Which operation failed.
        message: String,
    },

    /// A signature was missing or invalid. Decryption helpers never raise
    /// this directly; it is used where verification state must travel as an
    /// error value (degraded fields, telemetry).
    #[error("verification failed: {message}")]
    Verification {
        /// Which signature failed.
        message: String,
    },

    /// Digest or size mismatch at the end of a transfer, or a block verifier
    /// rejection during upload.
    #[error("integrity error: {message}")]
    Integrity {
        /// What did not match.
        message: String,
    },
}

impl DriveError {
    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create an offline transport error.
    pub fn offline(message: impl Into<String>) -> Self {
        Self::Offline {
            message: message.into(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a generic transport error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a rate-limit error without a suggested wait.
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after_secs: None,
        }
    }

    /// Create a server error.
    pub fn server(message: impl Into<String>) -> Self {
        Self::Server {
            message: message.into(),
        }
    }

    /// Create an error for a non-2xx response without a typed body.
    pub fn api_http(status: u16, message: impl Into<String>) -> Self {
        Self::ApiHttp {
            status,
            message: message.into(),
        }
    }

    /// Create an error from a typed JSON error body.
    ///
    /// Code 2501 is mapped to [`DriveError::NotFound`].
    pub fn api_code(code: u64, message: impl Into<String>) -> Self {
        let message = message.into();
        if code == API_CODE_NOT_FOUND {
            Self::NotFound { message }
        } else {
            Self::ApiCode { code, message }
        }
    }

    /// Create a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create a decryption error.
    pub fn decryption(message: impl Into<String>) -> Self {
        Self::Decryption {
            message: message.into(),
        }
    }

    /// Create a verification error.
    pub fn verification(message: impl Into<String>) -> Self {
        Self::Verification {
            message: message.into(),
        }
    }

    /// Create an integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Whether this error is an abort.
    pub fn is_abort(&self) -> bool {
        matches!(self, Self::Aborted)
    }

    /// Telemetry classification of this error.
    ///
    /// Aborts and validation errors are never reported as telemetry errors;
    /// they return `None`.
    pub fn telemetry_kind(&self) -> Option<TelemetryErrorKind> {
        match self {
            Self::Aborted | Self::Validation { .. } => None,
            Self::RateLimited { .. } => Some(TelemetryErrorKind::RateLimited),
            Self::Decryption { .. } | Self::Verification { .. } => {
                Some(TelemetryErrorKind::DecryptionError)
            }
            Self::Integrity { .. } => Some(TelemetryErrorKind::IntegrityError),
            Self::ApiHttp { status, .. } if (400..500).contains(status) => {
                Some(TelemetryErrorKind::Http4xx)
            }
            Self::ApiHttp { .. } => Some(TelemetryErrorKind::Http5xx),
            Self::Server { .. } | Self::ApiCode { .. } | Self::NotFound { .. } => {
                Some(TelemetryErrorKind::ServerError)
            }
            Self::Offline { .. } | Self::Timeout { .. } | Self::Network { .. } => {
                Some(TelemetryErrorKind::NetworkError)
            }
        }
    }
}

impl From<UidParseError> for DriveError {
    fn from(err: UidParseError) -> Self {
        Self::validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn api_code_2501_becomes_not_found() {
        assert_matches!(
            DriveError::api_code(2501, "no such link"),
            DriveError::NotFound { .. }
        );
        assert_matches!(
            DriveError::api_code(2000, "bad request"),
            DriveError::ApiCode { code: 2000, .. }
        );
    }

    #[test]
    fn aborts_and_validation_are_not_reported() {
        assert_eq!(DriveError::Aborted.telemetry_kind(), None);
        assert_eq!(DriveError::validation("empty name").telemetry_kind(), None);
        assert_eq!(
            DriveError::integrity("sha1 mismatch").telemetry_kind(),
            Some(TelemetryErrorKind::IntegrityError)
        );
    }

    #[test]
    fn http_status_classes_split_at_500() {
        assert_eq!(
            DriveError::api_http(404, "").telemetry_kind(),
            Some(TelemetryErrorKind::Http4xx)
        );
        assert_eq!(
            DriveError::api_http(503, "").telemetry_kind(),
            Some(TelemetryErrorKind::Http5xx)
        );
    }
}
