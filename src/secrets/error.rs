//! Error types for lease, session, and secret retrieval operations.

use thiserror::Error;

/// Result type for secrets operations.
pub type Result<T> = std::result::Result<T, SecretsError>;

/// Errors that can occur while fetching, renewing, or revoking leased secrets.
#[derive(Error, Debug)]
pub enum SecretsError {
    /// Secret not found at the requested path.
    #[error("Secret not found: {path}")]
    NotFound { path: String },

    /// Failed to reach the secret store.
    #[error("Backend connection failed: {message}")]
    ConnectionFailed { message: String },

    /// Login, token renewal, or token lookup was rejected.
    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    /// A caller supplied a value the operation cannot accept.
    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    /// The secret store answered with an error status.
    #[error("Backend error (status {status}): {message}")]
    BackendError { status: u16, message: String },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl SecretsError {
    /// Create a not found error.
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Create a connection failed error.
    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::ConnectionFailed { message: message.into() }
    }

    /// Create an authentication failed error.
    pub fn authentication_failed(message: impl Into<String>) -> Self {
        Self::AuthenticationFailed { message: message.into() }
    }

    /// Create an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// Create a backend error carrying the HTTP status.
    pub fn backend_error(status: u16, message: impl Into<String>) -> Self {
        Self::BackendError { status, message: message.into() }
    }

    /// Create a config error.
    pub fn config_error(message: impl Into<String>) -> Self {
        Self::ConfigError { message: message.into() }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Whether this error came from the transport rather than from the secret store.
    ///
    /// Used by [`LeaseStrategy::RetainOnIoError`](super::LeaseStrategy::RetainOnIoError)
    /// to keep a lease across network hiccups while dropping it on a definite refusal.
    pub fn is_io(&self) -> bool {
        matches!(self, Self::ConnectionFailed { .. } | Self::IoError(_))
    }

    /// Whether the secret store reported the path as absent.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. } | Self::BackendError { status: 404, .. })
    }

    /// An owned copy with the same variant and message.
    ///
    /// Wrapped `serde_json` errors cannot be copied and become [`SecretsError::Internal`].
    pub fn replicate(&self) -> Self {
        match self {
            Self::NotFound { path } => Self::not_found(path.clone()),
            Self::ConnectionFailed { message } => Self::connection_failed(message.clone()),
            Self::AuthenticationFailed { message } => Self::authentication_failed(message.clone()),
            Self::InvalidArgument { message } => Self::invalid_argument(message.clone()),
            Self::BackendError { status, message } => Self::backend_error(*status, message.clone()),
            Self::ConfigError { message } => Self::config_error(message.clone()),
            Self::SerializationError(e) => Self::internal(format!("Serialization error: {}", e)),
            Self::IoError(e) => Self::IoError(std::io::Error::new(e.kind(), e.to_string())),
            Self::Internal { message } => Self::internal(message.clone()),
        }
    }
}

impl From<reqwest::Error> for SecretsError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return Self::internal(format!("Malformed response from Vault: {}", err));
        }
        match err.status() {
            Some(status) => Self::backend_error(status.as_u16(), err.to_string()),
            None => Self::connection_failed(err.to_string()),
        }
    }
}

impl From<vaultrs::error::ClientError> for SecretsError {
    fn from(err: vaultrs::error::ClientError) -> Self {
        match err {
            vaultrs::error::ClientError::APIError { code, errors } => {
                let message = errors.join("; ");
                match code {
                    400 | 401 | 403 => Self::authentication_failed(message),
                    _ => Self::backend_error(code, message),
                }
            }
            other => Self::connection_failed(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_constructors() {
        let err = SecretsError::not_found("database/creds/readonly");
        assert!(matches!(err, SecretsError::NotFound { .. }));
        assert_eq!(err.to_string(), "Secret not found: database/creds/readonly");

        let err = SecretsError::connection_failed("timeout");
        assert!(matches!(err, SecretsError::ConnectionFailed { .. }));

        let err = SecretsError::invalid_argument("lease id must not be empty");
        assert!(matches!(err, SecretsError::InvalidArgument { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = SecretsError::backend_error(503, "sealed");
        assert!(err.to_string().contains("503"));
        assert!(err.to_string().contains("sealed"));
    }

    #[test]
    fn test_io_classification() {
        assert!(SecretsError::connection_failed("reset").is_io());
        assert!(SecretsError::IoError(std::io::Error::other("broken pipe")).is_io());
        assert!(!SecretsError::backend_error(400, "lease not found").is_io());
        assert!(!SecretsError::authentication_failed("permission denied").is_io());
    }

    #[test]
    fn test_not_found_classification() {
        assert!(SecretsError::not_found("kv/app").is_not_found());
        assert!(SecretsError::backend_error(404, "no handler").is_not_found());
        assert!(!SecretsError::backend_error(500, "boom").is_not_found());
    }

    #[test]
    fn test_replicate_keeps_classification() {
        let err = SecretsError::IoError(std::io::Error::other("broken pipe"));
        let copy = err.replicate();
        assert!(copy.is_io());
        assert_eq!(copy.to_string(), err.to_string());

        let copy = SecretsError::backend_error(404, "gone").replicate();
        assert!(copy.is_not_found());
    }

    #[test]
    fn test_vaultrs_api_error_mapping() {
        let err: SecretsError = vaultrs::error::ClientError::APIError {
            code: 403,
            errors: vec!["permission denied".to_string()],
        }
        .into();
        assert!(matches!(err, SecretsError::AuthenticationFailed { .. }));

        let err: SecretsError =
            vaultrs::error::ClientError::APIError { code: 500, errors: vec![] }.into();
        assert!(matches!(err, SecretsError::BackendError { status: 500, .. }));
    }
}
