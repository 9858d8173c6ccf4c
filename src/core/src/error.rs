use thiserror::Error;

/// Image packer error types
#[derive(Error, Debug)]
pub enum PackerError {
    /// Caller supplied an empty or disallowed image reference
    #[error("Invalid image reference: {0}")]
    InvalidReference(String),

    /// Docker daemon answered with a non-success status
    #[error("Docker daemon error ({status}): {message}")]
    Daemon { status: u16, message: String },

    /// Docker daemon could not be reached
    #[error("Docker connection error: {0}")]
    Connection(String),

    /// The event channel is closed; the client went away
    #[error("Client disconnected")]
    ClientGone,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for PackerError {
    fn from(err: serde_json::Error) -> Self {
        PackerError::Serialization(err.to_string())
    }
}

impl PackerError {
    /// Whether the error means the client stopped listening.
    pub fn is_client_gone(&self) -> bool {
        matches!(self, PackerError::ClientGone)
    }
}

/// Result type alias for image packer operations
pub type Result<T> = std::result::Result<T, PackerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_reference_display() {
        let error = PackerError::InvalidReference("nginx;rm".to_string());
        assert_eq!(error.to_string(), "Invalid image reference: nginx;rm");
    }

    #[test]
    fn test_daemon_error_display() {
        let error = PackerError::Daemon {
            status: 404,
            message: "pull access denied for nope".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Docker daemon error (404): pull access denied for nope"
        );
    }

    #[test]
    fn test_connection_error_display() {
        let error = PackerError::Connection("connection refused".to_string());
        assert_eq!(
            error.to_string(),
            "Docker connection error: connection refused"
        );
    }

    #[test]
    fn test_client_gone() {
        let error = PackerError::ClientGone;
        assert!(error.is_client_gone());
        assert_eq!(error.to_string(), "Client disconnected");
        assert!(!PackerError::Config("x".to_string()).is_client_gone());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let error: PackerError = io_error.into();
        assert!(matches!(error, PackerError::Io(_)));
        assert!(error.to_string().contains("disk full"));
    }

    #[test]
    fn test_serde_json_error_conversion() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope");
        let error: PackerError = result.unwrap_err().into();
        assert!(matches!(error, PackerError::Serialization(_)));
    }
}
