//! Error types for Code Runner.

use thiserror::Error;

/// Result type alias using Code Runner's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for Code Runner.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("User is not verified: {0}. Please verify your account first.")]
    Unverified(String),

    #[error("Function not found: {0}")]
    FunctionNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unsupported language: {0}")]
    UnsupportedLanguage(String),

    // =========================================================================
    // Sandbox Errors
    // =========================================================================
    #[error("Error building Docker image: {0}")]
    BuildFailed(String),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Workspace error: {0}")]
    Workspace(String),

    // =========================================================================
    // Store Errors
    // =========================================================================
    #[error("Storage error: {0}")]
    Storage(String),

    // =========================================================================
    // Generic Errors
    // =========================================================================
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Create a build failure carrying the builder's diagnostic output.
    pub fn build_failed(diagnostic: impl Into<String>) -> Self {
        Self::BuildFailed(diagnostic.into())
    }

    /// Create a sandbox infrastructure error.
    pub fn sandbox(msg: impl Into<String>) -> Self {
        Self::Sandbox(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Short machine-readable code used in error responses.
    pub fn code(&self) -> &'static str {
        match self {
            Error::UserNotFound(_) => "USER_NOT_FOUND",
            Error::Unverified(_) => "USER_UNVERIFIED",
            Error::FunctionNotFound(_) => "FUNCTION_NOT_FOUND",
            Error::InvalidRequest(_) => "INVALID_REQUEST",
            Error::UnsupportedLanguage(_) => "UNSUPPORTED_LANGUAGE",
            Error::BuildFailed(_) => "BUILD_FAILED",
            Error::Sandbox(_) => "SANDBOX_ERROR",
            Error::Workspace(_) => "WORKSPACE_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Serialization(_) => "SERIALIZATION_ERROR",
            Error::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Workspace(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_failed_display() {
        let err = Error::build_failed("pip: No matching distribution found for nump");
        let msg = err.to_string();
        assert!(msg.starts_with("Error building Docker image"));
        assert!(msg.contains("nump"));
        assert_eq!(err.code(), "BUILD_FAILED");
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::UserNotFound("bob".into()).code(), "USER_NOT_FOUND");
        assert_eq!(Error::Unverified("bob".into()).code(), "USER_UNVERIFIED");
        assert_eq!(Error::sandbox("daemon down").code(), "SANDBOX_ERROR");
        assert_eq!(Error::internal("x").code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_io_error_maps_to_workspace() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: Error = io.into();
        assert!(matches!(err, Error::Workspace(_)));
    }
}
