/// Error types for minikit.
/// One enum covers the server registry, the cipher and the helpers around them.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KitError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Integrity error: {0}")]
    IntegrityError(String),

    #[error("Server not found: {0}")]
    ServerNotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Privilege error: {0}")]
    PrivilegeError(String),

    #[error("Application error: {0}")]
    AppError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, KitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KitError::IntegrityError("digest mismatch".to_string());
        assert!(err.to_string().contains("Integrity error"));
        assert!(err.to_string().contains("digest mismatch"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let kit_err: KitError = io_err.into();
        assert!(kit_err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let kit_err: KitError = json_err.into();
        assert!(matches!(kit_err, KitError::JsonError(_)));
    }

    #[test]
    fn test_result_type() {
        let ok_result: Result<i32> = Ok(42);
        let err_result: Result<i32> = Err(KitError::ServerNotFound("bogus".to_string()));

        assert!(ok_result.is_ok());
        assert!(err_result.is_err());
    }
}
