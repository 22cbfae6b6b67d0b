//! Storage layer error types.

use hub_types::HubError;
use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// Key absent
    #[error("Key not found: {0}")]
    NotFound(String),

    /// Conditional write precondition failed
    #[error("Conditional write lost: {0}")]
    Conflict(String),

    /// Filesystem, network or timeout failure
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Payload or metadata could not be decoded
    #[error("Corrupt data: {0}")]
    Corrupt(String),

    /// Key encoding/decoding error
    #[error("Key error: {0}")]
    Key(String),
}

impl StorageError {
    /// Map an I/O error on `key`, keeping absence and existence distinct.
    pub fn from_io(key: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(key.to_string()),
            std::io::ErrorKind::AlreadyExists => StorageError::Conflict(key.to_string()),
            _ => StorageError::BackendUnavailable(format!("{}: {}", key, err)),
        }
    }
}

impl From<StorageError> for HubError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => HubError::NotFound(key),
            StorageError::Conflict(key) => HubError::Conflict(key),
            StorageError::BackendUnavailable(msg) => HubError::BackendUnavailable(msg),
            StorageError::Corrupt(msg) => HubError::Corrupt(msg),
            StorageError::Key(msg) => HubError::InvalidInput(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_mapping() {
        let err = std::io::Error::from(std::io::ErrorKind::NotFound);
        assert!(matches!(StorageError::from_io("a", err), StorageError::NotFound(_)));

        let err = std::io::Error::from(std::io::ErrorKind::AlreadyExists);
        assert!(matches!(StorageError::from_io("a", err), StorageError::Conflict(_)));

        let err = std::io::Error::from(std::io::ErrorKind::PermissionDenied);
        assert!(matches!(
            StorageError::from_io("a", err),
            StorageError::BackendUnavailable(_)
        ));
    }

    #[test]
    fn test_hub_error_mapping() {
        let hub: HubError = StorageError::Conflict("prompts/x".to_string()).into();
        assert!(hub.is_conflict());
        let hub: HubError = StorageError::Key("bad".to_string()).into();
        assert!(matches!(hub, HubError::InvalidInput(_)));
    }
}
