//! Named byte blobs shared between the service and the workers.
//!
//! Scenarios are written here before dispatch so every tile worker can
//! fetch them, and finished output grids are written here on completion.
//! A `put` that returned `Ok` is assumed durable.

use async_trait::async_trait;

pub mod local;
pub mod memory;
pub mod s3;

pub use local::LocalStorage;
pub use memory::MemoryStorage;
pub use s3::S3Storage;

/// Errors from the storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Invalid storage key '{0}'")]
    InvalidKey(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store `bytes` under `key`, replacing any previous blob.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StorageError>;

    /// Fetch the blob stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
}

/// Reject keys that are empty, absolute, or try to escape the namespace.
pub(crate) fn validate_key(key: &str) -> Result<(), StorageError> {
    let escapes = key
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if key.is_empty() || key.starts_with('/') || key.contains('\\') || escapes {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_and_nested_keys_are_valid() {
        assert!(validate_key("job.access").is_ok());
        assert!(validate_key("project-1/jobs.grid").is_ok());
    }

    #[test]
    fn escaping_keys_are_rejected() {
        for key in ["", "/etc/passwd", "../x", "a/../b", "a//b", "a\\b", "a/./b"] {
            assert!(validate_key(key).is_err(), "{key} should be rejected");
        }
    }
}
