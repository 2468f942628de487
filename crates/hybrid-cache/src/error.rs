//! Error types for the hybrid cache.

use std::time::Duration;

use thiserror::Error;

/// Result type for cache-layer operations
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors surfaced by the cache layer.
///
/// Errors raised by a caller-supplied computation never pass through this
/// type: `get_or_set` is generic over the caller's error `E: From<CacheError>`
/// so the computation's own error reaches the caller unchanged.
#[derive(Debug, Error)]
pub enum CacheError {
    /// A lock-protected operation could not obtain its mutex in time
    #[error("could not acquire lock for cache key '{key}' within {timeout:?}")]
    LockAcquisitionTimeout { key: String, timeout: Duration },

    /// Shared tier or lock service unreachable or failing
    #[error("cache backend error: {0}")]
    Backend(String),

    /// A value could not be encoded for storage
    #[error("failed to serialize value for cache key '{key}': {message}")]
    Serialization { key: String, message: String },

    /// The caller's cancellation signal fired
    #[error("cache operation cancelled")]
    Cancelled,

    /// Invalid configuration or backend setup
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// Create a new LockAcquisitionTimeout error
    pub fn lock_timeout(key: impl Into<String>, timeout: Duration) -> Self {
        Self::LockAcquisitionTimeout {
            key: key.into(),
            timeout,
        }
    }

    /// Create a new Backend error
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockAcquisitionTimeout { .. })
    }

    pub fn is_backend_error(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        CacheError::Backend(format!("redis: {err}"))
    }
}

impl From<deadpool_redis::PoolError> for CacheError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        CacheError::Backend(format!("redis pool: {err}"))
    }
}

/// A stored payload that no longer decodes as the requested type.
///
/// Handled inside the provider (the entry is deleted and the read becomes a
/// miss); it never reaches callers.
#[derive(Debug, Error)]
#[error("corrupted cache entry: {0}")]
pub(crate) struct CorruptedEntry(pub(crate) String);
