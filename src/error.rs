use std::error::Error as StdError;
use std::sync::Arc;

/// Shared, cloneable form of an origin error.
pub type BoxError = Arc<dyn StdError + Send + Sync>;

/// Result type used throughout the crate.
pub type Result<T, E = CacheError> = std::result::Result<T, E>;

/// Error type for cache operations.
///
/// The type is `Clone` so that the single outcome of a suppressed load can be
/// handed to every caller that joined it.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// No entry exists and no loader could produce one.
    #[error("key not found")]
    KeyNotFound,

    /// The loader (or the origin behind it) failed.
    #[error("load failed: {0}")]
    LoadFailed(BoxError),

    /// The distributed lock could not be obtained in time.
    #[error("acquire lock failed: {0}")]
    LockAcquisitionFailed(String),

    /// Releasing the distributed lock failed. Only ever logged by the loaders.
    #[error("release lock failed: {0}")]
    LockReleaseFailed(String),

    /// A backend operation failed.
    #[error("[{tier}] cache error for key '{key}': {message}")]
    Operation {
        tier: String,
        key: String,
        message: String,
    },

    /// Encoding a value for the backend failed.
    #[error("marshal error: {0}")]
    Marshal(String),

    /// Decoding a value read from the backend failed.
    #[error("unmarshal error: {0}")]
    Unmarshal(String),

    /// The backend does not implement this operation.
    #[error("{operation} is not supported by the {tier} store")]
    Unsupported {
        tier: &'static str,
        operation: &'static str,
    },

    /// The store was closed.
    #[error("store is closed")]
    Closed,
}

impl CacheError {
    /// Create a new operation error.
    pub fn operation(
        tier: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CacheError::Operation {
            tier: tier.into(),
            key: key.into(),
            message: message.into(),
        }
    }

    /// Wrap an arbitrary origin error as [`CacheError::LoadFailed`].
    pub fn load<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        CacheError::LoadFailed(Arc::new(err))
    }

    /// Wrap a plain message as [`CacheError::LoadFailed`].
    pub fn load_msg(message: impl Into<String>) -> Self {
        CacheError::LoadFailed(Arc::new(Message(message.into())))
    }

    /// Returns `true` for [`CacheError::KeyNotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::KeyNotFound)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct Message(String);
