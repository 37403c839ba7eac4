//! Error types for the normalized cache.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

/// A requested field (or the record holding it) is not in the cache.
///
/// Always names the record key, and the field when the record itself was
/// found, so that "not cached" stays distinguishable from a cached `null`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMissError {
    key: String,
    field: Option<String>,
}

impl CacheMissError {
    /// Miss on a field of an existing record.
    #[must_use]
    pub fn field(key: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            field: Some(field.into()),
        }
    }

    /// Miss on a whole record.
    #[must_use]
    pub fn record(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            field: None,
        }
    }

    /// Key of the record that was read.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Storage name of the missing field, if the record was present.
    #[must_use]
    pub fn field_name(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// Dotted field path of the miss (`QUERY_ROOT.hero.name`).
    #[must_use]
    pub fn field_path(&self) -> String {
        match &self.field {
            Some(field) => format!("{}.{field}", self.key),
            None => self.key.clone(),
        }
    }
}

impl fmt::Display for CacheMissError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "object '{}' has no field named '{field}'", self.key),
            None => write!(f, "object '{}' not found", self.key),
        }
    }
}

impl std::error::Error for CacheMissError {}

/// Failure reported by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// A stored record could not be decoded.
    #[error("corrupt record '{key}': {message}")]
    Corrupt {
        /// Record key.
        key: String,
        /// Decoder message.
        message: String,
    },

    /// The backend could not be reached.
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),

    /// An optimistic record was pushed without a mutation id.
    #[error("optimistic record '{0}' carries no mutation id")]
    UntaggedOptimisticRecord(String),
}

/// Error type for cache and store operations.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// Requested data is not cached.
    #[error("cache miss: {0}")]
    Miss(#[from] CacheMissError),

    /// Response data does not match its selections.
    #[error("normalization failed at '{path}': {message}")]
    Normalization {
        /// Field path where the walk stopped.
        path: String,
        /// Details.
        message: String,
    },

    /// JSON conversion error.
    #[error("JSON error: {0}")]
    Json(String),

    /// Variables did not serialize to a JSON object.
    #[error("invalid variables: {0}")]
    InvalidVariables(String),

    /// Backend failure.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl CacheError {
    /// Returns the miss if this error is a cache miss.
    #[must_use]
    pub const fn as_miss(&self) -> Option<&CacheMissError> {
        match self {
            Self::Miss(miss) => Some(miss),
            _ => None,
        }
    }
}

type StorageErrorHook = Arc<dyn Fn(&StorageError) + Send + Sync>;

static STORAGE_ERROR_HOOK: RwLock<Option<StorageErrorHook>> = parking_lot::const_rwlock(None);

/// Install the process-wide hook that observes storage backend failures.
///
/// Failed reads behave as absent data and failed writes as no-ops; the hook
/// is the only place those failures become visible.
pub fn set_storage_error_hook<F>(hook: F)
where
    F: Fn(&StorageError) + Send + Sync + 'static,
{
    *STORAGE_ERROR_HOOK.write() = Some(Arc::new(hook));
}

/// Remove the process-wide storage error hook.
pub fn clear_storage_error_hook() {
    *STORAGE_ERROR_HOOK.write() = None;
}

pub(crate) fn report_storage_error(operation: &'static str, error: &StorageError) {
    tracing::error!(operation, error = %error, "normalized cache backend failed");
    let hook = STORAGE_ERROR_HOOK.read().clone();
    if let Some(hook) = hook {
        hook(error);
    }
}
