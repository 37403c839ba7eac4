//! Error types for the GraphQL client.

use fcp_normalized_cache::{CacheError, CacheMissError};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// HTTP error information captured from reqwest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorInfo {
    /// Error message.
    pub message: String,
    /// HTTP status code (if available).
    pub status_code: Option<u16>,
    /// Whether the error was a timeout.
    pub is_timeout: bool,
    /// Whether the error was a connection failure.
    pub is_connect: bool,
}

impl From<reqwest::Error> for HttpErrorInfo {
    fn from(err: reqwest::Error) -> Self {
        Self {
            message: err.to_string(),
            status_code: err.status().map(|status| status.as_u16()),
            is_timeout: err.is_timeout(),
            is_connect: err.is_connect(),
        }
    }
}

/// GraphQL error location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphqlErrorLocation {
    /// Line number in the query (1-based).
    pub line: u32,
    /// Column number in the query (1-based).
    pub column: u32,
}

/// GraphQL path segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GraphqlPathSegment {
    /// Field name.
    Key(String),
    /// Array index.
    Index(i64),
}

/// GraphQL error as returned in a response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphqlError {
    /// Human-readable error message.
    pub message: String,
    /// Location(s) within the query.
    #[serde(default)]
    pub locations: Vec<GraphqlErrorLocation>,
    /// Path within the response where the error occurred.
    #[serde(default)]
    pub path: Vec<GraphqlPathSegment>,
    /// Extensions metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl GraphqlError {
    /// Error with only a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: Vec::new(),
            extensions: None,
        }
    }
}

/// Error type for GraphQL client operations.
///
/// Cloneable so that one failure can annotate several responses.
#[derive(Debug, Clone, Error)]
pub enum GraphqlClientError {
    /// HTTP/network error.
    #[error("HTTP error: {}", .0.message)]
    Http(HttpErrorInfo),

    /// HTTP response status error.
    #[error("HTTP status {status} with body: {body}")]
    HttpStatus {
        /// HTTP status code.
        status: StatusCode,
        /// Response body (truncated if needed).
        body: String,
    },

    /// Transport failure that is not HTTP-specific.
    #[error("network error: {message}")]
    Network {
        /// Details.
        message: String,
    },

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(String),

    /// GraphQL protocol violation.
    #[error("GraphQL protocol error: {message}")]
    Protocol {
        /// Details.
        message: String,
    },

    /// GraphQL-level errors returned by the server, raised by callers that
    /// treat them as failures.
    #[error("GraphQL errors: {}", summarize(errors))]
    GraphqlErrors {
        /// GraphQL error list.
        errors: Vec<GraphqlError>,
    },

    /// Requested data is not cached.
    #[error("cache miss: {0}")]
    CacheMiss(CacheMissError),

    /// Cache failure other than a miss.
    #[error("cache error: {0}")]
    Cache(CacheError),

    /// Two failures of one fallthrough (cache then network, or the reverse).
    #[error("{first}; then {second}")]
    Composite {
        /// Failure of the first source consulted.
        first: Box<Self>,
        /// Failure of the fallback source.
        second: Box<Self>,
    },

    /// Synthetic first emission of a watch. Never a real failure.
    #[error("watch started; result pending")]
    WatcherSentinel,

    /// The client was disposed.
    #[error("client disposed")]
    Disposed,
}

fn summarize(errors: &[GraphqlError]) -> String {
    errors
        .iter()
        .map(|err| err.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<reqwest::Error> for GraphqlClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(HttpErrorInfo::from(err))
    }
}

impl From<serde_json::Error> for GraphqlClientError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<CacheMissError> for GraphqlClientError {
    fn from(err: CacheMissError) -> Self {
        Self::CacheMiss(err)
    }
}

impl From<CacheError> for GraphqlClientError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Miss(miss) => Self::CacheMiss(miss),
            other => Self::Cache(other),
        }
    }
}

impl GraphqlClientError {
    /// Combine the failures of a fallthrough.
    #[must_use]
    pub fn composite(first: Self, second: Self) -> Self {
        Self::Composite {
            first: Box::new(first),
            second: Box::new(second),
        }
    }

    /// Returns `true` for transport-level failures.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::HttpStatus { .. } | Self::Network { .. }
        )
    }

    /// Returns `true` for cache misses.
    #[must_use]
    pub const fn is_cache_miss(&self) -> bool {
        matches!(self, Self::CacheMiss(_))
    }

    /// Returns `true` for the synthetic first emission of a watch.
    #[must_use]
    pub const fn is_watcher_sentinel(&self) -> bool {
        matches!(self, Self::WatcherSentinel)
    }

    /// The cache miss, if this error is one or wraps one.
    #[must_use]
    pub fn cache_miss(&self) -> Option<&CacheMissError> {
        match self {
            Self::CacheMiss(miss) => Some(miss),
            Self::Composite { first, second } => first.cache_miss().or_else(|| second.cache_miss()),
            _ => None,
        }
    }
}
