//! Per-request cache headers.

use std::collections::BTreeMap;

/// String headers that tune how a single read or write treats storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheHeaders {
    headers: BTreeMap<String, String>,
}

impl CacheHeaders {
    /// Drop the write entirely.
    pub const DO_NOT_STORE: &'static str = "do-not-store";
    /// Delete records right after they are read.
    pub const EVICT_AFTER_READ: &'static str = "evict-after-read";
    /// Keep writes out of any cache chained behind the memory cache.
    pub const MEMORY_CACHE_ONLY: &'static str = "memory-cache-only";

    /// No headers.
    #[must_use]
    pub fn none() -> Self {
        Self::default()
    }

    /// Add a header with value `"true"`.
    #[must_use]
    pub fn with_flag(self, name: &str) -> Self {
        self.with(name, "true")
    }

    /// Add a header.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Header value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// Returns `true` if the header is set to anything but `"false"`.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some_and(|value| value != "false")
    }

    /// Returns `true` if no header is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }
}
