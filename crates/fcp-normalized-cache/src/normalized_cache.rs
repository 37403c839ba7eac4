//! Storage contract shared by every cache backend.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use crate::error::StorageError;
use crate::headers::CacheHeaders;
use crate::record::{Record, RecordMerger};

/// Full cache contents partitioned by backend kind, then by record key.
pub type CacheDump = BTreeMap<String, BTreeMap<String, Record>>;

/// A storage backend for records.
///
/// Backends form a chain: each one owns the next and forwards misses to it.
/// Reads take `&self` so that many readers can share a backend under a read
/// lock; backends that track recency or evict on read use interior locking.
pub trait NormalizedCache: Send + Sync + fmt::Debug {
    /// Backend label used to partition [`dump`](Self::dump).
    fn kind(&self) -> &str;

    /// Load one record.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read.
    fn load_record(
        &self,
        key: &str,
        headers: &CacheHeaders,
    ) -> Result<Option<Record>, StorageError>;

    /// Load several records. Missing keys are skipped and the output order is
    /// unspecified.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be read.
    fn load_records(
        &self,
        keys: &[String],
        headers: &CacheHeaders,
    ) -> Result<Vec<Record>, StorageError>;

    /// Merge one record, returning the field paths whose value changed.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be written.
    fn merge(
        &mut self,
        record: Record,
        headers: &CacheHeaders,
        merger: &dyn RecordMerger,
    ) -> Result<HashSet<String>, StorageError>;

    /// Merge several records, returning the union of changed field paths.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be written.
    fn merge_records(
        &mut self,
        records: Vec<Record>,
        headers: &CacheHeaders,
        merger: &dyn RecordMerger,
    ) -> Result<HashSet<String>, StorageError> {
        let mut changed = HashSet::new();
        for record in records {
            changed.extend(self.merge(record, headers, merger)?);
        }
        Ok(changed)
    }

    /// Remove a record and, with `cascade`, every record reachable only
    /// through it. Returns `true` if anything was removed.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be written.
    fn remove(&mut self, key: &str, cascade: bool) -> Result<bool, StorageError>;

    /// Remove every record.
    ///
    /// # Errors
    /// Returns an error if the backend cannot be written.
    fn clear_all(&mut self) -> Result<(), StorageError>;

    /// Snapshot of the contents, for tests and tooling.
    fn dump(&self) -> CacheDump;
}
