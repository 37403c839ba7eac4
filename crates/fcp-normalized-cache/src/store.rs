//! The store: single owner of the cache and the changed-keys stream.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::cache_key::{
    CacheKey, CacheKeyGenerator, TypePolicyCacheKeyGenerator, default_cache_key_generator,
};
use crate::compiled::{Executable, SelectionSet, Variables};
use crate::error::{CacheError, report_storage_error};
use crate::headers::CacheHeaders;
use crate::memory::MemoryCache;
use crate::normalized_cache::{CacheDump, NormalizedCache};
use crate::normalizer::Normalizer;
use crate::optimistic::OptimisticCache;
use crate::reader::CacheBatchReader;
use crate::record::{DefaultRecordMerger, Record, RecordMerger};
use crate::resolver::{CacheResolver, DefaultCacheResolver};

/// Default number of change notifications buffered per subscriber.
pub const DEFAULT_CHANGED_KEYS_CAPACITY: usize = 16;

/// One change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangedKeys {
    /// Unknown extent (`remove`, `clear_all`); every watcher must re-check.
    All,
    /// These field paths changed.
    Keys(Arc<HashSet<String>>),
}

impl ChangedKeys {
    /// Returns `true` if a watcher depending on `dependencies` must re-check.
    #[must_use]
    pub fn intersects(&self, dependencies: &HashSet<String>) -> bool {
        match self {
            Self::All => true,
            Self::Keys(keys) => {
                let (small, large) = if keys.len() <= dependencies.len() {
                    (keys.as_ref(), dependencies)
                } else {
                    (dependencies, keys.as_ref())
                };
                small.iter().any(|key| large.contains(key))
            }
        }
    }

    /// The changed paths, or `None` for [`ChangedKeys::All`].
    #[must_use]
    pub fn keys(&self) -> Option<&HashSet<String>> {
        match self {
            Self::All => None,
            Self::Keys(keys) => Some(keys),
        }
    }
}

/// Builder for [`NormalizedStore`].
#[derive(Debug)]
pub struct NormalizedStoreBuilder {
    cache: Option<Box<dyn NormalizedCache>>,
    key_generator: Arc<dyn CacheKeyGenerator>,
    resolver: Arc<dyn CacheResolver>,
    merger: Arc<dyn RecordMerger>,
    changed_keys_capacity: usize,
}

impl Default for NormalizedStoreBuilder {
    fn default() -> Self {
        Self {
            cache: None,
            key_generator: Arc::new(default_cache_key_generator(
                TypePolicyCacheKeyGenerator::new(),
            )),
            resolver: Arc::new(DefaultCacheResolver),
            merger: Arc::new(DefaultRecordMerger),
            changed_keys_capacity: DEFAULT_CHANGED_KEYS_CAPACITY,
        }
    }
}

impl NormalizedStoreBuilder {
    /// Use `cache` as the head of the storage chain.
    #[must_use]
    pub fn cache(mut self, cache: impl NormalizedCache + 'static) -> Self {
        self.cache = Some(Box::new(cache));
        self
    }

    /// Set the identity policy.
    #[must_use]
    pub fn key_generator(mut self, generator: impl CacheKeyGenerator + 'static) -> Self {
        self.key_generator = Arc::new(generator);
        self
    }

    /// Set the read policy.
    #[must_use]
    pub fn resolver(mut self, resolver: impl CacheResolver + 'static) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Set the merge policy.
    #[must_use]
    pub fn record_merger(mut self, merger: impl RecordMerger + 'static) -> Self {
        self.merger = Arc::new(merger);
        self
    }

    /// Notifications buffered per subscriber before the oldest are dropped.
    #[must_use]
    pub fn changed_keys_capacity(mut self, capacity: usize) -> Self {
        self.changed_keys_capacity = capacity.max(1);
        self
    }

    /// Build the store.
    #[must_use]
    pub fn build(self) -> NormalizedStore {
        let cache = self
            .cache
            .unwrap_or_else(|| Box::new(MemoryCache::default()));
        let (sender, _) = broadcast::channel(self.changed_keys_capacity);
        NormalizedStore {
            cache: RwLock::new(OptimisticCache::from_boxed(cache)),
            key_generator: self.key_generator,
            resolver: self.resolver,
            merger: self.merger,
            changed_keys: Mutex::new(Some(sender)),
        }
    }
}

/// Orchestrates normalization, storage, reads and change notification.
///
/// Reads share a read lock; every mutation takes the write lock. No lock is
/// ever held across an `.await`: all methods are synchronous and callers run
/// network I/O before or after them.
#[derive(Debug)]
pub struct NormalizedStore {
    cache: RwLock<OptimisticCache>,
    key_generator: Arc<dyn CacheKeyGenerator>,
    resolver: Arc<dyn CacheResolver>,
    merger: Arc<dyn RecordMerger>,
    changed_keys: Mutex<Option<broadcast::Sender<ChangedKeys>>>,
}

impl Default for NormalizedStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl NormalizedStore {
    /// Start building a store.
    #[must_use]
    pub fn builder() -> NormalizedStoreBuilder {
        NormalizedStoreBuilder::default()
    }

    /// Store over a single unbounded memory cache.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::builder().build()
    }

    /// Subscribe to change notifications.
    ///
    /// A subscriber that falls behind loses the oldest notifications and
    /// observes `RecvError::Lagged`, which must be treated as "re-check
    /// everything". After [`dispose`](Self::dispose) the receiver is closed.
    #[must_use]
    pub fn changed_keys(&self) -> broadcast::Receiver<ChangedKeys> {
        if let Some(sender) = self.changed_keys.lock().as_ref() {
            return sender.subscribe();
        }
        let (_, receiver) = broadcast::channel(1);
        receiver
    }

    /// Publish changed field paths. Empty sets are not published.
    pub fn publish(&self, keys: HashSet<String>) {
        if keys.is_empty() {
            return;
        }
        tracing::debug!(changed = keys.len(), "publishing changed keys");
        self.send(ChangedKeys::Keys(Arc::new(keys)));
    }

    /// Tell every subscriber to re-check.
    pub fn publish_all(&self) {
        tracing::debug!("publishing change of all keys");
        self.send(ChangedKeys::All);
    }

    fn send(&self, change: ChangedKeys) {
        if let Some(sender) = self.changed_keys.lock().as_ref() {
            // No receivers is not an error.
            let _ = sender.send(change);
        }
    }

    /// Identity policy in use.
    #[must_use]
    pub fn key_generator(&self) -> &dyn CacheKeyGenerator {
        self.key_generator.as_ref()
    }

    /// Normalize typed data without touching the cache.
    ///
    /// # Errors
    /// Returns an error if data or variables do not serialize, or if the data
    /// does not match the selections.
    pub fn normalize<E: Executable>(
        &self,
        root_key: &CacheKey,
        data: &E::Data,
        variables: &E::Variables,
    ) -> Result<HashMap<String, Record>, CacheError> {
        let variables = Variables::from_serialize(variables)?;
        let data = to_object(data)?;
        self.normalize_selections(root_key, &SelectionSet::of::<E>(), &data, &variables)
    }

    /// Normalize untyped data without touching the cache.
    ///
    /// # Errors
    /// Returns an error if the data does not match the selections.
    pub fn normalize_selections(
        &self,
        root_key: &CacheKey,
        selection_set: &SelectionSet,
        data: &Map<String, Value>,
        variables: &Variables,
    ) -> Result<HashMap<String, Record>, CacheError> {
        Normalizer::new(variables, self.key_generator.as_ref())
            .normalize(root_key, selection_set, data)
    }

    /// Read an operation from `QUERY_ROOT`.
    ///
    /// # Errors
    /// Returns [`CacheError::Miss`] on the first unresolved field.
    pub fn read_operation<E: Executable>(
        &self,
        variables: &E::Variables,
        headers: &CacheHeaders,
    ) -> Result<E::Data, CacheError> {
        self.read_fragment::<E>(&CacheKey::root(), variables, headers)
    }

    /// Read a fragment anchored at `key`.
    ///
    /// # Errors
    /// Returns [`CacheError::Miss`] on the first unresolved field.
    pub fn read_fragment<E: Executable>(
        &self,
        key: &CacheKey,
        variables: &E::Variables,
        headers: &CacheHeaders,
    ) -> Result<E::Data, CacheError> {
        let variables = Variables::from_serialize(variables)?;
        let data = self.read_selections(key, &SelectionSet::of::<E>(), &variables, headers)?;
        Ok(serde_json::from_value(Value::Object(data))?)
    }

    /// Read untyped data anchored at `root_key`.
    ///
    /// # Errors
    /// Returns [`CacheError::Miss`] on the first unresolved field.
    pub fn read_selections(
        &self,
        root_key: &CacheKey,
        selection_set: &SelectionSet,
        variables: &Variables,
        headers: &CacheHeaders,
    ) -> Result<Map<String, Value>, CacheError> {
        let cache = self.cache.read();
        let result = CacheBatchReader::new(&*cache, self.resolver.as_ref(), variables, headers)
            .read(root_key, selection_set);
        if let Err(CacheError::Miss(miss)) = &result {
            tracing::trace!(root = %root_key, miss = %miss.field_path(), "cache miss");
        }
        result
    }

    /// Write an operation's data under `QUERY_ROOT`.
    ///
    /// Returns the changed field paths; they are published only if `publish`.
    ///
    /// # Errors
    /// Returns an error if the data does not serialize or does not match the
    /// selections. Backend failures are reported and yield an empty set.
    pub fn write_operation<E: Executable>(
        &self,
        data: &E::Data,
        variables: &E::Variables,
        headers: &CacheHeaders,
        publish: bool,
    ) -> Result<HashSet<String>, CacheError> {
        self.write_fragment::<E>(&CacheKey::root(), data, variables, headers, publish)
    }

    /// Write a fragment's data under `key`.
    ///
    /// # Errors
    /// See [`write_operation`](Self::write_operation).
    pub fn write_fragment<E: Executable>(
        &self,
        key: &CacheKey,
        data: &E::Data,
        variables: &E::Variables,
        headers: &CacheHeaders,
        publish: bool,
    ) -> Result<HashSet<String>, CacheError> {
        let variables = Variables::from_serialize(variables)?;
        let data = to_object(data)?;
        self.write_selections(key, &SelectionSet::of::<E>(), &data, &variables, headers, publish)
    }

    /// Write untyped data under `root_key`.
    ///
    /// # Errors
    /// See [`write_operation`](Self::write_operation).
    pub fn write_selections(
        &self,
        root_key: &CacheKey,
        selection_set: &SelectionSet,
        data: &Map<String, Value>,
        variables: &Variables,
        headers: &CacheHeaders,
        publish: bool,
    ) -> Result<HashSet<String>, CacheError> {
        let records = self.normalize_selections(root_key, selection_set, data, variables)?;
        let record_count = records.len();
        let result = self
            .cache
            .write()
            .merge_records(records.into_values().collect(), headers, self.merger.as_ref());
        let changed = result.unwrap_or_else(|err| {
            report_storage_error("merge_records", &err);
            HashSet::new()
        });
        tracing::debug!(
            root = %root_key,
            records = record_count,
            changed = changed.len(),
            "wrote records"
        );
        if publish {
            self.publish(changed.clone());
        }
        Ok(changed)
    }

    /// Push an optimistic layer built from typed data.
    ///
    /// # Errors
    /// See [`write_operation`](Self::write_operation).
    pub fn write_optimistic_updates<E: Executable>(
        &self,
        data: &E::Data,
        variables: &E::Variables,
        mutation_id: Uuid,
        publish: bool,
    ) -> Result<HashSet<String>, CacheError> {
        let variables = Variables::from_serialize(variables)?;
        let data = to_object(data)?;
        self.write_optimistic_selections(
            &CacheKey::root(),
            &SelectionSet::of::<E>(),
            &data,
            &variables,
            mutation_id,
            publish,
        )
    }

    /// Push an optimistic layer built from untyped data.
    ///
    /// # Errors
    /// See [`write_operation`](Self::write_operation).
    pub fn write_optimistic_selections(
        &self,
        root_key: &CacheKey,
        selection_set: &SelectionSet,
        data: &Map<String, Value>,
        variables: &Variables,
        mutation_id: Uuid,
        publish: bool,
    ) -> Result<HashSet<String>, CacheError> {
        let records: Vec<Record> = self
            .normalize_selections(root_key, selection_set, data, variables)?
            .into_values()
            .map(|record| record.with_mutation_id(mutation_id))
            .collect();
        let result = self.cache.write().add_optimistic_updates(records);
        let changed = result.unwrap_or_else(|err| {
            report_storage_error("add_optimistic_updates", &err);
            HashSet::new()
        });
        tracing::debug!(%mutation_id, changed = changed.len(), "wrote optimistic layer");
        if publish {
            self.publish(changed.clone());
        }
        Ok(changed)
    }

    /// Drop the optimistic layer tagged `mutation_id`.
    pub fn rollback_optimistic_updates(&self, mutation_id: Uuid, publish: bool) -> HashSet<String> {
        let result = self.cache.write().remove_optimistic_updates(mutation_id);
        let changed = result.unwrap_or_else(|err| {
            report_storage_error("remove_optimistic_updates", &err);
            HashSet::new()
        });
        tracing::debug!(%mutation_id, changed = changed.len(), "rolled back optimistic layer");
        if publish {
            self.publish(changed.clone());
        }
        changed
    }

    /// Remove a record, optionally cascading. Publishes a full change if
    /// anything was removed.
    pub fn remove(&self, key: &CacheKey, cascade: bool) -> bool {
        let result = self.cache.write().remove(key.as_str(), cascade);
        let removed = result.unwrap_or_else(|err| {
            report_storage_error("remove", &err);
            false
        });
        if removed {
            self.publish_all();
        }
        removed
    }

    /// Remove every record and optimistic layer, then publish a full change.
    pub fn clear_all(&self) -> bool {
        let result = self.cache.write().clear_all();
        let cleared = match result {
            Ok(()) => true,
            Err(err) => {
                report_storage_error("clear_all", &err);
                false
            }
        };
        self.publish_all();
        cleared
    }

    /// Run `block` with exclusive access to the cache chain.
    pub fn access_cache<R>(&self, block: impl FnOnce(&mut OptimisticCache) -> R) -> R {
        let mut cache = self.cache.write();
        block(&mut cache)
    }

    /// Snapshot of the cache chain, for tests and tooling.
    #[must_use]
    pub fn dump(&self) -> CacheDump {
        self.cache.read().dump()
    }

    /// Close the changed-keys stream. Watchers observe the end of their
    /// subscription; the store itself stays usable.
    pub fn dispose(&self) {
        if self.changed_keys.lock().take().is_some() {
            tracing::debug!("store disposed");
        }
    }
}

fn to_object<T: serde::Serialize>(data: &T) -> Result<Map<String, Value>, CacheError> {
    match serde_json::to_value(data)? {
        Value::Object(map) => Ok(map),
        other => Err(CacheError::Json(format!("expected a JSON object, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn changed_keys_intersection() {
        let deps: HashSet<String> = ["QUERY_ROOT.hero".to_string()].into();
        let hit = ChangedKeys::Keys(Arc::new(["QUERY_ROOT.hero".to_string()].into()));
        let miss = ChangedKeys::Keys(Arc::new(["QUERY_ROOT.villain".to_string()].into()));
        assert!(hit.intersects(&deps));
        assert!(!miss.intersects(&deps));
        assert!(ChangedKeys::All.intersects(&HashSet::new()));
    }

    #[test]
    fn empty_changes_are_not_published() {
        let store = NormalizedStore::in_memory();
        let mut receiver = store.changed_keys();
        store.publish(HashSet::new());
        assert!(receiver.try_recv().is_err());
        store.publish(["a.b".to_string()].into());
        assert!(receiver.try_recv().is_ok());
    }

    #[test]
    fn dispose_closes_stream() {
        let store = NormalizedStore::in_memory();
        let mut receiver = store.changed_keys();
        store.dispose();
        assert!(matches!(
            receiver.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ));
        let mut late = store.changed_keys();
        assert!(matches!(
            late.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ));
    }
}
