//! In-memory record cache with LRU bound, expiry and an optional next cache.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::StorageError;
use crate::headers::CacheHeaders;
use crate::normalized_cache::{CacheDump, NormalizedCache};
use crate::record::{Record, RecordMerger};

/// Configuration for [`MemoryCache`].
#[derive(Debug, Clone)]
pub struct MemoryCacheConfig {
    /// Label of this backend in dumps.
    pub label: String,
    /// Evict least recently used records above this size.
    pub max_size_bytes: Option<usize>,
    /// Records older than this read as absent.
    pub expire_after: Option<Duration>,
    /// Also merge writes into the next cache.
    pub write_through: bool,
}

impl Default for MemoryCacheConfig {
    fn default() -> Self {
        Self {
            label: "MemoryCache".to_string(),
            max_size_bytes: None,
            expire_after: None,
            write_through: false,
        }
    }
}

impl MemoryCacheConfig {
    /// Set the dump label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Bound the cache size.
    #[must_use]
    pub const fn with_max_size_bytes(mut self, max: usize) -> Self {
        self.max_size_bytes = Some(max);
        self
    }

    /// Expire records after `ttl`.
    #[must_use]
    pub const fn with_expire_after(mut self, ttl: Duration) -> Self {
        self.expire_after = Some(ttl);
        self
    }

    /// Write through to the next cache.
    #[must_use]
    pub const fn with_write_through(mut self, write_through: bool) -> Self {
        self.write_through = write_through;
        self
    }
}

#[derive(Debug)]
struct Entry {
    record: Record,
    size: usize,
    stored_at: Instant,
    last_used: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, Entry>,
    used_bytes: usize,
    clock: u64,
}

impl MemoryState {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn is_expired(entry: &Entry, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| entry.stored_at.elapsed() >= ttl)
    }

    fn take(&mut self, key: &str) -> Option<Entry> {
        let entry = self.entries.remove(key)?;
        self.used_bytes = self.used_bytes.saturating_sub(entry.size);
        Some(entry)
    }

    fn put(&mut self, record: Record, stored_at: Instant) {
        let size = record.size_estimate();
        let last_used = self.tick();
        let key = record.key().to_string();
        if let Some(old) = self.take(&key) {
            tracing::trace!(key = %key, old_size = old.size, "replacing cached record");
        }
        self.used_bytes += size;
        self.entries.insert(
            key,
            Entry {
                record,
                size,
                stored_at,
                last_used,
            },
        );
    }

    /// Read a live entry, dropping it if expired.
    fn read(&mut self, key: &str, ttl: Option<Duration>, evict: bool) -> Option<Record> {
        let expired = Self::is_expired(self.entries.get(key)?, ttl);
        if expired {
            self.take(key);
            return None;
        }
        if evict {
            return self.take(key).map(|entry| entry.record);
        }
        let now = self.tick();
        let entry = self.entries.get_mut(key)?;
        entry.last_used = now;
        Some(entry.record.clone())
    }

    fn evict_to(&mut self, max: usize, keep: &str) {
        while self.used_bytes > max {
            let victim = self
                .entries
                .iter()
                .filter(|(key, _)| key.as_str() != keep)
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(key, _)| key.clone());
            let Some(victim) = victim else {
                break;
            };
            tracing::debug!(key = %victim, "evicting least recently used record");
            self.take(&victim);
        }
    }
}

/// Records held in process memory.
#[derive(Debug)]
pub struct MemoryCache {
    config: MemoryCacheConfig,
    state: Mutex<MemoryState>,
    next: Option<Box<dyn NormalizedCache>>,
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(MemoryCacheConfig::default())
    }
}

impl MemoryCache {
    /// Create a memory cache without a next cache.
    #[must_use]
    pub fn new(config: MemoryCacheConfig) -> Self {
        Self {
            config,
            state: Mutex::new(MemoryState::default()),
            next: None,
        }
    }

    /// Chain `next` behind this cache.
    #[must_use]
    pub fn with_next(mut self, next: impl NormalizedCache + 'static) -> Self {
        self.next = Some(Box::new(next));
        self
    }

    /// Number of live records held by this level.
    #[must_use]
    pub fn len(&self) -> usize {
        let ttl = self.config.expire_after;
        self.state
            .lock()
            .entries
            .values()
            .filter(|entry| !MemoryState::is_expired(entry, ttl))
            .count()
    }

    /// Returns `true` if this level holds no live record.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate bytes held by this level.
    #[must_use]
    pub fn used_bytes(&self) -> usize {
        self.state.lock().used_bytes
    }

    fn promote(&self, records: &[Record]) {
        let mut state = self.state.lock();
        let now = Instant::now();
        for record in records {
            state.put(record.clone(), now);
        }
        if let Some(max) = self.config.max_size_bytes {
            state.evict_to(max, "");
        }
    }

    /// Keys to delete when removing `root` with cascade.
    ///
    /// Walks references breadth-first from `root`, then spares every reached
    /// record that is still referenced, directly or transitively, from a
    /// record outside the walked subgraph.
    fn cascade_set(entries: &HashMap<String, Entry>, root: &str) -> HashSet<String> {
        let mut reachable: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = VecDeque::from([root]);
        while let Some(key) = queue.pop_front() {
            let Some(entry) = entries.get(key) else {
                continue;
            };
            for reference in entry.record.references() {
                let reference = reference.as_str();
                if reference != root && reachable.insert(reference.to_string()) {
                    queue.push_back(reference);
                }
            }
        }

        let mut kept: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<&str> = entries
            .iter()
            .filter(|(key, _)| key.as_str() != root && !reachable.contains(key.as_str()))
            .flat_map(|(_, entry)| entry.record.references())
            .map(|key| key.as_str())
            .filter(|key| reachable.contains(*key))
            .collect();
        while let Some(key) = queue.pop_front() {
            if !kept.insert(key.to_string()) {
                continue;
            }
            if let Some(entry) = entries.get(key) {
                queue.extend(
                    entry
                        .record
                        .references()
                        .into_iter()
                        .map(|key| key.as_str())
                        .filter(|key| reachable.contains(*key) && !kept.contains(*key)),
                );
            }
        }

        let mut doomed: HashSet<String> = reachable.difference(&kept).cloned().collect();
        doomed.insert(root.to_string());
        doomed
    }
}

impl NormalizedCache for MemoryCache {
    fn kind(&self) -> &str {
        &self.config.label
    }

    fn load_record(
        &self,
        key: &str,
        headers: &CacheHeaders,
    ) -> Result<Option<Record>, StorageError> {
        let evict = headers.has(CacheHeaders::EVICT_AFTER_READ);
        let found = self
            .state
            .lock()
            .read(key, self.config.expire_after, evict);
        let Some(next) = &self.next else {
            return Ok(found);
        };
        if found.is_some() {
            if evict {
                // Drop any copy held further down the chain.
                next.load_record(key, headers)?;
            }
            return Ok(found);
        }
        let found = next.load_record(key, headers)?;
        if let Some(record) = &found {
            if !evict {
                self.promote(std::slice::from_ref(record));
            }
        }
        Ok(found)
    }

    fn load_records(
        &self,
        keys: &[String],
        headers: &CacheHeaders,
    ) -> Result<Vec<Record>, StorageError> {
        let evict = headers.has(CacheHeaders::EVICT_AFTER_READ);
        let ttl = self.config.expire_after;
        let mut found = Vec::with_capacity(keys.len());
        let mut missing = Vec::new();
        {
            let mut state = self.state.lock();
            for key in keys {
                match state.read(key, ttl, evict) {
                    Some(record) => found.push(record),
                    None => missing.push(key.clone()),
                }
            }
        }
        let Some(next) = &self.next else {
            return Ok(found);
        };
        if evict {
            // Every key is forwarded so that lower levels evict the records
            // this level already served.
            let missing: HashSet<&str> = missing.iter().map(String::as_str).collect();
            let forwarded = next.load_records(keys, headers)?;
            found.extend(
                forwarded
                    .into_iter()
                    .filter(|record| missing.contains(record.key())),
            );
        } else if !missing.is_empty() {
            let forwarded = next.load_records(&missing, headers)?;
            self.promote(&forwarded);
            found.extend(forwarded);
        }
        Ok(found)
    }

    fn merge(
        &mut self,
        record: Record,
        headers: &CacheHeaders,
        merger: &dyn RecordMerger,
    ) -> Result<HashSet<String>, StorageError> {
        self.merge_records(vec![record], headers, merger)
    }

    /// Lower levels are written first; this level commits only once they
    /// accepted every record, so a failed write leaves it untouched.
    fn merge_records(
        &mut self,
        records: Vec<Record>,
        headers: &CacheHeaders,
        merger: &dyn RecordMerger,
    ) -> Result<HashSet<String>, StorageError> {
        if headers.has(CacheHeaders::DO_NOT_STORE) {
            return Ok(HashSet::new());
        }
        let write_through =
            self.config.write_through && !headers.has(CacheHeaders::MEMORY_CACHE_ONLY);
        let mut changed = match self.next.as_mut() {
            Some(next) if write_through => next.merge_records(records.clone(), headers, merger)?,
            _ => HashSet::new(),
        };

        let mut state = self.state.lock();
        let ttl = self.config.expire_after;
        for record in records {
            let key = record.key().to_string();
            let mut stored = state
                .take(&key)
                .filter(|entry| !MemoryState::is_expired(entry, ttl))
                .map_or_else(|| Record::new(key.clone()), |entry| entry.record);
            changed.extend(merger.merge(&mut stored, record));
            state.put(stored, Instant::now());
            if let Some(max) = self.config.max_size_bytes {
                state.evict_to(max, &key);
            }
        }
        Ok(changed)
    }

    fn remove(&mut self, key: &str, cascade: bool) -> Result<bool, StorageError> {
        let removed = {
            let mut state = self.state.lock();
            if state.entries.contains_key(key) {
                let doomed = if cascade {
                    Self::cascade_set(&state.entries, key)
                } else {
                    HashSet::from([key.to_string()])
                };
                tracing::debug!(key, cascade, records = doomed.len(), "removing records");
                for doomed_key in &doomed {
                    state.take(doomed_key);
                }
                true
            } else {
                false
            }
        };
        let removed_next = match self.next.as_mut() {
            Some(next) => next.remove(key, cascade)?,
            None => false,
        };
        Ok(removed || removed_next)
    }

    fn clear_all(&mut self) -> Result<(), StorageError> {
        {
            let mut state = self.state.lock();
            state.entries.clear();
            state.used_bytes = 0;
        }
        if let Some(next) = self.next.as_mut() {
            next.clear_all()?;
        }
        Ok(())
    }

    fn dump(&self) -> CacheDump {
        let ttl = self.config.expire_after;
        let records: BTreeMap<String, Record> = self
            .state
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| !MemoryState::is_expired(entry, ttl))
            .map(|(key, entry)| (key.clone(), entry.record.clone()))
            .collect();
        let mut dump = self.next.as_ref().map(|next| next.dump()).unwrap_or_default();
        dump.insert(self.config.label.clone(), records);
        dump
    }
}
