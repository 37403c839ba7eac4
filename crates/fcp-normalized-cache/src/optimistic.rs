//! Optimistic overlay layers on top of a cache chain.

use std::collections::{BTreeMap, HashMap, HashSet};

use uuid::Uuid;

use crate::error::StorageError;
use crate::headers::CacheHeaders;
use crate::normalized_cache::{CacheDump, NormalizedCache};
use crate::record::{Record, RecordMerger};

const KIND: &str = "OptimisticCache";

#[derive(Debug)]
struct OptimisticLayer {
    mutation_id: Uuid,
    records: HashMap<String, Record>,
}

/// Wraps a cache chain with ordered, rollback-able layers.
///
/// The visible value of a record is the base record with every layer that
/// touches it merged on top, in application order. Removing a layer recomputes
/// the view from what remains, so overlapping layers roll back exactly.
#[derive(Debug)]
pub struct OptimisticCache {
    base: Box<dyn NormalizedCache>,
    layers: Vec<OptimisticLayer>,
}

impl OptimisticCache {
    /// Wrap `base`.
    #[must_use]
    pub fn new(base: impl NormalizedCache + 'static) -> Self {
        Self::from_boxed(Box::new(base))
    }

    /// Wrap an already boxed chain.
    #[must_use]
    pub fn from_boxed(base: Box<dyn NormalizedCache>) -> Self {
        Self {
            base,
            layers: Vec::new(),
        }
    }

    /// Number of live layers.
    #[must_use]
    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    /// Returns `true` if a layer tagged `mutation_id` is live.
    #[must_use]
    pub fn has_layer(&self, mutation_id: Uuid) -> bool {
        self.layers.iter().any(|layer| layer.mutation_id == mutation_id)
    }

    /// The wrapped chain.
    #[must_use]
    pub fn base(&self) -> &dyn NormalizedCache {
        self.base.as_ref()
    }

    fn overlay(&self, key: &str, base: Option<Record>) -> Option<Record> {
        let mut visible = base;
        for layer in &self.layers {
            if let Some(record) = layer.records.get(key) {
                match visible.as_mut() {
                    Some(visible) => {
                        visible.merge_with(record.clone());
                    }
                    None => visible = Some(record.clone()),
                }
            }
        }
        visible
    }

    fn visible(&self, keys: &HashSet<String>) -> Result<HashMap<String, Record>, StorageError> {
        let keys: Vec<String> = keys.iter().cloned().collect();
        let mut base: HashMap<String, Record> = self
            .base
            .load_records(&keys, &CacheHeaders::none())?
            .into_iter()
            .map(|record| (record.key().to_string(), record))
            .collect();
        Ok(keys
            .into_iter()
            .filter_map(|key| {
                let record = self.overlay(&key, base.remove(&key))?;
                Some((key, record))
            })
            .collect())
    }

    /// Keys reachable through visible references from `root`, excluding it.
    fn reachable_from(&self, root: &str) -> Result<HashSet<String>, StorageError> {
        let mut reachable: HashSet<String> = HashSet::new();
        let mut frontier = HashSet::from([root.to_string()]);
        while !frontier.is_empty() {
            let records = self.visible(&frontier)?;
            frontier = records
                .values()
                .flat_map(Record::references)
                .map(|key| key.as_str().to_string())
                .filter(|key| key != root && reachable.insert(key.clone()))
                .collect();
        }
        Ok(reachable)
    }

    /// Layer records among `reachable` that lost their last visible referrer
    /// once the base removed `root` with cascade.
    ///
    /// Records the base kept, and layer records outside the removed
    /// subgraph, keep everything they reference.
    fn orphaned_layer_records(
        &self,
        root: &str,
        reachable: HashSet<String>,
    ) -> Result<HashSet<String>, StorageError> {
        let keys: Vec<String> = reachable.iter().cloned().collect();
        let survivors: HashSet<String> = self
            .base
            .load_records(&keys, &CacheHeaders::none())?
            .into_iter()
            .map(|record| record.key().to_string())
            .collect();
        let candidates: HashSet<String> = reachable.difference(&survivors).cloned().collect();

        let outside = self
            .layers
            .iter()
            .flat_map(|layer| layer.records.values())
            .filter(|record| record.key() != root && !candidates.contains(record.key()))
            .flat_map(Record::references)
            .map(|key| key.as_str().to_string());
        let from_survivors: Vec<String> = self
            .visible(&survivors)?
            .values()
            .flat_map(Record::references)
            .map(|key| key.as_str().to_string())
            .collect();

        let mut kept: HashSet<String> = HashSet::new();
        let mut frontier: HashSet<String> = outside
            .chain(from_survivors)
            .filter(|key| candidates.contains(key))
            .collect();
        while !frontier.is_empty() {
            kept.extend(frontier.iter().cloned());
            frontier = self
                .visible(&frontier)?
                .values()
                .flat_map(Record::references)
                .map(|key| key.as_str().to_string())
                .filter(|key| candidates.contains(key) && !kept.contains(key))
                .collect();
        }
        Ok(candidates.difference(&kept).cloned().collect())
    }

    fn diff(
        keys: &HashSet<String>,
        before: &HashMap<String, Record>,
        after: &HashMap<String, Record>,
    ) -> HashSet<String> {
        keys.iter()
            .flat_map(|key| Record::changed_keys(before.get(key), after.get(key)))
            .collect()
    }

    /// Push one layer per mutation id found in `records`.
    ///
    /// Returns the field paths whose visible value changed.
    ///
    /// # Errors
    /// Fails without applying anything if a record carries no mutation id, or
    /// if the base chain cannot be read.
    pub fn add_optimistic_updates(
        &mut self,
        records: Vec<Record>,
    ) -> Result<HashSet<String>, StorageError> {
        let mut layers: Vec<OptimisticLayer> = Vec::new();
        for record in records {
            let Some(mutation_id) = record.mutation_id() else {
                return Err(StorageError::UntaggedOptimisticRecord(record.key().to_string()));
            };
            let index = match layers.iter().position(|layer| layer.mutation_id == mutation_id) {
                Some(index) => index,
                None => {
                    layers.push(OptimisticLayer {
                        mutation_id,
                        records: HashMap::new(),
                    });
                    layers.len() - 1
                }
            };
            let layer = &mut layers[index];
            match layer.records.get_mut(record.key()) {
                Some(existing) => {
                    existing.merge_with(record);
                }
                None => {
                    layer.records.insert(record.key().to_string(), record);
                }
            }
        }

        let keys: HashSet<String> = layers
            .iter()
            .flat_map(|layer| layer.records.keys().cloned())
            .collect();
        let before = self.visible(&keys)?;
        self.layers.extend(layers);
        let after = self.visible(&keys)?;
        let changed = Self::diff(&keys, &before, &after);
        tracing::debug!(
            layers = self.layers.len(),
            changed = changed.len(),
            "applied optimistic updates"
        );
        Ok(changed)
    }

    /// Drop every layer tagged `mutation_id`.
    ///
    /// Returns the field paths whose visible value changed.
    ///
    /// # Errors
    /// Returns an error if the base chain cannot be read.
    pub fn remove_optimistic_updates(
        &mut self,
        mutation_id: Uuid,
    ) -> Result<HashSet<String>, StorageError> {
        let keys: HashSet<String> = self
            .layers
            .iter()
            .filter(|layer| layer.mutation_id == mutation_id)
            .flat_map(|layer| layer.records.keys().cloned())
            .collect();
        if keys.is_empty() {
            self.layers.retain(|layer| layer.mutation_id != mutation_id);
            return Ok(HashSet::new());
        }
        let before = self.visible(&keys)?;
        self.layers.retain(|layer| layer.mutation_id != mutation_id);
        let after = self.visible(&keys)?;
        let changed = Self::diff(&keys, &before, &after);
        tracing::debug!(
            %mutation_id,
            layers = self.layers.len(),
            changed = changed.len(),
            "rolled back optimistic updates"
        );
        Ok(changed)
    }
}

impl NormalizedCache for OptimisticCache {
    fn kind(&self) -> &str {
        KIND
    }

    fn load_record(
        &self,
        key: &str,
        headers: &CacheHeaders,
    ) -> Result<Option<Record>, StorageError> {
        let base = self.base.load_record(key, headers)?;
        Ok(self.overlay(key, base))
    }

    fn load_records(
        &self,
        keys: &[String],
        headers: &CacheHeaders,
    ) -> Result<Vec<Record>, StorageError> {
        let mut base: HashMap<String, Record> = self
            .base
            .load_records(keys, headers)?
            .into_iter()
            .map(|record| (record.key().to_string(), record))
            .collect();
        Ok(keys
            .iter()
            .filter_map(|key| self.overlay(key, base.remove(key)))
            .collect())
    }

    fn merge(
        &mut self,
        record: Record,
        headers: &CacheHeaders,
        merger: &dyn RecordMerger,
    ) -> Result<HashSet<String>, StorageError> {
        self.base.merge(record, headers, merger)
    }

    fn merge_records(
        &mut self,
        records: Vec<Record>,
        headers: &CacheHeaders,
        merger: &dyn RecordMerger,
    ) -> Result<HashSet<String>, StorageError> {
        self.base.merge_records(records, headers, merger)
    }

    fn remove(&mut self, key: &str, cascade: bool) -> Result<bool, StorageError> {
        let reachable = if cascade && !self.layers.is_empty() {
            self.reachable_from(key)?
        } else {
            HashSet::new()
        };
        let removed_base = self.base.remove(key, cascade)?;

        let mut doomed = HashSet::from([key.to_string()]);
        if !reachable.is_empty() {
            doomed.extend(self.orphaned_layer_records(key, reachable)?);
        }
        let mut removed = false;
        for layer in &mut self.layers {
            for doomed_key in &doomed {
                removed |= layer.records.remove(doomed_key).is_some();
            }
        }
        tracing::debug!(key, cascade, records = doomed.len(), "removed optimistic records");
        Ok(removed_base || removed)
    }

    fn clear_all(&mut self) -> Result<(), StorageError> {
        self.layers.clear();
        self.base.clear_all()
    }

    fn dump(&self) -> CacheDump {
        let mut overlay: BTreeMap<String, Record> = BTreeMap::new();
        for layer in &self.layers {
            for (key, record) in &layer.records {
                match overlay.get_mut(key) {
                    Some(existing) => {
                        existing.merge_with(record.clone());
                    }
                    None => {
                        overlay.insert(key.clone(), record.clone());
                    }
                }
            }
        }
        let mut dump = self.base.dump();
        dump.insert(KIND.to_string(), overlay);
        dump
    }
}
