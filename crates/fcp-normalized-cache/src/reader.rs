//! Reading response trees back out of the record graph.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use crate::cache_key::CacheKey;
use crate::compiled::{CompiledSelection, CompiledType, SelectionSet, Variables, collect_fields};
use crate::error::{CacheError, CacheMissError, report_storage_error};
use crate::headers::CacheHeaders;
use crate::normalized_cache::NormalizedCache;
use crate::record::{Record, RecordValue};
use crate::resolver::{CacheResolver, ResolverContext};

struct PendingObject<'s> {
    key: String,
    static_type: &'s str,
    selections: Vec<&'s CompiledSelection>,
}

/// Two-phase reader: load every reachable record level by level with one
/// batched call per level, then assemble the response from memory.
pub(crate) struct CacheBatchReader<'a> {
    cache: &'a dyn NormalizedCache,
    resolver: &'a dyn CacheResolver,
    variables: &'a Variables,
    headers: &'a CacheHeaders,
    records: HashMap<String, Record>,
}

impl<'a> CacheBatchReader<'a> {
    pub(crate) fn new(
        cache: &'a dyn NormalizedCache,
        resolver: &'a dyn CacheResolver,
        variables: &'a Variables,
        headers: &'a CacheHeaders,
    ) -> Self {
        Self {
            cache,
            resolver,
            variables,
            headers,
            records: HashMap::new(),
        }
    }

    pub(crate) fn read(
        mut self,
        root_key: &CacheKey,
        selection_set: &SelectionSet,
    ) -> Result<Map<String, Value>, CacheError> {
        self.load(root_key, selection_set);
        self.assemble(root_key.as_str(), &selection_set.root_type, &selection_set.roots())
    }

    fn load(&mut self, root_key: &CacheKey, selection_set: &SelectionSet) {
        let mut level = vec![PendingObject {
            key: root_key.as_str().to_string(),
            static_type: &selection_set.root_type,
            selections: selection_set.roots(),
        }];
        while !level.is_empty() {
            let wanted: HashSet<&str> = level
                .iter()
                .map(|pending| pending.key.as_str())
                .filter(|key| !self.records.contains_key(*key))
                .collect();
            if !wanted.is_empty() {
                let keys: Vec<String> = wanted.into_iter().map(str::to_string).collect();
                match self.cache.load_records(&keys, self.headers) {
                    Ok(records) => {
                        self.records.extend(
                            records
                                .into_iter()
                                .map(|record| (record.key().to_string(), record)),
                        );
                    }
                    Err(err) => report_storage_error("load_records", &err),
                }
            }

            let mut next = Vec::new();
            for pending in &level {
                let Some(record) = self.records.get(&pending.key) else {
                    continue;
                };
                let typename = record_typename(record, pending.static_type);
                for group in collect_fields(&pending.selections, typename, self.variables) {
                    if !group.field.ty.is_composite() {
                        continue;
                    }
                    let context = ResolverContext {
                        field: group.field,
                        variables: self.variables,
                        parent: record,
                        parent_type: typename,
                    };
                    let Ok(value) = self.resolver.resolve_field(&context) else {
                        continue;
                    };
                    let mut keys = Vec::new();
                    collect_references(&value, &mut keys);
                    next.extend(keys.into_iter().map(|key| PendingObject {
                        key,
                        static_type: group.field.ty.leaf_name(),
                        selections: group.selections.clone(),
                    }));
                }
            }
            level = next;
        }
    }

    fn assemble(
        &self,
        key: &str,
        static_type: &str,
        selections: &[&CompiledSelection],
    ) -> Result<Map<String, Value>, CacheError> {
        let record = self
            .records
            .get(key)
            .ok_or_else(|| CacheMissError::record(key))?;
        let typename = record_typename(record, static_type);
        let mut data = Map::new();
        for group in collect_fields(selections, typename, self.variables) {
            let context = ResolverContext {
                field: group.field,
                variables: self.variables,
                parent: record,
                parent_type: typename,
            };
            let value = self.resolver.resolve_field(&context)?;
            let value = self.to_json(&value, &group.field.ty, &group.selections)?;
            data.insert(group.field.response_name().to_string(), value);
        }
        Ok(data)
    }

    fn to_json(
        &self,
        value: &RecordValue,
        ty: &CompiledType,
        selections: &[&CompiledSelection],
    ) -> Result<Value, CacheError> {
        match value {
            RecordValue::Reference(key) if ty.is_composite() => Ok(Value::Object(self.assemble(
                key.as_str(),
                ty.leaf_name(),
                selections,
            )?)),
            RecordValue::List(items) => items
                .iter()
                .map(|item| self.to_json(item, ty, selections))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            other => Ok(other.to_json()),
        }
    }
}

fn record_typename<'r>(record: &'r Record, fallback: &'r str) -> &'r str {
    match record.field("__typename") {
        Some(RecordValue::String(typename)) => typename,
        _ => fallback,
    }
}

fn collect_references(value: &RecordValue, out: &mut Vec<String>) {
    match value {
        RecordValue::Reference(key) => out.push(key.as_str().to_string()),
        RecordValue::List(items) => items.iter().for_each(|item| collect_references(item, out)),
        _ => {}
    }
}
