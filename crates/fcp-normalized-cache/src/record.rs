//! Records: the flat storage unit of the normalized graph.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

use crate::cache_key::CacheKey;

/// Value of one record field.
///
/// References to other records are a distinct variant so that readers never
/// have to guess whether a string is an identity or plain data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum RecordValue {
    /// Explicit `null`.
    Null,
    /// Boolean scalar.
    Boolean(bool),
    /// Numeric scalar.
    Number(Number),
    /// String, enum or custom scalar.
    String(String),
    /// List of values; `null` holes are kept.
    List(Vec<Self>),
    /// Object stored inline (custom scalars with object shape).
    Object(BTreeMap<String, Self>),
    /// Reference to another record.
    Reference(CacheKey),
}

impl RecordValue {
    /// Convert to plain JSON. References render as their key string.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Boolean(value) => Value::Bool(*value),
            Self::Number(value) => Value::Number(value.clone()),
            Self::String(value) => Value::String(value.clone()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            Self::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(name, value)| (name.clone(), value.to_json()))
                    .collect::<Map<String, Value>>(),
            ),
            Self::Reference(key) => Value::String(key.as_str().to_string()),
        }
    }

    /// Returns the referenced key, if this is a reference.
    #[must_use]
    pub const fn as_reference(&self) -> Option<&CacheKey> {
        match self {
            Self::Reference(key) => Some(key),
            _ => None,
        }
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a CacheKey>) {
        match self {
            Self::Reference(key) => out.push(key),
            Self::List(items) => items.iter().for_each(|item| item.collect_references(out)),
            Self::Object(fields) => fields
                .values()
                .for_each(|value| value.collect_references(out)),
            _ => {}
        }
    }

    fn size_estimate(&self) -> usize {
        match self {
            Self::Null | Self::Boolean(_) => 1,
            Self::Number(_) => 8,
            Self::String(value) => value.len(),
            Self::Reference(key) => key.as_str().len(),
            Self::List(items) => 8 + items.iter().map(Self::size_estimate).sum::<usize>(),
            Self::Object(fields) => {
                8 + fields
                    .iter()
                    .map(|(name, value)| name.len() + value.size_estimate())
                    .sum::<usize>()
            }
        }
    }
}

impl From<Value> for RecordValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(value) => Self::Boolean(value),
            Value::Number(value) => Self::Number(value),
            Value::String(value) => Self::String(value),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(fields) => Self::Object(
                fields
                    .into_iter()
                    .map(|(name, value)| (name, Self::from(value)))
                    .collect(),
            ),
        }
    }
}

impl From<CacheKey> for RecordValue {
    fn from(key: CacheKey) -> Self {
        Self::Reference(key)
    }
}

/// A key plus a flat map of field values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    key: String,
    fields: BTreeMap<String, RecordValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mutation_id: Option<Uuid>,
}

impl Record {
    /// Create an empty record.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            fields: BTreeMap::new(),
            mutation_id: None,
        }
    }

    /// Builder-style field insertion.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<RecordValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Tag the record as belonging to an optimistic layer.
    #[must_use]
    pub const fn with_mutation_id(mut self, mutation_id: Uuid) -> Self {
        self.mutation_id = Some(mutation_id);
        self
    }

    /// Record key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Optimistic layer tag.
    #[must_use]
    pub const fn mutation_id(&self) -> Option<Uuid> {
        self.mutation_id
    }

    /// Set or clear the optimistic layer tag.
    pub fn set_mutation_id(&mut self, mutation_id: Option<Uuid>) {
        self.mutation_id = mutation_id;
    }

    /// Look up a field by storage name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&RecordValue> {
        self.fields.get(name)
    }

    /// All fields.
    #[must_use]
    pub const fn fields(&self) -> &BTreeMap<String, RecordValue> {
        &self.fields
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the record has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Insert a field, returning the previous value.
    pub fn insert(&mut self, name: impl Into<String>, value: RecordValue) -> Option<RecordValue> {
        self.fields.insert(name.into(), value)
    }

    /// Field path of one field of this record.
    #[must_use]
    pub fn field_key(&self, field: &str) -> String {
        format!("{}.{field}", self.key)
    }

    /// Field paths of every field of this record.
    #[must_use]
    pub fn field_keys(&self) -> HashSet<String> {
        self.fields.keys().map(|name| self.field_key(name)).collect()
    }

    /// Every key referenced from this record, through lists and objects.
    #[must_use]
    pub fn references(&self) -> Vec<&CacheKey> {
        let mut out = Vec::new();
        for value in self.fields.values() {
            value.collect_references(&mut out);
        }
        out
    }

    /// Approximate in-memory footprint in bytes.
    #[must_use]
    pub fn size_estimate(&self) -> usize {
        self.key.len()
            + 16
            + self
                .fields
                .iter()
                .map(|(name, value)| name.len() + value.size_estimate())
                .sum::<usize>()
    }

    /// Field-wise union where incoming fields win.
    ///
    /// Returns the field paths whose stored value actually changed.
    pub fn merge_with(&mut self, incoming: Self) -> HashSet<String> {
        let mut changed = HashSet::new();
        if incoming.mutation_id.is_some() {
            self.mutation_id = incoming.mutation_id;
        }
        for (name, value) in incoming.fields {
            if self.merge_field(name.clone(), value) {
                changed.insert(self.field_key(&name));
            }
        }
        changed
    }

    /// Store one field, returning `true` if the stored value changed.
    pub fn merge_field(&mut self, name: String, value: RecordValue) -> bool {
        if self.fields.get(&name) == Some(&value) {
            return false;
        }
        self.fields.insert(name, value);
        true
    }

    /// Field paths whose visible value differs between two states of a record.
    ///
    /// A missing state counts as a record without fields.
    #[must_use]
    pub fn changed_keys(before: Option<&Self>, after: Option<&Self>) -> HashSet<String> {
        let Some(key) = before.or(after).map(Self::key) else {
            return HashSet::new();
        };
        let empty = BTreeMap::new();
        let before_fields = before.map_or(&empty, |record| &record.fields);
        let after_fields = after.map_or(&empty, |record| &record.fields);
        let names: BTreeSet<&String> = before_fields.keys().chain(after_fields.keys()).collect();
        names
            .into_iter()
            .filter(|name| before_fields.get(*name) != after_fields.get(*name))
            .map(|name| format!("{key}.{name}"))
            .collect()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record({}, {} fields)", self.key, self.fields.len())
    }
}

/// Policy that folds an incoming record into a stored one.
pub trait RecordMerger: Send + Sync + fmt::Debug {
    /// Merge `incoming` into `existing`, returning changed field paths.
    fn merge(&self, existing: &mut Record, incoming: Record) -> HashSet<String>;
}

/// Field-wise union where incoming values replace stored ones.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRecordMerger;

impl RecordMerger for DefaultRecordMerger {
    fn merge(&self, existing: &mut Record, incoming: Record) -> HashSet<String> {
        existing.merge_with(incoming)
    }
}

/// Appends incoming pages to stored lists for the configured fields.
///
/// Pagination arguments are excluded from storage names, so every page of a
/// paginated field is written under the same name; this merger keeps the
/// earlier pages instead of replacing them. References already present are
/// not appended again, which makes re-fetching a page of entities idempotent;
/// scalar and inline items are always appended.
#[derive(Debug, Clone, Default)]
pub struct ListAppendMerger {
    fields: HashSet<String>,
}

impl ListAppendMerger {
    /// Create a merger for the given GraphQL field names.
    #[must_use]
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }

    fn is_paginated(&self, storage_name: &str) -> bool {
        let base = storage_name
            .split_once('(')
            .map_or(storage_name, |(base, _)| base);
        self.fields.contains(base)
    }
}

fn append_page(stored: &[RecordValue], page: Vec<RecordValue>) -> Vec<RecordValue> {
    let mut seen: HashSet<CacheKey> = stored
        .iter()
        .filter_map(|item| match item {
            RecordValue::Reference(key) => Some(key.clone()),
            _ => None,
        })
        .collect();
    let mut merged = stored.to_vec();
    merged.extend(page.into_iter().filter(|item| match item {
        RecordValue::Reference(key) => seen.insert(key.clone()),
        _ => true,
    }));
    merged
}

impl RecordMerger for ListAppendMerger {
    fn merge(&self, existing: &mut Record, incoming: Record) -> HashSet<String> {
        let mut changed = HashSet::new();
        if incoming.mutation_id.is_some() {
            existing.mutation_id = incoming.mutation_id;
        }
        for (name, value) in incoming.fields {
            let value = match (existing.fields.get(&name), value) {
                (Some(RecordValue::List(stored)), RecordValue::List(page))
                    if self.is_paginated(&name) =>
                {
                    RecordValue::List(append_page(stored, page))
                }
                (_, value) => value,
            };
            if existing.merge_field(name.clone(), value) {
                changed.insert(existing.field_key(&name));
            }
        }
        changed
    }
}
