//! Object identities and the generators that derive them.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::compiled::{CompiledField, Variables};

const ROOT_KEY: &str = "QUERY_ROOT";

/// Stable identity of a normalized object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wrap an existing key string.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Key of the query root record.
    #[must_use]
    pub fn root() -> Self {
        Self(ROOT_KEY.to_string())
    }

    /// Canonical type-policy identity: `Typename:v1+v2`.
    #[must_use]
    pub fn from_type<I, S>(typename: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let values: Vec<String> = values
            .into_iter()
            .map(|value| value.as_ref().to_string())
            .collect();
        Self(format!("{typename}:{}", values.join("+")))
    }

    /// Key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume into the key string.
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }

    /// Returns `true` for the query root key.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0 == ROOT_KEY
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CacheKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for CacheKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Render a key field value the way identities embed it.
///
/// Strings are used verbatim, numbers and booleans through their JSON text.
/// `null`, lists and objects cannot identify an object.
pub(crate) fn key_fragment(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Number(value) => Some(value.to_string()),
        Value::Bool(value) => Some(value.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Context passed to a key generator.
#[derive(Debug, Clone, Copy)]
pub struct CacheKeyGeneratorContext<'a> {
    /// Field whose value is being normalized.
    pub field: &'a CompiledField,
    /// Variable bindings of the write.
    pub variables: &'a Variables,
}

/// Derives an identity for an object, or decides it has none.
///
/// Implementations must be pure. `None` makes the object a path-keyed record
/// owned by its parent field.
pub trait CacheKeyGenerator: Send + Sync + fmt::Debug {
    /// Identity of `object` of concrete type `typename`.
    fn cache_key_for_object(
        &self,
        typename: &str,
        object: &Map<String, Value>,
        context: &CacheKeyGeneratorContext<'_>,
    ) -> Option<CacheKey>;
}

/// Uses an identifying field (`id` by default) as the key.
#[derive(Debug, Clone)]
pub struct IdCacheKeyGenerator {
    field: String,
}

impl Default for IdCacheKeyGenerator {
    fn default() -> Self {
        Self {
            field: "id".to_string(),
        }
    }
}

impl IdCacheKeyGenerator {
    /// Use `field` instead of `id`.
    #[must_use]
    pub fn with_field(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl CacheKeyGenerator for IdCacheKeyGenerator {
    fn cache_key_for_object(
        &self,
        _typename: &str,
        object: &Map<String, Value>,
        _context: &CacheKeyGeneratorContext<'_>,
    ) -> Option<CacheKey> {
        object
            .get(&self.field)
            .and_then(key_fragment)
            .map(CacheKey::new)
    }
}

/// Builds `Typename:v1+v2` from declared key fields per type.
#[derive(Debug, Clone, Default)]
pub struct TypePolicyCacheKeyGenerator {
    policies: HashMap<String, Vec<String>>,
}

impl TypePolicyCacheKeyGenerator {
    /// Generator without policies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the key fields of `typename`.
    #[must_use]
    pub fn with_type_policy<I, S>(mut self, typename: impl Into<String>, key_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.policies.insert(
            typename.into(),
            key_fields.into_iter().map(Into::into).collect(),
        );
        self
    }

    /// Returns `true` if no type declares key fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl CacheKeyGenerator for TypePolicyCacheKeyGenerator {
    fn cache_key_for_object(
        &self,
        typename: &str,
        object: &Map<String, Value>,
        _context: &CacheKeyGeneratorContext<'_>,
    ) -> Option<CacheKey> {
        let key_fields = self.policies.get(typename)?;
        if key_fields.is_empty() {
            return None;
        }
        let values: Option<Vec<String>> = key_fields
            .iter()
            .map(|field| object.get(field).and_then(key_fragment))
            .collect();
        values.map(|values| CacheKey::from_type(typename, values))
    }
}

/// Tries generators in order; the first identity wins.
#[derive(Debug, Clone, Default)]
pub struct ChainedCacheKeyGenerator {
    generators: Vec<Arc<dyn CacheKeyGenerator>>,
}

impl ChainedCacheKeyGenerator {
    /// Empty chain (never produces an identity).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a generator.
    #[must_use]
    pub fn with(mut self, generator: impl CacheKeyGenerator + 'static) -> Self {
        self.generators.push(Arc::new(generator));
        self
    }
}

impl CacheKeyGenerator for ChainedCacheKeyGenerator {
    fn cache_key_for_object(
        &self,
        typename: &str,
        object: &Map<String, Value>,
        context: &CacheKeyGeneratorContext<'_>,
    ) -> Option<CacheKey> {
        self.generators
            .iter()
            .find_map(|generator| generator.cache_key_for_object(typename, object, context))
    }
}

/// `id` first, then declared type policies.
#[must_use]
pub fn default_cache_key_generator(
    policies: TypePolicyCacheKeyGenerator,
) -> ChainedCacheKeyGenerator {
    ChainedCacheKeyGenerator::new()
        .with(IdCacheKeyGenerator::default())
        .with(policies)
}
