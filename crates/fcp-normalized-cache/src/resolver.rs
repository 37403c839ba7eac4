//! Field-level read policies.

use std::fmt;

use crate::cache_key::{CacheKey, key_fragment};
use crate::compiled::{CompiledField, Variables};
use crate::error::CacheMissError;
use crate::record::{Record, RecordValue};

/// Everything a resolver may look at for one field.
#[derive(Debug, Clone, Copy)]
pub struct ResolverContext<'a> {
    /// Field being read.
    pub field: &'a CompiledField,
    /// Variable bindings of the read.
    pub variables: &'a Variables,
    /// Record holding the field.
    pub parent: &'a Record,
    /// Concrete type of the parent object.
    pub parent_type: &'a str,
}

/// Reads one field out of its parent record.
pub trait CacheResolver: Send + Sync + fmt::Debug {
    /// Resolve the stored value of `context.field`.
    ///
    /// # Errors
    /// Returns a miss naming the exact record and field when the value is not
    /// cached.
    fn resolve_field(&self, context: &ResolverContext<'_>) -> Result<RecordValue, CacheMissError>;
}

/// Reads the field under the storage name the normalizer wrote it to.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultCacheResolver;

impl CacheResolver for DefaultCacheResolver {
    fn resolve_field(&self, context: &ResolverContext<'_>) -> Result<RecordValue, CacheMissError> {
        let storage_name = context.field.storage_name(context.variables);
        context
            .parent
            .field(&storage_name)
            .cloned()
            .ok_or_else(|| CacheMissError::field(context.parent.key(), storage_name))
    }
}

/// Resolves fields with key arguments straight to the identified record.
///
/// `book(isbn: "978")` reads `Book:978` even if no query ever stored
/// `book({"isbn":"978"})`, as long as the object was written by another query
/// under its type-policy identity.
#[derive(Debug, Clone, Copy, Default)]
pub struct FieldPolicyCacheResolver;

impl CacheResolver for FieldPolicyCacheResolver {
    fn resolve_field(&self, context: &ResolverContext<'_>) -> Result<RecordValue, CacheMissError> {
        let field = context.field;
        if field.ty.is_composite() && !field.ty.is_list() {
            let fragments: Option<Vec<String>> = field
                .key_argument_values(context.variables)
                .and_then(|values| values.iter().map(key_fragment).collect());
            if let Some(fragments) = fragments {
                return Ok(RecordValue::Reference(CacheKey::from_type(
                    field.ty.leaf_name(),
                    fragments,
                )));
            }
        }
        DefaultCacheResolver.resolve_field(context)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::compiled::{ArgumentValue, CompiledArgument, CompiledType};

    fn context<'a>(
        field: &'a CompiledField,
        variables: &'a Variables,
        parent: &'a Record,
    ) -> ResolverContext<'a> {
        ResolverContext {
            field,
            variables,
            parent,
            parent_type: "Query",
        }
    }

    #[test]
    fn default_resolver_reports_exact_miss() {
        let field = CompiledField::new("hero", CompiledType::interface("Character"))
            .with_argument(CompiledArgument::new("episode", json!("JEDI")));
        let parent = Record::new("QUERY_ROOT").with_field("hero", RecordValue::Null);
        let variables = Variables::new();
        let miss = DefaultCacheResolver
            .resolve_field(&context(&field, &variables, &parent))
            .unwrap_err();
        assert_eq!(miss.key(), "QUERY_ROOT");
        assert_eq!(miss.field_name(), Some(r#"hero({"episode":"JEDI"})"#));
    }

    #[test]
    fn default_resolver_returns_null_as_value() {
        let field = CompiledField::new("hero", CompiledType::interface("Character"));
        let parent = Record::new("QUERY_ROOT").with_field("hero", RecordValue::Null);
        let variables = Variables::new();
        assert_eq!(
            DefaultCacheResolver.resolve_field(&context(&field, &variables, &parent)),
            Ok(RecordValue::Null)
        );
    }

    #[test]
    fn field_policy_resolves_key_arguments() {
        let field = CompiledField::new("book", CompiledType::object("Book"))
            .with_argument(CompiledArgument::new("isbn", ArgumentValue::variable("isbn")).key());
        let parent = Record::new("QUERY_ROOT");
        let variables = Variables::new().with("isbn", json!("978"));
        assert_eq!(
            FieldPolicyCacheResolver.resolve_field(&context(&field, &variables, &parent)),
            Ok(RecordValue::Reference(CacheKey::new("Book:978")))
        );

        let unbound = Variables::new();
        assert!(FieldPolicyCacheResolver
            .resolve_field(&context(&field, &unbound, &parent))
            .is_err());
    }
}
