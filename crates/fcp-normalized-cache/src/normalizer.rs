//! Flattening response trees into records.

use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value};

use crate::cache_key::{CacheKey, CacheKeyGenerator, CacheKeyGeneratorContext};
use crate::compiled::{
    CompiledField, CompiledSelection, CompiledType, SelectionSet, Variables, collect_fields,
    object_typename,
};
use crate::error::CacheError;
use crate::record::{Record, RecordValue};

/// Walks response data in lock-step with its selections.
///
/// Objects with an identity become records keyed by that identity. Objects
/// without one become records keyed by their path from the nearest keyed
/// ancestor (`QUERY_ROOT.hero`, `Character:1.friends.0`), so every stored
/// value keeps exactly one field path.
pub struct Normalizer<'a> {
    variables: &'a Variables,
    key_generator: &'a dyn CacheKeyGenerator,
    records: HashMap<String, Record>,
}

impl<'a> Normalizer<'a> {
    /// Create a normalizer for one write.
    #[must_use]
    pub fn new(variables: &'a Variables, key_generator: &'a dyn CacheKeyGenerator) -> Self {
        Self {
            variables,
            key_generator,
            records: HashMap::new(),
        }
    }

    /// Normalize `data` under `root_key`.
    ///
    /// # Errors
    /// Returns [`CacheError::Normalization`] if a composite field holds a
    /// scalar value.
    pub fn normalize(
        mut self,
        root_key: &CacheKey,
        selection_set: &SelectionSet,
        data: &Map<String, Value>,
    ) -> Result<HashMap<String, Record>, CacheError> {
        self.object(
            root_key.as_str(),
            &selection_set.root_type,
            data,
            &selection_set.roots(),
        )?;
        tracing::trace!(root = %root_key, records = self.records.len(), "normalized response");
        Ok(self.records)
    }

    fn object(
        &mut self,
        key: &str,
        static_type: &str,
        object: &Map<String, Value>,
        selections: &[&CompiledSelection],
    ) -> Result<(), CacheError> {
        let typename = object_typename(object, static_type);
        let mut record = Record::new(key);
        for group in collect_fields(selections, typename, self.variables) {
            let Some(value) = object.get(group.field.response_name()) else {
                continue;
            };
            let storage_name = group.field.storage_name(self.variables);
            let path = format!("{key}.{storage_name}");
            let value = self.value(&path, group.field, &group.field.ty, value, &group.selections)?;
            record.insert(storage_name, value);
        }
        match self.records.get_mut(key) {
            Some(existing) => {
                existing.merge_with(record);
            }
            None => {
                self.records.insert(key.to_string(), record);
            }
        }
        Ok(())
    }

    fn value(
        &mut self,
        path: &str,
        field: &CompiledField,
        ty: &CompiledType,
        value: &Value,
        selections: &[&CompiledSelection],
    ) -> Result<RecordValue, CacheError> {
        let ty = match ty {
            CompiledType::NotNull(inner) => inner.as_ref(),
            other => other,
        };
        match (value, ty) {
            (Value::Null, _) => Ok(RecordValue::Null),
            (Value::Array(items), CompiledType::List(inner)) if inner.is_composite() => items
                .iter()
                .enumerate()
                .map(|(index, item)| {
                    self.value(&format!("{path}.{index}"), field, inner, item, selections)
                })
                .collect::<Result<Vec<_>, _>>()
                .map(RecordValue::List),
            (Value::Object(object), CompiledType::Named { .. }) if ty.is_composite() => {
                let typename = object_typename(object, ty.leaf_name());
                let context = CacheKeyGeneratorContext {
                    field,
                    variables: self.variables,
                };
                let key = self
                    .key_generator
                    .cache_key_for_object(typename, object, &context)
                    .map_or_else(|| path.to_string(), CacheKey::into_string);
                self.object(&key, ty.leaf_name(), object, selections)?;
                Ok(RecordValue::Reference(CacheKey::new(key)))
            }
            (other, ty) if ty.is_composite() => Err(CacheError::Normalization {
                path: path.to_string(),
                message: format!("expected {} for '{}', got {other}", describe(ty), field.name),
            }),
            (other, _) => Ok(RecordValue::from(other.clone())),
        }
    }
}

fn describe(ty: &CompiledType) -> &'static str {
    match ty {
        CompiledType::List(_) => "a list",
        CompiledType::NotNull(inner) => describe(inner),
        CompiledType::Named { .. } => "an object",
    }
}

/// Field paths of every field of `records`.
#[must_use]
pub fn field_keys<'a, I>(records: I) -> HashSet<String>
where
    I: IntoIterator<Item = &'a Record>,
{
    records
        .into_iter()
        .flat_map(Record::field_keys)
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache_key::{TypePolicyCacheKeyGenerator, default_cache_key_generator};
    use crate::compiled::{ArgumentValue, CompiledArgument, CompiledFragment};

    fn scalar(name: &str) -> CompiledSelection {
        CompiledField::new(name, CompiledType::scalar("String")).into()
    }

    fn hero_query() -> SelectionSet {
        SelectionSet::new(
            "Query",
            vec![
                CompiledField::new("hero", CompiledType::interface("Character"))
                    .with_argument(CompiledArgument::new(
                        "episode",
                        ArgumentValue::variable("episode"),
                    ))
                    .with_selections(vec![
                        scalar("__typename"),
                        scalar("id"),
                        scalar("name"),
                        CompiledField::new("friends", CompiledType::interface("Character").list())
                            .with_selections(vec![scalar("id"), scalar("name")])
                            .into(),
                        CompiledFragment::new("Droid", vec![scalar("primaryFunction")]).into(),
                    ])
                    .into(),
            ],
        )
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn normalize(
        selection_set: &SelectionSet,
        variables: &Variables,
        data: Value,
    ) -> Result<HashMap<String, Record>, CacheError> {
        let generator = default_cache_key_generator(TypePolicyCacheKeyGenerator::new());
        Normalizer::new(variables, &generator).normalize(
            &CacheKey::root(),
            selection_set,
            &object(data),
        )
    }

    #[test]
    fn objects_with_ids_become_records() {
        let variables = Variables::new().with("episode", json!("JEDI"));
        let records = normalize(
            &hero_query(),
            &variables,
            json!({
                "hero": {
                    "__typename": "Droid",
                    "id": "2001",
                    "name": "R2-D2",
                    "primaryFunction": "Astromech",
                    "friends": [
                        {"id": "1000", "name": "Luke"},
                        null,
                        {"id": "1002", "name": "Han"}
                    ]
                }
            }),
        )
        .unwrap();

        let root = &records["QUERY_ROOT"];
        assert_eq!(
            root.field(r#"hero({"episode":"JEDI"})"#),
            Some(&RecordValue::Reference(CacheKey::new("2001")))
        );
        let hero = &records["2001"];
        assert_eq!(
            hero.field("primaryFunction"),
            Some(&RecordValue::from(json!("Astromech")))
        );
        assert_eq!(
            hero.field("friends"),
            Some(&RecordValue::List(vec![
                CacheKey::new("1000").into(),
                RecordValue::Null,
                CacheKey::new("1002").into(),
            ]))
        );
        assert_eq!(records["1000"].field("name"), Some(&RecordValue::from(json!("Luke"))));
        assert_eq!(records.len(), 4);
    }

    #[test]
    fn objects_without_identity_are_path_keyed() {
        let records = normalize(
            &hero_query(),
            &Variables::new(),
            json!({
                "hero": {
                    "__typename": "Human",
                    "name": "Luke",
                    "friends": [{"name": "Han"}]
                }
            }),
        )
        .unwrap();

        assert_eq!(
            records["QUERY_ROOT"].field("hero"),
            Some(&RecordValue::Reference(CacheKey::new("QUERY_ROOT.hero")))
        );
        assert_eq!(
            records["QUERY_ROOT.hero"].field("friends"),
            Some(&RecordValue::List(vec![CacheKey::new("QUERY_ROOT.hero.friends.0").into()]))
        );
        let keys = field_keys(records.values());
        assert!(keys.contains("QUERY_ROOT.hero"));
        assert!(keys.contains("QUERY_ROOT.hero.name"));
        assert!(keys.contains("QUERY_ROOT.hero.friends.0.name"));
    }

    #[test]
    fn null_is_stored_and_missing_is_skipped() {
        let records = normalize(
            &hero_query(),
            &Variables::new(),
            json!({"hero": {"id": "1", "name": null}}),
        )
        .unwrap();
        let hero = &records["1"];
        assert_eq!(hero.field("name"), Some(&RecordValue::Null));
        assert_eq!(hero.field("friends"), None);
    }

    #[test]
    fn duplicate_objects_merge_into_one_record() {
        let records = normalize(
            &hero_query(),
            &Variables::new(),
            json!({
                "hero": {
                    "id": "1",
                    "name": "Luke",
                    "friends": [{"id": "1", "name": "Luke"}]
                }
            }),
        )
        .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records["1"].field("friends").is_some());
    }

    #[test]
    fn scalar_in_composite_position_is_an_error() {
        let err = normalize(&hero_query(), &Variables::new(), json!({"hero": 7})).unwrap_err();
        match err {
            CacheError::Normalization { path, .. } => assert_eq!(path, "QUERY_ROOT.hero"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn fragment_root_uses_caller_key() {
        let fragment = SelectionSet::new("Character", vec![scalar("name")]);
        let generator = default_cache_key_generator(TypePolicyCacheKeyGenerator::new());
        let variables = Variables::new();
        let records = Normalizer::new(&variables, &generator)
            .normalize(&CacheKey::new("1000"), &fragment, &object(json!({"name": "Luke"})))
            .unwrap();
        assert_eq!(records["1000"].field("name"), Some(&RecordValue::from(json!("Luke"))));
    }
}
