//! Pre-resolved selection metadata consumed by the normalizer and the reader.
//!
//! These types describe what a GraphQL compiler emits for an operation or a
//! fragment: the field tree, field types, arguments and conditions. The cache
//! never parses GraphQL text; it walks these trees in lock-step with data.

use std::collections::BTreeMap;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

use crate::error::CacheError;

/// Kind of a named GraphQL type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Built-in or custom scalar.
    Scalar,
    /// Enum.
    Enum,
    /// Object type.
    Object,
    /// Interface.
    Interface,
    /// Union.
    Union,
}

/// GraphQL type reference of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledType {
    /// Named type.
    Named {
        /// Type name.
        name: String,
        /// Type kind.
        kind: TypeKind,
    },
    /// Non-null wrapper.
    NotNull(Box<Self>),
    /// List wrapper.
    List(Box<Self>),
}

impl CompiledType {
    /// Named scalar type.
    #[must_use]
    pub fn scalar(name: impl Into<String>) -> Self {
        Self::Named {
            name: name.into(),
            kind: TypeKind::Scalar,
        }
    }

    /// Named enum type.
    #[must_use]
    pub fn enumeration(name: impl Into<String>) -> Self {
        Self::Named {
            name: name.into(),
            kind: TypeKind::Enum,
        }
    }

    /// Named object type.
    #[must_use]
    pub fn object(name: impl Into<String>) -> Self {
        Self::Named {
            name: name.into(),
            kind: TypeKind::Object,
        }
    }

    /// Named interface type.
    #[must_use]
    pub fn interface(name: impl Into<String>) -> Self {
        Self::Named {
            name: name.into(),
            kind: TypeKind::Interface,
        }
    }

    /// Named union type.
    #[must_use]
    pub fn union(name: impl Into<String>) -> Self {
        Self::Named {
            name: name.into(),
            kind: TypeKind::Union,
        }
    }

    /// Wrap in non-null.
    #[must_use]
    pub fn non_null(self) -> Self {
        Self::NotNull(Box::new(self))
    }

    /// Wrap in a list.
    #[must_use]
    pub fn list(self) -> Self {
        Self::List(Box::new(self))
    }

    /// Name of the innermost named type.
    #[must_use]
    pub fn leaf_name(&self) -> &str {
        match self {
            Self::Named { name, .. } => name,
            Self::NotNull(inner) | Self::List(inner) => inner.leaf_name(),
        }
    }

    /// Kind of the innermost named type.
    #[must_use]
    pub fn leaf_kind(&self) -> TypeKind {
        match self {
            Self::Named { kind, .. } => *kind,
            Self::NotNull(inner) | Self::List(inner) => inner.leaf_kind(),
        }
    }

    /// Returns `true` if the named type has selections of its own.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        matches!(
            self.leaf_kind(),
            TypeKind::Object | TypeKind::Interface | TypeKind::Union
        )
    }

    /// Returns `true` if a list wrapper appears anywhere in the type.
    #[must_use]
    pub fn is_list(&self) -> bool {
        match self {
            Self::Named { .. } => false,
            Self::List(_) => true,
            Self::NotNull(inner) => inner.is_list(),
        }
    }
}

/// Variable bindings of one execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables(Map<String, Value>);

impl Variables {
    /// Empty bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serialize a typed variables value.
    ///
    /// Unit-like values (`null`) produce empty bindings; anything other than an
    /// object is rejected.
    pub fn from_serialize<T: Serialize + ?Sized>(variables: &T) -> Result<Self, CacheError> {
        match serde_json::to_value(variables)? {
            Value::Object(map) => Ok(Self(map)),
            Value::Null => Ok(Self::default()),
            other => Err(CacheError::InvalidVariables(format!(
                "expected a JSON object, got {other}"
            ))),
        }
    }

    /// Add a binding.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.0.insert(name.into(), value);
        self
    }

    /// Look up a binding.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    /// Borrow the underlying JSON object.
    #[must_use]
    pub const fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Convert into a JSON value.
    #[must_use]
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Variables {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Argument value as written in the document.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgumentValue {
    /// Reference to an operation variable.
    Variable(String),
    /// Literal JSON value.
    Literal(Value),
    /// List literal that may contain variables.
    List(Vec<Self>),
    /// Input object literal that may contain variables.
    Object(Vec<(String, Self)>),
}

impl ArgumentValue {
    /// Variable reference.
    #[must_use]
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// Resolve against bindings. Absent variables resolve to `None`.
    #[must_use]
    pub fn resolve(&self, variables: &Variables) -> Option<Value> {
        match self {
            Self::Variable(name) => variables.get(name).cloned(),
            Self::Literal(value) => Some(value.clone()),
            Self::List(items) => Some(Value::Array(
                items
                    .iter()
                    .map(|item| item.resolve(variables).unwrap_or(Value::Null))
                    .collect(),
            )),
            Self::Object(fields) => Some(Value::Object(
                fields
                    .iter()
                    .filter_map(|(name, value)| {
                        value.resolve(variables).map(|value| (name.clone(), value))
                    })
                    .collect(),
            )),
        }
    }
}

impl From<Value> for ArgumentValue {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

/// Field argument with its cache roles.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledArgument {
    /// Argument name.
    pub name: String,
    /// Argument value.
    pub value: ArgumentValue,
    /// Identifies the returned object (`@fieldPolicy(keyArgs:)`).
    pub is_key: bool,
    /// Selects a page; excluded from the storage name.
    pub is_pagination: bool,
}

impl CompiledArgument {
    /// Plain argument.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<ArgumentValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            is_key: false,
            is_pagination: false,
        }
    }

    /// Mark as key argument.
    #[must_use]
    pub const fn key(mut self) -> Self {
        self.is_key = true;
        self
    }

    /// Mark as pagination argument.
    #[must_use]
    pub const fn pagination(mut self) -> Self {
        self.is_pagination = true;
        self
    }
}

/// `@include(if:)` / `@skip(if:)` condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledCondition {
    /// Boolean variable name.
    pub variable: String,
    /// `true` for `@skip`.
    pub inverted: bool,
}

impl CompiledCondition {
    /// `@include(if: $variable)`.
    #[must_use]
    pub fn include(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            inverted: false,
        }
    }

    /// `@skip(if: $variable)`.
    #[must_use]
    pub fn skip(variable: impl Into<String>) -> Self {
        Self {
            variable: variable.into(),
            inverted: true,
        }
    }

    fn is_satisfied(&self, variables: &Variables) -> bool {
        let value = variables
            .get(&self.variable)
            .and_then(Value::as_bool)
            .unwrap_or(false);
        value != self.inverted
    }
}

/// One node of a selection set.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledSelection {
    /// Field selection.
    Field(CompiledField),
    /// Inline fragment or fragment spread.
    Fragment(CompiledFragment),
}

impl From<CompiledField> for CompiledSelection {
    fn from(field: CompiledField) -> Self {
        Self::Field(field)
    }
}

impl From<CompiledFragment> for CompiledSelection {
    fn from(fragment: CompiledFragment) -> Self {
        Self::Fragment(fragment)
    }
}

/// Field selection.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledField {
    /// Schema field name.
    pub name: String,
    /// Response alias.
    pub alias: Option<String>,
    /// Field type.
    pub ty: CompiledType,
    /// Arguments in declaration order.
    pub arguments: Vec<CompiledArgument>,
    /// Conditions that must all hold for the field to be selected.
    pub conditions: Vec<CompiledCondition>,
    /// Sub-selections for composite fields.
    pub selections: Vec<CompiledSelection>,
}

impl CompiledField {
    /// Create a field selection.
    #[must_use]
    pub fn new(name: impl Into<String>, ty: CompiledType) -> Self {
        Self {
            name: name.into(),
            alias: None,
            ty,
            arguments: Vec::new(),
            conditions: Vec::new(),
            selections: Vec::new(),
        }
    }

    /// Set the response alias.
    #[must_use]
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Add an argument.
    #[must_use]
    pub fn with_argument(mut self, argument: CompiledArgument) -> Self {
        self.arguments.push(argument);
        self
    }

    /// Add a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: CompiledCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Set sub-selections.
    #[must_use]
    pub fn with_selections(mut self, selections: Vec<CompiledSelection>) -> Self {
        self.selections = selections;
        self
    }

    /// Key under which the field appears in response data.
    #[must_use]
    pub fn response_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Name under which the field value is stored in its record.
    ///
    /// Non-pagination arguments are embedded as a compact JSON object sorted
    /// by argument name; pagination arguments never are, so every page of a
    /// paginated field lands under one storage name.
    #[must_use]
    pub fn storage_name(&self, variables: &Variables) -> String {
        let arguments: BTreeMap<&str, Value> = self
            .arguments
            .iter()
            .filter(|argument| !argument.is_pagination)
            .filter_map(|argument| {
                argument
                    .value
                    .resolve(variables)
                    .map(|value| (argument.name.as_str(), value))
            })
            .collect();
        if arguments.is_empty() {
            return self.name.clone();
        }
        match serde_json::to_string(&arguments) {
            Ok(encoded) => format!("{}({encoded})", self.name),
            Err(_) => self.name.clone(),
        }
    }

    /// Values of the key arguments, in declaration order.
    ///
    /// Returns `None` unless at least one key argument exists and all of them
    /// resolve to non-null values.
    #[must_use]
    pub fn key_argument_values(&self, variables: &Variables) -> Option<Vec<Value>> {
        let values: Option<Vec<Value>> = self
            .arguments
            .iter()
            .filter(|argument| argument.is_key)
            .map(|argument| {
                argument
                    .value
                    .resolve(variables)
                    .filter(|value| !value.is_null())
            })
            .collect();
        values.filter(|values| !values.is_empty())
    }

    fn is_included(&self, variables: &Variables) -> bool {
        self.conditions
            .iter()
            .all(|condition| condition.is_satisfied(variables))
    }
}

/// Inline fragment or named fragment spread.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFragment {
    /// Type condition.
    pub type_condition: String,
    /// Concrete types the condition matches.
    pub possible_types: Vec<String>,
    /// Conditions that must all hold.
    pub conditions: Vec<CompiledCondition>,
    /// Fragment selections.
    pub selections: Vec<CompiledSelection>,
}

impl CompiledFragment {
    /// Create a fragment on `type_condition`.
    #[must_use]
    pub fn new(type_condition: impl Into<String>, selections: Vec<CompiledSelection>) -> Self {
        Self {
            type_condition: type_condition.into(),
            possible_types: Vec::new(),
            conditions: Vec::new(),
            selections,
        }
    }

    /// Set the concrete types matched by the condition.
    #[must_use]
    pub fn with_possible_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.possible_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Add a condition.
    #[must_use]
    pub fn with_condition(mut self, condition: CompiledCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    fn applies_to(&self, typename: &str) -> bool {
        self.type_condition == typename || self.possible_types.iter().any(|ty| ty == typename)
    }
}

/// A typed operation or fragment the store can read and write.
pub trait Executable {
    /// Variables type; must serialize to a JSON object or `null`.
    type Variables: Serialize + Send + Sync;
    /// Response data type.
    type Data: Serialize + DeserializeOwned + Send + Sync;

    /// Type the selections apply to (`Query`, `Mutation`, or a fragment's
    /// type condition).
    fn root_type() -> &'static str;

    /// Root selections.
    fn selections() -> Vec<CompiledSelection>;
}

/// Root type plus root selections of one operation or fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionSet {
    /// Type the selections apply to.
    pub root_type: String,
    /// Root selections.
    pub selections: Vec<CompiledSelection>,
}

impl SelectionSet {
    /// Create a selection set.
    #[must_use]
    pub fn new(root_type: impl Into<String>, selections: Vec<CompiledSelection>) -> Self {
        Self {
            root_type: root_type.into(),
            selections,
        }
    }

    /// Selection set of an executable.
    #[must_use]
    pub fn of<E: Executable>() -> Self {
        Self::new(E::root_type(), E::selections())
    }

    pub(crate) fn roots(&self) -> Vec<&CompiledSelection> {
        self.selections.iter().collect()
    }
}

/// Fields sharing one response name, with their merged sub-selections.
#[derive(Debug)]
pub(crate) struct FieldGroup<'a> {
    pub field: &'a CompiledField,
    pub selections: Vec<&'a CompiledSelection>,
}

/// Flatten fragments and conditions into the fields selected on `typename`.
pub(crate) fn collect_fields<'a>(
    selections: &[&'a CompiledSelection],
    typename: &str,
    variables: &Variables,
) -> Vec<FieldGroup<'a>> {
    let mut groups = Vec::new();
    collect_into(selections.iter().copied(), typename, variables, &mut groups);
    groups
}

fn collect_into<'a>(
    selections: impl Iterator<Item = &'a CompiledSelection>,
    typename: &str,
    variables: &Variables,
    groups: &mut Vec<FieldGroup<'a>>,
) {
    for selection in selections {
        match selection {
            CompiledSelection::Field(field) => {
                if !field.is_included(variables) {
                    continue;
                }
                if let Some(group) = groups
                    .iter_mut()
                    .find(|group| group.field.response_name() == field.response_name())
                {
                    group.selections.extend(field.selections.iter());
                } else {
                    groups.push(FieldGroup {
                        field,
                        selections: field.selections.iter().collect(),
                    });
                }
            }
            CompiledSelection::Fragment(fragment) => {
                let included = fragment
                    .conditions
                    .iter()
                    .all(|condition| condition.is_satisfied(variables));
                if included && fragment.applies_to(typename) {
                    collect_into(fragment.selections.iter(), typename, variables, groups);
                }
            }
        }
    }
}

/// Concrete typename of an object: its `__typename` when selected, else the
/// static type of the field it came from.
pub(crate) fn object_typename<'a>(object: &'a Map<String, Value>, fallback: &'a str) -> &'a str {
    object
        .get("__typename")
        .and_then(Value::as_str)
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn users_field() -> CompiledField {
        CompiledField::new("users", CompiledType::object("User").list())
            .with_argument(CompiledArgument::new("filter", ArgumentValue::variable("filter")))
            .with_argument(CompiledArgument::new("first", json!(10)).pagination())
            .with_argument(
                CompiledArgument::new("after", ArgumentValue::variable("after")).pagination(),
            )
    }

    #[test]
    fn storage_name_without_arguments_is_field_name() {
        let field = CompiledField::new("hero", CompiledType::interface("Character"));
        assert_eq!(field.storage_name(&Variables::new()), "hero");
    }

    #[test]
    fn storage_name_sorts_arguments() {
        let field = CompiledField::new("hero", CompiledType::interface("Character"))
            .with_argument(CompiledArgument::new("episode", json!("JEDI")))
            .with_argument(CompiledArgument::new("by", ArgumentValue::variable("by")));
        let variables = Variables::new().with("by", json!("name"));
        assert_eq!(
            field.storage_name(&variables),
            r#"hero({"by":"name","episode":"JEDI"})"#
        );
    }

    #[test]
    fn storage_name_omits_absent_variables() {
        let field = users_field();
        assert_eq!(field.storage_name(&Variables::new()), "users");
    }

    #[test]
    fn pagination_arguments_do_not_change_storage_name() {
        let field = users_field();
        let page_one = Variables::new().with("filter", json!("active"));
        let page_two = page_one.clone().with("after", json!("cursor-10"));
        assert_eq!(field.storage_name(&page_one), field.storage_name(&page_two));
    }

    #[test]
    fn other_arguments_change_storage_name() {
        let field = users_field();
        let active = Variables::new().with("filter", json!("active"));
        let banned = Variables::new().with("filter", json!("banned"));
        assert_ne!(field.storage_name(&active), field.storage_name(&banned));
    }

    #[test]
    fn key_argument_values_require_all_present() {
        let field = CompiledField::new("book", CompiledType::object("Book"))
            .with_argument(CompiledArgument::new("isbn", ArgumentValue::variable("isbn")).key());
        assert_eq!(field.key_argument_values(&Variables::new()), None);
        let variables = Variables::new().with("isbn", json!("978"));
        assert_eq!(field.key_argument_values(&variables), Some(vec![json!("978")]));
    }

    #[test]
    fn collect_fields_applies_conditions_and_fragments() {
        let selections = vec![
            CompiledSelection::from(CompiledField::new("name", CompiledType::scalar("String"))),
            CompiledField::new("secret", CompiledType::scalar("String"))
                .with_condition(CompiledCondition::include("withSecret"))
                .into(),
            CompiledFragment::new(
                "Droid",
                vec![CompiledField::new("primaryFunction", CompiledType::scalar("String")).into()],
            )
            .into(),
            CompiledFragment::new(
                "Human",
                vec![CompiledField::new("height", CompiledType::scalar("Float")).into()],
            )
            .into(),
        ];
        let refs: Vec<&CompiledSelection> = selections.iter().collect();
        let names: Vec<&str> = collect_fields(&refs, "Droid", &Variables::new())
            .iter()
            .map(|group| group.field.response_name())
            .collect();
        assert_eq!(names, vec!["name", "primaryFunction"]);

        let variables = Variables::new().with("withSecret", json!(true));
        let names: Vec<&str> = collect_fields(&refs, "Human", &variables)
            .iter()
            .map(|group| group.field.response_name())
            .collect();
        assert_eq!(names, vec!["name", "secret", "height"]);
    }

    #[test]
    fn collect_fields_merges_same_response_name() {
        let selections = vec![
            CompiledSelection::from(
                CompiledField::new("hero", CompiledType::interface("Character"))
                    .with_selections(vec![
                        CompiledField::new("name", CompiledType::scalar("String")).into(),
                    ]),
            ),
            CompiledFragment::new(
                "Query",
                vec![
                    CompiledField::new("hero", CompiledType::interface("Character"))
                        .with_selections(vec![
                            CompiledField::new("id", CompiledType::scalar("ID")).into(),
                        ])
                        .into(),
                ],
            )
            .into(),
        ];
        let refs: Vec<&CompiledSelection> = selections.iter().collect();
        let groups = collect_fields(&refs, "Query", &Variables::new());
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].selections.len(), 2);
    }

    #[test]
    fn variables_reject_non_objects() {
        assert!(Variables::from_serialize(&json!([1, 2])).is_err());
        assert_eq!(Variables::from_serialize(&()).unwrap(), Variables::new());
    }
}
