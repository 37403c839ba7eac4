//! Operation types and typed GraphQL traits.

use fcp_normalized_cache::{Executable, SelectionSet};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GraphqlError;

/// GraphQL document text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphqlQuery {
    query: String,
}

impl GraphqlQuery {
    /// Create a new query from a string.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
        }
    }

    /// Create a new query from a static string.
    #[must_use]
    pub fn from_static(query: &'static str) -> Self {
        Self::new(query)
    }

    /// Return the query text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.query
    }
}

/// Operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Read; the only kind that honors fetch policies.
    Query,
    /// Write; always executed on the network.
    Mutation,
    /// Stream of results; always executed on the network.
    Subscription,
}

impl OperationKind {
    /// Name of the root type (`Query`, `Mutation`, `Subscription`).
    #[must_use]
    pub const fn root_type(self) -> &'static str {
        match self {
            Self::Query => "Query",
            Self::Mutation => "Mutation",
            Self::Subscription => "Subscription",
        }
    }
}

/// Typed GraphQL operation definition.
///
/// Implement this trait (usually generated) for each query, mutation and
/// subscription. The [`Executable`] supertrait carries the selection metadata
/// the normalized cache reads and writes with.
pub trait GraphqlOperation: Executable + Send + Sync + 'static {
    /// GraphQL document text.
    const QUERY: &'static str;
    /// Operation name (used for observability and routing).
    const OPERATION_NAME: &'static str;
    /// Operation type.
    const KIND: OperationKind;
}

/// Untyped description of an operation, shared by every request for it.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDescriptor {
    /// Operation name.
    pub name: String,
    /// Document text.
    pub query: GraphqlQuery,
    /// Operation type.
    pub kind: OperationKind,
    /// Root selections.
    pub selection_set: SelectionSet,
}

impl OperationDescriptor {
    /// Describe a typed operation.
    #[must_use]
    pub fn of<O: GraphqlOperation>() -> Self {
        Self {
            name: O::OPERATION_NAME.to_string(),
            query: GraphqlQuery::from_static(O::QUERY),
            kind: O::KIND,
            selection_set: SelectionSet::of::<O>(),
        }
    }
}

/// GraphQL request payload as sent on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlRequest<V> {
    /// Query text.
    pub query: GraphqlQuery,
    /// Variables.
    pub variables: V,
    /// Optional operation name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Client-side request identity; never sent.
    #[serde(skip)]
    pub request_uuid: Uuid,
}

impl<V> GraphqlRequest<V> {
    /// Create a new request with a fresh UUID.
    #[must_use]
    pub fn new(query: GraphqlQuery, variables: V) -> Self {
        Self {
            query,
            variables,
            operation_name: None,
            request_uuid: Uuid::new_v4(),
        }
    }

    /// Attach an operation name.
    #[must_use]
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Use an existing request UUID.
    #[must_use]
    pub const fn with_request_uuid(mut self, request_uuid: Uuid) -> Self {
        self.request_uuid = request_uuid;
        self
    }
}

/// GraphQL response container.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct GraphqlResponse<T> {
    /// Response data.
    #[serde(default)]
    pub data: Option<T>,
    /// GraphQL errors.
    #[serde(default)]
    pub errors: Vec<GraphqlError>,
    /// Extensions payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<serde_json::Value>,
}

impl<T> GraphqlResponse<T> {
    /// Returns `true` if no GraphQL errors were returned.
    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_serializes_wire_shape() {
        let query = GraphqlQuery::new("query Hero { hero { name } }");
        let request = GraphqlRequest::new(query, json!({})).with_operation_name("Hero");
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "query": "query Hero { hero { name } }",
                "variables": {},
                "operationName": "Hero"
            })
        );
    }

    #[test]
    fn response_tolerates_missing_fields() {
        let response: GraphqlResponse<serde_json::Value> =
            serde_json::from_value(json!({"errors": [{"message": "boom"}]})).unwrap();
        assert!(response.data.is_none());
        assert!(!response.is_ok());
    }
}
