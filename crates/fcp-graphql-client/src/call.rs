//! Requests and responses flowing through the interceptor chain.

use std::sync::Arc;

use fcp_normalized_cache::{CacheHeaders, CacheKey, Variables};
use futures_util::stream::BoxStream;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{GraphqlClientError, GraphqlError};
use crate::operation::{OperationDescriptor, OperationKind};

/// Order and fallthrough between cache and network for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FetchPolicy {
    /// Cache; on a miss, network.
    #[default]
    CacheFirst,
    /// Cache only.
    CacheOnly,
    /// Network only.
    NetworkOnly,
    /// Network; on a failure, cache.
    NetworkFirst,
    /// Cache immediately, then network.
    CacheAndNetwork,
}

/// How fallthrough failures reach the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// Fold failures into responses (`exception`, `cache_info`).
    #[default]
    Annotate,
    /// Raise failures as stream errors, combining both causes of a
    /// fallthrough into [`GraphqlClientError::Composite`].
    Throw,
}

/// Watch settings of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchOptions {
    /// Policy used by re-executions after a dependency changed.
    pub refetch_policy: FetchPolicy,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            refetch_policy: FetchPolicy::CacheOnly,
        }
    }
}

/// One execution request.
#[derive(Debug, Clone)]
pub struct CallRequest {
    /// Identity shared by every response to this request.
    pub request_uuid: Uuid,
    /// Operation being executed.
    pub operation: Arc<OperationDescriptor>,
    /// Variable bindings.
    pub variables: Variables,
    /// Fetch policy (queries only).
    pub fetch_policy: FetchPolicy,
    /// Failure mode of the fetch policy.
    pub failure_mode: FailureMode,
    /// Headers for cache reads and writes.
    pub cache_headers: CacheHeaders,
    /// Data to apply optimistically while a mutation is in flight.
    pub optimistic_data: Option<Map<String, Value>>,
    /// Write responses that carry GraphQL errors.
    pub store_partial_responses: bool,
    /// Set for watched queries.
    pub watch: Option<WatchOptions>,
    /// Routed to the cache instead of the network by the cache interceptor.
    pub fetch_from_cache: bool,
}

impl CallRequest {
    /// Create a request with default options.
    #[must_use]
    pub fn new(operation: Arc<OperationDescriptor>, variables: Variables) -> Self {
        Self {
            request_uuid: Uuid::new_v4(),
            operation,
            variables,
            fetch_policy: FetchPolicy::default(),
            failure_mode: FailureMode::default(),
            cache_headers: CacheHeaders::none(),
            optimistic_data: None,
            store_partial_responses: false,
            watch: None,
            fetch_from_cache: false,
        }
    }

    /// Returns `true` for query operations.
    #[must_use]
    pub fn is_query(&self) -> bool {
        self.operation.kind == OperationKind::Query
    }

    /// Record key the operation's data is written under.
    #[must_use]
    pub fn root_key(&self) -> CacheKey {
        match self.operation.kind {
            OperationKind::Query => CacheKey::root(),
            OperationKind::Mutation => CacheKey::new("MUTATION_ROOT"),
            OperationKind::Subscription => CacheKey::new("SUBSCRIPTION_ROOT"),
        }
    }
}

/// Where a response came from and what failed along the way.
#[derive(Debug, Clone, Default)]
pub struct CacheInfo {
    /// The data was read from the cache.
    pub is_cache_hit: bool,
    /// Cache read failure observed before or instead of this response.
    pub cache_miss_exception: Option<GraphqlClientError>,
    /// Network failure observed before or instead of this response.
    pub network_exception: Option<GraphqlClientError>,
}

/// One response of a call.
#[derive(Debug, Clone)]
pub struct CallResponse {
    /// Request identity.
    pub request_uuid: Uuid,
    /// Response data.
    pub data: Option<Map<String, Value>>,
    /// GraphQL errors returned with the data.
    pub errors: Vec<GraphqlError>,
    /// Extensions payload.
    pub extensions: Option<Value>,
    /// Failure that produced this response instead of data.
    pub exception: Option<GraphqlClientError>,
    /// Cache and network annotations.
    pub cache_info: CacheInfo,
    /// No further response follows.
    pub is_last: bool,
}

impl CallResponse {
    /// Response carrying data.
    #[must_use]
    pub fn data(request_uuid: Uuid, data: Map<String, Value>) -> Self {
        Self {
            request_uuid,
            data: Some(data),
            errors: Vec::new(),
            extensions: None,
            exception: None,
            cache_info: CacheInfo::default(),
            is_last: true,
        }
    }

    /// Response carrying a failure.
    #[must_use]
    pub fn failure(request_uuid: Uuid, exception: GraphqlClientError) -> Self {
        Self {
            request_uuid,
            data: None,
            errors: Vec::new(),
            extensions: None,
            exception: Some(exception),
            cache_info: CacheInfo::default(),
            is_last: true,
        }
    }

    /// Set the terminal flag.
    #[must_use]
    pub const fn with_is_last(mut self, is_last: bool) -> Self {
        self.is_last = is_last;
        self
    }

    /// Returns `true` if the response carries no failure.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exception.is_none()
    }
}

/// Item of a response stream. `Err` is only produced in
/// [`FailureMode::Throw`] or when the chain itself is broken.
pub type CallResult = Result<CallResponse, GraphqlClientError>;

/// Responses of one call.
pub type ResponseStream = BoxStream<'static, CallResult>;
