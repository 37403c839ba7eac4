//! GraphQL client over a normalized cache.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use fcp_normalized_cache::{CacheHeaders, NormalizedStore, Variables};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use reqwest::header::{HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::call::{CacheInfo, CallRequest, CallResponse, FailureMode, FetchPolicy, WatchOptions};
use crate::error::{GraphqlClientError, GraphqlError};
use crate::interceptor::{
    CacheInterceptor, FetchPolicyInterceptor, Interceptor, InterceptorChain, NetworkInterceptor,
    WatcherInterceptor,
};
use crate::operation::{GraphqlOperation, OperationDescriptor};
use crate::transport::{HttpNetworkTransportBuilder, NetworkTransport};

/// Defaults applied to every call of a client.
#[derive(Debug, Clone)]
pub struct GraphqlClientConfig {
    /// Fetch policy of queries.
    pub fetch_policy: FetchPolicy,
    /// Failure mode of fetch policies.
    pub failure_mode: FailureMode,
    /// Headers for cache reads and writes.
    pub cache_headers: CacheHeaders,
    /// Write responses that carry GraphQL errors.
    pub store_partial_responses: bool,
    /// Policy of watch re-executions.
    pub watch_refetch_policy: FetchPolicy,
}

impl Default for GraphqlClientConfig {
    fn default() -> Self {
        Self {
            fetch_policy: FetchPolicy::CacheFirst,
            failure_mode: FailureMode::Annotate,
            cache_headers: CacheHeaders::none(),
            store_partial_responses: false,
            watch_refetch_policy: WatchOptions::default().refetch_policy,
        }
    }
}

#[derive(Debug)]
enum TransportSource {
    Http(HttpNetworkTransportBuilder),
    Custom(Arc<dyn NetworkTransport>),
}

/// GraphQL client builder.
#[derive(Debug)]
pub struct GraphqlClientBuilder {
    transport: TransportSource,
    store: Option<Arc<NormalizedStore>>,
    interceptors: Vec<Arc<dyn Interceptor>>,
    config: GraphqlClientConfig,
}

impl GraphqlClientBuilder {
    /// Create a builder for an HTTP endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_source(TransportSource::Http(HttpNetworkTransportBuilder::new(endpoint)))
    }

    /// Create a builder over a custom transport.
    #[must_use]
    pub fn from_transport(transport: impl NetworkTransport + 'static) -> Self {
        Self::with_source(TransportSource::Custom(Arc::new(transport)))
    }

    fn with_source(transport: TransportSource) -> Self {
        Self {
            transport,
            store: None,
            interceptors: Vec::new(),
            config: GraphqlClientConfig::default(),
        }
    }

    /// Add an HTTP header. Ignored with a custom transport.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.transport = match self.transport {
            TransportSource::Http(builder) => {
                TransportSource::Http(builder.with_header(name, value))
            }
            custom @ TransportSource::Custom(_) => custom,
        };
        self
    }

    /// Set the HTTP timeout. Ignored with a custom transport.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.transport = match self.transport {
            TransportSource::Http(builder) => TransportSource::Http(builder.with_timeout(timeout)),
            custom @ TransportSource::Custom(_) => custom,
        };
        self
    }

    /// Share an existing store. Defaults to a fresh in-memory store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<NormalizedStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Add an interceptor in front of the built-in ones.
    #[must_use]
    pub fn with_interceptor(mut self, interceptor: impl Interceptor + 'static) -> Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    /// Set the default fetch policy.
    #[must_use]
    pub const fn with_fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.config.fetch_policy = policy;
        self
    }

    /// Set the default failure mode.
    #[must_use]
    pub const fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.config.failure_mode = mode;
        self
    }

    /// Set the default cache headers.
    #[must_use]
    pub fn with_cache_headers(mut self, headers: CacheHeaders) -> Self {
        self.config.cache_headers = headers;
        self
    }

    /// Write responses that carry GraphQL errors.
    #[must_use]
    pub const fn with_store_partial_responses(mut self, enabled: bool) -> Self {
        self.config.store_partial_responses = enabled;
        self
    }

    /// Set the default policy of watch re-executions.
    #[must_use]
    pub const fn with_watch_refetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.config.watch_refetch_policy = policy;
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<GraphqlClient, GraphqlClientError> {
        let transport: Arc<dyn NetworkTransport> = match self.transport {
            TransportSource::Http(builder) => Arc::new(builder.build()?),
            TransportSource::Custom(transport) => transport,
        };
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(NormalizedStore::in_memory()));

        let mut interceptors = self.interceptors;
        interceptors.push(Arc::new(WatcherInterceptor::new(Arc::clone(&store))));
        interceptors.push(Arc::new(FetchPolicyInterceptor));
        interceptors.push(Arc::new(CacheInterceptor::new(Arc::clone(&store))));
        interceptors.push(Arc::new(NetworkInterceptor::new(Arc::clone(&transport))));

        Ok(GraphqlClient {
            inner: Arc::new(ClientInner {
                store,
                transport,
                chain: InterceptorChain::new(interceptors),
                config: self.config,
                disposed: AtomicBool::new(false),
            }),
        })
    }
}

#[derive(Debug)]
struct ClientInner {
    store: Arc<NormalizedStore>,
    transport: Arc<dyn NetworkTransport>,
    chain: InterceptorChain,
    config: GraphqlClientConfig,
    disposed: AtomicBool,
}

/// GraphQL client.
///
/// Cheap to clone; clones share the store, transport and interceptors.
#[derive(Debug, Clone)]
pub struct GraphqlClient {
    inner: Arc<ClientInner>,
}

impl GraphqlClient {
    /// Create a client for an HTTP endpoint with default configuration.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, GraphqlClientError> {
        GraphqlClientBuilder::new(endpoint).build()
    }

    /// Return a builder for an HTTP endpoint.
    #[must_use]
    pub fn builder(endpoint: impl Into<String>) -> GraphqlClientBuilder {
        GraphqlClientBuilder::new(endpoint)
    }

    /// The store behind this client.
    #[must_use]
    pub fn store(&self) -> &Arc<NormalizedStore> {
        &self.inner.store
    }

    /// Prepare a query.
    #[must_use]
    pub fn query<O: GraphqlOperation>(&self, variables: &O::Variables) -> OperationCall<O> {
        self.call(variables)
    }

    /// Prepare a mutation.
    #[must_use]
    pub fn mutation<O: GraphqlOperation>(&self, variables: &O::Variables) -> OperationCall<O> {
        self.call(variables)
    }

    /// Prepare a subscription.
    #[must_use]
    pub fn subscription<O: GraphqlOperation>(&self, variables: &O::Variables) -> OperationCall<O> {
        self.call(variables)
    }

    fn call<O: GraphqlOperation>(&self, variables: &O::Variables) -> OperationCall<O> {
        let config = &self.inner.config;
        let request = Variables::from_serialize(variables)
            .map_err(GraphqlClientError::from)
            .map(|variables| {
                let mut request =
                    CallRequest::new(Arc::new(OperationDescriptor::of::<O>()), variables);
                request.fetch_policy = config.fetch_policy;
                request.failure_mode = config.failure_mode;
                request.cache_headers = config.cache_headers.clone();
                request.store_partial_responses = config.store_partial_responses;
                request
            });
        OperationCall {
            client: self.clone(),
            request,
            refetch_policy: config.watch_refetch_policy,
            _operation: PhantomData,
        }
    }

    /// Close watches and release the transport. Later calls fail with
    /// [`GraphqlClientError::Disposed`].
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("disposing GraphQL client");
        self.inner.store.dispose();
        self.inner.transport.dispose();
    }

    fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }
}

/// Typed response stream.
pub type OperationStream<D> = BoxStream<'static, Result<OperationResponse<D>, GraphqlClientError>>;

/// A prepared call; configure it, then `execute`, `to_stream` or `watch`.
#[derive(Debug)]
#[must_use = "calls do nothing until executed"]
pub struct OperationCall<O: GraphqlOperation> {
    client: GraphqlClient,
    request: Result<CallRequest, GraphqlClientError>,
    refetch_policy: FetchPolicy,
    _operation: PhantomData<fn() -> O>,
}

impl<O: GraphqlOperation> OperationCall<O> {
    fn update(mut self, apply: impl FnOnce(&mut CallRequest)) -> Self {
        if let Ok(request) = self.request.as_mut() {
            apply(request);
        }
        self
    }

    /// Set the fetch policy.
    pub fn fetch_policy(self, policy: FetchPolicy) -> Self {
        self.update(|request| request.fetch_policy = policy)
    }

    /// Set the failure mode.
    pub fn failure_mode(self, mode: FailureMode) -> Self {
        self.update(|request| request.failure_mode = mode)
    }

    /// Set the cache headers.
    pub fn cache_headers(self, headers: CacheHeaders) -> Self {
        self.update(|request| request.cache_headers = headers)
    }

    /// Write responses that carry GraphQL errors.
    pub fn store_partial_responses(self, enabled: bool) -> Self {
        self.update(|request| request.store_partial_responses = enabled)
    }

    /// Apply `data` to the cache while the call is in flight.
    pub fn optimistic_data(mut self, data: &O::Data) -> Self {
        match to_object(data) {
            Ok(data) => self.update(|request| request.optimistic_data = Some(data)),
            Err(err) => {
                self.request = Err(err);
                self
            }
        }
    }

    /// Set the policy of watch re-executions.
    pub const fn refetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.refetch_policy = policy;
        self
    }

    /// Execute and return the final response.
    ///
    /// Among several responses the last successful one wins, so a
    /// cache-first miss followed by a network hit yields the network hit.
    pub async fn execute(self) -> Result<OperationResponse<O::Data>, GraphqlClientError> {
        let mut responses = self.to_stream();
        let mut last_success = None;
        let mut last_failure = None;
        while let Some(item) = responses.next().await {
            let response = item?;
            if response.is_success() {
                last_success = Some(response);
            } else {
                last_failure = Some(response);
            }
        }
        last_success
            .or(last_failure)
            .ok_or_else(|| GraphqlClientError::Protocol {
                message: "call completed without a response".to_string(),
            })
    }

    /// Execute and stream every response.
    pub fn to_stream(self) -> OperationStream<O::Data> {
        let client = self.client;
        let request = match self.request {
            Ok(request) if !client.is_disposed() => request,
            Ok(_) => return failed(GraphqlClientError::Disposed),
            Err(err) => return failed(err),
        };
        debug!(
            request_uuid = %request.request_uuid,
            operation = %request.operation.name,
            policy = ?request.fetch_policy,
            watch = request.watch.is_some(),
            "executing operation"
        );
        client
            .inner
            .chain
            .proceed(request)
            .map(|item| item.map(OperationResponse::from_call))
            .boxed()
    }

    /// Execute, then re-execute whenever a field the data depends on
    /// changes. The first response is always a pending marker (see
    /// [`OperationResponse::is_watch_pending`]).
    pub fn watch(self) -> OperationStream<O::Data> {
        let refetch_policy = self.refetch_policy;
        self.update(|request| request.watch = Some(WatchOptions { refetch_policy }))
            .to_stream()
    }
}

fn failed<D: Send + 'static>(err: GraphqlClientError) -> OperationStream<D> {
    stream::once(async move { Err(err) }).boxed()
}

fn to_object<T: serde::Serialize>(value: &T) -> Result<Map<String, Value>, GraphqlClientError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(GraphqlClientError::Json(format!(
            "expected an object, found {other}"
        ))),
    }
}

/// Typed response of a call.
#[derive(Debug, Clone)]
pub struct OperationResponse<D> {
    /// Request identity.
    pub request_uuid: Uuid,
    /// Decoded data.
    pub data: Option<D>,
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

impl<D: DeserializeOwned> OperationResponse<D> {
    fn from_call(response: CallResponse) -> Self {
        let mut exception = response.exception;
        let data = response.data.and_then(|data| {
            match serde_json::from_value(Value::Object(data)) {
                Ok(data) => Some(data),
                Err(err) => {
                    if exception.is_none() {
                        exception = Some(GraphqlClientError::from(err));
                    }
                    None
                }
            }
        });
        Self {
            request_uuid: response.request_uuid,
            data,
            errors: response.errors,
            extensions: response.extensions,
            exception,
            cache_info: response.cache_info,
            is_last: response.is_last,
        }
    }
}

impl<D> OperationResponse<D> {
    /// Returns `true` if the response carries no failure.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.exception.is_none()
    }

    /// Returns `true` if GraphQL errors were returned.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` for the first emission of a watch.
    #[must_use]
    pub fn is_watch_pending(&self) -> bool {
        self.exception
            .as_ref()
            .is_some_and(GraphqlClientError::is_watcher_sentinel)
    }

    /// Data, or the failure or GraphQL errors that replaced it.
    pub fn into_data(self) -> Result<D, GraphqlClientError> {
        if let Some(exception) = self.exception {
            return Err(exception);
        }
        if !self.errors.is_empty() {
            return Err(GraphqlClientError::GraphqlErrors {
                errors: self.errors,
            });
        }
        self.data.ok_or_else(|| GraphqlClientError::Protocol {
            message: "missing GraphQL data".to_string(),
        })
    }
}
