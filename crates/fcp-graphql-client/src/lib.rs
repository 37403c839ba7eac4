//! FCP GraphQL Client - typed GraphQL calls over a normalized cache.
//!
//! This crate provides:
//! - Typed operations described by compiled selection metadata.
//! - An interceptor chain (`user -> watcher -> fetch policy -> cache -> network`).
//! - Fetch policies with annotating and throwing failure modes.
//! - Watched queries that re-execute when the fields they read change.
//! - Optimistic mutation layers rolled back when the response lands.
//! - An HTTP transport; any [`NetworkTransport`] can replace it.

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]

mod call;
mod client;
mod error;
mod interceptor;
mod operation;
mod transport;

pub use call::{
    CacheInfo, CallRequest, CallResponse, CallResult, FailureMode, FetchPolicy, ResponseStream,
    WatchOptions,
};
pub use client::{
    GraphqlClient, GraphqlClientBuilder, GraphqlClientConfig, OperationCall, OperationResponse,
    OperationStream,
};
pub use error::{
    GraphqlClientError, GraphqlError, GraphqlErrorLocation, GraphqlPathSegment, HttpErrorInfo,
};
pub use interceptor::{
    CacheInterceptor, FetchPolicyInterceptor, Interceptor, InterceptorChain, NetworkInterceptor,
    WatcherInterceptor,
};
pub use operation::{
    GraphqlOperation, GraphqlQuery, GraphqlRequest, GraphqlResponse, OperationDescriptor,
    OperationKind,
};
pub use transport::{
    HttpNetworkTransport, HttpNetworkTransportBuilder, HttpTransportConfig, NetworkResponse,
    NetworkStream, NetworkTransport, TransportMetrics, TransportMetricsSnapshot,
};

pub use fcp_normalized_cache as cache;
