//! Network transports.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::GraphqlClientError;
use crate::operation::{GraphqlRequest, GraphqlResponse};

/// One response produced by a transport.
#[derive(Debug, Clone)]
pub struct NetworkResponse {
    /// Decoded GraphQL payload.
    pub response: GraphqlResponse<Map<String, Value>>,
    /// No further response follows for this request.
    pub is_last: bool,
}

/// Stream of responses for one request.
pub type NetworkStream = BoxStream<'static, Result<NetworkResponse, GraphqlClientError>>;

/// Executes GraphQL requests.
///
/// Queries and mutations yield one response; subscriptions may yield many.
pub trait NetworkTransport: Send + Sync + fmt::Debug {
    /// Start executing `request`.
    fn execute(&self, request: GraphqlRequest<Value>) -> NetworkStream;

    /// Release resources held by the transport.
    fn dispose(&self) {}
}

/// Transport request counters.
#[derive(Debug, Default)]
#[allow(clippy::struct_field_names)]
pub struct TransportMetrics {
    requests_total: AtomicU64,
    requests_success: AtomicU64,
    requests_error: AtomicU64,
}

impl TransportMetrics {
    /// Snapshot current metrics.
    #[must_use]
    pub fn snapshot(&self) -> TransportMetricsSnapshot {
        TransportMetricsSnapshot {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            requests_success: self.requests_success.load(Ordering::Relaxed),
            requests_error: self.requests_error.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[allow(clippy::struct_field_names)]
pub struct TransportMetricsSnapshot {
    /// Total requests.
    pub requests_total: u64,
    /// Requests answered with a 2xx status and a decodable body.
    pub requests_success: u64,
    /// Failed requests.
    pub requests_error: u64,
}

/// HTTP transport configuration.
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Default headers applied to every request.
    pub headers: HeaderMap,
    /// Request timeout.
    pub timeout: Duration,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Self {
            headers,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Builder for [`HttpNetworkTransport`].
#[derive(Debug, Clone)]
pub struct HttpNetworkTransportBuilder {
    endpoint: String,
    config: HttpTransportConfig,
}

impl HttpNetworkTransportBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            config: HttpTransportConfig::default(),
        }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.config.headers.insert(name, value);
        self
    }

    /// Set timeout.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Build the transport.
    pub fn build(self) -> Result<HttpNetworkTransport, GraphqlClientError> {
        HttpNetworkTransport::with_config(self.endpoint, self.config)
    }
}

/// GraphQL over HTTP POST.
#[derive(Debug, Clone)]
pub struct HttpNetworkTransport {
    endpoint: Arc<str>,
    http: reqwest::Client,
    metrics: Arc<TransportMetrics>,
}

impl HttpNetworkTransport {
    /// Create a transport with custom configuration.
    pub fn with_config(
        endpoint: impl Into<String>,
        config: HttpTransportConfig,
    ) -> Result<Self, GraphqlClientError> {
        let http = reqwest::Client::builder()
            .default_headers(config.headers)
            .timeout(config.timeout)
            .build()?;
        Ok(Self {
            endpoint: Arc::from(endpoint.into()),
            http,
            metrics: Arc::new(TransportMetrics::default()),
        })
    }

    /// Return transport metrics snapshot.
    #[must_use]
    pub fn metrics(&self) -> TransportMetricsSnapshot {
        self.metrics.snapshot()
    }

    async fn send(
        self,
        request: GraphqlRequest<Value>,
    ) -> Result<NetworkResponse, GraphqlClientError> {
        self.metrics.requests_total.fetch_add(1, Ordering::Relaxed);
        let result = self.send_once(&request).await;
        let counter = if result.is_ok() {
            &self.metrics.requests_success
        } else {
            &self.metrics.requests_error
        };
        counter.fetch_add(1, Ordering::Relaxed);
        result
    }

    async fn send_once(
        &self,
        request: &GraphqlRequest<Value>,
    ) -> Result<NetworkResponse, GraphqlClientError> {
        debug!(
            request_uuid = %request.request_uuid,
            operation = request.operation_name.as_deref().unwrap_or(""),
            "sending GraphQL request"
        );
        let response = self
            .http
            .post(self.endpoint.as_ref())
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            return Err(GraphqlClientError::HttpStatus {
                status,
                body: truncate_body(&bytes),
            });
        }

        let response: GraphqlResponse<Map<String, Value>> = serde_json::from_slice(&bytes)?;
        if response.data.is_none() && response.errors.is_empty() {
            return Err(GraphqlClientError::Protocol {
                message: "response carries neither data nor errors".to_string(),
            });
        }
        Ok(NetworkResponse {
            response,
            is_last: true,
        })
    }
}

impl NetworkTransport for HttpNetworkTransport {
    fn execute(&self, request: GraphqlRequest<Value>) -> NetworkStream {
        stream::once(self.clone().send(request)).boxed()
    }
}

fn truncate_body(bytes: &[u8]) -> String {
    const MAX_LEN: usize = 4096;
    let mut body = String::from_utf8_lossy(bytes).into_owned();
    if body.len() > MAX_LEN {
        let mut end = MAX_LEN;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
        body.push('…');
    }
    body
}
