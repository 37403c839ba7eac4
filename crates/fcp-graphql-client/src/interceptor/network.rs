//! Terminal link: executes requests on the transport.

use std::sync::Arc;

use futures_util::StreamExt;

use super::{Interceptor, InterceptorChain};
use crate::call::{CacheInfo, CallRequest, CallResponse, ResponseStream};
use crate::operation::GraphqlRequest;
use crate::transport::{NetworkResponse, NetworkTransport};

/// Sends requests through a [`NetworkTransport`].
///
/// Transport failures become responses carrying the failure, so the fetch
/// policy above can fall back or raise.
#[derive(Debug, Clone)]
pub struct NetworkInterceptor {
    transport: Arc<dyn NetworkTransport>,
}

impl NetworkInterceptor {
    /// Create an interceptor over `transport`.
    #[must_use]
    pub fn new(transport: Arc<dyn NetworkTransport>) -> Self {
        Self { transport }
    }
}

impl Interceptor for NetworkInterceptor {
    fn intercept(&self, request: CallRequest, _chain: InterceptorChain) -> ResponseStream {
        let request_uuid = request.request_uuid;
        let operation = Arc::clone(&request.operation);
        let wire = GraphqlRequest::new(operation.query.clone(), request.variables.into_value())
            .with_operation_name(operation.name.clone())
            .with_request_uuid(request_uuid);

        self.transport
            .execute(wire)
            .map(move |item| {
                Ok(match item {
                    Ok(NetworkResponse { response, is_last }) => CallResponse {
                        request_uuid,
                        data: response.data,
                        errors: response.errors,
                        extensions: response.extensions,
                        exception: None,
                        cache_info: CacheInfo::default(),
                        is_last,
                    },
                    Err(err) => {
                        tracing::debug!(
                            %request_uuid,
                            operation = %operation.name,
                            error = %err,
                            "network request failed"
                        );
                        let mut response = CallResponse::failure(request_uuid, err.clone());
                        response.cache_info.network_exception = Some(err);
                        response
                    }
                })
            })
            .boxed()
    }
}
