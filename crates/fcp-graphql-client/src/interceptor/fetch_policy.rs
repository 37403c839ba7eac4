//! Cache/network composition per [`FetchPolicy`].

use futures_util::StreamExt;
use tokio::sync::mpsc;

use super::{Interceptor, InterceptorChain, spawn_stream};
use crate::call::{CallRequest, CallResponse, CallResult, FailureMode, FetchPolicy, ResponseStream};
use crate::error::GraphqlClientError;

/// Routes queries between cache and network according to their
/// [`FetchPolicy`]. Mutations and subscriptions always go to the network.
#[derive(Debug, Default, Clone, Copy)]
pub struct FetchPolicyInterceptor;

impl Interceptor for FetchPolicyInterceptor {
    fn intercept(&self, request: CallRequest, chain: InterceptorChain) -> ResponseStream {
        let mode = request.failure_mode;
        if !request.is_query() {
            return chain
                .proceed_to_network(request)
                .map(move |item| raise(item, mode))
                .boxed();
        }
        match request.fetch_policy {
            FetchPolicy::CacheOnly => chain
                .proceed_to_cache(request)
                .map(move |item| raise(item, mode))
                .boxed(),
            FetchPolicy::NetworkOnly => chain
                .proceed_to_network(request)
                .map(move |item| raise(item, mode))
                .boxed(),
            FetchPolicy::CacheFirst => spawn_stream(move |tx| cache_first(request, chain, tx)),
            FetchPolicy::NetworkFirst => spawn_stream(move |tx| network_first(request, chain, tx)),
            FetchPolicy::CacheAndNetwork => {
                spawn_stream(move |tx| cache_and_network(request, chain, tx))
            }
        }
    }
}

/// In [`FailureMode::Throw`], turn a failed response into a stream error.
fn raise(item: CallResult, mode: FailureMode) -> CallResult {
    match item {
        Ok(response) if mode == FailureMode::Throw => match response.exception {
            Some(err) => Err(err),
            None => Ok(response),
        },
        other => other,
    }
}

/// The single response of a cache read.
async fn read_cache(request: &CallRequest, chain: &InterceptorChain) -> Option<CallResult> {
    chain.proceed_to_cache(request.clone()).next().await
}

async fn cache_first(
    request: CallRequest,
    chain: InterceptorChain,
    tx: mpsc::Sender<CallResult>,
) {
    let mode = request.failure_mode;
    let cached = match read_cache(&request, &chain).await {
        Some(Ok(response)) => response,
        Some(Err(err)) => {
            let _ = tx.send(Err(err)).await;
            return;
        }
        None => return,
    };
    let Some(miss) = cached.exception.clone() else {
        let _ = tx.send(Ok(cached.with_is_last(true))).await;
        return;
    };
    tracing::trace!(
        request_uuid = %request.request_uuid,
        "cache-first miss, falling through to network"
    );
    if mode == FailureMode::Annotate && tx.send(Ok(cached.with_is_last(false))).await.is_err() {
        return;
    }

    let mut network = chain.proceed_to_network(request);
    while let Some(item) = network.next().await {
        let item = item.and_then(|mut response| {
            response.cache_info.cache_miss_exception = Some(miss.clone());
            match (mode, response.exception.take()) {
                (FailureMode::Throw, Some(err)) => {
                    Err(GraphqlClientError::composite(miss.clone(), err))
                }
                (_, exception) => {
                    response.exception = exception;
                    Ok(response)
                }
            }
        });
        if tx.send(item).await.is_err() {
            return;
        }
    }
}

async fn network_first(
    request: CallRequest,
    chain: InterceptorChain,
    tx: mpsc::Sender<CallResult>,
) {
    let mode = request.failure_mode;
    let mut network = chain.proceed_to_network(request.clone());
    let mut failure = None;
    while let Some(item) = network.next().await {
        match item {
            Ok(response) if response.is_success() => {
                if tx.send(Ok(response)).await.is_err() {
                    return;
                }
            }
            Ok(response) => {
                failure = response.exception;
                break;
            }
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }
    let Some(network_error) = failure else {
        return;
    };
    // Stop the network side before touching the cache.
    drop(network);
    tracing::trace!(
        request_uuid = %request.request_uuid,
        error = %network_error,
        "network-first failure, falling back to cache"
    );

    let item = match read_cache(&request, &chain).await {
        Some(Ok(response)) => fallback_response(response, network_error, mode),
        Some(Err(err)) => Err(err),
        None => return,
    };
    let _ = tx.send(item).await;
}

fn fallback_response(
    mut response: CallResponse,
    network_error: GraphqlClientError,
    mode: FailureMode,
) -> CallResult {
    response.cache_info.network_exception = Some(network_error.clone());
    response.is_last = true;
    match response.exception.take() {
        None => Ok(response),
        Some(miss) if mode == FailureMode::Throw => {
            Err(GraphqlClientError::composite(network_error, miss))
        }
        Some(miss) => {
            response.exception = Some(GraphqlClientError::composite(network_error, miss));
            Ok(response)
        }
    }
}

async fn cache_and_network(
    request: CallRequest,
    chain: InterceptorChain,
    tx: mpsc::Sender<CallResult>,
) {
    let mode = request.failure_mode;
    let miss = match read_cache(&request, &chain).await {
        Some(Ok(response)) => {
            let miss = response.exception.clone();
            let suppressed = mode == FailureMode::Throw && miss.is_some();
            if !suppressed && tx.send(Ok(response.with_is_last(false))).await.is_err() {
                return;
            }
            miss
        }
        Some(Err(err)) => {
            if tx.send(Err(err)).await.is_err() {
                return;
            }
            None
        }
        None => None,
    };

    let mut network = chain.proceed_to_network(request);
    while let Some(item) = network.next().await {
        let item = item.and_then(|mut response| {
            response.cache_info.cache_miss_exception.clone_from(&miss);
            match (mode, response.exception.take()) {
                (FailureMode::Throw, Some(err)) => Err(match &miss {
                    Some(miss) => GraphqlClientError::composite(miss.clone(), err),
                    None => err,
                }),
                (_, exception) => {
                    response.exception = exception;
                    Ok(response)
                }
            }
        });
        if tx.send(item).await.is_err() {
            return;
        }
    }
}
