//! Store reads, response writes and optimistic layers.

use std::collections::HashSet;
use std::sync::Arc;

use fcp_normalized_cache::NormalizedStore;
use futures_util::StreamExt;
use futures_util::stream;
use uuid::Uuid;

use super::{Interceptor, InterceptorChain, spawn_stream};
use crate::call::{CallRequest, CallResponse, ResponseStream};
use crate::error::GraphqlClientError;

/// Serves requests routed to the cache and writes network responses back.
///
/// Mutations carrying optimistic data get an overlay layer for as long as the
/// network call is in flight.
#[derive(Debug, Clone)]
pub struct CacheInterceptor {
    store: Arc<NormalizedStore>,
}

impl CacheInterceptor {
    /// Create an interceptor over `store`.
    #[must_use]
    pub const fn new(store: Arc<NormalizedStore>) -> Self {
        Self { store }
    }
}

impl Interceptor for CacheInterceptor {
    fn intercept(&self, request: CallRequest, chain: InterceptorChain) -> ResponseStream {
        let store = Arc::clone(&self.store);
        if request.fetch_from_cache {
            return stream::once(async move { Ok(read_from_store(&store, &request)) }).boxed();
        }

        spawn_stream(move |tx| async move {
            let mut optimistic = OptimisticGuard::apply(&store, &request);
            let mut network = chain.proceed_to_network(request.clone());
            while let Some(item) = network.next().await {
                if let Ok(response) = &item {
                    let mut changed = HashSet::new();
                    if response.is_last {
                        changed.extend(optimistic.rollback());
                    }
                    changed.extend(write_to_store(&store, &request, response));
                    store.publish(changed);
                }
                if tx.send(item).await.is_err() {
                    break;
                }
            }
        })
    }
}

fn read_from_store(store: &NormalizedStore, request: &CallRequest) -> CallResponse {
    let result = store.read_selections(
        &request.root_key(),
        &request.operation.selection_set,
        &request.variables,
        &request.cache_headers,
    );
    match result {
        Ok(data) => {
            let mut response = CallResponse::data(request.request_uuid, data);
            response.cache_info.is_cache_hit = true;
            response
        }
        Err(err) => {
            let err = GraphqlClientError::from(err);
            let mut response = CallResponse::failure(request.request_uuid, err.clone());
            response.cache_info.cache_miss_exception = Some(err);
            response
        }
    }
}

fn write_to_store(
    store: &NormalizedStore,
    request: &CallRequest,
    response: &CallResponse,
) -> HashSet<String> {
    let Some(data) = response.data.as_ref() else {
        return HashSet::new();
    };
    if !response.is_success() || (!response.errors.is_empty() && !request.store_partial_responses)
    {
        return HashSet::new();
    }
    store
        .write_selections(
            &request.root_key(),
            &request.operation.selection_set,
            data,
            &request.variables,
            &request.cache_headers,
            false,
        )
        .unwrap_or_else(|err| {
            tracing::warn!(
                request_uuid = %request.request_uuid,
                operation = %request.operation.name,
                error = %err,
                "response not written to cache"
            );
            HashSet::new()
        })
}

/// Optimistic layer of one in-flight request. Rolled back on the last
/// response, or when the request is abandoned.
struct OptimisticGuard {
    store: Arc<NormalizedStore>,
    mutation_id: Option<Uuid>,
}

impl OptimisticGuard {
    fn apply(store: &Arc<NormalizedStore>, request: &CallRequest) -> Self {
        let mutation_id = request.optimistic_data.as_ref().and_then(|data| {
            let mutation_id = request.request_uuid;
            let result = store.write_optimistic_selections(
                &request.root_key(),
                &request.operation.selection_set,
                data,
                &request.variables,
                mutation_id,
                true,
            );
            match result {
                Ok(_) => Some(mutation_id),
                Err(err) => {
                    tracing::warn!(%mutation_id, error = %err, "optimistic data not applied");
                    None
                }
            }
        });
        Self {
            store: Arc::clone(store),
            mutation_id,
        }
    }

    /// Remove the layer without publishing; returns the paths it changed.
    fn rollback(&mut self) -> HashSet<String> {
        self.mutation_id
            .take()
            .map_or_else(HashSet::new, |id| self.store.rollback_optimistic_updates(id, false))
    }
}

impl Drop for OptimisticGuard {
    fn drop(&mut self) {
        let changed = self.rollback();
        self.store.publish(changed);
    }
}
