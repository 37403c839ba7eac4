//! Live queries driven by the store's changed-keys stream.

use std::collections::HashSet;
use std::sync::Arc;

use fcp_normalized_cache::{NormalizedStore, field_keys};
use futures_util::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use super::{Interceptor, InterceptorChain, spawn_stream};
use crate::call::{CallRequest, CallResponse, CallResult, ResponseStream, WatchOptions};
use crate::error::GraphqlClientError;

/// Re-executes watched requests when a field they depend on changes.
///
/// The first emission of a watch is always a response carrying
/// [`GraphqlClientError::WatcherSentinel`]. Every response of a watch is
/// non-terminal; the stream ends when the caller drops it or the store is
/// disposed. Requests without watch options pass through.
#[derive(Debug, Clone)]
pub struct WatcherInterceptor {
    store: Arc<NormalizedStore>,
}

impl WatcherInterceptor {
    /// Create an interceptor over `store`.
    #[must_use]
    pub const fn new(store: Arc<NormalizedStore>) -> Self {
        Self { store }
    }
}

impl Interceptor for WatcherInterceptor {
    fn intercept(&self, request: CallRequest, chain: InterceptorChain) -> ResponseStream {
        let Some(options) = request.watch else {
            return chain.proceed(request);
        };
        let store = Arc::clone(&self.store);
        spawn_stream(move |tx| async move {
            let mut watch = Watch {
                store,
                chain,
                request,
                options,
                tx,
                dependencies: None,
                last_data: None,
            };
            watch.run().await;
        })
    }
}

struct Watch {
    store: Arc<NormalizedStore>,
    chain: InterceptorChain,
    request: CallRequest,
    options: WatchOptions,
    tx: mpsc::Sender<CallResult>,
    /// Field paths of the last data; `None` until known.
    dependencies: Option<HashSet<String>>,
    last_data: Option<Map<String, Value>>,
}

impl Watch {
    async fn run(&mut self) {
        // Subscribe before the first execution so no change is missed.
        let mut changes = BroadcastStream::new(self.store.changed_keys());
        let sentinel = CallResponse::failure(
            self.request.request_uuid,
            GraphqlClientError::WatcherSentinel,
        )
        .with_is_last(false);
        if self.tx.send(Ok(sentinel)).await.is_err() {
            return;
        }
        let initial = self.request.clone();
        if !self.execute(initial).await {
            return;
        }

        loop {
            let change = tokio::select! {
                () = self.tx.closed() => break,
                change = changes.next() => change,
            };
            let rerun = match change {
                None => break,
                Some(Ok(change)) => self
                    .dependencies
                    .as_ref()
                    .is_none_or(|dependencies| change.intersects(dependencies)),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    tracing::debug!(skipped, "watcher lagged behind store changes");
                    true
                }
            };
            if !rerun {
                continue;
            }
            let mut request = self.request.clone();
            request.fetch_policy = self.options.refetch_policy;
            if !self.execute(request).await {
                return;
            }
        }
        tracing::debug!(request_uuid = %self.request.request_uuid, "watch ended");
    }

    /// Run `request` through the rest of the chain and forward its responses.
    /// Returns `false` once the caller is gone.
    async fn execute(&mut self, request: CallRequest) -> bool {
        let mut responses = self.chain.proceed(request);
        while let Some(item) = responses.next().await {
            let item = match item {
                Ok(mut response) => {
                    if response.is_success() {
                        if let Some(data) = &response.data {
                            self.dependencies = self.dependencies_of(data);
                            if self.last_data.as_ref() == Some(data) {
                                continue;
                            }
                            self.last_data = Some(data.clone());
                        }
                    }
                    response.is_last = false;
                    Ok(response)
                }
                Err(err) => Err(err),
            };
            if self.tx.send(item).await.is_err() {
                return false;
            }
        }
        true
    }

    fn dependencies_of(&self, data: &Map<String, Value>) -> Option<HashSet<String>> {
        let result = self.store.normalize_selections(
            &self.request.root_key(),
            &self.request.operation.selection_set,
            data,
            &self.request.variables,
        );
        match result {
            Ok(records) => Some(field_keys(records.values())),
            Err(err) => {
                tracing::debug!(error = %err, "watch dependencies unknown");
                None
            }
        }
    }
}
