//! Interceptor chain.
//!
//! Every call runs through `user interceptors -> watcher -> fetch policy ->
//! cache -> network`. Each link sees the request and decides whether, and how
//! often, to call the rest of the chain.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::call::{CallRequest, CallResult, ResponseStream};
use crate::error::GraphqlClientError;

mod cache;
mod fetch_policy;
mod network;
mod watcher;

pub use cache::CacheInterceptor;
pub use fetch_policy::FetchPolicyInterceptor;
pub use network::NetworkInterceptor;
pub use watcher::WatcherInterceptor;

/// One link of the chain.
pub trait Interceptor: Send + Sync + fmt::Debug {
    /// Handle `request`, usually by calling `chain.proceed`.
    fn intercept(&self, request: CallRequest, chain: InterceptorChain) -> ResponseStream;
}

/// The links after the current one.
#[derive(Clone)]
pub struct InterceptorChain {
    interceptors: Arc<[Arc<dyn Interceptor>]>,
    index: usize,
}

impl fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("len", &self.interceptors.len())
            .field("index", &self.index)
            .finish()
    }
}

impl InterceptorChain {
    /// Create a chain starting at its first link.
    #[must_use]
    pub fn new(interceptors: Vec<Arc<dyn Interceptor>>) -> Self {
        Self {
            interceptors: interceptors.into(),
            index: 0,
        }
    }

    /// Pass `request` to the next link.
    pub fn proceed(&self, request: CallRequest) -> ResponseStream {
        match self.interceptors.get(self.index) {
            Some(interceptor) => {
                let next = Self {
                    interceptors: Arc::clone(&self.interceptors),
                    index: self.index + 1,
                };
                interceptor.intercept(request, next)
            }
            None => stream::once(async {
                Err(GraphqlClientError::Protocol {
                    message: "interceptor chain ended without a response".to_string(),
                })
            })
            .boxed(),
        }
    }

    /// Pass `request` on, routed to the cache.
    pub fn proceed_to_cache(&self, mut request: CallRequest) -> ResponseStream {
        request.fetch_from_cache = true;
        self.proceed(request)
    }

    /// Pass `request` on, routed to the network.
    pub fn proceed_to_network(&self, mut request: CallRequest) -> ResponseStream {
        request.fetch_from_cache = false;
        self.proceed(request)
    }
}

/// Run `producer` on the runtime once the returned stream is first polled.
///
/// The producer should stop when sending fails; that means the stream was
/// dropped.
pub(crate) fn spawn_stream<F, Fut>(producer: F) -> ResponseStream
where
    F: FnOnce(mpsc::Sender<CallResult>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(16);
    stream::once(async move {
        tokio::spawn(producer(tx));
        ReceiverStream::new(rx)
    })
    .flatten()
    .boxed()
}
