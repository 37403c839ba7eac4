//! Shared fixtures: a scripted transport and a few typed operations.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use fcp_graphql_client::cache::{
    ArgumentValue, CompiledArgument, CompiledField, CompiledSelection, CompiledType, Executable,
};
use fcp_graphql_client::{
    GraphqlClientError, GraphqlOperation, GraphqlRequest, GraphqlResponse, NetworkResponse,
    NetworkStream, NetworkTransport, OperationKind,
};
use futures_util::StreamExt;
use futures_util::stream;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Transport answering from a queue of scripted bodies.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

#[derive(Debug, Default)]
struct MockInner {
    responses: Mutex<VecDeque<Result<Value, GraphqlClientError>>>,
    requests: Mutex<Vec<GraphqlRequest<Value>>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    disposed: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every later response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.inner.delay.lock().unwrap() = Some(delay);
    }

    /// Queue a response body (`{"data": ..., "errors": ...}`).
    pub fn enqueue(&self, body: Value) {
        self.inner.responses.lock().unwrap().push_back(Ok(body));
    }

    /// Queue a response carrying `data`.
    pub fn enqueue_data(&self, data: Value) {
        self.enqueue(json!({ "data": data }));
    }

    /// Queue a transport failure.
    pub fn enqueue_failure(&self, message: &str) {
        self.inner
            .responses
            .lock()
            .unwrap()
            .push_back(Err(GraphqlClientError::Network {
                message: message.to_string(),
            }));
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst) > 0
    }

    pub fn last_request(&self) -> Option<GraphqlRequest<Value>> {
        self.inner.requests.lock().unwrap().last().cloned()
    }
}

impl NetworkTransport for MockTransport {
    fn execute(&self, request: GraphqlRequest<Value>) -> NetworkStream {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.requests.lock().unwrap().push(request);
        let next = self.inner.responses.lock().unwrap().pop_front();
        let delay = *self.inner.delay.lock().unwrap();
        stream::once(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            let body = next.unwrap_or_else(|| {
                Err(GraphqlClientError::Network {
                    message: "no scripted response".to_string(),
                })
            })?;
            let response: GraphqlResponse<serde_json::Map<String, Value>> =
                serde_json::from_value(body)?;
            Ok::<_, GraphqlClientError>(NetworkResponse {
                response,
                is_last: true,
            })
        })
        .boxed()
    }

    fn dispose(&self) {
        self.inner.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

fn scalar(name: &str) -> CompiledSelection {
    CompiledField::new(name, CompiledType::scalar("String")).into()
}

/// `query HeroName { hero { name } }`; the hero has no identity.
pub struct HeroNameQuery;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeroNameData {
    pub hero: Option<HeroName>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeroName {
    pub name: String,
}

impl Executable for HeroNameQuery {
    type Variables = ();
    type Data = HeroNameData;

    fn root_type() -> &'static str {
        "Query"
    }

    fn selections() -> Vec<CompiledSelection> {
        vec![
            CompiledField::new("hero", CompiledType::interface("Character"))
                .with_selections(vec![scalar("name")])
                .into(),
        ]
    }
}

impl GraphqlOperation for HeroNameQuery {
    const QUERY: &'static str = "query HeroName { hero { name } }";
    const OPERATION_NAME: &'static str = "HeroName";
    const KIND: OperationKind = OperationKind::Query;
}

/// `query HeroFriends { hero { friends { name } } }`.
pub struct HeroFriendsQuery;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeroFriendsData {
    pub hero: Option<HeroFriends>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeroFriends {
    pub friends: Vec<HeroName>,
}

impl Executable for HeroFriendsQuery {
    type Variables = ();
    type Data = HeroFriendsData;

    fn root_type() -> &'static str {
        "Query"
    }

    fn selections() -> Vec<CompiledSelection> {
        vec![
            CompiledField::new("hero", CompiledType::interface("Character"))
                .with_selections(vec![
                    CompiledField::new(
                        "friends",
                        CompiledType::interface("Character").non_null().list().non_null(),
                    )
                    .with_selections(vec![scalar("name")])
                    .into(),
                ])
                .into(),
        ]
    }
}

impl GraphqlOperation for HeroFriendsQuery {
    const QUERY: &'static str = "query HeroFriends { hero { friends { name } } }";
    const OPERATION_NAME: &'static str = "HeroFriends";
    const KIND: OperationKind = OperationKind::Query;
}

/// `query Droid { droid { id name } }`; the droid is keyed by id.
pub struct DroidQuery;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DroidData {
    pub droid: Droid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Droid {
    pub id: String,
    pub name: String,
}

impl Executable for DroidQuery {
    type Variables = ();
    type Data = DroidData;

    fn root_type() -> &'static str {
        "Query"
    }

    fn selections() -> Vec<CompiledSelection> {
        vec![
            CompiledField::new("droid", CompiledType::object("Droid").non_null())
                .with_selections(vec![scalar("id"), scalar("name")])
                .into(),
        ]
    }
}

impl GraphqlOperation for DroidQuery {
    const QUERY: &'static str = "query Droid { droid { id name } }";
    const OPERATION_NAME: &'static str = "Droid";
    const KIND: OperationKind = OperationKind::Query;
}

/// `mutation RenameDroid($name: String!) { renameDroid(name: $name) { id name } }`.
pub struct RenameDroid;

#[derive(Debug, Clone, Serialize)]
pub struct RenameDroidVariables {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameDroidData {
    #[serde(rename = "renameDroid")]
    pub rename_droid: Droid,
}

impl Executable for RenameDroid {
    type Variables = RenameDroidVariables;
    type Data = RenameDroidData;

    fn root_type() -> &'static str {
        "Mutation"
    }

    fn selections() -> Vec<CompiledSelection> {
        vec![
            CompiledField::new("renameDroid", CompiledType::object("Droid").non_null())
                .with_argument(CompiledArgument::new("name", ArgumentValue::variable("name")))
                .with_selections(vec![scalar("id"), scalar("name")])
                .into(),
        ]
    }
}

impl GraphqlOperation for RenameDroid {
    const QUERY: &'static str =
        "mutation RenameDroid($name: String!) { renameDroid(name: $name) { id name } }";
    const OPERATION_NAME: &'static str = "RenameDroid";
    const KIND: OperationKind = OperationKind::Mutation;
}

pub fn droid(name: &str) -> Value {
    json!({ "droid": { "id": "2001", "name": name } })
}

pub fn hero_named(name: &str) -> Value {
    json!({ "hero": { "name": name } })
}
