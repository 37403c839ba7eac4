//! Watched queries: dependency narrowing, sentinel emission, optimistic
//! updates and shutdown.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{
    Droid, DroidData, DroidQuery, HeroFriends, HeroFriendsData, HeroFriendsQuery, HeroName,
    HeroNameData, HeroNameQuery, MockTransport, RenameDroid, RenameDroidData,
    RenameDroidVariables, droid, hero_named, init_tracing,
};
use fcp_graphql_client::cache::{
    CacheDump, CacheHeaders, CacheKey, MemoryCache, NormalizedCache, NormalizedStore, Record,
    RecordMerger, StorageError, field_keys,
};
use fcp_graphql_client::{
    GraphqlClient, GraphqlClientBuilder, GraphqlClientError, OperationResponse, OperationStream,
};
use futures_util::StreamExt;
use tokio::time::timeout;

/// Memory cache that counts reads of the root record, i.e. executions that
/// reached the store.
#[derive(Debug)]
struct CountingCache {
    inner: MemoryCache,
    root_reads: Arc<AtomicUsize>,
}

impl CountingCache {
    fn count(&self, key: &str) {
        if key == CacheKey::root().as_str() {
            self.root_reads.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl NormalizedCache for CountingCache {
    fn kind(&self) -> &str {
        self.inner.kind()
    }

    fn load_record(
        &self,
        key: &str,
        headers: &CacheHeaders,
    ) -> Result<Option<Record>, StorageError> {
        self.count(key);
        self.inner.load_record(key, headers)
    }

    fn load_records(
        &self,
        keys: &[String],
        headers: &CacheHeaders,
    ) -> Result<Vec<Record>, StorageError> {
        for key in keys {
            self.count(key);
        }
        self.inner.load_records(keys, headers)
    }

    fn merge(
        &mut self,
        record: Record,
        headers: &CacheHeaders,
        merger: &dyn RecordMerger,
    ) -> Result<HashSet<String>, StorageError> {
        self.inner.merge(record, headers, merger)
    }

    fn remove(&mut self, key: &str, cascade: bool) -> Result<bool, StorageError> {
        self.inner.remove(key, cascade)
    }

    fn clear_all(&mut self) -> Result<(), StorageError> {
        self.inner.clear_all()
    }

    fn dump(&self) -> CacheDump {
        self.inner.dump()
    }
}

struct Fixture {
    client: GraphqlClient,
    store: Arc<NormalizedStore>,
    transport: MockTransport,
    root_reads: Arc<AtomicUsize>,
}

fn fixture() -> Fixture {
    init_tracing();
    let root_reads = Arc::new(AtomicUsize::new(0));
    let store = Arc::new(
        NormalizedStore::builder()
            .cache(CountingCache {
                inner: MemoryCache::default(),
                root_reads: Arc::clone(&root_reads),
            })
            .build(),
    );
    let transport = MockTransport::new();
    let client = GraphqlClientBuilder::from_transport(transport.clone())
        .with_store(Arc::clone(&store))
        .build()
        .unwrap();
    Fixture {
        client,
        store,
        transport,
        root_reads,
    }
}

fn hero(name: &str) -> HeroNameData {
    HeroNameData {
        hero: Some(HeroName {
            name: name.to_string(),
        }),
    }
}

async fn next<D>(stream: &mut OperationStream<D>) -> OperationResponse<D> {
    timeout(Duration::from_secs(2), stream.next())
        .await
        .expect("watch emission")
        .expect("watch still open")
        .expect("no stream error")
}

async fn assert_quiet<D: std::fmt::Debug>(stream: &mut OperationStream<D>) {
    let emission = timeout(Duration::from_millis(150), stream.next()).await;
    assert!(emission.is_err(), "unexpected emission: {emission:?}");
}

#[tokio::test]
async fn watcher_ignores_changes_outside_its_dependencies() {
    let Fixture {
        client,
        store,
        root_reads,
        ..
    } = fixture();
    store
        .write_operation::<HeroNameQuery>(&hero("R2-D2"), &(), &CacheHeaders::none(), false)
        .unwrap();

    let mut watch = client.query::<HeroNameQuery>(&()).watch();
    let pending = next(&mut watch).await;
    assert!(pending.is_watch_pending());
    assert!(!pending.is_last);

    let first = next(&mut watch).await;
    assert!(!first.is_last);
    assert_eq!(first.data, Some(hero("R2-D2")));
    assert_eq!(root_reads.load(Ordering::SeqCst), 1);

    let dependencies = field_keys(
        store
            .normalize::<HeroNameQuery>(&CacheKey::root(), &hero("R2-D2"), &())
            .unwrap()
            .values(),
    );
    let expected: HashSet<String> = ["QUERY_ROOT.hero", "QUERY_ROOT.hero.name"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(dependencies, expected);

    let friends = HeroFriendsData {
        hero: Some(HeroFriends {
            friends: vec![HeroName {
                name: "Luke Skywalker".to_string(),
            }],
        }),
    };
    let changed = store
        .write_operation::<HeroFriendsQuery>(&friends, &(), &CacheHeaders::none(), true)
        .unwrap();
    assert!(changed.contains("QUERY_ROOT.hero.friends"));
    assert!(changed.is_disjoint(&dependencies));

    assert_quiet(&mut watch).await;
    assert_eq!(root_reads.load(Ordering::SeqCst), 1);

    store
        .write_operation::<HeroNameQuery>(&hero("Artoo"), &(), &CacheHeaders::none(), true)
        .unwrap();
    let updated = next(&mut watch).await;
    assert_eq!(updated.data, Some(hero("Artoo")));
    assert!(!updated.is_last);
    assert_eq!(root_reads.load(Ordering::SeqCst), 2);

    assert_quiet(&mut watch).await;
    assert_eq!(root_reads.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn watcher_fetches_once_then_follows_the_cache() {
    let Fixture {
        client,
        store,
        transport,
        ..
    } = fixture();
    transport.enqueue_data(hero_named("R2-D2"));

    let mut watch = client.query::<HeroNameQuery>(&()).watch();
    assert!(next(&mut watch).await.is_watch_pending());

    let miss = next(&mut watch).await;
    assert!(
        miss.exception
            .as_ref()
            .is_some_and(GraphqlClientError::is_cache_miss)
    );
    let fetched = next(&mut watch).await;
    assert_eq!(fetched.data, Some(hero("R2-D2")));
    assert!(!fetched.is_last);

    store
        .write_operation::<HeroNameQuery>(&hero("Artoo"), &(), &CacheHeaders::none(), true)
        .unwrap();
    let updated = next(&mut watch).await;
    assert_eq!(updated.data, Some(hero("Artoo")));
    assert!(updated.cache_info.is_cache_hit);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn watcher_sees_optimistic_data_then_the_server_response() {
    let Fixture {
        client, transport, ..
    } = fixture();
    transport.enqueue_data(droid("R2-D2"));
    client.query::<DroidQuery>(&()).execute().await.unwrap();

    let mut watch = client.query::<DroidQuery>(&()).watch();
    assert!(next(&mut watch).await.is_watch_pending());
    assert_eq!(droid_name(next(&mut watch).await), "R2-D2");

    transport.set_delay(Duration::from_millis(300));
    transport.enqueue(serde_json::json!({
        "data": { "renameDroid": { "id": "2001", "name": "Artoo-Detoo" } }
    }));
    let optimistic = RenameDroidData {
        rename_droid: Droid {
            id: "2001".to_string(),
            name: "Artoo (saving)".to_string(),
        },
    };
    let mutation = client
        .mutation::<RenameDroid>(&RenameDroidVariables {
            name: "Artoo-Detoo".to_string(),
        })
        .optimistic_data(&optimistic);
    let mutation = tokio::spawn(mutation.execute());

    assert_eq!(droid_name(next(&mut watch).await), "Artoo (saving)");
    assert_eq!(droid_name(next(&mut watch).await), "Artoo-Detoo");

    let response = mutation.await.unwrap().unwrap();
    assert_eq!(response.data.unwrap().rename_droid.name, "Artoo-Detoo");
    assert_quiet(&mut watch).await;
}

fn droid_name(response: OperationResponse<DroidData>) -> String {
    response.data.expect("droid data").droid.name
}

#[tokio::test]
async fn dispose_ends_every_watch() {
    let Fixture {
        client,
        store,
        transport,
        ..
    } = fixture();
    store
        .write_operation::<HeroNameQuery>(&hero("R2-D2"), &(), &CacheHeaders::none(), false)
        .unwrap();

    let mut watch = client.query::<HeroNameQuery>(&()).watch();
    assert!(next(&mut watch).await.is_watch_pending());
    assert_eq!(next(&mut watch).await.data, Some(hero("R2-D2")));

    client.dispose();
    let end = timeout(Duration::from_secs(2), watch.next()).await.unwrap();
    assert!(end.is_none());
    assert!(transport.disposed());

    let err = client.query::<HeroNameQuery>(&()).execute().await.unwrap_err();
    assert!(matches!(err, GraphqlClientError::Disposed));
}
