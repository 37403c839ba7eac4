//! HTTP transport against a mock GraphQL server.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{HeroNameQuery, init_tracing};
use fcp_graphql_client::{
    FetchPolicy, GraphqlClient, GraphqlClientError, GraphqlQuery, GraphqlRequest,
    HttpNetworkTransportBuilder, NetworkTransport,
};
use futures_util::StreamExt;
use reqwest::header::{HeaderName, HeaderValue};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

struct CountingResponder {
    counter: Arc<AtomicUsize>,
    body: serde_json::Value,
}

impl Respond for CountingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.counter.fetch_add(1, Ordering::SeqCst);
        ResponseTemplate::new(200).set_body_json(self.body.clone())
    }
}

#[tokio::test]
async fn posts_the_wire_request() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(header("x-client-name", "droid-console"))
        .and(body_json(json!({
            "query": "query HeroName { hero { name } }",
            "variables": {},
            "operationName": "HeroName"
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"data": {"hero": {"name": "R2-D2"}}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = GraphqlClient::builder(format!("{}/graphql", server.uri()))
        .with_header(
            HeaderName::from_static("x-client-name"),
            HeaderValue::from_static("droid-console"),
        )
        .build()
        .unwrap();

    let response = client.query::<HeroNameQuery>(&()).execute().await.unwrap();
    assert_eq!(response.into_data().unwrap().hero.unwrap().name, "R2-D2");
}

#[tokio::test]
async fn second_cache_first_call_stays_local() {
    init_tracing();
    let server = MockServer::start().await;
    let counter = Arc::new(AtomicUsize::new(0));
    Mock::given(method("POST"))
        .respond_with(CountingResponder {
            counter: Arc::clone(&counter),
            body: json!({"data": {"hero": {"name": "R2-D2"}}}),
        })
        .mount(&server)
        .await;

    let client = GraphqlClient::new(server.uri()).unwrap();
    for _ in 0..3 {
        client.query::<HeroNameQuery>(&()).execute().await.unwrap();
    }
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    client
        .query::<HeroNameQuery>(&())
        .fetch_policy(FetchPolicy::NetworkOnly)
        .execute()
        .await
        .unwrap();
    assert_eq!(counter.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn http_status_errors_surface_as_network_failures() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let transport = HttpNetworkTransportBuilder::new(server.uri()).build().unwrap();
    let request = GraphqlRequest::new(GraphqlQuery::new("{ hero { name } }"), json!({}));
    let result = transport.execute(request).next().await.unwrap();
    match result {
        Err(GraphqlClientError::HttpStatus { status, body }) => {
            assert_eq!(status.as_u16(), 502);
            assert_eq!(body, "bad gateway");
        }
        other => panic!("expected status error, got {other:?}"),
    }
    let metrics = transport.metrics();
    assert_eq!(metrics.requests_total, 1);
    assert_eq!(metrics.requests_error, 1);

    let client = GraphqlClient::new(server.uri()).unwrap();
    let response = client
        .query::<HeroNameQuery>(&())
        .fetch_policy(FetchPolicy::NetworkOnly)
        .execute()
        .await
        .unwrap();
    assert!(response.exception.as_ref().is_some_and(GraphqlClientError::is_network));
    assert!(response.cache_info.network_exception.is_some());
}

#[tokio::test]
async fn empty_payloads_are_protocol_errors() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let transport = HttpNetworkTransportBuilder::new(server.uri()).build().unwrap();
    let request = GraphqlRequest::new(GraphqlQuery::new("{ hero { name } }"), json!({}));
    let result = transport.execute(request).next().await.unwrap();
    assert!(matches!(result, Err(GraphqlClientError::Protocol { .. })));
}

#[tokio::test]
async fn timeouts_are_reported() {
    init_tracing();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"data": {"hero": {"name": "R2-D2"}}}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let transport = HttpNetworkTransportBuilder::new(server.uri())
        .with_timeout(Duration::from_millis(50))
        .build()
        .unwrap();
    let request = GraphqlRequest::new(GraphqlQuery::new("{ hero { name } }"), json!({}));
    let result = transport.execute(request).next().await.unwrap();
    match result {
        Err(GraphqlClientError::Http(info)) => assert!(info.is_timeout),
        other => panic!("expected timeout, got {other:?}"),
    }
}
