//! Receiver, identity and health endpoint tests.
//!
//! Drives the router in-process with `oneshot` and inspects the delivery
//! queue and archive directly.

use std::{io, sync::Arc, time::Duration};

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use bytes::Bytes;
use futures::stream;
use gridlet_api::{
    create_router, error::ErrorResponse, handlers::receive::EVENT_PROCESSED_HEADER, AppState,
};
use gridlet_core::{
    Archive, Clock, Endpoint, InMemorySink, QueueKind, Receiver, Service, SubscriptionRegistry,
    TestClock,
};
use gridlet_delivery::DeliveryQueue;
use serde_json::{json, Value};
use tower::ServiceExt;

const EVENTS_PATH: &str = "/api/events";

struct TestApp {
    router: Router,
    queue: DeliveryQueue,
    sink: Arc<InMemorySink>,
    clock: Arc<TestClock>,
}

impl TestApp {
    fn new(services: &[Service]) -> Self {
        let queue = DeliveryQueue::new();
        let sink = Arc::new(InMemorySink::new());
        let clock = Arc::new(TestClock::new());
        let state = AppState {
            registry: Arc::new(SubscriptionRegistry::build(services)),
            queue: queue.clone(),
            archive: Archive::new(sink.clone()),
            clock: clock.clone(),
        };
        let router = create_router(state, EVENTS_PATH, Duration::from_secs(30));

        Self { router, queue, sink, clock }
    }

    async fn post_events(&self, body: impl Into<Body>) -> axum::response::Response {
        let request = Request::builder()
            .method("POST")
            .uri(EVENTS_PATH)
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap();

        self.router.clone().oneshot(request).await.expect("failed to make request")
    }

    async fn get(&self, uri: &str) -> axum::response::Response {
        let request = Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap();

        self.router.clone().oneshot(request).await.expect("failed to make request")
    }
}

fn services() -> Vec<Service> {
    vec![
        Service::new("http://localhost:7071", vec![
            Endpoint::function("OnFoo", ["Foo"]).unwrap(),
            Endpoint::path("/api/hooks/foo", ["Foo", "Bar"]).unwrap(),
        ])
        .unwrap(),
        Service::new("http://localhost:8080/", vec![Endpoint::path("hooks", ["Foo"]).unwrap()])
            .unwrap(),
    ]
}

fn event(id: &str, event_type: &str) -> Value {
    json!({
        "id": id,
        "eventType": event_type,
        "subject": "orders/1",
        "data": { "orderId": 1 },
        "eventTime": "2024-05-01T12:00:00Z",
        "dataVersion": "1.0"
    })
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read response body");
    serde_json::from_slice(&bytes).expect("response should be valid JSON")
}

#[tokio::test]
async fn event_fans_out_to_every_subscription() {
    let app = TestApp::new(&services());
    let batch = json!([event("evt-1", "Foo")]).to_string();

    let response = app.post_events(batch).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.queue.len(), 3);

    let mut tasks = Vec::new();
    while let Some(task) = app.queue.try_dequeue().unwrap() {
        tasks.push(task);
    }

    assert!(tasks.iter().all(|task| task.attempt == 1));
    assert!(tasks.iter().all(|task| task.event.id == "evt-1"));
    assert!(tasks.iter().all(|task| task.first_received_at == app.clock.now()));

    let destinations: Vec<String> = tasks.iter().map(|task| task.subscription.to_string()).collect();
    assert_eq!(destinations, vec![
        "http://localhost:7071/EventGridFunc:OnFoo",
        "http://localhost:7071/api/hooks/foo",
        "http://localhost:8080/hooks",
    ]);
    assert_eq!(tasks[0].subscription.receiver(), &Receiver::Function("OnFoo".into()));
}

#[tokio::test]
async fn batch_enqueues_tasks_per_event_in_order() {
    let app = TestApp::new(&services());
    let batch = json!([event("a", "Bar"), event("b", "Foo")]).to_string();

    let response = app.post_events(batch).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[EVENT_PROCESSED_HEADER], "a=1,b=3");

    let body = json_body(response).await;
    assert_eq!(body["events"][0]["subscriptions"], 1);
    assert_eq!(body["events"][1]["event_type"], "Foo");

    assert_eq!(app.queue.try_dequeue().unwrap().unwrap().event.id, "a");
    assert_eq!(app.queue.len(), 3);
}

#[tokio::test]
async fn unsubscribed_event_is_archived_but_not_queued() {
    let app = TestApp::new(&services());
    let batch = json!([event("lonely", "Nobody.Listens")]).to_string();

    let response = app.post_events(batch).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(app.queue.is_empty());

    let received = app.sink.messages(QueueKind::Received);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["event"]["id"], "lonely");
    assert_eq!(received[0]["subscriptions"], json!([]));
}

#[tokio::test]
async fn received_archive_lists_routed_subscriptions() {
    let app = TestApp::new(&services());

    app.post_events(json!([event("evt-1", "Bar")]).to_string()).await;

    let received = app.sink.messages(QueueKind::Received);
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["subscriptions"], json!(["http://localhost:7071/api/hooks/foo"]));
}

#[tokio::test]
async fn empty_batch_is_accepted() {
    let app = TestApp::new(&services());

    let response = app.post_events("[]").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(EVENT_PROCESSED_HEADER).is_none());
    assert!(app.queue.is_empty());
    assert_eq!(app.sink.total(), 0);
}

#[tokio::test]
async fn malformed_batch_is_rejected_without_side_effects() {
    let app = TestApp::new(&services());

    for body in ["not-an-array", r#"{"id":"x"}"#, r#"[{"id":"missing-fields"}]"#] {
        let response = app.post_events(body).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {body}");
        let error: ErrorResponse =
            serde_json::from_value(json_body(response).await).expect("error body should parse");
        assert_eq!(error.error.code, "E1001");
    }

    assert!(app.queue.is_empty());
    assert_eq!(app.sink.total(), 0);
}

#[tokio::test]
async fn unreadable_body_is_a_server_error_without_side_effects() {
    let app = TestApp::new(&services());
    let chunks: Vec<Result<Bytes, io::Error>> = vec![
        Ok(Bytes::from_static(b"[")),
        Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")),
    ];

    let response = app.post_events(Body::from_stream(stream::iter(chunks))).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let error: ErrorResponse =
        serde_json::from_value(json_body(response).await).expect("error body should parse");
    assert_eq!(error.error.code, "E1002");

    assert!(app.queue.is_empty());
    assert_eq!(app.sink.total(), 0);
}

#[tokio::test]
async fn unavailable_archive_does_not_block_routing() {
    let app = TestApp::new(&services());
    app.sink.set_available(false);

    let response = app.post_events(json!([event("evt-1", "Foo")]).to_string()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.queue.len(), 3);
}

#[tokio::test]
async fn identity_endpoint_names_the_app() {
    let app = TestApp::new(&[]);

    let response = app.get("/").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["app"], "gridlet");
    assert_eq!(json_body(response).await, json!({ "app": "gridlet" }));
}

#[tokio::test]
async fn every_response_carries_app_header() {
    let app = TestApp::new(&[]);

    let response = app.post_events("garbage").await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(response.headers()["app"], "gridlet");
}

#[tokio::test]
async fn health_reports_queue_depth_and_routes() {
    let app = TestApp::new(&services());
    app.post_events(json!([event("evt-1", "Foo")]).to_string()).await;

    let response = app.get("/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["queue_depth"], 3);
    assert_eq!(body["event_types"], 2);
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = TestApp::new(&[]);

    let response = app.get("/api/other").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
