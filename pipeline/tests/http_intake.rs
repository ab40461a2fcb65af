//! HTTP intake: `/aggregate_order` and friends, served in-process.

#![allow(clippy::unwrap_used)]

use axum::http::StatusCode;
use axum_test::TestServer;
use bulk_purchase_core::broker::BrokerClient;
use bulk_purchase_core::queues;
use bulk_purchase_pipeline::OrderAggregator;
use bulk_purchase_pipeline::server::{AppState, build_router};
use bulk_purchase_testing::{InMemoryBroker, SequentialIdGenerator, test_clock};
use serde_json::{Value, json};
use std::sync::Arc;

async fn server(threshold: usize) -> (InMemoryBroker, TestServer) {
    let broker = InMemoryBroker::new();
    broker.declare_queue(queues::BULK_PURCHASES).await.unwrap();

    let aggregator = OrderAggregator::builder()
        .broker(Arc::new(broker.clone()))
        .clock(Arc::new(test_clock()))
        .ids(Arc::new(SequentialIdGenerator::new("batch")))
        .threshold(threshold)
        .build()
        .unwrap();

    let app = build_router(AppState::new(Arc::new(aggregator)));
    (broker, TestServer::new(app).unwrap())
}

#[tokio::test]
async fn accepted_order_reports_bucket_size() {
    let (_broker, server) = server(10).await;

    let response = server
        .post("/aggregate_order")
        .json(&json!({"provider_id": "P1", "product_id": "X", "quantity": 2}))
        .await;

    response.assert_status_ok();
    response.assert_json(&json!({
        "message": "Order aggregated",
        "provider_id": "P1",
        "buffered": 1,
        "flushed_batches": [],
        "deferred": false,
    }));
}

#[tokio::test]
async fn threshold_order_returns_batch_id() {
    let (broker, server) = server(2).await;

    let order = json!({"provider_id": "P1", "product_id": "X", "quantity": 1});

    let first: Value = server.post("/aggregate_order").json(&order).await.json();
    assert_eq!(first["flushed_batches"], json!([]));

    let second: Value = server.post("/aggregate_order").json(&order).await.json();
    assert_eq!(second["buffered"], 0);
    assert_eq!(second["flushed_batches"], json!(["batch-1"]));
    assert_eq!(broker.published(queues::BULK_PURCHASES).len(), 1);
}

#[tokio::test]
async fn missing_field_is_bad_request() {
    let (broker, server) = server(1).await;

    let response = server
        .post("/aggregate_order")
        .json(&json!({"provider_id": "P1", "quantity": 1}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    response.assert_json(&json!({
        "code": "BAD_REQUEST",
        "message": "Missing order data: product_id",
    }));
    assert!(broker.published(queues::BULK_PURCHASES).is_empty());
}

#[tokio::test]
async fn non_positive_quantity_is_bad_request() {
    let (_broker, server) = server(10).await;

    let response = server
        .post("/aggregate_order")
        .json(&json!({"provider_id": "P1", "product_id": "X", "quantity": -3}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn unparseable_body_is_bad_request() {
    let (_broker, server) = server(10).await;

    let response = server
        .post("/aggregate_order")
        .text("provider_id=P1")
        .content_type("application/json")
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = response.json();
    assert_eq!(body["code"], "BAD_REQUEST");
}

#[tokio::test]
async fn publish_failure_is_reported_as_deferred() {
    let (broker, server) = server(1).await;
    broker.fail_next_publishes(1);

    let response = server
        .post("/aggregate_order")
        .json(&json!({"provider_id": "P1", "product_id": "X", "quantity": 1}))
        .await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["deferred"], true);
    assert_eq!(body["buffered"], 1);

    let pending: Value = server.get("/aggregate_order/pending").await.json();
    assert_eq!(pending, json!({"threshold": 1, "providers": {"P1": 1}}));
}

#[tokio::test]
async fn pending_lists_non_empty_buckets() {
    let (_broker, server) = server(5).await;

    for provider in ["P1", "P2", "P1"] {
        server
            .post("/aggregate_order")
            .json(&json!({"provider_id": provider, "product_id": "X", "quantity": 1}))
            .await
            .assert_status_ok();
    }

    server
        .get("/aggregate_order/pending")
        .await
        .assert_json(&json!({"threshold": 5, "providers": {"P1": 2, "P2": 1}}));
}

#[tokio::test]
async fn health_metrics_and_unknown_routes() {
    let (_broker, server) = server(10).await;

    server.get("/health").await.assert_text("ok");
    server
        .get("/metrics")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);

    let response = server.get("/nope").await;
    response.assert_status(StatusCode::NOT_FOUND);
    let body: Value = response.json();
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn responses_carry_a_correlation_id() {
    let (_broker, server) = server(10).await;

    let response = server.get("/health").await;
    assert!(response.headers().contains_key("x-correlation-id"));
}
