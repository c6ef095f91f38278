//! HTTP surface tests against the full router.

// Integration tests use unwrap for brevity - panics are acceptable in tests
#![allow(clippy::unwrap_used)]

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use graphrag::api::{router, AppState};
use graphrag::config::AppConfig;
use graphrag::storage::InMemoryGraphStore;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app() -> axum::Router {
    let config = AppConfig::default();
    let state = Arc::new(AppState::new(config, Arc::new(InMemoryGraphStore::new())));
    router(state)
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoints_respond() {
    for uri in ["/api/v1/health", "/api/v1/health/ready", "/api/v1/health/live"] {
        let response = app()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
        let body = body_json(response).await;
        assert_eq!(body["success"], json!(true), "{uri}");
    }
}

#[tokio::test]
async fn query_returns_answer() {
    let response = app()
        .oneshot(post_json(
            "/api/v1/query",
            &json!({"query": "什麼是長期照護", "top_k": 3}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert!(body["answer"].as_str().is_some_and(|a| !a.is_empty()));
    assert_eq!(body["query"], json!("什麼是長期照護"));
    assert!(body["sources"].as_array().is_some());
}

#[tokio::test]
async fn query_validation_rejects_bad_requests() {
    // Empty query.
    let response = app()
        .oneshot(post_json("/api/v1/query", &json!({"query": "   "})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // top_k out of range.
    let response = app()
        .oneshot(post_json(
            "/api/v1/query",
            &json!({"query": "q", "top_k": 11}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ingest_then_knowledge_query_round_trip() {
    let app = app();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/knowledge/ingest",
            &json!({
                "content": "台北市長期照護2.0政策由衛福部管理",
                "source": "care.txt",
                "entity_types": ["Person", "Organization", "Concept"],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let ingest_body = body_json(response).await;
    assert_eq!(ingest_body["status"], json!("success"));
    assert!(ingest_body["document_id"]
        .as_str()
        .is_some_and(|id| id.starts_with("doc_")));
    assert!(ingest_body["entities_count"].as_u64().unwrap() >= 2);

    // Sources listing now carries the document.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/knowledge/sources")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let sources_body = body_json(response).await;
    assert_eq!(sources_body["total"], json!(1));
    assert_eq!(sources_body["sources"][0]["source"], json!("care.txt"));

    // Knowledge query returns graph evidence.
    let response = app
        .oneshot(post_json(
            "/api/v1/knowledge/query",
            &json!({"query": "長期照護", "include_graph": true}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let query_body = body_json(response).await;
    assert!(query_body["answer"].as_str().is_some());
    assert!(!query_body["graph_entities"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn ingest_validation_rejects_unknown_entity_types() {
    let response = app()
        .oneshot(post_json(
            "/api/v1/knowledge/ingest",
            &json!({"content": "text", "entity_types": ["Alien"]}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn webhook_cache_cleared_clears_the_cache() {
    let config = AppConfig::default();
    let state = Arc::new(AppState::new(config, Arc::new(InMemoryGraphStore::new())));
    let app = router(state.clone());

    // Seed the cache through a query.
    app.clone()
        .oneshot(post_json("/api/v1/query", &json!({"query": "warm"})))
        .await
        .unwrap();

    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/webhook/events",
            &json!({"event_type": "cache_cleared", "payload": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], json!("received"));

    // Unknown event types are rejected.
    let response = app
        .clone()
        .oneshot(post_json(
            "/api/v1/webhook/events",
            &json!({"event_type": "mystery", "payload": {}}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Status reflects the received event.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/webhook/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["total_events"], json!(1));
}

#[tokio::test]
async fn admin_endpoints_require_the_shared_secret() {
    let app = app();

    // Missing key.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/admin/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Wrong key.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/admin/stats")
                .header("x-api-key", "wrong")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Correct key (the default test secret).
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/admin/graph/stats")
                .header("x-api-key", "test-api-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["total_entities"], json!(0));

    // Cache clear reports the number of dropped keys.
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/admin/cache/clear")
                .header("x-api-key", "test-api-key")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], json!("success"));
}

#[tokio::test]
async fn query_stream_emits_done_terminator() {
    let response = app()
        .oneshot(
            Request::builder()
                .uri("/api/v1/query/stream?query=hello")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/event-stream")));

    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8_lossy(&bytes);
    assert!(text.contains("data:"));
    assert!(text.contains("[DONE]"));
}
