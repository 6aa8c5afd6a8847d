//! Integration Tests for API Endpoints
//!
//! Tests the full request/response cycle for each endpoint against a cache
//! in a temporary directory.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
    Router,
};
use serde_json::{json, Value};
use sqlite_cache::{create_router, AppState, Cache, CacheConfig};
use std::time::Duration;
use tempfile::TempDir;
use tower::ServiceExt;

// == Helper Functions ==

fn create_test_app() -> (TempDir, Router) {
    let temp_dir = TempDir::new().unwrap();
    let cache = Cache::open(CacheConfig::new(temp_dir.path().join("cache.db"))).unwrap();
    (temp_dir, create_router(AppState::new(cache)))
}

async fn body_to_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.clone().oneshot(request).await.unwrap()
}

// == SET / ADD Endpoint Tests ==

#[tokio::test]
async fn test_set_endpoint_success() {
    let (_dir, app) = create_test_app();

    let response = send(
        &app,
        "PUT",
        "/set",
        Some(json!({"key": "test_key", "value": "test_value"})),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert!(json["message"].as_str().unwrap().contains("test_key"));
}

#[tokio::test]
async fn test_set_endpoint_with_ttl() {
    let (_dir, app) = create_test_app();

    let response = send(
        &app,
        "PUT",
        "/set",
        Some(json!({"key": "ttl_key", "value": "ttl_value", "ttl": 60})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, "GET", "/ttl/ttl_key", None).await;
    let json = body_to_json(response.into_body()).await;
    let ttl = json["ttl"].as_i64().unwrap();
    assert!(ttl > 0 && ttl <= 60, "unexpected ttl {}", ttl);
}

#[tokio::test]
async fn test_set_negative_ttl_never_expires() {
    let (_dir, app) = create_test_app();

    send(
        &app,
        "PUT",
        "/set",
        Some(json!({"key": "forever", "value": 1, "ttl": -1})),
    )
    .await;

    let response = send(&app, "GET", "/ttl/forever", None).await;
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["ttl"], json!(-1));
}

#[tokio::test]
async fn test_add_endpoint_does_not_overwrite() {
    let (_dir, app) = create_test_app();

    let first = send(&app, "PUT", "/add", Some(json!({"key": "k", "value": "first"}))).await;
    let first = body_to_json(first.into_body()).await;
    assert_eq!(first["stored"], json!(true));

    let second = send(&app, "PUT", "/add", Some(json!({"key": "k", "value": "second"}))).await;
    let second = body_to_json(second.into_body()).await;
    assert_eq!(second["stored"], json!(false));

    let response = send(&app, "GET", "/get/k", None).await;
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["value"], json!("first"));
}

// == GET Endpoint Tests ==

#[tokio::test]
async fn test_get_endpoint_success() {
    let (_dir, app) = create_test_app();
    let value = json!({"name": "widget", "tags": ["a", "b"], "count": 3});

    send(
        &app,
        "PUT",
        "/set",
        Some(json!({"key": "get_test", "value": value})),
    )
    .await;

    let response = send(&app, "GET", "/get/get_test", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["key"], json!("get_test"));
    assert_eq!(json["value"], value);
}

#[tokio::test]
async fn test_get_endpoint_not_found() {
    let (_dir, app) = create_test_app();

    let response = send(&app, "GET", "/get/nonexistent", None).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_to_json(response.into_body()).await;
    assert!(json["error"].as_str().unwrap().contains("nonexistent"));
}

// == DELETE Endpoint Tests ==

#[tokio::test]
async fn test_delete_endpoint() {
    let (_dir, app) = create_test_app();
    send(&app, "PUT", "/set", Some(json!({"key": "del", "value": 1}))).await;

    let response = send(&app, "DELETE", "/del/del", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["deleted"], json!(true));

    let response = send(&app, "GET", "/get/del", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Deleting again is not an error
    let response = send(&app, "DELETE", "/del/del", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["deleted"], json!(false));
}

// == Counter Endpoint Tests ==

#[tokio::test]
async fn test_incr_decr_endpoints() {
    let (_dir, app) = create_test_app();
    send(&app, "PUT", "/set", Some(json!({"key": "hits", "value": 10}))).await;

    let response = send(&app, "POST", "/incr/hits", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_json(response.into_body()).await["value"], json!(11));

    let response = send(&app, "POST", "/decr/hits?delta=4", None).await;
    assert_eq!(body_to_json(response.into_body()).await["value"], json!(7));

    let response = send(&app, "GET", "/get/hits", None).await;
    assert_eq!(body_to_json(response.into_body()).await["value"], json!(7));
}

#[tokio::test]
async fn test_incr_missing_key_conflict() {
    let (_dir, app) = create_test_app();

    let response = send(&app, "POST", "/incr/missing", None).await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["error"], json!("Nonexistent or expired cache key."));
}

#[tokio::test]
async fn test_incr_non_number_conflict() {
    let (_dir, app) = create_test_app();
    send(&app, "PUT", "/set", Some(json!({"key": "word", "value": "abc"}))).await;

    let response = send(&app, "POST", "/incr/word", None).await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["error"], json!("Value is not a number."));
}

// == Keys Endpoint Tests ==

#[tokio::test]
async fn test_keys_endpoint_with_pattern() {
    let (_dir, app) = create_test_app();
    for key in ["user.1", "user.2", "session.1"] {
        send(&app, "PUT", "/set", Some(json!({"key": key, "value": 0}))).await;
    }

    let response = send(&app, "GET", "/keys", None).await;
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["keys"], json!(["session.1", "user.1", "user.2"]));

    let response = send(&app, "GET", "/keys?pattern=user%25", None).await;
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["keys"], json!(["user.1", "user.2"]));
    assert_eq!(json["count"], json!(2));
}

#[tokio::test]
async fn test_clear_keys_endpoint() {
    let (_dir, app) = create_test_app();
    for key in ["user.1", "user.2", "session.1"] {
        send(&app, "PUT", "/set", Some(json!({"key": key, "value": 0}))).await;
    }

    let response = send(&app, "DELETE", "/keys?pattern=%25.1", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_json(response.into_body()).await["removed"], json!(2));

    let response = send(&app, "GET", "/keys", None).await;
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["keys"], json!(["user.2"]));
}

// == Health Endpoint Tests ==

#[tokio::test]
async fn test_health_endpoint() {
    let (_dir, app) = create_test_app();

    let response = send(&app, "GET", "/health", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_to_json(response.into_body()).await;
    assert_eq!(json["status"], json!("healthy"));
    assert!(json.get("timestamp").is_some());
}

// == Error Response Tests ==

#[tokio::test]
async fn test_invalid_json_request() {
    let (_dir, app) = create_test_app();

    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/set")
                .header("content-type", "application/json")
                .body(Body::from(r#"{"invalid json"#))
                .unwrap(),
        )
        .await
        .unwrap();

    assert!(
        response.status() == StatusCode::BAD_REQUEST
            || response.status() == StatusCode::UNPROCESSABLE_ENTITY
    );
}

#[tokio::test]
async fn test_empty_key_request() {
    let (_dir, app) = create_test_app();

    let response = send(&app, "PUT", "/set", Some(json!({"key": "", "value": "test"}))).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_to_json(response.into_body()).await;
    assert!(json.get("error").is_some());
}

// == TTL Expiration via API Tests ==

#[tokio::test]
async fn test_ttl_expiration_via_api() {
    let (_dir, app) = create_test_app();

    let response = send(
        &app,
        "PUT",
        "/set",
        Some(json!({"key": "ttl_test", "value": "expires_soon", "ttl": 2})),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, "GET", "/get/ttl_test", None).await;
    assert_eq!(response.status(), StatusCode::OK);

    tokio::time::sleep(Duration::from_millis(2100)).await;

    let response = send(&app, "GET", "/get/ttl_test", None).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(&app, "GET", "/ttl/ttl_test", None).await;
    assert_eq!(body_to_json(response.into_body()).await["ttl"], json!(-2));
}

// == Persistence Tests ==

#[tokio::test]
async fn test_values_survive_router_restart() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("cache.db");

    {
        let cache = Cache::open(CacheConfig::new(&path)).unwrap();
        let app = create_router(AppState::new(cache));
        send(&app, "PUT", "/set", Some(json!({"key": "kept", "value": [1, 2]}))).await;
    }

    let cache = Cache::open(CacheConfig::new(&path)).unwrap();
    let app = create_router(AppState::new(cache));
    let response = send(&app, "GET", "/get/kept", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_to_json(response.into_body()).await["value"], json!([1, 2]));
}
