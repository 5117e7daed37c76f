//! POST /shorturl/generate

mod common;

use axum::http::StatusCode;
use common::{body_json, build_app, create_test_storage, json_request, seed, test_config, TestApp};
use serde_json::json;
use shorturl::analytics::DisabledGeoLocator;
use std::sync::Arc;
use tower::ServiceExt;

async fn app_with_codes(codes: &[&str], overrides: &[(&str, &str)]) -> TestApp {
    let storage = create_test_storage().await;
    seed(&storage, codes).await;
    build_app(&test_config(overrides), storage, Arc::new(DisabledGeoLocator))
}

fn generate_body(fields: serde_json::Value) -> String {
    let mut body = json!({
        "campaignName": "summer",
        "mainUrl": "https://example.com/summer",
        "apikey": "test-key-123",
        "type": "unique",
        "expiry": "7",
        "count": "2",
    });
    if let (Some(base), Some(extra)) = (body.as_object_mut(), fields.as_object()) {
        for (k, v) in extra {
            base.insert(k.clone(), v.clone());
        }
    }
    body.to_string()
}

async fn post(app: &TestApp, body: &str) -> (StatusCode, serde_json::Value) {
    let response = app
        .router
        .clone()
        .oneshot(json_request("POST", "/shorturl/generate", body))
        .await
        .unwrap();
    let status = response.status();
    (status, body_json(response).await)
}

#[tokio::test]
async fn test_unique_returns_binding_ids_to_urls() {
    let app = app_with_codes(&["u1", "u2", "u3"], &[]).await;

    let (status, body) = post(&app, &generate_body(json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let map = body.as_object().unwrap();
    assert_eq!(map.len(), 2);
    for (id, url) in map {
        assert!(id.parse::<i64>().is_ok(), "key {id} is not a binding id");
        assert!(url.as_str().unwrap().starts_with("https://s.example/shorturl/u"));
    }

    let bindings = app
        .storage
        .find_active_binding("u1", chrono::Utc::now().timestamp())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(bindings.created_by, "marketing");
    assert_eq!(bindings.campaign_name, "summer");
}

#[tokio::test]
async fn test_numbers_and_legacy_campaign_spelling() {
    let app = app_with_codes(&["n1"], &[]).await;
    let body = json!({
        "campignName": "legacy",
        "mainUrl": "https://example.com",
        "apikey": "test-key-123",
        "type": "GENERIC",
        "expiry": 1,
        "count": 1,
        "senderId": "ACME",
        "domain": "https://go.example/"
    })
    .to_string();

    let (status, body) = post(&app, &body).await;
    assert_eq!(status, StatusCode::OK);
    let urls: Vec<&str> = body
        .as_object()
        .unwrap()
        .values()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(urls, vec!["https://go.example/ACME/n1"]);
}

#[tokio::test]
async fn test_empty_pool_signal() {
    let app = app_with_codes(&[], &[]).await;

    let (status, body) = post(&app, &generate_body(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({"message": "No available shortcodes", "status": "empty"})
    );
}

#[tokio::test]
async fn test_invalid_json() {
    let app = app_with_codes(&[], &[]).await;

    let (status, body) = post(&app, "{not json").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"message": "Invalid JSON payload", "status": "error"}));
}

#[tokio::test]
async fn test_missing_fields() {
    let app = app_with_codes(&["m1"], &[]).await;

    let (status, body) = post(&app, &generate_body(json!({"mainUrl": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Missing required fields");
    assert_eq!(body["status"], "error");

    let (status, _) = post(&app, r#"{"type":"unique"}"#).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_api_key() {
    let app = app_with_codes(&["k1"], &[]).await;

    let (status, body) = post(&app, &generate_body(json!({"apikey": "wrong"}))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({"message": "Invalid API key", "status": "error"}));

    // Nothing was claimed
    assert_eq!(app.storage.pool_stats().await.unwrap().available, 1);
}

#[tokio::test]
async fn test_disabled_auth_uses_default_owner() {
    let app = app_with_codes(&["d1"], &[("DISABLE_AUTH", "true")]).await;

    let (status, _) = post(&app, &generate_body(json!({"apikey": "anything", "count": "1"}))).await;
    assert_eq!(status, StatusCode::OK);

    let binding = app
        .storage
        .find_active_binding("d1", chrono::Utc::now().timestamp())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(binding.created_by, "system");
}

#[tokio::test]
async fn test_validation_messages() {
    let app = app_with_codes(&["v1", "v2"], &[]).await;

    let cases = [
        (json!({"type": "generic", "count": "2"}), "Generic type can only have count = 1"),
        (json!({"count": "abc"}), "Count must be a valid number"),
        (json!({"count": "0"}), "Count must be a valid number"),
        (json!({"expiry": "-1"}), "Expiry Time must be a valid number"),
        (json!({"mainUrl": "not a url"}), "Invalid mainUrl"),
        (json!({"type": "custom"}), "Shortcode required for custom type"),
        (json!({"type": "random"}), "type must be one of custom, unique, generic"),
    ];

    for (fields, expected) in cases {
        let (status, body) = post(&app, &generate_body(fields)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{expected}");
        assert_eq!(body["message"], expected);
    }

    // No case touched the pool
    assert_eq!(app.storage.pool_stats().await.unwrap().available, 2);
}

#[tokio::test]
async fn test_custom_code_collision_policy() {
    let app = app_with_codes(&[], &[("CUSTOM_CODE_POLICY", "reject")]).await;
    let body = generate_body(json!({"type": "custom", "shortcode": "promo", "count": "1"}));

    let (status, first) = post(&app, &body).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        first.as_object().unwrap().values().next().unwrap(),
        "https://s.example/shorturl/promo"
    );

    let (status, second) = post(&app, &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(second["message"], "Shortcode already in use");
}

#[tokio::test]
async fn test_destination_with_line_break_is_normalized() {
    let app = app_with_codes(&["nl1"], &[]).await;
    let body = generate_body(json!({
        "mainUrl": "https://example.com/landing\npage",
        "count": "1"
    }));

    let (status, _) = post(&app, &body).await;
    assert_eq!(status, StatusCode::OK);

    let response = app
        .router
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri("/shorturl/nl1")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers().get(axum::http::header::LOCATION).unwrap(),
        "https://example.com/landingpage"
    );
}

#[tokio::test]
async fn test_health() {
    let app = app_with_codes(&[], &[]).await;
    let response = app
        .router
        .clone()
        .oneshot(
            axum::http::Request::builder()
                .uri("/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "OK"}));
}
