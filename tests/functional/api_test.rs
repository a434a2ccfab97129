//! Functional tests for the review endpoints

use aerovision_gateway::api::create_router;
use aerovision_gateway::backend::ModelKey;
use aerovision_gateway::gateway::{EnvironmentSignal, OcrMode};
use aerovision_gateway::review::CheckType;
use axum::{
    body::Body,
    http::{header::CONTENT_TYPE, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

use crate::support::*;

fn app_with(loader: ScriptedLoader) -> Router {
    create_router(app_state(test_settings(), Arc::new(loader), EnvironmentSignal::default()))
}

async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    read(response).await
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    read(response).await
}

async fn read(response: axum::response::Response) -> (StatusCode, Value) {
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_review_all_checks() {
    let (status, body) = post(
        app_with(passing_loader()),
        "/v1/review",
        json!({"image_base64": png_base64(), "metadata": {"photo_id": "P-1"}}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["overall_pass"], true);
    assert_eq!(body["fail_reasons"], json!([]));
    assert_eq!(body["metadata"]["photo_id"], "P-1");
    assert_eq!(body["results"]["registration"]["details"]["registration"], "B-6120");
    assert!(body["review_id"].is_string());
}

#[tokio::test]
async fn test_review_reports_failed_check() {
    let loader = passing_loader().with(CheckType::Aircraft, Script::Fail("CUDA out of memory".to_string()));
    let (status, body) = post(
        app_with(loader),
        "/v1/review",
        json!({"image_base64": png_base64(), "review_types": ["aircraft", "quality"]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["overall_pass"], false);
    assert_eq!(body["fail_reasons"], json!(["aircraft"]));
    assert_eq!(body["results"]["aircraft"]["passed"], false);
    assert_eq!(body["results"]["aircraft"]["error"]["kind"], "backend_failure");
    // Backend text stays out of responses unless debug is on
    let message = body["results"]["aircraft"]["error"]["message"].as_str().unwrap();
    assert!(!message.contains("CUDA"));
    assert!(body["results"].get("airline").is_none());
}

#[tokio::test]
async fn test_unknown_review_type_rejected() {
    let (status, body) = post(
        app_with(passing_loader()),
        "/v1/review",
        json!({"image_base64": png_base64(), "review_types": ["quality", "livery"]}),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "unknown_review_type");
}

#[tokio::test]
async fn test_both_image_fields_rejected() {
    let (status, body) = post(
        app_with(passing_loader()),
        "/v1/review",
        json!({"image_base64": png_base64(), "image_url": "http://example.com/a.jpg"}),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["type"], "invalid_request_error");
}

#[tokio::test]
async fn test_malformed_json_rejected() {
    let response = app_with(passing_loader())
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/v1/review")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    let (status, body) = read(response).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_single_check_endpoint() {
    let loader = passing_loader().with(
        CheckType::Airline,
        Script::Respond(json!({"predictions": [
            {"class_id": 3, "class_name": "CCA", "confidence": 0.6},
            {"class_id": 4, "class_name": "CES", "confidence": 0.3},
            {"class_id": 5, "class_name": "CSN", "confidence": 0.1}
        ]})),
    );
    let (status, body) = post(
        app_with(loader),
        "/v1/airline",
        json!({"image_base64": png_base64(), "top_k": 2, "review_types": ["quality"]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    let results = body["results"].as_object().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(body["results"]["airline"]["details"]["top1"]["class_name"], "CCA");
    assert_eq!(body["results"]["airline"]["details"]["top_k"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_batch_review() {
    let images: Vec<Value> = (0..3).map(|i| json!({"image_base64": png_base64(), "metadata": {"i": i}})).collect();
    let (status, body) = post(
        app_with(passing_loader()),
        "/v1/review/batch",
        json!({"images": images, "review_types": ["quality"]}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["total"], 3);
    assert_eq!(body["successful"], 3);
    assert_eq!(body["results"][2]["data"]["metadata"]["i"], 2);
}

#[tokio::test]
async fn test_batch_too_large() {
    let images: Vec<Value> = (0..11).map(|_| json!({"image_base64": png_base64()})).collect();
    let (status, body) = post(app_with(passing_loader()), "/v1/review/batch", json!({"images": images})).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(body["error"]["code"], "batch_too_large");
}

#[tokio::test]
async fn test_single_check_batch_allows_larger_batches() {
    let images: Vec<Value> = (0..20).map(|_| json!({"image_base64": png_base64()})).collect();
    let (status, body) = post(app_with(passing_loader()), "/v1/quality/batch", json!({"images": images})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["successful"], 20);
}

#[tokio::test]
async fn test_health_reports_backends() {
    let mut settings = test_settings();
    settings.ocr.mode = OcrMode::Remote;
    let loader = Arc::new(passing_loader());
    let state = app_state(settings, loader, EnvironmentSignal::default());
    state
        .gateway
        .get_or_create(ModelKey::local(CheckType::Quality))
        .await
        .unwrap();

    let (status, body) = get(create_router(state), "/health").await;

    // Degraded still answers 200
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "degraded");
    assert_eq!(body["backends"]["quality"], "local");
    assert_eq!(body["backends"]["registration"], Value::Null);
    assert_eq!(body["models_loaded"]["quality"], true);
    assert_eq!(body["models_loaded"]["aircraft"], false);

    let loaded_at = body["loaded_at"]["quality"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(loaded_at).is_ok());
    assert_eq!(body["loaded_at"]["aircraft"], Value::Null);
}

#[tokio::test]
async fn test_health_healthy_with_credential() {
    let state = app_state(
        test_settings(),
        Arc::new(passing_loader()),
        EnvironmentSignal::new(Some("sk-test".to_string()), None),
    );

    let (status, body) = get(create_router(state), "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["backends"]["registration"], "remote");
}

#[tokio::test]
async fn test_stats_count_requests() {
    let state = app_state(test_settings(), Arc::new(passing_loader()), EnvironmentSignal::default());
    let app = create_router(state);

    post(app.clone(), "/v1/review", json!({"image_base64": png_base64()})).await;
    post(app.clone(), "/v1/review", json!({"review_types": ["quality"]})).await;

    let (status, body) = get(app, "/stats").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_requests"], 2);
    assert_eq!(body["successful_requests"], 1);
    assert_eq!(body["failed_requests"], 1);
    assert_eq!(body["models_loaded"], 4);
    assert_eq!(body["worker_pool"]["in_flight"], 0);
}

#[tokio::test]
async fn test_stats_count_batch_items() {
    let state = app_state(test_settings(), Arc::new(passing_loader()), EnvironmentSignal::default());
    let app = create_router(state);

    let images = json!([
        {"image_base64": png_base64()},
        {"image_base64": png_base64(), "image_url": "http://example.invalid/a.jpg"},
        {"image_base64": png_base64()},
    ]);
    let (status, body) = post(
        app.clone(),
        "/v1/review/batch",
        json!({"images": images, "review_types": ["quality"]}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["failed"], 1);

    // A batch rejected as a whole counts once
    post(app.clone(), "/v1/review/batch", json!({"images": []})).await;

    let (_, body) = get(app, "/stats").await;
    assert_eq!(body["total_requests"], 4);
    assert_eq!(body["successful_requests"], 2);
    assert_eq!(body["failed_requests"], 2);
}

#[tokio::test]
async fn test_root_lists_review_types() {
    let (status, body) = get(app_with(passing_loader()), "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["review_types"], json!(["quality", "aircraft", "airline", "registration"]));
}

#[tokio::test]
async fn test_auth_enforced_when_enabled() {
    let mut settings = test_settings();
    settings.auth.enabled = true;
    settings.auth.api_keys = vec!["ops-key".to_string()];
    let app = create_router(app_state(settings, Arc::new(passing_loader()), EnvironmentSignal::default()));

    let (status, _) = post(app.clone(), "/v1/quality", json!({"image_base64": png_base64()})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = get(app, "/health").await;
    assert_eq!(status, StatusCode::OK);
}
