//! Unit tests for single-image review orchestration

use aerovision_gateway::analyzer::AnalyzerErrorKind;
use aerovision_gateway::backend::{BackendVariant, ModelKey};
use aerovision_gateway::error::AppError;
use aerovision_gateway::gateway::{EnvironmentSignal, OcrMode};
use aerovision_gateway::review::{CheckOptions, CheckType, ImageSource, ReviewRequest};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::support::*;

fn request(checks: impl IntoIterator<Item = CheckType>) -> ReviewRequest {
    ReviewRequest::new(ImageSource::Base64(png_base64()), checks)
}

#[tokio::test]
async fn test_all_checks_pass() {
    let state = app_state(test_settings(), Arc::new(passing_loader()), EnvironmentSignal::default());

    let result = state.orchestrator.review(request(CheckType::ALL)).await.unwrap();

    assert!(result.overall_pass);
    assert!(result.fail_reasons.is_empty());
    assert_eq!(result.results.len(), 4);
    assert!(result.results.values().all(|outcome| outcome.passed()));
}

#[tokio::test]
async fn test_low_airline_confidence_fails_only_airline() {
    let loader = passing_loader().with(
        CheckType::Airline,
        Script::Respond(json!({"predictions": [{"class_id": 3, "class_name": "CCA", "confidence": 0.3}]})),
    );
    let state = app_state(test_settings(), Arc::new(loader), EnvironmentSignal::default());

    let result = state.orchestrator.review(request(CheckType::ALL)).await.unwrap();

    assert!(!result.overall_pass);
    assert_eq!(result.fail_reasons, vec!["airline".to_string()]);
    // A low score is a completed check, not an error
    assert!(result.results[&CheckType::Airline].as_result().is_some());
}

#[tokio::test]
async fn test_backend_failure_is_isolated() {
    let loader = passing_loader().with(CheckType::Aircraft, Script::Fail("CUDA out of memory".to_string()));
    let state = app_state(test_settings(), Arc::new(loader), EnvironmentSignal::default());

    let result = state.orchestrator.review(request(CheckType::ALL)).await.unwrap();

    assert_eq!(result.fail_reasons, vec!["aircraft".to_string()]);
    let err = result.results[&CheckType::Aircraft].as_error().unwrap();
    assert_eq!(err.kind, AnalyzerErrorKind::BackendFailure);
    assert!(result.results[&CheckType::Quality].passed());
    assert!(result.results[&CheckType::Registration].passed());
}

#[tokio::test]
async fn test_remote_mode_without_credential_fails_registration_only() {
    let mut settings = test_settings();
    settings.ocr.mode = OcrMode::Remote;
    let loader = Arc::new(passing_loader());
    let state = app_state(settings, loader.clone(), EnvironmentSignal::default());

    let result = state.orchestrator.review(request(CheckType::ALL)).await.unwrap();

    assert_eq!(result.fail_reasons, vec!["registration".to_string()]);
    let err = result.results[&CheckType::Registration].as_error().unwrap();
    assert_eq!(err.kind, AnalyzerErrorKind::Configuration);

    // No silent fallback to the local engine
    assert_eq!(loader.loads(ModelKey::local(CheckType::Registration)), 0);
    assert_eq!(
        loader.loads(ModelKey::new(CheckType::Registration, BackendVariant::Remote)),
        0
    );
}

#[tokio::test]
async fn test_credential_routes_registration_to_remote() {
    let loader = Arc::new(passing_loader());
    let signal = EnvironmentSignal::new(Some("sk-test".to_string()), None);
    let state = app_state(test_settings(), loader.clone(), signal);

    let result = state
        .orchestrator
        .review(request([CheckType::Registration]))
        .await
        .unwrap();

    assert!(result.overall_pass);
    assert_eq!(
        loader.loaded_keys(),
        vec![ModelKey::new(CheckType::Registration, BackendVariant::Remote)]
    );
}

#[tokio::test]
async fn test_slow_check_times_out_without_blocking_others() {
    let mut settings = test_settings();
    settings.review.request_timeout_ms = 300;
    let loader = passing_loader().with(
        CheckType::Registration,
        Script::Slow(Duration::from_secs(5), registration_ok()),
    );
    let state = app_state(settings, Arc::new(loader), EnvironmentSignal::default());

    let started = Instant::now();
    let result = state.orchestrator.review(request(CheckType::ALL)).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(result.fail_reasons, vec!["registration".to_string()]);
    let err = result.results[&CheckType::Registration].as_error().unwrap();
    assert_eq!(err.kind, AnalyzerErrorKind::Timeout);
    assert!(result.results[&CheckType::Aircraft].passed());
}

#[tokio::test]
async fn test_checks_run_concurrently() {
    let delay = Duration::from_millis(250);
    let loader = ScriptedLoader::new()
        .with(CheckType::Quality, Script::Slow(delay, quality_ok()))
        .with(CheckType::Aircraft, Script::Slow(delay, aircraft_ok()))
        .with(CheckType::Airline, Script::Slow(delay, airline_ok()))
        .with(CheckType::Registration, Script::Slow(delay, registration_ok()));
    let state = app_state(test_settings(), Arc::new(loader), EnvironmentSignal::default());

    let started = Instant::now();
    let result = state.orchestrator.review(request(CheckType::ALL)).await.unwrap();

    assert!(result.overall_pass);
    assert!(started.elapsed() < delay * 3);
}

#[tokio::test]
async fn test_model_load_failure_marks_check_unavailable() {
    let loader = passing_loader().failing(ModelKey::local(CheckType::Quality));
    let state = app_state(test_settings(), Arc::new(loader), EnvironmentSignal::default());

    let result = state.orchestrator.review(request(CheckType::ALL)).await.unwrap();

    assert_eq!(result.fail_reasons, vec!["quality".to_string()]);
    let err = result.results[&CheckType::Quality].as_error().unwrap();
    assert_eq!(err.kind, AnalyzerErrorKind::ModelUnavailable);
}

#[tokio::test]
async fn test_results_in_canonical_order() {
    let loader = passing_loader()
        .with(CheckType::Quality, Script::Fail("boom".to_string()))
        .with(CheckType::Registration, Script::Fail("boom".to_string()));
    let state = app_state(test_settings(), Arc::new(loader), EnvironmentSignal::default());

    let req = request([CheckType::Registration, CheckType::Airline, CheckType::Quality]);
    let result = state.orchestrator.review(req).await.unwrap();

    let order: Vec<_> = result.results.keys().copied().collect();
    assert_eq!(order, vec![CheckType::Quality, CheckType::Airline, CheckType::Registration]);
    assert_eq!(result.fail_reasons, vec!["quality".to_string(), "registration".to_string()]);

    let rendered = serde_json::to_string(&result.results).unwrap();
    let quality = rendered.find("\"quality\":").unwrap();
    let airline = rendered.find("\"airline\":").unwrap();
    let registration = rendered.find("\"registration\":").unwrap();
    assert!(quality < airline && airline < registration);
}

#[tokio::test]
async fn test_models_load_once_across_reviews() {
    let loader = Arc::new(passing_loader());
    let state = app_state(test_settings(), loader.clone(), EnvironmentSignal::default());

    for _ in 0..3 {
        state.orchestrator.review(request(CheckType::ALL)).await.unwrap();
    }

    for check in CheckType::ALL {
        assert_eq!(loader.loads(ModelKey::local(check)), 1);
    }
}

#[tokio::test]
async fn test_top_k_option_limits_predictions() {
    let loader = passing_loader().with(
        CheckType::Aircraft,
        Script::Respond(json!({"predictions": [
            {"class_id": 1, "class_name": "B738", "confidence": 0.7},
            {"class_id": 2, "class_name": "B737", "confidence": 0.2},
            {"class_id": 3, "class_name": "B739", "confidence": 0.1}
        ]})),
    );
    let state = app_state(test_settings(), Arc::new(loader), EnvironmentSignal::default());

    let req = request([CheckType::Aircraft]).with_options(CheckType::Aircraft, CheckOptions { top_k: Some(2) });
    let result = state.orchestrator.review(req).await.unwrap();

    let rendered = serde_json::to_value(&result.results[&CheckType::Aircraft]).unwrap();
    assert_eq!(rendered["details"]["top_k"].as_array().unwrap().len(), 2);
    assert_eq!(rendered["details"]["top1"]["class_name"], "B738");
}

#[tokio::test]
async fn test_undecodable_image_fails_whole_review() {
    let state = app_state(test_settings(), Arc::new(passing_loader()), EnvironmentSignal::default());

    let req = ReviewRequest::new(ImageSource::Base64("%%%".to_string()), CheckType::ALL);
    let err = state.orchestrator.review(req).await.unwrap_err();

    assert!(matches!(err, AppError::InvalidInput(_)));
}

#[tokio::test]
async fn test_metadata_echoed() {
    let state = app_state(test_settings(), Arc::new(passing_loader()), EnvironmentSignal::default());

    let mut metadata = serde_json::Map::new();
    metadata.insert("photo_id".to_string(), json!("P-1029"));
    let req = request([CheckType::Quality]).with_metadata(metadata.clone());

    let result = state.orchestrator.review(req).await.unwrap();
    assert_eq!(result.metadata, Some(metadata));
}

#[tokio::test]
async fn test_callback_receives_redacted_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let loader = passing_loader().with(
        CheckType::Aircraft,
        Script::Fail("CUDA out of memory at /srv/secret/aircraft.py".to_string()),
    );
    let state = app_state(test_settings(), Arc::new(loader), EnvironmentSignal::default());

    let mut req = request(CheckType::ALL);
    req.callback_url = Some(format!("{}/hook", server.uri()));
    let result = state.orchestrator.review(req).await.unwrap();
    assert!(!result.results[&CheckType::Aircraft].as_error().unwrap().message.contains("CUDA"));

    // Delivery runs in the background
    tokio::time::sleep(Duration::from_millis(300)).await;
    server.verify().await;

    let received = server.received_requests().await.unwrap();
    let raw = String::from_utf8(received[0].body.clone()).unwrap();
    assert!(!raw.contains("CUDA"));
    assert!(!raw.contains("secret"));

    let body: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["overall_pass"], false);
    assert_eq!(body["fail_reasons"], json!(["aircraft"]));
}

#[tokio::test]
async fn test_debug_keeps_backend_error_text() {
    let mut settings = test_settings();
    settings.debug = true;
    let loader = passing_loader().with(CheckType::Aircraft, Script::Fail("CUDA out of memory".to_string()));
    let state = app_state(settings, Arc::new(loader), EnvironmentSignal::default());

    let result = state.orchestrator.review(request(CheckType::ALL)).await.unwrap();

    let err = result.results[&CheckType::Aircraft].as_error().unwrap();
    assert!(err.message.contains("CUDA"));
}
