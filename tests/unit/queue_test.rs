//! Unit tests for batch coordination

use aerovision_gateway::error::AppError;
use aerovision_gateway::gateway::EnvironmentSignal;
use aerovision_gateway::queue::{BatchRequest, BatchScope};
use aerovision_gateway::review::{CheckType, ImageSource, ReviewRequest};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::support::*;

async fn image_server() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ok.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG.to_vec()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    server
}

fn url_request(url: String) -> ReviewRequest {
    ReviewRequest::new(ImageSource::Url(url), CheckType::ALL)
}

#[tokio::test]
async fn test_batch_with_one_unreachable_image() {
    let server = image_server().await;
    let state = app_state(test_settings(), Arc::new(passing_loader()), EnvironmentSignal::default());

    let batch = BatchRequest {
        items: vec![
            Ok(url_request(format!("{}/ok.png", server.uri()))),
            Ok(url_request(format!("{}/missing.jpg", server.uri()))),
            Ok(url_request(format!("{}/ok.png", server.uri()))),
        ],
        scope: BatchScope::Aggregated,
        callback_url: None,
    };

    let report = state.batches.process_batch(batch).await.unwrap();

    assert_eq!(report.total, 3);
    assert_eq!(report.successful, 2);
    assert_eq!(report.failed, 1);

    let indexes: Vec<_> = report.results.iter().map(|r| r.index).collect();
    assert_eq!(indexes, vec![0, 1, 2]);
    assert!(report.results[0].success);
    assert!(!report.results[1].success);
    assert!(report.results[1].error.is_some());
    assert!(report.results[2].data.as_ref().unwrap().overall_pass);
}

#[tokio::test]
async fn test_item_error_hides_image_url() {
    let server = image_server().await;
    let missing = format!("{}/missing.jpg", server.uri());
    let batch = || BatchRequest {
        items: vec![Ok(url_request(missing.clone()))],
        scope: BatchScope::Aggregated,
        callback_url: None,
    };

    let state = app_state(test_settings(), Arc::new(passing_loader()), EnvironmentSignal::default());
    let report = state.batches.process_batch(batch()).await.unwrap();
    let error = report.results[0].error.as_deref().unwrap();
    assert_eq!(error, "Image could not be loaded");
    assert!(!error.contains("missing.jpg"));

    let mut settings = test_settings();
    settings.debug = true;
    let state = app_state(settings, Arc::new(passing_loader()), EnvironmentSignal::default());
    let report = state.batches.process_batch(batch()).await.unwrap();
    assert!(report.results[0].error.as_deref().unwrap().contains("missing.jpg"));
}

#[tokio::test]
async fn test_invalid_item_fails_in_place() {
    let state = app_state(test_settings(), Arc::new(passing_loader()), EnvironmentSignal::default());

    let batch = BatchRequest {
        items: vec![
            Err(AppError::invalid_input("Provide exactly one of image_url or image_base64")),
            Ok(ReviewRequest::new(ImageSource::Base64(png_base64()), [CheckType::Quality])),
        ],
        scope: BatchScope::Atomic,
        callback_url: None,
    };

    let report = state.batches.process_batch(batch).await.unwrap();

    assert_eq!(report.successful, 1);
    assert!(!report.results[0].success);
    assert!(report.results[1].success);
}

#[tokio::test]
async fn test_batch_limits_depend_on_scope() {
    let state = app_state(test_settings(), Arc::new(passing_loader()), EnvironmentSignal::default());
    let items = || {
        (0..11)
            .map(|_| Ok(ReviewRequest::new(ImageSource::Base64(png_base64()), [CheckType::Quality])))
            .collect::<Vec<_>>()
    };

    let err = state
        .batches
        .process_batch(BatchRequest {
            items: items(),
            scope: BatchScope::Aggregated,
            callback_url: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BatchTooLarge { size: 11, max: 10 }));

    let report = state
        .batches
        .process_batch(BatchRequest {
            items: items(),
            scope: BatchScope::Atomic,
            callback_url: None,
        })
        .await
        .unwrap();
    assert_eq!(report.successful, 11);
}

#[tokio::test]
async fn test_empty_batch_rejected() {
    let state = app_state(test_settings(), Arc::new(passing_loader()), EnvironmentSignal::default());

    let err = state
        .batches
        .process_batch(BatchRequest {
            items: Vec::new(),
            scope: BatchScope::Aggregated,
            callback_url: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidInput(_)));
}

#[tokio::test]
async fn test_batch_report_posted_to_callback() {
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
    let batch = BatchRequest {
        items: vec![
            Ok(ReviewRequest::new(ImageSource::Base64(png_base64()), [CheckType::Quality])),
            Ok(ReviewRequest::new(ImageSource::Base64(png_base64()), [CheckType::Aircraft])),
        ],
        scope: BatchScope::Aggregated,
        callback_url: Some(format!("{}/hook", server.uri())),
    };

    let report = state.batches.process_batch(batch).await.unwrap();
    assert_eq!(report.successful, 2);

    // Delivery runs in the background
    tokio::time::sleep(Duration::from_millis(300)).await;
    server.verify().await;

    let received = server.received_requests().await.unwrap();
    let raw = String::from_utf8(received[0].body.clone()).unwrap();
    assert!(!raw.contains("CUDA"));
    assert!(!raw.contains("secret"));

    let body: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["total"], 2);
    assert_eq!(body["results"][1]["data"]["overall_pass"], false);
}

#[tokio::test]
async fn test_pool_drains_after_batch() {
    let state = app_state(test_settings(), Arc::new(passing_loader()), EnvironmentSignal::default());
    let batch = BatchRequest {
        items: (0..5)
            .map(|_| Ok(ReviewRequest::new(ImageSource::Base64(png_base64()), CheckType::ALL)))
            .collect(),
        scope: BatchScope::Aggregated,
        callback_url: None,
    };

    state.batches.process_batch(batch).await.unwrap();

    let stats = state.orchestrator.pool().stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.completed, 20);
}
