//! Unit tests for the model handle cache

use aerovision_gateway::backend::{BackendVariant, ConfiguredLoader, ModelKey};
use aerovision_gateway::gateway::inference_gateway::LoadState;
use aerovision_gateway::gateway::{EnvironmentSignal, InferenceGateway, OcrMode, SharedSignal};
use aerovision_gateway::review::CheckType;
use aerovision_gateway::AppState;
use std::sync::Arc;
use std::time::Duration;

use crate::support::ScriptedLoader;

#[tokio::test]
async fn test_single_flight_across_many_callers() {
    let loader = Arc::new(ScriptedLoader::new().load_delay(Duration::from_millis(100)));
    let gateway = Arc::new(InferenceGateway::new(loader.clone()));
    let key = ModelKey::local(CheckType::Registration);

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let gateway = gateway.clone();
            tokio::spawn(async move { gateway.get_or_create(key).await })
        })
        .collect();

    // While the load is in flight the slot reports Loading
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(gateway.state(key), LoadState::Loading);

    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }

    assert_eq!(loader.loads(key), 1);
    assert_eq!(gateway.load_attempts(), 1);
}

#[tokio::test]
async fn test_keys_are_independent() {
    let loader = Arc::new(ScriptedLoader::new());
    let gateway = InferenceGateway::new(loader.clone());

    let local = ModelKey::new(CheckType::Registration, BackendVariant::Local);
    let remote = ModelKey::new(CheckType::Registration, BackendVariant::Remote);

    gateway.get_or_create(local).await.unwrap();
    gateway.get_or_create(remote).await.unwrap();
    gateway.get_or_create(local).await.unwrap();

    assert_eq!(loader.loads(local), 1);
    assert_eq!(loader.loads(remote), 1);
    assert_eq!(gateway.loaded_handles().len(), 2);
}

#[tokio::test]
async fn test_failed_load_is_sticky() {
    let key = ModelKey::local(CheckType::Airline);
    let loader = Arc::new(ScriptedLoader::new().failing(key));
    let gateway = InferenceGateway::new(loader.clone());

    let first = gateway.get_or_create(key).await.unwrap_err();
    let second = gateway.get_or_create(key).await.unwrap_err();

    assert_eq!(first, second);
    assert_eq!(loader.loads(key), 1);
    assert!(!gateway.is_available(CheckType::Airline));
    assert_eq!(gateway.state(key), LoadState::Failed);
}

#[tokio::test]
async fn test_preload_then_serve_without_reload() {
    let loader = Arc::new(ScriptedLoader::new());
    let gateway = InferenceGateway::new(loader.clone());

    let keys: Vec<_> = CheckType::ALL.into_iter().map(ModelKey::local).collect();
    let report = gateway.preload(keys.clone()).await;
    assert_eq!(report.loaded.len(), 4);

    for key in keys {
        gateway.get_or_create(key).await.unwrap();
        assert_eq!(loader.loads(key), 1);
    }
}

#[tokio::test]
async fn test_selector_reset_credential_reaches_configured_loader() {
    let settings = crate::support::test_settings();

    let signal = SharedSignal::new(EnvironmentSignal::default());
    let loader = Arc::new(ConfiguredLoader::new(
        settings.inference.clone(),
        settings.ocr.clone(),
        signal.clone(),
    ));
    let state = AppState::build(settings, loader, signal).unwrap();

    let before = state.selector.resolve_for(CheckType::Registration).unwrap();
    assert_eq!(before.variant, BackendVariant::Local);

    state.selector.reset(Some((
        OcrMode::Auto,
        EnvironmentSignal::new(Some("sk-new".to_string()), None),
    )));

    let after = state.selector.resolve_for(CheckType::Registration).unwrap();
    assert_eq!(after.variant, BackendVariant::Remote);

    let handle = state
        .gateway
        .get_or_create(ModelKey::new(CheckType::Registration, after.variant))
        .await
        .unwrap();
    assert_eq!(handle.backend().variant(), BackendVariant::Remote);
}
