// Integration tests for the control HTTP API

mod common;

use anyhow::Result;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use common::*;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tab_recorder::http::{RecordingStateResponse, StartRecordingResponse};
use tab_recorder::recorder::{SurfaceLauncher, DEFAULT_RECORDER_URL};
use tab_recorder::store::{KeyValueStoreExt, CONFIG_KEY};
use tab_recorder::{create_router, AppState, ControlSurface};
use tower::ServiceExt;

async fn app() -> Result<(Harness, SurfaceLauncher, Router)> {
    let harness = Harness::new();
    harness.store.set_typed(CONFIG_KEY, &fast_config(false, "")).await?;

    let launcher = SurfaceLauncher::new(harness.deps(), DEFAULT_RECORDER_URL);
    let control = ControlSurface::new(
        harness.bus.clone(),
        harness.store.clone(),
        Arc::new(launcher.clone()),
    );
    let router = create_router(AppState::new(control));

    Ok((harness, launcher, router))
}

async fn call(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(&body)?))?,
        None => request.body(Body::empty())?,
    };

    let response = router.clone().oneshot(request).await?;
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };

    Ok((status, value))
}

#[tokio::test]
async fn test_health() -> Result<()> {
    let (_harness, _launcher, router) = app().await?;

    let (status, body) = call(&router, Method::GET, "/health", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("OK".to_string()));

    Ok(())
}

#[tokio::test]
async fn test_recording_state_of_idle_tab() -> Result<()> {
    let (_harness, _launcher, router) = app().await?;

    let (status, body) = call(&router, Method::GET, "/tabs/1/recording", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "tabId": 1, "recording": false, "affordance": "start" }));

    Ok(())
}

#[tokio::test]
async fn test_start_then_stop() -> Result<()> {
    let (harness, launcher, router) = app().await?;

    let (status, body) = call(&router, Method::POST, "/tabs/1/recording/start", None).await?;
    assert_eq!(status, StatusCode::OK);
    let started: StartRecordingResponse = serde_json::from_value(body)?;
    assert_eq!(started.tab_id, TARGET_TAB);

    let (_, body) = call(&router, Method::GET, "/tabs/1/recording", None).await?;
    let state: RecordingStateResponse = serde_json::from_value(body)?;
    assert!(state.recording);

    // A second start is a conflict
    let (status, body) = call(&router, Method::POST, "/tabs/1/recording/start", None).await?;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "Tab 1 is already recording");

    let recorder = started.recorder_tab_id;
    assert!(eventually(Duration::from_secs(5), || launcher.surface(recorder).is_some()).await);
    let (status, body) = call(&router, Method::POST, "/tabs/1/recording/stop", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "tabId": 1, "recording": false }));

    assert!(eventually(Duration::from_secs(5), || harness.tabs.was_closed(recorder)).await);

    Ok(())
}

#[tokio::test]
async fn test_config_get_and_put() -> Result<()> {
    let (_harness, _launcher, router) = app().await?;

    let (status, body) = call(&router, Method::GET, "/config", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["screenshotIntervalSec"], 1);
    assert_eq!(body["streamToServer"], false);

    // Missing fields take their defaults, zero intervals are replaced
    let (status, body) = call(
        &router,
        Method::PUT,
        "/config",
        Some(json!({ "captureAudio": false, "audioBatchIntervalSec": 0 })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["captureAudio"], false);
    assert_eq!(body["audioBatchIntervalSec"], 60);
    assert_eq!(body["screenshotIntervalSec"], 30);
    assert_eq!(body["serverUrl"], "http://localhost:8017");

    let (_, stored) = call(&router, Method::GET, "/config", None).await?;
    assert_eq!(stored, body);

    Ok(())
}

#[tokio::test]
async fn test_screenshot_endpoint() -> Result<()> {
    let (harness, _launcher, router) = app().await?;

    let (status, body) = call(&router, Method::POST, "/tabs/1/screenshot", None).await?;
    assert_eq!(status, StatusCode::OK);
    assert!(body["dataUrl"]
        .as_str()
        .is_some_and(|url| url.starts_with("data:image/png;base64,")));

    harness.debugger.fail_attach.store(true, std::sync::atomic::Ordering::SeqCst);
    let (status, body) = call(&router, Method::POST, "/tabs/1/screenshot", None).await?;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().is_some_and(|e| e.starts_with("Screenshot failed")));

    Ok(())
}

#[tokio::test]
async fn test_bad_tab_id_is_rejected() -> Result<()> {
    let (_harness, _launcher, router) = app().await?;

    let (status, _) = call(&router, Method::GET, "/tabs/not-a-tab/recording", None).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    Ok(())
}
