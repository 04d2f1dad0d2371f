//! HTTP API tests driving the router in-process.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use notemerge_core::config::AppConfig;
use notemerge_web::{router, AppState};

// ===========================================================================
// Helpers
// ===========================================================================

fn payload() -> Value {
    json!({
        "merged_text": "Work:\n- Draft",
        "headers": [{
            "header_id": 1,
            "header_name": "Work",
            "conflicts": [{"header_name": "Job"}],
            "bullets": [
                {"bullet_id": 1, "text": "Draft", "conflicts": [{"text": "Draft v2"}]}
            ]
        }]
    })
}

fn app_with(config: AppConfig) -> Router {
    router(Arc::new(AppState::new(config)))
}

fn app() -> Router {
    app_with(AppConfig::default())
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

// ===========================================================================
// Tests
// ===========================================================================

#[tokio::test]
async fn health_check() {
    let (status, body) = send(&app(), "GET", "/api/status/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn full_session_over_http() {
    let app = app();

    let (status, body) = send(&app, "GET", "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "empty");

    let (status, body) = send(&app, "POST", "/api/merge/load", Some(payload())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conflict_count"], 2);

    let (status, body) = send(&app, "GET", "/api/merge/conflicts", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 2);
    assert_eq!(body[0]["kind"], "header");

    let (status, body) = send(
        &app,
        "POST",
        "/api/merge/resolve",
        Some(json!({"type": "bullet", "header_id": 1, "bullet_id": 1,
                    "choice": "incoming", "resolved_text": "Draft v2"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "Work:\n- Draft v2");
    assert_eq!(body["pending"], 1);
    assert_eq!(body["state"], "loaded");

    let (status, body) = send(
        &app,
        "POST",
        "/api/merge/resolve",
        Some(json!({"type": "header", "header_id": 1, "bullet_id": null, "choice": "theirs"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["complete"], true);
    assert_eq!(body["state"], "fully_resolved");

    let (status, body) = send(&app, "GET", "/api/merge/export", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["text"], "Work:\n- Draft v2");
    assert_eq!(body["complete"], true);
    assert_eq!(body["resolutions"][0]["key"]["bullet_id"], Value::Null);
    assert_eq!(body["resolutions"][0]["choice"], "original");
    assert_eq!(body["resolutions"][1]["key"]["bullet_id"], "1");
    assert_eq!(body["resolutions"][1]["choice"], "incoming");

    let (_, body) = send(&app, "GET", "/api/merge", None).await;
    assert_eq!(body["pending"], 0);
    assert_eq!(body["sites"][1]["resolution"]["applied_text"], "Draft v2");
}

#[tokio::test]
async fn error_statuses() {
    let app = app();

    // Nothing loaded yet.
    let (status, _) = send(&app, "GET", "/api/merge/export", None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    // Malformed merge result.
    let (status, body) = send(
        &app,
        "POST",
        "/api/merge/load",
        Some(json!({"merged_text": "x", "headers": [{"header_name": "A", "bullets": []}]})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("header_id"));

    send(&app, "POST", "/api/merge/load", Some(payload())).await;

    // Unknown key.
    let (status, _) = send(
        &app,
        "POST",
        "/api/merge/resolve",
        Some(json!({"type": "header", "header_id": 42, "choice": "both"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Kind contradicts the key.
    let (status, _) = send(
        &app,
        "POST",
        "/api/merge/resolve",
        Some(json!({"type": "bullet", "header_id": 1, "choice": "both"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Alternative outside the default first-only policy.
    let (status, _) = send(
        &app,
        "POST",
        "/api/merge/resolve",
        Some(json!({"type": "bullet", "header_id": 1, "bullet_id": 1,
                    "choice": "incoming", "alternative": 2})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[cfg(unix)]
#[tokio::test]
async fn fetch_runs_producer() {
    let mut config = AppConfig::default();
    config.producer.command = "sh".into();
    config.producer.args = vec!["-c".into(), format!("printf '%s' '{}'", payload())];
    config.producer.output_file = None;
    let app = app_with(config);

    let (status, body) = send(&app, "POST", "/api/merge/fetch", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["conflict_count"], 2);

    let (_, body) = send(&app, "GET", "/api/merge", None).await;
    assert_eq!(body["text"], "Work:\n- Draft");
}

#[cfg(unix)]
#[tokio::test]
async fn failed_fetch_keeps_session() {
    let mut config = AppConfig::default();
    config.producer.command = "sh".into();
    config.producer.args = vec!["-c".into(), "echo nope >&2; exit 1".into()];
    let app = app_with(config);

    send(&app, "POST", "/api/merge/load", Some(payload())).await;
    let (_, before) = send(&app, "GET", "/api/merge", None).await;

    let (status, body) = send(&app, "POST", "/api/merge/fetch", Some(json!({"inputs": ["a.md"]}))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("nope"));

    let (_, after) = send(&app, "GET", "/api/merge", None).await;
    assert_eq!(before["session_id"], after["session_id"]);
}
