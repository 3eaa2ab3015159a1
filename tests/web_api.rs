//! Integration tests for the web API against a live printer task

mod common;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{config_with, started};
use http_body_util::BodyExt; // for .collect().await
use krusty_state_notify::web::api::create_router;
use krusty_state_notify::web::printer_channel::serve_requests;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::LocalSet;
use tower::util::ServiceExt; // for `oneshot`

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, payload: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method("POST").uri(uri);
    match payload {
        Some(payload) => builder
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, json)
}

/// Run `test` against a router whose printer task lives on a LocalSet.
async fn with_printer<F, Fut>(test: F)
where
    F: FnOnce(Router) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let local = LocalSet::new();
    local
        .run_until(async move {
            let (tx, rx) = mpsc::channel(8);
            let mut printer = started(config_with(|_| {}));
            let task = tokio::task::spawn_local(async move {
                serve_requests(&mut printer, rx).await;
            });
            test(create_router(tx)).await;
            task.await.unwrap();
        })
        .await;
}

#[tokio::test]
async fn test_status_and_state_command() {
    with_printer(|app| async move {
        let (status, body) = send(&app, get("/api/v1/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"], "active");
        assert_eq!(body["inactive_timeout"], 0.0);

        let (status, body) = send(
            &app,
            post("/api/v1/gcode", Some(json!({ "command": "STATE_NOTIFY_STATE" }))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["responses"], json!(["State Notify state: active"]));
    })
    .await;
}

#[tokio::test]
async fn test_bad_gcode_is_rejected() {
    with_printer(|app| async move {
        let (status, body) = send(&app, post("/api/v1/gcode", Some(json!({ "command": "G28" })))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("G28"));
    })
    .await;
}

#[tokio::test]
async fn test_job_start_moves_to_printing() {
    with_printer(|app| async move {
        let (status, _) = send(
            &app,
            post("/api/v1/job/start", Some(json!({ "file": "benchy.gcode" }))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&app, get("/api/v1/status")).await;
        assert_eq!(body["state"], "printing");

        let (status, _) = send(&app, post("/api/v1/job/pause", None)).await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(&app, get("/api/v1/status")).await;
        assert_eq!(body["state"], "paused");

        // Pausing twice is a job error.
        let (status, _) = send(&app, post("/api/v1/job/pause", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, events) = send(&app, get("/api/v1/events")).await;
        let names: Vec<&str> = events
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|e| e["name"].as_str())
            .collect();
        assert!(names.contains(&"state:printing"));
        assert!(names.contains(&"print-paused"));
    })
    .await;
}

#[tokio::test]
async fn test_posted_events() {
    with_printer(|app| async move {
        let (status, _) = send(&app, post("/api/v1/events/idle-idle", None)).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let (_, body) = send(&app, get("/api/v1/status")).await;
        assert_eq!(body["state"], "idle");

        let (status, _) = send(&app, post("/api/v1/events/state:active", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = send(&app, post("/api/v1/events/not-an-event", None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    })
    .await;
}

#[tokio::test]
async fn test_menu_open_and_close() {
    with_printer(|app| async move {
        let (status, body) = send(&app, post("/api/v1/menu/open", None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["changed"], true);
        let (_, body) = send(&app, post("/api/v1/menu/open", None)).await;
        assert_eq!(body["changed"], false);
        let (_, body) = send(&app, post("/api/v1/menu/close", None)).await;
        assert_eq!(body["changed"], true);
    })
    .await;
}

#[tokio::test]
async fn test_printer_task_gone() {
    let (tx, rx) = mpsc::channel(1);
    drop(rx);
    let app = create_router(tx);
    let (status, body) = send(&app, get("/api/v1/status")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Printer task unavailable");
}
