//! HTTP API tests driven through `tower::ServiceExt::oneshot`.

#![cfg(feature = "server")]

mod common;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::Engine;
use common::Fakes;
use serde_json::{json, Value};
use slide2thesis::server::{router, AppState, PipelineFactory};
use slide2thesis::{Pipeline, PipelineConfig, Result};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tower::ServiceExt;

// ── Fixtures ─────────────────────────────────────────────────────────────────

/// Builds pipelines over in-memory collaborators, optionally holding each
/// job until released.
struct FakeFactory {
    pages: usize,
    gate: Option<Arc<Notify>>,
}

#[async_trait]
impl PipelineFactory for FakeFactory {
    async fn create(&self, config: PipelineConfig, workdir: &Path, pdf: &Path) -> Result<Pipeline> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        let fakes = Fakes::new(self.pages);
        Pipeline::with_collaborators(config, workdir, pdf, fakes.collaborators()).await
    }
}

struct Server {
    _tmp: tempfile::TempDir,
    app: Router,
}

fn server(gate: Option<Arc<Notify>>) -> Server {
    let tmp = tempfile::tempdir().unwrap();
    let templates = common::templates(tmp.path());
    let state = AppState::new(tmp.path().join("jobs"), common::config("thesis", &templates, 4))
        .with_factory(Arc::new(FakeFactory { pages: 3, gate }));
    Server {
        app: router(state),
        _tmp: tmp,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::get(uri).body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

async fn post_job(app: &Router, body: Value) -> (StatusCode, Value) {
    let request = Request::post("/api/jobs")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_slice(&body).unwrap())
}

fn upload(filename: &str, bytes: &[u8]) -> Value {
    json!({
        "filename": filename,
        "pdf_base64": base64::engine::general_purpose::STANDARD.encode(bytes),
    })
}

// ── Read-only endpoints ──────────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_ok() {
    let s = server(None);
    let (status, body) = get_json(&s.app, "/api/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn styles_lists_the_registry() {
    let s = server(None);
    let (status, body) = get_json(&s.app, "/api/styles").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|style| style["name"].as_str())
        .collect();
    assert!(names.contains(&"thesis"));
    assert!(names.contains(&"nature"));
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let s = server(None);
    let uri = format!("/api/jobs/{}", uuid::Uuid::new_v4());
    let (status, body) = get_json(&s.app, &uri).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn malformed_job_id_is_a_bad_request() {
    let s = server(None);
    let (status, body) = get_json(&s.app, "/api/jobs/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "BAD_REQUEST");
}

// ── Submission ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn non_pdf_upload_is_rejected() {
    let s = server(None);
    let (status, body) = post_job(&s.app, upload("talk.pptx", b"PK\x03\x04")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"]["message"].as_str().unwrap().contains("talk.pptx"));

    let (status, _) = post_job(&s.app, upload("talk.pdf", b"<html>")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, jobs) = get_json(&s.app, "/api/jobs").await;
    assert_eq!(jobs.as_array().map(Vec::len), Some(0));
}

#[tokio::test]
async fn unknown_style_is_rejected() {
    let s = server(None);
    let mut body = upload("talk.pdf", b"%PDF-1.7");
    body["style"] = json!("poster");
    let (status, _) = post_job(&s.app, body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn download_before_completion_conflicts() {
    let gate = Arc::new(Notify::new());
    let s = server(Some(gate.clone()));
    let (status, body) = post_job(&s.app, upload("talk.pdf", b"%PDF-1.7")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["job_id"].as_str().unwrap().to_string();

    let (status, job) = get_json(&s.app, &format!("/api/jobs/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(job["status"], "created");

    let (status, body) = get_json(&s.app, &format!("/api/jobs/{id}/download")).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "CONFLICT");
    gate.notify_one();
}

#[tokio::test]
async fn submitted_job_completes_and_downloads() {
    let s = server(None);
    let (status, body) = post_job(&s.app, upload("talk.pdf", b"%PDF-1.7")).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["job_id"].as_str().unwrap().to_string();

    let mut job = Value::Null;
    for _ in 0..500 {
        let (_, current) = get_json(&s.app, &format!("/api/jobs/{id}")).await;
        let status = current["status"].as_str().unwrap_or_default().to_string();
        job = current;
        if status == "completed" || status == "failed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(job["status"], "completed", "{job}");
    assert_eq!(job["message"], "Processing completed successfully!");

    let request = Request::get(format!("/api/jobs/{id}/download"))
        .body(Body::empty())
        .unwrap();
    let response = s.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "application/gzip"
    );
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..2], &[0x1f, 0x8b]);

    let (_, jobs) = get_json(&s.app, "/api/jobs").await;
    assert_eq!(jobs.as_array().map(Vec::len), Some(1));
}
