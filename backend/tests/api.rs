use std::sync::{Arc, Mutex};

use axum::Router;
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use futures::stream;
use patchpilot_backend::files::Workspace;
use patchpilot_backend::{AppState, build_router};
use patchpilot_core::catalog::{ModelCatalogSource, ModelManager};
use patchpilot_core::config::{CatalogConfig, ProviderDefaults};
use patchpilot_core::{
    Backend, BackendError, BackendKind, ModelSelectionUpdate, ModelSettings, NormalizedEvent,
    ProviderError, RunStream, ToolDescriptor,
};
use serde_json::{Value, json};
use tower::ServiceExt as _;

struct StaticCatalog;

#[async_trait::async_trait]
impl ModelCatalogSource for StaticCatalog {
    async fn fetch_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(vec!["gpt-5".into(), "gpt-5-codex".into()])
    }
}

/// Replays a fixed event list for every run.
struct ScriptedBackend {
    events: Vec<NormalizedEvent>,
    prompts: Mutex<Vec<String>>,
    models: ModelManager,
}

impl ScriptedBackend {
    fn new(events: Vec<NormalizedEvent>) -> Self {
        let defaults = ProviderDefaults {
            model: Some("gpt-5-codex".into()),
            effort: None,
            extra_models: Vec::new(),
        };
        Self {
            events,
            prompts: Mutex::new(Vec::new()),
            models: ModelManager::new(
                BackendKind::Codex,
                &defaults,
                CatalogConfig::default(),
                Arc::new(StaticCatalog),
            ),
        }
    }
}

#[async_trait::async_trait]
impl Backend for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Codex
    }

    async fn stream_run(&self, prompt: &str) -> Result<RunStream, BackendError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let events = self.events.clone().into_iter().map(Ok);
        Ok(RunStream::from_events(Box::pin(stream::iter(events))))
    }

    async fn model_settings(&self) -> ModelSettings {
        self.models.settings().await
    }

    fn update_model_selection(&self, update: &ModelSelectionUpdate) {
        self.models.update_selection(update);
    }
}

struct TestApp {
    router: Router,
    backend: Arc<ScriptedBackend>,
    workspace: tempfile::TempDir,
}

async fn app(events: Vec<NormalizedEvent>) -> TestApp {
    let workspace = tempfile::tempdir().expect("tempdir");
    std::fs::write(workspace.path().join("notes.txt"), "one\n").expect("write");
    let backend = Arc::new(ScriptedBackend::new(events));
    let state = AppState::new(
        backend.clone(),
        Workspace::open(workspace.path()).await.expect("workspace"),
    );
    TestApp {
        router: build_router(state),
        backend,
        workspace,
    }
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(body) => {
            request = request.header("content-type", "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };
    let response = router
        .clone()
        .oneshot(request.body(body).expect("request"))
        .await
        .expect("response");
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, bytes.to_vec())
}

async fn call_json(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, bytes) = call(router, method, uri, body).await;
    (status, serde_json::from_slice(&bytes).expect("json body"))
}

async fn create_run(router: &Router, text: &str) -> String {
    let (status, body) = call_json(router, Method::POST, "/api/send", Some(json!({ "text": text }))).await;
    assert_eq!(status, StatusCode::OK);
    body["runId"].as_str().expect("runId").to_string()
}

fn data_frames(body: &[u8]) -> Vec<Value> {
    String::from_utf8_lossy(body)
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|data| serde_json::from_str(data).expect("frame json"))
        .collect()
}

#[tokio::test]
async fn stream_emits_events_then_done() {
    let app = app(vec![
        NormalizedEvent::status("Working"),
        NormalizedEvent::message("hi"),
    ])
    .await;
    let id = create_run(&app.router, "hello").await;

    let (status, body) = call(&app.router, Method::GET, &format!("/api/stream/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        data_frames(&body),
        vec![
            json!({"type": "status", "text": "Working"}),
            json!({"type": "message", "text": "hi"}),
            json!({"type": "done"}),
        ]
    );
    assert_eq!(app.backend.prompts.lock().unwrap().clone(), vec!["hello".to_string()]);

    let (status, log) = call_json(&app.router, Method::GET, &format!("/api/cmd-log/{id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(log, json!([]));
}

#[tokio::test]
async fn tool_output_and_diff_are_replayable() {
    let tool = ToolDescriptor::from_command_line("cat notes.txt");
    let patch = "--- a/notes.txt\n+++ b/notes.txt\n@@ -1 +1,2 @@\n one\n+two";
    let app = app(vec![
        NormalizedEvent::ToolStart { tool: tool.clone() },
        NormalizedEvent::ToolStdout { text: "ab".into() },
        NormalizedEvent::ToolStdout { text: "c".into() },
        NormalizedEvent::ToolEnd {
            tool,
            exit_code: Some(0),
            status: Some("completed".into()),
        },
        NormalizedEvent::diff(patch),
    ])
    .await;
    let id = create_run(&app.router, "add a line").await;
    let (_, body) = call(&app.router, Method::GET, &format!("/api/stream/{id}"), None).await;
    let tags: Vec<_> = data_frames(&body)
        .iter()
        .map(|frame| frame["type"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(
        tags,
        vec!["tool.start", "tool.stdout", "tool.stdout", "tool.end", "diff", "done"]
    );

    let (_, log) = call_json(&app.router, Method::GET, &format!("/api/cmd-log/{id}"), None).await;
    assert_eq!(log, json!(["$ cat notes.txt", "ab", "c"]));
    let (_, diff) = call_json(&app.router, Method::GET, &format!("/api/last-diff/{id}"), None).await;
    assert_eq!(diff, json!({ "diff": patch }));

    // Reopening the stream starts a fresh transcript.
    call(&app.router, Method::GET, &format!("/api/stream/{id}"), None).await;
    let (_, log) = call_json(&app.router, Method::GET, &format!("/api/cmd-log/{id}"), None).await;
    assert_eq!(log, json!(["$ cat notes.txt", "ab", "c"]));
}

#[tokio::test]
async fn unknown_runs_fail_before_streaming() {
    let app = app(Vec::new()).await;
    let missing = uuid::Uuid::new_v4();
    for uri in [
        format!("/api/stream/{missing}"),
        format!("/api/cmd-log/{missing}"),
        format!("/api/last-diff/{missing}"),
        "/api/stream/not-a-run".to_string(),
    ] {
        let (status, body) = call_json(&app.router, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
        assert!(body["error"].as_str().is_some_and(|e| e.contains("run not found")));
    }
}

#[tokio::test]
async fn empty_prompts_are_rejected() {
    let app = app(Vec::new()).await;
    let (status, body) = call_json(&app.router, Method::POST, "/api/send", Some(json!({ "text": "  " }))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "text is required");
}

#[tokio::test]
async fn malformed_bodies_get_json_errors() {
    let app = app(Vec::new()).await;
    for uri in ["/api/send", "/api/file"] {
        let method = if uri == "/api/send" { Method::POST } else { Method::PUT };
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .expect("request");
        let response = app.router.clone().oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body: Value = serde_json::from_slice(&bytes).expect("json error body");
        assert!(body["error"].is_string(), "{uri}");
    }
}

#[tokio::test]
async fn model_selection_round_trip() {
    let app = app(Vec::new()).await;
    let (status, settings) = call_json(&app.router, Method::GET, "/api/model", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["model"], Value::Null);
    assert_eq!(settings["defaultModel"], "gpt-5-codex");
    assert_eq!(settings["availableModels"], json!(["gpt-5", "gpt-5-codex"]));
    assert_eq!(settings["effortOptions"], json!(["minimal", "low", "medium", "high"]));

    let (_, settings) = call_json(
        &app.router,
        Method::POST,
        "/api/model",
        Some(json!({ "model": "  o3  ", "effort": "HIGH" })),
    )
    .await;
    assert_eq!(settings["model"], "o3");
    assert_eq!(settings["effort"], "high");

    let (_, settings) = call_json(&app.router, Method::POST, "/api/model", Some(json!({ "effort": "bogus" }))).await;
    assert_eq!(settings["effort"], "high");

    let (status, settings) = call_json(&app.router, Method::POST, "/api/model", Some(json!("not an object"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["model"], "o3");

    let (_, settings) = call_json(
        &app.router,
        Method::POST,
        "/api/model",
        Some(json!({ "model": null, "effort": "" })),
    )
    .await;
    assert_eq!(settings["model"], Value::Null);
    assert_eq!(settings["defaultModel"], "gpt-5-codex");
    assert_eq!(settings["effort"], Value::Null);
}

#[tokio::test]
async fn file_browser_stays_inside_the_workspace() {
    let app = app(Vec::new()).await;
    let (status, entries) = call_json(&app.router, Method::GET, "/api/files?path=", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(entries, json!([{ "name": "notes.txt", "kind": "file", "size": 4 }]));

    let (status, file) = call_json(&app.router, Method::GET, "/api/file?path=notes.txt", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(file["content"], "one\n");

    let (status, _) = call_json(
        &app.router,
        Method::PUT,
        "/api/file",
        Some(json!({ "path": "notes.txt", "content": "two\n" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        std::fs::read_to_string(app.workspace.path().join("notes.txt")).expect("read"),
        "two\n"
    );

    let (status, body) = call_json(
        &app.router,
        Method::PUT,
        "/api/file",
        Some(json!({ "path": "../outside.txt", "content": "x" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn apply_requires_a_diff() {
    let app = app(vec![NormalizedEvent::message("nothing to change")]).await;
    let id = create_run(&app.router, "look around").await;
    call(&app.router, Method::GET, &format!("/api/stream/{id}"), None).await;
    let (status, body) = call_json(&app.router, Method::POST, &format!("/api/apply/{id}"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().is_some_and(|e| e.contains("no diff")));
}

#[tokio::test]
async fn health_reports_the_backend() {
    let app = app(Vec::new()).await;
    let (status, body) = call_json(&app.router, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "ok": true, "backend": "codex" }));
}
