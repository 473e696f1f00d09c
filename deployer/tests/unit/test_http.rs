//! HTTP control surface tests

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tokio::sync::{watch, Notify};
use tower::ServiceExt;

use iac_deployer::cache::deployments::InMemoryDeploymentStore;
use iac_deployer::deploy::fsm::{DeploymentPhase, DeploymentStatus};
use iac_deployer::deploy::manager::{self, DeploymentManager};
use iac_deployer::server::serve::build_router;
use iac_deployer::server::state::ServerState;

use crate::support::{wait_for_status, Harness, Script, ScriptedExecutor, StubFetcher};

struct TestApp {
    router: Router,
    manager: Arc<DeploymentManager>,
    harness: Harness,
    stopping: watch::Sender<bool>,
}

async fn test_app(executor: ScriptedExecutor, fetcher: StubFetcher) -> TestApp {
    test_app_with(executor, fetcher, manager::Options::default()).await
}

async fn test_app_with(
    executor: ScriptedExecutor,
    fetcher: StubFetcher,
    options: manager::Options,
) -> TestApp {
    let harness = Harness::new(executor, fetcher).await;
    let manager = Arc::new(DeploymentManager::new(
        options,
        Arc::new(InMemoryDeploymentStore::new()),
        harness.worker.clone(),
    ));
    let (stopping, stopping_rx) = watch::channel(false);
    let router = build_router(Arc::new(ServerState::new(manager.clone(), stopping_rx)));
    TestApp {
        router,
        manager,
        harness,
        stopping,
    }
}

fn executor() -> ScriptedExecutor {
    ScriptedExecutor::default()
        .with("init", Script::ok(&["Terraform has been successfully initialized!"]))
        .with("plan", Script::ok(&["Plan: 2 to add, 0 to change, 0 to destroy."]))
        .with("apply", Script::ok(&["Apply complete! Resources: 2 added."]))
}

fn deploy_body(auto_approve: bool) -> Value {
    json!({
        "tool": "tofu",
        "git_url": "https://git.example.com/org/infra.git",
        "git_ref": "main",
        "auto_approve": auto_approve,
    })
}

async fn send(app: &Router, method: &str, path: &str, body: Option<String>) -> (StatusCode, String) {
    let mut builder = Request::builder().method(method).uri(path);
    let body = match body {
        Some(body) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(body)
        }
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&bytes).into_owned())
}

async fn send_json(app: &Router, method: &str, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, text) = send(app, method, path, body.map(|b| b.to_string())).await;
    let value = serde_json::from_str(&text).unwrap_or(Value::Null);
    (status, value)
}

async fn create(app: &TestApp, auto_approve: bool) -> String {
    let (status, body) = send_json(&app.router, "POST", "/deploy", Some(deploy_body(auto_approve))).await;
    assert_eq!(status, StatusCode::ACCEPTED, "create failed: {body}");
    assert_eq!(body["status"], "running");
    body["deployment_id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = test_app(executor(), StubFetcher::default()).await;
    let (status, body) = send_json(&app.router, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "iac-deployer");
    app.harness.cleanup().await;
}

#[tokio::test]
async fn test_create_validation_errors() {
    let app = test_app(executor(), StubFetcher::default()).await;

    let (status, body) = send(&app.router, "POST", "/deploy", Some("{not json".to_string())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = send_json(
        &app.router,
        "POST",
        "/deploy",
        Some(json!({ "tool": "terraform", "git_ref": "main" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("git_url"));

    let mut escaping = deploy_body(true);
    escaping["path"] = json!("../outside");
    let (status, _) = send_json(&app.router, "POST", "/deploy", Some(escaping)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.harness.cleanup().await;
}

#[tokio::test]
async fn test_unknown_deployment_is_404() {
    let app = test_app(executor(), StubFetcher::default()).await;
    for (method, path) in [
        ("GET", "/deploy/nope/status"),
        ("GET", "/deploy/nope/logs"),
        ("POST", "/deploy/nope/approve"),
        ("POST", "/deploy/nope/reject"),
        ("POST", "/deploy/nope/cancel"),
    ] {
        let (status, body) = send_json(&app.router, method, path, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{method} {path}");
        assert!(body["error"].as_str().is_some());
    }
    app.harness.cleanup().await;
}

#[tokio::test]
async fn test_approval_flow_and_log_stream() {
    let app = test_app(executor(), StubFetcher::default()).await;
    let id = create(&app, false).await;
    let handle = app.manager.get(&id).unwrap();

    wait_for_status(&handle, DeploymentStatus::AwaitingApproval).await;
    let (status, body) = send_json(&app.router, "GET", &format!("/deploy/{id}/status"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "awaiting_approval");
    assert_eq!(body["phase"], "plan");
    assert!(body["plan_log"].as_str().unwrap().contains("Plan: 2 to add"));
    assert_eq!(body["apply_log"], "");
    assert!(body.get("ended_at").is_none());

    let (status, body) = send_json(&app.router, "POST", &format!("/deploy/{id}/approve"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deployment_id"], id.as_str());

    let (status, _) = send_json(&app.router, "POST", &format!("/deploy/{id}/reject"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    wait_for_status(&handle, DeploymentStatus::Success).await;
    let (_, body) = send_json(&app.router, "GET", &format!("/deploy/{id}/status"), None).await;
    assert_eq!(body["status"], "success");
    assert_eq!(body["phase"], "completed");
    assert!(body["ended_at"].is_string());
    // OpenTofu selector
    assert_eq!(app.harness.executor.calls()[0].program, "tofu");

    let (status, stream) = send(&app.router, "GET", &format!("/deploy/{id}/logs"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(stream.contains("event: log\ndata: ==> plan\n"));
    assert!(stream.contains("data: Apply complete! Resources: 2 added.\n"));
    assert!(stream.trim_end().ends_with("event: end\ndata: success"));

    let (status, _) = send_json(&app.router, "POST", &format!("/deploy/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    app.harness.cleanup().await;
}

#[tokio::test]
async fn test_decisions_rejected_before_gate() {
    let hold = Arc::new(Notify::new());
    let app = test_app(
        executor(),
        StubFetcher {
            hold: Some(hold.clone()),
            ..Default::default()
        },
    )
    .await;
    let id = create(&app, false).await;
    let handle = app.manager.get(&id).unwrap();

    let (status, _) = send_json(&app.router, "POST", &format!("/deploy/{id}/approve"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send_json(&app.router, "POST", &format!("/deploy/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "cancellation requested");

    hold.notify_one();
    wait_for_status(&handle, DeploymentStatus::Cancelled).await;
    assert!(app.harness.executor.calls().is_empty());
    app.harness.cleanup().await;
}

#[tokio::test]
async fn test_concurrency_ceiling_queues_deployments() {
    let app = test_app_with(
        executor(),
        StubFetcher::default(),
        manager::Options {
            max_concurrent: Some(1),
            ..Default::default()
        },
    )
    .await;

    let first = create(&app, false).await;
    let first = app.manager.get(&first).unwrap();
    wait_for_status(&first, DeploymentStatus::AwaitingApproval).await;

    let second = create(&app, true).await;
    let second = app.manager.get(&second).unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(second.status(), DeploymentStatus::Running);
    assert_eq!(second.snapshot().fsm.phase(), DeploymentPhase::Initializing);

    first.decide(true).unwrap();
    wait_for_status(&first, DeploymentStatus::Success).await;
    wait_for_status(&second, DeploymentStatus::Success).await;
    app.harness.cleanup().await;
}

#[tokio::test]
async fn test_log_stream_ends_on_shutdown() {
    let app = test_app(executor(), StubFetcher::default()).await;
    let id = create(&app, false).await;
    let handle = app.manager.get(&id).unwrap();
    wait_for_status(&handle, DeploymentStatus::AwaitingApproval).await;

    let router = app.router.clone();
    let path = format!("/deploy/{id}/logs");
    let tail = tokio::spawn(async move { send(&router, "GET", &path, None).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!tail.is_finished());

    app.stopping.send_replace(true);
    let (status, stream) = tokio::time::timeout(Duration::from_secs(5), tail)
        .await
        .expect("log stream stayed open after shutdown")
        .unwrap();
    assert_eq!(status, StatusCode::OK);
    assert!(stream.contains("data: ==> awaiting approval\n"));
    assert!(stream.trim_end().ends_with("event: end\ndata: awaiting_approval"));

    // The deployment itself is untouched
    assert_eq!(handle.status(), DeploymentStatus::AwaitingApproval);
    app.harness.cleanup().await;
}

#[tokio::test]
async fn test_slow_log_subscriber_gets_dropped_event() {
    let apply_lines: Vec<String> = (0..20).map(|i| format!("resource {i}: creating...")).collect();
    let apply_lines: Vec<&str> = apply_lines.iter().map(String::as_str).collect();
    let app = test_app_with(
        executor().with("apply", Script::ok(&apply_lines)),
        StubFetcher::default(),
        manager::Options {
            live_capacity: 2,
            ..Default::default()
        },
    )
    .await;
    let id = create(&app, false).await;
    let handle = app.manager.get(&id).unwrap();
    wait_for_status(&handle, DeploymentStatus::AwaitingApproval).await;

    // Subscribe now, read only after the rest of the run has been logged
    let resp = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri(format!("/deploy/{id}/logs"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    app.manager.approve(&id).unwrap();
    wait_for_status(&handle, DeploymentStatus::Success).await;

    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let stream = String::from_utf8_lossy(&bytes);
    assert!(stream.contains("data: ==> plan\n"), "replay missing: {stream}");
    assert!(stream.contains("event: dropped\ndata: "), "no dropped event: {stream}");
    assert!(!stream.contains("data: resource 0: creating...\n"));
    assert!(stream.trim_end().ends_with("event: end\ndata: success"));
    app.harness.cleanup().await;
}

#[tokio::test]
async fn test_worker_panic_fails_deployment() {
    let app = test_app(
        executor().with("init", Script::panic()),
        StubFetcher::default(),
    )
    .await;
    let id = create(&app, true).await;
    let handle = app.manager.get(&id).unwrap();

    wait_for_status(&handle, DeploymentStatus::Failed).await;
    let (_, body) = send_json(&app.router, "GET", &format!("/deploy/{id}/status"), None).await;
    assert_eq!(body["status"], "failed");
    assert!(body["error"].as_str().unwrap().contains("worker aborted"));
    assert!(body["ended_at"].is_string());

    let (_, stream) = send(&app.router, "GET", &format!("/deploy/{id}/logs"), None).await;
    assert!(stream.trim_end().ends_with("event: end\ndata: failed"));

    let (status, _) = send_json(&app.router, "POST", &format!("/deploy/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    app.harness.cleanup().await;
}
