//! End-to-end tests against an in-process fake provisioning service.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::State;
use axum::routing::post;
use axum::{Form, Json, Router};
use serde_json::{Value, json};
use tokio::sync::watch;

use rallets_cli::api::{RemoteService, ServiceClient, ServiceError};
use rallets_cli::commands;
use rallets_cli::tunnel::ShadowsocksEngine;
use rallets_core::{ClientConfig, Session, SessionStore};

const SESSION_ID: &str = "sid-42";

struct FakeService {
    local_port: u16,
    heartbeats: AtomicUsize,
    /// Heartbeats from this (1-based) call on are rejected.
    expire_at: Option<usize>,
}

fn check_device(form: &HashMap<String, String>) -> Option<Json<Value>> {
    (form.get("DEVICE_TYPE").map(String::as_str) != Some("CLI"))
        .then(|| Json(json!({"ok": false, "message": "missing DEVICE_TYPE"})))
}

async fn login(Form(form): Form<HashMap<String, String>>) -> Json<Value> {
    if let Some(rejected) = check_device(&form) {
        return rejected;
    }
    let user = form.get("username_or_email").map(String::as_str);
    let pass = form.get("login_password").map(String::as_str);
    if user == Some("alice@example.com") && pass == Some("hunter2") {
        Json(json!({"ok": true, "message": "", "session_id": SESSION_ID}))
    } else {
        Json(json!({"ok": false, "message": "Wrong password"}))
    }
}

async fn heartbeat(
    State(state): State<Arc<FakeService>>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    if let Some(rejected) = check_device(&form) {
        return rejected;
    }
    if form.get("VERSION").is_none_or(String::is_empty) {
        return Json(json!({"ok": false, "message": "missing VERSION"}));
    }
    let call = state.heartbeats.fetch_add(1, Ordering::SeqCst) + 1;
    let expired = state.expire_at.is_some_and(|at| call >= at);
    if expired || form.get("session_id").map(String::as_str) != Some(SESSION_ID) {
        return Json(json!({"ok": false, "message": "Session expired"}));
    }
    Json(json!({
        "ok": true,
        "message": "",
        "system_notification": {"show": false},
        "self": {
            "ssconfigs": [
                {"id": "ebf14aed-7d52-4c4b", "port": state.local_port,
                 "method": "chacha20-ietf-poly1305", "server": "127.0.0.1",
                 "server_port": 9, "password": "pw", "remarks": "Tokyo 01",
                 "state": 1, "kcp": false, "fast_open": false},
                {"id": "7b0f1ce4-01aa-4f2e", "port": state.local_port,
                 "method": "chacha20-ietf-poly1305", "server": "127.0.0.1",
                 "server_port": "9", "password": "pw", "remarks": "Hong Kong 02",
                 "state": 1, "kcp": false, "fast_open": false}
            ]
        }
    }))
}

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

async fn fake_service_expiring(local_port: u16, expire_at: Option<usize>) -> String {
    let app = Router::new()
        .route("/login", post(login))
        .route("/rallets_notification", post(heartbeat))
        .with_state(Arc::new(FakeService {
            local_port,
            heartbeats: AtomicUsize::new(0),
            expire_at,
        }));
    serve(app).await
}

async fn fake_service(local_port: u16) -> String {
    fake_service_expiring(local_port, None).await
}

fn client(api_host: &str) -> ServiceClient {
    let config = ClientConfig::default()
        .with_api_host(api_host)
        .with_request_timeout(Duration::from_secs(5));
    ServiceClient::new(config).unwrap()
}

fn store(dir: &tempfile::TempDir) -> SessionStore {
    SessionStore::new(dir.path().join("rallets-cli").join("config.json"))
}

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn login_saves_session_and_lists_roster() {
    let host = fake_service(1080).await;
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let mut out = Vec::new();

    commands::login(&client(&host), &store, "alice@example.com", "hunter2", &mut out)
        .await
        .unwrap();

    assert_eq!(store.load().unwrap().id(), SESSION_ID);
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "ebf14aed Tokyo 01\n7b0f1ce4 Hong Kong 02\n"
    );
}

#[tokio::test]
async fn rejected_login_reports_server_message() {
    let host = fake_service(1080).await;
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    let mut out = Vec::new();

    let err = commands::login(&client(&host), &store, "alice@example.com", "nope", &mut out)
        .await
        .unwrap_err();

    assert!(matches!(
        err.downcast_ref::<ServiceError>(),
        Some(ServiceError::Auth(m)) if m == "Wrong password"
    ));
    assert!(!store.path().exists());
    assert!(out.is_empty());
}

#[tokio::test]
async fn ls_without_session_asks_for_login() {
    let host = fake_service(1080).await;
    let dir = tempfile::tempdir().unwrap();
    let mut out = Vec::new();

    let err = commands::list(&client(&host), &store(&dir), &mut out)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Please login first");
    assert!(matches!(
        err.downcast_ref::<rallets_core::Error>(),
        Some(rallets_core::Error::NotFound(_))
    ));
}

#[tokio::test]
async fn heartbeat_with_stale_session_is_rejected() {
    let host = fake_service(1080).await;
    let err = client(&host)
        .heartbeat(&Session::new("stale"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Auth(ref m) if m == "Session expired"));
}

#[tokio::test]
async fn malformed_body_is_transport_error() {
    let app = Router::new().route("/rallets_notification", post(|| async { "<html>502</html>" }));
    let host = serve(app).await;

    let err = client(&host)
        .heartbeat(&Session::new(SESSION_ID))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Transport(_)));
}

#[tokio::test]
async fn unreachable_service_is_transport_error() {
    let port = free_port().await;
    let err = client(&format!("http://127.0.0.1:{port}"))
        .authenticate("alice@example.com", "hunter2")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Transport(_)));
}

#[tokio::test]
async fn connect_with_unknown_prefix_fails() {
    let host = fake_service(1080).await;
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    store.save(&Session::new(SESSION_ID)).unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let err = commands::connect(
        client(&host),
        &store,
        &ShadowsocksEngine::new("127.0.0.1"),
        "zz",
        &ClientConfig::default(),
        shutdown_rx,
    )
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "Server ID [zz] not found");
}

#[tokio::test]
async fn connect_runs_until_shutdown() {
    let local_port = free_port().await;
    let host = fake_service(local_port).await;
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    store.save(&Session::new(SESSION_ID)).unwrap();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(async move {
        commands::connect(
            client(&host),
            &store,
            &ShadowsocksEngine::new("127.0.0.1"),
            "7b",
            &ClientConfig::default(),
            shutdown_rx,
        )
        .await
    });

    // The listener comes up once the startup heartbeat has been applied.
    let mut bound = false;
    for _ in 0..50 {
        if tokio::net::TcpStream::connect(("127.0.0.1", local_port))
            .await
            .is_ok()
        {
            bound = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(bound, "tunnel listener never came up");

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("connect should stop on shutdown")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn ls_with_stale_session_fails_with_server_message() {
    let host = fake_service(1080).await;
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    store.save(&Session::new("stale")).unwrap();
    let mut out = Vec::new();

    let err = commands::list(&client(&host), &store, &mut out)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "Session expired");
    assert!(out.is_empty());
}

#[tokio::test]
async fn connect_with_stale_session_fails_before_starting_tunnel() {
    let local_port = free_port().await;
    let host = fake_service(local_port).await;
    let dir = tempfile::tempdir().unwrap();
    let store = store(&dir);
    store.save(&Session::new("stale")).unwrap();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);

    let err = commands::connect(
        client(&host),
        &store,
        &ShadowsocksEngine::new("127.0.0.1"),
        "7b",
        &ClientConfig::default(),
        shutdown_rx,
    )
    .await
    .unwrap_err();

    assert_eq!(err.to_string(), "Session expired");
    assert!(
        tokio::net::TcpStream::connect(("127.0.0.1", local_port))
            .await
            .is_err()
    );
}

#[tokio::test]
async fn rejected_poll_heartbeat_ends_connect_with_error() {
    // Repeated: the engine stops at the same moment polling fails.
    for _ in 0..20 {
        let local_port = free_port().await;
        let host = fake_service_expiring(local_port, Some(2)).await;
        let dir = tempfile::tempdir().unwrap();
        let store = store(&dir);
        store.save(&Session::new(SESSION_ID)).unwrap();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = ClientConfig::default().with_heartbeat_interval(Duration::from_millis(20));

        let result = tokio::time::timeout(
            Duration::from_secs(5),
            commands::connect(
                client(&host),
                &store,
                &ShadowsocksEngine::new("127.0.0.1"),
                "7b",
                &config,
                shutdown_rx,
            ),
        )
        .await
        .expect("connect should stop after the rejected heartbeat");

        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "Session expired");
    }
}
