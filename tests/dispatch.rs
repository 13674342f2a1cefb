// ABOUTME: Integration tests for synchronous dispatch against a fake engine.
// ABOUTME: Covers request shape, connection reuse, timeouts, and error classification.

mod support;

use dockwire::api::{ContainerOps, ListContainersOptions, SystemOps};
use dockwire::client::{
    Client, ClientOptions, Command, CommandConfig, Dispatched, Endpoint, Error, Filters,
    RemoteErrorKind, Timeouts,
};
use dockwire::types::ContainerId;
use serde_json::json;
use std::time::Duration;
use support::{FakeEngine, Reply};

async fn ping_engine() -> FakeEngine {
    FakeEngine::start(|req| match req.route() {
        "/_ping" => Reply::Text(200, "OK".into()),
        _ => Reply::error(404, "page not found"),
    })
    .await
}

#[tokio::test]
async fn ping_sends_versioned_path_and_host() {
    support::init_tracing();
    let engine = ping_engine().await;
    let client = engine.client();

    let body = client.ping().await.expect("ping should succeed");

    assert_eq!(body, "OK");
    let req = engine.last_request();
    assert_eq!(req.method, "GET");
    assert_eq!(req.target, "/v1.43/_ping");
    assert_eq!(req.header("host"), Some("localhost"));
}

#[tokio::test]
async fn unversioned_client_uses_bare_paths() {
    let engine = ping_engine().await;
    let client = engine.client_with(ClientOptions {
        api_version: String::new(),
        ..ClientOptions::default()
    });

    client.ping().await.unwrap();

    assert_eq!(engine.last_request().target, "/_ping");
}

#[tokio::test]
async fn sequential_requests_reuse_one_connection() {
    let engine = ping_engine().await;
    let client = engine.client();

    let first = client.dispatch(Command::get("/_ping")).await.unwrap();
    let second = client.dispatch(Command::get("/_ping")).await.unwrap();

    let (Dispatched::Complete(first), Dispatched::Complete(second)) = (first, second) else {
        panic!("ping should complete synchronously");
    };
    assert_eq!(first.connection, second.connection);
    assert_eq!(engine.accepted(), 1);
    assert_eq!(client.pool_stats().opened, 1);
    assert_eq!(client.idle_connections(), vec![second.connection]);
}

#[tokio::test]
async fn force_new_opens_and_closes_a_fresh_connection() {
    let engine = ping_engine().await;
    let client = engine.client();

    client.ping().await.unwrap();
    let pooled = client.idle_connections();

    let config = CommandConfig::builder().force_new(true).build().unwrap();
    let Dispatched::Complete(response) = client
        .dispatch(Command::get("/_ping").config(config))
        .await
        .unwrap()
    else {
        panic!("expected a complete response");
    };

    assert!(!pooled.contains(&response.connection));
    assert_eq!(engine.accepted(), 2);
    // The forced connection is closed; only the original stays parked.
    assert_eq!(client.idle_connections(), pooled);
}

#[tokio::test]
async fn concurrent_requests_use_distinct_connections() {
    let engine = FakeEngine::start(|_| Reply::Stream {
        parts: vec![(Duration::from_millis(100), b"OK".to_vec())],
        end: true,
    })
    .await;
    let client = engine.client();

    let (a, b) = tokio::join!(
        client.dispatch(Command::get("/_ping")),
        client.dispatch(Command::get("/_ping"))
    );

    let (Dispatched::Complete(a), Dispatched::Complete(b)) = (a.unwrap(), b.unwrap()) else {
        panic!("expected complete responses");
    };
    assert_ne!(a.connection, b.connection);
    assert_eq!(engine.accepted(), 2);
}

#[tokio::test]
async fn hung_request_times_out_and_drops_connection() {
    let engine = FakeEngine::start(|_| Reply::Hang).await;
    let client = engine.client();

    let config = CommandConfig::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let err = client
        .dispatch(Command::get("/info").config(config))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Timeout(t) if t == Duration::from_millis(100)));
    assert!(client.idle_connections().is_empty());
}

#[tokio::test]
async fn client_timeouts_apply_when_command_sets_none() {
    let engine = FakeEngine::start(|_| Reply::Hang).await;
    let client = engine.client_with(ClientOptions {
        timeouts: Timeouts {
            request: Duration::from_millis(50),
            ..Timeouts::default()
        },
        ..ClientOptions::default()
    });

    let err = client.info().await.unwrap_err();

    assert!(matches!(err, dockwire::api::ApiError::Client(Error::Timeout(_))));
}

#[tokio::test]
async fn missing_container_is_not_found() {
    let engine = FakeEngine::start(|_| Reply::error(404, "No such container: ghost")).await;
    let client = engine.client();

    let err = client
        .inspect_container(&ContainerId::new("ghost"))
        .await
        .unwrap_err();

    assert_eq!(err.remote_kind(), Some(RemoteErrorKind::NotFound));
    assert!(err.to_string().contains("No such container: ghost"));
    // The error body was consumed, so the connection went back to the pool.
    assert_eq!(client.idle_connections().len(), 1);
}

#[tokio::test]
async fn conflict_on_stopped_container_is_not_running() {
    let engine = FakeEngine::start(|_| {
        Reply::error(409, "Container 4f66ad9a0b2e is not running")
    })
    .await;
    let client = engine.client();

    let err = client
        .kill_container(&ContainerId::new("4f66ad9a0b2e"), None)
        .await
        .unwrap_err();

    assert_eq!(err.remote_kind(), Some(RemoteErrorKind::NotRunning));
}

#[tokio::test]
async fn plain_conflict_stays_conflict() {
    let engine = FakeEngine::start(|_| Reply::error(409, "name already in use")).await;
    let client = engine.client();

    let err = client
        .create_container(Some("web"), json!({"Image": "nginx"}))
        .await
        .unwrap_err();

    assert_eq!(err.remote_kind(), Some(RemoteErrorKind::Conflict));
}

#[tokio::test]
async fn already_started_is_not_modified() {
    let engine = FakeEngine::start(|_| Reply::empty(304)).await;
    let client = engine.client();

    let err = client
        .start_container(&ContainerId::new("web"))
        .await
        .unwrap_err();

    assert_eq!(err.remote_kind(), Some(RemoteErrorKind::NotModified));
}

#[tokio::test]
async fn stop_sends_grace_period_in_seconds() {
    let engine = FakeEngine::start(|_| Reply::empty(204)).await;
    let client = engine.client();

    client
        .stop_container(&ContainerId::new("web"), Some(Duration::from_secs(10)))
        .await
        .unwrap();

    let req = engine.last_request();
    assert_eq!(req.method, "POST");
    assert_eq!(req.route(), "/containers/web/stop");
    assert_eq!(req.query(), "t=10");
}

#[tokio::test]
async fn wait_asks_for_not_running_condition() {
    let engine = FakeEngine::start(|_| Reply::ok_json(json!({"StatusCode": 3}))).await;
    let client = engine.client();

    let result = client
        .wait_container(&ContainerId::new("job"), Some(Duration::from_secs(1)))
        .await
        .unwrap();

    assert_eq!(result.status_code, 3);
    assert_eq!(engine.last_request().query(), "condition=not-running");
}

#[tokio::test]
async fn list_encodes_filters_as_json() {
    let engine = FakeEngine::start(|_| {
        Reply::ok_json(json!([{
            "Id": "4f66ad9a0b2e5c1d",
            "Names": ["/web"],
            "Image": "nginx",
            "State": "running",
            "Status": "Up 2 minutes"
        }]))
    })
    .await;
    let client = engine.client();

    let opts = ListContainersOptions {
        all: true,
        limit: None,
        filters: Filters::new().with("status", "running"),
    };
    let containers = client.list_containers(&opts).await.unwrap();

    assert_eq!(containers.len(), 1);
    assert_eq!(containers[0].name(), "web");
    let req = engine.last_request();
    assert_eq!(req.route(), "/containers/json");
    assert_eq!(
        req.query(),
        format!(
            "all=true&filters={}",
            urlencoding::encode(r#"{"status":["running"]}"#)
        )
    );
}

#[tokio::test]
async fn create_sends_json_body_and_name() {
    let engine =
        FakeEngine::start(|_| Reply::Json(201, json!({"Id": "abc123", "Warnings": []}))).await;
    let client = engine.client();

    let created = client
        .create_container(Some("web"), json!({"Image": "nginx:1.25"}))
        .await
        .unwrap();

    assert_eq!(created.id.as_str(), "abc123");
    let req = engine.last_request();
    assert_eq!(req.query(), "name=web");
    assert_eq!(req.header("content-type"), Some("application/json"));
    let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
    assert_eq!(body, json!({"Image": "nginx:1.25"}));
}

#[tokio::test]
async fn unknown_query_keys_are_dropped() {
    let engine = FakeEngine::start(|_| Reply::empty(204)).await;
    let client = engine.client();

    let query = dockwire::client::Query::new()
        .flag("force", true)
        .flag("bogus", true);
    client
        .dispatch(Command::delete("/containers/web").query(&query, &["force"]))
        .await
        .unwrap();

    assert_eq!(engine.last_request().query(), "force=true");
}

#[tokio::test]
async fn export_redirects_body_to_file() {
    let engine = FakeEngine::start(|_| Reply::Stream {
        parts: vec![
            (Duration::ZERO, b"tar-part-one ".to_vec()),
            (Duration::from_millis(10), b"tar-part-two".to_vec()),
        ],
        end: true,
    })
    .await;
    let client = engine.client();
    let dir = tempfile::tempdir().unwrap();
    let dest = dir.path().join("web.tar");

    let written = client
        .export_container(&ContainerId::new("web"), &dest)
        .await
        .unwrap();

    assert_eq!(written, 25);
    assert_eq!(std::fs::read(&dest).unwrap(), b"tar-part-one tar-part-two");
}

#[tokio::test]
async fn unreachable_socket_is_a_connection_error() {
    let dir = tempfile::tempdir().unwrap();
    let client = Client::new(Endpoint::Unix(dir.path().join("missing.sock")));

    let err = client.dispatch(Command::get("/_ping")).await.unwrap_err();

    assert!(matches!(err, Error::Connection(_)), "got {err:?}");
}

#[tokio::test]
async fn version_decodes_engine_fields() {
    let engine = FakeEngine::start(|_| {
        Reply::ok_json(json!({
            "Version": "24.0.7",
            "ApiVersion": "1.43",
            "MinAPIVersion": "1.12",
            "Os": "linux",
            "Arch": "amd64"
        }))
    })
    .await;

    let version = engine.client().version().await.unwrap();

    assert_eq!(version.version, "24.0.7");
    assert_eq!(version.api_version, "1.43");
    assert_eq!(version.arch, "amd64");
}
