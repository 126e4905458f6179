//! DSM Web API contract tests for the Synology task source.
//!
//! These tests verify the exact query/form parameters sent to `auth.cgi` and
//! `task.cgi`, response parsing, error-code mapping, and session retry.

use serde_json::json;
use station_sync::remote::{ApiNamespace, SynologyClient};
use station_sync::settings::SettingsStore;
use station_sync::{FetchOutcome, RemoteFailure, SyncConfig, TaskSource, TaskStatus};
use std::sync::Arc;
use wiremock::matchers::{body_string_contains, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const AUTH: &str = "/webapi/auth.cgi";
const TASK: &str = "/webapi/DownloadStation/task.cgi";

fn client_for(server: &MockServer) -> SynologyClient {
    let address = server.address();
    let mut config = SyncConfig::default();
    config.connection.protocol = "http".to_owned();
    config.connection.hostname = address.ip().to_string();
    config.connection.port = address.port();
    config.connection.username = "admin".to_owned();
    config.connection.password = "hunter2".to_owned();
    SynologyClient::with_http_client(
        Arc::new(SettingsStore::in_memory(config)),
        reqwest::Client::new(),
    )
}

async fn mount_login(server: &MockServer, sid: &str) {
    Mock::given(method("GET"))
        .and(path(AUTH))
        .and(query_param("api", "SYNO.API.Auth"))
        .and(query_param("method", "login"))
        .and(query_param("account", "admin"))
        .and(query_param("passwd", "hunter2"))
        .and(query_param("session", "DownloadStation"))
        .and(query_param("format", "sid"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "data": {"sid": sid}})),
        )
        .mount(server)
        .await;
}

fn task_list_body() -> serde_json::Value {
    json!({
        "success": true,
        "data": {
            "offset": 0,
            "total": 2,
            "tasks": [
                {
                    "id": "dbid_1",
                    "title": "ubuntu.iso",
                    "status": "downloading",
                    "size": 1000,
                    "type": "http",
                    "username": "admin",
                    "additional": {
                        "transfer": {
                            "size_downloaded": 250,
                            "size_uploaded": 0,
                            "speed_download": 100,
                            "speed_upload": 0
                        }
                    }
                },
                {
                    "id": "dbid_2",
                    "title": "broken.torrent",
                    "status": "error",
                    "size": 0,
                    "type": "bt",
                    "username": "admin",
                    "status_extra": {"error_detail": "torrent_duplicate"}
                }
            ]
        }
    })
}

#[tokio::test]
async fn list_sends_sid_and_parses_tasks() {
    let server = MockServer::start().await;
    mount_login(&server, "sid-1").await;

    Mock::given(method("GET"))
        .and(path(TASK))
        .and(query_param("api", "SYNO.DownloadStation.Task"))
        .and(query_param("version", "1"))
        .and(query_param("method", "list"))
        .and(query_param("additional", "transfer,detail"))
        .and(query_param("_sid", "sid-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(task_list_body()))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client_for(&server).fetch_tasks().await;
    let FetchOutcome::Tasks(tasks) = outcome else {
        panic!("expected tasks, got {outcome:?}");
    };
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].status, TaskStatus::Downloading);
    assert!((tasks[0].progress() - 0.25).abs() < f64::EPSILON);
    assert_eq!(tasks[1].status, TaskStatus::Error);
    assert_eq!(tasks[1].error_detail(), Some("torrent_duplicate"));
}

#[tokio::test]
async fn session_is_reused_between_calls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(AUTH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "data": {"sid": "sid-1"}})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TASK))
        .respond_with(ResponseTemplate::new(200).set_body_json(task_list_body()))
        .expect(2)
        .mount(&server)
        .await;

    let client = client_for(&server);
    assert!(matches!(client.fetch_tasks().await, FetchOutcome::Tasks(_)));
    assert!(matches!(client.fetch_tasks().await, FetchOutcome::Tasks(_)));
}

#[tokio::test]
async fn stale_session_logs_in_again_and_retries_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(AUTH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "data": {"sid": "stale"}})),
        )
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;
    mount_login(&server, "fresh").await;

    Mock::given(method("GET"))
        .and(path(TASK))
        .and(query_param("_sid", "stale"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "error": {"code": 119}})),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(TASK))
        .and(query_param("_sid", "fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(task_list_body()))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client_for(&server).fetch_tasks().await;
    assert!(matches!(outcome, FetchOutcome::Tasks(ref tasks) if tasks.len() == 2));
}

#[tokio::test]
async fn persistent_session_error_is_reported() {
    let server = MockServer::start().await;
    mount_login(&server, "sid-1").await;
    Mock::given(method("GET"))
        .and(path(TASK))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "error": {"code": 119}})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let outcome = client_for(&server).fetch_tasks().await;
    assert_eq!(
        outcome,
        FetchOutcome::Failed(RemoteFailure::api(119, ApiNamespace::DownloadStationTask))
    );
}

#[tokio::test]
async fn rejected_login_maps_auth_error_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(AUTH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": false, "error": {"code": 400}})),
        )
        .mount(&server)
        .await;

    let outcome = client_for(&server).fetch_tasks().await;
    let FetchOutcome::Failed(failure) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(failure, RemoteFailure::api(400, ApiNamespace::Auth));
    assert_eq!(failure.message(), "No such account or incorrect password");
}

#[tokio::test]
async fn http_error_status_is_a_transport_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(AUTH))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let outcome = client_for(&server).fetch_tasks().await;
    assert!(matches!(
        outcome,
        FetchOutcome::Failed(RemoteFailure::Transport(ref reason)) if reason.contains("502")
    ));
}

#[tokio::test]
async fn delete_keeps_completed_data() {
    let server = MockServer::start().await;
    mount_login(&server, "sid-1").await;
    Mock::given(method("GET"))
        .and(path(TASK))
        .and(query_param("method", "delete"))
        .and(query_param("id", "dbid_5"))
        .and(query_param("force_complete", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"success": true, "data": [{"error": 0, "id": "dbid_5"}]}),
        ))
        .expect(1)
        .mount(&server)
        .await;

    assert_eq!(client_for(&server).delete_task("dbid_5").await, Ok(()));
}

#[tokio::test]
async fn per_task_error_inside_success_envelope_fails_the_action() {
    let server = MockServer::start().await;
    mount_login(&server, "sid-1").await;
    Mock::given(method("GET"))
        .and(path(TASK))
        .and(query_param("method", "pause"))
        .respond_with(ResponseTemplate::new(200).set_body_json(
            json!({"success": true, "data": [{"error": 405, "id": "dbid_7"}]}),
        ))
        .mount(&server)
        .await;

    let failure = client_for(&server)
        .pause_task("dbid_7")
        .await
        .expect_err("per-task error");
    assert_eq!(failure.message(), "Invalid task action");
}

#[tokio::test]
async fn unreadable_per_task_results_fail_the_action() {
    let server = MockServer::start().await;
    mount_login(&server, "sid-1").await;
    Mock::given(method("GET"))
        .and(path(TASK))
        .and(query_param("method", "resume"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"success": true, "data": "garbage"})),
        )
        .mount(&server)
        .await;

    let failure = client_for(&server)
        .resume_task("dbid_8")
        .await
        .expect_err("unreadable results");
    assert!(
        matches!(failure, RemoteFailure::Transport(_)),
        "got {failure:?}"
    );
}

#[tokio::test]
async fn success_without_per_task_results_is_accepted() {
    let server = MockServer::start().await;
    mount_login(&server, "sid-1").await;
    Mock::given(method("GET"))
        .and(path(TASK))
        .and(query_param("method", "resume"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&server)
        .await;

    assert_eq!(client_for(&server).resume_task("dbid_8").await, Ok(()));
}

#[tokio::test]
async fn create_posts_joined_uris_and_destination() {
    let server = MockServer::start().await;
    mount_login(&server, "sid-1").await;
    Mock::given(method("POST"))
        .and(path(TASK))
        .and(body_string_contains("method=create"))
        .and(body_string_contains(
            "uri=magnet%3A%3Fxt%3Durn%3Abtih%3Aabc%2Chttp%3A%2F%2Fexample.com%2Fa.iso",
        ))
        .and(body_string_contains("destination=downloads"))
        .and(body_string_contains("_sid=sid-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let urls = vec![
        "magnet:?xt=urn:btih:abc".to_owned(),
        "http://example.com/a.iso".to_owned(),
    ];
    let result = client_for(&server)
        .create_tasks(&urls, Some("downloads"))
        .await;
    assert_eq!(result, Ok(()));
}
