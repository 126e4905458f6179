//! DSM Web API client for Download Station.
//!
//! Connection details are read from the [`SettingsStore`] on every call, so
//! settings updates take effect without rebuilding the client. The session id
//! is cached per host and account and dropped after any session error, in
//! which case the call is retried once with a fresh login.

use crate::remote::{ApiNamespace, FetchOutcome, RemoteFailure, TaskSource, is_session_error};
use crate::settings::SettingsStore;
use crate::task::Task;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

const AUTH_PATH: &str = "/webapi/auth.cgi";
const TASK_PATH: &str = "/webapi/DownloadStation/task.cgi";
const TASK_API: &str = "SYNO.DownloadStation.Task";
const SESSION_NAME: &str = "DownloadStation";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Standard `{success, data, error}` DSM response body.
#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    success: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: i64,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct TaskListData {
    #[serde(default)]
    tasks: Vec<Task>,
}

/// Per-task result entry of pause/resume/delete.
#[derive(Debug, Deserialize)]
struct TaskActionResult {
    #[serde(default)]
    error: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Connection {
    base_url: String,
    username: String,
    password: String,
}

#[derive(Debug, Clone)]
struct Session {
    base_url: String,
    username: String,
    sid: String,
}

/// [`TaskSource`] backed by a Synology DiskStation over HTTP(S).
pub struct SynologyClient {
    settings: Arc<SettingsStore>,
    http: reqwest::Client,
    session: Mutex<Option<Session>>,
}

impl SynologyClient {
    pub fn new(settings: Arc<SettingsStore>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!("falling back to default HTTP client: {e}");
                reqwest::Client::new()
            });
        Self::with_http_client(settings, http)
    }

    pub fn with_http_client(settings: Arc<SettingsStore>, http: reqwest::Client) -> Self {
        Self {
            settings,
            http,
            session: Mutex::new(None),
        }
    }

    fn connection(&self) -> Result<Connection, RemoteFailure> {
        let connection = self.settings.current().connection;
        if !connection.has_credentials() {
            return Err(RemoteFailure::MissingConfig);
        }
        let host_url = connection
            .host_url()
            .ok_or(RemoteFailure::MissingConfig)?;
        let parsed = url::Url::parse(&host_url)
            .map_err(|e| RemoteFailure::Transport(format!("invalid host URL {host_url}: {e}")))?;
        let base_url = parsed.as_str().trim_end_matches('/').to_owned();
        Ok(Connection {
            base_url,
            username: connection.username,
            password: connection.password,
        })
    }

    fn cached_sid(&self, connection: &Connection) -> Option<String> {
        let session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        session
            .as_ref()
            .filter(|s| s.base_url == connection.base_url && s.username == connection.username)
            .map(|s| s.sid.clone())
    }

    fn forget_session(&self) {
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    async fn session_id(&self, connection: &Connection) -> Result<String, RemoteFailure> {
        if let Some(sid) = self.cached_sid(connection) {
            return Ok(sid);
        }

        let params = [
            ("api", "SYNO.API.Auth".to_owned()),
            ("version", "2".to_owned()),
            ("method", "login".to_owned()),
            ("account", connection.username.clone()),
            ("passwd", connection.password.clone()),
            ("session", SESSION_NAME.to_owned()),
            ("format", "sid".to_owned()),
        ];
        let request = self
            .http
            .get(format!("{}{AUTH_PATH}", connection.base_url))
            .query(&params);
        let data = send_api_request(request, ApiNamespace::Auth).await?;
        let login: LoginData = serde_json::from_value(data)
            .map_err(|e| RemoteFailure::Transport(format!("unexpected login response: {e}")))?;

        info!("logged in to {} as {}", connection.base_url, connection.username);
        *self.session.lock().unwrap_or_else(|e| e.into_inner()) = Some(Session {
            base_url: connection.base_url.clone(),
            username: connection.username.clone(),
            sid: login.sid.clone(),
        });
        Ok(login.sid)
    }

    /// Call a `SYNO.DownloadStation.Task` method, re-logging in once if the
    /// cached session turns out to be stale.
    async fn task_call(
        &self,
        method: &str,
        params: &[(&str, String)],
        as_form: bool,
    ) -> Result<serde_json::Value, RemoteFailure> {
        let connection = self.connection()?;

        let first = self.task_call_once(&connection, method, params, as_form).await;
        match first {
            Err(RemoteFailure::Api { code, .. }) if is_session_error(code) => {
                debug!(code, "session rejected; logging in again");
                self.forget_session();
                self.task_call_once(&connection, method, params, as_form)
                    .await
            }
            other => other,
        }
    }

    async fn task_call_once(
        &self,
        connection: &Connection,
        method: &str,
        params: &[(&str, String)],
        as_form: bool,
    ) -> Result<serde_json::Value, RemoteFailure> {
        let sid = self.session_id(connection).await?;
        let mut all_params: Vec<(&str, String)> = vec![
            ("api", TASK_API.to_owned()),
            ("version", "1".to_owned()),
            ("method", method.to_owned()),
        ];
        all_params.extend(params.iter().cloned());
        all_params.push(("_sid", sid));

        let url = format!("{}{TASK_PATH}", connection.base_url);
        let request = if as_form {
            self.http.post(url).form(&all_params)
        } else {
            self.http.get(url).query(&all_params)
        };
        send_api_request(request, ApiNamespace::DownloadStationTask).await
    }

    async fn task_action(&self, method: &str, id: &str) -> Result<(), RemoteFailure> {
        let mut params = vec![("id", id.to_owned())];
        if method == "delete" {
            params.push(("force_complete", "false".to_owned()));
        }
        let data = self.task_call(method, &params, false).await?;
        if data.is_null() {
            return Ok(());
        }

        // Per-task failures arrive inside a successful envelope.
        let results: Vec<TaskActionResult> = serde_json::from_value(data).map_err(|e| {
            warn!(method, "unexpected per-task result: {e}");
            RemoteFailure::Transport(format!("unexpected {method} response: {e}"))
        })?;
        match results.iter().find(|r| r.error != 0) {
            Some(failed) => Err(RemoteFailure::api(
                failed.error,
                ApiNamespace::DownloadStationTask,
            )),
            None => Ok(()),
        }
    }
}

async fn send_api_request(
    request: reqwest::RequestBuilder,
    namespace: ApiNamespace,
) -> Result<serde_json::Value, RemoteFailure> {
    let response = request
        .send()
        .await
        .map_err(|e| RemoteFailure::Transport(format!("request failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(RemoteFailure::Transport(format!(
            "unexpected HTTP status {status}"
        )));
    }

    let envelope: ApiEnvelope = response
        .json()
        .await
        .map_err(|e| RemoteFailure::Transport(format!("malformed API response: {e}")))?;

    if envelope.success {
        Ok(envelope.data.unwrap_or(serde_json::Value::Null))
    } else {
        let code = envelope.error.map_or(100, |e| e.code);
        Err(RemoteFailure::api(code, namespace))
    }
}

#[async_trait]
impl TaskSource for SynologyClient {
    async fn fetch_tasks(&self) -> FetchOutcome {
        let params = [
            ("additional", "transfer,detail".to_owned()),
            ("offset", "0".to_owned()),
            ("limit", "-1".to_owned()),
        ];
        let result = self.task_call("list", &params, false).await.and_then(|data| {
            serde_json::from_value::<TaskListData>(data)
                .map(|list| list.tasks)
                .map_err(|e| RemoteFailure::Transport(format!("unexpected task list: {e}")))
        });
        result.into()
    }

    async fn pause_task(&self, id: &str) -> Result<(), RemoteFailure> {
        self.task_action("pause", id).await
    }

    async fn resume_task(&self, id: &str) -> Result<(), RemoteFailure> {
        self.task_action("resume", id).await
    }

    async fn delete_task(&self, id: &str) -> Result<(), RemoteFailure> {
        self.task_action("delete", id).await
    }

    async fn create_tasks(
        &self,
        urls: &[String],
        destination: Option<&str>,
    ) -> Result<(), RemoteFailure> {
        let mut params = vec![("uri", urls.join(","))];
        if let Some(destination) = destination.filter(|d| !d.trim().is_empty()) {
            params.push(("destination", destination.trim().to_owned()));
        }
        self.task_call("create", &params, true).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncConfig;

    #[tokio::test]
    async fn unconfigured_client_reports_missing_config() {
        let settings = Arc::new(SettingsStore::in_memory(SyncConfig::default()));
        let client = SynologyClient::new(settings);

        assert_eq!(client.fetch_tasks().await, FetchOutcome::MissingConfig);
        assert_eq!(
            client.pause_task("dbid_1").await,
            Err(RemoteFailure::MissingConfig)
        );
    }

    #[tokio::test]
    async fn hostname_without_credentials_is_missing_config() {
        let mut config = SyncConfig::default();
        config.connection.hostname = "nas.local".to_owned();
        let client = SynologyClient::new(Arc::new(SettingsStore::in_memory(config)));

        assert_eq!(client.fetch_tasks().await, FetchOutcome::MissingConfig);
    }
}
