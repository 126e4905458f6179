//! Host command channel and router for the extension bridge.

use crate::actions::{ActionOutcome, TaskActions};
use crate::config::SyncConfig;
use crate::engine::SyncEngine;
use crate::error::{Result, SyncError};
use crate::host::contract::{
    CommandEnvelope, CommandName, EVENT_SETTINGS_CHANGED, EVENT_TASKS_CHANGED, EVENT_VERSION,
    EventEnvelope, ResponseEnvelope,
};
use crate::links::is_download_only_url;
use crate::notify::Unsubscribe;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, warn};

struct HostCommandRequest {
    envelope: CommandEnvelope,
    response_tx: oneshot::Sender<Result<ResponseEnvelope>>,
}

#[derive(Clone)]
pub struct HostCommandClient {
    request_tx: mpsc::Sender<HostCommandRequest>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

impl HostCommandClient {
    pub async fn send(&self, envelope: CommandEnvelope) -> Result<ResponseEnvelope> {
        envelope.validate().map_err(|e| {
            SyncError::Contract(format!(
                "invalid host command envelope {}: {}",
                envelope.request_id, e
            ))
        })?;

        let (response_tx, response_rx) = oneshot::channel();
        self.request_tx
            .send(HostCommandRequest {
                envelope,
                response_tx,
            })
            .await
            .map_err(|e| SyncError::Channel(format!("failed to send host command request: {e}")))?;

        response_rx
            .await
            .map_err(|e| SyncError::Channel(format!("host command response dropped: {e}")))?
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<EventEnvelope> {
        self.event_tx.subscribe()
    }
}

/// Executes commands against the engine and emits events.
pub struct CommandRouter {
    engine: Arc<SyncEngine>,
    event_tx: broadcast::Sender<EventEnvelope>,
}

/// Receives requests from [`HostCommandClient`]s; each request is routed on
/// its own task so a slow mutation does not hold up other commands.
pub struct HostCommandServer {
    request_rx: mpsc::Receiver<HostCommandRequest>,
    router: Arc<CommandRouter>,
    forwarders: Vec<Unsubscribe>,
}

/// Create a connected client/server pair. Cache and settings changes are
/// forwarded as events for as long as the server lives.
///
/// Must be called from within a tokio runtime.
#[must_use]
pub fn command_channel(
    request_capacity: usize,
    event_capacity: usize,
    engine: Arc<SyncEngine>,
) -> (HostCommandClient, HostCommandServer) {
    let (event_tx, _event_rx) = broadcast::channel(event_capacity.max(1));
    let (request_tx, request_rx) = mpsc::channel(request_capacity.max(1));

    let router = Arc::new(CommandRouter {
        engine: Arc::clone(&engine),
        event_tx: event_tx.clone(),
    });

    let tasks_router = Arc::clone(&router);
    let tasks_forwarder = engine.cache().subscribe_with(move |snapshot| {
        match serde_json::to_value(&snapshot) {
            Ok(payload) => tasks_router.emit_event(EVENT_TASKS_CHANGED, payload),
            Err(e) => warn!("cannot serialize task snapshot event: {e}"),
        }
    });
    let settings_router = Arc::clone(&router);
    let settings_forwarder = engine.settings().subscribe_with(move |config| {
        match redacted_settings(&config) {
            Ok(payload) => settings_router.emit_event(EVENT_SETTINGS_CHANGED, payload),
            Err(e) => warn!("cannot serialize settings event: {e}"),
        }
    });

    (
        HostCommandClient {
            request_tx,
            event_tx,
        },
        HostCommandServer {
            request_rx,
            router,
            forwarders: vec![tasks_forwarder, settings_forwarder],
        },
    )
}

impl HostCommandServer {
    pub async fn run(mut self) {
        while let Some(request) = self.request_rx.recv().await {
            let router = Arc::clone(&self.router);
            tokio::spawn(async move {
                let response = router.route(&request.envelope).await;
                let _ = request.response_tx.send(response);
            });
        }
        debug!("host command server stopped");
    }

    #[must_use]
    pub fn router(&self) -> &Arc<CommandRouter> {
        &self.router
    }
}

impl Drop for HostCommandServer {
    fn drop(&mut self) {
        for forwarder in &self.forwarders {
            forwarder.unsubscribe();
        }
    }
}

impl CommandRouter {
    /// Route a command envelope to the appropriate handler.
    pub async fn route(&self, envelope: &CommandEnvelope) -> Result<ResponseEnvelope> {
        debug!(
            command = envelope.command.as_str(),
            request_id = %envelope.request_id,
            "routing host command"
        );
        let payload = match envelope.command {
            CommandName::HostPing => json!({"pong": true, "contract_version": EVENT_VERSION}),
            CommandName::HostShutdown => json!({"accepted": true}),
            CommandName::TasksGet => serde_json::to_value(self.engine.cache().read())?,
            CommandName::TasksRefresh => self.handle_refresh().await?,
            CommandName::TasksClearCache => {
                self.engine.clear_cache()?;
                json!({"cleared": true})
            }
            CommandName::TasksAdd => self.handle_add(&envelope.payload).await?,
            CommandName::TasksPause => {
                let id = parse_task_id(&envelope.payload, "tasks.pause")?;
                let outcome = self.actions("tasks.pause")?.pause_task(&id).await;
                serde_json::to_value(outcome)?
            }
            CommandName::TasksResume => {
                let id = parse_task_id(&envelope.payload, "tasks.resume")?;
                let outcome = self.actions("tasks.resume")?.resume_task(&id).await;
                serde_json::to_value(outcome)?
            }
            CommandName::TasksDelete => {
                let id = parse_task_id(&envelope.payload, "tasks.delete")?;
                let outcome = self.actions("tasks.delete")?.delete_task(&id).await;
                serde_json::to_value(outcome)?
            }
            CommandName::TasksView => self.handle_view()?,
            CommandName::SettingsGet => redacted_settings(&self.engine.settings().current())?,
            CommandName::SettingsUpdate => self.handle_settings_update(&envelope.payload).await?,
            CommandName::LinksCheck => {
                let url = parse_non_empty_field(&envelope.payload, "url", "links.check")?;
                let download_only = is_download_only_url(&url);
                let handle = self.engine.links().should_handle(&url);
                json!({"url": url, "download_only": download_only, "handle": handle})
            }
        };
        Ok(ResponseEnvelope::ok(envelope.request_id.clone(), payload))
    }

    fn actions(&self, command: &str) -> Result<TaskActions> {
        self.engine.actions().ok_or_else(|| {
            SyncError::Mutation(format!(
                "{command} is unavailable: Download Station connection is not configured"
            ))
        })
    }

    async fn handle_refresh(&self) -> Result<Value> {
        let outcome = self.engine.refresh().await;
        Ok(json!({
            "completed": outcome.is_completed(),
            "cycle": outcome.cycle(),
            "tasks": serde_json::to_value(self.engine.cache().read())?,
        }))
    }

    async fn handle_add(&self, payload: &Value) -> Result<Value> {
        let urls = parse_urls(payload)?;
        let destination = parse_optional_string(payload, "destination", "tasks.add")?;
        let outcome: ActionOutcome = self
            .actions("tasks.add")?
            .create_tasks(&urls, destination.as_deref())
            .await;
        Ok(serde_json::to_value(outcome)?)
    }

    fn handle_view(&self) -> Result<Value> {
        let config = self.engine.settings().current();
        Ok(json!({
            "view": serde_json::to_value(self.engine.view())?,
            "station_ui_url": config.station_ui_url(),
            "can_mutate": config.connection.host_url().is_some(),
        }))
    }

    async fn handle_settings_update(&self, payload: &Value) -> Result<Value> {
        let next = merge_settings(&self.engine.settings().current(), payload)?;
        let change = self.engine.update_settings(next).await?;
        Ok(json!({
            "accepted": true,
            "connection_changed": change.connection_changed,
            "link_handling_changed": change.link_handling_changed,
        }))
    }

    fn emit_event(&self, event: &str, payload: Value) {
        let envelope =
            EventEnvelope::new(uuid::Uuid::new_v4().to_string(), event.to_owned(), payload);
        let _ = self.event_tx.send(envelope);
    }
}

/// Settings as sent to the extension: the password is replaced by a flag.
fn redacted_settings(config: &SyncConfig) -> Result<Value> {
    let mut value = serde_json::to_value(config)?;
    if let Some(connection) = value.get_mut("connection").and_then(Value::as_object_mut) {
        connection.remove("password");
        connection.insert(
            "has_password".to_owned(),
            Value::Bool(!config.connection.password.is_empty()),
        );
    }
    Ok(value)
}

/// Apply a partial settings object on top of `current`.
fn merge_settings(current: &SyncConfig, patch: &Value) -> Result<SyncConfig> {
    if !patch.is_object() {
        return Err(SyncError::Contract(
            "settings.update requires an object payload".to_owned(),
        ));
    }
    let mut merged = serde_json::to_value(current)?;
    merge_json(&mut merged, patch);
    serde_json::from_value(merged)
        .map_err(|e| SyncError::Contract(format!("settings.update payload is invalid: {e}")))
}

fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                merge_json(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn parse_task_id(payload: &Value, command: &str) -> Result<String> {
    parse_non_empty_field(payload, "id", command)
}

fn parse_urls(payload: &Value) -> Result<Vec<String>> {
    let urls: Vec<String> = match (payload.get("urls"), payload.get("url")) {
        (Some(Value::Array(items)), _) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_owned)
            .collect(),
        (None, Some(Value::String(url))) if !url.trim().is_empty() => {
            vec![url.trim().to_owned()]
        }
        _ => Vec::new(),
    };
    if urls.is_empty() {
        return Err(SyncError::Contract(
            "tasks.add requires payload.urls (non-empty string array) or payload.url".to_owned(),
        ));
    }
    Ok(urls)
}

fn parse_non_empty_field(payload: &Value, field: &str, command: &str) -> Result<String> {
    let Some(raw) = payload.get(field).and_then(Value::as_str) else {
        return Err(SyncError::Contract(format!(
            "{command} requires payload.{field}"
        )));
    };
    let value = raw.trim();
    if value.is_empty() {
        return Err(SyncError::Contract(format!(
            "{command} requires a non-empty payload.{field}"
        )));
    }
    Ok(value.to_owned())
}

fn parse_optional_string(payload: &Value, field: &str, command: &str) -> Result<Option<String>> {
    match payload.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(raw)) if raw.trim().is_empty() => Ok(None),
        Some(Value::String(raw)) => Ok(Some(raw.trim().to_owned())),
        Some(_) => Err(SyncError::Contract(format!(
            "{command} payload.{field} must be a string when provided"
        ))),
    }
}
