//! Versioned command/response/event envelopes exchanged with the extension.

use serde::{Deserialize, Serialize};

/// Contract version for host command/event envelopes.
pub const EVENT_VERSION: u32 = 1;

/// Event emitted after every cache write; payload is the full snapshot.
pub const EVENT_TASKS_CHANGED: &str = "tasks.changed";

/// Event emitted after every settings update; payload is the redacted config.
pub const EVENT_SETTINGS_CHANGED: &str = "settings.changed";

/// Commands the extension can send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandName {
    #[serde(rename = "host.ping")]
    HostPing,
    #[serde(rename = "host.shutdown")]
    HostShutdown,
    #[serde(rename = "tasks.get")]
    TasksGet,
    #[serde(rename = "tasks.refresh")]
    TasksRefresh,
    #[serde(rename = "tasks.clear_cache")]
    TasksClearCache,
    #[serde(rename = "tasks.add")]
    TasksAdd,
    #[serde(rename = "tasks.pause")]
    TasksPause,
    #[serde(rename = "tasks.resume")]
    TasksResume,
    #[serde(rename = "tasks.delete")]
    TasksDelete,
    #[serde(rename = "tasks.view")]
    TasksView,
    #[serde(rename = "settings.get")]
    SettingsGet,
    #[serde(rename = "settings.update")]
    SettingsUpdate,
    #[serde(rename = "links.check")]
    LinksCheck,
}

impl CommandName {
    pub const ALL: [Self; 13] = [
        Self::HostPing,
        Self::HostShutdown,
        Self::TasksGet,
        Self::TasksRefresh,
        Self::TasksClearCache,
        Self::TasksAdd,
        Self::TasksPause,
        Self::TasksResume,
        Self::TasksDelete,
        Self::TasksView,
        Self::SettingsGet,
        Self::SettingsUpdate,
        Self::LinksCheck,
    ];

    /// Render command name to wire format.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HostPing => "host.ping",
            Self::HostShutdown => "host.shutdown",
            Self::TasksGet => "tasks.get",
            Self::TasksRefresh => "tasks.refresh",
            Self::TasksClearCache => "tasks.clear_cache",
            Self::TasksAdd => "tasks.add",
            Self::TasksPause => "tasks.pause",
            Self::TasksResume => "tasks.resume",
            Self::TasksDelete => "tasks.delete",
            Self::TasksView => "tasks.view",
            Self::SettingsGet => "settings.get",
            Self::SettingsUpdate => "settings.update",
            Self::LinksCheck => "links.check",
        }
    }

    /// Parse a command name from wire format.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == raw)
    }
}

/// A versioned response envelope from host -> extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    pub v: u32,
    pub request_id: String,
    pub ok: bool,
    pub payload: serde_json::Value,
    pub error: Option<String>,
}

impl ResponseEnvelope {
    /// Build a successful response envelope.
    #[must_use]
    pub fn ok(request_id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: true,
            payload,
            error: None,
        }
    }

    /// Build an error response envelope.
    #[must_use]
    pub fn error(request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            ok: false,
            payload: serde_json::Value::Null,
            error: Some(message.into()),
        }
    }
}

/// A versioned command envelope from extension -> host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    pub v: u32,
    pub request_id: String,
    pub command: CommandName,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl CommandEnvelope {
    /// Build a v1 command envelope.
    #[must_use]
    pub fn new(
        request_id: impl Into<String>,
        command: CommandName,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            request_id: request_id.into(),
            command,
            payload,
        }
    }

    /// Validate envelope version and required identifiers.
    pub fn validate(&self) -> Result<(), ContractError> {
        if self.v != EVENT_VERSION {
            return Err(ContractError::new(
                ContractErrorKind::UnsupportedVersion,
                format!(
                    "unsupported contract version {}; expected {}",
                    self.v, EVENT_VERSION
                ),
            ));
        }
        if self.request_id.trim().is_empty() {
            return Err(ContractError::new(
                ContractErrorKind::InvalidEnvelope,
                "request_id cannot be empty".to_owned(),
            ));
        }
        Ok(())
    }
}

/// A versioned event envelope from host -> extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub v: u32,
    pub event_id: String,
    pub event: String,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    /// Build a v1 event envelope.
    #[must_use]
    pub fn new(
        event_id: impl Into<String>,
        event: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            v: EVENT_VERSION,
            event_id: event_id.into(),
            event: event.into(),
            payload,
        }
    }
}

/// Contract validation error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContractErrorKind {
    UnsupportedVersion,
    InvalidEnvelope,
}

/// Contract validation error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractError {
    pub kind: ContractErrorKind,
    pub message: String,
}

impl ContractError {
    #[must_use]
    pub fn new(kind: ContractErrorKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl std::fmt::Display for ContractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for ContractError {}
