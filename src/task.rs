//! Remote-owned download task records.
//!
//! Tasks are replaced wholesale on every successful fetch and never patched
//! field by field, so everything here is plain data.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

/// One Download Station task as reported by the remote API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Identifier, unique per remote instance (e.g. `"dbid_42"`).
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    /// Total size in bytes.
    #[serde(default)]
    pub size: u64,
    /// Transfer kind reported by the server (`bt`, `http`, `ftp`, ...).
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional: Option<TaskAdditional>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_extra: Option<TaskStatusExtra>,
}

/// Optional detail blocks requested with `additional=transfer,detail`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskAdditional {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer: Option<TaskTransfer>,
}

/// Progress counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskTransfer {
    #[serde(default)]
    pub size_downloaded: u64,
    #[serde(default)]
    pub size_uploaded: u64,
    #[serde(default)]
    pub speed_download: u64,
    #[serde(default)]
    pub speed_upload: u64,
}

/// Extra status information; only populated for some states.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusExtra {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl Task {
    /// Minimal task, mostly useful for fixtures.
    pub fn new(id: impl Into<String>, title: impl Into<String>, status: TaskStatus) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status,
            size: 0,
            kind: String::new(),
            username: String::new(),
            additional: None,
            status_extra: None,
        }
    }

    /// Server-side error detail, if the task carries one.
    #[must_use]
    pub fn error_detail(&self) -> Option<&str> {
        self.status_extra
            .as_ref()
            .and_then(|extra| extra.error_detail.as_deref())
            .filter(|detail| !detail.is_empty())
    }

    #[must_use]
    pub fn transfer(&self) -> Option<&TaskTransfer> {
        self.additional
            .as_ref()
            .and_then(|additional| additional.transfer.as_ref())
    }

    /// Downloaded fraction in `0.0..=1.0`; zero-size tasks report `0.0`.
    #[must_use]
    pub fn progress(&self) -> f64 {
        let Some(transfer) = self.transfer() else {
            return 0.0;
        };
        if self.size == 0 {
            return 0.0;
        }
        (transfer.size_downloaded as f64 / self.size as f64).clamp(0.0, 1.0)
    }
}

/// Status reported by the Download Station.
///
/// Newer DSM versions send the string names, older ones send small integer
/// codes; both decode to the same variant. Anything unrecognised becomes
/// [`TaskStatus::Unknown`] so decoding never fails on a new server state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Waiting,
    Downloading,
    Paused,
    Finishing,
    Finished,
    HashChecking,
    Seeding,
    FilehostingWaiting,
    Extracting,
    Error,
    Unknown,
}

impl TaskStatus {
    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Downloading => "downloading",
            Self::Paused => "paused",
            Self::Finishing => "finishing",
            Self::Finished => "finished",
            Self::HashChecking => "hash_checking",
            Self::Seeding => "seeding",
            Self::FilehostingWaiting => "filehosting_waiting",
            Self::Extracting => "extracting",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a string status name.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "waiting" => Self::Waiting,
            "downloading" => Self::Downloading,
            "paused" => Self::Paused,
            "finishing" => Self::Finishing,
            "finished" => Self::Finished,
            "hash_checking" => Self::HashChecking,
            "seeding" => Self::Seeding,
            "filehosting_waiting" => Self::FilehostingWaiting,
            "extracting" => Self::Extracting,
            "error" => Self::Error,
            _ => Self::Unknown,
        }
    }

    /// Map a legacy numeric status code.
    #[must_use]
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::Waiting,
            2 => Self::Downloading,
            3 => Self::Paused,
            4 => Self::Finishing,
            5 => Self::Finished,
            6 => Self::HashChecking,
            7 => Self::Seeding,
            8 => Self::FilehostingWaiting,
            9 => Self::Extracting,
            10 => Self::Error,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum RawStatus {
            Name(String),
            Code(i64),
        }

        Ok(match RawStatus::deserialize(deserializer)? {
            RawStatus::Name(name) => Self::parse(&name),
            RawStatus::Code(code) => Self::from_code(code),
        })
    }
}
