//! The persisted task snapshot and its fetch bookkeeping.

use crate::task::Task;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Current time at the millisecond precision the snapshot is persisted with.
#[must_use]
pub fn now_millis() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Why the most recent fetch did not produce fresh tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FetchFailure {
    /// No host or credentials configured. Serialized as `"missing-config"`.
    MissingConfig(MissingConfigTag),
    /// The last fetch failed; the message is already human readable.
    Failed {
        #[serde(rename = "failureMessage")]
        failure_message: String,
    },
}

/// Unit marker that (de)serializes as the literal `"missing-config"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MissingConfigTag {
    #[serde(rename = "missing-config")]
    MissingConfig,
}

impl FetchFailure {
    #[must_use]
    pub fn missing_config() -> Self {
        Self::MissingConfig(MissingConfigTag::MissingConfig)
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            failure_message: message.into(),
        }
    }

    #[must_use]
    pub fn is_missing_config(&self) -> bool {
        matches!(self, Self::MissingConfig(_))
    }

    /// Message for the `Failed` case.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::MissingConfig(_) => None,
            Self::Failed { failure_message } => Some(failure_message),
        }
    }
}

/// Last-known task snapshot plus fetch bookkeeping.
///
/// Only the poller's reconcile step produces new values; readers get whole
/// copies. Timestamps move through the transition methods below, which keep
/// `tasks_last_initiated_fetch_timestamp` ahead of the completion stamp while
/// a fetch is in flight and never behind it otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedTasks {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub task_fetch_failure_reason: Option<FetchFailure>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub tasks_last_initiated_fetch_timestamp: Option<DateTime<Utc>>,
    #[serde(default, with = "chrono::serde::ts_milliseconds_option")]
    pub tasks_last_completed_fetch_timestamp: Option<DateTime<Utc>>,
}

impl CachedTasks {
    /// The all-empty record written on first install and on cache clear.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// `true` while a fetch has started and not yet been reconciled.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        match (
            self.tasks_last_initiated_fetch_timestamp,
            self.tasks_last_completed_fetch_timestamp,
        ) {
            (Some(initiated), Some(completed)) => initiated > completed,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// `true` once at least one fetch has completed.
    #[must_use]
    pub fn has_completed_fetch(&self) -> bool {
        self.tasks_last_completed_fetch_timestamp.is_some()
    }

    /// Stamp the start of a fetch; tasks and failure reason are untouched.
    #[must_use]
    pub fn begin_fetch(&self, now: DateTime<Utc>) -> Self {
        let initiated = match self.tasks_last_completed_fetch_timestamp {
            Some(completed) if now <= completed => completed + Duration::milliseconds(1),
            _ => now,
        };
        Self {
            tasks_last_initiated_fetch_timestamp: Some(initiated),
            ..self.clone()
        }
    }

    /// Reconcile a successful fetch.
    #[must_use]
    pub fn complete_with_tasks(&self, tasks: Vec<Task>, now: DateTime<Utc>) -> Self {
        Self {
            tasks,
            task_fetch_failure_reason: None,
            tasks_last_initiated_fetch_timestamp: self.tasks_last_initiated_fetch_timestamp,
            tasks_last_completed_fetch_timestamp: Some(self.completion_stamp(now)),
        }
    }

    /// Reconcile a fetch that found no usable configuration.
    #[must_use]
    pub fn complete_missing_config(&self, now: DateTime<Utc>) -> Self {
        Self {
            tasks: Vec::new(),
            task_fetch_failure_reason: Some(FetchFailure::missing_config()),
            tasks_last_initiated_fetch_timestamp: self.tasks_last_initiated_fetch_timestamp,
            tasks_last_completed_fetch_timestamp: Some(self.completion_stamp(now)),
        }
    }

    /// Reconcile a failed fetch. Previous tasks are kept.
    #[must_use]
    pub fn complete_with_failure(&self, message: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            tasks: self.tasks.clone(),
            task_fetch_failure_reason: Some(FetchFailure::failed(message)),
            tasks_last_initiated_fetch_timestamp: self.tasks_last_initiated_fetch_timestamp,
            tasks_last_completed_fetch_timestamp: Some(self.completion_stamp(now)),
        }
    }

    fn completion_stamp(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.tasks_last_initiated_fetch_timestamp {
            Some(initiated) if now < initiated => initiated,
            _ => now,
        }
    }
}
