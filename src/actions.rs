//! User-triggered task mutations.
//!
//! [`TaskActions`] only exists while a host URL is configured, so callers
//! hold an `Option<TaskActions>` and cannot mutate an unconfigured station.
//! A successful mutation is followed by exactly one fresh poll before the
//! action resolves; failures leave the cache alone.

use crate::config::SyncConfig;
use crate::poller::Poller;
use crate::remote::{RemoteFailure, TaskSource};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Result of a mutation as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ActionOutcome {
    /// Serialized as the literal `"success"`.
    Success(SuccessTag),
    Failed {
        #[serde(rename = "failMessage")]
        fail_message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SuccessTag {
    #[serde(rename = "success")]
    Success,
}

impl ActionOutcome {
    #[must_use]
    pub fn success() -> Self {
        Self::Success(SuccessTag::Success)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    #[must_use]
    pub fn fail_message(&self) -> Option<&str> {
        match self {
            Self::Success(_) => None,
            Self::Failed { fail_message } => Some(fail_message),
        }
    }
}

/// Mutation capability bound to a configured station.
#[derive(Clone)]
pub struct TaskActions {
    source: Arc<dyn TaskSource>,
    poller: Poller,
}

impl TaskActions {
    /// Capability for `config`, or `None` when no host URL resolves.
    #[must_use]
    pub fn available(
        config: &SyncConfig,
        source: Arc<dyn TaskSource>,
        poller: Poller,
    ) -> Option<Self> {
        config.connection.host_url()?;
        Some(Self { source, poller })
    }

    pub async fn create_tasks(&self, urls: &[String], destination: Option<&str>) -> ActionOutcome {
        info!(count = urls.len(), "creating download tasks");
        let result = self.source.create_tasks(urls, destination).await;
        self.finish("create", result).await
    }

    pub async fn pause_task(&self, id: &str) -> ActionOutcome {
        let result = self.source.pause_task(id).await;
        self.finish("pause", result).await
    }

    pub async fn resume_task(&self, id: &str) -> ActionOutcome {
        let result = self.source.resume_task(id).await;
        self.finish("resume", result).await
    }

    pub async fn delete_task(&self, id: &str) -> ActionOutcome {
        let result = self.source.delete_task(id).await;
        self.finish("delete", result).await
    }

    async fn finish(&self, action: &str, result: Result<(), RemoteFailure>) -> ActionOutcome {
        match result {
            Ok(()) => {
                let refreshed = self.poller.poll_fresh().await;
                if !refreshed.is_completed() {
                    error!(action, "refresh after mutation did not complete");
                }
                ActionOutcome::success()
            }
            Err(failure) => {
                let reason = failure.message();
                error!(action, "API call failed, reason: {reason}");
                ActionOutcome::Failed {
                    fail_message: reason,
                }
            }
        }
    }
}
