//! Remote Task Source: the contract the poller and mutation actions call,
//! plus the DSM Web API implementation of it.

pub mod errors;
pub mod synology;

use crate::task::Task;
use async_trait::async_trait;
use std::fmt;

pub use errors::{ApiNamespace, error_message_from_code, is_session_error};
pub use synology::SynologyClient;

/// Why a remote call did not succeed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteFailure {
    /// No host or credentials are configured.
    MissingConfig,
    /// The API answered with `success: false`.
    Api { code: i64, namespace: ApiNamespace },
    /// The request never produced an API answer.
    Transport(String),
}

impl RemoteFailure {
    #[must_use]
    pub fn api(code: i64, namespace: ApiNamespace) -> Self {
        Self::Api { code, namespace }
    }

    /// Text suitable for showing to the user.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::MissingConfig => "Download Station connection is not configured".to_owned(),
            Self::Api { code, namespace } => error_message_from_code(*code, *namespace),
            Self::Transport(reason) => reason.clone(),
        }
    }
}

impl fmt::Display for RemoteFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message())
    }
}

impl std::error::Error for RemoteFailure {}

impl From<RemoteFailure> for crate::SyncError {
    fn from(failure: RemoteFailure) -> Self {
        Self::Remote(failure.message())
    }
}

/// Result of a task list fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Tasks(Vec<Task>),
    MissingConfig,
    Failed(RemoteFailure),
}

impl From<Result<Vec<Task>, RemoteFailure>> for FetchOutcome {
    fn from(result: Result<Vec<Task>, RemoteFailure>) -> Self {
        match result {
            Ok(tasks) => Self::Tasks(tasks),
            Err(RemoteFailure::MissingConfig) => Self::MissingConfig,
            Err(failure) => Self::Failed(failure),
        }
    }
}

/// Remote Download Station operations.
///
/// Implementations never panic on remote errors; every outcome is data.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn fetch_tasks(&self) -> FetchOutcome;

    async fn pause_task(&self, id: &str) -> Result<(), RemoteFailure>;

    async fn resume_task(&self, id: &str) -> Result<(), RemoteFailure>;

    async fn delete_task(&self, id: &str) -> Result<(), RemoteFailure>;

    /// Create one task per URL, optionally into `destination`.
    async fn create_tasks(
        &self,
        urls: &[String],
        destination: Option<&str>,
    ) -> Result<(), RemoteFailure>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_messages() {
        assert_eq!(
            RemoteFailure::api(119, ApiNamespace::DownloadStationTask).to_string(),
            "SID not found"
        );
        assert_eq!(
            RemoteFailure::Transport("connection refused".to_owned()).message(),
            "connection refused"
        );
    }

    #[test]
    fn missing_config_result_maps_to_outcome() {
        let outcome: FetchOutcome = Err(RemoteFailure::MissingConfig).into();
        assert_eq!(outcome, FetchOutcome::MissingConfig);
        let outcome: FetchOutcome = Ok(Vec::new()).into();
        assert_eq!(outcome, FetchOutcome::Tasks(Vec::new()));
    }

    #[test]
    fn remote_failure_converts_to_sync_error() {
        let err: crate::SyncError = RemoteFailure::api(400, ApiNamespace::Auth).into();
        assert!(matches!(
            err,
            crate::SyncError::Remote(ref m) if m == "No such account or incorrect password"
        ));
    }
}
