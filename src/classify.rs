//! Task categories, visibility filtering and render-free popup view states.

use crate::cache::state::{CachedTasks, FetchFailure};
use crate::config::VisibleTaskSettings;
use crate::task::{Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Display category of a task. Every task has exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Downloading,
    Uploading,
    Completed,
    Errored,
    Other,
}

impl TaskCategory {
    pub const ALL: [Self; 5] = [
        Self::Downloading,
        Self::Uploading,
        Self::Completed,
        Self::Errored,
        Self::Other,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Downloading => "downloading",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Errored => "errored",
            Self::Other => "other",
        }
    }
}

/// Category of `task`. An error detail wins over whatever the status says.
///
/// Seeding is the only state in which a task uploads, so it is the one
/// status that lands in [`TaskCategory::Uploading`].
#[must_use]
pub fn classify(task: &Task) -> TaskCategory {
    if task.error_detail().is_some() {
        return TaskCategory::Errored;
    }
    match task.status {
        TaskStatus::Error => TaskCategory::Errored,
        TaskStatus::Finished => TaskCategory::Completed,
        TaskStatus::Downloading => TaskCategory::Downloading,
        TaskStatus::Seeding => TaskCategory::Uploading,
        TaskStatus::Waiting
        | TaskStatus::Paused
        | TaskStatus::Finishing
        | TaskStatus::HashChecking
        | TaskStatus::FilehostingWaiting
        | TaskStatus::Extracting
        | TaskStatus::Unknown => TaskCategory::Other,
    }
}

/// `true` if `task` falls in `category`.
#[must_use]
pub fn matches_category(task: &Task, category: TaskCategory) -> bool {
    classify(task) == category
}

/// Whether the visibility flag for a category is set.
#[must_use]
pub fn category_enabled(settings: &VisibleTaskSettings, category: TaskCategory) -> bool {
    match category {
        TaskCategory::Downloading => settings.downloading,
        TaskCategory::Uploading => settings.uploading,
        TaskCategory::Completed => settings.completed,
        TaskCategory::Errored => settings.errored,
        TaskCategory::Other => settings.other,
    }
}

#[must_use]
pub fn is_visible(task: &Task, settings: &VisibleTaskSettings) -> bool {
    category_enabled(settings, classify(task))
}

/// Visible tasks ordered by case-insensitive title. The order is stable for
/// titles that compare equal.
#[must_use]
pub fn visible_sorted<'a>(tasks: &'a [Task], settings: &VisibleTaskSettings) -> Vec<&'a Task> {
    let mut visible: Vec<&Task> = tasks.iter().filter(|t| is_visible(t, settings)).collect();
    visible.sort_by_cached_key(|t| t.title.to_lowercase());
    visible
}

/// Status line shown above the task list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HeaderStatus {
    Unconfigured,
    Loading,
    Failed { message: String },
    Updated { at: DateTime<Utc> },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeaderState {
    pub status: HeaderStatus,
    /// A fetch is in flight on top of an earlier completed one.
    pub updating: bool,
}

/// What the task list area shows. The empty cases are kept apart: loading,
/// nothing on the server, and everything filtered away.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskListView {
    Unconfigured,
    Loading,
    NoTasks,
    AllFiltered { total: usize },
    Tasks { visible: Vec<Task>, hidden_count: usize },
}

/// Header and body state for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopupView {
    pub header: HeaderState,
    pub body: TaskListView,
}

#[must_use]
pub fn header_state(state: &CachedTasks) -> HeaderState {
    let status = match (
        &state.task_fetch_failure_reason,
        state.tasks_last_completed_fetch_timestamp,
    ) {
        (Some(FetchFailure::MissingConfig(_)), _) => HeaderStatus::Unconfigured,
        (_, None) => HeaderStatus::Loading,
        (Some(FetchFailure::Failed { failure_message }), Some(_)) => HeaderStatus::Failed {
            message: failure_message.clone(),
        },
        (None, Some(at)) => HeaderStatus::Updated { at },
    };
    let updating = state.has_completed_fetch() && state.is_refreshing();
    HeaderState { status, updating }
}

#[must_use]
pub fn task_list_view(state: &CachedTasks, settings: &VisibleTaskSettings) -> TaskListView {
    if state
        .task_fetch_failure_reason
        .as_ref()
        .is_some_and(FetchFailure::is_missing_config)
    {
        return TaskListView::Unconfigured;
    }
    if !state.has_completed_fetch() {
        return TaskListView::Loading;
    }
    if state.tasks.is_empty() {
        return TaskListView::NoTasks;
    }

    let visible: Vec<Task> = visible_sorted(&state.tasks, settings)
        .into_iter()
        .cloned()
        .collect();
    if visible.is_empty() {
        return TaskListView::AllFiltered {
            total: state.tasks.len(),
        };
    }
    let hidden_count = state.tasks.len() - visible.len();
    TaskListView::Tasks {
        visible,
        hidden_count,
    }
}

#[must_use]
pub fn popup_view(state: &CachedTasks, settings: &VisibleTaskSettings) -> PopupView {
    PopupView {
        header: header_state(state),
        body: task_list_view(state, settings),
    }
}
