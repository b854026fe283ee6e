//! API request and response types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::rotation::{CycleReport, TaskState};

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Storage backend name (`sqlite` / `memory`)
    pub store: String,
    /// Whether data survives a restart
    pub persistent: bool,
    pub max_tasks_per_user: usize,
}

/// A user as shown in the overview.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
}

/// A task with its coverage so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: Uuid,
    pub title: String,
    pub state: TaskState,
    pub current_assignee_id: Option<Uuid>,
    pub previous_assignee_id: Option<Uuid>,
    /// Distinct users that held the task, in order of first assignment
    pub visited_user_ids: Vec<Uuid>,
}

/// Current users and tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverviewResponse {
    pub users: Vec<UserSummary>,
    pub tasks: Vec<TaskSummary>,
}

/// One history entry of a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisitRecord {
    pub user_id: Uuid,
    pub assigned_at: DateTime<Utc>,
}

/// Response of the on-demand trigger.
#[derive(Debug, Clone, Serialize)]
pub struct RunOnceResponse {
    pub report: CycleReport,
    pub overview: OverviewResponse,
}
