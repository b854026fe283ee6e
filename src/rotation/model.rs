//! Users, tasks and assignment history.
//!
//! # Invariants
//! - `state == Waiting` implies `current_assignee_id.is_none()`
//! - `state == InProgress` implies `current_assignee_id.is_some()`
//! - `state == Completed` implies no current assignee and both completion fields set
//! - `current_assignee_id != previous_assignee_id` whenever both are set
//! - a completed task is never mutated again by the engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub type UserId = Uuid;
pub type TaskId = Uuid;

/// A participant that can receive task assignments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    /// Inactive users are taken out of the rotation but keep their history.
    pub is_active: bool,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            is_active: true,
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Waiting,
    InProgress,
    Completed,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::InProgress => "in_progress",
            TaskState::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "waiting" => Ok(TaskState::Waiting),
            "in_progress" => Ok(TaskState::InProgress),
            "completed" => Ok(TaskState::Completed),
            other => Err(format!("unknown task state '{}'", other)),
        }
    }
}

/// A unit of work rotated across users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub state: TaskState,
    pub current_assignee_id: Option<UserId>,
    pub previous_assignee_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Number of active users when the task was retired.
    pub coverage_count_at_completion: Option<u32>,
}

impl Task {
    /// Create a new waiting task.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            state: TaskState::Waiting,
            current_assignee_id: None,
            previous_assignee_id: None,
            created_at: Utc::now(),
            completed_at: None,
            coverage_count_at_completion: None,
        }
    }

    /// Create a task that is already held by `user_id`.
    pub fn in_progress(title: impl Into<String>, user_id: UserId) -> Self {
        Self {
            state: TaskState::InProgress,
            current_assignee_id: Some(user_id),
            ..Self::new(title)
        }
    }

    pub fn with_previous_assignee(mut self, user_id: UserId) -> Self {
        self.previous_assignee_id = Some(user_id);
        self
    }

    pub fn is_completed(&self) -> bool {
        self.state == TaskState::Completed
    }

    /// Hand the task to `user_id`; the current holder becomes the previous one.
    pub fn assign_to(&mut self, user_id: UserId) {
        self.previous_assignee_id = self.current_assignee_id;
        self.current_assignee_id = Some(user_id);
        self.state = TaskState::InProgress;
    }

    /// Release the current holder and park the task until a candidate frees up.
    pub fn park(&mut self) {
        self.previous_assignee_id = self.current_assignee_id;
        self.current_assignee_id = None;
        self.state = TaskState::Waiting;
    }

    /// Retire the task once every active user has covered it.
    pub fn complete(&mut self, at: DateTime<Utc>, active_users: u32) {
        self.previous_assignee_id = self.current_assignee_id;
        self.current_assignee_id = None;
        self.state = TaskState::Completed;
        self.completed_at = Some(at);
        self.coverage_count_at_completion = Some(active_users);
    }

    /// Check the state/assignee invariants listed in the module docs.
    pub fn check_invariants(&self) -> Result<(), String> {
        match self.state {
            TaskState::Waiting if self.current_assignee_id.is_some() => {
                return Err(format!("waiting task {} has a current assignee", self.id));
            }
            TaskState::InProgress if self.current_assignee_id.is_none() => {
                return Err(format!("in-progress task {} has no assignee", self.id));
            }
            TaskState::Completed
                if self.current_assignee_id.is_some()
                    || self.completed_at.is_none()
                    || self.coverage_count_at_completion.is_none() =>
            {
                return Err(format!("completed task {} is missing completion data", self.id));
            }
            _ => {}
        }
        if let (Some(current), Some(previous)) = (self.current_assignee_id, self.previous_assignee_id)
        {
            if current == previous {
                return Err(format!(
                    "task {} is held by its previous assignee {}",
                    self.id, current
                ));
            }
        }
        Ok(())
    }
}

/// One entry of the append-only assignment log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub id: Uuid,
    pub task_id: TaskId,
    pub user_id: UserId,
    pub assigned_at: DateTime<Utc>,
}

impl AssignmentRecord {
    pub fn new(task_id: TaskId, user_id: UserId, assigned_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_id,
            user_id,
            assigned_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_task_is_waiting_and_valid() {
        let task = Task::new("T1");
        assert_eq!(task.state, TaskState::Waiting);
        assert!(task.check_invariants().is_ok());
    }

    #[test]
    fn test_assign_shifts_current_to_previous() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut task = Task::in_progress("T1", a);

        task.assign_to(b);

        assert_eq!(task.state, TaskState::InProgress);
        assert_eq!(task.current_assignee_id, Some(b));
        assert_eq!(task.previous_assignee_id, Some(a));
        assert!(task.check_invariants().is_ok());
    }

    #[test]
    fn test_complete_sets_completion_fields() {
        let a = Uuid::new_v4();
        let mut task = Task::in_progress("T1", a);
        let now = Utc::now();

        task.complete(now, 3);

        assert_eq!(task.state, TaskState::Completed);
        assert_eq!(task.current_assignee_id, None);
        assert_eq!(task.previous_assignee_id, Some(a));
        assert_eq!(task.completed_at, Some(now));
        assert_eq!(task.coverage_count_at_completion, Some(3));
        assert!(task.check_invariants().is_ok());
    }

    #[test]
    fn test_invariant_rejects_repeat_holder() {
        let a = Uuid::new_v4();
        let task = Task::in_progress("T1", a).with_previous_assignee(a);
        assert!(task.check_invariants().is_err());
    }

    #[test]
    fn test_state_string_round_trip() {
        for state in [TaskState::Waiting, TaskState::InProgress, TaskState::Completed] {
            assert_eq!(state.as_str().parse::<TaskState>(), Ok(state));
        }
        assert!("done".parse::<TaskState>().is_err());
    }
}
