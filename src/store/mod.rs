//! Entity and assignment-history storage with pluggable backends.
//!
//! Supports:
//! - `memory`: In-memory storage (non-persistent, for testing)
//! - `sqlite`: SQLite database shared with the CRUD layer

mod memory;
mod sqlite;

pub use memory::InMemoryRotationStore;
pub use sqlite::SqliteRotationStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;

use crate::rotation::{AssignmentRecord, Task, TaskId, User, UserId};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    Invalid(String),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

pub type SharedRotationStore = Arc<dyn RotationStore>;

/// Everything the engine reads at the start of a cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleSnapshot {
    pub active_user_ids: Vec<UserId>,
    pub tasks: Vec<Task>,
    pub in_progress_load: HashMap<UserId, usize>,
}

/// Mutations buffered during a cycle and committed all at once.
#[derive(Debug, Clone, Default)]
pub struct CycleBatch {
    tasks: Vec<Task>,
    assignments: Vec<AssignmentRecord>,
}

impl CycleBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer the new state of a task, replacing an earlier update for the same id.
    pub fn update_task(&mut self, task: Task) {
        match self.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task,
            None => self.tasks.push(task),
        }
    }

    /// Buffer a history entry for `task_id`.
    pub fn record_assignment(&mut self, task_id: TaskId, user_id: UserId, at: DateTime<Utc>) {
        self.assignments
            .push(AssignmentRecord::new(task_id, user_id, at));
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn assignments(&self) -> &[AssignmentRecord] {
        &self.assignments
    }

    /// Records must point at a task updated in the same batch.
    fn validate(&self) -> Result<(), StoreError> {
        for task in &self.tasks {
            task.check_invariants().map_err(StoreError::Invalid)?;
        }
        let updated: HashSet<TaskId> = self.tasks.iter().map(|t| t.id).collect();
        for record in &self.assignments {
            if !updated.contains(&record.task_id) {
                return Err(StoreError::NotFound(format!(
                    "Task {} referenced by assignment {}",
                    record.task_id, record.id
                )));
            }
        }
        Ok(())
    }
}

/// Trim a user name or task title and reject blanks.
pub fn normalize_label(kind: &str, value: &str) -> Result<String, StoreError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(StoreError::Invalid(format!("{} is required", kind)));
    }
    Ok(trimmed.to_string())
}

/// Key used for case-insensitive uniqueness of names and titles.
pub fn label_key(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Rotation store trait - implemented by all storage backends.
#[async_trait]
pub trait RotationStore: Send + Sync {
    /// Whether this store persists data across restarts.
    fn is_persistent(&self) -> bool;

    /// Short backend name for diagnostics.
    fn backend_name(&self) -> &'static str;

    // === Engine reads ===

    /// Ids of active users, in creation order.
    async fn list_active_user_ids(&self) -> Result<Vec<UserId>, StoreError>;

    /// Tasks that are not completed, in creation order.
    async fn list_non_completed_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// Number of in-progress tasks held by each user.
    async fn in_progress_load(&self) -> Result<HashMap<UserId, usize>, StoreError>;

    /// Distinct users ever assigned to `task_id`.
    async fn distinct_assignees(&self, task_id: TaskId) -> Result<HashSet<UserId>, StoreError>;

    /// Read the cycle inputs. Backends override this to read under a single lock.
    async fn load_snapshot(&self) -> Result<CycleSnapshot, StoreError> {
        Ok(CycleSnapshot {
            active_user_ids: self.list_active_user_ids().await?,
            tasks: self.list_non_completed_tasks().await?,
            in_progress_load: self.in_progress_load().await?,
        })
    }

    // === Engine write ===

    /// Apply every task update and append every record in `batch`, or nothing.
    async fn commit(&self, batch: CycleBatch) -> Result<(), StoreError>;

    // === Boundary operations ===

    async fn create_user(&self, name: &str) -> Result<User, StoreError>;

    async fn set_user_active(&self, id: UserId, is_active: bool) -> Result<User, StoreError>;

    async fn list_users(&self) -> Result<Vec<User>, StoreError>;

    /// Create a waiting task.
    async fn create_task(&self, title: &str) -> Result<Task, StoreError> {
        let title = normalize_label("Title", title)?;
        self.insert_task(Task::new(title)).await
    }

    /// Insert a task in whatever state it carries.
    async fn insert_task(&self, task: Task) -> Result<Task, StoreError>;

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError>;

    /// History of `task_id`, oldest first.
    async fn assignment_history(&self, task_id: TaskId)
        -> Result<Vec<AssignmentRecord>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_batch_replaces_repeated_task_update() {
        let mut batch = CycleBatch::new();
        let mut task = Task::new("T1");
        batch.update_task(task.clone());
        task.assign_to(Uuid::new_v4());
        batch.update_task(task.clone());

        assert_eq!(batch.tasks().len(), 1);
        assert_eq!(batch.tasks()[0], task);
    }

    #[test]
    fn test_batch_rejects_orphan_record() {
        let mut batch = CycleBatch::new();
        batch.record_assignment(Uuid::new_v4(), Uuid::new_v4(), Utc::now());

        assert!(matches!(batch.validate(), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_normalize_label() {
        assert_eq!(normalize_label("Name", "  Alice ").unwrap(), "Alice");
        assert!(matches!(
            normalize_label("Name", "   "),
            Err(StoreError::Invalid(_))
        ));
        assert_eq!(label_key(" ALICE "), "alice");
    }
}
