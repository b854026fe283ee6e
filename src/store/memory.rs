//! In-memory rotation store (non-persistent).

use super::{
    label_key, normalize_label, CycleBatch, CycleSnapshot, RotationStore, StoreError,
};
use crate::rotation::{AssignmentRecord, Task, TaskId, TaskState, User, UserId};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct MemoryState {
    // Vecs keep creation order so deterministic runs stay reproducible.
    users: Vec<User>,
    tasks: Vec<Task>,
    assignments: Vec<AssignmentRecord>,
}

impl MemoryState {
    fn active_user_ids(&self) -> Vec<UserId> {
        self.users
            .iter()
            .filter(|u| u.is_active)
            .map(|u| u.id)
            .collect()
    }

    fn non_completed_tasks(&self) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|t| !t.is_completed())
            .cloned()
            .collect()
    }

    fn in_progress_load(&self) -> HashMap<UserId, usize> {
        let mut load = HashMap::new();
        for task in &self.tasks {
            if task.state != TaskState::InProgress {
                continue;
            }
            if let Some(user_id) = task.current_assignee_id {
                *load.entry(user_id).or_insert(0) += 1;
            }
        }
        load
    }

    fn task_index(&self, id: TaskId) -> Option<usize> {
        self.tasks.iter().position(|t| t.id == id)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRotationStore {
    state: Arc<RwLock<MemoryState>>,
}

impl InMemoryRotationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RotationStore for InMemoryRotationStore {
    fn is_persistent(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn list_active_user_ids(&self) -> Result<Vec<UserId>, StoreError> {
        Ok(self.state.read().await.active_user_ids())
    }

    async fn list_non_completed_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.state.read().await.non_completed_tasks())
    }

    async fn in_progress_load(&self) -> Result<HashMap<UserId, usize>, StoreError> {
        Ok(self.state.read().await.in_progress_load())
    }

    async fn distinct_assignees(&self, task_id: TaskId) -> Result<HashSet<UserId>, StoreError> {
        let state = self.state.read().await;
        if state.task_index(task_id).is_none() {
            return Err(StoreError::NotFound(format!("Task {}", task_id)));
        }
        Ok(state
            .assignments
            .iter()
            .filter(|a| a.task_id == task_id)
            .map(|a| a.user_id)
            .collect())
    }

    async fn load_snapshot(&self) -> Result<CycleSnapshot, StoreError> {
        let state = self.state.read().await;
        Ok(CycleSnapshot {
            active_user_ids: state.active_user_ids(),
            tasks: state.non_completed_tasks(),
            in_progress_load: state.in_progress_load(),
        })
    }

    async fn commit(&self, batch: CycleBatch) -> Result<(), StoreError> {
        batch.validate()?;
        let mut state = self.state.write().await;

        // Validate everything before touching state so a failure applies nothing.
        let mut positions = Vec::with_capacity(batch.tasks().len());
        for task in batch.tasks() {
            let idx = state
                .task_index(task.id)
                .ok_or_else(|| StoreError::NotFound(format!("Task {}", task.id)))?;
            if state.tasks[idx].is_completed() {
                return Err(StoreError::Conflict(format!(
                    "Task {} was completed since the snapshot",
                    task.id
                )));
            }
            positions.push(idx);
        }

        for (idx, task) in positions.into_iter().zip(batch.tasks()) {
            state.tasks[idx] = task.clone();
        }
        state.assignments.extend(batch.assignments().iter().cloned());
        Ok(())
    }

    async fn create_user(&self, name: &str) -> Result<User, StoreError> {
        let name = normalize_label("Name", name)?;
        let key = label_key(&name);
        let mut state = self.state.write().await;
        if state.users.iter().any(|u| label_key(&u.name) == key) {
            return Err(StoreError::Conflict(format!(
                "User with Name '{}' already exists",
                name
            )));
        }
        let user = User::new(name);
        state.users.push(user.clone());
        Ok(user)
    }

    async fn set_user_active(&self, id: UserId, is_active: bool) -> Result<User, StoreError> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .iter_mut()
            .find(|u| u.id == id)
            .ok_or_else(|| StoreError::NotFound(format!("User {}", id)))?;
        user.is_active = is_active;
        Ok(user.clone())
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        Ok(self.state.read().await.users.clone())
    }

    async fn insert_task(&self, task: Task) -> Result<Task, StoreError> {
        let title = normalize_label("Title", &task.title)?;
        let key = label_key(&title);
        let mut state = self.state.write().await;
        if state.tasks.iter().any(|t| label_key(&t.title) == key) {
            return Err(StoreError::Conflict(format!(
                "Task with Title '{}' already exists",
                title
            )));
        }
        if state.task_index(task.id).is_some() {
            return Err(StoreError::Conflict(format!("Task {} already exists", task.id)));
        }
        let task = Task { title, ..task };
        state.tasks.push(task.clone());
        Ok(task)
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let state = self.state.read().await;
        Ok(state.task_index(id).map(|idx| state.tasks[idx].clone()))
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.state.read().await.tasks.clone())
    }

    async fn assignment_history(
        &self,
        task_id: TaskId,
    ) -> Result<Vec<AssignmentRecord>, StoreError> {
        let state = self.state.read().await;
        let mut records: Vec<AssignmentRecord> = state
            .assignments
            .iter()
            .filter(|a| a.task_id == task_id)
            .cloned()
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        records.sort_by_key(|a| a.assigned_at);
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_names_are_unique_case_insensitive() {
        let store = InMemoryRotationStore::new();
        store.create_user("Alice").await.expect("create user");

        let err = store.create_user("  alice ").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        store.create_task("Deploy").await.expect("create task");
        let err = store.create_task("DEPLOY").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_snapshot_only_counts_active_and_open() {
        let store = InMemoryRotationStore::new();
        let a = store.create_user("A").await.unwrap();
        let b = store.create_user("B").await.unwrap();
        store.set_user_active(b.id, false).await.unwrap();

        store.insert_task(Task::in_progress("T1", a.id)).await.unwrap();
        store.create_task("T2").await.unwrap();
        let mut done = Task::new("T3");
        done.complete(Utc::now(), 2);
        store.insert_task(done).await.unwrap();

        let snapshot = store.load_snapshot().await.unwrap();
        assert_eq!(snapshot.active_user_ids, vec![a.id]);
        assert_eq!(snapshot.tasks.len(), 2);
        assert_eq!(snapshot.in_progress_load.get(&a.id), Some(&1));
    }

    #[tokio::test]
    async fn test_commit_rejects_completed_task_and_applies_nothing() {
        let store = InMemoryRotationStore::new();
        let a = store.create_user("A").await.unwrap();
        let open = store.create_task("Open").await.unwrap();
        let mut done = Task::new("Done");
        done.complete(Utc::now(), 1);
        let done = store.insert_task(done).await.unwrap();

        let mut batch = CycleBatch::new();
        let mut assigned = open.clone();
        assigned.assign_to(a.id);
        batch.update_task(assigned);
        batch.record_assignment(open.id, a.id, Utc::now());
        batch.update_task(done.clone());

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.get_task(open.id).await.unwrap(), Some(open.clone()));
        assert!(store.assignment_history(open.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_distinct_assignees_unknown_task() {
        let store = InMemoryRotationStore::new();
        let err = store
            .distinct_assignees(uuid::Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
