//! SQLite-based rotation store.
//!
//! The `task_assignments` table is append-only: triggers abort any UPDATE or
//! DELETE against it.

use super::{
    label_key, normalize_label, CycleBatch, CycleSnapshot, RotationStore, StoreError,
};
use crate::rotation::{AssignmentRecord, Task, TaskId, User, UserId};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

const SCHEMA: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    name_key TEXT NOT NULL UNIQUE,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY NOT NULL,
    title TEXT NOT NULL,
    title_key TEXT NOT NULL UNIQUE,
    state TEXT NOT NULL DEFAULT 'waiting',
    current_assignee_id TEXT,
    previous_assignee_id TEXT,
    created_at TEXT NOT NULL,
    completed_at TEXT,
    coverage_count_at_completion INTEGER
);

CREATE INDEX IF NOT EXISTS idx_tasks_state ON tasks(state);

CREATE TABLE IF NOT EXISTS task_assignments (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    task_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    assigned_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_assignments_task ON task_assignments(task_id, assigned_at);

CREATE TRIGGER IF NOT EXISTS task_assignments_no_update
BEFORE UPDATE ON task_assignments
BEGIN
    SELECT RAISE(ABORT, 'task_assignments is append-only');
END;

CREATE TRIGGER IF NOT EXISTS task_assignments_no_delete
BEFORE DELETE ON task_assignments
BEGIN
    SELECT RAISE(ABORT, 'task_assignments is append-only');
END;
"#;

const TASK_COLUMNS: &str = "id, title, state, current_assignee_id, previous_assignee_id, \
                            created_at, completed_at, coverage_count_at_completion";

pub struct SqliteRotationStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRotationStore {
    pub async fn new(base_dir: PathBuf) -> Result<Self, StoreError> {
        let db_path = base_dir.join("rotation.db");

        tokio::fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to create data dir: {}", e)))?;

        let path = db_path.clone();
        let conn = tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path).map_err(|e| {
                StoreError::Backend(format!("Failed to open SQLite database: {}", e))
            })?;
            conn.execute_batch(SCHEMA)
                .map_err(|e| StoreError::Backend(format!("Failed to run schema: {}", e)))?;
            Ok::<_, StoreError>(conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("Task join error: {}", e)))??;

        tracing::info!("Rotation store opened at {}", db_path.display());

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.blocking_lock();
            f(&mut conn)
        })
        .await
        .map_err(|e| StoreError::Backend(format!("Task join error: {}", e)))?
    }
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn format_time(at: &DateTime<Utc>) -> String {
    // Fixed width keeps lexical order equal to chronological order.
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        msg.into(),
    )
}

fn uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn opt_uuid_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Uuid>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|e| conversion_error(idx, e.to_string())))
        .transpose()
}

fn time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e.to_string()))
}

fn opt_time_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|e| conversion_error(idx, e.to_string()))
    })
    .transpose()
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: uuid_at(row, 0)?,
        name: row.get(1)?,
        is_active: row.get::<_, i32>(2)? != 0,
    })
}

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<Task> {
    let state: String = row.get(2)?;
    Ok(Task {
        id: uuid_at(row, 0)?,
        title: row.get(1)?,
        state: state.parse().map_err(|e: String| conversion_error(2, e))?,
        current_assignee_id: opt_uuid_at(row, 3)?,
        previous_assignee_id: opt_uuid_at(row, 4)?,
        created_at: time_at(row, 5)?,
        completed_at: opt_time_at(row, 6)?,
        coverage_count_at_completion: row
            .get::<_, Option<i64>>(7)?
            .map(|c| u32::try_from(c).map_err(|e| conversion_error(7, e.to_string())))
            .transpose()?,
    })
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<AssignmentRecord> {
    Ok(AssignmentRecord {
        id: uuid_at(row, 0)?,
        task_id: uuid_at(row, 1)?,
        user_id: uuid_at(row, 2)?,
        assigned_at: time_at(row, 3)?,
    })
}

fn query_active_user_ids(conn: &Connection) -> Result<Vec<UserId>, StoreError> {
    let mut stmt = conn
        .prepare("SELECT id FROM users WHERE is_active = 1 ORDER BY rowid")
        .map_err(backend)?;
    let ids = stmt
        .query_map([], |row| uuid_at(row, 0))
        .map_err(backend)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(backend)?;
    Ok(ids)
}

fn query_non_completed_tasks(conn: &Connection) -> Result<Vec<Task>, StoreError> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {} FROM tasks WHERE state != 'completed' ORDER BY rowid",
            TASK_COLUMNS
        ))
        .map_err(backend)?;
    let tasks = stmt
        .query_map([], task_from_row)
        .map_err(backend)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(backend)?;
    Ok(tasks)
}

fn query_in_progress_load(conn: &Connection) -> Result<HashMap<UserId, usize>, StoreError> {
    let mut stmt = conn
        .prepare(
            "SELECT current_assignee_id, COUNT(*) FROM tasks
             WHERE state = 'in_progress' AND current_assignee_id IS NOT NULL
             GROUP BY current_assignee_id",
        )
        .map_err(backend)?;
    let load = stmt
        .query_map([], |row| {
            let count: i64 = row.get(1)?;
            let count = usize::try_from(count).map_err(|e| conversion_error(1, e.to_string()))?;
            Ok((uuid_at(row, 0)?, count))
        })
        .map_err(backend)?
        .collect::<Result<HashMap<_, _>, _>>()
        .map_err(backend)?;
    Ok(load)
}

fn query_task(conn: &Connection, id: &str) -> Result<Option<Task>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM tasks WHERE id = ?1", TASK_COLUMNS),
        params![id],
        task_from_row,
    )
    .optional()
    .map_err(backend)
}

#[async_trait]
impl RotationStore for SqliteRotationStore {
    fn is_persistent(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }

    async fn list_active_user_ids(&self) -> Result<Vec<UserId>, StoreError> {
        self.with_conn(|conn| query_active_user_ids(conn)).await
    }

    async fn list_non_completed_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.with_conn(|conn| query_non_completed_tasks(conn)).await
    }

    async fn in_progress_load(&self) -> Result<HashMap<UserId, usize>, StoreError> {
        self.with_conn(|conn| query_in_progress_load(conn)).await
    }

    async fn distinct_assignees(&self, task_id: TaskId) -> Result<HashSet<UserId>, StoreError> {
        let id = task_id.to_string();
        self.with_conn(move |conn| {
            if query_task(conn, &id)?.is_none() {
                return Err(StoreError::NotFound(format!("Task {}", id)));
            }
            let mut stmt = conn
                .prepare("SELECT DISTINCT user_id FROM task_assignments WHERE task_id = ?1")
                .map_err(backend)?;
            let users = stmt
                .query_map(params![id], |row| uuid_at(row, 0))
                .map_err(backend)?
                .collect::<Result<HashSet<_>, _>>()
                .map_err(backend)?;
            Ok(users)
        })
        .await
    }

    async fn load_snapshot(&self) -> Result<CycleSnapshot, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.transaction().map_err(backend)?;
            let snapshot = CycleSnapshot {
                active_user_ids: query_active_user_ids(&tx)?,
                tasks: query_non_completed_tasks(&tx)?,
                in_progress_load: query_in_progress_load(&tx)?,
            };
            tx.commit().map_err(backend)?;
            Ok(snapshot)
        })
        .await
    }

    async fn commit(&self, batch: CycleBatch) -> Result<(), StoreError> {
        batch.validate()?;
        self.with_conn(move |conn| {
            // Dropping the transaction on any early return rolls everything back.
            let tx = conn.transaction().map_err(backend)?;

            for task in batch.tasks() {
                let id = task.id.to_string();
                let stored_state: Option<String> = tx
                    .query_row(
                        "SELECT state FROM tasks WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()
                    .map_err(backend)?;
                match stored_state.as_deref() {
                    None => return Err(StoreError::NotFound(format!("Task {}", id))),
                    Some("completed") => {
                        return Err(StoreError::Conflict(format!(
                            "Task {} was completed since the snapshot",
                            id
                        )))
                    }
                    Some(_) => {}
                }

                tx.execute(
                    "UPDATE tasks SET state = ?2, current_assignee_id = ?3,
                            previous_assignee_id = ?4, completed_at = ?5,
                            coverage_count_at_completion = ?6
                     WHERE id = ?1",
                    params![
                        id,
                        task.state.as_str(),
                        task.current_assignee_id.map(|u| u.to_string()),
                        task.previous_assignee_id.map(|u| u.to_string()),
                        task.completed_at.as_ref().map(format_time),
                        task.coverage_count_at_completion.map(|c| c as i64),
                    ],
                )
                .map_err(backend)?;
            }

            for record in batch.assignments() {
                tx.execute(
                    "INSERT INTO task_assignments (id, task_id, user_id, assigned_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![
                        record.id.to_string(),
                        record.task_id.to_string(),
                        record.user_id.to_string(),
                        format_time(&record.assigned_at),
                    ],
                )
                .map_err(backend)?;
            }

            tx.commit().map_err(backend)
        })
        .await
    }

    async fn create_user(&self, name: &str) -> Result<User, StoreError> {
        let user = User::new(normalize_label("Name", name)?);
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO users (id, name, name_key, is_active) VALUES (?1, ?2, ?3, 1)",
                params![user.id.to_string(), user.name, label_key(&user.name)],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!("User with Name '{}' already exists", user.name))
                } else {
                    backend(e)
                }
            })?;
            Ok(user)
        })
        .await
    }

    async fn set_user_active(&self, id: UserId, is_active: bool) -> Result<User, StoreError> {
        self.with_conn(move |conn| {
            let id_str = id.to_string();
            let changed = conn
                .execute(
                    "UPDATE users SET is_active = ?2 WHERE id = ?1",
                    params![id_str, is_active as i32],
                )
                .map_err(backend)?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("User {}", id)));
            }
            conn.query_row(
                "SELECT id, name, is_active FROM users WHERE id = ?1",
                params![id_str],
                user_from_row,
            )
            .map_err(backend)
        })
        .await
    }

    async fn list_users(&self) -> Result<Vec<User>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT id, name, is_active FROM users ORDER BY rowid")
                .map_err(backend)?;
            let users = stmt
                .query_map([], user_from_row)
                .map_err(backend)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;
            Ok(users)
        })
        .await
    }

    async fn insert_task(&self, task: Task) -> Result<Task, StoreError> {
        let title = normalize_label("Title", &task.title)?;
        let task = Task { title, ..task };
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO tasks (id, title, title_key, state, current_assignee_id,
                                    previous_assignee_id, created_at, completed_at,
                                    coverage_count_at_completion)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    task.id.to_string(),
                    task.title,
                    label_key(&task.title),
                    task.state.as_str(),
                    task.current_assignee_id.map(|u| u.to_string()),
                    task.previous_assignee_id.map(|u| u.to_string()),
                    format_time(&task.created_at),
                    task.completed_at.as_ref().map(format_time),
                    task.coverage_count_at_completion.map(|c| c as i64),
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    StoreError::Conflict(format!("Task with Title '{}' already exists", task.title))
                } else {
                    backend(e)
                }
            })?;
            Ok(task)
        })
        .await
    }

    async fn get_task(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        let id = id.to_string();
        self.with_conn(move |conn| query_task(conn, &id)).await
    }

    async fn list_tasks(&self) -> Result<Vec<Task>, StoreError> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {} FROM tasks ORDER BY rowid", TASK_COLUMNS))
                .map_err(backend)?;
            let tasks = stmt
                .query_map([], task_from_row)
                .map_err(backend)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;
            Ok(tasks)
        })
        .await
    }

    async fn assignment_history(
        &self,
        task_id: TaskId,
    ) -> Result<Vec<AssignmentRecord>, StoreError> {
        let id = task_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT id, task_id, user_id, assigned_at FROM task_assignments
                     WHERE task_id = ?1
                     ORDER BY assigned_at ASC, seq ASC",
                )
                .map_err(backend)?;
            let records = stmt
                .query_map(params![id], record_from_row)
                .map_err(backend)?
                .collect::<Result<Vec<_>, _>>()
                .map_err(backend)?;
            Ok(records)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::TaskState;

    async fn open_store() -> (tempfile::TempDir, SqliteRotationStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SqliteRotationStore::new(dir.path().to_path_buf())
            .await
            .expect("open store");
        (dir, store)
    }

    #[tokio::test]
    async fn test_task_round_trip_preserves_fields() {
        let (_dir, store) = open_store().await;
        let a = store.create_user("A").await.unwrap();
        let b = store.create_user("B").await.unwrap();

        let task = Task::in_progress("Review", a.id).with_previous_assignee(b.id);
        let inserted = store.insert_task(task).await.unwrap();
        let loaded = store.get_task(inserted.id).await.unwrap().expect("task exists");

        assert_eq!(loaded.state, TaskState::InProgress);
        assert_eq!(loaded.current_assignee_id, Some(a.id));
        assert_eq!(loaded.previous_assignee_id, Some(b.id));
        assert_eq!(
            format_time(&loaded.created_at),
            format_time(&inserted.created_at)
        );
    }

    #[tokio::test]
    async fn test_unique_labels_are_case_insensitive() {
        let (_dir, store) = open_store().await;
        store.create_user("Alice").await.unwrap();
        let err = store.create_user("ALICE").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        store.create_task("Deploy").await.unwrap();
        let err = store.create_task(" deploy ").await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_commit_persists_batch_and_history_order() {
        let (dir, store) = open_store().await;
        let a = store.create_user("A").await.unwrap();
        let b = store.create_user("B").await.unwrap();
        let task = store.create_task("T1").await.unwrap();

        let first_at = Utc::now();
        let mut batch = CycleBatch::new();
        let mut updated = task.clone();
        updated.assign_to(a.id);
        batch.update_task(updated.clone());
        batch.record_assignment(task.id, a.id, first_at);
        store.commit(batch).await.unwrap();

        let mut batch = CycleBatch::new();
        updated.assign_to(b.id);
        batch.update_task(updated.clone());
        batch.record_assignment(task.id, b.id, first_at + chrono::Duration::seconds(1));
        store.commit(batch).await.unwrap();

        let history = store.assignment_history(task.id).await.unwrap();
        let users: Vec<UserId> = history.iter().map(|r| r.user_id).collect();
        assert_eq!(users, vec![a.id, b.id]);

        let load = store.in_progress_load().await.unwrap();
        assert_eq!(load.get(&b.id), Some(&1));
        assert_eq!(load.get(&a.id), None);

        // Reopen to make sure everything hit disk.
        drop(store);
        let reopened = SqliteRotationStore::new(dir.path().to_path_buf())
            .await
            .unwrap();
        let visited = reopened.distinct_assignees(task.id).await.unwrap();
        assert_eq!(visited.len(), 2);
    }

    #[tokio::test]
    async fn test_commit_rolls_back_on_completed_task() {
        let (_dir, store) = open_store().await;
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
        batch.update_task(done);

        let err = store.commit(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let reloaded = store.get_task(open.id).await.unwrap().unwrap();
        assert_eq!(reloaded.state, TaskState::Waiting);
        assert!(store.assignment_history(open.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_rejects_updates() {
        let (_dir, store) = open_store().await;
        let a = store.create_user("A").await.unwrap();
        let task = store.create_task("T1").await.unwrap();

        let mut batch = CycleBatch::new();
        let mut updated = task.clone();
        updated.assign_to(a.id);
        batch.update_task(updated);
        batch.record_assignment(task.id, a.id, Utc::now());
        store.commit(batch).await.unwrap();

        let result = store
            .with_conn(|conn| {
                conn.execute("DELETE FROM task_assignments", [])
                    .map_err(backend)
            })
            .await;
        assert!(result.is_err());
        assert_eq!(store.assignment_history(task.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_inactive_users_leave_snapshot() {
        let (_dir, store) = open_store().await;
        let a = store.create_user("A").await.unwrap();
        let b = store.create_user("B").await.unwrap();
        store.set_user_active(a.id, false).await.unwrap();

        let snapshot = store.load_snapshot().await.unwrap();
        assert_eq!(snapshot.active_user_ids, vec![b.id]);

        let err = store.set_user_active(Uuid::new_v4(), true).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_out_of_range_coverage_is_an_error() {
        let (_dir, store) = open_store().await;
        let mut done = Task::new("Done");
        done.complete(Utc::now(), 2);
        let done = store.insert_task(done).await.unwrap();

        let id = done.id.to_string();
        store
            .with_conn(move |conn| {
                conn.execute(
                    "UPDATE tasks SET coverage_count_at_completion = -1 WHERE id = ?1",
                    params![id],
                )
                .map_err(backend)
            })
            .await
            .unwrap();

        let err = store.get_task(done.id).await.unwrap_err();
        assert!(matches!(err, StoreError::Backend(_)));
    }
}
