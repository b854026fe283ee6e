//! One reassignment cycle over every non-completed task.
//!
//! # Cycle
//! 1. Read the snapshot (active users, open tasks, in-progress load).
//! 2. Shuffle the open tasks.
//! 3. For each task: retire it if its history covers the active user count,
//!    otherwise hand it to a fresh candidate or park it as waiting.
//! 4. Commit every buffered mutation in one batch.
//!
//! Cycles are single-flight: concurrent callers queue on the same guard, which
//! also owns the randomizer. Cancellation is checked before each task and
//! leaves the store untouched.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::load::LoadTracker;
use super::model::{Task, TaskId};
use super::random::{shuffle, Randomizer, ThreadRandomizer};
use super::selector;
use crate::store::{CycleBatch, SharedRotationStore, StoreError};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Task {0} disappeared during the cycle")]
    UnknownTask(TaskId),

    #[error("Invariant violated: {0}")]
    Invariant(String),
}

/// Counts of what a committed cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    /// Users that took part in the cycle.
    pub active_users: usize,
    /// Tasks handed to a new holder.
    pub assigned: usize,
    /// Tasks parked because no candidate was eligible.
    pub waiting: usize,
    /// Tasks retired after full coverage.
    pub completed: usize,
}

impl CycleReport {
    pub fn changed(&self) -> usize {
        self.assigned + self.waiting + self.completed
    }
}

/// Result of a cycle that did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Cancelled before commit; nothing was written.
    Aborted,
}

/// What happened to a single task during a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Assigned,
    Waiting,
    Completed,
}

pub struct Engine {
    store: SharedRotationStore,
    capacity: usize,
    // Holding this lock is what makes a cycle single-flight.
    guard: Mutex<Box<dyn Randomizer>>,
}

impl Engine {
    pub fn new(store: SharedRotationStore, capacity: usize) -> Self {
        Self::with_randomizer(store, capacity, Box::new(ThreadRandomizer::new()))
    }

    pub fn with_randomizer(
        store: SharedRotationStore,
        capacity: usize,
        randomizer: Box<dyn Randomizer>,
    ) -> Self {
        Self {
            store,
            capacity: capacity.max(1),
            guard: Mutex::new(randomizer),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn store(&self) -> &SharedRotationStore {
        &self.store
    }

    /// Run one full cycle and commit it atomically.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleOutcome, EngineError> {
        let mut rng = self.guard.lock().await;

        let snapshot = self.store.load_snapshot().await?;
        let active_users = snapshot.active_user_ids;
        if active_users.is_empty() {
            tracing::debug!("No active users, skipping reassignment cycle");
            return Ok(CycleOutcome::Completed(CycleReport::default()));
        }

        let mut load = LoadTracker::new(&active_users, &snapshot.in_progress_load, self.capacity);
        let mut tasks = snapshot.tasks;
        shuffle(&mut tasks, &mut **rng);

        tracing::info!(
            "Reassignment cycle started: {} active users, {} open tasks",
            active_users.len(),
            tasks.len()
        );

        let mut batch = CycleBatch::new();
        let mut report = CycleReport {
            active_users: active_users.len(),
            ..CycleReport::default()
        };

        for mut task in tasks {
            if cancel.is_cancelled() {
                tracing::info!("Reassignment cycle cancelled, discarding buffered changes");
                return Ok(CycleOutcome::Aborted);
            }

            let visited = self
                .store
                .distinct_assignees(task.id)
                .await
                .map_err(|e| match e {
                    StoreError::NotFound(_) => EngineError::UnknownTask(task.id),
                    other => EngineError::Store(other),
                })?;

            let transition = if visited.len() >= active_users.len() {
                if let Some(holder) = task.current_assignee_id {
                    load.release(&holder);
                }
                task.complete(Utc::now(), active_users.len() as u32);
                Transition::Completed
            } else {
                match selector::pick(&task, &active_users, &visited, &load, &mut **rng) {
                    Some(user_id) => {
                        if let Some(holder) = task.current_assignee_id {
                            load.release(&holder);
                        }
                        let now = Utc::now();
                        task.assign_to(user_id);
                        batch.record_assignment(task.id, user_id, now);
                        load.acquire(user_id);
                        Transition::Assigned
                    }
                    None => {
                        if let Some(holder) = task.current_assignee_id {
                            load.release(&holder);
                        }
                        task.park();
                        Transition::Waiting
                    }
                }
            };

            task.check_invariants().map_err(EngineError::Invariant)?;
            log_transition(&task, transition);
            match transition {
                Transition::Assigned => report.assigned += 1,
                Transition::Waiting => report.waiting += 1,
                Transition::Completed => report.completed += 1,
            }
            batch.update_task(task);
        }

        // A cancel that lands after the last task still discards the batch.
        if cancel.is_cancelled() {
            tracing::info!("Reassignment cycle cancelled before commit");
            return Ok(CycleOutcome::Aborted);
        }

        self.store.commit(batch).await?;

        tracing::info!(
            "Reassignment cycle committed: {} assigned, {} waiting, {} completed",
            report.assigned,
            report.waiting,
            report.completed
        );
        Ok(CycleOutcome::Completed(report))
    }
}

fn log_transition(task: &Task, transition: Transition) {
    match transition {
        Transition::Assigned => tracing::debug!(
            task_id = %task.id,
            "Task '{}' assigned to {:?} (previous {:?})",
            task.title,
            task.current_assignee_id,
            task.previous_assignee_id
        ),
        Transition::Waiting => tracing::debug!(
            task_id = %task.id,
            "Task '{}' waiting, no eligible candidate",
            task.title
        ),
        Transition::Completed => tracing::debug!(
            task_id = %task.id,
            "Task '{}' completed with coverage {:?}",
            task.title,
            task.coverage_count_at_completion
        ),
    }
}

pub type SharedEngine = Arc<Engine>;
