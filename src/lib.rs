//! # Task Rotation
//!
//! Rotates a pool of tasks across a pool of users until every active user
//! has held every task once.
//!
//! Each reassignment cycle moves every non-completed task to a different
//! user, preferring users that have not held it yet, never handing it back
//! to its current or previous holder and never exceeding a user's capacity.
//! A task completes once the number of distinct users that have held it
//! reaches the number of active users.
//!
//! ## Cycle Flow
//! 1. Snapshot active users, open tasks and per-user load
//! 2. Shuffle the open tasks
//! 3. Complete, reassign or park each task, checking for cancellation first
//! 4. Commit every change of the cycle in one batch
//!
//! ## Modules
//! - `rotation`: Engine, selection rules, randomizer and the periodic trigger
//! - `store`: Storage trait with in-memory and SQLite backends
//! - `api`: HTTP endpoints for the overview and the on-demand trigger

pub mod api;
pub mod config;
pub mod rotation;
pub mod store;
pub mod util;

pub use config::Config;
pub use rotation::{CycleOutcome, CycleReport, Engine, EngineError};
pub use store::{RotationStore, StoreError};
