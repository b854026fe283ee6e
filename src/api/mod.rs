//! HTTP API for task rotation.
//!
//! ## Endpoints
//!
//! - `GET /api/health` - Health check
//! - `GET /api/assignments/overview` - Users and tasks with the users each task has visited
//! - `GET /api/assignments/visited/{task_id}` - Assignment history of one task
//! - `POST /api/assignments/run-once` - Run one reassignment cycle now

mod assignments;
mod routes;
pub mod types;

pub use routes::{open_store, router, serve, AppState};
pub use types::*;
