//! Task rotation core.
//!
//! Distributes tasks across users so that every active user eventually holds
//! every task once, nobody holds more than the configured number of tasks at a
//! time, and nobody receives the same task twice in a row.
//!
//! - `model`: users, tasks and assignment history
//! - `load`: per-user capacity bookkeeping for one cycle
//! - `selector`: candidate filtering and the random pick
//! - `engine`: one full reassignment cycle, committed atomically
//! - `scheduler`: periodic trigger

pub mod engine;
pub mod load;
pub mod model;
pub mod random;
pub mod scheduler;
pub mod selector;

pub use engine::{CycleOutcome, CycleReport, Engine, EngineError, SharedEngine};
pub use load::{LoadTracker, DEFAULT_MAX_TASKS_PER_USER};
pub use model::{AssignmentRecord, Task, TaskId, TaskState, User, UserId};
pub use random::{Randomizer, RoundRobinRandomizer, ThreadRandomizer};
pub use scheduler::spawn_reassign_loop;
