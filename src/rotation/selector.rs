//! Candidate selection for a single task.

use std::collections::HashSet;

use super::load::LoadTracker;
use super::model::{Task, UserId};
use super::random::{choose, Randomizer};

/// Users that may take `task` right now.
///
/// Excludes the current and previous holders and anyone at capacity. Order
/// follows `active_users` so that a deterministic randomizer stays reproducible.
pub fn eligible_candidates(
    task: &Task,
    active_users: &[UserId],
    load: &LoadTracker,
) -> Vec<UserId> {
    active_users
        .iter()
        .copied()
        .filter(|id| Some(*id) != task.current_assignee_id)
        .filter(|id| Some(*id) != task.previous_assignee_id)
        .filter(|id| load.has_capacity(id))
        .collect()
}

/// Pick the next holder for `task`, or `None` when nobody is eligible.
///
/// Users that never held the task are preferred; only when every eligible
/// user already covered it does the pick fall back to the whole set.
pub fn pick(
    task: &Task,
    active_users: &[UserId],
    visited: &HashSet<UserId>,
    load: &LoadTracker,
    rng: &mut dyn Randomizer,
) -> Option<UserId> {
    let candidates = eligible_candidates(task, active_users, load);
    if candidates.is_empty() {
        return None;
    }

    let unseen: Vec<UserId> = candidates
        .iter()
        .copied()
        .filter(|id| !visited.contains(id))
        .collect();
    let pool = if unseen.is_empty() { &candidates } else { &unseen };

    choose(pool, rng).copied()
}
