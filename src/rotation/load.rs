//! Per-user count of in-progress tasks, mutated in memory during a cycle.

use std::collections::HashMap;

use super::model::UserId;

/// Default number of tasks a single user may hold at once.
pub const DEFAULT_MAX_TASKS_PER_USER: usize = 3;

/// Capacity bookkeeping for one cycle.
///
/// Seeded from the store at cycle start and never re-read mid-cycle; the
/// engine owns it exclusively for the duration of the cycle.
#[derive(Debug, Clone)]
pub struct LoadTracker {
    load: HashMap<UserId, usize>,
    capacity: usize,
}

impl LoadTracker {
    /// Build the tracker from the active users and the stored in-progress counts.
    ///
    /// Every active user starts at zero; counts for users outside the active
    /// set are dropped.
    pub fn new(
        active_users: &[UserId],
        in_progress: &HashMap<UserId, usize>,
        capacity: usize,
    ) -> Self {
        let load = active_users
            .iter()
            .map(|id| (*id, in_progress.get(id).copied().unwrap_or(0)))
            .collect();
        Self { load, capacity }
    }

    pub fn get(&self, user_id: &UserId) -> usize {
        self.load.get(user_id).copied().unwrap_or(0)
    }

    /// Whether `user_id` is active and below capacity.
    pub fn has_capacity(&self, user_id: &UserId) -> bool {
        self.load
            .get(user_id)
            .map_or(false, |count| *count < self.capacity)
    }

    pub fn acquire(&mut self, user_id: UserId) {
        *self.load.entry(user_id).or_insert(0) += 1;
    }

    /// Give back one slot. Unknown (inactive) users are ignored.
    pub fn release(&mut self, user_id: &UserId) {
        if let Some(count) = self.load.get_mut(user_id) {
            *count = count.saturating_sub(1);
        }
    }

    pub fn snapshot(&self) -> &HashMap<UserId, usize> {
        &self.load
    }
}
