//! Randomness source for the shuffle and candidate pick steps.
//!
//! Production uses [`ThreadRandomizer`]; tests substitute
//! [`RoundRobinRandomizer`] so that a run is reproducible.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of bounded random indices.
pub trait Randomizer: Send {
    /// Return a value in `0..bound_exclusive`. A bound of zero is treated as one.
    fn next(&mut self, bound_exclusive: usize) -> usize;
}

/// Entropy-seeded randomizer.
pub struct ThreadRandomizer {
    rng: StdRng,
}

impl ThreadRandomizer {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    /// Seeded variant, handy for reproducing a production run locally.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for ThreadRandomizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Randomizer for ThreadRandomizer {
    fn next(&mut self, bound_exclusive: usize) -> usize {
        self.rng.gen_range(0..bound_exclusive.max(1))
    }
}

/// Deterministic randomizer returning `i % bound` for an incrementing `i`.
#[derive(Debug, Default)]
pub struct RoundRobinRandomizer {
    counter: usize,
}

impl RoundRobinRandomizer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Randomizer for RoundRobinRandomizer {
    fn next(&mut self, bound_exclusive: usize) -> usize {
        let value = self.counter % bound_exclusive.max(1);
        self.counter = self.counter.wrapping_add(1);
        value
    }
}

/// Fisher-Yates shuffle driven by `rng`.
pub fn shuffle<T>(items: &mut [T], rng: &mut dyn Randomizer) {
    for i in (1..items.len()).rev() {
        let j = rng.next(i + 1);
        items.swap(i, j);
    }
}

/// Pick one element uniformly from `items`.
pub fn choose<'a, T>(items: &'a [T], rng: &mut dyn Randomizer) -> Option<&'a T> {
    if items.is_empty() {
        return None;
    }
    items.get(rng.next(items.len()))
}
