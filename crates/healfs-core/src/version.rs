//! Per-entry, per-brick version vectors.
//!
//! Every entry carries one monotonic counter per brick. Counters are bumped
//! for each brick a coordinated write is addressed to, so a replica that
//! missed a write is strictly dominated by the replicas that received it.
//! Concurrent divergent writes produce mutually non-dominating vectors,
//! which the heal engine escalates to split-brain instead of guessing.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::BrickId;

/// Result of comparing two version vectors component-wise.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VectorOrdering {
    /// Every component is equal.
    Equal,
    /// Left is ≥ on every component and > on at least one.
    Dominates,
    /// Right is ≥ on every component and > on at least one.
    Dominated,
    /// Each side is ahead on at least one component.
    Concurrent,
}

/// Per-brick monotonic write counters for one entry.
///
/// Missing components read as zero, so vectors stay compact when a brick
/// has never coordinated a write for the entry.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionVector {
    counters: BTreeMap<BrickId, u64>,
}

impl VersionVector {
    /// Creates an empty version vector (all components zero).
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter for the given brick (zero if absent).
    pub fn get(&self, brick: BrickId) -> u64 {
        self.counters.get(&brick).copied().unwrap_or(0)
    }

    /// Increments the counter for the given brick.
    pub fn bump(&mut self, brick: BrickId) {
        *self.counters.entry(brick).or_insert(0) += 1;
    }

    /// Raises every component to the maximum of self and other.
    pub fn merge(&mut self, other: &VersionVector) {
        for (brick, counter) in &other.counters {
            let slot = self.counters.entry(*brick).or_insert(0);
            if *counter > *slot {
                *slot = *counter;
            }
        }
    }

    /// Compares two vectors component-wise over the union of their bricks.
    pub fn compare(&self, other: &VersionVector) -> VectorOrdering {
        let mut any_gt = false;
        let mut any_lt = false;
        for brick in self.counters.keys().chain(other.counters.keys()) {
            let a = self.get(*brick);
            let b = other.get(*brick);
            if a > b {
                any_gt = true;
            } else if a < b {
                any_lt = true;
            }
        }
        match (any_gt, any_lt) {
            (false, false) => VectorOrdering::Equal,
            (true, false) => VectorOrdering::Dominates,
            (false, true) => VectorOrdering::Dominated,
            (true, true) => VectorOrdering::Concurrent,
        }
    }

    /// Returns true if self dominates or equals other.
    pub fn at_least(&self, other: &VersionVector) -> bool {
        matches!(
            self.compare(other),
            VectorOrdering::Equal | VectorOrdering::Dominates
        )
    }

    /// Returns true if no component has ever been bumped.
    pub fn is_empty(&self) -> bool {
        self.counters.values().all(|c| *c == 0)
    }

    /// Iterates over the non-zero components.
    pub fn components(&self) -> impl Iterator<Item = (BrickId, u64)> + '_ {
        self.counters.iter().map(|(b, c)| (*b, *c))
    }
}

impl fmt::Display for VersionVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (brick, counter)) in self.counters.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}:{}", brick, counter)?;
        }
        write!(f, "}}")
    }
}
