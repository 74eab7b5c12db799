//! The heal engine: per-entry source selection and reconciliation.
//!
//! For each entry the engine gathers every replica's copy, markers, and
//! version vector, picks the unique source of truth, and brings lagging
//! replicas up to date with whole-entry atomic applies. Entries where no
//! source can be chosen deterministically are reported as split-brain and
//! left untouched for manual resolution.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use healfs_core::changelog::PendingMarker;
use healfs_core::error::HealError;
use healfs_core::replica::{CopySet, ReplicaSet};
use healfs_core::store::BrickEntry;
use healfs_core::types::{BrickId, EntryId};
use healfs_core::version::VectorOrdering;

use crate::lease::LeaseManager;

/// Result of healing one entry.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealOutcome {
    /// Data or metadata was copied and the entry is now converged.
    Healed,
    /// Nothing to do; all live replicas already agree.
    AlreadyClean,
    /// Copy incomplete (transient failure or concurrent write); markers are
    /// left intact and the entry retries on the next crawl pass.
    InProgress,
    /// No replica can be chosen as authoritative; needs manual resolution.
    SplitBrain,
    /// The entry vanished mid-heal or another worker holds its lease.
    Skipped,
}

/// Why an entry cannot be healed automatically.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitBrainReason {
    /// Two replicas carry mutually non-dominating version vectors.
    ConcurrentVectors,
    /// Vectors are equal but content differs (undefined ordering).
    EqualVectorsDivergentContent,
    /// Every replica holding a copy is accused by a pending marker.
    AllAccused,
}

/// How a source of truth was (or was not) chosen for one entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum SourceDecision {
    /// No reachable brick holds a copy.
    NoCopies {
        /// True if unreachable bricks might still hold one.
        maybe_elsewhere: bool,
    },
    /// Copies exist but their accusers are unreachable; retry later.
    AwaitSources,
    /// The markers record an unlink that has not reached every replica.
    Deletion {
        /// Reachable bricks still holding the doomed copy.
        holders: Vec<BrickId>,
    },
    /// No deterministic source exists.
    SplitBrain(SplitBrainReason),
    /// This brick's copy is authoritative.
    Source(BrickId),
}

/// Pure source-selection over one entry's gathered state.
///
/// Shared by the heal path and the split-brain query so both always agree.
pub(crate) fn decide_source(copies: &CopySet, markers: &[PendingMarker]) -> SourceDecision {
    if copies.present.is_empty() {
        return SourceDecision::NoCopies {
            maybe_elsewhere: !copies.unreachable.is_empty(),
        };
    }

    // an unlink that missed replicas: every marker's source dropped its copy
    if !markers.is_empty()
        && markers.iter().all(|m| copies.missing.contains(&m.source))
    {
        let holders: Vec<BrickId> = copies
            .present
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| markers.iter().any(|m| m.target == *id))
            .collect();
        if !holders.is_empty() {
            return SourceDecision::Deletion { holders };
        }
    }

    let accused = |brick: BrickId| markers.iter().any(|m| m.target == brick);
    let eligible: Vec<&(BrickId, BrickEntry)> = copies
        .present
        .iter()
        .filter(|(id, _)| !accused(*id))
        .collect();

    if eligible.is_empty() {
        // mutually concurrent vectors are decisive regardless of markers
        let any_concurrent = copies.present.iter().enumerate().any(|(i, (_, a))| {
            copies.present[i + 1..]
                .iter()
                .any(|(_, b)| a.version.compare(&b.version) == VectorOrdering::Concurrent)
        });
        if any_concurrent {
            return SourceDecision::SplitBrain(SplitBrainReason::ConcurrentVectors);
        }
        let accuser_unreachable = markers
            .iter()
            .any(|m| copies.unreachable.contains(&m.source));
        return if accuser_unreachable {
            SourceDecision::AwaitSources
        } else {
            SourceDecision::SplitBrain(SplitBrainReason::AllAccused)
        };
    }

    let candidate = eligible.iter().find(|(_, entry)| {
        copies
            .present
            .iter()
            .all(|(_, other)| entry.version.at_least(&other.version))
    });
    let (source_id, source_entry) = match candidate {
        Some((id, entry)) => (*id, entry),
        None => return SourceDecision::SplitBrain(SplitBrainReason::ConcurrentVectors),
    };

    // equal vectors with different content cannot be ordered
    let divergent_twin = copies.present.iter().any(|(id, other)| {
        *id != source_id
            && source_entry.version.compare(&other.version) == VectorOrdering::Equal
            && source_entry.content_digest() != other.content_digest()
    });
    if divergent_twin {
        return SourceDecision::SplitBrain(SplitBrainReason::EqualVectorsDivergentContent);
    }

    SourceDecision::Source(source_id)
}

/// Heals single entries against a replica set.
pub struct HealEngine {
    leases: Arc<LeaseManager>,
}

impl HealEngine {
    /// Creates an engine sharing the given lease manager.
    pub fn new(leases: Arc<LeaseManager>) -> Self {
        Self { leases }
    }

    /// The engine's lease manager.
    pub fn leases(&self) -> &Arc<LeaseManager> {
        &self.leases
    }

    /// Heals one entry, holding its lease for the duration.
    ///
    /// Lease contention yields `Skipped`: the concurrent holder is already
    /// doing the work. Per-entry failures map to `InProgress` so a crawl is
    /// never aborted by one entry; only a fully unreachable replica set is
    /// an error.
    pub fn heal_entry(
        &self,
        set: &ReplicaSet,
        entry: EntryId,
        worker: u64,
    ) -> Result<HealOutcome, HealError> {
        let lease = match self.leases.try_acquire(entry, worker) {
            Ok(lease) => lease,
            Err(HealError::LeaseHeld(_)) => return Ok(HealOutcome::Skipped),
            Err(err) => return Err(err),
        };
        let outcome = self.heal_locked(set, entry);
        self.leases.release(entry, lease);
        outcome
    }

    fn heal_locked(&self, set: &ReplicaSet, entry: EntryId) -> Result<HealOutcome, HealError> {
        let changelog = set.changelog();
        // gather under the lease: the optimistic snapshot everything below
        // is checked against
        let copies = set.copies(entry);
        if copies.present.is_empty() && copies.missing.is_empty() {
            return Err(HealError::FatalCluster);
        }
        let markers = changelog.markers_for(entry);

        match decide_source(&copies, &markers) {
            SourceDecision::NoCopies { maybe_elsewhere } => {
                if !maybe_elsewhere {
                    // gone from every replica: any leftover markers are moot
                    changelog.clear_entry(entry);
                }
                Ok(HealOutcome::Skipped)
            }
            SourceDecision::AwaitSources => Ok(HealOutcome::InProgress),
            SourceDecision::Deletion { holders } => {
                self.propagate_deletion(set, entry, &markers, &holders)
            }
            SourceDecision::SplitBrain(reason) => {
                tracing::warn!(entry = %entry, reason = ?reason, "entry is in split-brain");
                Ok(HealOutcome::SplitBrain)
            }
            SourceDecision::Source(source) => self.copy_from_source(set, entry, source, &copies),
        }
    }

    fn propagate_deletion(
        &self,
        set: &ReplicaSet,
        entry: EntryId,
        markers: &[PendingMarker],
        holders: &[BrickId],
    ) -> Result<HealOutcome, HealError> {
        let changelog = set.changelog();
        for holder in holders {
            let brick = match set.brick(*holder) {
                Some(brick) => brick,
                None => continue,
            };
            if let Err(err) = brick.store().remove(entry) {
                tracing::warn!(entry = %entry, brick = %holder, error = %err,
                    "deletion propagation failed, will retry");
                return Ok(HealOutcome::InProgress);
            }
            changelog.clear_incoming(entry, *holder);
        }
        // edges whose target already lacks a copy are satisfied too
        for marker in markers {
            if !holders.contains(&marker.target) && !set.is_reachable(marker.target) {
                continue; // unreachable target may still hold the copy
            }
            changelog.clear_edge(entry, marker.source, marker.target);
        }
        tracing::info!(entry = %entry, holders = holders.len(), "propagated deletion");
        Ok(HealOutcome::Healed)
    }

    fn copy_from_source(
        &self,
        set: &ReplicaSet,
        entry: EntryId,
        source: BrickId,
        copies: &CopySet,
    ) -> Result<HealOutcome, HealError> {
        let changelog = set.changelog();
        let source_entry = match copies.copy_of(source) {
            Some(entry) => entry.clone(),
            None => return Ok(HealOutcome::Skipped),
        };

        let mut targets: Vec<BrickId> = Vec::new();
        let mut current: Vec<BrickId> = vec![source];
        for (brick_id, copy) in &copies.present {
            if *brick_id == source {
                continue;
            }
            if copy.version.compare(&source_entry.version) == VectorOrdering::Equal
                && copy.same_state(&source_entry)
            {
                current.push(*brick_id);
            } else {
                targets.push(*brick_id);
            }
        }
        targets.extend(copies.missing.iter().copied());

        let mut updated = 0usize;
        for target in &targets {
            let brick = match set.brick(*target) {
                Some(brick) => brick,
                None => continue,
            };

            // check-then-act: a write may have raced ahead of our snapshot
            match brick.store().lookup(entry) {
                Ok(Some(now)) => {
                    let ord = now.version.compare(&source_entry.version);
                    if !matches!(ord, VectorOrdering::Dominated | VectorOrdering::Equal) {
                        tracing::info!(entry = %entry, target = %target,
                            "target advanced past heal snapshot, retrying entry");
                        return Ok(HealOutcome::InProgress);
                    }
                    if ord == VectorOrdering::Equal && now.same_state(&source_entry) {
                        current.push(*target);
                        continue;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(entry = %entry, target = %target, error = %err,
                        "target unreadable mid-heal, retrying entry");
                    return Ok(HealOutcome::InProgress);
                }
            }

            if let Err(err) = brick.store().apply(source_entry.clone()) {
                tracing::warn!(entry = %entry, target = %target, error = %err,
                    "heal copy failed, markers left intact");
                return Ok(HealOutcome::InProgress);
            }
            updated += 1;
            current.push(*target);
        }

        // the source must not have taken a new write while we copied
        match set.brick(source).and_then(|b| b.store().lookup(entry).ok()) {
            Some(Some(now)) if now.version == source_entry.version => {}
            _ => {
                tracing::info!(entry = %entry, source = %source,
                    "source advanced mid-heal, retrying entry");
                return Ok(HealOutcome::InProgress);
            }
        }

        for brick_id in &current {
            changelog.clear_incoming(entry, *brick_id);
        }

        if updated == 0 {
            Ok(HealOutcome::AlreadyClean)
        } else {
            tracing::info!(entry = %entry, source = %source, copies = updated, "healed entry");
            Ok(HealOutcome::Healed)
        }
    }
}
