//! Split-brain detection.
//!
//! A pure query layer over the same source-selection logic the heal engine
//! uses: an entry is in split-brain exactly when no replica can be chosen
//! as authoritative — mutually non-dominating version vectors, equal
//! vectors with divergent content, or every copy accused by a pending
//! marker whose source is reachable. Nothing here mutates state.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use healfs_core::error::HealError;
use healfs_core::replica::ReplicaSet;
use healfs_core::types::{BrickId, EntryId};
use healfs_core::version::VersionVector;

use crate::crawler;
use crate::engine::{decide_source, SourceDecision, SplitBrainReason};

/// One entry that cannot be healed automatically.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitBrainReport {
    /// The conflicted entry.
    pub entry: EntryId,
    /// Why no source could be chosen.
    pub reason: SplitBrainReason,
    /// The replicas holding irreconcilable copies, with their vectors.
    pub accused: Vec<(BrickId, VersionVector)>,
}

/// Examines one entry; `Some` if it is in split-brain.
pub fn examine(set: &ReplicaSet, entry: EntryId) -> Result<Option<SplitBrainReport>, HealError> {
    let copies = set.copies(entry);
    if copies.present.is_empty() && copies.missing.is_empty() {
        return Err(HealError::FatalCluster);
    }
    let markers = set.changelog().markers_for(entry);
    match decide_source(&copies, &markers) {
        SourceDecision::SplitBrain(reason) => Ok(Some(SplitBrainReport {
            entry,
            reason,
            accused: copies
                .present
                .iter()
                .map(|(id, copy)| (*id, copy.version.clone()))
                .collect(),
        })),
        _ => Ok(None),
    }
}

/// True if the entry has no deterministically authoritative replica.
pub fn is_split_brain(set: &ReplicaSet, entry: EntryId) -> Result<bool, HealError> {
    Ok(examine(set, entry)?.is_some())
}

/// Walks the whole namespace and reports every split-brain entry.
pub fn scan(set: &Arc<ReplicaSet>) -> Result<Vec<SplitBrainReport>, HealError> {
    set.require_live()?;
    let mut reports = Vec::new();
    for crawled in crawler::crawl(set.clone()) {
        if let Some(report) = examine(set, crawled.id)? {
            reports.push(report);
        }
    }
    Ok(reports)
}
