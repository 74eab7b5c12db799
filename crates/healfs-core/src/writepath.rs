//! Replicated write pipeline.
//!
//! The client write path proper lives outside this subsystem; this is the
//! minimal coordinated-write collaborator the heal engine is defined
//! against, and the harness the tests drive load through. A write fans out
//! to every reachable brick; bricks that miss it get pending markers via
//! `ChangeLog::record_pending_write`, which is what later makes them
//! eligible targets for heal.

use bytes::Bytes;
use std::sync::Arc;

use crate::checksum::authoritative_copy;
use crate::error::HealError;
use crate::replica::{Brick, ReplicaSet};
use crate::store::BrickEntry;
use crate::types::{BrickId, EntryId, EntryKind, EntryMeta, Timestamp};
use crate::version::VersionVector;

/// Coordinates replicated writes across the replica set.
pub struct ClusterWriter {
    set: Arc<ReplicaSet>,
}

impl ClusterWriter {
    /// Creates a writer over the given replica set.
    pub fn new(set: Arc<ReplicaSet>) -> Self {
        Self { set }
    }

    /// Creates a directory under `parent`.
    pub fn mkdir(
        &self,
        parent: EntryId,
        name: &str,
        meta: EntryMeta,
    ) -> Result<EntryId, HealError> {
        self.create_entry(parent, name, EntryKind::Directory, Bytes::new(), meta)
    }

    /// Creates a regular file under `parent`.
    pub fn create(
        &self,
        parent: EntryId,
        name: &str,
        data: Bytes,
        meta: EntryMeta,
    ) -> Result<EntryId, HealError> {
        self.create_entry(parent, name, EntryKind::File, data, meta)
    }

    /// Replaces the content of an existing file.
    pub fn overwrite(&self, entry: EntryId, data: Bytes) -> Result<(), HealError> {
        let copies = self.set.copies(entry);
        if copies.present.is_empty() {
            return Err(match copies.unreachable.first() {
                Some(brick) => HealError::ReplicaUnreachable(*brick),
                None => HealError::EntryNotFound(entry),
            });
        }
        let base = authoritative_copy(&copies.present)
            .ok_or(HealError::EntryNotFound(entry))?
            .clone();
        let live = self.set.require_live()?;

        let mut version = base.version.clone();
        for (_, copy) in &copies.present {
            version.merge(&copy.version);
        }
        for brick in &live {
            version.bump(brick.id());
        }

        let next = BrickEntry {
            id: entry,
            parent: base.parent,
            name: base.name.clone(),
            kind: base.kind,
            data,
            meta: EntryMeta {
                mtime: Timestamp::now(),
                ..base.meta
            },
            version,
        };
        self.fan_out(next, &live)?;
        Ok(())
    }

    /// Removes an entry from every reachable brick. Bricks that miss the
    /// unlink get pending markers; heal propagates the deletion to them.
    pub fn unlink(&self, entry: EntryId) -> Result<(), HealError> {
        if entry == EntryId::ROOT {
            return Err(HealError::NotADirectory(entry));
        }
        let copies = self.set.copies(entry);
        if copies.present.is_empty() && copies.unreachable.is_empty() {
            return Err(HealError::EntryNotFound(entry));
        }
        if let Some((_, first)) = copies.present.first() {
            if first.kind.is_dir() && !self.set.union_children(entry)?.is_empty() {
                return Err(HealError::DirectoryNotEmpty(entry));
            }
        }

        let mut successes: Vec<BrickId> = Vec::new();
        let mut first_err: Option<HealError> = None;
        for (brick_id, _) in &copies.present {
            let brick = match self.set.brick(*brick_id) {
                Some(b) => b,
                None => continue,
            };
            match brick.store().remove(entry) {
                Ok(()) => successes.push(*brick_id),
                Err(err) => {
                    first_err.get_or_insert(err);
                }
            }
        }
        if successes.is_empty() {
            return Err(first_err.unwrap_or(HealError::ReplicaUnreachable(
                copies.unreachable.first().copied().unwrap_or(BrickId::new(0)),
            )));
        }

        // every member that did not apply the unlink may still hold a copy
        let missed: Vec<BrickId> = self
            .set
            .bricks()
            .iter()
            .map(|b| b.id())
            .filter(|id| !successes.contains(id))
            .collect();
        if missed.is_empty() {
            self.set.changelog().clear_entry(entry);
        } else {
            tracing::warn!(entry = %entry, missed = missed.len(), "unlink missed replicas");
            self.set
                .changelog()
                .record_pending_write(entry, successes[0], &missed);
        }
        Ok(())
    }

    fn create_entry(
        &self,
        parent: EntryId,
        name: &str,
        kind: EntryKind,
        data: Bytes,
        meta: EntryMeta,
    ) -> Result<EntryId, HealError> {
        let parent_copies = self.set.copies(parent);
        let parent_entry = authoritative_copy(&parent_copies.present)
            .ok_or(HealError::DirectoryNotFound(parent))?;
        if !parent_entry.kind.is_dir() {
            return Err(HealError::NotADirectory(parent));
        }
        if self
            .set
            .union_children(parent)?
            .iter()
            .any(|(existing, _)| existing == name)
        {
            return Err(HealError::EntryExists {
                parent,
                name: name.to_string(),
            });
        }

        let live = self.set.require_live()?;
        let id = self.set.alloc_entry_id();
        let mut version = VersionVector::new();
        for brick in &live {
            version.bump(brick.id());
        }

        let entry = BrickEntry {
            id,
            parent,
            name: name.to_string(),
            kind,
            data,
            meta,
            version,
        };
        self.fan_out(entry, &live)?;
        Ok(id)
    }

    /// Applies one entry state to each target brick, recording pending
    /// markers for every member that missed the write. Fails only when no
    /// brick accepted it.
    fn fan_out(&self, entry: BrickEntry, targets: &[Brick]) -> Result<(), HealError> {
        let entry_id = entry.id;
        let mut successes: Vec<BrickId> = Vec::new();
        let mut first_err: Option<HealError> = None;

        for brick in targets {
            match brick.store().apply(entry.clone()) {
                Ok(()) => successes.push(brick.id()),
                Err(err) => {
                    tracing::debug!(brick = %brick.id(), entry = %entry_id, error = %err,
                        "write did not reach brick");
                    first_err.get_or_insert(err);
                }
            }
        }
        if successes.is_empty() {
            return Err(first_err.unwrap_or(HealError::FatalCluster));
        }

        let missed: Vec<BrickId> = self
            .set
            .bricks()
            .iter()
            .map(|b| b.id())
            .filter(|id| !successes.contains(id))
            .collect();
        if !missed.is_empty() {
            tracing::warn!(entry = %entry_id, missed = missed.len(), "write missed replicas");
            self.set
                .changelog()
                .record_pending_write(entry_id, successes[0], &missed);
        }
        Ok(())
    }
}
