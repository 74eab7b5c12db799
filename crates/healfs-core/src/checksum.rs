//! Whole-tree checksums for replica verification.
//!
//! A `TreeChecksum` is a structured result (entry count plus content
//! digest) rather than a parsed text report. Both walks visit entries in
//! the same deterministic order (depth-first, siblings by name), so once a
//! heal has converged every live brick's checksum is bit-identical to the
//! logical volume's.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::HealError;
use crate::replica::{Brick, ReplicaSet};
use crate::store::BrickEntry;
use crate::types::EntryId;
use crate::version::VectorOrdering;

/// Aggregate checksum of one namespace tree.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeChecksum {
    /// Number of entries visited, including the root directory.
    pub entries: u64,
    /// Blake3 digest over paths, metadata, and content in walk order.
    pub digest: [u8; 32],
}

impl fmt::Display for TreeChecksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.entries)?;
        for byte in &self.digest {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

fn hash_entry(hasher: &mut blake3::Hasher, path: &str, entry: &BrickEntry) {
    hasher.update(path.as_bytes());
    hasher.update(&[0]);
    hasher.update(&entry.kind.mode_bits().to_le_bytes());
    hasher.update(&entry.meta.mode.to_le_bytes());
    hasher.update(&entry.meta.uid.to_le_bytes());
    hasher.update(&entry.meta.gid.to_le_bytes());
    hasher.update(&(entry.data.len() as u64).to_le_bytes());
    hasher.update(&entry.data);
    hasher.update(&[0xff]);
}

fn child_path(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", parent, name)
    }
}

/// Checksums the namespace tree held by a single brick.
pub fn brick_checksum(brick: &Brick) -> Result<TreeChecksum, HealError> {
    let mut hasher = blake3::Hasher::new();
    let mut entries = 0u64;
    let mut stack: Vec<(EntryId, String)> = vec![(EntryId::ROOT, String::from("/"))];

    while let Some((id, path)) = stack.pop() {
        let entry = brick
            .store()
            .lookup(id)?
            .ok_or(HealError::EntryNotFound(id))?;
        hash_entry(&mut hasher, &path, &entry);
        entries += 1;

        if entry.kind.is_dir() {
            let mut children = Vec::new();
            for child_id in brick.store().children(id)? {
                if let Some(child) = brick.store().lookup(child_id)? {
                    children.push((child.name.clone(), child_id));
                }
            }
            children.sort();
            for (name, child_id) in children.into_iter().rev() {
                stack.push((child_id, child_path(&path, &name)));
            }
        }
    }

    Ok(TreeChecksum {
        entries,
        digest: *hasher.finalize().as_bytes(),
    })
}

/// Checksums the logical (union) view of the volume.
///
/// Each entry is read from an authoritative copy: one whose version vector
/// dominates or equals every other reachable copy. While an entry is in
/// split-brain the choice is ambiguous; callers are expected to check for
/// split-brain before trusting the result.
pub fn volume_checksum(set: &ReplicaSet) -> Result<TreeChecksum, HealError> {
    set.require_live()?;
    let mut hasher = blake3::Hasher::new();
    let mut entries = 0u64;
    let mut stack: Vec<(EntryId, String)> = vec![(EntryId::ROOT, String::from("/"))];

    while let Some((id, path)) = stack.pop() {
        let copies = set.copies(id);
        let entry = match authoritative_copy(&copies.present) {
            Some(entry) => entry,
            None => continue, // deleted between discovery and read
        };
        hash_entry(&mut hasher, &path, entry);
        entries += 1;

        if entry.kind.is_dir() {
            for (name, child_id) in set.union_children(id)?.into_iter().rev() {
                stack.push((child_id, child_path(&path, &name)));
            }
        }
    }

    Ok(TreeChecksum {
        entries,
        digest: *hasher.finalize().as_bytes(),
    })
}

/// Picks the copy whose version vector dominates or equals all others.
/// Falls back to the first copy when no copy dominates (split-brain).
pub(crate) fn authoritative_copy(
    present: &[(crate::types::BrickId, BrickEntry)],
) -> Option<&BrickEntry> {
    present
        .iter()
        .find(|(_, candidate)| {
            present.iter().all(|(_, other)| {
                matches!(
                    candidate.version.compare(&other.version),
                    VectorOrdering::Equal | VectorOrdering::Dominates
                )
            })
        })
        .map(|(_, e)| e)
        .or_else(|| present.first().map(|(_, e)| e))
}
