//! Brick storage: the per-replica namespace store.
//!
//! `BrickStore` is the storage I/O seam the heal engine is written against.
//! `MemBrick` is the in-process implementation used by every test; a real
//! deployment would back the trait with an on-disk store. Applies are
//! whole-entry and atomic: readers never observe a partially written entry.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::RwLock;

use crate::error::HealError;
use crate::types::{BrickId, EntryId, EntryKind, EntryMeta};
use crate::version::VersionVector;

/// One brick's copy of a namespace entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrickEntry {
    /// Stable entry identifier, shared by all replicas of the entry.
    pub id: EntryId,
    /// Parent directory (the root is its own parent).
    pub parent: EntryId,
    /// Name within the parent directory.
    pub name: String,
    /// File or directory.
    pub kind: EntryKind,
    /// File content; empty for directories.
    pub data: Bytes,
    /// POSIX metadata.
    pub meta: EntryMeta,
    /// Per-brick write counters for this entry.
    pub version: VersionVector,
}

impl BrickEntry {
    /// Content digest of this copy (directories hash empty content).
    pub fn content_digest(&self) -> [u8; 32] {
        *blake3::hash(&self.data).as_bytes()
    }

    /// The root directory entry every brick starts with.
    pub fn root() -> Self {
        Self {
            id: EntryId::ROOT,
            parent: EntryId::ROOT,
            name: String::from("/"),
            kind: EntryKind::Directory,
            data: Bytes::new(),
            meta: EntryMeta::default(),
            version: VersionVector::new(),
        }
    }

    /// Returns true if two copies are byte-identical in data and metadata.
    pub fn same_state(&self, other: &BrickEntry) -> bool {
        self.parent == other.parent
            && self.name == other.name
            && self.kind == other.kind
            && self.data == other.data
            && self.meta == other.meta
    }
}

/// Storage I/O interface for one brick.
///
/// Implementations report their own unreachability: every method fails with
/// `ReplicaUnreachable` while the brick is offline.
pub trait BrickStore: Send + Sync {
    /// Returns true if the brick is currently reachable.
    fn is_online(&self) -> bool;

    /// Reads one entry; `Ok(None)` if the brick holds no copy.
    fn lookup(&self, id: EntryId) -> Result<Option<BrickEntry>, HealError>;

    /// Lists the child entry IDs of a directory, sorted. A directory the
    /// brick does not hold lists as empty.
    fn children(&self, dir: EntryId) -> Result<Vec<EntryId>, HealError>;

    /// Atomically creates or replaces one entry.
    fn apply(&self, entry: BrickEntry) -> Result<(), HealError>;

    /// Removes one entry; removing an absent entry is a no-op.
    fn remove(&self, id: EntryId) -> Result<(), HealError>;

    /// Number of entries this brick holds, including the root.
    fn entry_count(&self) -> Result<u64, HealError>;
}

#[derive(Default)]
struct MemState {
    entries: HashMap<EntryId, BrickEntry>,
    children: HashMap<EntryId, BTreeSet<EntryId>>,
}

/// In-memory brick store.
///
/// Fault hooks: `set_online(false)` models an unreachable replica,
/// `inject_write_failures(n)` makes the next `n` applies fail without
/// mutating anything.
pub struct MemBrick {
    id: BrickId,
    online: AtomicBool,
    fail_writes: AtomicU32,
    state: RwLock<MemState>,
}

impl MemBrick {
    /// Creates an empty brick holding only the root directory.
    pub fn new(id: BrickId) -> Self {
        let mut state = MemState::default();
        state.entries.insert(EntryId::ROOT, BrickEntry::root());
        state.children.insert(EntryId::ROOT, BTreeSet::new());
        Self {
            id,
            online: AtomicBool::new(true),
            fail_writes: AtomicU32::new(0),
            state: RwLock::new(state),
        }
    }

    /// The brick's identifier.
    pub fn id(&self) -> BrickId {
        self.id
    }

    /// Marks the brick reachable or unreachable.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        tracing::info!(brick = %self.id, online, "brick reachability changed");
    }

    /// Makes the next `n` applies fail with a transient I/O error.
    pub fn inject_write_failures(&self, n: u32) {
        self.fail_writes.store(n, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), HealError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(HealError::ReplicaUnreachable(self.id))
        }
    }

    fn lock_err(&self) -> HealError {
        HealError::TransientIo {
            brick: self.id,
            msg: String::from("brick state lock poisoned"),
        }
    }
}

impl BrickStore for MemBrick {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn lookup(&self, id: EntryId) -> Result<Option<BrickEntry>, HealError> {
        self.check_online()?;
        let state = self.state.read().map_err(|_| self.lock_err())?;
        Ok(state.entries.get(&id).cloned())
    }

    fn children(&self, dir: EntryId) -> Result<Vec<EntryId>, HealError> {
        self.check_online()?;
        let state = self.state.read().map_err(|_| self.lock_err())?;
        Ok(state
            .children
            .get(&dir)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn apply(&self, entry: BrickEntry) -> Result<(), HealError> {
        self.check_online()?;
        if self.fail_writes.load(Ordering::SeqCst) > 0 {
            self.fail_writes.fetch_sub(1, Ordering::SeqCst);
            return Err(HealError::TransientIo {
                brick: self.id,
                msg: String::from("injected write failure"),
            });
        }
        let mut state = self.state.write().map_err(|_| self.lock_err())?;
        if let Some(previous) = state.entries.get(&entry.id) {
            if previous.parent != entry.parent {
                let old_parent = previous.parent;
                if let Some(siblings) = state.children.get_mut(&old_parent) {
                    siblings.remove(&entry.id);
                }
            }
        }
        if entry.id != EntryId::ROOT {
            state.children.entry(entry.parent).or_default().insert(entry.id);
        }
        if entry.kind.is_dir() {
            state.children.entry(entry.id).or_default();
        }
        state.entries.insert(entry.id, entry);
        Ok(())
    }

    fn remove(&self, id: EntryId) -> Result<(), HealError> {
        self.check_online()?;
        let mut state = self.state.write().map_err(|_| self.lock_err())?;
        if let Some(entry) = state.entries.remove(&id) {
            let parent = entry.parent;
            if let Some(siblings) = state.children.get_mut(&parent) {
                siblings.remove(&id);
            }
            state.children.remove(&id);
        }
        Ok(())
    }

    fn entry_count(&self) -> Result<u64, HealError> {
        self.check_online()?;
        let state = self.state.read().map_err(|_| self.lock_err())?;
        Ok(state.entries.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_entry(id: u64, parent: EntryId, name: &str, data: &[u8]) -> BrickEntry {
        BrickEntry {
            id: EntryId::new(id),
            parent,
            name: name.to_string(),
            kind: EntryKind::File,
            data: Bytes::copy_from_slice(data),
            meta: EntryMeta::file(0o644),
            version: VersionVector::new(),
        }
    }

    #[test]
    fn test_new_brick_holds_only_root() {
        let brick = MemBrick::new(BrickId::new(1));
        assert_eq!(brick.entry_count().unwrap(), 1);
        let root = brick.lookup(EntryId::ROOT).unwrap().unwrap();
        assert!(root.kind.is_dir());
        assert_eq!(root.parent, EntryId::ROOT);
    }

    #[test]
    fn test_apply_and_lookup() {
        let brick = MemBrick::new(BrickId::new(1));
        brick
            .apply(file_entry(2, EntryId::ROOT, "a.txt", b"hello"))
            .unwrap();
        let got = brick.lookup(EntryId::new(2)).unwrap().unwrap();
        assert_eq!(got.name, "a.txt");
        assert_eq!(&got.data[..], b"hello");
        assert_eq!(brick.children(EntryId::ROOT).unwrap(), vec![EntryId::new(2)]);
    }

    #[test]
    fn test_apply_replaces_atomically() {
        let brick = MemBrick::new(BrickId::new(1));
        brick
            .apply(file_entry(2, EntryId::ROOT, "a.txt", b"v1"))
            .unwrap();
        brick
            .apply(file_entry(2, EntryId::ROOT, "a.txt", b"v2"))
            .unwrap();
        let got = brick.lookup(EntryId::new(2)).unwrap().unwrap();
        assert_eq!(&got.data[..], b"v2");
        assert_eq!(brick.entry_count().unwrap(), 2);
    }

    #[test]
    fn test_remove_clears_children_index() {
        let brick = MemBrick::new(BrickId::new(1));
        brick
            .apply(file_entry(2, EntryId::ROOT, "a.txt", b""))
            .unwrap();
        brick.remove(EntryId::new(2)).unwrap();
        assert!(brick.lookup(EntryId::new(2)).unwrap().is_none());
        assert!(brick.children(EntryId::ROOT).unwrap().is_empty());
        // removing again is a no-op
        brick.remove(EntryId::new(2)).unwrap();
    }

    #[test]
    fn test_offline_brick_fails_every_operation() {
        let brick = MemBrick::new(BrickId::new(4));
        brick.set_online(false);
        assert!(!brick.is_online());
        assert!(matches!(
            brick.lookup(EntryId::ROOT),
            Err(HealError::ReplicaUnreachable(b)) if b == BrickId::new(4)
        ));
        assert!(brick.apply(file_entry(2, EntryId::ROOT, "x", b"")).is_err());
        brick.set_online(true);
        assert!(brick.lookup(EntryId::ROOT).is_ok());
    }

    #[test]
    fn test_injected_write_failure_mutates_nothing() {
        let brick = MemBrick::new(BrickId::new(1));
        brick.inject_write_failures(1);
        let err = brick.apply(file_entry(2, EntryId::ROOT, "a.txt", b"x"));
        assert!(matches!(err, Err(HealError::TransientIo { .. })));
        assert!(brick.lookup(EntryId::new(2)).unwrap().is_none());
        // the injection is consumed
        brick
            .apply(file_entry(2, EntryId::ROOT, "a.txt", b"x"))
            .unwrap();
    }

    #[test]
    fn test_rename_moves_child_between_directories() {
        let brick = MemBrick::new(BrickId::new(1));
        let mut dir = file_entry(2, EntryId::ROOT, "d", b"");
        dir.kind = EntryKind::Directory;
        dir.data = Bytes::new();
        brick.apply(dir).unwrap();
        brick
            .apply(file_entry(3, EntryId::ROOT, "f", b"1"))
            .unwrap();

        let mut moved = file_entry(3, EntryId::new(2), "f", b"1");
        moved.parent = EntryId::new(2);
        brick.apply(moved).unwrap();

        assert_eq!(brick.children(EntryId::ROOT).unwrap(), vec![EntryId::new(2)]);
        assert_eq!(brick.children(EntryId::new(2)).unwrap(), vec![EntryId::new(3)]);
    }

    #[test]
    fn test_content_digest_distinguishes_data() {
        let a = file_entry(2, EntryId::ROOT, "a", b"one");
        let b = file_entry(2, EntryId::ROOT, "a", b"two");
        assert_ne!(a.content_digest(), b.content_digest());
        assert_eq!(a.content_digest(), a.content_digest());
    }
}
