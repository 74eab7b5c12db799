//! The replica set: the bricks backing one logical subvolume.
//!
//! The set is an explicit object passed to every operation — there is no
//! process-wide singleton. A brick added to the set starts with only the
//! root directory and is populated by heal.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::changelog::ChangeLog;
use crate::error::HealError;
use crate::store::{BrickEntry, BrickStore};
use crate::types::{BrickId, EntryId};
use crate::version::{VectorOrdering, VersionVector};

/// One brick of the replica set: an identifier plus its storage backend.
#[derive(Clone)]
pub struct Brick {
    id: BrickId,
    store: Arc<dyn BrickStore>,
}

impl Brick {
    /// Creates a brick from an identifier and a storage backend.
    pub fn new(id: BrickId, store: Arc<dyn BrickStore>) -> Self {
        Self { id, store }
    }

    /// The brick's identifier.
    pub fn id(&self) -> BrickId {
        self.id
    }

    /// The brick's storage backend.
    pub fn store(&self) -> &Arc<dyn BrickStore> {
        &self.store
    }

    /// True if the brick is currently reachable.
    pub fn is_reachable(&self) -> bool {
        self.store.is_online()
    }
}

impl std::fmt::Debug for Brick {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Brick")
            .field("id", &self.id)
            .field("online", &self.store.is_online())
            .finish()
    }
}

/// The per-entry replica state gathered in one pass over the set.
#[derive(Debug, Default)]
pub struct CopySet {
    /// Reachable bricks holding a copy, in brick order.
    pub present: Vec<(BrickId, BrickEntry)>,
    /// Reachable bricks holding no copy.
    pub missing: Vec<BrickId>,
    /// Bricks that could not be queried this pass.
    pub unreachable: Vec<BrickId>,
}

impl CopySet {
    /// The copy held by a specific brick, if gathered.
    pub fn copy_of(&self, brick: BrickId) -> Option<&BrickEntry> {
        self.present
            .iter()
            .find(|(id, _)| *id == brick)
            .map(|(_, e)| e)
    }
}

/// The set of brick replicas backing one logical subvolume.
pub struct ReplicaSet {
    bricks: RwLock<Vec<Brick>>,
    changelog: ChangeLog,
    replica_count: AtomicU32,
    next_entry: AtomicU64,
}

impl ReplicaSet {
    /// Creates a replica set over the given bricks.
    pub fn new(bricks: Vec<Brick>, replica_count: u32) -> Self {
        Self {
            bricks: RwLock::new(bricks),
            changelog: ChangeLog::new(),
            replica_count: AtomicU32::new(replica_count),
            next_entry: AtomicU64::new(EntryId::ROOT.as_u64() + 1),
        }
    }

    /// Adds a brick to the set. The brick starts with zero copies (beyond
    /// the root directory) and is populated by heal.
    pub fn add_brick(&self, brick: Brick) -> Result<(), HealError> {
        let mut bricks = self.bricks.write().expect("brick list lock poisoned");
        if bricks.iter().any(|b| b.id() == brick.id()) {
            return Err(HealError::BrickExists(brick.id()));
        }
        tracing::info!(brick = %brick.id(), "brick added to replica set");
        bricks.push(brick);
        Ok(())
    }

    /// Declared number of replicas for the subvolume.
    pub fn replica_count(&self) -> u32 {
        self.replica_count.load(Ordering::SeqCst)
    }

    /// Updates the declared replica count (management-plane add-brick).
    pub fn set_replica_count(&self, count: u32) {
        self.replica_count.store(count, Ordering::SeqCst);
    }

    /// All member bricks, in membership order.
    pub fn bricks(&self) -> Vec<Brick> {
        self.bricks.read().expect("brick list lock poisoned").clone()
    }

    /// The member bricks that are currently reachable.
    pub fn live_bricks(&self) -> Vec<Brick> {
        self.bricks()
            .into_iter()
            .filter(|b| b.is_reachable())
            .collect()
    }

    /// The reachable bricks, or `FatalCluster` if there are none.
    pub fn require_live(&self) -> Result<Vec<Brick>, HealError> {
        let live = self.live_bricks();
        if live.is_empty() {
            return Err(HealError::FatalCluster);
        }
        Ok(live)
    }

    /// Looks up one member brick by ID.
    pub fn brick(&self, id: BrickId) -> Option<Brick> {
        self.bricks().into_iter().find(|b| b.id() == id)
    }

    /// True if the given brick is a reachable member.
    pub fn is_reachable(&self, id: BrickId) -> bool {
        self.brick(id).map(|b| b.is_reachable()).unwrap_or(false)
    }

    /// The shared pending-op change log.
    pub fn changelog(&self) -> &ChangeLog {
        &self.changelog
    }

    /// Allocates a fresh entry identifier.
    pub fn alloc_entry_id(&self) -> EntryId {
        EntryId::new(self.next_entry.fetch_add(1, Ordering::SeqCst))
    }

    /// Gathers the per-brick state of one entry across the whole set.
    ///
    /// Query failures are folded into `unreachable`: a brick that cannot
    /// answer this pass is retried on the next one.
    pub fn copies(&self, entry: EntryId) -> CopySet {
        let mut set = CopySet::default();
        for brick in self.bricks() {
            if !brick.is_reachable() {
                set.unreachable.push(brick.id());
                continue;
            }
            match brick.store().lookup(entry) {
                Ok(Some(copy)) => set.present.push((brick.id(), copy)),
                Ok(None) => set.missing.push(brick.id()),
                Err(err) => {
                    tracing::debug!(brick = %brick.id(), entry = %entry, error = %err,
                        "brick did not answer lookup");
                    set.unreachable.push(brick.id());
                }
            }
        }
        set
    }

    /// The union of a directory's children across all reachable bricks.
    ///
    /// Returns (name, entry) pairs sorted by name. When two bricks map the
    /// same name to different entries, the copy with the higher version
    /// vector wins; concurrent vectors keep the first brick's child (the
    /// conflict itself surfaces when the entries are examined).
    pub fn union_children(&self, dir: EntryId) -> Result<Vec<(String, EntryId)>, HealError> {
        let mut by_name: std::collections::BTreeMap<String, (EntryId, VersionVector)> =
            std::collections::BTreeMap::new();
        for brick in self.require_live()? {
            let child_ids = match brick.store().children(dir) {
                Ok(ids) => ids,
                Err(_) => continue,
            };
            for child in child_ids {
                let copy = match brick.store().lookup(child) {
                    Ok(Some(copy)) => copy,
                    _ => continue,
                };
                let replace = match by_name.get(&copy.name) {
                    None => true,
                    Some((existing, version)) => {
                        *existing != child
                            && copy.version.compare(version) == VectorOrdering::Dominates
                    }
                };
                if replace {
                    by_name.insert(copy.name.clone(), (child, copy.version));
                }
            }
        }
        Ok(by_name.into_iter().map(|(name, (id, _))| (name, id)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemBrick;
    use crate::types::{EntryKind, EntryMeta};
    use bytes::Bytes;

    fn mem_brick(id: u64) -> (Brick, Arc<MemBrick>) {
        let store = Arc::new(MemBrick::new(BrickId::new(id)));
        (Brick::new(BrickId::new(id), store.clone()), store)
    }

    fn file_on(store: &MemBrick, id: u64, name: &str, data: &[u8], version: VersionVector) {
        store
            .apply(BrickEntry {
                id: EntryId::new(id),
                parent: EntryId::ROOT,
                name: name.to_string(),
                kind: EntryKind::File,
                data: Bytes::copy_from_slice(data),
                meta: EntryMeta::file(0o644),
                version,
            })
            .unwrap();
    }

    #[test]
    fn test_add_brick_rejects_duplicates() {
        let (b1, _) = mem_brick(1);
        let (b1_again, _) = mem_brick(1);
        let set = ReplicaSet::new(vec![b1], 1);
        assert!(matches!(
            set.add_brick(b1_again),
            Err(HealError::BrickExists(_))
        ));
        assert_eq!(set.bricks().len(), 1);
    }

    #[test]
    fn test_live_bricks_excludes_offline() {
        let (b1, _) = mem_brick(1);
        let (b2, s2) = mem_brick(2);
        let set = ReplicaSet::new(vec![b1, b2], 2);
        assert_eq!(set.live_bricks().len(), 2);
        s2.set_online(false);
        assert_eq!(set.live_bricks().len(), 1);
        assert!(!set.is_reachable(BrickId::new(2)));
    }

    #[test]
    fn test_require_live_fails_when_all_offline() {
        let (b1, s1) = mem_brick(1);
        let set = ReplicaSet::new(vec![b1], 1);
        s1.set_online(false);
        assert!(matches!(set.require_live(), Err(HealError::FatalCluster)));
    }

    #[test]
    fn test_copies_classifies_bricks() {
        let (b1, s1) = mem_brick(1);
        let (b2, _) = mem_brick(2);
        let (b3, s3) = mem_brick(3);
        let set = ReplicaSet::new(vec![b1, b2, b3], 3);
        file_on(&s1, 2, "a.txt", b"data", VersionVector::new());
        s3.set_online(false);

        let copies = set.copies(EntryId::new(2));
        assert_eq!(copies.present.len(), 1);
        assert_eq!(copies.present[0].0, BrickId::new(1));
        assert_eq!(copies.missing, vec![BrickId::new(2)]);
        assert_eq!(copies.unreachable, vec![BrickId::new(3)]);
        assert!(copies.copy_of(BrickId::new(1)).is_some());
        assert!(copies.copy_of(BrickId::new(2)).is_none());
    }

    #[test]
    fn test_alloc_entry_id_is_monotonic() {
        let (b1, _) = mem_brick(1);
        let set = ReplicaSet::new(vec![b1], 1);
        let a = set.alloc_entry_id();
        let b = set.alloc_entry_id();
        assert!(b > a);
        assert!(a > EntryId::ROOT);
    }

    #[test]
    fn test_union_children_merges_across_bricks() {
        let (b1, s1) = mem_brick(1);
        let (b2, s2) = mem_brick(2);
        let set = ReplicaSet::new(vec![b1, b2], 2);
        file_on(&s1, 2, "only-on-1", b"", VersionVector::new());
        file_on(&s2, 3, "only-on-2", b"", VersionVector::new());

        let children = set.union_children(EntryId::ROOT).unwrap();
        assert_eq!(
            children,
            vec![
                ("only-on-1".to_string(), EntryId::new(2)),
                ("only-on-2".to_string(), EntryId::new(3)),
            ]
        );
    }

    #[test]
    fn test_union_children_name_collision_prefers_higher_version() {
        let (b1, s1) = mem_brick(1);
        let (b2, s2) = mem_brick(2);
        let set = ReplicaSet::new(vec![b1, b2], 2);

        let mut newer = VersionVector::new();
        newer.bump(BrickId::new(2));
        newer.bump(BrickId::new(2));
        let mut older = VersionVector::new();
        older.bump(BrickId::new(2));

        file_on(&s1, 2, "name", b"old", older);
        file_on(&s2, 3, "name", b"new", newer);

        let children = set.union_children(EntryId::ROOT).unwrap();
        assert_eq!(children, vec![("name".to_string(), EntryId::new(3))]);
    }
}
