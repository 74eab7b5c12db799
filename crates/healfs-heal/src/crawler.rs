//! Namespace crawler for full-heal passes.
//!
//! Walks the union namespace depth-first, yielding every directory before
//! any of its children so directory structure is healed before file
//! contents are copied into it. Siblings are visited in name order for
//! determinism. Entries deleted while the crawl is running are skipped,
//! never errored. Liveness under a bounded concurrent write rate is an
//! assumption of the caller, not enforced here.

use std::sync::Arc;

use healfs_core::replica::ReplicaSet;
use healfs_core::types::{EntryId, EntryKind};

/// One entry discovered by the crawl.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CrawledEntry {
    /// The entry's stable identifier.
    pub id: EntryId,
    /// File or directory, as seen at discovery time.
    pub kind: EntryKind,
}

/// Lazy depth-first iterator over the union namespace.
pub struct NamespaceCrawl {
    set: Arc<ReplicaSet>,
    stack: Vec<EntryId>,
}

/// Starts a crawl over the replica set's namespace, rooted at `/`.
pub fn crawl(set: Arc<ReplicaSet>) -> NamespaceCrawl {
    NamespaceCrawl {
        set,
        stack: vec![EntryId::ROOT],
    }
}

impl Iterator for NamespaceCrawl {
    type Item = CrawledEntry;

    fn next(&mut self) -> Option<CrawledEntry> {
        while let Some(id) = self.stack.pop() {
            let copies = self.set.copies(id);
            let kind = match copies.present.first() {
                Some((_, entry)) => entry.kind,
                // vanished mid-crawl, or every holder is unreachable
                None => {
                    tracing::debug!(entry = %id, "skipping entry that vanished mid-crawl");
                    continue;
                }
            };

            if kind.is_dir() {
                if let Ok(children) = self.set.union_children(id) {
                    // reverse so the stack pops siblings in name order
                    for (_, child) in children.into_iter().rev() {
                        self.stack.push(child);
                    }
                }
            }
            return Some(CrawledEntry { id, kind });
        }
        None
    }
}
