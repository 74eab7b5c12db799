//! Error types shared across the heal subsystem.

use std::time::Duration;
use thiserror::Error;

use crate::types::{BrickId, EntryId};

/// Errors that can occur while reading, writing, or healing replicas.
///
/// Split-brain is deliberately not an error: it is a terminal per-entry
/// state surfaced through the query API.
#[derive(Debug, Error)]
pub enum HealError {
    /// A brick-local read or write failed; retried on the next crawl pass.
    #[error("transient I/O error on brick {brick}: {msg}")]
    TransientIo {
        /// The brick on which the operation failed.
        brick: BrickId,
        /// Description of the failure.
        msg: String,
    },

    /// The brick could not be reached; skipped this pass, retried later.
    #[error("brick {0} is unreachable")]
    ReplicaUnreachable(BrickId),

    /// Every brick in the replica set is unreachable; aborts the heal job.
    #[error("no reachable bricks in the replica set")]
    FatalCluster,

    /// The requested entry does not exist on any reachable brick.
    #[error("entry {0} not found")]
    EntryNotFound(EntryId),

    /// The requested parent directory does not exist.
    #[error("directory {0} not found")]
    DirectoryNotFound(EntryId),

    /// The entry is not a directory when a directory was required.
    #[error("entry {0} is not a directory")]
    NotADirectory(EntryId),

    /// Attempted to unlink a directory that still has children.
    #[error("directory {0} is not empty")]
    DirectoryNotEmpty(EntryId),

    /// A sibling with the given name already exists.
    #[error("entry '{name}' already exists in directory {parent}")]
    EntryExists {
        /// Parent directory entry.
        parent: EntryId,
        /// Conflicting child name.
        name: String,
    },

    /// The brick is already a member of the replica set.
    #[error("brick {0} is already a member of the replica set")]
    BrickExists(BrickId),

    /// Another heal worker holds the lease for this entry.
    #[error("entry {0} is leased by another heal worker")]
    LeaseHeld(EntryId),

    /// The heal did not reach a terminal state within the given window.
    #[error("heal did not reach a terminal state within {0:?}")]
    Timeout(Duration),

    /// A lower-level I/O error from a brick store implementation.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
