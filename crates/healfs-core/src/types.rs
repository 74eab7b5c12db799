use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a unique identifier for a brick (one replica of the subvolume)
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BrickId(u64);

impl BrickId {
    /// Creates a new BrickId from a raw u64 value
    pub fn new(id: u64) -> Self {
        BrickId(id)
    }

    /// Returns the raw u64 value of this brick ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for BrickId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents a stable identifier for a namespace entry (file or directory).
///
/// The identifier survives renames; paths are derived from parent links,
/// never used as the primary key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntryId(u64);

impl EntryId {
    /// The root directory entry ID (always 1)
    pub const ROOT: EntryId = EntryId(1);

    /// Creates a new EntryId from a raw u64 value
    pub fn new(id: u64) -> Self {
        EntryId(id)
    }

    /// Returns the raw u64 value of this entry ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entry type enumeration matching the two namespace object kinds
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryKind {
    /// Regular file (S_IFREG)
    File,
    /// Directory (S_IFDIR)
    Directory,
}

impl EntryKind {
    /// Returns the POSIX S_IFMT bits for this entry kind
    pub fn mode_bits(&self) -> u32 {
        match self {
            EntryKind::File => 0o100000,
            EntryKind::Directory => 0o040000,
        }
    }

    /// Returns true if this is a directory
    pub fn is_dir(&self) -> bool {
        matches!(self, EntryKind::Directory)
    }
}

/// Represents a point in time with second and nanosecond precision
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Seconds since Unix epoch
    pub secs: u64,
    /// Nanoseconds within the second
    pub nanos: u32,
}

impl Timestamp {
    /// The zero timestamp (Unix epoch)
    pub const ZERO: Timestamp = Timestamp { secs: 0, nanos: 0 };

    /// Returns the current timestamp
    pub fn now() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("system time before epoch");
        Self {
            secs: now.as_secs(),
            nanos: now.subsec_nanos(),
        }
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.secs
            .cmp(&other.secs)
            .then_with(|| self.nanos.cmp(&other.nanos))
    }
}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// POSIX-style metadata carried by every entry and reconciled during heal
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Permission bits (without the S_IFMT type bits)
    pub mode: u32,
    /// Owner user ID
    pub uid: u32,
    /// Owner group ID
    pub gid: u32,
    /// Last modification time
    pub mtime: Timestamp,
}

impl Default for EntryMeta {
    fn default() -> Self {
        Self {
            mode: 0o755,
            uid: 0,
            gid: 0,
            mtime: Timestamp::ZERO,
        }
    }
}

impl EntryMeta {
    /// Creates metadata for a regular file with the given permission bits
    pub fn file(mode: u32) -> Self {
        Self {
            mode,
            uid: 0,
            gid: 0,
            mtime: Timestamp::now(),
        }
    }

    /// Creates metadata for a directory with the given permission bits
    pub fn directory(mode: u32) -> Self {
        Self {
            mode,
            uid: 0,
            gid: 0,
            mtime: Timestamp::now(),
        }
    }
}
