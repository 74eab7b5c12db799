//! Arequal-style checksum collection.
//!
//! Structured results (entry count + digest) instead of parsed text
//! reports: once a heal has converged with no split-brain, the volume
//! checksum and every brick checksum are bit-identical.

use healfs_core::checksum::{brick_checksum, volume_checksum, TreeChecksum};
use healfs_core::error::HealError;
use healfs_core::types::BrickId;

use crate::volume::Volume;

/// Checksum of the logical volume as a client mount would see it.
pub fn collect_volume_arequal(volume: &Volume) -> Result<TreeChecksum, HealError> {
    volume_checksum(volume.set())
}

/// Per-brick checksums, in membership order. Fails if a brick is
/// unreachable rather than silently skipping it.
pub fn collect_bricks_arequal(volume: &Volume) -> Result<Vec<(BrickId, TreeChecksum)>, HealError> {
    let mut sums = Vec::new();
    for brick in volume.bricks() {
        sums.push((brick.id(), brick_checksum(&brick)?));
    }
    Ok(sums)
}
