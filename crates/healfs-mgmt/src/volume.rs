//! The volume object the management surface operates on.

use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use healfs_core::error::HealError;
use healfs_core::replica::{Brick, ReplicaSet};
use healfs_core::writepath::ClusterWriter;
use healfs_heal::scheduler::HealScheduler;

use crate::config::MgmtConfig;

/// Errors from management-plane volume operations.
#[derive(Debug, Error)]
pub enum VolumeError {
    #[error("replica count {requested} does not match brick total {actual}")]
    ReplicaCountMismatch { requested: u32, actual: u32 },

    #[error("shrinking the replica set is not supported")]
    Shrink,

    #[error(transparent)]
    Heal(#[from] HealError),
}

/// Volume layout as reported to the management plane.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum VolumeType {
    /// Single copy of the namespace (replica count 1).
    Distribute,
    /// Multiple synchronized copies.
    Replicate,
}

impl fmt::Display for VolumeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolumeType::Distribute => write!(f, "Distribute"),
            VolumeType::Replicate => write!(f, "Replicate"),
        }
    }
}

/// One logical volume: a named replica set plus its heal scheduler.
pub struct Volume {
    name: String,
    set: Arc<ReplicaSet>,
    scheduler: HealScheduler,
    config: MgmtConfig,
}

impl Volume {
    /// Creates a volume over the given bricks with default configuration.
    pub fn create(name: &str, bricks: Vec<Brick>) -> Self {
        Self::with_config(name, bricks, MgmtConfig::default())
    }

    /// Creates a volume with explicit management configuration.
    pub fn with_config(name: &str, bricks: Vec<Brick>, config: MgmtConfig) -> Self {
        let replica_count = bricks.len().max(1) as u32;
        let scheduler = HealScheduler::new(config.heal_config());
        tracing::info!(volume = name, bricks = bricks.len(), "volume created");
        Self {
            name: name.to_string(),
            set: Arc::new(ReplicaSet::new(bricks, replica_count)),
            scheduler,
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The replica set backing this volume.
    pub fn set(&self) -> &Arc<ReplicaSet> {
        &self.set
    }

    pub fn bricks(&self) -> Vec<Brick> {
        self.set.bricks()
    }

    pub fn replica_count(&self) -> u32 {
        self.set.replica_count()
    }

    /// Replicate once more than one copy is declared, Distribute otherwise.
    pub fn volume_type(&self) -> VolumeType {
        if self.set.replica_count() > 1 {
            VolumeType::Replicate
        } else {
            VolumeType::Distribute
        }
    }

    /// A replicated writer over this volume (the client write surface).
    pub fn writer(&self) -> ClusterWriter {
        ClusterWriter::new(self.set.clone())
    }

    /// Expands the volume with new bricks, declaring the new replica count.
    ///
    /// The count must equal the resulting brick total; new bricks start
    /// empty and hold data only after a full heal. Shrinking is rejected.
    pub fn add_bricks(&self, bricks: Vec<Brick>, replica_count: u32) -> Result<(), VolumeError> {
        let current = self.set.bricks().len() as u32;
        let resulting = current + bricks.len() as u32;
        if replica_count < current {
            return Err(VolumeError::Shrink);
        }
        if replica_count != resulting {
            return Err(VolumeError::ReplicaCountMismatch {
                requested: replica_count,
                actual: resulting,
            });
        }
        for brick in bricks {
            self.set.add_brick(brick).map_err(VolumeError::Heal)?;
        }
        self.set.set_replica_count(replica_count);
        tracing::info!(
            volume = %self.name,
            replica_count,
            "volume expanded; new bricks await heal"
        );
        Ok(())
    }

    pub(crate) fn scheduler(&self) -> &HealScheduler {
        &self.scheduler
    }

    pub(crate) fn config(&self) -> &MgmtConfig {
        &self.config
    }
}
