//! The heal surface the management plane drives.
//!
//! Mirrors the operations a test/ops layer calls against a volume:
//! trigger a full heal, block until it settles, and query convergence and
//! split-brain state. "Heal completed" (the job finished its pass) and
//! "heal is complete" (nothing is pending right now) are distinct
//! questions, answered by `monitor_heal_completion` and `is_heal_complete`
//! respectively.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use healfs_core::changelog::PendingMarker;
use healfs_core::error::HealError;
use healfs_core::types::EntryId;
use healfs_heal::scheduler::{AbortReason, JobHandle, JobPhase};
use healfs_heal::split_brain;

use crate::volume::Volume;

/// Terminal classification of a monitored heal.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealStatus {
    /// No pending markers and no split-brain entries remain.
    Converged,
    /// Entries remain dirty or in split-brain and need another pass or
    /// manual resolution.
    PartiallyHealed {
        /// Pending markers still recorded.
        pending_markers: usize,
        /// Entries in split-brain.
        split_brain_entries: usize,
    },
}

impl Volume {
    /// Starts (or joins) a full self-heal over the volume.
    pub fn trigger_heal_full(&self) -> JobHandle {
        self.scheduler().trigger_full(self.set())
    }

    /// Waits for the active heal to settle, using the configured poll
    /// interval and timeout, then classifies the volume state.
    pub async fn monitor_heal_completion(&self) -> Result<HealStatus, HealError> {
        self.monitor_heal_completion_with(
            self.config().poll_interval(),
            self.config().monitor_timeout(),
        )
        .await
    }

    /// `monitor_heal_completion` with explicit polling parameters.
    ///
    /// Errors with `Timeout` if the heal is still running when the window
    /// closes and with `FatalCluster` if the active job aborted because
    /// every brick became unreachable.
    pub async fn monitor_heal_completion_with(
        &self,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<HealStatus, HealError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(handle) = self.scheduler().active_handle() {
                if !handle.is_complete() {
                    if Instant::now() >= deadline {
                        return Err(HealError::Timeout(timeout));
                    }
                    tokio::time::sleep(poll_interval).await;
                    continue;
                }
                if handle.phase() == JobPhase::Aborted(AbortReason::FatalCluster) {
                    return Err(HealError::FatalCluster);
                }
            }

            let pending = self.set().changelog().total_pending();
            let split = split_brain::scan(self.set())?.len();
            return Ok(if pending == 0 && split == 0 {
                HealStatus::Converged
            } else {
                HealStatus::PartiallyHealed {
                    pending_markers: pending,
                    split_brain_entries: split,
                }
            });
        }
    }

    /// Point-in-time query: no running heal job and an empty change log.
    pub fn is_heal_complete(&self) -> bool {
        let job_settled = self
            .scheduler()
            .active_handle()
            .map(|h| h.is_complete())
            .unwrap_or(true);
        job_settled && self.set().changelog().is_empty()
    }

    /// True if any entry in the volume is in split-brain.
    pub fn is_volume_in_split_brain(&self) -> Result<bool, HealError> {
        Ok(!split_brain::scan(self.set())?.is_empty())
    }

    /// No pending markers and no split-brain anywhere in the namespace.
    pub fn is_healthy(&self) -> Result<bool, HealError> {
        self.scheduler().is_healthy(self.set())
    }

    /// The entries currently needing heal, with their pending markers.
    pub fn heal_info(&self) -> Vec<(EntryId, Vec<PendingMarker>)> {
        let changelog = self.set().changelog();
        let mut dirty = changelog.dirty_all();
        dirty.sort();
        dirty
            .into_iter()
            .map(|entry| (entry, changelog.markers_for(entry)))
            .collect()
    }
}
