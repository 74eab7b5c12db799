//! Per-entry heal leases.
//!
//! Two heal workers must never race on the same entry, so each heal
//! acquires an exclusive lease on the entry identifier for the duration of
//! the copy. Leases carry a TTL and are reclaimable: if a worker dies, the
//! next acquire after expiry takes the lease over. Ownership is per entry,
//! never per brick.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use healfs_core::error::HealError;
use healfs_core::types::EntryId;

/// An exclusive lease on one entry.
#[derive(Clone, Debug)]
pub struct Lease {
    /// The entry being healed.
    pub entry: EntryId,
    /// Identifier of the holding worker.
    pub holder: u64,
    /// When the lease lapses and becomes reclaimable.
    pub expires_at: Instant,
    /// Unique lease ID, required to release.
    pub lease_id: u64,
}

/// Grants and reclaims per-entry heal leases.
pub struct LeaseManager {
    ttl: Duration,
    leases: Mutex<HashMap<EntryId, Lease>>,
    next_lease_id: Mutex<u64>,
}

impl LeaseManager {
    /// Creates a lease manager with the given lease duration.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            leases: Mutex::new(HashMap::new()),
            next_lease_id: Mutex::new(1),
        }
    }

    /// Acquires the lease for `entry`, reclaiming it if the previous holder
    /// let it expire. Fails with `LeaseHeld` while another worker holds it.
    pub fn try_acquire(&self, entry: EntryId, holder: u64) -> Result<u64, HealError> {
        let now = Instant::now();
        let mut leases = self.leases.lock().unwrap();

        if let Some(existing) = leases.get(&entry) {
            if existing.expires_at > now {
                return Err(HealError::LeaseHeld(entry));
            }
            tracing::warn!(
                entry = %entry,
                stale_holder = existing.holder,
                new_holder = holder,
                "reclaiming expired heal lease"
            );
        }

        let lease_id = {
            let mut next = self.next_lease_id.lock().unwrap();
            let id = *next;
            *next += 1;
            id
        };
        leases.insert(
            entry,
            Lease {
                entry,
                holder,
                expires_at: now + self.ttl,
                lease_id,
            },
        );
        Ok(lease_id)
    }

    /// Releases the lease if `lease_id` still identifies the current grant.
    /// A release after reclaim is a no-op.
    pub fn release(&self, entry: EntryId, lease_id: u64) {
        let mut leases = self.leases.lock().unwrap();
        if let Some(existing) = leases.get(&entry) {
            if existing.lease_id == lease_id {
                leases.remove(&entry);
            }
        }
    }

    /// Number of currently granted (possibly expired) leases.
    pub fn active(&self) -> usize {
        self.leases.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_and_release() {
        let mgr = LeaseManager::new(Duration::from_secs(30));
        let entry = EntryId::new(5);
        let lease = mgr.try_acquire(entry, 1).unwrap();
        assert_eq!(mgr.active(), 1);
        mgr.release(entry, lease);
        assert_eq!(mgr.active(), 0);
    }

    #[test]
    fn test_contention_is_rejected() {
        let mgr = LeaseManager::new(Duration::from_secs(30));
        let entry = EntryId::new(5);
        mgr.try_acquire(entry, 1).unwrap();
        assert!(matches!(
            mgr.try_acquire(entry, 2),
            Err(HealError::LeaseHeld(_))
        ));
    }

    #[test]
    fn test_leases_are_per_entry() {
        let mgr = LeaseManager::new(Duration::from_secs(30));
        mgr.try_acquire(EntryId::new(1), 1).unwrap();
        mgr.try_acquire(EntryId::new(2), 2).unwrap();
        assert_eq!(mgr.active(), 2);
    }

    #[test]
    fn test_expired_lease_is_reclaimed() {
        let mgr = LeaseManager::new(Duration::from_millis(0));
        let entry = EntryId::new(5);
        let stale = mgr.try_acquire(entry, 1).unwrap();
        // TTL of zero lapses immediately; a new worker takes over
        let fresh = mgr.try_acquire(entry, 2).unwrap();
        assert_ne!(stale, fresh);

        // the dead worker's release must not clobber the new grant
        mgr.release(entry, stale);
        assert_eq!(mgr.active(), 1);
        mgr.release(entry, fresh);
        assert_eq!(mgr.active(), 0);
    }
}
