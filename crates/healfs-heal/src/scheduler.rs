//! Heal scheduler and monitor.
//!
//! One job drives one full (or index) pass over the replica set: a crawl
//! task discovers entries and a bounded pool of workers heals them.
//! Directories are healed inline by the crawl task itself, so structure
//! always lands on a lagging replica before the file contents that belong
//! inside it; file heals fan out to the workers. Re-triggering while a job
//! is active is idempotent and returns the existing handle.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use uuid::Uuid;

use healfs_core::error::HealError;
use healfs_core::replica::ReplicaSet;
use healfs_core::types::EntryId;

use crate::crawler;
use crate::engine::{HealEngine, HealOutcome};
use crate::lease::LeaseManager;
use crate::split_brain;

/// Configuration for the heal scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealConfig {
    /// File-heal workers per job.
    pub workers: usize,
    /// Per-entry lease duration in milliseconds.
    pub lease_ttl_ms: u64,
    /// Depth of the crawl-to-worker dispatch queue.
    pub queue_depth: usize,
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            lease_ttl_ms: 30_000,
            queue_depth: 256,
        }
    }
}

/// Identifier of one heal job.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which entries a heal job visits.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealMode {
    /// Crawl the whole namespace (finds lagging replicas with no markers,
    /// e.g. a freshly added brick).
    Full,
    /// Visit only entries with pending markers in the change log.
    Index,
}

/// Why a job aborted.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    /// The job was cancelled; in-flight entries finished or rolled back.
    Cancelled,
    /// The whole replica set became unreachable.
    FatalCluster,
}

/// Lifecycle of one heal job.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobPhase {
    /// Created but not yet crawling.
    Idle,
    /// Crawl and workers are running.
    Crawling,
    /// Crawl finished; no pending markers and no split-brain remain.
    Converged,
    /// Crawl finished but entries remain dirty, unhealed, or in split-brain.
    PartiallyHealed,
    /// The job stopped before finishing its pass.
    Aborted(AbortReason),
}

impl JobPhase {
    /// True once the job will make no further progress.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobPhase::Idle | JobPhase::Crawling)
    }
}

/// Per-job outcome counters.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStats {
    /// Entries discovered by the pass.
    pub scanned: u64,
    /// Entries that had data or metadata copied.
    pub healed: u64,
    /// Entries already converged.
    pub already_clean: u64,
    /// Entries left for the next pass (transient failure or racing write).
    pub in_progress: u64,
    /// Entries in split-brain.
    pub split_brain: u64,
    /// Entries skipped (vanished mid-crawl or leased elsewhere).
    pub skipped: u64,
}

/// Final (or in-flight) summary of one heal job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport {
    /// The job's identifier.
    pub id: JobId,
    /// The pass mode the job ran.
    pub mode: HealMode,
    /// The job's phase at report time.
    pub phase: JobPhase,
    /// Outcome counters.
    pub stats: JobStats,
    /// Entries the job found in split-brain.
    pub split_brain_entries: Vec<EntryId>,
}

struct JobInner {
    id: JobId,
    mode: HealMode,
    phase: RwLock<JobPhase>,
    cancel: AtomicBool,
    fatal: AtomicBool,
    scanned: AtomicU64,
    healed: AtomicU64,
    already_clean: AtomicU64,
    in_progress: AtomicU64,
    split_brain: AtomicU64,
    skipped: AtomicU64,
    split_brain_entries: Mutex<Vec<EntryId>>,
}

impl JobInner {
    fn new(mode: HealMode) -> Self {
        Self {
            id: JobId::generate(),
            mode,
            phase: RwLock::new(JobPhase::Idle),
            cancel: AtomicBool::new(false),
            fatal: AtomicBool::new(false),
            scanned: AtomicU64::new(0),
            healed: AtomicU64::new(0),
            already_clean: AtomicU64::new(0),
            in_progress: AtomicU64::new(0),
            split_brain: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            split_brain_entries: Mutex::new(Vec::new()),
        }
    }

    fn set_phase(&self, phase: JobPhase) {
        *self.phase.write().unwrap() = phase;
    }

    fn record(&self, entry: EntryId, outcome: HealOutcome) {
        match outcome {
            HealOutcome::Healed => {
                self.healed.fetch_add(1, Ordering::SeqCst);
            }
            HealOutcome::AlreadyClean => {
                self.already_clean.fetch_add(1, Ordering::SeqCst);
            }
            HealOutcome::InProgress => {
                self.in_progress.fetch_add(1, Ordering::SeqCst);
            }
            HealOutcome::SplitBrain => {
                self.split_brain.fetch_add(1, Ordering::SeqCst);
                self.split_brain_entries.lock().unwrap().push(entry);
            }
            HealOutcome::Skipped => {
                self.skipped.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn stats(&self) -> JobStats {
        JobStats {
            scanned: self.scanned.load(Ordering::SeqCst),
            healed: self.healed.load(Ordering::SeqCst),
            already_clean: self.already_clean.load(Ordering::SeqCst),
            in_progress: self.in_progress.load(Ordering::SeqCst),
            split_brain: self.split_brain.load(Ordering::SeqCst),
            skipped: self.skipped.load(Ordering::SeqCst),
        }
    }
}

/// Handle to a running or finished heal job.
#[derive(Clone)]
pub struct JobHandle {
    inner: Arc<JobInner>,
}

impl JobHandle {
    /// The job's identifier.
    pub fn id(&self) -> JobId {
        self.inner.id
    }

    /// The pass mode the job runs.
    pub fn mode(&self) -> HealMode {
        self.inner.mode
    }

    /// The job's current phase.
    pub fn phase(&self) -> JobPhase {
        *self.inner.phase.read().unwrap()
    }

    /// True once the job reached a terminal phase.
    pub fn is_complete(&self) -> bool {
        self.phase().is_terminal()
    }

    /// Requests cancellation. In-flight entry copies run to completion or
    /// roll back before the job transitions to Aborted.
    pub fn cancel(&self) {
        self.inner.cancel.store(true, Ordering::SeqCst);
    }

    /// Snapshot of the job's state and counters.
    pub fn report(&self) -> JobReport {
        JobReport {
            id: self.inner.id,
            mode: self.inner.mode,
            phase: self.phase(),
            stats: self.inner.stats(),
            split_brain_entries: self.inner.split_brain_entries.lock().unwrap().clone(),
        }
    }

    /// Polls until the job is terminal.
    ///
    /// Returns the final report, `Timeout` if the job is still running
    /// when the window closes, or `FatalCluster` if the job aborted
    /// because the whole replica set became unreachable. A cancelled job
    /// is a normal completion: its Aborted report is returned as `Ok`.
    pub async fn await_completion(
        &self,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<JobReport, HealError> {
        let deadline = Instant::now() + timeout;
        loop {
            let phase = self.phase();
            if phase.is_terminal() {
                if phase == JobPhase::Aborted(AbortReason::FatalCluster) {
                    return Err(HealError::FatalCluster);
                }
                return Ok(self.report());
            }
            if Instant::now() >= deadline {
                return Err(HealError::Timeout(timeout));
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

/// Coordinates heal jobs over a replica set.
pub struct HealScheduler {
    config: HealConfig,
    engine: Arc<HealEngine>,
    active: Mutex<Option<JobHandle>>,
}

impl HealScheduler {
    /// Creates a scheduler with the given configuration.
    pub fn new(config: HealConfig) -> Self {
        let leases = Arc::new(LeaseManager::new(Duration::from_millis(config.lease_ttl_ms)));
        Self {
            config,
            engine: Arc::new(HealEngine::new(leases)),
            active: Mutex::new(None),
        }
    }

    /// The scheduler's configuration.
    pub fn config(&self) -> &HealConfig {
        &self.config
    }

    /// Starts a full-namespace heal. Must be called within a tokio runtime.
    pub fn trigger_full(&self, set: &Arc<ReplicaSet>) -> JobHandle {
        self.trigger(set, HealMode::Full)
    }

    /// Starts a heal pass of the given mode.
    ///
    /// Idempotent while a job is active: the existing handle is returned
    /// instead of starting a duplicate crawl.
    pub fn trigger(&self, set: &Arc<ReplicaSet>, mode: HealMode) -> JobHandle {
        let mut active = self.active.lock().unwrap();
        if let Some(handle) = active.as_ref() {
            if !handle.is_complete() {
                tracing::info!(job = %handle.id(), "heal already active, returning existing job");
                return handle.clone();
            }
        }

        let handle = JobHandle {
            inner: Arc::new(JobInner::new(mode)),
        };
        *active = Some(handle.clone());
        tracing::info!(job = %handle.id(), mode = ?mode, "heal job started");

        let config = self.config.clone();
        let engine = self.engine.clone();
        let set = set.clone();
        let inner = handle.inner.clone();
        tokio::spawn(run_job(config, engine, set, inner));
        handle
    }

    /// The most recently triggered job, if any.
    pub fn active_handle(&self) -> Option<JobHandle> {
        self.active.lock().unwrap().clone()
    }

    /// True when the change log is empty and nothing is in split-brain.
    pub fn is_healthy(&self, set: &Arc<ReplicaSet>) -> Result<bool, HealError> {
        Ok(set.changelog().is_empty() && split_brain::scan(set)?.is_empty())
    }
}

fn dispatch_one(
    engine: &HealEngine,
    set: &ReplicaSet,
    inner: &JobInner,
    entry: EntryId,
    worker: u64,
) {
    match engine.heal_entry(set, entry, worker) {
        Ok(outcome) => inner.record(entry, outcome),
        Err(HealError::FatalCluster) => {
            inner.fatal.store(true, Ordering::SeqCst);
        }
        Err(err) => {
            tracing::debug!(entry = %entry, error = %err, "entry heal failed, will retry");
            inner.record(entry, HealOutcome::InProgress);
        }
    }
}

async fn run_job(
    config: HealConfig,
    engine: Arc<HealEngine>,
    set: Arc<ReplicaSet>,
    inner: Arc<JobInner>,
) {
    inner.set_phase(JobPhase::Crawling);

    let (tx, rx) = tokio::sync::mpsc::channel::<EntryId>(config.queue_depth.max(1));
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    let mut workers = Vec::new();
    for worker_id in 0..config.workers.max(1) {
        let rx = rx.clone();
        let engine = engine.clone();
        let set = set.clone();
        let inner = inner.clone();
        workers.push(tokio::spawn(async move {
            loop {
                let next = { rx.lock().await.recv().await };
                let Some(entry) = next else { break };
                dispatch_one(&engine, &set, &inner, entry, worker_id as u64 + 1);
                if inner.fatal.load(Ordering::SeqCst) || inner.cancel.load(Ordering::SeqCst) {
                    break;
                }
            }
        }));
    }

    match inner.mode {
        HealMode::Full => {
            for crawled in crawler::crawl(set.clone()) {
                if inner.cancel.load(Ordering::SeqCst) || inner.fatal.load(Ordering::SeqCst) {
                    break;
                }
                if set.live_bricks().is_empty() {
                    inner.fatal.store(true, Ordering::SeqCst);
                    break;
                }
                inner.scanned.fetch_add(1, Ordering::SeqCst);
                if crawled.kind.is_dir() {
                    // directories heal inline: parent structure must exist
                    // before the workers copy children into it
                    dispatch_one(&engine, &set, &inner, crawled.id, 0);
                } else if tx.send(crawled.id).await.is_err() {
                    break;
                }
            }
        }
        HealMode::Index => {
            for entry in set.changelog().dirty_all() {
                if inner.cancel.load(Ordering::SeqCst) || inner.fatal.load(Ordering::SeqCst) {
                    break;
                }
                if set.live_bricks().is_empty() {
                    inner.fatal.store(true, Ordering::SeqCst);
                    break;
                }
                inner.scanned.fetch_add(1, Ordering::SeqCst);
                if tx.send(entry).await.is_err() {
                    break;
                }
            }
        }
    }

    drop(tx);
    for worker in workers {
        let _ = worker.await;
    }

    // an entirely dark replica set can make the crawl yield nothing at all
    if set.live_bricks().is_empty() {
        inner.fatal.store(true, Ordering::SeqCst);
    }

    let stats = inner.stats();
    let phase = if inner.fatal.load(Ordering::SeqCst) {
        JobPhase::Aborted(AbortReason::FatalCluster)
    } else if inner.cancel.load(Ordering::SeqCst) {
        JobPhase::Aborted(AbortReason::Cancelled)
    } else if set.changelog().is_empty() && stats.split_brain == 0 && stats.in_progress == 0 {
        JobPhase::Converged
    } else {
        JobPhase::PartiallyHealed
    };
    inner.set_phase(phase);
    tracing::info!(
        job = %inner.id,
        phase = ?phase,
        scanned = stats.scanned,
        healed = stats.healed,
        split_brain = stats.split_brain,
        "heal job finished"
    );
}
