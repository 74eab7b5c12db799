//! End-to-end heal verification.
//!
//! A single-brick volume is filled with a deep directory workload,
//! expanded to a three-way replica, fully healed, and verified by
//! comparing every brick's checksum against the pre-expansion volume
//! checksum.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;

use healfs_core::replica::Brick;
use healfs_core::store::{BrickStore, MemBrick};
use healfs_core::types::{BrickId, EntryId, EntryMeta};
use healfs_core::writepath::ClusterWriter;
use healfs_heal::scheduler::JobPhase;
use healfs_mgmt::arequal::{collect_bricks_arequal, collect_volume_arequal};
use healfs_mgmt::heal_ops::HealStatus;
use healfs_mgmt::volume::{Volume, VolumeType};

const POLL: Duration = Duration::from_millis(10);
const WAIT: Duration = Duration::from_secs(10);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn new_brick(id: u64) -> (Brick, Arc<MemBrick>) {
    let store = Arc::new(MemBrick::new(BrickId::new(id)));
    (
        Brick::new(BrickId::new(id), store.clone() as Arc<dyn BrickStore>),
        store,
    )
}

/// The IO workload: nested directories, each holding a handful of files
/// with random content.
fn create_deep_dirs_with_files(
    writer: &ClusterWriter,
    parent: EntryId,
    depth: u32,
    files_per_dir: usize,
    rng: &mut StdRng,
) {
    for f in 0..files_per_dir {
        let size = rng.gen_range(16..512);
        let data: Vec<u8> = (0..size).map(|_| rng.gen::<u8>()).collect();
        writer
            .create(
                parent,
                &format!("file{}", f),
                Bytes::from(data),
                EntryMeta::file(0o644),
            )
            .unwrap();
    }
    if depth > 0 {
        let dir = writer
            .mkdir(parent, &format!("dir{}", depth), EntryMeta::directory(0o755))
            .unwrap();
        create_deep_dirs_with_files(writer, dir, depth - 1, files_per_dir, rng);
    }
}

#[tokio::test]
async fn test_manual_heal_full_should_trigger_heal() {
    init_tracing();

    // single-brick volume with a deep-dir workload
    let (b1, s1) = new_brick(1);
    let vol = Volume::create("testvol", vec![b1]);
    assert_eq!(vol.volume_type(), VolumeType::Distribute);

    let writer = vol.writer();
    let mut rng = StdRng::seed_from_u64(7);
    create_deep_dirs_with_files(&writer, EntryId::ROOT, 2, 10, &mut rng);

    // checksum from the mount before adding bricks
    let mount_total = collect_volume_arequal(&vol).unwrap();

    // add bricks so the volume becomes a 1x3 replica
    let (b2, s2) = new_brick(2);
    let (b3, s3) = new_brick(3);
    vol.add_bricks(vec![b2, b3], 3).unwrap();
    assert_eq!(vol.bricks().len(), 3);
    assert_eq!(vol.volume_type(), VolumeType::Replicate);

    // start heal full and wait for completion
    let handle = vol.trigger_heal_full();
    let report = handle.await_completion(POLL, WAIT).await.unwrap();
    assert_eq!(report.phase, JobPhase::Converged);

    let status = vol.monitor_heal_completion_with(POLL, WAIT).await.unwrap();
    assert_eq!(status, HealStatus::Converged);
    assert!(vol.is_heal_complete());
    assert!(!vol.is_volume_in_split_brain().unwrap());
    assert!(vol.is_healthy().unwrap());

    // every brick checksum equals the pre-expansion mount checksum
    let sums = collect_bricks_arequal(&vol).unwrap();
    assert_eq!(sums.len(), 3);
    for (brick, sum) in sums {
        assert_eq!(sum, mount_total, "brick {} diverges from the mount", brick);
    }

    // the added bricks hold every entry, with nothing pending against them
    assert_eq!(s2.entry_count().unwrap(), s1.entry_count().unwrap());
    assert_eq!(s3.entry_count().unwrap(), s1.entry_count().unwrap());
    assert!(vol.heal_info().is_empty());
}

#[tokio::test]
async fn test_retriggering_full_heal_is_idempotent() {
    init_tracing();

    let (b1, _) = new_brick(1);
    let vol = Volume::create("testvol", vec![b1]);
    let mut rng = StdRng::seed_from_u64(11);
    create_deep_dirs_with_files(&vol.writer(), EntryId::ROOT, 1, 10, &mut rng);
    let mount_total = collect_volume_arequal(&vol).unwrap();

    let (b2, _) = new_brick(2);
    let (b3, _) = new_brick(3);
    vol.add_bricks(vec![b2, b3], 3).unwrap();

    // two triggers in immediate succession join the same job
    let first = vol.trigger_heal_full();
    let second = vol.trigger_heal_full();
    assert_eq!(first.id(), second.id());

    let status = vol.monitor_heal_completion_with(POLL, WAIT).await.unwrap();
    assert_eq!(status, HealStatus::Converged);

    // a second full pass over the converged volume changes nothing
    vol.trigger_heal_full();
    let status = vol.monitor_heal_completion_with(POLL, WAIT).await.unwrap();
    assert_eq!(status, HealStatus::Converged);
    for (_, sum) in collect_bricks_arequal(&vol).unwrap() {
        assert_eq!(sum, mount_total);
    }
}

#[tokio::test]
async fn test_heal_retries_after_unreachable_brick_returns() {
    init_tracing();

    let (b1, _) = new_brick(1);
    let (b2, _) = new_brick(2);
    let (b3, s3) = new_brick(3);
    let vol = Volume::create("testvol", vec![b1, b2, b3]);
    let writer = vol.writer();
    let file = writer
        .create(
            EntryId::ROOT,
            "data",
            Bytes::from_static(b"v1"),
            EntryMeta::file(0o644),
        )
        .unwrap();

    // brick 3 misses an overwrite and stays dark through the first heal
    s3.set_online(false);
    writer.overwrite(file, Bytes::from_static(b"v2")).unwrap();

    vol.trigger_heal_full();
    let status = vol.monitor_heal_completion_with(POLL, WAIT).await.unwrap();
    assert!(matches!(status, HealStatus::PartiallyHealed { .. }));
    assert!(!vol.is_heal_complete());

    // once the brick returns, the next full heal converges everything
    s3.set_online(true);
    vol.trigger_heal_full();
    let status = vol.monitor_heal_completion_with(POLL, WAIT).await.unwrap();
    assert_eq!(status, HealStatus::Converged);
    assert_eq!(&s3.lookup(file).unwrap().unwrap().data[..], b"v2");

    let mount_total = collect_volume_arequal(&vol).unwrap();
    for (_, sum) in collect_bricks_arequal(&vol).unwrap() {
        assert_eq!(sum, mount_total);
    }
}
