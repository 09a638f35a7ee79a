// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::linux::DeviceError;
use crate::media::FsSpace;
use platter_core::FakeClock;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tempfile::{tempdir, TempDir};
use tokio::process::Command;

const BOOT: &str = "boot-1";
const GIB: u64 = 1 << 30;

fn disc_in_drive(diskseq: u64, label: Option<&str>) -> DeviceSnapshot {
    DeviceSnapshot {
        node: PathBuf::from("/dev/sr0"),
        syspath: "/sys/block/sr0".to_string(),
        is_cdrom: true,
        loaded: true,
        fs_label: label.map(str::to_string),
        diskseq: Some(diskseq),
    }
}

// An empty drive publishes no media properties and no diskseq.
fn empty_drive() -> DeviceSnapshot {
    DeviceSnapshot {
        node: PathBuf::from("/dev/sr0"),
        syspath: "/sys/block/sr0".to_string(),
        is_cdrom: true,
        loaded: false,
        fs_label: None,
        diskseq: None,
    }
}

fn hash_of(diskseq: u64) -> SourceHash {
    disc_in_drive(diskseq, None).source_hash(BOOT).unwrap()
}

#[derive(Clone, Copy)]
enum ImagerMode {
    Succeed,
    SucceedSlowly,
    Fail,
    Hang,
}

#[derive(Clone)]
struct FakeImager {
    mode: Arc<Mutex<ImagerMode>>,
    spawns: Arc<AtomicUsize>,
    exits: Arc<AtomicUsize>,
    outputs: Arc<Mutex<Vec<PathBuf>>>,
}

impl Imager for FakeImager {
    fn spawn(
        &self,
        _device: &Path,
        output: &Path,
        _event_log: &Path,
        on_exit: crate::tools::ExitHook,
    ) -> io::Result<ChildProc> {
        self.spawns.fetch_add(1, Ordering::SeqCst);
        self.outputs.lock().push(output.to_path_buf());
        let mut cmd = match *self.mode.lock() {
            ImagerMode::Succeed => Command::new("true"),
            ImagerMode::SucceedSlowly => {
                let mut cmd = Command::new("sh");
                cmd.args(["-c", "sleep 0.2"]);
                cmd
            }
            ImagerMode::Fail => Command::new("false"),
            ImagerMode::Hang => {
                let mut cmd = Command::new("sleep");
                cmd.arg("60");
                cmd
            }
        };
        let exits = Arc::clone(&self.exits);
        ChildProc::spawn(&mut cmd, move || {
            exits.fetch_add(1, Ordering::SeqCst);
            on_exit();
        })
    }
}

#[derive(Clone)]
struct FakeSource(DeviceCell);

impl DeviceSource for FakeSource {
    fn snapshot(&self) -> Result<DeviceSnapshot, DeviceError> {
        Ok(self.0.get())
    }
}

struct FakeMedia {
    probe_ok: Arc<AtomicBool>,
    disc_size: Arc<AtomicU64>,
    free: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
}

impl MediaAccess for FakeMedia {
    fn probe_volume_descriptor(&self, _node: &Path) -> io::Result<()> {
        if self.probe_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(io::Error::other("unreadable media"))
        }
    }

    fn device_size(&self, _node: &Path) -> io::Result<u64> {
        Ok(self.disc_size.load(Ordering::SeqCst))
    }

    fn fs_space(&self, _dir: &Path) -> io::Result<FsSpace> {
        Ok(FsSpace {
            free: self.free.load(Ordering::SeqCst),
            total: self.total.load(Ordering::SeqCst),
        })
    }
}

struct Rig {
    ripper: Ripper<FakeSource, FakeMedia, FakeImager, FakeClock>,
    registry: Arc<Registry>,
    clock: FakeClock,
    /// Cell the reconciler reads (fed by "uevents").
    cell: DeviceCell,
    /// Cell the shutdown wait reads directly.
    drive: DeviceCell,
    status: StatusCell,
    statuses: Arc<Mutex<Vec<Status>>>,
    imager_mode: Arc<Mutex<ImagerMode>>,
    spawns: Arc<AtomicUsize>,
    exits: Arc<AtomicUsize>,
    outputs: Arc<Mutex<Vec<PathBuf>>>,
    probe_ok: Arc<AtomicBool>,
    disc_size: Arc<AtomicU64>,
    free: Arc<AtomicU64>,
    _tmp: TempDir,
}

impl Rig {
    fn new(initial: DeviceSnapshot, fresh_boot: bool) -> Self {
        Self::build(initial, fresh_boot, |_| {})
    }

    fn build(
        initial: DeviceSnapshot,
        fresh_boot: bool,
        prep: impl FnOnce(&Registry),
    ) -> Self {
        let tmp = tempdir().unwrap();
        let workdir = tmp.path().to_path_buf();
        let registry = Arc::new(Registry::open(workdir.join("test.journal")).unwrap());
        prep(&registry);

        let drive = DeviceCell::new(initial.clone());
        let imager_mode = Arc::new(Mutex::new(ImagerMode::Succeed));
        let imager = FakeImager {
            mode: Arc::clone(&imager_mode),
            spawns: Arc::new(AtomicUsize::new(0)),
            exits: Arc::new(AtomicUsize::new(0)),
            outputs: Arc::new(Mutex::new(Vec::new())),
        };
        let media = FakeMedia {
            probe_ok: Arc::new(AtomicBool::new(true)),
            disc_size: Arc::new(AtomicU64::new(GIB)),
            free: Arc::new(AtomicU64::new(100 * GIB)),
            total: Arc::new(AtomicU64::new(500 * GIB)),
        };
        let spawns = Arc::clone(&imager.spawns);
        let exits = Arc::clone(&imager.exits);
        let outputs = Arc::clone(&imager.outputs);
        let probe_ok = Arc::clone(&media.probe_ok);
        let disc_size = Arc::clone(&media.disc_size);
        let free = Arc::clone(&media.free);

        let clock = FakeClock::new();
        let ripper = Ripper::new(
            RipperDeps {
                registry: Arc::clone(&registry),
                source: FakeSource(drive.clone()),
                media,
                imager,
                clock: clock.clone(),
            },
            RipperConfig {
                workdir: workdir.clone(),
                event_log_dir: workdir.clone(),
                min_free_bytes: 5 * GIB,
                boot_id: BOOT.to_string(),
            },
            Handle::new(),
            initial,
            fresh_boot,
        );

        let statuses = Arc::new(Mutex::new(Vec::new()));
        let status = ripper.status_cell();
        let sink = Arc::clone(&statuses);
        let cell_status = status.clone();
        ripper
            .on_status_change()
            .subscribe(move || sink.lock().push(cell_status.get()));

        Self {
            cell: ripper.device_cell(),
            registry,
            clock,
            drive,
            status,
            statuses,
            imager_mode,
            spawns,
            exits,
            outputs,
            probe_ok,
            disc_size,
            free,
            _tmp: tmp,
            ripper,
        }
    }

    /// Deliver a uevent to the reconciler's cell and the drive itself.
    fn push_device(&self, snapshot: DeviceSnapshot) {
        self.drive.update(snapshot.clone());
        self.cell.update(snapshot);
    }

    async fn reconcile(&mut self) -> Outcome {
        self.ripper.reconcile().await.unwrap()
    }

    async fn wait_for_exits(&self, n: usize) {
        for _ in 0..1000 {
            if self.exits.load(Ordering::SeqCst) >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("imager never exited");
    }
}

#[test]
fn starts_last_succeeded_when_the_loaded_disc_is_already_ripped() {
    let rig = Rig::build(disc_in_drive(2, None), false, |registry| {
        let mut disc = Disc::rippable("1.iso".to_string(), hash_of(2));
        disc.status = DiscStatus::Sendable;
        registry.insert(disc).unwrap();
    });
    assert_eq!(rig.status.get(), Status::LastSucceeded);
}

#[test]
fn starts_drive_empty_on_a_fresh_boot() {
    let rig = Rig::new(empty_drive(), true);
    assert_eq!(rig.status.get(), Status::DriveEmpty);
}

#[test]
fn starts_unknown_after_an_unclean_restart() {
    let rig = Rig::new(disc_in_drive(2, None), false);
    assert_eq!(rig.status.get(), Status::Unknown);
}

#[tokio::test]
async fn fresh_insert_rips_to_sendable() {
    let mut rig = Rig::new(empty_drive(), true);

    // Nothing changed: the baseline hash matches.
    assert_eq!(rig.reconcile().await, Outcome::Reconciled);
    assert_eq!(rig.status.get(), Status::DriveEmpty);

    rig.push_device(disc_in_drive(2, Some("BACKUP")));
    assert_eq!(rig.reconcile().await, Outcome::Reconciled);
    assert_eq!(rig.status.get(), Status::Ripping);

    let rippable = rig.registry.list_by_status(DiscStatus::Rippable);
    assert_eq!(rippable.len(), 1);
    assert!(rippable[0].path.ends_with("_BACKUP.iso"));
    assert_eq!(rippable[0].source_hash, Some(hash_of(2)));

    rig.wait_for_exits(1).await;
    assert_eq!(rig.reconcile().await, Outcome::Reconciled);
    assert_eq!(rig.status.get(), Status::LastSucceeded);
    assert_eq!(rig.registry.count_by_status(DiscStatus::Rippable), 0);
    assert_eq!(rig.registry.count_by_status(DiscStatus::Sendable), 1);
    assert_eq!(
        rig.statuses.lock().as_slice(),
        &[Status::Ripping, Status::LastSucceeded]
    );
}

#[tokio::test]
async fn reinserting_a_ripped_disc_does_not_rip_again() {
    let mut rig = Rig::new(empty_drive(), true);
    rig.push_device(disc_in_drive(2, None));
    rig.reconcile().await;
    rig.wait_for_exits(1).await;
    rig.reconcile().await;
    assert_eq!(rig.status.get(), Status::LastSucceeded);

    rig.push_device(empty_drive());
    rig.reconcile().await;
    assert_eq!(rig.status.get(), Status::DriveEmpty);

    rig.push_device(disc_in_drive(2, None));
    rig.reconcile().await;
    assert_eq!(rig.status.get(), Status::LastSucceeded);

    assert_eq!(rig.spawns.load(Ordering::SeqCst), 1);
    assert_eq!(rig.registry.count_by_status(DiscStatus::Sendable), 1);
    assert_eq!(
        rig.statuses.lock().as_slice(),
        &[
            Status::Ripping,
            Status::LastSucceeded,
            Status::DriveEmpty,
            Status::LastSucceeded
        ]
    );
}

#[tokio::test]
async fn waits_for_space_and_rips_once_space_frees_up() {
    let mut rig = Rig::new(empty_drive(), true);
    rig.disc_size.store(5 * GIB, Ordering::SeqCst);
    rig.free.store(6 * GIB, Ordering::SeqCst);

    rig.push_device(disc_in_drive(2, None));
    assert_eq!(
        rig.reconcile().await,
        Outcome::RepollAfter(Duration::from_secs(60))
    );
    assert_eq!(rig.status.get(), Status::WaitingForSpace);
    assert_eq!(rig.spawns.load(Ordering::SeqCst), 0);
    assert_eq!(rig.registry.count_by_status(DiscStatus::Rippable), 0);

    rig.free.store(20 * GIB, Ordering::SeqCst);
    assert_eq!(rig.reconcile().await, Outcome::Reconciled);
    assert_eq!(rig.status.get(), Status::Ripping);
}

#[tokio::test]
async fn a_disc_larger_than_the_filesystem_fails_without_retry() {
    let mut rig = Rig::new(empty_drive(), true);
    rig.disc_size.store(600 * GIB, Ordering::SeqCst);

    rig.push_device(disc_in_drive(2, None));
    assert_eq!(rig.reconcile().await, Outcome::Reconciled);
    assert_eq!(rig.status.get(), Status::LastFailed);
    assert_eq!(rig.spawns.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn an_unreadable_disc_is_flagged_and_never_recorded() {
    let mut rig = Rig::new(empty_drive(), true);
    rig.probe_ok.store(false, Ordering::SeqCst);

    rig.push_device(disc_in_drive(2, None));
    assert_eq!(rig.reconcile().await, Outcome::Reconciled);
    assert_eq!(rig.status.get(), Status::DiscInvalid);
    assert_eq!(rig.spawns.load(Ordering::SeqCst), 0);
    assert_eq!(rig.registry.count_by_status(DiscStatus::Rippable), 0);
}

#[tokio::test]
async fn a_failed_rip_purges_the_record_and_file() {
    let mut rig = Rig::new(empty_drive(), true);
    *rig.imager_mode.lock() = ImagerMode::Fail;

    rig.push_device(disc_in_drive(2, None));
    rig.reconcile().await;
    let output = rig.outputs.lock()[0].clone();
    std::fs::write(&output, b"partial").unwrap();

    rig.wait_for_exits(1).await;
    rig.reconcile().await;
    assert_eq!(rig.status.get(), Status::LastFailed);
    assert_eq!(rig.registry.count_by_status(DiscStatus::Rippable), 0);
    assert!(!output.exists());
}

#[tokio::test]
async fn swapping_discs_mid_rip_fails_the_first_and_rips_the_second() {
    let mut rig = Rig::new(empty_drive(), true);
    *rig.imager_mode.lock() = ImagerMode::Hang;

    rig.push_device(disc_in_drive(2, None));
    rig.reconcile().await;
    assert_eq!(rig.status.get(), Status::Ripping);

    // New disc while the imager is still running: terminate, then wait.
    rig.clock.advance(Duration::from_secs(1));
    *rig.imager_mode.lock() = ImagerMode::Succeed;
    rig.push_device(disc_in_drive(3, None));
    assert_eq!(rig.reconcile().await, Outcome::Reconciled);

    rig.wait_for_exits(1).await;
    rig.reconcile().await;
    assert_eq!(rig.status.get(), Status::Ripping);
    assert_eq!(rig.spawns.load(Ordering::SeqCst), 2);
    let rippable = rig.registry.list_by_status(DiscStatus::Rippable);
    assert_eq!(rippable.len(), 1);
    assert_eq!(rippable[0].source_hash, Some(hash_of(3)));

    let recorded = rig.statuses.lock().clone();
    assert!(recorded.contains(&Status::LastFailed));
    assert_eq!(recorded.last(), Some(&Status::Ripping));
}

#[tokio::test]
async fn a_restart_after_a_crash_rips_the_still_loaded_disc_again() {
    // The startup purge already removed the stale rippable record; the
    // ripper wakes Unknown with no baseline and treats the disc as new.
    let mut rig = Rig::new(disc_in_drive(2, None), false);
    assert_eq!(rig.status.get(), Status::Unknown);

    assert_eq!(rig.reconcile().await, Outcome::Reconciled);
    assert_eq!(rig.status.get(), Status::Ripping);
    assert_eq!(rig.spawns.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn ejecting_during_a_rip_terminates_and_fails_it() {
    let mut rig = Rig::new(empty_drive(), true);
    *rig.imager_mode.lock() = ImagerMode::Hang;

    rig.push_device(disc_in_drive(2, None));
    rig.reconcile().await;

    rig.push_device(empty_drive());
    assert_eq!(rig.reconcile().await, Outcome::Reconciled);

    rig.wait_for_exits(1).await;
    rig.reconcile().await;
    assert_eq!(rig.status.get(), Status::DriveEmpty);
    let recorded = rig.statuses.lock().clone();
    assert!(recorded.contains(&Status::LastFailed));
    assert_eq!(rig.registry.count_by_status(DiscStatus::Rippable), 0);
}

#[tokio::test]
async fn cleanup_without_a_rip_returns_immediately() {
    let mut rig = Rig::new(empty_drive(), true);
    rig.ripper.cleanup().await;
    assert_eq!(rig.status.get(), Status::DriveEmpty);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cleanup_waits_out_a_rip_and_finalizes_success() {
    let mut rig = Rig::new(empty_drive(), true);
    *rig.imager_mode.lock() = ImagerMode::SucceedSlowly;

    rig.push_device(disc_in_drive(2, None));
    rig.reconcile().await;
    assert_eq!(rig.status.get(), Status::Ripping);

    rig.ripper.cleanup().await;
    assert_eq!(rig.status.get(), Status::LastSucceeded);
    assert_eq!(rig.registry.count_by_status(DiscStatus::Sendable), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cleanup_fails_the_rip_when_the_disc_disappears() {
    let mut rig = Rig::new(empty_drive(), true);
    *rig.imager_mode.lock() = ImagerMode::Hang;

    rig.push_device(disc_in_drive(2, None));
    rig.reconcile().await;

    // Only the drive changes: the reconciler never sees this event,
    // the shutdown wait discovers it directly.
    rig.drive.update(empty_drive());
    rig.ripper.cleanup().await;

    assert_eq!(rig.status.get(), Status::LastFailed);
    assert_eq!(rig.registry.count_by_status(DiscStatus::Rippable), 0);
    assert_eq!(rig.registry.count_by_status(DiscStatus::Sendable), 0);
}
