// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The ripper owns the drive.
//!
//! It correlates uevent-driven device snapshots with the durable disc
//! fingerprint so a disc is imaged exactly once per session, applies
//! free-space backpressure, and supervises the imager subprocess. All
//! decisions are level-triggered: each reconcile re-reads the device
//! cell and the registry and converges from whatever it finds.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use platter_core::{iso_filename, Clock, DeviceSnapshot, Disc, DiscStatus, SourceHash};
use platter_storage::{Registry, StatusFilter};

use crate::controller::{EventHooks, Fault, Handle, Outcome, Reconciler};
use crate::fsutil::force_unlink;
use crate::linux::{DeviceCell, DeviceSource, WatchGuard};
use crate::media::MediaAccess;
use crate::proc::ChildProc;
use crate::tools::Imager;

/// Delay between free-space re-checks while a disc waits.
const SPACE_REPOLL: Duration = Duration::from_secs(60);

/// Poll interval while waiting out an in-flight rip at shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_secs(2);

/// Observable drive/rip state. `Unknown` only occurs when a daemon
/// that crashed mid-rip restarts with a disc it cannot vouch for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Unknown,
    DriveEmpty,
    WaitingForSpace,
    Ripping,
    DiscInvalid,
    LastSucceeded,
    LastFailed,
}

impl Status {
    /// Terminal per-disc states: a result worth keeping on screen
    /// after the disc is taken out.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::DiscInvalid | Self::LastSucceeded | Self::LastFailed)
    }
}

/// Shared view of the ripper status. Only the ripper writes it; other
/// controllers read it level-triggered.
#[derive(Clone)]
pub struct StatusCell(Arc<Mutex<Status>>);

impl StatusCell {
    pub fn new(status: Status) -> Self {
        Self(Arc::new(Mutex::new(status)))
    }

    pub fn get(&self) -> Status {
        *self.0.lock()
    }

    /// Store `status`, reporting whether it differs from the old value.
    pub(crate) fn set(&self, status: Status) -> bool {
        let mut current = self.0.lock();
        if *current == status {
            false
        } else {
            *current = status;
            true
        }
    }
}

/// Everything the ripper borrows from the outside world.
pub struct RipperDeps<S, M, I, C> {
    pub registry: Arc<Registry>,
    pub source: S,
    pub media: M,
    pub imager: I,
    pub clock: C,
}

pub struct RipperConfig {
    /// Staging directory for ISOs; record paths are relative to it.
    pub workdir: PathBuf,
    /// Directory for per-rip imager event logs.
    pub event_log_dir: PathBuf,
    /// Space that must remain free after a rip completes.
    pub min_free_bytes: u64,
    /// This boot's kernel identifier, folded into disc fingerprints.
    pub boot_id: String,
}

pub struct Ripper<S, M, I, C>
where
    S: DeviceSource,
    M: MediaAccess,
    I: Imager,
    C: Clock,
{
    deps: RipperDeps<S, M, I, C>,
    config: RipperConfig,
    handle: Handle,
    device: DeviceCell,
    status: StatusCell,
    on_status_change: EventHooks,
    last_source_hash: Option<SourceHash>,
    rip: Option<ChildProc>,
    watch: Option<WatchGuard>,
}

impl<S, M, I, C> Ripper<S, M, I, C>
where
    S: DeviceSource,
    M: MediaAccess,
    I: Imager,
    C: Clock,
{
    /// Build the ripper and derive its starting state from `initial`:
    ///
    /// - a registry record with the current fingerprint and a status
    ///   past `Rippable` means the loaded disc is already ripped;
    /// - otherwise a fresh boot means the drive state is trustworthy
    ///   and the current fingerprint becomes the baseline;
    /// - otherwise this daemon replaced one that died mid-boot-cycle,
    ///   and nothing about the drive can be assumed.
    pub fn new(
        deps: RipperDeps<S, M, I, C>,
        config: RipperConfig,
        handle: Handle,
        initial: DeviceSnapshot,
        fresh_boot: bool,
    ) -> Self {
        let current = initial.source_hash(&config.boot_id);
        let already_ripped = current.as_ref().is_some_and(|hash| {
            deps.registry
                .find_by_hash(hash, StatusFilter::Not(DiscStatus::Rippable))
                .is_some()
        });

        let (status, last_source_hash) = if already_ripped {
            (Status::LastSucceeded, current)
        } else if fresh_boot {
            (Status::DriveEmpty, current)
        } else {
            (Status::Unknown, None)
        };
        tracing::info!(?status, "ripper starting");

        Self {
            deps,
            config,
            handle,
            device: DeviceCell::new(initial),
            status: StatusCell::new(status),
            on_status_change: EventHooks::new(),
            last_source_hash,
            rip: None,
            watch: None,
        }
    }

    /// The cell the uevent monitor writes into.
    pub fn device_cell(&self) -> DeviceCell {
        self.device.clone()
    }

    pub fn status_cell(&self) -> StatusCell {
        self.status.clone()
    }

    /// Fired after every observable status transition.
    pub fn on_status_change(&self) -> EventHooks {
        self.on_status_change.clone()
    }

    /// Hand over the uevent subscription; cleanup stops it first.
    pub fn attach_watch(&mut self, watch: WatchGuard) {
        self.watch = Some(watch);
    }

    fn set_status(&self, status: Status) {
        if self.status.set(status) {
            tracing::info!(?status, "ripper status");
            self.on_status_change.dispatch();
        }
    }

    /// Free-space gate: `Some(outcome)` short-circuits the reconcile.
    fn check_min_free_space(&self, device: &DeviceSnapshot) -> Result<Option<Outcome>, Fault> {
        let disc_size = self.deps.media.device_size(&device.node)?;
        let need_free = disc_size + self.config.min_free_bytes;
        let space = self.deps.media.fs_space(&self.config.workdir)?;

        if need_free > space.total {
            tracing::error!(
                need_free,
                total = space.total,
                "disc too large for the staging filesystem"
            );
            self.set_status(Status::LastFailed);
            return Ok(Some(Outcome::Reconciled));
        }

        if space.free < need_free {
            tracing::info!(free = space.free, need_free, "waiting for free space");
            self.set_status(Status::WaitingForSpace);
            return Ok(Some(Outcome::RepollAfter(SPACE_REPOLL)));
        }

        Ok(None)
    }

    fn start_rip(&mut self, device: &DeviceSnapshot, hash: SourceHash) -> Result<(), Fault> {
        let filename = iso_filename(&self.deps.clock, device.fs_label());
        tracing::info!(
            device = %device.node.display(),
            diskseq = ?device.diskseq,
            path = %filename,
            "ready to rip"
        );

        self.deps
            .registry
            .insert(Disc::rippable(filename.clone(), hash))?;
        self.last_source_hash = Some(hash);

        let output = self.config.workdir.join(&filename);
        let event_log = self.config.event_log_dir.join(format!("{filename}.log"));
        let rip = self.deps.imager.spawn(
            &device.node,
            &output,
            &event_log,
            Box::new(self.handle.poller()),
        )?;
        self.rip = Some(rip);
        self.set_status(Status::Ripping);
        Ok(())
    }

    fn finalize_rip_success(&mut self) -> Result<(), Fault> {
        let found = self.last_source_hash.as_ref().and_then(|hash| {
            self.deps
                .registry
                .find_by_hash(hash, StatusFilter::Is(DiscStatus::Rippable))
        });
        let Some(mut disc) = found else {
            return Err(Fault::State(
                "no rippable record for the finished rip".to_string(),
            ));
        };
        disc.status = DiscStatus::Sendable;
        self.deps.registry.update(disc)?;

        tracing::info!("rip succeeded");
        self.rip = None;
        self.set_status(Status::LastSucceeded);
        Ok(())
    }

    fn finalize_rip_failure(&mut self, status: Option<std::process::ExitStatus>) -> Result<(), Fault> {
        let found = self.last_source_hash.as_ref().and_then(|hash| {
            self.deps
                .registry
                .find_by_hash(hash, StatusFilter::Is(DiscStatus::Rippable))
        });
        if let Some(disc) = found {
            force_unlink(&self.config.workdir.join(&disc.path))?;
            self.deps.registry.delete(&disc.path)?;
        }

        match status.and_then(|status| status.code()) {
            Some(code) => tracing::info!(code, "rip failed"),
            None => tracing::info!("rip failed (terminated by signal)"),
        }
        self.rip = None;
        self.set_status(Status::LastFailed);
        Ok(())
    }
}

#[async_trait]
impl<S, M, I, C> Reconciler for Ripper<S, M, I, C>
where
    S: DeviceSource,
    M: MediaAccess,
    I: Imager,
    C: Clock + 'static,
{
    fn name(&self) -> &'static str {
        "ripper"
    }

    async fn reconcile(&mut self) -> Result<Outcome, Fault> {
        let device = self.device.get();
        let source_hash = device.source_hash(&self.config.boot_id);
        let loaded = device.is_cdrom_loaded();

        if self.rip.is_some() {
            if source_hash != self.last_source_hash || !loaded {
                if let Some(rip) = &self.rip {
                    rip.terminate();
                }
            }
            match self.rip.as_ref().and_then(ChildProc::exit_status) {
                None => return Ok(Outcome::Reconciled),
                Some(status) if status.success() => self.finalize_rip_success()?,
                Some(status) => self.finalize_rip_failure(Some(status))?,
            }
        }

        // A loaded disc whose fingerprint already has a record past
        // Rippable was ripped earlier in this boot; surface that
        // instead of ripping it again.
        if loaded {
            if let Some(hash) = source_hash {
                let ripped = self
                    .deps
                    .registry
                    .find_by_hash(&hash, StatusFilter::Not(DiscStatus::Rippable))
                    .is_some();
                if ripped {
                    self.last_source_hash = Some(hash);
                    self.set_status(Status::LastSucceeded);
                    return Ok(Outcome::Reconciled);
                }
            }
        }

        if source_hash == self.last_source_hash {
            return Ok(Outcome::Reconciled);
        }

        if !loaded {
            self.set_status(Status::DriveEmpty);
            return Ok(Outcome::Reconciled);
        }

        if let Err(error) = self.deps.media.probe_volume_descriptor(&device.node) {
            tracing::warn!(%error, "quick read check failed, refusing to rip disc");
            self.set_status(Status::DiscInvalid);
            return Ok(Outcome::Reconciled);
        }

        if let Some(outcome) = self.check_min_free_space(&device)? {
            return Ok(outcome);
        }

        let Some(hash) = source_hash else {
            // Refused at startup, so a vanished diskseq mid-run is a
            // kernel hiccup; wait for the next event.
            tracing::warn!("loaded disc has no diskseq, cannot fingerprint it");
            return Ok(Outcome::Reconciled);
        };

        self.start_rip(&device, hash)?;
        Ok(Outcome::Reconciled)
    }

    /// Stop the uevent subscription, then wait out any in-flight rip,
    /// watching the drive directly: a disc swap during the wait turns
    /// the rip into a failure even if the imager exits zero.
    async fn cleanup(&mut self) {
        if let Some(watch) = self.watch.take() {
            watch.stop();
        }

        if self.rip.is_none() {
            return;
        }
        tracing::info!("waiting for the in-flight rip to finish");

        let mut disc_changed = false;
        loop {
            if self.rip.as_ref().and_then(ChildProc::exit_status).is_some() {
                break;
            }
            tokio::time::sleep(SHUTDOWN_POLL).await;
            if self.rip.as_ref().and_then(ChildProc::exit_status).is_some() {
                break;
            }

            match self.deps.source.snapshot() {
                Ok(device) => {
                    let hash = device.source_hash(&self.config.boot_id);
                    if hash != self.last_source_hash || !device.is_cdrom_loaded() {
                        disc_changed = true;
                        if let Some(rip) = &self.rip {
                            rip.terminate();
                        }
                        break;
                    }
                }
                Err(error) => {
                    tracing::warn!(%error, "device snapshot failed during shutdown wait")
                }
            }
        }

        let status = match self.rip.as_mut() {
            Some(rip) => rip.shutdown().await,
            None => None,
        };

        let result = match status {
            Some(status) if status.success() && !disc_changed => self.finalize_rip_success(),
            other => self.finalize_rip_failure(other),
        };
        if let Err(error) = result {
            tracing::error!(%error, "rip finalization failed during shutdown");
        }
    }
}

#[cfg(test)]
#[path = "ripper_tests.rs"]
mod tests;
