// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon startup: environment checks, stale-state purge, controller
//! wiring, and the shutdown sequence.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use platter_core::{DiscStatus, SystemClock};
use platter_storage::{Registry, StorageError};
use thiserror::Error;

use crate::controller::{Controller, Handle};
use crate::display::LogDisplay;
use crate::fsutil::force_unlink;
use crate::linux::{
    boot_id, cdrom_drives, is_fresh_boot, runtime_dir, watch_device, DeviceError, DeviceSource,
    UdevSource,
};
use crate::media::SystemMedia;
use crate::reporter::Reporter;
use crate::ripper::{Ripper, RipperConfig, RipperDeps};
use crate::sender::Sender;
use crate::tools::{find_on_path, Ddrescue, Rsync, REQUIRED_TOOLS};

/// Filename of the registry journal inside the workdir.
pub const REGISTRY_FILENAME: &str = "platter.journal";

#[derive(Debug, Clone)]
pub struct Config {
    pub workdir: PathBuf,
    pub logdir: PathBuf,
    pub device: PathBuf,
    pub target: String,
    pub min_free_bytes: u64,
    pub journal_ddrescue_output: bool,
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("missing required commands: {0:?}")]
    MissingTools(Vec<String>),

    #[error("{} has no usable diskseq in udev; need Linux 5.15+ and a current udev", .0.display())]
    BadDiskseq(PathBuf),

    #[error("must run as root to read the drive and its device properties")]
    NotRoot,

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// The three running controllers.
pub struct Daemon {
    ripper: Controller,
    sender: Controller,
    reporter: Controller,
}

impl Daemon {
    /// Ordered shutdown: the ripper first, since it may sit on a
    /// long-running imager, then the reporter and sender together.
    pub async fn shutdown(self) {
        tracing::info!("shutting down ripper");
        self.ripper.cancel();
        self.ripper.join().await;

        tracing::info!("shutting down reporter and sender");
        self.reporter.cancel();
        self.sender.cancel();
        self.reporter.join().await;
        self.sender.join().await;
    }
}

/// Validate the environment, recover durable state, and start the
/// controllers.
pub async fn start(config: Config) -> Result<Daemon, StartupError> {
    let missing: Vec<String> = REQUIRED_TOOLS
        .iter()
        .filter(|tool| find_on_path(tool).is_none())
        .map(|tool| tool.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(StartupError::MissingTools(missing));
    }

    if !nix::unistd::Uid::effective().is_root() {
        return Err(StartupError::NotRoot);
    }

    let source = UdevSource::new(&config.device)?;
    let node = source.node().to_path_buf();
    let initial = source.snapshot()?;
    if initial.diskseq().unwrap_or(0) == 0 {
        return Err(StartupError::BadDiskseq(config.device));
    }
    if !initial.is_cdrom_drive() {
        tracing::warn!(device = %node.display(), "device is not tagged as a CD-ROM drive");
    }
    match cdrom_drives() {
        Ok(drives) => tracing::info!(?drives, "detected CD-ROM drives"),
        Err(error) => tracing::warn!(%error, "could not enumerate CD-ROM drives"),
    }

    let boot_id = boot_id()?;
    let fresh_boot = is_fresh_boot(&runtime_dir(), &boot_id)?;
    if fresh_boot {
        tracing::info!("first start since boot");
    }

    tracing::info!(workdir = %config.workdir.display(), "staging in workdir");
    let registry = Arc::new(Registry::open(config.workdir.join(REGISTRY_FILENAME))?);
    purge_stale_discs(&registry, &config.workdir)?;

    let ripper_handle = Handle::new();
    let sender_handle = Handle::new();
    let reporter_handle = Handle::new();

    let mut ripper = Ripper::new(
        RipperDeps {
            registry: Arc::clone(&registry),
            source,
            media: SystemMedia,
            imager: Ddrescue {
                journal_output: config.journal_ddrescue_output,
            },
            clock: SystemClock,
        },
        RipperConfig {
            workdir: config.workdir.clone(),
            event_log_dir: config.logdir,
            min_free_bytes: config.min_free_bytes,
            boot_id,
        },
        ripper_handle.clone(),
        initial,
        fresh_boot,
    );

    let sender = Sender::new(
        Arc::clone(&registry),
        Rsync,
        SystemClock,
        sender_handle.clone(),
        config.target,
        config.workdir,
    );

    let reporter = Reporter::new(registry, LogDisplay, SystemClock, ripper.status_cell());

    // Cyclic wiring, by function value only: status changes poll the
    // sender and reporter, send successes poll the reporter.
    ripper.on_status_change().subscribe(sender_handle.poller());
    ripper.on_status_change().subscribe(reporter_handle.poller());
    sender.on_send_success().subscribe(reporter_handle.poller());

    let watch = watch_device(node, ripper.device_cell(), ripper_handle.poller())?;
    ripper.attach_watch(watch);

    let ripper = Controller::spawn(ripper_handle, ripper);
    let sender = Controller::spawn(sender_handle, sender);
    let reporter = Controller::spawn(reporter_handle, reporter);

    // First reconcile for everyone: converge from whatever the world
    // looks like right now.
    ripper.poll();
    sender.poll();
    reporter.poll();

    Ok(Daemon {
        ripper,
        sender,
        reporter,
    })
}

/// Drop state a dead daemon left behind: rippable records reference
/// partial images, and complete records reference uploads that only
/// missed their local cleanup.
pub fn purge_stale_discs(registry: &Registry, workdir: &Path) -> Result<(), StorageError> {
    for disc in registry.list_by_status(DiscStatus::Rippable) {
        force_unlink(&workdir.join(&disc.path))?;
        registry.delete(&disc.path)?;
        tracing::info!(path = %disc.path, "cleaned up incomplete rip");
    }

    for disc in registry.list_by_status(DiscStatus::Complete) {
        force_unlink(&workdir.join(&disc.path))?;
        registry.delete(&disc.path)?;
        tracing::info!(path = %disc.path, "cleaned up sent disc");
    }

    Ok(())
}

#[cfg(test)]
#[path = "startup_tests.rs"]
mod tests;
