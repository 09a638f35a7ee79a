// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Linux platform glue: boot identity and udev device access.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures_util::StreamExt;
use parking_lot::Mutex;
use platter_core::DeviceSnapshot;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_udev::{AsyncMonitorSocket, Device, Enumerator, MonitorBuilder};

const BOOT_ID_PATH: &str = "/proc/sys/kernel/random/boot_id";
const BOOT_ID_MARKER: &str = "current-boot-id";

#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("udev has no block device for {}", .0.display())]
    NotFound(PathBuf),
}

/// The kernel's boot identifier, stable until the next reboot.
pub fn boot_id() -> io::Result<String> {
    Ok(std::fs::read_to_string(BOOT_ID_PATH)?.trim().to_string())
}

/// Directory for the boot marker: systemd's `RUNTIME_DIRECTORY` when
/// set, the current directory otherwise.
pub fn runtime_dir() -> PathBuf {
    std::env::var_os("RUNTIME_DIRECTORY")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// True on the first daemon start since the most recent OS boot.
///
/// Compares `boot_id` against the marker file under `runtime_dir`,
/// rewriting the marker on mismatch. Later starts within the same
/// boot see their own marker and report false.
pub fn is_fresh_boot(runtime_dir: &Path, boot_id: &str) -> io::Result<bool> {
    let marker = runtime_dir.join(BOOT_ID_MARKER);
    let recorded = match std::fs::read_to_string(&marker) {
        Ok(text) => Some(text.trim().to_string()),
        Err(error) if error.kind() == io::ErrorKind::NotFound => None,
        Err(error) => return Err(error),
    };
    if recorded.as_deref() == Some(boot_id) {
        return Ok(false);
    }
    std::fs::write(&marker, boot_id)?;
    Ok(true)
}

/// On-demand device snapshots. The production impl queries udev; tests
/// substitute a fake.
pub trait DeviceSource: Send + Sync + 'static {
    fn snapshot(&self) -> Result<DeviceSnapshot, DeviceError>;
}

/// Snapshots of one block device node, resolved through udev.
pub struct UdevSource {
    node: PathBuf,
}

impl UdevSource {
    /// `node` may be a symlink like `/dev/cdrom`; it is resolved once.
    pub fn new(node: &Path) -> io::Result<Self> {
        Ok(Self {
            node: node.canonicalize()?,
        })
    }

    pub fn node(&self) -> &Path {
        &self.node
    }
}

impl DeviceSource for UdevSource {
    fn snapshot(&self) -> Result<DeviceSnapshot, DeviceError> {
        let mut enumerator = Enumerator::new()?;
        enumerator.match_subsystem("block")?;
        for device in enumerator.scan_devices()? {
            if device.devnode() == Some(self.node.as_path()) {
                return Ok(snapshot_of(&self.node, &device));
            }
        }
        Err(DeviceError::NotFound(self.node.clone()))
    }
}

/// Device nodes of every drive udev tags as a CD-ROM.
pub fn cdrom_drives() -> io::Result<Vec<PathBuf>> {
    let mut enumerator = Enumerator::new()?;
    enumerator.match_property("ID_CDROM", "1")?;
    Ok(enumerator
        .scan_devices()?
        .filter_map(|device| device.devnode().map(Path::to_path_buf))
        .collect())
}

fn property<'a>(device: &'a Device, name: &str) -> Option<&'a str> {
    device.property_value(name).and_then(|value| value.to_str())
}

fn snapshot_of(node: &Path, device: &Device) -> DeviceSnapshot {
    DeviceSnapshot {
        node: node.to_path_buf(),
        syspath: device.syspath().to_string_lossy().into_owned(),
        is_cdrom: property(device, "ID_CDROM") == Some("1"),
        loaded: property(device, "ID_CDROM_MEDIA") == Some("1"),
        fs_label: property(device, "ID_FS_LABEL").map(str::to_string),
        diskseq: property(device, "DISKSEQ").and_then(|seq| seq.parse().ok()),
    }
}

/// Shared snapshot of the watched drive, written by the uevent monitor
/// and read by the ripper's reconciler.
#[derive(Clone)]
pub struct DeviceCell {
    inner: Arc<Mutex<DeviceSnapshot>>,
}

impl DeviceCell {
    pub fn new(snapshot: DeviceSnapshot) -> Self {
        Self {
            inner: Arc::new(Mutex::new(snapshot)),
        }
    }

    pub fn get(&self) -> DeviceSnapshot {
        self.inner.lock().clone()
    }

    /// Apply an observed update. Returns false when the update is for
    /// another device, or carries a lower diskseq than the current
    /// snapshot (an out-of-order kernel event).
    pub fn update(&self, snapshot: DeviceSnapshot) -> bool {
        let mut current = self.inner.lock();
        if snapshot.syspath != current.syspath {
            return false;
        }
        if let (Some(old), Some(new)) = (current.diskseq, snapshot.diskseq) {
            if new < old {
                return false;
            }
        }
        *current = snapshot;
        true
    }
}

/// Owns the uevent subscription task; dropping it or calling `stop`
/// ends the subscription.
pub struct WatchGuard {
    task: JoinHandle<()>,
}

impl WatchGuard {
    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for WatchGuard {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Subscribe to block-subsystem uevents for `node`. Each accepted
/// update lands in `cell` before `on_change` runs.
pub fn watch_device(
    node: PathBuf,
    cell: DeviceCell,
    on_change: impl Fn() + Send + Sync + 'static,
) -> io::Result<WatchGuard> {
    let monitor = MonitorBuilder::new()?.match_subsystem("block")?.listen()?;
    let mut events = AsyncMonitorSocket::new(monitor)?;

    let task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(error) => {
                    tracing::warn!(%error, "uevent stream error");
                    continue;
                }
            };
            let device = event.device();
            if device.devnode() != Some(node.as_path()) {
                continue;
            }
            if cell.update(snapshot_of(&node, &device)) {
                on_change();
            }
        }
    });

    Ok(WatchGuard { task })
}

#[cfg(test)]
#[path = "linux_tests.rs"]
mod tests;
