// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The device oracle: pure queries over a captured udev device state.
//!
//! A [`DeviceSnapshot`] is a value copied out of a udev device at one
//! point in time. All drive decisions in the daemon are made against
//! snapshots, which keeps the ripper's state machine testable without
//! hardware.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;

/// Byte length of a [`SourceHash`] (SHA-256 output).
pub const SOURCE_HASH_LEN: usize = 32;

// ASCII unit separator, joining the fingerprint fields.
const UNIT_SEP: u8 = 0x1f;

/// A stable fingerprint of one disc session within one boot.
///
/// Derived from the kernel boot-id, the device's bus path, and the
/// disk sequence counter. The same disc session always hashes the
/// same; a reboot or a media change yields a different value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceHash([u8; SOURCE_HASH_LEN]);

impl SourceHash {
    pub fn as_bytes(&self) -> &[u8; SOURCE_HASH_LEN] {
        &self.0
    }
}

impl fmt::Display for SourceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for SourceHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SourceHash({self})")
    }
}

impl Serialize for SourceHash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for SourceHash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let text = <&str>::deserialize(deserializer)?;
        if text.len() != SOURCE_HASH_LEN * 2 || !text.is_ascii() {
            return Err(serde::de::Error::custom(format!(
                "source hash must be {} hex chars: {:?}",
                SOURCE_HASH_LEN * 2,
                text
            )));
        }
        let mut out = [0u8; SOURCE_HASH_LEN];
        for (i, slot) in out.iter_mut().enumerate() {
            let pair = &text[i * 2..i * 2 + 2];
            *slot = u8::from_str_radix(pair, 16)
                .map_err(|_| serde::de::Error::custom(format!("bad hex in source hash: {pair:?}")))?;
        }
        Ok(Self(out))
    }
}

/// Point-in-time state of the watched drive, captured from udev.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSnapshot {
    /// Device node (e.g. `/dev/sr0`, after resolving symlinks).
    pub node: PathBuf,
    /// Kernel bus path (udev syspath); stable across media changes.
    pub syspath: String,
    /// `ID_CDROM == "1"`
    pub is_cdrom: bool,
    /// `ID_CDROM_MEDIA == "1"`
    pub loaded: bool,
    /// `ID_FS_LABEL`, when the media carries one.
    pub fs_label: Option<String>,
    /// `DISKSEQ`: the kernel's per-disc-session counter.
    pub diskseq: Option<u64>,
}

impl DeviceSnapshot {
    pub fn is_cdrom_drive(&self) -> bool {
        self.is_cdrom
    }

    pub fn is_cdrom_loaded(&self) -> bool {
        self.loaded
    }

    pub fn fs_label(&self) -> Option<&str> {
        self.fs_label.as_deref()
    }

    pub fn diskseq(&self) -> Option<u64> {
        self.diskseq
    }

    /// Fingerprint of the current disc session, or `None` when the
    /// kernel exposes no disk sequence for the device.
    pub fn source_hash(&self, boot_id: &str) -> Option<SourceHash> {
        let diskseq = self.diskseq?;
        let mut hasher = Sha256::new();
        hasher.update(boot_id.as_bytes());
        hasher.update([UNIT_SEP]);
        hasher.update(self.syspath.as_bytes());
        hasher.update([UNIT_SEP]);
        hasher.update(diskseq.to_string().as_bytes());
        Some(SourceHash(hasher.finalize().into()))
    }
}

#[cfg(test)]
#[path = "device_tests.rs"]
mod tests;
