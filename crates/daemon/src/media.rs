// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Direct media and filesystem queries used by the ripper.
//!
//! This is the only place the daemon touches the medium itself, and it
//! reads exactly one sector of it: enough to reject unreadable or
//! non-ISO discs before handing the drive to the imager.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// ISO-9660 logical sector size.
pub const SECTOR_SIZE: u64 = 2048;

// The primary volume descriptor lives in sector 16.
// See https://wiki.osdev.org/ISO_9660#Volume_Descriptors.
const PVD_SECTOR: u64 = 16;

/// Free and total bytes of a filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FsSpace {
    pub free: u64,
    pub total: u64,
}

/// Media and filesystem I/O behind a seam so the ripper's state
/// machine can be driven without hardware.
pub trait MediaAccess: Send + 'static {
    /// Read the ISO-9660 primary volume descriptor off the disc.
    fn probe_volume_descriptor(&self, node: &Path) -> io::Result<()>;

    /// Total byte length of the block device.
    fn device_size(&self, node: &Path) -> io::Result<u64>;

    /// Free and total bytes of the filesystem holding `dir`.
    fn fs_space(&self, dir: &Path) -> io::Result<FsSpace>;
}

/// The real thing.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemMedia;

impl MediaAccess for SystemMedia {
    fn probe_volume_descriptor(&self, node: &Path) -> io::Result<()> {
        let mut device = File::open(node)?;
        device.seek(SeekFrom::Start(PVD_SECTOR * SECTOR_SIZE))?;
        let mut sector = [0u8; SECTOR_SIZE as usize];
        device.read_exact(&mut sector)?;
        Ok(())
    }

    fn device_size(&self, node: &Path) -> io::Result<u64> {
        File::open(node)?.seek(SeekFrom::End(0))
    }

    fn fs_space(&self, dir: &Path) -> io::Result<FsSpace> {
        Ok(FsSpace {
            free: fs2::available_space(dir)?,
            total: fs2::total_space(dir)?,
        })
    }
}

#[cfg(test)]
#[path = "media_tests.rs"]
mod tests;
