// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use std::io::Write as _;
use tempfile::tempdir;

#[test]
fn probe_succeeds_on_a_file_with_seventeen_sectors() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("disc.img");
    let mut image = File::create(&path).unwrap();
    image.write_all(&vec![0u8; (17 * SECTOR_SIZE) as usize]).unwrap();
    drop(image);

    SystemMedia.probe_volume_descriptor(&path).unwrap();
}

#[test]
fn probe_fails_on_a_truncated_image() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("disc.img");
    std::fs::write(&path, vec![0u8; SECTOR_SIZE as usize]).unwrap();

    assert!(SystemMedia.probe_volume_descriptor(&path).is_err());
}

#[test]
fn probe_fails_on_a_missing_device() {
    let dir = tempdir().unwrap();
    assert!(SystemMedia
        .probe_volume_descriptor(&dir.path().join("nope"))
        .is_err());
}

#[test]
fn device_size_reports_the_byte_length() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("disc.img");
    std::fs::write(&path, vec![0u8; 4096]).unwrap();

    assert_eq!(SystemMedia.device_size(&path).unwrap(), 4096);
}

#[test]
fn fs_space_is_sane() {
    let dir = tempdir().unwrap();
    let space = SystemMedia.fs_space(dir.path()).unwrap();
    assert!(space.total > 0);
    assert!(space.free <= space.total);
}
