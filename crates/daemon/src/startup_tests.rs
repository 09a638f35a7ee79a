// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use platter_core::{DeviceSnapshot, Disc};
use tempfile::tempdir;

fn disc(path: &str, status: DiscStatus, diskseq: u64) -> Disc {
    let hash = DeviceSnapshot {
        node: "/dev/sr0".into(),
        syspath: "/sys/block/sr0".to_string(),
        is_cdrom: true,
        loaded: true,
        fs_label: None,
        diskseq: Some(diskseq),
    }
    .source_hash("boot")
    .unwrap();
    let mut disc = Disc::rippable(path.to_string(), hash);
    disc.status = status;
    disc
}

#[test]
fn purge_removes_rippable_records_and_their_files() {
    let dir = tempdir().unwrap();
    let registry = Registry::open(dir.path().join(REGISTRY_FILENAME)).unwrap();
    registry.insert(disc("1.iso", DiscStatus::Rippable, 1)).unwrap();
    std::fs::write(dir.path().join("1.iso"), b"partial").unwrap();

    purge_stale_discs(&registry, dir.path()).unwrap();

    assert!(registry.get("1.iso").is_none());
    assert!(!dir.path().join("1.iso").exists());
}

#[test]
fn purge_handles_a_rippable_record_with_no_file() {
    let dir = tempdir().unwrap();
    let registry = Registry::open(dir.path().join(REGISTRY_FILENAME)).unwrap();
    registry.insert(disc("1.iso", DiscStatus::Rippable, 1)).unwrap();

    purge_stale_discs(&registry, dir.path()).unwrap();
    assert!(registry.get("1.iso").is_none());
}

#[test]
fn purge_finishes_the_cleanup_of_sent_discs() {
    let dir = tempdir().unwrap();
    let registry = Registry::open(dir.path().join(REGISTRY_FILENAME)).unwrap();
    registry.insert(disc("1.iso", DiscStatus::Complete, 1)).unwrap();
    std::fs::write(dir.path().join("1.iso"), b"uploaded").unwrap();

    purge_stale_discs(&registry, dir.path()).unwrap();

    assert!(registry.get("1.iso").is_none());
    assert!(!dir.path().join("1.iso").exists());
}

#[test]
fn purge_leaves_sendable_discs_alone() {
    let dir = tempdir().unwrap();
    let registry = Registry::open(dir.path().join(REGISTRY_FILENAME)).unwrap();
    registry.insert(disc("1.iso", DiscStatus::Sendable, 1)).unwrap();
    std::fs::write(dir.path().join("1.iso"), b"ready").unwrap();

    purge_stale_discs(&registry, dir.path()).unwrap();

    assert_eq!(registry.get("1.iso").unwrap().status, DiscStatus::Sendable);
    assert!(dir.path().join("1.iso").exists());
}
