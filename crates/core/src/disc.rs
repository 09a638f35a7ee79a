// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The disc record: the registry's only entity.

use crate::clock::Clock;
use crate::device::SourceHash;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// First retry delay after a failed send.
pub const SEND_RETRY_BASE: Duration = Duration::from_secs(5);
/// Ceiling on the send retry delay.
pub const SEND_RETRY_MAX: Duration = Duration::from_secs(300);

/// Where a disc stands in the rip → send → cleanup lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscStatus {
    /// A rip is (or was) in flight; the file may be partial or absent.
    Rippable,
    /// The ISO is complete and waiting for upload.
    Sendable,
    /// Uploaded; the local file is about to be removed.
    Complete,
}

/// One tracked disc, keyed by its ISO filename relative to the workdir.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Disc {
    pub path: String,
    pub status: DiscStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_hash: Option<SourceHash>,
    #[serde(default)]
    pub send_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_send_attempt: Option<DateTime<Utc>>,
}

impl Disc {
    /// A fresh record for a rip that is about to start.
    pub fn rippable(path: String, source_hash: SourceHash) -> Self {
        Self {
            path,
            status: DiscStatus::Rippable,
            source_hash: Some(source_hash),
            send_attempts: 0,
            next_send_attempt: None,
        }
    }
}

/// Generate the output filename for a new rip: a decimal nanosecond
/// timestamp, the filesystem label when the disc has one, and `.iso`.
///
/// Timestamps make the name unique and keep directory listings in rip
/// order.
pub fn iso_filename<C: Clock>(clock: &C, fs_label: Option<&str>) -> String {
    let mut name = clock.epoch_ns().to_string();
    if let Some(label) = fs_label {
        name.push('_');
        name.push_str(label);
    }
    name.push_str(".iso");
    name
}

/// Delay before the next send attempt: 5s doubling per failure, capped
/// at 300s. `attempts` is the total number of failures so far.
pub fn send_backoff(attempts: u32) -> Duration {
    let exponent = attempts.saturating_sub(1).min(16);
    let delay = SEND_RETRY_BASE.saturating_mul(1u32 << exponent);
    delay.min(SEND_RETRY_MAX)
}

#[cfg(test)]
#[path = "disc_tests.rs"]
mod tests;
