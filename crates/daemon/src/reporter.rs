// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Maps ripper status and the pending-send count onto the display.
//!
//! The panel tolerates only occasional refreshes, so updates pass a
//! dual-axis token bucket. Status transitions are what the operator is
//! waiting to see; count-only changes are deferred until the bucket is
//! full again so routine bookkeeping can never starve a status update.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use platter_core::{Bucket, Clock, DiscStatus};
use platter_storage::Registry;

use crate::controller::{Fault, Outcome, Reconciler};
use crate::display::DisplayAdapter;
use crate::ripper::{Status, StatusCell};

pub const BUCKET_CAPACITY: u32 = 3;
pub const BUCKET_FILL_DELAY: Duration = Duration::from_secs(180);
pub const BUCKET_BURST_DELAY: Duration = Duration::from_secs(30);

/// Image name for each displayable ripper status.
pub fn image_name(status: Status) -> Option<&'static str> {
    match status {
        Status::Unknown => None,
        Status::DriveEmpty => Some("insert"),
        Status::WaitingForSpace => Some("wait"),
        Status::Ripping => Some("copying"),
        Status::DiscInvalid => Some("unreadable"),
        Status::LastSucceeded => Some("success"),
        Status::LastFailed => Some("failure"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DisplayState {
    status: Status,
    disc_count: usize,
}

pub struct Reporter<D, C>
where
    D: DisplayAdapter,
    C: Clock,
{
    registry: Arc<Registry>,
    display: D,
    bucket: Bucket<C>,
    ripper_status: StatusCell,
    desired: DisplayState,
    displayed: DisplayState,
}

impl<D, C> Reporter<D, C>
where
    D: DisplayAdapter,
    C: Clock,
{
    pub fn new(registry: Arc<Registry>, display: D, clock: C, ripper_status: StatusCell) -> Self {
        let desired = DisplayState {
            status: ripper_status.get(),
            disc_count: 0,
        };
        Self {
            registry,
            display,
            bucket: Bucket::new(clock, BUCKET_CAPACITY, BUCKET_FILL_DELAY, BUCKET_BURST_DELAY),
            ripper_status,
            desired,
            displayed: DisplayState {
                status: Status::Unknown,
                disc_count: 0,
            },
        }
    }
}

#[async_trait]
impl<D, C> Reconciler for Reporter<D, C>
where
    D: DisplayAdapter,
    C: Clock + 'static,
{
    fn name(&self) -> &'static str {
        "reporter"
    }

    async fn reconcile(&mut self) -> Result<Outcome, Fault> {
        let ripper_status = self.ripper_status.get();
        if ripper_status == Status::Unknown {
            return Ok(Outcome::Reconciled);
        }

        // Keep a terminal per-disc result on screen after the disc is
        // taken out; a removed disc should not blank a useful verdict.
        let keep_terminal = ripper_status == Status::DriveEmpty && self.desired.status.is_terminal();
        if !keep_terminal {
            self.desired.status = ripper_status;
        }
        self.desired.disc_count = self.registry.count_by_status(DiscStatus::Sendable);

        if self.displayed == self.desired {
            return Ok(Outcome::Reconciled);
        }

        // Status updates usually come from user action and deserve the
        // limited refresh cycles more than disc count bookkeeping. A
        // count-only change waits for the bucket to fill back up.
        if self.desired.status == self.displayed.status {
            let delay = self.bucket.time_until_full();
            if !delay.is_zero() {
                tracing::info!(delay_s = delay.as_secs(), "deferring disc count update");
                return Ok(Outcome::RepollAfter(delay));
            }
        }

        if let Err(blocked) = self.bucket.take() {
            tracing::info!(
                delay_s = blocked.remaining.as_secs(),
                "display refresh rate limited"
            );
            return Ok(Outcome::RepollAfter(blocked.remaining));
        }

        let Some(name) = image_name(self.desired.status) else {
            return Ok(Outcome::Reconciled);
        };
        self.display.render(name, self.desired.disc_count)?;
        tracing::info!(
            image = name,
            pending = self.desired.disc_count,
            "display refreshed"
        );
        self.displayed = self.desired;
        Ok(Outcome::Reconciled)
    }

    /// One final pass so the last state reaches the display.
    async fn cleanup(&mut self) {
        if let Err(error) = self.reconcile().await {
            tracing::error!(%error, "final display refresh failed");
        }
    }
}

#[cfg(test)]
#[path = "reporter_tests.rs"]
mod tests;
