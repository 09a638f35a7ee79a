// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! platter-core: domain types for the disc archiving daemon.
//!
//! Everything here is pure: no filesystem access, no subprocesses, no
//! async. The daemon crate supplies the I/O around these types.

pub mod clock;
pub mod device;
pub mod disc;
pub mod limit;

pub use clock::{utc_now, Clock, FakeClock, SystemClock};
pub use device::{DeviceSnapshot, SourceHash};
pub use disc::{iso_filename, send_backoff, Disc, DiscStatus};
pub use limit::{Bucket, TakeBlocked};
