// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dual-axis token bucket for the display rate limiter.
//!
//! Ordinary token buckets allow bursts up to capacity; an e-paper
//! panel cannot absorb three refreshes back to back. The bucket here
//! layers a minimum spacing between consecutive takes on top of the
//! refilling budget.

use crate::clock::Clock;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Returned by [`Bucket::take`] when no token can be taken yet.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("rate limited for another {remaining:?}")]
pub struct TakeBlocked {
    /// How long to wait before a retry can succeed.
    pub remaining: Duration,
}

/// A token bucket that also enforces a minimum delay between takes
/// regardless of how many tokens are available.
#[derive(Debug, Clone)]
pub struct Bucket<C: Clock> {
    clock: C,
    capacity: u32,
    fill_delay: Duration,
    burst_delay: Duration,
    last_take: Option<Instant>,
    remaining: f64,
}

impl<C: Clock> Bucket<C> {
    /// `capacity` must be at least 1 and `fill_delay` non-zero.
    pub fn new(clock: C, capacity: u32, fill_delay: Duration, burst_delay: Duration) -> Self {
        debug_assert!(capacity >= 1, "capacity must be at least 1");
        debug_assert!(!fill_delay.is_zero(), "fill_delay must be greater than 0");
        Self {
            clock,
            capacity,
            fill_delay,
            burst_delay,
            last_take: None,
            remaining: f64::from(capacity),
        }
    }

    /// Take exactly one token, or report how long until one can be taken.
    pub fn take(&mut self) -> Result<(), TakeBlocked> {
        let now = self.clock.now();
        let available = self.available(now);
        let mut delays = Vec::new();

        if available < 1.0 {
            let missing = 1.0 - available;
            delays.push(self.fill_delay.mul_f64(missing));
        }

        if let Some(last) = self.last_take {
            let since = now.duration_since(last);
            if since < self.burst_delay {
                delays.push(self.burst_delay - since);
            }
        }

        if let Some(remaining) = delays.into_iter().max() {
            return Err(TakeBlocked { remaining });
        }

        self.last_take = Some(now);
        self.remaining = available - 1.0;
        Ok(())
    }

    /// How long until the bucket refills to capacity with no further takes.
    pub fn time_until_full(&self) -> Duration {
        let required = f64::from(self.capacity) - self.available(self.clock.now());
        if required <= 0.0 {
            return Duration::ZERO;
        }
        self.fill_delay.mul_f64(required)
    }

    fn available(&self, now: Instant) -> f64 {
        match self.last_take {
            None => f64::from(self.capacity),
            Some(last) => {
                let since = now.duration_since(last);
                let refilled = since.as_secs_f64() / self.fill_delay.as_secs_f64();
                (self.remaining + refilled).min(f64::from(self.capacity))
            }
        }
    }
}

#[cfg(test)]
#[path = "limit_tests.rs"]
mod tests;
