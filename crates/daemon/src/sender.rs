// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drains sendable discs to the remote target.
//!
//! One upload at a time, picked by earliest retry time. Failures back
//! off exponentially per record; nothing is ever given up on, because
//! the whole point of the box is that no disc is lost.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::TimeDelta;
use platter_core::{send_backoff, utc_now, Clock, DiscStatus};
use platter_storage::Registry;

use crate::controller::{EventHooks, Fault, Handle, Outcome, Reconciler};
use crate::fsutil::force_unlink;
use crate::proc::ChildProc;
use crate::tools::Transport;

struct SendJob {
    proc: ChildProc,
    path: String,
}

pub struct Sender<T, C>
where
    T: Transport,
    C: Clock,
{
    registry: Arc<Registry>,
    transport: T,
    clock: C,
    handle: Handle,
    target_base: String,
    workdir: PathBuf,
    on_send_success: EventHooks,
    current: Option<SendJob>,
}

impl<T, C> Sender<T, C>
where
    T: Transport,
    C: Clock,
{
    pub fn new(
        registry: Arc<Registry>,
        transport: T,
        clock: C,
        handle: Handle,
        target_base: String,
        workdir: PathBuf,
    ) -> Self {
        Self {
            registry,
            transport,
            clock,
            handle,
            target_base,
            workdir,
            on_send_success: EventHooks::new(),
            current: None,
        }
    }

    /// Fired after a disc is uploaded and cleaned up.
    pub fn on_send_success(&self) -> EventHooks {
        self.on_send_success.clone()
    }

    fn finalize_send_success(&mut self) -> Result<(), Fault> {
        let Some(job) = self.current.take() else {
            return Ok(());
        };
        let Some(mut disc) = self.registry.get(&job.path) else {
            return Err(Fault::State(format!(
                "record for the finished send of {} vanished",
                job.path
            )));
        };

        disc.status = DiscStatus::Complete;
        self.registry.update(disc)?;
        force_unlink(&self.workdir.join(&job.path))?;
        self.registry.delete(&job.path)?;

        tracing::info!(path = %job.path, "sent and cleaned up");
        self.on_send_success.dispatch();
        Ok(())
    }

    fn finalize_send_failure(&mut self) -> Result<(), Fault> {
        let Some(job) = self.current.take() else {
            return Ok(());
        };
        let Some(mut disc) = self.registry.get(&job.path) else {
            return Err(Fault::State(format!(
                "record for the failed send of {} vanished",
                job.path
            )));
        };

        disc.send_attempts += 1;
        let backoff = send_backoff(disc.send_attempts);
        let backoff = TimeDelta::from_std(backoff).unwrap_or_else(|_| TimeDelta::zero());
        disc.next_send_attempt = Some(utc_now(&self.clock) + backoff);

        tracing::info!(
            path = %disc.path,
            attempts = disc.send_attempts,
            backoff_s = backoff.num_seconds(),
            "send failed, will retry"
        );
        self.registry.update(disc)?;
        Ok(())
    }
}

#[async_trait]
impl<T, C> Reconciler for Sender<T, C>
where
    T: Transport,
    C: Clock + 'static,
{
    fn name(&self) -> &'static str {
        "sender"
    }

    async fn reconcile(&mut self) -> Result<Outcome, Fault> {
        if self.current.is_some() {
            match self.current.as_ref().and_then(|job| job.proc.exit_status()) {
                None => return Ok(Outcome::Reconciled),
                Some(status) if status.success() => self.finalize_send_success()?,
                Some(_) => self.finalize_send_failure()?,
            }
        }

        let Some(disc) = self.registry.next_sendable() else {
            return Ok(Outcome::Reconciled);
        };

        if let Some(due) = disc.next_send_attempt {
            let now = utc_now(&self.clock);
            if due > now {
                let delay = (due - now).to_std().unwrap_or_default();
                tracing::info!(path = %disc.path, delay_s = delay.as_secs(), "send not due yet");
                return Ok(Outcome::RepollAfter(delay));
            }
        }

        let source = self.workdir.join(&disc.path);
        let target = format!("{}/{}", self.target_base, disc.path);
        let proc = self.transport.spawn(
            &source,
            &target,
            Box::new(self.handle.poller()),
        )?;
        self.current = Some(SendJob {
            proc,
            path: disc.path,
        });
        Ok(Outcome::Reconciled)
    }

    /// Stop the in-flight upload; `--partial` keeps the remote temp so
    /// the next daemon run resumes where this one left off.
    async fn cleanup(&mut self) {
        let Some(job) = self.current.as_mut() else {
            return;
        };
        tracing::info!(path = %job.path, "canceling in-flight send");
        let _ = job.proc.shutdown().await;
    }
}

#[cfg(test)]
#[path = "sender_tests.rs"]
mod tests;
