// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Child process supervision.
//!
//! Reconcilers must never block on a subprocess: a [`ChildProc`] parks
//! a detached waiter task on the child's exit, the waiter records the
//! exit status and pokes the owning controller, and the reconciler
//! only ever reads the recorded status.

use std::io;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tokio::process::Command;
use tokio::task::JoinHandle;

/// Grace between SIGTERM and SIGKILL during shutdown waits.
pub const KILL_GRACE: Duration = Duration::from_secs(30);

/// A supervised child process.
pub struct ChildProc {
    pid: Pid,
    exit: Arc<Mutex<Option<ExitStatus>>>,
    waiter: Option<JoinHandle<()>>,
}

impl ChildProc {
    /// Spawn `cmd` and park a detached waiter on its exit. The waiter
    /// records the exit status before invoking `on_exit`, so a
    /// reconcile triggered by the callback always observes the exit.
    pub fn spawn(
        cmd: &mut Command,
        on_exit: impl Fn() + Send + Sync + 'static,
    ) -> io::Result<Self> {
        let mut child = cmd.spawn()?;
        let Some(pid) = child.id() else {
            return Err(io::Error::other("child exited before its pid could be read"));
        };
        let pid = Pid::from_raw(pid as i32);

        let exit = Arc::new(Mutex::new(None));
        let slot = Arc::clone(&exit);
        let waiter = tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => *slot.lock() = Some(status),
                Err(error) => tracing::error!(%error, "wait on child process failed"),
            }
            on_exit();
        });

        Ok(Self {
            pid,
            exit,
            waiter: Some(waiter),
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Non-blocking status read; `None` while the child is running.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        *self.exit.lock()
    }

    /// Ask the child to stop. Safe to call repeatedly and after exit.
    pub fn terminate(&self) {
        if self.exit_status().is_some() {
            return;
        }
        if let Err(error) = signal::kill(self.pid, Signal::SIGTERM) {
            tracing::warn!(pid = %self.pid, %error, "SIGTERM failed");
        }
    }

    /// Block until the child exits on its own.
    pub async fn wait(&mut self) -> Option<ExitStatus> {
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.await;
        }
        self.exit_status()
    }

    /// Terminate, give [`KILL_GRACE`], then SIGKILL. Used at shutdown
    /// for tools that may ignore the polite signal.
    pub async fn shutdown(&mut self) -> Option<ExitStatus> {
        self.terminate();
        if let Some(mut waiter) = self.waiter.take() {
            if tokio::time::timeout(KILL_GRACE, &mut waiter).await.is_err() {
                tracing::warn!(pid = %self.pid, "grace expired, sending SIGKILL");
                if let Err(error) = signal::kill(self.pid, Signal::SIGKILL) {
                    tracing::warn!(pid = %self.pid, %error, "SIGKILL failed");
                }
                let _ = waiter.await;
            }
        }
        self.exit_status()
    }
}

#[cfg(test)]
#[path = "proc_tests.rs"]
mod tests;
