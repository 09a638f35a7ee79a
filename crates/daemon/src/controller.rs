// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The controller runtime: a level-triggered reconcile loop.
//!
//! Controllers never queue events. A poll latches a single trigger;
//! any number of polls while a reconcile is pending or running
//! collapse into one subsequent pass, and each pass re-reads the world
//! from scratch. A reconciler that needs to wake itself later returns
//! [`Outcome::RepollAfter`]; the internal timer is dropped the moment
//! an external poll arrives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

/// Process exit code for an unhandled fault in a controller worker.
/// Distinct from startup failures so a supervisor can tell them apart.
pub const FAULT_EXIT_CODE: i32 = 100;

/// The only errors allowed to escape a reconciler. Any of these is
/// fatal to the whole daemon: a half-broken reconciler is harder to
/// recover than a supervised restart.
#[derive(Debug, Error)]
pub enum Fault {
    #[error("registry fault: {0}")]
    Registry(#[from] platter_storage::StorageError),

    #[error("io fault: {0}")]
    Io(#[from] std::io::Error),

    #[error("inconsistent state: {0}")]
    State(String),
}

/// What a reconcile pass decided about the future.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Do nothing until the next poll.
    Reconciled,
    /// Self-poll after the delay unless an external poll arrives first.
    RepollAfter(Duration),
}

/// Logic that drives the actual state of the world toward the desired
/// state on request. Invoked by a [`Controller`] worker, never more
/// than one call in flight per reconciler.
///
/// Reconcilers must return quickly: long-running work belongs in
/// subprocesses with detached waiters, and sleeping is expressed as
/// [`Outcome::RepollAfter`].
#[async_trait]
pub trait Reconciler: Send + 'static {
    fn name(&self) -> &'static str;

    async fn reconcile(&mut self) -> Result<Outcome, Fault>;

    /// Cancel and wait out any asynchronous work this controller owns.
    async fn cleanup(&mut self);
}

/// Cloneable trigger for one controller. Handles are handed to event
/// hooks and detached waiters; they stay valid for the life of the
/// process.
#[derive(Clone, Default)]
pub struct Handle {
    trigger: Arc<Notify>,
    canceled: Arc<AtomicBool>,
}

impl Handle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule a reconcile shortly in the future. Edge-collapsed: at
    /// most one pass is latched no matter how often this is called.
    pub fn poll(&self) {
        self.trigger.notify_one();
    }

    /// Latch cancellation and wake the worker for its cleanup pass.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::SeqCst);
        self.trigger.notify_one();
    }

    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::SeqCst)
    }

    /// A function value that polls this controller, for event hooks.
    pub fn poller(&self) -> impl Fn() + Send + Sync + 'static {
        let handle = self.clone();
        move || handle.poll()
    }

    async fn triggered(&self) {
        self.trigger.notified().await;
    }
}

/// A running controller worker.
pub struct Controller {
    handle: Handle,
    worker: JoinHandle<()>,
}

impl Controller {
    /// Start the worker for `reconciler`, triggered through `handle`.
    ///
    /// The handle is taken explicitly (rather than minted here) so the
    /// reconciler and its collaborators can capture it before the
    /// worker exists.
    pub fn spawn<R: Reconciler>(handle: Handle, reconciler: R) -> Self {
        let worker = tokio::spawn(run(handle.clone(), reconciler));
        Self { handle, worker }
    }

    pub fn handle(&self) -> Handle {
        self.handle.clone()
    }

    pub fn poll(&self) {
        self.handle.poll();
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }

    /// Wait for the worker to finish its cleanup pass and exit.
    pub async fn join(self) {
        let _ = self.worker.await;
    }
}

async fn run<R: Reconciler>(handle: Handle, mut reconciler: R) {
    let mut repoll: Option<Duration> = None;
    loop {
        match repoll.take() {
            Some(delay) => {
                tokio::select! {
                    _ = handle.triggered() => {}
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => handle.triggered().await,
        }

        if handle.is_canceled() {
            tracing::debug!(controller = reconciler.name(), "canceled, running cleanup");
            reconciler.cleanup().await;
            return;
        }

        match reconciler.reconcile().await {
            Ok(Outcome::Reconciled) => {}
            Ok(Outcome::RepollAfter(delay)) => repoll = Some(delay),
            Err(fault) => {
                tracing::error!(
                    controller = reconciler.name(),
                    error = %fault,
                    "unhandled fault in reconciler"
                );
                std::process::exit(FAULT_EXIT_CODE);
            }
        }
    }
}

/// A named event published by a controller. Subscribers are invoked
/// synchronously, in unspecified order; they are expected to be
/// `Handle::poller` closures and must not block.
#[derive(Clone, Default)]
pub struct EventHooks {
    subscribers: Arc<Mutex<Vec<Box<dyn Fn() + Send + Sync>>>>,
}

impl EventHooks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.subscribers.lock().push(Box::new(hook));
    }

    pub fn dispatch(&self) {
        for hook in self.subscribers.lock().iter() {
            hook();
        }
    }
}

#[cfg(test)]
#[path = "controller_tests.rs"]
mod tests;
