// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Adapters for the external tools: the disc imager and the upload
//! transport. The daemon supervises their processes and nothing else.

use std::io;
use std::os::fd::OwnedFd;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::proc::ChildProc;

/// Commands that must be on PATH for the daemon to operate.
pub const REQUIRED_TOOLS: [&str; 2] = ["ddrescue", "rsync"];

// Host log namespace receiving imager output when journaling is on.
const IMAGER_LOG_NAMESPACE: &str = "platter-ripper";

/// Exit callback handed to a spawned tool's waiter.
pub type ExitHook = Box<dyn Fn() + Send + Sync>;

/// Spawns the block-level disc imager.
pub trait Imager: Send + 'static {
    fn spawn(
        &self,
        device: &Path,
        output: &Path,
        event_log: &Path,
        on_exit: ExitHook,
    ) -> io::Result<ChildProc>;
}

/// Spawns the remote upload tool.
pub trait Transport: Send + 'static {
    fn spawn(&self, source: &Path, target: &str, on_exit: ExitHook) -> io::Result<ChildProc>;
}

/// GNU ddrescue, tuned for optical media: direct I/O, 2048-byte
/// sectors, a 30-minute stall timeout, and an event log beside the
/// ISO for post-mortems.
#[derive(Debug, Clone, Copy)]
pub struct Ddrescue {
    /// Pipe imager output into the host journal instead of discarding it.
    pub journal_output: bool,
}

impl Imager for Ddrescue {
    fn spawn(
        &self,
        device: &Path,
        output: &Path,
        event_log: &Path,
        on_exit: ExitHook,
    ) -> io::Result<ChildProc> {
        let mut cmd = Command::new("ddrescue");
        cmd.arg("--idirect")
            .arg("--sector-size=2048")
            .arg("--timeout=30m")
            .arg(format!("--log-events={}", event_log.display()))
            .arg(device)
            .arg(output)
            .stdin(Stdio::null());

        if self.journal_output {
            let (out, err) = journal_stream()?;
            cmd.stdout(out).stderr(err);
        } else {
            cmd.stdout(Stdio::null()).stderr(Stdio::null());
        }

        tracing::info!(
            device = %device.display(),
            output = %output.display(),
            "running imager"
        );
        ChildProc::spawn(&mut cmd, move || on_exit())
    }
}

/// stdout/stderr pair feeding a `systemd-cat` helper in the imager's
/// log namespace. The helper exits when the imager closes the pipe.
fn journal_stream() -> io::Result<(Stdio, Stdio)> {
    let namespace = format!("--property=LogNamespace={IMAGER_LOG_NAMESPACE}");
    let mut helper = Command::new("systemd-run")
        .args([
            "--pipe",
            "--quiet",
            "--collect",
            "--slice-inherit",
            namespace.as_str(),
            "systemd-cat",
            "-t",
            "ddrescue",
        ])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    let Some(stdin) = helper.stdin.take() else {
        return Err(io::Error::other("journal helper has no stdin pipe"));
    };
    // Dropping the tokio handle leaves the helper to the runtime's
    // orphan reaper.
    let fd: OwnedFd = stdin.into_owned_fd()?;
    let dup = fd.try_clone()?;
    Ok((Stdio::from(fd), Stdio::from(dup)))
}

/// rsync with `--partial`: an interrupted upload keeps its remote
/// temp file and resumes on the next attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rsync;

impl Transport for Rsync {
    fn spawn(&self, source: &Path, target: &str, on_exit: ExitHook) -> io::Result<ChildProc> {
        let mut cmd = Command::new("rsync");
        cmd.arg("--partial")
            .arg(source)
            .arg(target)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        tracing::info!(source = %source.display(), target, "running transport");
        ChildProc::spawn(&mut cmd, move || on_exit())
    }
}

/// Resolve `tool` against PATH the way a shell would.
pub fn find_on_path(tool: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(tool))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "tools_tests.rs"]
mod tests;
