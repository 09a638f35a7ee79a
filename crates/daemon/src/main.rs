// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! platterd entry point.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

use platter_daemon::startup::{self, Config};

/// Watch an optical drive and archive every inserted disc to a remote
/// server.
#[derive(Debug, Parser)]
#[command(name = "platterd", version, about)]
struct Cli {
    /// The directory to stage ISOs and track their status
    #[arg(long, default_value = ".", value_parser = writable_dir)]
    workdir: PathBuf,

    /// The directory for imager event logs
    #[arg(long, default_value = ".", value_parser = writable_dir)]
    logdir: PathBuf,

    /// The CD-ROM drive to rip from
    #[arg(long, default_value = "/dev/cdrom", value_parser = readable_path)]
    device: PathBuf,

    /// The base rsync target to receive ISOs
    #[arg(long)]
    target: String,

    /// Only rip when this much space will be free after
    #[arg(long, default_value_t = 5 * (1u64 << 30))]
    min_free_bytes: u64,

    /// Write ddrescue output to the "platter-ripper" journal namespace
    #[arg(long)]
    journal_ddrescue_output: bool,
}

fn writable_dir(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if !path.is_dir() {
        return Err(format!("{value} is not a directory"));
    }
    match path.metadata() {
        Ok(meta) if !meta.permissions().readonly() => Ok(path),
        Ok(_) => Err(format!("{value} is not writable")),
        Err(error) => Err(format!("{value}: {error}")),
    }
}

fn readable_path(value: &str) -> Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.exists() {
        Ok(path)
    } else {
        Err(format!("{value} does not exist"))
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("PLATTER_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let (mut interrupt, mut terminate) =
        match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
            (Ok(interrupt), Ok(terminate)) => (interrupt, terminate),
            _ => {
                tracing::error!("cannot install signal handlers");
                return ExitCode::from(1);
            }
        };

    let workdir = match cli.workdir.canonicalize() {
        Ok(workdir) => workdir,
        Err(error) => {
            tracing::error!(%error, "cannot resolve workdir");
            return ExitCode::from(1);
        }
    };

    let config = Config {
        workdir,
        logdir: cli.logdir,
        device: cli.device,
        target: cli.target,
        min_free_bytes: cli.min_free_bytes,
        journal_ddrescue_output: cli.journal_ddrescue_output,
    };

    let daemon = match startup::start(config).await {
        Ok(daemon) => daemon,
        Err(error) => {
            tracing::error!(%error, "startup failed");
            return ExitCode::from(1);
        }
    };

    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
    tracing::info!("received stop signal");

    daemon.shutdown().await;
    ExitCode::SUCCESS
}
