// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable disc registry: an append-only journal replayed into an
//! in-memory index.
//!
//! Every mutation appends one serialized op, flushes, and fsyncs
//! before it returns, so a crash at any point replays to a state that
//! matches what callers were told. On open the journal is replayed and
//! then compacted down to one `put` per live record, which bounds its
//! growth across restarts.

use parking_lot::Mutex;
use platter_core::{Disc, DiscStatus, SourceHash};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors from registry operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal corrupt at line {line}: {source}")]
    Corrupt {
        line: usize,
        source: serde_json::Error,
    },

    #[error("journal write failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("registry already has a record at {0}")]
    DuplicatePath(String),

    #[error("journal rewrite failed: {0}")]
    Rewrite(#[from] tempfile::PersistError),
}

/// Status predicate for [`Registry::find_by_hash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusFilter {
    Is(DiscStatus),
    Not(DiscStatus),
}

impl StatusFilter {
    fn matches(self, status: DiscStatus) -> bool {
        match self {
            Self::Is(want) => status == want,
            Self::Not(unwanted) => status != unwanted,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum JournalOp {
    Put { disc: Disc },
    Delete { path: String },
}

struct Inner {
    journal: File,
    index: BTreeMap<String, Disc>,
}

/// The disc registry. Cheap to share behind an `Arc`; all operations
/// take `&self` and serialize internally.
pub struct Registry {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl Registry {
    /// Open (or create) the registry at `path`, replaying and
    /// compacting any existing journal.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let index = replay(&path)?;
        compact(&path, &index)?;
        let journal = OpenOptions::new().create(true).append(true).open(&path)?;
        tracing::debug!(path = %path.display(), records = index.len(), "registry opened");
        Ok(Self {
            path,
            inner: Mutex::new(Inner { journal, index }),
        })
    }

    /// Where the journal lives on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a new record; fails if `path` is already tracked.
    pub fn insert(&self, disc: Disc) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if inner.index.contains_key(&disc.path) {
            return Err(StorageError::DuplicatePath(disc.path));
        }
        append(&mut inner.journal, &JournalOp::Put { disc: disc.clone() })?;
        inner.index.insert(disc.path.clone(), disc);
        Ok(())
    }

    /// Replace the record with the same `path`.
    pub fn update(&self, disc: Disc) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        append(&mut inner.journal, &JournalOp::Put { disc: disc.clone() })?;
        inner.index.insert(disc.path.clone(), disc);
        Ok(())
    }

    /// Remove the record at `path`. Removing a missing record is fine.
    pub fn delete(&self, path: &str) -> Result<(), StorageError> {
        let mut inner = self.inner.lock();
        if !inner.index.contains_key(path) {
            return Ok(());
        }
        append(
            &mut inner.journal,
            &JournalOp::Delete {
                path: path.to_string(),
            },
        )?;
        inner.index.remove(path);
        Ok(())
    }

    pub fn get(&self, path: &str) -> Option<Disc> {
        self.inner.lock().index.get(path).cloned()
    }

    /// The record carrying `hash` whose status passes `filter`, if any.
    pub fn find_by_hash(&self, hash: &SourceHash, filter: StatusFilter) -> Option<Disc> {
        let inner = self.inner.lock();
        inner
            .index
            .values()
            .find(|disc| disc.source_hash.as_ref() == Some(hash) && filter.matches(disc.status))
            .cloned()
    }

    pub fn list_by_status(&self, status: DiscStatus) -> Vec<Disc> {
        let inner = self.inner.lock();
        inner
            .index
            .values()
            .filter(|disc| disc.status == status)
            .cloned()
            .collect()
    }

    pub fn count_by_status(&self, status: DiscStatus) -> usize {
        let inner = self.inner.lock();
        inner
            .index
            .values()
            .filter(|disc| disc.status == status)
            .count()
    }

    /// The sendable record that is due soonest. Records with no
    /// `next_send_attempt` sort first; path breaks ties.
    pub fn next_sendable(&self) -> Option<Disc> {
        let inner = self.inner.lock();
        inner
            .index
            .values()
            .filter(|disc| disc.status == DiscStatus::Sendable)
            .min_by(|a, b| {
                (a.next_send_attempt, &a.path).cmp(&(b.next_send_attempt, &b.path))
            })
            .cloned()
    }
}

fn append(journal: &mut File, op: &JournalOp) -> Result<(), StorageError> {
    let mut line = serde_json::to_vec(op)?;
    line.push(b'\n');
    journal.write_all(&line)?;
    journal.sync_data()?;
    Ok(())
}

/// Rebuild the index from the journal. A torn final line (crash while
/// appending) is dropped; corruption anywhere else is surfaced.
fn replay(path: &Path) -> Result<BTreeMap<String, Disc>, StorageError> {
    let mut index = BTreeMap::new();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(index),
        Err(error) => return Err(error.into()),
    };

    let lines: Vec<String> = BufReader::new(file).lines().collect::<Result<_, _>>()?;
    let total = lines.len();
    for (number, line) in lines.into_iter().enumerate() {
        let op = match serde_json::from_str::<JournalOp>(&line) {
            Ok(op) => op,
            Err(_) if number + 1 == total => {
                tracing::warn!(line = number + 1, "dropping torn tail of registry journal");
                break;
            }
            Err(source) => {
                return Err(StorageError::Corrupt {
                    line: number + 1,
                    source,
                })
            }
        };
        match op {
            JournalOp::Put { disc } => {
                index.insert(disc.path.clone(), disc);
            }
            JournalOp::Delete { path } => {
                index.remove(&path);
            }
        }
    }
    Ok(index)
}

/// Rewrite the journal as one `put` per live record, atomically.
fn compact(path: &Path, index: &BTreeMap<String, Disc>) -> Result<(), StorageError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    for disc in index.values() {
        let mut line = serde_json::to_vec(&JournalOp::Put { disc: disc.clone() })?;
        line.push(b'\n');
        tmp.write_all(&line)?;
    }
    tmp.as_file().sync_data()?;
    tmp.persist(path)?;
    Ok(())
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
