// SPDX-License-Identifier: MIT OR Apache-2.0

//! Index store: the durable on-disk representation of an index.
//!
//! ```text
//! <db>/index.lock        advisory build lock (owner pid)
//! <db>/current/          committed snapshot
//! <db>/staging/          snapshot being built
//! <db>/retired/          previous snapshot while it is being swapped out
//! ```
//!
//! A snapshot directory holds `manifest.json`, `files.tab`, `symbols.tab`
//! and `postings/<prefix>.post`.

pub mod codec;
pub mod files;
pub mod manifest;
pub mod postings;
pub mod snapshot;
pub mod symbols;

use memmap2::Mmap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::IndexError;
use manifest::{parse_manifest, Manifest, MANIFEST_FILE};
use snapshot::Snapshot;

/// Index directory name used when no `--db` is given.
pub const DEFAULT_DB_DIR: &str = ".symdex";

const CURRENT_DIR: &str = "current";
const STAGING_DIR: &str = "staging";
const RETIRED_DIR: &str = "retired";
const LOCK_FILE: &str = "index.lock";

/// Handle on one index directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    db: PathBuf,
}

impl IndexStore {
    pub fn new(db: impl Into<PathBuf>) -> Self {
        Self { db: db.into() }
    }

    pub fn db(&self) -> &Path {
        &self.db
    }

    pub fn current_dir(&self) -> PathBuf {
        self.db.join(CURRENT_DIR)
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.db.join(STAGING_DIR)
    }

    pub fn retired_dir(&self) -> PathBuf {
        self.db.join(RETIRED_DIR)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.db.join(LOCK_FILE)
    }

    /// Directory of the last committed snapshot.
    ///
    /// Falls back to `retired/` when a swap was interrupted after the old
    /// snapshot was moved aside but before the new one was renamed in.
    pub fn committed_dir(&self) -> Option<PathBuf> {
        let current = self.current_dir();
        if current.is_dir() {
            return Some(current);
        }
        let retired = self.retired_dir();
        retired.is_dir().then_some(retired)
    }

    pub fn exists(&self) -> bool {
        self.committed_dir().is_some()
    }

    /// True when a build left its staging directory behind.
    pub fn has_staging(&self) -> bool {
        self.staging_dir().exists()
    }

    pub fn load(&self) -> Result<Snapshot, IndexError> {
        let dir = self.committed_dir().ok_or_else(|| IndexError::IndexMissing {
            path: self.db.clone(),
        })?;
        let started = std::time::Instant::now();
        let snapshot = Snapshot::read_from(&dir, &self.db)?;
        tracing::debug!(
            "loaded snapshot from {} ({} files, {} symbols) in {:?}",
            dir.display(),
            snapshot.manifest().file_count,
            snapshot.manifest().symbol_count,
            started.elapsed()
        );
        Ok(snapshot)
    }

    /// Read only the manifest of the committed snapshot.
    pub fn read_manifest(&self) -> Result<Manifest, IndexError> {
        let dir = self.committed_dir().ok_or_else(|| IndexError::IndexMissing {
            path: self.db.clone(),
        })?;
        let path = dir.join(MANIFEST_FILE);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(err) => {
                return Err(IndexError::io(
                    format!("failed to read {}", path.display()),
                    err,
                ))
            }
        };
        parse_manifest(&self.db, &bytes)
    }

    /// Undo an interrupted build. Callers must hold the build lock.
    ///
    /// Returns true when anything had to be repaired.
    pub(crate) fn recover(&self) -> Result<bool, IndexError> {
        let current = self.current_dir();
        let retired = self.retired_dir();
        let staging = self.staging_dir();
        let mut repaired = false;

        if !current.exists() && retired.exists() {
            tracing::warn!("restoring previous snapshot from {}", retired.display());
            rename(&retired, &current)?;
            sync_dir(&self.db)?;
            repaired = true;
        } else if retired.exists() {
            remove_dir(&retired)?;
            repaired = true;
        }

        if staging.exists() {
            tracing::warn!("removing leftover staging directory {}", staging.display());
            remove_dir(&staging)?;
            repaired = true;
        }
        Ok(repaired)
    }

    /// Fresh, empty staging directory.
    pub(crate) fn create_staging(&self) -> Result<PathBuf, IndexError> {
        let staging = self.staging_dir();
        if staging.exists() {
            remove_dir(&staging)?;
        }
        std::fs::create_dir_all(&staging).map_err(|err| {
            IndexError::io(format!("failed to create {}", staging.display()), err)
        })?;
        Ok(staging)
    }

    pub(crate) fn discard_staging(&self) -> Result<(), IndexError> {
        let staging = self.staging_dir();
        if staging.exists() {
            remove_dir(&staging)?;
        }
        Ok(())
    }

    /// Swap the fully synced staging directory in as `current`.
    ///
    /// `current -> retired`, `staging -> current`, sync the parent, then drop
    /// `retired`. A failure of the second rename moves `retired` back.
    pub(crate) fn publish_staging(&self) -> Result<(), IndexError> {
        let current = self.current_dir();
        let retired = self.retired_dir();
        let staging = self.staging_dir();

        if retired.exists() {
            remove_dir(&retired)?;
        }
        let had_current = current.exists();
        if had_current {
            rename(&current, &retired)?;
        }
        if let Err(err) = rename(&staging, &current) {
            if had_current {
                if let Err(restore) = rename(&retired, &current) {
                    tracing::warn!("failed to restore previous snapshot: {restore}");
                }
            }
            return Err(err);
        }
        sync_dir(&self.db)?;

        if had_current {
            if let Err(err) = std::fs::remove_dir_all(&retired) {
                tracing::warn!("failed to remove {}: {err}", retired.display());
            }
        }
        Ok(())
    }

    /// Replace only the committed manifest.
    pub(crate) fn rewrite_manifest(&self, manifest: &Manifest) -> Result<(), IndexError> {
        atomic_write_bytes(&self.current_dir().join(MANIFEST_FILE), &manifest.to_json()?)
    }
}

/// Nearest index directory in `start` or one of its ancestors.
pub fn discover_db(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(DEFAULT_DB_DIR))
        .find(|db| db.is_dir())
}

pub fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Map a table file into memory.
pub(crate) fn read_mapped(path: &Path) -> Result<Mmap, IndexError> {
    let file = File::open(path).map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            IndexError::corrupt(path, "file is missing")
        } else {
            IndexError::io(format!("failed to open {}", path.display()), err)
        }
    })?;
    // SAFETY: committed snapshot files are never modified in place; a new
    // build writes a separate directory and swaps it in by rename.
    unsafe { Mmap::map(&file) }
        .map_err(|err| IndexError::io(format!("failed to map {}", path.display()), err))
}

/// Create `path`, write `bytes` and fsync the file.
pub(crate) fn write_synced(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let mut file = File::create(path)
        .map_err(|err| IndexError::io(format!("failed to create {}", path.display()), err))?;
    file.write_all(bytes)
        .map_err(|err| IndexError::io(format!("failed to write {}", path.display()), err))?;
    file.sync_all()
        .map_err(|err| IndexError::io(format!("failed to sync {}", path.display()), err))
}

#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<(), IndexError> {
    File::open(dir)
        .and_then(|handle| handle.sync_all())
        .map_err(|err| IndexError::io(format!("failed to sync {}", dir.display()), err))
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<(), IndexError> {
    Ok(())
}

/// Write to a temp file next to `path`, sync it, then rename over `path`.
pub(crate) fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let Some(parent) = path.parent() else {
        return Err(IndexError::InvalidArgument(format!(
            "cannot atomically write {} without parent",
            path.display()
        )));
    };
    let tmp_name = format!(
        ".{}.tmp-{}",
        path.file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("symdex"),
        std::process::id()
    );
    let tmp_path = parent.join(tmp_name);
    write_synced(&tmp_path, bytes)?;
    if let Err(err) = std::fs::rename(&tmp_path, path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(IndexError::io(
            format!("failed to replace {}", path.display()),
            err,
        ));
    }
    sync_dir(parent)
}

fn rename(from: &Path, to: &Path) -> Result<(), IndexError> {
    std::fs::rename(from, to).map_err(|err| {
        IndexError::io(
            format!("failed to rename {} to {}", from.display(), to.display()),
            err,
        )
    })
}

fn remove_dir(dir: &Path) -> Result<(), IndexError> {
    std::fs::remove_dir_all(dir)
        .map_err(|err| IndexError::io(format!("failed to remove {}", dir.display()), err))
}
