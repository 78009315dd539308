// SPDX-License-Identifier: MIT OR Apache-2.0

//! Exclusive build lock on an index directory.
//!
//! The lock is an fs2 advisory lock on `<db>/index.lock`. While held, the
//! file contains the owner's pid; it is emptied on release. The OS drops the
//! lock when the owner dies, so a leftover pid with a free lock marks an
//! interrupted build.

use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::errors::IndexError;

/// Who, if anyone, holds the lock right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    Free,
    /// Free, but a previous owner exited without releasing it.
    Stale { pid: u32 },
    Held { pid: Option<u32> },
}

/// RAII build lock; released on drop.
#[derive(Debug)]
pub struct BuildLock {
    file: File,
    path: PathBuf,
}

impl BuildLock {
    /// Take the lock without blocking, failing with `Busy` when another build
    /// holds it.
    pub fn acquire(lock_path: &Path) -> Result<Self, IndexError> {
        let mut file = open_lock_file(lock_path)?;
        match file.try_lock_exclusive() {
            Ok(()) => {}
            Err(err) if is_contended(&err) => {
                let pid = read_pid(&mut file);
                return Err(IndexError::Busy {
                    lock_path: lock_path.to_path_buf(),
                    pid,
                });
            }
            Err(err) => {
                return Err(IndexError::io(
                    format!("failed to lock {}", lock_path.display()),
                    err,
                ))
            }
        }

        if let Some(previous) = read_pid(&mut file) {
            if previous != std::process::id() && process_alive(previous) {
                tracing::warn!(
                    "lock file names live pid {previous} but the lock was free; reclaiming"
                );
            } else {
                tracing::info!("reclaiming stale build lock left by pid {previous}");
            }
        }
        write_pid(&mut file, std::process::id()).map_err(|err| {
            IndexError::io(format!("failed to write {}", lock_path.display()), err)
        })?;

        Ok(Self {
            file,
            path: lock_path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for BuildLock {
    fn drop(&mut self) {
        let _ = self.file.set_len(0);
        let _ = self.file.sync_all();
        let _ = FileExt::unlock(&self.file);
    }
}

/// Inspect the lock, holding it only for the duration of the check.
pub fn inspect(lock_path: &Path) -> io::Result<LockState> {
    if !lock_path.exists() {
        return Ok(LockState::Free);
    }
    let mut file = OpenOptions::new().read(true).write(true).open(lock_path)?;
    match file.try_lock_exclusive() {
        Ok(()) => {
            let pid = read_pid(&mut file);
            let _ = FileExt::unlock(&file);
            Ok(match pid {
                Some(pid) => LockState::Stale { pid },
                None => LockState::Free,
            })
        }
        Err(err) if is_contended(&err) => Ok(LockState::Held {
            pid: read_pid(&mut file),
        }),
        Err(err) => Err(err),
    }
}

fn open_lock_file(lock_path: &Path) -> Result<File, IndexError> {
    if let Some(parent) = lock_path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| {
            IndexError::io(format!("failed to create {}", parent.display()), err)
        })?;
    }
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)
        .map_err(|err| IndexError::io(format!("failed to open {}", lock_path.display()), err))
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || (err.raw_os_error().is_some()
            && err.raw_os_error() == fs2::lock_contended_error().raw_os_error())
}

fn read_pid(file: &mut File) -> Option<u32> {
    let mut content = String::new();
    file.seek(SeekFrom::Start(0)).ok()?;
    file.read_to_string(&mut content).ok()?;
    content.trim().parse().ok()
}

fn write_pid(file: &mut File, pid: u32) -> io::Result<()> {
    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    writeln!(file, "{pid}")?;
    file.sync_all()
}

#[cfg(unix)]
pub fn process_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

#[cfg(not(unix))]
pub fn process_alive(_pid: u32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn second_acquire_is_busy_with_owner_pid() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("index.lock");
        let held = BuildLock::acquire(&path).expect("first lock");

        let err = BuildLock::acquire(&path).expect_err("second lock");
        match err {
            IndexError::Busy { pid, .. } => assert_eq!(pid, Some(std::process::id())),
            other => panic!("expected busy, got {other}"),
        }
        assert_eq!(
            inspect(&path).expect("inspect"),
            LockState::Held {
                pid: Some(std::process::id())
            }
        );

        drop(held);
        assert_eq!(inspect(&path).expect("inspect"), LockState::Free);
        BuildLock::acquire(&path).expect("lock after release");
    }

    #[test]
    fn leftover_pid_is_reported_stale_and_reclaimed() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("index.lock");
        std::fs::write(&path, "999999\n").expect("write stale pid");

        assert_eq!(inspect(&path).expect("inspect"), LockState::Stale { pid: 999_999 });
        let lock = BuildLock::acquire(&path).expect("reclaim");
        let content = std::fs::read_to_string(lock.path()).expect("read lock");
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn missing_lock_file_is_free() {
        let dir = TempDir::new().expect("tempdir");
        assert_eq!(
            inspect(&dir.path().join("absent.lock")).expect("inspect"),
            LockState::Free
        );
    }
}
