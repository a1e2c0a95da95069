// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! Named cross-process mutual exclusion (C1).
//!
//! Keyed by a short stable name, backed by an advisory `flock(2)` lock on a
//! `<name>.sem` token file under a configured directory. `flock` releases
//! automatically when every file descriptor referring to it is closed,
//! including on abnormal process exit — this is what makes "abnormal
//! process exit while holding the lock must not deadlock peers" hold
//! without any crash-recovery logic. The original implementation used SysV
//! semaphores for the same role; those are not released on process death,
//! so this is an intentional substitution (see DESIGN.md).

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use crate::error::{PmetricsError, Result};

/// Maximum length of a lock/segment name, matching the original
/// `SEMAPHORE_MAX_NAME_LEN` (31 bytes, leaving room for the `.sem`/`.mem`
/// suffix within historical fixed-size path buffers).
pub const MAX_NAME_LEN: usize = 31;

/// How a named resource should be brought into existence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Fail if the token already exists.
    Create,
    /// Create if missing, otherwise attach to the existing token.
    OpenOrCreate,
    /// Fail unless the token already exists.
    OpenExisting,
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(PmetricsError::NameTooLong);
    }
    if name.contains('/') {
        return Err(PmetricsError::InvalidParameters);
    }
    Ok(())
}

/// A named, advisory, cross-process exclusive lock.
pub struct NamedLock {
    name: String,
    path: PathBuf,
    file: Option<File>,
}

impl NamedLock {
    /// Construct the lock descriptor without touching the filesystem.
    /// Mirrors `lock_init`/`semaphore_init`: resources are not opened yet.
    pub fn new(directory: &Path, name: &str) -> Result<Self> {
        validate_name(name)?;
        let path = directory.join(format!("{name}.sem"));
        Ok(NamedLock {
            name: name.to_string(),
            path,
            file: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Opens (and, depending on `mode`, creates) the token file.
    pub fn open(&mut self, mode: OpenMode) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(PmetricsError::CannotCreateDirectory)?;
            }
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true);
        match mode {
            OpenMode::Create => {
                options.create_new(true);
            }
            OpenMode::OpenOrCreate => {
                options.create(true);
            }
            OpenMode::OpenExisting => {}
        }

        let file = options.open(&self.path).map_err(|e| match e.kind() {
            std::io::ErrorKind::AlreadyExists => PmetricsError::AlreadyExists,
            std::io::ErrorKind::NotFound => PmetricsError::DoesNotExist,
            _ => PmetricsError::CannotOpen(e),
        })?;

        self.file = Some(file);
        Ok(())
    }

    /// Blocks until the lock is held exclusively.
    pub fn acquire(&self) -> Result<()> {
        let file = self
            .file
            .as_ref()
            .ok_or(PmetricsError::InvalidParameters)?;
        // SAFETY: flock operates on a valid, open file descriptor for the
        // lifetime of this call; LOCK_EX blocks until exclusive.
        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if rc != 0 {
            return Err(PmetricsError::CannotOpen(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    /// Releases the lock. Never fails once acquired, matching the
    /// specification's contract.
    pub fn release(&self) {
        if let Some(file) = &self.file {
            // SAFETY: same fd as `acquire`; unlocking an already-unlocked
            // fd is a harmless no-op per flock(2).
            unsafe {
                libc::flock(file.as_raw_fd(), libc::LOCK_UN);
            }
        }
    }

    /// Closes the token file descriptor. The OS releases the flock the
    /// instant the last descriptor referencing it is closed, which is what
    /// gives peers deadlock-free recovery from a crashed holder.
    pub fn close(&mut self) {
        self.file = None;
    }

    /// Removes the token file from the filesystem. Idempotent.
    pub fn unlink(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_open_existing() {
        let dir = tempdir().unwrap();
        let mut a = NamedLock::new(dir.path(), "t1").unwrap();
        a.open(OpenMode::Create).unwrap();
        assert!(a.is_open());

        let mut b = NamedLock::new(dir.path(), "t1").unwrap();
        b.open(OpenMode::OpenExisting).unwrap();
        assert!(b.is_open());
    }

    #[test]
    fn create_twice_fails() {
        let dir = tempdir().unwrap();
        let mut a = NamedLock::new(dir.path(), "dup").unwrap();
        a.open(OpenMode::Create).unwrap();

        let mut b = NamedLock::new(dir.path(), "dup").unwrap();
        assert!(matches!(
            b.open(OpenMode::Create),
            Err(PmetricsError::AlreadyExists)
        ));
    }

    #[test]
    fn open_existing_missing_fails() {
        let dir = tempdir().unwrap();
        let mut a = NamedLock::new(dir.path(), "missing").unwrap();
        assert!(matches!(
            a.open(OpenMode::OpenExisting),
            Err(PmetricsError::DoesNotExist)
        ));
    }

    #[test]
    fn name_too_long_rejected() {
        let dir = tempdir().unwrap();
        let name = "x".repeat(MAX_NAME_LEN + 1);
        assert!(matches!(
            NamedLock::new(dir.path(), &name),
            Err(PmetricsError::NameTooLong)
        ));
    }

    #[test]
    fn acquire_release_roundtrip() {
        let dir = tempdir().unwrap();
        let mut lock = NamedLock::new(dir.path(), "rt").unwrap();
        lock.open(OpenMode::OpenOrCreate).unwrap();
        lock.acquire().unwrap();
        lock.release();
    }

    #[test]
    fn close_releases_fd() {
        let dir = tempdir().unwrap();
        let mut lock = NamedLock::new(dir.path(), "close").unwrap();
        lock.open(OpenMode::OpenOrCreate).unwrap();
        assert!(lock.is_open());
        lock.close();
        assert!(!lock.is_open());
    }
}
