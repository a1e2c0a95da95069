// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! Named, fixed-size, host-shared memory region (C2).
//!
//! Keyed by the same short stable name as [`crate::lock::NamedLock`],
//! backed by a regular file `<name>.mem` under a configured directory,
//! sized with `ftruncate` and mapped `MAP_SHARED`. The original
//! implementation instead used SysV shared memory (`shmget`/`shmat`,
//! keyed via `ftok` on a path) which gets an attach count for free from the
//! kernel; a plain mmap'd file does not, so the live-attacher count
//! required for `DESTROY_ON_CLOSE_IF_LAST` is tracked in a small sibling
//! token file (`<name>.attach`, a single `u32`), mutated only while the
//! caller holds the segment's [`NamedLock`] — the same lock the allocation
//! protocol (C3) already requires around `open`/`close`, so this adds no
//! new suspension points. See DESIGN.md.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::ptr;

use crate::error::{PmetricsError, Result};
use crate::lock::NamedLock;

/// How a segment should be disposed of when the last reference to it
/// closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyMode {
    /// Remove the backing file and its attach-count token on every close.
    DestroyOnClose,
    /// Remove them only when this close brings the attach count to zero.
    DestroyOnCloseIfLast,
    /// Never remove them; the segment outlives every process.
    NeverDestroy,
}

/// A named shared-memory-backed region, attached via `mmap` over a regular
/// file.
pub struct SharedSegment {
    name: String,
    mem_path: PathBuf,
    attach_path: PathBuf,
    size: usize,
    destroy_mode: DestroyMode,
    file: Option<File>,
    ptr: *mut u8,
    was_created: bool,
}

// SAFETY: the mapped region is `MAP_SHARED`; concurrent access from other
// threads/processes is the entire point, and the counter table built on
// top synchronizes allocation via `NamedLock` and updates via atomics.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Construct the segment descriptor without touching the filesystem,
    /// mirroring `shared_memory_init`.
    pub fn new(
        directory: &Path,
        name: &str,
        size: usize,
        destroy_mode: DestroyMode,
    ) -> Result<Self> {
        if name.is_empty() || name.len() > crate::lock::MAX_NAME_LEN {
            return Err(PmetricsError::NameTooLong);
        }
        Ok(SharedSegment {
            name: name.to_string(),
            mem_path: directory.join(format!("{name}.mem")),
            attach_path: directory.join(format!("{name}.attach")),
            size,
            destroy_mode,
            file: None,
            ptr: ptr::null_mut(),
            was_created: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// `true` if this call to `open` is the one that first created the
    /// backing file (and is therefore responsible for initializing its
    /// contents).
    pub fn was_created(&self) -> bool {
        self.was_created
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Raw pointer to the mapped region. Valid only while the segment is
    /// open.
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Creates (if missing) and maps the segment. Must be called with the
    /// corresponding [`NamedLock`] held, so that first-time initialization
    /// of the contents by the caller is atomic with respect to other
    /// attachers (mirrors `stats_open`'s lock-then-open-then-init sequence).
    pub fn open(&mut self, directory: &Path, _lock: &NamedLock) -> Result<()> {
        if !directory.exists() {
            std::fs::create_dir_all(directory)
                .map_err(PmetricsError::CannotCreateDirectory)?;
        }

        let mut options = OpenOptions::new();
        options.read(true).write(true).create(true);
        let file = options
            .open(&self.mem_path)
            .map_err(PmetricsError::CannotOpen)?;

        let metadata = file.metadata().map_err(PmetricsError::CannotStat)?;
        let existing_len = metadata.len() as usize;

        if existing_len == 0 {
            file.set_len(self.size as u64)
                .map_err(PmetricsError::CannotCreatePath)?;
            self.was_created = true;
        } else if existing_len != self.size {
            return Err(PmetricsError::InvalidSize);
        } else {
            self.was_created = false;
        }

        // SAFETY: `file` is open read-write and sized to `self.size`
        // immediately above; the mapping length matches the file length,
        // and the pointer is stored only for the lifetime of this segment.
        let ptr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                self.size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(PmetricsError::CannotAttach(std::io::Error::last_os_error()));
        }

        self.ptr = ptr.cast::<u8>();
        self.file = Some(file);
        self.bump_attach_count(1)?;

        Ok(())
    }

    fn bump_attach_count(&self, delta: i64) -> Result<i64> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.attach_path)
            .map_err(PmetricsError::CannotOpen)?;

        let mut buf = [0u8; 4];
        let n = file.read(&mut buf).map_err(PmetricsError::CannotStat)?;
        let current = if n == 4 { u32::from_ne_bytes(buf) } else { 0 };
        let updated = (current as i64 + delta).max(0) as u32;

        file.seek(SeekFrom::Start(0))
            .map_err(PmetricsError::CannotStat)?;
        file.write_all(&updated.to_ne_bytes())
            .map_err(PmetricsError::CannotStat)?;
        file.set_len(4).map_err(PmetricsError::CannotStat)?;

        Ok(updated as i64)
    }

    /// Unmaps and closes the segment, consulting the destroy mode. Returns
    /// `true` if this call removed the backing file and its attach token
    /// from the host (a "did destroy" flag, matching
    /// `shared_memory_close`'s `did_destroy` out-parameter).
    ///
    /// Must be called with the corresponding [`NamedLock`] held: the
    /// last-attacher destroy decision and the actual removal happen while
    /// still holding the lock, matching the original's (fragile but
    /// intentional) "segment close, then lock close" ordering — see
    /// DESIGN.md.
    pub fn close(&mut self, _lock: &NamedLock) -> Result<bool> {
        if !self.ptr.is_null() {
            // SAFETY: `self.size` is exactly the length passed to `mmap`
            // above; unmapping a shorter length (as the original's
            // `sizeof(struct hist_file)` bug did) would leak the tail of
            // the mapping.
            unsafe {
                libc::munmap(self.ptr.cast::<libc::c_void>(), self.size);
            }
            self.ptr = ptr::null_mut();
        }
        self.file = None;

        let remaining = self.bump_attach_count(-1)?;

        let should_destroy = match self.destroy_mode {
            DestroyMode::DestroyOnClose => true,
            DestroyMode::DestroyOnCloseIfLast => remaining <= 0,
            DestroyMode::NeverDestroy => false,
        };

        if should_destroy {
            let _ = std::fs::remove_file(&self.mem_path);
            let _ = std::fs::remove_file(&self.attach_path);
        }

        Ok(should_destroy)
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        if !self.ptr.is_null() {
            // SAFETY: matches the mapping established in `open`; this is a
            // best-effort cleanup for callers that drop the segment
            // without calling `close` explicitly.
            unsafe {
                libc::munmap(self.ptr.cast::<libc::c_void>(), self.size);
            }
            self.ptr = ptr::null_mut();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::OpenMode;
    use tempfile::tempdir;

    #[test]
    fn create_and_write_is_visible_to_second_attach() {
        let dir = tempdir().unwrap();
        let mut lock_a = NamedLock::new(dir.path(), "seg").unwrap();
        lock_a.open(OpenMode::OpenOrCreate).unwrap();
        lock_a.acquire().unwrap();

        let mut seg_a = SharedSegment::new(dir.path(), "seg", 64, DestroyMode::NeverDestroy)
            .unwrap();
        seg_a.open(dir.path(), &lock_a).unwrap();
        assert!(seg_a.was_created());

        // SAFETY: pointer valid for `seg_a.size()` bytes while open.
        unsafe {
            *seg_a.as_ptr() = 0xAB;
        }
        lock_a.release();

        let mut lock_b = NamedLock::new(dir.path(), "seg").unwrap();
        lock_b.open(OpenMode::OpenExisting).unwrap();
        lock_b.acquire().unwrap();
        let mut seg_b = SharedSegment::new(dir.path(), "seg", 64, DestroyMode::NeverDestroy)
            .unwrap();
        seg_b.open(dir.path(), &lock_b).unwrap();
        assert!(!seg_b.was_created());
        // SAFETY: same invariant as above.
        let byte = unsafe { *seg_b.as_ptr() };
        assert_eq!(byte, 0xAB);
        lock_b.release();
    }

    #[test]
    fn size_mismatch_on_reattach_is_rejected() {
        let dir = tempdir().unwrap();
        let mut lock = NamedLock::new(dir.path(), "sz").unwrap();
        lock.open(OpenMode::OpenOrCreate).unwrap();
        lock.acquire().unwrap();

        let mut seg = SharedSegment::new(dir.path(), "sz", 128, DestroyMode::NeverDestroy)
            .unwrap();
        seg.open(dir.path(), &lock).unwrap();
        seg.close(&lock).unwrap();
        lock.release();

        lock.acquire().unwrap();
        let mut seg2 = SharedSegment::new(dir.path(), "sz", 256, DestroyMode::NeverDestroy)
            .unwrap();
        assert!(matches!(
            seg2.open(dir.path(), &lock),
            Err(PmetricsError::InvalidSize)
        ));
        lock.release();
    }

    #[test]
    fn destroy_on_close_if_last_removes_after_final_detach() {
        let dir = tempdir().unwrap();
        let mut lock = NamedLock::new(dir.path(), "last").unwrap();
        lock.open(OpenMode::OpenOrCreate).unwrap();
        lock.acquire().unwrap();

        let mut seg_a =
            SharedSegment::new(dir.path(), "last", 32, DestroyMode::DestroyOnCloseIfLast)
                .unwrap();
        seg_a.open(dir.path(), &lock).unwrap();
        let mut seg_b =
            SharedSegment::new(dir.path(), "last", 32, DestroyMode::DestroyOnCloseIfLast)
                .unwrap();
        seg_b.open(dir.path(), &lock).unwrap();

        assert_eq!(seg_a.close(&lock).unwrap(), false);
        assert!(dir.path().join("last.mem").exists());

        assert_eq!(seg_b.close(&lock).unwrap(), true);
        assert!(!dir.path().join("last.mem").exists());
        lock.release();
    }
}
