// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! The on-disk, memory-mapped history file: header + per-series length and
//! head arrays + the ring-buffer sample records themselves (§4.3).

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::mem::size_of;
use std::os::unix::io::AsRawFd;
use std::path::Path;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use pmetrics_core::{PmetricsError, Result};

pub const MAGIC: u32 = u32::from_be_bytes(*b"hist");
pub const VERSION: u32 = 1;
pub const NSERIES: usize = 5;

/// `{resolution, window, capacity}` per series, index 0 is the
/// highest-resolution series and the only one the daemon currently writes.
pub const SERIES_CAPACITIES: [u32; NSERIES] = [900, 720, 1440, 1008, 720];

const HEADER_LEN: usize = 16;
const LENGTHS_LEN: usize = NSERIES * 4;
const HEADS_LEN: usize = NSERIES * 4;
const SAMPLES_OFFSET: usize = HEADER_LEN + LENGTHS_LEN + HEADS_LEN;

/// `{sample_time: u32, value: i64}`, padded to 16 bytes so `value` falls on
/// an 8-byte boundary — the natural layout a C compiler would have chosen
/// for this struct, just made explicit.
#[repr(C)]
struct RawSample {
    sample_time: AtomicU32,
    _reserved: u32,
    value: AtomicI64,
}

const _: () = assert!(size_of::<RawSample>() == 16);

const SAMPLE_LEN: usize = size_of::<RawSample>();

fn total_file_len() -> usize {
    SAMPLES_OFFSET
        + SERIES_CAPACITIES
            .iter()
            .map(|&capacity| capacity as usize * SAMPLE_LEN)
            .sum::<usize>()
}

fn series_offset(series_index: usize) -> usize {
    SAMPLES_OFFSET
        + SERIES_CAPACITIES[..series_index]
            .iter()
            .map(|&capacity| capacity as usize * SAMPLE_LEN)
            .sum::<usize>()
}

/// An open, memory-mapped `.mhf` file. Safe to share across threads within
/// one process: the daemon's ingest thread is the sole writer, HTTP
/// handlers are readers, and every field accessed from both sides is
/// atomic.
pub struct HistoryFile {
    _file: File,
    ptr: *mut u8,
    len: usize,
}

unsafe impl Send for HistoryFile {}
unsafe impl Sync for HistoryFile {}

impl HistoryFile {
    /// Opens `path`, creating and initializing it first if it does not
    /// exist. An advisory `flock` on the file itself guards only the
    /// first-time-initialization race; it is released before mapping.
    pub fn open(path: &Path) -> Result<HistoryFile> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .map_err(PmetricsError::CannotOpen)?;

        // SAFETY: `file`'s fd is valid for the duration of this call.
        let lock_rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX) };
        if lock_rc != 0 {
            return Err(PmetricsError::CannotOpen(io::Error::last_os_error()));
        }

        let existing_len = file.metadata().map_err(PmetricsError::CannotStat)?.len();
        if existing_len == 0 {
            Self::initialize(&file)?;
        }

        // SAFETY: same fd, still open.
        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }

        let mapped_len = file.metadata().map_err(PmetricsError::CannotStat)?.len() as usize;

        // SAFETY: `file` outlives the mapping (stored alongside `ptr`);
        // `mapped_len` matches the file's actual length just stat'd above.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                mapped_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                file.as_raw_fd(),
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(PmetricsError::CannotMap(io::Error::last_os_error()));
        }

        let history = HistoryFile {
            _file: file,
            ptr: ptr as *mut u8,
            len: mapped_len,
        };
        history.validate_header()?;
        Ok(history)
    }

    fn initialize(file: &File) -> Result<()> {
        // Native-endian, matching `read_u32`'s `read_unaligned::<u32>()` and
        // the original's plain struct dump to disk (no `htonl`) — this is a
        // host-local mapped file, not wire traffic, so there is no format
        // to preserve across hosts of differing endianness.
        let mut template = Vec::with_capacity(total_file_len());
        template.extend_from_slice(&MAGIC.to_ne_bytes());
        template.extend_from_slice(&VERSION.to_ne_bytes());
        template.extend_from_slice(&(NSERIES as u32).to_ne_bytes());
        template.extend_from_slice(&0u32.to_ne_bytes());
        for capacity in SERIES_CAPACITIES {
            template.extend_from_slice(&capacity.to_ne_bytes());
        }
        template.extend_from_slice(&[0u8; HEADS_LEN]);
        template.resize(total_file_len(), 0);

        let mut writer = file;
        writer
            .write_all(&template)
            .map_err(PmetricsError::CannotCreateToken)
    }

    fn validate_header(&self) -> Result<()> {
        if self.len != total_file_len() {
            return Err(PmetricsError::InvalidHeader);
        }
        if self.read_u32(0) != MAGIC {
            return Err(PmetricsError::InvalidHeader);
        }
        if self.read_u32(4) != VERSION {
            return Err(PmetricsError::InvalidVersion);
        }
        if self.read_u32(8) as usize != NSERIES {
            return Err(PmetricsError::InvalidHeader);
        }
        Ok(())
    }

    fn read_u32(&self, offset: usize) -> u32 {
        // SAFETY: offset + 4 <= self.len is the caller's responsibility;
        // every call site here is bounded by a compile-time-known offset
        // within the validated header region.
        unsafe { std::ptr::read_unaligned(self.ptr.add(offset) as *const u32) }
    }

    /// Fixed at initialization time; never mutated afterward.
    pub fn series_length(&self, series_index: usize) -> u32 {
        self.read_u32(HEADER_LEN + series_index * 4)
    }

    fn head_ptr(&self, series_index: usize) -> *const AtomicU32 {
        unsafe { self.ptr.add(HEADER_LEN + LENGTHS_LEN + series_index * 4) as *const AtomicU32 }
    }

    pub(crate) fn head(&self, series_index: usize) -> &AtomicU32 {
        // SAFETY: within the mapping, 4-byte aligned (offset is a multiple
        // of 4), lives as long as `self`.
        unsafe { &*self.head_ptr(series_index) }
    }

    fn sample_ptr(&self, series_index: usize, slot: usize) -> *const RawSample {
        unsafe { self.ptr.add(series_offset(series_index) + slot * SAMPLE_LEN) as *const RawSample }
    }

    pub(crate) fn sample_time(&self, series_index: usize, slot: usize) -> &AtomicU32 {
        // SAFETY: see `head`; `RawSample`'s first field is `sample_time`.
        unsafe { &(*self.sample_ptr(series_index, slot)).sample_time }
    }

    pub(crate) fn sample_value(&self, series_index: usize, slot: usize) -> &AtomicI64 {
        // SAFETY: see `head`.
        unsafe { &(*self.sample_ptr(series_index, slot)).value }
    }
}

impl Drop for HistoryFile {
    fn drop(&mut self) {
        // Unmaps the full mapped length, not `size_of::<header>()` — see
        // the design note on the original's truncated-length `munmap` bug.
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn create_then_reopen_preserves_header() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.mhf");
        {
            let history = HistoryFile::open(&path).unwrap();
            assert_eq!(history.series_length(0), 900);
            assert_eq!(history.head(0).load(Ordering::Relaxed), 0);
        }
        let history = HistoryFile::open(&path).unwrap();
        assert_eq!(history.series_length(3), 1008);
    }

    #[test]
    fn file_size_matches_layout() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.mhf");
        let _history = HistoryFile::open(&path).unwrap();
        let on_disk = std::fs::metadata(&path).unwrap().len() as usize;
        assert_eq!(on_disk, total_file_len());
    }
}
