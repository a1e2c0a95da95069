// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! Error kinds shared by the lock, segment, and counter-table modules.
//!
//! Mirrors the manual `Display`/`std::error::Error` pattern used throughout
//! the rest of the workspace rather than pulling in a derive macro: every
//! variant maps directly to one of the failure modes enumerated by the
//! original C API (`ERROR_*` constants in `stats/error.h`).

use std::fmt;
use std::io;

/// Every failure mode the counter/lock/segment layer can report.
#[derive(Debug)]
pub enum PmetricsError {
    InvalidParameters,
    Memory,
    NameTooLong,
    /// Generic failure with a short, static reason (mirrors `ERROR_FAIL`).
    Fail(&'static str),

    AlreadyExists,
    DoesNotExist,
    InvalidSize,
    CannotOpen(io::Error),
    CannotAttach(io::Error),
    CannotStat(io::Error),
    CannotCreateDirectory(io::Error),
    CannotCreatePath(io::Error),
    CannotCreateToken(io::Error),
    PathNotDirectory,

    StatsKeyTooLong,
    CannotAllocateCounter,

    InvalidHeader,
    InvalidVersion,
    CannotMap(io::Error),
}

pub type Result<T> = std::result::Result<T, PmetricsError>;

impl fmt::Display for PmetricsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PmetricsError::InvalidParameters => write!(f, "invalid parameters"),
            PmetricsError::Memory => write!(f, "out of memory"),
            PmetricsError::NameTooLong => write!(f, "name too long"),
            PmetricsError::Fail(reason) => write!(f, "operation failed: {reason}"),
            PmetricsError::AlreadyExists => write!(f, "already exists"),
            PmetricsError::DoesNotExist => write!(f, "does not exist"),
            PmetricsError::InvalidSize => write!(f, "invalid size"),
            PmetricsError::CannotOpen(e) => write!(f, "cannot open: {e}"),
            PmetricsError::CannotAttach(e) => write!(f, "cannot attach: {e}"),
            PmetricsError::CannotStat(e) => write!(f, "cannot stat: {e}"),
            PmetricsError::CannotCreateDirectory(e) => {
                write!(f, "cannot create directory: {e}")
            }
            PmetricsError::CannotCreatePath(e) => write!(f, "cannot create path: {e}"),
            PmetricsError::CannotCreateToken(e) => write!(f, "cannot create ipc token: {e}"),
            PmetricsError::PathNotDirectory => write!(f, "path exists and is not a directory"),
            PmetricsError::StatsKeyTooLong => write!(f, "counter key too long"),
            PmetricsError::CannotAllocateCounter => {
                write!(f, "cannot allocate counter: table full after 32 probes")
            }
            PmetricsError::InvalidHeader => write!(f, "invalid history file header"),
            PmetricsError::InvalidVersion => write!(f, "unsupported history file version"),
            PmetricsError::CannotMap(e) => write!(f, "cannot map history file: {e}"),
        }
    }
}

impl std::error::Error for PmetricsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PmetricsError::CannotOpen(e)
            | PmetricsError::CannotAttach(e)
            | PmetricsError::CannotStat(e)
            | PmetricsError::CannotCreateDirectory(e)
            | PmetricsError::CannotCreatePath(e)
            | PmetricsError::CannotCreateToken(e)
            | PmetricsError::CannotMap(e) => Some(e),
            _ => None,
        }
    }
}
