// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! Cross-process shared-memory counters: named locks, named shared
//! segments, the open-addressed counter table, reader-side snapshots and
//! sampling, and the reentrant timer primitive built on top of it.
//!
//! ## Architecture
//!
//! ```text
//! +-----------------------------------------------------------+
//! |                     CounterTable (C3)                     |
//! |   open-addressed hash of CounterSlot, keyed by name        |
//! +-----------------------------------------------------------+
//! |  NamedLock (C1)          |        SharedSegment (C2)       |
//! |  flock token file        |   mmap'd regular file, refcount |
//! +-----------------------------------------------------------+
//! ```
//!
//! Producers call [`counters::CounterTable::allocate_counter`] once per
//! counter and cache the returned [`counters::SlotRef`]; every subsequent
//! update (`increment`, `increment_by`, `set`, `clear`) bypasses the lock
//! entirely. Readers periodically refresh a [`counters::CounterList`] and
//! capture [`counters::Sample`]s from it.

pub mod counters;
pub mod error;
pub mod hash;
pub mod lock;
pub mod segment;
pub mod time;

pub use counters::{CounterList, CounterTable, Sample, SlotRef, Timer, TimerGuard};
pub use error::{PmetricsError, Result};
pub use lock::{NamedLock, OpenMode};
pub use segment::{DestroyMode, SharedSegment};
