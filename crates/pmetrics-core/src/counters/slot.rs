// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! A single 56-byte counter record (C3).
//!
//! Layout matches the original `struct stats_counter` field-for-field so
//! the on-disk/shared-memory representation stays byte-compatible:
//! `allocation_status`, `allocation_seq`, a 64-bit `value`, `flags`,
//! `key_len`, then a 32-byte `key`. The legacy `STATS_VALUE` union (which
//! also supported a 32-bit hi/lo split) has no live Rust counterpart: only
//! the 64-bit path is reachable, so `value` is a plain `AtomicI64`.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

/// Maximum number of bytes in a counter name.
pub const MAX_KEY_LEN: usize = 32;

/// `ctr_allocation_status` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum AllocationStatus {
    Free = 0,
    /// Reserved by the original format ("not used right now"); kept for
    /// layout fidelity. No allocation path produces this value.
    Claimed = -1,
    Allocated = 1,
}

impl AllocationStatus {
    fn from_raw(raw: i32) -> Self {
        match raw {
            0 => AllocationStatus::Free,
            1 => AllocationStatus::Allocated,
            _ => AllocationStatus::Claimed,
        }
    }
}

/// `ctr_flags`: counter type and width tags. Plain bit constants rather
/// than a `bitflags`-style type, matching how small one-off flag sets are
/// expressed elsewhere in this workspace.
pub mod flags {
    pub const BIT32: i32 = 0x0000_0000;
    pub const BIT64: i32 = 0x0000_0001;
    pub const TIMER: i32 = 0x0000_0010;
    pub const GAUGE: i32 = 0x0000_0020;
}

/// A fixed-layout, 56-byte counter slot living inside the shared table.
///
/// Every field past `allocation_status` is written exactly once, at
/// allocation time, before `allocation_status` is published with a release
/// store (see [`CounterSlot::claim`]). Readers that observe
/// `ALLOCATED` via an acquire load are guaranteed to see the fully
/// initialized `key`/`key_len`/`allocation_seq`/`flags` — this is the
/// release/acquire pairing required by the specification's allocation
/// ordering note.
#[repr(C)]
pub struct CounterSlot {
    allocation_status: AtomicI32,
    allocation_seq: UnsafeCell<i32>,
    value: AtomicI64,
    flags: UnsafeCell<i32>,
    key_len: UnsafeCell<i32>,
    key: UnsafeCell<[u8; MAX_KEY_LEN]>,
}

// SAFETY: all cross-thread/cross-process access to the `UnsafeCell` fields
// is gated by the release/acquire pairing on `allocation_status` described
// above; writers hold the table's `NamedLock` for the entire claim.
unsafe impl Sync for CounterSlot {}

const _: () = assert!(std::mem::size_of::<CounterSlot>() == 56);

impl CounterSlot {
    pub fn status(&self) -> AllocationStatus {
        AllocationStatus::from_raw(self.allocation_status.load(Ordering::Acquire))
    }

    pub fn is_free(&self) -> bool {
        matches!(self.status(), AllocationStatus::Free)
    }

    pub fn is_allocated(&self) -> bool {
        matches!(self.status(), AllocationStatus::Allocated)
    }

    /// Returns the counter name. Only meaningful once `is_allocated()`.
    pub fn key(&self) -> &[u8] {
        // SAFETY: `key`/`key_len` are immutable once `allocation_status`
        // has been observed as `Allocated` via the acquire load in
        // `status()`/`is_allocated()`, which every caller of `key()` is
        // required to have performed first.
        unsafe {
            let len = (*self.key_len.get()) as usize;
            std::slice::from_raw_parts(self.key.get().cast::<u8>(), len)
        }
    }

    pub fn key_len(&self) -> usize {
        // SAFETY: see `key()`.
        unsafe { (*self.key_len.get()) as usize }
    }

    /// Monotonic allocation order, assigned once at claim time.
    pub fn allocation_seq(&self) -> i32 {
        // SAFETY: see `key()`.
        unsafe { *self.allocation_seq.get() }
    }

    pub fn flags(&self) -> i32 {
        // SAFETY: see `key()`.
        unsafe { *self.flags.get() }
    }

    fn matches_key(&self, key: &[u8]) -> bool {
        self.key_len() == key.len() && self.key() == key
    }

    /// Returns `true` if this free-or-allocated slot is either free (can be
    /// claimed) or already holds `key` (can be reused). Used by the probe
    /// loop; does not mutate anything.
    pub fn probe_matches(&self, key: &[u8]) -> ProbeOutcome {
        match self.status() {
            AllocationStatus::Free => ProbeOutcome::Free,
            AllocationStatus::Allocated if self.matches_key(key) => ProbeOutcome::SameKey,
            _ => ProbeOutcome::Occupied,
        }
    }

    /// Publishes this slot as `ALLOCATED` for `key`, assigning
    /// `allocation_seq`. Caller must hold the table's allocation lock and
    /// must only call this on a slot observed `Free` under that same lock.
    ///
    /// Write order is `key_len, key, flags, allocation_seq` (all plain
    /// stores) followed by a release store on `allocation_status` — this
    /// is the corrected ordering from the specification's concurrency
    /// section, not the original source's status-first ordering.
    pub fn claim(&self, key: &[u8], allocation_seq: i32, flags: i32) {
        debug_assert!(key.len() <= MAX_KEY_LEN);
        // SAFETY: caller holds the allocation lock; no other thread reads
        // these fields until the release store below publishes them.
        unsafe {
            *self.key_len.get() = key.len() as i32;
            let dst = &mut (*self.key.get())[..key.len()];
            dst.copy_from_slice(key);
            *self.flags.get() = flags;
            *self.allocation_seq.get() = allocation_seq;
        }
        self.allocation_status
            .store(AllocationStatus::Allocated as i32, Ordering::Release);
    }

    pub fn increment(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_by(&self, delta: i64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set(&self, v: i64) {
        self.value.store(v, Ordering::Relaxed);
    }

    pub fn clear(&self) {
        self.value.store(0, Ordering::Relaxed);
    }

    pub fn get_value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Zeroes the slot's value and, if `reset_allocation` is set, its
    /// status — used only by test/initialization paths, never on the hot
    /// path.
    pub(crate) fn reset_for_test(&self) {
        self.value.store(0, Ordering::Relaxed);
        self.allocation_status
            .store(AllocationStatus::Free as i32, Ordering::Release);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Free,
    SameKey,
    Occupied,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_56_bytes() {
        assert_eq!(std::mem::size_of::<CounterSlot>(), 56);
    }

    #[test]
    fn claim_then_read() {
        let slot: CounterSlot = unsafe { std::mem::zeroed() };
        assert!(slot.is_free());
        slot.claim(b"requests", 0, flags::BIT64);
        assert!(slot.is_allocated());
        assert_eq!(slot.key(), b"requests");
        assert_eq!(slot.allocation_seq(), 0);
        slot.increment();
        slot.increment_by(2);
        assert_eq!(slot.get_value(), 3);
        slot.clear();
        assert_eq!(slot.get_value(), 0);
    }

    #[test]
    fn probe_matches_free_then_same_key_then_occupied() {
        let slot: CounterSlot = unsafe { std::mem::zeroed() };
        assert_eq!(slot.probe_matches(b"x"), ProbeOutcome::Free);
        slot.claim(b"x", 0, 0);
        assert_eq!(slot.probe_matches(b"x"), ProbeOutcome::SameKey);
        assert_eq!(slot.probe_matches(b"y"), ProbeOutcome::Occupied);
    }
}
