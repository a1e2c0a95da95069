// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! The counter table: open-addressed hash of [`CounterSlot`]s living in a
//! [`SharedSegment`], guarded by a [`NamedLock`] for allocation (C3).

use std::path::Path;
use std::slice;

use crate::error::{PmetricsError, Result};
use crate::hash::fast_hash;
use crate::lock::{NamedLock, OpenMode};
use crate::segment::{DestroyMode, SharedSegment};

use super::header::{TableHeader, MAGIC, MAX_ALLOCATION_PROBES, TABLE_SIZE};
use super::slot::{CounterSlot, ProbeOutcome, MAX_KEY_LEN};

/// Total shared-memory footprint of one counter table: header plus exactly
/// `TABLE_SIZE` slots.
pub const SEGMENT_SIZE: usize =
    std::mem::size_of::<TableHeader>() + TABLE_SIZE * std::mem::size_of::<CounterSlot>();

/// A lightweight, `Copy`able reference to an allocated counter: the table's
/// slot index, not a raw pointer. The specification calls this out
/// explicitly — a pointer into shared memory cannot carry a Rust lifetime
/// across processes, so producers cache this identifier instead and
/// dereference it through the table on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRef {
    pub(crate) index: u32,
}

/// `open_stats(name) -> handle` plus the allocation and update operations
/// from the specification's external-interfaces section.
pub struct CounterTable {
    lock: NamedLock,
    segment: SharedSegment,
}

impl CounterTable {
    /// Creates the segment if missing, or attaches to an existing one.
    /// Combines the original `stats_create` + `stats_open` into one call,
    /// matching the abstract `open_stats` entry point from the
    /// specification.
    pub fn open(directory: &Path, name: &str) -> Result<Self> {
        if name.is_empty() || name.len() + 4 > crate::lock::MAX_NAME_LEN + 1 {
            return Err(PmetricsError::NameTooLong);
        }

        let mut lock = NamedLock::new(directory, name)?;
        lock.open(OpenMode::OpenOrCreate)?;

        let mut segment = SharedSegment::new(
            directory,
            name,
            SEGMENT_SIZE,
            DestroyMode::DestroyOnCloseIfLast,
        )?;

        lock.acquire().expect("lock was just opened above");
        let open_result = segment.open(directory, &lock);
        if open_result.is_ok() {
            let was_created = segment.was_created();
            // SAFETY: `segment.open` succeeded, so `as_ptr()` is valid for
            // `SEGMENT_SIZE` bytes and correctly aligned for `TableHeader`.
            let header = unsafe { &*segment.as_ptr().cast::<TableHeader>() };
            if was_created {
                header.init();
                log::debug!("initialized new counter table '{name}'");
            }
        }
        lock.release();
        open_result?;

        // SAFETY: same as above.
        let header = unsafe { &*segment.as_ptr().cast::<TableHeader>() };
        if !header.is_valid() {
            return Err(PmetricsError::InvalidHeader);
        }

        Ok(CounterTable { lock, segment })
    }

    fn header(&self) -> &TableHeader {
        // SAFETY: the segment is open for the lifetime of `self`.
        unsafe { &*self.segment.as_ptr().cast::<TableHeader>() }
    }

    fn slots(&self) -> &[CounterSlot] {
        // SAFETY: the slot array immediately follows the header within the
        // mapped segment, and `SEGMENT_SIZE` accounts for exactly
        // `TABLE_SIZE` slots.
        unsafe {
            let base = self
                .segment
                .as_ptr()
                .add(std::mem::size_of::<TableHeader>())
                .cast::<CounterSlot>();
            slice::from_raw_parts(base, TABLE_SIZE)
        }
    }

    pub fn sequence_number(&self) -> i32 {
        self.header().sequence_number()
    }

    fn slot(&self, slot_ref: SlotRef) -> &CounterSlot {
        &self.slots()[slot_ref.index as usize]
    }

    /// Implements the allocation protocol from §4.2.1: hash, probe up to 32
    /// displacement steps, claim the first free slot or reuse an existing
    /// one with the same key, all under the table's named lock. Tags the
    /// slot a plain 64-bit counter (`flags::BIT64`); use
    /// [`CounterTable::allocate_tagged`] to allocate a timer or gauge.
    pub fn allocate_counter(&self, name: &str) -> Result<SlotRef> {
        self.allocate_tagged(name, super::slot::flags::BIT64)
    }

    /// Same allocation protocol as [`CounterTable::allocate_counter`], but
    /// lets the caller set the type tags in `flags` (`flags::TIMER`,
    /// `flags::GAUGE`) alongside the width tag. The width tag is fixed at
    /// `flags::BIT64` regardless of what the caller passes, since 32-bit
    /// counters are a reserved, never-produced variant (§4 supplement).
    pub fn allocate_tagged(&self, name: &str, flags: i32) -> Result<SlotRef> {
        if name.len() > MAX_KEY_LEN {
            return Err(PmetricsError::StatsKeyTooLong);
        }
        let key = name.as_bytes();
        let h = fast_hash(key);
        let slots = self.slots();
        let flags = flags | super::slot::flags::BIT64;

        self.lock.acquire().expect("table lock is open for the table's lifetime");
        let result = probe_and_claim(self.header(), slots, h, key, flags);
        self.lock.release();
        result
    }

    /// Returns the type/width tags set at allocation time.
    pub fn flags_of(&self, slot_ref: SlotRef) -> i32 {
        self.slot(slot_ref).flags()
    }

    /// Rebuilds the reader-side counter list: scans every slot under the
    /// lock, collects `ALLOCATED` ones, captures the current sequence
    /// number, then sorts by `allocation_seq` ascending (§4.2.4).
    pub fn get_counter_list(&self) -> super::list::CounterList {
        let slots = self.slots();
        let mut refs = Vec::new();

        self.lock.acquire().expect("table lock is open for the table's lifetime");
        for (index, slot) in slots.iter().enumerate() {
            if slot.is_allocated() {
                refs.push((index as u32, slot.allocation_seq()));
            }
        }
        let seq_no = self.header().sequence_number();
        self.lock.release();

        refs.sort_by_key(|(_, seq)| *seq);
        let slot_refs = refs
            .into_iter()
            .map(|(index, _)| SlotRef { index })
            .collect();

        super::list::CounterList::from_parts(seq_no, slot_refs)
    }

    pub fn is_updated(&self, list: &super::list::CounterList) -> bool {
        list.seq_no() != self.header().sequence_number()
    }

    /// Captures a sample: refreshes the counter list if stale, then reads
    /// every listed slot's value with a plain atomic load (no lock needed
    /// on this path).
    pub fn get_sample(
        &self,
        list: &mut super::list::CounterList,
    ) -> super::sample::Sample {
        let sample_time = crate::time::monotonic_now_nanos();
        if self.is_updated(list) {
            *list = self.get_counter_list();
        }
        let values = list
            .slot_refs()
            .iter()
            .map(|slot_ref| self.slot(*slot_ref).get_value())
            .collect();
        super::sample::Sample::new(list.seq_no(), sample_time, values)
    }

    pub fn increment(&self, slot_ref: SlotRef) {
        self.slot(slot_ref).increment();
    }

    pub fn increment_by(&self, slot_ref: SlotRef, delta: i64) {
        self.slot(slot_ref).increment_by(delta);
    }

    pub fn set(&self, slot_ref: SlotRef, value: i64) {
        self.slot(slot_ref).set(value);
    }

    pub fn clear(&self, slot_ref: SlotRef) {
        self.slot(slot_ref).clear();
    }

    pub fn get_value(&self, slot_ref: SlotRef) -> i64 {
        self.slot(slot_ref).get_value()
    }

    /// Returns the counter's name, e.g. for display in a viewer.
    pub fn key_of(&self, slot_ref: SlotRef) -> String {
        String::from_utf8_lossy(self.slot(slot_ref).key()).into_owned()
    }

    /// Zeroes every allocated counter's value. Does not affect allocation
    /// state or `sequence_number`.
    pub fn reset_counters(&self) {
        self.lock.acquire().expect("table lock is open for the table's lifetime");
        for slot in self.slots() {
            if slot.is_allocated() {
                slot.clear();
            }
        }
        self.lock.release();
    }

    /// Releases this process's attachment, destroying the segment if the
    /// destroy policy and attach count say so.
    pub fn close(mut self) -> Result<()> {
        self.lock.acquire().expect("table lock is open for the table's lifetime");
        let _did_destroy = self.segment.close(&self.lock)?;
        self.lock.release();
        self.lock.close();
        Ok(())
    }
}

/// Probe sequence from §4.2.1: `k_i = (h + 2^i - 1) mod TABLE_SIZE` for
/// `i = 0..MAX_ALLOCATION_PROBES`. Index 0 always lands on `h mod
/// TABLE_SIZE` (displacement 0); subsequent displacements are 1, 3, 7, 15,
/// … — cumulative powers of two, not the powers themselves.
fn probe_and_claim(
    header: &TableHeader,
    slots: &[CounterSlot],
    hash: u32,
    key: &[u8],
    flags: i32,
) -> Result<SlotRef> {
    let claim = |index: usize| -> SlotRef {
        let seq = header.peek_next_allocation_seq();
        slots[index].claim(key, seq, flags);
        header.advance_sequence_number();
        SlotRef {
            index: index as u32,
        }
    };

    let mut displacement: u32 = 0;
    for _ in 0..MAX_ALLOCATION_PROBES {
        let k = (hash.wrapping_add(displacement) as usize) % TABLE_SIZE;
        match slots[k].probe_matches(key) {
            ProbeOutcome::Free => return Ok(claim(k)),
            ProbeOutcome::SameKey => return Ok(SlotRef { index: k as u32 }),
            ProbeOutcome::Occupied => {}
        }
        // 2^(i+1) - 1 = 2*(2^i - 1) + 1, so the next displacement is
        // derived from the current one without recomputing the power.
        displacement = displacement.wrapping_mul(2).wrapping_add(1);
    }

    Err(PmetricsError::CannotAllocateCounter)
}

const _: () = assert!(MAGIC != 0);

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn allocate_same_name_twice_returns_same_slot() {
        let dir = tempdir().unwrap();
        let table = CounterTable::open(dir.path(), "t1").unwrap();
        let a = table.allocate_counter("requests").unwrap();
        let b = table.allocate_counter("requests").unwrap();
        assert_eq!(a, b);
        assert_eq!(table.sequence_number(), 1);
    }

    #[test]
    fn allocate_distinct_names_get_distinct_sequence_numbers() {
        let dir = tempdir().unwrap();
        let table = CounterTable::open(dir.path(), "t2").unwrap();
        table.allocate_counter("requests").unwrap();
        table.allocate_counter("errors").unwrap();
        assert_eq!(table.sequence_number(), 2);
    }

    #[test]
    fn key_too_long_rejected() {
        let dir = tempdir().unwrap();
        let table = CounterTable::open(dir.path(), "t3").unwrap();
        let name = "x".repeat(MAX_KEY_LEN + 1);
        assert!(matches!(
            table.allocate_counter(&name),
            Err(PmetricsError::StatsKeyTooLong)
        ));
    }

    #[test]
    fn increment_then_read() {
        let dir = tempdir().unwrap();
        let table = CounterTable::open(dir.path(), "t4").unwrap();
        let r = table.allocate_counter("requests").unwrap();
        table.increment(r);
        table.increment(r);
        table.increment_by(r, 5);
        assert_eq!(table.get_value(r), 7);
    }

    #[test]
    fn reopen_existing_table_sees_prior_counters() {
        let dir = tempdir().unwrap();
        {
            let table = CounterTable::open(dir.path(), "t5").unwrap();
            let r = table.allocate_counter("requests").unwrap();
            table.increment_by(r, 3);
        }
        let table = CounterTable::open(dir.path(), "t5").unwrap();
        let list = table.get_counter_list();
        assert_eq!(list.slot_refs().len(), 1);
        assert_eq!(table.get_value(list.slot_refs()[0]), 3);
    }

    #[test]
    fn counter_list_orders_by_allocation_sequence() {
        let dir = tempdir().unwrap();
        let table = CounterTable::open(dir.path(), "t6").unwrap();
        table.allocate_counter("requests").unwrap();
        table.allocate_counter("errors").unwrap();
        let list = table.get_counter_list();
        let names: Vec<String> = list
            .slot_refs()
            .iter()
            .map(|r| table.key_of(*r))
            .collect();
        assert_eq!(names, vec!["requests", "errors"]);
    }

    #[test]
    fn allocate_tagged_sets_type_flags() {
        let dir = tempdir().unwrap();
        let table = CounterTable::open(dir.path(), "t7").unwrap();
        let r = table
            .allocate_tagged("handler_us", super::super::slot::flags::TIMER)
            .unwrap();
        assert_ne!(table.flags_of(r) & super::super::slot::flags::TIMER, 0);
        assert_ne!(table.flags_of(r) & super::super::slot::flags::BIT64, 0);
    }
}
