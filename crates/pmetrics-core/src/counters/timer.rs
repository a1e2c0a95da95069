// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! Reentrant timer primitive wrapping a counter slot (§4.2.3).
//!
//! A `Timer` is single-thread-owned instrumentation state (the depth
//! counter is not atomic); the counter it accumulates into is shared and
//! safe for concurrent updates like any other counter.

use std::cell::Cell;

use super::slot::flags;
use super::table::{CounterTable, SlotRef};
use crate::error::Result;
use crate::time::monotonic_now_nanos;

pub struct Timer<'a> {
    table: &'a CounterTable,
    slot: SlotRef,
    start_time: Cell<u64>,
    depth: Cell<u32>,
}

impl<'a> Timer<'a> {
    pub fn new(table: &'a CounterTable, slot: SlotRef) -> Self {
        Timer {
            table,
            slot,
            start_time: Cell::new(0),
            depth: Cell::new(0),
        }
    }

    /// Allocates `name` tagged `flags::TIMER` and wraps it in a `Timer`,
    /// for callers that don't already have a slot from a prior
    /// `allocate_counter`/`allocate_tagged` call.
    pub fn allocate(table: &'a CounterTable, name: &str) -> Result<Self> {
        let slot = table.allocate_tagged(name, flags::TIMER)?;
        Ok(Self::new(table, slot))
    }

    /// Type/width tags of the wrapped slot, as set at allocation time.
    pub fn slot_flags(&self) -> i32 {
        self.table.flags_of(self.slot)
    }

    /// Enters the timed region. Only the outermost `enter` records the
    /// start time; nested calls just increase the depth.
    pub fn enter(&self) {
        if self.depth.get() == 0 {
            self.start_time.set(monotonic_now_nanos());
        }
        self.depth.set(self.depth.get() + 1);
    }

    /// Exits the timed region. Only the outermost `exit` adds the elapsed
    /// microseconds to the underlying counter.
    pub fn exit(&self) {
        let depth = self.depth.get().saturating_sub(1);
        self.depth.set(depth);
        if depth == 0 {
            let elapsed_nanos = monotonic_now_nanos().saturating_sub(self.start_time.get());
            self.table.increment_by(self.slot, (elapsed_nanos / 1000) as i64);
        }
    }

    /// Scoped acquisition: the returned guard calls `enter` immediately
    /// and `exit` on drop, so the elapsed time is recorded even if the
    /// scope exits early via `?` or a panic unwind.
    pub fn scoped(&self) -> TimerGuard<'_> {
        self.enter();
        TimerGuard { timer: self }
    }
}

pub struct TimerGuard<'a> {
    timer: &'a Timer<'a>,
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timer.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reentrant_enter_exit_only_records_once() {
        let dir = tempdir().unwrap();
        let table = CounterTable::open(dir.path(), "timer1").unwrap();
        let slot = table.allocate_counter("latency_us").unwrap();
        let timer = Timer::new(&table, slot);

        timer.enter();
        timer.enter();
        timer.exit();
        timer.exit();

        // one full enter/exit pair recorded, value should be >= 0 and the
        // counter should have been touched exactly once (no double count
        // means depth tracking worked; exact value is timing-dependent).
        assert!(table.get_value(slot) >= 0);
    }

    #[test]
    fn scoped_guard_records_on_drop() {
        let dir = tempdir().unwrap();
        let table = CounterTable::open(dir.path(), "timer2").unwrap();
        let slot = table.allocate_counter("scoped_us").unwrap();
        let timer = Timer::new(&table, slot);
        {
            let _guard = timer.scoped();
        }
        assert!(table.get_value(slot) >= 0);
    }

    #[test]
    fn allocate_tags_slot_as_timer() {
        let dir = tempdir().unwrap();
        let table = CounterTable::open(dir.path(), "timer3").unwrap();
        let timer = Timer::allocate(&table, "handler_us").unwrap();
        assert_ne!(timer.slot_flags() & flags::TIMER, 0);
    }
}
