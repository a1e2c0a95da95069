// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! Sample insertion and the backward read path for one series (§4.3.2,
//! §4.3.3). Only series 0 is currently written; the remaining series are
//! reserved for future downsampling, mirroring the original's comment that
//! they are populated "for future use."

use std::sync::atomic::Ordering;

use crate::file::HistoryFile;

/// The only series the daemon currently inserts into.
pub const WRITE_SERIES: usize = 0;

/// Appends `(timestamp_seconds, value)` to series 0, backfilling any gap
/// since the last sample with zero-valued ticks. A timestamp at or before
/// the series' last sample is a no-op (late arrival or duplicate).
pub fn add_sample(history: &HistoryFile, timestamp_seconds: u32, value: i64) {
    let len = history.series_length(WRITE_SERIES);
    if len == 0 {
        return;
    }

    let head_cell = history.head(WRITE_SERIES);
    let mut head = head_cell.load(Ordering::Relaxed);
    let last_slot = ((head + len - 1) % len) as usize;
    let last_ts = history.sample_time(WRITE_SERIES, last_slot).load(Ordering::Relaxed);

    if last_ts != 0 && timestamp_seconds <= last_ts {
        return;
    }

    let mut write_tick = |head: u32, ts: u32, v: i64| {
        let slot = head as usize;
        history.sample_value(WRITE_SERIES, slot).store(v, Ordering::Relaxed);
        history.sample_time(WRITE_SERIES, slot).store(ts, Ordering::Release);
    };

    if last_ts == 0 || timestamp_seconds == last_ts + 1 {
        write_tick(head, timestamp_seconds, value);
        head = (head + 1) % len;
    } else {
        let gap = timestamp_seconds - last_ts - 1;
        for i in 0..gap {
            write_tick(head, last_ts + i + 1, 0);
            head = (head + 1) % len;
        }
        write_tick(head, timestamp_seconds, value);
        head = (head + 1) % len;
    }

    head_cell.store(head, Ordering::Release);
}

/// Reads series `series_index` backwards from `(head - 1) mod len`,
/// stopping at the first never-populated slot (`sample_time == 0`) or
/// after visiting the whole ring — whichever comes first. Newest-first.
pub fn read_series(history: &HistoryFile, series_index: usize) -> Vec<(u32, i64)> {
    let len = history.series_length(series_index);
    if len == 0 {
        return Vec::new();
    }
    let head = history.head(series_index).load(Ordering::Acquire);

    let mut out = Vec::with_capacity(len as usize);
    for step in 0..len {
        let slot = ((head + len - 1 - step) % len) as usize;
        let ts = history.sample_time(series_index, slot).load(Ordering::Acquire);
        if ts == 0 {
            break;
        }
        let value = history.sample_value(series_index, slot).load(Ordering::Relaxed);
        out.push((ts, value));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn first_sample_then_gap_fill() {
        let dir = tempdir().unwrap();
        let history = HistoryFile::open(&dir.path().join("m.mhf")).unwrap();

        add_sample(&history, 100, 5);
        add_sample(&history, 103, 9);

        let results = read_series(&history, 0);
        assert_eq!(results, vec![(103, 9), (102, 0), (101, 0), (100, 5)]);
    }

    #[test]
    fn late_arrival_is_a_no_op() {
        let dir = tempdir().unwrap();
        let history = HistoryFile::open(&dir.path().join("m.mhf")).unwrap();

        add_sample(&history, 100, 5);
        add_sample(&history, 50, 999);

        let results = read_series(&history, 0);
        assert_eq!(results, vec![(100, 5)]);
    }

    #[test]
    fn duplicate_timestamp_is_a_no_op() {
        let dir = tempdir().unwrap();
        let history = HistoryFile::open(&dir.path().join("m.mhf")).unwrap();

        add_sample(&history, 100, 5);
        add_sample(&history, 100, 999);

        let results = read_series(&history, 0);
        assert_eq!(results, vec![(100, 5)]);
    }

    #[test]
    fn consecutive_ticks_no_gap_fill() {
        let dir = tempdir().unwrap();
        let history = HistoryFile::open(&dir.path().join("m.mhf")).unwrap();

        add_sample(&history, 1, 1);
        add_sample(&history, 2, 2);
        add_sample(&history, 3, 3);

        let results = read_series(&history, 0);
        assert_eq!(results, vec![(3, 3), (2, 2), (1, 1)]);
    }

    #[test]
    fn ring_wraparound_evicts_oldest() {
        let dir = tempdir().unwrap();
        let history = HistoryFile::open(&dir.path().join("m.mhf")).unwrap();

        for second in 0..=900u32 {
            add_sample(&history, second, second as i64);
        }

        let results = read_series(&history, 0);
        assert_eq!(results.len(), 900);
        assert_eq!(results[0], (900, 900));
        assert_eq!(results[899], (1, 1));
    }

    #[test]
    fn restart_persists_samples() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.mhf");
        {
            let history = HistoryFile::open(&path).unwrap();
            for second in 1..=60u32 {
                add_sample(&history, second, second as i64);
            }
        }
        let history = HistoryFile::open(&path).unwrap();
        let results = read_series(&history, 0);
        assert_eq!(results.len(), 60);
        assert_eq!(results[0], (60, 60));
    }
}
