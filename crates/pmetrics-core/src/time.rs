// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! Monotonic and wall-clock time helpers used by sampling and the history
//! daemon's timestamps.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Nanosecond-resolution monotonic timestamp, suitable for `Sample::sample_time`
/// and timer deltas. Not comparable across process restarts.
pub fn monotonic_now_nanos() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_nanos() as u64
}

/// Current wall-clock time in whole seconds since the Unix epoch, used as the
/// ingest timestamp carried in the UPDATE datagram and stored in history
/// samples.
pub fn wall_clock_seconds() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}
