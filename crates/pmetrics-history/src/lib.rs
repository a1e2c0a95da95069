// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! Memory-mapped, multi-resolution ring-buffer history files (C5), one per
//! metric, plus the daemon's in-memory index over them.
//!
//! ```text
//! MetricsIndex (metric_name -> HistoryFile)
//!   HistoryFile: header + series_length[5] + series_head[5] + samples
//!     series::add_sample   — gap-filling insertion into series 0
//!     series::read_series  — newest-first backward read of any series
//! ```

pub mod file;
pub mod index;
pub mod series;

pub use file::{HistoryFile, MAGIC, NSERIES, SERIES_CAPACITIES, VERSION};
pub use index::{MetricsIndex, DEFAULT_CAPACITY};
pub use series::{add_sample, read_series, WRITE_SERIES};
