// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 pmetrics contributors

//! The daemon's in-memory `metric_name -> open history file` index, backed
//! by the same open-addressed probe scheme as the counter table (§3:
//! "History daemon in-memory index").

use std::path::{Path, PathBuf};

use pmetrics_core::{hash::fast_hash, PmetricsError, Result};

use crate::file::HistoryFile;

/// A prime above the original's informal `MAX_METRICS` cap.
pub const DEFAULT_CAPACITY: usize = 3001;

struct Entry {
    name: String,
    file: HistoryFile,
}

enum Probe {
    Found(usize),
    Free(usize),
    Exhausted,
}

/// Owns every open `HistoryFile` the daemon has touched since startup.
/// Single-threaded within the daemon, per the specification's concurrency
/// model (§6).
pub struct MetricsIndex {
    directory: PathBuf,
    capacity: usize,
    slots: Vec<Option<Entry>>,
}

impl MetricsIndex {
    pub fn new(directory: impl Into<PathBuf>, capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        MetricsIndex {
            directory: directory.into(),
            capacity,
            slots,
        }
    }

    pub fn with_default_capacity(directory: impl Into<PathBuf>) -> Self {
        Self::new(directory, DEFAULT_CAPACITY)
    }

    fn probe(&self, hash: u32, name: &str) -> Probe {
        let capacity = self.capacity as u32;
        let k0 = (hash % capacity) as usize;
        match &self.slots[k0] {
            None => return Probe::Free(k0),
            Some(entry) if entry.name == name => return Probe::Found(k0),
            Some(_) => {}
        }

        let mut displacement: u32 = 1;
        for _ in 0..32 {
            let k = (hash.wrapping_add(displacement) % capacity) as usize;
            match &self.slots[k] {
                None => return Probe::Free(k),
                Some(entry) if entry.name == name => return Probe::Found(k),
                Some(_) => {}
            }
            displacement = displacement.wrapping_mul(2).wrapping_add(1);
        }
        Probe::Exhausted
    }

    fn metric_path(&self, metric_name: &str) -> PathBuf {
        self.directory.join(format!("{metric_name}.mhf"))
    }

    /// Returns the open history file for `metric_name`, opening (and
    /// thereby creating, per `HistoryFile::open`) it on first reference.
    pub fn get_or_open(&mut self, metric_name: &str) -> Result<&HistoryFile> {
        let hash = fast_hash(metric_name.as_bytes());
        let index = match self.probe(hash, metric_name) {
            Probe::Found(index) => index,
            Probe::Free(index) => {
                let file = HistoryFile::open(&self.metric_path(metric_name))?;
                self.slots[index] = Some(Entry {
                    name: metric_name.to_string(),
                    file,
                });
                index
            }
            Probe::Exhausted => return Err(PmetricsError::CannotAllocateCounter),
        };
        Ok(&self.slots[index].as_ref().unwrap().file)
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn opens_same_metric_once() {
        let dir = tempdir().unwrap();
        let mut index = MetricsIndex::new(dir.path(), 101);
        index.get_or_open("requests").unwrap();
        index.get_or_open("requests").unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn distinct_metrics_get_distinct_files() {
        let dir = tempdir().unwrap();
        let mut index = MetricsIndex::new(dir.path(), 101);
        index.get_or_open("requests").unwrap();
        index.get_or_open("errors").unwrap();
        assert_eq!(index.len(), 2);
        assert!(dir.path().join("requests.mhf").exists());
        assert!(dir.path().join("errors.mhf").exists());
    }
}
