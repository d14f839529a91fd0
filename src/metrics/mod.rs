//! Live metrics - progress parsing, per-session aggregation and results files

mod aggregator;
pub mod jtl;
mod progress;

pub use aggregator::{MetricsAggregator, OutputLine};
pub use progress::{parse_line, IntervalStats, ProgressSample};

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Normalized metrics for one report interval
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Seconds of test time covered so far, as reported by the engine
    pub elapsed_s: u64,
    pub running_vusers: u64,
    pub hits_sec: f64,
    pub throughput_bps: f64,
    pub avg_response_ms: f64,
    pub passed_txn: u64,
    pub failed_txn: u64,
    pub errors: u64,
}

impl MetricsSnapshot {
    /// Completed samples (passed plus failed)
    pub fn samples(&self) -> u64 {
        self.passed_txn + self.failed_txn
    }
}

/// Bounded rolling window of snapshots, oldest evicted first
#[derive(Debug, Clone)]
pub struct MetricsHistory {
    entries: VecDeque<MetricsSnapshot>,
    capacity: usize,
}

impl MetricsHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a snapshot, evicting the oldest once the window is full
    pub fn push(&mut self, snapshot: MetricsSnapshot) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(snapshot);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricsSnapshot> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<MetricsSnapshot> {
        self.entries.iter().cloned().collect()
    }
}
