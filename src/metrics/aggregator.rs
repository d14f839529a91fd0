//! Per-session metrics aggregation across engine processes

use super::jtl::{self, JtlWindow};
use super::{parse_line, MetricsSnapshot, ProgressSample};
use crate::session::SessionHandle;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A line of engine output tagged with the engine that produced it
#[derive(Debug, Clone)]
pub struct OutputLine {
    /// Index of the engine process within its group
    pub source: usize,
    pub line: String,
}

/// Results rows that make up the live throughput window
const RESULTS_WINDOW_ROWS: usize = 200;

/// Folds progress lines from every engine of a session into one snapshot.
///
/// Each engine keeps its own running state; the published snapshot combines
/// the latest state of all engines that reported at least once. Summariser
/// lines carry no byte counts, so after each one the engine's throughput is
/// taken from the tail of its results file.
pub struct MetricsAggregator {
    sources: Vec<Option<MetricsSnapshot>>,
    results_files: Vec<PathBuf>,
    /// Engine whose results window is due after the last summariser line
    pending_window: Option<usize>,
    tail: VecDeque<String>,
    tail_capacity: usize,
    dropped: u64,
}

impl MetricsAggregator {
    pub fn new(sources: usize, tail_capacity: usize) -> Self {
        Self {
            sources: vec![None; sources],
            results_files: Vec::new(),
            pending_window: None,
            tail: VecDeque::with_capacity(tail_capacity),
            tail_capacity,
            dropped: 0,
        }
    }

    /// Results file of each engine, in group order
    pub fn with_results_files(mut self, files: Vec<PathBuf>) -> Self {
        self.results_files = files;
        self
    }

    /// Ingest one raw line.
    ///
    /// Returns the new combined snapshot when the line decoded, `None`
    /// otherwise. Undecodable lines never change the aggregate.
    pub fn ingest(&mut self, source: usize, line: &str) -> Option<MetricsSnapshot> {
        self.remember(line);

        let Some(slot) = self.sources.get_mut(source) else {
            self.dropped += 1;
            return None;
        };

        let Some(sample) = parse_line(line) else {
            self.dropped += 1;
            tracing::trace!(source, line, "Dropped non-progress line");
            return None;
        };

        let state = slot.get_or_insert_with(MetricsSnapshot::default);
        match sample {
            ProgressSample::Absolute(snapshot) => *state = snapshot,
            ProgressSample::Interval(stats) => {
                state.elapsed_s += stats.interval_secs;
                state.running_vusers = stats.active_users;
                state.hits_sec = stats.hits_sec;
                state.avg_response_ms = stats.avg_response_ms;
                state.passed_txn += stats.samples.saturating_sub(stats.errors);
                state.failed_txn += stats.errors;
                state.errors += stats.errors;
                if source < self.results_files.len() {
                    self.pending_window = Some(source);
                }
            }
        }

        Some(self.combined())
    }

    /// Take an engine's throughput from its results window
    pub fn apply_window(&mut self, source: usize, window: &JtlWindow) -> MetricsSnapshot {
        if let Some(Some(state)) = self.sources.get_mut(source) {
            state.throughput_bps = window.throughput_bps;
        }
        self.combined()
    }

    /// Combined snapshot over every engine that has reported
    pub fn combined(&self) -> MetricsSnapshot {
        let mut total = MetricsSnapshot::default();
        let mut weighted_avg = 0.0;
        let mut weight = 0u64;

        for state in self.sources.iter().flatten() {
            total.elapsed_s = total.elapsed_s.max(state.elapsed_s);
            total.running_vusers += state.running_vusers;
            total.hits_sec += state.hits_sec;
            total.throughput_bps += state.throughput_bps;
            total.passed_txn += state.passed_txn;
            total.failed_txn += state.failed_txn;
            total.errors += state.errors;

            let w = state.samples().max(1);
            weighted_avg += state.avg_response_ms * w as f64;
            weight += w;
        }

        if weight > 0 {
            total.avg_response_ms = weighted_avg / weight as f64;
        }
        total
    }

    /// Last non-empty output line, used as launch/exit diagnostics
    pub fn last_output_line(&self) -> Option<&str> {
        self.tail
            .iter()
            .rev()
            .map(|l| l.trim())
            .find(|l| !l.is_empty())
    }

    /// Most recent raw output lines, oldest first
    pub fn output_tail(&self) -> impl Iterator<Item = &str> {
        self.tail.iter().map(String::as_str)
    }

    /// Lines that did not decode as progress
    pub fn dropped_lines(&self) -> u64 {
        self.dropped
    }

    /// Consume lines until every sender is gone, publishing each decoded
    /// snapshot into the session. Returns the aggregator for diagnostics.
    pub async fn pump(
        mut self,
        mut lines: mpsc::Receiver<OutputLine>,
        session: Arc<SessionHandle>,
    ) -> Self {
        while let Some(OutputLine { source, line }) = lines.recv().await {
            if let Some(mut snapshot) = self.ingest(source, &line) {
                if let Some(window) = self.read_pending_window().await {
                    snapshot = self.apply_window(window.0, &window.1);
                }
                tracing::debug!(
                    session = %session.id(),
                    vusers = snapshot.running_vusers,
                    hits_sec = snapshot.hits_sec,
                    throughput_bps = snapshot.throughput_bps,
                    "Progress"
                );
                session.record_metrics(snapshot).await;
            }
        }
        self
    }

    async fn read_pending_window(&mut self) -> Option<(usize, JtlWindow)> {
        let source = self.pending_window.take()?;
        let path = self.results_files.get(source)?.clone();

        let read = tokio::task::spawn_blocking(move || {
            jtl::tail_window(&path, RESULTS_WINDOW_ROWS)
        })
        .await;
        match read {
            Ok(Ok(window)) => Some((source, window)),
            Ok(Err(e)) => {
                tracing::debug!(engine = source, error = %e, "Results window unreadable");
                None
            }
            Err(e) => {
                tracing::debug!(engine = source, error = %e, "Results window task failed");
                None
            }
        }
    }

    fn remember(&mut self, line: &str) {
        if self.tail_capacity == 0 {
            return;
        }
        if self.tail.len() == self.tail_capacity {
            self.tail.pop_front();
        }
        self.tail.push_back(line.to_string());
    }
}
