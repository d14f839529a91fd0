//! Engine progress line parsing
//!
//! Two shapes are understood:
//!
//! - JMeter summariser deltas:
//!   `summary +     10 in 00:00:01 =   10.0/s Avg:    50 Min: 10 Max: 200 Err:     1 (10.00%) Active: 5 Started: 5 Finished: 0`
//! - structured lines: `progress elapsed=12 vusers=5 hits=10.5 bytes=2048 avg=120 passed=30 failed=1 errors=1`
//!
//! Anything else yields `None`.

use super::MetricsSnapshot;
use regex::Regex;
use std::sync::LazyLock;

static SUMMARISER_DELTA: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"summary \+\s+(\d+)\s+in\s+(\d+):(\d{2}):(\d{2})\s+=\s+([0-9]+(?:\.[0-9]+)?)/s\s+Avg:\s+(\d+).*?Err:\s+(\d+)(?:.*?Active:\s+(\d+))?",
    )
    .expect("summariser pattern is valid")
});

const PROGRESS_PREFIX: &str = "progress";

/// Values reported by one summariser interval
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalStats {
    pub samples: u64,
    pub interval_secs: u64,
    pub hits_sec: f64,
    pub avg_response_ms: f64,
    pub errors: u64,
    pub active_users: u64,
}

/// A successfully decoded progress line
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressSample {
    /// Values for the last interval only; totals must be accumulated
    Interval(IntervalStats),
    /// Absolute values
    Absolute(MetricsSnapshot),
}

/// Decode one output line
pub fn parse_line(line: &str) -> Option<ProgressSample> {
    let line = line.trim();
    if let Some(rest) = line.strip_prefix(PROGRESS_PREFIX) {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return parse_structured(rest).map(ProgressSample::Absolute);
        }
        return None;
    }
    parse_summariser(line).map(ProgressSample::Interval)
}

fn parse_summariser(line: &str) -> Option<IntervalStats> {
    let caps = SUMMARISER_DELTA.captures(line)?;
    let int = |i: usize| -> Option<u64> { caps.get(i)?.as_str().parse().ok() };

    let hours = int(2)?;
    let minutes = int(3)?;
    let seconds = int(4)?;
    let hits_sec: f64 = caps.get(5)?.as_str().parse().ok()?;

    Some(IntervalStats {
        samples: int(1)?,
        interval_secs: hours * 3600 + minutes * 60 + seconds,
        hits_sec,
        avg_response_ms: int(6)? as f64,
        errors: int(7)?,
        active_users: caps.get(8).and_then(|m| m.as_str().parse().ok()).unwrap_or(0),
    })
}

fn parse_structured(fields: &str) -> Option<MetricsSnapshot> {
    let mut snapshot = MetricsSnapshot::default();
    let mut recognized = 0usize;

    for token in fields.split_whitespace() {
        let (key, value) = token.split_once('=')?;
        match key {
            "elapsed" => snapshot.elapsed_s = value.parse().ok()?,
            "vusers" => snapshot.running_vusers = value.parse().ok()?,
            "hits" => snapshot.hits_sec = parse_rate(value)?,
            "bytes" => snapshot.throughput_bps = parse_rate(value)?,
            "avg" => snapshot.avg_response_ms = parse_rate(value)?,
            "passed" => snapshot.passed_txn = value.parse().ok()?,
            "failed" => snapshot.failed_txn = value.parse().ok()?,
            "errors" => snapshot.errors = value.parse().ok()?,
            _ => continue,
        }
        recognized += 1;
    }

    (recognized > 0).then_some(snapshot)
}

fn parse_rate(value: &str) -> Option<f64> {
    let v: f64 = value.parse().ok()?;
    (v.is_finite() && v >= 0.0).then_some(v)
}
