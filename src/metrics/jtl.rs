//! JMeter CSV results (`.jtl`) reading, summarizing and merging
//!
//! Columns follow the JMeter CSV defaults:
//! timeStamp, elapsed, label, responseCode, responseMessage, threadName,
//! dataType, success, failureMessage, bytes, sentBytes, grpThreads,
//! allThreads, URL, Latency, IdleTime, Connect

use crate::error::Result;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

const TIMESTAMP_COL: usize = 0;
const ELAPSED_COL: usize = 1;
const LABEL_COL: usize = 2;
const RESPONSE_CODE_COL: usize = 3;
const SUCCESS_COL: usize = 7;
const BYTES_COL: usize = 9;
const ALL_THREADS_COL: usize = 12;

/// One recorded request/response outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub label: String,
    pub success: bool,
    pub response_code: String,
    /// Elapsed time in milliseconds, when the column is readable
    pub elapsed: Option<u64>,
}

/// Label filter for transaction queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelFilter {
    /// Case-insensitive substring match
    Contains(String),
    /// Exact match
    Exact(String),
}

impl LabelFilter {
    pub fn matches(&self, label: &str) -> bool {
        match self {
            LabelFilter::Contains(needle) => label.to_lowercase().contains(&needle.to_lowercase()),
            LabelFilter::Exact(expected) => label == expected,
        }
    }
}

/// Whole-file aggregates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JtlSummary {
    pub samples: u64,
    pub passed: u64,
    pub failed: u64,
    pub avg_response_ms: f64,
    pub throughput_bps: f64,
}

/// Rates over the most recent rows of a results file
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JtlWindow {
    pub samples: u64,
    pub hits_sec: f64,
    pub throughput_bps: f64,
    /// `allThreads` of the newest row
    pub active_threads: u64,
}

/// Rates over the last `rows` samples of `path`.
///
/// The window spans the first to last timestamp it holds, floored at one
/// second. A missing or empty file yields an empty window.
pub fn tail_window(path: &Path, rows: usize) -> Result<JtlWindow> {
    let mut window: VecDeque<StringRecord> = VecDeque::with_capacity(rows.max(1));
    for_each_row(path, |row| {
        if window.len() == rows.max(1) {
            window.pop_front();
        }
        window.push_back(row.clone());
    })?;

    let (Some(first), Some(last)) = (window.front(), window.back()) else {
        return Ok(JtlWindow::default());
    };

    let span_ms = int_field(last, TIMESTAMP_COL).saturating_sub(int_field(first, TIMESTAMP_COL));
    let duration_secs = (span_ms as f64 / 1000.0).max(1.0);
    let samples = window.len() as u64;
    let bytes: u64 = window.iter().map(|row| int_field(row, BYTES_COL)).sum();

    Ok(JtlWindow {
        samples,
        hits_sec: samples as f64 / duration_secs,
        throughput_bps: bytes as f64 / duration_secs,
        active_threads: int_field(last, ALL_THREADS_COL),
    })
}

/// Read every transaction in `path`, optionally filtered by label.
///
/// A missing or empty file yields an empty list.
pub fn read_transactions(path: &Path, filter: Option<&LabelFilter>) -> Result<Vec<Transaction>> {
    let mut transactions = Vec::new();
    for_each_row(path, |row| {
        let label = field(row, LABEL_COL).unwrap_or("unknown").to_string();
        if filter.map_or(true, |f| f.matches(&label)) {
            transactions.push(Transaction {
                label,
                success: is_success(row),
                response_code: field(row, RESPONSE_CODE_COL).unwrap_or_default().to_string(),
                elapsed: field(row, ELAPSED_COL).and_then(|v| v.trim().parse().ok()),
            });
        }
    })?;
    Ok(transactions)
}

/// Aggregate one results file
pub fn summarize(path: &Path) -> Result<JtlSummary> {
    let mut samples = 0u64;
    let mut passed = 0u64;
    let mut bytes = 0u64;
    let mut elapsed_sum = 0u64;
    let mut first_ts: Option<u64> = None;
    let mut last_ts: Option<u64> = None;

    for_each_row(path, |row| {
        samples += 1;
        if is_success(row) {
            passed += 1;
        }
        bytes += int_field(row, BYTES_COL);
        elapsed_sum += int_field(row, ELAPSED_COL);

        if let Some(ts) = field(row, TIMESTAMP_COL).and_then(|v| v.trim().parse().ok()) {
            first_ts.get_or_insert(ts);
            last_ts = Some(ts);
        }
    })?;

    let span_ms = last_ts.unwrap_or(0).saturating_sub(first_ts.unwrap_or(0));
    let duration_secs = (span_ms as f64 / 1000.0).max(1.0);

    Ok(JtlSummary {
        samples,
        passed,
        failed: samples - passed,
        avg_response_ms: elapsed_sum as f64 / samples.max(1) as f64,
        throughput_bps: bytes as f64 / duration_secs,
    })
}

/// Combine per-file summaries: response time weighted by samples,
/// throughput averaged across files
pub fn combine(summaries: &[JtlSummary]) -> JtlSummary {
    let mut total = JtlSummary::default();
    let mut weighted_avg = 0.0;
    let mut throughput_sum = 0.0;

    for s in summaries {
        total.samples += s.samples;
        total.passed += s.passed;
        total.failed += s.failed;
        weighted_avg += s.avg_response_ms * s.samples.max(1) as f64;
        throughput_sum += s.throughput_bps;
    }

    total.avg_response_ms = weighted_avg / total.samples.max(1) as f64;
    total.throughput_bps = throughput_sum / summaries.len().max(1) as f64;
    total
}

/// Write a `Metric,Value` CSV for `summary`
pub fn write_summary_csv(summary: &JtlSummary, out: &Path) -> Result<()> {
    let mut writer = WriterBuilder::new().from_path(out)?;
    writer.write_record(["Metric", "Value"])?;
    let rows = [
        ("Samples", summary.samples.to_string()),
        ("Passed", summary.passed.to_string()),
        ("Failed", summary.failed.to_string()),
        ("Avg Response (ms)", format!("{:.2}", summary.avg_response_ms)),
        ("Throughput (B/s)", format!("{:.2}", summary.throughput_bps)),
    ];
    for (metric, value) in &rows {
        writer.write_record([*metric, value.as_str()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Concatenate results files into `out`, keeping a single header row
pub fn merge(inputs: &[PathBuf], out: &Path) -> Result<()> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut writer = WriterBuilder::new().flexible(true).from_path(out)?;
    let mut wrote_header = false;

    for input in inputs {
        if is_empty_file(input) {
            continue;
        }
        let mut reader = reader_for(input)?;
        for record in reader.records() {
            let Ok(record) = record else { continue };
            if record.is_empty() {
                continue;
            }
            if is_header(&record) {
                if !wrote_header {
                    writer.write_record(&record)?;
                    wrote_header = true;
                }
                continue;
            }
            writer.write_record(&record)?;
        }
    }

    writer.flush()?;
    Ok(())
}

fn for_each_row(path: &Path, mut f: impl FnMut(&StringRecord)) -> Result<()> {
    if is_empty_file(path) {
        return Ok(());
    }
    let mut reader = reader_for(path)?;
    for record in reader.records() {
        // Rows still being flushed by the engine may be cut short; skip them.
        let Ok(record) = record else { continue };
        if record.is_empty() || is_header(&record) {
            continue;
        }
        f(&record);
    }
    Ok(())
}

fn reader_for(path: &Path) -> Result<csv::Reader<std::fs::File>> {
    Ok(ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?)
}

fn is_empty_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true)
}

fn is_header(record: &StringRecord) -> bool {
    field(record, TIMESTAMP_COL).is_some_and(|v| v.eq_ignore_ascii_case("timestamp"))
}

fn field(record: &StringRecord, idx: usize) -> Option<&str> {
    record.get(idx)
}

fn int_field(record: &StringRecord, idx: usize) -> u64 {
    field(record, idx)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

fn is_success(record: &StringRecord) -> bool {
    field(record, SUCCESS_COL).is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
}
