//! Session management - tracks test-run state, run mode and metrics

mod state;
mod store;

pub use state::{SessionEvent, SessionStatus};
pub use store::{SessionHandle, SessionStore};

use crate::error::{ControlError, Result};
use crate::metrics::{MetricsHistory, MetricsSnapshot};
use crate::splitter;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// How a session's plan is executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum RunMode {
    /// Single local engine process
    Sanity,
    /// Controller driving remote worker engines
    Distributed(DistConfig),
}

/// Remote workers and the strategy used to drive them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistConfig {
    hosts: Vec<String>,
    strategy: Distribution,
}

/// Distribution strategy for a distributed run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum Distribution {
    /// Every worker runs the plan unmodified
    Replicate,
    /// A single total is divided across workers
    SplitEqual(LoadSplit),
}

/// Split basis together with the computed per-host shares.
///
/// `shares[i]` belongs to `hosts[i]` of the owning [`DistConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "basis", rename_all = "snake_case")]
pub enum LoadSplit {
    /// Target throughput (transactions per second)
    Tps { total: u64, shares: Vec<u64> },
    /// Target concurrent users; timing parameters are per worker
    Threads {
        total: u64,
        shares: Vec<u64>,
        ramp_up_secs: u64,
        duration_secs: Option<u64>,
    },
}

/// Split basis requested by a caller, before shares are computed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitBasis {
    Tps,
    Threads {
        ramp_up_secs: u64,
        duration_secs: Option<u64>,
    },
}

impl DistConfig {
    /// Every host runs the identical plan
    pub fn replicate(hosts: Vec<String>) -> Result<Self> {
        Ok(Self {
            hosts: validate_hosts(hosts)?,
            strategy: Distribution::Replicate,
        })
    }

    /// Divide `total` across `hosts` with the equal-split policy
    pub fn split_equal(hosts: Vec<String>, basis: SplitBasis, total: u64) -> Result<Self> {
        let hosts = validate_hosts(hosts)?;
        if total == 0 {
            return Err(ControlError::Validation(
                "a positive total is required for split_equal".to_string(),
            ));
        }
        let shares = splitter::split(total, hosts.len())?;

        let split = match basis {
            SplitBasis::Tps => LoadSplit::Tps { total, shares },
            SplitBasis::Threads {
                ramp_up_secs,
                duration_secs,
            } => LoadSplit::Threads {
                total,
                shares,
                ramp_up_secs,
                duration_secs,
            },
        };

        Ok(Self {
            hosts,
            strategy: Distribution::SplitEqual(split),
        })
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    pub fn strategy(&self) -> &Distribution {
        &self.strategy
    }
}

impl LoadSplit {
    pub fn shares(&self) -> &[u64] {
        match self {
            LoadSplit::Tps { shares, .. } | LoadSplit::Threads { shares, .. } => shares,
        }
    }

    pub fn total(&self) -> u64 {
        match self {
            LoadSplit::Tps { total, .. } | LoadSplit::Threads { total, .. } => *total,
        }
    }
}

fn validate_hosts(hosts: Vec<String>) -> Result<Vec<String>> {
    let hosts: Vec<String> = hosts
        .into_iter()
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .collect();

    if hosts.is_empty() {
        return Err(ControlError::Validation(
            "distributed mode requires at least one remote host".to_string(),
        ));
    }
    Ok(hosts)
}

/// Progress of the HTML dashboard generation for a session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    #[default]
    NotStarted,
    Generating,
    Ready,
    Error,
}

/// Session record
///
/// Owned by a [`SessionHandle`]; every mutation goes through the handle so
/// that readers always observe a complete record.
#[derive(Debug)]
pub struct Session {
    /// Opaque external handle
    pub id: Uuid,

    /// Uploaded test plan
    pub plan_path: PathBuf,

    /// Directory holding the plan and the `results/` folder
    pub work_dir: PathBuf,

    /// When the plan was uploaded
    pub created_at: DateTime<Utc>,

    /// Chosen at start time
    pub mode: Option<RunMode>,

    pub status: SessionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,

    /// Diagnostic text for the `error` state
    pub message: Option<String>,

    pub latest_metrics: MetricsSnapshot,
    pub history: MetricsHistory,

    /// Projection of the live engine processes owned by the supervisor
    pub engine_pids: Vec<u32>,

    /// Results files written by the engines of the current run
    pub result_files: Vec<PathBuf>,

    pub report_status: ReportStatus,
}

impl Session {
    /// Create a new session in the `created` state
    pub fn new(id: Uuid, plan_path: PathBuf, history_window: usize) -> Self {
        let work_dir = plan_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));

        Self {
            id,
            plan_path,
            work_dir,
            created_at: Utc::now(),
            mode: None,
            status: SessionStatus::Created,
            started_at: None,
            ended_at: None,
            message: None,
            latest_metrics: MetricsSnapshot::default(),
            history: MetricsHistory::new(history_window),
            engine_pids: Vec::new(),
            result_files: Vec::new(),
            report_status: ReportStatus::NotStarted,
        }
    }

    /// Directory the engines write results into
    pub fn results_dir(&self) -> PathBuf {
        self.work_dir.join("results")
    }

    /// Directory the report tool writes the dashboard into
    pub fn report_dir(&self) -> PathBuf {
        self.results_dir().join("html")
    }

    /// Apply a lifecycle event, updating timestamps and process projection
    pub fn apply(&mut self, event: &SessionEvent) -> Result<SessionStatus> {
        let next = self
            .status
            .on(event)
            .ok_or(ControlError::InvalidTransition {
                from: self.status,
                event: event.name(),
            })?;

        match event {
            SessionEvent::Start => {
                self.started_at = Some(Utc::now());
                self.ended_at = None;
            }
            SessionEvent::LaunchFailed(message) => {
                self.message = Some(message.clone());
            }
            SessionEvent::Exited {
                success: false,
                message,
            } if next == SessionStatus::Error => {
                self.message = Some(message.clone());
            }
            _ => {}
        }

        if next.is_terminal() {
            self.ended_at.get_or_insert_with(Utc::now);
            self.engine_pids.clear();
        }

        self.status = next;
        Ok(next)
    }

    /// Seconds since start, frozen once the session is terminal
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> u64 {
        let Some(started) = self.started_at else {
            return 0;
        };
        let end = if self.status.is_terminal() {
            self.ended_at.unwrap_or(now)
        } else {
            now
        };
        (end - started).num_seconds().max(0) as u64
    }

    /// Consistent read-only projection of the record
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            id: self.id,
            plan: self
                .plan_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            status: self.status,
            elapsed_s: self.elapsed_seconds(Utc::now()),
            mode: self.mode.clone(),
            metrics: self.latest_metrics.clone(),
            message: self.message.clone(),
            report_status: self.report_status,
            engine_count: self.engine_pids.len(),
            created_at: self.created_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

/// Session snapshot returned to callers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub plan: String,
    pub status: SessionStatus,
    pub elapsed_s: u64,
    pub mode: Option<RunMode>,
    pub metrics: MetricsSnapshot,
    pub message: Option<String>,
    pub report_status: ReportStatus,
    pub engine_count: usize,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}
