//! Request and response bodies for the HTTP surface

use crate::error::{ControlError, Result};
use crate::metrics::jtl::LabelFilter;
use crate::metrics::MetricsSnapshot;
use crate::orchestrator::TransactionQuery;
use crate::session::{
    DistConfig, ReportStatus, RunMode, SessionInfo, SessionStatus, SplitBasis,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ramp-up applied to a thread split when the caller gives none
pub const DEFAULT_RAMP_UP_SECS: u64 = 60;

/// Run mode requested by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeKind {
    #[default]
    Sanity,
    Distributed,
}

/// Distribution strategy requested by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistKind {
    #[default]
    Replicate,
    SplitEqual,
}

/// What a split-equal total counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMethod {
    #[default]
    Tps,
    Threads,
}

/// Remote hosts as a comma separated string or a list
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HostList {
    Joined(String),
    List(Vec<String>),
}

impl HostList {
    pub fn into_hosts(self) -> Vec<String> {
        let raw = match self {
            HostList::Joined(s) => s.split(',').map(str::to_string).collect(),
            HostList::List(list) => list,
        };
        raw.into_iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect()
    }
}

/// `POST /start`
#[derive(Debug, Clone, Deserialize)]
pub struct StartRequest {
    pub session_id: Uuid,

    #[serde(default)]
    pub mode: ModeKind,

    pub remote_hosts: Option<HostList>,

    /// Number of workers the caller expects; required for distributed runs
    /// and must match `remote_hosts`
    pub slave_count: Option<usize>,

    #[serde(default)]
    pub dist_mode: DistKind,

    #[serde(default)]
    pub split_method: SplitMethod,

    /// Throughput or user total for `split_equal`
    pub total: Option<u64>,

    pub rampup: Option<u64>,
    pub duration: Option<u64>,
}

impl StartRequest {
    /// Validate the distribution fields and build the run mode
    pub fn run_mode(&self) -> Result<RunMode> {
        if self.mode == ModeKind::Sanity {
            return Ok(RunMode::Sanity);
        }

        let hosts = self
            .remote_hosts
            .clone()
            .map(HostList::into_hosts)
            .unwrap_or_default();
        if hosts.is_empty() {
            return Err(ControlError::Validation(
                "distributed mode requires remote_hosts".to_string(),
            ));
        }
        let expected = self.slave_count.ok_or_else(|| {
            ControlError::Validation("distributed mode requires slave_count".to_string())
        })?;
        if expected != hosts.len() {
            return Err(ControlError::Validation(format!(
                "slave_count is {} but {} remote hosts were given",
                expected,
                hosts.len()
            )));
        }

        let config = match self.dist_mode {
            DistKind::Replicate => DistConfig::replicate(hosts)?,
            DistKind::SplitEqual => {
                let total = self.total.filter(|t| *t > 0).ok_or_else(|| {
                    ControlError::Validation("split_equal requires a positive total".to_string())
                })?;
                let basis = match self.split_method {
                    SplitMethod::Tps => SplitBasis::Tps,
                    SplitMethod::Threads => SplitBasis::Threads {
                        ramp_up_secs: self.rampup.unwrap_or(DEFAULT_RAMP_UP_SECS),
                        duration_secs: self.duration,
                    },
                };
                DistConfig::split_equal(hosts, basis, total)?
            }
        };
        Ok(RunMode::Distributed(config))
    }
}

/// `POST /stop`
#[derive(Debug, Clone, Deserialize)]
pub struct StopRequest {
    pub session_id: Uuid,
}

/// `GET /transactions/:id` query
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransactionsQuery {
    pub label: Option<String>,

    /// Match `label` exactly instead of as a substring
    #[serde(default)]
    pub exact: bool,

    /// Keep only the last N transactions
    pub limit: Option<usize>,

    /// Keep only the configured number of most recent transactions
    #[serde(default)]
    pub recent: bool,
}

impl TransactionsQuery {
    pub fn into_query(self, default_limit: usize) -> TransactionQuery {
        let filter = self
            .label
            .filter(|l| !l.is_empty())
            .map(|l| if self.exact { LabelFilter::Exact(l) } else { LabelFilter::Contains(l) });
        let limit = self.limit.or(self.recent.then_some(default_limit));
        TransactionQuery { filter, limit }
    }
}

/// `POST /upload` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub session_id: Uuid,
    pub plan: String,
    pub status: SessionStatus,
}

/// Flat status projection polled by the UI
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub session_id: Uuid,
    pub plan: String,
    pub status: SessionStatus,
    pub elapsed_s: u64,

    #[serde(flatten)]
    pub metrics: MetricsSnapshot,

    pub mode: Option<RunMode>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub report_status: ReportStatus,

    /// Live engine processes
    pub engines: usize,

    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<SessionInfo> for StatusResponse {
    fn from(info: SessionInfo) -> Self {
        Self {
            session_id: info.id,
            plan: info.plan,
            status: info.status,
            elapsed_s: info.elapsed_s,
            metrics: info.metrics,
            mode: info.mode,
            message: info.message,
            report_status: info.report_status,
            engines: info.engine_count,
            started_at: info.started_at,
            ended_at: info.ended_at,
        }
    }
}

/// Report generation state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportResponse {
    pub session_id: Uuid,
    pub report_status: ReportStatus,
}

/// `GET /healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
    pub timestamp: DateTime<Utc>,
}
