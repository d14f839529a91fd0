//! Orchestrator - the operations behind the HTTP surface
//!
//! Owns the session store, the engine supervisor and the report tool, and
//! enforces the per-session preconditions every boundary operation needs.

use crate::config::Config;
use crate::engine::{archive_dir, ReportTool, Supervisor};
use crate::error::{ControlError, Result};
use crate::metrics::jtl::{self, LabelFilter, Transaction};
use crate::metrics::MetricsSnapshot;
use crate::plan;
use crate::session::{ReportStatus, RunMode, SessionHandle, SessionInfo, SessionStore};
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

const MERGED_RESULTS: &str = "combined.jtl";
const SUMMARY_FILE: &str = "summary.csv";
const REPORT_ARCHIVE: &str = "report.zip";
const REPORT_ERROR_LOG: &str = "report_error.log";

/// Transaction query options
#[derive(Debug, Clone, Default)]
pub struct TransactionQuery {
    pub filter: Option<LabelFilter>,
    /// Keep only the most recent N after filtering
    pub limit: Option<usize>,
}

/// Control-plane operations shared by every request handler
pub struct Orchestrator {
    store: SessionStore,
    supervisor: Supervisor,
    reports: ReportTool,
    sessions_dir: PathBuf,
    transactions_limit: usize,
}

impl Orchestrator {
    pub fn new(config: &Config) -> Self {
        Self {
            store: SessionStore::new(config.metrics.history_window),
            supervisor: Supervisor::new(config.engine.clone()),
            reports: ReportTool::from_config(&config.engine),
            sessions_dir: config.sessions_dir(),
            transactions_limit: config.metrics.transactions_limit,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn sessions_dir(&self) -> &PathBuf {
        &self.sessions_dir
    }

    /// Default size of the limited transaction view
    pub fn transactions_limit(&self) -> usize {
        self.transactions_limit
    }

    /// Validate and store an uploaded plan, creating a new session for it
    pub async fn upload(&self, file_name: &str, content: &[u8]) -> Result<SessionInfo> {
        let stored_name = plan::validate(file_name, content)?;

        let id = Uuid::new_v4();
        let work_dir = self.sessions_dir.join(id.to_string());
        tokio::fs::create_dir_all(work_dir.join("results")).await?;

        let plan_path = work_dir.join(stored_name);
        tokio::fs::write(&plan_path, content).await?;

        tracing::info!(session = %id, plan = %plan_path.display(), bytes = content.len(), "Plan uploaded");
        let handle = self.store.create_session(id, plan_path).await?;
        Ok(handle.info().await)
    }

    /// Start a session. Rejected unless the session is `created`.
    pub async fn start(&self, id: Uuid, mode: RunMode) -> Result<SessionInfo> {
        let handle = self.store.get(id).await?;
        self.supervisor.start(Arc::clone(&handle), mode).await?;
        Ok(handle.info().await)
    }

    /// Stop a session; a no-op unless it is `starting` or `running`
    pub async fn stop(&self, id: Uuid) -> Result<SessionInfo> {
        let handle = self.store.get(id).await?;
        self.supervisor.stop(&handle).await;
        Ok(handle.info().await)
    }

    pub async fn status(&self, id: Uuid) -> Result<SessionInfo> {
        self.store.get_status(id).await
    }

    pub async fn list(&self) -> Vec<SessionInfo> {
        self.store.list().await
    }

    /// Rolling metrics window, oldest first
    pub async fn history(&self, id: Uuid) -> Result<Vec<MetricsSnapshot>> {
        let handle = self.store.get(id).await?;
        let record = handle.read().await;
        Ok(record.history.to_vec())
    }

    /// Individual transactions from the session's results files
    pub async fn transactions(&self, id: Uuid, query: TransactionQuery) -> Result<Vec<Transaction>> {
        let handle = self.store.get(id).await?;
        let files = self.result_files(&handle).await;

        let mut transactions = blocking(move || {
            let mut all = Vec::new();
            for file in &files {
                all.extend(jtl::read_transactions(file, query.filter.as_ref())?);
            }
            Ok(all)
        })
        .await?;

        if let Some(limit) = query.limit {
            let skip = transactions.len().saturating_sub(limit);
            transactions.drain(..skip);
        }
        Ok(transactions)
    }

    /// Path of a downloadable results file, merging several into one
    pub async fn results_file(&self, id: Uuid) -> Result<PathBuf> {
        let handle = self.store.get(id).await?;
        let files = self.result_files(&handle).await;

        match files.as_slice() {
            [] => Err(ControlError::NotFound(id)),
            [single] if single.exists() => Ok(single.clone()),
            [_] => Err(ControlError::NotFound(id)),
            _ => {
                let out = handle.read().await.results_dir().join(MERGED_RESULTS);
                let target = out.clone();
                blocking(move || jtl::merge(&files, &target)).await?;
                Ok(out)
            }
        }
    }

    /// Write the `Metric,Value` summary CSV and return its path
    pub async fn summary_csv(&self, id: Uuid) -> Result<PathBuf> {
        let handle = self.store.get(id).await?;
        let files = self.result_files(&handle).await;
        if files.is_empty() {
            return Err(ControlError::NotFound(id));
        }

        let out = handle.read().await.results_dir().join(SUMMARY_FILE);
        let target = out.clone();
        blocking(move || {
            let summaries = files
                .iter()
                .map(|f| jtl::summarize(f))
                .collect::<Result<Vec<_>>>()?;
            jtl::write_summary_csv(&jtl::combine(&summaries), &target)
        })
        .await?;
        Ok(out)
    }

    /// Kick off dashboard generation in the background.
    ///
    /// Returns immediately with `generating`; a second request while one is
    /// in flight is answered with the current status.
    pub async fn generate_report(&self, id: Uuid) -> Result<ReportStatus> {
        let handle = self.store.get(id).await?;
        let files = self.result_files(&handle).await;
        if files.is_empty() {
            return Err(ControlError::NotFound(id));
        }

        let (results_dir, report_dir) = {
            let record = handle.read().await;
            (record.results_dir(), record.report_dir())
        };

        let accepted = handle
            .update(|record| {
                if record.report_status == ReportStatus::Generating {
                    return false;
                }
                record.report_status = ReportStatus::Generating;
                true
            })
            .await;
        if !accepted {
            return Ok(ReportStatus::Generating);
        }

        let reports = self.reports.clone();
        tokio::spawn(async move {
            let combined = results_dir.join(MERGED_RESULTS);
            let error_log = results_dir.join(REPORT_ERROR_LOG);

            let merge_target = combined.clone();
            let outcome = match blocking(move || jtl::merge(&files, &merge_target)).await {
                Ok(()) => reports.generate(&combined, &report_dir, &error_log).await,
                Err(e) => Err(e),
            };

            let status = outcome.unwrap_or_else(|e| {
                tracing::error!(session = %handle.id(), error = %e, "Report generation failed");
                if let Err(log_err) = std::fs::write(&error_log, e.to_string()) {
                    tracing::warn!(error = %log_err, "Could not write report error log");
                }
                ReportStatus::Error
            });

            tracing::info!(session = %handle.id(), ?status, "Report generation finished");
            handle.update(|record| record.report_status = status).await;
        });

        Ok(ReportStatus::Generating)
    }

    /// Pack the generated dashboard and return the archive path
    pub async fn report_archive(&self, id: Uuid) -> Result<PathBuf> {
        let handle = self.store.get(id).await?;
        let (status, results_dir, report_dir) = {
            let record = handle.read().await;
            (record.report_status, record.results_dir(), record.report_dir())
        };
        if status != ReportStatus::Ready || !report_dir.is_dir() {
            return Err(ControlError::NotFound(id));
        }

        let out = results_dir.join(REPORT_ARCHIVE);
        let target = out.clone();
        blocking(move || archive_dir(&report_dir, "report", &target)).await?;
        Ok(out)
    }

    /// Stop every active session, used on server shutdown
    pub async fn shutdown(&self) {
        for info in self.store.list().await {
            if info.status.is_active() {
                tracing::info!(session = %info.id, "Stopping session for shutdown");
                if let Ok(handle) = self.store.get(info.id).await {
                    self.supervisor.stop(&handle).await;
                }
            }
        }
    }

    async fn result_files(&self, handle: &SessionHandle) -> Vec<PathBuf> {
        handle.read().await.result_files.clone()
    }
}

/// Run blocking file work off the async workers
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ControlError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}
