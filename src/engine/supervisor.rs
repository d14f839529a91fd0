//! Engine supervisor - launches a session's process group and drives the
//! session to a terminal state

use super::{invocations, ProcessGroup};
use crate::config::EngineConfig;
use crate::error::{ControlError, Result};
use crate::metrics::MetricsAggregator;
use crate::session::{RunMode, SessionEvent, SessionHandle, SessionStatus};
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Buffered output lines per session
const OUTPUT_CHANNEL_CAPACITY: usize = 1024;

/// How long the final metrics drain may take once every engine is gone
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Slack on top of the grace period when a caller waits for a stop
const STOP_WAIT_MARGIN: Duration = Duration::from_secs(3);

/// Starts and stops engine process groups
#[derive(Debug, Clone)]
pub struct Supervisor {
    config: EngineConfig,
}

impl Supervisor {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start `session` in `mode`.
    ///
    /// Wins the `created -> starting` transition first, so concurrent calls
    /// for one session spawn at most one process group. Returns once the
    /// processes are spawned (or failed to spawn); completion is tracked in
    /// the background.
    pub async fn start(&self, session: Arc<SessionHandle>, mode: RunMode) -> Result<SessionStatus> {
        session.begin_start(mode.clone()).await?;
        Ok(self.launch(session, &mode).await)
    }

    async fn launch(&self, session: Arc<SessionHandle>, mode: &RunMode) -> SessionStatus {
        let (plan, work_dir, results_dir) = {
            let record = session.read().await;
            (
                record.plan_path.clone(),
                record.work_dir.clone(),
                record.results_dir(),
            )
        };

        let commands = invocations(mode, &plan, &work_dir, &self.config);
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);

        let spawned = std::fs::create_dir_all(&results_dir)
            .map_err(ControlError::from)
            .and_then(|_| ProcessGroup::spawn(&commands, tx));

        let group = match spawned {
            Ok(group) => group,
            Err(e) => {
                tracing::error!(session = %session.id(), error = %e, "Engine launch failed");
                return session
                    .apply(SessionEvent::LaunchFailed(e.to_string()))
                    .await
                    .unwrap_or_else(|_| session.status());
            }
        };

        let aggregator = MetricsAggregator::new(group.len(), self.config.output_tail_lines)
            .with_results_files(group.results_files());
        let pump = tokio::spawn(aggregator.pump(rx, Arc::clone(&session)));

        let status = match session
            .mark_launched(group.pids(), group.results_files())
            .await
        {
            Ok(status) => status,
            Err(e) => {
                // Only reachable if the session left the start path behind our
                // back; dropping the group kills the processes.
                tracing::error!(session = %session.id(), error = %e, "Launched into a settled session");
                return session.status();
            }
        };

        tracing::info!(
            session = %session.id(),
            engines = group.len(),
            pids = ?group.pids(),
            "Engines launched"
        );

        tokio::spawn(supervise(
            Arc::clone(&session),
            group,
            pump,
            self.config.grace_period(),
        ));

        status
    }

    /// Stop `session` and wait for it to settle.
    ///
    /// A session that is not `starting` or `running` is left alone; its
    /// current status is returned. Repeated calls are harmless.
    pub async fn stop(&self, session: &SessionHandle) -> SessionStatus {
        match session.request_stop().await {
            SessionStatus::Stopping => {
                session
                    .wait_for_terminal(self.config.grace_period() + STOP_WAIT_MARGIN)
                    .await
            }
            other => other,
        }
    }
}

/// Own the process group until every engine is gone, then publish the
/// outcome
async fn supervise(
    session: Arc<SessionHandle>,
    mut group: ProcessGroup,
    pump: JoinHandle<MetricsAggregator>,
    grace: Duration,
) {
    let stop = session.stop_token();

    let exits = tokio::select! {
        biased;
        _ = stop.cancelled() => None,
        statuses = group.wait_all() => Some(statuses),
    };

    if exits.is_none() {
        tracing::info!(session = %session.id(), "Stopping engines");
        group.terminate(grace).await;
    }
    let labels: Vec<String> = group
        .processes()
        .iter()
        .map(|p| p.label().to_string())
        .collect();
    drop(group);

    let aggregator = drain(pump).await;

    let event = match exits {
        None => SessionEvent::StopCompleted,
        Some(statuses) => match describe_failures(&statuses, &labels) {
            None => SessionEvent::Exited {
                success: true,
                message: String::new(),
            },
            Some(failure) => {
                let message = match aggregator.as_ref().and_then(|a| a.last_output_line()) {
                    Some(last) => format!("{}: {}", failure, last),
                    None => failure,
                };
                SessionEvent::Exited {
                    success: false,
                    message,
                }
            }
        },
    };

    match session.apply(event).await {
        Ok(status) => tracing::info!(session = %session.id(), %status, "Engines finished"),
        Err(e) => tracing::warn!(session = %session.id(), error = %e, "Could not settle session"),
    }
}

/// Wait for the output pump to see every line; give up after a short while
/// if some grandchild keeps a pipe open
async fn drain(mut pump: JoinHandle<MetricsAggregator>) -> Option<MetricsAggregator> {
    match tokio::time::timeout(DRAIN_TIMEOUT, &mut pump).await {
        Ok(Ok(aggregator)) => Some(aggregator),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Metrics pump failed");
            None
        }
        Err(_) => {
            pump.abort();
            None
        }
    }
}

fn describe_failures(statuses: &[std::io::Result<ExitStatus>], labels: &[String]) -> Option<String> {
    let failures: Vec<String> = statuses
        .iter()
        .zip(labels)
        .filter_map(|(status, label)| match status {
            Ok(s) if s.success() => None,
            Ok(s) => Some(match s.code() {
                Some(code) => format!("engine {} exited with code {}", label, code),
                None => format!("engine {} was killed by a signal", label),
            }),
            Err(e) => Some(format!("engine {} could not be awaited: {}", label, e)),
        })
        .collect();

    (!failures.is_empty()).then(|| failures.join("; "))
}
