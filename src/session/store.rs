//! In-memory session registry with guarded transitions

use super::{RunMode, Session, SessionEvent, SessionInfo, SessionStatus};
use crate::error::{ControlError, Result};
use crate::metrics::MetricsSnapshot;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock, RwLockReadGuard};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Shared handle to one session.
///
/// The record lock is the single-writer guard for transitions; readers take
/// the read side and copy out a [`SessionInfo`], so they never see a half
/// applied update.
pub struct SessionHandle {
    id: Uuid,
    record: RwLock<Session>,
    status_tx: watch::Sender<SessionStatus>,
    stop: CancellationToken,
}

impl SessionHandle {
    fn new(session: Session) -> Self {
        let (status_tx, _) = watch::channel(session.status);
        Self {
            id: session.id,
            record: RwLock::new(session),
            status_tx,
            stop: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Latest status without touching the record lock
    pub fn status(&self) -> SessionStatus {
        *self.status_tx.borrow()
    }

    /// Subscribe to status changes
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status_tx.subscribe()
    }

    /// Token cancelled when a stop is requested
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Read access to the record
    pub async fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.record.read().await
    }

    /// Consistent snapshot of the record
    pub async fn info(&self) -> SessionInfo {
        self.record.read().await.info()
    }

    /// Apply a lifecycle event
    pub async fn apply(&self, event: SessionEvent) -> Result<SessionStatus> {
        let mut record = self.record.write().await;
        let previous = record.status;
        let next = record.apply(&event)?;
        self.publish(previous, next);
        Ok(next)
    }

    /// Move `created -> starting` and record the run mode.
    ///
    /// Only one caller can win this transition, which is what keeps a
    /// session from ever spawning two process groups.
    pub async fn begin_start(&self, mode: RunMode) -> Result<SessionStatus> {
        let mut record = self.record.write().await;
        if record.status != SessionStatus::Created {
            return Err(ControlError::InvalidTransition {
                from: record.status,
                event: SessionEvent::Start.name(),
            });
        }
        let previous = record.status;
        let next = record.apply(&SessionEvent::Start)?;
        record.mode = Some(mode);
        self.publish(previous, next);
        Ok(next)
    }

    /// Record the processes of a freshly launched group
    pub async fn mark_launched(
        &self,
        pids: Vec<u32>,
        result_files: Vec<PathBuf>,
    ) -> Result<SessionStatus> {
        let mut record = self.record.write().await;
        let previous = record.status;
        let next = record.apply(&SessionEvent::Launched)?;
        record.engine_pids = pids;
        record.result_files = result_files;
        self.publish(previous, next);
        Ok(next)
    }

    /// Request a stop.
    ///
    /// Accepted from `starting` or `running`; any other state is left alone
    /// and returned as-is. The stop token is cancelled under the record lock
    /// so the supervisor sees the intent even if it has not published a
    /// handle yet.
    pub async fn request_stop(&self) -> SessionStatus {
        let mut record = self.record.write().await;
        let previous = record.status;
        match record.apply(&SessionEvent::StopRequested) {
            Ok(next) => {
                self.stop.cancel();
                self.publish(previous, next);
                next
            }
            Err(_) => previous,
        }
    }

    /// Overwrite the latest snapshot and append it to the rolling window
    pub async fn record_metrics(&self, snapshot: MetricsSnapshot) {
        let mut record = self.record.write().await;
        record.history.push(snapshot.clone());
        record.latest_metrics = snapshot;
    }

    /// Mutate non-lifecycle fields (report status, result files)
    pub async fn update<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        let mut record = self.record.write().await;
        f(&mut record)
    }

    /// Wait until the session reaches a terminal state or `limit` elapses
    pub async fn wait_for_terminal(&self, limit: Duration) -> SessionStatus {
        let mut rx = self.subscribe();
        let settled = match tokio::time::timeout(limit, rx.wait_for(|s| s.is_terminal())).await {
            Ok(Ok(status)) => Some(*status),
            _ => None,
        };
        settled.unwrap_or_else(|| self.status())
    }

    fn publish(&self, previous: SessionStatus, next: SessionStatus) {
        if previous != next {
            tracing::info!(session = %self.id, from = %previous, to = %next, "Session transition");
        }
        self.status_tx.send_replace(next);
    }
}

/// Registry of all sessions, keyed by id.
///
/// Created once at process start and injected wherever it is needed.
/// Nothing is persisted; sessions live until the process exits.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Arc<SessionHandle>>>,
    history_window: usize,
}

impl SessionStore {
    /// Create an empty store whose sessions keep `history_window` snapshots
    pub fn new(history_window: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            history_window,
        }
    }

    /// Register a new session in the `created` state
    pub async fn create_session(&self, id: Uuid, plan_path: PathBuf) -> Result<Arc<SessionHandle>> {
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return Err(ControlError::Validation(format!(
                "Session '{}' already exists",
                id
            )));
        }

        let handle = Arc::new(SessionHandle::new(Session::new(
            id,
            plan_path,
            self.history_window,
        )));
        sessions.insert(id, Arc::clone(&handle));

        tracing::info!(session = %id, "Session created");
        Ok(handle)
    }

    /// Look up a session
    pub async fn get(&self, id: Uuid) -> Result<Arc<SessionHandle>> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(ControlError::NotFound(id))
    }

    /// Snapshot of one session
    pub async fn get_status(&self, id: Uuid) -> Result<SessionInfo> {
        Ok(self.get(id).await?.info().await)
    }

    /// Apply an event to a session
    pub async fn transition(&self, id: Uuid, event: SessionEvent) -> Result<SessionStatus> {
        self.get(id).await?.apply(event).await
    }

    /// Snapshots of every session
    pub async fn list(&self) -> Vec<SessionInfo> {
        let handles: Vec<Arc<SessionHandle>> =
            self.sessions.read().await.values().cloned().collect();

        let mut infos = Vec::with_capacity(handles.len());
        for handle in handles {
            infos.push(handle.info().await);
        }
        infos.sort_by_key(|info| info.created_at);
        infos
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
