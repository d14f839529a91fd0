//! Integration tests for the session store and its guarded transitions

use jmx_control::session::{RunMode, SessionEvent, SessionStatus, SessionStore};
use jmx_control::ControlError;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

async fn new_session(store: &SessionStore) -> Uuid {
    let id = Uuid::new_v4();
    store
        .create_session(id, PathBuf::from(format!("/tmp/{}/plan.jmx", id)))
        .await
        .unwrap();
    id
}

#[tokio::test]
async fn test_create_and_get_status() -> anyhow::Result<()> {
    let store = SessionStore::new(10);
    let id = new_session(&store).await;

    let info = store.get_status(id).await?;
    assert_eq!(info.status, SessionStatus::Created);
    assert_eq!(info.elapsed_s, 0);
    assert_eq!(info.plan, "plan.jmx");
    assert_eq!(store.len().await, 1);

    Ok(())
}

#[tokio::test]
async fn test_duplicate_id_rejected() {
    let store = SessionStore::new(10);
    let id = new_session(&store).await;

    let result = store.create_session(id, PathBuf::from("/tmp/x.jmx")).await;
    assert!(result.is_err());
    assert!(result.err().unwrap().to_string().contains("already exists"));
}

#[tokio::test]
async fn test_unknown_session_not_found() {
    let store = SessionStore::new(10);
    let id = Uuid::new_v4();
    assert!(matches!(
        store.get_status(id).await,
        Err(ControlError::NotFound(missing)) if missing == id
    ));
}

#[tokio::test]
async fn test_concurrent_starts_have_one_winner() -> anyhow::Result<()> {
    let store = SessionStore::new(10);
    let id = new_session(&store).await;
    let handle = store.get(id).await?;

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let handle = Arc::clone(&handle);
        tasks.push(tokio::spawn(async move {
            handle.begin_start(RunMode::Sanity).await.is_ok()
        }));
    }

    let mut winners = 0;
    for task in tasks {
        if task.await? {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(handle.status(), SessionStatus::Starting);

    Ok(())
}

#[tokio::test]
async fn test_start_from_non_created_is_invalid_transition() -> anyhow::Result<()> {
    let store = SessionStore::new(10);
    let id = new_session(&store).await;
    let handle = store.get(id).await?;

    handle.begin_start(RunMode::Sanity).await?;
    let err = handle.begin_start(RunMode::Sanity).await.unwrap_err();
    assert!(matches!(
        err,
        ControlError::InvalidTransition {
            from: SessionStatus::Starting,
            ..
        }
    ));

    Ok(())
}

#[tokio::test]
async fn test_stop_is_noop_outside_active_states() -> anyhow::Result<()> {
    let store = SessionStore::new(10);
    let id = new_session(&store).await;
    let handle = store.get(id).await?;

    assert_eq!(handle.request_stop().await, SessionStatus::Created);
    assert!(!handle.stop_token().is_cancelled());

    handle.begin_start(RunMode::Sanity).await?;
    handle.mark_launched(vec![1234], Vec::new()).await?;
    handle
        .apply(SessionEvent::Exited {
            success: true,
            message: String::new(),
        })
        .await?;

    assert_eq!(handle.request_stop().await, SessionStatus::Finished);
    assert_eq!(handle.request_stop().await, SessionStatus::Finished);
    assert!(!handle.stop_token().is_cancelled());

    Ok(())
}

#[tokio::test]
async fn test_stop_while_starting_is_recorded() -> anyhow::Result<()> {
    let store = SessionStore::new(10);
    let id = new_session(&store).await;
    let handle = store.get(id).await?;

    handle.begin_start(RunMode::Sanity).await?;
    assert_eq!(handle.request_stop().await, SessionStatus::Stopping);
    assert!(handle.stop_token().is_cancelled());

    // A late launch confirmation does not undo the stop
    assert_eq!(
        handle.mark_launched(vec![1], Vec::new()).await?,
        SessionStatus::Stopping
    );
    assert_eq!(
        store.transition(id, SessionEvent::StopCompleted).await?,
        SessionStatus::Stopped
    );

    Ok(())
}

#[tokio::test]
async fn test_terminal_states_never_regress() -> anyhow::Result<()> {
    let store = SessionStore::new(10);
    let id = new_session(&store).await;
    let handle = store.get(id).await?;

    handle.begin_start(RunMode::Sanity).await?;
    handle
        .apply(SessionEvent::LaunchFailed("jmeter: not found".into()))
        .await?;

    for event in [
        SessionEvent::Start,
        SessionEvent::Launched,
        SessionEvent::StopRequested,
        SessionEvent::StopCompleted,
        SessionEvent::Exited {
            success: true,
            message: String::new(),
        },
    ] {
        assert!(handle.apply(event).await.is_err());
    }

    let info = handle.info().await;
    assert_eq!(info.status, SessionStatus::Error);
    assert_eq!(info.message.as_deref(), Some("jmeter: not found"));

    Ok(())
}

#[tokio::test]
async fn test_wait_for_terminal_sees_transition() -> anyhow::Result<()> {
    let store = SessionStore::new(10);
    let id = new_session(&store).await;
    let handle = store.get(id).await?;
    handle.begin_start(RunMode::Sanity).await?;
    handle.mark_launched(vec![1], Vec::new()).await?;

    let waiter = {
        let handle = Arc::clone(&handle);
        tokio::spawn(async move { handle.wait_for_terminal(Duration::from_secs(5)).await })
    };

    handle
        .apply(SessionEvent::Exited {
            success: false,
            message: "exit 1".into(),
        })
        .await?;

    let status = timeout(Duration::from_secs(5), waiter).await??;
    assert_eq!(status, SessionStatus::Error);

    Ok(())
}

#[tokio::test]
async fn test_history_window_is_bounded() -> anyhow::Result<()> {
    let store = SessionStore::new(3);
    let id = new_session(&store).await;
    let handle = store.get(id).await?;

    for vusers in 1..=5u64 {
        handle
            .record_metrics(jmx_control::metrics::MetricsSnapshot {
                running_vusers: vusers,
                ..Default::default()
            })
            .await;
    }

    let record = handle.read().await;
    let window: Vec<u64> = record.history.iter().map(|s| s.running_vusers).collect();
    assert_eq!(window, vec![3, 4, 5]);
    assert_eq!(record.latest_metrics.running_vusers, 5);

    Ok(())
}

#[tokio::test]
async fn test_list_returns_every_session() {
    let store = SessionStore::new(3);
    let first = new_session(&store).await;
    let second = new_session(&store).await;

    let ids: Vec<Uuid> = store.list().await.into_iter().map(|i| i.id).collect();
    assert_eq!(ids.len(), 2);
    assert!(ids.contains(&first) && ids.contains(&second));
}
