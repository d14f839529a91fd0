//! Integration tests for engine supervision, using shell scripts in place of
//! the engine binary

#![cfg(unix)]

use jmx_control::config::EngineConfig;
use jmx_control::engine::Supervisor;
use jmx_control::session::{DistConfig, RunMode, SessionHandle, SessionStatus, SessionStore, SplitBasis};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

const SETTLE: Duration = Duration::from_secs(10);

struct Harness {
    dir: TempDir,
    store: SessionStore,
    supervisor: Supervisor,
}

impl Harness {
    /// `body` becomes the engine script; `$@` holds the engine arguments
    fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("jmeter");
        std::fs::write(&bin, format!("#!/bin/sh\n{}\n", body)).unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o755)).unwrap();
        Self::with_bin(dir, bin)
    }

    fn with_bin(dir: TempDir, bin: PathBuf) -> Self {
        let config = EngineConfig {
            jmeter_bin: bin,
            jmeter_home: None,
            grace_period_secs: 1,
            summariser_interval_secs: 1,
            output_tail_lines: 10,
        };
        Self {
            dir,
            store: SessionStore::new(30),
            supervisor: Supervisor::new(config),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    async fn session(&self) -> Arc<SessionHandle> {
        let id = Uuid::new_v4();
        let work_dir = self.dir.path().join(id.to_string());
        std::fs::create_dir_all(&work_dir).unwrap();
        let plan = work_dir.join("plan.jmx");
        std::fs::write(&plan, "<jmeterTestPlan></jmeterTestPlan>").unwrap();
        self.store.create_session(id, plan).await.unwrap()
    }
}

/// Engine script body that forks a child without `exec`, the way the
/// `jmeter` launcher starts its JVM, and records the child's pid
fn forking_engine(pid_file: &Path) -> String {
    format!(
        "sleep 300 &\necho $! > '{}'\necho started\nwait",
        pid_file.display()
    )
}

async fn read_pid(path: &Path) -> libc::pid_t {
    for _ in 0..100 {
        if let Some(pid) = std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
        {
            return pid;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("engine never wrote {}", path.display());
}

/// True once `pid` is gone; orphans need a moment to be reaped by init
async fn process_gone(pid: libc::pid_t) -> bool {
    for _ in 0..100 {
        // SAFETY: signal 0 only probes for existence
        if unsafe { libc::kill(pid, 0) } != 0 {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

fn line_count(path: &Path) -> usize {
    std::fs::read_to_string(path)
        .map(|s| s.lines().count())
        .unwrap_or(0)
}

#[tokio::test]
async fn test_sanity_run_finishes_with_metrics() -> anyhow::Result<()> {
    let harness = Harness::new(
        "echo 'Creating summariser <summary>'\n\
         echo 'summary +     10 in 00:00:01 =   10.0/s Avg:    40 Min: 10 Max: 90 Err:     1 (10.00%) Active: 3 Started: 3 Finished: 0'\n\
         echo 'summary +     20 in 00:00:01 =   20.0/s Avg:    60 Min: 10 Max: 90 Err:     0 (0.00%) Active: 3 Started: 3 Finished: 0'\n\
         exit 0",
    );
    let session = harness.session().await;

    let status = harness
        .supervisor
        .start(Arc::clone(&session), RunMode::Sanity)
        .await?;
    assert_ne!(status, SessionStatus::Error);

    assert_eq!(session.wait_for_terminal(SETTLE).await, SessionStatus::Finished);

    let record = session.read().await;
    assert_eq!(record.latest_metrics.elapsed_s, 2);
    assert_eq!(record.latest_metrics.passed_txn, 29);
    assert_eq!(record.latest_metrics.failed_txn, 1);
    assert_eq!(record.latest_metrics.hits_sec, 20.0);
    assert_eq!(record.history.len(), 2);
    assert!(record.engine_pids.is_empty());
    assert!(record.message.is_none());
    assert_eq!(
        record.result_files,
        vec![record.results_dir().join("result.jtl")]
    );

    Ok(())
}

#[tokio::test]
async fn test_summariser_throughput_comes_from_results_file() -> anyhow::Result<()> {
    // `$5` is the results file after `-n -t <plan> -l`
    let harness = Harness::new(
        "cat > \"$5\" <<EOF\n\
timeStamp,elapsed,label,responseCode,responseMessage,threadName,dataType,success,failureMessage,bytes,sentBytes,grpThreads,allThreads,URL,Latency,IdleTime,Connect\n\
1700000000000,100,Login,200,OK,tg 1-1,text,true,,3000,10,2,2,http://x/login,90,0,5\n\
1700000002000,100,Login,200,OK,tg 1-2,text,true,,1000,10,2,2,http://x/login,90,0,5\n\
EOF\n\
echo 'summary +      2 in 00:00:02 =    1.0/s Avg:   100 Min: 100 Max: 100 Err:     0 (0.00%) Active: 2 Started: 2 Finished: 0'\n\
exit 0",
    );
    let session = harness.session().await;

    harness
        .supervisor
        .start(Arc::clone(&session), RunMode::Sanity)
        .await?;
    assert_eq!(session.wait_for_terminal(SETTLE).await, SessionStatus::Finished);

    let record = session.read().await;
    // 4000 bytes over two seconds
    assert_eq!(record.latest_metrics.throughput_bps, 2000.0);
    assert_eq!(record.latest_metrics.passed_txn, 2);

    Ok(())
}

#[tokio::test]
async fn test_nonzero_exit_is_error_with_diagnostic() -> anyhow::Result<()> {
    let harness = Harness::new("echo 'Error in NonGUIDriver: plan is broken' >&2\nexit 1");
    let session = harness.session().await;

    harness
        .supervisor
        .start(Arc::clone(&session), RunMode::Sanity)
        .await?;
    assert_eq!(session.wait_for_terminal(SETTLE).await, SessionStatus::Error);

    let message = session.info().await.message.unwrap_or_default();
    assert!(message.contains("exited with code 1"), "{}", message);
    assert!(message.contains("plan is broken"), "{}", message);

    Ok(())
}

#[tokio::test]
async fn test_missing_binary_is_launch_error() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let bin = dir.path().join("no-such-jmeter");
    let harness = Harness::with_bin(dir, bin);
    let session = harness.session().await;

    let status = harness
        .supervisor
        .start(Arc::clone(&session), RunMode::Sanity)
        .await?;
    assert_eq!(status, SessionStatus::Error);

    let info = session.info().await;
    assert_eq!(info.status, SessionStatus::Error);
    assert!(info.message.unwrap_or_default().contains("failed to start"));
    assert!(info.ended_at.is_some());

    Ok(())
}

#[tokio::test]
async fn test_stop_running_session() -> anyhow::Result<()> {
    let harness = Harness::new("echo 'progress vusers=3 passed=1'\nexec sleep 30");
    let session = harness.session().await;

    harness
        .supervisor
        .start(Arc::clone(&session), RunMode::Sanity)
        .await?;

    let status = timeout(SETTLE, harness.supervisor.stop(&session)).await?;
    assert_eq!(status, SessionStatus::Stopped);

    // Repeated stops observe the same terminal state
    assert_eq!(harness.supervisor.stop(&session).await, SessionStatus::Stopped);
    assert!(session.info().await.message.is_none());

    Ok(())
}

#[tokio::test]
async fn test_stop_kills_processes_forked_by_engine() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let pid_file = dir.path().join("jvm.pid");
    let harness = Harness::new(&forking_engine(&pid_file));
    let session = harness.session().await;

    harness
        .supervisor
        .start(Arc::clone(&session), RunMode::Sanity)
        .await?;
    let jvm = read_pid(&pid_file).await;

    let status = timeout(SETTLE, harness.supervisor.stop(&session)).await?;
    assert_eq!(status, SessionStatus::Stopped);
    assert!(process_gone(jvm).await, "engine child {} still running", jvm);

    Ok(())
}

#[tokio::test]
async fn test_stop_racing_launch_settles_stopped() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let pid_file = dir.path().join("jvm.pid");
    let harness = Harness::new(&forking_engine(&pid_file));
    let session = harness.session().await;

    let mut status_rx = session.subscribe();
    let supervisor = harness.supervisor.clone();
    let starting = Arc::clone(&session);
    let start = tokio::spawn(async move { supervisor.start(starting, RunMode::Sanity).await });

    // Stop as soon as the start has been accepted, before the launch settles
    timeout(SETTLE, status_rx.wait_for(|s| *s != SessionStatus::Created)).await??;
    let status = timeout(SETTLE, harness.supervisor.stop(&session)).await?;
    assert_eq!(status, SessionStatus::Stopped);

    let started = start.await??;
    assert_ne!(started, SessionStatus::Error);
    assert_ne!(started, SessionStatus::Finished);
    assert_eq!(session.status(), SessionStatus::Stopped);

    // A child that got as far as forking must be gone as well
    if let Some(pid) = std::fs::read_to_string(&pid_file)
        .ok()
        .and_then(|s| s.trim().parse::<libc::pid_t>().ok())
    {
        assert!(process_gone(pid).await, "engine child {} still running", pid);
    }

    Ok(())
}

#[tokio::test]
async fn test_engine_ignoring_sigterm_is_killed() -> anyhow::Result<()> {
    let harness = Harness::new("trap '' TERM\necho started\nwhile true; do sleep 1; done");
    let session = harness.session().await;

    harness
        .supervisor
        .start(Arc::clone(&session), RunMode::Sanity)
        .await?;
    tokio::time::sleep(Duration::from_millis(200)).await;

    let status = timeout(SETTLE, harness.supervisor.stop(&session)).await?;
    assert_eq!(status, SessionStatus::Stopped);

    Ok(())
}

#[tokio::test]
async fn test_concurrent_starts_spawn_one_group() -> anyhow::Result<()> {
    let harness = Harness::new("");
    let counter = harness.path("launches.log");
    std::fs::write(
        harness.path("jmeter"),
        format!("#!/bin/sh\necho launched >> '{}'\nexit 0\n", counter.display()),
    )?;
    let session = harness.session().await;

    let supervisor = Arc::new(harness.supervisor.clone());
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let supervisor = Arc::clone(&supervisor);
        let session = Arc::clone(&session);
        tasks.push(tokio::spawn(async move {
            supervisor.start(session, RunMode::Sanity).await.is_ok()
        }));
    }

    let mut accepted = 0;
    for task in tasks {
        if task.await? {
            accepted += 1;
        }
    }
    assert_eq!(accepted, 1);
    assert_eq!(session.wait_for_terminal(SETTLE).await, SessionStatus::Finished);
    assert_eq!(line_count(&counter), 1);

    Ok(())
}

#[tokio::test]
async fn test_split_equal_runs_one_engine_per_host() -> anyhow::Result<()> {
    let harness = Harness::new("");
    let args_log = harness.path("args.log");
    std::fs::write(
        harness.path("jmeter"),
        format!(
            "#!/bin/sh\nprintf '%s\\n' \"$*\" >> '{}'\necho 'progress elapsed=5 vusers=2 avg=100 passed=5'\nexit 0\n",
            args_log.display()
        ),
    )?;
    let session = harness.session().await;

    let hosts = vec!["w1".to_string(), "w2".to_string(), "w3".to_string()];
    let mode = RunMode::Distributed(DistConfig::split_equal(hosts, SplitBasis::Tps, 10)?);
    harness.supervisor.start(Arc::clone(&session), mode).await?;
    assert_eq!(session.wait_for_terminal(SETTLE).await, SessionStatus::Finished);

    let log = std::fs::read_to_string(&args_log)?;
    let mut shares: Vec<&str> = log
        .split_whitespace()
        .filter(|arg| arg.starts_with("-Gtps="))
        .collect();
    shares.sort();
    assert_eq!(shares, vec!["-Gtps=3", "-Gtps=3", "-Gtps=4"]);

    let record = session.read().await;
    assert_eq!(record.result_files.len(), 3);
    assert_eq!(record.latest_metrics.running_vusers, 6);
    assert_eq!(record.latest_metrics.passed_txn, 15);
    assert_eq!(record.latest_metrics.elapsed_s, 5);
    assert_eq!(record.latest_metrics.avg_response_ms, 100.0);

    Ok(())
}

#[tokio::test]
async fn test_one_failing_host_fails_the_session() -> anyhow::Result<()> {
    let harness = Harness::new(
        "case \"$*\" in\n  *\"-R w2\"*) echo 'connection refused' >&2; exit 2 ;;\nesac\nexit 0",
    );
    let session = harness.session().await;

    let hosts = vec!["w1".to_string(), "w2".to_string()];
    let basis = SplitBasis::Threads {
        ramp_up_secs: 5,
        duration_secs: None,
    };
    let mode = RunMode::Distributed(DistConfig::split_equal(hosts, basis, 4)?);
    harness.supervisor.start(Arc::clone(&session), mode).await?;

    assert_eq!(session.wait_for_terminal(SETTLE).await, SessionStatus::Error);
    let message = session.info().await.message.unwrap_or_default();
    assert!(message.contains("engine w2 exited with code 2"), "{}", message);

    Ok(())
}

#[tokio::test]
async fn test_malformed_output_keeps_last_snapshot() -> anyhow::Result<()> {
    let harness = Harness::new(
        "echo 'progress vusers=4 passed=2'\n\
         echo 'progress vusers=lots'\n\
         printf '\\377\\376 not utf8\\n'\n\
         echo 'WARNING: something unrelated'\n\
         exit 0",
    );
    let session = harness.session().await;

    harness
        .supervisor
        .start(Arc::clone(&session), RunMode::Sanity)
        .await?;
    assert_eq!(session.wait_for_terminal(SETTLE).await, SessionStatus::Finished);

    let record = session.read().await;
    assert_eq!(record.latest_metrics.running_vusers, 4);
    assert_eq!(record.latest_metrics.passed_txn, 2);
    assert_eq!(record.history.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_stop_before_start_is_noop() -> anyhow::Result<()> {
    let harness = Harness::new("exit 0");
    let session = harness.session().await;

    assert_eq!(harness.supervisor.stop(&session).await, SessionStatus::Created);

    // The session can still be started afterwards
    harness
        .supervisor
        .start(Arc::clone(&session), RunMode::Sanity)
        .await?;
    assert_eq!(session.wait_for_terminal(SETTLE).await, SessionStatus::Finished);

    Ok(())
}
