//! Engine process handling - spawn, observe and terminate engine processes

use super::EngineCommand;
use crate::error::{ControlError, Result};
use crate::metrics::OutputLine;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::mpsc;

/// A single running engine process
pub struct EngineProcess {
    /// Position within the group; tags every output line
    index: usize,

    /// Remote hosts this process drives, or "local"
    label: String,

    /// Results file the process writes
    results_file: PathBuf,

    child: Child,

    /// Process ID captured at spawn time; on unix also the id of the
    /// process group the engine leads
    pid: Option<u32>,

    /// Set once the process has been reaped
    exited: bool,
}

impl EngineProcess {
    /// Spawn `command`, forwarding every stdout/stderr line to `output`
    pub fn spawn(
        index: usize,
        command: &EngineCommand,
        output: mpsc::Sender<OutputLine>,
    ) -> Result<Self> {
        let label = if command.remote_hosts.is_empty() {
            "local".to_string()
        } else {
            command.remote_hosts.join(",")
        };

        tracing::info!(
            engine = index,
            target = %label,
            program = %command.program.display(),
            args = ?command.args(),
            "Spawning engine"
        );

        let mut child = command.to_command().spawn().map_err(|e| {
            ControlError::Launch(format!(
                "failed to start {}: {}",
                command.program.display(),
                e
            ))
        })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(index, stdout, output.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(index, stderr, output));
        }

        let pid = child.id();
        Ok(Self {
            index,
            label,
            results_file: command.results_file.clone(),
            child,
            pid,
            exited: false,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn results_file(&self) -> &PathBuf {
        &self.results_file
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Wait for the process to exit
    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        let status = self.child.wait().await;
        if status.is_ok() {
            self.exited = true;
        }
        status
    }

    /// Ask the engine to shut down, letting it flush its results.
    ///
    /// The signal goes to the whole process group, so launcher scripts that
    /// fork the JVM without `exec` are covered too.
    fn signal_terminate(&mut self) {
        #[cfg(unix)]
        self.signal_group(libc::SIGTERM);

        #[cfg(not(unix))]
        {
            let _ = self.child.start_kill();
        }
    }

    /// Force the engine and everything it started down
    async fn kill(&mut self) {
        #[cfg(unix)]
        self.signal_group(libc::SIGKILL);

        if let Err(e) = self.child.kill().await {
            tracing::warn!(engine = self.index, error = %e, "Failed to kill engine");
        }
        self.exited = true;
    }

    /// SIGKILL whatever is left of the group after the leader exited
    fn sweep(&self) {
        #[cfg(unix)]
        {
            if self.signal_group(libc::SIGKILL) {
                tracing::debug!(engine = self.index, "Killed leftover engine processes");
            }
        }
    }

    /// Send `signal` to the process group; false if nothing received it
    #[cfg(unix)]
    fn signal_group(&self, signal: libc::c_int) -> bool {
        let Some(pgid) = self.pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) else {
            return false;
        };
        if pgid <= 0 {
            return false;
        }
        // SAFETY: a negative pid addresses the group this engine leads. The
        // group id cannot be handed to another process while any member of
        // the group is still alive.
        unsafe { libc::kill(-pgid, signal) == 0 }
    }
}

impl Drop for EngineProcess {
    fn drop(&mut self) {
        // `kill_on_drop` only reaches the direct child
        #[cfg(unix)]
        {
            if !self.exited {
                self.signal_group(libc::SIGKILL);
            }
        }
    }
}

/// The engine processes of one session run.
///
/// Exactly one group exists per started session. Dropping the group kills
/// any process still alive.
pub struct ProcessGroup {
    processes: Vec<EngineProcess>,
}

impl ProcessGroup {
    /// Spawn one process per command.
    ///
    /// All-or-nothing: if any spawn fails, the processes already started are
    /// dropped (and therefore killed) and the error is returned.
    pub fn spawn(commands: &[EngineCommand], output: mpsc::Sender<OutputLine>) -> Result<Self> {
        if commands.is_empty() {
            return Err(ControlError::Launch("no engine invocations".to_string()));
        }

        let mut processes = Vec::with_capacity(commands.len());
        for (index, command) in commands.iter().enumerate() {
            processes.push(EngineProcess::spawn(index, command, output.clone())?);
        }
        Ok(Self { processes })
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    pub fn processes(&self) -> &[EngineProcess] {
        &self.processes
    }

    pub fn pids(&self) -> Vec<u32> {
        self.processes.iter().filter_map(EngineProcess::pid).collect()
    }

    pub fn results_files(&self) -> Vec<PathBuf> {
        self.processes
            .iter()
            .map(|p| p.results_file().clone())
            .collect()
    }

    /// Wait for every process to exit, in group order.
    ///
    /// Cancel safe: dropping the future leaves the processes untouched.
    pub async fn wait_all(&mut self) -> Vec<std::io::Result<ExitStatus>> {
        let mut statuses = Vec::with_capacity(self.processes.len());
        for process in &mut self.processes {
            statuses.push(process.wait().await);
        }
        statuses
    }

    /// SIGTERM every engine group, then kill whatever is left after `grace`
    pub async fn terminate(&mut self, grace: Duration) {
        for process in &mut self.processes {
            process.signal_terminate();
        }

        let deadline = tokio::time::Instant::now() + grace;
        for process in &mut self.processes {
            match tokio::time::timeout_at(deadline, process.wait()).await {
                Ok(Ok(status)) => {
                    tracing::debug!(engine = process.index, %status, "Engine terminated");
                    process.sweep();
                }
                Ok(Err(e)) => {
                    tracing::warn!(engine = process.index, error = %e, "Failed to reap engine");
                }
                Err(_) => {
                    tracing::warn!(
                        engine = process.index,
                        "Engine ignored termination signal, killing"
                    );
                    process.kill().await;
                }
            }
        }
    }
}

async fn forward_lines<R>(source: usize, stream: R, output: mpsc::Sender<OutputLine>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if output.send(OutputLine { source, line }).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(engine = source, error = %e, "Engine output closed");
                break;
            }
        }
    }
}
