//! Process-handle abstraction for worker subprocesses.
//!
//! The supervisor tracks two shapes of process: children it spawned itself
//! (a live [`tokio::process::Child`]) and orphans reattached after a
//! control-plane restart, known only by pid. Both answer liveness probes and
//! a terminate-then-kill shutdown so the supervisor logic stays uniform.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::SupervisorError;

const KILL_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Signal-0 probe: does the pid still exist?
pub fn pid_is_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

fn send_sigterm(pid: i32) {
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
        debug!(pid, "SIGTERM delivery failed: {e}");
    }
}

fn send_sigkill(pid: i32) {
    if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGKILL) {
        debug!(pid, "SIGKILL delivery failed: {e}");
    }
}

#[async_trait]
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> i32;

    fn is_alive(&mut self) -> bool;

    /// Cooperative shutdown: SIGTERM, wait up to `grace`, then SIGKILL.
    /// Best-effort; a process that died in the meantime is not an error.
    async fn terminate(&mut self, grace: Duration);
}

/// A worker subprocess spawned by this supervisor instance.
pub struct SpawnedProcess {
    child: Child,
    pid: i32,
}

impl SpawnedProcess {
    pub fn new(child: Child) -> Self {
        let pid = child.id().map(|pid| pid as i32).unwrap_or(-1);
        Self { child, pid }
    }
}

#[async_trait]
impl ProcessHandle for SpawnedProcess {
    fn pid(&self) -> i32 {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn terminate(&mut self, grace: Duration) {
        if !self.is_alive() {
            return;
        }
        send_sigterm(self.pid);
        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(_) => {}
            Err(_) => {
                if let Err(e) = self.child.start_kill() {
                    warn!(pid = self.pid, "force kill failed: {e}");
                }
                let _ = self.child.wait().await;
            }
        }
    }
}

/// An orphan worker from a previous control-plane run, reattached by pid.
/// There is no child handle to reap, so liveness comes from signal probes.
pub struct AttachedProcess {
    pid: i32,
}

impl AttachedProcess {
    pub fn new(pid: i32) -> Self {
        Self { pid }
    }
}

#[async_trait]
impl ProcessHandle for AttachedProcess {
    fn pid(&self) -> i32 {
        self.pid
    }

    fn is_alive(&mut self) -> bool {
        pid_is_alive(self.pid)
    }

    async fn terminate(&mut self, grace: Duration) {
        if !pid_is_alive(self.pid) {
            return;
        }
        send_sigterm(self.pid);
        let deadline = tokio::time::Instant::now() + grace;
        while pid_is_alive(self.pid) {
            if tokio::time::Instant::now() >= deadline {
                send_sigkill(self.pid);
                return;
            }
            tokio::time::sleep(KILL_POLL_INTERVAL).await;
        }
    }
}

/// What the spawner needs to start one worker subprocess.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub worker_id: String,
    pub user_id: i64,
    pub account_id: i64,
    pub session_path: PathBuf,
    pub log_path: PathBuf,
}

/// Seam between supervisor logic and actual process creation, so tests can
/// inject fake processes.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, request: &SpawnRequest) -> Result<Box<dyn ProcessHandle>, SupervisorError>;
}

/// Spawns `run-worker` subprocesses by re-invoking the current executable,
/// with stderr redirected to the worker's log file.
pub struct ExeSpawner {
    config_path: PathBuf,
}

impl ExeSpawner {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }
}

#[async_trait]
impl WorkerSpawner for ExeSpawner {
    async fn spawn(
        &self,
        request: &SpawnRequest,
    ) -> Result<Box<dyn ProcessHandle>, SupervisorError> {
        let exe = std::env::current_exe()
            .map_err(|e| SupervisorError::Spawn(format!("cannot resolve executable: {e}")))?;

        if let Some(parent) = request.log_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| SupervisorError::Spawn(format!("cannot create log dir: {e}")))?;
        }
        let stderr = match std::fs::File::create(&request.log_path) {
            Ok(file) => Stdio::from(file),
            Err(e) => {
                warn!(
                    "cannot open worker log {}: {e}; discarding worker stderr",
                    request.log_path.display()
                );
                Stdio::null()
            }
        };

        debug!(
            worker_id = request.worker_id,
            account_id = request.account_id,
            "spawning worker subprocess"
        );
        let child = Command::new(exe)
            .arg("--config")
            .arg(&self.config_path)
            .arg("run-worker")
            .arg(request.user_id.to_string())
            .arg(&request.session_path)
            .arg("--account-id")
            .arg(request.account_id.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr)
            .spawn()
            .map_err(|e| SupervisorError::Spawn(e.to_string()))?;

        Ok(Box::new(SpawnedProcess::new(child)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_pid_probes_alive() {
        assert!(pid_is_alive(std::process::id() as i32));
    }

    #[test]
    fn bogus_pid_probes_dead() {
        // Pid far above any default pid_max.
        assert!(!pid_is_alive(i32::MAX - 1));
    }

    #[tokio::test]
    async fn spawned_process_reports_liveness_and_terminates() {
        let child = Command::new("sleep")
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn sleep");
        let mut handle = SpawnedProcess::new(child);
        assert!(handle.is_alive());

        handle.terminate(Duration::from_secs(2)).await;
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    async fn attached_process_terminate_is_a_noop_for_dead_pids() {
        let mut handle = AttachedProcess::new(i32::MAX - 1);
        assert!(!handle.is_alive());
        handle.terminate(Duration::from_millis(50)).await;
        assert!(!handle.is_alive());
    }
}
