//! Control-plane registry of worker processes. Not on the relay hot path,
//! but the owner of the "at most one live worker per account" invariant.
//!
//! The durable `worker_registry` table is the source of truth for what
//! should be running; the in-memory table only tracks processes this
//! instance spawned or reattached. Concurrency discipline is the durable
//! table plus pid-liveness probing rather than locks across instances, so
//! short-lived duplicate start/stop races are tolerated and treated as
//! benign.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::db::{
    AccountStore, DatabaseError, DatabaseManager, TelegramAccount, WorkerRegistration,
    WorkerRegistryStore,
};

pub use self::process::{
    AttachedProcess, ExeSpawner, ProcessHandle, SpawnRequest, SpawnedProcess, WorkerSpawner,
    pid_is_alive,
};

pub mod process;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Account not found or inactive: {0}")]
    AccountNotFound(i64),

    #[error("Account {0} has no usable session (bot accounts cannot run workers)")]
    NoUsableSession(i64),

    #[error("Worker already running for account {0}")]
    AlreadyRunning(i64),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Spawn error: {0}")]
    Spawn(String),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub worker_id: String,
    pub user_id: i64,
    pub account_id: i64,
    pub session_path: String,
    pub pid: Option<i32>,
    pub running: bool,
    pub started_at: chrono::DateTime<Utc>,
}

struct LiveWorker {
    registration: WorkerRegistration,
    handle: Box<dyn ProcessHandle>,
}

#[derive(Default)]
struct SupervisorState {
    workers: HashMap<String, LiveWorker>,
    counter: u64,
}

pub struct Supervisor {
    registry: Arc<dyn WorkerRegistryStore>,
    accounts: Arc<dyn AccountStore>,
    spawner: Arc<dyn WorkerSpawner>,
    data_dir: PathBuf,
    stop_grace: Duration,
    state: AsyncMutex<SupervisorState>,
}

impl Supervisor {
    pub fn new(
        db: &DatabaseManager,
        spawner: Arc<dyn WorkerSpawner>,
        data_dir: PathBuf,
        stop_grace: Duration,
    ) -> Self {
        Self {
            registry: db.worker_registry(),
            accounts: db.accounts(),
            spawner,
            data_dir,
            stop_grace,
            state: AsyncMutex::new(SupervisorState::default()),
        }
    }

    /// Start a worker for an account, enforcing ≤1 live worker per account
    /// against both the in-memory table and the durable registry (stale rows
    /// with dead pids are pruned rather than blocking the start).
    pub async fn start(&self, account_id: i64) -> Result<WorkerRegistration, SupervisorError> {
        let account = self
            .accounts
            .get_active(account_id)
            .await?
            .ok_or(SupervisorError::AccountNotFound(account_id))?;
        let Some(session_path) = account
            .session_path
            .clone()
            .filter(|path| !path.is_empty())
        else {
            return Err(SupervisorError::NoUsableSession(account_id));
        };

        let mut state = self.state.lock().await;
        self.prune_dead(&mut state).await?;

        if Self::has_running_worker(&mut state, account_id) {
            return Err(SupervisorError::AlreadyRunning(account_id));
        }
        // Orphans from a prior control-plane run live only in the durable
        // table. A live pid blocks the start; dead rows are stale and go.
        for row in self.registry.list_for_account(account_id).await? {
            if state.workers.contains_key(&row.worker_id) {
                continue;
            }
            if pid_is_alive(row.pid) {
                return Err(SupervisorError::AlreadyRunning(account_id));
            }
            self.registry.remove(&row.worker_id).await?;
        }

        self.spawn_worker(&mut state, account_id, account.user_id, &session_path)
            .await?
            .ok_or(SupervisorError::AlreadyRunning(account_id))
    }

    /// Stop one worker: graceful terminate, short wait, force kill. Falls
    /// back to the durable row (signal-based termination) when this instance
    /// holds no handle for the id.
    pub async fn stop(&self, worker_id: &str) -> Result<(), SupervisorError> {
        let worker = self.state.lock().await.workers.remove(worker_id);
        if let Some(mut worker) = worker {
            worker.handle.terminate(self.stop_grace).await;
            self.registry.remove(worker_id).await?;
            return Ok(());
        }

        let row = self
            .registry
            .list()
            .await?
            .into_iter()
            .find(|row| row.worker_id == worker_id)
            .ok_or_else(|| SupervisorError::WorkerNotFound(worker_id.to_string()))?;
        AttachedProcess::new(row.pid)
            .terminate(self.stop_grace)
            .await;
        self.registry.remove(worker_id).await?;
        Ok(())
    }

    /// Stop and deregister every worker for one account.
    pub async fn stop_for_account(&self, account_id: i64) -> Result<(), SupervisorError> {
        let drained: Vec<LiveWorker> = {
            let mut state = self.state.lock().await;
            let ids: Vec<String> = state
                .workers
                .iter()
                .filter(|(_, worker)| worker.registration.account_id == account_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| state.workers.remove(&id))
                .collect()
        };
        for mut worker in drained {
            worker.handle.terminate(self.stop_grace).await;
            self.registry.remove(&worker.registration.worker_id).await?;
        }

        for row in self.registry.list_for_account(account_id).await? {
            AttachedProcess::new(row.pid)
                .terminate(self.stop_grace)
                .await;
            self.registry.remove(&row.worker_id).await?;
        }
        Ok(())
    }

    /// Restart the workers affected by a mapping change so new rules take
    /// effect without manual intervention. Wholly best-effort: another actor
    /// starting or stopping the same account concurrently is a benign race,
    /// logged at warning level and never surfaced as a failure.
    pub async fn restart_for_mapping(&self, user_id: i64, account_id: Option<i64>) {
        if let Err(e) = self.restart_for_mapping_inner(user_id, account_id).await {
            warn!("worker restart after mapping change failed: {e}");
        }
    }

    async fn restart_for_mapping_inner(
        &self,
        user_id: i64,
        account_id: Option<i64>,
    ) -> Result<(), SupervisorError> {
        {
            let mut state = self.state.lock().await;
            self.prune_dead(&mut state).await?;
        }
        self.prune_orphaned_rows().await?;

        let accounts: Vec<TelegramAccount> = match account_id {
            Some(account_id) => self
                .accounts
                .get_active(account_id)
                .await?
                .into_iter()
                .collect(),
            None => self.accounts.list_active_for_user(user_id).await?,
        };

        for account in accounts {
            if !account.has_usable_session() {
                continue;
            }
            if self.account_is_running(account.id).await? {
                self.stop_for_account(account.id).await?;
            }
            match self.start(account.id).await {
                Ok(registration) => {
                    info!(
                        account_id = account.id,
                        worker_id = registration.worker_id,
                        "worker restarted after mapping change"
                    );
                }
                Err(SupervisorError::AlreadyRunning(_)) => {
                    debug!(
                        account_id = account.id,
                        "another actor started this account's worker concurrently"
                    );
                }
                Err(e) => {
                    warn!(
                        account_id = account.id,
                        "failed to start worker after mapping change: {e}"
                    );
                }
            }
        }
        Ok(())
    }

    /// Reconcile with the durable registry after a control-plane restart:
    /// reattach rows whose pid is still alive, respawn accounts whose worker
    /// died while unsupervised. The durable table is the source of truth for
    /// what should be running.
    pub async fn restore_on_boot(&self) -> Result<(), SupervisorError> {
        let rows = self.registry.list().await?;
        let mut state = self.state.lock().await;

        for row in &rows {
            if let Some(n) = row
                .worker_id
                .strip_prefix('w')
                .and_then(|digits| digits.parse::<u64>().ok())
            {
                state.counter = state.counter.max(n);
            }
        }

        for row in rows {
            if pid_is_alive(row.pid) {
                info!(
                    worker_id = row.worker_id,
                    pid = row.pid,
                    account_id = row.account_id,
                    "reattached orphan worker"
                );
                let handle = Box::new(AttachedProcess::new(row.pid));
                state.workers.insert(
                    row.worker_id.clone(),
                    LiveWorker {
                        registration: row,
                        handle,
                    },
                );
            } else {
                self.registry.remove(&row.worker_id).await?;
                match self
                    .spawn_worker(&mut state, row.account_id, row.user_id, &row.session_path)
                    .await
                {
                    Ok(Some(registration)) => {
                        info!(
                            account_id = row.account_id,
                            worker_id = registration.worker_id,
                            "respawned worker for account after restart"
                        );
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            account_id = row.account_id,
                            "failed to respawn worker on boot: {e}"
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Graceful shutdown: stop every worker but keep the durable rows so the
    /// next boot respawns them.
    pub async fn terminate_all(&self) {
        let drained: Vec<LiveWorker> = {
            let mut state = self.state.lock().await;
            let ids: Vec<String> = state.workers.keys().cloned().collect();
            ids.into_iter()
                .filter_map(|id| state.workers.remove(&id))
                .collect()
        };
        for mut worker in drained {
            worker.handle.terminate(self.stop_grace).await;
        }
    }

    /// Current view of the registry. Dead workers this instance spawned are
    /// pruned; rows owned by other instances are reported as-is (a dead pid
    /// shows as not running) so a later boot can still respawn them.
    pub async fn list(&self) -> Result<Vec<WorkerStatus>, SupervisorError> {
        {
            let mut state = self.state.lock().await;
            self.prune_dead(&mut state).await?;
        }
        let rows = self.registry.list().await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let running = pid_is_alive(row.pid);
                WorkerStatus {
                    worker_id: row.worker_id,
                    user_id: row.user_id,
                    account_id: row.account_id,
                    session_path: row.session_path,
                    pid: running.then_some(row.pid),
                    running,
                    started_at: row.created_at,
                }
            })
            .collect())
    }

    async fn account_is_running(&self, account_id: i64) -> Result<bool, SupervisorError> {
        {
            let mut state = self.state.lock().await;
            if Self::has_running_worker(&mut state, account_id) {
                return Ok(true);
            }
        }
        Ok(self
            .registry
            .list_for_account(account_id)
            .await?
            .iter()
            .any(|row| pid_is_alive(row.pid)))
    }

    fn has_running_worker(state: &mut SupervisorState, account_id: i64) -> bool {
        state
            .workers
            .values_mut()
            .any(|worker| worker.registration.account_id == account_id && worker.handle.is_alive())
    }

    async fn spawn_worker(
        &self,
        state: &mut SupervisorState,
        account_id: i64,
        user_id: i64,
        session_path: &str,
    ) -> Result<Option<WorkerRegistration>, SupervisorError> {
        if Self::has_running_worker(state, account_id) {
            return Ok(None);
        }

        state.counter += 1;
        let worker_id = format!("w{}", state.counter);
        let request = SpawnRequest {
            worker_id: worker_id.clone(),
            user_id,
            account_id,
            session_path: PathBuf::from(session_path),
            log_path: self
                .data_dir
                .join(format!("worker_{account_id}_{worker_id}.log")),
        };
        let handle = self.spawner.spawn(&request).await?;

        let registration = WorkerRegistration {
            worker_id: worker_id.clone(),
            user_id,
            account_id,
            session_path: session_path.to_string(),
            pid: handle.pid(),
            created_at: Utc::now(),
        };
        self.registry.insert(&registration).await?;
        info!(
            worker_id,
            account_id,
            pid = registration.pid,
            "spawned worker"
        );
        state.workers.insert(
            worker_id,
            LiveWorker {
                registration: registration.clone(),
                handle,
            },
        );
        Ok(Some(registration))
    }

    async fn prune_dead(&self, state: &mut SupervisorState) -> Result<(), SupervisorError> {
        let mut dead: Vec<String> = Vec::new();
        for (worker_id, worker) in state.workers.iter_mut() {
            if !worker.handle.is_alive() {
                dead.push(worker_id.clone());
            }
        }
        for worker_id in dead {
            state.workers.remove(&worker_id);
            self.registry.remove(&worker_id).await?;
        }
        Ok(())
    }

    /// Drop durable rows whose recorded pid no longer exists (worker
    /// crashed, control plane restarted). Prevents a stale row from blocking
    /// a fresh start.
    async fn prune_orphaned_rows(&self) -> Result<(), SupervisorError> {
        let mut pruned = 0usize;
        for row in self.registry.list().await? {
            if !pid_is_alive(row.pid) {
                let state = self.state.lock().await;
                let spawned_here = state.workers.contains_key(&row.worker_id);
                drop(state);
                if spawned_here {
                    continue;
                }
                self.registry.remove(&row.worker_id).await?;
                pruned += 1;
            }
        }
        if pruned > 0 {
            info!("pruned {pruned} orphaned worker registry row(s)");
        }
        Ok(())
    }
}
