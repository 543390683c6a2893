use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("worker start timed out after {0:?}")]
    Timeout(Duration),
    #[error("{0}")]
    Spawn(String),
}

/// Lifecycle of a worker bound to one credential. `Failed` is absorbing and
/// only reachable from `Starting`; a failed slot is deregistered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
}

impl WorkerState {
    pub fn label(self) -> &'static str {
        match self {
            WorkerState::Stopped => "stopped",
            WorkerState::Starting => "starting",
            WorkerState::Running => "online",
            WorkerState::Stopping => "stopping",
            WorkerState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerStatus {
    pub state: WorkerState,
    pub guild_count: u64,
    pub presence: Option<String>,
}

/// A running worker instance. `stop` is invoked best-effort; implementations
/// should make it idempotent.
#[async_trait]
pub trait WorkerProcess: Send + Sync {
    async fn stop(&mut self) -> Result<(), LaunchError>;
    async fn status(&mut self) -> WorkerStatus;
}

/// Starts a worker for one credential. The registry wraps the call in a
/// timeout so a hung connection cannot occupy a hosting slot indefinitely.
#[async_trait]
pub trait WorkerLauncher: Send + Sync {
    async fn start(&self, credential: &str) -> Result<Box<dyn WorkerProcess>, LaunchError>;
}

struct WorkerSlot {
    state: WorkerState,
    process: Option<Box<dyn WorkerProcess>>,
}

/// Sole owner of the credential -> running worker mapping. At most one slot
/// exists per credential; callers serialize start/stop for the same
/// identity, the registry serializes access to each slot.
pub struct WorkerRegistry {
    launcher: Arc<dyn WorkerLauncher>,
    start_timeout: Duration,
    slots: RwLock<HashMap<String, Arc<Mutex<WorkerSlot>>>>,
}

impl WorkerRegistry {
    pub fn new(launcher: Arc<dyn WorkerLauncher>, start_timeout: Duration) -> Self {
        Self {
            launcher,
            start_timeout,
            slots: RwLock::new(HashMap::new()),
        }
    }

    /// Starts a worker for `credential` and drives it to Running. On any
    /// failure the slot ends Failed and is deregistered, so a later retry
    /// starts clean.
    pub async fn start(&self, credential: &str) -> Result<(), LaunchError> {
        if self.stop(credential).await {
            warn!("replaced a live worker that should already have been stopped");
        }

        let slot = Arc::new(Mutex::new(WorkerSlot {
            state: WorkerState::Starting,
            process: None,
        }));
        self.slots
            .write()
            .await
            .insert(credential.to_string(), slot.clone());

        let started = match timeout(self.start_timeout, self.launcher.start(credential)).await {
            Ok(result) => result,
            Err(_) => Err(LaunchError::Timeout(self.start_timeout)),
        };

        match started {
            Ok(process) => {
                let mut guard = slot.lock().await;
                guard.state = WorkerState::Running;
                guard.process = Some(process);
                info!("worker running");
                Ok(())
            }
            Err(err) => {
                slot.lock().await.state = WorkerState::Failed;
                self.slots.write().await.remove(credential);
                Err(err)
            }
        }
    }

    /// Stops and deregisters the worker for `credential`, if any. Stop
    /// errors are logged, never propagated. Returns whether a slot existed.
    pub async fn stop(&self, credential: &str) -> bool {
        let slot = self.slots.write().await.remove(credential);
        let Some(slot) = slot else {
            return false;
        };
        let mut guard = slot.lock().await;
        guard.state = WorkerState::Stopping;
        if let Some(mut process) = guard.process.take() {
            if let Err(err) = process.stop().await {
                warn!(error = %err, "worker stop failed; deregistering anyway");
            }
        }
        guard.state = WorkerState::Stopped;
        true
    }

    pub async fn is_registered(&self, credential: &str) -> bool {
        self.slots.read().await.contains_key(credential)
    }

    /// Live status for the worker bound to `credential`, or `None` when no
    /// worker is registered.
    pub async fn status(&self, credential: &str) -> Option<WorkerStatus> {
        let slot = self.slots.read().await.get(credential).cloned()?;
        let mut guard = slot.lock().await;
        let state = guard.state;
        match guard.process.as_mut() {
            Some(process) if state == WorkerState::Running => Some(process.status().await),
            _ => Some(WorkerStatus {
                state,
                guild_count: 0,
                presence: None,
            }),
        }
    }

    /// Stops every registered worker. Called once at shutdown.
    pub async fn drain_all(&self) {
        let credentials: Vec<String> = self.slots.read().await.keys().cloned().collect();
        info!(count = credentials.len(), "draining workers");
        for credential in credentials {
            self.stop(&credential).await;
        }
    }
}
