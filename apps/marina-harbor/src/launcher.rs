use std::time::Duration;

use async_trait::async_trait;
use marina_core::{LaunchError, WorkerLauncher, WorkerProcess, WorkerState, WorkerStatus};
use tokio::process::{Child, Command};
use tracing::{info, warn};

/// Environment variable through which the worker receives its credential.
/// Passed via env rather than argv so it never shows up in process listings.
const CREDENTIAL_ENV: &str = "MARINA_CREDENTIAL";

/// Spawns one OS process per hosted credential.
pub struct ProcessLauncher {
    command: String,
    args: Vec<String>,
    startup_grace: Duration,
}

impl ProcessLauncher {
    pub fn new(command: String, args: Vec<String>, startup_grace: Duration) -> Self {
        Self {
            command,
            args,
            startup_grace,
        }
    }
}

#[async_trait]
impl WorkerLauncher for ProcessLauncher {
    async fn start(&self, credential: &str) -> Result<Box<dyn WorkerProcess>, LaunchError> {
        let mut child = Command::new(&self.command)
            .args(&self.args)
            .env(CREDENTIAL_ENV, credential)
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| LaunchError::Spawn(format!("spawn {}: {}", self.command, err)))?;

        // A worker that dies immediately (bad credential, missing deps)
        // counts as a failed start, not a running worker.
        tokio::time::sleep(self.startup_grace).await;
        match child.try_wait() {
            Ok(Some(status)) => Err(LaunchError::Spawn(format!(
                "worker exited during startup: {status}"
            ))),
            Ok(None) => {
                info!(pid = child.id(), "worker process started");
                Ok(Box::new(ChildWorker { child }))
            }
            Err(err) => Err(LaunchError::Spawn(format!("worker poll failed: {err}"))),
        }
    }
}

struct ChildWorker {
    child: Child,
}

#[async_trait]
impl WorkerProcess for ChildWorker {
    async fn stop(&mut self) -> Result<(), LaunchError> {
        if let Err(err) = self.child.start_kill() {
            // Already exited is fine; anything else is reported.
            if err.kind() != std::io::ErrorKind::InvalidInput {
                return Err(LaunchError::Spawn(format!("kill failed: {err}")));
            }
        }
        match self.child.wait().await {
            Ok(status) => {
                info!(%status, "worker process stopped");
                Ok(())
            }
            Err(err) => {
                warn!(error = %err, "wait after kill failed");
                Err(LaunchError::Spawn(err.to_string()))
            }
        }
    }

    async fn status(&mut self) -> WorkerStatus {
        let state = match self.child.try_wait() {
            Ok(None) => WorkerState::Running,
            _ => WorkerState::Stopped,
        };
        // A plain OS process reports no guild membership or presence; those
        // fields are populated by richer launchers.
        WorkerStatus {
            state,
            guild_count: 0,
            presence: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_command_is_a_spawn_error() {
        let launcher = ProcessLauncher::new(
            "definitely-not-a-real-command-7f3a".into(),
            Vec::new(),
            Duration::from_millis(10),
        );
        let err = launcher.start("a.b.c").await.err().unwrap();
        assert!(matches!(err, LaunchError::Spawn(_)));
    }

    #[tokio::test]
    async fn short_lived_process_counts_as_failed_start() {
        let launcher = ProcessLauncher::new("true".into(), Vec::new(), Duration::from_millis(100));
        let err = launcher.start("a.b.c").await.err().unwrap();
        assert!(matches!(err, LaunchError::Spawn(_)));
    }

    #[tokio::test]
    async fn long_lived_process_starts_and_stops() {
        let launcher = ProcessLauncher::new(
            "sleep".into(),
            vec!["30".into()],
            Duration::from_millis(50),
        );
        let mut worker = launcher.start("a.b.c").await.unwrap();
        assert_eq!(worker.status().await.state, WorkerState::Running);
        worker.stop().await.unwrap();
        assert_eq!(worker.status().await.state, WorkerState::Stopped);
    }
}
