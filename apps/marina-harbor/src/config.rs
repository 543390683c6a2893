use std::env;

use marina_core::Identity;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    /// Base URL of the external account API used for liveness checks.
    pub account_api_url: String,
    /// Command spawned once per hosted credential.
    pub worker_command: String,
    pub worker_args: Vec<String>,
    pub worker_start_timeout_seconds: u64,
    /// How long a freshly spawned worker must stay up before the start is
    /// considered confirmed.
    pub worker_startup_grace_ms: u64,
    pub default_command_prefix: String,
    pub page_size: usize,
    /// Identities whose credentials are never revealed via the view
    /// operation, comma-separated in the environment.
    pub protected_identities: Vec<Identity>,
}

impl Config {
    pub fn from_env() -> Self {
        let protected_identities = env::var("MARINA_PROTECTED_IDENTITIES")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .filter_map(|part| part.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default();

        Self {
            port: env::var("MARINA_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            account_api_url: env::var("MARINA_ACCOUNT_API_URL")
                .unwrap_or_else(|_| "http://localhost:9090".to_string()),
            worker_command: env::var("MARINA_WORKER_CMD")
                .unwrap_or_else(|_| "marina-worker".to_string()),
            worker_args: env::var("MARINA_WORKER_ARGS")
                .ok()
                .map(|raw| raw.split_whitespace().map(|s| s.to_string()).collect())
                .unwrap_or_default(),
            worker_start_timeout_seconds: env::var("MARINA_WORKER_START_TIMEOUT")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(30),
            worker_startup_grace_ms: env::var("MARINA_WORKER_STARTUP_GRACE_MS")
                .ok()
                .and_then(|t| t.parse().ok())
                .unwrap_or(500),
            default_command_prefix: env::var("MARINA_DEFAULT_PREFIX")
                .unwrap_or_else(|_| ";".to_string()),
            page_size: env::var("MARINA_PAGE_SIZE")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(5),
            protected_identities,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            redis_url: "redis://localhost:6379".to_string(),
            account_api_url: "http://localhost:9090".to_string(),
            worker_command: "marina-worker".to_string(),
            worker_args: Vec::new(),
            worker_start_timeout_seconds: 30,
            worker_startup_grace_ms: 500,
            default_command_prefix: ";".to_string(),
            page_size: 5,
            protected_identities: Vec::new(),
        }
    }
}
