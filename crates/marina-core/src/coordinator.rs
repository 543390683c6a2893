use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, warn};

use crate::credential::{self, Identity, LivenessOracle};
use crate::error::HostError;
use crate::ledger::OwnershipLedger;
use crate::policy::PolicyGate;
use crate::ratelimit::RateLimiter;
use crate::settings::{AccountSettings, AutoDeletePolicy, SettingsStore};
use crate::worker::WorkerRegistry;

/// Per-operation cooldowns supplied to the rate limiter. These are
/// coordinator policy, not rate limiter internals.
#[derive(Debug, Clone)]
pub struct Cooldowns {
    pub host: Duration,
    pub list: Duration,
    pub unhost: Duration,
    pub view: Duration,
    pub revalidate: Duration,
}

impl Cooldowns {
    /// All cooldowns off. Used by tests and trusted internal callers.
    pub fn disabled() -> Self {
        Self {
            host: Duration::ZERO,
            list: Duration::ZERO,
            unhost: Duration::ZERO,
            view: Duration::ZERO,
            revalidate: Duration::ZERO,
        }
    }
}

impl Default for Cooldowns {
    fn default() -> Self {
        Self {
            host: Duration::from_secs(30),
            list: Duration::from_secs(10),
            unhost: Duration::from_secs(15),
            view: Duration::from_secs(20),
            revalidate: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Prefix inherited by newly created accounts.
    pub default_command_prefix: String,
    pub default_auto_delete: AutoDeletePolicy,
    pub page_size: usize,
    /// Identities whose credentials may never be revealed through
    /// `view_credential` (operator accounts).
    pub protected_identities: Vec<Identity>,
    pub cooldowns: Cooldowns,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            default_command_prefix: ";".into(),
            default_auto_delete: AutoDeletePolicy::default(),
            page_size: 5,
            protected_identities: Vec::new(),
            cooldowns: Cooldowns::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HostReceipt {
    pub uid: u64,
    pub identity: Identity,
    /// True when an existing account's credential was rotated rather than a
    /// new account created.
    pub updated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnhostReceipt {
    pub identity: Identity,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostedAccount {
    pub uid: Option<u64>,
    pub identity: Identity,
    pub username: String,
    pub command_prefix: String,
    pub guild_count: u64,
    pub status: String,
    pub hosted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostedListing {
    pub accounts: Vec<HostedAccount>,
    pub page: usize,
    pub total_pages: usize,
    pub total: usize,
    pub hosting_limit: u32,
    pub uids_only: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CredentialReveal {
    pub uid: u64,
    pub username: String,
    pub credential: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemovedAccount {
    pub uid: Option<u64>,
    pub identity: Identity,
    pub username: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevalidationReport {
    pub checked: usize,
    pub removed: Vec<RemovedAccount>,
}

const UNKNOWN_ACCOUNT: &str = "unknown account";

/// Orchestrates the rate limiter, credential validation, policy gate, and
/// the three data surfaces (settings store, ownership ledger, worker
/// registry) behind the five hosting operations.
///
/// No transaction spans the three surfaces. Mutations follow a fixed commit
/// order (settings, then worker swap, then ledger for create/update;
/// worker stop, then settings, then ledger for remove) and `revalidate` is
/// the idempotent reconciler for any window a partial failure leaves open.
pub struct HostingCoordinator {
    limiter: RateLimiter,
    oracle: Arc<dyn LivenessOracle>,
    gate: PolicyGate,
    settings: Arc<dyn SettingsStore>,
    ledger: Arc<dyn OwnershipLedger>,
    registry: WorkerRegistry,
    config: CoordinatorConfig,
    /// Serializes mutating branches per identity so two concurrent requests
    /// cannot race the one-settings-per-identity invariant.
    identity_locks: Mutex<HashMap<Identity, Arc<Mutex<()>>>>,
}

impl HostingCoordinator {
    pub fn new(
        oracle: Arc<dyn LivenessOracle>,
        gate: PolicyGate,
        settings: Arc<dyn SettingsStore>,
        ledger: Arc<dyn OwnershipLedger>,
        registry: WorkerRegistry,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            limiter: RateLimiter::new(),
            oracle,
            gate,
            settings,
            ledger,
            registry,
            config,
            identity_locks: Mutex::new(HashMap::new()),
        }
    }

    fn rate_gate(
        &self,
        requester: Identity,
        operation: &str,
        cooldown: Duration,
    ) -> Result<(), HostError> {
        let decision = self.limiter.check_and_stamp(requester, operation, cooldown);
        if decision.limited {
            return Err(HostError::RateLimited {
                retry_after: decision.retry_after,
            });
        }
        Ok(())
    }

    /// Acquires the mutual-exclusion scope for one identity. Dropped
    /// entries are pruned once nobody else holds them.
    async fn identity_scope(&self, identity: Identity) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.identity_locks.lock().await;
            locks.retain(|_, l| Arc::strong_count(l) > 1);
            locks
                .entry(identity)
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Attaches a credential: validates it, applies policy, then creates a
    /// new account or rotates the credential of an existing one, swapping
    /// the worker over in either case.
    pub async fn host(&self, requester: Identity, cred: &str) -> Result<HostReceipt, HostError> {
        self.rate_gate(requester, "host", self.config.cooldowns.host)?;

        if !credential::validate_structure(cred) {
            return Err(HostError::ValidationFailed);
        }
        if !credential::confirm_live(self.oracle.as_ref(), cred).await {
            return Err(HostError::ValidationFailed);
        }
        let identity = credential::decode_identity(cred).map_err(|err| {
            warn!(%err, "credential passed liveness but identity decode failed");
            HostError::ValidationFailed
        })?;

        let _scope = self.identity_scope(identity).await;

        self.gate.ensure_not_blacklisted(identity).await?;
        let limit = self.gate.ensure_authorized(requester).await?;

        match self.settings.get_by_identity(identity).await? {
            Some((old_cred, existing)) => {
                if identity != requester {
                    self.gate.ensure_within_quota(requester, limit).await?;
                }
                self.rotate_credential(requester, identity, cred, &old_cred, existing)
                    .await
            }
            None => {
                if identity != requester {
                    self.gate.ensure_within_quota(requester, limit).await?;
                }
                self.create_account(requester, identity, cred).await
            }
        }
    }

    /// Existing-account branch: same uid, new credential. Settings are
    /// committed first; if the replacement worker then fails to start the
    /// settings are NOT rolled back and the identity is left with zero
    /// running workers until the next revalidation sweep.
    async fn rotate_credential(
        &self,
        requester: Identity,
        identity: Identity,
        cred: &str,
        old_cred: &str,
        mut settings: AccountSettings,
    ) -> Result<HostReceipt, HostError> {
        let uid = settings.uid;
        info!(uid, "rotating credential for existing account");
        settings.updated_at = Utc::now();
        if old_cred != cred {
            self.settings.remove(old_cred).await?;
        }
        self.settings.upsert(cred, settings).await?;

        // Old worker must be fully stopped before the replacement may run;
        // two live workers must never impersonate one identity.
        self.registry.stop(old_cred).await;
        if let Err(err) = self.registry.start(cred).await {
            error!(uid, error = %err, "replacement worker failed to start");
            return Err(HostError::WorkerStart(err.to_string()));
        }

        if identity != requester {
            self.ledger.upsert(requester, identity, cred).await?;
        }
        Ok(HostReceipt {
            uid,
            identity,
            updated: true,
        })
    }

    async fn create_account(
        &self,
        requester: Identity,
        identity: Identity,
        cred: &str,
    ) -> Result<HostReceipt, HostError> {
        let uid = self.settings.next_uid().await?;
        let now = Utc::now();
        let settings = AccountSettings {
            uid,
            identity,
            username: format!("account-{identity}"),
            command_prefix: self.config.default_command_prefix.clone(),
            auto_delete: self.config.default_auto_delete.clone(),
            presence: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        };
        info!(uid, "creating account");
        self.settings.upsert(cred, settings).await?;

        if let Err(err) = self.registry.start(cred).await {
            error!(uid, error = %err, "worker failed to start for new account");
            return Err(HostError::WorkerStart(err.to_string()));
        }

        if identity != requester {
            self.ledger.upsert(requester, identity, cred).await?;
        }
        Ok(HostReceipt {
            uid,
            identity,
            updated: false,
        })
    }

    /// Resolves `identifier` as a uid first, then as a raw identity. The
    /// ambiguity is a deliberate UX feature.
    async fn resolve_identifier(&self, identifier: &str) -> Result<Identity, HostError> {
        let number: u64 = identifier.trim().parse().map_err(|_| HostError::NotFound)?;
        if let Some((_, settings)) = self.settings.get_by_uid(number).await? {
            return Ok(settings.identity);
        }
        Ok(number)
    }

    /// Detaches an account the requester hosts. Worker stop and settings
    /// removal are attempted regardless of earlier failures; ledger removal
    /// is the authoritative success signal.
    pub async fn unhost(
        &self,
        requester: Identity,
        identifier: &str,
    ) -> Result<UnhostReceipt, HostError> {
        self.rate_gate(requester, "unhost", self.config.cooldowns.unhost)?;
        self.gate.ensure_authorized(requester).await?;

        let identity = self.resolve_identifier(identifier).await?;
        let _scope = self.identity_scope(identity).await;

        let record = self
            .ledger
            .get(requester, identity)
            .await?
            .ok_or(HostError::NotOwned)?;

        self.registry.stop(&record.credential).await;
        if let Err(err) = self.settings.remove(&record.credential).await {
            warn!(identity, error = %err, "settings removal failed during unhost");
        }
        if !self.ledger.remove(requester, identity).await? {
            return Err(HostError::NotOwned);
        }
        info!(identity, "unhosted account");
        Ok(UnhostReceipt { identity })
    }

    /// Reconciliation sweep: rechecks every credential the requester hosts
    /// against the liveness oracle and removes the dead ones everywhere.
    /// Idempotent and safe to run with nothing pending. Sequential on
    /// purpose; the operation is expected to be slow and is rate-limited
    /// accordingly.
    pub async fn revalidate(&self, requester: Identity) -> Result<RevalidationReport, HostError> {
        self.rate_gate(requester, "revalidate", self.config.cooldowns.revalidate)?;
        self.gate.ensure_authorized(requester).await?;

        let records = self.ledger.list_by_requester(requester).await?;
        let checked = records.len();
        let mut removed = Vec::new();

        for record in records {
            if credential::confirm_live(self.oracle.as_ref(), &record.credential).await {
                continue;
            }
            let _scope = self.identity_scope(record.identity).await;

            // Best-effort display identity for the report.
            let (uid, username) = match self.settings.get_by_identity(record.identity).await {
                Ok(Some((_, s))) => (Some(s.uid), s.username),
                Ok(None) => (None, UNKNOWN_ACCOUNT.to_string()),
                Err(err) => {
                    warn!(identity = record.identity, error = %err, "settings lookup failed during revalidate");
                    (None, UNKNOWN_ACCOUNT.to_string())
                }
            };

            self.registry.stop(&record.credential).await;
            if let Err(err) = self.settings.remove(&record.credential).await {
                warn!(identity = record.identity, error = %err, "settings removal failed during revalidate");
            }
            if let Err(err) = self.ledger.remove(requester, record.identity).await {
                warn!(identity = record.identity, error = %err, "ledger removal failed during revalidate");
                continue;
            }
            info!(identity = record.identity, "removed dead credential");
            removed.push(RemovedAccount {
                uid,
                identity: record.identity,
                username,
            });
        }
        Ok(RevalidationReport { checked, removed })
    }

    /// Read-only join of ledger, settings, and registry for the requester's
    /// hosted accounts. `page` is clamped into `[1, total_pages]`;
    /// `uids_only` bypasses pagination and returns the full ordered list.
    pub async fn list(
        &self,
        requester: Identity,
        page: usize,
        uids_only: bool,
    ) -> Result<HostedListing, HostError> {
        self.rate_gate(requester, "list", self.config.cooldowns.list)?;
        let hosting_limit = self.gate.ensure_authorized(requester).await?;

        let records = self.ledger.list_by_requester(requester).await?;
        let mut accounts = Vec::with_capacity(records.len());
        for record in records {
            let settings = self.settings.get_by_identity(record.identity).await?;
            let (uid, username, command_prefix, live_cred) = match settings {
                Some((cred, s)) => (Some(s.uid), s.username, s.command_prefix, Some(cred)),
                None => (
                    None,
                    UNKNOWN_ACCOUNT.to_string(),
                    self.config.default_command_prefix.clone(),
                    None,
                ),
            };
            let status = match live_cred {
                Some(cred) => self.registry.status(&cred).await,
                None => None,
            };
            // No registered worker reads as "offline"; registered workers
            // report their own state label.
            let (guild_count, status) = match status {
                Some(s) => (s.guild_count, s.state.label().to_string()),
                None => (0, "offline".to_string()),
            };
            accounts.push(HostedAccount {
                uid,
                identity: record.identity,
                username,
                command_prefix,
                guild_count,
                status,
                hosted_at: record.created_at,
            });
        }

        // Numeric uid ascending; accounts with no settings record sort last.
        accounts.sort_by_key(|a| a.uid.unwrap_or(u64::MAX));
        let total = accounts.len();

        if uids_only {
            return Ok(HostedListing {
                accounts,
                page: 1,
                total_pages: 1,
                total,
                hosting_limit,
                uids_only: true,
            });
        }

        let page_size = self.config.page_size.max(1);
        let total_pages = total.div_ceil(page_size).max(1);
        let page = page.clamp(1, total_pages);
        let start = (page - 1) * page_size;
        let accounts: Vec<HostedAccount> =
            accounts.into_iter().skip(start).take(page_size).collect();
        Ok(HostedListing {
            accounts,
            page,
            total_pages,
            total,
            hosting_limit,
            uids_only: false,
        })
    }

    /// Reveals the raw credential for a hosted account. The only path that
    /// ever displays a credential; protected identities are refused before
    /// ownership is considered so operator accounts stay unenumerable.
    pub async fn view_credential(
        &self,
        requester: Identity,
        uid: u64,
    ) -> Result<CredentialReveal, HostError> {
        self.rate_gate(requester, "view", self.config.cooldowns.view)?;
        self.gate.ensure_authorized(requester).await?;

        let (cred, settings) = self
            .settings
            .get_by_uid(uid)
            .await?
            .ok_or(HostError::NotFound)?;
        if self.config.protected_identities.contains(&settings.identity) {
            return Err(HostError::Unauthorized);
        }
        if self.ledger.get(requester, settings.identity).await?.is_none() {
            return Err(HostError::NotOwned);
        }
        Ok(CredentialReveal {
            uid,
            username: settings.username,
            credential: cred,
        })
    }

    /// Stops all workers. Called once at process shutdown.
    pub async fn drain(&self) {
        self.registry.drain_all().await;
    }
}
