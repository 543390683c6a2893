use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::credential::Identity;
use crate::error::{HostError, StoreError};
use crate::ledger::OwnershipLedger;

/// Limit applied when a roster entry exists without an explicit override.
pub const DEFAULT_HOSTING_LIMIT: u32 = 5;

#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub identity: Identity,
    /// `None` means the default limit applies.
    pub hosting_limit: Option<u32>,
}

impl RosterEntry {
    pub fn effective_limit(&self) -> u32 {
        self.hosting_limit.unwrap_or(DEFAULT_HOSTING_LIMIT)
    }
}

/// Authorization roster and blacklist, read-only from the coordinator's
/// point of view. Absence of a roster entry means unauthorized.
#[async_trait]
pub trait AccessPolicy: Send + Sync {
    async fn roster_entry(&self, identity: Identity) -> Result<Option<RosterEntry>, StoreError>;
    async fn is_blacklisted(&self, identity: Identity) -> Result<bool, StoreError>;
}

/// Evaluates hosting policy in a fixed order: blacklist, then roster, then
/// quota. Each check short-circuits; a blacklisted target is rejected even
/// for an unauthorized requester.
pub struct PolicyGate {
    policy: Arc<dyn AccessPolicy>,
    ledger: Arc<dyn OwnershipLedger>,
}

impl PolicyGate {
    pub fn new(policy: Arc<dyn AccessPolicy>, ledger: Arc<dyn OwnershipLedger>) -> Self {
        Self { policy, ledger }
    }

    pub async fn ensure_not_blacklisted(&self, target: Identity) -> Result<(), HostError> {
        if self.policy.is_blacklisted(target).await? {
            return Err(HostError::Blacklisted);
        }
        Ok(())
    }

    /// Rejects unless the requester has a roster entry; returns the
    /// effective hosting limit on success.
    pub async fn ensure_authorized(&self, requester: Identity) -> Result<u32, HostError> {
        match self.policy.roster_entry(requester).await? {
            Some(entry) => Ok(entry.effective_limit()),
            None => Err(HostError::Unauthorized),
        }
    }

    /// Quota applies only to cross-identity hosting; callers skip this for
    /// self-hosting. Quota is the ledger count, not total account count.
    pub async fn ensure_within_quota(
        &self,
        requester: Identity,
        limit: u32,
    ) -> Result<(), HostError> {
        let hosted = self.ledger.count_by_requester(requester).await?;
        if hosted >= limit {
            return Err(HostError::QuotaExceeded { limit });
        }
        Ok(())
    }
}

/// In-memory roster/blacklist for tests and the memory backend.
#[derive(Default)]
pub struct MemoryAccessPolicy {
    roster: RwLock<HashMap<Identity, Option<u32>>>,
    blacklist: RwLock<HashSet<Identity>>,
}

impl MemoryAccessPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn authorize(&self, identity: Identity, hosting_limit: Option<u32>) {
        self.roster.write().await.insert(identity, hosting_limit);
    }

    pub async fn blacklist(&self, identity: Identity) {
        self.blacklist.write().await.insert(identity);
    }
}

#[async_trait]
impl AccessPolicy for MemoryAccessPolicy {
    async fn roster_entry(&self, identity: Identity) -> Result<Option<RosterEntry>, StoreError> {
        Ok(self
            .roster
            .read()
            .await
            .get(&identity)
            .map(|limit| RosterEntry {
                identity,
                hosting_limit: *limit,
            }))
    }

    async fn is_blacklisted(&self, identity: Identity) -> Result<bool, StoreError> {
        Ok(self.blacklist.read().await.contains(&identity))
    }
}
