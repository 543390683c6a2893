use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::credential::Identity;
use crate::error::StoreError;

/// Durable link between a requester and an identity they host. Recorded only
/// for cross-identity hosting; a requester hosting their own account leaves
/// no ledger entry and does not count against quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OwnershipRecord {
    pub requester: Identity,
    pub identity: Identity,
    pub credential: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistent (requester, identity) -> credential ledger. At most one record
/// per pair; upsert refreshes the credential and `updated_at` in place.
#[async_trait]
pub trait OwnershipLedger: Send + Sync {
    async fn get(
        &self,
        requester: Identity,
        identity: Identity,
    ) -> Result<Option<OwnershipRecord>, StoreError>;
    async fn upsert(
        &self,
        requester: Identity,
        identity: Identity,
        credential: &str,
    ) -> Result<(), StoreError>;
    async fn remove(&self, requester: Identity, identity: Identity) -> Result<bool, StoreError>;
    async fn list_by_requester(
        &self,
        requester: Identity,
    ) -> Result<Vec<OwnershipRecord>, StoreError>;
    async fn count_by_requester(&self, requester: Identity) -> Result<u32, StoreError>;
}

#[derive(Default)]
pub struct MemoryOwnershipLedger {
    records: Mutex<HashMap<(Identity, Identity), OwnershipRecord>>,
}

impl MemoryOwnershipLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OwnershipLedger for MemoryOwnershipLedger {
    async fn get(
        &self,
        requester: Identity,
        identity: Identity,
    ) -> Result<Option<OwnershipRecord>, StoreError> {
        Ok(self.records.lock().await.get(&(requester, identity)).cloned())
    }

    async fn upsert(
        &self,
        requester: Identity,
        identity: Identity,
        credential: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let mut records = self.records.lock().await;
        match records.get_mut(&(requester, identity)) {
            Some(existing) => {
                existing.credential = credential.to_string();
                existing.updated_at = now;
            }
            None => {
                records.insert(
                    (requester, identity),
                    OwnershipRecord {
                        requester,
                        identity,
                        credential: credential.to_string(),
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        Ok(())
    }

    async fn remove(&self, requester: Identity, identity: Identity) -> Result<bool, StoreError> {
        Ok(self
            .records
            .lock()
            .await
            .remove(&(requester, identity))
            .is_some())
    }

    async fn list_by_requester(
        &self,
        requester: Identity,
    ) -> Result<Vec<OwnershipRecord>, StoreError> {
        let records = self.records.lock().await;
        let mut owned: Vec<OwnershipRecord> = records
            .values()
            .filter(|r| r.requester == requester)
            .cloned()
            .collect();
        owned.sort_by_key(|r| r.identity);
        Ok(owned)
    }

    async fn count_by_requester(&self, requester: Identity) -> Result<u32, StoreError> {
        let records = self.records.lock().await;
        Ok(records.values().filter(|r| r.requester == requester).count() as u32)
    }
}
