use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::credential::Identity;
use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoDeletePolicy {
    pub enabled: bool,
    pub delay_seconds: u64,
}

impl Default for AutoDeletePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_seconds: 120,
        }
    }
}

/// Persistent per-credential account record. Exactly one exists per identity
/// at any time; the coordinator preserves that invariant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSettings {
    /// Stable sequence number assigned on first hosting, never reused.
    pub uid: u64,
    pub identity: Identity,
    pub username: String,
    pub command_prefix: String,
    pub auto_delete: AutoDeletePolicy,
    #[serde(default)]
    pub presence: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Persistent mapping credential -> account settings.
///
/// `get_by_identity` is a scan over current records rather than an indexed
/// lookup; account counts are small enough that O(n) is fine.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_by_identity(
        &self,
        identity: Identity,
    ) -> Result<Option<(String, AccountSettings)>, StoreError>;
    async fn get_by_uid(&self, uid: u64) -> Result<Option<(String, AccountSettings)>, StoreError>;
    async fn upsert(&self, credential: &str, settings: AccountSettings) -> Result<(), StoreError>;
    async fn remove(&self, credential: &str) -> Result<(), StoreError>;
    async fn list_all(&self) -> Result<Vec<(String, AccountSettings)>, StoreError>;
    /// Allocates the next uid. Monotonic; a uid is never handed out twice,
    /// even across delete cycles.
    async fn next_uid(&self) -> Result<u64, StoreError>;
}

/// In-memory store used by tests and the memory backend.
#[derive(Default)]
pub struct MemorySettingsStore {
    records: Mutex<HashMap<String, AccountSettings>>,
    uid_seq: Mutex<u64>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn get_by_identity(
        &self,
        identity: Identity,
    ) -> Result<Option<(String, AccountSettings)>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .find(|(_, s)| s.identity == identity)
            .map(|(c, s)| (c.clone(), s.clone())))
    }

    async fn get_by_uid(&self, uid: u64) -> Result<Option<(String, AccountSettings)>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .find(|(_, s)| s.uid == uid)
            .map(|(c, s)| (c.clone(), s.clone())))
    }

    async fn upsert(&self, credential: &str, settings: AccountSettings) -> Result<(), StoreError> {
        self.records
            .lock()
            .await
            .insert(credential.to_string(), settings);
        Ok(())
    }

    async fn remove(&self, credential: &str) -> Result<(), StoreError> {
        self.records.lock().await.remove(credential);
        Ok(())
    }

    async fn list_all(&self) -> Result<Vec<(String, AccountSettings)>, StoreError> {
        let records = self.records.lock().await;
        Ok(records.iter().map(|(c, s)| (c.clone(), s.clone())).collect())
    }

    async fn next_uid(&self) -> Result<u64, StoreError> {
        let mut seq = self.uid_seq.lock().await;
        *seq += 1;
        Ok(*seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(uid: u64, identity: Identity) -> AccountSettings {
        AccountSettings {
            uid,
            identity,
            username: format!("account-{identity}"),
            command_prefix: ";".into(),
            auto_delete: AutoDeletePolicy::default(),
            presence: serde_json::Value::Null,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn uids_are_monotonic_and_never_reused() {
        let store = MemorySettingsStore::new();
        let a = store.next_uid().await.unwrap();
        let b = store.next_uid().await.unwrap();
        store.upsert("cred-a", sample(a, 10)).await.unwrap();
        store.remove("cred-a").await.unwrap();
        let c = store.next_uid().await.unwrap();
        assert!(a < b && b < c);
    }

    #[tokio::test]
    async fn lookups_by_identity_and_uid() {
        let store = MemorySettingsStore::new();
        store.upsert("cred-a", sample(1, 10)).await.unwrap();
        store.upsert("cred-b", sample(2, 20)).await.unwrap();

        let (cred, settings) = store.get_by_identity(20).await.unwrap().unwrap();
        assert_eq!(cred, "cred-b");
        assert_eq!(settings.uid, 2);

        let (cred, settings) = store.get_by_uid(1).await.unwrap().unwrap();
        assert_eq!(cred, "cred-a");
        assert_eq!(settings.identity, 10);

        assert!(store.get_by_identity(99).await.unwrap().is_none());
    }
}
