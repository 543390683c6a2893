//! Redis-backed implementations of the core persistence traits.
//!
//! Key layout:
//! - `account:cred:{credential}`       JSON `AccountSettings`
//! - `account:uid:seq`                 uid allocation counter (INCR)
//! - `hosted:{requester}:{identity}`   JSON `OwnershipRecord`
//! - `roster:{identity}`               JSON roster entry
//! - `blacklist:{identity}`            presence flag

use async_trait::async_trait;
use chrono::Utc;
use marina_core::{
    AccessPolicy, AccountSettings, Identity, OwnershipLedger, OwnershipRecord, RosterEntry,
    SettingsStore, StoreError,
};
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use serde::{Deserialize, Serialize};

#[derive(Clone)]
pub struct RedisStorage {
    redis: ConnectionManager,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredRosterEntry {
    #[serde(default)]
    hosting_limit: Option<u32>,
}

fn account_key(credential: &str) -> String {
    format!("account:cred:{}", credential)
}

fn hosted_key(requester: Identity, identity: Identity) -> String {
    format!("hosted:{}:{}", requester, identity)
}

fn roster_key(identity: Identity) -> String {
    format!("roster:{}", identity)
}

fn blacklist_key(identity: Identity) -> String {
    format!("blacklist:{}", identity)
}

const UID_SEQ_KEY: &str = "account:uid:seq";

fn store_err(err: impl std::fmt::Display) -> StoreError {
    StoreError::new(err.to_string())
}

impl RedisStorage {
    pub async fn new(redis_url: &str) -> anyhow::Result<Self> {
        let client = Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        Ok(Self { redis })
    }

    async fn scan_json<T: serde::de::DeserializeOwned>(
        &self,
        pattern: &str,
    ) -> Result<Vec<(String, T)>, StoreError> {
        let mut conn = self.redis.clone();
        let mut cursor: u64 = 0;
        let mut results = Vec::new();
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .cursor_arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(100u32)
                .query_async(&mut conn)
                .await
                .map_err(store_err)?;
            cursor = next_cursor;
            if !keys.is_empty() {
                let values: Vec<Option<String>> = redis::cmd("MGET")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(store_err)?;
                for (key, value) in keys.into_iter().zip(values) {
                    let Some(json) = value else { continue };
                    match serde_json::from_str::<T>(&json) {
                        Ok(parsed) => results.push((key, parsed)),
                        Err(err) => {
                            tracing::warn!(%key, error = %err, "skipping unparseable record")
                        }
                    }
                }
            }
            if cursor == 0 {
                break;
            }
        }
        Ok(results)
    }

    /// Grants hosting permission; `None` keeps the default limit.
    pub async fn grant_roster_entry(
        &self,
        identity: Identity,
        hosting_limit: Option<u32>,
    ) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let value =
            serde_json::to_string(&StoredRosterEntry { hosting_limit }).map_err(store_err)?;
        conn.set::<_, _, ()>(roster_key(identity), value)
            .await
            .map_err(store_err)
    }

    pub async fn add_to_blacklist(&self, identity: Identity) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.set::<_, _, ()>(blacklist_key(identity), 1)
            .await
            .map_err(store_err)
    }
}

#[async_trait]
impl SettingsStore for RedisStorage {
    async fn get_by_identity(
        &self,
        identity: Identity,
    ) -> Result<Option<(String, AccountSettings)>, StoreError> {
        // Deliberate scan across current accounts; the account count is
        // small and the credential is the primary key.
        let all = self.list_all().await?;
        Ok(all.into_iter().find(|(_, s)| s.identity == identity))
    }

    async fn get_by_uid(&self, uid: u64) -> Result<Option<(String, AccountSettings)>, StoreError> {
        let all = self.list_all().await?;
        Ok(all.into_iter().find(|(_, s)| s.uid == uid))
    }

    async fn upsert(&self, credential: &str, settings: AccountSettings) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        let value = serde_json::to_string(&settings).map_err(store_err)?;
        conn.set::<_, _, ()>(account_key(credential), value)
            .await
            .map_err(store_err)
    }

    async fn remove(&self, credential: &str) -> Result<(), StoreError> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(account_key(credential))
            .await
            .map_err(store_err)
    }

    async fn list_all(&self) -> Result<Vec<(String, AccountSettings)>, StoreError> {
        let records = self.scan_json::<AccountSettings>("account:cred:*").await?;
        Ok(records
            .into_iter()
            .map(|(key, settings)| {
                let credential = key.trim_start_matches("account:cred:").to_string();
                (credential, settings)
            })
            .collect())
    }

    async fn next_uid(&self) -> Result<u64, StoreError> {
        let mut conn = self.redis.clone();
        conn.incr(UID_SEQ_KEY, 1).await.map_err(store_err)
    }
}

#[async_trait]
impl OwnershipLedger for RedisStorage {
    async fn get(
        &self,
        requester: Identity,
        identity: Identity,
    ) -> Result<Option<OwnershipRecord>, StoreError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn
            .get(hosted_key(requester, identity))
            .await
            .map_err(store_err)?;
        match value {
            Some(json) => Ok(Some(serde_json::from_str(&json).map_err(store_err)?)),
            None => Ok(None),
        }
    }

    async fn upsert(
        &self,
        requester: Identity,
        identity: Identity,
        credential: &str,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        let record = match self.get(requester, identity).await? {
            Some(mut existing) => {
                existing.credential = credential.to_string();
                existing.updated_at = now;
                existing
            }
            None => OwnershipRecord {
                requester,
                identity,
                credential: credential.to_string(),
                created_at: now,
                updated_at: now,
            },
        };
        let mut conn = self.redis.clone();
        let value = serde_json::to_string(&record).map_err(store_err)?;
        conn.set::<_, _, ()>(hosted_key(requester, identity), value)
            .await
            .map_err(store_err)
    }

    async fn remove(&self, requester: Identity, identity: Identity) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        let removed: u64 = conn
            .del(hosted_key(requester, identity))
            .await
            .map_err(store_err)?;
        Ok(removed > 0)
    }

    async fn list_by_requester(
        &self,
        requester: Identity,
    ) -> Result<Vec<OwnershipRecord>, StoreError> {
        let pattern = format!("hosted:{}:*", requester);
        let mut records: Vec<OwnershipRecord> = self
            .scan_json::<OwnershipRecord>(&pattern)
            .await?
            .into_iter()
            .map(|(_, record)| record)
            .collect();
        records.sort_by_key(|r| r.identity);
        Ok(records)
    }

    async fn count_by_requester(&self, requester: Identity) -> Result<u32, StoreError> {
        Ok(self.list_by_requester(requester).await?.len() as u32)
    }
}

#[async_trait]
impl AccessPolicy for RedisStorage {
    async fn roster_entry(&self, identity: Identity) -> Result<Option<RosterEntry>, StoreError> {
        let mut conn = self.redis.clone();
        let value: Option<String> = conn.get(roster_key(identity)).await.map_err(store_err)?;
        match value {
            Some(json) => {
                let stored: StoredRosterEntry = serde_json::from_str(&json).map_err(store_err)?;
                Ok(Some(RosterEntry {
                    identity,
                    hosting_limit: stored.hosting_limit,
                }))
            }
            None => Ok(None),
        }
    }

    async fn is_blacklisted(&self, identity: Identity) -> Result<bool, StoreError> {
        let mut conn = self.redis.clone();
        conn.exists(blacklist_key(identity)).await.map_err(store_err)
    }
}
