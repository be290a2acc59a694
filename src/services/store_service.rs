// src/services/store_service.rs
use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::errors::{DispatchError, DispatchResult};
use crate::models::{driver::Driver, rider::RiderSlot, ride::Ride};

// Store configuration
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    /// When unset, records live in process memory.
    pub redis_url: Option<String>,
}

// Store key strategies
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreKey {
    Record {
        collection: &'static str,
        id: String,
    },
    Index(Vec<String>),
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreKey::Record { collection, id } => write!(f, "{}:id:{}", collection, id),
            StoreKey::Index(parts) => write!(f, "index:{}", parts.join(":")),
        }
    }
}

pub struct StoreKeys;

impl StoreKeys {
    pub fn record<T: Entity>(id: &str) -> StoreKey {
        StoreKey::Record {
            collection: T::COLLECTION,
            id: id.to_string(),
        }
    }

    pub fn all_drivers() -> StoreKey {
        StoreKey::Index(vec!["drivers".to_string(), "all".to_string()])
    }

    /// Rides still waiting in `requested`; the pending queue is rebuilt from it.
    pub fn requested_rides() -> StoreKey {
        StoreKey::Index(vec!["rides".to_string(), "requested".to_string()])
    }

    pub fn rides_by_rider(rider_id: &str) -> StoreKey {
        StoreKey::Index(vec![
            "rides".to_string(),
            "rider".to_string(),
            rider_id.to_string(),
        ])
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    pub version: u64,
    pub json: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    Committed { version: u64 },
    Conflict { actual: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Operation error: {0}")]
    OperationError(String),
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            StoreError::ConnectionError(err.to_string())
        } else {
            StoreError::OperationError(err.to_string())
        }
    }
}

impl From<StoreError> for DispatchError {
    fn from(error: StoreError) -> Self {
        DispatchError::Storage(error.to_string())
    }
}

/// Versioned records plus string-set indexes. Version 0 means "absent":
/// a compare-and-swap expecting 0 creates the record at version 1.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, key: &StoreKey) -> Result<Option<StoredRecord>, StoreError>;
    async fn compare_and_swap(
        &self,
        key: &StoreKey,
        expected_version: u64,
        json: String,
    ) -> Result<CasOutcome, StoreError>;
    async fn add_to_index(&self, index: &StoreKey, member: &str) -> Result<(), StoreError>;
    async fn remove_from_index(&self, index: &StoreKey, member: &str) -> Result<(), StoreError>;
    async fn index_members(&self, index: &StoreKey) -> Result<Vec<String>, StoreError>;
}

// In-process store for development and testing
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, StoredRecord>>,
    indexes: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<StoredRecord>, StoreError> {
        let records = self.records.read().await;
        Ok(records.get(&key.to_string()).cloned())
    }

    async fn compare_and_swap(
        &self,
        key: &StoreKey,
        expected_version: u64,
        json: String,
    ) -> Result<CasOutcome, StoreError> {
        let mut records = self.records.write().await;
        let key = key.to_string();
        let actual = records.get(&key).map_or(0, |record| record.version);
        if actual != expected_version {
            return Ok(CasOutcome::Conflict { actual });
        }
        let version = actual + 1;
        records.insert(key, StoredRecord { version, json });
        Ok(CasOutcome::Committed { version })
    }

    async fn add_to_index(&self, index: &StoreKey, member: &str) -> Result<(), StoreError> {
        let mut indexes = self.indexes.write().await;
        indexes
            .entry(index.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn remove_from_index(&self, index: &StoreKey, member: &str) -> Result<(), StoreError> {
        let mut indexes = self.indexes.write().await;
        if let Some(members) = indexes.get_mut(&index.to_string()) {
            members.remove(member);
        }
        Ok(())
    }

    async fn index_members(&self, index: &StoreKey) -> Result<Vec<String>, StoreError> {
        let indexes = self.indexes.read().await;
        Ok(indexes
            .get(&index.to_string())
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }
}

// Check-and-set must be atomic on the server, so it runs as a script.
const CAS_SCRIPT: &str = r#"
local current = tonumber(redis.call('HGET', KEYS[1], 'version') or '0')
if current ~= tonumber(ARGV[1]) then
  return {0, current}
end
local next_version = current + 1
redis.call('HSET', KEYS[1], 'version', next_version, 'data', ARGV[2])
return {1, next_version}
"#;

// Redis-backed store
pub struct RedisStore {
    client: redis::Client,
    cas_script: redis::Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| StoreError::ConnectionError(e.to_string()))?;

        let instance = Self {
            client,
            cas_script: redis::Script::new(CAS_SCRIPT),
        };

        // Fail fast on a bad URL or unreachable server.
        let mut conn = instance.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(instance)
    }

    async fn get_connection(&self) -> Result<redis::aio::Connection, StoreError> {
        self.client
            .get_async_connection()
            .await
            .map_err(|e| StoreError::ConnectionError(e.to_string()))
    }
}

#[async_trait]
impl RecordStore for RedisStore {
    async fn get(&self, key: &StoreKey) -> Result<Option<StoredRecord>, StoreError> {
        let mut conn = self.get_connection().await?;
        let (version, json): (Option<u64>, Option<String>) = redis::cmd("HMGET")
            .arg(key.to_string())
            .arg("version")
            .arg("data")
            .query_async(&mut conn)
            .await?;

        Ok(match (version, json) {
            (Some(version), Some(json)) => Some(StoredRecord { version, json }),
            _ => None,
        })
    }

    async fn compare_and_swap(
        &self,
        key: &StoreKey,
        expected_version: u64,
        json: String,
    ) -> Result<CasOutcome, StoreError> {
        let mut conn = self.get_connection().await?;
        let mut invocation = self.cas_script.prepare_invoke();
        invocation.key(key.to_string()).arg(expected_version).arg(json);
        let (committed, version): (i64, u64) = invocation.invoke_async(&mut conn).await?;

        Ok(if committed == 1 {
            CasOutcome::Committed { version }
        } else {
            CasOutcome::Conflict { actual: version }
        })
    }

    async fn add_to_index(&self, index: &StoreKey, member: &str) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let _: i64 = redis::cmd("SADD")
            .arg(index.to_string())
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn remove_from_index(&self, index: &StoreKey, member: &str) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let _: i64 = redis::cmd("SREM")
            .arg(index.to_string())
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn index_members(&self, index: &StoreKey) -> Result<Vec<String>, StoreError> {
        let mut conn = self.get_connection().await?;
        let mut members: Vec<String> = redis::cmd("SMEMBERS")
            .arg(index.to_string())
            .query_async(&mut conn)
            .await?;
        members.sort();
        Ok(members)
    }
}

/// Types persisted as versioned records.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;
    fn id(&self) -> &str;
}

impl Entity for Ride {
    const COLLECTION: &'static str = "ride";
    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for Driver {
    const COLLECTION: &'static str = "driver";
    fn id(&self) -> &str {
        &self.id
    }
}

impl Entity for RiderSlot {
    const COLLECTION: &'static str = "rider";
    fn id(&self) -> &str {
        &self.rider_id
    }
}

/// An entity together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub data: T,
}

// Typed access on top of whichever backend is configured
#[derive(Clone)]
pub struct EntityStore {
    backend: Arc<dyn RecordStore>,
}

impl EntityStore {
    pub fn new(backend: Arc<dyn RecordStore>) -> Self {
        Self { backend }
    }

    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub async fn connect(config: &StoreConfig) -> DispatchResult<Self> {
        match &config.redis_url {
            Some(url) => {
                tracing::info!("Connecting entity store to Redis");
                Ok(Self::new(Arc::new(RedisStore::connect(url).await?)))
            }
            None => {
                tracing::warn!("REDIS_URL not set, entities are kept in memory only");
                Ok(Self::memory())
            }
        }
    }

    pub async fn get<T: Entity>(&self, id: &str) -> DispatchResult<Option<Versioned<T>>> {
        let key = StoreKeys::record::<T>(id);
        match self.backend.get(&key).await? {
            Some(record) => {
                let data = serde_json::from_str(&record.json)?;
                Ok(Some(Versioned {
                    version: record.version,
                    data,
                }))
            }
            None => Ok(None),
        }
    }

    /// Inserts a new entity. Returns `None` when one with that id already exists.
    pub async fn create<T: Entity>(&self, entity: &T) -> DispatchResult<Option<u64>> {
        match self.commit(entity, 0).await? {
            CasOutcome::Committed { version } => Ok(Some(version)),
            CasOutcome::Conflict { .. } => Ok(None),
        }
    }

    /// Writes `entity` only if the stored version is still `expected_version`.
    pub async fn commit<T: Entity>(
        &self,
        entity: &T,
        expected_version: u64,
    ) -> DispatchResult<CasOutcome> {
        let key = StoreKeys::record::<T>(entity.id());
        let json = serde_json::to_string(entity)?;
        let outcome = self
            .backend
            .compare_and_swap(&key, expected_version, json)
            .await?;
        if let CasOutcome::Conflict { actual } = outcome {
            tracing::debug!(
                "Version conflict on {}: expected {}, found {}",
                key,
                expected_version,
                actual
            );
        }
        Ok(outcome)
    }

    /// Read-modify-write under optimistic concurrency. `mutate` sees the
    /// latest committed entity on every attempt; returning `false` leaves it
    /// untouched. `None` when the entity does not exist.
    pub async fn update<T, F>(
        &self,
        id: &str,
        attempts: u32,
        mut mutate: F,
    ) -> DispatchResult<Option<Versioned<T>>>
    where
        T: Entity,
        F: FnMut(&mut T) -> DispatchResult<bool> + Send,
    {
        for attempt in 1..=attempts.max(1) {
            let Some(mut current) = self.get::<T>(id).await? else {
                return Ok(None);
            };
            if !mutate(&mut current.data)? {
                return Ok(Some(current));
            }
            match self.commit(&current.data, current.version).await? {
                CasOutcome::Committed { version } => {
                    return Ok(Some(Versioned {
                        version,
                        data: current.data,
                    }));
                }
                CasOutcome::Conflict { .. } => {
                    tracing::debug!("Retrying update of {} {} (attempt {})", T::COLLECTION, id, attempt);
                }
            }
        }
        Err(DispatchError::ConcurrentModification {
            collection: T::COLLECTION.to_string(),
            id: id.to_string(),
        })
    }

    pub async fn add_to_index(&self, index: &StoreKey, member: &str) -> DispatchResult<()> {
        Ok(self.backend.add_to_index(index, member).await?)
    }

    pub async fn remove_from_index(&self, index: &StoreKey, member: &str) -> DispatchResult<()> {
        Ok(self.backend.remove_from_index(index, member).await?)
    }

    pub async fn index_members(&self, index: &StoreKey) -> DispatchResult<Vec<String>> {
        Ok(self.backend.index_members(index).await?)
    }

    /// Loads every entity listed in `index`, skipping dangling members.
    pub async fn load_indexed<T: Entity>(&self, index: &StoreKey) -> DispatchResult<Vec<Versioned<T>>> {
        let ids = self.index_members(index).await?;
        let mut loaded = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(entity) = self.get::<T>(&id).await? {
                loaded.push(entity);
            }
        }
        Ok(loaded)
    }
}
