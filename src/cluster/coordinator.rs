//! Cluster coordinator
//!
//! Owns this node's shard identity and the cluster topology, and mediates
//! every operation that may touch more than one shard: fan-out writes,
//! latency-routed reads, DDL broadcast, join, and resharding after a
//! topology change. The topology lives in a [`ShardConfig`] persisted as
//! the record `__internal.sharding.config`; `__internal` never leaves this
//! node.
//!
//! Locking: the config lock is only ever held to read a snapshot or apply
//! an in-memory mutation. All network I/O runs against snapshots.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use uuid::Uuid;

use crate::cluster::client::PeerClient;
use crate::cluster::heartbeat::HeartbeatMonitor;
use crate::cluster::placement::placement;
use crate::common::error::{Error, Result};
use crate::store::records::RecordStore;
use crate::{INTERNAL_DATABASE, SYSTEM_DATABASE};

pub const SHARDING_TABLE: &str = "sharding";
pub const CONFIG_RECORD: &str = "config";

/// Durable cluster topology, one copy per shard.
///
/// `shards` is ordered and that order is load-bearing: placement walks it.
/// A shard's own entry in `shard_urls` is absent (or empty), which is how
/// "me" is recognized when resolving a placement set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardConfig {
    #[serde(rename = "s")]
    pub shards: Vec<String>,
    #[serde(rename = "as")]
    pub active_shards: Vec<String>,
    #[serde(rename = "su")]
    pub shard_urls: HashMap<String, String>,
    #[serde(rename = "iam")]
    pub i_am: usize,
    #[serde(rename = "r")]
    pub replica_config: HashMap<String, HashMap<String, u32>>,
}

impl ShardConfig {
    /// Config for a node booting with no cluster: itself as the only
    /// (active) shard, no peers.
    pub fn standalone() -> Self {
        let id = Uuid::new_v4().to_string();
        Self {
            shards: vec![id.clone()],
            active_shards: vec![id],
            shard_urls: HashMap::new(),
            i_am: 0,
            replica_config: HashMap::new(),
        }
    }

    pub fn self_id(&self) -> &str {
        self.shards.get(self.i_am).map(String::as_str).unwrap_or("")
    }

    /// URL of a shard, `None` when the shard is this node.
    pub fn url_for(&self, shard_id: &str) -> Option<&str> {
        self.shard_urls
            .get(shard_id)
            .map(String::as_str)
            .filter(|u| !u.is_empty())
    }

    pub fn peer_urls(&self) -> Vec<String> {
        self.shard_urls
            .values()
            .filter(|u| !u.is_empty())
            .cloned()
            .collect()
    }

    /// Replica count for a table; unset means 1.
    pub fn replicas(&self, db: &str, table: &str) -> usize {
        self.replica_config
            .get(db)
            .and_then(|tables| tables.get(table))
            .copied()
            .map(|r| r.max(1) as usize)
            .unwrap_or(1)
    }
}

pub struct Coordinator {
    store: Arc<RecordStore>,
    peers: PeerClient,
    heartbeats: Arc<HeartbeatMonitor>,
    config: RwLock<ShardConfig>,
}

impl Coordinator {
    /// Load or create this shard's identity. A node with no persisted
    /// config starts from a fresh standalone config; when a join target is
    /// configured the standalone config stays unpersisted and [`join`]
    /// completes cluster entry once the local listener is up (peers call
    /// back into this node while resharding).
    pub fn init(
        store: Arc<RecordStore>,
        peers: PeerClient,
        heartbeats: Arc<HeartbeatMonitor>,
        join_pending: bool,
    ) -> Result<Arc<Self>> {
        if store.database(INTERNAL_DATABASE).is_none() {
            store.create_database(INTERNAL_DATABASE)?;
        }
        if store.table(INTERNAL_DATABASE, SHARDING_TABLE).is_none() {
            store.create_table(INTERNAL_DATABASE, SHARDING_TABLE)?;
        }

        let config = match store.get(INTERNAL_DATABASE, SHARDING_TABLE, CONFIG_RECORD) {
            Ok(value) => serde_json::from_value(value)?,
            Err(Error::NotFound(_)) => {
                let fresh = ShardConfig::standalone();
                if !join_pending {
                    persist_config(&store, &fresh)?;
                }
                fresh
            }
            Err(e) => return Err(e),
        };

        let coordinator = Arc::new(Self {
            store,
            peers,
            heartbeats,
            config: RwLock::new(config),
        });
        for url in coordinator.snapshot().peer_urls() {
            coordinator.heartbeats.watch(&url);
        }
        Ok(coordinator)
    }

    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    pub fn snapshot(&self) -> ShardConfig {
        self.config.read().expect("shard config lock poisoned").clone()
    }

    fn persist_snapshot(&self, snapshot: &ShardConfig) -> Result<()> {
        persist_config(&self.store, snapshot)
    }

    // === Join ===

    /// Enter an existing cluster through `introducer_url`. Must run after
    /// the local HTTP listener is serving: announcing `/new` makes every
    /// peer reshard, which sends records back to this node.
    pub async fn join(&self, introducer_url: &str, this_url: &str) -> Result<()> {
        tracing::info!(introducer = %introducer_url, "joining cluster");

        let mut joined = self.peers.fetch_config(introducer_url).await?;
        let introducer_id = joined.self_id().to_string();
        if introducer_id.is_empty() {
            return Err(Error::MalformedPayload(
                "introducer returned a config with no self shard".into(),
            ));
        }
        joined
            .shard_urls
            .insert(introducer_id, introducer_url.to_string());

        // Every member of the cluster must be reachable before the
        // topology grows.
        for url in joined.peer_urls() {
            if HeartbeatMonitor::probe(self.peers.http(), &url).await.is_none() {
                return Err(Error::ShardDown(url));
            }
        }

        let self_id = self.snapshot().self_id().to_string();
        joined.shards.push(self_id.clone());
        joined.i_am = joined.shards.len() - 1;
        joined.active_shards.push(self_id.clone());

        {
            let mut config = self.config.write().expect("shard config lock poisoned");
            *config = joined.clone();
        }
        self.persist_snapshot(&joined)?;
        for url in joined.peer_urls() {
            self.heartbeats.watch(&url);
        }

        // Replay the cluster's catalog (schema only, never records).
        // `__internal` is per-shard state and stays out of the replay.
        let databases = self.peers.fetch_catalog(introducer_url).await?;
        for database in databases {
            if database.name == INTERNAL_DATABASE {
                continue;
            }
            absorb_exists(self.store.create_database(&database.name))?;
            for table in &database.tables {
                absorb_exists(self.store.create_table(&database.name, &table.name))?;
                for index in &table.indexes {
                    absorb_exists(self.store.create_index(
                        &database.name,
                        &table.name,
                        &index.name,
                        &index.keys,
                    ))?;
                }
            }
        }

        for url in joined.peer_urls() {
            self.peers.announce_new(&url, &self_id, this_url).await?;
        }
        for url in joined.peer_urls() {
            self.peers.announce_ready(&url, &self_id).await?;
        }

        tracing::info!(shard_id = %self_id, peers = joined.peer_urls().len(), "joined cluster");
        Ok(())
    }

    /// A new peer announced itself: record it and reshard.
    pub async fn handle_new_shard(&self, shard_id: &str, shard_url: &str) -> Result<()> {
        let snapshot = {
            let mut config = self.config.write().expect("shard config lock poisoned");
            if !config.shards.iter().any(|s| s == shard_id) {
                config.shards.push(shard_id.to_string());
            }
            config
                .shard_urls
                .insert(shard_id.to_string(), shard_url.to_string());
            config.clone()
        };
        self.persist_snapshot(&snapshot)?;
        self.heartbeats.watch(shard_url);
        tracing::info!(shard_id, shard_url, "new shard registered, resharding");
        self.reshard().await
    }

    /// A peer finished joining: mark it active.
    pub fn handle_shard_ready(&self, shard_id: &str) -> Result<()> {
        let snapshot = {
            let mut config = self.config.write().expect("shard config lock poisoned");
            if !config.active_shards.iter().any(|s| s == shard_id) {
                config.active_shards.push(shard_id.to_string());
            }
            config.clone()
        };
        self.persist_snapshot(&snapshot)?;
        tracing::info!(shard_id, "shard marked active");
        Ok(())
    }

    // === Resharding ===

    /// Re-evaluate placement for every local record; records this shard no
    /// longer owns are transmitted to their new owners and then removed
    /// locally. The local copy survives any transmit failure.
    pub async fn reshard(&self) -> Result<()> {
        let snapshot = self.snapshot();
        let self_id = snapshot.self_id().to_string();
        let mut moved = 0usize;

        // Snapshot the database list; the catalog lock is not held while
        // records move.
        let databases = self.store.catalog().database_names();
        for db in databases {
            if db == INTERNAL_DATABASE {
                continue;
            }
            let Some(database) = self.store.database(&db) else {
                continue;
            };
            for table in &database.tables {
                let keys = self.store.table_keys(&db, &table.name)?;
                for key in keys {
                    let targets = placement(
                        &key,
                        &snapshot.shards,
                        snapshot.replicas(&db, &table.name),
                    );
                    if targets.iter().any(|t| t == &self_id) {
                        continue;
                    }

                    let item = self.store.get(&db, &table.name, &key)?;
                    for target in &targets {
                        let url = snapshot
                            .url_for(target)
                            .ok_or_else(|| Error::ShardDown(target.clone()))?;
                        self.peers
                            .insert_absorb_conflict(url, &db, &table.name, &key, &item)
                            .await?;
                    }
                    // Only after every new owner holds the record.
                    self.store.delete_record(&db, &table.name, &key)?;
                    moved += 1;
                }
            }
        }

        tracing::info!(moved, "reshard complete");
        Ok(())
    }

    // === Record operations ===

    fn liveness_gate(&self) -> Result<()> {
        if self.heartbeats.all_alive() {
            Ok(())
        } else {
            let down = self
                .heartbeats
                .first_down()
                .unwrap_or_else(|| "unknown peer".to_string());
            Err(Error::ShardDown(down))
        }
    }

    /// Insert a record on every shard of its placement set.
    pub async fn insert(&self, db: &str, table: &str, key: &str, item: &Value) -> Result<()> {
        self.liveness_gate()?;
        let snapshot = self.snapshot();
        let targets = placement(key, &snapshot.shards, snapshot.replicas(db, table));

        for target in &targets {
            match snapshot.url_for(target) {
                None => self.store.insert(db, table, key, item)?,
                Some(url) => self.peers.insert(url, db, table, key, item).await?,
            }
        }
        Ok(())
    }

    /// Read a record, serving locally when this shard is in the placement
    /// set, otherwise forwarding to the live replica with the lowest
    /// observed latency.
    pub async fn get(&self, db: &str, table: &str, item: &str) -> Result<Value> {
        let snapshot = self.snapshot();
        let targets = placement(item, &snapshot.shards, snapshot.replicas(db, table));

        if targets.iter().any(|t| snapshot.url_for(t).is_none()) {
            return self.store.get(db, table, item);
        }

        // Prefer the replica with the lowest measured latency; a replica
        // that has not been probed yet is not offline, just unranked.
        let mut best: Option<(&str, u64)> = None;
        let mut unranked: Option<&str> = None;
        for target in &targets {
            let Some(url) = snapshot.url_for(target) else {
                continue;
            };
            match self.heartbeats.latency(url) {
                Some(Some(latency)) => {
                    if best.map_or(true, |(_, b)| latency < b) {
                        best = Some((url, latency));
                    }
                }
                Some(None) => {}
                None => {
                    unranked.get_or_insert(url);
                }
            }
        }

        let url = best.map(|(url, _)| url).or(unranked).ok_or(Error::AllReplicasDown)?;
        self.peers.get(url, db, table, item).await
    }

    /// Delete a record from every shard of its placement set.
    pub async fn delete_record(&self, db: &str, table: &str, item: &str) -> Result<()> {
        self.liveness_gate()?;
        let snapshot = self.snapshot();
        let targets = placement(item, &snapshot.shards, snapshot.replicas(db, table));

        for target in &targets {
            match snapshot.url_for(target) {
                None => self.store.delete_record(db, table, item)?,
                Some(url) => self.peers.delete_record(url, db, table, item).await?,
            }
        }
        Ok(())
    }

    /// Union of this table's keys across the whole cluster.
    pub async fn table_keys(&self, db: &str, table: &str) -> Result<Vec<String>> {
        self.liveness_gate()?;
        let mut keys = self.store.table_keys(db, table)?;
        let snapshot = self.snapshot();
        for url in snapshot.peer_urls() {
            keys.extend(self.peers.table_keys(&url, db, table).await?);
        }

        // Replicated records appear once per holding shard; dedupe.
        let mut seen = HashSet::new();
        keys.retain(|k| seen.insert(k.clone()));
        Ok(keys)
    }

    // === DDL fan-out ===

    pub async fn create_database(&self, db: &str) -> Result<()> {
        self.liveness_gate()?;
        self.store.create_database(db)?;
        let snapshot = self.snapshot();
        for url in snapshot.peer_urls() {
            self.peers.create_database(&url, db).await?;
        }
        Ok(())
    }

    pub async fn create_table(&self, db: &str, table: &str) -> Result<()> {
        self.liveness_gate()?;
        self.store.create_table(db, table)?;
        let snapshot = self.snapshot();
        for url in snapshot.peer_urls() {
            self.peers.create_table(&url, db, table).await?;
        }
        Ok(())
    }

    pub async fn create_index(
        &self,
        db: &str,
        table: &str,
        index: &str,
        keys: &[String],
    ) -> Result<()> {
        self.liveness_gate()?;
        self.store.create_index(db, table, index, keys)?;
        let snapshot = self.snapshot();
        for url in snapshot.peer_urls() {
            self.peers.create_index(&url, db, table, index, keys).await?;
        }
        Ok(())
    }

    pub async fn delete_database(&self, db: &str) -> Result<()> {
        self.liveness_gate()?;
        self.store.delete_database(db)?;
        let snapshot = self.snapshot();
        for url in snapshot.peer_urls() {
            self.peers.delete_database(&url, db).await?;
        }
        Ok(())
    }

    pub async fn delete_table(&self, db: &str, table: &str) -> Result<()> {
        self.liveness_gate()?;
        self.store.delete_table(db, table)?;
        let snapshot = self.snapshot();
        for url in snapshot.peer_urls() {
            self.peers.delete_table(&url, db, table).await?;
        }
        Ok(())
    }

    pub async fn delete_index(&self, db: &str, table: &str, index: &str) -> Result<()> {
        self.liveness_gate()?;
        self.store.delete_index(db, table, index)?;
        let snapshot = self.snapshot();
        for url in snapshot.peer_urls() {
            self.peers.delete_index(&url, db, table, index).await?;
        }
        Ok(())
    }

    /// Ensure the system database and its tokens table exist cluster-wide.
    pub async fn bootstrap_system_database(&self) -> Result<()> {
        if self.store.database(SYSTEM_DATABASE).is_none() {
            self.create_database(SYSTEM_DATABASE).await?;
        }
        if self.store.table(SYSTEM_DATABASE, crate::SYSTEM_TOKENS_TABLE).is_none() {
            self.create_table(SYSTEM_DATABASE, crate::SYSTEM_TOKENS_TABLE)
                .await?;
        }
        Ok(())
    }
}

fn persist_config(store: &RecordStore, config: &ShardConfig) -> Result<()> {
    match store.delete_record(INTERNAL_DATABASE, SHARDING_TABLE, CONFIG_RECORD) {
        Ok(()) | Err(Error::NotFound(_)) => {}
        Err(e) => return Err(e),
    }
    store.insert(
        INTERNAL_DATABASE,
        SHARDING_TABLE,
        CONFIG_RECORD,
        &serde_json::to_value(config)?,
    )
}

fn absorb_exists(result: Result<()>) -> Result<()> {
    match result {
        Ok(()) | Err(Error::AlreadyExists(_)) => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::cache::ValueCache;
    use crate::common::config::DEFAULT_CACHE_BYTES;
    use crate::store::catalog::Catalog;
    use tempfile::tempdir;

    #[test]
    fn test_standalone_config_shape() {
        let config = ShardConfig::standalone();
        assert_eq!(config.shards.len(), 1);
        assert_eq!(config.active_shards, config.shards);
        assert_eq!(config.i_am, 0);
        assert!(config.shard_urls.is_empty());
        assert_eq!(config.self_id(), config.shards[0]);
    }

    #[test]
    fn test_config_wire_names() {
        let config = ShardConfig {
            shards: vec!["a".into()],
            active_shards: vec!["a".into()],
            shard_urls: HashMap::new(),
            i_am: 0,
            replica_config: HashMap::new(),
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"s": ["a"], "as": ["a"], "su": {}, "iam": 0, "r": {}})
        );

        let parsed: ShardConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.self_id(), "a");
    }

    #[test]
    fn test_replica_lookup_defaults_to_one() {
        let mut config = ShardConfig::standalone();
        assert_eq!(config.replicas("db", "tbl"), 1);

        config
            .replica_config
            .entry("db".into())
            .or_default()
            .insert("tbl".into(), 3);
        assert_eq!(config.replicas("db", "tbl"), 3);
        assert_eq!(config.replicas("db", "other"), 1);

        // A configured zero still means one copy.
        config
            .replica_config
            .entry("db".into())
            .or_default()
            .insert("zero".into(), 0);
        assert_eq!(config.replicas("db", "zero"), 1);
    }

    #[test]
    fn test_url_for_self_is_none() {
        let mut config = ShardConfig::standalone();
        let self_id = config.self_id().to_string();
        config.shard_urls.insert("peer".into(), "http://p".into());
        config.shard_urls.insert(self_id.clone(), String::new());

        assert!(config.url_for(&self_id).is_none());
        assert_eq!(config.url_for("peer"), Some("http://p"));
        assert_eq!(config.peer_urls(), vec!["http://p".to_string()]);
    }

    #[tokio::test]
    async fn test_init_persists_standalone_config() {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(dir.path()).unwrap());
        let cache = Arc::new(ValueCache::new(DEFAULT_CACHE_BYTES));
        let store = Arc::new(RecordStore::new(catalog, cache));

        let coordinator = Coordinator::init(
            store.clone(),
            PeerClient::new(""),
            Arc::new(HeartbeatMonitor::new()),
            false,
        )
        .unwrap();
        let first_id = coordinator.snapshot().self_id().to_string();
        assert!(!first_id.is_empty());

        // The identity is durable across restarts.
        drop(coordinator);
        let coordinator = Coordinator::init(
            store,
            PeerClient::new(""),
            Arc::new(HeartbeatMonitor::new()),
            false,
        )
        .unwrap();
        assert_eq!(coordinator.snapshot().self_id(), first_id);
    }

    #[tokio::test]
    async fn test_single_shard_round_trip() {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(dir.path()).unwrap());
        let cache = Arc::new(ValueCache::new(DEFAULT_CACHE_BYTES));
        let store = Arc::new(RecordStore::new(catalog, cache));
        let coordinator = Coordinator::init(
            store,
            PeerClient::new(""),
            Arc::new(HeartbeatMonitor::new()),
            false,
        )
        .unwrap();

        coordinator.create_database("foo").await.unwrap();
        coordinator.create_table("foo", "bar").await.unwrap();
        coordinator
            .insert("foo", "bar", "k1", &serde_json::json!({"x": 1}))
            .await
            .unwrap();

        assert_eq!(
            coordinator.get("foo", "bar", "k1").await.unwrap(),
            serde_json::json!({"x": 1})
        );
        assert_eq!(
            coordinator.table_keys("foo", "bar").await.unwrap(),
            vec!["k1"]
        );

        coordinator.delete_record("foo", "bar", "k1").await.unwrap();
        assert!(coordinator.get("foo", "bar", "k1").await.is_err());
    }

    #[tokio::test]
    async fn test_ready_marks_shard_active() {
        let dir = tempdir().unwrap();
        let catalog = Arc::new(Catalog::open(dir.path()).unwrap());
        let cache = Arc::new(ValueCache::new(DEFAULT_CACHE_BYTES));
        let store = Arc::new(RecordStore::new(catalog, cache));
        let coordinator = Coordinator::init(
            store.clone(),
            PeerClient::new(""),
            Arc::new(HeartbeatMonitor::new()),
            false,
        )
        .unwrap();

        coordinator.handle_shard_ready("other-shard").unwrap();
        let snapshot = coordinator.snapshot();
        assert!(snapshot.active_shards.iter().any(|s| s == "other-shard"));

        // Persisted too.
        let on_disk = store
            .get(INTERNAL_DATABASE, SHARDING_TABLE, CONFIG_RECORD)
            .unwrap();
        let parsed: ShardConfig = serde_json::from_value(on_disk).unwrap();
        assert!(parsed.active_shards.iter().any(|s| s == "other-shard"));
    }
}
