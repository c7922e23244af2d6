//! Node lifecycle: init → serve → shutdown
//!
//! `init` wires the storage engine and coordinator together from a
//! [`Config`]; `serve` binds the single HTTP listener (intra-cluster and
//! external routes merged) and then completes bootstrap - joining a
//! cluster has to happen *after* the listener is up, because peers reshard
//! records back to the new node while the join runs.

use std::sync::Arc;

use crate::api::acl::{is_valid_token, AccessControl};
use crate::api::http::{self as api_http, ApiState};
use crate::cluster::client::PeerClient;
use crate::cluster::coordinator::{Coordinator, CONFIG_RECORD, SHARDING_TABLE};
use crate::cluster::heartbeat::HeartbeatMonitor;
use crate::cluster::http::{self as cluster_http, ClusterState};
use crate::common::cache::ValueCache;
use crate::common::config::Config;
use crate::common::error::{Error, Result};
use crate::store::catalog::Catalog;
use crate::store::records::RecordStore;
use crate::{INTERNAL_DATABASE, SYSTEM_DATABASE, SYSTEM_TOKENS_TABLE};

pub struct Server {
    config: Config,
    coordinator: Arc<Coordinator>,
    heartbeats: Arc<HeartbeatMonitor>,
    needs_join: bool,
}

impl Server {
    pub fn init(config: Config) -> Result<Self> {
        config.validate()?;

        let cache = Arc::new(ValueCache::new(config.cache_bytes));
        let catalog = Arc::new(Catalog::open(&config.data_dir)?);
        let store = Arc::new(RecordStore::new(catalog, cache));

        let token = config.inner_cluster_token.clone().unwrap_or_default();
        let peers = PeerClient::new(token);
        let heartbeats = Arc::new(HeartbeatMonitor::new());

        // A node joins at most once: only when it has no persisted shard
        // identity yet and a join target is configured.
        let fresh_boot = matches!(
            store.get(INTERNAL_DATABASE, SHARDING_TABLE, CONFIG_RECORD),
            Err(Error::NotFound(_))
        );
        let needs_join = fresh_boot && config.join_target().is_some();

        let coordinator = Coordinator::init(store, peers, heartbeats.clone(), needs_join)?;

        tracing::info!(
            data_dir = %config.data_dir.display(),
            shard_id = %coordinator.snapshot().self_id(),
            "storage engine initialised"
        );

        Ok(Self {
            config,
            coordinator,
            heartbeats,
            needs_join,
        })
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    /// The merged HTTP surface: `/_shard/*` for peers, `/v1/*` for clients.
    pub fn router(&self) -> axum::Router {
        let cluster_state = ClusterState {
            coordinator: self.coordinator.clone(),
            token: self.config.inner_cluster_token.clone().unwrap_or_default(),
        };
        let api_state = ApiState {
            coordinator: self.coordinator.clone(),
        };
        cluster_http::router(cluster_state).merge(api_http::router(api_state))
    }

    /// Post-listener bootstrap: cluster join, system database, seed token.
    pub async fn bootstrap(&self) -> Result<()> {
        if self.needs_join {
            let (introducer, this_url) = match (
                self.config.other_shard_url.as_deref(),
                self.config.this_shard_url.as_deref(),
            ) {
                (Some(introducer), Some(this_url)) => (introducer.to_string(), this_url.to_string()),
                _ => {
                    return Err(Error::MalformedPayload(
                        "cluster join requires OTHER_SHARD_URL and THIS_SHARD_URL".into(),
                    ))
                }
            };
            self.coordinator.join(&introducer, &this_url).await?;
        }

        self.coordinator.bootstrap_system_database().await?;

        if let Some(token) = &self.config.admin_token {
            self.seed_admin_token(token).await?;
        }
        Ok(())
    }

    async fn seed_admin_token(&self, token: &str) -> Result<()> {
        if !is_valid_token(token) {
            return Err(Error::MalformedPayload(
                "admin token must match [0-9A-Za-z-]".into(),
            ));
        }
        match self
            .coordinator
            .get(SYSTEM_DATABASE, SYSTEM_TOKENS_TABLE, token)
            .await
        {
            Ok(_) => return Ok(()),
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let grant = serde_json::to_value(AccessControl::full_access())?;
        match self
            .coordinator
            .insert(SYSTEM_DATABASE, SYSTEM_TOKENS_TABLE, token, &grant)
            .await
        {
            Ok(()) | Err(Error::AlreadyExists(_)) => {
                tracing::info!("seeded bootstrap admin token");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn serve(self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(("0.0.0.0", self.config.port)).await?;
        self.serve_with_listener(listener).await
    }

    /// Serve on an already-bound listener. Tests bind port 0 and pass the
    /// listener in so the node's URL is known up front.
    pub async fn serve_with_listener(self, listener: tokio::net::TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        let app = self.router();
        tracing::info!(%addr, "serving");

        let server_task = tokio::spawn(async move { axum::serve(listener, app).await });

        if let Err(e) = self.bootstrap().await {
            self.shutdown();
            server_task.abort();
            return Err(e);
        }

        let result = server_task.await.map_err(|e| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("server task failed: {e}"),
            ))
        })?;
        self.shutdown();
        result.map_err(Error::from)
    }

    /// Cancel background work (heartbeat probes).
    pub fn shutdown(&self) {
        self.heartbeats.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_and_bootstrap_standalone() {
        let dir = tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            admin_token: Some("root-token".into()),
            ..Config::default()
        };

        let server = Server::init(config).unwrap();
        server.bootstrap().await.unwrap();

        let coordinator = server.coordinator();
        assert!(coordinator.store().database(SYSTEM_DATABASE).is_some());
        assert!(coordinator
            .store()
            .table(SYSTEM_DATABASE, SYSTEM_TOKENS_TABLE)
            .is_some());

        let grant = coordinator
            .store()
            .get(SYSTEM_DATABASE, SYSTEM_TOKENS_TABLE, "root-token")
            .unwrap();
        let grant: AccessControl = serde_json::from_value(grant).unwrap();
        assert!(grant.can_admin());

        // Bootstrap is idempotent.
        server.bootstrap().await.unwrap();
        server.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_admin_token_rejected() {
        let dir = tempdir().unwrap();
        let config = Config {
            data_dir: dir.path().to_path_buf(),
            admin_token: Some("bad/token".into()),
            ..Config::default()
        };

        let server = Server::init(config).unwrap();
        assert!(server.bootstrap().await.is_err());
        server.shutdown();
    }
}
