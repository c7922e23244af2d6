//! Configuration for a remixdb node

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default HTTP port for both the external API and intra-cluster RPC.
pub const DEFAULT_PORT: u16 = 7010;

/// Default soft cap of the in-memory value cache.
pub const DEFAULT_CACHE_BYTES: usize = 100_000_000;

/// Node configuration
///
/// The cluster fields mirror the environment variables a deployment sets:
/// `INNER_CLUSTER_TOKEN`, `OTHER_SHARD_URL`, `THIS_SHARD_URL`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bind port for the HTTP listener
    #[serde(default = "default_port")]
    pub port: u16,

    /// Data root; the `structure` file and `dbs/` tree live here
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Shared secret for intra-cluster RPC
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inner_cluster_token: Option<String>,

    /// URL of an existing cluster member to join through
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_shard_url: Option<String>,

    /// URL peers can reach this node at
    #[serde(skip_serializing_if = "Option::is_none")]
    pub this_shard_url: Option<String>,

    /// Value cache soft cap in bytes
    #[serde(default = "default_cache_bytes")]
    pub cache_bytes: usize,

    /// Full-rights token seeded into `remixdb.tokens` on first boot
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin_token: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./remixdb_data")
}

fn default_cache_bytes() -> usize {
    DEFAULT_CACHE_BYTES
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: default_port(),
            data_dir: default_data_dir(),
            inner_cluster_token: None,
            other_shard_url: None,
            this_shard_url: None,
            cache_bytes: default_cache_bytes(),
            admin_token: None,
        }
    }
}

impl Config {
    /// Build a config from the process environment.
    pub fn from_env() -> Self {
        let non_empty = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        Self {
            inner_cluster_token: non_empty("INNER_CLUSTER_TOKEN"),
            other_shard_url: non_empty("OTHER_SHARD_URL"),
            this_shard_url: non_empty("THIS_SHARD_URL"),
            admin_token: non_empty("REMIXDB_ADMIN_TOKEN"),
            ..Self::default()
        }
    }

    /// Joining an existing cluster requires both the shared token and an
    /// introducer URL; with either missing the node boots standalone.
    pub fn join_target(&self) -> Option<(&str, &str)> {
        match (&self.inner_cluster_token, &self.other_shard_url) {
            (Some(token), Some(url)) => Some((token.as_str(), url.as_str())),
            _ => None,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.other_shard_url.is_some() && self.inner_cluster_token.is_none() {
            return Err(crate::Error::MalformedPayload(
                "OTHER_SHARD_URL is set but INNER_CLUSTER_TOKEN is empty".into(),
            ));
        }
        if self.other_shard_url.is_some() && self.this_shard_url.is_none() {
            return Err(crate::Error::MalformedPayload(
                "joining a cluster requires THIS_SHARD_URL so peers can call back".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 7010);
        assert_eq!(config.cache_bytes, 100_000_000);
        assert!(config.join_target().is_none());
    }

    #[test]
    fn test_join_target_requires_both() {
        let mut config = Config {
            inner_cluster_token: Some("secret".into()),
            ..Config::default()
        };
        assert!(config.join_target().is_none());

        config.other_shard_url = Some("http://peer:7010".into());
        assert_eq!(config.join_target(), Some(("secret", "http://peer:7010")));
    }

    #[test]
    fn test_validate_rejects_partial_cluster_config() {
        let config = Config {
            other_shard_url: Some("http://peer:7010".into()),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            inner_cluster_token: Some("secret".into()),
            other_shard_url: Some("http://peer:7010".into()),
            this_shard_url: Some("http://me:7010".into()),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
