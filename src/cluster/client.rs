//! Outbound intra-cluster RPC client
//!
//! Thin typed wrapper over reqwest for everything one shard asks of
//! another. Every request carries the shared `Inner-Cluster-Token` header;
//! path segments are percent-encoded so arbitrary database, table, and
//! record names survive the URL.

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde_json::Value;
use std::time::Duration;

use crate::cluster::coordinator::ShardConfig;
use crate::cluster::ShardEnvelope;
use crate::common::error::{Error, Result};
use crate::store::catalog::DatabaseSpec;

pub const CLUSTER_TOKEN_HEADER: &str = "Inner-Cluster-Token";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Characters escaped inside a URL path segment.
const SEGMENT: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

fn seg(raw: &str) -> String {
    utf8_percent_encode(raw, SEGMENT).to_string()
}

#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    token: String,
}

impl PeerClient {
    pub fn new(token: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("failed to build peer HTTP client");
        Self {
            http,
            token: token.into(),
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    fn url(base: &str, path: &str) -> String {
        format!("{}{}", base.trim_end_matches('/'), path)
    }

    fn get_req(&self, base: &str, path: &str) -> reqwest::RequestBuilder {
        self.http
            .get(Self::url(base, path))
            .header(CLUSTER_TOKEN_HEADER, &self.token)
    }

    fn post_req(&self, base: &str, path: &str) -> reqwest::RequestBuilder {
        self.http
            .post(Self::url(base, path))
            .header(CLUSTER_TOKEN_HEADER, &self.token)
    }

    async fn expect_success(base: &str, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(Error::PeerRejected {
            url: base.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    // === Join-time RPCs ===

    pub async fn fetch_config(&self, base: &str) -> Result<ShardConfig> {
        let response = self.get_req(base, "/_shard/config").send().await?;
        let response = Self::expect_success(base, response).await?;
        Ok(response.json().await?)
    }

    pub async fn fetch_catalog(&self, base: &str) -> Result<Vec<DatabaseSpec>> {
        let response = self.get_req(base, "/_shard/dbs").send().await?;
        let response = Self::expect_success(base, response).await?;
        Ok(response.json().await?)
    }

    pub async fn announce_new(&self, base: &str, shard_id: &str, shard_url: &str) -> Result<()> {
        let body = serde_json::json!({ "ShardID": shard_id, "ShardURL": shard_url });
        let response = self.post_req(base, "/_shard/new").json(&body).send().await?;
        Self::expect_success(base, response).await?;
        Ok(())
    }

    pub async fn announce_ready(&self, base: &str, shard_id: &str) -> Result<()> {
        let path = format!("/_shard/ready/{}", seg(shard_id));
        let response = self.get_req(base, &path).send().await?;
        Self::expect_success(base, response).await?;
        Ok(())
    }

    // === Record RPCs ===

    pub async fn insert(
        &self,
        base: &str,
        db: &str,
        table: &str,
        key: &str,
        item: &Value,
    ) -> Result<()> {
        let body = serde_json::json!({
            "DB": db,
            "Table": table,
            "Key": key,
            "Item": item,
        });
        let response = self
            .post_req(base, "/_shard/insert")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let envelope: std::result::Result<ShardEnvelope, _> = response.json().await;
        let message = envelope
            .ok()
            .and_then(|e| e.error)
            .unwrap_or_else(|| format!("status {status}"));
        if status == reqwest::StatusCode::CONFLICT {
            return Err(Error::AlreadyExists(message));
        }
        Err(Error::PeerRejected {
            url: base.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    /// Insert during resharding: the record may already live on the target
    /// (status 409), which counts as success.
    pub async fn insert_absorb_conflict(
        &self,
        base: &str,
        db: &str,
        table: &str,
        key: &str,
        item: &Value,
    ) -> Result<()> {
        match self.insert(base, db, table, key, item).await {
            Err(Error::AlreadyExists(_)) => Ok(()),
            other => other,
        }
    }

    pub async fn get(&self, base: &str, db: &str, table: &str, item: &str) -> Result<Value> {
        let path = format!("/_shard/get/{}/{}/{}", seg(db), seg(table), seg(item));
        let response = self.get_req(base, &path).send().await?;
        let response = Self::expect_success(base, response).await?;
        let envelope: ShardEnvelope = response.json().await?;
        match envelope.error {
            Some(message) => Err(Error::NotFound(message)),
            None => Ok(envelope.data.unwrap_or(Value::Null)),
        }
    }

    pub async fn table_keys(&self, base: &str, db: &str, table: &str) -> Result<Vec<String>> {
        let path = format!("/_shard/table_keys/{}/{}", seg(db), seg(table));
        let response = self.get_req(base, &path).send().await?;
        let response = Self::expect_success(base, response).await?;
        Ok(response.json().await?)
    }

    pub async fn delete_record(&self, base: &str, db: &str, table: &str, key: &str) -> Result<()> {
        let path = format!(
            "/_shard/delete_record/{}/{}/{}",
            seg(db),
            seg(table),
            seg(key)
        );
        let response = self.get_req(base, &path).send().await?;
        Self::expect_success(base, response).await?;
        Ok(())
    }

    // === DDL fan-out RPCs ===
    //
    // Peers apply these to their local catalog and deliberately swallow
    // local errors, so any non-2xx here means transport or auth trouble.

    pub async fn create_database(&self, base: &str, db: &str) -> Result<()> {
        let path = format!("/_shard/new_db/{}", seg(db));
        let response = self.get_req(base, &path).send().await?;
        Self::expect_success(base, response).await?;
        Ok(())
    }

    pub async fn create_table(&self, base: &str, db: &str, table: &str) -> Result<()> {
        let path = format!("/_shard/new_table/{}/{}", seg(db), seg(table));
        let response = self.get_req(base, &path).send().await?;
        Self::expect_success(base, response).await?;
        Ok(())
    }

    pub async fn create_index(
        &self,
        base: &str,
        db: &str,
        table: &str,
        index: &str,
        keys: &[String],
    ) -> Result<()> {
        let encoded_keys = serde_json::to_string(keys)?;
        let path = format!(
            "/_shard/new_index/{}/{}/{}/{}",
            seg(db),
            seg(table),
            seg(index),
            seg(&encoded_keys)
        );
        let response = self.get_req(base, &path).send().await?;
        Self::expect_success(base, response).await?;
        Ok(())
    }

    pub async fn delete_database(&self, base: &str, db: &str) -> Result<()> {
        let path = format!("/_shard/delete_db/{}", seg(db));
        let response = self.get_req(base, &path).send().await?;
        Self::expect_success(base, response).await?;
        Ok(())
    }

    pub async fn delete_table(&self, base: &str, db: &str, table: &str) -> Result<()> {
        let path = format!("/_shard/delete_table/{}/{}", seg(db), seg(table));
        let response = self.get_req(base, &path).send().await?;
        Self::expect_success(base, response).await?;
        Ok(())
    }

    pub async fn delete_index(&self, base: &str, db: &str, table: &str, index: &str) -> Result<()> {
        let path = format!(
            "/_shard/delete_index/{}/{}/{}",
            seg(db),
            seg(table),
            seg(index)
        );
        let response = self.get_req(base, &path).send().await?;
        Self::expect_success(base, response).await?;
        Ok(())
    }
}
