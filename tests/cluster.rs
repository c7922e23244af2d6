//! Two-node cluster tests: join, catalog replay, placement-routed
//! reads and writes, and resharding.

use remixdb::cluster::{placement, ShardConfig};
use remixdb::common::config::Config;
use remixdb::common::fskey;
use remixdb::Server;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

const SECRET: &str = "cluster-secret";
const ADMIN_TOKEN: &str = "root-token";
const AUTH_HEADER: &str = "Token-Auth";
const CLUSTER_HEADER: &str = "Inner-Cluster-Token";

/// Boot a node on an ephemeral port. `introducer` makes it join an
/// existing cluster.
async fn spawn_node(dir: &TempDir, introducer: Option<&str>) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let this_url = format!("http://{}", listener.local_addr().unwrap());

    let config = Config {
        data_dir: dir.path().to_path_buf(),
        inner_cluster_token: Some(SECRET.to_string()),
        other_shard_url: introducer.map(str::to_string),
        this_shard_url: Some(this_url.clone()),
        admin_token: Some(ADMIN_TOKEN.to_string()),
        ..Config::default()
    };
    let server = Server::init(config).unwrap();
    tokio::spawn(async move {
        let _ = server.serve_with_listener(listener).await;
    });
    this_url
}

async fn shard_config(client: &reqwest::Client, base: &str) -> ShardConfig {
    client
        .get(format!("{base}/_shard/config"))
        .header(CLUSTER_HEADER, SECRET)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

/// Wait until `base` reports `shards` cluster members and can resolve the
/// admin token.
async fn wait_for_cluster(client: &reqwest::Client, base: &str, shards: usize) {
    for _ in 0..400 {
        let config_ok = client
            .get(format!("{base}/_shard/config"))
            .header(CLUSTER_HEADER, SECRET)
            .send()
            .await
            .ok();
        if let Some(resp) = config_ok {
            if resp.status() == 200 {
                let config: ShardConfig = resp.json().await.unwrap();
                if config.shards.len() == shards {
                    let auth_ok = client
                        .get(format!("{base}/v1/table/remixdb/tokens"))
                        .header(AUTH_HEADER, ADMIN_TOKEN)
                        .send()
                        .await
                        .map(|r| r.status() == 200)
                        .unwrap_or(false);
                    if auth_ok {
                        return;
                    }
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("cluster did not converge at {base}");
}

/// Insert with retries to ride out heartbeat warm-up after a topology
/// change.
async fn insert_record(client: &reqwest::Client, base: &str, db: &str, table: &str, key: &str, value: &Value) {
    for _ in 0..100 {
        let resp = client
            .post(format!("{base}/v1/record/{db}/{table}/{key}"))
            .header(AUTH_HEADER, ADMIN_TOKEN)
            .json(value)
            .send()
            .await
            .unwrap();
        if resp.status() == 200 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("insert of {key} never succeeded");
}

fn record_file(dir: &TempDir, db: &str, table: &str, key: &str) -> std::path::PathBuf {
    dir.path()
        .join("dbs")
        .join(db)
        .join(table)
        .join("r")
        .join(fskey::encode(key))
}

/// First key of the form `key-N` that a one-replica placement assigns to
/// `shard_id`.
fn key_placed_on(shards: &[String], shard_id: &str) -> String {
    for i in 0..1000 {
        let key = format!("key-{i}");
        if placement(&key, shards, 1)[0] == shard_id {
            return key;
        }
    }
    panic!("no key found for shard {shard_id}");
}

fn exists_on_exactly_one(path_a: &Path, path_b: &Path) -> bool {
    path_a.exists() != path_b.exists()
}

#[tokio::test]
async fn test_two_node_cluster() {
    let dir_a = TempDir::new().unwrap();
    let dir_b = TempDir::new().unwrap();
    let client = reqwest::Client::new();

    let url_a = spawn_node(&dir_a, None).await;
    wait_for_cluster(&client, &url_a, 1).await;

    let url_b = spawn_node(&dir_b, Some(&url_a)).await;
    wait_for_cluster(&client, &url_a, 2).await;
    wait_for_cluster(&client, &url_b, 2).await;

    // Both nodes agree on the shard list; each knows itself by position.
    let config_a = shard_config(&client, &url_a).await;
    let config_b = shard_config(&client, &url_b).await;
    assert_eq!(config_a.shards, config_b.shards);
    let id_a = config_a.shards[config_a.i_am].clone();
    let id_b = config_b.shards[config_b.i_am].clone();
    assert_ne!(id_a, id_b);

    // The joiner is active on both sides.
    assert!(config_a.active_shards.contains(&id_b));
    assert!(config_b.active_shards.contains(&id_b));

    // DDL fans out: create on A, visible on B.
    for request in [
        client.put(format!("{url_a}/v1/database/foo")),
        client.put(format!("{url_a}/v1/table/foo/bar")),
    ] {
        let resp = request.header(AUTH_HEADER, ADMIN_TOKEN).send().await.unwrap();
        assert_eq!(resp.status(), 200);
    }
    let resp = client
        .get(format!("{url_b}/v1/database/foo"))
        .header(AUTH_HEADER, ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    // A record whose single replica lands on B, inserted at A: A holds no
    // file, B does, and reading at A transparently fetches from B.
    let key_b = key_placed_on(&config_a.shards, &id_b);
    insert_record(&client, &url_a, "foo", "bar", &key_b, &json!({"x": 42})).await;

    assert!(!record_file(&dir_a, "foo", "bar", &key_b).exists());
    assert!(record_file(&dir_b, "foo", "bar", &key_b).exists());

    let resp = client
        .get(format!("{url_a}/v1/record/foo/bar/{key_b}"))
        .header(AUTH_HEADER, ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["data"], json!({"x": 42}));

    // And the mirror case: a key owned by A, inserted at B.
    let key_a = key_placed_on(&config_a.shards, &id_a);
    insert_record(&client, &url_b, "foo", "bar", &key_a, &json!("on-a")).await;
    assert!(record_file(&dir_a, "foo", "bar", &key_a).exists());
    assert!(!record_file(&dir_b, "foo", "bar", &key_a).exists());

    // Table keys union both shards.
    let resp = client
        .get(format!("{url_a}/v1/table/foo/bar/keys"))
        .header(AUTH_HEADER, ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let mut keys: Vec<String> = body["data"]
        .as_array()
        .unwrap()
        .iter()
        .map(|k| k.as_str().unwrap().to_string())
        .collect();
    keys.sort();
    let mut expected = vec![key_a.clone(), key_b.clone()];
    expected.sort();
    assert_eq!(keys, expected);

    // Resharding honoured placement for the seeded admin token too: the
    // record lives on exactly its placement target.
    let token_file_a = record_file(&dir_a, "remixdb", "tokens", ADMIN_TOKEN);
    let token_file_b = record_file(&dir_b, "remixdb", "tokens", ADMIN_TOKEN);
    assert!(exists_on_exactly_one(&token_file_a, &token_file_b));
    let token_targets = placement(ADMIN_TOKEN, &config_a.shards, 1);
    if token_targets[0] == id_a {
        assert!(token_file_a.exists());
    } else {
        assert!(token_file_b.exists());
    }

    // Cluster-wide delete: remove the B-owned record through A.
    let resp = client
        .delete(format!("{url_a}/v1/record/foo/bar/{key_b}"))
        .header(AUTH_HEADER, ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(!record_file(&dir_b, "foo", "bar", &key_b).exists());
    let resp = client
        .get(format!("{url_a}/v1/record/foo/bar/{key_b}"))
        .header(AUTH_HEADER, ADMIN_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn test_cluster_rpc_requires_matching_token() {
    let dir = TempDir::new().unwrap();
    let client = reqwest::Client::new();
    let url = spawn_node(&dir, None).await;
    wait_for_cluster(&client, &url, 1).await;

    let resp = client
        .get(format!("{url}/_shard/config"))
        .header(CLUSTER_HEADER, "wrong-secret")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client.get(format!("{url}/_shard/config")).send().await.unwrap();
    assert_eq!(resp.status(), 403);

    let resp = client
        .get(format!("{url}/_shard/config"))
        .header(CLUSTER_HEADER, SECRET)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}
