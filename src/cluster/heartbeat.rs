//! Peer liveness monitor
//!
//! One background task per peer probes `GET /_shard/ping` once a second and
//! records the observed latency in milliseconds, or `None` when the peer is
//! offline (connection failure or a non-204 response). Read routing and the
//! write liveness gate consult the latest observations; a failing peer never
//! delays probes of the others.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

const PROBE_INTERVAL: Duration = Duration::from_secs(1);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct HeartbeatMonitor {
    client: reqwest::Client,
    latencies: Arc<RwLock<HashMap<String, Option<u64>>>>,
    watched: Mutex<HashSet<String>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HeartbeatMonitor {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .expect("failed to build heartbeat HTTP client");
        Self {
            client,
            latencies: Arc::new(RwLock::new(HashMap::new())),
            watched: Mutex::new(HashSet::new()),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Probe a peer once, returning the round-trip latency in milliseconds,
    /// or `None` when the peer is offline.
    pub async fn probe(client: &reqwest::Client, url: &str) -> Option<u64> {
        let target = format!("{}/_shard/ping", url.trim_end_matches('/'));
        let start = Instant::now();
        let response = client.get(&target).send().await.ok()?;
        if response.status() != reqwest::StatusCode::NO_CONTENT {
            return None;
        }
        Some(start.elapsed().as_millis() as u64)
    }

    /// Start probing `url` at 1 Hz. Watching the same peer twice is a no-op.
    pub fn watch(&self, url: &str) {
        {
            let mut watched = self.watched.lock().expect("heartbeat lock poisoned");
            if !watched.insert(url.to_string()) {
                return;
            }
        }

        let client = self.client.clone();
        let latencies = self.latencies.clone();
        let url = url.to_string();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PROBE_INTERVAL);
            loop {
                ticker.tick().await;
                let latency = Self::probe(&client, &url).await;
                if latency.is_none() {
                    tracing::warn!(peer = %url, "shard is down");
                }
                latencies
                    .write()
                    .expect("heartbeat lock poisoned")
                    .insert(url.clone(), latency);
            }
        });
        self.tasks.lock().expect("heartbeat lock poisoned").push(handle);
    }

    /// Latest observation for a peer. Outer `None`: never probed.
    pub fn latency(&self, url: &str) -> Option<Option<u64>> {
        self.latencies
            .read()
            .expect("heartbeat lock poisoned")
            .get(url)
            .copied()
    }

    /// True when no watched peer is currently marked offline.
    pub fn all_alive(&self) -> bool {
        let latencies = self.latencies.read().expect("heartbeat lock poisoned");
        !latencies.values().any(|v| v.is_none())
    }

    /// First peer currently marked offline, for diagnostics.
    pub fn first_down(&self) -> Option<String> {
        let latencies = self.latencies.read().expect("heartbeat lock poisoned");
        latencies
            .iter()
            .find(|(_, v)| v.is_none())
            .map(|(url, _)| url.clone())
    }

    /// Stop all probe tasks. Called on shutdown.
    pub fn shutdown(&self) {
        let mut tasks = self.tasks.lock().expect("heartbeat lock poisoned");
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

impl Default for HeartbeatMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for HeartbeatMonitor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_alive_with_no_peers() {
        let monitor = HeartbeatMonitor::new();
        assert!(monitor.all_alive());
        assert!(monitor.first_down().is_none());
    }

    #[tokio::test]
    async fn test_probe_offline_peer() {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        // Nothing listens here.
        let latency = HeartbeatMonitor::probe(&client, "http://127.0.0.1:1").await;
        assert!(latency.is_none());
    }

    #[tokio::test]
    async fn test_probe_rejects_wrong_status() {
        use axum::routing::get;

        // A /_shard/ping that answers 200 instead of 204 counts as offline.
        let app = axum::Router::new().route("/_shard/ping", get(|| async { "ok" }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::new();
        let latency = HeartbeatMonitor::probe(&client, &format!("http://{addr}")).await;
        assert!(latency.is_none());
    }

    #[tokio::test]
    async fn test_watch_marks_down_peer() {
        let monitor = HeartbeatMonitor::new();
        monitor.watch("http://127.0.0.1:1");

        // First probe fires immediately; give it a moment to land.
        for _ in 0..50 {
            if monitor.latency("http://127.0.0.1:1") == Some(None) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert_eq!(monitor.latency("http://127.0.0.1:1"), Some(None));
        assert!(!monitor.all_alive());
        assert_eq!(monitor.first_down().as_deref(), Some("http://127.0.0.1:1"));
        monitor.shutdown();
    }
}
