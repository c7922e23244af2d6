//! Cluster coordination: placement, liveness, peer RPC, and fan-out

pub mod client;
pub mod coordinator;
pub mod heartbeat;
pub mod http;
pub mod placement;

pub use client::PeerClient;
pub use coordinator::{Coordinator, ShardConfig};
pub use heartbeat::HeartbeatMonitor;
pub use placement::placement;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire envelope for intra-cluster record responses: `{error, data}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShardEnvelope {
    pub error: Option<String>,
    pub data: Option<Value>,
}

impl ShardEnvelope {
    pub fn ok(data: Option<Value>) -> Self {
        Self { error: None, data }
    }

    pub fn error(error: &crate::Error) -> Self {
        Self {
            error: Some(error.to_string()),
            data: None,
        }
    }
}
