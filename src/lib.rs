//! # remixdb
//!
//! A sharded, document-oriented key-value database:
//! - Records are arbitrary JSON values under `(database, table, record)` keys
//! - Filesystem-backed storage with an in-memory FIFO value cache
//! - Segmented secondary indexes with a bounded resident hot segment
//! - Deterministic key placement with per-table replication across peers
//! - Capability tokens with database- and table-level overrides
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   /v1/*    ┌─────────────────────────────┐
//! │  Clients   ├───────────►│  API surface (Token-Auth)    │
//! └────────────┘            └──────────────┬──────────────┘
//!                                          │
//! ┌────────────┐  /_shard/* ┌──────────────▼──────────────┐
//! │   Peers    ├───────────►│  Coordinator                 │
//! └────────────┘            │  placement · fan-out · reads │
//!                           └──────────────┬──────────────┘
//!                                          │
//!                           ┌──────────────▼──────────────┐
//!                           │  Record store                │
//!                           │  catalog · cache · indexes   │
//!                           └─────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ### Start a standalone node
//! ```bash
//! remixdb --data-dir ./remixdb_data --admin-token my-root-token
//! ```
//!
//! ### Join an existing cluster
//! ```bash
//! INNER_CLUSTER_TOKEN=secret \
//! OTHER_SHARD_URL=http://node-a:7010 \
//! THIS_SHARD_URL=http://node-b:7010 \
//! remixdb --data-dir ./remixdb_data
//! ```

pub mod api;
pub mod cluster;
pub mod common;
pub mod server;
pub mod store;

// Re-export commonly used types
pub use common::{Config, Error, Result};
pub use server::Server;

/// System database holding cluster-visible state (capability tokens).
pub const SYSTEM_DATABASE: &str = "remixdb";

/// Table of capability tokens inside [`SYSTEM_DATABASE`].
pub const SYSTEM_TOKENS_TABLE: &str = "tokens";

/// Shard-private database; never exposed through the external API and
/// never replicated.
pub const INTERNAL_DATABASE: &str = "__internal";

/// Current version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
