//! Common utilities and types shared across remixdb

pub mod cache;
pub mod config;
pub mod error;
pub mod fskey;

pub use cache::ValueCache;
pub use config::{Config, DEFAULT_CACHE_BYTES, DEFAULT_PORT};
pub use error::{Error, Result};
