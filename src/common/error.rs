//! Error types for remixdb

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // === I/O and codec errors ===
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // === Catalog / record errors ===
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    AlreadyExists(String),

    // === Cluster errors ===
    #[error("A shard is down: {0}")]
    ShardDown(String),

    #[error("All shards holding this record are down.")]
    AllReplicasDown,

    #[error("Peer {url} rejected the request with status {status}: {message}")]
    PeerRejected {
        url: String,
        status: u16,
        message: String,
    },

    // === Request errors ===
    #[error("Unauthorized.")]
    Unauthorized,

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

impl Error {
    pub fn database_not_found(name: &str) -> Self {
        Error::NotFound(format!("The database \"{name}\" does not exist."))
    }

    pub fn database_exists(name: &str) -> Self {
        Error::AlreadyExists(format!("The database \"{name}\" already exists."))
    }

    pub fn table_not_found(name: &str) -> Self {
        Error::NotFound(format!("The table \"{name}\" does not exist."))
    }

    pub fn table_exists(name: &str) -> Self {
        Error::AlreadyExists(format!("The table \"{name}\" already exists."))
    }

    pub fn index_not_found(name: &str) -> Self {
        Error::NotFound(format!("The index \"{name}\" does not exist."))
    }

    pub fn index_exists(name: &str) -> Self {
        Error::AlreadyExists(format!("The index \"{name}\" already exists."))
    }

    pub fn record_not_found() -> Self {
        Error::NotFound("The item specified does not exist.".to_string())
    }

    pub fn record_exists(key: &str) -> Self {
        Error::AlreadyExists(format!("The record \"{key}\" already exists."))
    }

    /// Expected errors surface to clients inside the response envelope;
    /// everything else is an infrastructure failure for that request.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            Error::NotFound(_)
                | Error::AlreadyExists(_)
                | Error::ShardDown(_)
                | Error::AllReplicasDown
                | Error::PeerRejected { .. }
                | Error::MalformedPayload(_)
                | Error::Unauthorized
        )
    }

    /// Convert to an HTTP status code for API responses
    pub fn to_http_status(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Error::Unauthorized => StatusCode::FORBIDDEN,
            Error::NotFound(_)
            | Error::AlreadyExists(_)
            | Error::ShardDown(_)
            | Error::AllReplicasDown
            | Error::PeerRejected { .. }
            | Error::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
