//! Inbound intra-cluster RPC surface
//!
//! The `/_shard/*` routes peers invoke on each other. Everything except
//! `/_shard/ping` sits behind the `Inner-Cluster-Token` check; a node with
//! no configured token refuses all cluster RPC. Handlers operate on the
//! *local* store - fan-out already happened on the calling shard - and the
//! DDL handlers swallow local catalog errors so repeated or out-of-order
//! fan-outs stay harmless.

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::cluster::client::CLUSTER_TOKEN_HEADER;
use crate::cluster::coordinator::Coordinator;
use crate::cluster::ShardEnvelope;
use crate::common::error::Error;

#[derive(Clone)]
pub struct ClusterState {
    pub coordinator: Arc<Coordinator>,
    /// Shared secret peers must present; empty disables all cluster RPC.
    pub token: String,
}

pub fn router(state: ClusterState) -> Router {
    let protected = Router::new()
        .route("/_shard/config", get(shard_config))
        .route("/_shard/dbs", get(databases))
        .route("/_shard/new", post(new_shard))
        .route("/_shard/ready/:shard", get(shard_ready))
        .route("/_shard/insert", post(insert))
        .route("/_shard/get/:db/:table/:item", get(get_record))
        .route("/_shard/new_db/:db", get(new_db))
        .route("/_shard/new_table/:db/:table", get(new_table))
        .route("/_shard/new_index/:db/:table/:index/:keys", get(new_index))
        .route("/_shard/delete_db/:db", get(delete_db))
        .route("/_shard/delete_table/:db/:table", get(delete_table))
        .route("/_shard/delete_index/:db/:table/:index", get(delete_index))
        .route("/_shard/delete_record/:db/:table/:key", get(delete_record))
        .route("/_shard/table_keys/:db/:table", get(table_keys))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_cluster_token,
        ));

    Router::new()
        .route("/_shard/ping", get(ping))
        .merge(protected)
        .with_state(state)
}

async fn require_cluster_token(
    State(state): State<ClusterState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(CLUSTER_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());
    if state.token.is_empty() || presented != Some(state.token.as_str()) {
        return (StatusCode::FORBIDDEN, "Forbidden.").into_response();
    }
    next.run(request).await
}

async fn ping() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn shard_config(State(state): State<ClusterState>) -> impl IntoResponse {
    Json(state.coordinator.snapshot())
}

async fn databases(State(state): State<ClusterState>) -> impl IntoResponse {
    Json(state.coordinator.store().databases())
}

#[derive(Deserialize)]
struct NewShardRequest {
    #[serde(rename = "ShardID")]
    shard_id: String,
    #[serde(rename = "ShardURL")]
    shard_url: String,
}

async fn new_shard(
    State(state): State<ClusterState>,
    Json(request): Json<NewShardRequest>,
) -> Response {
    match state
        .coordinator
        .handle_new_shard(&request.shard_id, &request.shard_url)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "reshard after new-shard announcement failed");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn shard_ready(State(state): State<ClusterState>, Path(shard): Path<String>) -> Response {
    match state.coordinator.handle_shard_ready(&shard) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to persist active shard");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

#[derive(Deserialize)]
struct InsertRequest {
    #[serde(rename = "DB")]
    db: String,
    #[serde(rename = "Table")]
    table: String,
    #[serde(rename = "Key")]
    key: String,
    #[serde(rename = "Item")]
    item: Value,
}

async fn insert(State(state): State<ClusterState>, Json(request): Json<InsertRequest>) -> Response {
    let result = state
        .coordinator
        .store()
        .insert(&request.db, &request.table, &request.key, &request.item);
    match result {
        Ok(()) => (StatusCode::OK, Json(ShardEnvelope::ok(None))).into_response(),
        Err(e @ Error::AlreadyExists(_)) => {
            (StatusCode::CONFLICT, Json(ShardEnvelope::error(&e))).into_response()
        }
        Err(e) if e.is_expected() => {
            (StatusCode::BAD_REQUEST, Json(ShardEnvelope::error(&e))).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "local insert failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ShardEnvelope::error(&e)),
            )
                .into_response()
        }
    }
}

async fn get_record(
    State(state): State<ClusterState>,
    Path((db, table, item)): Path<(String, String, String)>,
) -> impl IntoResponse {
    match state.coordinator.store().get(&db, &table, &item) {
        Ok(value) => Json(ShardEnvelope::ok(Some(value))),
        Err(e) => Json(ShardEnvelope::error(&e)),
    }
}

async fn new_db(State(state): State<ClusterState>, Path(db): Path<String>) -> StatusCode {
    if let Err(e) = state.coordinator.store().create_database(&db) {
        tracing::debug!(db, error = %e, "fanned-out database create ignored");
    }
    StatusCode::NO_CONTENT
}

async fn new_table(
    State(state): State<ClusterState>,
    Path((db, table)): Path<(String, String)>,
) -> StatusCode {
    if let Err(e) = state.coordinator.store().create_table(&db, &table) {
        tracing::debug!(db, table, error = %e, "fanned-out table create ignored");
    }
    StatusCode::NO_CONTENT
}

async fn new_index(
    State(state): State<ClusterState>,
    Path((db, table, index, keys)): Path<(String, String, String, String)>,
) -> Response {
    let keys: Vec<String> = match serde_json::from_str(&keys) {
        Ok(keys) => keys,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                format!("index keys are not a JSON string array: {e}"),
            )
                .into_response()
        }
    };
    if let Err(e) = state.coordinator.store().create_index(&db, &table, &index, &keys) {
        tracing::debug!(db, table, index, error = %e, "fanned-out index create ignored");
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn delete_db(State(state): State<ClusterState>, Path(db): Path<String>) -> StatusCode {
    if let Err(e) = state.coordinator.store().delete_database(&db) {
        tracing::debug!(db, error = %e, "fanned-out database delete ignored");
    }
    StatusCode::NO_CONTENT
}

async fn delete_table(
    State(state): State<ClusterState>,
    Path((db, table)): Path<(String, String)>,
) -> StatusCode {
    if let Err(e) = state.coordinator.store().delete_table(&db, &table) {
        tracing::debug!(db, table, error = %e, "fanned-out table delete ignored");
    }
    StatusCode::NO_CONTENT
}

async fn delete_index(
    State(state): State<ClusterState>,
    Path((db, table, index)): Path<(String, String, String)>,
) -> StatusCode {
    if let Err(e) = state.coordinator.store().delete_index(&db, &table, &index) {
        tracing::debug!(db, table, index, error = %e, "fanned-out index delete ignored");
    }
    StatusCode::NO_CONTENT
}

async fn delete_record(
    State(state): State<ClusterState>,
    Path((db, table, key)): Path<(String, String, String)>,
) -> StatusCode {
    if let Err(e) = state.coordinator.store().delete_record(&db, &table, &key) {
        tracing::debug!(db, table, error = %e, "fanned-out record delete ignored");
    }
    StatusCode::NO_CONTENT
}

async fn table_keys(
    State(state): State<ClusterState>,
    Path((db, table)): Path<(String, String)>,
) -> Response {
    match state.coordinator.store().table_keys(&db, &table) {
        Ok(keys) => Json(keys).into_response(),
        Err(e) if e.is_expected() => {
            (StatusCode::BAD_REQUEST, Json(ShardEnvelope::error(&e))).into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "table keys listing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ShardEnvelope::error(&e)),
            )
                .into_response()
        }
    }
}
