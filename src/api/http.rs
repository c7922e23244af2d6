//! External HTTP API
//!
//! The `/v1` surface clients talk to. Every route requires a `Token-Auth`
//! header naming a capability token; the middleware resolves it to an
//! [`AccessControl`] (a cluster read against `remixdb.tokens`) and stashes
//! it in request extensions. Responses always use the
//! `{"error": ..., "data": ...}` envelope.

use axum::{
    body::Body,
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::api::acl::{is_valid_token, AccessControl};
use crate::cluster::coordinator::Coordinator;
use crate::common::error::Error;
use crate::{INTERNAL_DATABASE, SYSTEM_DATABASE, SYSTEM_TOKENS_TABLE};

pub const AUTH_HEADER: &str = "Token-Auth";

#[derive(Clone)]
pub struct ApiState {
    pub coordinator: Arc<Coordinator>,
}

#[derive(Debug, Serialize)]
struct Envelope {
    error: Option<String>,
    data: Option<Value>,
}

fn ok(data: Option<Value>) -> Response {
    (
        StatusCode::OK,
        Json(Envelope { error: None, data }),
    )
        .into_response()
}

fn fail(error: &Error) -> Response {
    if !error.is_expected() {
        tracing::error!(error = %error, "request failed");
    }
    (
        error.to_http_status(),
        Json(Envelope {
            error: Some(error.to_string()),
            data: None,
        }),
    )
        .into_response()
}

fn unauthorized() -> Response {
    fail(&Error::Unauthorized)
}

/// `__internal` never crosses the external API.
fn reserved(db: &str) -> Option<Response> {
    if db == INTERNAL_DATABASE {
        Some(fail(&Error::MalformedPayload(format!(
            "The \"{INTERNAL_DATABASE}\" database is reserved for shard-private state."
        ))))
    } else {
        None
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/v1/record/:db/:table/:item", get(get_record))
        .route("/v1/record/:db/:table/:item", post(create_record))
        .route("/v1/record/:db/:table/:item", delete(delete_record))
        .route("/v1/database/:db", get(get_database))
        .route("/v1/database/:db", put(put_database))
        .route("/v1/database/:db", delete(delete_database))
        .route("/v1/table/:db/:table", get(get_table))
        .route("/v1/table/:db/:table", put(put_table))
        .route("/v1/table/:db/:table", delete(delete_table))
        .route("/v1/table/:db/:table/keys", get(table_keys))
        .route_layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .with_state(state)
}

/// Resolve `Token-Auth` into an [`AccessControl`] or reject with 403.
async fn authenticate(
    State(state): State<ApiState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let Some(token) = request
        .headers()
        .get(AUTH_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
    else {
        return unauthorized();
    };
    if !is_valid_token(&token) {
        return unauthorized();
    }

    let record = match state
        .coordinator
        .get(SYSTEM_DATABASE, SYSTEM_TOKENS_TABLE, &token)
        .await
    {
        Ok(record) => record,
        Err(_) => return unauthorized(),
    };
    let Ok(grant) = serde_json::from_value::<AccessControl>(record) else {
        return unauthorized();
    };

    request.extensions_mut().insert(grant);
    next.run(request).await
}

// === Records ===

async fn get_record(
    State(state): State<ApiState>,
    Extension(grant): Extension<AccessControl>,
    Path((db, table, item)): Path<(String, String, String)>,
) -> Response {
    if let Some(response) = reserved(&db) {
        return response;
    }
    if !grant.resolve(&db, Some(&table)).can_read() {
        return unauthorized();
    }
    match state.coordinator.get(&db, &table, &item).await {
        Ok(value) => ok(Some(value)),
        Err(e) => fail(&e),
    }
}

async fn create_record(
    State(state): State<ApiState>,
    Extension(grant): Extension<AccessControl>,
    Path((db, table, item)): Path<(String, String, String)>,
    Json(value): Json<Value>,
) -> Response {
    if let Some(response) = reserved(&db) {
        return response;
    }
    let rights = grant.resolve(&db, Some(&table));
    if !rights.can_write() {
        return unauthorized();
    }
    // Writes into the system database need admin on top of write.
    if db == SYSTEM_DATABASE && !rights.can_admin() {
        return unauthorized();
    }
    match state.coordinator.insert(&db, &table, &item, &value).await {
        Ok(()) => ok(None),
        Err(e) => fail(&e),
    }
}

async fn delete_record(
    State(state): State<ApiState>,
    Extension(grant): Extension<AccessControl>,
    Path((db, table, item)): Path<(String, String, String)>,
) -> Response {
    if let Some(response) = reserved(&db) {
        return response;
    }
    let rights = grant.resolve(&db, Some(&table));
    if !rights.can_write() {
        return unauthorized();
    }
    if db == SYSTEM_DATABASE && !rights.can_admin() {
        return unauthorized();
    }
    match state.coordinator.delete_record(&db, &table, &item).await {
        Ok(()) => ok(None),
        Err(e) => fail(&e),
    }
}

// === Databases ===

async fn get_database(
    State(state): State<ApiState>,
    Extension(grant): Extension<AccessControl>,
    Path(db): Path<String>,
) -> Response {
    if let Some(response) = reserved(&db) {
        return response;
    }
    if !grant.resolve(&db, None).can_read() {
        return unauthorized();
    }
    match state.coordinator.store().database(&db) {
        Some(spec) => match serde_json::to_value(&spec) {
            Ok(value) => ok(Some(value)),
            Err(e) => fail(&e.into()),
        },
        None => fail(&Error::database_not_found(&db)),
    }
}

async fn put_database(
    State(state): State<ApiState>,
    Extension(grant): Extension<AccessControl>,
    Path(db): Path<String>,
) -> Response {
    if let Some(response) = reserved(&db) {
        return response;
    }
    if !grant.resolve(&db, None).can_create() {
        return unauthorized();
    }
    match state.coordinator.create_database(&db).await {
        Ok(()) => ok(None),
        Err(e) => fail(&e),
    }
}

async fn delete_database(
    State(state): State<ApiState>,
    Extension(grant): Extension<AccessControl>,
    Path(db): Path<String>,
) -> Response {
    if let Some(response) = reserved(&db) {
        return response;
    }
    let rights = grant.resolve(&db, None);
    if !rights.can_create() {
        return unauthorized();
    }
    // Dropping the system database takes admin.
    if db == SYSTEM_DATABASE && !rights.can_admin() {
        return unauthorized();
    }
    match state.coordinator.delete_database(&db).await {
        Ok(()) => ok(None),
        Err(e) => fail(&e),
    }
}

// === Tables ===

async fn get_table(
    State(state): State<ApiState>,
    Extension(grant): Extension<AccessControl>,
    Path((db, table)): Path<(String, String)>,
) -> Response {
    if let Some(response) = reserved(&db) {
        return response;
    }
    if !grant.resolve(&db, Some(&table)).can_read() {
        return unauthorized();
    }
    match state.coordinator.store().table(&db, &table) {
        Some(spec) => match serde_json::to_value(&spec) {
            Ok(value) => ok(Some(value)),
            Err(e) => fail(&e.into()),
        },
        None => fail(&Error::table_not_found(&table)),
    }
}

async fn put_table(
    State(state): State<ApiState>,
    Extension(grant): Extension<AccessControl>,
    Path((db, table)): Path<(String, String)>,
) -> Response {
    if let Some(response) = reserved(&db) {
        return response;
    }
    if !grant.resolve(&db, Some(&table)).can_create() {
        return unauthorized();
    }
    match state.coordinator.create_table(&db, &table).await {
        Ok(()) => ok(None),
        Err(e) => fail(&e),
    }
}

async fn delete_table(
    State(state): State<ApiState>,
    Extension(grant): Extension<AccessControl>,
    Path((db, table)): Path<(String, String)>,
) -> Response {
    if let Some(response) = reserved(&db) {
        return response;
    }
    let rights = grant.resolve(&db, Some(&table));
    if !rights.can_create() {
        return unauthorized();
    }
    if db == SYSTEM_DATABASE && !rights.can_admin() {
        return unauthorized();
    }
    match state.coordinator.delete_table(&db, &table).await {
        Ok(()) => ok(None),
        Err(e) => fail(&e),
    }
}

async fn table_keys(
    State(state): State<ApiState>,
    Extension(grant): Extension<AccessControl>,
    Path((db, table)): Path<(String, String)>,
) -> Response {
    if let Some(response) = reserved(&db) {
        return response;
    }
    if !grant.resolve(&db, Some(&table)).can_read() {
        return unauthorized();
    }
    match state.coordinator.table_keys(&db, &table).await {
        Ok(keys) => match serde_json::to_value(keys) {
            Ok(value) => ok(Some(value)),
            Err(e) => fail(&e.into()),
        },
        Err(e) => fail(&e),
    }
}
