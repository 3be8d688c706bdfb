//! Collection API Server
//!
//! HTTP surface over the local replica: submit signed entries and query
//! collections. Writes go through the replication agent, so an accepted
//! entry is gossiped to connected peers.

use crate::domain::entities::Entry;
use crate::domain::filter::Filter;
use crate::domain::value_objects::InsertOutcome;
use crate::replication::{ReplicationAgent, ReplicationError};
use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Health response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub address: String,
    pub peers: usize,
}

/// API Server state.
#[derive(Clone)]
pub struct ApiState {
    pub agent: Arc<ReplicationAgent>,
}

impl ApiState {
    pub fn new(agent: Arc<ReplicationAgent>) -> Self {
        Self { agent }
    }
}

/// HTTP server for collection reads and writes.
pub struct ApiServer {
    listen_addr: String,
    state: ApiState,
}

impl ApiServer {
    pub fn new(listen_addr: String, agent: Arc<ReplicationAgent>) -> Self {
        Self {
            listen_addr,
            state: ApiState::new(agent),
        }
    }

    /// Build the router.
    pub fn router(state: ApiState) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route(
                "/collection/:name",
                get(find_public_handler).post(insert_public_handler),
            )
            .route(
                "/collection/:name/:public_key",
                get(find_owned_handler).post(insert_owned_handler),
            )
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    /// Serve until `shutdown` resolves.
    #[cfg_attr(coverage_nightly, coverage(off))]
    pub async fn run<F>(&self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let app = Self::router(self.state.clone());

        let listener = TcpListener::bind(&self.listen_addr).await?;
        tracing::info!("collection API listening on {}", self.listen_addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }
}

/// Map an insert result to a status code and JSON body.
fn insert_response(result: Result<InsertOutcome, ReplicationError>) -> (StatusCode, Json<Value>) {
    match result {
        Ok(InsertOutcome::Inserted { inserted_id }) => {
            (StatusCode::CREATED, Json(json!({ "insertedId": inserted_id })))
        }
        Ok(InsertOutcome::AlreadyExists) => (StatusCode::OK, Json(json!({ "alreadyExists": true }))),
        Err(e) => {
            let status = match &e {
                ReplicationError::MalformedEntry(_) | ReplicationError::MissingOwner => {
                    StatusCode::BAD_REQUEST
                }
                ReplicationError::SignatureInvalid(_) => StatusCode::FORBIDDEN,
                ReplicationError::NotConnected => StatusCode::SERVICE_UNAVAILABLE,
                ReplicationError::Storage(_) | ReplicationError::QueryFailed(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            };
            (status, Json(json!({ "error": e.to_string() })))
        }
    }
}

/// Filter from a JSON body if one was sent, else string equality on the
/// query parameters.
fn request_filter(params: HashMap<String, String>, body: &[u8]) -> Option<Filter> {
    if body.iter().any(|b| !b.is_ascii_whitespace()) {
        let value: Value = serde_json::from_slice(body).ok()?;
        return Filter::from_value(value).ok();
    }

    let mut params: Vec<(String, String)> = params.into_iter().collect();
    params.sort();
    Some(
        params
            .into_iter()
            .fold(Filter::all(), |filter, (path, value)| filter.eq(path, value)),
    )
}

async fn insert(state: ApiState, name: String, public_key: Option<String>, body: Bytes) -> impl IntoResponse {
    let entry: Entry = match serde_json::from_slice(&body) {
        Ok(entry) => entry,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": format!("invalid entry: {}", e) })),
            )
        }
    };

    let result = state.agent.insert_one(&name, public_key.as_deref(), entry).await;
    if let Err(e) = &result {
        tracing::warn!("insert into {} rejected: {}", name, e);
    }
    insert_response(result)
}

async fn find(
    state: ApiState,
    name: String,
    public_key: Option<String>,
    params: HashMap<String, String>,
    body: Bytes,
) -> Json<Vec<Value>> {
    let Some(filter) = request_filter(params, &body) else {
        tracing::debug!("unparseable filter for {}, returning no documents", name);
        return Json(Vec::new());
    };

    match state.agent.find(&name, public_key.as_deref(), &filter).await {
        Ok(entries) => Json(entries.collect()),
        Err(e) => {
            tracing::warn!("find on {} failed: {}", name, e);
            Json(Vec::new())
        }
    }
}

// Handler functions

async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        address: state.agent.self_address(),
        peers: state.agent.connected_peers().len(),
    })
}

async fn insert_public_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    body: Bytes,
) -> impl IntoResponse {
    insert(state, name, None, body).await
}

async fn insert_owned_handler(
    State(state): State<ApiState>,
    Path((name, public_key)): Path<(String, String)>,
    body: Bytes,
) -> impl IntoResponse {
    insert(state, name, Some(public_key), body).await
}

async fn find_public_handler(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> impl IntoResponse {
    find(state, name, None, params, body).await
}

async fn find_owned_handler(
    State(state): State<ApiState>,
    Path((name, public_key)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> impl IntoResponse {
    find(state, name, Some(public_key), params, body).await
}
