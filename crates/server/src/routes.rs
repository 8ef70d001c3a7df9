//! HTTP surface of a node.
//!
//! | Route                              | Purpose                                   |
//! |------------------------------------|-------------------------------------------|
//! | `GET/PUT/DELETE /s/{ns}/{kind}`    | Shard protocol, answered by [`ShardNode`] |
//! | `GET /admin/namespaces`            | Open namespace environments               |
//! | `DELETE /admin/namespaces/{ns}`    | Close one namespace environment           |
//! | `POST /v1/mutations`               | Entity mutation notification (origin)     |
//! | `POST /v1/query`                   | Routed query (origin)                     |
//! | `GET /health`                      | Liveness                                  |

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use snafu::ResultExt;
use tagindex_router::{
    EntityIndexer, HttpTransport, ShardMethod, ShardNode, ShardParams, ShardRequest, ShardResponse,
    ShardRouter, WriteBody,
};
use tagindex_storage::NamespaceRegistry;
use tagindex_types::{EntityMutation, IndexError, IndexKind, NamespaceId, QueryRequest};
use tracing::{debug, info, warn};

use crate::{
    config::{Config, OriginConfig},
    error::{OriginSnafu, ServerError},
};

/// Shared state of the HTTP handlers.
#[derive(Clone)]
pub struct AppState {
    /// Local shard service.
    pub node: Arc<ShardNode>,
    /// Origin-side indexer, when configured.
    pub indexer: Option<Arc<EntityIndexer<HttpTransport>>>,
}

impl AppState {
    /// Builds the local shard service and, if configured, the origin stack.
    ///
    /// Must be called within a tokio runtime when `origin` is set.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Origin`] if the HTTP transport cannot be built.
    pub fn from_config(config: &Config) -> Result<Self, ServerError> {
        let registry = Arc::new(NamespaceRegistry::new(config.store.clone()));
        let node = Arc::new(ShardNode::new(registry));
        let indexer = match &config.origin {
            Some(origin) => {
                Some(Arc::new(build_indexer(origin, config.store.term_max_length)?))
            },
            None => None,
        };
        Ok(Self { node, indexer })
    }

    /// Drains pending fan-out calls and closes every namespace environment.
    pub async fn shutdown(&self) {
        if let Some(indexer) = &self.indexer {
            indexer.router().shutdown().await;
        }
        self.node.registry().close_all();
    }
}

fn build_indexer(
    origin: &OriginConfig,
    term_max_length: usize,
) -> Result<EntityIndexer<HttpTransport>, ServerError> {
    let transport = HttpTransport::new(origin.dispatch.request_timeout).context(OriginSnafu)?;
    let router =
        ShardRouter::new(origin.sharding.clone(), origin.dispatch.clone(), Arc::new(transport));
    info!(
        items = origin.policy.items.len(),
        tenants = origin.sharding.tenants.len(),
        "origin indexing enabled"
    );
    Ok(EntityIndexer::new(origin.policy.clone(), Arc::new(router), term_max_length))
}

/// Builds the router over `state`.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/s/{namespace}/{kind}", get(shard_call).put(shard_call).delete(shard_call))
        .route("/admin/namespaces", get(list_namespaces))
        .route("/admin/namespaces/{namespace}", delete(close_namespace))
        .route("/v1/mutations", post(apply_mutation))
        .route("/v1/query", post(run_query))
        .with_state(state)
}

fn reply(response: ShardResponse) -> Response {
    let status =
        StatusCode::from_u16(response.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response)).into_response()
}

fn failure(err: &IndexError) -> Response {
    reply(ShardResponse::failed(err))
}

async fn health() -> &'static str {
    "ok"
}

fn decode_request(
    method: &Method,
    namespace: String,
    kind: &str,
    params: Result<Query<ShardParams>, QueryRejection>,
    body: &[u8],
) -> Result<ShardRequest, IndexError> {
    let method = if *method == Method::GET {
        ShardMethod::Get
    } else if *method == Method::PUT {
        ShardMethod::Put
    } else if *method == Method::DELETE {
        ShardMethod::Delete
    } else {
        return Err(IndexError::invalid_input(format!("unsupported method {method}")));
    };
    let namespace = NamespaceId::new(namespace)?;
    let kind: IndexKind = kind.parse()?;
    let Query(params) =
        params.map_err(|e| IndexError::invalid_input(format!("bad query string: {e}")))?;
    let body = if body.is_empty() {
        None
    } else {
        let body: WriteBody = serde_json::from_slice(body).map_err(|e| IndexError::Serialization {
            message: format!("write body: {e}"),
            location: snafu::location!(),
        })?;
        Some(body)
    };
    Ok(ShardRequest { method, namespace, kind, params, body })
}

async fn shard_call(
    State(state): State<AppState>,
    method: Method,
    Path((namespace, kind)): Path<(String, String)>,
    params: Result<Query<ShardParams>, QueryRejection>,
    body: Bytes,
) -> Response {
    let request = match decode_request(&method, namespace, &kind, params, &body) {
        Ok(request) => request,
        Err(err) => {
            debug!(%method, kind = %kind, error = %err, "rejecting shard call");
            return failure(&err);
        },
    };
    let node = Arc::clone(&state.node);
    match tokio::task::spawn_blocking(move || node.handle(request)).await {
        Ok(response) => reply(response),
        Err(e) => failure(&IndexError::Environment {
            message: format!("shard task failed: {e}"),
            location: snafu::location!(),
        }),
    }
}

async fn list_namespaces(State(state): State<AppState>) -> Json<Vec<NamespaceId>> {
    let mut namespaces = state.node.registry().namespaces();
    namespaces.sort();
    Json(namespaces)
}

async fn close_namespace(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> Response {
    let namespace = match NamespaceId::new(namespace) {
        Ok(namespace) => namespace,
        Err(err) => return failure(&err),
    };
    if state.node.registry().close_namespace(&namespace) {
        info!(%namespace, "namespace closed");
        StatusCode::NO_CONTENT.into_response()
    } else {
        StatusCode::NOT_FOUND.into_response()
    }
}

fn origin_disabled() -> Response {
    let err = IndexError::Config { message: "origin indexing is not configured".to_string() };
    (StatusCode::NOT_FOUND, Json(ShardResponse::failed(&err))).into_response()
}

/// Routing failures map to 502; everything else keeps its shard status.
fn origin_failure(err: &IndexError) -> Response {
    let status = match err {
        IndexError::ShardUnresolved { .. } | IndexError::Transport { .. } => StatusCode::BAD_GATEWAY,
        _ => return failure(err),
    };
    (status, Json(ShardResponse::failed(err))).into_response()
}

async fn apply_mutation(
    State(state): State<AppState>,
    Json(mutation): Json<EntityMutation>,
) -> Response {
    let Some(indexer) = &state.indexer else {
        return origin_disabled();
    };
    match indexer.on_mutation(&mutation).await {
        Ok(queued) => {
            (StatusCode::ACCEPTED, Json(serde_json::json!({ "queued": queued }))).into_response()
        },
        Err(err) => {
            warn!(entity = %mutation.entity_uri, error = %err, "mutation not indexed");
            origin_failure(&err)
        },
    }
}

async fn run_query(State(state): State<AppState>, Json(query): Json<QueryRequest>) -> Response {
    let Some(indexer) = &state.indexer else {
        return origin_disabled();
    };
    match indexer.query(&query).await {
        Ok(result) => Json(result).into_response(),
        Err(err) => origin_failure(&err),
    }
}
