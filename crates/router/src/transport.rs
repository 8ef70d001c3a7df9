//! Shard call transports.
//!
//! [`HttpTransport`] sends calls to remote nodes with reqwest. [`LocalTransport`]
//! routes them to in-process [`ShardNode`]s, for tests and single-process setups.

use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};

use parking_lot::{Mutex, RwLock};
use tagindex_types::IndexError;
use tracing::debug;
use url::Url;

use crate::{
    protocol::{ShardMethod, ShardRequest, ShardResponse},
    service::ShardNode,
};

/// Delivers a shard call to a node and returns its reply.
pub trait ShardTransport: Send + Sync + 'static {
    /// Sends `request` to `node`.
    ///
    /// A reply reporting a shard-side failure is returned as `Ok`; only
    /// delivery failures are errors.
    fn call(
        &self,
        node: &Url,
        request: ShardRequest,
    ) -> impl Future<Output = Result<ShardResponse, IndexError>> + Send;
}

fn transport_error(node: &Url, message: impl Into<String>) -> IndexError {
    IndexError::Transport { node: node.to_string(), message: message.into() }
}

/// JSON-over-HTTP transport.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a transport whose calls time out after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Config`] if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, IndexError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexError::Config { message: format!("http client: {e}") })?;
        Ok(Self { client })
    }
}

impl ShardTransport for HttpTransport {
    async fn call(&self, node: &Url, request: ShardRequest) -> Result<ShardResponse, IndexError> {
        let mut url = node.clone();
        url.set_path(&request.path());
        let query = request.query_string();
        url.set_query((!query.is_empty()).then_some(query.as_str()));

        let method = match request.method {
            ShardMethod::Get => reqwest::Method::GET,
            ShardMethod::Put => reqwest::Method::PUT,
            ShardMethod::Delete => reqwest::Method::DELETE,
        };
        debug!(node = %node, request = %request.request_line(), "shard call");

        let mut builder = self.client.request(method, url);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        let response = builder.send().await.map_err(|e| transport_error(node, e.to_string()))?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| transport_error(node, e.to_string()))?;
        // Error statuses still carry a ShardResponse::Failed body.
        serde_json::from_slice(&bytes).map_err(|e| {
            transport_error(node, format!("unreadable {status} response: {e}"))
        })
    }
}

/// In-process transport over registered [`ShardNode`]s.
///
/// Requests pass through a JSON round trip so they see the same encoding as
/// HTTP calls. Every delivered request line is recorded.
#[derive(Default)]
pub struct LocalTransport {
    nodes: RwLock<HashMap<Url, Arc<ShardNode>>>,
    calls: Mutex<Vec<(Url, String)>>,
}

impl LocalTransport {
    /// Creates a transport with no nodes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `node` reachable at `url`.
    pub fn register(&self, url: Url, node: Arc<ShardNode>) {
        self.nodes.write().insert(url, node);
    }

    /// Node registered at `url`.
    #[must_use]
    pub fn node(&self, url: &Url) -> Option<Arc<ShardNode>> {
        self.nodes.read().get(url).cloned()
    }

    /// Delivered `(node, request line)` pairs, oldest first.
    #[must_use]
    pub fn calls(&self) -> Vec<(Url, String)> {
        self.calls.lock().clone()
    }
}

impl ShardTransport for LocalTransport {
    async fn call(&self, node: &Url, request: ShardRequest) -> Result<ShardResponse, IndexError> {
        let Some(target) = self.node(node) else {
            return Err(transport_error(node, "no such node"));
        };
        let wire = serde_json::to_vec(&request).map_err(|e| transport_error(node, e.to_string()))?;
        let request: ShardRequest =
            serde_json::from_slice(&wire).map_err(|e| transport_error(node, e.to_string()))?;
        self.calls.lock().push((node.clone(), request.request_line()));

        tokio::task::spawn_blocking(move || target.handle(request))
            .await
            .map_err(|e| transport_error(node, format!("shard task failed: {e}")))
    }
}
