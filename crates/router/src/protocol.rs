//! Shard wire protocol.
//!
//! Every shard call targets `/s/{namespace}/{kind}`:
//!
//! ```text
//! PUT    /s/acme/index?partial=true            body: WriteBody
//! DELETE /s/acme/index?id=/docs/a&delete=true  body: WriteBody
//! GET    /s/acme/index?parent=/docs&item=title&op=eq&value=foo&limit=2&next=AQ..
//! ```
//!
//! Responses are a JSON [`ShardResponse`].

use serde::{Deserialize, Serialize};
use tagindex_types::{
    ErrorCode, FetchResult, IndexEntry, IndexError, IndexKind, NamespaceId, Operator,
};
use url::form_urlencoded;

/// HTTP method of a shard call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShardMethod {
    /// Query.
    Get,
    /// Add or replace an entity's records.
    Put,
    /// Remove an entity's records.
    Delete,
}

impl ShardMethod {
    /// Method name as sent on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ShardMethod::Get => "GET",
            ShardMethod::Put => "PUT",
            ShardMethod::Delete => "DELETE",
        }
    }
}

/// Query-string parameters of a shard call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardParams {
    /// Only the touched items are replaced or removed.
    #[serde(default)]
    pub partial: bool,
    /// The call removes records.
    #[serde(default)]
    pub delete: bool,
    /// Entity URI of a delete.
    #[serde(default)]
    pub id: Option<String>,
    /// Parent path of a query.
    #[serde(default)]
    pub parent: Option<String>,
    /// Item name of a query.
    #[serde(default)]
    pub item: Option<String>,
    /// Operator of a query.
    #[serde(default)]
    pub op: Option<Operator>,
    /// Rendered comparison value or full-text query text.
    #[serde(default)]
    pub value: Option<String>,
    /// DISTKEY item of a query.
    #[serde(default)]
    pub dk_item: Option<String>,
    /// DISTKEY value of a query.
    #[serde(default)]
    pub dk_value: Option<String>,
    /// Page size.
    #[serde(default)]
    pub limit: Option<u32>,
    /// Resume pointer.
    #[serde(default)]
    pub next: Option<String>,
    /// Return only the match count.
    #[serde(default)]
    pub count: bool,
}

impl ShardParams {
    /// Parameters in wire order, omitting unset ones.
    #[must_use]
    pub fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        let flags = [("partial", self.partial), ("delete", self.delete), ("count", self.count)];
        let texts = [
            ("id", &self.id),
            ("parent", &self.parent),
            ("item", &self.item),
            ("value", &self.value),
            ("dk_item", &self.dk_item),
            ("dk_value", &self.dk_value),
        ];
        for (name, value) in texts {
            if let Some(value) = value {
                pairs.push((name, value.clone()));
            }
        }
        if let Some(op) = self.op {
            pairs.push(("op", op.as_str().to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        if let Some(next) = &self.next {
            pairs.push(("next", next.clone()));
        }
        for (name, set) in flags {
            if set {
                pairs.push((name, "true".to_string()));
            }
        }
        pairs
    }
}

/// Body of a write call: one entity's records for one node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteBody {
    /// Entity URI.
    pub entity_uri: String,
    /// Records this node should hold for the entity. Empty for deletes.
    #[serde(default)]
    pub entries: Vec<IndexEntry>,
    /// Full item names (`parent#item`) touched by a partial call.
    #[serde(default)]
    pub touched_items: Vec<String>,
}

/// One shard call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRequest {
    /// HTTP method.
    pub method: ShardMethod,
    /// Tenant namespace.
    pub namespace: NamespaceId,
    /// Index family.
    pub kind: IndexKind,
    /// Query-string parameters.
    #[serde(default)]
    pub params: ShardParams,
    /// Write body for `PUT` and `DELETE`.
    #[serde(default)]
    pub body: Option<WriteBody>,
}

impl ShardRequest {
    /// A `PUT` replacing the entity's records on the node.
    #[must_use]
    pub fn put(namespace: NamespaceId, kind: IndexKind, body: WriteBody, partial: bool) -> Self {
        let params = ShardParams { partial, ..ShardParams::default() };
        Self { method: ShardMethod::Put, namespace, kind, params, body: Some(body) }
    }

    /// A `DELETE` removing the entity's records on the node.
    #[must_use]
    pub fn delete(namespace: NamespaceId, kind: IndexKind, body: WriteBody, partial: bool) -> Self {
        let params = ShardParams {
            partial,
            delete: true,
            id: Some(body.entity_uri.clone()),
            ..ShardParams::default()
        };
        Self { method: ShardMethod::Delete, namespace, kind, params, body: Some(body) }
    }

    /// A `GET` query.
    #[must_use]
    pub fn query(namespace: NamespaceId, kind: IndexKind, params: ShardParams) -> Self {
        Self { method: ShardMethod::Get, namespace, kind, params, body: None }
    }

    /// Request path: `/s/{namespace}/{kind}`.
    #[must_use]
    pub fn path(&self) -> String {
        format!("/s/{}/{}", self.namespace, self.kind.as_str())
    }

    /// URL-encoded query string.
    #[must_use]
    pub fn query_string(&self) -> String {
        form_urlencoded::Serializer::new(String::new()).extend_pairs(self.params.pairs()).finish()
    }

    /// `METHOD path?query`, as logged and sent.
    #[must_use]
    pub fn request_line(&self) -> String {
        let query = self.query_string();
        if query.is_empty() {
            format!("{} {}", self.method.as_str(), self.path())
        } else {
            format!("{} {}?{}", self.method.as_str(), self.path(), query)
        }
    }
}

/// Reply of a shard call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ShardResponse {
    /// A query page.
    Fetched {
        /// The page.
        result: FetchResult,
    },
    /// A write was applied.
    Applied {
        /// Records added.
        added: usize,
        /// Records removed.
        removed: usize,
    },
    /// The call failed on the shard.
    Failed {
        /// Numeric [`ErrorCode`].
        code: u16,
        /// Error description.
        message: String,
    },
}

impl ShardResponse {
    /// Wraps an error raised on the shard.
    #[must_use]
    pub fn failed(err: &IndexError) -> Self {
        ShardResponse::Failed { code: err.code().as_u16(), message: err.to_string() }
    }

    /// HTTP status the server answers with.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            ShardResponse::Fetched { .. } | ShardResponse::Applied { .. } => 200,
            ShardResponse::Failed { code, .. } => match ErrorCode::from_u16(*code) {
                Some(ErrorCode::RequestInvalidInput | ErrorCode::RequestSerialization) => 400,
                Some(
                    ErrorCode::StorageLockConflict
                    | ErrorCode::StorageRetryExceeded
                    | ErrorCode::StorageEnvironment,
                ) => 503,
                _ => 500,
            },
        }
    }

    /// Converts a failure into the error it reports.
    ///
    /// # Errors
    ///
    /// Returns the shard's error, mapped back onto the taxonomy.
    pub fn into_result(self, node: &str, namespace: &NamespaceId) -> Result<Self, IndexError> {
        let ShardResponse::Failed { code, message } = self else {
            return Ok(self);
        };
        let err = match ErrorCode::from_u16(code) {
            Some(ErrorCode::RequestInvalidInput) => IndexError::InvalidInput { message },
            Some(ErrorCode::StorageRetryExceeded) => {
                IndexError::RetryExceeded { namespace: namespace.clone(), attempts: 0, message }
            },
            Some(ErrorCode::StorageLockConflict) => {
                IndexError::LockConflict { namespace: namespace.clone(), message }
            },
            Some(ErrorCode::StorageEnvironment) => {
                IndexError::Environment { message, location: snafu::location!() }
            },
            Some(ErrorCode::StorageCorruption) => {
                IndexError::Corruption { message, location: snafu::location!() }
            },
            Some(ErrorCode::RequestConfig) => IndexError::Config { message },
            _ => IndexError::Transport { node: node.to_string(), message: format!("{code}: {message}") },
        };
        Err(err)
    }
}
