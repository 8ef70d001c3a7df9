//! Shard-side request handling.
//!
//! A [`ShardNode`] owns the node's namespace environments. It receives logical
//! index entries, shortens their names into node-local tokens, encodes keys and
//! applies the resulting delta, or compiles a query into a scan.

use std::{collections::BTreeSet, sync::Arc};

use tagindex_storage::{
    Condition, Delta, DeltaScope, IndexDiffEngine, NameKind, NamespaceRegistry, NamespaceStore,
    RangeQueryEngine, ScanPage, ScanRequest, ShorteningRegistry, Tables, TermQuery,
    decode_pointer, keys::encode_index_key, with_lock_retry,
};
use tagindex_types::{
    FetchResult, IndexEntry, IndexError, IndexKind, Operator, config::StoreConfig, item_name,
};
use tracing::{debug, instrument, warn};

use crate::{
    metrics,
    protocol::{ShardMethod, ShardParams, ShardRequest, ShardResponse, WriteBody},
};

/// Local index service of one shard node.
pub struct ShardNode {
    registry: Arc<NamespaceRegistry>,
    shortening: ShorteningRegistry,
    diff: IndexDiffEngine,
    scanner: RangeQueryEngine,
    config: StoreConfig,
}

impl ShardNode {
    /// Creates a node serving the environments of `registry`.
    #[must_use]
    pub fn new(registry: Arc<NamespaceRegistry>) -> Self {
        let config = registry.config().clone();
        Self {
            shortening: ShorteningRegistry::new(config.clone()),
            diff: IndexDiffEngine::new(config.clone()),
            scanner: RangeQueryEngine::new(config.fetch_limit),
            registry,
            config,
        }
    }

    /// The node's namespace registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<NamespaceRegistry> {
        &self.registry
    }

    /// Handles one shard call. Failures are reported in the response.
    #[instrument(skip_all, fields(method = request.method.as_str(), namespace = %request.namespace, kind = request.kind.as_str()))]
    pub fn handle(&self, request: ShardRequest) -> ShardResponse {
        match self.try_handle(&request) {
            Ok(response) => response,
            Err(err) => {
                warn!(request = %request.request_line(), error = %err, "shard call failed");
                ShardResponse::failed(&err)
            },
        }
    }

    fn try_handle(&self, request: &ShardRequest) -> Result<ShardResponse, IndexError> {
        let store = self.registry.get(&request.namespace)?;
        match request.method {
            ShardMethod::Get => {
                let result = self.query(&store, request.kind, &request.params)?;
                Ok(ShardResponse::Fetched { result })
            },
            ShardMethod::Put | ShardMethod::Delete => {
                let body = request.body.as_ref().ok_or_else(|| {
                    IndexError::invalid_input(format!("{} requires a body", request.method.as_str()))
                })?;
                let delete = request.method == ShardMethod::Delete || request.params.delete;
                self.write(&store, request.kind, body, request.params.partial, delete)
            },
        }
    }

    fn write(
        &self,
        store: &NamespaceStore,
        kind: IndexKind,
        body: &WriteBody,
        partial: bool,
        delete: bool,
    ) -> Result<ShardResponse, IndexError> {
        if body.entity_uri.is_empty() {
            return Err(IndexError::invalid_input("write body has no entity uri"));
        }

        let mut keys = Vec::with_capacity(body.entries.len());
        let mut written_tokens = BTreeSet::new();
        if !delete {
            for entry in &body.entries {
                let (token, key) = self.encode_entry(store, kind, &body.entity_uri, entry)?;
                written_tokens.insert(token);
                keys.push(key);
            }
        }

        let scope = if partial {
            let mut item_tokens = written_tokens;
            for name in &body.touched_items {
                // A name without a token was never indexed here.
                if let Some(token) = self.shortening.lookup_token(store, NameKind::Item, name)? {
                    item_tokens.insert(token);
                }
            }
            DeltaScope::Partial { item_tokens }
        } else {
            DeltaScope::Full
        };

        let delta = Delta::builder()
            .kind(kind)
            .entity_uri(body.entity_uri.as_str())
            .keys(keys)
            .scope(scope)
            .delete(delete)
            .build();
        let outcome = self.diff.apply_delta(store, &delta)?;
        metrics::record_delta(kind, outcome.committed);
        Ok(ShardResponse::Applied { added: outcome.added, removed: outcome.removed })
    }

    fn encode_entry(
        &self,
        store: &NamespaceStore,
        kind: IndexKind,
        entity_uri: &str,
        entry: &IndexEntry,
    ) -> Result<(String, Vec<u8>), IndexError> {
        if entry.kind != kind {
            return Err(IndexError::invalid_input(format!(
                "{} entry sent to the {} index",
                entry.kind.as_str(),
                kind.as_str()
            )));
        }
        if entry.entity_uri != entity_uri {
            return Err(IndexError::invalid_input(format!(
                "entry for {} in a write for {entity_uri}",
                entry.entity_uri
            )));
        }
        if entry.distkeys.len() > 1 {
            return Err(IndexError::invalid_input("entries must be split per distkey before routing"));
        }

        let token = self.shortening.get_or_create_token(store, NameKind::Item, &entry.item_name())?;
        let distkey = match entry.distkey() {
            Some(dk) => {
                let dk_token =
                    self.shortening.get_or_create_token(store, NameKind::Distkey, &dk.item)?;
                Some((dk_token, dk.value.as_str()))
            },
            None => None,
        };
        let key = encode_index_key(
            &token,
            &entry.value,
            distkey.as_ref().map(|(t, v)| (t.as_str(), *v)),
            &entry.self_id,
        )
        .map_err(|e| e.into_index_error(store.namespace()))?;
        Ok((token, key))
    }

    fn page_limit(&self, params: &ShardParams) -> Result<Option<usize>, IndexError> {
        if params.count {
            return Ok(None);
        }
        let limit = params.limit.unwrap_or(self.config.entry_count_default);
        if limit == 0 || limit > self.config.entry_count_limit {
            return Err(IndexError::invalid_input(format!(
                "limit {limit} outside 1..={}",
                self.config.entry_count_limit
            )));
        }
        Ok(Some(limit as usize))
    }

    fn query(
        &self,
        store: &NamespaceStore,
        kind: IndexKind,
        params: &ShardParams,
    ) -> Result<FetchResult, IndexError> {
        let limit = self.page_limit(params)?;
        let resume = match &params.next {
            Some(next) => decode_pointer(next)
                .map_err(|e| IndexError::invalid_input(format!("invalid pointer: {e}")))?,
            None => None,
        };
        let parent = params
            .parent
            .as_deref()
            .ok_or_else(|| IndexError::invalid_input("query requires a parent path"))?;
        let item = params.item.as_deref().unwrap_or_default();
        if kind != IndexKind::Manifest && item.is_empty() {
            return Err(IndexError::invalid_input(format!("{} query requires an item", kind.as_str())));
        }

        let empty = || FetchResult { count: params.count.then_some(0), ..FetchResult::empty() };
        let name = if kind == IndexKind::Manifest { parent.to_string() } else { item_name(parent, item) };
        let Some(token) = self.shortening.lookup_token(store, NameKind::Item, &name)? else {
            debug!(name = %name, "no token for queried item");
            return Ok(empty());
        };
        let distkey = match (&params.dk_item, &params.dk_value) {
            (Some(dk_item), Some(dk_value)) => {
                match self.shortening.lookup_token(store, NameKind::Distkey, dk_item)? {
                    Some(dk_token) => Some((dk_token, dk_value.clone())),
                    None => return Ok(empty()),
                }
            },
            (None, None) => None,
            _ => return Err(IndexError::invalid_input("dk_item and dk_value must be given together")),
        };

        let (table, _) = Tables::for_kind(kind);
        let namespace = store.namespace();
        let page: ScanPage = match kind {
            IndexKind::FullText => {
                if params.op.is_some_and(|op| op != Operator::FullText) {
                    return Err(IndexError::invalid_input("full-text index only supports ft"));
                }
                let text = params.value.as_deref().unwrap_or_default();
                let mut query = TermQuery::from_text(&token, text, self.config.term_max_length);
                if query.terms.is_empty() {
                    return Ok(empty());
                }
                query.distkey = distkey;
                with_lock_retry(namespace, &self.config, "scan", || {
                    store.with_read_table(table, |t| {
                        query.scan(&self.scanner, t, resume.as_deref(), limit, params.count)
                    })
                })?
            },
            IndexKind::Index | IndexKind::Manifest => {
                let condition = if kind == IndexKind::Manifest {
                    Condition::new(Operator::Exists, None)
                } else {
                    let op = params
                        .op
                        .ok_or_else(|| IndexError::invalid_input("index query requires an operator"))?;
                    if op == Operator::FullText {
                        return Err(IndexError::invalid_input("ft queries read the full-text index"));
                    }
                    Condition::new(op, params.value.clone())
                };
                let condition = match distkey {
                    Some((dk_token, dk_value)) => condition.with_distkey(dk_token, dk_value),
                    None => condition,
                };
                let range = condition.compile(&token).map_err(|e| e.into_index_error(namespace))?;
                with_lock_retry(namespace, &self.config, "scan", || {
                    store.with_read_table(table, |t| {
                        let request = ScanRequest {
                            range: &range,
                            resume: resume.as_deref(),
                            limit,
                            count_only: params.count,
                        };
                        self.scanner.scan(t, request, None)
                    })
                })?
            },
        };

        metrics::record_scan(kind, page.advanced, page.fetch_exceeded);
        debug!(
            kind = kind.as_str(),
            matched = page.matched,
            advanced = page.advanced,
            fetch_exceeded = page.fetch_exceeded,
            "scan page"
        );
        Ok(page.into_fetch_result(params.count))
    }
}
