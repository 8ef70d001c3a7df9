//! Shard assignment and fan-out.
//!
//! Every index record is owned by the node its assignment key hashes to:
//!
//! ```text
//! [distkeyItem#distkeyValue:]parentPath[#itemName]
//! ```
//!
//! Writes are grouped per `(kind, node)` and queued on the [`Dispatcher`]
//! without waiting. Queries go to the single owning node and wait for its page.

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::Arc,
    time::Instant,
};

use parking_lot::RwLock;
use tagindex_types::{
    Distkey, FetchResult, IndexEntry, IndexError, IndexKind, NamespaceId, QueryRequest,
    config::{DispatchConfig, ShardingConfig, TenantShards},
};
use tracing::{debug, instrument, warn};
use url::Url;

use crate::{
    dispatch::{DispatchJob, Dispatcher, call_once},
    metrics,
    protocol::{ShardParams, ShardRequest, ShardResponse, WriteBody},
    ring::HashRing,
    transport::ShardTransport,
};

/// Builds the ring lookup key of a record or condition.
#[must_use]
pub fn assignment_key(parent_path: &str, item: &str, distkey: Option<&Distkey>) -> String {
    let mut key = String::with_capacity(parent_path.len() + item.len() + 16);
    if let Some(dk) = distkey {
        key.push_str(&dk.item);
        key.push('#');
        key.push_str(&dk.value);
        key.push(':');
    }
    key.push_str(parent_path);
    if !item.is_empty() {
        key.push('#');
        key.push_str(item);
    }
    key
}

/// One entity's index change, as logical records.
#[derive(Debug, Clone, Default, bon::Builder)]
pub struct WriteSet {
    /// Entity URI.
    #[builder(into)]
    pub entity_uri: String,
    /// Records the entity should have after the write.
    #[builder(default)]
    pub adds: Vec<IndexEntry>,
    /// Records the entity had before the write.
    #[builder(default)]
    pub prior: Vec<IndexEntry>,
    /// Full item names (`parent#item`) a partial write is restricted to.
    pub partial_items: Option<Vec<String>>,
    /// Remove the entity's records instead of replacing them.
    #[builder(default)]
    pub delete: bool,
}

impl WriteSet {
    fn partial(&self) -> bool {
        self.partial_items.is_some()
    }

    fn body(&self, entries: Vec<IndexEntry>) -> WriteBody {
        WriteBody {
            entity_uri: self.entity_uri.clone(),
            entries,
            touched_items: self.partial_items.clone().unwrap_or_default(),
        }
    }
}

/// Splits multi-category records into one record per DISTKEY category.
fn split_distkeys(entries: &[IndexEntry]) -> Vec<IndexEntry> {
    let mut split = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.distkeys.len() <= 1 {
            split.push(entry.clone());
        } else {
            split.extend(entry.distkeys.iter().map(|dk| entry.with_distkey(dk.clone())));
        }
    }
    split
}

type RingKey = (NamespaceId, IndexKind);

/// Routes index writes and queries to shard nodes.
pub struct ShardRouter<T: ShardTransport> {
    sharding: ShardingConfig,
    rings: RwLock<HashMap<RingKey, Arc<HashRing>>>,
    transport: Arc<T>,
    dispatcher: Dispatcher,
    dispatch: DispatchConfig,
}

impl<T: ShardTransport> ShardRouter<T> {
    /// Creates a router and starts its dispatch pool on the current runtime.
    pub fn new(sharding: ShardingConfig, dispatch: DispatchConfig, transport: Arc<T>) -> Self {
        let dispatcher = Dispatcher::start(dispatch.clone(), Arc::clone(&transport));
        Self { sharding, rings: RwLock::new(HashMap::new()), transport, dispatcher, dispatch }
    }

    /// The transport used for shard calls.
    #[must_use]
    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    fn ring(&self, namespace: &NamespaceId, kind: IndexKind) -> Arc<HashRing> {
        let key = (namespace.clone(), kind);
        if let Some(ring) = self.rings.read().get(&key) {
            return Arc::clone(ring);
        }
        let ring = Arc::new(build_ring(self.sharding.for_namespace(namespace), kind));
        Arc::clone(self.rings.write().entry(key).or_insert(ring))
    }

    /// Node owning the records of `parent#item` (optionally in one DISTKEY partition).
    ///
    /// Returns `None` when no node is configured for the kind.
    #[must_use]
    pub fn assign(
        &self,
        namespace: &NamespaceId,
        kind: IndexKind,
        parent_path: &str,
        item: &str,
        distkey: Option<&Distkey>,
    ) -> Option<Url> {
        let key = assignment_key(parent_path, item, distkey);
        self.ring(namespace, kind).node_for(&key).cloned()
    }

    fn assign_entry(&self, namespace: &NamespaceId, entry: &IndexEntry) -> Option<Url> {
        self.assign(namespace, entry.kind, &entry.parent_path, &entry.item, entry.distkey())
    }

    /// Groups `write` per `(kind, node)` and queues one call per group.
    ///
    /// Nodes receiving new records get a `PUT`; nodes that only held prior
    /// records get a `DELETE`. A delete without prior records is sent to every
    /// node of the tenant. Returns the number of queued calls.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::ShardUnresolved`] if a new record has no owning
    /// node. Nothing is queued in that case.
    #[instrument(skip_all, fields(namespace = %namespace, entity = %write.entity_uri, delete = write.delete))]
    pub async fn fan_out_write(
        &self,
        namespace: &NamespaceId,
        write: &WriteSet,
    ) -> Result<usize, IndexError> {
        let mut puts: BTreeMap<(IndexKind, Url), Vec<IndexEntry>> = BTreeMap::new();
        if !write.delete {
            for entry in split_distkeys(&write.adds) {
                let Some(node) = self.assign_entry(namespace, &entry) else {
                    metrics::record_shard_unresolved(entry.kind);
                    return Err(IndexError::ShardUnresolved {
                        namespace: namespace.clone(),
                        assignment_key: assignment_key(&entry.parent_path, &entry.item, entry.distkey()),
                    });
                };
                puts.entry((entry.kind, node)).or_default().push(entry);
            }
        }

        let mut deletes: BTreeSet<(IndexKind, Url)> = BTreeSet::new();
        for entry in split_distkeys(&write.prior) {
            match self.assign_entry(namespace, &entry) {
                Some(node) => {
                    deletes.insert((entry.kind, node));
                },
                None => {
                    metrics::record_shard_unresolved(entry.kind);
                    debug!(kind = entry.kind.as_str(), "prior record has no shard, skipping");
                },
            }
        }
        if write.delete && write.prior.is_empty() {
            for kind in IndexKind::ALL {
                for node in self.ring(namespace, kind).nodes() {
                    deletes.insert((kind, node.clone()));
                }
            }
        }
        deletes.retain(|target| !puts.contains_key(target));

        let mut jobs = Vec::with_capacity(puts.len() + deletes.len());
        for ((kind, node), entries) in puts {
            let request = ShardRequest::put(namespace.clone(), kind, write.body(entries), write.partial());
            jobs.push(DispatchJob { node, request });
        }
        for (kind, node) in deletes {
            let request =
                ShardRequest::delete(namespace.clone(), kind, write.body(Vec::new()), write.partial());
            jobs.push(DispatchJob { node, request });
        }

        let mut queued = 0;
        for job in jobs {
            let kind = job.request.kind;
            debug!(node = %job.node, request = %job.request.request_line(), "queueing fan-out job");
            if self.dispatcher.submit(job).await {
                queued += 1;
                metrics::record_fanout_write(kind, 1);
            }
        }
        Ok(queued)
    }

    /// Runs `query` on the node owning its condition.
    ///
    /// An unconfigured kind yields an empty result.
    ///
    /// # Errors
    ///
    /// Returns the shard's error, or [`IndexError::Transport`] if the call fails.
    #[instrument(skip_all, fields(namespace = %query.namespace, parent = %query.parent_path, item = %query.item))]
    pub async fn fan_out_query(&self, query: &QueryRequest) -> Result<FetchResult, IndexError> {
        let kind = query.kind();
        let Some(node) = self.assign(
            &query.namespace,
            kind,
            &query.parent_path,
            &query.item,
            query.distkey.as_ref(),
        ) else {
            metrics::record_shard_unresolved(kind);
            warn!(kind = kind.as_str(), "no shard configured, returning no data");
            return Ok(FetchResult { count: query.count_only.then_some(0), ..FetchResult::empty() });
        };

        let params = ShardParams {
            parent: Some(query.parent_path.clone()),
            item: (!query.item.is_empty()).then(|| query.item.clone()),
            op: (kind != IndexKind::Manifest).then_some(query.operator),
            value: query.value.as_ref().map(|v| v.render()),
            dk_item: query.distkey.as_ref().map(|dk| dk.item.clone()),
            dk_value: query.distkey.as_ref().map(|dk| dk.value.clone()),
            limit: query.limit,
            next: query.cursor.clone(),
            count: query.count_only,
            ..ShardParams::default()
        };
        let request = ShardRequest::query(query.namespace.clone(), kind, params);
        debug!(node = %node, request = %request.request_line(), "shard query");

        let started = Instant::now();
        let result = call_once(self.transport.as_ref(), &node, request, self.dispatch.request_timeout)
            .await
            .and_then(|response| match response {
                ShardResponse::Fetched { result } => Ok(result),
                other => Err(IndexError::Transport {
                    node: node.to_string(),
                    message: format!("unexpected reply to a query: {other:?}"),
                }),
            });
        metrics::record_query(kind, result.is_ok(), started.elapsed().as_secs_f64());
        result
    }

    /// Fan-out calls queued or in flight.
    #[must_use]
    pub fn pending_jobs(&self) -> usize {
        self.dispatcher.pending()
    }

    /// Drains the dispatch pool.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
    }
}

fn build_ring(shards: &TenantShards, kind: IndexKind) -> HashRing {
    match kind {
        IndexKind::Index => HashRing::new(&shards.index_nodes, shards.virtual_nodes),
        IndexKind::FullText => HashRing::new(&shards.fulltext_nodes, shards.virtual_nodes),
        IndexKind::Manifest => shards.manifest_node.clone().map(HashRing::single).unwrap_or_default(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::time::Duration;

    use parking_lot::Mutex;
    use tagindex_test_utils::{assert_eventually, test_dispatch_config};
    use tagindex_types::Operator;

    use super::*;
    use crate::protocol::ShardMethod;

    /// Records calls and applies everything.
    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<(Url, ShardRequest)>>,
    }

    impl ShardTransport for RecordingTransport {
        async fn call(&self, node: &Url, request: ShardRequest) -> Result<ShardResponse, IndexError> {
            let reply = match request.method {
                ShardMethod::Get => ShardResponse::Fetched { result: FetchResult::empty() },
                _ => ShardResponse::Applied { added: 0, removed: 0 },
            };
            self.calls.lock().push((node.clone(), request));
            Ok(reply)
        }
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn ns() -> NamespaceId {
        NamespaceId::new("acme").unwrap()
    }

    fn sharding() -> ShardingConfig {
        ShardingConfig::builder()
            .default(
                TenantShards::builder()
                    .index_nodes((0..4).map(|i| url(&format!("http://idx-{i}/"))).collect())
                    .fulltext_nodes(vec![url("http://ft-0/")])
                    .manifest_node(url("http://mf/"))
                    .build(),
            )
            .build()
    }

    fn entry(kind: IndexKind, item: &str, value: &str, distkeys: Vec<Distkey>) -> IndexEntry {
        IndexEntry {
            kind,
            parent_path: "/docs".to_string(),
            item: item.to_string(),
            value: value.to_string(),
            distkeys,
            self_id: "a".to_string(),
            entity_uri: "/docs/a".to_string(),
        }
    }

    async fn drained(router: &ShardRouter<RecordingTransport>) -> Vec<(Url, ShardRequest)> {
        assert!(assert_eventually(Duration::from_secs(2), || router.pending_jobs() == 0).await);
        let mut calls = router.transport().calls.lock().clone();
        calls.sort_by(|a, b| (a.1.kind, &a.0).cmp(&(b.1.kind, &b.0)));
        calls
    }

    #[test]
    fn test_assignment_key() {
        assert_eq!(assignment_key("/docs", "title", None), "/docs#title");
        assert_eq!(assignment_key("/docs", "", None), "/docs");
        let dk = Distkey::new("region", "us");
        assert_eq!(assignment_key("/docs", "title", Some(&dk)), "region#us:/docs#title");
    }

    #[tokio::test]
    async fn test_distkey_categories_route_independently() {
        let router =
            ShardRouter::new(sharding(), test_dispatch_config(), Arc::new(RecordingTransport::default()));
        let dks = vec![Distkey::new("region", "us"), Distkey::new("region", "eu")];
        let write = WriteSet::builder()
            .entity_uri("/docs/a")
            .adds(vec![entry(IndexKind::Index, "title", "foo", dks.clone())])
            .build();
        router.fan_out_write(&ns(), &write).await.unwrap();

        let calls = drained(&router).await;
        let mut routed = Vec::new();
        for (node, request) in &calls {
            assert_eq!(request.method, ShardMethod::Put);
            for e in &request.body.as_ref().unwrap().entries {
                routed.push((e.distkey().unwrap().clone(), node.clone()));
            }
        }
        routed.sort();
        assert_eq!(routed.len(), 2, "one record per category: {calls:?}");
        for (dk, node) in routed {
            let expected =
                router.assign(&ns(), IndexKind::Index, "/docs", "title", Some(&dk)).unwrap();
            assert_eq!(node, expected);
        }
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_groups_per_node_and_kind() {
        let router =
            ShardRouter::new(sharding(), test_dispatch_config(), Arc::new(RecordingTransport::default()));
        let write = WriteSet::builder()
            .entity_uri("/docs/a")
            .adds(vec![
                entry(IndexKind::FullText, "body", "quick", Vec::new()),
                entry(IndexKind::FullText, "body", "fox", Vec::new()),
                entry(IndexKind::Manifest, "", "", Vec::new()),
            ])
            .build();
        assert_eq!(router.fan_out_write(&ns(), &write).await.unwrap(), 2);

        let calls = drained(&router).await;
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, url("http://ft-0/"));
        assert_eq!(calls[0].1.body.as_ref().unwrap().entries.len(), 2);
        assert_eq!(calls[1].0, url("http://mf/"));
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_moved_records_delete_on_old_node() {
        let router =
            ShardRouter::new(sharding(), test_dispatch_config(), Arc::new(RecordingTransport::default()));
        let old = Distkey::new("region", "us");
        let old_node = router.assign(&ns(), IndexKind::Index, "/docs", "title", Some(&old)).unwrap();
        // A partition that lands on another node.
        let new = (0..64)
            .map(|i| Distkey::new("region", format!("r{i}")))
            .find(|dk| {
                router.assign(&ns(), IndexKind::Index, "/docs", "title", Some(dk)).as_ref()
                    != Some(&old_node)
            })
            .unwrap();
        let write = WriteSet::builder()
            .entity_uri("/docs/a")
            .adds(vec![entry(IndexKind::Index, "title", "foo", vec![new])])
            .prior(vec![entry(IndexKind::Index, "title", "foo", vec![old])])
            .build();
        assert_eq!(router.fan_out_write(&ns(), &write).await.unwrap(), 2);

        let calls = drained(&router).await;
        let delete = calls.iter().find(|(_, r)| r.method == ShardMethod::Delete).unwrap();
        assert_eq!(delete.0, old_node);
        assert_eq!(delete.1.params.id.as_deref(), Some("/docs/a"));
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_without_prior_broadcasts() {
        let router =
            ShardRouter::new(sharding(), test_dispatch_config(), Arc::new(RecordingTransport::default()));
        let write = WriteSet::builder().entity_uri("/docs/a").delete(true).build();
        // 4 index nodes, 1 full-text node, 1 manifest node.
        assert_eq!(router.fan_out_write(&ns(), &write).await.unwrap(), 6);
        let calls = drained(&router).await;
        assert!(calls.iter().all(|(_, r)| r.method == ShardMethod::Delete));
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_unresolved_write_is_error_and_query_is_empty() {
        let router = ShardRouter::new(
            ShardingConfig::default(),
            test_dispatch_config(),
            Arc::new(RecordingTransport::default()),
        );
        let write = WriteSet::builder()
            .entity_uri("/docs/a")
            .adds(vec![entry(IndexKind::Index, "title", "foo", Vec::new())])
            .build();
        let err = router.fan_out_write(&ns(), &write).await.unwrap_err();
        assert!(matches!(err, IndexError::ShardUnresolved { .. }));

        let query = QueryRequest {
            namespace: ns(),
            parent_path: "/docs".to_string(),
            item: "title".to_string(),
            operator: Operator::Eq,
            value: None,
            distkey: None,
            limit: None,
            cursor: None,
            count_only: true,
        };
        let result = router.fan_out_query(&query).await.unwrap();
        assert_eq!(result.count, Some(0));
        assert!(router.transport().calls.lock().is_empty());
        router.shutdown().await;
    }

    #[tokio::test]
    async fn test_tenant_override_uses_its_own_ring() {
        let mut sharding = sharding();
        sharding.tenants.insert(
            "beta".to_string(),
            TenantShards::builder().index_nodes(vec![url("http://beta-idx/")]).build(),
        );
        let router =
            ShardRouter::new(sharding, test_dispatch_config(), Arc::new(RecordingTransport::default()));
        let beta = NamespaceId::new("beta").unwrap();
        assert_eq!(
            router.assign(&beta, IndexKind::Index, "/docs", "title", None),
            Some(url("http://beta-idx/"))
        );
        assert_eq!(router.assign(&beta, IndexKind::Manifest, "/docs", "", None), None);
        router.shutdown().await;
    }
}
