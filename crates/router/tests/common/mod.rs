//! In-process shard cluster for integration tests.

#![allow(dead_code)]

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use tagindex_router::{EntityIndexer, IndexPolicy, LocalTransport, ShardNode, ShardRouter};
use tagindex_storage::NamespaceRegistry;
use tagindex_test_utils::{assert_eventually, test_dispatch_config, test_store_config};
use tagindex_types::{
    EntityMutation, EntitySnapshot, FetchResult, IndexValue, NamespaceId, OperationKind, Operator,
    QueryRequest,
    config::{ShardingConfig, TenantShards},
};
use url::Url;

/// Index, full-text and manifest nodes wired through a [`LocalTransport`].
pub struct Cluster {
    pub transport: Arc<LocalTransport>,
    pub router: Arc<ShardRouter<LocalTransport>>,
    pub indexer: EntityIndexer<LocalTransport>,
    pub index_nodes: Vec<Url>,
}

pub fn url(s: &str) -> Url {
    Url::parse(s).unwrap()
}

pub fn ns() -> NamespaceId {
    NamespaceId::new("acme").unwrap()
}

impl Cluster {
    /// Starts `index_nodes` index nodes plus one full-text and one manifest node.
    pub fn start(index_nodes: usize, policy: IndexPolicy) -> Self {
        let transport = Arc::new(LocalTransport::new());
        let index_urls: Vec<Url> =
            (0..index_nodes).map(|i| url(&format!("http://idx-{i}:7700/"))).collect();
        let fulltext = url("http://ft-0:7700/");
        let manifest = url("http://manifest:7700/");

        for node in index_urls.iter().chain([&fulltext, &manifest]) {
            let registry = Arc::new(NamespaceRegistry::new(test_store_config()));
            transport.register(node.clone(), Arc::new(ShardNode::new(registry)));
        }

        let sharding = ShardingConfig::builder()
            .default(
                TenantShards::builder()
                    .index_nodes(index_urls.clone())
                    .fulltext_nodes(vec![fulltext])
                    .manifest_node(manifest)
                    .build(),
            )
            .build();
        let router =
            Arc::new(ShardRouter::new(sharding, test_dispatch_config(), Arc::clone(&transport)));
        let term_max_length = test_store_config().term_max_length;
        let indexer = EntityIndexer::new(policy, Arc::clone(&router), term_max_length);
        Self { transport, router, indexer, index_nodes: index_urls }
    }

    /// Applies a mutation and waits for its fan-out to land.
    pub async fn apply(&self, mutation: EntityMutation) -> usize {
        let queued = self.indexer.on_mutation(&mutation).await.unwrap();
        self.settle().await;
        queued
    }

    /// Waits until no fan-out call is queued or in flight.
    pub async fn settle(&self) {
        let router = Arc::clone(&self.router);
        assert!(
            assert_eventually(Duration::from_secs(5), move || router.pending_jobs() == 0).await,
            "fan-out did not drain"
        );
    }

    pub async fn insert(&self, uri: &str, pairs: &[(&str, &str)]) -> usize {
        self.apply(mutation(uri, None, Some(pairs), OperationKind::Insert, None)).await
    }

    pub async fn query(&self, query: QueryRequest) -> FetchResult {
        self.indexer.query(&query).await.unwrap()
    }

    pub async fn values(&self, query: QueryRequest) -> Vec<String> {
        self.query(query).await.values().map(str::to_string).collect()
    }

    pub async fn shutdown(&self) {
        self.router.shutdown().await;
    }
}

pub fn mutation(
    uri: &str,
    prior: Option<&[(&str, &str)]>,
    new: Option<&[(&str, &str)]>,
    operation: OperationKind,
    partial_items: Option<&[&str]>,
) -> EntityMutation {
    let snapshot = |pairs: &[(&str, &str)]| EntitySnapshot::from_pairs(pairs.iter().copied());
    EntityMutation {
        namespace: ns(),
        entity_uri: uri.to_string(),
        prior: prior.map(snapshot),
        new: new.map(snapshot),
        operation,
        partial_items: partial_items
            .map(|items| items.iter().map(|i| i.to_string()).collect::<BTreeSet<_>>()),
    }
}

pub fn query(item: &str, operator: Operator, value: Option<&str>) -> QueryRequest {
    QueryRequest {
        namespace: ns(),
        parent_path: "/docs".to_string(),
        item: item.to_string(),
        operator,
        value: value.map(|v| IndexValue::Text(v.to_string())),
        distkey: None,
        limit: None,
        cursor: None,
        count_only: false,
    }
}

pub fn listing() -> QueryRequest {
    query("", Operator::Exists, None)
}

pub fn with_limit(mut query: QueryRequest, limit: u32) -> QueryRequest {
    query.limit = Some(limit);
    query
}
