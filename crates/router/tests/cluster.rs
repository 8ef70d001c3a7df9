//! End-to-end routing tests over an in-process cluster.
//!
//! Mutations enter through the [`EntityIndexer`](tagindex_router::EntityIndexer),
//! fan out through the dispatch pool and land on [`ShardNode`]s behind a
//! `LocalTransport`; queries come back through the same router.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::disallowed_methods)]

mod common;

use common::{Cluster, listing, mutation, ns, query, with_limit};
use tagindex_router::{IndexPolicy, ItemPolicy, ShardMethod};
use tagindex_types::{Distkey, IndexKind, OperationKind, Operator, ValueType};

fn policy() -> IndexPolicy {
    IndexPolicy::default()
        .with_item("title", ItemPolicy::default())
        .with_item("author", ItemPolicy::default())
        .with_item("size", ItemPolicy { value_type: ValueType::Integer, fulltext: false })
        .with_item("body", ItemPolicy { fulltext: true, ..ItemPolicy::default() })
        .with_distkey("region")
}

#[tokio::test]
async fn test_prefix_search_pages_across_the_cluster() {
    let cluster = Cluster::start(3, policy());
    for id in ["a", "b", "c"] {
        cluster.insert(&format!("/docs/{id}"), &[("title", "foo")]).await;
    }
    cluster.insert("/docs/d", &[("title", "bar")]).await;

    let first = cluster.query(with_limit(query("title", Operator::Eq, Some("foo")), 2)).await;
    assert_eq!(first.values().collect::<Vec<_>>(), ["/docs/a", "/docs/b"]);
    let pointer = first.pointer.clone().expect("more pages");

    let mut next = with_limit(query("title", Operator::Eq, Some("foo")), 2);
    next.cursor = Some(pointer);
    let second = cluster.query(next).await;
    assert_eq!(second.values().collect::<Vec<_>>(), ["/docs/c"]);
    assert_eq!(second.pointer, None);
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_distkey_categories_land_on_their_own_shards() {
    let cluster = Cluster::start(4, policy());
    cluster.insert("/docs/a", &[("title", "foo"), ("region", "us"), ("region", "eu")]).await;

    for region in ["us", "eu"] {
        let dk = Distkey::new("region", region);
        let owner = cluster.router.assign(&ns(), IndexKind::Index, "/docs", "title", Some(&dk)).unwrap();
        let puts: Vec<_> = cluster
            .transport
            .calls()
            .into_iter()
            .filter(|(node, line)| *node == owner && line.starts_with("PUT /s/acme/index"))
            .collect();
        assert!(!puts.is_empty(), "no PUT reached {owner} for {region}");

        let mut q = query("title", Operator::Eq, Some("foo"));
        q.distkey = Some(dk);
        assert_eq!(cluster.values(q).await, ["/docs/a"]);
    }

    let mut other = query("title", Operator::Eq, Some("foo"));
    other.distkey = Some(Distkey::new("region", "ap"));
    assert!(cluster.values(other).await.is_empty());
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_update_replaces_old_values() {
    let cluster = Cluster::start(3, policy());
    cluster.insert("/docs/a", &[("title", "foo"), ("author", "ann")]).await;
    cluster
        .apply(mutation(
            "/docs/a",
            Some(&[("title", "foo"), ("author", "ann")]),
            Some(&[("title", "bar"), ("author", "ann")]),
            OperationKind::Update,
            None,
        ))
        .await;

    assert!(cluster.values(query("title", Operator::Eq, Some("foo"))).await.is_empty());
    assert_eq!(cluster.values(query("title", Operator::Eq, Some("bar"))).await, ["/docs/a"]);
    assert_eq!(cluster.values(query("author", Operator::Eq, Some("ann"))).await, ["/docs/a"]);
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_partial_delete_preserves_unrelated_items() {
    let cluster = Cluster::start(2, policy());
    let pairs = [("title", "foo"), ("author", "ann")];
    cluster.insert("/docs/a", &pairs).await;
    cluster
        .apply(mutation("/docs/a", Some(&pairs), None, OperationKind::Delete, Some(&["title"])))
        .await;

    assert!(cluster.values(query("title", Operator::Eq, Some("foo"))).await.is_empty());
    assert_eq!(cluster.values(query("author", Operator::Eq, Some("ann"))).await, ["/docs/a"]);
    assert_eq!(cluster.values(listing()).await, ["/docs/a"], "manifest entry survives");

    let deletes = cluster
        .transport
        .calls()
        .into_iter()
        .filter(|(_, line)| line.starts_with("DELETE"))
        .count();
    assert_eq!(deletes, 1, "only the node holding title is called");
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_full_delete_removes_everything() {
    let cluster = Cluster::start(3, policy());
    let pairs = [("title", "foo"), ("body", "quick brown fox")];
    cluster.insert("/docs/a", &pairs).await;
    cluster.insert("/docs/b", &[("title", "foo")]).await;
    cluster.apply(mutation("/docs/a", Some(&pairs), None, OperationKind::Delete, None)).await;

    assert_eq!(cluster.values(query("title", Operator::Eq, Some("foo"))).await, ["/docs/b"]);
    assert!(cluster.values(query("body", Operator::FullText, Some("fox"))).await.is_empty());
    assert_eq!(cluster.values(listing()).await, ["/docs/b"]);
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_delete_without_prior_reaches_every_node() {
    let cluster = Cluster::start(3, policy());
    cluster.insert("/docs/a", &[("title", "foo")]).await;
    let queued = cluster.apply(mutation("/docs/a", None, None, OperationKind::Delete, None)).await;
    assert_eq!(queued, 5);
    assert!(cluster.values(query("title", Operator::Eq, Some("foo"))).await.is_empty());
    assert!(cluster.values(listing()).await.is_empty());
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_fulltext_query_dedups_entities() {
    let cluster = Cluster::start(2, policy());
    cluster.insert("/docs/a", &[("body", "The quick brown fox")]).await;
    cluster.insert("/docs/b", &[("body", "A lazy dog")]).await;
    cluster.insert("/docs/c", &[("body", "quick dog, quick fox")]).await;

    let mut values = cluster.values(query("body", Operator::FullText, Some("QUICK fox dog"))).await;
    values.sort_unstable();
    assert_eq!(values, ["/docs/a", "/docs/b", "/docs/c"]);
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_typed_range_and_count_only() {
    let cluster = Cluster::start(3, policy());
    for (id, size) in [("a", "5"), ("b", "10"), ("c", "-3"), ("d", "200")] {
        cluster.insert(&format!("/docs/{id}"), &[("size", size)]).await;
    }

    assert_eq!(cluster.values(query("size", Operator::Ge, Some("10"))).await, ["/docs/b", "/docs/d"]);
    assert_eq!(cluster.values(query("size", Operator::Lt, Some("10"))).await, ["/docs/c", "/docs/a"]);

    let mut count = query("size", Operator::Exists, None);
    count.count_only = true;
    let result = cluster.query(count).await;
    assert_eq!(result.count, Some(4));
    assert!(result.entries.is_empty());
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_manifest_lists_children_once() {
    let cluster = Cluster::start(2, policy());
    for id in ["c", "a", "b"] {
        cluster.insert(&format!("/docs/{id}"), &[("title", id)]).await;
    }
    // A repeated insert is a no-op on every shard.
    cluster.insert("/docs/a", &[("title", "a")]).await;

    assert_eq!(cluster.values(listing()).await, ["/docs/a", "/docs/b", "/docs/c"]);
    let manifest_puts = cluster
        .transport
        .calls()
        .into_iter()
        .filter(|(node, line)| {
            node.as_str() == "http://manifest:7700/" && line.starts_with(ShardMethod::Put.as_str())
        })
        .count();
    assert_eq!(manifest_puts, 4);
    cluster.shutdown().await;
}

#[tokio::test]
async fn test_bad_value_rejected_before_fan_out() {
    let cluster = Cluster::start(2, policy());
    let err = cluster
        .indexer
        .on_mutation(&mutation("/docs/a", None, Some(&[("size", "big")]), OperationKind::Insert, None))
        .await
        .unwrap_err();
    assert!(matches!(err, tagindex_types::IndexError::InvalidInput { .. }));
    assert!(cluster.transport.calls().is_empty());
    cluster.shutdown().await;
}
