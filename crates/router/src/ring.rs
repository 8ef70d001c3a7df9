//! Consistent hash ring over shard node URLs.
//!
//! Each node is placed on the ring at `virtual_nodes` positions derived from
//! `seahash("{url}#{replica}")`. A key maps to the first position at or after
//! its own hash, wrapping around. Adding or removing a node only moves the keys
//! adjacent to that node's positions.

use std::collections::BTreeMap;

use url::Url;

/// Stable mapping from assignment keys to node URLs.
#[derive(Debug, Clone, Default)]
pub struct HashRing {
    nodes: Vec<Url>,
    points: BTreeMap<u64, usize>,
}

impl HashRing {
    /// Builds a ring over `nodes`. Duplicate URLs are placed once.
    #[must_use]
    pub fn new(nodes: &[Url], virtual_nodes: u32) -> Self {
        let mut unique: Vec<Url> = Vec::with_capacity(nodes.len());
        for node in nodes {
            if !unique.contains(node) {
                unique.push(node.clone());
            }
        }

        let mut points = BTreeMap::new();
        for (index, node) in unique.iter().enumerate() {
            for replica in 0..virtual_nodes.max(1) {
                let point = seahash::hash(format!("{node}#{replica}").as_bytes());
                // On a collision the lower node index keeps the position.
                points.entry(point).or_insert(index);
            }
        }
        Self { nodes: unique, points }
    }

    /// A ring that always resolves to `node`.
    #[must_use]
    pub fn single(node: Url) -> Self {
        Self::new(&[node], 1)
    }

    /// Node responsible for `key`, or `None` on an empty ring.
    #[must_use]
    pub fn node_for(&self, key: &str) -> Option<&Url> {
        let hash = seahash::hash(key.as_bytes());
        let (_, index) = self.points.range(hash..).next().or_else(|| self.points.iter().next())?;
        self.nodes.get(*index)
    }

    /// Distinct nodes on the ring.
    #[must_use]
    pub fn nodes(&self) -> &[Url] {
        &self.nodes
    }

    /// Whether the ring has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
