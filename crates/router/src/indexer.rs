//! Origin-side index maintenance.
//!
//! The [`EntityIndexer`] turns entity mutation notifications into logical
//! index records according to an [`IndexPolicy`] and hands them to the
//! [`ShardRouter`] for fan-out.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use serde::{Deserialize, Serialize};
use tagindex_storage::tokenize;
use tagindex_types::{
    Distkey, EntityMutation, EntitySnapshot, FetchResult, IndexEntry, IndexError, IndexKind,
    IndexValue, Operator, QueryRequest, ValueType, item_name, split_uri,
};
use tracing::{debug, instrument, warn};

use crate::{
    shard_router::{ShardRouter, WriteSet},
    transport::ShardTransport,
};

/// How one item is indexed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemPolicy {
    /// Declared value type of the item.
    #[serde(default)]
    pub value_type: ValueType,
    /// Index the item's text as terms instead of whole values.
    #[serde(default)]
    pub fulltext: bool,
}

/// Which items of an entity are indexed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexPolicy {
    /// Indexed items by name.
    #[serde(default)]
    pub items: BTreeMap<String, ItemPolicy>,
    /// Items whose values partition the index (DISTKEY items).
    #[serde(default)]
    pub distkey_items: Vec<String>,
}

impl IndexPolicy {
    /// Declares an indexed item.
    #[must_use]
    pub fn with_item(mut self, item: impl Into<String>, policy: ItemPolicy) -> Self {
        self.items.insert(item.into(), policy);
        self
    }

    /// Declares a DISTKEY item.
    #[must_use]
    pub fn with_distkey(mut self, item: impl Into<String>) -> Self {
        self.distkey_items.push(item.into());
        self
    }

    /// Computes the records `snapshot` should have.
    ///
    /// `only` restricts the result to the named items and omits the manifest
    /// record, as partial writes do.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidInput`] if the URI has no parent segment or a
    /// value does not parse as its declared type.
    pub fn compute_entries(
        &self,
        entity_uri: &str,
        snapshot: &EntitySnapshot,
        only: Option<&BTreeSet<String>>,
        term_max_length: usize,
    ) -> Result<Vec<IndexEntry>, IndexError> {
        self.compute(entity_uri, snapshot, only, term_max_length, true)
    }

    fn compute(
        &self,
        entity_uri: &str,
        snapshot: &EntitySnapshot,
        only: Option<&BTreeSet<String>>,
        term_max_length: usize,
        strict: bool,
    ) -> Result<Vec<IndexEntry>, IndexError> {
        let (parent, self_id) = split_uri(entity_uri)
            .ok_or_else(|| IndexError::invalid_input(format!("entity uri {entity_uri:?} has no parent")))?;

        let distkeys: Vec<Distkey> = self
            .distkey_items
            .iter()
            .flat_map(|item| {
                snapshot
                    .values(item)
                    .iter()
                    .filter(|v| !v.is_empty())
                    .map(move |v| Distkey::new(item.as_str(), v.as_str()))
            })
            .collect();
        let record = |kind: IndexKind, item: &str, value: String| IndexEntry {
            kind,
            parent_path: parent.to_string(),
            item: item.to_string(),
            value,
            distkeys: distkeys.clone(),
            self_id: self_id.to_string(),
            entity_uri: entity_uri.to_string(),
        };

        let mut entries = Vec::new();
        for (item, policy) in &self.items {
            if only.is_some_and(|only| !only.contains(item)) {
                continue;
            }
            let mut values = BTreeSet::new();
            for raw in snapshot.values(item) {
                if policy.fulltext {
                    values.extend(tokenize(raw, term_max_length));
                    continue;
                }
                match IndexValue::parse(policy.value_type, raw) {
                    Ok(value) => {
                        values.insert(value.render());
                    },
                    Err(err) if strict => return Err(err),
                    // Never indexed, so there is nothing to remove.
                    Err(err) => debug!(item = %item, error = %err, "skipping unparsable prior value"),
                }
            }
            let kind = if policy.fulltext { IndexKind::FullText } else { IndexKind::Index };
            entries.extend(values.into_iter().map(|value| record(kind, item.as_str(), value)));
        }

        if only.is_none() {
            entries.push(IndexEntry { distkeys: Vec::new(), ..record(IndexKind::Manifest, "", String::new()) });
        }
        Ok(entries)
    }

    /// Coerces a text comparison value to the item's declared type.
    fn typed_value(&self, query: &QueryRequest) -> Result<Option<IndexValue>, IndexError> {
        let declared = self.items.get(&query.item).map(|p| p.value_type).unwrap_or_default();
        match &query.value {
            Some(IndexValue::Text(raw))
                if declared != ValueType::Text && query.operator != Operator::FullText =>
            {
                IndexValue::parse(declared, raw).map(Some)
            },
            other => Ok(other.clone()),
        }
    }
}

/// Maintains an index from entity mutation notifications.
pub struct EntityIndexer<T: ShardTransport> {
    policy: IndexPolicy,
    router: Arc<ShardRouter<T>>,
    term_max_length: usize,
}

impl<T: ShardTransport> EntityIndexer<T> {
    /// Creates an indexer routing through `router`.
    #[must_use]
    pub fn new(policy: IndexPolicy, router: Arc<ShardRouter<T>>, term_max_length: usize) -> Self {
        Self { policy, router, term_max_length }
    }

    /// The router used for fan-out.
    #[must_use]
    pub fn router(&self) -> &Arc<ShardRouter<T>> {
        &self.router
    }

    /// Indexes one committed mutation. Returns the number of queued shard calls.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidInput`] for an unparsable new value and
    /// [`IndexError::ShardUnresolved`] if a new record has no node.
    #[instrument(skip_all, fields(namespace = %mutation.namespace, entity = %mutation.entity_uri, operation = ?mutation.operation))]
    pub async fn on_mutation(&self, mutation: &EntityMutation) -> Result<usize, IndexError> {
        let only = mutation.partial_items.as_ref();
        let uri = mutation.entity_uri.as_str();

        let adds = match (&mutation.new, mutation.is_delete()) {
            (Some(new), false) => self.policy.compute(uri, new, only, self.term_max_length, true)?,
            _ => Vec::new(),
        };
        let prior = match &mutation.prior {
            Some(prior) => self.policy.compute(uri, prior, only, self.term_max_length, false)?,
            None => Vec::new(),
        };
        let partial_items = match only {
            Some(items) => {
                let (parent, _) = split_uri(uri)
                    .ok_or_else(|| IndexError::invalid_input(format!("entity uri {uri:?} has no parent")))?;
                Some(items.iter().map(|item| item_name(parent, item)).collect())
            },
            None => None,
        };

        let write = WriteSet {
            entity_uri: mutation.entity_uri.clone(),
            adds,
            prior,
            partial_items,
            delete: mutation.is_delete(),
        };
        let queued = self.router.fan_out_write(&mutation.namespace, &write).await?;
        if queued == 0 && !(write.adds.is_empty() && write.prior.is_empty()) {
            warn!(entity = %uri, "mutation produced no shard calls");
        }
        Ok(queued)
    }

    /// Runs a query, coercing its value to the item's declared type.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::InvalidInput`] for a value of the wrong type, or
    /// the routed call's error.
    pub async fn query(&self, query: &QueryRequest) -> Result<FetchResult, IndexError> {
        let value = self.policy.typed_value(query)?;
        if value == query.value {
            return self.router.fan_out_query(query).await;
        }
        let typed = QueryRequest { value, ..query.clone() };
        self.router.fan_out_query(&typed).await
    }
}
