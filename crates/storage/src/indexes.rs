//! Incremental index maintenance.
//!
//! Every entity has an ancestor record listing the index keys currently
//! materialized for it. [`IndexDiffEngine::apply_delta`] diffs a new key set
//! against that record and rewrites both tables in one write transaction, so
//! the ancestor record always equals the entity's persisted index keys.
//!
//! Ancestor record: entity URI → postcard-encoded [`AncestorRecord`]

use std::collections::BTreeSet;

use redb::{ReadableTable, Table};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use tagindex_types::{IndexError, IndexKind, codec, config::StoreConfig};
use tracing::debug;

use crate::{
    error::{CodecSnafu, CommitSnafu, Result, StorageSnafu, TableSnafu},
    keys::SEP,
    retry::with_lock_retry,
    store::NamespaceStore,
    tables::Tables,
};

/// The index keys currently materialized for one entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AncestorRecord {
    /// Index keys in ascending order.
    pub keys: BTreeSet<Vec<u8>>,
}

/// Which stale keys a delta may remove.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeltaScope {
    /// Every ancestor key missing from the new set is removed.
    #[default]
    Full,
    /// Only stale keys of these item tokens are removed; other items are untouched.
    Partial {
        /// Item tokens touched by the update.
        item_tokens: BTreeSet<String>,
    },
}

impl DeltaScope {
    fn covers(&self, key: &[u8]) -> bool {
        match self {
            DeltaScope::Full => true,
            DeltaScope::Partial { item_tokens } => {
                let token = key.split(|b| *b == SEP).next().unwrap_or_default();
                item_tokens.iter().any(|t| t.as_bytes() == token)
            },
        }
    }
}

/// One entity's new index state for one index kind.
#[derive(Debug, Clone, bon::Builder)]
pub struct Delta {
    /// Index kind whose tables are updated.
    pub kind: IndexKind,
    /// Entity URI; the ancestor key and the value of every record.
    #[builder(into)]
    pub entity_uri: String,
    /// Encoded keys the entity should have. Ignored for deletes.
    #[builder(default)]
    pub keys: Vec<Vec<u8>>,
    /// Removal scope.
    #[builder(default)]
    pub scope: DeltaScope,
    /// Remove the entity's keys instead of writing new ones.
    #[builder(default)]
    pub delete: bool,
}

/// What an applied delta changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaOutcome {
    /// Index records written that were not already present.
    pub added: usize,
    /// Index records removed.
    pub removed: usize,
    /// Whether a transaction was committed.
    pub committed: bool,
}

/// Applies index deltas with lock-conflict retry.
pub struct IndexDiffEngine {
    config: StoreConfig,
}

impl IndexDiffEngine {
    /// Creates an engine using the store's retry settings.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    /// Diffs `delta` against the entity's ancestor record and applies the result.
    ///
    /// Repeating a delta is a no-op: nothing is committed when neither table changes.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::RetryExceeded`] if lock conflicts persist, or the
    /// converted store error for any other failure. Nothing is written on error.
    pub fn apply_delta(
        &self,
        store: &NamespaceStore,
        delta: &Delta,
    ) -> std::result::Result<DeltaOutcome, IndexError> {
        let outcome = with_lock_retry(store.namespace(), &self.config, "apply_delta", || {
            try_apply(store, delta)
        })?;
        debug!(
            namespace = %store.namespace(),
            kind = delta.kind.as_str(),
            entity = %delta.entity_uri,
            added = outcome.added,
            removed = outcome.removed,
            committed = outcome.committed,
            "Applied index delta"
        );
        Ok(outcome)
    }

    /// Reads an entity's ancestor record.
    ///
    /// # Errors
    ///
    /// Returns the converted store error if the read fails or the record is corrupt.
    pub fn ancestor(
        &self,
        store: &NamespaceStore,
        kind: IndexKind,
        entity_uri: &str,
    ) -> std::result::Result<Option<AncestorRecord>, IndexError> {
        let (_, ancestors) = Tables::for_kind(kind);
        with_lock_retry(store.namespace(), &self.config, "read_ancestor", || {
            store
                .probe(ancestors, entity_uri.as_bytes())?
                .map(|bytes| codec::decode(&bytes).context(CodecSnafu))
                .transpose()
        })
    }
}

fn try_apply(store: &NamespaceStore, delta: &Delta) -> Result<DeltaOutcome> {
    let (records_def, ancestors_def) = Tables::for_kind(delta.kind);
    let uri = delta.entity_uri.as_bytes();

    let txn = store.engine().begin_write()?;
    let outcome = {
        let mut records = txn.open_table(records_def).context(TableSnafu)?;
        let mut ancestors = txn.open_table(ancestors_def).context(TableSnafu)?;

        let ancestor = load_ancestor(&ancestors, uri)?;
        let new_keys: BTreeSet<Vec<u8>> =
            if delta.delete { BTreeSet::new() } else { delta.keys.iter().cloned().collect() };

        let mut added = 0;
        for key in &new_keys {
            let previous = records
                .insert(key.as_slice(), uri)
                .context(StorageSnafu)?
                .map(|old| old.value() == uri);
            if previous != Some(true) || !ancestor.keys.contains(key) {
                added += 1;
            }
        }

        let stale: Vec<&Vec<u8>> = ancestor
            .keys
            .iter()
            .filter(|key| !new_keys.contains(*key) && delta.scope.covers(key))
            .collect();
        for key in &stale {
            records.remove(key.as_slice()).context(StorageSnafu)?;
        }

        let mut remaining = ancestor.keys.clone();
        for key in &stale {
            remaining.remove(*key);
        }
        remaining.extend(new_keys);

        let removed = stale.len();
        let changed = added > 0 || removed > 0;
        if changed {
            store_ancestor(&mut ancestors, uri, AncestorRecord { keys: remaining })?;
        }
        DeltaOutcome { added, removed, committed: changed }
    };

    if outcome.committed {
        txn.commit().context(CommitSnafu)?;
    } else {
        txn.abort().context(StorageSnafu)?;
    }
    Ok(outcome)
}

fn load_ancestor<T>(table: &T, uri: &[u8]) -> Result<AncestorRecord>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    match table.get(uri).context(StorageSnafu)? {
        Some(bytes) => codec::decode(bytes.value()).context(CodecSnafu),
        None => Ok(AncestorRecord::default()),
    }
}

fn store_ancestor(
    table: &mut Table<'_, &'static [u8], &'static [u8]>,
    uri: &[u8],
    record: AncestorRecord,
) -> Result<()> {
    if record.keys.is_empty() {
        table.remove(uri).context(StorageSnafu)?;
    } else {
        let bytes = codec::encode(&record).context(CodecSnafu)?;
        table.insert(uri, bytes.as_slice()).context(StorageSnafu)?;
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use proptest::prelude::*;
    use tagindex_test_utils::{strategies::arb_value, test_store_config};
    use tagindex_types::NamespaceId;

    use super::*;
    use crate::{engine::StorageEngine, keys::encode_index_key};

    const URI: &str = "/docs/a";

    fn store() -> NamespaceStore {
        NamespaceStore::new(NamespaceId::new("acme").unwrap(), StorageEngine::open_in_memory().unwrap())
    }

    fn key(token: &str, value: &str) -> Vec<u8> {
        encode_index_key(token, value, None, "a").unwrap()
    }

    fn index_keys(store: &NamespaceStore) -> BTreeSet<Vec<u8>> {
        let txn = store.engine().begin_read().unwrap();
        let table = txn.open_table(Tables::INDEX).unwrap();
        table.iter().unwrap().map(|e| e.unwrap().0.value().to_vec()).collect()
    }

    fn full(keys: Vec<Vec<u8>>) -> Delta {
        Delta::builder().kind(IndexKind::Index).entity_uri(URI).keys(keys).build()
    }

    #[test]
    fn test_full_update_replaces_keys() {
        let engine = IndexDiffEngine::new(test_store_config());
        let store = store();
        engine.apply_delta(&store, &full(vec![key("1", "x"), key("2", "y")])).unwrap();

        let outcome = engine.apply_delta(&store, &full(vec![key("1", "z")])).unwrap();
        assert_eq!(outcome, DeltaOutcome { added: 1, removed: 2, committed: true });
        assert_eq!(index_keys(&store), BTreeSet::from([key("1", "z")]));

        let ancestor = engine.ancestor(&store, IndexKind::Index, URI).unwrap().unwrap();
        assert_eq!(ancestor.keys, index_keys(&store));
    }

    #[test]
    fn test_repeat_is_noop() {
        let engine = IndexDiffEngine::new(test_store_config());
        let store = store();
        let delta = full(vec![key("1", "x")]);
        assert!(engine.apply_delta(&store, &delta).unwrap().committed);
        let again = engine.apply_delta(&store, &delta).unwrap();
        assert_eq!(again, DeltaOutcome::default());
    }

    #[test]
    fn test_full_delete_removes_ancestor() {
        let engine = IndexDiffEngine::new(test_store_config());
        let store = store();
        engine.apply_delta(&store, &full(vec![key("1", "x"), key("2", "y")])).unwrap();

        let delete = Delta::builder().kind(IndexKind::Index).entity_uri(URI).delete(true).build();
        let outcome = engine.apply_delta(&store, &delete).unwrap();
        assert_eq!(outcome.removed, 2);
        assert!(index_keys(&store).is_empty());
        assert_eq!(engine.ancestor(&store, IndexKind::Index, URI).unwrap(), None);
    }

    #[test]
    fn test_partial_delete_preserves_other_items() {
        let engine = IndexDiffEngine::new(test_store_config());
        let store = store();
        let x = [key("1", "x1"), key("1", "x2")];
        let y = [key("2", "y1")];
        engine.apply_delta(&store, &full([x.to_vec(), y.to_vec()].concat())).unwrap();

        let delete = Delta::builder()
            .kind(IndexKind::Index)
            .entity_uri(URI)
            .scope(DeltaScope::Partial { item_tokens: BTreeSet::from(["1".to_string()]) })
            .delete(true)
            .build();
        let outcome = engine.apply_delta(&store, &delete).unwrap();
        assert_eq!(outcome.removed, 2);

        let expected: BTreeSet<Vec<u8>> = y.iter().cloned().collect();
        assert_eq!(index_keys(&store), expected);
        let ancestor = engine.ancestor(&store, IndexKind::Index, URI).unwrap().unwrap();
        assert_eq!(ancestor.keys, expected);
    }

    #[test]
    fn test_partial_update_keeps_untouched_item() {
        let engine = IndexDiffEngine::new(test_store_config());
        let store = store();
        engine.apply_delta(&store, &full(vec![key("1", "old"), key("2", "keep")])).unwrap();

        let update = Delta::builder()
            .kind(IndexKind::Index)
            .entity_uri(URI)
            .keys(vec![key("1", "new")])
            .scope(DeltaScope::Partial { item_tokens: BTreeSet::from(["1".to_string()]) })
            .build();
        engine.apply_delta(&store, &update).unwrap();
        assert_eq!(index_keys(&store), BTreeSet::from([key("1", "new"), key("2", "keep")]));
    }

    #[test]
    fn test_token_prefix_is_not_a_match() {
        let scope = DeltaScope::Partial { item_tokens: BTreeSet::from(["1".to_string()]) };
        assert!(scope.covers(&key("1", "v")));
        assert!(!scope.covers(&key("12", "v")));
    }

    #[test]
    fn test_kinds_use_separate_tables() {
        let engine = IndexDiffEngine::new(test_store_config());
        let store = store();
        let manifest = Delta::builder()
            .kind(IndexKind::Manifest)
            .entity_uri(URI)
            .keys(vec![key("5", "")])
            .build();
        engine.apply_delta(&store, &manifest).unwrap();
        assert!(index_keys(&store).is_empty());
        assert!(engine.ancestor(&store, IndexKind::Manifest, URI).unwrap().is_some());
        assert!(engine.ancestor(&store, IndexKind::Index, URI).unwrap().is_none());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_apply_twice_equals_once(
            first in proptest::collection::vec(arb_value(), 0..6),
            second in proptest::collection::vec(arb_value(), 0..6),
        ) {
            let engine = IndexDiffEngine::new(test_store_config());
            let store = store();
            let keys = |values: &[String]| values.iter().map(|v| key("3", v)).collect::<Vec<_>>();

            engine.apply_delta(&store, &full(keys(&first))).unwrap();
            engine.apply_delta(&store, &full(keys(&second))).unwrap();
            let once = (index_keys(&store), engine.ancestor(&store, IndexKind::Index, URI).unwrap());

            let repeat = engine.apply_delta(&store, &full(keys(&second))).unwrap();
            prop_assert!(!repeat.committed);
            let twice = (index_keys(&store), engine.ancestor(&store, IndexKind::Index, URI).unwrap());
            prop_assert_eq!(&once, &twice);

            let expected: BTreeSet<Vec<u8>> = keys(&second).into_iter().collect();
            prop_assert_eq!(once.0, expected.clone());
            prop_assert_eq!(once.1.map(|a| a.keys).unwrap_or_default(), expected);
        }
    }
}
