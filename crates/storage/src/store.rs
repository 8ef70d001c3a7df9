//! Per-namespace store handle and table cursor.
//!
//! [`NamespaceStore`] is the single shared handle for one tenant's environment.
//! Transactions are plain redb transactions; [`TableCursor`] adds seek/next/close
//! over any readable byte table.

use redb::{ReadOnlyTable, ReadableTable};
use snafu::ResultExt;
use tagindex_types::NamespaceId;

use crate::{
    engine::StorageEngine,
    error::{CommitSnafu, Result, StorageSnafu, TableSnafu},
    shortening::TokenCache,
    tables::{BytesTable, Tables},
};

/// Handle to one namespace environment.
pub struct NamespaceStore {
    namespace: NamespaceId,
    engine: StorageEngine,
    tokens: TokenCache,
}

impl NamespaceStore {
    /// Wraps an opened engine for `namespace`.
    #[must_use]
    pub fn new(namespace: NamespaceId, engine: StorageEngine) -> Self {
        Self { namespace, engine, tokens: TokenCache::default() }
    }

    /// The namespace this environment belongs to.
    #[must_use]
    pub fn namespace(&self) -> &NamespaceId {
        &self.namespace
    }

    /// The underlying engine.
    #[must_use]
    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }

    pub(crate) fn tokens(&self) -> &TokenCache {
        &self.tokens
    }

    /// Reads one value outside any caller transaction.
    ///
    /// # Errors
    ///
    /// Returns a store error if the read transaction or lookup fails.
    pub fn probe(&self, table: BytesTable, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let txn = self.engine.begin_read()?;
        let table = txn.open_table(table).context(TableSnafu)?;
        Ok(table.get(key).context(StorageSnafu)?.map(|v| v.value().to_vec()))
    }

    /// Runs `f` against one table inside a fresh read transaction.
    ///
    /// # Errors
    ///
    /// Returns a store error if the transaction or table cannot be opened, or
    /// whatever `f` returns.
    pub fn with_read_table<R>(
        &self,
        table: BytesTable,
        f: impl FnOnce(&ReadOnlyTable<&'static [u8], &'static [u8]>) -> Result<R>,
    ) -> Result<R> {
        let txn = self.engine.begin_read()?;
        let table = txn.open_table(table).context(TableSnafu)?;
        f(&table)
    }

    /// Increments a named counter in its own write transaction.
    ///
    /// Counters start at zero and zero is never returned, so the first value is 1.
    ///
    /// # Errors
    ///
    /// Returns a store error if the write transaction fails.
    pub fn next_sequence(&self, name: &str) -> Result<u64> {
        let txn = self.engine.begin_write()?;
        let next = {
            let mut seqs = txn.open_table(Tables::SEQUENCES).context(TableSnafu)?;
            let current = seqs.get(name).context(StorageSnafu)?.map_or(0, |v| v.value());
            let next = match current.wrapping_add(1) {
                0 => 1,
                n => n,
            };
            seqs.insert(name, next).context(StorageSnafu)?;
            next
        };
        txn.commit().context(CommitSnafu)?;
        Ok(next)
    }
}

type OwnedEntries<'t> = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>)>> + 't>;

/// Cursor over a byte table.
///
/// The cursor is unpositioned until [`seek`](Self::seek) or
/// [`seek_first`](Self::seek_first). Dropping it closes it.
pub struct TableCursor<'t, T>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    table: &'t T,
    entries: Option<OwnedEntries<'t>>,
}

impl<'t, T> TableCursor<'t, T>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    /// Opens an unpositioned cursor.
    pub fn open(table: &'t T) -> Self {
        Self { table, entries: None }
    }

    /// Positions the cursor at the first key `>= key`.
    ///
    /// # Errors
    ///
    /// Returns a store error if the range cannot be opened.
    pub fn seek(&mut self, key: &[u8]) -> Result<()> {
        let table: &'t T = self.table;
        let range = table.range(key..).context(StorageSnafu)?;
        self.entries = Some(Box::new(range.map(|entry| {
            let (k, v) = entry.context(StorageSnafu)?;
            Ok((k.value().to_vec(), v.value().to_vec()))
        })));
        Ok(())
    }

    /// Positions the cursor at the first key of the table.
    ///
    /// # Errors
    ///
    /// Returns a store error if the range cannot be opened.
    pub fn seek_first(&mut self) -> Result<()> {
        let table: &'t T = self.table;
        let range = table.iter().context(StorageSnafu)?;
        self.entries = Some(Box::new(range.map(|entry| {
            let (k, v) = entry.context(StorageSnafu)?;
            Ok((k.value().to_vec(), v.value().to_vec()))
        })));
        Ok(())
    }

    /// Advances to the next entry. Returns `None` past the end or when unpositioned.
    ///
    /// # Errors
    ///
    /// Returns a store error if reading the entry fails.
    pub fn next_entry(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
        match self.entries.as_mut() {
            Some(entries) => entries.next().transpose(),
            None => Ok(None),
        }
    }

    /// Releases the underlying range.
    pub fn close(&mut self) {
        self.entries = None;
    }
}

impl<T> Drop for TableCursor<'_, T>
where
    T: ReadableTable<&'static [u8], &'static [u8]>,
{
    fn drop(&mut self) {
        self.close();
    }
}
