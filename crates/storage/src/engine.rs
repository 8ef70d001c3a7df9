//! redb storage engine wrapper.
//!
//! Provides a thin wrapper around redb with:
//! - Database lifecycle management (file-backed or in-memory)
//! - Table creation on open so read transactions never miss a table
//! - Convenient transaction constructors

use std::{path::Path, sync::Arc};

use redb::{Database, ReadTransaction, ReadableTable, WriteTransaction};
use snafu::ResultExt;

use crate::{
    error::{CommitSnafu, OpenSnafu, Result, StorageSnafu, TableSnafu, TransactionSnafu},
    tables::Tables,
};

/// Storage engine backed by one redb database.
#[derive(Clone)]
pub struct StorageEngine {
    db: Arc<Database>,
}

impl StorageEngine {
    /// Opens or creates a database file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`](crate::StoreError::Open) if the file cannot be
    /// opened, or a table error if the schema cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path).context(OpenSnafu { path: path.display().to_string() })?;
        let engine = Self { db: Arc::new(db) };
        engine.create_tables()?;
        Ok(engine)
    }

    /// Creates a new in-memory database.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be initialized.
    pub fn open_in_memory() -> Result<Self> {
        let db = Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .context(OpenSnafu { path: ":memory:" })?;
        let engine = Self { db: Arc::new(db) };
        engine.create_tables()?;
        Ok(engine)
    }

    /// Begins a read transaction over a consistent snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transaction`](crate::StoreError::Transaction) on failure.
    pub fn begin_read(&self) -> Result<ReadTransaction> {
        self.db.begin_read().context(TransactionSnafu)
    }

    /// Begins a write transaction. Blocks while another writer is active.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Transaction`](crate::StoreError::Transaction) on failure.
    pub fn begin_write(&self) -> Result<WriteTransaction> {
        self.db.begin_write().context(TransactionSnafu)
    }

    fn create_tables(&self) -> Result<()> {
        let txn = self.begin_write()?;
        for table in Tables::BYTE_TABLES {
            txn.open_table(table).context(TableSnafu)?;
        }
        {
            let mut seqs = txn.open_table(Tables::SEQUENCES).context(TableSnafu)?;
            if seqs.get("shortening").context(StorageSnafu)?.is_none() {
                seqs.insert("shortening", 0u64).context(StorageSnafu)?;
            }
        }
        txn.commit().context(CommitSnafu)
    }
}
