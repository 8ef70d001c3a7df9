//! Item and DISTKEY name shortening.
//!
//! Long names (`/docs#title`, `region`) are replaced in index keys by decimal
//! tokens allocated from the namespace's `shortening` counter. A name's token is
//! registered first-writer-wins and never changes afterwards, so resolved tokens
//! are cached per environment.

use std::collections::HashMap;

use parking_lot::RwLock;
use redb::ReadableTable;
use snafu::ResultExt;
use tagindex_types::{IndexError, config::StoreConfig};
use tracing::debug;

use crate::{
    error::{CommitSnafu, CorruptSnafu, Result, StorageSnafu, TableSnafu},
    keys::key_str,
    retry::with_lock_retry,
    store::NamespaceStore,
    tables::{BytesTable, Tables},
};

/// Counter that allocates shortening tokens.
const SHORTENING_SEQUENCE: &str = "shortening";

/// Which shortening table a name belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    /// `parent#item` names, or bare parent paths for the manifest.
    Item,
    /// DISTKEY item names.
    Distkey,
}

impl NameKind {
    fn table(self) -> BytesTable {
        match self {
            NameKind::Item => Tables::ITEM_SHORTENING,
            NameKind::Distkey => Tables::DISTKEY_SHORTENING,
        }
    }
}

/// Resolved tokens of one environment.
#[derive(Default)]
pub(crate) struct TokenCache {
    tokens: RwLock<HashMap<(NameKind, String), String>>,
}

impl TokenCache {
    fn get(&self, kind: NameKind, name: &str) -> Option<String> {
        self.tokens.read().get(&(kind, name.to_string())).cloned()
    }

    fn insert(&self, kind: NameKind, name: &str, token: &str) {
        self.tokens.write().insert((kind, name.to_string()), token.to_string());
    }
}

/// Outcome of one registration attempt.
enum Registration {
    Won(String),
    Lost(String),
}

/// Allocates and resolves shortening tokens.
pub struct ShorteningRegistry {
    config: StoreConfig,
}

impl ShorteningRegistry {
    /// Creates a registry using the store's retry settings.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    /// Returns the token for `full_name`, allocating one if the name is new.
    ///
    /// Concurrent callers for the same name all observe the same token. A
    /// caller that loses the registration race discards its counter value.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::RetryExceeded`] if lock conflicts persist, or the
    /// converted store error for any other failure.
    pub fn get_or_create_token(
        &self,
        store: &NamespaceStore,
        kind: NameKind,
        full_name: &str,
    ) -> Result<String, IndexError> {
        if let Some(token) = store.tokens().get(kind, full_name) {
            return Ok(token);
        }
        let token = with_lock_retry(store.namespace(), &self.config, "shorten", || {
            if let Some(token) = probe(store, kind, full_name)? {
                return Ok(token);
            }
            let candidate = store.next_sequence(SHORTENING_SEQUENCE)?.to_string();
            match register(store, kind, full_name, &candidate)? {
                Registration::Won(token) => {
                    debug!(namespace = %store.namespace(), name = full_name, token = %token, "Registered shortening token");
                    Ok(token)
                },
                Registration::Lost(token) => {
                    debug!(namespace = %store.namespace(), name = full_name, discarded = %candidate, "Lost shortening race");
                    Ok(token)
                },
            }
        })?;
        store.tokens().insert(kind, full_name, &token);
        Ok(token)
    }

    /// Returns the token for `full_name` without allocating.
    ///
    /// Queries use this: a name that was never indexed has no records.
    ///
    /// # Errors
    ///
    /// Returns the converted store error if the lookup fails.
    pub fn lookup_token(
        &self,
        store: &NamespaceStore,
        kind: NameKind,
        full_name: &str,
    ) -> Result<Option<String>, IndexError> {
        if let Some(token) = store.tokens().get(kind, full_name) {
            return Ok(Some(token));
        }
        let token = with_lock_retry(store.namespace(), &self.config, "lookup_token", || {
            probe(store, kind, full_name)
        })?;
        if let Some(token) = &token {
            store.tokens().insert(kind, full_name, token);
        }
        Ok(token)
    }
}

fn probe(store: &NamespaceStore, kind: NameKind, full_name: &str) -> Result<Option<String>> {
    store.probe(kind.table(), full_name.as_bytes())?.map(decode_token).transpose()
}

fn decode_token(bytes: Vec<u8>) -> Result<String> {
    let token = key_str(&bytes)?;
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return CorruptSnafu { message: format!("malformed shortening token {token:?}") }.fail();
    }
    Ok(token.to_string())
}

/// Inserts `full_name -> candidate` unless the name is already registered.
fn register(
    store: &NamespaceStore,
    kind: NameKind,
    full_name: &str,
    candidate: &str,
) -> Result<Registration> {
    let txn = store.engine().begin_write()?;
    let existing = {
        let mut table = txn.open_table(kind.table()).context(TableSnafu)?;
        let existing = table.get(full_name.as_bytes()).context(StorageSnafu)?.map(|v| v.value().to_vec());
        if existing.is_none() {
            table.insert(full_name.as_bytes(), candidate.as_bytes()).context(StorageSnafu)?;
        }
        existing
    };
    match existing {
        Some(bytes) => {
            txn.abort().context(StorageSnafu)?;
            Ok(Registration::Lost(decode_token(bytes)?))
        },
        None => {
            txn.commit().context(CommitSnafu)?;
            Ok(Registration::Won(candidate.to_string()))
        },
    }
}
