//! Registry of open namespace environments.
//!
//! Environments are opened lazily on first access and kept for the process
//! lifetime unless closed explicitly. The registry is constructed at startup
//! and passed by reference to everything that needs a store.
//!
//! Each namespace has its own slot. Opening one environment, including lock
//! retries, holds only that namespace's slot lock.

use std::{
    collections::HashMap,
    path::PathBuf,
    sync::{Arc, Weak},
};

use parking_lot::{Mutex, RwLock};
use snafu::ResultExt;
use tagindex_types::{IndexError, NamespaceId, config::StoreConfig};
use tracing::{debug, info};

use crate::{
    engine::StorageEngine,
    error::{DataDirSnafu, Result},
    retry::with_lock_retry,
    store::NamespaceStore,
};

/// Open state of one namespace.
#[derive(Default)]
struct SlotState {
    /// The registered store, `None` when closed.
    open: Option<Arc<NamespaceStore>>,
    /// A closed store that callers may still hold; reused on reopen while alive.
    retired: Weak<NamespaceStore>,
}

type Slot = Arc<Mutex<SlotState>>;

/// Lazily-opened namespace environments.
pub struct NamespaceRegistry {
    config: StoreConfig,
    slots: RwLock<HashMap<NamespaceId, Slot>>,
}

impl NamespaceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self { config, slots: RwLock::new(HashMap::new()) }
    }

    /// Store configuration shared by every environment.
    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn slot(&self, namespace: &NamespaceId) -> Slot {
        if let Some(slot) = self.slots.read().get(namespace) {
            return Arc::clone(slot);
        }
        Arc::clone(self.slots.write().entry(namespace.clone()).or_default())
    }

    /// Returns the environment for `namespace`, opening it on first use.
    ///
    /// A namespace closed while callers still hold its store is reopened onto
    /// that same store.
    ///
    /// # Errors
    ///
    /// Returns [`IndexError::Environment`] if the environment cannot be opened,
    /// or [`IndexError::RetryExceeded`] if its file stays locked by another process.
    pub fn get(&self, namespace: &NamespaceId) -> Result<Arc<NamespaceStore>, IndexError> {
        let slot = self.slot(namespace);
        let mut state = slot.lock();
        if let Some(store) = &state.open {
            return Ok(Arc::clone(store));
        }

        let store = match state.retired.upgrade() {
            Some(store) => {
                debug!(namespace = %namespace, "Reopened namespace environment still in use");
                store
            },
            None => {
                let engine =
                    with_lock_retry(namespace, &self.config, "open", || self.open_engine(namespace))?;
                info!(namespace = %namespace, persistent = self.config.data_dir.is_some(), "Opened namespace environment");
                Arc::new(NamespaceStore::new(namespace.clone(), engine))
            },
        };
        state.retired = Weak::new();
        state.open = Some(Arc::clone(&store));
        Ok(store)
    }

    fn open_engine(&self, namespace: &NamespaceId) -> Result<StorageEngine> {
        match self.environment_path(namespace) {
            Some(path) => {
                if let Some(dir) = path.parent() {
                    std::fs::create_dir_all(dir)
                        .context(DataDirSnafu { path: dir.display().to_string() })?;
                }
                StorageEngine::open(&path)
            },
            None => StorageEngine::open_in_memory(),
        }
    }

    /// File path of a namespace environment, `None` when in memory.
    #[must_use]
    pub fn environment_path(&self, namespace: &NamespaceId) -> Option<PathBuf> {
        self.config.data_dir.as_ref().map(|dir| dir.join(format!("{namespace}.redb")))
    }

    /// Closes one environment. Returns whether it was open.
    ///
    /// Callers still holding the store keep it usable until they drop it; a
    /// `get` in the meantime hands that store back out.
    pub fn close_namespace(&self, namespace: &NamespaceId) -> bool {
        let Some(slot) = self.slots.read().get(namespace).map(Arc::clone) else {
            return false;
        };
        let closed = retire(&mut slot.lock());
        if closed {
            info!(namespace = %namespace, "Closed namespace environment");
        }
        closed
    }

    /// Closes every open environment.
    pub fn close_all(&self) {
        let slots: Vec<Slot> = self.slots.read().values().map(Arc::clone).collect();
        let count = slots.iter().filter(|slot| retire(&mut slot.lock())).count();
        debug!(count, "Closed all namespace environments");
    }

    /// Namespaces with an open environment, sorted.
    #[must_use]
    pub fn namespaces(&self) -> Vec<NamespaceId> {
        let slots: Vec<(NamespaceId, Slot)> = self
            .slots
            .read()
            .iter()
            .map(|(namespace, slot)| (namespace.clone(), Arc::clone(slot)))
            .collect();
        let mut namespaces: Vec<NamespaceId> = slots
            .into_iter()
            .filter(|(_, slot)| slot.lock().open.is_some())
            .map(|(namespace, _)| namespace)
            .collect();
        namespaces.sort();
        namespaces
    }
}

/// Moves an open store to `retired`. Returns whether it was open.
fn retire(state: &mut SlotState) -> bool {
    match state.open.take() {
        Some(store) => {
            state.retired = Arc::downgrade(&store);
            true
        },
        None => false,
    }
}
