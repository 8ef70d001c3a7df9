//! Scratch directories for persistent-storage tests.

// A test that cannot create its scratch directory has nothing to run against.
#![allow(clippy::expect_used)]

use std::path::{Path, PathBuf};

use tagindex_types::config::StoreConfig;
use tempfile::TempDir;

use crate::config::test_store_config;

/// Subdirectory holding namespace environments.
const DATA_DIR: &str = "data";

/// A temporary directory removed on drop.
///
/// Namespace environments go under `data/`, leaving the root free for config
/// files and other fixtures.
///
/// ```
/// use tagindex_test_utils::TestDir;
///
/// let dir = TestDir::new();
/// let config = dir.store_config();
/// assert_eq!(config.data_dir.as_deref(), Some(dir.data_dir().as_path()));
/// assert!(dir.environment("acme").ends_with("data/acme.redb"));
/// ```
pub struct TestDir {
    inner: TempDir,
}

impl TestDir {
    /// Creates a new temporary directory.
    ///
    /// # Panics
    ///
    /// Panics if the directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self { inner: TempDir::new().expect("failed to create temp directory") }
    }

    /// Root of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.inner.path()
    }

    /// `path` relative to the root.
    #[must_use]
    pub fn join<P: AsRef<Path>>(&self, path: P) -> PathBuf {
        self.inner.path().join(path)
    }

    /// Directory for namespace environments. Not created until a store opens.
    #[must_use]
    pub fn data_dir(&self) -> PathBuf {
        self.join(DATA_DIR)
    }

    /// Where the environment of `namespace` is stored.
    #[must_use]
    pub fn environment(&self, namespace: &str) -> PathBuf {
        self.data_dir().join(format!("{namespace}.redb"))
    }

    /// [`test_store_config`] persisting under [`TestDir::data_dir`].
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig { data_dir: Some(self.data_dir()), ..test_store_config() }
    }
}

impl Default for TestDir {
    fn default() -> Self {
        Self::new()
    }
}
