//! High-level Database API
//!
//! A [`Database`] owns a single-file [`ObjectStore`] and the root of the trie
//! kept in it. Each call opens a [`MerkleTrie`] view at the recorded root.

use crate::config::TrieConfig;
use crate::model::{Hash, HashAlgorithm};
use crate::store::ObjectStore;
use crate::trie::{MerkleTrie, VerifyReport};
use crate::Result;
use std::path::Path;

/// Store counters for status output
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Stats {
    pub nodes: usize,
    pub values: usize,
    pub file_size: u64,
}

/// The main database interface
pub struct Database {
    store: ObjectStore,
    config: TrieConfig,
}

impl Database {
    /// Create a new database at the given path
    pub fn create(path: impl AsRef<Path>, config: TrieConfig) -> Result<Self> {
        config.validate()?;
        let store = ObjectStore::create(path, config.hash_algorithm)?
            .with_compression_level(config.compression_level);
        Ok(Database { store, config })
    }

    /// Open an existing database
    ///
    /// The hash algorithm always comes from the file; the one in `config` is ignored.
    pub fn open(path: impl AsRef<Path>, config: TrieConfig) -> Result<Self> {
        config.validate()?;
        let store = ObjectStore::open(path)?.with_compression_level(config.compression_level);
        if store.hash_algorithm() != config.hash_algorithm {
            tracing::debug!(
                file = %store.hash_algorithm(),
                configured = %config.hash_algorithm,
                "using hash algorithm recorded in database file"
            );
        }
        Ok(Database { store, config })
    }

    /// Open or create a database
    pub fn open_or_create(path: impl AsRef<Path>, config: TrieConfig) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path, config)
        } else {
            Self::create(path, config)
        }
    }

    fn trie(&self) -> Result<MerkleTrie<'_, ObjectStore, ObjectStore>> {
        Ok(MerkleTrie::from_root(&self.store, &self.store, self.store.root())?
            .with_config(&self.config))
    }

    /// Store `value` under `key`
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut trie = self.trie()?;
        // The trie only moves its root once the new one is complete
        let result = trie.put(key, value);
        self.store.set_root(trie.root_hash());
        result
    }

    /// Get the value stored under `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.trie()?.get(key)
    }

    /// All pairs whose key starts with `prefix`, in key order
    pub fn entries(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.trie()?.entries(prefix)
    }

    /// Check that everything reachable from the root is present and intact
    pub fn verify(&self) -> Result<VerifyReport> {
        self.trie()?.verify()
    }

    /// Current root hash, `None` while the database is empty
    pub fn root_hash(&self) -> Option<Hash> {
        self.store.root()
    }

    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.store.hash_algorithm()
    }

    pub fn config(&self) -> &TrieConfig {
        &self.config
    }

    pub fn stats(&self) -> Result<Stats> {
        Ok(Stats {
            nodes: self.store.node_count(),
            values: self.store.value_count(),
            file_size: self.store.file_size()?,
        })
    }

    /// Flush the index and root to disk
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }
}
