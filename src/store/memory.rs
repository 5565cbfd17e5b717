use crate::model::{Hash, HashAlgorithm};
use crate::store::{NodeStore, ValueStore};
use crate::trie::Node;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

struct NodeEntry {
    node: Node,
    refs: u32,
}

/// In-memory, HashMap-based node and value store.
///
/// Intended for tests and embedding. Nodes and values live in separate maps
/// behind `RwLock`s and are cloned on read.
pub struct MemoryStore {
    algorithm: HashAlgorithm,
    nodes: RwLock<HashMap<Hash, NodeEntry>>,
    values: RwLock<HashMap<Hash, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_algorithm(HashAlgorithm::default())
    }

    pub fn with_algorithm(algorithm: HashAlgorithm) -> Self {
        MemoryStore {
            algorithm,
            nodes: RwLock::new(HashMap::new()),
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Number of distinct nodes currently stored
    pub fn node_count(&self) -> usize {
        self.nodes.read().len()
    }

    /// Number of large values currently stored
    pub fn value_count(&self) -> usize {
        self.values.read().len()
    }

    /// How many positions in the trie currently reference `hash`
    pub fn node_refs(&self, hash: &Hash) -> u32 {
        self.nodes.read().get(hash).map_or(0, |entry| entry.refs)
    }

    /// Sorted list of all node hashes
    pub fn node_hashes(&self) -> Vec<Hash> {
        let mut hashes: Vec<Hash> = self.nodes.read().keys().copied().collect();
        hashes.sort();
        hashes
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for MemoryStore {
    fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    fn persist_node(&self, node: &Node) -> Result<Hash> {
        let hash = node.hash(self.algorithm)?;
        let mut nodes = self.nodes.write();
        nodes
            .entry(hash)
            .and_modify(|entry| entry.refs += 1)
            .or_insert_with(|| NodeEntry {
                node: node.clone(),
                refs: 1,
            });
        Ok(hash)
    }

    fn load_node(&self, hash: &Hash) -> Result<Node> {
        self.nodes
            .read()
            .get(hash)
            .map(|entry| entry.node.clone())
            .ok_or_else(|| Error::NotFound(hash.to_hex()))
    }

    fn remove_node(&self, hash: &Hash) -> Result<bool> {
        let mut nodes = self.nodes.write();
        let Some(entry) = nodes.get_mut(hash) else {
            return Ok(false);
        };
        entry.refs -= 1;
        if entry.refs == 0 {
            nodes.remove(hash);
        }
        Ok(true)
    }

    fn contains_node(&self, hash: &Hash) -> Result<bool> {
        Ok(self.nodes.read().contains_key(hash))
    }
}

impl ValueStore for MemoryStore {
    fn persist_value(&self, value: &[u8]) -> Result<Hash> {
        let hash = self.algorithm.digest(value);
        self.values
            .write()
            .entry(hash)
            .or_insert_with(|| value.to_vec());
        Ok(hash)
    }

    fn load_value(&self, hash: &Hash) -> Result<Vec<u8>> {
        self.values
            .read()
            .get(hash)
            .cloned()
            .ok_or_else(|| Error::NotFound(hash.to_hex()))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("algorithm", &self.algorithm)
            .field("node_count", &self.node_count())
            .field("value_count", &self.value_count())
            .finish()
    }
}
