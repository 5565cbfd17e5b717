use crate::model::{Hash, HashAlgorithm};
use crate::trie::Node;
use crate::Result;

/// Content-addressed storage for trie nodes.
///
/// Implementations must satisfy these invariants:
/// - The key of a node is the digest of its canonical encoding under
///   [`NodeStore::algorithm`]; there is no separate key space.
/// - Persisting content that is already present never creates a second entry.
///   It records one more reference to the same key instead, because identical
///   nodes can sit at several positions in a trie.
/// - Removing drops one reference; the entry disappears when none are left.
pub trait NodeStore {
    /// Digest used to derive node keys
    fn algorithm(&self) -> HashAlgorithm;

    /// Store a node and return its hash
    fn persist_node(&self, node: &Node) -> Result<Hash>;

    /// Load a node by hash.
    ///
    /// Returns `Error::NotFound` if no node is stored under `hash`.
    fn load_node(&self, hash: &Hash) -> Result<Node>;

    /// Drop one reference to a node. Returns `true` if the node existed.
    fn remove_node(&self, hash: &Hash) -> Result<bool>;

    /// Check whether a node is stored under `hash`
    fn contains_node(&self, hash: &Hash) -> Result<bool>;
}

/// Content-addressed storage for values too large to inline in a node.
pub trait ValueStore {
    /// Store a value and return the digest of its bytes.
    ///
    /// Storing the same bytes twice is a no-op.
    fn persist_value(&self, value: &[u8]) -> Result<Hash>;

    /// Load a value by hash.
    ///
    /// Returns `Error::NotFound` if nothing is stored under `hash`.
    fn load_value(&self, hash: &Hash) -> Result<Vec<u8>>;
}
