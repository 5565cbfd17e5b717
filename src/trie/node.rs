//! Trie node types

use super::NibblePath;
use crate::model::{Hash, HashAlgorithm};
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The value a node carries for a key
///
/// Short values live inline in the node. Values longer than the configured
/// threshold are written to the value store and only their content hash is
/// kept in the trie.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserValue {
    Inline(Vec<u8>),
    Stored(Hash),
}

impl UserValue {
    pub fn is_stored(&self) -> bool {
        matches!(self, UserValue::Stored(_))
    }
}

/// A node in the merkle-patricia trie
///
/// A node's storage key is the digest of its bincode encoding, so any change
/// to a node (including a child reference) gives it a new identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Node {
    /// Terminates a key
    Leaf {
        /// Remaining nibbles from this node to the end of the key
        path: NibblePath,
        value: UserValue,
    },
    /// A run of nibbles shared by everything below it
    Extension {
        path: NibblePath,
        /// Hash of the single child (always a branch)
        child: Hash,
    },
    /// A fork on the next nibble
    Branch {
        /// Children indexed by nibble (0..=15)
        children: BTreeMap<u8, Hash>,
        /// Value of the key that ends exactly at this branch
        value: Option<UserValue>,
    },
}

impl Node {
    pub fn leaf(path: NibblePath, value: UserValue) -> Self {
        Node::Leaf { path, value }
    }

    pub fn extension(path: NibblePath, child: Hash) -> Self {
        Node::Extension { path, child }
    }

    /// Create a branch with no children and no value
    pub fn branch() -> Self {
        Node::Branch {
            children: BTreeMap::new(),
            value: None,
        }
    }

    /// Canonical byte encoding
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(data)?)
    }

    /// Compute the storage key of this node
    pub fn hash(&self, algorithm: HashAlgorithm) -> Result<Hash> {
        Ok(algorithm.digest(&self.encode()?))
    }

    /// The compressed path of a leaf or extension
    pub fn path(&self) -> Option<&NibblePath> {
        match self {
            Node::Leaf { path, .. } | Node::Extension { path, .. } => Some(path),
            Node::Branch { .. } => None,
        }
    }

    /// The value stored at this exact node (if any)
    pub fn value(&self) -> Option<&UserValue> {
        match self {
            Node::Leaf { value, .. } => Some(value),
            Node::Branch { value, .. } => value.as_ref(),
            Node::Extension { .. } => None,
        }
    }

    /// Hashes of the nodes directly below this one
    pub fn children(&self) -> Vec<Hash> {
        match self {
            Node::Leaf { .. } => Vec::new(),
            Node::Extension { child, .. } => vec![*child],
            Node::Branch { children, .. } => children.values().copied().collect(),
        }
    }

    /// Number of key nibbles this node consumes when a lookup passes through it
    pub fn consumed(&self) -> usize {
        match self {
            Node::Branch { .. } => 1,
            Node::Extension { path, .. } | Node::Leaf { path, .. } => path.len(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Node::Leaf { .. } => "leaf",
            Node::Extension { .. } => "extension",
            Node::Branch { .. } => "branch",
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Node::Leaf { .. })
    }

    pub fn is_branch(&self) -> bool {
        matches!(self, Node::Branch { .. })
    }
}
