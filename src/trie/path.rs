//! The root-to-node path produced by a lookup and consumed by a mutation

use super::Node;
use crate::model::Hash;

/// A node on a lookup path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PathEntry {
    pub node: Node,
    /// Key the node is currently stored under, `None` if it was created by
    /// the mutation in progress and has never been persisted
    pub stored: Option<Hash>,
}

/// Nodes from the root (bottom) to the deepest matched node (top)
///
/// A lookup hands its path to the following mutation by value, so the
/// mutation can rebuild it without re-walking the trie.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathStack {
    entries: Vec<PathEntry>,
}

impl PathStack {
    pub fn new() -> Self {
        PathStack {
            entries: Vec::new(),
        }
    }

    pub fn push(&mut self, entry: PathEntry) {
        self.entries.push(entry);
    }

    /// Push a node loaded from the store under `hash`
    pub fn push_stored(&mut self, node: Node, hash: Hash) {
        self.entries.push(PathEntry {
            node,
            stored: Some(hash),
        });
    }

    /// Push a node created by the current mutation
    pub fn push_new(&mut self, node: Node) {
        self.entries.push(PathEntry { node, stored: None });
    }

    pub fn pop(&mut self) -> Option<PathEntry> {
        self.entries.pop()
    }

    pub fn top(&self) -> Option<&PathEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Key nibbles consumed to reach the top node
    ///
    /// Every node below the top was passed through: a branch consumed its
    /// selector nibble, an extension its whole path.
    pub fn consumed(&self) -> usize {
        let below_top = self.entries.len().saturating_sub(1);
        self.entries[..below_top]
            .iter()
            .map(|entry| entry.node.consumed())
            .sum()
    }

    /// Nodes from root to top
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.entries.iter().map(|entry| &entry.node)
    }
}

impl IntoIterator for PathStack {
    type Item = PathEntry;
    type IntoIter = std::vec::IntoIter<PathEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::{NibblePath, UserValue};

    #[test]
    fn test_consumed_excludes_top() {
        let mut stack = PathStack::new();
        assert_eq!(stack.consumed(), 0);

        stack.push_new(Node::extension(
            NibblePath::from_hex("123").unwrap(),
            Hash::ZERO,
        ));
        assert_eq!(stack.consumed(), 0);

        stack.push_new(Node::branch());
        assert_eq!(stack.consumed(), 3);

        stack.push_new(Node::leaf(
            NibblePath::from_hex("45").unwrap(),
            UserValue::Inline(b"v".to_vec()),
        ));
        assert_eq!(stack.consumed(), 4);
        assert_eq!(stack.len(), 3);
        assert!(stack.top().unwrap().node.is_leaf());
    }
}
