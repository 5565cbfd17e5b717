//! Merkle-patricia trie over content-addressed stores

use super::nibbles::common_prefix_len;
use super::{NibblePath, Node, PathEntry, PathStack, UserValue};
use crate::config::{TrieConfig, DEFAULT_INLINE_THRESHOLD};
use crate::model::Hash;
use crate::store::{NodeStore, ValueStore};
use crate::{Error, Result};
use std::collections::BTreeMap;
use tracing::{debug, info, trace};

/// Result of walking the trie for one key
#[derive(Clone, Debug)]
pub struct Lookup {
    /// The trie-level value if the whole key matched
    pub value: Option<UserValue>,
    /// Every node visited, root first
    pub path: PathStack,
}

/// Counts gathered by [`MerkleTrie::verify`]
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct VerifyReport {
    pub branches: usize,
    pub extensions: usize,
    pub leaves: usize,
    /// Keys whose value lives in the value store
    pub stored_values: usize,
    /// Keys in the trie
    pub keys: usize,
}

impl VerifyReport {
    /// Node positions visited (shared identical subtrees count once per position)
    pub fn nodes(&self) -> usize {
        self.branches + self.extensions + self.leaves
    }
}

/// A merkle-patricia trie mapping byte keys to byte values
///
/// Nodes live in a [`NodeStore`] keyed by their own hash; values longer than
/// the inline threshold live in a [`ValueStore`]. The trie itself only keeps
/// the root hash. Mutations are single-writer: callers serialize `put`s.
pub struct MerkleTrie<'a, N: NodeStore + ?Sized, V: ValueStore + ?Sized> {
    nodes: &'a N,
    values: &'a V,
    root: Option<Hash>,
    inline_threshold: usize,
}

impl<'a, N: NodeStore + ?Sized, V: ValueStore + ?Sized> MerkleTrie<'a, N, V> {
    /// Create a new empty trie
    pub fn new(nodes: &'a N, values: &'a V) -> Self {
        MerkleTrie {
            nodes,
            values,
            root: None,
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
        }
    }

    /// Open a trie at a previously committed root
    pub fn from_root(nodes: &'a N, values: &'a V, root: Option<Hash>) -> Result<Self> {
        if let Some(hash) = root {
            if !nodes.contains_node(&hash)? {
                return Err(Error::NotFound(format!("root node {}", hash.to_hex())));
            }
        }
        Ok(MerkleTrie {
            root,
            ..Self::new(nodes, values)
        })
    }

    /// Apply engine settings from a config
    pub fn with_config(mut self, config: &TrieConfig) -> Self {
        self.inline_threshold = config.inline_threshold;
        self
    }

    /// Hash of the root node, `None` for an empty trie
    pub fn root_hash(&self) -> Option<Hash> {
        self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Get the value stored for `key`
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match self.lookup(key)?.value {
            Some(value) => Ok(Some(self.resolve(&value)?)),
            None => Ok(None),
        }
    }

    /// Walk from the root as far as `key` matches
    ///
    /// Returns the trie-level value when the whole key matched at a leaf or
    /// at a branch holding a value, plus the path of visited nodes either way.
    pub fn lookup(&self, key: &[u8]) -> Result<Lookup> {
        if key.is_empty() {
            return Err(Error::InvalidUserData);
        }

        let nibbles = NibblePath::from_bytes(key);
        let mut path = PathStack::new();
        let mut value = None;
        let mut pos = 0;
        let mut next = self.root;

        while let Some(hash) = next.take() {
            let node = self.nodes.load_node(&hash)?;
            let remaining = &nibbles[pos..];

            match &node {
                Node::Branch {
                    children,
                    value: branch_value,
                } => match remaining.first() {
                    None => value = branch_value.clone(),
                    Some(nibble) => {
                        if let Some(child) = children.get(nibble) {
                            next = Some(*child);
                            pos += 1;
                        }
                    }
                },
                Node::Extension {
                    path: ext_path,
                    child,
                } => {
                    if remaining.starts_with(ext_path) {
                        next = Some(*child);
                        pos += ext_path.len();
                    }
                }
                Node::Leaf {
                    path: leaf_path,
                    value: leaf_value,
                } => {
                    if remaining == leaf_path.as_slice() {
                        value = Some(leaf_value.clone());
                    }
                }
            }

            path.push_stored(node, hash);
        }

        debug!(
            key = %nibbles,
            depth = path.len(),
            found = value.is_some(),
            "lookup"
        );
        Ok(Lookup { value, path })
    }

    /// Store `value` under `key`, replacing any previous value
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        if key.is_empty() || value.is_empty() {
            return Err(Error::InvalidUserData);
        }

        let user_value = self.user_value(value)?;
        let Lookup {
            value: existing,
            path,
        } = self.lookup(key)?;

        if existing.as_ref() == Some(&user_value) {
            debug!(key = %hex::encode(key), "value already stored in trie");
            return Ok(());
        }

        let nibbles = NibblePath::from_bytes(key);
        info!(
            key = %hex::encode(key),
            update = existing.is_some(),
            "inserting user data"
        );

        // Replaced nodes stay in the store until the new root is complete, so
        // a failed persist leaves the previous root fully readable
        let mut stale = Vec::new();
        let pos = path.consumed();
        let path = self.upsert(pos, &nibbles, user_value, path, &mut stale)?;
        let root = self.update(&nibbles, path, &mut stale)?;
        self.root = Some(root);

        for hash in &stale {
            self.nodes.remove_node(hash)?;
        }
        Ok(())
    }

    /// The trie-level value for raw user bytes
    fn user_value(&self, value: &[u8]) -> Result<UserValue> {
        if value.len() > self.inline_threshold {
            Ok(UserValue::Stored(self.values.persist_value(value)?))
        } else {
            Ok(UserValue::Inline(value.to_vec()))
        }
    }

    /// Turn a trie-level value back into user bytes
    fn resolve(&self, value: &UserValue) -> Result<Vec<u8>> {
        match value {
            UserValue::Inline(bytes) => Ok(bytes.clone()),
            UserValue::Stored(hash) => self.values.load_value(hash),
        }
    }

    /// Restructure the lookup path so it ends at a node holding `value` for `key`
    ///
    /// `pos` is the number of key nibbles consumed to reach the top of `path`.
    /// Nodes that need relinking stay on the returned path; nodes that hang off
    /// the side of it are persisted here. Hashes of replaced nodes go to `stale`.
    fn upsert(
        &self,
        pos: usize,
        key: &NibblePath,
        value: UserValue,
        mut path: PathStack,
        stale: &mut Vec<Hash>,
    ) -> Result<PathStack> {
        let Some(top) = path.pop() else {
            path.push_new(Node::leaf(key.clone(), value));
            return Ok(path);
        };

        let remaining = key.get(pos..).ok_or_else(|| {
            structural(format!(
                "path consumed {} nibbles of a {} nibble key",
                pos,
                key.len()
            ))
        })?;

        match top.node {
            Node::Leaf {
                path: leaf_path, ..
            } if leaf_path.as_slice() == remaining => {
                path.push(PathEntry {
                    node: Node::leaf(leaf_path, value),
                    stored: top.stored,
                });
            }
            Node::Branch {
                children,
                value: branch_value,
            } => match remaining.split_first() {
                Some((&selector, rest)) => {
                    if children.contains_key(&selector) {
                        return Err(structural(format!(
                            "lookup stopped at a branch that has child {:x}",
                            selector
                        )));
                    }
                    path.push(PathEntry {
                        node: Node::Branch {
                            children,
                            value: branch_value,
                        },
                        stored: top.stored,
                    });
                    path.push_new(Node::leaf(NibblePath::from_nibbles(rest), value));
                }
                None => {
                    path.push(PathEntry {
                        node: Node::Branch {
                            children,
                            value: Some(value),
                        },
                        stored: top.stored,
                    });
                }
            },
            node => self.split(remaining, value, node, top.stored, &mut path, stale)?,
        }

        Ok(path)
    }

    /// Fork a leaf or extension whose path only partly matches `remaining`
    ///
    /// Pushes an extension for the shared prefix (if any), a branch at the
    /// first differing nibble, and a leaf for the new key (if it continues
    /// past the branch).
    fn split(
        &self,
        remaining: &[u8],
        value: UserValue,
        original: Node,
        stored: Option<Hash>,
        path: &mut PathStack,
        stale: &mut Vec<Hash>,
    ) -> Result<()> {
        let node_path = original
            .path()
            .ok_or_else(|| structural("branch reached the split case"))?
            .clone();
        let shared = common_prefix_len(&node_path, remaining);

        stale.extend(stored);

        if shared > 0 {
            // Child is linked on commit
            path.push_new(Node::extension(
                NibblePath::from_nibbles(&node_path[..shared]),
                Hash::ZERO,
            ));
        }

        let mut children = BTreeMap::new();
        let mut branch_value = None;

        match (original, node_path[shared..].split_first()) {
            (Node::Leaf { value: old, .. }, Some((&selector, rest))) => {
                let shrunk = Node::leaf(NibblePath::from_nibbles(rest), old);
                children.insert(selector, self.nodes.persist_node(&shrunk)?);
            }
            (Node::Leaf { value: old, .. }, None) => {
                branch_value = Some(old);
            }
            (Node::Extension { child, .. }, Some((&selector, rest))) => {
                if rest.is_empty() {
                    children.insert(selector, child);
                } else {
                    let shrunk = Node::extension(NibblePath::from_nibbles(rest), child);
                    children.insert(selector, self.nodes.persist_node(&shrunk)?);
                }
            }
            (original, _) => {
                return Err(structural(format!(
                    "{} at top of path fully matches the key but was not followed",
                    original.kind()
                )));
            }
        }

        match remaining[shared..].split_first() {
            Some((&selector, rest)) => {
                if children.contains_key(&selector) {
                    return Err(structural(format!(
                        "split produced two children under nibble {:x}",
                        selector
                    )));
                }
                path.push_new(Node::Branch {
                    children,
                    value: branch_value,
                });
                path.push_new(Node::leaf(NibblePath::from_nibbles(rest), value));
            }
            None => {
                if branch_value.is_some() {
                    return Err(structural("split produced two values for one branch"));
                }
                path.push_new(Node::Branch {
                    children,
                    value: Some(value),
                });
            }
        }

        Ok(())
    }

    /// Persist `path` from the top down, relinking each parent to the new
    /// hash of the node above it, and return the new root hash
    fn update(&self, key: &NibblePath, path: PathStack, stale: &mut Vec<Hash>) -> Result<Hash> {
        debug!(key = %key, nodes = path.len(), "persisting nodes for path");

        // Index of the last key nibble not yet accounted for
        let mut cursor = key.len() as isize - 1;
        let mut last: Option<Hash> = None;

        for entry in path.into_iter().rev() {
            let node = match entry.node {
                Node::Branch {
                    mut children,
                    value,
                } => {
                    if let Some(child) = last {
                        children.insert(nibble_at(key, cursor)?, child);
                        cursor -= 1;
                    }
                    Node::Branch { children, value }
                }
                Node::Extension { path, .. } => {
                    cursor -= path.len() as isize;
                    let child = last.ok_or_else(|| {
                        structural("extension at the top of the path has no child")
                    })?;
                    Node::Extension { path, child }
                }
                Node::Leaf { path, value } => {
                    if last.is_some() {
                        return Err(structural("leaf below another node on the path"));
                    }
                    cursor -= path.len() as isize;
                    Node::Leaf { path, value }
                }
            };

            stale.extend(entry.stored);
            let hash = self.nodes.persist_node(&node)?;
            trace!(kind = node.kind(), hash = %hash.short(), "persisted node");
            last = Some(hash);
        }

        if cursor != -1 {
            return Err(structural(format!(
                "path covers {} of {} key nibbles",
                key.len() as isize - 1 - cursor,
                key.len()
            )));
        }

        let root = last.ok_or_else(|| structural("nothing to persist"))?;
        debug!(root = %root.short(), "new root");
        Ok(root)
    }

    /// List all `(key, value)` pairs whose key starts with `prefix`, in key order
    pub fn entries(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut results = Vec::new();
        if let Some(root) = self.root {
            let prefix = NibblePath::from_bytes(prefix);
            self.collect(&root, NibblePath::new(), &prefix, &mut results)?;
        }
        Ok(results)
    }

    fn collect(
        &self,
        hash: &Hash,
        current: NibblePath,
        prefix: &NibblePath,
        results: &mut Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<()> {
        // Only descend while we can still reach the prefix
        if !current.starts_with(prefix) && !prefix.starts_with(&current) {
            return Ok(());
        }

        match self.nodes.load_node(hash)? {
            Node::Leaf { path, value } => {
                let mut full = current;
                full.extend_from_slice(&path);
                self.emit(&full, &value, prefix, results)?;
            }
            Node::Extension { path, child } => {
                let mut next = current;
                next.extend_from_slice(&path);
                self.collect(&child, next, prefix, results)?;
            }
            Node::Branch { children, value } => {
                if let Some(value) = value {
                    self.emit(&current, &value, prefix, results)?;
                }
                for (nibble, child) in children {
                    let mut next = current.clone();
                    next.push(nibble);
                    self.collect(&child, next, prefix, results)?;
                }
            }
        }
        Ok(())
    }

    fn emit(
        &self,
        key: &NibblePath,
        value: &UserValue,
        prefix: &NibblePath,
        results: &mut Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<()> {
        if !key.starts_with(prefix) {
            return Ok(());
        }
        let bytes = key
            .to_bytes()
            .ok_or_else(|| Error::Corruption(format!("value at odd nibble path {}", key)))?;
        results.push((bytes, self.resolve(value)?));
        Ok(())
    }

    /// Check every node and large value reachable from the root
    ///
    /// Each hash reference must resolve, each node must hash to the key it is
    /// stored under, and each node must keep the trie's compaction rules.
    pub fn verify(&self) -> Result<VerifyReport> {
        let mut report = VerifyReport::default();
        let Some(root) = self.root else {
            return Ok(report);
        };

        let algorithm = self.nodes.algorithm();
        let mut pending = vec![root];
        while let Some(hash) = pending.pop() {
            let node = self.nodes.load_node(&hash)?;
            let actual = node.hash(algorithm)?;
            if actual != hash {
                return Err(Error::Corruption(format!(
                    "node stored under {} hashes to {}",
                    hash.to_hex(),
                    actual.to_hex()
                )));
            }

            match &node {
                Node::Branch { children, value } => {
                    report.branches += 1;
                    if children.len() + usize::from(value.is_some()) < 2 {
                        return Err(Error::Corruption(format!(
                            "branch {} forks fewer than two ways",
                            hash.short()
                        )));
                    }
                    if children.keys().any(|nibble| *nibble > 0x0f) {
                        return Err(Error::Corruption(format!(
                            "branch {} has a child index above 0xf",
                            hash.short()
                        )));
                    }
                }
                Node::Extension { path, child } => {
                    report.extensions += 1;
                    if path.is_empty() {
                        return Err(Error::Corruption(format!(
                            "extension {} has an empty path",
                            hash.short()
                        )));
                    }
                    if !self.nodes.load_node(child)?.is_branch() {
                        return Err(Error::Corruption(format!(
                            "extension {} does not point at a branch",
                            hash.short()
                        )));
                    }
                }
                Node::Leaf { .. } => report.leaves += 1,
            }

            if let Some(value) = node.value() {
                report.keys += 1;
                if let UserValue::Stored(value_hash) = value {
                    report.stored_values += 1;
                    let bytes = self.values.load_value(value_hash)?;
                    if algorithm.digest(&bytes) != *value_hash {
                        return Err(Error::Corruption(format!(
                            "value stored under {} does not match its hash",
                            value_hash.to_hex()
                        )));
                    }
                }
            }

            pending.extend(node.children());
        }

        debug!(nodes = report.nodes(), keys = report.keys, "verified trie");
        Ok(report)
    }
}

fn nibble_at(key: &NibblePath, cursor: isize) -> Result<u8> {
    usize::try_from(cursor)
        .ok()
        .and_then(|index| key.get(index).copied())
        .ok_or_else(|| {
            structural(format!(
                "relink cursor {} outside key of {} nibbles",
                cursor,
                key.len()
            ))
        })
}

fn structural(message: impl Into<String>) -> Error {
    Error::StructuralInvariant(message.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::HashAlgorithm;
    use crate::store::MemoryStore;

    fn node_at<'s>(lookup: &'s Lookup, depth: usize) -> &'s Node {
        lookup.path.nodes().nth(depth).unwrap()
    }

    #[test]
    fn test_trie_insert_get() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);

        trie.put(b"a1", b"hello").unwrap();

        assert_eq!(trie.get(b"a1").unwrap(), Some(b"hello".to_vec()));
        assert_eq!(trie.get(b"b2").unwrap(), None);
    }

    #[test]
    fn test_single_leaf_root() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);
        trie.put(b"a1", b"hello").unwrap();

        let expected = Node::leaf(
            NibblePath::from_hex("6131").unwrap(),
            UserValue::Inline(b"hello".to_vec()),
        );
        assert_eq!(
            trie.root_hash(),
            Some(expected.hash(HashAlgorithm::Blake3).unwrap())
        );
        assert_eq!(store.node_count(), 1);
    }

    #[test]
    fn test_empty_key_or_value_rejected() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);

        assert!(matches!(trie.put(b"", b"v"), Err(Error::InvalidUserData)));
        assert!(matches!(trie.put(b"k", b""), Err(Error::InvalidUserData)));
        assert!(matches!(trie.get(b""), Err(Error::InvalidUserData)));
        assert!(trie.is_empty());
        assert_eq!(store.node_count(), 0);
    }

    #[test]
    fn test_prefix_split() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);

        trie.put(&[0x12, 0x34], b"first").unwrap();
        trie.put(&[0x12, 0x56], b"second").unwrap();

        assert_eq!(trie.get(&[0x12, 0x34]).unwrap(), Some(b"first".to_vec()));
        assert_eq!(trie.get(&[0x12, 0x56]).unwrap(), Some(b"second".to_vec()));

        // extension "12" -> branch on the third nibble -> leaf "4"
        let lookup = trie.lookup(&[0x12, 0x34]).unwrap();
        assert_eq!(lookup.path.len(), 3);
        assert_eq!(
            node_at(&lookup, 0).path().unwrap(),
            &NibblePath::from_hex("12").unwrap()
        );
        match node_at(&lookup, 1) {
            Node::Branch { children, value } => {
                assert_eq!(children.keys().copied().collect::<Vec<_>>(), vec![3, 5]);
                assert!(value.is_none());
            }
            other => panic!("expected branch, got {:?}", other),
        }
        assert_eq!(
            node_at(&lookup, 2).path().unwrap(),
            &NibblePath::from_hex("4").unwrap()
        );
        assert_eq!(store.node_count(), 4);
    }

    #[test]
    fn test_split_without_shared_prefix() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);

        trie.put(&[0x12], b"a").unwrap();
        trie.put(&[0x34], b"b").unwrap();

        let lookup = trie.lookup(&[0x34]).unwrap();
        assert!(node_at(&lookup, 0).is_branch());
        assert_eq!(lookup.path.len(), 2);
        assert_eq!(trie.get(&[0x12]).unwrap(), Some(b"a".to_vec()));
        assert_eq!(trie.get(&[0x34]).unwrap(), Some(b"b".to_vec()));
    }

    #[test]
    fn test_keys_ending_one_nibble_after_fork() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);

        trie.put(&[0x12], b"a").unwrap();
        trie.put(&[0x13], b"b").unwrap();

        // Both leaves hang off the branch with empty paths
        let lookup = trie.lookup(&[0x13]).unwrap();
        assert_eq!(lookup.path.len(), 3);
        assert!(node_at(&lookup, 2).path().unwrap().is_empty());
        assert_eq!(trie.get(&[0x12]).unwrap(), Some(b"a".to_vec()));
        assert_eq!(trie.get(&[0x13]).unwrap(), Some(b"b".to_vec()));
        trie.verify().unwrap();
    }

    #[test]
    fn test_key_that_is_prefix_of_existing_key() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);

        trie.put(b"abcd", b"long").unwrap();
        trie.put(b"ab", b"short").unwrap();

        assert_eq!(trie.get(b"abcd").unwrap(), Some(b"long".to_vec()));
        assert_eq!(trie.get(b"ab").unwrap(), Some(b"short".to_vec()));
        assert_eq!(trie.get(b"abc").unwrap(), None);
        assert_eq!(trie.get(b"a").unwrap(), None);

        // The shorter key's value sits on the branch
        let lookup = trie.lookup(b"ab").unwrap();
        assert!(lookup.path.top().unwrap().node.is_branch());
        trie.verify().unwrap();
    }

    #[test]
    fn test_existing_key_that_is_prefix_of_new_key() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);

        trie.put(b"ab", b"short").unwrap();
        trie.put(b"abcd", b"long").unwrap();

        assert_eq!(trie.get(b"ab").unwrap(), Some(b"short".to_vec()));
        assert_eq!(trie.get(b"abcd").unwrap(), Some(b"long".to_vec()));

        let lookup = trie.lookup(b"abcd").unwrap();
        match node_at(&lookup, 1) {
            Node::Branch { value, .. } => {
                assert_eq!(value, &Some(UserValue::Inline(b"short".to_vec())))
            }
            other => panic!("expected branch, got {:?}", other),
        }
        trie.verify().unwrap();
    }

    #[test]
    fn test_branch_gains_value_and_child() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);

        trie.put(&[0x12, 0x34], b"x").unwrap();
        trie.put(&[0x12, 0x56], b"y").unwrap();
        // Ends exactly at the branch after extension "12"
        trie.put(&[0x12], b"z").unwrap();
        // New child on the existing branch
        trie.put(&[0x12, 0x78], b"w").unwrap();

        for (key, value) in [
            (vec![0x12u8, 0x34], b"x"),
            (vec![0x12, 0x56], b"y"),
            (vec![0x12], b"z"),
            (vec![0x12, 0x78], b"w"),
        ] {
            assert_eq!(trie.get(&key).unwrap(), Some(value.to_vec()));
        }

        let report = trie.verify().unwrap();
        assert_eq!(report.keys, 4);
        assert_eq!(report.branches, 1);
        assert_eq!(report.extensions, 1);
    }

    #[test]
    fn test_split_extension() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);

        // Extension "1234" above a branch on nibble 5
        trie.put(&[0x12, 0x34, 0x56], b"a").unwrap();
        trie.put(&[0x12, 0x34, 0x78], b"b").unwrap();
        // Diverges inside the extension, two nibbles in
        trie.put(&[0x12, 0x99], b"c").unwrap();
        // Diverges on the last extension nibble, so the extension collapses
        trie.put(&[0x12, 0x35], b"d").unwrap();

        for (key, value) in [
            (vec![0x12u8, 0x34, 0x56], b"a"),
            (vec![0x12, 0x34, 0x78], b"b"),
            (vec![0x12, 0x99], b"c"),
            (vec![0x12, 0x35], b"d"),
        ] {
            assert_eq!(trie.get(&key).unwrap(), Some(value.to_vec()));
        }
        assert_eq!(trie.get(&[0x12, 0x34]).unwrap(), None);
        assert_eq!(trie.verify().unwrap().keys, 4);
    }

    #[test]
    fn test_overwrite_changes_root() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);

        trie.put(b"key", b"v1").unwrap();
        trie.put(b"other", b"v").unwrap();
        let before = trie.root_hash();

        trie.put(b"key", b"v2").unwrap();
        assert_eq!(trie.get(b"key").unwrap(), Some(b"v2".to_vec()));
        assert_ne!(trie.root_hash(), before);
        trie.verify().unwrap();
    }

    #[test]
    fn test_duplicate_put_is_noop() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);

        trie.put(b"key", b"value").unwrap();
        trie.put(b"kez", b"value").unwrap();
        let root = trie.root_hash();
        let hashes = store.node_hashes();

        trie.put(b"key", b"value").unwrap();
        assert_eq!(trie.root_hash(), root);
        assert_eq!(store.node_hashes(), hashes);
    }

    #[test]
    fn test_large_values_go_to_value_store() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);

        let large = vec![0xabu8; 33];
        let small = vec![0xcdu8; 32];
        trie.put(b"large", &large).unwrap();
        trie.put(b"small", &small).unwrap();

        assert_eq!(store.value_count(), 1);
        assert_eq!(trie.get(b"large").unwrap(), Some(large.clone()));
        assert_eq!(trie.get(b"small").unwrap(), Some(small));
        assert!(trie.lookup(b"large").unwrap().value.unwrap().is_stored());

        let root = trie.root_hash();
        trie.put(b"large", &large).unwrap();
        assert_eq!(trie.root_hash(), root);
        assert_eq!(trie.verify().unwrap().stored_values, 1);
    }

    #[test]
    fn test_inline_threshold_from_config() {
        let store = MemoryStore::new();
        let config = TrieConfig::default().with_inline_threshold(4);
        let mut trie = MerkleTrie::new(&store, &store).with_config(&config);

        trie.put(b"k", b"12345").unwrap();
        assert_eq!(store.value_count(), 1);
        assert_eq!(trie.get(b"k").unwrap(), Some(b"12345".to_vec()));
    }

    #[test]
    fn test_order_independence() {
        let pairs = [
            ("do", "verb"),
            ("dog", "puppy"),
            ("doge", "coin"),
            ("horse", "stallion"),
            ("h", "short"),
        ];

        let forward = MemoryStore::new();
        let mut t1 = MerkleTrie::new(&forward, &forward);
        for (k, v) in pairs {
            t1.put(k.as_bytes(), v.as_bytes()).unwrap();
        }

        let backward = MemoryStore::new();
        let mut t2 = MerkleTrie::new(&backward, &backward);
        for (k, v) in pairs.iter().rev() {
            t2.put(k.as_bytes(), v.as_bytes()).unwrap();
        }

        assert_eq!(t1.root_hash(), t2.root_hash());
        assert_eq!(forward.node_hashes(), backward.node_hashes());
    }

    #[test]
    fn test_identical_subtrees_survive_updates() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);

        // "a1" and "b1" end in identical leaves under different branch slots
        trie.put(b"a1", b"same").unwrap();
        trie.put(b"b1", b"same").unwrap();
        trie.put(b"a1", b"changed").unwrap();

        assert_eq!(trie.get(b"b1").unwrap(), Some(b"same".to_vec()));
        assert_eq!(trie.get(b"a1").unwrap(), Some(b"changed".to_vec()));
        trie.verify().unwrap();
    }

    #[test]
    fn test_replaced_nodes_are_removed() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);

        trie.put(b"key", b"v1").unwrap();
        let old_root = trie.root_hash().unwrap();
        trie.put(b"key", b"v2").unwrap();

        assert!(!store.contains_node(&old_root).unwrap());
        assert_eq!(store.node_count(), 1);
    }

    #[test]
    fn test_from_root() {
        let store = MemoryStore::new();
        let root = {
            let mut trie = MerkleTrie::new(&store, &store);
            trie.put(b"persisted", b"yes").unwrap();
            trie.root_hash()
        };

        let trie = MerkleTrie::from_root(&store, &store, root).unwrap();
        assert_eq!(trie.get(b"persisted").unwrap(), Some(b"yes".to_vec()));

        let missing = MerkleTrie::from_root(&store, &store, Some(Hash::ZERO));
        assert!(matches!(missing, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_entries_with_prefix() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);

        trie.put(b"acct:bob", b"2").unwrap();
        trie.put(b"acct:alice", b"1").unwrap();
        trie.put(b"code:main", b"c").unwrap();
        trie.put(b"acct:", b"root").unwrap();

        let accounts = trie.entries(b"acct:").unwrap();
        let keys: Vec<&[u8]> = accounts.iter().map(|(k, _)| k.as_slice()).collect();
        assert_eq!(keys, vec![&b"acct:"[..], &b"acct:alice"[..], &b"acct:bob"[..]]);

        assert_eq!(trie.entries(b"code:").unwrap().len(), 1);
        assert_eq!(trie.entries(b"").unwrap().len(), 4);
        assert!(trie.entries(b"x").unwrap().is_empty());
    }

    #[test]
    fn test_verify_detects_dangling_reference() {
        let store = MemoryStore::new();
        let mut trie = MerkleTrie::new(&store, &store);
        trie.put(&[0x12, 0x34], b"a").unwrap();
        trie.put(&[0x12, 0x56], b"b").unwrap();

        let lookup = trie.lookup(&[0x12, 0x34]).unwrap();
        let leaf_hash = lookup.path.top().unwrap().stored.unwrap();
        store.remove_node(&leaf_hash).unwrap();

        assert!(matches!(trie.verify(), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_commit_rejects_cursor_outside_key() {
        let store = MemoryStore::new();
        let trie = MerkleTrie::new(&store, &store);

        // A branch with a child above it but no key nibble left to index it by
        let key = NibblePath::from_hex("12").unwrap();
        let mut path = PathStack::new();
        path.push_new(Node::branch());
        path.push_new(Node::leaf(
            NibblePath::from_hex("12").unwrap(),
            UserValue::Inline(b"v".to_vec()),
        ));

        let err = trie.update(&key, path, &mut Vec::new()).unwrap_err();
        assert!(matches!(err, Error::StructuralInvariant(_)));
    }

    /// Node store that starts failing after a fixed number of writes
    struct FlakyStore {
        inner: MemoryStore,
        writes_left: std::cell::Cell<usize>,
    }

    impl FlakyStore {
        fn new() -> Self {
            FlakyStore {
                inner: MemoryStore::new(),
                writes_left: std::cell::Cell::new(usize::MAX),
            }
        }

        fn fail_after(&self, writes: usize) {
            self.writes_left.set(writes);
        }
    }

    impl NodeStore for FlakyStore {
        fn algorithm(&self) -> HashAlgorithm {
            self.inner.algorithm()
        }

        fn persist_node(&self, node: &Node) -> Result<Hash> {
            let left = self.writes_left.get();
            if left == 0 {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::Other,
                    "disk full",
                )));
            }
            self.writes_left.set(left - 1);
            self.inner.persist_node(node)
        }

        fn load_node(&self, hash: &Hash) -> Result<Node> {
            self.inner.load_node(hash)
        }

        fn remove_node(&self, hash: &Hash) -> Result<bool> {
            self.inner.remove_node(hash)
        }

        fn contains_node(&self, hash: &Hash) -> Result<bool> {
            self.inner.contains_node(hash)
        }
    }

    #[test]
    fn test_failed_persist_keeps_previous_root() {
        let nodes = FlakyStore::new();
        let values = MemoryStore::new();
        let mut trie = MerkleTrie::new(&nodes, &values);
        trie.put(&[0x12, 0x34], b"a").unwrap();
        trie.put(&[0x12, 0x56], b"b").unwrap();
        let root = trie.root_hash();

        // The new leaf is written, its parent branch is not
        nodes.fail_after(1);
        let err = trie.put(&[0x12, 0x34], b"changed").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.is_store_failure());

        assert_eq!(trie.root_hash(), root);
        assert_eq!(trie.get(&[0x12, 0x56]).unwrap(), Some(b"b".to_vec()));
        assert_eq!(trie.get(&[0x12, 0x34]).unwrap(), Some(b"a".to_vec()));
        assert_eq!(trie.verify().unwrap().keys, 2);

        // A later put on the same root still goes through
        nodes.fail_after(usize::MAX);
        trie.put(&[0x12, 0x34], b"changed").unwrap();
        assert_eq!(trie.get(&[0x12, 0x34]).unwrap(), Some(b"changed".to_vec()));
        assert_eq!(trie.get(&[0x12, 0x56]).unwrap(), Some(b"b".to_vec()));
        trie.verify().unwrap();
    }

    #[test]
    fn test_failed_split_keeps_previous_root() {
        let nodes = FlakyStore::new();
        let values = MemoryStore::new();
        let mut trie = MerkleTrie::new(&nodes, &values);
        trie.put(b"abcd", b"long").unwrap();
        let root = trie.root_hash();

        // Splitting the root leaf persists the shrunk leaf, then fails
        nodes.fail_after(1);
        assert!(trie.put(b"ab", b"short").is_err());

        assert_eq!(trie.root_hash(), root);
        assert_eq!(trie.get(b"abcd").unwrap(), Some(b"long".to_vec()));
        trie.verify().unwrap();
    }

    #[test]
    fn test_sha256_trie() {
        let store = MemoryStore::with_algorithm(HashAlgorithm::Sha256);
        let mut trie = MerkleTrie::new(&store, &store);
        trie.put(b"a1", b"hello").unwrap();

        let expected = Node::leaf(
            NibblePath::from_bytes(b"a1"),
            UserValue::Inline(b"hello".to_vec()),
        );
        assert_eq!(
            trie.root_hash(),
            Some(expected.hash(HashAlgorithm::Sha256).unwrap())
        );
    }
}
