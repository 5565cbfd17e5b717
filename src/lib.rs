//! # patricia_db
//!
//! A merkle-patricia trie over content-addressed storage.
//!
//! Keys are split into nibbles and routed through leaf, extension and branch
//! nodes. Every node is stored under the hash of its encoding, so the root
//! hash commits to the complete key/value contents of the trie. Values longer
//! than a configurable threshold are kept in a separate value store and
//! referenced by their own hash.
//!
//! ## Example
//!
//! ```ignore
//! use patricia_db::{Database, TrieConfig};
//!
//! let mut db = Database::open_or_create("trie.pdb", TrieConfig::default())?;
//! db.put(b"a1", b"hello")?;
//! assert_eq!(db.get(b"a1")?, Some(b"hello".to_vec()));
//! println!("root: {}", db.root_hash().unwrap());
//! ```

pub mod config;
pub mod model;
pub mod store;
pub mod trie;

mod database;
mod error;

pub use config::TrieConfig;
pub use database::{Database, Stats};
pub use error::{Error, Result};
pub use model::{Hash, HashAlgorithm};
pub use store::{MemoryStore, NodeStore, ObjectStore, ValueStore};
pub use trie::{Lookup, MerkleTrie, NibblePath, Node, PathStack, UserValue, VerifyReport};

/// Database version for format compatibility
pub const VERSION: u32 = 1;

/// Magic bytes for file identification
pub const MAGIC: &[u8; 8] = b"PATRICIA";
