//! Merkle-patricia trie
//!
//! Keys are matched nibble by nibble. Three node kinds share the work:
//! - Leaves end a key and hold its value
//! - Extensions compress a run of nibbles with no fork
//! - Branches fork on the next nibble and may hold the value of a key that
//!   ends exactly there
//!
//! Every node is stored under the hash of its encoding, so the root hash
//! commits to the whole key/value set.

mod nibbles;
mod node;
mod path;
mod tree;

pub use nibbles::{common_prefix_len, NibblePath};
pub use node::{Node, UserValue};
pub use path::{PathEntry, PathStack};
pub use tree::{Lookup, MerkleTrie, VerifyReport};
