//! Content-addressed node and value stores
//!
//! The trie talks to storage through two contracts, [`NodeStore`] and
//! [`ValueStore`]. Two backends implement both:
//!
//! - [`ObjectStore`] keeps zstd-compressed blobs in a single file
//! - [`MemoryStore`] keeps everything in `HashMap`s, for tests and embedding

mod blob;
mod file_store;
mod memory;
mod traits;

pub use blob::{Blob, BlobType};
pub use file_store::ObjectStore;
pub use memory::MemoryStore;
pub use traits::{NodeStore, ValueStore};
