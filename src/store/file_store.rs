//! Single-file object store with content-addressed storage
//!
//! File format:
//! ```text
//! [HEADER: 64 bytes]
//!   - magic: 8 bytes ("PATRICIA")
//!   - version: 4 bytes (u32 LE)
//!   - flags: 4 bytes (byte 0: hash algorithm, rest reserved)
//!   - object_count: 8 bytes (u64 LE)
//!   - index_offset: 8 bytes (u64 LE)
//!   - root: 32 bytes (zero for an empty trie)
//!
//! [OBJECTS: variable]
//!   - blob data, concatenated
//!
//! [INDEX: variable]
//!   - sorted array of (kind, hash, offset, size, refs) entries
//! ```
//!
//! Every `sync` appends a fresh index and points the header at it; objects
//! written afterwards go after that index, so the last synced state stays
//! readable until the next `sync` replaces it. Removing an object only drops
//! its index entry. Dead objects and old indexes stay in the file until it
//! is rewritten.

use crate::model::{Hash, HashAlgorithm};
use crate::store::blob::{Blob, BlobType};
use crate::store::{NodeStore, ValueStore};
use crate::trie::Node;
use crate::{Error, Result, MAGIC, VERSION};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

const HEADER_SIZE: u64 = 64;

/// kind (1) + hash (32) + offset (8) + size (4) + refs (4)
const INDEX_ENTRY_SIZE: usize = 49;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct ObjectKey {
    kind: BlobType,
    hash: Hash,
}

#[derive(Clone, Debug)]
struct IndexEntry {
    offset: u64,
    size: u32,
    refs: u32,
}

/// In-memory index for fast lookups
struct Index {
    entries: HashMap<ObjectKey, IndexEntry>,
}

impl Index {
    fn new() -> Self {
        Index {
            entries: HashMap::new(),
        }
    }
}

/// A content-addressed node and value store backed by a single file
pub struct ObjectStore {
    path: std::path::PathBuf,
    algorithm: HashAlgorithm,
    compression_level: i32,
    file: RwLock<File>,
    index: RwLock<Index>,
    /// Last committed root of the trie kept in this file
    root: RwLock<Option<Hash>>,
    /// Current append position
    write_offset: RwLock<u64>,
    /// Index or root changed since the last sync
    dirty: AtomicBool,
}

impl ObjectStore {
    /// Create a new database file, truncating any existing one
    pub fn create(path: impl AsRef<Path>, algorithm: HashAlgorithm) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        header[0..8].copy_from_slice(MAGIC);
        header[8..12].copy_from_slice(&VERSION.to_le_bytes());
        header[12] = algorithm.as_byte();
        // object_count: 0
        // index_offset: 0 (will be updated)
        // root: zero
        file.write_all(&header)?;
        file.sync_all()?;

        tracing::debug!(path = %path.display(), %algorithm, "created object store");

        Ok(ObjectStore {
            path,
            algorithm,
            compression_level: crate::config::DEFAULT_COMPRESSION_LEVEL,
            file: RwLock::new(file),
            index: RwLock::new(Index::new()),
            root: RwLock::new(None),
            write_offset: RwLock::new(HEADER_SIZE),
            dirty: AtomicBool::new(false),
        })
    }

    /// Open an existing database file
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        // Fall back to read-only access; writes then fail on the first sync
        let mut file = match OpenOptions::new().read(true).write(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                OpenOptions::new().read(true).open(&path)?
            }
            Err(e) => return Err(e.into()),
        };

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)
            .map_err(|_| Error::InvalidFile("Truncated header".into()))?;

        if &header[0..8] != MAGIC {
            return Err(Error::InvalidFile("Invalid magic bytes".into()));
        }

        let version = read_u32(&header[8..12]);
        if version != VERSION {
            return Err(Error::VersionMismatch {
                expected: VERSION,
                found: version,
            });
        }

        let algorithm = HashAlgorithm::from_byte(header[12]).ok_or_else(|| {
            Error::InvalidFile(format!("Unknown hash algorithm tag: {}", header[12]))
        })?;

        let object_count = read_u64(&header[16..24]);
        let index_offset = read_u64(&header[24..32]);
        let root = Some(read_hash(&header[32..64])).filter(|h| !h.is_zero());

        let mut index = Index::new();
        if index_offset > 0 && object_count > 0 {
            file.seek(SeekFrom::Start(index_offset))?;
            for _ in 0..object_count {
                let mut buf = [0u8; INDEX_ENTRY_SIZE];
                file.read_exact(&mut buf)?;

                let kind = BlobType::from_byte(buf[0]).ok_or_else(|| {
                    Error::Corruption(format!("Invalid index entry kind: {}", buf[0]))
                })?;
                let key = ObjectKey {
                    kind,
                    hash: read_hash(&buf[1..33]),
                };
                let entry = IndexEntry {
                    offset: read_u64(&buf[33..41]),
                    size: read_u32(&buf[41..45]),
                    refs: read_u32(&buf[45..49]),
                };
                index.entries.insert(key, entry);
            }
        }

        // Append after the synced index, never over it
        let write_offset = file.seek(SeekFrom::End(0))?;

        tracing::debug!(
            path = %path.display(),
            %algorithm,
            objects = index.entries.len(),
            "opened object store"
        );

        Ok(ObjectStore {
            path,
            algorithm,
            compression_level: crate::config::DEFAULT_COMPRESSION_LEVEL,
            file: RwLock::new(file),
            index: RwLock::new(index),
            root: RwLock::new(root),
            write_offset: RwLock::new(write_offset),
            dirty: AtomicBool::new(false),
        })
    }

    /// Open a database file, creating it with `algorithm` if it does not exist
    pub fn open_or_create(path: impl AsRef<Path>, algorithm: HashAlgorithm) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path, algorithm)
        }
    }

    /// Set the zstd level used for blobs written from now on
    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Store a blob under `hash`, returns `hash`
    ///
    /// `counted` entries get one more reference if already present;
    /// uncounted ones are left untouched.
    fn put(&self, hash: Hash, blob: &Blob, counted: bool) -> Result<Hash> {
        let key = ObjectKey {
            kind: blob.blob_type,
            hash,
        };

        {
            let mut index = self.index.write();
            if let Some(entry) = index.entries.get_mut(&key) {
                if counted {
                    entry.refs += 1;
                    self.dirty.store(true, Ordering::Release);
                }
                return Ok(hash);
            }
        }

        let compressed = blob.compress(self.compression_level)?;
        let size = u32::try_from(compressed.len())
            .map_err(|_| Error::Corruption(format!("Blob too large: {} bytes", compressed.len())))?;

        let offset = {
            let mut write_offset = self.write_offset.write();
            let offset = *write_offset;

            let mut file = self.file.write();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&compressed)?;

            *write_offset = offset + size as u64;
            offset
        };

        self.index
            .write()
            .entries
            .insert(key, IndexEntry { offset, size, refs: 1 });
        self.dirty.store(true, Ordering::Release);

        Ok(hash)
    }

    /// Retrieve a blob
    fn get(&self, kind: BlobType, hash: &Hash) -> Result<Blob> {
        let key = ObjectKey { kind, hash: *hash };
        let entry = self.index.read().entries.get(&key).cloned();
        let entry = entry.ok_or_else(|| Error::NotFound(hash.to_hex()))?;

        let mut data = vec![0u8; entry.size as usize];
        {
            let mut file = self.file.write();
            file.seek(SeekFrom::Start(entry.offset))?;
            file.read_exact(&mut data)?;
        }

        let blob = Blob::decompress(&data)?;
        if blob.blob_type != kind {
            return Err(Error::Corruption(format!(
                "Expected {:?}, got {:?}",
                kind, blob.blob_type
            )));
        }
        Ok(blob)
    }

    /// The hash algorithm recorded in the file header
    pub fn hash_algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// The last root recorded with [`ObjectStore::set_root`]
    pub fn root(&self) -> Option<Hash> {
        *self.root.read()
    }

    /// Record the current trie root (written to disk on `sync`)
    pub fn set_root(&self, root: Option<Hash>) {
        let mut current = self.root.write();
        if *current != root {
            *current = root;
            self.dirty.store(true, Ordering::Release);
        }
    }

    /// Whether there are changes that `sync` has not written yet
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Get the number of objects in the store
    pub fn object_count(&self) -> usize {
        self.index.read().entries.len()
    }

    pub fn node_count(&self) -> usize {
        self.count_kind(BlobType::Node)
    }

    pub fn value_count(&self) -> usize {
        self.count_kind(BlobType::Value)
    }

    fn count_kind(&self, kind: BlobType) -> usize {
        self.index
            .read()
            .entries
            .keys()
            .filter(|key| key.kind == kind)
            .count()
    }

    /// Size of the database file in bytes, including space held by removed objects
    pub fn file_size(&self) -> Result<u64> {
        Ok(self.file.read().metadata()?.len())
    }

    /// Write a new index and point the header at it
    ///
    /// Does nothing when no object, reference count or root changed.
    pub fn sync(&self) -> Result<()> {
        if !self.is_dirty() {
            return Ok(());
        }

        let index = self.index.read();
        let root = *self.root.read();
        let mut write_offset = self.write_offset.write();
        let index_offset = *write_offset;
        let mut file = self.file.write();

        // Write index at write_offset, sorted for determinism
        let mut entries: Vec<_> = index.entries.iter().collect();
        entries.sort_by_key(|(key, _)| **key);

        let mut buf = Vec::with_capacity(entries.len() * INDEX_ENTRY_SIZE);
        for (key, entry) in entries {
            buf.push(key.kind.as_byte());
            buf.extend_from_slice(key.hash.as_bytes());
            buf.extend_from_slice(&entry.offset.to_le_bytes());
            buf.extend_from_slice(&entry.size.to_le_bytes());
            buf.extend_from_slice(&entry.refs.to_le_bytes());
        }
        file.seek(SeekFrom::Start(index_offset))?;
        file.write_all(&buf)?;
        file.set_len(index_offset + buf.len() as u64)?;
        file.sync_data()?;

        // Update header
        file.seek(SeekFrom::Start(16))?;
        file.write_all(&(index.entries.len() as u64).to_le_bytes())?;
        file.write_all(&index_offset.to_le_bytes())?;
        file.write_all(root.unwrap_or(Hash::ZERO).as_bytes())?;

        file.sync_all()?;
        *write_offset = index_offset + buf.len() as u64;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Get the file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl NodeStore for ObjectStore {
    fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    fn persist_node(&self, node: &Node) -> Result<Hash> {
        let data = node.encode()?;
        let hash = self.algorithm.digest(&data);
        self.put(hash, &Blob::new(BlobType::Node, data), true)
    }

    fn load_node(&self, hash: &Hash) -> Result<Node> {
        let blob = self.get(BlobType::Node, hash)?;
        Node::decode(&blob.data)
    }

    fn remove_node(&self, hash: &Hash) -> Result<bool> {
        let key = ObjectKey {
            kind: BlobType::Node,
            hash: *hash,
        };
        let mut index = self.index.write();
        let Some(entry) = index.entries.get_mut(&key) else {
            return Ok(false);
        };
        entry.refs = entry.refs.saturating_sub(1);
        if entry.refs == 0 {
            index.entries.remove(&key);
        }
        self.dirty.store(true, Ordering::Release);
        Ok(true)
    }

    fn contains_node(&self, hash: &Hash) -> Result<bool> {
        let key = ObjectKey {
            kind: BlobType::Node,
            hash: *hash,
        };
        Ok(self.index.read().entries.contains_key(&key))
    }
}

impl ValueStore for ObjectStore {
    fn persist_value(&self, value: &[u8]) -> Result<Hash> {
        let hash = self.algorithm.digest(value);
        self.put(hash, &Blob::new(BlobType::Value, value.to_vec()), false)
    }

    fn load_value(&self, hash: &Hash) -> Result<Vec<u8>> {
        Ok(self.get(BlobType::Value, hash)?.data)
    }
}

impl Drop for ObjectStore {
    fn drop(&mut self) {
        if let Err(e) = self.sync() {
            tracing::warn!(path = %self.path.display(), error = %e, "sync on drop failed");
        }
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}

fn read_hash(bytes: &[u8]) -> Hash {
    let mut buf = [0u8; 32];
    buf.copy_from_slice(&bytes[..32]);
    Hash::from_bytes(buf)
}
