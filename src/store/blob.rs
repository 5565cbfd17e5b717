//! Blob type - the unit of content-addressed storage

use serde::{Deserialize, Serialize};

/// Type tag for blobs
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BlobType {
    /// An encoded trie node
    Node,
    /// Raw bytes of a large user value
    Value,
}

impl BlobType {
    pub fn as_byte(&self) -> u8 {
        match self {
            BlobType::Node => 0,
            BlobType::Value => 1,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(BlobType::Node),
            1 => Some(BlobType::Value),
            _ => None,
        }
    }
}

/// A blob is a typed, compressed chunk of data
#[derive(Clone, Debug)]
pub struct Blob {
    /// Type of content
    pub blob_type: BlobType,
    /// Raw data (uncompressed)
    pub data: Vec<u8>,
}

impl Blob {
    pub fn new(blob_type: BlobType, data: Vec<u8>) -> Self {
        Blob { blob_type, data }
    }

    /// Compress the blob for storage
    pub fn compress(&self, level: i32) -> crate::Result<Vec<u8>> {
        let mut output = Vec::new();
        // Type byte prefix
        output.push(self.blob_type.as_byte());
        let compressed = zstd::encode_all(self.data.as_slice(), level)?;
        output.extend(compressed);
        Ok(output)
    }

    /// Decompress a blob from storage
    pub fn decompress(data: &[u8]) -> crate::Result<Self> {
        let (&kind, body) = data
            .split_first()
            .ok_or_else(|| crate::Error::Corruption("Empty blob data".into()))?;

        let blob_type = BlobType::from_byte(kind)
            .ok_or_else(|| crate::Error::Corruption(format!("Invalid blob type: {}", kind)))?;

        let decompressed = zstd::decode_all(body)?;

        Ok(Blob {
            blob_type,
            data: decompressed,
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}
