//! Nibble paths
//!
//! Keys are never compared as raw bytes inside the trie. Each key byte is
//! split into two 4-bit nibbles (high half first), so a key of `n` bytes is
//! always a path of `2n` nibbles in `0..=15`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;

/// An owned sequence of nibbles
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NibblePath(Vec<u8>);

impl NibblePath {
    pub fn new() -> Self {
        NibblePath(Vec::new())
    }

    /// Split every byte into its high and low nibble
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut nibbles = Vec::with_capacity(bytes.len() * 2);
        for byte in bytes {
            nibbles.push(byte >> 4);
            nibbles.push(byte & 0x0f);
        }
        NibblePath(nibbles)
    }

    /// Build a path from raw nibble values, each in `0..=15`
    pub fn from_nibbles(nibbles: &[u8]) -> Self {
        debug_assert!(
            nibbles.iter().all(|n| *n < 16),
            "nibble value out of range"
        );
        NibblePath(nibbles.to_vec())
    }

    /// Parse a string of hex digits, one nibble per character
    pub fn from_hex(s: &str) -> Option<Self> {
        s.chars()
            .map(|c| c.to_digit(16).map(|d| d as u8))
            .collect::<Option<Vec<u8>>>()
            .map(NibblePath)
    }

    /// Pack back into bytes; `None` if the path has odd length
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        if self.0.len() % 2 != 0 {
            return None;
        }
        Some(
            self.0
                .chunks(2)
                .map(|pair| (pair[0] << 4) | pair[1])
                .collect(),
        )
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn push(&mut self, nibble: u8) {
        debug_assert!(nibble < 16);
        self.0.push(nibble);
    }

    pub fn extend_from_slice(&mut self, nibbles: &[u8]) {
        self.0.extend_from_slice(nibbles);
    }
}

impl Deref for NibblePath {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for NibblePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for nibble in &self.0 {
            write!(f, "{:x}", nibble)?;
        }
        Ok(())
    }
}

impl fmt::Debug for NibblePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NibblePath({})", self)
    }
}

/// Length of the longest shared leading run of two nibble sequences
pub fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}
