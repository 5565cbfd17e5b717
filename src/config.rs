//! Engine configuration
//!
//! A [`TrieConfig`] is handed to the trie and the stores at construction time.
//! It can be loaded from JSON, either next to a database file
//! (`<db>.json`) or from the platform config directory
//! (`~/.config/patricia/config.json` on Linux).

use crate::model::HashAlgorithm;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Values longer than this many bytes go to the value store by default
pub const DEFAULT_INLINE_THRESHOLD: usize = 32;

/// Default zstd level for stored blobs
pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

const MAX_INLINE_THRESHOLD: usize = 1 << 20;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrieConfig {
    /// Digest used for node and value storage keys (only applied when a store is created)
    pub hash_algorithm: HashAlgorithm,
    /// Values longer than this are stored by content hash instead of inline
    pub inline_threshold: usize,
    /// zstd level used when writing blobs to a file store
    pub compression_level: i32,
}

impl Default for TrieConfig {
    fn default() -> Self {
        TrieConfig {
            hash_algorithm: HashAlgorithm::default(),
            inline_threshold: DEFAULT_INLINE_THRESHOLD,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
        }
    }
}

impl TrieConfig {
    pub fn with_hash_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.hash_algorithm = algorithm;
        self
    }

    pub fn with_inline_threshold(mut self, threshold: usize) -> Self {
        self.inline_threshold = threshold;
        self
    }

    /// Check that all values are within the supported ranges
    pub fn validate(&self) -> Result<()> {
        if self.inline_threshold == 0 || self.inline_threshold > MAX_INLINE_THRESHOLD {
            return Err(Error::Config(format!(
                "inline_threshold must be between 1 and {}, got {}",
                MAX_INLINE_THRESHOLD, self.inline_threshold
            )));
        }
        if !(1..=22).contains(&self.compression_level) {
            return Err(Error::Config(format!(
                "compression_level must be between 1 and 22, got {}",
                self.compression_level
            )));
        }
        Ok(())
    }

    /// Load a config file, failing if it does not exist
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: TrieConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Save config as pretty JSON
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Resolve the config for a database file
    ///
    /// Checks `<db>.json` first, then the user config directory, and falls
    /// back to defaults when neither exists.
    pub fn resolve(db_path: &Path) -> Result<Self> {
        let local = Self::config_path(db_path);
        if local.exists() {
            return Self::load(local);
        }
        if let Some(user) = Self::user_config_path() {
            if user.exists() {
                return Self::load(user);
            }
        }
        Ok(Self::default())
    }

    /// Path of the config file that sits next to a database file
    pub fn config_path(db_path: &Path) -> PathBuf {
        let mut name = db_path.as_os_str().to_owned();
        name.push(".json");
        PathBuf::from(name)
    }

    /// `<config dir>/patricia/config.json`, if the platform has a config dir
    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("patricia").join("config.json"))
    }
}
