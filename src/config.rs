//! Sync configuration (spec.md §4.8, C12): a TOML file plus CLI
//! overrides.
//!
//! Grounded on the original's `latus.py`/`psync.py`, which read a config
//! file of this same shape (hash algorithm, ignored globs, mount/group
//! roots) before starting a sync pass; serialized with `serde`+`toml`
//! the way `bobisme-maw` and `jax-protocol-jax-fs` load their own
//! configs in this example pack.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::hash::HashAlgorithm;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
}

fn default_db_relpath() -> String {
    ".vsync/history.db".to_string()
}

fn default_revisions_relpath() -> String {
    ".vsync/revisions".to_string()
}

fn default_group_root_marker() -> Option<String> {
    None
}

/// Deserialized shape of `vsync.toml`. Every field has a sensible
/// default so an empty file (or none at all) is valid.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub hash_algorithm: HashAlgorithmConfig,

    /// File name that, when present in a directory, introduces a new
    /// group root beneath it (e.g. `.histsync`).
    #[serde(default = "default_group_root_marker")]
    pub group_root_marker: Option<String>,

    /// Path to the SQLite history/merge-log file, relative to the tree
    /// root it lives under.
    #[serde(default = "default_db_relpath")]
    pub db_relpath: String,

    /// Path to the revisions (trash) directory, relative to the tree
    /// root it lives under.
    #[serde(default = "default_revisions_relpath")]
    pub revisions_relpath: String,

    /// Directory/file names skipped entirely at scan time.
    pub ignore_names: Vec<String>,

    /// Shell-style globs applied to the post-diff path stream.
    pub ignore_globs: Vec<String>,

    /// `groupid -> local root` for this peer, beyond the implicit
    /// mapping of the source/dest roots passed on the command line.
    pub group_map: HashMap<String, PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithmConfig::default(),
            group_root_marker: default_group_root_marker(),
            db_relpath: default_db_relpath(),
            revisions_relpath: default_revisions_relpath(),
            ignore_names: default_ignore_names(),
            ignore_globs: Vec::new(),
            group_map: HashMap::new(),
        }
    }
}

fn default_ignore_names() -> Vec<String> {
    vec![".vsync".to_string(), ".git".to_string()]
}

/// Wrapper so `"blake3"`/`"sha256"`/`"none"` deserialize directly via
/// `HashAlgorithm`'s `FromStr`, with blake3 as the TOML-level default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HashAlgorithmConfig(pub HashAlgorithm);

impl Default for HashAlgorithmConfig {
    fn default() -> Self {
        Self(HashAlgorithm::default())
    }
}

impl TryFrom<String> for HashAlgorithmConfig {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse::<HashAlgorithm>().map(HashAlgorithmConfig)
    }
}

impl From<HashAlgorithmConfig> for String {
    fn from(c: HashAlgorithmConfig) -> Self {
        match c.0 {
            #[cfg(feature = "blake3")]
            HashAlgorithm::Blake3 => "blake3".to_string(),
            #[cfg(feature = "sha256")]
            HashAlgorithm::Sha256 => "sha256".to_string(),
            HashAlgorithm::None => "none".to_string(),
        }
    }
}

impl SyncConfig {
    /// Load from a TOML file. Missing fields fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }
}
