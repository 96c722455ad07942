//! The group map: a bidirectional `groupid <-> local root` table
//! (spec.md C7), plus peerid derivation for single-host two-tree runs.
//!
//! Grounded on spec.md §9 Open Question (c): in single-host mode (one
//! process comparing a source tree against a dest tree, no network
//! peers), `peerid = tree root path` is an acceptable, stable-across-runs
//! choice. The bidirectional map shape mirrors the original's group
//! registration, which is implicit in `FileSystem.py`'s root-marker
//! handling rather than a standalone module; this crate makes it
//! explicit since two roots now need distinct peerids and groupids in
//! the same run.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GroupError {
    #[error("groupid {0:?} is already mapped to a different root")]
    GroupidConflict(String),
    #[error("root {0:?} is already mapped to a different groupid")]
    RootConflict(PathBuf),
}

/// `groupid <-> root` bidirectional map. A root may gain new virtual
/// sub-roots at scan time (via `root_mark`); those are registered here
/// under their own groupid too.
#[derive(Debug, Default)]
pub struct GroupMap {
    root_to_group: HashMap<PathBuf, String>,
    group_to_root: HashMap<String, PathBuf>,
}

impl GroupMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `root` under `groupid`. Idempotent if called again with
    /// the same pair; an error if either side is already bound to
    /// something else.
    pub fn register(&mut self, groupid: impl Into<String>, root: PathBuf) -> Result<(), GroupError> {
        let groupid = groupid.into();

        if let Some(existing) = self.group_to_root.get(&groupid) {
            if existing != &root {
                return Err(GroupError::GroupidConflict(groupid));
            }
            return Ok(());
        }
        if let Some(existing) = self.root_to_group.get(&root) {
            if existing != &groupid {
                return Err(GroupError::RootConflict(root));
            }
            return Ok(());
        }

        self.group_to_root.insert(groupid.clone(), root.clone());
        self.root_to_group.insert(root, groupid);
        Ok(())
    }

    pub fn groupid_for_root(&self, root: &Path) -> Option<&str> {
        self.root_to_group.get(root).map(String::as_str)
    }

    pub fn root_for_groupid(&self, groupid: &str) -> Option<&Path> {
        self.group_to_root.get(groupid).map(PathBuf::as_path)
    }
}

/// Derive a stable `peerid` for `root` in single-host two-tree mode
/// (spec.md §9 Open Question (c)): the canonicalized root path, falling
/// back to its given form if canonicalization fails (e.g. the root
/// doesn't exist yet).
pub fn peerid_for_root(root: &Path) -> String {
    let canonical = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    canonical.to_string_lossy().into_owned()
}
