//! Canonical "/"-separated relative paths and the group/root identity pair.
//!
//! Internal paths are always unicode segments joined by "/", independent of
//! the host OS. The encoding boundary between this and native paths lives in
//! [`crate::fsops`].

use std::fmt;
use std::path::{Path, PathBuf};

/// A relative path, stored as "/"-joined segments regardless of host OS.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelPath(String);

impl RelPath {
    pub fn new(s: impl Into<String>) -> Self {
        let s = s.into().replace('\\', "/");
        Self(s.trim_start_matches('/').to_string())
    }

    pub fn from_native(root: &Path, full: &Path) -> Option<Self> {
        let rel = full.strip_prefix(root).ok()?;
        let s = rel.to_str()?;
        Some(Self::new(s))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Splice `key` immediately before the extension, matching the
    /// revisions-store path derivation in spec.md §4.3/§6.
    pub fn with_spliced_stem(&self, key: &str) -> RelPath {
        let p = Path::new(&self.0);
        let ext = p.extension().and_then(|e| e.to_str());
        let parent = p.parent().filter(|p| !p.as_os_str().is_empty());
        let stem = p
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.0);

        let basename = match ext {
            Some(ext) => format!("{stem}_{key}.{ext}"),
            None => format!("{stem}_{key}"),
        };

        let combined = match parent {
            Some(parent) => format!("{}/{}", parent.to_string_lossy(), basename),
            None => basename,
        };
        RelPath::new(combined)
    }

    pub fn to_native(&self, root: &Path) -> PathBuf {
        let mut out = root.to_path_buf();
        for seg in self.0.split('/') {
            out.push(seg);
        }
        out
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `(groupid, rel)` — the peer-independent identity of a file (spec.md's
/// "gpath").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupedPath {
    pub groupid: String,
    pub rel: RelPath,
}

impl GroupedPath {
    pub fn new(groupid: impl Into<String>, rel: RelPath) -> Self {
        Self { groupid: groupid.into(), rel }
    }
}

impl fmt::Display for GroupedPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.groupid, self.rel)
    }
}

/// `(root, rel)` — a path tied to a specific local tree root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootedPath {
    pub root: PathBuf,
    pub rel: RelPath,
}

impl RootedPath {
    pub fn new(root: PathBuf, rel: RelPath) -> Self {
        Self { root, rel }
    }

    pub fn full_path(&self) -> PathBuf {
        self.rel.to_native(&self.root)
    }
}
