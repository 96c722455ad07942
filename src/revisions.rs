//! The revisions store: a content-addressed trash for files displaced by
//! a merge, so nothing is ever silently lost (spec.md §4.3, §4.6 `delete`
//! and `touch` actions land their `older` side here before removal).
//!
//! Grounded on the original's `src/fs/revisions.py`: path derivation by
//! splicing the hash (or `size_mtime` when hashing is disabled) before
//! the file extension, and `__contains__` checking whether a revision
//! already exists via `stat_eq` rather than re-hashing.

use std::path::PathBuf;

use crate::fsops::{self, FsError};
use crate::history::HistoryEntry;
use crate::path::RelPath;

/// A content-addressed trash rooted at `root`, holding copies of any
/// file a merge action displaces.
pub struct RevisionStore {
    pub root: PathBuf,
}

impl RevisionStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// The revisions-relative path for `entry`: its hash spliced before
    /// the extension, or `size_mtime` when hashing is disabled (empty
    /// hash).
    pub fn revision_path(&self, entry: &HistoryEntry) -> RelPath {
        let key = if !entry.hash.is_empty() {
            entry.hash.as_str().to_string()
        } else {
            format!("{}_{}", entry.size, entry.mtime)
        };
        entry.path.with_spliced_stem(&key)
    }

    pub fn full_revision_path(&self, entry: &HistoryEntry) -> PathBuf {
        self.revision_path(entry).to_native(&self.root)
    }

    /// True if a revision matching `entry`'s `(size, mtime)` is already
    /// stored — checked by stat, not by re-reading the file.
    pub fn contains(&self, entry: &HistoryEntry) -> bool {
        fsops::stat_eq(&self.full_revision_path(entry), entry.size, entry.mtime)
    }

    /// True if a revision keyed by `hash` exists for `path`, regardless
    /// of the stat it was trashed under — used by the merge planner to
    /// recognize an `undelete` opportunity (spec.md §4.6).
    pub fn contains_hash(&self, path: &RelPath, hash: &crate::hash::ContentHash) -> bool {
        if hash.is_empty() {
            return false;
        }
        path.with_spliced_stem(hash.as_str()).to_native(&self.root).is_file()
    }

    /// Move a displaced file into the store, keyed by `dest_entry`.
    pub fn move_in(&self, source_path: &std::path::Path, dest_entry: &HistoryEntry) -> Result<(), FsError> {
        let dest_path = self.full_revision_path(dest_entry);
        fsops::mv(source_path, &dest_path, Some(dest_entry.mtime))
    }

    /// Copy a stored revision back out to `dest_path` (used to restore
    /// an `undelete` action's winning version).
    pub fn copy_out(&self, source_entry: &HistoryEntry, dest_path: &std::path::Path) -> Result<(), FsError> {
        let source_path = self.full_revision_path(source_entry);
        fsops::copy(&source_path, dest_path, Some(source_entry.mtime))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;
    use crate::history::AuthorAction;
    use std::fs;
    use tempfile::tempdir;

    fn entry(path: &str, size: u64, mtime: i64, hash: &str) -> HistoryEntry {
        HistoryEntry {
            utime: 1,
            peerid: "p1".to_string(),
            groupid: "g1".to_string(),
            path: RelPath::new(path),
            size,
            mtime,
            hash: ContentHash(hash.to_string()),
            author_peerid: "p1".to_string(),
            author_utime: 1,
            author_action: AuthorAction::Create,
        }
    }

    #[test]
    fn revision_path_uses_hash_when_present() {
        let store = RevisionStore::new(PathBuf::from("/revs"));
        let e = entry("photos/a.jpg", 10, 100, "deadbeef");
        assert_eq!(store.revision_path(&e).as_str(), "photos/a_deadbeef.jpg");
    }

    #[test]
    fn revision_path_falls_back_to_size_mtime() {
        let store = RevisionStore::new(PathBuf::from("/revs"));
        let e = entry("photos/a.jpg", 10, 100, "");
        assert_eq!(store.revision_path(&e).as_str(), "photos/a_10_100.jpg");
    }

    #[test]
    fn move_in_then_contains() {
        let dir = tempdir().unwrap();
        let store = RevisionStore::new(dir.path().join("revisions"));
        let source = dir.path().join("source.txt");
        fs::write(&source, b"hello").unwrap();

        let e = entry("a.txt", 5, 123456, "deadbeef");
        assert!(!store.contains(&e));
        store.move_in(&source, &e).unwrap();
        assert!(!source.exists());
        assert!(store.contains(&e));
    }

    #[test]
    fn copy_out_restores_file() {
        let dir = tempdir().unwrap();
        let store = RevisionStore::new(dir.path().join("revisions"));
        let source = dir.path().join("source.txt");
        fs::write(&source, b"hello").unwrap();
        let e = entry("a.txt", 5, 123456, "deadbeef");
        store.move_in(&source, &e).unwrap();

        let restored = dir.path().join("restored.txt");
        store.copy_out(&e, &restored).unwrap();
        assert_eq!(fs::read(&restored).unwrap(), b"hello");
    }
}
