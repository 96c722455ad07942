//! Merge executor (spec.md §4.7, C11): applies planned [`MergeAction`]s
//! to the destination tree, trashing anything displaced into the
//! revisions store, and appending the resulting history.
//!
//! Grounded on `sync_changes`'s overall "apply one action, verify
//! first, append a log row" shape, generalized
//! from flat copy/delete to the full action set in spec.md §4.6, and on
//! the original's `src/fs/merge.py` for the verify-stat contract and
//! execution ordering (copies/moves before the deletes they may consume,
//! updates last since they may require network I/O).

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::clock::Clock;
use crate::fsops::{self, FsError};
use crate::hash::HashAlgorithm;
use crate::history::{AuthorAction, HistoryEntry, HistoryStore, MergeLog, StoreError};
use crate::path::RelPath;
use crate::plan::{ActionDetails, MergeAction, MergeActionType};
use crate::revisions::RevisionStore;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Resolves a `newer` entry's bytes for an `update` action, e.g. by
/// reading them from the source tree root. Implemented by whatever
/// transport the caller is using (always-local two-tree mode just reads
/// the source root directly).
pub trait SourceFetcher {
    /// Returns a local, readable path holding `entry`'s exact content.
    fn fetch(&self, entry: &HistoryEntry) -> std::io::Result<PathBuf>;
}

/// Fetches by reading the given source tree root directly — the only
/// transport spec.md's two-tree scope requires.
pub struct LocalRootFetcher {
    pub source_root: PathBuf,
}

impl SourceFetcher for LocalRootFetcher {
    fn fetch(&self, entry: &HistoryEntry) -> std::io::Result<PathBuf> {
        Ok(entry.path.to_native(&self.source_root))
    }
}

#[derive(Debug, Default, Clone)]
pub struct MergeReport {
    pub applied: Vec<MergeActionType>,
    pub skipped: Vec<(MergeActionType, String)>,
}

/// Apply `actions` to `dest_root`, in a fixed order: copy,
/// move, update_history, touch, delete, undelete, update.
#[allow(clippy::too_many_arguments)]
pub fn execute_merge(
    actions: Vec<MergeAction>,
    dest_root: &Path,
    revisions: &RevisionStore,
    history_store: &HistoryStore,
    merge_log: &MergeLog<impl Clock>,
    local_peerid: &str,
    hash_algorithm: HashAlgorithm,
    fetcher: &dyn SourceFetcher,
    clock: &dyn Clock,
) -> Result<MergeReport, MergeError> {
    let mut by_type: std::collections::HashMap<MergeActionType, Vec<MergeAction>> = std::collections::HashMap::new();
    for action in actions {
        by_type.entry(action.action_type).or_default().push(action);
    }

    let order = [
        MergeActionType::Copy,
        MergeActionType::Move,
        MergeActionType::UpdateHistory,
        MergeActionType::Touch,
        MergeActionType::Delete,
        MergeActionType::Undelete,
        MergeActionType::Update,
    ];

    // Paths a Move already relocated away from in this batch: a paired
    // Delete for the same rename (plan.rs's copy->move promotion leaves
    // the Delete in place so the rename's removal is still recorded in
    // history) has nothing left at its old path to verify or trash.
    let moved_away: HashSet<RelPath> = by_type
        .get(&MergeActionType::Move)
        .into_iter()
        .flatten()
        .filter_map(|a| match &a.details {
            Some(ActionDetails::MoveSource(old_entry)) => Some(old_entry.path.clone()),
            _ => None,
        })
        .collect();

    let mut report = MergeReport::default();
    let mut new_entries = Vec::new();

    for action_type in order {
        let Some(actions) = by_type.remove(&action_type) else { continue };
        for action in actions {
            match apply_one(&action, dest_root, revisions, local_peerid, hash_algorithm, fetcher, clock, &moved_away) {
                Ok(Some(entry)) => {
                    merge_log.add_action(local_peerid, &action)?;
                    new_entries.push(entry);
                    report.applied.push(action_type);
                },
                Ok(None) => {
                    // conflict/no-op: nothing to append, nothing to log.
                },
                Err(reason) => {
                    warn!(path = %action.path, action = action_type.as_str(), %reason, "merge_action_skipped");
                    report.skipped.push((action_type, reason));
                },
            }
        }
    }

    history_store.add_entries(&new_entries)?;
    info!(applied = new_entries.len(), skipped = report.skipped.len(), "merge_complete");
    Ok(report)
}

/// Verify-stat per spec.md §4.7: `expected` (if given and not deleted)
/// must match the path's current stat exactly; otherwise the path must
/// not exist.
fn verify_stat(path: &Path, expected: Option<&HistoryEntry>) -> bool {
    match expected {
        Some(e) if !e.deleted() => fsops::stat_eq(path, e.size, e.mtime),
        _ => !path.exists(),
    }
}

fn trash(path: &Path, older: &HistoryEntry, revisions: &RevisionStore) -> Result<(), FsError> {
    if path.exists() {
        revisions.move_in(path, older)?;
        fsops::remove_empty_parent_dirs(path);
    }
    Ok(())
}

fn append_entry(source: &HistoryEntry, local_peerid: &str, clock: &dyn Clock) -> HistoryEntry {
    let mut entry = source.clone();
    entry.utime = clock.unix();
    entry.peerid = local_peerid.to_string();
    entry
}

#[allow(clippy::too_many_arguments)]
fn apply_one(
    action: &MergeAction,
    dest_root: &Path,
    revisions: &RevisionStore,
    local_peerid: &str,
    hash_algorithm: HashAlgorithm,
    fetcher: &dyn SourceFetcher,
    clock: &dyn Clock,
    moved_away: &HashSet<RelPath>,
) -> Result<Option<HistoryEntry>, String> {
    let dest_path = action.path.to_native(dest_root);

    match action.action_type {
        MergeActionType::Copy => {
            let Some(ActionDetails::CopySource(source_entry)) = &action.details else {
                return Err("copy action missing source details".to_string());
            };
            let source_path = source_entry.path.to_native(dest_root);
            if !verify_stat(&source_path, Some(source_entry)) {
                return Err("copy source stat mismatch".to_string());
            }
            if !verify_stat(&dest_path, action.older.as_ref()) {
                return Err("copy destination stat mismatch".to_string());
            }
            let newer = action.newer.as_ref().ok_or("copy missing newer entry")?;
            fsops::copy(&source_path, &dest_path, Some(newer.mtime)).map_err(|e| e.to_string())?;
            Ok(Some(append_entry(newer, local_peerid, clock)))
        },

        MergeActionType::Move => {
            let Some(ActionDetails::MoveSource(old_entry)) = &action.details else {
                return Err("move action missing source details".to_string());
            };
            let old_path = old_entry.path.to_native(dest_root);
            if !verify_stat(&old_path, Some(old_entry)) {
                return Err("move source stat mismatch".to_string());
            }
            if !verify_stat(&dest_path, action.older.as_ref()) {
                return Err("move destination stat mismatch".to_string());
            }
            let newer = action.newer.as_ref().ok_or("move missing newer entry")?;
            fsops::mv(&old_path, &dest_path, Some(newer.mtime)).map_err(|e| e.to_string())?;
            Ok(Some(append_entry(newer, local_peerid, clock)))
        },

        MergeActionType::UpdateHistory => {
            let newer = action.newer.as_ref().ok_or("update_history missing newer entry")?;
            Ok(Some(append_entry(newer, local_peerid, clock)))
        },

        MergeActionType::Touch => {
            if !verify_stat(&dest_path, action.older.as_ref()) {
                return Err("touch destination stat mismatch".to_string());
            }
            let newer = action.newer.as_ref().ok_or("touch missing newer entry")?;
            fsops::touch(&dest_path, newer.mtime).map_err(|e| e.to_string())?;
            Ok(Some(append_entry(newer, local_peerid, clock)))
        },

        MergeActionType::Delete => {
            let older = action.older.as_ref().ok_or("delete missing older entry")?;
            let newer = action.newer.as_ref().ok_or("delete missing newer entry")?;
            if moved_away.contains(&action.path) {
                // A paired Move already relocated this path in this same
                // batch; there's nothing left here to verify or trash, but
                // the deletion still needs to be recorded.
                return Ok(Some(append_entry(newer, local_peerid, clock)));
            }
            if !verify_stat(&dest_path, Some(older)) {
                return Err("delete destination stat mismatch".to_string());
            }
            trash(&dest_path, older, revisions).map_err(|e| e.to_string())?;
            Ok(Some(append_entry(newer, local_peerid, clock)))
        },

        MergeActionType::Undelete => {
            let Some(ActionDetails::UndeleteRevision(revision_entry)) = &action.details else {
                return Err("undelete action missing revision details".to_string());
            };
            if !verify_stat(&dest_path, action.older.as_ref()) {
                return Err("undelete destination stat mismatch".to_string());
            }
            if let Some(older) = &action.older {
                trash(&dest_path, older, revisions).map_err(|e| e.to_string())?;
            }
            revisions.copy_out(revision_entry, &dest_path).map_err(|e| e.to_string())?;
            let newer = action.newer.as_ref().ok_or("undelete missing newer entry")?;
            Ok(Some(append_entry(newer, local_peerid, clock)))
        },

        MergeActionType::Update => {
            let newer = action.newer.as_ref().ok_or("update missing newer entry")?;
            if !verify_stat(&dest_path, action.older.as_ref()) {
                return Err("update destination stat mismatch".to_string());
            }
            let fetched_path = fetcher.fetch(newer).map_err(|e| e.to_string())?;
            if let Some(older) = &action.older {
                trash(&dest_path, older, revisions).map_err(|e| e.to_string())?;
            }
            let verify_algorithm = if newer.hash.is_empty() { None } else { Some(hash_algorithm) };
            let temp_dir = dest_path.parent().unwrap_or(dest_root).to_path_buf();
            let temp = fsops::generate_temp_path(&temp_dir);
            let bytes = std::fs::read(&fetched_path).map_err(|e| e.to_string())?;
            let mut writer = fsops::AtomicWriter::new(temp, dest_path.clone(), verify_algorithm).map_err(|e| e.to_string())?;
            writer.write(&bytes).map_err(|e| e.to_string())?;
            writer.commit(if newer.hash.is_empty() { None } else { Some(&newer.hash) }).map_err(|e| e.to_string())?;
            fsops::touch(&dest_path, newer.mtime).map_err(|e| e.to_string())?;
            Ok(Some(append_entry(newer, local_peerid, clock)))
        },

        MergeActionType::Conflict => {
            Err("unresolved conflict reached the executor".to_string())
        },
    }
}

/// Helper kept separate from `append_entry` since `AuthorAction` for a
/// merged entry is always `Merge` when the executor, not the scanner,
/// authored it — used by callers constructing entries outside the
/// action-driven path (e.g. tests).
pub fn merged_entry(source: &HistoryEntry, local_peerid: &str, clock: &dyn Clock) -> HistoryEntry {
    let mut entry = append_entry(source, local_peerid, clock);
    entry.author_action = AuthorAction::Merge;
    entry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::hash::ContentHash;
    use crate::path::RelPath;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn entry(path: &str, size: u64, mtime: i64, hash: &str) -> HistoryEntry {
        HistoryEntry {
            utime: 1,
            peerid: "source".to_string(),
            groupid: "g1".to_string(),
            path: RelPath::new(path),
            size,
            mtime,
            hash: ContentHash(hash.to_string()),
            author_peerid: "source".to_string(),
            author_utime: 1,
            author_action: AuthorAction::Create,
        }
    }

    struct NoopFetcher;
    impl SourceFetcher for NoopFetcher {
        fn fetch(&self, _entry: &HistoryEntry) -> std::io::Result<PathBuf> {
            Err(std::io::Error::new(std::io::ErrorKind::Unsupported, "no fetch in this test"))
        }
    }

    #[test]
    fn touch_updates_mtime_without_rewriting_bytes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"hello").unwrap();
        fsops::touch(&path, 1000).unwrap();

        let older = entry("a.txt", 5, 1000, "abc");
        let newer = entry("a.txt", 5, 2000, "abc");
        let action = MergeAction {
            action_type: MergeActionType::Touch,
            path: RelPath::new("a.txt"),
            older: Some(older),
            newer: Some(newer),
            details: None,
        };

        let conn = Mutex::new(crate::history::open(Path::new(":memory:")).unwrap());
        let store = HistoryStore::new(&conn);
        let log = MergeLog::new(&conn, FixedClock(9999));
        let revisions = RevisionStore::new(dir.path().join("revisions"));

        let report = execute_merge(
            vec![action],
            dir.path(),
            &revisions,
            &store,
            &log,
            "dest",
            HashAlgorithm::default(),
            &NoopFetcher,
            &FixedClock(5000),
        )
        .unwrap();

        assert_eq!(report.applied.len(), 1);
        assert!(fsops::stat_eq(&path, 5, 2000));
        assert_eq!(fs::read(&path).unwrap(), b"hello");
    }

    #[test]
    fn delete_trashes_file_into_revisions() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"hello").unwrap();
        fsops::touch(&path, 1000).unwrap();

        let older = entry("a.txt", 5, 1000, "abc");
        let newer_sentinel = HistoryEntry { size: 0, mtime: 0, hash: ContentHash::empty(), ..entry("a.txt", 0, 0, "") };
        let action = MergeAction {
            action_type: MergeActionType::Delete,
            path: RelPath::new("a.txt"),
            older: Some(older.clone()),
            newer: Some(newer_sentinel),
            details: None,
        };

        let conn = Mutex::new(crate::history::open(Path::new(":memory:")).unwrap());
        let store = HistoryStore::new(&conn);
        let log = MergeLog::new(&conn, FixedClock(9999));
        let revisions = RevisionStore::new(dir.path().join("revisions"));

        execute_merge(vec![action], dir.path(), &revisions, &store, &log, "dest", HashAlgorithm::default(), &NoopFetcher, &FixedClock(5000)).unwrap();

        assert!(!path.exists());
        assert!(revisions.contains(&older));
    }

    #[test]
    fn verify_stat_mismatch_skips_action() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a.txt");
        fs::write(&path, b"different content here").unwrap();

        let older = entry("a.txt", 5, 1000, "abc"); // doesn't match the actual file
        let newer = entry("a.txt", 5, 2000, "abc");
        let action = MergeAction {
            action_type: MergeActionType::Touch,
            path: RelPath::new("a.txt"),
            older: Some(older),
            newer: Some(newer),
            details: None,
        };

        let conn = Mutex::new(crate::history::open(Path::new(":memory:")).unwrap());
        let store = HistoryStore::new(&conn);
        let log = MergeLog::new(&conn, FixedClock(9999));
        let revisions = RevisionStore::new(dir.path().join("revisions"));

        let report = execute_merge(vec![action], dir.path(), &revisions, &store, &log, "dest", HashAlgorithm::default(), &NoopFetcher, &FixedClock(5000)).unwrap();
        assert_eq!(report.applied.len(), 0);
        assert_eq!(report.skipped.len(), 1);
    }

    #[test]
    fn copy_reuses_local_content_without_fetch() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("existing.txt"), b"shared").unwrap();
        fsops::touch(&dir.path().join("existing.txt"), 1000).unwrap();

        let source_entry = entry("existing.txt", 6, 1000, "sharedhash");
        let newer = entry("new.txt", 6, 3000, "sharedhash");
        let action = MergeAction {
            action_type: MergeActionType::Copy,
            path: RelPath::new("new.txt"),
            older: None,
            newer: Some(newer),
            details: Some(ActionDetails::CopySource(source_entry)),
        };

        let conn = Mutex::new(crate::history::open(Path::new(":memory:")).unwrap());
        let store = HistoryStore::new(&conn);
        let log = MergeLog::new(&conn, FixedClock(9999));
        let revisions = RevisionStore::new(dir.path().join("revisions"));

        let report = execute_merge(vec![action], dir.path(), &revisions, &store, &log, "dest", HashAlgorithm::default(), &NoopFetcher, &FixedClock(5000)).unwrap();
        assert_eq!(report.applied.len(), 1);
        assert_eq!(fs::read(dir.path().join("new.txt")).unwrap(), b"shared");
    }
}
