//! The scan engine (spec.md §4.4, C8): turns a live directory listing
//! into new, durable [`HistoryEntry`] rows for one peer.
//!
//! Grounded on `scan_directory_with_excludes`'s overall walk/hash/record
//! shape, extended with a **hash-then-rescan-for-stability** step (step
//! 7 below), since hashing once and trusting it races a file still
//! being written. It is grounded instead on the original's
//! `src/fs/FileScanner.py`, which re-stats every hashed path and
//! discards any that changed under the hasher, converting the racy
//! "list, then hash" sequence into a durable record of a quiescent
//! state.

use std::collections::HashSet;
use std::path::Path;

use ahash::{HashMap, HashMapExt};
use rayon::prelude::*;
use thiserror::Error;
use tracing::warn;

use crate::clock::Clock;
use crate::filter::{GlobFilter, NameFilter};
use crate::fsops;
use crate::group::GroupMap;
use crate::hash::HashAlgorithm;
use crate::history::{AuthorAction, HistoryEntry, HistoryStore, StoreError, DELETED_MTIME, DELETED_SIZE};
use crate::path::GroupedPath;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("I/O error listing {0}: {1}")]
    List(std::path::PathBuf, std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiffType {
    Created,
    Changed,
    Deleted,
}

impl DiffType {
    fn author_action(self) -> AuthorAction {
        match self {
            DiffType::Created => AuthorAction::Create,
            DiffType::Changed => AuthorAction::Update,
            DiffType::Deleted => AuthorAction::Delete,
        }
    }
}

struct ScanDiff {
    gpath: GroupedPath,
    diff_type: DiffType,
    full_path: std::path::PathBuf,
    size: u64,
    mtime: i64,
}

/// Run one full scan cycle for `root` and return this peer's refreshed
/// history (spec.md §4.4 steps 1-9).
#[allow(clippy::too_many_arguments)]
pub fn scan(
    root: &Path,
    root_mark: Option<&str>,
    name_filter: &NameFilter,
    glob_filter: &GlobFilter,
    hash_algorithm: HashAlgorithm,
    history_store: &HistoryStore,
    local_peerid: &str,
    group_map: &GroupMap,
    clock: &dyn Clock,
) -> Result<Vec<HistoryEntry>, ScanError> {
    // 1. Read current history.
    let history = history_store.read_entries(local_peerid)?;
    let latest_by_gpath = latest_per_gpath(&history);

    // 2. List.
    let stats = fsops::list_stats(root, root_mark, name_filter)
        .map_err(|e| ScanError::List(root.to_path_buf(), e))?;

    // 3. Assign gpath, dropping anything whose root has no groupid.
    let mut seen_gpaths = HashSet::new();
    let mut diffs = Vec::new();
    for stat in &stats {
        let Some(groupid) = group_map.groupid_for_root(&stat.rpath.root) else {
            warn!(root = %stat.rpath.root.display(), "ignored_unknown_root");
            continue;
        };
        let gpath = GroupedPath::new(groupid, stat.rpath.rel.clone());
        seen_gpaths.insert(gpath.clone());

        // 4. Diff against history.
        let diff_type = match latest_by_gpath.get(&gpath) {
            None => Some(DiffType::Created),
            Some(latest) if latest.size == stat.size && fsops::mtime_eq(latest.mtime, stat.mtime) => None,
            Some(_) => Some(DiffType::Changed),
        };
        if let Some(diff_type) = diff_type {
            diffs.push(ScanDiff {
                gpath,
                diff_type,
                full_path: stat.rpath.full_path(),
                size: stat.size,
                mtime: stat.mtime,
            });
        }
    }

    // 4 (continued). Entries whose path vanished and weren't already
    // a recorded deletion.
    for (gpath, latest) in &latest_by_gpath {
        if seen_gpaths.contains(gpath) || latest.deleted() {
            continue;
        }
        diffs.push(ScanDiff {
            gpath: gpath.clone(),
            diff_type: DiffType::Deleted,
            full_path: root.to_path_buf(), // unused for deletions
            size: DELETED_SIZE,
            mtime: DELETED_MTIME,
        });
    }

    // 5. Apply the slow glob filter.
    diffs.retain(|d| !glob_filter.ignore_path(&d.gpath.rel));

    // 6. Hash every non-deleted diff in parallel; drop (and log) failures.
    let hashed: Vec<(ScanDiff, crate::hash::ContentHash)> = diffs
        .into_par_iter()
        .filter_map(|diff| {
            if diff.diff_type == DiffType::Deleted {
                return Some((diff, crate::hash::ContentHash::empty()));
            }
            match fsops::hash(&diff.full_path, hash_algorithm) {
                Ok(hash) => Some((diff, hash)),
                Err(e) => {
                    warn!(path = %diff.full_path.display(), error = %e, "scan_hash_failed");
                    None
                },
            }
        })
        .collect();

    // 7. Rescan exactly the hashed paths; keep only those still matching
    // the stat recorded at listing time.
    let to_recheck: Vec<_> = hashed
        .iter()
        .filter(|(d, _)| d.diff_type != DiffType::Deleted)
        .map(|(d, _)| crate::path::RootedPath::new(root.to_path_buf(), d.gpath.rel.clone()))
        .collect();
    let fresh_stats = fsops::stats(&to_recheck);
    let fresh_by_rel: HashMap<_, _> = fresh_stats.into_iter().map(|s| (s.rpath.rel.clone(), s)).collect();

    let mut stable_entries = Vec::new();
    let now = clock.unix();
    for (diff, hash) in hashed {
        let is_stable = match diff.diff_type {
            DiffType::Deleted => true,
            _ => match fresh_by_rel.get(&diff.gpath.rel) {
                Some(fresh) => fresh.size == diff.size && fsops::mtime_eq(fresh.mtime, diff.mtime),
                None => false, // vanished between hash and rescan
            },
        };
        if !is_stable {
            continue;
        }

        stable_entries.push(HistoryEntry {
            utime: now,
            peerid: local_peerid.to_string(),
            groupid: diff.gpath.groupid.clone(),
            path: diff.gpath.rel,
            size: diff.size,
            mtime: diff.mtime,
            hash,
            author_peerid: local_peerid.to_string(),
            author_utime: now,
            author_action: diff.diff_type.author_action(),
        });
    }

    // 8. Record.
    history_store.add_entries(&stable_entries)?;

    // 9. Re-read and return.
    Ok(history_store.read_entries(local_peerid)?)
}

fn latest_per_gpath(entries: &[HistoryEntry]) -> HashMap<GroupedPath, HistoryEntry> {
    let mut out: HashMap<GroupedPath, HistoryEntry> = HashMap::with_capacity(entries.len());
    for entry in entries {
        let gpath = GroupedPath::new(entry.groupid.clone(), entry.path.clone());
        match out.get(&gpath) {
            Some(existing) if existing >= entry => {},
            _ => {
                out.insert(gpath, entry.clone());
            },
        }
    }
    out
}
