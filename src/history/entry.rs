//! `HistoryEntry` and `History`: the append-only version record and its
//! per-path grouping (spec.md §3, §4.5).
//!
//! Grounded on the original's `src/history/entry.py`: ten canonical
//! fields, `History` caching `max(entries)` as `latest` (its comment notes
//! this is faster than `max(key=get_utime)` by .2s per 150,000 entries —
//! an optimization `HistoryEntry`'s field order and derived `Ord`
//! preserve here too, since `utime` sorts first), and `entries_match` /
//! `entries_contents_match` from `src/history/diff.py`.

use std::cmp::Ordering;

use crate::fsops::mtime_eq;
use crate::hash::ContentHash;
use crate::path::RelPath;

pub const DELETED_SIZE: u64 = 0;
pub const DELETED_MTIME: i64 = 0;

/// What produced an entry's version, recorded for audit/debugging; never
/// interpreted by the diff or merge logic itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuthorAction {
    Create,
    Update,
    Delete,
    Undelete,
    Merge,
}

impl AuthorAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorAction::Create => "create",
            AuthorAction::Update => "update",
            AuthorAction::Delete => "delete",
            AuthorAction::Undelete => "undelete",
            AuthorAction::Merge => "merge",
        }
    }
}

impl std::str::FromStr for AuthorAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(AuthorAction::Create),
            "update" => Ok(AuthorAction::Update),
            "delete" => Ok(AuthorAction::Delete),
            "undelete" => Ok(AuthorAction::Undelete),
            "merge" => Ok(AuthorAction::Merge),
            other => Err(format!("unknown author action: {other}")),
        }
    }
}

/// One row of a peer's file history (spec.md §3's ten canonical fields).
/// Field order matches the original's `TABLE_FIELDS` — `utime` first so
/// deriving `Ord` makes `max(entries)` pick the entry with the greatest
/// local insertion time, the same trick the original's comment calls out.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct HistoryEntry {
    pub utime: i64,
    pub peerid: String,
    pub groupid: String,
    pub path: RelPath,
    pub size: u64,
    pub mtime: i64,
    pub hash: ContentHash,
    pub author_peerid: String,
    pub author_utime: i64,
    pub author_action: AuthorAction,
}

impl HistoryEntry {
    /// Deleted-entry sentinel: zero size and zero mtime (spec.md §3).
    pub fn deleted(&self) -> bool {
        self.size == DELETED_SIZE && self.mtime == DELETED_MTIME
    }
}

impl std::hash::Hash for HistoryEntry {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.utime.hash(state);
        self.peerid.hash(state);
        self.groupid.hash(state);
        self.path.hash(state);
    }
}

/// Full version identity: same bytes *and* the same causal history. Two
/// entries this returns true for are the same replicated version, full
/// stop — distinguishes "in sync" from "same content, different history"
/// (`history_conflict`).
pub fn entries_match(a: &HistoryEntry, b: &HistoryEntry) -> bool {
    a.size == b.size
        && mtime_eq(a.mtime, b.mtime)
        && a.hash == b.hash
        && a.author_peerid == b.author_peerid
        && a.author_utime == b.author_utime
}

/// Content identity only: same size and hash, regardless of history.
pub fn contents_match(a: &HistoryEntry, b: &HistoryEntry) -> bool {
    a.size == b.size && a.hash == b.hash
}

/// Backward-compatible alias for [`contents_match`], matching the
/// original's name.
pub fn entries_contents_match(a: &HistoryEntry, b: &HistoryEntry) -> bool {
    contents_match(a, b)
}

/// True if `candidate` matches some entry anywhere in `history` (not just
/// the latest) — used to tell "newer" from "older" from true conflicts
/// when two histories' latest entries disagree (spec.md §4.5).
pub fn has_matching_entry(history: &History, candidate: &HistoryEntry) -> bool {
    history.entries.iter().any(|e| entries_match(candidate, e))
}

/// All history entries recorded for one path on one peer, with the
/// latest cached at construction (the original's `History.__new__`).
#[derive(Debug, Clone)]
pub struct History {
    pub entries: Vec<HistoryEntry>,
    pub latest: HistoryEntry,
}

impl History {
    /// Panics if `entries` is empty — a `History` always has a latest.
    pub fn new(entries: Vec<HistoryEntry>) -> Self {
        let latest = entries
            .iter()
            .max()
            .cloned()
            .expect("History::new requires at least one entry");
        Self { entries, latest }
    }
}

/// Conflict tie-break per spec.md §4.6: lexicographic comparison of
/// `(mtime, utime, size, hash)`, larger wins; deleted entries always lose
/// to non-deleted ones regardless of the tuple.
pub fn conflict_winner<'a>(a: &'a HistoryEntry, b: &'a HistoryEntry) -> &'a HistoryEntry {
    match (a.deleted(), b.deleted()) {
        (true, false) => return b,
        (false, true) => return a,
        _ => {},
    }
    let key = |e: &HistoryEntry| (e.mtime, e.utime, e.size, e.hash.as_str().to_string());
    match key(a).cmp(&key(b)) {
        Ordering::Less => b,
        _ => a,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(utime: i64, mtime: i64, size: u64, hash: &str, author_peerid: &str, author_utime: i64) -> HistoryEntry {
        HistoryEntry {
            utime,
            peerid: "p1".to_string(),
            groupid: "g1".to_string(),
            path: RelPath::new("a.txt"),
            size,
            mtime,
            hash: ContentHash(hash.to_string()),
            author_peerid: author_peerid.to_string(),
            author_utime,
            author_action: AuthorAction::Create,
        }
    }

    #[test]
    fn deleted_sentinel_is_zero_size_and_mtime() {
        let e = entry(1, 0, 0, "", "p1", 1);
        assert!(e.deleted());
        let e2 = entry(1, 5, 0, "", "p1", 1);
        assert!(!e2.deleted());
    }

    #[test]
    fn entries_match_requires_full_identity() {
        let a = entry(10, 1000, 5, "abc", "p1", 1);
        let b = entry(20, 1000, 5, "abc", "p1", 1);
        assert!(entries_match(&a, &b), "utime/peerid differ but version identity matches");

        let c = entry(20, 1000, 5, "abc", "p2", 1);
        assert!(!entries_match(&a, &c), "different author_peerid means different version");
    }

    #[test]
    fn entries_match_tolerates_mtime_granularity() {
        let a = entry(10, 1000, 5, "abc", "p1", 1);
        let b = entry(10, 1001, 5, "abc", "p1", 1);
        assert!(entries_match(&a, &b));
    }

    #[test]
    fn contents_match_ignores_history() {
        let a = entry(10, 1000, 5, "abc", "p1", 1);
        let b = entry(10, 2000, 5, "abc", "p2", 99);
        assert!(contents_match(&a, &b));
        assert!(!entries_match(&a, &b));
    }

    #[test]
    fn history_caches_max_as_latest() {
        let e1 = entry(1, 100, 1, "a", "p1", 1);
        let e2 = entry(5, 100, 1, "a", "p1", 1);
        let e3 = entry(3, 100, 1, "a", "p1", 1);
        let history = History::new(vec![e1, e2.clone(), e3]);
        assert_eq!(history.latest, e2);
    }

    #[test]
    fn has_matching_entry_scans_whole_history() {
        let old = entry(1, 100, 1, "a", "p1", 1);
        let newer_on_other_peer = entry(5, 200, 2, "b", "p1", 5);
        let history = History::new(vec![old.clone(), newer_on_other_peer]);
        assert!(has_matching_entry(&history, &old));

        let unrelated = entry(9, 999, 9, "z", "p9", 9);
        assert!(!has_matching_entry(&history, &unrelated));
    }

    #[test]
    fn conflict_winner_prefers_non_deleted() {
        let deleted = entry(5, 0, 0, "", "p1", 5);
        let alive = entry(1, 100, 1, "a", "p2", 1);
        assert_eq!(conflict_winner(&deleted, &alive), &alive);
        assert_eq!(conflict_winner(&alive, &deleted), &alive);
    }

    #[test]
    fn conflict_winner_breaks_ties_by_tuple() {
        let a = entry(1, 100, 1, "a", "p1", 1);
        let b = entry(1, 100, 2, "a", "p1", 1);
        assert_eq!(conflict_winner(&a, &b), &b, "larger size wins at equal mtime/utime");
    }
}
