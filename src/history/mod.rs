//! Persistent per-peer file history: the version record, its storage, and
//! the merge log (spec.md §3, §4.7).

pub mod entry;
pub mod store;

pub use entry::{
    conflict_winner, contents_match, entries_contents_match, entries_match, has_matching_entry,
    AuthorAction, History, HistoryEntry, DELETED_MTIME, DELETED_SIZE,
};
pub use store::{open, HistoryStore, MergeLog, MergeLogRow, StoreError};
