//! History diff (spec.md §4.5): one verdict per gpath, comparing two
//! peers' full histories rather than raw file bytes.
//!
//! Grounded on the original's `src/history/diff.py::diff_histories` —
//! same five-verdict table (`insync`/`newer`/`older`/`history_conflict`/
//! `conflict`), same asymmetric two-pass structure (gpaths from side 1
//! first, then any gpath only present on side 2).

use ahash::HashMap;

use crate::history::{contents_match, entries_match, has_matching_entry, History, HistoryEntry};
use crate::path::GroupedPath;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffVerdict {
    InSync,
    Newer,
    Older,
    HistoryConflict,
    Conflict,
}

/// One verdict for one gpath. `latest1`/`latest2` are each side's latest
/// entry (absent when the gpath isn't present on that side at all).
#[derive(Debug, Clone)]
pub struct HistoryDiff {
    pub verdict: DiffVerdict,
    pub gpath: GroupedPath,
    pub latest1: Option<HistoryEntry>,
    pub latest2: Option<HistoryEntry>,
}

/// Side 1 is conventionally remote/source, side 2 local/dest (spec.md
/// §4.6 reads this stream as `(newer, older) = (latest1, latest2)`).
pub fn diff_histories(
    history_by_gpath1: &HashMap<GroupedPath, History>,
    history_by_gpath2: &HashMap<GroupedPath, History>,
) -> Vec<HistoryDiff> {
    let mut out = Vec::with_capacity(history_by_gpath1.len() + history_by_gpath2.len());

    for (gpath, history1) in history_by_gpath1 {
        let history2 = history_by_gpath2.get(gpath);
        let latest1 = history1.latest.clone();
        let latest2 = history2.map(|h| h.latest.clone());

        let verdict = match &latest2 {
            None => DiffVerdict::Newer,
            Some(l2) if entries_match(&latest1, l2) => DiffVerdict::InSync,
            Some(l2) if contents_match(&latest1, l2) => DiffVerdict::HistoryConflict,
            // side 2's latest appears somewhere in side 1's full history:
            // side 1 has already moved past it.
            Some(l2) if has_matching_entry(history1, l2) => DiffVerdict::Newer,
            // side 1's latest appears somewhere in side 2's full history:
            // side 2 has already moved past it.
            Some(_) if history2.is_some_and(|h| has_matching_entry(h, &latest1)) => DiffVerdict::Older,
            Some(_) => DiffVerdict::Conflict,
        };

        out.push(HistoryDiff { verdict, gpath: gpath.clone(), latest1: Some(latest1), latest2 });
    }

    for (gpath, history2) in history_by_gpath2 {
        if history_by_gpath1.contains_key(gpath) {
            continue;
        }
        out.push(HistoryDiff {
            verdict: DiffVerdict::Older,
            gpath: gpath.clone(),
            latest1: None,
            latest2: Some(history2.latest.clone()),
        });
    }

    out
}
