//! Persistent history storage: a `files` table holding every
//! [`HistoryEntry`] ever appended, and a `merges` table recording every
//! merge action taken (spec.md §4.7/§4.9).
//!
//! Grounded on the original's `src/history/store.py` (`HistoryStore`,
//! per-peer in-memory cache over the SQL rows) and
//! `src/history/mergelog.py` (`MergeLog`, `add_action`). The original
//! used an ad-hoc `sql` helper module over `sqlite3`; this uses `rusqlite`
//! (bundled SQLite) since no synchronous-style crate in the retrieved
//! pack carries an embedded database dependency and the original's own
//! storage choice was SQLite.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection};
use thiserror::Error;

use crate::clock::Clock;
use crate::hash::ContentHash;
use crate::history::entry::{AuthorAction, HistoryEntry};
use crate::path::RelPath;
use crate::plan::MergeAction;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid author_action stored: {0}")]
    BadAuthorAction(String),
}

/// Opens (creating if absent) the two tables this module owns on a
/// shared connection. `HistoryStore` and `MergeLog` can share one
/// `Connection` since SQLite serializes writers internally and callers
/// already wrap access behind a `Mutex`.
pub fn open(path: &Path) -> Result<Connection, StoreError> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS files (
            utime INTEGER NOT NULL,
            peerid TEXT NOT NULL,
            groupid TEXT NOT NULL,
            path TEXT NOT NULL,
            size INTEGER NOT NULL,
            mtime INTEGER NOT NULL,
            hash TEXT NOT NULL,
            author_peerid TEXT NOT NULL,
            author_utime INTEGER NOT NULL,
            author_action TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS files_groupid_path ON files(groupid, path);
        CREATE INDEX IF NOT EXISTS files_peerid ON files(peerid);

        CREATE TABLE IF NOT EXISTS merges (
            utime INTEGER NOT NULL,
            peerid TEXT NOT NULL,
            action TEXT NOT NULL,
            path TEXT NOT NULL,
            details TEXT NOT NULL,
            author_peerid TEXT NOT NULL
        );",
    )?;
    Ok(conn)
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<HistoryEntry> {
    let author_action_str: String = row.get(9)?;
    let author_action = author_action_str.parse::<AuthorAction>().map_err(|_| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, Box::new(
            std::io::Error::new(std::io::ErrorKind::InvalidData, author_action_str.clone()),
        ))
    })?;
    Ok(HistoryEntry {
        utime: row.get(0)?,
        peerid: row.get(1)?,
        groupid: row.get(2)?,
        path: RelPath::new(row.get::<_, String>(3)?),
        size: row.get::<_, i64>(4)? as u64,
        mtime: row.get(5)?,
        hash: ContentHash(row.get(6)?),
        author_peerid: row.get(7)?,
        author_utime: row.get(8)?,
        author_action,
    })
}

struct PeerCache {
    entries: Vec<HistoryEntry>,
}

/// The `files` table plus a per-peer in-memory read cache, matching the
/// original's `cache_by_peerid` (each peer's full history is read once
/// per process and then extended in place as entries are appended).
pub struct HistoryStore<'c> {
    conn: &'c Mutex<Connection>,
    cache_by_peerid: Mutex<HashMap<String, PeerCache>>,
}

impl<'c> HistoryStore<'c> {
    pub fn new(conn: &'c Mutex<Connection>) -> Self {
        Self { conn, cache_by_peerid: Mutex::new(HashMap::new()) }
    }

    /// All entries recorded under `peerid`, reading through to SQLite on
    /// first access and serving from cache thereafter.
    pub fn read_entries(&self, peerid: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        {
            let cache = self.cache_by_peerid.lock().unwrap();
            if let Some(hit) = cache.get(peerid) {
                return Ok(hit.entries.clone());
            }
        }

        let entries = self.select_entries(peerid)?;
        let mut cache = self.cache_by_peerid.lock().unwrap();
        let hit = cache.entry(peerid.to_string()).or_insert(PeerCache { entries: Vec::new() });
        hit.entries = entries.clone();
        Ok(entries)
    }

    fn select_entries(&self, peerid: &str) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT utime, peerid, groupid, path, size, mtime, hash, author_peerid, author_utime, author_action
             FROM files WHERE peerid = ?1",
        )?;
        let rows = stmt.query_map(params![peerid], row_to_entry)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Read every entry regardless of peer, used by the scan/diff/merge
    /// pipeline which always operates over one peer's whole local tree
    /// but needs history keyed by `(groupid, path)` across all peers
    /// that have ever touched it.
    pub fn read_all(&self) -> Result<Vec<HistoryEntry>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT utime, peerid, groupid, path, size, mtime, hash, author_peerid, author_utime, author_action
             FROM files",
        )?;
        let rows = stmt.query_map([], row_to_entry)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Transactional batch insert, then extend any already-warm peer
    /// caches in place (the original's `add_entries`).
    pub fn add_entries(&self, new_entries: &[HistoryEntry]) -> Result<(), StoreError> {
        if new_entries.is_empty() {
            return Ok(());
        }
        {
            let mut conn = self.conn.lock().unwrap();
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO files (utime, peerid, groupid, path, size, mtime, hash, author_peerid, author_utime, author_action)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                )?;
                for e in new_entries {
                    stmt.execute(params![
                        e.utime,
                        e.peerid,
                        e.groupid,
                        e.path.as_str(),
                        e.size as i64,
                        e.mtime,
                        e.hash.as_str(),
                        e.author_peerid,
                        e.author_utime,
                        e.author_action.as_str(),
                    ])?;
                }
            }
            tx.commit()?;
        }

        let mut cache = self.cache_by_peerid.lock().unwrap();
        let mut by_peer: HashMap<&str, Vec<HistoryEntry>> = HashMap::new();
        for e in new_entries {
            by_peer.entry(e.peerid.as_str()).or_default().push(e.clone());
        }
        for (peerid, entries) in by_peer {
            if let Some(hit) = cache.get_mut(peerid) {
                hit.entries.extend(entries);
            }
        }
        Ok(())
    }
}

/// The `merges` table: one row per merge action taken, for audit and
/// troubleshooting (spec.md §4.7).
pub struct MergeLog<'c, C: Clock> {
    conn: &'c Mutex<Connection>,
    clock: C,
}

impl<'c, C: Clock> MergeLog<'c, C> {
    pub fn new(conn: &'c Mutex<Connection>, clock: C) -> Self {
        Self { conn, clock }
    }

    pub fn read_entries(&self) -> Result<Vec<MergeLogRow>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT utime, peerid, action, path, details, author_peerid FROM merges",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(MergeLogRow {
                utime: row.get(0)?,
                peerid: row.get(1)?,
                action: row.get(2)?,
                path: row.get(3)?,
                details: row.get(4)?,
                author_peerid: row.get(5)?,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Record one executed merge action, peerid/author taken from the
    /// action's `newer` side as in the original.
    pub fn add_action(&self, peerid: &str, action: &MergeAction) -> Result<(), StoreError> {
        let utime = self.clock.unix();
        let author_peerid = action
            .newer
            .as_ref()
            .map(|e| e.author_peerid.as_str())
            .unwrap_or("");
        let details = action.details.as_ref().map(|d| d.as_str()).unwrap_or_default();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO merges (utime, peerid, action, path, details, author_peerid)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![utime, peerid, action.action_type.as_str(), action.path.as_str(), details, author_peerid],
        )?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeLogRow {
    pub utime: i64,
    pub peerid: String,
    pub action: String,
    pub path: String,
    pub details: String,
    pub author_peerid: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::plan::MergeActionType;

    fn entry(utime: i64, peerid: &str, path: &str) -> HistoryEntry {
        HistoryEntry {
            utime,
            peerid: peerid.to_string(),
            groupid: "g1".to_string(),
            path: RelPath::new(path),
            size: 5,
            mtime: 1000,
            hash: ContentHash("abc".to_string()),
            author_peerid: peerid.to_string(),
            author_utime: utime,
            author_action: AuthorAction::Create,
        }
    }

    #[test]
    fn add_and_read_entries_round_trip() {
        let conn = Mutex::new(open(Path::new(":memory:")).unwrap());
        let store = HistoryStore::new(&conn);
        store.add_entries(&[entry(1, "p1", "a.txt"), entry(2, "p2", "b.txt")]).unwrap();

        let p1_entries = store.read_entries("p1").unwrap();
        assert_eq!(p1_entries.len(), 1);
        assert_eq!(p1_entries[0].path.as_str(), "a.txt");

        let all = store.read_all().unwrap();
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn cache_extends_on_append_without_rereading() {
        let conn = Mutex::new(open(Path::new(":memory:")).unwrap());
        let store = HistoryStore::new(&conn);
        store.add_entries(&[entry(1, "p1", "a.txt")]).unwrap();
        assert_eq!(store.read_entries("p1").unwrap().len(), 1);

        store.add_entries(&[entry(2, "p1", "b.txt")]).unwrap();
        assert_eq!(store.read_entries("p1").unwrap().len(), 2);
    }

    #[test]
    fn merge_log_records_action() {
        let conn = Mutex::new(open(Path::new(":memory:")).unwrap());
        let log = MergeLog::new(&conn, FixedClock(500));
        let newer = entry(9, "p2", "a.txt");
        let action = MergeAction {
            action_type: MergeActionType::Touch,
            path: RelPath::new("a.txt"),
            older: Some(entry(1, "p1", "a.txt")),
            newer: Some(newer),
            details: None,
        };
        log.add_action("p1", &action).unwrap();

        let rows = log.read_entries().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].utime, 500);
        assert_eq!(rows[0].action, "touch");
        assert_eq!(rows[0].author_peerid, "p2");
    }
}
