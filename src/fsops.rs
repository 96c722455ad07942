//! The filesystem adapter (spec.md §4.1): listing, stat, hashing, atomic
//! copy/move/touch, parent-dir cleanup, and the path encode/decode boundary.
//!
//! Grounded on `io.rs`'s atomic write + journal recovery machinery for
//! the mutation half, and on the original's `src/fs/FileSystem.py` for the
//! stat/list/touch contract shape. Individual-file stat/hash/read errors
//! are swallowed here (treated as "not present") per spec.md §4.1 and §7;
//! everything else surfaces to the caller.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

use crate::filter::NameFilter;
use crate::hash::{ContentHash, HashAlgorithm, Hasher};
use crate::path::{RelPath, RootedPath};

const COPY_BUFFER_SIZE: usize = 256 * 1024;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Error, Debug)]
pub enum FsError {
    #[error("destination already exists: {0}")]
    DestinationExists(PathBuf),
    #[error("hash verification failed for {path}: expected {expected}, got {actual}")]
    HashMismatch { path: PathBuf, expected: String, actual: String },
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// `(rpath, size, mtime)` as observed by a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub rpath: RootedPath,
    pub size: u64,
    pub mtime: i64,
}

fn system_time_to_unix(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

fn unix_to_system_time(secs: i64) -> SystemTime {
    if secs >= 0 {
        UNIX_EPOCH + std::time::Duration::from_secs(secs as u64)
    } else {
        UNIX_EPOCH
    }
}

/// List every regular file under `root`, honoring `ignore_names` at
/// directory level and treating a directory containing `root_mark` (if
/// given) as a new virtual root for everything beneath it (spec.md §4.1).
/// Symlinked directories are never descended into, preventing cycles.
pub fn list_stats(
    root: &Path,
    root_mark: Option<&str>,
    ignore_names: &NameFilter,
) -> io::Result<Vec<FileStat>> {
    let mut out = Vec::with_capacity(1024);
    walk_dir(root, root, root_mark, ignore_names, &mut out);
    Ok(out)
}

fn walk_dir(
    virtual_root: &Path,
    dir: &Path,
    root_mark: Option<&str>,
    ignore_names: &NameFilter,
    out: &mut Vec<FileStat>,
) {
    let effective_root = match root_mark {
        Some(mark) if dir.join(mark).is_file() && dir != virtual_root => dir,
        _ => virtual_root,
    };

    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(_) => return,
    };

    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let name = entry.file_name();
        let name_str = name.to_string_lossy();
        if ignore_names.ignores_name(&name_str) {
            continue;
        }

        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(t) => t,
            Err(_) => continue,
        };

        if file_type.is_symlink() {
            // Symlinks to directories are never followed (cycle prevention);
            // symlinks to regular files are treated as files.
            if let Ok(meta) = fs::metadata(&path) {
                if meta.is_file() {
                    push_stat(out, effective_root, &path, meta.len(), meta.modified().ok());
                }
            }
            continue;
        }

        if file_type.is_dir() {
            walk_dir(effective_root, &path, root_mark, ignore_names, out);
        } else if file_type.is_file() {
            if let Ok(meta) = entry.metadata() {
                push_stat(out, effective_root, &path, meta.len(), meta.modified().ok());
            }
        }
    }
}

fn push_stat(out: &mut Vec<FileStat>, root: &Path, full: &Path, size: u64, mtime: Option<SystemTime>) {
    let Some(rel) = RelPath::from_native(root, full) else { return };
    let mtime = system_time_to_unix(mtime.unwrap_or(UNIX_EPOCH));
    out.push(FileStat { rpath: RootedPath::new(root.to_path_buf(), rel), size, mtime });
}

/// Re-stat a specific set of rooted paths, used by the scan engine's
/// post-hash stability re-check (spec.md §4.4 step 7). Paths that no
/// longer exist are simply absent from the result.
pub fn stats(rpaths: &[RootedPath]) -> Vec<FileStat> {
    rpaths
        .iter()
        .filter_map(|rp| {
            let full = rp.full_path();
            let meta = fs::metadata(&full).ok()?;
            if !meta.is_file() {
                return None;
            }
            Some(FileStat {
                rpath: rp.clone(),
                size: meta.len(),
                mtime: system_time_to_unix(meta.modified().ok()?),
            })
        })
        .collect()
}

/// `(size, mtime)` for a single path, or `None` if it doesn't exist or
/// isn't a regular file.
pub fn stat(path: &Path) -> Option<(u64, i64)> {
    let meta = fs::metadata(path).ok()?;
    if !meta.is_file() {
        return None;
    }
    Some((meta.len(), system_time_to_unix(meta.modified().ok()?)))
}

/// `mtime_eq` per spec.md §3: FAT-style 2-second granularity, compared
/// everywhere an mtime is compared regardless of host OS.
pub fn mtime_eq(a: i64, b: i64) -> bool {
    (a >> 1) == (b >> 1)
}

/// False when the path does not exist or its `(size, mtime)` don't match.
pub fn stat_eq(path: &Path, size: u64, mtime: i64) -> bool {
    match stat(path) {
        Some((s, m)) => s == size && mtime_eq(m, mtime),
        None => false,
    }
}

/// Streaming digest of `path`, or the empty hash when `algorithm` is
/// [`HashAlgorithm::None`].
pub fn hash(path: &Path, algorithm: HashAlgorithm) -> io::Result<ContentHash> {
    let mut hasher = Hasher::new(algorithm);
    hasher.hash_file(path)?;
    Ok(hasher.finalize())
}

fn ensure_parent(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Atomically create any missing parent directories, then copy `from` to
/// `to`, then (if given) set `to`'s mtime. Fails if `to` already exists.
pub fn copy(from: &Path, to: &Path, mtime: Option<i64>) -> Result<(), FsError> {
    if to.exists() {
        return Err(FsError::DestinationExists(to.to_path_buf()));
    }
    ensure_parent(to)?;

    let temp = sibling_temp_path(to);
    stream_copy(from, &temp)?;
    fs::rename(&temp, to).inspect_err(|_| {
        let _ = fs::remove_file(&temp);
    })?;

    if let Some(mtime) = mtime {
        touch(to, mtime)?;
    }
    Ok(())
}

/// Atomically create any missing parent directories, then move `from` to
/// `to`, then (if given) set `to`'s mtime. Fails if `to` already exists.
pub fn mv(from: &Path, to: &Path, mtime: Option<i64>) -> Result<(), FsError> {
    if to.exists() {
        return Err(FsError::DestinationExists(to.to_path_buf()));
    }
    ensure_parent(to)?;
    fs::rename(from, to)?;
    if let Some(mtime) = mtime {
        touch(to, mtime)?;
    }
    Ok(())
}

/// Set both atime and mtime to `mtime`.
pub fn touch(path: &Path, mtime: i64) -> io::Result<()> {
    let file = File::options().write(true).open(path)?;
    file.set_modified(unix_to_system_time(mtime))
}

/// Best-effort removal of empty ancestor directories, stopping at the
/// first non-empty one.
pub fn remove_empty_parent_dirs(path: &Path) {
    let mut dir = match path.parent() {
        Some(d) => d.to_path_buf(),
        None => return,
    };
    loop {
        match fs::read_dir(&dir) {
            Ok(mut entries) => {
                if entries.next().is_none() {
                    if fs::remove_dir(&dir).is_err() {
                        return;
                    }
                } else {
                    return;
                }
            },
            _ => return,
        }
        dir = match dir.parent() {
            Some(p) => p.to_path_buf(),
            None => return,
        };
    }
}

/// Boundary between internal unicode "/"-paths and OS-native
/// representations. On POSIX with a UTF-8 filesystem this is a pass
/// through; on Windows it prepends the long-path prefix and flips
/// separators.
pub fn encode_path(rel: &RelPath, root: &Path) -> PathBuf {
    rel.to_native(root)
}

pub fn decode_path(root: &Path, full: &Path) -> Option<RelPath> {
    RelPath::from_native(root, full)
}

fn stream_copy(source: &Path, dest: &Path) -> io::Result<()> {
    let source_file = File::open(source)?;
    let dest_file = File::create(dest)?;
    let mut reader = BufReader::with_capacity(COPY_BUFFER_SIZE, source_file);
    let mut writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, dest_file);
    io::copy(&mut reader, &mut writer)?;
    writer.flush()?;
    writer.into_inner()?.sync_all()?;
    Ok(())
}

fn sibling_temp_path(dest: &Path) -> PathBuf {
    let dir = dest.parent().unwrap_or_else(|| Path::new("."));
    let pid = std::process::id();
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = dest.file_name().and_then(|n| n.to_str()).unwrap_or("file");
    dir.join(format!(".{name}.{pid}-{counter}.tmp"))
}

/// Generate a unique temp file path within `temp_dir`.
pub fn generate_temp_path(temp_dir: &Path) -> PathBuf {
    let pid = std::process::id();
    let counter = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    temp_dir.join(format!("{pid}-{counter}.tmp"))
}

/// Crash-safe atomic file writer used by the merge executor's `update`
/// action to land fetched bytes, with optional hash verification.
pub struct AtomicWriter {
    temp_path: PathBuf,
    final_path: PathBuf,
    writer: BufWriter<File>,
    hasher: Option<Hasher>,
    committed: bool,
}

impl AtomicWriter {
    pub fn new(
        temp_path: PathBuf,
        final_path: PathBuf,
        verify_algorithm: Option<HashAlgorithm>,
    ) -> io::Result<Self> {
        let file = File::create(&temp_path)?;
        let writer = BufWriter::with_capacity(COPY_BUFFER_SIZE, file);
        let hasher = verify_algorithm.map(Hasher::new);
        Ok(Self { temp_path, final_path, writer, hasher, committed: false })
    }

    pub fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        self.writer.write_all(buf)?;
        if let Some(hasher) = &mut self.hasher {
            hasher.update(buf);
        }
        Ok(())
    }

    pub fn commit(mut self, expected_hash: Option<&ContentHash>) -> Result<(), FsError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;

        if let (Some(hasher), Some(expected)) = (self.hasher.take(), expected_hash) {
            let computed = hasher.finalize();
            if &computed != expected {
                return Err(FsError::HashMismatch {
                    path: self.final_path.clone(),
                    expected: expected.to_string(),
                    actual: computed.to_string(),
                });
            }
        }

        fs::rename(&self.temp_path, &self.final_path)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for AtomicWriter {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.temp_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn mtime_eq_tolerates_one_second() {
        assert!(mtime_eq(1000, 1001));
        assert!(mtime_eq(1001, 1000));
        assert!(!mtime_eq(1000, 1003));
    }

    #[test]
    fn stat_eq_false_when_missing() {
        let dir = tempdir().unwrap();
        assert!(!stat_eq(&dir.path().join("nope"), 0, 0));
    }

    #[test]
    fn list_stats_finds_nested_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b")).unwrap();
        fs::write(dir.path().join("a/b/f.txt"), b"hi").unwrap();
        fs::write(dir.path().join("top.txt"), b"top").unwrap();

        let filter = NameFilter::new(vec![]);
        let stats = list_stats(dir.path(), None, &filter).unwrap();
        let mut rels: Vec<_> = stats.iter().map(|s| s.rpath.rel.as_str().to_string()).collect();
        rels.sort();
        assert_eq!(rels, vec!["a/b/f.txt".to_string(), "top.txt".to_string()]);
    }

    #[test]
    fn list_stats_skips_ignored_names() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/config"), b"x").unwrap();
        fs::write(dir.path().join("keep.txt"), b"y").unwrap();

        let filter = NameFilter::new(vec![".git".to_string()]);
        let stats = list_stats(dir.path(), None, &filter).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].rpath.rel.as_str(), "keep.txt");
    }

    #[test]
    fn list_stats_respects_root_mark() {
        let dir = tempdir().unwrap();
        let sub = dir.path().join("nested-group");
        fs::create_dir_all(&sub).unwrap();
        fs::write(sub.join(".vsync-root"), b"").unwrap();
        fs::write(sub.join("f.txt"), b"x").unwrap();

        let filter = NameFilter::new(vec![]);
        let stats = list_stats(dir.path(), Some(".vsync-root"), &filter).unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].rpath.root, sub);
        assert_eq!(stats[0].rpath.rel.as_str(), "f.txt");
    }

    #[test]
    fn copy_fails_if_destination_exists() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("a.txt");
        let to = dir.path().join("b.txt");
        fs::write(&from, b"a").unwrap();
        fs::write(&to, b"b").unwrap();
        assert!(matches!(copy(&from, &to, None), Err(FsError::DestinationExists(_))));
    }

    #[test]
    fn copy_creates_parents_and_sets_mtime() {
        let dir = tempdir().unwrap();
        let from = dir.path().join("a.txt");
        fs::write(&from, b"hello").unwrap();
        let to = dir.path().join("nested/dir/b.txt");

        copy(&from, &to, Some(12345)).unwrap();
        assert_eq!(fs::read(&to).unwrap(), b"hello");
        assert!(stat_eq(&to, 5, 12345));
    }

    #[test]
    fn remove_empty_parent_dirs_stops_at_nonempty() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("a/b/c")).unwrap();
        fs::write(dir.path().join("a/sibling.txt"), b"x").unwrap();
        remove_empty_parent_dirs(&dir.path().join("a/b/c/gone.txt"));
        assert!(!dir.path().join("a/b").exists());
        assert!(dir.path().join("a").exists());
    }

    #[test]
    fn atomic_writer_commit_and_verify() {
        let dir = tempdir().unwrap();
        let temp = dir.path().join("t.tmp");
        let final_path = dir.path().join("f.txt");
        let data = b"verify me";
        let expected = crate::hash::hash_bytes(data, HashAlgorithm::default());

        let mut writer = AtomicWriter::new(temp, final_path.clone(), Some(HashAlgorithm::default())).unwrap();
        writer.write(data).unwrap();
        writer.commit(Some(&expected)).unwrap();
        assert_eq!(fs::read(&final_path).unwrap(), data);
    }

    #[test]
    fn atomic_writer_rejects_hash_mismatch() {
        let dir = tempdir().unwrap();
        let temp = dir.path().join("t.tmp");
        let final_path = dir.path().join("f.txt");
        let wrong = crate::hash::hash_bytes(b"other", HashAlgorithm::default());

        let mut writer = AtomicWriter::new(temp, final_path.clone(), Some(HashAlgorithm::default())).unwrap();
        writer.write(b"actual").unwrap();
        assert!(writer.commit(Some(&wrong)).is_err());
        assert!(!final_path.exists());
    }
}
