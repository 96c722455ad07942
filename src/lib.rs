//! A two-tree file synchronizer that compares per-tree version
//! histories — author identity and causal order, not raw bytes or wall
//! clocks — to decide what changed and merge it safely.

pub mod clock;
pub mod config;
pub mod diff;
pub mod filter;
pub mod fsops;
pub mod group;
pub mod hash;
pub mod history;
pub mod merge;
pub mod path;
pub mod plan;
pub mod revisions;
pub mod scan;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, SyncConfig};
pub use diff::{diff_histories, DiffVerdict, HistoryDiff};
pub use filter::{GlobFilter, NameFilter};
pub use fsops::{FileStat, FsError};
pub use group::{peerid_for_root, GroupError, GroupMap};
pub use hash::{hash_bytes, hash_file, ContentHash, HashAlgorithm, Hasher};
pub use history::{
    entries_match, AuthorAction, History, HistoryEntry, HistoryStore, MergeLog, StoreError,
};
pub use merge::{execute_merge, LocalRootFetcher, MergeError, MergeReport, SourceFetcher};
pub use path::{GroupedPath, RelPath, RootedPath};
pub use plan::{plan_merge, ActionDetails, MergeAction, MergeActionType};
pub use revisions::RevisionStore;
pub use scan::{scan, ScanError};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
