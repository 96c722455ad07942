//! Deciding whether a relative path is ignored.
//!
//! Two layers, matching spec.md §4.4 steps 2 and 5: a fast, directory-level
//! name filter applied while walking (so ignored subtrees are never
//! descended into), and a slower glob filter applied to the diffs that
//! survive the walk, with its decisions memoized — the same shape as the
//! original's `PathFilter.ignore_path`, which caches into `paths_to_ignore`.

use std::collections::HashSet;
use std::sync::Mutex;

use crate::path::RelPath;

/// Directory-level filename filter: entries whose filename is in this set
/// are skipped without descending into them.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    ignore_names: HashSet<String>,
}

impl NameFilter {
    pub fn new(ignore_names: impl IntoIterator<Item = String>) -> Self {
        Self { ignore_names: ignore_names.into_iter().collect() }
    }

    pub fn ignores_name(&self, name: &str) -> bool {
        self.ignore_names.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.ignore_names.iter().map(String::as_str)
    }
}

/// Shell-style, case-insensitive glob filter over relative paths, applied
/// after the cheap name filter. Decisions are memoized per path since the
/// same path is often re-checked across scan/diff/merge phases.
pub struct GlobFilter {
    overrides: Option<ignore::overrides::Override>,
    decided: Mutex<HashSet<String>>,
    ignored: Mutex<HashSet<String>>,
}

impl GlobFilter {
    pub fn new(root: &std::path::Path, globs: &[String]) -> anyhow::Result<Self> {
        if globs.is_empty() {
            return Ok(Self { overrides: None, decided: Mutex::new(HashSet::new()), ignored: Mutex::new(HashSet::new()) });
        }
        let mut builder = ignore::overrides::OverrideBuilder::new(root);
        builder.case_insensitive(true)?;
        for glob in globs {
            // `ignore`'s override syntax treats a bare pattern as "keep";
            // prefixing with "!" means "ignore this".
            builder.add(&format!("!{glob}"))?;
        }
        let overrides = builder.build()?;
        Ok(Self { overrides: Some(overrides), decided: Mutex::new(HashSet::new()), ignored: Mutex::new(HashSet::new()) })
    }

    /// True if `rel` should be dropped from the diff stream.
    pub fn ignore_path(&self, rel: &RelPath) -> bool {
        let Some(overrides) = &self.overrides else { return false };
        let key = rel.as_str();

        {
            let decided = self.decided.lock().unwrap();
            if decided.contains(key) {
                return self.ignored.lock().unwrap().contains(key);
            }
        }

        let is_ignored = overrides.matched(key, false).is_ignore();
        self.decided.lock().unwrap().insert(key.to_string());
        if is_ignored {
            self.ignored.lock().unwrap().insert(key.to_string());
        }
        is_ignored
    }
}
