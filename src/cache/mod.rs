//! Persistent discovery cache
//!
//! Stores, per test-selection pattern, how many tests (and which) the last
//! run found, so that the next invocation can size its progress display
//! before the run completes. Entries expire by age and whenever the project's
//! source file (`go.mod` by default) changes. The same file keeps a bounded
//! history of past runs.

pub mod file;
pub mod history;

pub use file::{CacheFile, PackageDetail, Performance, SlowTest, TestCountEntry, TestListEntry};
pub use history::{History, RunHistory, DEFAULT_MAX_ENTRIES};

use crate::config::CacheConfig;
use crate::error::{Error, Result};
use crate::summary::TestSummary;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};
use std::time::Duration;
use tracing::debug;

/// Number of slow tests remembered in the performance section.
const SLOWEST_TESTS_KEPT: usize = 10;

/// Pattern used when no packages are given.
pub const DEFAULT_PATTERN: &str = "./...";

/// Stable cache key for a set of package patterns.
///
/// Order and duplicates do not matter, so `a b` and `b a a` share an entry.
pub fn pattern_key<S: AsRef<str>>(packages: &[S]) -> String {
    let mut parts: Vec<&str> = packages
        .iter()
        .map(|p| p.as_ref().trim())
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return DEFAULT_PATTERN.to_string();
    }
    parts.sort_unstable();
    parts.dedup();
    parts.join(" ")
}

/// The discovery cache bound to one file on disk.
///
/// Reads share a lock; every mutation holds the write lock while it
/// rewrites the whole file.
#[derive(Debug)]
pub struct DiscoveryCache {
    path: PathBuf,
    source_path: Option<PathBuf>,
    max_age: Duration,
    history_max_entries: usize,
    state: RwLock<CacheFile>,
}

impl DiscoveryCache {
    /// Open the cache described by `config`.
    ///
    /// Fails with [`Error::CacheDisabled`] when caching is switched off so
    /// that callers bypass it explicitly. A missing or corrupt file yields
    /// an empty cache.
    pub fn open(config: &CacheConfig) -> Result<Self> {
        if !config.enabled {
            return Err(Error::CacheDisabled);
        }
        let path = config.path();
        let state = file::load(&path);
        debug!(path = %path.display(), "opened discovery cache");
        Ok(DiscoveryCache {
            path,
            source_path: Some(config.source_file.clone()).filter(|p| !p.as_os_str().is_empty()),
            max_age: config.max_age,
            history_max_entries: config.history_max_entries,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheFile> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `change` to a copy, persist it and only then publish it.
    ///
    /// When the save fails the in-memory state is left untouched.
    fn mutate<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut CacheFile),
    {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut next = state.clone();
        change(&mut next);
        next.metadata.last_updated = Utc::now();
        file::save(&self.path, &next)?;
        *state = next;
        Ok(())
    }

    fn source_mtime(&self) -> Option<DateTime<Utc>> {
        let path = self.source_path.as_ref()?;
        let modified = fs::metadata(path).and_then(|m| m.modified()).ok()?;
        Some(DateTime::<Utc>::from(modified))
    }

    fn is_fresh(&self, timestamp: DateTime<Utc>, stored_mtime: Option<DateTime<Utc>>) -> bool {
        file::is_fresh(
            timestamp,
            stored_mtime,
            self.source_mtime(),
            self.max_age,
            Utc::now(),
        )
    }

    /// Cached test count for `pattern`, if present and still valid.
    pub fn get_count(&self, pattern: &str) -> Option<usize> {
        let state = self.read();
        let entry = state.discovery.test_counts.get(pattern)?;
        if !self.is_fresh(entry.timestamp, entry.source_mtime) {
            debug!(pattern, "cached test count is stale");
            return None;
        }
        Some(entry.count)
    }

    /// Cached test list for `pattern`, if present and still valid.
    pub fn get_list(&self, pattern: &str) -> Option<Vec<String>> {
        let state = self.read();
        let entry = state.discovery.test_lists.get(pattern)?;
        if !self.is_fresh(entry.timestamp, entry.source_mtime) {
            debug!(pattern, "cached test list is stale");
            return None;
        }
        Some(entry.tests.clone())
    }

    pub fn update_count(&self, pattern: &str, count: usize, packages_scanned: usize) -> Result<()> {
        let entry = TestCountEntry {
            count,
            timestamp: Utc::now(),
            source_mtime: self.source_mtime(),
            packages_scanned,
        };
        self.mutate(|state| {
            state
                .discovery
                .test_counts
                .insert(pattern.to_string(), entry);
        })
    }

    pub fn update_list(
        &self,
        pattern: &str,
        tests: Vec<String>,
        packages_scanned: usize,
    ) -> Result<()> {
        let entry = TestListEntry {
            tests,
            timestamp: Utc::now(),
            source_mtime: self.source_mtime(),
            packages_scanned,
        };
        self.mutate(|state| {
            state
                .discovery
                .test_lists
                .insert(pattern.to_string(), entry);
        })
    }

    /// Record a run as the newest history entry.
    pub fn add_run_history(&self, run: RunHistory) -> Result<()> {
        let max_entries = self.history_max_entries;
        self.mutate(|state| {
            let history = state
                .history
                .get_or_insert_with(|| History::new(max_entries));
            history.max_entries = max_entries;
            history.push(run);
        })
    }

    /// Stored runs, newest first.
    pub fn history(&self) -> Vec<RunHistory> {
        self.read()
            .history
            .as_ref()
            .map(|h| h.runs.clone())
            .unwrap_or_default()
    }

    /// Remember per-package test names and counts from a finished run.
    pub fn update_package_details(&self, summary: &TestSummary) -> Result<()> {
        let now = Utc::now();
        self.mutate(|state| {
            for outcome in &summary.packages {
                let test_names: Vec<String> = summary
                    .entries()
                    .filter(|e| e.package == outcome.package)
                    .map(|e| e.name.clone())
                    .collect();
                state.discovery.package_details.insert(
                    outcome.package.clone(),
                    PackageDetail {
                        test_count: outcome.test_count,
                        has_tests: !outcome.no_test_files && outcome.test_count > 0,
                        test_names,
                        last_seen: now,
                    },
                );
            }
        })
    }

    /// Fold a finished run into the running performance figures.
    pub fn record_performance(&self, summary: &TestSummary) -> Result<()> {
        let run_ms = u64::try_from(summary.elapsed.as_millis()).unwrap_or(u64::MAX);
        let slowest: Vec<SlowTest> = summary
            .slowest(SLOWEST_TESTS_KEPT)
            .into_iter()
            .map(|e| SlowTest {
                package: e.package.clone(),
                name: e.name.clone(),
                duration_ms: u64::try_from(e.duration.as_millis()).unwrap_or(u64::MAX),
            })
            .collect();

        self.mutate(|state| {
            let perf = state.performance.get_or_insert_with(Performance::default);
            let previous_total = perf.average_run_ms.saturating_mul(perf.total_runs);
            perf.total_runs += 1;
            perf.average_run_ms = previous_total.saturating_add(run_ms) / perf.total_runs;
            perf.slowest_tests = slowest;
        })
    }

    /// Reset to an empty cache and persist it.
    pub fn clear(&self) -> Result<()> {
        self.mutate(|state| *state = CacheFile::default())
    }

    /// Copy of everything currently held.
    pub fn contents(&self) -> CacheFile {
        self.read().clone()
    }
}
