//! On-disk format of the discovery cache and its atomic persistence

use super::history::History;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Version of the file layout written by this crate.
pub const CACHE_VERSION: &str = "1.0";

/// Everything stored in the cache file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheFile {
    pub version: String,
    pub metadata: Metadata,
    #[serde(default)]
    pub discovery: Discovery,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<Performance>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<History>,
}

impl Default for CacheFile {
    fn default() -> Self {
        CacheFile {
            version: CACHE_VERSION.to_string(),
            metadata: Metadata::default(),
            discovery: Discovery::default(),
            performance: None,
            history: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub last_updated: DateTime<Utc>,
    pub schema_version: String,
    pub tool_version: String,
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata {
            last_updated: Utc::now(),
            schema_version: CACHE_VERSION.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Discovery results keyed by test-selection pattern or package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Discovery {
    #[serde(default)]
    pub test_counts: BTreeMap<String, TestCountEntry>,
    #[serde(default)]
    pub test_lists: BTreeMap<String, TestListEntry>,
    #[serde(default)]
    pub package_details: BTreeMap<String, PackageDetail>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCountEntry {
    pub count: usize,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source_mtime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub packages_scanned: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestListEntry {
    pub tests: Vec<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source_mtime: Option<DateTime<Utc>>,
    #[serde(default)]
    pub packages_scanned: usize,
}

/// What the last run learned about one package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageDetail {
    pub test_count: usize,
    pub has_tests: bool,
    #[serde(default)]
    pub test_names: Vec<String>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub total_runs: u64,
    pub average_run_ms: u64,
    #[serde(default)]
    pub slowest_tests: Vec<SlowTest>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowTest {
    pub package: String,
    pub name: String,
    pub duration_ms: u64,
}

/// Whether an entry stamped at `timestamp` against `stored_mtime` may still
/// be served.
///
/// An entry is stale once it is older than `max_age`, when it is stamped in
/// the future, or once the source file has been modified after the entry
/// was written. A source file that does not exist only leaves the age check.
pub fn is_fresh(
    timestamp: DateTime<Utc>,
    stored_mtime: Option<DateTime<Utc>>,
    current_mtime: Option<DateTime<Utc>>,
    max_age: Duration,
    now: DateTime<Utc>,
) -> bool {
    // A timestamp from the future cannot be aged and is never trusted.
    match now.signed_duration_since(timestamp).to_std() {
        Ok(age) if age <= max_age => {}
        _ => return false,
    }

    match (current_mtime, stored_mtime) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(current), Some(stored)) => current <= stored,
    }
}

/// Read the cache file, falling back to an empty cache.
///
/// A missing file is the normal first-run case. An unreadable or corrupt
/// file is logged and replaced on the next write.
pub fn load(path: &Path) -> CacheFile {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no discovery cache yet");
            return CacheFile::default();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "could not read discovery cache; starting fresh");
            return CacheFile::default();
        }
    };

    match serde_json::from_str::<CacheFile>(&content) {
        Ok(file) if file.version == CACHE_VERSION => file,
        Ok(file) => {
            warn!(path = %path.display(), version = %file.version,
                "discovery cache has an unknown version; starting fresh");
            CacheFile::default()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "discovery cache is corrupt; starting fresh");
            CacheFile::default()
        }
    }
}

/// Write the whole cache through a temporary file in the same directory
/// and rename it over the target, so readers never see a partial file.
pub fn save(path: &Path, file: &CacheFile) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let content = serde_json::to_string_pretty(file)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(content.as_bytes())?;
    temp.write_all(b"\n")?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
