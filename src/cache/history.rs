//! Bounded history of past runs

use crate::summary::TestSummary;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of runs kept.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Outcome of one past run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunHistory {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub pattern: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    #[serde(default)]
    pub flags: Vec<String>,
}

impl RunHistory {
    pub fn from_summary(summary: &TestSummary, pattern: &str, flags: Vec<String>) -> Self {
        RunHistory {
            id: summary.started_at.format("%Y%m%d-%H%M%S%.3f").to_string(),
            timestamp: summary.started_at,
            pattern: pattern.to_string(),
            total: summary.total(),
            passed: summary.passed.len(),
            failed: summary.failed.len(),
            skipped: summary.skipped.len(),
            duration_ms: u64::try_from(summary.elapsed.as_millis()).unwrap_or(u64::MAX),
            flags,
        }
    }
}

/// Newest-first ring of runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    #[serde(default)]
    pub runs: Vec<RunHistory>,
    pub max_entries: usize,
}

impl History {
    pub fn new(max_entries: usize) -> Self {
        History {
            runs: Vec::new(),
            max_entries,
        }
    }

    /// Add the newest run, dropping the oldest beyond `max_entries`.
    pub fn push(&mut self, run: RunHistory) {
        self.runs.insert(0, run);
        self.runs.truncate(self.max_entries);
    }
}
