//! Terminal results of a test run and their plain-text renderings

use crate::aggregator::{SubtestCounts, TestStatus};
use crate::comment::marker;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::OnceLock;
use std::time::Duration;

/// A top-level test in the final summary.
#[derive(Debug, Clone, PartialEq)]
pub struct TestEntry {
    pub package: String,
    pub name: String,
    pub status: TestStatus,
    pub duration: Duration,
    /// Breakdown of immediate subtests, present only for parents.
    pub subtests: Option<SubtestCounts>,
    pub failed_subtests: Vec<String>,
    /// Output of the test and its failed subtests; empty unless it failed.
    pub output: Vec<String>,
    pub skip_reason: Option<String>,
}

impl TestEntry {
    /// "[2/3 passed]" style annotation for parents.
    pub fn subtest_label(&self) -> Option<String> {
        self.subtests
            .filter(|c| c.total() > 0)
            .map(|c| format!("[{}/{} passed]", c.passed, c.total()))
    }
}

/// Final state of one package.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageOutcome {
    pub package: String,
    pub status: TestStatus,
    pub elapsed: Option<Duration>,
    pub coverage: Option<String>,
    pub no_test_files: bool,
    pub test_count: usize,
}

/// A package that failed without any test failing, usually a build or
/// TestMain failure.
#[derive(Debug, Clone, PartialEq)]
pub struct PackageFailure {
    pub package: String,
    pub output: Vec<String>,
}

/// Per-package tally derived from the summary entries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackageSummary {
    pub package: String,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration: Duration,
}

/// Terminal aggregate of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct TestSummary {
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub passed: Vec<TestEntry>,
    pub failed: Vec<TestEntry>,
    pub skipped: Vec<TestEntry>,
    /// Tests that never reported a result before the stream ended.
    pub incomplete: Vec<TestEntry>,
    pub failed_packages: Vec<PackageFailure>,
    pub packages: Vec<PackageOutcome>,
}

impl Default for TestSummary {
    fn default() -> Self {
        TestSummary {
            started_at: Utc::now(),
            elapsed: Duration::ZERO,
            passed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            incomplete: Vec::new(),
            failed_packages: Vec::new(),
            packages: Vec::new(),
        }
    }
}

impl TestSummary {
    /// Distinct top-level tests seen in the run.
    pub fn total(&self) -> usize {
        self.passed.len() + self.failed.len() + self.skipped.len() + self.incomplete.len()
    }

    /// True when any test or package failed.
    pub fn has_failures(&self) -> bool {
        !self.failed.is_empty() || !self.failed_packages.is_empty()
    }

    /// All entries, in passed, failed, skipped, incomplete order.
    pub fn entries(&self) -> impl Iterator<Item = &TestEntry> {
        self.passed
            .iter()
            .chain(&self.failed)
            .chain(&self.skipped)
            .chain(&self.incomplete)
    }

    /// The `n` slowest tests, slowest first.
    pub fn slowest(&self, n: usize) -> Vec<&TestEntry> {
        let mut entries: Vec<&TestEntry> = self.entries().collect();
        entries.sort_by(|a, b| b.duration.cmp(&a.duration).then_with(|| a.name.cmp(&b.name)));
        entries.truncate(n);
        entries
    }

    /// Pass/fail/skip counts per package, in the order packages were seen.
    pub fn package_summaries(&self) -> Vec<PackageSummary> {
        let mut order: Vec<&str> = self.packages.iter().map(|p| p.package.as_str()).collect();
        let mut by_name: HashMap<&str, PackageSummary> = HashMap::new();

        for entry in self.entries() {
            let summary = by_name.entry(entry.package.as_str()).or_insert_with(|| {
                PackageSummary {
                    package: entry.package.clone(),
                    ..PackageSummary::default()
                }
            });
            match entry.status {
                TestStatus::Passed => summary.passed += 1,
                TestStatus::Failed => summary.failed += 1,
                TestStatus::Skipped => summary.skipped += 1,
                TestStatus::Running => {}
            }
            summary.duration += entry.duration;
            if !order.contains(&entry.package.as_str()) {
                order.push(entry.package.as_str());
            }
        }

        order
            .into_iter()
            .filter_map(|name| by_name.remove(name))
            .collect()
    }
}

/// Seconds with two decimals, as shown in summaries.
pub fn format_duration(duration: Duration) -> String {
    format!("{:.2}s", duration.as_secs_f64())
}

/// Render the body of the tracked review comment.
///
/// The body starts with the marker for `uuid` so that later runs can find
/// and update it.
pub fn render_comment_body(summary: &TestSummary, uuid: &str, platform: &str) -> String {
    format!("{}\n{}", marker(uuid), render_results(summary, platform))
}

/// Plain-text results for `platform`, without any comment marker.
pub fn render_results(summary: &TestSummary, platform: &str) -> String {
    let mut body = String::new();
    let status = if summary.has_failures() {
        "failed"
    } else {
        "passed"
    };
    let _ = writeln!(body, "## Test Results ({}): {}", platform, status);
    body.push('\n');
    let _ = writeln!(
        body,
        "Passed: {} | Failed: {} | Skipped: {} | Total: {} | Time: {}",
        summary.passed.len(),
        summary.failed.len(),
        summary.skipped.len(),
        summary.total(),
        format_duration(summary.elapsed),
    );

    if !summary.failed_packages.is_empty() {
        body.push_str("\n### Failed packages\n\n");
        for failure in &summary.failed_packages {
            let _ = writeln!(body, "- `{}`", failure.package);
        }
    }

    if !summary.failed.is_empty() {
        body.push_str("\n### Failed tests\n\n");
        for entry in &summary.failed {
            let _ = write!(
                body,
                "- `{}` {} ({})",
                entry.package,
                entry.name,
                format_duration(entry.duration)
            );
            if let Some(label) = entry.subtest_label() {
                let _ = write!(body, " {}", label);
            }
            body.push('\n');
            for sub in &entry.failed_subtests {
                let _ = writeln!(body, "  - {}", sub);
            }
        }
    }

    if !summary.skipped.is_empty() {
        body.push_str("\n### Skipped tests\n\n");
        for entry in &summary.skipped {
            match &entry.skip_reason {
                Some(reason) => {
                    let _ = writeln!(body, "- `{}` {}: {}", entry.package, entry.name, reason);
                }
                None => {
                    let _ = writeln!(body, "- `{}` {}", entry.package, entry.name);
                }
            }
        }
    }

    if !summary.incomplete.is_empty() {
        body.push_str("\n### Did not finish\n\n");
        for entry in &summary.incomplete {
            let _ = writeln!(body, "- `{}` {}", entry.package, entry.name);
        }
    }

    body
}

fn build_failed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^FAIL\s+(\S+)\s+\[build failed\]").expect("valid regex"))
}

fn panic_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)panic:\s*(.*)$").expect("valid regex"))
}

/// Explain why the test process exited non-zero although no test failed.
///
/// Returns `None` when the exit was clean or failures already explain it.
pub fn diagnose_exit(stderr: &str, exit_code: i32, failed_tests: usize) -> Option<String> {
    if exit_code == 0 || failed_tests > 0 {
        return None;
    }

    let message = if stderr.contains("[setup failed]") {
        if stderr.contains("TestMain") {
            format!(
                "TestMain failed with exit code {} (ensure it calls os.Exit(m.Run()))",
                exit_code
            )
        } else {
            format!(
                "Test setup failed with exit code {} (possible TestMain or init() issue)",
                exit_code
            )
        }
    } else if let Some(caps) = panic_regex().captures(stderr) {
        format!(
            "Test process panicked: {} (exit code {})",
            caps[1].trim(),
            exit_code
        )
    } else if stderr.contains("[build failed]") {
        match build_failed_regex().captures(stderr) {
            Some(caps) => format!(
                "Build failed for package {} (exit code {})",
                &caps[1], exit_code
            ),
            None => format!("Build failed with exit code {}", exit_code),
        }
    } else if ["undefined:", "cannot find", "declared and not used"]
        .iter()
        .any(|needle| stderr.contains(needle))
    {
        format!(
            "Compilation error with exit code {} (check for undefined symbols or missing dependencies)",
            exit_code
        )
    } else if stderr.contains("log.Fatal") || stderr.contains("logger.Fatal") {
        format!("Test called log.Fatal (exit code {})", exit_code)
    } else if stderr.contains("os.Exit") {
        format!("Test called os.Exit({}) directly", exit_code)
    } else {
        format!(
            "Test process failed with exit code {} but no test failed",
            exit_code
        )
    };
    Some(message)
}
