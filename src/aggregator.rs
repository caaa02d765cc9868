//! Live aggregation of test events into a package → test → subtest tree
//!
//! The aggregator is a single consumer of one serialized event stream. Events
//! for different packages interleave arbitrarily because the test driver runs
//! packages concurrently, so every piece of state is keyed by the full
//! (package, test name) identity rather than by a "current test" cursor.
//!
//! Nodes live in one flat map. A child records its parent's key (lookup only)
//! and a parent lists its children's keys in first-seen order; no node owns
//! another.

use crate::error::{Error, Result};
use crate::event::{Action, TestEvent};
use crate::summary::{PackageFailure, PackageOutcome, TestEntry, TestSummary};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default number of output lines retained per test or package.
pub const DEFAULT_MAX_OUTPUT_LINES: usize = 500;

/// Fraction of the estimate after which the actual count takes over.
const ESTIMATE_COMPLETION_THRESHOLD: f64 = 0.9;

/// Identity of a test: the package plus the full `/`-separated name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TestKey {
    pub package: String,
    pub name: String,
}

impl TestKey {
    pub fn new(package: impl Into<String>, name: impl Into<String>) -> Self {
        TestKey {
            package: package.into(),
            name: name.into(),
        }
    }

    /// Key of the enclosing test, obtained by stripping the last path segment.
    pub fn parent(&self) -> Option<TestKey> {
        self.name
            .rsplit_once('/')
            .map(|(parent, _)| TestKey::new(self.package.clone(), parent))
    }

    /// Returns true for tests that are not subtests.
    pub fn is_top_level(&self) -> bool {
        !self.name.contains('/')
    }
}

impl fmt::Display for TestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.package, self.name)
    }
}

/// State of a test or package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TestStatus {
    Running,
    Passed,
    Failed,
    Skipped,
}

impl TestStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TestStatus::Running)
    }

    fn from_action(action: Action) -> Option<TestStatus> {
        match action {
            Action::Pass => Some(TestStatus::Passed),
            Action::Fail => Some(TestStatus::Failed),
            Action::Skip => Some(TestStatus::Skipped),
            Action::Run | Action::Output => None,
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Running => write!(f, "running"),
            TestStatus::Passed => write!(f, "pass"),
            TestStatus::Failed => write!(f, "fail"),
            TestStatus::Skipped => write!(f, "skip"),
        }
    }
}

/// One test or subtest.
#[derive(Debug, Clone)]
pub struct TestNode {
    key: TestKey,
    status: TestStatus,
    duration: Option<Duration>,
    parent: Option<TestKey>,
    children: Vec<TestKey>,
    output: VecDeque<String>,
    dropped_output: usize,
    skip_reason: Option<String>,
    placeholder: bool,
}

impl TestNode {
    fn new(key: TestKey, placeholder: bool) -> Self {
        let parent = key.parent();
        TestNode {
            key,
            status: TestStatus::Running,
            duration: None,
            parent,
            children: Vec::new(),
            output: VecDeque::new(),
            dropped_output: 0,
            skip_reason: None,
            placeholder,
        }
    }

    pub fn key(&self) -> &TestKey {
        &self.key
    }

    pub fn status(&self) -> TestStatus {
        self.status
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn parent(&self) -> Option<&TestKey> {
        self.parent.as_ref()
    }

    /// Subtests in first-seen order.
    pub fn children(&self) -> &[TestKey] {
        &self.children
    }

    /// Output retained for this test; empty once it passed.
    pub fn output(&self) -> impl Iterator<Item = &str> {
        self.output.iter().map(String::as_str)
    }

    pub fn skip_reason(&self) -> Option<&str> {
        self.skip_reason.as_deref()
    }

    /// True while the node exists only because a subtest referenced it.
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    fn push_output(&mut self, line: String, limit: usize) {
        if limit == 0 {
            self.dropped_output += 1;
            return;
        }
        if self.output.len() == limit {
            self.output.pop_front();
            self.dropped_output += 1;
        }
        self.output.push_back(line);
    }
}

/// Immediate-children breakdown of a parent test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubtestCounts {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub running: usize,
}

impl SubtestCounts {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped + self.running
    }

    fn record(&mut self, status: TestStatus) {
        match status {
            TestStatus::Running => self.running += 1,
            TestStatus::Passed => self.passed += 1,
            TestStatus::Failed => self.failed += 1,
            TestStatus::Skipped => self.skipped += 1,
        }
    }

    fn forget(&mut self, status: TestStatus) {
        let slot = match status {
            TestStatus::Running => &mut self.running,
            TestStatus::Passed => &mut self.passed,
            TestStatus::Failed => &mut self.failed,
            TestStatus::Skipped => &mut self.skipped,
        };
        *slot = slot.saturating_sub(1);
    }
}

/// A data-consistency problem observed in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyWarning {
    pub key: TestKey,
    pub message: String,
}

/// Point-in-time readout of the run, safe to hand to another thread.
///
/// Counts cover top-level tests only; `failing` lists every failed node,
/// subtests included.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSnapshot {
    pub timestamp: DateTime<Utc>,
    pub elapsed: Duration,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub running: usize,
    /// Estimate still in effect for the progress denominator.
    pub estimated_total: Option<usize>,
    pub failing: Vec<TestKey>,
}

impl RunSnapshot {
    pub fn completed(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    /// Denominator for a progress display.
    pub fn progress_total(&self) -> usize {
        self.estimated_total.unwrap_or(self.total).max(self.total)
    }
}

#[derive(Debug, Clone)]
struct PackageState {
    status: TestStatus,
    elapsed: Option<Duration>,
    no_test_files: bool,
    coverage: Option<String>,
    top_level_tests: usize,
    output: VecDeque<String>,
}

impl PackageState {
    fn new() -> Self {
        PackageState {
            status: TestStatus::Running,
            elapsed: None,
            no_test_files: false,
            coverage: None,
            top_level_tests: 0,
            output: VecDeque::new(),
        }
    }
}

fn coverage_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"coverage:\s+(\d+(?:\.\d+)?%)").expect("valid regex"))
}

fn file_line_prefix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\S+\.go:\d+:\s*").expect("valid regex"))
}

/// Pull the human reason out of the output of a skipped test.
///
/// The driver frames test output with `=== RUN` / `--- SKIP` lines; the
/// reason is the last line that is not framing, minus its `file.go:N:` prefix.
pub fn extract_skip_reason<'a>(lines: impl DoubleEndedIterator<Item = &'a str>) -> Option<String> {
    for line in lines.rev() {
        let trimmed = line.trim();
        if trimmed.is_empty()
            || trimmed.starts_with("=== ")
            || trimmed.starts_with("--- ")
            || trimmed == "PASS"
            || trimmed == "FAIL"
        {
            continue;
        }
        let reason = file_line_prefix_regex().replace(trimmed, "");
        let reason = reason
            .trim_start_matches("SKIP:")
            .trim_start_matches("skipping:")
            .trim();
        if !reason.is_empty() {
            return Some(reason.to_string());
        }
    }
    None
}

/// Consumes test events and maintains the hierarchical run state.
pub struct EventAggregator {
    nodes: HashMap<TestKey, TestNode>,
    order: Vec<TestKey>,
    packages: HashMap<String, PackageState>,
    package_order: Vec<String>,
    tally: SubtestCounts,
    warnings: Vec<ConsistencyWarning>,
    estimate: Option<usize>,
    started_at: DateTime<Utc>,
    started: Instant,
    max_output_lines: usize,
    finalized: bool,
}

impl Default for EventAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl EventAggregator {
    pub fn new() -> Self {
        EventAggregator {
            nodes: HashMap::new(),
            order: Vec::new(),
            packages: HashMap::new(),
            package_order: Vec::new(),
            tally: SubtestCounts::default(),
            warnings: Vec::new(),
            estimate: None,
            started_at: Utc::now(),
            started: Instant::now(),
            max_output_lines: DEFAULT_MAX_OUTPUT_LINES,
            finalized: false,
        }
    }

    /// Use a cached estimate of the number of top-level tests as the
    /// progress denominator until the actual count proves it wrong.
    pub fn with_estimate(mut self, estimate: Option<usize>) -> Self {
        self.estimate = estimate.filter(|n| *n > 0);
        self
    }

    /// Bound the number of output lines kept per test and per package.
    pub fn with_max_output_lines(mut self, limit: usize) -> Self {
        self.max_output_lines = limit;
        self
    }

    /// Apply one event.
    ///
    /// Fails only once [`finalize`](Self::finalize) has been called; stream
    /// inconsistencies are logged and recorded as warnings instead.
    pub fn ingest(&mut self, event: TestEvent) -> Result<()> {
        if self.finalized {
            return Err(Error::AggregatorFinalized);
        }

        self.ensure_package(&event.package);

        if event.is_package_event() {
            self.ingest_package_event(event);
            return Ok(());
        }

        let elapsed = event.elapsed_duration();
        let key = TestKey::new(event.package, event.test);
        match event.action {
            Action::Run => self.start_test(key),
            Action::Output => {
                if let Some(text) = event.output {
                    self.record_output(&key, text);
                }
            }
            action => {
                if let Some(status) = TestStatus::from_action(action) {
                    self.finish_test(key, status, elapsed);
                }
            }
        }
        Ok(())
    }

    /// Current aggregate state. Does not mutate the aggregator.
    pub fn snapshot(&self) -> RunSnapshot {
        let failing: Vec<TestKey> = self
            .order
            .iter()
            .filter(|key| {
                self.nodes
                    .get(*key)
                    .is_some_and(|n| n.status == TestStatus::Failed)
            })
            .cloned()
            .collect();

        RunSnapshot {
            timestamp: Utc::now(),
            elapsed: self.started.elapsed(),
            total: self.tally.total(),
            passed: self.tally.passed,
            failed: self.tally.failed,
            skipped: self.tally.skipped,
            running: self.tally.running,
            estimated_total: self.estimate,
            failing,
        }
    }

    /// Look up a node by identity.
    pub fn node(&self, key: &TestKey) -> Option<&TestNode> {
        self.nodes.get(key)
    }

    /// Number of distinct tests seen, subtests included.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Breakdown of a parent's immediate children, computed on demand.
    pub fn subtest_counts(&self, key: &TestKey) -> Option<SubtestCounts> {
        let node = self.nodes.get(key)?;
        let mut counts = SubtestCounts::default();
        for child in &node.children {
            if let Some(child) = self.nodes.get(child) {
                counts.record(child.status);
            }
        }
        Some(counts)
    }

    /// Consistency problems seen so far.
    pub fn warnings(&self) -> &[ConsistencyWarning] {
        &self.warnings
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Close the run and build the summary. May be called once.
    ///
    /// Packages that never reported a result are marked failed: a package
    /// whose process died mid-run produces no terminal event.
    pub fn finalize(&mut self) -> Result<TestSummary> {
        if self.finalized {
            return Err(Error::AggregatorFinalized);
        }
        self.finalized = true;

        for name in &self.package_order {
            if let Some(pkg) = self.packages.get_mut(name) {
                if pkg.status == TestStatus::Running {
                    warn!(package = %name, "package never reported a result; marking it failed");
                    pkg.status = TestStatus::Failed;
                }
            }
        }

        let mut summary = TestSummary {
            started_at: self.started_at,
            elapsed: self.started.elapsed(),
            ..TestSummary::default()
        };

        for key in self.order.iter().filter(|k| k.is_top_level()) {
            let Some(node) = self.nodes.get(key) else {
                continue;
            };
            let subtests = (!node.children.is_empty())
                .then(|| self.subtest_counts(key))
                .flatten();
            let failed_subtests = node
                .children
                .iter()
                .filter(|child| {
                    self.nodes
                        .get(*child)
                        .is_some_and(|c| c.status == TestStatus::Failed)
                })
                .map(|child| child.name.clone())
                .collect();
            let entry = TestEntry {
                package: key.package.clone(),
                name: key.name.clone(),
                status: node.status,
                duration: node.duration.unwrap_or_default(),
                subtests,
                failed_subtests,
                output: if node.status == TestStatus::Failed {
                    self.failure_output(key)
                } else {
                    Vec::new()
                },
                skip_reason: node.skip_reason.clone(),
            };
            match node.status {
                TestStatus::Passed => summary.passed.push(entry),
                TestStatus::Failed => summary.failed.push(entry),
                TestStatus::Skipped => summary.skipped.push(entry),
                TestStatus::Running => summary.incomplete.push(entry),
            }
        }

        for name in &self.package_order {
            let Some(pkg) = self.packages.get(name) else {
                continue;
            };
            if pkg.status == TestStatus::Failed && pkg.top_level_tests == 0 {
                summary.failed_packages.push(PackageFailure {
                    package: name.clone(),
                    output: pkg.output.iter().cloned().collect(),
                });
            }
            summary.packages.push(PackageOutcome {
                package: name.clone(),
                status: pkg.status,
                elapsed: pkg.elapsed,
                coverage: pkg.coverage.clone(),
                no_test_files: pkg.no_test_files,
                test_count: pkg.top_level_tests,
            });
        }

        Ok(summary)
    }

    /// Output of a failed test followed by the output of its failed
    /// descendants, so the failure reason is visible at the top level.
    fn failure_output(&self, key: &TestKey) -> Vec<String> {
        let mut lines = Vec::new();
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            if node.status != TestStatus::Failed {
                continue;
            }
            lines.extend(node.output.iter().cloned());
            stack.extend(node.children.iter().rev());
        }
        lines
    }

    fn ensure_package(&mut self, package: &str) {
        if !self.packages.contains_key(package) {
            self.packages
                .insert(package.to_string(), PackageState::new());
            self.package_order.push(package.to_string());
        }
    }

    fn ingest_package_event(&mut self, event: TestEvent) {
        let limit = self.max_output_lines;
        let Some(pkg) = self.packages.get_mut(&event.package) else {
            return;
        };
        match event.action {
            Action::Output => {
                let Some(text) = event.output else {
                    return;
                };
                if text.contains("[no test files]") {
                    pkg.no_test_files = true;
                }
                if text.contains("coverage: [no statements]") {
                    pkg.coverage = Some("0.0%".to_string());
                } else if let Some(caps) = coverage_regex().captures(&text) {
                    pkg.coverage = Some(caps[1].to_string());
                }
                if pkg.status != TestStatus::Passed && limit > 0 {
                    if pkg.output.len() == limit {
                        pkg.output.pop_front();
                    }
                    pkg.output.push_back(text);
                }
            }
            Action::Run => {}
            action => {
                if let Some(status) = TestStatus::from_action(action) {
                    if pkg.status.is_terminal() && pkg.status != status {
                        warn!(package = %event.package, from = %pkg.status, to = %status,
                            "package reported a second result");
                    }
                    pkg.status = status;
                    pkg.elapsed = event.elapsed_duration();
                    if status == TestStatus::Passed {
                        pkg.output.clear();
                    }
                }
            }
        }
    }

    /// Create a node (and any missing ancestors) in the running state.
    fn ensure_node(&mut self, key: &TestKey, placeholder: bool) {
        if self.nodes.contains_key(key) {
            return;
        }
        if let Some(parent) = key.parent() {
            if !self.nodes.contains_key(&parent) {
                debug!(test = %key, parent = %parent, "subtest seen before its parent; adding placeholder");
                self.ensure_node(&parent, true);
            }
            if let Some(parent) = self.nodes.get_mut(&parent) {
                parent.children.push(key.clone());
            }
        }
        if key.is_top_level() {
            self.tally.record(TestStatus::Running);
            if let Some(pkg) = self.packages.get_mut(&key.package) {
                pkg.top_level_tests += 1;
            }
        }
        self.nodes
            .insert(key.clone(), TestNode::new(key.clone(), placeholder));
        self.order.push(key.clone());
    }

    fn set_status(&mut self, key: &TestKey, status: TestStatus) -> Option<TestStatus> {
        let node = self.nodes.get_mut(key)?;
        let previous = node.status;
        node.status = status;
        if key.is_top_level() {
            self.tally.forget(previous);
            self.tally.record(status);
        }
        Some(previous)
    }

    fn warn_consistency(&mut self, key: &TestKey, message: String) {
        warn!(test = %key, "{}", message);
        self.warnings.push(ConsistencyWarning {
            key: key.clone(),
            message,
        });
    }

    fn start_test(&mut self, key: TestKey) {
        let Some(node) = self.nodes.get_mut(&key) else {
            self.ensure_node(&key, false);
            return;
        };

        if node.placeholder && node.status == TestStatus::Running {
            node.placeholder = false;
            return;
        }
        if !node.status.is_terminal() {
            debug!(test = %key, "duplicate run event ignored");
            return;
        }

        let previous = node.status;
        node.output.clear();
        node.dropped_output = 0;
        node.duration = None;
        node.skip_reason = None;
        node.placeholder = false;
        self.set_status(&key, TestStatus::Running);
        self.warn_consistency(
            &key,
            format!("test started again after finishing with status {}", previous),
        );
    }

    fn finish_test(&mut self, key: TestKey, status: TestStatus, elapsed: Option<Duration>) {
        if !self.nodes.contains_key(&key) {
            debug!(test = %key, "result for a test that never started");
            self.ensure_node(&key, true);
        }

        let previous = self.set_status(&key, status);
        if let Some(previous) = previous.filter(|p| p.is_terminal()) {
            self.warn_consistency(
                &key,
                format!("second result {} after {}; keeping the later one", status, previous),
            );
        }

        if let Some(node) = self.nodes.get_mut(&key) {
            node.placeholder = false;
            node.duration = elapsed.or(node.duration);
            match status {
                TestStatus::Passed => node.output.clear(),
                TestStatus::Skipped => {
                    node.skip_reason = extract_skip_reason(node.output.iter().map(String::as_str));
                    node.output.clear();
                }
                TestStatus::Failed | TestStatus::Running => {}
            }
        }

        self.update_estimate();
    }

    fn record_output(&mut self, key: &TestKey, text: String) {
        let limit = self.max_output_lines;
        let Some(node) = self.nodes.get_mut(key) else {
            debug!(test = %key, "output for unknown test dropped");
            return;
        };
        match node.status {
            TestStatus::Running | TestStatus::Failed => node.push_output(text, limit),
            TestStatus::Passed | TestStatus::Skipped => {}
        }
    }

    fn update_estimate(&mut self) {
        let Some(estimate) = self.estimate else {
            return;
        };
        let completed = self.tally.passed + self.tally.failed + self.tally.skipped;
        let threshold = (estimate as f64 * ESTIMATE_COMPLETION_THRESHOLD) as usize;
        if self.tally.total() > estimate || completed > threshold {
            debug!(estimate, actual = self.tally.total(), "switching from estimated to actual test count");
            self.estimate = None;
        }
    }
}

/// An aggregator shared between an ingesting thread and a reading renderer.
#[derive(Clone, Default)]
pub struct SharedAggregator {
    inner: Arc<RwLock<EventAggregator>>,
}

impl SharedAggregator {
    pub fn new(aggregator: EventAggregator) -> Self {
        SharedAggregator {
            inner: Arc::new(RwLock::new(aggregator)),
        }
    }

    pub fn ingest(&self, event: TestEvent) -> Result<()> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .ingest(event)
    }

    pub fn snapshot(&self) -> RunSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot()
    }

    pub fn finalize(&self) -> Result<TestSummary> {
        self.inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .finalize()
    }
}
