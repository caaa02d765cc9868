//! Aggregate a `go test -json` stream and report on it

use crate::aggregator::{EventAggregator, RunSnapshot, TestKey};
use crate::cache::{pattern_key, DiscoveryCache, RunHistory};
use crate::commands::utils::{load_settings, open_cache};
use crate::commands::Command;
use crate::comment::{discriminated_uuid, tracked_body, PostStrategy};
use crate::config::Settings;
use crate::error::{Error, Result};
use crate::event::EventReader;
use crate::job_summary::{GitHubStepSummary, JobSummaryWriter};
use crate::summary::{
    diagnose_exit, format_duration, render_comment_body, render_results, TestSummary,
};
use crate::ui::UI;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Events between two progress bar refreshes.
const PROGRESS_REFRESH_EVENTS: usize = 32;

/// Failed tests listed on the terminal before eliding the rest.
const FAILURES_SHOWN: usize = 20;

pub struct ParseCommand {
    base_path: Option<String>,
    input: Option<PathBuf>,
    packages: Vec<String>,
    flags: Vec<String>,
    comment_output: Option<PathBuf>,
    exit_code: Option<i32>,
    stderr_file: Option<PathBuf>,
    show_progress: bool,
    settings: Option<Settings>,
    job_summary: Option<Box<dyn JobSummaryWriter>>,
}

impl ParseCommand {
    pub fn new(base_path: Option<String>) -> Self {
        ParseCommand {
            base_path,
            input: None,
            packages: Vec::new(),
            flags: Vec::new(),
            comment_output: None,
            exit_code: None,
            stderr_file: None,
            show_progress: false,
            settings: None,
            job_summary: None,
        }
    }

    /// Read events from a file instead of stdin
    pub fn with_input(mut self, input: Option<PathBuf>) -> Self {
        self.input = input;
        self
    }

    /// Package patterns the run covered, used as the cache key
    pub fn with_packages(mut self, packages: Vec<String>) -> Self {
        self.packages = packages;
        self
    }

    /// Extra test flags recorded in the run history
    pub fn with_flags(mut self, flags: Vec<String>) -> Self {
        self.flags = flags;
        self
    }

    /// Write the review comment body to this file when the posting strategy allows
    pub fn with_comment_output(mut self, path: Option<PathBuf>) -> Self {
        self.comment_output = path;
        self
    }

    /// Exit status and captured stderr of the process that produced the stream
    pub fn with_process_result(mut self, exit_code: Option<i32>, stderr_file: Option<PathBuf>) -> Self {
        self.exit_code = exit_code;
        self.stderr_file = stderr_file;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn with_job_summary(mut self, writer: Box<dyn JobSummaryWriter>) -> Self {
        self.job_summary = Some(writer);
        self
    }

    fn open_input(&self) -> Result<Box<dyn BufRead>> {
        match &self.input {
            Some(path) if path.as_os_str() != "-" => {
                let file = File::open(path).map_err(|e| {
                    Error::Other(format!("Failed to open {}: {}", path.display(), e))
                })?;
                Ok(Box::new(BufReader::new(file)))
            }
            _ => Ok(Box::new(BufReader::new(io::stdin()))),
        }
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::stderr_with_hz(10));
        if let Ok(style) =
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg} [{elapsed}]")
        {
            bar.set_style(style);
        }
        bar
    }

    fn aggregate(&self, ui: &mut dyn UI, estimate: Option<usize>) -> Result<TestSummary> {
        let mut aggregator = EventAggregator::new().with_estimate(estimate);
        let bar = self.progress_bar();
        let mut reader = EventReader::new(self.open_input()?);

        let mut seen = 0;
        for event in reader.by_ref() {
            aggregator.ingest(event?)?;
            seen += 1;
            if seen % PROGRESS_REFRESH_EVENTS == 0 {
                update_progress(&bar, &aggregator.snapshot());
            }
        }
        update_progress(&bar, &aggregator.snapshot());
        bar.finish_and_clear();

        if reader.skipped_lines() > 0 {
            ui.warning(&format!(
                "Skipped {} line(s) that were not test events",
                reader.skipped_lines()
            ))?;
        }
        for warning in aggregator.warnings() {
            debug!(test = %warning.key, "{}", warning.message);
        }

        aggregator.finalize()
    }

    fn report(&self, ui: &mut dyn UI, summary: &TestSummary) -> Result<()> {
        for failure in &summary.failed_packages {
            ui.output(&format!("FAIL {} (no test results)", failure.package))?;
            for line in failure.output.iter().rev().take(5).rev() {
                ui.output(&format!("    {}", line.trim_end()))?;
            }
        }
        for entry in summary.failed.iter().take(FAILURES_SHOWN) {
            let mut line = format!(
                "FAIL {} {} ({})",
                entry.package,
                entry.name,
                format_duration(entry.duration)
            );
            if let Some(label) = entry.subtest_label() {
                line.push(' ');
                line.push_str(&label);
            }
            ui.output(&line)?;
        }
        if summary.failed.len() > FAILURES_SHOWN {
            ui.output(&format!(
                "... and {} more failed test(s)",
                summary.failed.len() - FAILURES_SHOWN
            ))?;
        }
        if !summary.incomplete.is_empty() {
            ui.warning(&format!(
                "{} test(s) did not report a result",
                summary.incomplete.len()
            ))?;
        }
        ui.output(&format!(
            "Tests: {} passed, {} failed, {} skipped, {} total in {}",
            summary.passed.len(),
            summary.failed.len(),
            summary.skipped.len(),
            summary.total(),
            format_duration(summary.elapsed)
        ))?;
        Ok(())
    }

    fn update_cache(&self, cache: &DiscoveryCache, pattern: &str, summary: &TestSummary) -> Result<()> {
        let names: Vec<String> = summary
            .entries()
            .map(|e| TestKey::new(e.package.as_str(), e.name.as_str()).to_string())
            .collect();
        let packages = summary.packages.len();
        cache.update_count(pattern, summary.total(), packages)?;
        cache.update_list(pattern, names, packages)?;
        cache.update_package_details(summary)?;
        cache.record_performance(summary)?;
        cache.add_run_history(RunHistory::from_summary(summary, pattern, self.flags.clone()))?;
        Ok(())
    }

    fn write_comment(
        &self,
        ui: &mut dyn UI,
        settings: &Settings,
        summary: &TestSummary,
        platform: &str,
        path: &Path,
    ) -> Result<()> {
        let strategy = PostStrategy::from_setting(settings.comment.strategy.as_deref());
        if !strategy.should_post(summary, std::env::consts::OS) {
            info!(strategy = %strategy, "posting strategy declined a comment");
            return Ok(());
        }
        let uuid = settings
            .comment
            .uuid
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(Error::EmptyUuid)?;
        let uuid = discriminated_uuid(uuid, settings.comment.job_discriminator.as_deref());
        let body = tracked_body(
            &uuid,
            &render_results(summary, platform),
            settings.comment.max_size,
        )?;
        fs::write(path, body)?;
        ui.output(&format!("Wrote comment body to {}", path.display()))?;
        Ok(())
    }
}

fn update_progress(bar: &ProgressBar, snapshot: &RunSnapshot) {
    bar.set_length(snapshot.progress_total() as u64);
    bar.set_position(snapshot.completed() as u64);
    if snapshot.failed > 0 {
        bar.set_message(format!("{} failed", snapshot.failed));
    }
}

impl Command for ParseCommand {
    fn execute(&self, ui: &mut dyn UI) -> Result<i32> {
        let settings = match &self.settings {
            Some(settings) => settings.clone(),
            None => load_settings(self.base_path.as_deref())?,
        };
        let cache = open_cache(&settings)?;
        let pattern = pattern_key(&self.packages);
        let estimate = cache.as_ref().and_then(|c| c.get_count(&pattern));
        debug!(pattern = %pattern, estimate = ?estimate, "starting aggregation");

        let summary = self.aggregate(ui, estimate)?;
        self.report(ui, &summary)?;

        let mut exit = if summary.has_failures() { 1 } else { 0 };
        if let Some(code) = self.exit_code.filter(|c| *c != 0) {
            let stderr = match &self.stderr_file {
                Some(path) => fs::read_to_string(path).unwrap_or_else(|e| {
                    warn!(path = %path.display(), error = %e, "could not read test process stderr");
                    String::new()
                }),
                None => String::new(),
            };
            if let Some(diagnosis) = diagnose_exit(&stderr, code, summary.failed.len()) {
                ui.error(&diagnosis)?;
                exit = 1;
            }
        }

        if let Some(cache) = &cache {
            if let Err(e) = self.update_cache(cache, &pattern, &summary) {
                ui.warning(&format!("Could not update discovery cache: {}", e))?;
            }
        }

        let platform = settings
            .comment
            .job_discriminator
            .clone()
            .unwrap_or_else(|| std::env::consts::OS.to_string());

        let env_writer;
        let writer: &dyn JobSummaryWriter = match &self.job_summary {
            Some(writer) => writer.as_ref(),
            None => {
                env_writer = GitHubStepSummary::from_env();
                &env_writer
            }
        };
        if writer.is_supported() {
            let text = match settings.comment.uuid.as_deref().filter(|u| !u.trim().is_empty()) {
                Some(uuid) => render_comment_body(&summary, uuid, &platform),
                None => render_results(&summary, &platform),
            };
            if let Some(path) = writer.write_summary(&text)? {
                debug!(path = %path.display(), "appended job summary");
            }
        }

        if let Some(path) = &self.comment_output {
            self.write_comment(ui, &settings, &summary, &platform, path)?;
        }

        Ok(exit)
    }

    fn name(&self) -> &str {
        "parse"
    }

    fn help(&self) -> &str {
        "Aggregate a go test -json stream and report the results"
    }
}
