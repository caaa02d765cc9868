//! List stored runs from the discovery cache history

use crate::commands::utils::{load_settings, open_cache};
use crate::commands::Command;
use crate::config::Settings;
use crate::error::Result;
use crate::ui::UI;

pub struct HistoryCommand {
    base_path: Option<String>,
    limit: usize,
    settings: Option<Settings>,
}

impl HistoryCommand {
    pub fn new(base_path: Option<String>) -> Self {
        HistoryCommand {
            base_path,
            limit: usize::MAX,
            settings: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }
}

impl Command for HistoryCommand {
    fn execute(&self, ui: &mut dyn UI) -> Result<i32> {
        let settings = match &self.settings {
            Some(settings) => settings.clone(),
            None => load_settings(self.base_path.as_deref())?,
        };
        let Some(cache) = open_cache(&settings)? else {
            ui.warning("Discovery cache is disabled")?;
            return Ok(1);
        };

        let runs = cache.history();
        if runs.is_empty() {
            ui.output("No runs recorded")?;
            return Ok(0);
        }

        for run in runs.iter().take(self.limit) {
            let mut line = format!(
                "{}  {}  {}  {} total, {} passed, {} failed, {} skipped  {}ms",
                run.id,
                run.timestamp.format("%Y-%m-%d %H:%M:%S"),
                run.pattern,
                run.total,
                run.passed,
                run.failed,
                run.skipped,
                run.duration_ms
            );
            if !run.flags.is_empty() {
                line.push_str("  ");
                line.push_str(&run.flags.join(" "));
            }
            ui.output(&line)?;
        }
        Ok(0)
    }

    fn name(&self) -> &str {
        "history"
    }

    fn help(&self) -> &str {
        "List recent runs, newest first"
    }
}
