//! Reset the discovery cache

use crate::commands::utils::{load_settings, open_cache};
use crate::commands::Command;
use crate::config::Settings;
use crate::error::Result;
use crate::ui::UI;

pub struct ClearCacheCommand {
    base_path: Option<String>,
    settings: Option<Settings>,
}

impl ClearCacheCommand {
    pub fn new(base_path: Option<String>) -> Self {
        ClearCacheCommand {
            base_path,
            settings: None,
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }
}

impl Command for ClearCacheCommand {
    fn execute(&self, ui: &mut dyn UI) -> Result<i32> {
        let settings = match &self.settings {
            Some(settings) => settings.clone(),
            None => load_settings(self.base_path.as_deref())?,
        };
        let Some(cache) = open_cache(&settings)? else {
            ui.warning("Discovery cache is disabled; nothing to clear")?;
            return Ok(0);
        };
        cache.clear()?;
        ui.output(&format!("Cleared discovery cache at {}", cache.path().display()))?;
        Ok(0)
    }

    fn name(&self) -> &str {
        "clear-cache"
    }

    fn help(&self) -> &str {
        "Remove all cached discovery results and run history"
    }
}
