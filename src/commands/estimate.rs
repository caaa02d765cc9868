//! Print the cached test count for a set of packages

use crate::cache::pattern_key;
use crate::commands::utils::{load_settings, open_cache};
use crate::commands::Command;
use crate::config::Settings;
use crate::error::Result;
use crate::ui::UI;

pub struct EstimateCommand {
    base_path: Option<String>,
    packages: Vec<String>,
    settings: Option<Settings>,
}

impl EstimateCommand {
    pub fn new(base_path: Option<String>, packages: Vec<String>) -> Self {
        EstimateCommand {
            base_path,
            packages,
            settings: None,
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }
}

impl Command for EstimateCommand {
    fn execute(&self, ui: &mut dyn UI) -> Result<i32> {
        let settings = match &self.settings {
            Some(settings) => settings.clone(),
            None => load_settings(self.base_path.as_deref())?,
        };
        let Some(cache) = open_cache(&settings)? else {
            ui.warning("Discovery cache is disabled")?;
            return Ok(1);
        };

        let pattern = pattern_key(&self.packages);
        match cache.get_count(&pattern) {
            Some(count) => {
                ui.output(&count.to_string())?;
                Ok(0)
            }
            None => {
                ui.warning(&format!("No valid cached estimate for {}", pattern))?;
                Ok(1)
            }
        }
    }

    fn name(&self) -> &str {
        "estimate"
    }

    fn help(&self) -> &str {
        "Print the cached test count for a package pattern"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DiscoveryCache;
    use crate::config::CacheConfig;
    use crate::ui::test_ui::TestUI;
    use tempfile::TempDir;

    fn settings(temp: &TempDir) -> Settings {
        Settings {
            cache: CacheConfig {
                dir: temp.path().join(".cache"),
                source_file: temp.path().join("go.mod"),
                ..CacheConfig::default()
            },
            ..Settings::default()
        }
    }

    #[test]
    fn test_estimate_hit() {
        let temp = TempDir::new().unwrap();
        let cache = DiscoveryCache::open(&settings(&temp).cache).unwrap();
        cache.update_count("./a ./b", 17, 2).unwrap();

        let cmd = EstimateCommand::new(None, vec!["./b".to_string(), "./a".to_string()])
            .with_settings(settings(&temp));
        let mut ui = TestUI::new();
        assert_eq!(cmd.execute(&mut ui).unwrap(), 0);
        assert_eq!(ui.output, vec!["17"]);
    }

    #[test]
    fn test_estimate_miss() {
        let temp = TempDir::new().unwrap();
        let cmd = EstimateCommand::new(None, Vec::new()).with_settings(settings(&temp));
        let mut ui = TestUI::new();
        assert_eq!(cmd.execute(&mut ui).unwrap(), 1);
        assert_eq!(ui.errors, vec!["Warning: No valid cached estimate for ./..."]);
    }
}
