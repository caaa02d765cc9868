//! Utility functions for command implementation

use crate::cache::DiscoveryCache;
use crate::config::Settings;
use crate::error::{Error, Result};
use std::path::Path;
use tracing::debug;

/// Project root from the `-C` option (or current directory if None)
pub fn base_dir(base_path: Option<&str>) -> &Path {
    base_path.map(Path::new).unwrap_or_else(|| Path::new("."))
}

/// Load settings for the project at `base_path`
pub fn load_settings(base_path: Option<&str>) -> Result<Settings> {
    Settings::discover(base_dir(base_path))
}

/// Open the discovery cache, or `None` when caching is disabled
pub fn open_cache(settings: &Settings) -> Result<Option<DiscoveryCache>> {
    match DiscoveryCache::open(&settings.cache) {
        Ok(cache) => Ok(Some(cache)),
        Err(Error::CacheDisabled) => {
            debug!("discovery cache disabled; continuing without it");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use tempfile::TempDir;

    #[test]
    fn test_open_cache_disabled() {
        let settings = Settings {
            cache: CacheConfig {
                enabled: false,
                ..CacheConfig::default()
            },
            ..Settings::default()
        };
        assert!(open_cache(&settings).unwrap().is_none());
    }

    #[test]
    fn test_open_cache_enabled() {
        let temp = TempDir::new().unwrap();
        let settings = Settings {
            cache: CacheConfig {
                dir: temp.path().join(".cache"),
                ..CacheConfig::default()
            },
            ..Settings::default()
        };
        assert!(open_cache(&settings).unwrap().is_some());
    }
}
