//! Configuration file (.gotcha.toml) parsing and environment overrides
//!
//! Every setting has a default, so the file is optional. Environment
//! variables are applied on top of whatever the file provides.

use crate::comment::{discriminated_uuid, min_comment_size};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the configuration file looked up in the project root.
pub const CONFIG_FILE_NAME: &str = ".gotcha.toml";

/// Default limit for review comment bodies, in bytes.
pub const DEFAULT_COMMENT_MAX_SIZE: usize = 65536;

/// Top-level settings.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub cache: CacheConfig,
    pub comment: CommentConfig,
}

/// Discovery cache settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// When false, opening the cache fails with `Error::CacheDisabled`.
    pub enabled: bool,

    /// Directory holding the cache file.
    pub dir: PathBuf,

    pub file_name: String,

    /// Entries older than this are never served.
    #[serde(with = "humantime_serde")]
    pub max_age: Duration,

    /// Number of past runs kept in the history ring.
    pub history_max_entries: usize,

    /// File whose modification invalidates discovery results.
    pub source_file: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            dir: PathBuf::from(".cache"),
            file_name: "cache.json".to_string(),
            max_age: Duration::from_secs(24 * 60 * 60),
            history_max_entries: crate::cache::DEFAULT_MAX_ENTRIES,
            source_file: PathBuf::from("go.mod"),
        }
    }
}

impl CacheConfig {
    /// Full path of the cache file.
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }
}

/// Review comment settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommentConfig {
    /// Identifier embedded in the tracked comment.
    pub uuid: Option<String>,

    /// Raw posting strategy, normalized by `PostStrategy::normalize`.
    pub strategy: Option<String>,

    /// Suffix distinguishing several jobs that post to the same thread.
    pub job_discriminator: Option<String>,

    pub max_size: usize,
}

impl Default for CommentConfig {
    fn default() -> Self {
        CommentConfig {
            uuid: None,
            strategy: None,
            job_discriminator: None,
            max_size: DEFAULT_COMMENT_MAX_SIZE,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::parse(&contents)
    }

    /// Load `.gotcha.toml` from `base` if it exists, then apply the process
    /// environment.
    pub fn discover(base: &Path) -> Result<Self> {
        let path = base.join(CONFIG_FILE_NAME);
        let mut settings = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            Settings::default()
        };
        settings.apply_env(|name| std::env::var(name).ok())?;
        if settings.cache.dir.is_relative() {
            settings.cache.dir = base.join(&settings.cache.dir);
        }
        if settings.cache.source_file.is_relative() {
            settings.cache.source_file = base.join(&settings.cache.source_file);
        }
        Ok(settings)
    }

    /// Parse settings from a string.
    pub fn parse(contents: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", CONFIG_FILE_NAME, e)))?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.cache.file_name.is_empty() {
            return Err(Error::Config("cache.file_name cannot be empty".to_string()));
        }
        let uuid = discriminated_uuid(
            self.comment.uuid.as_deref().unwrap_or_default(),
            self.comment.job_discriminator.as_deref(),
        );
        let minimum = min_comment_size(&uuid);
        if self.comment.max_size < minimum {
            return Err(Error::Config(format!(
                "comment.max_size must be at least {} to hold the comment marker",
                minimum
            )));
        }
        Ok(())
    }

    /// Apply environment overrides, reading variables through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("GOTCHA_CACHE_ENABLED") {
            self.cache.enabled = parse_bool("GOTCHA_CACHE_ENABLED", &value)?;
        }
        if let Some(value) = lookup("GOTCHA_CACHE_DIR") {
            self.cache.dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("GOTCHA_CACHE_MAX_AGE") {
            self.cache.max_age = humantime::parse_duration(value.trim()).map_err(|e| {
                Error::Config(format!("Invalid GOTCHA_CACHE_MAX_AGE '{}': {}", value, e))
            })?;
        }
        if let Some(value) = lookup("GOTCHA_COMMENT_UUID") {
            self.comment.uuid = Some(value);
        }
        if let Some(value) = lookup("GOTCHA_POST_COMMENT").or_else(|| lookup("POST_COMMENT")) {
            self.comment.strategy = Some(value);
        }
        if let Some(value) = lookup("GOTCHA_JOB_DISCRIMINATOR") {
            self.comment.job_discriminator = Some(value).filter(|v| !v.trim().is_empty());
        }
        self.validate()
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::Config(format!(
            "Invalid {} '{}': expected true or false",
            name, other
        ))),
    }
}
