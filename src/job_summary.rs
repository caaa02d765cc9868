//! Appending results to the CI job summary

use crate::error::Result;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use tracing::debug;

/// Environment variable naming the job summary file on GitHub Actions.
pub const STEP_SUMMARY_ENV: &str = "GITHUB_STEP_SUMMARY";

/// A sink for human-readable run summaries.
pub trait JobSummaryWriter {
    /// Append `text`, returning where it went, or `None` when unsupported.
    fn write_summary(&self, text: &str) -> Result<Option<PathBuf>>;

    fn is_supported(&self) -> bool;
}

/// The GitHub Actions step summary file.
#[derive(Debug, Clone, Default)]
pub struct GitHubStepSummary {
    path: Option<PathBuf>,
}

impl GitHubStepSummary {
    /// Use the file named by `GITHUB_STEP_SUMMARY`, if set.
    pub fn from_env() -> Self {
        Self::new(std::env::var_os(STEP_SUMMARY_ENV).map(PathBuf::from))
    }

    pub fn new(path: Option<PathBuf>) -> Self {
        GitHubStepSummary {
            path: path.filter(|p| !p.as_os_str().is_empty()),
        }
    }
}

impl JobSummaryWriter for GitHubStepSummary {
    fn write_summary(&self, text: &str) -> Result<Option<PathBuf>> {
        let Some(path) = &self.path else {
            debug!("no job summary file configured");
            return Ok(None);
        };
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        Ok(Some(path.clone()))
    }

    fn is_supported(&self) -> bool {
        self.path.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_unsupported_is_noop() {
        let writer = GitHubStepSummary::new(None);
        assert!(!writer.is_supported());
        assert_eq!(writer.write_summary("hello").unwrap(), None);
    }

    #[test]
    fn test_appends() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("summary.md");
        let writer = GitHubStepSummary::new(Some(path.clone()));
        assert!(writer.is_supported());

        assert_eq!(writer.write_summary("first").unwrap(), Some(path.clone()));
        writer.write_summary("second\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "first\nsecond\n");
    }
}
