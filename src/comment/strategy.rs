//! When a run should produce a review comment

use crate::summary::TestSummary;
use std::fmt;

/// Posting policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostStrategy {
    Never,
    Always,
    /// Always on linux; elsewhere only when something failed or was skipped.
    Adaptive,
    OnFailure,
    OnSkip,
    /// Post only when running on the named operating system.
    Os(String),
}

impl PostStrategy {
    /// Interpret a free-text setting.
    ///
    /// `None` means the setting was never given. A present but empty value
    /// means "always", matching a bare `--post-comment` flag.
    pub fn from_setting(raw: Option<&str>) -> Self {
        match raw {
            None => PostStrategy::Never,
            Some(raw) => Self::normalize(raw),
        }
    }

    fn normalize(raw: &str) -> Self {
        let value = raw.trim().to_lowercase();
        match value.as_str() {
            "" | "always" | "true" | "yes" | "1" => PostStrategy::Always,
            "never" | "false" | "no" | "0" => PostStrategy::Never,
            "adaptive" => PostStrategy::Adaptive,
            "on-failure" | "onfailure" => PostStrategy::OnFailure,
            "on-skip" | "onskip" => PostStrategy::OnSkip,
            _ => PostStrategy::Os(value),
        }
    }

    /// Decide for a finished run on operating system `os`.
    pub fn should_post(&self, summary: &TestSummary, os: &str) -> bool {
        let failed = summary.has_failures();
        let skipped = !summary.skipped.is_empty();
        match self {
            PostStrategy::Never => false,
            PostStrategy::Always => true,
            PostStrategy::Adaptive => os == "linux" || failed || skipped,
            PostStrategy::OnFailure => failed,
            PostStrategy::OnSkip => skipped,
            PostStrategy::Os(name) => same_os(name, os),
        }
    }
}

fn same_os(a: &str, b: &str) -> bool {
    fn canonical(name: &str) -> &str {
        match name {
            "darwin" | "osx" => "macos",
            other => other,
        }
    }
    canonical(&a.to_lowercase()) == canonical(&b.to_lowercase())
}

impl fmt::Display for PostStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostStrategy::Never => write!(f, "never"),
            PostStrategy::Always => write!(f, "always"),
            PostStrategy::Adaptive => write!(f, "adaptive"),
            PostStrategy::OnFailure => write!(f, "on-failure"),
            PostStrategy::OnSkip => write!(f, "on-skip"),
            PostStrategy::Os(name) => write!(f, "{}", name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::TestStatus;
    use crate::summary::TestEntry;
    use std::time::Duration;

    fn with_skip() -> TestSummary {
        TestSummary {
            skipped: vec![TestEntry {
                package: "p".to_string(),
                name: "TestS".to_string(),
                status: TestStatus::Skipped,
                duration: Duration::ZERO,
                subtests: None,
                failed_subtests: Vec::new(),
                output: Vec::new(),
                skip_reason: None,
            }],
            ..TestSummary::default()
        }
    }

    #[test]
    fn test_normalize() {
        assert_eq!(PostStrategy::from_setting(None), PostStrategy::Never);
        assert_eq!(PostStrategy::from_setting(Some("")), PostStrategy::Always);
        assert_eq!(PostStrategy::from_setting(Some(" TRUE ")), PostStrategy::Always);
        assert_eq!(PostStrategy::from_setting(Some("0")), PostStrategy::Never);
        assert_eq!(PostStrategy::from_setting(Some("OnFailure")), PostStrategy::OnFailure);
        assert_eq!(PostStrategy::from_setting(Some("on-skip")), PostStrategy::OnSkip);
        assert_eq!(
            PostStrategy::from_setting(Some("Windows")),
            PostStrategy::Os("windows".to_string())
        );
    }

    #[test]
    fn test_adaptive() {
        let clean = TestSummary::default();
        assert!(PostStrategy::Adaptive.should_post(&clean, "linux"));
        assert!(!PostStrategy::Adaptive.should_post(&clean, "macos"));
        assert!(PostStrategy::Adaptive.should_post(&with_skip(), "windows"));
    }

    #[test]
    fn test_conditional_strategies() {
        let clean = TestSummary::default();
        assert!(!PostStrategy::OnFailure.should_post(&clean, "linux"));
        assert!(!PostStrategy::OnFailure.should_post(&with_skip(), "linux"));
        assert!(PostStrategy::OnSkip.should_post(&with_skip(), "linux"));
        assert!(!PostStrategy::Never.should_post(&with_skip(), "linux"));
    }

    #[test]
    fn test_os_strategy() {
        let clean = TestSummary::default();
        let darwin = PostStrategy::from_setting(Some("darwin"));
        assert!(darwin.should_post(&clean, "macos"));
        assert!(!darwin.should_post(&clean, "linux"));
    }
}
