//! Decoding of the `go test -json` event stream
//!
//! Each line of the stream is one JSON object. Lines that are not valid events
//! (build output interleaved by the toolchain, truncated writes from an
//! interrupted run) are dropped with a warning and never end the stream.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::fmt;
use std::io::BufRead;
use std::time::Duration;
use tracing::{debug, warn};

/// Actions emitted by the test driver that carry no state for us.
const IGNORED_ACTIONS: &[&str] = &["start", "pause", "cont", "bench"];

/// Kind of a test event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// A test (or subtest) started running.
    Run,
    /// A test or package passed.
    Pass,
    /// A test or package failed.
    Fail,
    /// A test or package was skipped.
    Skip,
    /// A line of output.
    Output,
}

impl Action {
    /// Parse the wire name of an action.
    ///
    /// Returns `None` for actions that have no meaning to the aggregator.
    pub fn parse(name: &str) -> Option<Action> {
        match name {
            "run" => Some(Action::Run),
            "pass" => Some(Action::Pass),
            "fail" => Some(Action::Fail),
            "skip" => Some(Action::Skip),
            "output" => Some(Action::Output),
            _ => None,
        }
    }

    /// Returns true for pass, fail and skip.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Pass | Action::Fail | Action::Skip)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Run => write!(f, "run"),
            Action::Pass => write!(f, "pass"),
            Action::Fail => write!(f, "fail"),
            Action::Skip => write!(f, "skip"),
            Action::Output => write!(f, "output"),
        }
    }
}

/// One decoded event.
#[derive(Debug, Clone, PartialEq)]
pub struct TestEvent {
    pub time: Option<DateTime<Utc>>,
    pub action: Action,
    pub package: String,
    /// Empty for package-level events; `/` separates subtest levels.
    pub test: String,
    /// Seconds, present on terminal actions.
    pub elapsed: Option<f64>,
    /// Raw text, present on output actions.
    pub output: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEvent {
    time: Option<DateTime<Utc>>,
    action: String,
    #[serde(default)]
    package: String,
    #[serde(default)]
    test: String,
    elapsed: Option<f64>,
    output: Option<String>,
}

impl TestEvent {
    pub fn new(action: Action, package: impl Into<String>, test: impl Into<String>) -> Self {
        TestEvent {
            time: None,
            action,
            package: package.into(),
            test: test.into(),
            elapsed: None,
            output: None,
        }
    }

    /// Set the elapsed seconds
    pub fn with_elapsed(mut self, seconds: f64) -> Self {
        self.elapsed = Some(seconds);
        self
    }

    /// Set the output text
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Decode a single line of the stream.
    ///
    /// `Ok(None)` means the line was a well-formed event whose action is not
    /// tracked. Lines that are not events at all are `Err(MalformedEvent)`.
    pub fn parse_line(line: &str) -> Result<Option<TestEvent>> {
        let raw: RawEvent = serde_json::from_str(line)
            .map_err(|e| Error::MalformedEvent(format!("{}: {}", e, abbreviate(line))))?;

        let Some(action) = Action::parse(&raw.action) else {
            if IGNORED_ACTIONS.contains(&raw.action.as_str()) {
                debug!(action = %raw.action, package = %raw.package, "ignoring event");
            } else {
                warn!(action = %raw.action, package = %raw.package, "ignoring unknown event action");
            }
            return Ok(None);
        };

        Ok(Some(TestEvent {
            time: raw.time,
            action,
            package: raw.package,
            test: raw.test,
            elapsed: raw.elapsed,
            output: raw.output,
        }))
    }

    /// Returns true for events about the package rather than a test.
    pub fn is_package_event(&self) -> bool {
        self.test.is_empty()
    }

    /// Elapsed time as a duration, if reported and sane.
    pub fn elapsed_duration(&self) -> Option<Duration> {
        self.elapsed
            .filter(|s| s.is_finite() && *s >= 0.0)
            .map(Duration::from_secs_f64)
    }
}

fn abbreviate(line: &str) -> String {
    const LIMIT: usize = 80;
    if line.len() <= LIMIT {
        return line.to_string();
    }
    let mut end = LIMIT;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &line[..end])
}

/// Iterator over the events of a line-oriented stream.
///
/// Only I/O failures surface as errors; undecodable lines are skipped and
/// counted.
pub struct EventReader<R> {
    reader: R,
    line: String,
    line_number: usize,
    skipped: usize,
}

impl<R: BufRead> EventReader<R> {
    pub fn new(reader: R) -> Self {
        EventReader {
            reader,
            line: String::new(),
            line_number: 0,
            skipped: 0,
        }
    }

    /// Number of lines that were dropped because they were not valid events.
    pub fn skipped_lines(&self) -> usize {
        self.skipped
    }
}

impl<R: BufRead> Iterator for EventReader<R> {
    type Item = Result<TestEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line.clear();
            match self.reader.read_line(&mut self.line) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                    // Not UTF-8; treat like any other garbage line.
                    self.line_number += 1;
                    self.skipped += 1;
                    warn!(line = self.line_number, "dropping non UTF-8 line from event stream");
                    continue;
                }
                Err(e) => return Some(Err(e.into())),
            }
            self.line_number += 1;

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match TestEvent::parse_line(trimmed) {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => continue,
                Err(e) => {
                    self.skipped += 1;
                    warn!(line = self.line_number, "{}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_run_event() {
        let line = r#"{"Time":"2024-05-01T10:00:00.123Z","Action":"run","Package":"example.com/pkg/foo","Test":"TestA"}"#;
        let event = TestEvent::parse_line(line).unwrap().unwrap();
        assert_eq!(event.action, Action::Run);
        assert_eq!(event.package, "example.com/pkg/foo");
        assert_eq!(event.test, "TestA");
        assert!(event.time.is_some());
        assert!(event.elapsed.is_none());
    }

    #[test]
    fn test_parse_terminal_event_with_elapsed() {
        let line = r#"{"Action":"fail","Package":"pkg/foo","Test":"TestA/sub","Elapsed":0.25}"#;
        let event = TestEvent::parse_line(line).unwrap().unwrap();
        assert_eq!(event.action, Action::Fail);
        assert_eq!(event.elapsed_duration(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_parse_package_event() {
        let line = r#"{"Action":"pass","Package":"pkg/foo","Elapsed":1.5}"#;
        let event = TestEvent::parse_line(line).unwrap().unwrap();
        assert!(event.is_package_event());
    }

    #[test]
    fn test_ignored_action() {
        let line = r#"{"Action":"start","Package":"pkg/foo"}"#;
        assert!(TestEvent::parse_line(line).unwrap().is_none());

        let line = r#"{"Action":"frobnicate","Package":"pkg/foo"}"#;
        assert!(TestEvent::parse_line(line).unwrap().is_none());
    }

    #[test]
    fn test_malformed_line() {
        let result = TestEvent::parse_line("# example.com/pkg [build failed]");
        assert!(matches!(result, Err(Error::MalformedEvent(_))));
    }

    #[test]
    fn test_negative_elapsed_ignored() {
        let event = TestEvent::new(Action::Pass, "p", "T").with_elapsed(-1.0);
        assert_eq!(event.elapsed_duration(), None);
    }

    #[test]
    fn test_reader_skips_garbage() {
        let stream = concat!(
            "{\"Action\":\"run\",\"Package\":\"p\",\"Test\":\"TestA\"}\n",
            "not json at all\n",
            "\n",
            "{\"Action\":\"pass\",\"Package\":\"p\",\"Test\":\"TestA\",\"Elapsed\":0.1}\n",
            "{\"Action\":\"pass\",\"Pack",
        );
        let mut reader = EventReader::new(Cursor::new(stream));
        let events: Vec<TestEvent> = reader.by_ref().map(|e| e.unwrap()).collect();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, Action::Run);
        assert_eq!(events[1].action, Action::Pass);
        assert_eq!(reader.skipped_lines(), 2);
    }

    #[test]
    fn test_abbreviate_long_line() {
        let long = "x".repeat(200);
        let short = abbreviate(&long);
        assert!(short.ends_with("..."));
        assert_eq!(short.len(), 83);
    }
}
