//! UI that records everything, for command tests

use crate::error::Result;
use crate::ui::UI;

/// Captures output and errors in vectors
pub struct TestUI {
    pub output: Vec<String>,
    pub errors: Vec<String>,
}

impl TestUI {
    pub fn new() -> Self {
        TestUI {
            output: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// All captured output joined with newlines.
    pub fn text(&self) -> String {
        self.output.join("\n")
    }
}

impl Default for TestUI {
    fn default() -> Self {
        Self::new()
    }
}

impl UI for TestUI {
    fn output(&mut self, message: &str) -> Result<()> {
        self.output.push(message.to_string());
        Ok(())
    }

    fn error(&mut self, message: &str) -> Result<()> {
        self.errors.push(message.to_string());
        Ok(())
    }

    fn warning(&mut self, message: &str) -> Result<()> {
        self.errors.push(format!("Warning: {}", message));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_captures_output_and_warnings() {
        let mut ui = TestUI::new();
        ui.output("first").unwrap();
        ui.output("second").unwrap();
        ui.warning("careful").unwrap();
        assert_eq!(ui.text(), "first\nsecond");
        assert_eq!(ui.errors, vec!["Warning: careful"]);
    }
}
