//! Command system for gotcha
//!
//! Each subcommand is a Command executed against a UI.

use crate::error::Result;
use crate::ui::UI;

pub mod clear_cache;
pub mod estimate;
pub mod history;
pub mod parse;
mod utils;

pub use clear_cache::ClearCacheCommand;
pub use estimate::EstimateCommand;
pub use history::HistoryCommand;
pub use parse::ParseCommand;

/// Trait that all commands must implement
pub trait Command {
    /// Execute the command, returning the process exit code
    fn execute(&self, ui: &mut dyn UI) -> Result<i32>;

    /// Get the command name
    fn name(&self) -> &str;

    /// Get command help text
    fn help(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_names() {
        let commands: Vec<Box<dyn Command>> = vec![
            Box::new(ParseCommand::new(None)),
            Box::new(EstimateCommand::new(None, Vec::new())),
            Box::new(HistoryCommand::new(None)),
            Box::new(ClearCacheCommand::new(None)),
        ];
        let names: Vec<&str> = commands.iter().map(|c| c.name()).collect();
        assert_eq!(names, vec!["parse", "estimate", "history", "clear-cache"]);
        assert!(commands.iter().all(|c| !c.help().is_empty()));
    }
}
