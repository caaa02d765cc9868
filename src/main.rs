//! gotcha - Command-line front end for Go test stream aggregation

use clap::{Parser, Subcommand};
use gotcha::commands::*;
use gotcha::ui::CliUI;
use std::io::{IsTerminal, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gotcha")]
#[command(about = "Aggregate go test JSON output, cache discovery and report to CI", long_about = None)]
struct Cli {
    /// Project root (defaults to current directory)
    #[arg(short = 'C', long, global = true)]
    directory: Option<String>,

    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Read a go test -json stream and summarize it
    Parse {
        /// File holding the stream ("-" or absent for stdin)
        input: Option<PathBuf>,

        /// Package patterns the run covered
        #[arg(short, long = "package")]
        packages: Vec<String>,

        /// Test flags to record in the run history
        #[arg(long = "flag")]
        flags: Vec<String>,

        /// Write the review comment body to this file
        #[arg(long)]
        comment_output: Option<PathBuf>,

        /// Exit status of the go test process
        #[arg(long)]
        exit_code: Option<i32>,

        /// File holding the captured stderr of the go test process
        #[arg(long)]
        stderr_file: Option<PathBuf>,

        /// Never draw a progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Print the cached test count for package patterns
    Estimate {
        packages: Vec<String>,
    },

    /// List recent runs
    History {
        /// Number of runs to show
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },

    /// Remove cached discovery results and history
    #[command(name = "clear-cache")]
    ClearCache,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GOTCHA_LOG").unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut ui = CliUI::new();

    let result = match cli.command {
        Commands::Parse {
            input,
            packages,
            flags,
            comment_output,
            exit_code,
            stderr_file,
            no_progress,
        } => {
            let cmd = ParseCommand::new(cli.directory)
                .with_input(input)
                .with_packages(packages)
                .with_flags(flags)
                .with_comment_output(comment_output)
                .with_process_result(exit_code, stderr_file)
                .with_progress(!no_progress && std::io::stderr().is_terminal());
            cmd.execute(&mut ui)
        }
        Commands::Estimate { packages } => {
            let cmd = EstimateCommand::new(cli.directory, packages);
            cmd.execute(&mut ui)
        }
        Commands::History { count } => {
            let mut cmd = HistoryCommand::new(cli.directory);
            if let Some(count) = count {
                cmd = cmd.with_limit(count);
            }
            cmd.execute(&mut ui)
        }
        Commands::ClearCache => {
            let cmd = ClearCacheCommand::new(cli.directory);
            cmd.execute(&mut ui)
        }
    };

    match result {
        Ok(exit_code) => std::process::exit(exit_code),
        Err(e) => {
            let _ = writeln!(std::io::stderr(), "Error: {}", e);
            std::process::exit(1);
        }
    }
}
