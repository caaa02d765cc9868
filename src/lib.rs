//! gotcha - aggregation, discovery caching and CI reporting for Go test runs
//!
//! gotcha consumes the line-oriented JSON event stream written by
//! `go test -json`, keeps a live package → test → subtest tree of the run,
//! remembers how many tests earlier runs found so progress can be sized up
//! front, and keeps a single summary comment on a review thread up to date.
//!
//! # Architecture
//!
//! - [`event`]: decoding of the event stream
//! - [`aggregator`]: the live run tree, snapshots and the final summary
//! - [`summary`]: the final summary and its plain-text renderings
//! - [`cache`]: the persistent discovery cache and run history
//! - [`comment`]: create-or-update of the tracked review comment
//! - [`job_summary`]: appending results to the CI job summary
//! - [`cancel`]: cancellation of in-flight network work
//! - [`config`]: `.gotcha.toml` and environment settings
//! - [`commands`]: the user-facing subcommands
//! - [`ui`]: user interface abstraction for output
//! - [`error`]: Error types and Result alias
//!
//! # Cache Format
//!
//! The cache lives in `.cache/cache.json` under the project root. It is a
//! pretty-printed JSON document, rewritten atomically on every change.
//! Deleting it is always safe.
//!
//! # Example
//!
//! ```
//! use gotcha::aggregator::EventAggregator;
//! use gotcha::event::EventReader;
//!
//! # fn main() -> gotcha::error::Result<()> {
//! let stream = concat!(
//!     "{\"Action\":\"run\",\"Package\":\"example.com/p\",\"Test\":\"TestA\"}\n",
//!     "{\"Action\":\"pass\",\"Package\":\"example.com/p\",\"Test\":\"TestA\",\"Elapsed\":0.01}\n",
//! );
//!
//! let mut aggregator = EventAggregator::new();
//! for event in EventReader::new(stream.as_bytes()) {
//!     aggregator.ingest(event?)?;
//! }
//! let summary = aggregator.finalize()?;
//! assert_eq!(summary.passed.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod cache;
pub mod cancel;
pub mod commands;
pub mod comment;
pub mod config;
pub mod error;
pub mod event;
pub mod job_summary;
pub mod summary;
pub mod ui;

pub use error::{Error, Result};
