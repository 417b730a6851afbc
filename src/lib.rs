//! flakelens: flaky-test analysis for repeated `go test -json` runs.
//!
//! The crate has two phases:
//!
//! - **Transform**: rewrites one run's event stream so that a parent test
//!   which failed only because ignorable subtests failed is reported as
//!   passing. Genuinely failing leaf tests stay failed.
//! - **Aggregate**: combines N run files into one result per test, with
//!   pass/fail/skip counts, crash attribution for panics, races and
//!   timeouts, and run-count reconciliation for runs cut short by a crash.
//!
//! # Architecture
//!
//! - **Event**: the `test2json` wire model ([`event`])
//! - **Tree**: per-run package/test/subtest tree ([`tree`])
//! - **Transform**: ignore policies, propagation and rewriting ([`transform`])
//! - **Attribution**: crash-to-test heuristics ([`attribution`])
//! - **Aggregate**: multi-run aggregation and reconciliation ([`aggregate`])
//! - **Report**: JSON, JUnit XML and console output ([`report`])
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use flakelens::config::load_config;
//! use flakelens::aggregate::aggregate;
//! use flakelens::report::TestReport;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = load_config(std::path::Path::new("flakelens.toml"))?;
//!     let files = vec![PathBuf::from("run1.json"), PathBuf::from("run2.json")];
//!     let results = aggregate(&files, &config.aggregate_options())?;
//!     let report = TestReport::new(results, config.report.max_pass_ratio);
//!     report.save(&config.report.json_path())?;
//!     Ok(())
//! }
//! ```

pub mod aggregate;
pub mod attribution;
pub mod config;
pub mod event;
pub mod report;
pub mod transform;
pub mod tree;

// Re-export commonly used types
pub use aggregate::{AggregateError, AggregateOptions, Aggregator, TestResult, aggregate};
pub use attribution::{AttributionError, PanicAttribution, attribute_panic, attribute_race};
pub use config::{Config, load_config};
pub use event::{Action, TestEvent};
pub use report::{SummaryData, TestReport};
pub use transform::{TransformError, TransformOptions, transform_json};
pub use tree::{NodeId, TestNode, TestTree};
