//! Configuration schema definitions for flakelens.
//!
//! Every section and every field is optional; an empty file is a valid
//! configuration.
//!
//! # Schema Overview
//!
//! ```text
//! Config (root)
//! ├── TransformConfig   - Which failures the transformer may hide
//! ├── AggregateConfig   - Run naming, expected runs, output retention
//! └── ReportConfig      - Flakiness threshold and report files
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::aggregate::AggregateOptions;
use crate::transform::TransformOptions;

/// Root configuration structure for flakelens.
///
/// # TOML Structure
///
/// ```toml
/// [transform]
/// ignore_all_subtest_failures = true
///
/// [aggregate]
/// expected_runs = 5
/// ignore_parent_failures_on_subtests = true
///
/// [report]
/// max_pass_ratio = 0.95
/// junit = true
/// ```
///
/// # Example
///
/// ```
/// use flakelens::config::Config;
///
/// let config: Config = toml::from_str(r#"
///     [aggregate]
///     expected_runs = 3
/// "#).unwrap();
///
/// assert_eq!(config.aggregate.expected_runs, 3);
/// assert_eq!(config.aggregate.run_prefix, "run");
/// ```
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Transformer settings.
    #[serde(default)]
    pub transform: TransformConfig,

    /// Aggregator settings.
    #[serde(default)]
    pub aggregate: AggregateConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

impl Config {
    /// Transformer options described by the `[transform]` section.
    pub fn transform_options(&self) -> TransformOptions {
        TransformOptions {
            ignore_all_subtest_failures: self.transform.ignore_all_subtest_failures,
            force_propagate_substrings: self.transform.force_propagate_substrings.clone(),
        }
    }

    /// Aggregator options described by the `[aggregate]` and `[transform]`
    /// sections.
    pub fn aggregate_options(&self) -> AggregateOptions {
        AggregateOptions {
            run_prefix: self.aggregate.run_prefix.clone(),
            expected_runs: self.aggregate.expected_runs,
            ignore_parent_failures_on_subtests: self.aggregate.ignore_parent_failures_on_subtests,
            transform: self.transform_options(),
            omit_outputs_on_success: self.aggregate.omit_outputs_on_success,
            transformed_dir: self.aggregate.transformed_dir.clone(),
        }
    }
}

/// Controls which failures the transformer rewrites.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `ignore_all_subtest_failures` | `true` |
/// | `force_propagate_substrings` | `[]` |
///
/// # Example
///
/// ```toml
/// [transform]
/// ignore_all_subtest_failures = true
/// force_propagate_substrings = ["fixture_"]
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct TransformConfig {
    /// Treat every failing subtest as ignorable, so a parent that failed
    /// only because of its subtests is reported as passing.
    ///
    /// Leaf subtest failures are always kept.
    ///
    /// Default: `true`
    #[serde(default = "default_true")]
    pub ignore_all_subtest_failures: bool,

    /// Name substrings that force a failing test to be ignored when the
    /// test, or any of its subtests, matches.
    ///
    /// Meant for fixture-style suites whose parents fail through helpers.
    ///
    /// Default: empty
    #[serde(default)]
    pub force_propagate_substrings: Vec<String>,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            ignore_all_subtest_failures: true,
            force_propagate_substrings: Vec::new(),
        }
    }
}

/// Controls how run files are combined.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `run_prefix` | `"run"` |
/// | `expected_runs` | 1 |
/// | `ignore_parent_failures_on_subtests` | `false` |
/// | `omit_outputs_on_success` | `false` |
/// | `transformed_dir` | None (temporary directory) |
///
/// # Example
///
/// ```toml
/// [aggregate]
/// run_prefix = "attempt"
/// expected_runs = 10
/// ignore_parent_failures_on_subtests = true
/// transformed_dir = "build/transformed"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AggregateConfig {
    /// Prefix for run ids. The Nth file becomes `{run_prefix}{N}`.
    ///
    /// Default: `"run"`
    #[serde(default = "default_run_prefix")]
    pub run_prefix: String,

    /// How many times each test was meant to run.
    ///
    /// Recorded run counts above this, usually caused by a crash being
    /// counted next to the test's own result, are scaled back down.
    ///
    /// Default: 1
    #[serde(default = "default_expected_runs")]
    pub expected_runs: usize,

    /// Transform every run file before aggregating it.
    ///
    /// Default: `false`
    #[serde(default)]
    pub ignore_parent_failures_on_subtests: bool,

    /// Drop the output of passed runs from the results.
    ///
    /// Default: `false`
    #[serde(default)]
    pub omit_outputs_on_success: bool,

    /// Directory for transformed copies of the run files.
    ///
    /// When unset, a temporary directory is used and removed afterwards.
    pub transformed_dir: Option<PathBuf>,
}

impl Default for AggregateConfig {
    fn default() -> Self {
        Self {
            run_prefix: default_run_prefix(),
            expected_runs: default_expected_runs(),
            ignore_parent_failures_on_subtests: false,
            omit_outputs_on_success: false,
            transformed_dir: None,
        }
    }
}

fn default_run_prefix() -> String {
    "run".to_string()
}

fn default_expected_runs() -> usize {
    1
}

/// Configuration for test result reporting.
///
/// # Defaults
///
/// | Field | Default |
/// |-------|---------|
/// | `max_pass_ratio` | 1.0 |
/// | `output_dir` | `"flakelens-results"` |
/// | `json_file` | `"results.json"` |
/// | `junit` | `false` |
/// | `junit_file` | `"junit.xml"` |
///
/// # Example
///
/// ```toml
/// [report]
/// max_pass_ratio = 0.95
/// output_dir = "build/flakes"
/// junit = true
/// junit_file = "flakes.xml"
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ReportConfig {
    /// A test whose pass ratio is below this is flaky.
    ///
    /// Default: 1.0 (any failure makes a test flaky)
    #[serde(default = "default_max_pass_ratio")]
    pub max_pass_ratio: f64,

    /// Directory where report files are written.
    ///
    /// Created automatically if it doesn't exist.
    ///
    /// Default: `"flakelens-results"`
    #[serde(default = "default_report_dir")]
    pub output_dir: PathBuf,

    /// Filename for the JSON report, written to `{output_dir}/{json_file}`.
    ///
    /// Default: `"results.json"`
    #[serde(default = "default_json_file")]
    pub json_file: String,

    /// Whether to generate a JUnit XML report.
    ///
    /// Default: `false`
    #[serde(default)]
    pub junit: bool,

    /// Filename for the JUnit XML report.
    ///
    /// Written to `{output_dir}/{junit_file}`.
    ///
    /// Default: `"junit.xml"`
    #[serde(default = "default_junit_file")]
    pub junit_file: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            max_pass_ratio: default_max_pass_ratio(),
            output_dir: default_report_dir(),
            json_file: default_json_file(),
            junit: false,
            junit_file: default_junit_file(),
        }
    }
}

impl ReportConfig {
    /// Full path of the JSON report.
    pub fn json_path(&self) -> PathBuf {
        self.output_dir.join(&self.json_file)
    }

    /// Full path of the JUnit report.
    pub fn junit_path(&self) -> PathBuf {
        self.output_dir.join(&self.junit_file)
    }
}

fn default_max_pass_ratio() -> f64 {
    1.0
}

fn default_report_dir() -> PathBuf {
    PathBuf::from("flakelens-results")
}

fn default_json_file() -> String {
    "results.json".to_string()
}

fn default_true() -> bool {
    true
}

fn default_junit_file() -> String {
    "junit.xml".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert!(config.transform.ignore_all_subtest_failures);
        assert_eq!(config.aggregate.expected_runs, 1);
        assert_eq!(config.report.max_pass_ratio, 1.0);
        assert_eq!(
            config.report.json_path(),
            PathBuf::from("flakelens-results/results.json")
        );
    }

    #[test]
    fn test_partial_sections_keep_field_defaults() {
        let config: Config = toml::from_str(
            r#"
            [aggregate]
            expected_runs = 4
            transformed_dir = "out/transformed"

            [report]
            junit = true
            "#,
        )
        .unwrap();
        assert_eq!(config.aggregate.run_prefix, "run");
        assert_eq!(
            config.aggregate.transformed_dir,
            Some(PathBuf::from("out/transformed"))
        );
        assert!(config.report.junit);
        assert_eq!(config.report.junit_file, "junit.xml");
    }

    #[test]
    fn test_aggregate_options_carry_transform_section() {
        let config: Config = toml::from_str(
            r#"
            [transform]
            ignore_all_subtest_failures = false
            force_propagate_substrings = ["fixture_"]

            [aggregate]
            run_prefix = "attempt"
            ignore_parent_failures_on_subtests = true
            "#,
        )
        .unwrap();
        let options = config.aggregate_options();
        assert_eq!(options.run_prefix, "attempt");
        assert!(options.ignore_parent_failures_on_subtests);
        assert!(!options.transform.ignore_all_subtest_failures);
        assert_eq!(options.transform.force_propagate_substrings, vec!["fixture_"]);
    }

    #[test]
    fn test_unknown_type_is_rejected() {
        assert!(toml::from_str::<Config>("[aggregate]\nexpected_runs = \"many\"").is_err());
    }
}
