//! Reporting of aggregated results.
//!
//! This module builds the [`TestReport`] written as JSON, computes the
//! [`SummaryData`] statistics and prints the console summary. JUnit XML
//! rendering lives in [`junit`].

pub mod junit;

pub use junit::{render_junit, write_junit};

use std::collections::BTreeSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::aggregate::TestResult;

/// Aggregate statistics over a set of results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SummaryData {
    /// Number of distinct tests in the results.
    pub unique_tests_run: usize,
    /// Number of distinct test names that were skipped in every run.
    pub unique_skipped_test_count: usize,
    /// Highest run count of any single test.
    pub test_run_count: usize,
    pub panicked_tests: usize,
    pub raced_tests: usize,
    /// Panicked, raced, or below the pass-ratio threshold.
    pub flaky_tests: usize,
    pub flaky_test_percent: String,
    /// Sum of every test's run count.
    pub total_runs: usize,
    pub passed_runs: usize,
    pub failed_runs: usize,
    pub skipped_runs: usize,
    pub pass_percent: String,
}

impl SummaryData {
    /// Computes the statistics for `results`.
    ///
    /// A test counts as flaky per [`is_flaky`], so `flaky_tests` always
    /// matches the length of [`filter_flaky`]'s output.
    pub fn from_results(results: &[TestResult], max_pass_ratio: f64) -> Self {
        let mut summary = SummaryData::default();
        let mut fully_skipped = BTreeSet::new();

        for result in results {
            summary.total_runs += result.runs;
            summary.test_run_count = summary.test_run_count.max(result.runs);
            summary.passed_runs += result.successes;
            summary.failed_runs += result.failures;
            summary.skipped_runs += result.skips;

            if result.runs == 0 && result.skipped {
                fully_skipped.insert(result.test_name.as_str());
            }

            if result.panic {
                summary.panicked_tests += 1;
            } else if result.race {
                summary.raced_tests += 1;
            }
            if is_flaky(result, max_pass_ratio) {
                summary.flaky_tests += 1;
            }
        }

        summary.unique_tests_run = results.len();
        summary.unique_skipped_test_count = fully_skipped.len();

        let pass_ratio = if summary.total_runs > 0 {
            summary.passed_runs as f64 / summary.total_runs as f64
        } else {
            1.0
        };
        let flake_ratio = if results.is_empty() {
            0.0
        } else {
            summary.flaky_tests as f64 / results.len() as f64
        };
        summary.pass_percent = format_ratio(pass_ratio);
        summary.flaky_test_percent = format_ratio(flake_ratio);
        summary
    }
}

/// The JSON report: summary, threshold and every result.
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub summary_data: SummaryData,
    pub max_pass_ratio: f64,
    pub results: Vec<TestResult>,
}

impl TestReport {
    pub fn new(results: Vec<TestResult>, max_pass_ratio: f64) -> Self {
        Self {
            summary_data: SummaryData::from_results(&results, max_pass_ratio),
            max_pass_ratio,
            results,
        }
    }

    /// Results that are flaky per [`is_flaky`].
    pub fn flaky(&self) -> Vec<&TestResult> {
        filter_flaky(&self.results, self.max_pass_ratio)
    }

    /// Writes the report as pretty-printed JSON, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        tracing::info!("JSON report written to: {}", path.display());
        Ok(())
    }
}

/// Returns `true` if a test ran, was never skipped, and either crashed
/// (panic or race) or has a pass ratio below `max_pass_ratio`.
pub fn is_flaky(result: &TestResult, max_pass_ratio: f64) -> bool {
    !result.skipped
        && result.runs > 0
        && (result.panic || result.race || result.pass_ratio < max_pass_ratio)
}

/// Keeps the results that are flaky per [`is_flaky`].
pub fn filter_flaky(results: &[TestResult], max_pass_ratio: f64) -> Vec<&TestResult> {
    results
        .iter()
        .filter(|r| is_flaky(r, max_pass_ratio))
        .collect()
}

/// Formats a `0.0..=1.0` ratio as a percentage with up to four decimals.
///
/// Trailing zeros and a trailing dot are dropped: `2/3` is `"66.6667%"`,
/// `1.0` is `"100%"`.
pub fn format_ratio(ratio: f64) -> String {
    let formatted = format!("{:.4}", ratio * 100.0);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed}%")
}

/// Prints a summary of the report to the console.
///
/// Flaky tests are listed with their pass ratio and crash markers.
pub fn print_summary(report: &TestReport) {
    let summary = &report.summary_data;

    println!();
    println!("Test Results:");
    println!("  Unique tests: {}", summary.unique_tests_run);
    println!("  Max runs:     {}", summary.test_run_count);
    println!("  Passed runs:  {}", console::style(summary.passed_runs).green());
    println!("  Failed runs:  {}", console::style(summary.failed_runs).red());
    println!("  Skipped runs: {}", console::style(summary.skipped_runs).yellow());
    println!("  Pass rate:    {}", summary.pass_percent);

    if summary.unique_skipped_test_count > 0 {
        println!(
            "  Always skipped: {}",
            console::style(summary.unique_skipped_test_count).yellow()
        );
    }
    if summary.panicked_tests > 0 {
        println!("  Panicked: {}", console::style(summary.panicked_tests).red().bold());
    }
    if summary.raced_tests > 0 {
        println!("  Raced:    {}", console::style(summary.raced_tests).red().bold());
    }

    let flaky = report.flaky();
    if flaky.is_empty() {
        println!();
        println!("{}", console::style("No flaky tests found.").green().bold());
        return;
    }

    println!(
        "  Flaky:    {} ({})",
        console::style(summary.flaky_tests).yellow(),
        summary.flaky_test_percent
    );
    println!();
    for result in flaky {
        let mut markers = Vec::new();
        if result.panic {
            markers.push("panic");
        }
        if result.timeout {
            markers.push("timeout");
        }
        if result.race {
            markers.push("race");
        }
        let markers = if markers.is_empty() {
            String::new()
        } else {
            format!(" [{}]", markers.join(", "))
        };
        println!(
            "  {} {}/{} of runs passed{}",
            console::style(result.key()).bold(),
            result.successes,
            result.runs,
            console::style(markers).red()
        );
    }
    println!();
    println!("{}", console::style("Flaky tests detected.").yellow().bold());
}
