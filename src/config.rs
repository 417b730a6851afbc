//! Configuration loading and schema definitions for flakelens.
//!
//! This module provides types and functions for loading flakelens
//! configuration from TOML files or strings. The schema covers the
//! transformer policy, the aggregator and reporting.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Loads flakelens configuration from a TOML file.
///
/// # Arguments
///
/// * `path` - Path to the TOML configuration file
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read (e.g., doesn't exist or permission denied)
/// - The file contains invalid TOML syntax
/// - The configuration doesn't match the expected schema
///
/// # Example
///
/// ```no_run
/// use flakelens::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("flakelens.toml"))?;
/// println!("Expected runs: {}", config.aggregate.expected_runs);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

    Ok(config)
}

/// Loads flakelens configuration from a TOML string.
///
/// # Errors
///
/// Returns an error if the string is not valid TOML or doesn't match the
/// schema.
///
/// # Example
///
/// ```
/// use flakelens::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [aggregate]
///     expected_runs = 5
///
///     [report]
///     max_pass_ratio = 0.9
/// "#)?;
///
/// assert_eq!(config.aggregate.expected_runs, 5);
/// assert!(config.transform.ignore_all_subtest_failures);
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn load_config_str(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config")?;

    Ok(config)
}
