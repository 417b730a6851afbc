//! flakelens CLI - flaky-test analysis for `go test -json` output.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use flakelens::aggregate::{AggregateError, aggregate};
use flakelens::config::{self, Config};
use flakelens::report::{self, TestReport};
use flakelens::transform::transform_json;

const DEFAULT_CONFIG: &str = "flakelens.toml";

/// Exit code for a build failure in any run file.
const BUILD_FAILED_EXIT_CODE: i32 = 2;

#[derive(Parser)]
#[command(name = "flakelens")]
#[command(about = "Flaky-test analysis for go test -json output", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path [default: flakelens.toml, if present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rewrite one run so parents failing only through subtests pass
    Transform {
        /// Input NDJSON file, or - for stdin
        #[arg(short, long, default_value = "-")]
        input: String,

        /// Output NDJSON file, or - for stdout
        #[arg(short, long, default_value = "-")]
        output: String,
    },

    /// Aggregate run files into per-test results
    Aggregate {
        /// Run files, or directories of *.json run files
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Override the number of runs each test was meant to have
        #[arg(long)]
        expected_runs: Option<usize>,

        /// Override the run id prefix
        #[arg(long)]
        run_prefix: Option<String>,

        /// Transform every run file before aggregating it
        #[arg(long)]
        ignore_parent_failures_on_subtests: bool,

        /// Drop the output of passed runs
        #[arg(long)]
        omit_outputs_on_success: bool,

        /// Override the pass ratio below which a test is flaky
        #[arg(long)]
        max_pass_ratio: Option<f64>,

        /// Also write a JUnit XML report
        #[arg(long)]
        junit: bool,

        /// Override the report output directory
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Exit with status 1 when any flaky test is found
        #[arg(long)]
        fail_on_flaky: bool,
    },

    /// Validate configuration file and print the effective settings
    Validate,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_effective_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Transform { input, output } => run_transform(&config, &input, &output),
        Commands::Aggregate {
            paths,
            expected_runs,
            run_prefix,
            ignore_parent_failures_on_subtests,
            omit_outputs_on_success,
            max_pass_ratio,
            junit,
            output_dir,
            fail_on_flaky,
        } => {
            let mut config = config;
            if let Some(expected_runs) = expected_runs {
                config.aggregate.expected_runs = expected_runs;
            }
            if let Some(run_prefix) = run_prefix {
                config.aggregate.run_prefix = run_prefix;
            }
            if ignore_parent_failures_on_subtests {
                config.aggregate.ignore_parent_failures_on_subtests = true;
            }
            if omit_outputs_on_success {
                config.aggregate.omit_outputs_on_success = true;
            }
            if let Some(max_pass_ratio) = max_pass_ratio {
                config.report.max_pass_ratio = max_pass_ratio;
            }
            if junit {
                config.report.junit = true;
            }
            if let Some(output_dir) = output_dir {
                config.report.output_dir = output_dir;
            }
            run_aggregate(&config, &paths, fail_on_flaky)
        }
        Commands::Validate => validate_config(&config),
    }
}

fn load_effective_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            info!("Loaded configuration from {}", DEFAULT_CONFIG);
            config::load_config(Path::new(DEFAULT_CONFIG))
        }
        None => Ok(Config::default()),
    }
}

fn run_transform(config: &Config, input: &str, output: &str) -> Result<()> {
    let reader: Box<dyn BufRead> = if input == "-" {
        Box::new(std::io::stdin().lock())
    } else {
        let file =
            File::open(input).with_context(|| format!("Failed to open input file {input}"))?;
        Box::new(BufReader::new(file))
    };
    let writer: Box<dyn Write> = if output == "-" {
        Box::new(std::io::stdout().lock())
    } else {
        let file = File::create(output)
            .with_context(|| format!("Failed to create output file {output}"))?;
        Box::new(BufWriter::new(file))
    };

    let summary = transform_json(reader, writer, &config.transform_options())
        .context("Failed to transform test output")?;
    info!(
        "Transformed {} events, rewrote {} failures",
        summary.events, summary.rewritten_failures
    );
    Ok(())
}

fn run_aggregate(config: &Config, paths: &[PathBuf], fail_on_flaky: bool) -> Result<()> {
    let files = collect_run_files(paths)?;
    info!("Aggregating {} run files", files.len());

    let results = match aggregate(&files, &config.aggregate_options()) {
        Ok(results) => results,
        Err(AggregateError::BuildFailed { path, output }) => {
            eprintln!(
                "--- Build Error in {} ---\n{}\n-------------------------",
                path.display(),
                output
            );
            std::process::exit(BUILD_FAILED_EXIT_CODE);
        }
        Err(e) => return Err(e).context("Failed to aggregate test results"),
    };

    let report = TestReport::new(results, config.report.max_pass_ratio);
    report.save(&config.report.json_path())?;
    if config.report.junit {
        report::write_junit(&report.results, &config.report.junit_path())?;
    }
    report::print_summary(&report);

    if fail_on_flaky && !report.flaky().is_empty() {
        std::process::exit(1);
    }
    Ok(())
}

/// Expands directories into their `*.json` files, sorted by name.
fn collect_run_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut found = Vec::new();
            for entry in std::fs::read_dir(path)
                .with_context(|| format!("Failed to read directory {}", path.display()))?
            {
                let entry_path = entry?.path();
                if entry_path.is_file() && entry_path.extension().is_some_and(|ext| ext == "json") {
                    found.push(entry_path);
                }
            }
            found.sort();
            files.extend(found);
        } else {
            files.push(path.clone());
        }
    }

    if files.is_empty() {
        bail!("No run files found");
    }
    Ok(files)
}

fn validate_config(config: &Config) -> Result<()> {
    println!("Configuration is valid!");
    println!();
    println!("Settings:");
    println!(
        "  Ignore all subtest failures: {}",
        config.transform.ignore_all_subtest_failures
    );
    println!("  Run prefix: {}", config.aggregate.run_prefix);
    println!("  Expected runs: {}", config.aggregate.expected_runs);
    println!(
        "  Ignore parent failures on subtests: {}",
        config.aggregate.ignore_parent_failures_on_subtests
    );
    println!("  Max pass ratio: {}", config.report.max_pass_ratio);
    println!("  JSON report: {}", config.report.json_path().display());
    if config.report.junit {
        println!("  JUnit report: {}", config.report.junit_path().display());
    }
    println!();
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
