//! Multi-run aggregation of `go test -json` run files.
//!
//! Each run file is one complete execution of the same suite. Files are
//! scanned strictly in order; file `N` (1-based) gets the run id
//! `{run_prefix}{N}`. Per test, the aggregator keeps pass/fail/skip
//! counters and the output of every run, bucketed by outcome.
//!
//! # Crashes
//!
//! Panic and race reports are printed by the Go runtime and are frequently
//! not tagged with the test that caused them. An output line starting with
//! `panic:` or `WARNING: DATA RACE` opens a *capture window* for its
//! package: that line and every later output line of the same package are
//! buffered until a `pass`, `fail` or `skip` arrives for anything in the
//! package. Each package has its own window, so interleaved output of
//! packages tested in parallel is kept apart. The buffer is then handed to [`crate::attribution`], and the
//! resulting test is charged one failure for the run. When attribution
//! fails, a placeholder test named `UnableToAttributePanicInPackage_<pkg>`
//! (or `UnableToAttributeRaceInPackage_<pkg>`) takes the failure instead.
//!
//! # Finishing
//!
//! [`Aggregator::finish`] applies the corrections in [`reconcile`] and
//! returns the results sorted by package, then test name.
//!
//! # Example
//!
//! ```no_run
//! use std::path::PathBuf;
//! use flakelens::aggregate::{AggregateOptions, aggregate};
//!
//! let options = AggregateOptions {
//!     expected_runs: 3,
//!     ..AggregateOptions::default()
//! };
//! let files = vec![
//!     PathBuf::from("run1.json"),
//!     PathBuf::from("run2.json"),
//!     PathBuf::from("run3.json"),
//! ];
//! for result in aggregate(&files, &options)? {
//!     println!("{} {:.2}", result.key(), result.pass_ratio);
//! }
//! # Ok::<(), flakelens::aggregate::AggregateError>(())
//! ```

pub mod reconcile;
pub mod result;

pub use reconcile::{PARENT_PANIC_MARKER, SubtestIndex};
pub use result::{NO_OUTPUT_PLACEHOLDER, RunOutputs, TestKey, TestResult};

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

use crate::attribution::{attribute_panic, attribute_race};
use crate::event::{Action, TestEvent, split_parent};
use crate::transform::{TransformError, TransformOptions, transform_json_lenient};

static PANIC_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^panic:").expect("static regex is valid"));

static RACE_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^WARNING: DATA RACE").expect("static regex is valid"));

/// Result type for aggregation.
pub type AggregateResult<T> = Result<T, AggregateError>;

/// Errors that abort an aggregation.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    /// A run file contained a `build-fail` action. `output` is the full
    /// content of that file.
    #[error("build failed in {}", path.display())]
    BuildFailed { path: PathBuf, output: String },

    #[error("failed to open test output file {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read test output file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to prepare transformed output {}: {source}", path.display())]
    TransformOutput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to transform {} into {}: {source}", input.display(), output.display())]
    Transform {
        input: PathBuf,
        output: PathBuf,
        #[source]
        source: TransformError,
    },
}

impl AggregateError {
    /// Returns `true` for the build-failure sentinel.
    pub fn is_build_failure(&self) -> bool {
        matches!(self, AggregateError::BuildFailed { .. })
    }
}

/// Options for one aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateOptions {
    /// Prefix of run ids; file `N` becomes `{run_prefix}{N}`.
    pub run_prefix: String,
    /// How many times every test was meant to run.
    pub expected_runs: usize,
    /// Transform every file before aggregating, so parents failing only
    /// through ignorable subtests count as passes.
    pub ignore_parent_failures_on_subtests: bool,
    /// Options for that transformation.
    pub transform: TransformOptions,
    /// Drop passed output from the final results.
    pub omit_outputs_on_success: bool,
    /// Where transformed copies are written. A temporary directory, removed
    /// afterwards, is used when unset.
    pub transformed_dir: Option<PathBuf>,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            run_prefix: "run".to_string(),
            expected_runs: 1,
            ignore_parent_failures_on_subtests: false,
            transform: TransformOptions::new(true),
            omit_outputs_on_success: false,
            transformed_dir: None,
        }
    }
}

/// Aggregates run files, transforming them first when configured.
///
/// # Errors
///
/// Returns [`AggregateError::BuildFailed`] as soon as any file contains a
/// `build-fail` action; no partial results are returned. I/O and
/// transformation failures are fatal too. Malformed lines are not.
pub fn aggregate(paths: &[PathBuf], options: &AggregateOptions) -> AggregateResult<Vec<TestResult>> {
    let scratch = if options.ignore_parent_failures_on_subtests && options.transformed_dir.is_none() {
        let dir = tempfile::Builder::new()
            .prefix("flakelens-transformed-")
            .tempdir()
            .map_err(|source| AggregateError::TransformOutput {
                path: std::env::temp_dir(),
                source,
            })?;
        Some(dir)
    } else {
        None
    };

    let inputs = match (
        options.ignore_parent_failures_on_subtests,
        options.transformed_dir.as_deref(),
        scratch.as_ref(),
    ) {
        (true, Some(dir), _) => transform_files(paths, dir, &options.transform)?,
        (true, None, Some(tmp)) => transform_files(paths, tmp.path(), &options.transform)?,
        _ => paths.to_vec(),
    };

    let mut aggregator = Aggregator::new(options.clone());
    for path in &inputs {
        aggregator.add_file(path)?;
    }
    Ok(aggregator.finish())
}

/// Writes a transformed copy of every file into `dir` and returns the new
/// paths, in input order.
///
/// Malformed lines are dropped from the copies, with one warning per file.
pub fn transform_files(
    paths: &[PathBuf],
    dir: &Path,
    options: &TransformOptions,
) -> AggregateResult<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).map_err(|source| AggregateError::TransformOutput {
        path: dir.to_path_buf(),
        source,
    })?;
    tracing::info!(count = paths.len(), dir = %dir.display(), "Transforming run files");

    let mut transformed = Vec::with_capacity(paths.len());
    for (idx, input) in paths.iter().enumerate() {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "run".to_string());
        let output = dir.join(format!("transformed-{idx}-{stem}.json"));

        let reader = File::open(input).map_err(|source| AggregateError::Open {
            path: input.clone(),
            source,
        })?;
        let writer = File::create(&output).map_err(|source| AggregateError::TransformOutput {
            path: output.clone(),
            source,
        })?;

        let summary = transform_json_lenient(BufReader::new(reader), BufWriter::new(writer), options);
        match summary {
            Ok((summary, skipped)) => {
                if let Some(first) = skipped.first() {
                    tracing::warn!(
                        file = %input.display(),
                        line = first.line,
                        error = %first.error,
                        skipped = skipped.len(),
                        "Dropped malformed JSON lines while transforming"
                    );
                }
                tracing::debug!(
                    input = %input.display(),
                    rewritten = summary.rewritten_failures,
                    "Transformed run file"
                );
            }
            Err(source) => {
                if let Err(e) = std::fs::remove_file(&output) {
                    tracing::warn!(file = %output.display(), error = %e, "Failed to remove incomplete transformed file");
                }
                return Err(AggregateError::Transform {
                    input: input.clone(),
                    output,
                    source,
                });
            }
        }
        transformed.push(output);
    }
    Ok(transformed)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CrashKind {
    Panic,
    Race,
}

impl CrashKind {
    fn detect(line: &str) -> Option<Self> {
        if PANIC_START_RE.is_match(line) {
            Some(CrashKind::Panic)
        } else if RACE_START_RE.is_match(line) {
            Some(CrashKind::Race)
        } else {
            None
        }
    }

    fn label(self) -> &'static str {
        match self {
            CrashKind::Panic => "PANIC",
            CrashKind::Race => "RACE",
        }
    }

    fn placeholder(self, package: &str) -> String {
        match self {
            CrashKind::Panic => format!("UnableToAttributePanicInPackage_{package}"),
            CrashKind::Race => format!("UnableToAttributeRaceInPackage_{package}"),
        }
    }
}

/// Output buffered since a crash signature was seen.
#[derive(Debug)]
struct CaptureWindow {
    kind: CrashKind,
    package: String,
    lines: Vec<String>,
}

enum ScanOutcome {
    Complete,
    BuildFailed,
}

/// Incremental, strictly sequential aggregator.
///
/// Feed run files with [`Aggregator::add_file`] in run order, then call
/// [`Aggregator::finish`].
#[derive(Debug)]
pub struct Aggregator {
    options: AggregateOptions,
    files: usize,
    results: BTreeMap<TestKey, TestResult>,
    subtests: SubtestIndex,
    crashed_runs: HashSet<(TestKey, String)>,
    panicked_packages: BTreeSet<String>,
    raced_packages: BTreeSet<String>,
    package_outputs: BTreeMap<String, Vec<String>>,
    captures: BTreeMap<String, CaptureWindow>,
}

impl Aggregator {
    pub fn new(options: AggregateOptions) -> Self {
        Self {
            options,
            files: 0,
            results: BTreeMap::new(),
            subtests: SubtestIndex::new(),
            crashed_runs: HashSet::new(),
            panicked_packages: BTreeSet::new(),
            raced_packages: BTreeSet::new(),
            package_outputs: BTreeMap::new(),
            captures: BTreeMap::new(),
        }
    }

    /// Scans the next run file.
    ///
    /// # Errors
    ///
    /// [`AggregateError::BuildFailed`] carrying the whole file when it holds
    /// a `build-fail` action, or an I/O error wrapped with the path.
    pub fn add_file(&mut self, path: &Path) -> AggregateResult<()> {
        self.files += 1;
        let run_id = format!("{}{}", self.options.run_prefix, self.files);
        tracing::info!(file = %path.display(), run_id = %run_id, "Aggregating run file");

        let file = File::open(path).map_err(|source| AggregateError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let mut reader = BufReader::new(file);

        match self.scan(&run_id, path, &mut reader)? {
            ScanOutcome::Complete => Ok(()),
            ScanOutcome::BuildFailed => {
                let mut file = reader.into_inner();
                let mut raw = Vec::new();
                file.seek(SeekFrom::Start(0))
                    .and_then(|_| file.read_to_end(&mut raw))
                    .map_err(|source| AggregateError::Read {
                        path: path.to_path_buf(),
                        source,
                    })?;
                Err(AggregateError::BuildFailed {
                    path: path.to_path_buf(),
                    output: String::from_utf8_lossy(&raw).into_owned(),
                })
            }
        }
    }

    fn scan<R: BufRead>(
        &mut self,
        run_id: &str,
        path: &Path,
        reader: &mut R,
    ) -> AggregateResult<ScanOutcome> {
        let mut warned = false;
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = reader
                .read_until(b'\n', &mut buf)
                .map_err(|source| AggregateError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
            if read == 0 {
                break;
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let event = match TestEvent::from_json_line(line) {
                Ok(event) => event,
                Err(e) => {
                    if !warned {
                        tracing::warn!(
                            file = %path.display(),
                            error = %e,
                            line,
                            "Failed to parse JSON line, skipping"
                        );
                        warned = true;
                    }
                    continue;
                }
            };

            if event.action == Action::BuildFail {
                self.captures.clear();
                return Ok(ScanOutcome::BuildFailed);
            }
            self.process(run_id, &event);
        }

        let open: Vec<String> = self.captures.keys().cloned().collect();
        for package in open {
            tracing::warn!(
                file = %path.display(),
                package = %package,
                "Crash output not terminated before end of file"
            );
            self.close_capture(run_id, &package);
        }
        Ok(ScanOutcome::Complete)
    }

    fn process(&mut self, run_id: &str, event: &TestEvent) {
        if event.package.is_empty() {
            return;
        }
        let package = event.package.as_str();
        let test = event.test_name();
        if let Some(test) = test {
            self.register(package, test);
        }

        if event.action == Action::Output {
            if let Some(output) = event.output_text() {
                self.process_output(run_id, package, test, output);
            }
            return;
        }

        if !event.action.is_terminal() {
            return;
        }

        self.close_capture(run_id, package);

        let Some(test) = test else {
            return;
        };
        let key = (package.to_string(), test.to_string());
        let crashed = self.crashed_runs.contains(&(key.clone(), run_id.to_string()));
        let elapsed = elapsed_of(event);
        let Some(result) = self.results.get_mut(&key) else {
            return;
        };

        match event.action {
            _ if crashed => result.record_fail(run_id, elapsed, false),
            Action::Pass => result.record_pass(run_id, elapsed),
            Action::Fail => result.record_fail(run_id, elapsed, true),
            Action::Skip => result.record_skip(run_id),
            _ => {}
        }
    }

    fn process_output(&mut self, run_id: &str, package: &str, test: Option<&str>, output: &str) {
        if let Some(window) = self.captures.get_mut(package) {
            window.lines.push(output.to_string());
            return;
        }
        if let Some(kind) = CrashKind::detect(output) {
            match kind {
                CrashKind::Panic => self.panicked_packages.insert(package.to_string()),
                CrashKind::Race => self.raced_packages.insert(package.to_string()),
            };
            tracing::debug!(package, kind = kind.label(), "Opened crash capture window");
            self.captures.insert(
                package.to_string(),
                CaptureWindow {
                    kind,
                    package: package.to_string(),
                    lines: vec![output.to_string()],
                },
            );
            return;
        }

        match test {
            Some(test) => self.register(package, test).push_in_flight(run_id, output),
            None => self
                .package_outputs
                .entry(package.to_string())
                .or_default()
                .push(output.to_string()),
        }
    }

    /// Attributes and closes the capture window of `package`, if one is open.
    fn close_capture(&mut self, run_id: &str, package: &str) {
        let Some(window) = self.captures.remove(package) else {
            return;
        };

        let (test, timeout) = match window.kind {
            CrashKind::Panic => match attribute_panic(&window.lines) {
                Ok(found) => (found.test, found.timeout),
                Err(e) => {
                    tracing::warn!(package = %window.package, error = %e, "Panic attribution failed");
                    (window.kind.placeholder(&window.package), e.is_timeout())
                }
            },
            CrashKind::Race => match attribute_race(&window.lines) {
                Ok(test) => (test, false),
                Err(e) => {
                    tracing::warn!(package = %window.package, error = %e, "Race attribution failed");
                    (window.kind.placeholder(&window.package), false)
                }
            },
        };

        let key = (window.package.clone(), test.clone());
        let first_for_run = self.crashed_runs.insert((key, run_id.to_string()));

        let label = window.kind.label();
        let mut block = Vec::with_capacity(window.lines.len() + 2);
        block.push(format!("--- {label} DETECTED ---"));
        block.extend(window.lines);
        block.push(format!("--- END {label} ---"));

        let result = self.register(&window.package, &test);
        match window.kind {
            CrashKind::Panic => {
                result.panic = true;
                result.timeout |= timeout;
            }
            CrashKind::Race => result.race = true,
        }
        result.record_crash(run_id, block, first_for_run);
    }

    /// Returns the result for `package`/`test`, creating it and indexing
    /// the subtest relation on first sight.
    fn register(&mut self, package: &str, test: &str) -> &mut TestResult {
        if let (parent, Some(sub)) = split_parent(test) {
            self.subtests
                .entry((package.to_string(), parent.to_string()))
                .or_default()
                .insert(sub.to_string());
        }
        self.results
            .entry((package.to_string(), test.to_string()))
            .or_insert_with(|| TestResult::new(package, test))
    }

    /// Applies the post-scan corrections and returns the results sorted by
    /// package, then test name.
    ///
    /// Tests that never reached a terminal action (and were never charged
    /// with a crash) are dropped.
    pub fn finish(mut self) -> Vec<TestResult> {
        reconcile::bubble_parent_panics(&mut self.results, &self.subtests);

        let expected_runs = self.options.expected_runs;
        let mut finished = Vec::with_capacity(self.results.len());
        for (_, mut result) in std::mem::take(&mut self.results) {
            reconcile::reconcile_runs(&mut result, expected_runs);
            if result.runs == 0 && !result.skipped {
                tracing::debug!(test = %result.key(), "Dropping test without outcome");
                continue;
            }
            reconcile::attach_package_state(
                &mut result,
                &self.panicked_packages,
                &self.raced_packages,
                &self.package_outputs,
            );
            if self.options.omit_outputs_on_success {
                result.passed_outputs.clear();
            }
            finished.push(result);
        }
        finished
    }
}

fn elapsed_of(event: &TestEvent) -> Duration {
    match event.elapsed {
        None => Duration::ZERO,
        Some(secs) => Duration::try_from_secs_f64(secs).unwrap_or_else(|e| {
            tracing::warn!(elapsed = secs, error = %e, "Invalid elapsed time");
            Duration::ZERO
        }),
    }
}
