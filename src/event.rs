//! Wire model for `go test -json` event streams.
//!
//! Each line of a run file is one JSON object emitted by `test2json`:
//!
//! ```text
//! {"Time":"2024-05-01T10:00:00Z","Action":"run","Package":"example","Test":"TestA"}
//! {"Time":"2024-05-01T10:00:00Z","Action":"output","Package":"example","Test":"TestA","Output":"=== RUN   TestA\n"}
//! {"Time":"2024-05-01T10:00:01Z","Action":"pass","Package":"example","Test":"TestA","Elapsed":0.01}
//! ```
//!
//! Events for one test arrive in a legal order (`run`, then any number of
//! `output`/`pause`/`cont`, then exactly one of `pass`/`fail`/`skip`), but
//! events of parallel tests and subtests interleave freely.

use std::io::{BufRead, Write};

use chrono::{DateTime, FixedOffset, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// Separator between components of a hierarchical test path.
pub const TEST_PATH_SEPARATOR: char = '/';

/// The kind of a single test event.
///
/// Serialized as the lowercase strings used by `test2json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    /// The test binary is about to be executed.
    Start,
    /// A test has started running.
    Run,
    /// A parallel test has been paused.
    Pause,
    /// A paused test continues.
    Cont,
    /// A line of console output.
    Output,
    /// The test or package passed.
    Pass,
    /// The test or package failed.
    Fail,
    /// The test was skipped or the package contained no tests.
    Skip,
    /// Benchmark log output.
    Bench,
    /// Compiler output attributed to a package build.
    BuildOutput,
    /// The package failed to build.
    BuildFail,
}

impl Action {
    /// Returns `true` for the actions that end a test: `pass`, `fail` and `skip`.
    pub fn is_terminal(self) -> bool {
        matches!(self, Action::Pass | Action::Fail | Action::Skip)
    }

    /// Returns the wire name of this action.
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Start => "start",
            Action::Run => "run",
            Action::Pause => "pause",
            Action::Cont => "cont",
            Action::Output => "output",
            Action::Pass => "pass",
            Action::Fail => "fail",
            Action::Skip => "skip",
            Action::Bench => "bench",
            Action::BuildOutput => "build-output",
            Action::BuildFail => "build-fail",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single event from a `go test -json` stream.
///
/// Field order matches the order `test2json` writes, so re-serialized
/// events look like the originals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEvent {
    /// When the event was emitted. Informational only, never used for ordering.
    ///
    /// Timestamps without an offset are read as UTC; anything unparseable
    /// becomes `None` rather than rejecting the event.
    #[serde(
        rename = "Time",
        default,
        deserialize_with = "deserialize_time",
        skip_serializing_if = "Option::is_none"
    )]
    pub time: Option<DateTime<FixedOffset>>,

    /// What happened.
    #[serde(rename = "Action")]
    pub action: Action,

    /// Import path of the package the event belongs to.
    #[serde(rename = "Package", default)]
    pub package: String,

    /// Hierarchical test path (`TestParent/SubTest/Nested`), absent for
    /// package-level events.
    #[serde(rename = "Test", default, skip_serializing_if = "Option::is_none")]
    pub test: Option<String>,

    /// Seconds elapsed, present on terminal actions.
    #[serde(rename = "Elapsed", default, skip_serializing_if = "Option::is_none")]
    pub elapsed: Option<f64>,

    /// Output line, present on `output` actions. Includes the trailing newline.
    #[serde(rename = "Output", default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

impl TestEvent {
    /// Creates an event with no timestamp, test path, elapsed time or output.
    pub fn new(action: Action, package: impl Into<String>) -> Self {
        Self {
            time: None,
            action,
            package: package.into(),
            test: None,
            elapsed: None,
            output: None,
        }
    }

    /// Sets the hierarchical test path.
    pub fn with_test(mut self, test: impl Into<String>) -> Self {
        self.test = Some(test.into());
        self
    }

    /// Sets the output line.
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    /// Sets the elapsed seconds.
    pub fn with_elapsed(mut self, elapsed: f64) -> Self {
        self.elapsed = Some(elapsed);
        self
    }

    /// Returns the test path, treating an empty string as absent.
    pub fn test_name(&self) -> Option<&str> {
        self.test.as_deref().filter(|t| !t.is_empty())
    }

    /// Returns the output line, treating an empty string as absent.
    pub fn output_text(&self) -> Option<&str> {
        self.output.as_deref().filter(|o| !o.is_empty())
    }

    /// Parses one NDJSON line.
    pub fn from_json_line(line: &str) -> serde_json::Result<Self> {
        serde_json::from_str(line)
    }
}

fn deserialize_time<'de, D>(deserializer: D) -> Result<Option<DateTime<FixedOffset>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(serde_json::Value::as_str).and_then(parse_time))
}

/// Parses an RFC 3339 timestamp, accepting a missing offset as UTC.
pub fn parse_time(s: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(s).ok().or_else(|| {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc().fixed_offset())
    })
}

/// Splits a test path into its components.
///
/// `"TestA/sub/nested"` yields `["TestA", "sub", "nested"]`.
pub fn split_test_path(test: &str) -> impl Iterator<Item = &str> {
    test.split(TEST_PATH_SEPARATOR)
}

/// Splits a test path at its first separator into `(parent, subtest)`.
///
/// `"TestA/sub/nested"` yields `("TestA", Some("sub/nested"))`.
pub fn split_parent(test: &str) -> (&str, Option<&str>) {
    match test.split_once(TEST_PATH_SEPARATOR) {
        Some((parent, sub)) => (parent, Some(sub)),
        None => (test, None),
    }
}

/// Reads every event from an NDJSON stream.
///
/// Blank lines are skipped. The first malformed line aborts the read; the
/// error carries its 1-based line number.
pub fn read_events<R: BufRead>(reader: R) -> Result<Vec<TestEvent>, EventReadError> {
    let mut events = Vec::new();
    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let event = TestEvent::from_json_line(&line).map_err(|source| EventReadError::Parse {
            line: idx + 1,
            source,
        })?;
        events.push(event);
    }
    Ok(events)
}

/// A line [`read_events_lenient`] could not parse.
#[derive(Debug)]
pub struct SkippedLine {
    /// 1-based line number.
    pub line: usize,
    pub error: serde_json::Error,
}

/// Reads every event from an NDJSON stream, skipping malformed lines.
///
/// Invalid UTF-8 is replaced rather than rejected. Only I/O errors fail the
/// read; unparseable lines are returned alongside the events.
pub fn read_events_lenient<R: BufRead>(
    mut reader: R,
) -> std::io::Result<(Vec<TestEvent>, Vec<SkippedLine>)> {
    let mut events = Vec::new();
    let mut skipped = Vec::new();
    let mut buf = Vec::new();
    let mut line_no = 0;
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        line_no += 1;
        let line = String::from_utf8_lossy(&buf);
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match TestEvent::from_json_line(line) {
            Ok(event) => events.push(event),
            Err(error) => skipped.push(SkippedLine {
                line: line_no,
                error,
            }),
        }
    }
    Ok((events, skipped))
}

/// Writes events as NDJSON, one object per line.
pub fn write_events<W: Write>(mut writer: W, events: &[TestEvent]) -> std::io::Result<()> {
    for event in events {
        serde_json::to_writer(&mut writer, event)?;
        writer.write_all(b"\n")?;
    }
    writer.flush()
}

/// Errors reading an NDJSON event stream.
#[derive(Debug, thiserror::Error)]
pub enum EventReadError {
    /// A line was not a valid event.
    #[error("failed to parse JSON event on line {line}: {source}")]
    Parse {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// The underlying reader failed.
    #[error("error reading input: {0}")]
    Io(#[from] std::io::Error),
}
