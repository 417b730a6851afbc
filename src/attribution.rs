//! Attribution of unowned panics and data races to the test that caused them.
//!
//! When a Go test binary panics or the race detector fires, the report is
//! printed by the runtime rather than by the test, so the events carrying it
//! are often not tagged with the culprit. These functions recover the test
//! name from the captured output lines.
//!
//! Panic rules, in priority order:
//!
//! 1. `panic: Log in goroutine after TestX/sub has completed:` names the test
//!    directly.
//! 2. `panic: test timed out after 10m0s` switches to timeout mode; the first
//!    line of the following `running tests:` dump whose duration is at least
//!    the timeout names the test.
//! 3. Otherwise the first stack frame of the form `pkg.TestX(` or
//!    `pkg.TestX.func1(` names the test.
//!
//! Races only use rule 3.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;

/// Matches `panic: Log in goroutine after <test> has completed:`.
static LOG_AFTER_TEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^panic: Log in goroutine after (Test\S+) has completed:")
        .expect("static regex is valid")
});

/// Matches `panic: test timed out after <duration>`.
static TIMEOUT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^panic: test timed out after (\S+)").expect("static regex is valid")
});

/// Matches a `running tests:` dump line, e.g. `\tTestSlow (10m0s)`.
static RUNNING_TEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(Test\S+)\s+\((.*)\)").expect("static regex is valid")
});

/// Matches a stack frame naming a test function, e.g.
/// `example.com/pkg_test.TestDeploy(0xc000583c00)` or `pkg.TestRace.func1()`.
static STACK_FRAME_TEST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\.(Test[^\s.(]*)(?:\.[^\s(]+)?\(").expect("static regex is valid")
});

/// Result type for attribution.
pub type AttributionResult<T> = Result<T, AttributionError>;

/// Reasons a crash could not be attributed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttributionError {
    /// The timeout duration on the `panic: test timed out` line is not a
    /// Go duration.
    #[error("failed to parse timeout duration {duration:?} from line: {line}")]
    TimeoutDuration { duration: String, line: String },

    /// A timeout was detected but no running test ran at least as long as
    /// the timeout.
    #[error(
        "detected test timeout after {timeout:?}, but failed to attribute it to a test{}; output:\n{output}",
        candidate_suffix(.candidate)
    )]
    TimeoutUnattributed {
        timeout: Duration,
        candidate: Option<String>,
        output: String,
    },

    /// No rule matched a panic.
    #[error("failed to attribute panic to test using output:\n{output}")]
    Panic { output: String },

    /// No rule matched a race.
    #[error("failed to attribute race to test using output:\n{output}")]
    Race { output: String },
}

impl AttributionError {
    /// Returns `true` if the crash was recognised as a test timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            AttributionError::TimeoutDuration { .. } | AttributionError::TimeoutUnattributed { .. }
        )
    }
}

fn candidate_suffix(candidate: &Option<String>) -> String {
    candidate
        .as_ref()
        .map(|c| format!(" (last candidate seen: {c})"))
        .unwrap_or_default()
}

/// A panic attributed to a test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicAttribution {
    /// The responsible test, possibly a subtest path.
    pub test: String,
    /// Whether the panic was a `go test -timeout` expiry.
    pub timeout: bool,
}

/// Attributes a panic to the test that caused it.
pub fn attribute_panic<S: AsRef<str>>(outputs: &[S]) -> AttributionResult<PanicAttribution> {
    let mut timeout: Option<Duration> = None;
    let mut candidate: Option<String> = None;
    let mut stack_match: Option<String> = None;

    for raw in outputs {
        let line = raw.as_ref().trim();
        if line.is_empty() {
            continue;
        }

        if let Some(caps) = LOG_AFTER_TEST_RE.captures(line) {
            let test = caps[1].to_string();
            tracing::debug!(test = %test, "Attributed panic via log-after-test-completed");
            return Ok(PanicAttribution {
                test,
                timeout: false,
            });
        }

        if let Some(caps) = TIMEOUT_RE.captures(line) {
            let raw_duration = &caps[1];
            let parsed = parse_go_duration(raw_duration).ok_or_else(|| {
                AttributionError::TimeoutDuration {
                    duration: raw_duration.to_string(),
                    line: line.to_string(),
                }
            })?;
            tracing::debug!(timeout = ?parsed, "Detected timeout panic");
            timeout = Some(parsed);
            continue;
        }

        if let Some(limit) = timeout {
            if let Some(caps) = RUNNING_TEST_RE.captures(line) {
                let test = caps[1].to_string();
                match parse_go_duration(caps[2].trim()) {
                    Some(ran) if ran >= limit => {
                        tracing::debug!(test = %test, ran = ?ran, "Attributed timeout panic");
                        return Ok(PanicAttribution {
                            test,
                            timeout: true,
                        });
                    }
                    Some(ran) => {
                        tracing::debug!(test = %test, ran = ?ran, "Running test shorter than timeout");
                    }
                    None => {
                        tracing::warn!(test = %test, line, "Failed to parse running test duration");
                    }
                }
                candidate = Some(test);
            }
            continue;
        }

        if stack_match.is_none()
            && let Some(test) = stack_frame_test(line)
        {
            tracing::debug!(test = %test, line, "Found test name in panic stack");
            stack_match = Some(test);
        }
    }

    if let Some(limit) = timeout {
        return Err(AttributionError::TimeoutUnattributed {
            timeout: limit,
            candidate,
            output: join_outputs(outputs),
        });
    }

    stack_match
        .map(|test| PanicAttribution {
            test,
            timeout: false,
        })
        .ok_or_else(|| AttributionError::Panic {
            output: join_outputs(outputs),
        })
}

/// Attributes a data race to the test whose stack appears first.
pub fn attribute_race<S: AsRef<str>>(outputs: &[S]) -> AttributionResult<String> {
    outputs
        .iter()
        .map(|raw| raw.as_ref().trim())
        .filter(|line| !line.is_empty())
        .find_map(stack_frame_test)
        .inspect(|test| tracing::debug!(test = %test, "Attributed race via stack frame"))
        .ok_or_else(|| AttributionError::Race {
            output: join_outputs(outputs),
        })
}

fn stack_frame_test(line: &str) -> Option<String> {
    STACK_FRAME_TEST_RE
        .captures_iter(line)
        .map(|caps| caps[1].to_string())
        .find(|name| name.starts_with("Test"))
}

fn join_outputs<S: AsRef<str>>(outputs: &[S]) -> String {
    outputs
        .iter()
        .map(|o| o.as_ref().trim_end_matches('\n'))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses a Go `time.Duration` string such as `10m0s`, `1h2m3.5s` or `250ms`.
///
/// Returns `None` for anything Go's `time.ParseDuration` would reject,
/// except that negative durations are also rejected.
pub fn parse_go_duration(s: &str) -> Option<Duration> {
    let s = s.strip_prefix('+').unwrap_or(s);
    if s == "0" {
        return Some(Duration::ZERO);
    }
    if s.is_empty() {
        return None;
    }

    let mut total = 0f64;
    let mut rest = s;
    while !rest.is_empty() {
        let number_len = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let number = &rest[..number_len];
        if number.is_empty() || number == "." {
            return None;
        }
        let value: f64 = number.parse().ok()?;
        rest = &rest[number_len..];

        let unit_len = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let nanos_per_unit = match &rest[..unit_len] {
            "ns" => 1.0,
            "us" | "µs" | "μs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60e9,
            "h" => 3600e9,
            _ => return None,
        };
        rest = &rest[unit_len..];
        total += value * nanos_per_unit;
    }

    Some(Duration::from_nanos(total.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn panic_of(lines: &[&str]) -> AttributionResult<PanicAttribution> {
        attribute_panic(lines)
    }

    #[test]
    fn test_attributes_stack_frame() {
        let got = panic_of(&[
            "panic: This test intentionally panics [recovered]",
            "github.com/org/repo/example_test_package.TestPanic(0x140000b6ea0?)",
        ])
        .unwrap();
        assert_eq!(got.test, "TestPanic");
        assert!(!got.timeout);
    }

    #[test]
    fn test_skips_unqualified_frame() {
        let got = panic_of(&[
            "panic: This test intentionally panics [recovered]",
            "TestPanic(0x140000b6ea0?)",
            "github.com/org/repo/example_test_package.TestPanic(0x140000b6ea0?)",
        ])
        .unwrap();
        assert_eq!(got.test, "TestPanic");
    }

    #[test]
    fn test_closure_frame_names_parent_test() {
        let got = panic_of(&[
            "panic: This subtest always panics",
            "github.com/org/repo/example_test_package.TestSubTestsSomePanic.func2(0x140000c81a0?)",
        ])
        .unwrap();
        assert_eq!(got.test, "TestSubTestsSomePanic");
    }

    #[test]
    fn test_first_stack_frame_wins() {
        let got = panic_of(&[
            "panic: Something went wrong in helper",
            "main.helperFunction()",
            "main.TestInner(0xc00...)",
            "main.TestOuter(0xc00...)",
        ])
        .unwrap();
        assert_eq!(got.test, "TestInner");
    }

    #[test]
    fn test_non_test_frame_not_attributed() {
        let err = panic_of(&[
            "panic: runtime error: invalid memory address or nil pointer dereference\n",
            "github.com/org/repo/core/services/workflows.newTestEngine.func4(0x0)",
        ])
        .unwrap_err();
        assert!(matches!(err, AttributionError::Panic { .. }));
        assert!(!err.is_timeout());
    }

    #[test]
    fn test_log_after_test_completed() {
        let got = panic_of(&[
            "panic: Log in goroutine after Test_workflowRegisteredHandler/skips_fetch has completed: hello",
            "main.TestOther(0xc00...)",
        ])
        .unwrap();
        assert_eq!(got.test, "Test_workflowRegisteredHandler/skips_fetch");
        assert!(!got.timeout);
    }

    #[test]
    fn test_timeout_with_obvious_culprit() {
        let got = panic_of(&[
            "panic: test timed out after 10m0s",
            "running tests",
            "\tTestNoTimeout (9m59s)",
            "\tTestTimedOut (10m0s)",
        ])
        .unwrap();
        assert_eq!(got.test, "TestTimedOut");
        assert!(got.timeout);
    }

    #[test]
    fn test_timeout_first_qualifying_candidate_wins() {
        let got = panic_of(&[
            "panic: test timed out after 5m0s",
            "running tests:",
            "\tTestA (5m0s)",
            "\tTestB (4m59s)",
            "\tTestC (5m1s)",
        ])
        .unwrap();
        assert_eq!(
            got,
            PanicAttribution {
                test: "TestA".to_string(),
                timeout: true
            }
        );
    }

    #[test]
    fn test_timeout_without_culprit() {
        let err = panic_of(&[
            "panic: test timed out after 10m0s\n",
            "\trunning tests:\n",
            "\t\tTestAlmostPanicTime (9m59s)\n",
        ])
        .unwrap_err();
        assert!(err.is_timeout());
        match err {
            AttributionError::TimeoutUnattributed {
                timeout, candidate, ..
            } => {
                assert_eq!(timeout, Duration::from_secs(600));
                assert_eq!(candidate.as_deref(), Some("TestAlmostPanicTime"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_timeout_with_malformed_candidate_duration() {
        let err = panic_of(&[
            "panic: test timed out after 10m0s\n",
            "\trunning tests:\n",
            "\t\tTestAddChain (malformedDurationStr)\n",
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            AttributionError::TimeoutUnattributed { ref candidate, .. } if candidate.as_deref() == Some("TestAddChain")
        ));
    }

    #[test]
    fn test_timeout_with_malformed_duration() {
        let err = panic_of(&["panic: test timed out after malformedDurationStr\n"]).unwrap_err();
        assert!(err.is_timeout());
        assert!(matches!(err, AttributionError::TimeoutDuration { ref duration, .. } if duration == "malformedDurationStr"));
    }

    #[test]
    fn test_empty_output() {
        let err = attribute_panic::<&str>(&[]).unwrap_err();
        assert!(matches!(err, AttributionError::Panic { .. }));
    }

    #[test]
    fn test_error_carries_output() {
        let err = panic_of(&["panic: reflect: Elem of invalid type bool"]).unwrap_err();
        assert!(err.to_string().contains("Elem of invalid type bool"));
    }

    #[test]
    fn test_attribute_race() {
        let got = attribute_race(&[
            "WARNING: DATA RACE",
            "  github.com/org/repo/example_test_package.TestRace.func1()",
        ])
        .unwrap();
        assert_eq!(got, "TestRace");
    }

    #[test]
    fn test_attribute_race_failure() {
        let err = attribute_race(&["WARNING: DATA RACE", "  main.main.func1()"]).unwrap_err();
        assert!(matches!(err, AttributionError::Race { .. }));
        assert!(attribute_race::<&str>(&[]).is_err());
    }

    #[test]
    fn test_parse_go_duration() {
        assert_eq!(parse_go_duration("10m0s"), Some(Duration::from_secs(600)));
        assert_eq!(parse_go_duration("4m59s"), Some(Duration::from_secs(299)));
        assert_eq!(parse_go_duration("1h0m0s"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_go_duration("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_go_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_go_duration("3µs"), Some(Duration::from_micros(3)));
        assert_eq!(parse_go_duration("0"), Some(Duration::ZERO));
        assert_eq!(parse_go_duration(""), None);
        assert_eq!(parse_go_duration("10"), None);
        assert_eq!(parse_go_duration("10x"), None);
        assert_eq!(parse_go_duration("malformedDurationStr"), None);
    }
}
