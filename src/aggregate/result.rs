//! Per-test aggregate across every run file.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use serde::{Serialize, Serializer};

/// Output lines keyed by run id (`run1`, `run2`, ...).
pub type RunOutputs = BTreeMap<String, Vec<String>>;

/// `(package, test)` identity of a result.
pub type TestKey = (String, String);

/// Line appended to a failed run that captured no output at all.
pub const NO_OUTPUT_PLACEHOLDER: &str = "--- TEST FAILED (no specific output captured) ---";

/// Aggregated outcome of one test over all runs.
///
/// `runs` always equals `successes + failures`; skips are counted
/// separately and never contribute to `runs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TestResult {
    pub test_name: String,
    pub test_package: String,
    pub runs: usize,
    pub successes: usize,
    pub failures: usize,
    pub skips: usize,
    pub skipped: bool,
    pub panic: bool,
    pub timeout: bool,
    pub race: bool,
    pub package_panic: bool,
    pub package_race: bool,
    pub pass_ratio: f64,
    /// One entry per observed `pass`/`fail`, serialized as nanoseconds.
    #[serde(serialize_with = "serialize_nanos")]
    pub durations: Vec<Duration>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub passed_outputs: RunOutputs,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub failed_outputs: RunOutputs,
    /// Output of runs that never reached a terminal action.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub in_flight_outputs: RunOutputs,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub package_outputs: Vec<String>,
}

impl TestResult {
    /// Creates an empty result for `package`/`test`.
    pub fn new(package: impl Into<String>, test: impl Into<String>) -> Self {
        Self {
            test_name: test.into(),
            test_package: package.into(),
            pass_ratio: 1.0,
            ..Self::default()
        }
    }

    /// Returns the `package/test` key.
    pub fn key(&self) -> String {
        format!("{}/{}", self.test_package, self.test_name)
    }

    /// Buffers an output line for a run that has not finished yet.
    pub fn push_in_flight(&mut self, run_id: &str, line: impl Into<String>) {
        self.in_flight_outputs
            .entry(run_id.to_string())
            .or_default()
            .push(line.into());
    }

    /// Records a pass, moving the run's buffered output to the passed bucket.
    pub fn record_pass(&mut self, run_id: &str, elapsed: Duration) {
        let buffered = self.in_flight_outputs.remove(run_id).unwrap_or_default();
        self.passed_outputs
            .entry(run_id.to_string())
            .or_default()
            .extend(buffered);
        self.successes += 1;
        self.durations.push(elapsed);
        self.refresh();
    }

    /// Records a failure, moving the run's buffered output to the failed
    /// bucket. `count` is `false` when a crash already counted this run.
    pub fn record_fail(&mut self, run_id: &str, elapsed: Duration, count: bool) {
        let buffered = self.in_flight_outputs.remove(run_id).unwrap_or_default();
        let failed = self.failed_outputs.entry(run_id.to_string()).or_default();
        failed.extend(buffered);
        if failed.is_empty() {
            failed.push(NO_OUTPUT_PLACEHOLDER.to_string());
        }
        if count {
            self.failures += 1;
            self.durations.push(elapsed);
        }
        self.refresh();
    }

    /// Records a skip and drops the run's buffered output.
    pub fn record_skip(&mut self, run_id: &str) {
        self.in_flight_outputs.remove(run_id);
        self.skips += 1;
        self.skipped = true;
        self.refresh();
    }

    /// Records a crash (panic or race) attributed to this test.
    ///
    /// `block` is appended to the run's failed output. The failure is only
    /// counted when `first_for_run` is set.
    pub fn record_crash(&mut self, run_id: &str, block: Vec<String>, first_for_run: bool) {
        self.failed_outputs
            .entry(run_id.to_string())
            .or_default()
            .extend(block);
        if first_for_run {
            self.failures += 1;
        }
        self.refresh();
    }

    /// Distinct run ids that produced any output or outcome for this test.
    pub fn effective_runs(&self) -> usize {
        self.passed_outputs
            .keys()
            .chain(self.failed_outputs.keys())
            .chain(self.in_flight_outputs.keys())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Recomputes `runs` and `pass_ratio` from the counters.
    pub fn refresh(&mut self) {
        self.runs = self.successes + self.failures;
        self.pass_ratio = pass_ratio(self.successes, self.runs, self.skipped);
    }
}

/// `successes / runs`, or `1.0` for skipped tests and tests with no runs.
pub fn pass_ratio(successes: usize, runs: usize, skipped: bool) -> f64 {
    if skipped || runs == 0 {
        1.0
    } else {
        successes as f64 / runs as f64
    }
}

fn serialize_nanos<S: Serializer>(durations: &[Duration], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(durations.iter().map(|d| d.as_nanos() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pass_then_fail() {
        let mut r = TestResult::new("pkg", "TestA");
        r.push_in_flight("run1", "=== RUN   TestA\n");
        r.record_pass("run1", Duration::from_millis(10));
        r.record_fail("run2", Duration::from_millis(20), true);

        assert_eq!((r.runs, r.successes, r.failures), (2, 1, 1));
        assert_eq!(r.pass_ratio, 0.5);
        assert_eq!(r.passed_outputs["run1"], vec!["=== RUN   TestA\n"]);
        assert_eq!(r.failed_outputs["run2"], vec![NO_OUTPUT_PLACEHOLDER]);
        assert!(r.in_flight_outputs.is_empty());
        assert_eq!(r.durations.len(), 2);
        assert_eq!(r.effective_runs(), 2);
    }

    #[test]
    fn test_skip_discards_output() {
        let mut r = TestResult::new("pkg", "TestC");
        r.push_in_flight("run1", "=== RUN   TestC\n");
        r.record_skip("run1");
        assert_eq!((r.runs, r.skips), (0, 1));
        assert!(r.skipped);
        assert_eq!(r.pass_ratio, 1.0);
        assert_eq!(r.effective_runs(), 0);
    }

    #[test]
    fn test_crash_then_fail_counts_once() {
        let mut r = TestResult::new("pkg", "TestP");
        r.push_in_flight("run1", "=== RUN   TestP\n");
        r.record_crash("run1", vec!["--- PANIC DETECTED ---".into()], true);
        r.record_fail("run1", Duration::ZERO, false);
        assert_eq!((r.runs, r.failures), (1, 1));
        assert_eq!(
            r.failed_outputs["run1"],
            vec!["--- PANIC DETECTED ---", "=== RUN   TestP\n"]
        );
    }

    #[test]
    fn test_serialized_shape() {
        let mut r = TestResult::new("pkg", "TestA");
        r.record_pass("run1", Duration::from_micros(1500));
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["test_name"], "TestA");
        assert_eq!(json["durations"][0], 1_500_000);
        assert!(json.get("failed_outputs").is_none());
        assert!(json.get("in_flight_outputs").is_none());
    }
}
