//! Corrections applied once, after every run file has been scanned.
//!
//! | Step | Function |
//! |------|----------|
//! | Parent panics reach their subtests | [`bubble_parent_panics`] |
//! | Run counts clamped to what can have happened | [`reconcile_runs`] |
//! | Package-wide crash flags and output copied onto tests | [`attach_package_state`] |

use std::collections::{BTreeMap, BTreeSet};

use super::result::{TestKey, TestResult};

/// Line prepended to each run reclassified by [`bubble_parent_panics`].
pub const PARENT_PANIC_MARKER: &str = "Panic in parent test";

/// Subtest suffixes seen under each top-level test.
///
/// Built by splitting test paths at their first separator only, so
/// `TestA/one/deep` is recorded as `("TestA", "one/deep")`. A panic in
/// `TestA` reaches every descendant, but a panic attributed to `TestA/one`
/// is not bubbled to `TestA/one/deep`.
pub type SubtestIndex = BTreeMap<TestKey, BTreeSet<String>>;

/// Marks every non-skipped subtest of a panicked top-level test as panicked.
///
/// A subtest that only ever passed has its successes reclassified as
/// failures, and its passed output moved to the failed bucket behind
/// [`PARENT_PANIC_MARKER`].
pub fn bubble_parent_panics(results: &mut BTreeMap<TestKey, TestResult>, subtests: &SubtestIndex) {
    let panicked: Vec<&TestKey> = subtests
        .keys()
        .filter(|key| results.get(*key).is_some_and(|r| r.panic))
        .collect();

    for (package, parent) in panicked {
        for sub in &subtests[&(package.clone(), parent.clone())] {
            let key = (package.clone(), format!("{parent}/{sub}"));
            let Some(result) = results.get_mut(&key) else {
                continue;
            };
            if result.skipped {
                continue;
            }
            result.panic = true;
            if result.failures == 0 && result.successes > 0 {
                tracing::warn!(subtest = %result.key(), "Marking subtest as failed due to parent panic");
                result.failures += result.successes;
                result.successes = 0;
                for (run_id, outputs) in std::mem::take(&mut result.passed_outputs) {
                    let failed = result.failed_outputs.entry(run_id).or_default();
                    failed.push(PARENT_PANIC_MARKER.to_string());
                    failed.extend(outputs);
                }
                result.refresh();
            }
        }
    }
}

/// Clamps a test's run count to what the input can actually support.
///
/// A crashed test process can leave both a crash failure and a terminal
/// action for the same run, or lose events entirely. When `runs` exceeds
/// `expected_runs` or the number of distinct runs that mentioned the test,
/// the counts are rescaled:
///
/// * crashed (panic or race) tests fail every remaining run:
///   `failures = min(expected_runs, runs)`, `successes = 0`;
/// * other tests keep their pass proportion over
///   `min(expected_runs, effective runs)`.
///
/// Skipped tests are never rescaled. `pass_ratio` is recomputed in every
/// case.
pub fn reconcile_runs(result: &mut TestResult, expected_runs: usize) {
    if result.skipped {
        result.refresh();
        return;
    }

    let effective = result.effective_runs();
    if result.runs > expected_runs || result.runs > effective {
        let crashed = result.panic || result.race;
        let target = if crashed {
            expected_runs.min(result.runs)
        } else if effective > 0 {
            expected_runs.min(effective)
        } else {
            expected_runs
        };

        tracing::warn!(
            test = %result.key(),
            actual_runs = result.runs,
            effective_runs = effective,
            expected_runs,
            target,
            "Correcting run count"
        );

        if crashed {
            result.successes = 0;
            result.failures = target;
        } else {
            let successes = result.successes * target / result.runs;
            result.successes = successes;
            result.failures = target.saturating_sub(successes);
        }
    }

    result.refresh();
}

/// Copies package-wide crash flags and package-level output onto a result.
///
/// Skipped tests never inherit the crash flags.
pub fn attach_package_state(
    result: &mut TestResult,
    panicked: &BTreeSet<String>,
    raced: &BTreeSet<String>,
    outputs: &BTreeMap<String, Vec<String>>,
) {
    if !result.skipped {
        result.package_panic = panicked.contains(&result.test_package);
        result.package_race = raced.contains(&result.test_package);
    }
    if let Some(lines) = outputs.get(&result.test_package) {
        result.package_outputs = lines.clone();
    }
}
