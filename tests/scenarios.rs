//! End-to-end runs through the library: transform, aggregate, report.

use std::fs;
use std::path::{Path, PathBuf};

use flakelens::aggregate::{AggregateOptions, aggregate};
use flakelens::event::{Action, TestEvent, read_events};
use flakelens::report::{SummaryData, filter_flaky};
use flakelens::transform::{TransformOptions, transform_json};

fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, content).unwrap();
    path
}

fn options(expected_runs: usize) -> AggregateOptions {
    AggregateOptions {
        expected_runs,
        ..AggregateOptions::default()
    }
}

#[test]
fn test_two_clean_runs() {
    let dir = tempfile::tempdir().unwrap();
    let run = r#"{"Time":"2024-05-01T10:00:00Z","Action":"run","Package":"example","Test":"TestA"}
{"Time":"2024-05-01T10:00:00Z","Action":"output","Package":"example","Test":"TestA","Output":"=== RUN   TestA\n"}
{"Time":"2024-05-01T10:00:00Z","Action":"output","Package":"example","Test":"TestA","Output":"--- PASS: TestA (0.00s)\n"}
{"Time":"2024-05-01T10:00:00Z","Action":"pass","Package":"example","Test":"TestA","Elapsed":0}
{"Time":"2024-05-01T10:00:00Z","Action":"output","Package":"example","Output":"ok  \texample\t0.010s\n"}
{"Time":"2024-05-01T10:00:00Z","Action":"pass","Package":"example","Elapsed":0.01}
"#;
    let files = vec![write(dir.path(), "1.json", run), write(dir.path(), "2.json", run)];

    let results = aggregate(&files, &options(2)).unwrap();
    assert_eq!(results.len(), 1);
    let a = &results[0];
    assert_eq!(a.test_name, "TestA");
    assert_eq!((a.runs, a.successes, a.failures), (2, 2, 0));
    assert_eq!(a.pass_ratio, 1.0);
    assert!(!a.panic && !a.race && !a.package_panic);
    assert_eq!(a.package_outputs.len(), 2);

    let summary = SummaryData::from_results(&results, 1.0);
    assert_eq!(summary.pass_percent, "100%");
    assert!(filter_flaky(&results, 1.0).is_empty());
}

#[test]
fn test_only_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let files = vec![write(
        dir.path(),
        "1.json",
        r#"{"Action":"run","Package":"example","Test":"TestC"}
{"Action":"output","Package":"example","Test":"TestC","Output":"--- SKIP: TestC (0.00s)\n"}
{"Action":"skip","Package":"example","Test":"TestC","Elapsed":0}
"#,
    )];

    let results = aggregate(&files, &options(1)).unwrap();
    let c = &results[0];
    assert_eq!((c.runs, c.skips), (0, 1));
    assert!(c.skipped);
    assert_eq!(c.pass_ratio, 1.0);
    assert_eq!(SummaryData::from_results(&results, 1.0).unique_skipped_test_count, 1);
}

#[test]
fn test_subtest_failure_hidden_from_parent() {
    let input = r#"{"Action":"run","Package":"example","Test":"TestParent"}
{"Action":"run","Package":"example","Test":"TestParent/SubPass"}
{"Action":"pass","Package":"example","Test":"TestParent/SubPass"}
{"Action":"run","Package":"example","Test":"TestParent/SubFail"}
{"Action":"output","Package":"example","Test":"TestParent/SubFail","Output":"    x_test.go:10: boom\n"}
{"Action":"fail","Package":"example","Test":"TestParent/SubFail"}
{"Action":"output","Package":"example","Test":"TestParent","Output":"--- FAIL: TestParent (0.00s)\n"}
{"Action":"fail","Package":"example","Test":"TestParent"}
{"Action":"output","Package":"example","Output":"FAIL\n"}
{"Action":"fail","Package":"example"}
"#;

    let mut output = Vec::new();
    transform_json(input.as_bytes(), &mut output, &TransformOptions::new(true)).unwrap();
    let events = read_events(output.as_slice()).unwrap();

    let terminal = |test: Option<&str>| -> Action {
        events
            .iter()
            .filter(|e| e.action.is_terminal() && e.test_name() == test)
            .map(|e| e.action)
            .next_back()
            .unwrap()
    };
    assert_eq!(terminal(Some("TestParent/SubFail")), Action::Fail);
    assert_eq!(terminal(Some("TestParent/SubPass")), Action::Pass);
    assert_eq!(terminal(Some("TestParent")), Action::Pass);
    assert_eq!(terminal(None), Action::Pass);

    let rewritten: Vec<&TestEvent> = events
        .iter()
        .filter(|e| e.output_text() == Some("--- PASS: TestParent (0.00s)\n"))
        .collect();
    assert_eq!(rewritten.len(), 1);

    let mut again = Vec::new();
    transform_json(output.as_slice(), &mut again, &TransformOptions::new(true)).unwrap();
    assert_eq!(again, output);
}

#[test]
fn test_late_log_panic_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let files = vec![write(
        dir.path(),
        "1.json",
        r#"{"Action":"run","Package":"example","Test":"TestP"}
{"Action":"pass","Package":"example","Test":"TestP","Elapsed":0.1}
{"Action":"output","Package":"example","Output":"panic: Log in goroutine after TestP has completed: late log\n"}
{"Action":"output","Package":"example","Output":"goroutine 7 [running]:\n"}
{"Action":"fail","Package":"example","Elapsed":0.2}
"#,
    )];

    let results = aggregate(&files, &options(2)).unwrap();
    let p = &results[0];
    assert_eq!(p.test_name, "TestP");
    assert!(p.panic);
    // The pass and the crash both landed in run1; a crashed test is
    // charged a failure for every counted run.
    assert_eq!((p.runs, p.successes, p.failures), (2, 0, 2));
    assert_eq!(p.pass_ratio, 0.0);
    assert_eq!(p.failed_outputs["run1"][0], "--- PANIC DETECTED ---");
}
