use std::fs;
use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;

const PARENT_WITH_FAILING_SUBTEST: &str = r#"{"Action":"run","Package":"example","Test":"TestParent"}
{"Action":"run","Package":"example","Test":"TestParent/SubPass"}
{"Action":"pass","Package":"example","Test":"TestParent/SubPass","Elapsed":0}
{"Action":"run","Package":"example","Test":"TestParent/SubFail"}
{"Action":"output","Package":"example","Test":"TestParent/SubFail","Output":"    x_test.go:10: SubFail failed\n"}
{"Action":"fail","Package":"example","Test":"TestParent/SubFail","Elapsed":0}
{"Action":"output","Package":"example","Test":"TestParent","Output":"--- FAIL: TestParent (0.00s)\n"}
{"Action":"fail","Package":"example","Test":"TestParent","Elapsed":0}
{"Action":"output","Package":"example","Output":"FAIL\n"}
{"Action":"fail","Package":"example","Elapsed":0.01}
"#;

fn flakelens(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("flakelens").unwrap();
    cmd.current_dir(dir);
    cmd
}

#[test]
fn test_transform_stdin_to_stdout() {
    let dir = tempfile::tempdir().unwrap();
    flakelens(dir.path())
        .arg("transform")
        .write_stdin(PARENT_WITH_FAILING_SUBTEST)
        .assert()
        .success()
        .stdout(predicate::str::contains(
            r#"{"Action":"fail","Package":"example","Test":"TestParent/SubFail","Elapsed":0.0}"#,
        ))
        .stdout(predicate::str::contains(
            r#"{"Action":"pass","Package":"example","Test":"TestParent","Elapsed":0.0}"#,
        ))
        .stdout(predicate::str::contains("--- PASS: TestParent (0.00s)"))
        .stdout(predicate::str::contains(
            r#"{"Action":"pass","Package":"example","Elapsed":0.01}"#,
        ));
}

#[test]
fn test_transform_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("in.json"), PARENT_WITH_FAILING_SUBTEST).unwrap();

    flakelens(dir.path())
        .args(["transform", "--input", "in.json", "--output", "out.json"])
        .assert()
        .success();

    let out = fs::read_to_string(dir.path().join("out.json")).unwrap();
    assert_eq!(out.lines().count(), 10);
    assert_eq!(out.matches(r#""Action":"fail""#).count(), 1);
}

#[test]
fn test_transform_rejects_malformed_input() {
    let dir = tempfile::tempdir().unwrap();
    flakelens(dir.path())
        .arg("transform")
        .write_stdin("not json\n")
        .assert()
        .failure()
        .stderr(predicate::str::contains("line 1"));
}

#[test]
fn test_aggregate_writes_report() {
    let dir = tempfile::tempdir().unwrap();
    let runs = dir.path().join("runs");
    fs::create_dir(&runs).unwrap();
    fs::write(
        runs.join("1.json"),
        "{\"Action\":\"run\",\"Package\":\"example\",\"Test\":\"TestA\"}\n\
         {\"Action\":\"pass\",\"Package\":\"example\",\"Test\":\"TestA\",\"Elapsed\":0.1}\n",
    )
    .unwrap();
    fs::write(
        runs.join("2.json"),
        "{\"Action\":\"run\",\"Package\":\"example\",\"Test\":\"TestA\"}\n\
         {\"Action\":\"fail\",\"Package\":\"example\",\"Test\":\"TestA\",\"Elapsed\":0.1}\n",
    )
    .unwrap();
    fs::write(runs.join("notes.txt"), "ignored").unwrap();

    flakelens(dir.path())
        .args(["aggregate", "runs", "--expected-runs", "2", "--junit"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Flaky tests detected."));

    let report: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(dir.path().join("flakelens-results/results.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(report["summary_data"]["unique_tests_run"], 1);
    assert_eq!(report["summary_data"]["pass_percent"], "50%");
    assert_eq!(report["results"][0]["runs"], 2);
    assert!(report["results"][0]["failed_outputs"]["run2"].is_array());
    assert!(dir.path().join("flakelens-results/junit.xml").exists());
}

#[test]
fn test_aggregate_fail_on_flaky() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("run.json"),
        "{\"Action\":\"fail\",\"Package\":\"example\",\"Test\":\"TestA\"}\n",
    )
    .unwrap();

    flakelens(dir.path())
        .args(["aggregate", "run.json", "--fail-on-flaky"])
        .assert()
        .code(1);
}

#[test]
fn test_aggregate_build_failure_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("run.json"),
        "{\"Action\":\"build-output\",\"Package\":\"example\",\"Output\":\"main.go:3:2: undefined: nope\\n\"}\n\
         {\"Action\":\"build-fail\",\"Package\":\"example\"}\n",
    )
    .unwrap();

    flakelens(dir.path())
        .args(["aggregate", "run.json"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--- Build Error in"))
        .stderr(predicate::str::contains("undefined: nope"));

    assert!(!dir.path().join("flakelens-results").exists());
}

#[test]
fn test_aggregate_requires_run_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::create_dir(dir.path().join("empty")).unwrap();
    flakelens(dir.path())
        .args(["aggregate", "empty"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No run files found"));
}

#[test]
fn test_validate_reads_default_config() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("flakelens.toml"),
        "[aggregate]\nexpected_runs = 7\n",
    )
    .unwrap();

    flakelens(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid!"))
        .stdout(predicate::str::contains("Expected runs: 7"));
}

#[test]
fn test_validate_rejects_bad_config() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("bad.toml"), "[aggregate]\nexpected_runs = \"x\"\n").unwrap();

    flakelens(dir.path())
        .args(["--config", "bad.toml", "validate"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load config"));
}
