//! JUnit XML rendering of aggregated results.
//!
//! One `<testsuite>` per Go package, one `<testcase>` per test. A test with
//! at least one failed run carries a `<failure>` holding the output of each
//! failed run; a test that was only ever skipped carries `<skipped/>`.
//!
//! ```xml
//! <?xml version="1.0" encoding="UTF-8"?>
//! <testsuites tests="2" failures="1" skipped="0" time="0.300">
//!   <testsuite name="example.com/pkg" tests="2" failures="1" skipped="0" time="0.300">
//!     <testcase classname="example.com/pkg" name="TestA" time="0.100"/>
//!     <testcase classname="example.com/pkg" name="TestB" time="0.200">
//!       <failure message="1 of 2 runs failed" type="failure">...</failure>
//!     </testcase>
//!   </testsuite>
//! </testsuites>
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};

use crate::aggregate::TestResult;

/// Renders `results` as a JUnit XML document.
pub fn render_junit(results: &[TestResult]) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

    let mut packages: BTreeMap<&str, Vec<&TestResult>> = BTreeMap::new();
    for result in results {
        packages
            .entry(result.test_package.as_str())
            .or_default()
            .push(result);
    }

    let all: Vec<&TestResult> = results.iter().collect();
    let mut testsuites = BytesStart::new("testsuites");
    push_counts(&mut testsuites, &all);
    writer.write_event(Event::Start(testsuites))?;

    for (package, tests) in &packages {
        let mut testsuite = BytesStart::new("testsuite");
        testsuite.push_attribute(("name", *package));
        push_counts(&mut testsuite, tests);
        writer.write_event(Event::Start(testsuite))?;

        for result in tests {
            write_testcase(&mut writer, result)?;
        }

        writer.write_event(Event::End(BytesEnd::new("testsuite")))?;
    }

    writer.write_event(Event::End(BytesEnd::new("testsuites")))?;

    let xml = String::from_utf8(writer.into_inner())?;
    Ok(xml)
}

/// Renders `results` and writes them to `path`, creating parent directories.
pub fn write_junit(results: &[TestResult], path: &Path) -> Result<()> {
    let xml = render_junit(results).context("Failed to generate JUnit XML")?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, xml)
        .with_context(|| format!("Failed to write JUnit XML to {}", path.display()))?;
    tracing::info!("JUnit XML written to: {}", path.display());
    Ok(())
}

fn push_counts(element: &mut BytesStart<'_>, tests: &[&TestResult]) {
    let failures = tests.iter().filter(|r| r.failures > 0).count();
    let skipped = tests.iter().filter(|r| only_skipped(r)).count();
    let time: Duration = tests.iter().map(|r| total_time(r)).sum();
    element.push_attribute(("tests", tests.len().to_string().as_str()));
    element.push_attribute(("failures", failures.to_string().as_str()));
    element.push_attribute(("skipped", skipped.to_string().as_str()));
    element.push_attribute(("time", format!("{:.3}", time.as_secs_f64()).as_str()));
}

fn write_testcase<W: std::io::Write>(writer: &mut Writer<W>, result: &TestResult) -> Result<()> {
    let mut testcase = BytesStart::new("testcase");
    testcase.push_attribute(("classname", result.test_package.as_str()));
    testcase.push_attribute(("name", result.test_name.as_str()));
    testcase.push_attribute((
        "time",
        format!("{:.3}", total_time(result).as_secs_f64()).as_str(),
    ));

    if result.failures > 0 {
        writer.write_event(Event::Start(testcase))?;

        let mut failure = BytesStart::new("failure");
        let message = format!("{} of {} runs failed", result.failures, result.runs);
        failure.push_attribute(("message", message.as_str()));
        failure.push_attribute(("type", failure_type(result)));
        writer.write_event(Event::Start(failure))?;
        writer.write_event(Event::Text(BytesText::new(&sanitize(&failure_text(result)))))?;
        writer.write_event(Event::End(BytesEnd::new("failure")))?;

        writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    } else if only_skipped(result) {
        writer.write_event(Event::Start(testcase))?;
        writer.write_event(Event::Empty(BytesStart::new("skipped")))?;
        writer.write_event(Event::End(BytesEnd::new("testcase")))?;
    } else {
        writer.write_event(Event::Empty(testcase))?;
    }

    Ok(())
}

fn only_skipped(result: &TestResult) -> bool {
    result.skipped && result.runs == 0
}

fn total_time(result: &TestResult) -> Duration {
    result.durations.iter().sum()
}

fn failure_type(result: &TestResult) -> &'static str {
    if result.timeout {
        "timeout"
    } else if result.panic {
        "panic"
    } else if result.race {
        "race"
    } else {
        "failure"
    }
}

fn failure_text(result: &TestResult) -> String {
    let mut text = String::new();
    for (run_id, lines) in &result.failed_outputs {
        text.push_str(&format!("=== {run_id} ===\n"));
        for line in lines {
            text.push_str(line);
            if !line.ends_with('\n') {
                text.push('\n');
            }
        }
    }
    text
}

/// Removes characters that are not allowed in XML 1.0 documents.
fn sanitize(s: &str) -> String {
    s.chars()
        .filter(|c| matches!(c, '\t' | '\n' | '\r' | ' '..='\u{D7FF}' | '\u{E000}'..='\u{FFFD}' | '\u{10000}'..='\u{10FFFF}'))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passed(package: &str, test: &str) -> TestResult {
        let mut r = TestResult::new(package, test);
        r.record_pass("run1", Duration::from_millis(100));
        r
    }

    #[test]
    fn test_one_suite_per_package() {
        let results = vec![passed("alpha", "TestA"), passed("beta", "TestB"), passed("alpha", "TestC")];
        let xml = render_junit(&results).unwrap();
        assert_eq!(xml.matches("<testsuite ").count(), 2);
        assert!(xml.contains(r#"<testsuite name="alpha" tests="2" failures="0" skipped="0" time="0.200">"#));
        assert!(xml.contains(r#"<testcase classname="beta" name="TestB" time="0.100"/>"#));
    }

    #[test]
    fn test_failure_carries_output() {
        let mut r = TestResult::new("pkg", "TestBoom");
        r.push_in_flight("run2", "    boom_test.go:3: x < y\n");
        r.record_fail("run2", Duration::ZERO, true);
        r.panic = true;
        let xml = render_junit(&[r]).unwrap();
        assert!(xml.contains(r#"<failure message="1 of 1 runs failed" type="panic">"#));
        assert!(xml.contains("=== run2 ==="));
        assert!(xml.contains("x &lt; y"));
    }

    #[test]
    fn test_skipped_only() {
        let mut r = TestResult::new("pkg", "TestSkip");
        r.record_skip("run1");
        let xml = render_junit(&[r]).unwrap();
        assert!(xml.contains("<skipped/>"));
        assert!(xml.contains(r#"skipped="1""#));
    }

    #[test]
    fn test_sanitize_drops_control_characters() {
        assert_eq!(sanitize("a\u{1b}[31mb\n"), "a[31mb\n");
    }

    #[test]
    fn test_write_junit_creates_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("junit.xml");
        write_junit(&[passed("pkg", "TestA")], &path).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().starts_with("<?xml"));
    }
}
