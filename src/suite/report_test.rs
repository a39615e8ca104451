use super::*;
use crate::suite::runner::ScenarioResult;
use chrono::TimeZone;
use std::time::Duration;

fn sample_report() -> SuiteReport {
    let mut report = SuiteReport::new("bundle", "Operator bundle Testsuite");
    report.started_at = Utc
        .with_ymd_and_hms(2026, 3, 4, 5, 6, 7)
        .single()
        .expect("timestamp");
    report.results = vec![
        ScenarioResult {
            name: "sql".to_string(),
            outcome: Outcome::Passed,
            duration: Duration::from_millis(1500),
        },
        ScenarioResult {
            name: "kafkasql".to_string(),
            outcome: Outcome::Failed("registry <kafkasql> not \"ready\" & gone".to_string()),
            duration: Duration::from_secs(2),
        },
        ScenarioResult {
            name: "clustered-sql".to_string(),
            outcome: Outcome::Skipped("disabled by suite flags".to_string()),
            duration: Duration::ZERO,
        },
    ];
    report
}

fn temp_file(name: &str) -> PathBuf {
    std::env::temp_dir()
        .join(format!("registry-e2e-{}", uuid::Uuid::new_v4()))
        .join(name)
}

#[test]
fn test_junit_path_is_timestamped() {
    let at = Utc
        .with_ymd_and_hms(2026, 10, 16, 9, 30, 0)
        .single()
        .expect("timestamp");

    assert_eq!(
        junit_path(Path::new("/logs/bundle"), at),
        PathBuf::from("/logs/bundle/TEST-junit_20261016093000.xml")
    );
}

#[test]
fn test_junit_counts_and_cases() {
    // ACT
    let xml = junit_xml(&sample_report());

    // ASSERT
    assert!(xml.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
    assert!(xml.contains(
        "<testsuite name=\"Operator bundle Testsuite\" tests=\"3\" failures=\"1\" skipped=\"1\" time=\"3.500\" timestamp=\"2026-03-04T05:06:07\">"
    ));
    assert!(xml.contains("<testcase name=\"sql\" classname=\"bundle\" time=\"1.500\"/>"));
    assert!(xml.contains("<skipped message=\"disabled by suite flags\"/>"));
    assert!(xml.trim_end().ends_with("</testsuites>"));
}

#[test]
fn test_junit_escapes_failure_messages() {
    let xml = junit_xml(&sample_report());

    assert!(xml.contains(
        "<failure message=\"registry &lt;kafkasql&gt; not &quot;ready&quot; &amp; gone\">"
    ));
    assert!(!xml.contains("<kafkasql>"));
}

#[test]
fn test_summary_line_reports_failure() {
    assert_eq!(
        summary_line(&sample_report()),
        "\nOperator bundle Testsuite executed. \nFAILED! -- 3 Total | 1 Passed | 1 Failed | 1 Skipped\n"
    );
}

#[test]
fn test_summary_line_reports_success_when_nothing_failed() {
    let mut report = sample_report();
    report.results.remove(1);

    assert_eq!(
        summary_line(&report),
        "\nOperator bundle Testsuite executed. \nSUCCESS! -- 2 Total | 1 Passed | 0 Failed | 1 Skipped\n"
    );
}

#[tokio::test]
async fn test_append_summary_creates_then_extends_message() {
    // ARRANGE
    let file = temp_file("summary.json");
    let report = sample_report();

    // ACT
    append_summary(&file, &report).await.expect("first append");
    append_summary(&file, &report).await.expect("second append");

    // ASSERT
    let content = tokio::fs::read_to_string(&file).await.expect("read");
    let message: CiMessage = serde_json::from_str(&content).expect("json");
    let line = summary_line(&report);
    assert_eq!(message.text, format!("{}{}", line, line));

    if let Some(dir) = file.parent() {
        let _ = tokio::fs::remove_dir_all(dir).await;
    }
}

#[tokio::test]
async fn test_append_summary_keeps_existing_text() {
    // ARRANGE
    let file = temp_file("summary.json");
    let dir = file.parent().expect("parent").to_path_buf();
    tokio::fs::create_dir_all(&dir).await.expect("mkdir");
    tokio::fs::write(&file, r#"{"text":"Nightly run"}"#)
        .await
        .expect("seed");

    // ACT
    append_summary(&file, &sample_report()).await.expect("append");

    // ASSERT
    let content = tokio::fs::read_to_string(&file).await.expect("read");
    let message: CiMessage = serde_json::from_str(&content).expect("json");
    assert!(message.text.starts_with("Nightly run\nOperator bundle Testsuite executed."));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}

#[tokio::test]
async fn test_write_junit_lands_in_logs_dir() {
    let file = temp_file("unused");
    let dir = file.parent().expect("parent").to_path_buf();
    let report = sample_report();

    let path = write_junit(&dir, &report).await.expect("write");

    assert_eq!(path, dir.join("TEST-junit_20260304050607.xml"));
    let xml = tokio::fs::read_to_string(&path).await.expect("read");
    assert_eq!(xml, junit_xml(&report));

    let _ = tokio::fs::remove_dir_all(&dir).await;
}
