//! Reporters: JUnit XML for CI dashboards, plus an optional one-line
//! summary appended to a JSON chat message.

use super::runner::{Outcome, SuiteReport};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use tracing::info;

pub fn junit_path(logs_dir: &Path, at: DateTime<Utc>) -> PathBuf {
    logs_dir.join(format!("TEST-junit_{}.xml", at.format("%Y%m%d%H%M%S")))
}

fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

pub fn junit_xml(report: &SuiteReport) -> String {
    let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    // Writing into a String cannot fail
    let _ = writeln!(
        xml,
        "<testsuites tests=\"{}\" failures=\"{}\" skipped=\"{}\" time=\"{:.3}\">",
        report.total(),
        report.failed(),
        report.skipped(),
        report.duration().as_secs_f64()
    );
    let _ = writeln!(
        xml,
        "  <testsuite name=\"{}\" tests=\"{}\" failures=\"{}\" skipped=\"{}\" time=\"{:.3}\" timestamp=\"{}\">",
        escape_xml(&report.suite_name),
        report.total(),
        report.failed(),
        report.skipped(),
        report.duration().as_secs_f64(),
        report.started_at.format("%Y-%m-%dT%H:%M:%S")
    );
    for result in &report.results {
        let open = format!(
            "    <testcase name=\"{}\" classname=\"{}\" time=\"{:.3}\"",
            escape_xml(&result.name),
            escape_xml(&report.suite_id),
            result.duration.as_secs_f64()
        );
        match &result.outcome {
            Outcome::Passed => {
                let _ = writeln!(xml, "{}/>", open);
            }
            Outcome::Failed(message) => {
                let _ = writeln!(xml, "{}>", open);
                let _ = writeln!(
                    xml,
                    "      <failure message=\"{}\">{}</failure>",
                    escape_xml(message),
                    escape_xml(message)
                );
                let _ = writeln!(xml, "    </testcase>");
            }
            Outcome::Skipped(reason) => {
                let _ = writeln!(xml, "{}>", open);
                let _ = writeln!(xml, "      <skipped message=\"{}\"/>", escape_xml(reason));
                let _ = writeln!(xml, "    </testcase>");
            }
        }
    }
    xml.push_str("  </testsuite>\n</testsuites>\n");
    xml
}

/// Write the JUnit report into the run's log tree, returning its path
pub async fn write_junit(logs_dir: &Path, report: &SuiteReport) -> Result<PathBuf> {
    tokio::fs::create_dir_all(logs_dir).await?;
    let path = junit_path(logs_dir, report.started_at);
    tokio::fs::write(&path, junit_xml(report)).await?;
    info!(file = %path.display(), "JUnit report written");
    Ok(path)
}

pub fn summary_line(report: &SuiteReport) -> String {
    format!(
        "\n{} executed. \n{}! -- {} Total | {} Passed | {} Failed | {} Skipped\n",
        report.suite_name,
        if report.succeeded() { "SUCCESS" } else { "FAILED" },
        report.total(),
        report.passed(),
        report.failed(),
        report.skipped()
    )
}

/// Body of the CI chat notification
#[derive(Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CiMessage {
    pub text: String,
}

/// Append this run's summary line to the message in `file`
///
/// Several suites share one file, so an existing message is extended
/// rather than replaced. A missing file starts an empty message.
pub async fn append_summary(file: &Path, report: &SuiteReport) -> Result<()> {
    let mut message = match tokio::fs::read_to_string(file).await {
        Ok(content) if !content.trim().is_empty() => serde_json::from_str::<CiMessage>(&content)?,
        Ok(_) => CiMessage::default(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => CiMessage::default(),
        Err(e) => return Err(e.into()),
    };
    message.text.push_str(&summary_line(report));
    if let Some(parent) = file.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(file, serde_json::to_string(&message)?).await?;
    info!(file = %file.display(), "Summary appended");
    Ok(())
}

#[cfg(test)]
#[path = "report_test.rs"]
mod tests;
