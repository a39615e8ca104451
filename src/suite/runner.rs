//! Sequential scenario runner
//!
//! Scenarios run one after the other. A failing (or panicking) scenario is
//! recorded and the run moves on; nothing short of a bootstrap failure
//! aborts the whole suite.

use super::SuiteContext;
use crate::config::Flags;
use crate::context::catch_panic;
use crate::scenarios::Scenario;
use chrono::{DateTime, Utc};
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(String),
    Skipped(String),
}

#[derive(Debug, Clone)]
pub struct ScenarioResult {
    pub name: String,
    pub outcome: Outcome,
    pub duration: Duration,
}

/// Everything the reporters need about one run
#[derive(Debug, Clone)]
pub struct SuiteReport {
    pub suite_id: String,
    pub suite_name: String,
    pub started_at: DateTime<Utc>,
    pub results: Vec<ScenarioResult>,
}

impl SuiteReport {
    pub fn new(suite_id: impl Into<String>, suite_name: impl Into<String>) -> Self {
        Self {
            suite_id: suite_id.into(),
            suite_name: suite_name.into(),
            started_at: Utc::now(),
            results: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Passed))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped(_)))
    }

    /// No scenario failed. A run where everything was skipped succeeds.
    pub fn succeeded(&self) -> bool {
        self.failed() == 0
    }

    pub fn duration(&self) -> Duration {
        self.results.iter().map(|r| r.duration).sum()
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Why a scenario will not run, if it will not
pub fn skip_reason(scenario: &dyn Scenario, flags: &Flags) -> Option<String> {
    let name = scenario.name();
    if let Some(focus) = flags.focus.as_deref() {
        if !name.contains(focus) {
            return Some(format!("not matching focus \"{}\"", focus));
        }
    }
    if scenario.should_skip(flags) {
        return Some("disabled by suite flags".to_string());
    }
    None
}

pub async fn run_scenarios(suite: &SuiteContext, scenarios: &[Box<dyn Scenario>]) -> SuiteReport {
    let mut report = SuiteReport::new(suite.suite_id.clone(), suite.suite_name());
    info!(suite = %report.suite_name, scenarios = scenarios.len(), "Running scenarios");

    for scenario in scenarios {
        let name = scenario.name();
        if let Some(reason) = skip_reason(scenario.as_ref(), &suite.flags) {
            info!(scenario = %name, reason = %reason, "Skipping scenario");
            report.results.push(ScenarioResult {
                name,
                outcome: Outcome::Skipped(reason),
                duration: Duration::ZERO,
            });
            continue;
        }

        info!(scenario = %name, "Starting scenario");
        let started = Instant::now();
        let outcome = match catch_panic(&name, scenario.run(suite)).await {
            Ok(()) => {
                info!(scenario = %name, elapsed = ?started.elapsed(), "Scenario passed");
                Outcome::Passed
            }
            Err(e) => {
                error!(scenario = %name, elapsed = ?started.elapsed(), error = %e, "Scenario failed");
                Outcome::Failed(e.to_string())
            }
        };
        report.results.push(ScenarioResult {
            name,
            outcome,
            duration: started.elapsed(),
        });
    }

    info!(
        suite = %report.suite_name,
        total = report.total(),
        passed = report.passed(),
        failed = report.failed(),
        skipped = report.skipped(),
        "Scenarios finished"
    );
    report
}

#[cfg(test)]
#[path = "runner_test.rs"]
mod tests;
