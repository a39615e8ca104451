use super::*;
use crate::config::SuiteConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Clone, Copy)]
enum Behavior {
    Pass,
    Fail,
    Panic,
}

struct FakeScenario {
    name: &'static str,
    behavior: Behavior,
    disabled: bool,
    runs: Arc<AtomicUsize>,
}

impl FakeScenario {
    fn new(name: &'static str, behavior: Behavior) -> Self {
        Self {
            name,
            behavior,
            disabled: false,
            runs: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }
}

#[async_trait]
impl Scenario for FakeScenario {
    fn name(&self) -> String {
        self.name.to_string()
    }

    fn should_skip(&self, _flags: &Flags) -> bool {
        self.disabled
    }

    async fn run(&self, _suite: &SuiteContext) -> Result<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Pass => Ok(()),
            Behavior::Fail => Err(Error::scenario("registry never became ready")),
            Behavior::Panic => panic!("probe exploded"),
        }
    }
}

fn suite(flags: Flags) -> SuiteContext {
    let config = SuiteConfig::from_lookup(|key| match key {
        "E2E_SUITE_PROJECT_DIR" => Some("/work/suite".to_string()),
        _ => None,
    })
    .expect("config");
    SuiteContext::offline(config, flags)
}

#[tokio::test]
async fn test_run_records_every_outcome_and_keeps_going() {
    // ARRANGE
    let suite = suite(Flags::default());
    let scenarios: Vec<Box<dyn Scenario>> = vec![
        Box::new(FakeScenario::new("sql", Behavior::Pass)),
        Box::new(FakeScenario::new("kafkasql", Behavior::Fail)),
        Box::new(FakeScenario::new("infinispan", Behavior::Panic)),
        Box::new(FakeScenario::new("clustered-sql", Behavior::Pass).disabled()),
        Box::new(FakeScenario::new("migration", Behavior::Pass)),
    ];

    // ACT
    let report = run_scenarios(&suite, &scenarios).await;

    // ASSERT
    let outcomes: Vec<(&str, &Outcome)> = report
        .results
        .iter()
        .map(|r| (r.name.as_str(), &r.outcome))
        .collect();
    assert_eq!(outcomes.len(), 5);
    assert_eq!(outcomes[0], ("sql", &Outcome::Passed));
    assert!(matches!(outcomes[1].1, Outcome::Failed(m) if m.contains("registry never became ready")));
    assert!(matches!(outcomes[2].1, Outcome::Failed(m) if m.contains("probe exploded")));
    assert_eq!(
        outcomes[3],
        ("clustered-sql", &Outcome::Skipped("disabled by suite flags".to_string()))
    );
    assert_eq!(outcomes[4], ("migration", &Outcome::Passed));

    assert_eq!(report.total(), 5);
    assert_eq!(report.passed(), 2);
    assert_eq!(report.failed(), 2);
    assert_eq!(report.skipped(), 1);
    assert!(!report.succeeded());
    assert_eq!(report.suite_id, "bundle");
    assert_eq!(report.suite_name, "Operator bundle Testsuite");
}

#[tokio::test]
async fn test_skipped_scenarios_never_run() {
    // ARRANGE
    let suite = suite(Flags::default());
    let skipped = FakeScenario::new("upgrade", Behavior::Pass).disabled();
    let runs = skipped.runs.clone();
    let scenarios: Vec<Box<dyn Scenario>> = vec![Box::new(skipped)];

    // ACT
    let report = run_scenarios(&suite, &scenarios).await;

    // ASSERT
    assert_eq!(runs.load(Ordering::SeqCst), 0);
    assert_eq!(report.results[0].duration, Duration::ZERO);
    assert!(report.succeeded());
}

#[tokio::test]
async fn test_focus_runs_only_matching_scenarios() {
    // ARRANGE
    let suite = suite(Flags {
        focus: Some("kafkasql".to_string()),
        ..Default::default()
    });
    let matching = FakeScenario::new("clustered-kafkasql", Behavior::Pass);
    let other = FakeScenario::new("sql", Behavior::Pass);
    let (matching_runs, other_runs) = (matching.runs.clone(), other.runs.clone());
    let scenarios: Vec<Box<dyn Scenario>> = vec![Box::new(other), Box::new(matching)];

    // ACT
    let report = run_scenarios(&suite, &scenarios).await;

    // ASSERT
    assert_eq!(matching_runs.load(Ordering::SeqCst), 1);
    assert_eq!(other_runs.load(Ordering::SeqCst), 0);
    assert_eq!(
        report.results[0].outcome,
        Outcome::Skipped("not matching focus \"kafkasql\"".to_string())
    );
    assert_eq!(report.results[1].outcome, Outcome::Passed);
}

#[test]
fn test_focus_mismatch_wins_over_flags() {
    let flags = Flags {
        focus: Some("security".to_string()),
        ..Default::default()
    };
    let disabled = FakeScenario::new("upgrade", Behavior::Pass).disabled();

    assert_eq!(
        skip_reason(&disabled, &flags),
        Some("not matching focus \"security\"".to_string())
    );
}

#[test]
fn test_no_skip_reason_for_enabled_scenario() {
    let scenario = FakeScenario::new("sql", Behavior::Pass);

    assert_eq!(skip_reason(&scenario, &Flags::default()), None);
}

#[test]
fn test_empty_report_succeeds() {
    let report = SuiteReport::new("olm", "Operator olm Testsuite");

    assert_eq!(report.total(), 0);
    assert_eq!(report.duration(), Duration::ZERO);
    assert!(report.succeeded());
}
