use anyhow::Context as _;
use clap::Parser;
use registry_e2e::suite::report;
use registry_e2e::suite::runner::SuiteReport;
use registry_e2e::{Flags, Suite, SuiteConfig};
use std::process::ExitCode;
use tracing::{error, info, warn};

/// End-to-end suite for the Apicurio Registry operator
#[derive(Parser, Debug)]
#[command(name = "registry-e2e", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub flags: Flags,
}

/// The run passed when no scenario failed and teardown went through
pub fn run_succeeded(report: &SuiteReport, teardown_ok: bool) -> bool {
    report.succeeded() && teardown_ok
}

/// Write the JUnit report and extend the CI summary, logging failures
async fn publish(report: &SuiteReport, logs_dir: &std::path::Path, summary_file: Option<&std::path::Path>) {
    match report::write_junit(logs_dir, report).await {
        Ok(path) => info!(path = %path.display(), "JUnit report written"),
        Err(e) => warn!(error = %e, "Failed to write JUnit report"),
    }
    if let Some(file) = summary_file {
        if let Err(e) = report::append_summary(file, report).await {
            warn!(file = %file.display(), error = %e, "Failed to append CI summary");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = SuiteConfig::from_env().context("Invalid suite configuration")?;
    let summary_file = config.summary_file.clone();

    info!(installer = ?cli.flags.installer, focus = ?cli.flags.focus, "Starting registry operator e2e suite");
    let suite = Suite::bootstrap(config, cli.flags)
        .await
        .context("Suite bootstrap failed")?;
    let logs_dir = suite.ctx.logs_dir();

    let report = suite.run().await;
    let teardown = suite.teardown().await;
    if let Err(e) = &teardown {
        error!(error = %e, "Suite teardown failed");
    }

    publish(&report, &logs_dir, summary_file.as_deref()).await;
    info!("{}", report::summary_line(&report).trim());

    Ok(if run_succeeded(&report, teardown.is_ok()) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
