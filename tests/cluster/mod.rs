//! Configuration for the in-cluster smoke run

use clap::ValueEnum;
use registry_e2e::config::InstallerKind;
use registry_e2e::Flags;
use serde::Deserialize;
use std::error::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterTestConfig {
    pub suite: SuiteSection,
    pub scenarios: ScenarioSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SuiteSection {
    pub installer: String,
    pub suite_id: String,
    #[serde(default)]
    pub only_test_operator: bool,
    #[serde(default)]
    pub disable_clustered_tests: bool,
    #[serde(default)]
    pub disable_converters_tests: bool,
    #[serde(default)]
    pub disable_auth_tests: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScenarioSection {
    #[serde(default)]
    pub focus: String,
}

impl ClusterTestConfig {
    /// Load configuration from tests/cluster/config.toml
    pub fn load() -> Result<Self, Box<dyn Error>> {
        let contents = std::fs::read_to_string("tests/cluster/config.toml")?;
        Ok(toml::from_str(&contents)?)
    }

    pub fn flags(&self) -> Result<Flags, Box<dyn Error>> {
        let installer = <InstallerKind as ValueEnum>::from_str(&self.suite.installer, true)?;
        Ok(Flags {
            installer,
            suite_id: Some(self.suite.suite_id.clone()),
            only_test_operator: self.suite.only_test_operator,
            disable_clustered_tests: self.suite.disable_clustered_tests,
            disable_converters_tests: self.suite.disable_converters_tests,
            disable_auth_tests: self.suite.disable_auth_tests,
            focus: Some(self.scenarios.focus.clone()).filter(|f| !f.is_empty()),
            ..Default::default()
        })
    }
}
