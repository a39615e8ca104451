//! Error taxonomy for the e2e harness
//!
//! Infrastructure failures are fatal to the scenario that hit them.
//! Not-found during teardown never reaches this type: helpers match
//! `kube::Error::Api(e) if e.code == 404` and treat it as success.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("command `{command}` failed: {message}")]
    Command { command: String, message: String },

    #[error("timed out after {timeout:?} waiting for {what}")]
    Timeout { what: String, timeout: Duration },

    #[error("unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("scenario failed: {0}")]
    Scenario(String),

    #[error("{} cleanup(s) failed: {}", .0.len(), CleanupFailures(.0))]
    Cleanup(Vec<CleanupFailure>),
}

impl Error {
    pub fn timeout(what: impl Into<String>, timeout: Duration) -> Self {
        Error::Timeout {
            what: what.into(),
            timeout,
        }
    }

    pub fn scenario(message: impl Into<String>) -> Self {
        Error::Scenario(message.into())
    }

    /// True for `kube::Error::Api` responses with code 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(err)) if err.code == 404)
    }
}

/// A cleanup step that returned an error
#[derive(Debug)]
pub struct CleanupFailure {
    pub name: String,
    pub error: Error,
}

struct CleanupFailures<'a>(&'a [CleanupFailure]);

impl fmt::Display for CleanupFailures<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "[{}] {}", failure.name, failure.error)?;
        }
        Ok(())
    }
}

/// True when a kube error is a 404 response
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

/// True when a kube error is a 409 "already exists" response
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 409)
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
