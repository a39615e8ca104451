//! External process execution
//!
//! A `Cmd` either inherits the parent's stdout/stderr (diagnostics go
//! straight to the console) or captures stdout for the caller. A non-zero
//! exit is always an error; retries belong to the callers' poll loops.

mod cli;

pub use cli::{to_yaml_stream, CliBinary, KubeCli};

use crate::error::{Error, Result};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

/// One external command invocation
#[derive(Debug, Clone, Default)]
pub struct Cmd {
    pub program: String,
    pub args: Vec<String>,
    /// Extra variables layered over the inherited environment
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    /// Payload written to the child's stdin
    pub stdin: Option<String>,
    /// Capture stdout instead of inheriting it
    pub capture: bool,
}

impl Cmd {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn capture(mut self) -> Self {
        self.capture = true;
        self
    }

    /// Program and arguments joined for logs and error messages
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run to completion
    ///
    /// Returns captured stdout, or an empty string when output was inherited.
    pub async fn run(&self) -> Result<String> {
        info!(command = %self.display(), "Executing command");
        if !self.env.is_empty() {
            debug!(
                env = ?self.env.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>(),
                "Command environment overrides"
            );
        }

        let mut command = Command::new(&self.program);
        command.args(&self.args);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            command.current_dir(dir);
        }

        command.stdin(if self.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        if self.capture {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        } else {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        }

        let mut child = command.spawn().map_err(|e| Error::Command {
            command: self.display(),
            message: e.to_string(),
        })?;

        if let Some(input) = &self.stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes()).await?;
                // Dropping the pipe closes it so the child sees EOF
            }
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::Command {
                command: self.display(),
                message: if stderr.is_empty() {
                    format!("exited with {}", output.status)
                } else {
                    stderr
                },
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

/// Replace `{KEY}` placeholders in a template
pub fn render_template(template: &str, values: &[(&str, &str)]) -> String {
    values
        .iter()
        .fold(template.to_string(), |acc, (key, value)| {
            acc.replace(&format!("{{{}}}", key), value)
        })
}

#[cfg(test)]
#[path = "cmd_test.rs"]
mod tests;
