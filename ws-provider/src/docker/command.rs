//! Docker CLI invocation with consistent error reporting.

use crate::error::{ProviderError, Result};
use std::path::PathBuf;
use std::process::Output;
use tokio::process::Command;
use tracing::debug;

/// Builder for a single `docker <subcommand> ...` invocation.
#[derive(Debug, Clone)]
pub struct DockerCommand {
    program: PathBuf,
    subcommand: Option<String>,
    args: Vec<String>,
}

impl DockerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            subcommand: None,
            args: Vec::new(),
        }
    }

    /// Set the Docker subcommand (e.g., "run", "port", "rm").
    pub fn subcommand<S: Into<String>>(mut self, cmd: S) -> Self {
        self.subcommand = Some(cmd.into());
        self
    }

    pub fn arg<S: Into<String>>(mut self, arg: S) -> Self {
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

    /// Run the command and return trimmed stdout, failing on a non-zero exit.
    pub async fn execute_with_output(self) -> Result<String> {
        let label = self.label();
        let output = self.execute_raw().await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(ProviderError::CommandFailed(format!(
                "{label} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }

    /// Run the command and hand back the raw output, whatever the exit status.
    pub async fn execute_raw(self) -> Result<Output> {
        let label = self.label();
        let mut cmd = self.build_command();

        debug!("Executing Docker command: {:?}", &cmd);

        cmd.output()
            .await
            .map_err(|e| ProviderError::CommandFailed(format!("{label}: {e}")))
    }

    fn label(&self) -> String {
        format!(
            "docker {}",
            self.subcommand.as_deref().unwrap_or_default()
        )
    }

    fn build_command(self) -> Command {
        let mut cmd = Command::new(self.program);

        if let Some(subcmd) = self.subcommand {
            cmd.arg(subcmd);
        }

        cmd.args(self.args);
        // A launch abandoned at its deadline must not leave the CLI running.
        cmd.kill_on_drop(true);

        cmd
    }
}
