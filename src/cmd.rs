//! System command execution behind a trait.
//!
//! Both firewall backends drive their userspace tools (`iptables`,
//! `ip6tables`, `nft`) through [`CommandExecutor`], so unit tests can replay
//! tool output without touching the kernel.

use anyhow::{Context, Result};
use std::io::Write;
use std::process::{Command, Output, Stdio};

#[cfg(test)]
use mockall::automock;

/// Captured result of one command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit status was zero
    pub success: bool,
    pub code: Option<i32>,
}

impl CommandOutput {
    /// Stdout on success, otherwise an error carrying stderr.
    pub fn into_stdout(self, program: &str) -> Result<String> {
        if self.success {
            Ok(self.stdout)
        } else {
            anyhow::bail!("{} failed: {}", program, self.stderr.trim())
        }
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
            code: output.status.code(),
        }
    }
}

/// Runs external programs.
#[cfg_attr(test, automock)]
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput>;

    /// Run `cmd`, feeding `stdin` to it (used for `nft -f -` scripts).
    fn execute_with_stdin(&self, cmd: &str, args: &[String], stdin: &str) -> Result<CommandOutput>;
}

/// Executor backed by `std::process::Command`.
#[derive(Debug, Clone, Default)]
pub struct RealCommandExecutor;

impl RealCommandExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for RealCommandExecutor {
    fn execute(&self, cmd: &str, args: &[String]) -> Result<CommandOutput> {
        Command::new(cmd)
            .args(args)
            .output()
            .map(CommandOutput::from)
            .with_context(|| format!("Failed to execute {}", cmd))
    }

    fn execute_with_stdin(
        &self,
        cmd: &str,
        args: &[String],
        stdin_data: &str,
    ) -> Result<CommandOutput> {
        let mut child = Command::new(cmd)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed to spawn {}", cmd))?;

        // Dropping the handle closes the pipe so the tool sees end of input
        if let Some(mut pipe) = child.stdin.take() {
            pipe.write_all(stdin_data.as_bytes())
                .with_context(|| format!("Failed to write script to {}", cmd))?;
        }

        let output = child
            .wait_with_output()
            .with_context(|| format!("Failed to wait for {}", cmd))?;
        Ok(output.into())
    }
}

/// mockall cannot express `&[&str]` lifetimes, so the trait takes owned strings.
pub fn args_to_strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Run `program` and return its stdout, failing on non-zero exit.
pub fn run_checked<E: CommandExecutor + ?Sized>(
    executor: &E,
    program: &str,
    args: &[&str],
) -> Result<String> {
    executor
        .execute(program, &args_to_strings(args))?
        .into_stdout(program)
}

/// Run `program` and report only whether it exited zero.
pub fn run_status<E: CommandExecutor + ?Sized>(executor: &E, program: &str, args: &[&str]) -> bool {
    executor
        .execute(program, &args_to_strings(args))
        .map(|o| o.success)
        .unwrap_or(false)
}
