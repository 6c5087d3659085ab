//! External command execution.
//!
//! Module loading (`modprobe`) and label lookups (`lsblk`) go through the
//! [`CommandRunner`] trait so the provisioner can be exercised without root
//! privileges or real block devices.

use std::future::Future;
use std::io;

use tokio::process::Command;
use tracing::debug;

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output with the given exit code and stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// Return stdout on success, or a message built from `context` and stderr.
    pub fn check(&self, context: &str) -> Result<&str, String> {
        if self.success {
            return Ok(&self.stdout);
        }
        let stderr = self.stderr.trim();
        match self.code {
            Some(code) if stderr.is_empty() => Err(format!("{}: exit status {}", context, code)),
            Some(code) => Err(format!("{}: exit status {}: {}", context, code, stderr)),
            None => Err(format!("{}: terminated by signal", context)),
        }
    }
}

/// Runs external programs.
pub trait CommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[&str],
    ) -> impl Future<Output = io::Result<CommandOutput>> + Send;
}

/// Runs commands on the host, optionally through `sudo`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner {
    sudo: bool,
}

impl SystemRunner {
    pub fn new(sudo: bool) -> Self {
        Self { sudo }
    }
}

impl CommandRunner for SystemRunner {
    async fn run(&self, program: &str, args: &[&str]) -> io::Result<CommandOutput> {
        let mut cmd = if self.sudo {
            let mut cmd = Command::new("sudo");
            cmd.arg(program);
            cmd
        } else {
            Command::new(program)
        };
        cmd.args(args);

        debug!(program, ?args, sudo = self.sudo, "Running command");
        let output = cmd.output().await?;

        Ok(CommandOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_success() {
        let output = CommandOutput::ok("datadisk\n");
        assert_eq!(output.check("lsblk").unwrap(), "datadisk\n");
    }

    #[test]
    fn test_check_failure_includes_stderr() {
        let output = CommandOutput::failed(1, "modprobe: FATAL: Module nvmet not found\n");
        let err = output.check("modprobe nvmet").unwrap_err();
        assert_eq!(
            err,
            "modprobe nvmet: exit status 1: modprobe: FATAL: Module nvmet not found"
        );
    }

    #[test]
    fn test_check_failure_without_stderr() {
        let output = CommandOutput::failed(32, "");
        assert_eq!(output.check("lsblk").unwrap_err(), "lsblk: exit status 32");
    }

    #[tokio::test]
    async fn test_system_runner_captures_output() {
        let runner = SystemRunner::new(false);
        let output = runner.run("sh", &["-c", "echo out; echo err >&2; exit 3"]).await.unwrap();
        assert!(!output.success);
        assert_eq!(output.code, Some(3));
        assert_eq!(output.stdout, "out\n");
        assert_eq!(output.stderr, "err\n");
    }
}
