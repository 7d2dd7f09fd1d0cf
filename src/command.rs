//! Subprocess execution with captured output
//!
//! Thin wrapper over `tokio::process` used for every kind and kubectl
//! invocation. Commands run to completion; stdout and stderr are captured
//! as text.

use std::collections::HashMap;
use std::ffi::OsStr;

use tokio::process::Command;
use tracing::debug;

/// Error type for subprocess execution
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("failed to execute {program}: {source}")]
    ExecutionFailed {
        program: String,
        source: std::io::Error,
    },

    #[error("{program} exited with code {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: i32,
        stdout: String,
        stderr: String,
    },
}

/// Captured result of a finished subprocess
#[derive(Debug)]
pub struct RunResult {
    /// Exit code, -1 when the process was killed by a signal
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl RunResult {
    /// Whether the process exited with code zero
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// Return stdout, or a [`CommandError::NonZeroExit`] carrying the
    /// captured output
    pub fn expect_success(self, program: &str) -> Result<String, CommandError> {
        if self.passed() {
            Ok(self.stdout)
        } else {
            Err(CommandError::NonZeroExit {
                program: program.to_string(),
                code: self.exit_code,
                stdout: self.stdout,
                stderr: self.stderr,
            })
        }
    }
}

/// Run a command and capture its output
pub async fn run<S: AsRef<OsStr>>(
    program: impl AsRef<OsStr>,
    args: &[S],
) -> Result<RunResult, CommandError> {
    run_with_env(program, args, &HashMap::new()).await
}

/// Run a command with extra environment variables and capture its output
pub async fn run_with_env<S: AsRef<OsStr>>(
    program: impl AsRef<OsStr>,
    args: &[S],
    env: &HashMap<String, String>,
) -> Result<RunResult, CommandError> {
    let program = program.as_ref();
    let program_name = program.to_string_lossy().into_owned();

    let output = Command::new(program)
        .args(args)
        .envs(env)
        .output()
        .await
        .map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => CommandError::CommandNotFound(program_name.clone()),
            _ => CommandError::ExecutionFailed {
                program: program_name.clone(),
                source,
            },
        })?;

    let result = RunResult {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    };
    debug!(program = %program_name, exit_code = result.exit_code, "command finished");
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_simple_command() {
        let result = run("echo", &["hello"]).await.unwrap();

        assert_eq!(result.exit_code, 0);
        assert!(result.stdout.contains("hello"));
        assert!(result.passed());
    }

    #[tokio::test]
    async fn test_run_failing_command() {
        let result = run("sh", &["-c", "exit 1"]).await.unwrap();

        assert_eq!(result.exit_code, 1);
        assert!(!result.passed());
    }

    #[tokio::test]
    async fn test_run_captures_stderr() {
        let result = run("sh", &["-c", "echo error >&2"]).await.unwrap();

        assert!(result.stderr.contains("error"));
    }

    #[tokio::test]
    async fn test_run_with_env() {
        let mut env = HashMap::new();
        env.insert("MY_VAR".to_string(), "my_value".to_string());

        let result = run_with_env("sh", &["-c", "echo $MY_VAR"], &env)
            .await
            .unwrap();

        assert!(result.stdout.contains("my_value"));
    }

    #[tokio::test]
    async fn test_run_command_not_found() {
        let args: &[&str] = &[];
        let err = run("nonexistent_command_xyz", args).await.unwrap_err();

        assert!(matches!(err, CommandError::CommandNotFound(_)));
        assert!(err.to_string().contains("nonexistent_command_xyz"));
    }

    #[tokio::test]
    async fn test_expect_success_returns_stdout() {
        let out = run("echo", &["payload"])
            .await
            .unwrap()
            .expect_success("echo")
            .unwrap();

        assert_eq!(out.trim(), "payload");
    }

    #[tokio::test]
    async fn test_expect_success_carries_output_on_failure() {
        let err = run("sh", &["-c", "echo out; echo err >&2; exit 7"])
            .await
            .unwrap()
            .expect_success("sh")
            .unwrap_err();

        match err {
            CommandError::NonZeroExit {
                program,
                code,
                stdout,
                stderr,
            } => {
                assert_eq!(program, "sh");
                assert_eq!(code, 7);
                assert!(stdout.contains("out"));
                assert!(stderr.contains("err"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
