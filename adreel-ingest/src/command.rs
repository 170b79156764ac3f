use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("program {program} not found")]
    NotFound { program: PathBuf },
    #[error("{program} timed out after {after:?}")]
    Timeout { program: PathBuf, after: Duration },
    #[error("failed to run {program}: {source}")]
    Io {
        program: PathBuf,
        source: std::io::Error,
    },
}

/// Runs external programs by argument vector. Implementations must never
/// route arguments through a shell.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, program: &Path, args: &[OsString]) -> std::io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, program: &Path, args: &[OsString]) -> std::io::Result<Output> {
        Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
    }
}

/// Runs `program` and bounds it by `limit`. Dropping the executor future kills
/// the child for the system executor, which covers both timeout and caller
/// cancellation.
pub async fn run_with_timeout(
    executor: &dyn CommandExecutor,
    program: &Path,
    args: &[OsString],
    limit: Duration,
) -> Result<Output, CommandError> {
    match timeout(limit, executor.run(program, args)).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            Err(CommandError::NotFound {
                program: program.to_path_buf(),
            })
        }
        Ok(Err(source)) => Err(CommandError::Io {
            program: program.to_path_buf(),
            source,
        }),
        Err(_) => Err(CommandError::Timeout {
            program: program.to_path_buf(),
            after: limit,
        }),
    }
}

/// Last few lines of stderr, enough to explain a failure in a log line.
pub fn stderr_tail(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let lines: Vec<&str> = stderr.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(5);
    lines[start..].join(" | ")
}
