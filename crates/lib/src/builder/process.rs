use std::process::Command;

use tracing::debug;

use super::BuildError;
use crate::buildgraph::ProcessCommand;
use crate::job::ProcessResult;

/// Runs `command` to completion with exactly the environment it carries.
///
/// Uses `std::process` rather than `tokio::process`: every caller already sits on the
/// job's `spawn_blocking` worker thread, where waiting synchronously on the child is
/// expected and no runtime handle is available. A non-zero exit is not an error here;
/// see [`ProcessResult::success`].
pub fn run_process(command: &ProcessCommand) -> Result<ProcessResult, BuildError> {
  let command_line = command.command_line();
  let mut process = Command::new(&command.program);
  process
    .args(&command.arguments)
    .env_clear()
    .envs(&command.environment);
  if !command.working_directory.as_os_str().is_empty() {
    process.current_dir(&command.working_directory);
  }

  debug!(command = %command_line, working_dir = ?command.working_directory, "spawning process");
  let output = process.output().map_err(|source| BuildError::Spawn {
    program: command.program.clone(),
    source,
  })?;

  let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
  let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
  if !stderr.is_empty() {
    debug!(stderr = %stderr.trim_end(), "command stderr");
  }
  if !stdout.is_empty() {
    debug!(stdout = %stdout.trim_end(), "command stdout");
  }

  Ok(ProcessResult {
    command_line,
    working_directory: command.working_directory.display().to_string(),
    exit_code: output.status.code(),
    success: output.status.success(),
    stdout,
    stderr,
  })
}
