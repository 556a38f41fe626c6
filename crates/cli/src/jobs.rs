//! Running library jobs in the foreground.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use tracing::debug;

use quarry_lib::job::{Job, JobError, JobEvent, setup_project};
use quarry_lib::language::Project;

use crate::ProjectArgs;
use crate::output::{print_command, print_info, print_process_result, print_warning};

pub fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}

/// Reports `job`'s events until it finishes; Ctrl-C cancels it.
///
/// With `quiet`, only process failures are shown.
pub async fn drive<T: Send + 'static>(mut job: Job<T>, quiet: bool) -> Result<T> {
  let canceler = job.canceler();
  let interrupt = tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      print_warning("Canceling...");
      canceler.cancel();
    }
  });

  while let Some(event) = job.next_event().await {
    match event {
      JobEvent::TaskStarted { description, .. } if !quiet => print_info(&description),
      JobEvent::CommandDescription { highlight, message } if !quiet => print_command(&highlight, &message),
      JobEvent::ProcessResult(result) if !quiet || !result.success => print_process_result(&result),
      JobEvent::TaskProgress { value } => debug!(value, "progress"),
      JobEvent::TotalEffortChanged { total } => debug!(total, "total effort"),
      _ => {}
    }
  }
  interrupt.abort();

  match job.wait().await {
    Ok(value) => Ok(value),
    Err(JobError::Canceled) => bail!("Canceled"),
    Err(JobError::Failed(info)) => bail!("{}", info.message),
  }
}

/// Resolves the project named by `args`.
pub async fn resolve(args: &ProjectArgs, quiet: bool) -> Result<Arc<Project>> {
  let params = args.parameters()?;
  drive(setup_project(params), quiet)
    .await
    .with_context(|| format!("Failed to resolve {}", args.project.display()))
}
