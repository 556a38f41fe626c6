//! Background jobs: resolve, build, clean and install.
//!
//! A job runs its work on tokio's blocking pool and reports to the caller through a
//! channel of [`JobEvent`]s. The worker owns the only sender, emits exactly one
//! [`JobEvent::Finished`] as its last event and drops the sender right after, so the
//! stream ends there.
//!
//! Cancellation is cooperative: [`Job::cancel`] flips the shared [`CancelToken`] and the
//! work unwinds at its next checkpoint. A canceled job finishes with `success = false`
//! and no error.

mod build;
mod clean;
mod install;
mod select;
mod setup;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, OnceLock};

use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::buildgraph::{BuildGraph, BuildGraphStore, LockError, StoreError, rescue_build_data};
use crate::cancel::CancelToken;
use crate::environment::EnvironmentError;
use crate::language::{CodeLocation, Project, WildcardError};
use crate::loader::LoadError;

pub use build::{BuildOptions, BuildSummary, build};
pub use clean::{CleanOptions, CleanSummary, clean};
pub use install::{InstallOptions, InstallSummary, install};
pub use select::select_products;
pub use setup::setup_project;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
  Running,
  Canceling,
  Finished,
}

impl JobState {
  fn from_u8(value: u8) -> Self {
    match value {
      RUNNING => JobState::Running,
      CANCELING => JobState::Canceling,
      _ => JobState::Finished,
    }
  }
}

impl fmt::Display for JobState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      JobState::Running => write!(f, "running"),
      JobState::Canceling => write!(f, "canceling"),
      JobState::Finished => write!(f, "finished"),
    }
  }
}

/// Outcome of one executed process.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessResult {
  pub command_line: String,
  pub working_directory: String,
  pub exit_code: Option<i32>,
  pub success: bool,
  pub stdout: String,
  pub stderr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
  TaskStarted { description: String, max_progress: Option<u64> },
  TotalEffortChanged { total: u64 },
  TaskProgress { value: u64 },
  CommandDescription { highlight: String, message: String },
  ProcessResult(ProcessResult),
  Finished { success: bool },
}

/// Structured error attached to a failed job.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorInfo {
  pub message: String,
  pub location: Option<CodeLocation>,
}

impl ErrorInfo {
  pub fn new(message: impl Into<String>) -> Self {
    Self {
      message: message.into(),
      location: None,
    }
  }

  pub fn at(message: impl Into<String>, location: CodeLocation) -> Self {
    Self {
      message: message.into(),
      location: location.is_valid().then_some(location),
    }
  }
}

impl fmt::Display for ErrorInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.message)
  }
}

#[derive(Debug, Clone, Error)]
pub enum JobError {
  #[error("canceled")]
  Canceled,

  #[error("{0}")]
  Failed(ErrorInfo),
}

impl JobError {
  pub fn failed(message: impl Into<String>) -> Self {
    JobError::Failed(ErrorInfo::new(message))
  }
}

impl From<LoadError> for JobError {
  fn from(err: LoadError) -> Self {
    match err {
      LoadError::Canceled | LoadError::Wildcard(WildcardError::Canceled) => JobError::Canceled,
      LoadError::Invalid { ref location, .. } | LoadError::MissingFile { ref location, .. } => {
        JobError::Failed(ErrorInfo::at(err.to_string(), location.clone()))
      }
      err => JobError::failed(err.to_string()),
    }
  }
}

impl From<WildcardError> for JobError {
  fn from(err: WildcardError) -> Self {
    match err {
      WildcardError::Canceled => JobError::Canceled,
      err => JobError::failed(err.to_string()),
    }
  }
}

impl From<EnvironmentError> for JobError {
  fn from(err: EnvironmentError) -> Self {
    JobError::failed(err.to_string())
  }
}

impl From<LockError> for JobError {
  fn from(err: LockError) -> Self {
    JobError::failed(err.to_string())
  }
}

impl From<StoreError> for JobError {
  fn from(err: StoreError) -> Self {
    JobError::failed(err.to_string())
  }
}

/// The stored build graph of `project` with its data rescued onto `project`; an
/// unreadable graph starts over empty.
fn open_build_graph(project: &Arc<Project>) -> (BuildGraphStore, BuildGraph) {
  let store = BuildGraphStore::for_project(project);
  let mut graph = BuildGraph::new(project.clone());
  match store.load() {
    Ok(Some(old)) => graph.products = rescue_build_data(&old, project),
    Ok(None) => {}
    Err(e) => warn!(error = %e, "discarding unreadable build graph"),
  }
  (store, graph)
}

const RUNNING: u8 = 0;
const CANCELING: u8 = 1;
const FINISHED: u8 = 2;

#[derive(Debug, Default)]
struct JobShared {
  state: AtomicU8,
  error: OnceLock<ErrorInfo>,
}

/// Handle to a running job.
pub struct Job<T> {
  shared: Arc<JobShared>,
  cancel: CancelToken,
  events: mpsc::UnboundedReceiver<JobEvent>,
  handle: JoinHandle<Result<T, JobError>>,
}

/// The worker's side of a job: event emission and the cancellation checkpoint.
pub struct JobContext {
  events: mpsc::UnboundedSender<JobEvent>,
  cancel: CancelToken,
}

impl JobContext {
  pub fn cancel_token(&self) -> &CancelToken {
    &self.cancel
  }

  pub fn is_canceled(&self) -> bool {
    self.cancel.is_canceled()
  }

  /// Returns [`JobError::Canceled`] once cancellation was requested.
  pub fn checkpoint(&self) -> Result<(), JobError> {
    if self.cancel.is_canceled() {
      return Err(JobError::Canceled);
    }
    Ok(())
  }

  pub fn task_started(&self, description: impl Into<String>, max_progress: Option<u64>) {
    self.emit(JobEvent::TaskStarted {
      description: description.into(),
      max_progress,
    });
  }

  pub fn total_effort_changed(&self, total: u64) {
    self.emit(JobEvent::TotalEffortChanged { total });
  }

  pub fn task_progress(&self, value: u64) {
    self.emit(JobEvent::TaskProgress { value });
  }

  pub fn command_description(&self, highlight: impl Into<String>, message: impl Into<String>) {
    self.emit(JobEvent::CommandDescription {
      highlight: highlight.into(),
      message: message.into(),
    });
  }

  pub fn process_result(&self, result: ProcessResult) {
    self.emit(JobEvent::ProcessResult(result));
  }

  fn emit(&self, event: JobEvent) {
    // The receiver may already be gone if the caller stopped listening.
    let _ = self.events.send(event);
  }

  /// Moves the job to Finished and emits the terminal event.
  ///
  /// A cancel that arrived after the last checkpoint still wins over the work's outcome.
  fn finish<T>(self, shared: &JobShared, outcome: Result<T, JobError>) -> Result<T, JobError> {
    let previous = shared.state.swap(FINISHED, Ordering::SeqCst);
    let outcome = match outcome {
      _ if previous == CANCELING => Err(JobError::Canceled),
      outcome => outcome,
    };
    if let Err(JobError::Failed(info)) = &outcome {
      let _ = shared.error.set(info.clone());
    }
    self.emit(JobEvent::Finished {
      success: outcome.is_ok(),
    });
    outcome
  }
}

impl<T: Send + 'static> Job<T> {
  /// Starts `work` on the blocking pool. Must be called from within a tokio runtime.
  pub fn spawn<F>(name: &'static str, work: F) -> Self
  where
    F: FnOnce(&JobContext) -> Result<T, JobError> + Send + 'static,
  {
    let (sender, events) = mpsc::unbounded_channel();
    let cancel = CancelToken::new();
    let shared = Arc::new(JobShared::default());
    let context = JobContext {
      events: sender,
      cancel: cancel.clone(),
    };

    let worker_shared = shared.clone();
    let handle = tokio::task::spawn_blocking(move || {
      info!(job = name, "job started");
      let outcome = match panic::catch_unwind(AssertUnwindSafe(|| work(&context))) {
        Ok(outcome) => outcome,
        Err(_) => Err(JobError::failed("job panicked")),
      };
      let outcome = context.finish(&worker_shared, outcome);
      match &outcome {
        Ok(_) => info!(job = name, "job finished"),
        Err(JobError::Canceled) => info!(job = name, "job canceled"),
        Err(JobError::Failed(e)) => error!(job = name, error = %e, "job failed"),
      }
      outcome
    });

    Self {
      shared,
      cancel,
      events,
      handle,
    }
  }

  /// Requests cancellation if the job is still running; otherwise does nothing.
  pub fn cancel(&self) {
    request_cancel(&self.shared, &self.cancel);
  }

  pub fn state(&self) -> JobState {
    JobState::from_u8(self.shared.state.load(Ordering::SeqCst))
  }

  /// The failure of a finished job; `None` while running, on success and on cancellation.
  pub fn error(&self) -> Option<ErrorInfo> {
    self.shared.error.get().cloned()
  }

  /// A handle that cancels this job; usable from another task.
  pub fn canceler(&self) -> JobCanceler {
    JobCanceler {
      shared: self.shared.clone(),
      cancel: self.cancel.clone(),
    }
  }

  /// The next event, or `None` once the stream has ended after `Finished`.
  pub async fn next_event(&mut self) -> Option<JobEvent> {
    self.events.recv().await
  }

  /// Waits for the work to end and returns its result. Events not yet received are dropped.
  pub async fn wait(self) -> Result<T, JobError> {
    drop(self.events);
    match self.handle.await {
      Ok(outcome) => outcome,
      Err(e) => Err(JobError::failed(format!("job could not complete: {}", e))),
    }
  }
}

/// Cancels a job from outside its owner, e.g. a Ctrl-C handler.
#[derive(Debug, Clone)]
pub struct JobCanceler {
  shared: Arc<JobShared>,
  cancel: CancelToken,
}

impl JobCanceler {
  pub fn cancel(&self) {
    request_cancel(&self.shared, &self.cancel);
  }
}

fn request_cancel(shared: &JobShared, cancel: &CancelToken) {
  if shared
    .state
    .compare_exchange(RUNNING, CANCELING, Ordering::SeqCst, Ordering::SeqCst)
    .is_ok()
  {
    debug!("job cancellation requested");
    cancel.cancel();
  }
}
