use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Job, JobContext, JobError, open_build_graph, select_products};
use crate::buildgraph::BuildGraphLock;
use crate::language::Project;

#[derive(Debug, Clone, Default)]
pub struct CleanOptions {
  pub dry_run: bool,
  pub keep_going: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleanSummary {
  pub removed: Vec<PathBuf>,
  pub failed: Vec<PathBuf>,
}

/// Removes the generated files recorded for `products` and forgets their build data.
pub fn clean(project: Arc<Project>, products: Vec<String>, options: CleanOptions) -> Job<CleanSummary> {
  Job::spawn("clean", move |ctx| run(ctx, &project, &products, &options))
}

fn run(
  ctx: &JobContext,
  project: &Arc<Project>,
  names: &[String],
  options: &CleanOptions,
) -> Result<CleanSummary, JobError> {
  let selected = select_products(project, names)?;
  let _lock = BuildGraphLock::acquire(&project.build_directory, "clean")?;
  let (store, mut graph) = open_build_graph(project);

  let mut targets = Vec::new();
  for product in &selected {
    let sources: HashSet<PathBuf> = product
      .all_files()
      .iter()
      .map(|artifact| artifact.absolute_file_path.clone())
      .collect();
    if let Some(data) = graph.products.get(&product.name) {
      for path in data.artifacts.keys().filter(|path| !sources.contains(*path)) {
        targets.push((product.name.clone(), path.clone()));
      }
    }
  }

  ctx.task_started("Cleaning", Some(targets.len() as u64));
  let mut summary = CleanSummary::default();
  let mut failure = None;
  for (index, (product, path)) in targets.into_iter().enumerate() {
    if let Err(e) = ctx.checkpoint() {
      failure = Some(e);
      break;
    }
    if options.dry_run {
      ctx.command_description("clean", format!("Would remove {}", path.display()));
      summary.removed.push(path);
      ctx.task_progress(index as u64 + 1);
      continue;
    }

    match fs::remove_file(&path) {
      Ok(()) => debug!(file = %path.display(), "removed"),
      Err(e) if e.kind() == io::ErrorKind::NotFound => {}
      Err(e) => {
        if options.keep_going {
          warn!(file = %path.display(), error = %e, "failed to remove");
          summary.failed.push(path);
          continue;
        }
        failure = Some(JobError::failed(format!("failed to remove '{}': {}", path.display(), e)));
        break;
      }
    }
    if let Some(data) = graph.products.get_mut(&product) {
      data.artifacts.remove(&path);
    }
    summary.removed.push(path);
    ctx.task_progress(index as u64 + 1);
  }

  if !options.dry_run {
    store.store(&graph)?;
  }
  if let Some(e) = failure {
    return Err(e);
  }
  if !summary.failed.is_empty() {
    return Err(JobError::failed(format!("failed to remove {} file(s)", summary.failed.len())));
  }
  info!(removed = summary.removed.len(), "clean finished");
  Ok(summary)
}
