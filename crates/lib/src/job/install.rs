use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::{Job, JobContext, JobError, select_products};
use crate::buildgraph::BuildGraphLock;
use crate::consts::INSTALL_ROOT_DIR;
use crate::language::{Project, PropertyValue};

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
  /// Defaults to `<build dir>/install-root`.
  pub install_root: Option<PathBuf>,
  /// Delete the install root before copying.
  pub remove_existing: bool,
  pub dry_run: bool,
  pub keep_going: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstallSummary {
  pub install_root: PathBuf,
  pub installed: Vec<PathBuf>,
  pub failed: Vec<PathBuf>,
}

/// Copies the enabled source files marked `quarry.install` into the install root.
pub fn install(project: Arc<Project>, products: Vec<String>, options: InstallOptions) -> Job<InstallSummary> {
  Job::spawn("install", move |ctx| run(ctx, &project, &products, &options))
}

fn run(
  ctx: &JobContext,
  project: &Arc<Project>,
  names: &[String],
  options: &InstallOptions,
) -> Result<InstallSummary, JobError> {
  let selected = select_products(project, names)?;
  let _lock = BuildGraphLock::acquire(&project.build_directory, "install")?;
  let root = options
    .install_root
    .clone()
    .unwrap_or_else(|| project.build_directory.join(INSTALL_ROOT_DIR));

  let mut copies = Vec::new();
  for product in &selected {
    for artifact in product.all_enabled_files() {
      let properties = &artifact.properties;
      if properties.core_property("install").and_then(PropertyValue::as_bool) != Some(true) {
        continue;
      }
      let dir = properties
        .core_property("installDir")
        .map(PropertyValue::to_plain_string)
        .unwrap_or_default();
      let Some(file_name) = artifact.absolute_file_path.file_name() else {
        continue;
      };
      let target = root.join(dir.trim_start_matches(['/', '\\'])).join(file_name);
      copies.push((artifact.absolute_file_path.clone(), target));
    }
  }

  if options.remove_existing && !options.dry_run && root.exists() {
    debug!(root = %root.display(), "removing existing install root");
    fs::remove_dir_all(&root)
      .map_err(|e| JobError::failed(format!("failed to remove '{}': {}", root.display(), e)))?;
  }

  ctx.task_started("Installing", Some(copies.len() as u64));
  let mut summary = InstallSummary {
    install_root: root,
    ..Default::default()
  };
  for (index, (source, target)) in copies.into_iter().enumerate() {
    ctx.checkpoint()?;
    ctx.command_description("install", format!("Installing {}", target.display()));
    if !options.dry_run
      && let Err(e) = copy_file(&source, &target)
    {
      if !options.keep_going {
        return Err(JobError::failed(e));
      }
      warn!(file = %source.display(), error = %e, "failed to install");
      summary.failed.push(target);
      continue;
    }
    summary.installed.push(target);
    ctx.task_progress(index as u64 + 1);
  }

  if !summary.failed.is_empty() {
    return Err(JobError::failed(format!("failed to install {} file(s)", summary.failed.len())));
  }
  info!(installed = summary.installed.len(), root = %summary.install_root.display(), "install finished");
  Ok(summary)
}

fn copy_file(source: &Path, target: &Path) -> Result<(), String> {
  if let Some(parent) = target.parent() {
    fs::create_dir_all(parent).map_err(|e| format!("failed to create '{}': {}", parent.display(), e))?;
  }
  fs::copy(source, target)
    .map(|_| ())
    .map_err(|e| format!("failed to copy '{}' to '{}': {}", source.display(), target.display(), e))
}
