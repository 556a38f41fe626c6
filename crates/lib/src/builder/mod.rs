//! Turning a resolved product into build outputs.
//!
//! The build job drives a [`ProductBuilder`] once per selected product, dependencies
//! first. [`RuleBuilder`] is the stock implementation: it applies the product's rules to
//! its tagged source files and runs the commands their prepare scripts return.

mod process;
mod rule;

use std::io;
use std::path::PathBuf;

use mlua::prelude::LuaError;
use serde::Serialize;
use thiserror::Error;

use crate::buildgraph::ProductBuildData;
use crate::environment::EnvironmentError;
use crate::job::{BuildOptions, JobContext, JobError};
use crate::language::{FileTags, Product, Project};
use crate::script::ScriptEngine;

pub use process::run_process;
pub use rule::RuleBuilder;

#[derive(Debug, Error)]
pub enum BuildError {
  #[error(transparent)]
  Environment(#[from] EnvironmentError),

  #[error("error in rule {rule}: {source}")]
  Script {
    rule: String,
    #[source]
    source: LuaError,
  },

  #[error("rule {rule} returned an invalid command: {message}")]
  InvalidCommand { rule: String, message: String },

  #[error("failed to start '{program}': {source}")]
  Spawn {
    program: String,
    #[source]
    source: io::Error,
  },

  #[error("command failed with exit code {}: {command}", exit_code.map_or("unknown".to_string(), |c| c.to_string()))]
  CommandFailed { command: String, exit_code: Option<i32> },

  #[error("failed to prepare '{}': {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("build canceled")]
  Canceled,
}

impl From<BuildError> for JobError {
  fn from(err: BuildError) -> Self {
    match err {
      BuildError::Canceled => JobError::Canceled,
      err => JobError::failed(err.to_string()),
    }
  }
}

/// A file a product's build made available to later rules and dependent products.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuiltArtifact {
  pub path: PathBuf,
  pub file_tags: FileTags,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductBuildResult {
  /// Rule invocations whose commands ran (or would run, in a dry run).
  pub executed: usize,
  /// Rule invocations skipped because their outputs were current.
  pub up_to_date: usize,
  pub artifacts: Vec<BuiltArtifact>,
}

/// Everything a builder needs for one product.
pub struct BuildRequest<'a> {
  pub ctx: &'a JobContext,
  pub engine: &'a mut ScriptEngine,
  pub project: &'a Project,
  pub product: &'a Product,
  /// The product's persisted build data; updated for every output produced.
  pub data: &'a mut ProductBuildData,
  pub options: &'a BuildOptions,
  /// Artifacts of the products this one depends on, built earlier in the same job.
  pub dependency_artifacts: &'a [BuiltArtifact],
}

pub trait ProductBuilder: Send + Sync {
  fn build_product(&self, request: BuildRequest<'_>) -> Result<ProductBuildResult, BuildError>;
}
