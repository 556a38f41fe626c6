//! Process environments computed from module setup scripts.
//!
//! Modules are evaluated in dependency order; each setup script sees its own
//! properties, its direct dependencies' properties by module name, its imports, and
//! the `getenv`/`putenv` intrinsics operating on the environment being built.

mod order;
mod resolve;

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

pub use order::topological_module_order;
pub use resolve::resolve_environment;

pub type ProcessEnvironment = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvironmentKind {
  Build,
  Run,
}

impl fmt::Display for EnvironmentKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EnvironmentKind::Build => write!(f, "build"),
      EnvironmentKind::Run => write!(f, "run"),
    }
  }
}

#[derive(Debug, Error)]
pub enum EnvironmentError {
  #[error("module '{module}' depends on '{dependency}', which is not loaded in this product")]
  UnknownModule { module: String, dependency: String },

  #[error("module dependency cycle involving '{module}'")]
  Cycle { module: String },

  #[error("Error while setting up {kind} environment: {message}")]
  Script { kind: EnvironmentKind, message: String },
}
