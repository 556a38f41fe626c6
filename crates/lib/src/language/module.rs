use serde::Serialize;

use super::rule::{PrepareScript, ScriptImport};
use crate::persist::{PersistError, Persistent, PoolReader, PoolWriter};

/// A reusable unit of build logic, shared by every product that loads it.
///
/// An empty script means the module does not contribute to that environment.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Module {
  pub name: String,
  /// Names of the modules this one depends on; all must be loaded in the same product.
  pub module_dependencies: Vec<String>,
  pub setup_build_environment_script: PrepareScript,
  pub setup_run_environment_script: PrepareScript,
  pub imports: Vec<ScriptImport>,
}

impl Module {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Default::default()
    }
  }

  pub fn depends_on(mut self, dependency: impl Into<String>) -> Self {
    self.module_dependencies.push(dependency.into());
    self
  }
}

impl Persistent for Module {
  fn store(&self, pool: &mut PoolWriter) {
    pool.store_string(&self.name);
    pool.store_string_list(&self.module_dependencies);
    self.setup_build_environment_script.store(pool);
    self.setup_run_environment_script.store(pool);
    pool.store_values(&self.imports);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    Ok(Self {
      name: pool.load_string()?,
      module_dependencies: pool.load_string_list()?,
      setup_build_environment_script: PrepareScript::load(pool)?,
      setup_run_environment_script: PrepareScript::load(pool)?,
      imports: pool.load_values()?,
    })
  }
}
