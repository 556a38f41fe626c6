use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::consts::{BUILD_ROOT_ENV, CORE_NAMESPACE, DEFAULT_BUILD_VARIANT, DEFAULT_PROFILE};
use crate::environment::ProcessEnvironment;
use crate::language::{PropertyValue, insert_at_path};

/// Everything needed to resolve a project description.
#[derive(Debug, Clone)]
pub struct SetupProjectParameters {
  pub project_file: PathBuf,
  /// Explicit build root; see [`effective_build_root`](Self::effective_build_root).
  pub build_root: Option<PathBuf>,
  pub profile: String,
  pub build_variant: String,
  /// Base process environment handed to environment setup scripts.
  pub environment: ProcessEnvironment,
  /// Property overrides keyed by dotted path, e.g. `modules.cc.compiler`.
  pub overridden_values: BTreeMap<String, PropertyValue>,
}

impl SetupProjectParameters {
  pub fn new(project_file: impl Into<PathBuf>) -> Self {
    Self {
      project_file: project_file.into(),
      build_root: None,
      profile: DEFAULT_PROFILE.to_string(),
      build_variant: DEFAULT_BUILD_VARIANT.to_string(),
      environment: ProcessEnvironment::new(),
      overridden_values: BTreeMap::new(),
    }
  }

  pub fn project_dir(&self) -> &Path {
    self.project_file.parent().unwrap_or(Path::new("."))
  }

  /// The explicit build root, else `$QUARRY_BUILD_ROOT`, else `<project dir>/build`.
  pub fn effective_build_root(&self) -> PathBuf {
    if let Some(root) = &self.build_root {
      return root.clone();
    }
    if let Some(root) = std::env::var_os(BUILD_ROOT_ENV).filter(|v| !v.is_empty()) {
      return PathBuf::from(root);
    }
    self.project_dir().join("build")
  }

  /// The build configuration the project id derives from, with overrides applied.
  pub fn build_configuration(&self) -> BTreeMap<String, PropertyValue> {
    let core = BTreeMap::from([
      ("profile".to_string(), PropertyValue::from(self.profile.as_str())),
      ("buildVariant".to_string(), PropertyValue::from(self.build_variant.as_str())),
    ]);
    let mut config = BTreeMap::from([(CORE_NAMESPACE.to_string(), PropertyValue::Map(core))]);
    for (path, value) in &self.overridden_values {
      let path: Vec<&str> = path.split('.').collect();
      insert_at_path(&mut config, &path, value.clone());
    }
    config
  }
}
