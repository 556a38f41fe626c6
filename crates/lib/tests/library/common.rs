//! Shared helpers for library integration tests.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use quarry_lib::job::setup_project;
use quarry_lib::language::Project;
use quarry_lib::loader::SetupProjectParameters;
use tempfile::TempDir;

/// A scratch project tree.
pub struct TestProject {
  pub temp: TempDir,
}

impl TestProject {
  pub fn new(project_lua: &str) -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("project.lua"), project_lua).unwrap();
    Self { temp }
  }

  pub fn root(&self) -> &Path {
    self.temp.path()
  }

  /// Writes a file relative to the project directory, creating parents.
  pub fn write_file(&self, relative_path: &str, content: &str) -> PathBuf {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
    path
  }

  pub fn params(&self) -> SetupProjectParameters {
    let mut params = SetupProjectParameters::new(self.temp.path().join("project.lua"));
    params.build_root = Some(self.temp.path().join("build"));
    params
  }

  pub async fn resolve(&self) -> Arc<Project> {
    setup_project(self.params()).wait().await.unwrap()
  }
}
