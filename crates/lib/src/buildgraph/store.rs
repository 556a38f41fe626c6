//! The persisted build graph and its rescue after re-resolution.

use std::collections::{BTreeMap, HashSet};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, warn};

use super::rescuable::RescuableArtifactData;
use crate::consts::BUILD_GRAPH_EXTENSION;
use crate::language::{Product, Project};
use crate::persist::{PersistError, Persistent, PoolReader, PoolWriter, decode, encode};

#[derive(Debug, Error)]
pub enum StoreError {
  #[error("failed to read build graph '{}': {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write build graph '{}': {source}", path.display())]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("build graph '{}' is unusable: {source}", path.display())]
  Corrupt {
    path: PathBuf,
    #[source]
    source: PersistError,
  },
}

/// Rescue data of one product, keyed by artifact path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductBuildData {
  pub artifacts: BTreeMap<PathBuf, RescuableArtifactData>,
}

impl Persistent for ProductBuildData {
  fn store(&self, pool: &mut PoolWriter) {
    pool.write_len(self.artifacts.len());
    for (path, data) in &self.artifacts {
      pool.store_path(path);
      data.store(pool);
    }
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    let count = pool.read_len()?;
    let mut artifacts = BTreeMap::new();
    for _ in 0..count {
      let path = pool.load_path()?;
      artifacts.insert(path, RescuableArtifactData::load(pool)?);
    }
    Ok(Self { artifacts })
  }
}

/// A resolved project together with the per-product build state.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildGraph {
  pub project: Arc<Project>,
  pub products: BTreeMap<String, ProductBuildData>,
}

impl BuildGraph {
  pub fn new(project: Arc<Project>) -> Self {
    Self {
      project,
      products: BTreeMap::new(),
    }
  }
}

impl Persistent for BuildGraph {
  fn store(&self, pool: &mut PoolWriter) {
    pool.store_shared(&self.project);
    pool.write_len(self.products.len());
    for (name, data) in &self.products {
      pool.store_string(name);
      data.store(pool);
    }
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    let project = pool.load_shared()?;
    let count = pool.read_len()?;
    let mut products = BTreeMap::new();
    for _ in 0..count {
      let name = pool.load_string()?;
      products.insert(name, ProductBuildData::load(pool)?);
    }
    Ok(Self { project, products })
  }
}

/// Reads and writes `<build_dir>/<project id>.bg`.
#[derive(Debug, Clone)]
pub struct BuildGraphStore {
  path: PathBuf,
}

impl BuildGraphStore {
  pub fn new(build_dir: &Path, project_id: &str) -> Self {
    Self {
      path: build_dir.join(format!("{}.{}", project_id, BUILD_GRAPH_EXTENSION)),
    }
  }

  pub fn for_project(project: &Project) -> Self {
    Self::new(&project.build_directory, project.id())
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Loads the stored graph; `None` if nothing has been stored yet.
  pub fn load(&self) -> Result<Option<BuildGraph>, StoreError> {
    let bytes = match std::fs::read(&self.path) {
      Ok(bytes) => bytes,
      Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
      Err(source) => {
        return Err(StoreError::Read {
          path: self.path.clone(),
          source,
        });
      }
    };
    let graph = decode(&bytes).map_err(|source| StoreError::Corrupt {
      path: self.path.clone(),
      source,
    })?;
    debug!(path = %self.path.display(), bytes = bytes.len(), "loaded build graph");
    Ok(Some(graph))
  }

  /// Writes the graph to a temporary file next to the target and renames it into place.
  pub fn store(&self, graph: &BuildGraph) -> Result<(), StoreError> {
    let write_error = |source| StoreError::Write {
      path: self.path.clone(),
      source,
    };
    let dir = self.path.parent().unwrap_or(Path::new("."));
    std::fs::create_dir_all(dir).map_err(write_error)?;

    let bytes = encode(graph);
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(write_error)?;
    temp.write_all(&bytes).map_err(write_error)?;
    temp.as_file().sync_all().map_err(write_error)?;
    temp.persist(&self.path).map_err(|e| write_error(e.error))?;
    debug!(path = %self.path.display(), bytes = bytes.len(), "stored build graph");
    Ok(())
  }

  pub fn remove(&self) -> Result<(), StoreError> {
    match std::fs::remove_file(&self.path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(StoreError::Write {
        path: self.path.clone(),
        source,
      }),
    }
  }
}

/// Carries build data of `old` over to the freshly resolved `project`.
///
/// Data is matched by product name. An entry survives only if its artifact is still one
/// of the product's source files or lies in the product's destination directory.
/// Children pointing at products that are gone, or built with another profile, are
/// dropped.
pub fn rescue_build_data(old: &BuildGraph, project: &Project) -> BTreeMap<String, ProductBuildData> {
  let profile = project.profile();
  let product_names: HashSet<&str> = project.products.iter().map(|p| p.name.as_str()).collect();

  let mut rescued = BTreeMap::new();
  for (name, data) in &old.products {
    let Some(product) = project.product(name) else {
      warn!(product = %name, "dropping build data of product that no longer exists");
      continue;
    };

    let sources: HashSet<PathBuf> = product
      .all_files()
      .iter()
      .map(|artifact| artifact.absolute_file_path.clone())
      .collect();

    let mut kept = ProductBuildData::default();
    for (path, artifact) in &data.artifacts {
      if !belongs_to(product, &sources, path) {
        debug!(product = %name, artifact = %path.display(), "dropping stale artifact data");
        continue;
      }
      let mut artifact = artifact.clone();
      let before = artifact.children.len();
      artifact
        .children
        .retain(|child| product_names.contains(child.product_name.as_str()) && child.product_profile == profile);
      if artifact.children.len() != before {
        debug!(
          product = %name,
          artifact = %path.display(),
          dropped = before - artifact.children.len(),
          "dropping stale child edges"
        );
      }
      kept.artifacts.insert(path.clone(), artifact);
    }
    rescued.insert(name.clone(), kept);
  }
  rescued
}

fn belongs_to(product: &Product, sources: &HashSet<PathBuf>, path: &Path) -> bool {
  sources.contains(path)
    || (!product.destination_directory.as_os_str().is_empty() && path.starts_with(&product.destination_directory))
}
