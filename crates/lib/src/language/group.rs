//! Groups and the source artifacts they declare.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::location::CodeLocation;
use super::property_map::PropertyMapPtr;
use super::FileTags;
use super::wildcards::WildcardError;
use crate::cancel::CancelToken;
use crate::persist::{PersistError, Persistent, PoolReader, PoolWriter};

/// One concrete source file.
///
/// Everything except the path and tags is inherited from the surrounding group; the
/// property map is the group's own `Arc` and is never overridden per artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceArtifact {
  pub absolute_file_path: PathBuf,
  pub file_tags: FileTags,
  #[serde(skip)]
  pub properties: PropertyMapPtr,
}

impl Persistent for SourceArtifact {
  fn store(&self, pool: &mut PoolWriter) {
    pool.store_path(&self.absolute_file_path);
    pool.store_string_set(&self.file_tags);
    pool.store_shared(&self.properties);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    Ok(Self {
      absolute_file_path: pool.load_path()?,
      file_tags: pool.load_string_set()?,
      properties: pool.load_shared()?,
    })
  }
}

/// The wildcard part of a group's `files` binding together with its current expansion.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceWildCards {
  /// Inherited from the group.
  pub prefix: String,
  /// Entries of the group's `files` binding that contain wildcards.
  pub patterns: Vec<String>,
  /// The group's `excludeFiles` binding.
  pub exclude_patterns: Vec<String>,
  /// Artifacts for the files the patterns matched at the last expansion.
  pub files: Vec<Arc<SourceArtifact>>,
}

impl Persistent for SourceWildCards {
  fn store(&self, pool: &mut PoolWriter) {
    pool.store_string(&self.prefix);
    pool.store_string_list(&self.patterns);
    pool.store_string_list(&self.exclude_patterns);
    pool.store_container(&self.files);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    Ok(Self {
      prefix: pool.load_string()?,
      patterns: pool.load_string_list()?,
      exclude_patterns: pool.load_string_list()?,
      files: pool.load_container()?,
    })
  }
}

/// A declared file grouping inside a product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Group {
  pub name: String,
  pub enabled: bool,
  pub location: CodeLocation,
  /// Files listed literally in the `files` binding; wildcard matches are not included.
  pub files: Vec<Arc<SourceArtifact>>,
  /// `None` when the `files` binding contains no wildcards.
  pub wildcards: Option<SourceWildCards>,
  #[serde(skip)]
  pub properties: PropertyMapPtr,
}

impl Group {
  /// Explicit files in declaration order, followed by the expanded wildcard files.
  pub fn all_files(&self) -> Vec<Arc<SourceArtifact>> {
    let mut files = self.files.clone();
    if let Some(wildcards) = &self.wildcards {
      files.extend(wildcards.files.iter().cloned());
    }
    files
  }

  /// Re-expands the wildcards against the filesystem as it is now.
  ///
  /// New artifacts share the group's property map; `file_tags_for` supplies each
  /// file's tags.
  pub fn refresh_wildcards<F>(&mut self, base_dir: &Path, file_tags_for: F, cancel: &CancelToken) -> Result<(), WildcardError>
  where
    F: Fn(&Path) -> FileTags,
  {
    let Some(wildcards) = self.wildcards.as_mut() else {
      return Ok(());
    };
    let expanded = wildcards.expand_patterns_with_cancel(base_dir, cancel)?;
    wildcards.files = expanded
      .into_iter()
      .map(|path| {
        Arc::new(SourceArtifact {
          file_tags: file_tags_for(&path),
          absolute_file_path: path,
          properties: self.properties.clone(),
        })
      })
      .collect();
    Ok(())
  }
}

impl Persistent for Group {
  fn store(&self, pool: &mut PoolWriter) {
    pool.store_string(&self.name);
    pool.write_bool(self.enabled);
    self.location.store(pool);
    pool.store_container(&self.files);
    pool.write_bool(self.wildcards.is_some());
    if let Some(wildcards) = &self.wildcards {
      wildcards.store(pool);
    }
    pool.store_shared(&self.properties);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    let name = pool.load_string()?;
    let enabled = pool.read_bool()?;
    let location = CodeLocation::load(pool)?;
    let files = pool.load_container()?;
    let wildcards = if pool.read_bool()? {
      Some(SourceWildCards::load(pool)?)
    } else {
      None
    };
    Ok(Self {
      name,
      enabled,
      location,
      files,
      wildcards,
      properties: pool.load_shared()?,
    })
  }
}
