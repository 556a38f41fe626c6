use std::path::PathBuf;
use std::sync::{Arc, OnceLock};

use serde::Serialize;

use super::FileTags;
use super::group::{Group, SourceArtifact};
use super::location::CodeLocation;
use super::module::Module;
use super::property_map::PropertyMapPtr;
use super::rule::{FileTagger, Rule};
use crate::environment::{EnvironmentKind, ProcessEnvironment};
use crate::persist::{PersistError, Persistent, PoolReader, PoolWriter};

/// Property overrides for artifacts carrying any of `file_tags_filter`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactProperties {
  pub file_tags_filter: FileTags,
  #[serde(skip)]
  pub properties: PropertyMapPtr,
}

impl Persistent for ArtifactProperties {
  fn store(&self, pool: &mut PoolWriter) {
    pool.store_string_set(&self.file_tags_filter);
    pool.store_shared(&self.properties);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    Ok(Self {
      file_tags_filter: pool.load_string_set()?,
      properties: pool.load_shared()?,
    })
  }
}

/// One buildable unit of a project.
#[derive(Debug, Clone, Serialize)]
pub struct Product {
  pub enabled: bool,
  /// The product type (`application`, `staticlibrary`, ...).
  pub file_tags: FileTags,
  pub additional_file_tags: FileTags,
  pub name: String,
  pub target_name: String,
  pub source_directory: PathBuf,
  pub destination_directory: PathBuf,
  pub location: CodeLocation,
  #[serde(skip)]
  pub properties: PropertyMapPtr,
  #[serde(skip)]
  pub rules: Vec<Arc<Rule>>,
  /// Names of the products this one depends on.
  pub dependencies: Vec<String>,
  pub file_taggers: Vec<FileTagger>,
  #[serde(serialize_with = "serialize_module_names")]
  pub modules: Vec<Arc<Module>>,
  pub groups: Vec<Group>,
  #[serde(skip)]
  pub artifact_properties: Vec<ArtifactProperties>,

  #[serde(skip)]
  build_environment: OnceLock<ProcessEnvironment>,
  #[serde(skip)]
  run_environment: OnceLock<ProcessEnvironment>,
}

fn serialize_module_names<S: serde::Serializer>(modules: &[Arc<Module>], serializer: S) -> Result<S::Ok, S::Error> {
  serializer.collect_seq(modules.iter().map(|m| m.name.as_str()))
}

impl Product {
  pub fn new(name: impl Into<String>, properties: PropertyMapPtr) -> Self {
    let name = name.into();
    Self {
      enabled: true,
      file_tags: FileTags::new(),
      additional_file_tags: FileTags::new(),
      target_name: name.clone(),
      name,
      source_directory: PathBuf::new(),
      destination_directory: PathBuf::new(),
      location: CodeLocation::default(),
      properties,
      rules: Vec::new(),
      dependencies: Vec::new(),
      file_taggers: Vec::new(),
      modules: Vec::new(),
      groups: Vec::new(),
      artifact_properties: Vec::new(),
      build_environment: OnceLock::new(),
      run_environment: OnceLock::new(),
    }
  }

  /// Every file of every group, enabled or not.
  pub fn all_files(&self) -> Vec<Arc<SourceArtifact>> {
    self.groups.iter().flat_map(|group| group.all_files()).collect()
  }

  pub fn all_enabled_files(&self) -> Vec<Arc<SourceArtifact>> {
    self
      .groups
      .iter()
      .filter(|group| group.enabled)
      .flat_map(|group| group.all_files())
      .collect()
  }

  /// Tags of every file tagger whose pattern matches `file_name`.
  pub fn file_tags_for_file_name(&self, file_name: &str) -> FileTags {
    self
      .file_taggers
      .iter()
      .filter(|tagger| tagger.matches(file_name))
      .flat_map(|tagger| tagger.file_tags.iter().cloned())
      .collect()
  }

  pub fn module(&self, name: &str) -> Option<&Arc<Module>> {
    self.modules.iter().find(|module| module.name == name)
  }

  pub(crate) fn environment_cache(&self, kind: EnvironmentKind) -> &OnceLock<ProcessEnvironment> {
    match kind {
      EnvironmentKind::Build => &self.build_environment,
      EnvironmentKind::Run => &self.run_environment,
    }
  }
}

// The environment caches are derived state and take no part in equality.
impl PartialEq for Product {
  fn eq(&self, other: &Self) -> bool {
    self.enabled == other.enabled
      && self.file_tags == other.file_tags
      && self.additional_file_tags == other.additional_file_tags
      && self.name == other.name
      && self.target_name == other.target_name
      && self.source_directory == other.source_directory
      && self.destination_directory == other.destination_directory
      && self.location == other.location
      && self.properties == other.properties
      && self.rules == other.rules
      && self.dependencies == other.dependencies
      && self.file_taggers == other.file_taggers
      && self.modules == other.modules
      && self.groups == other.groups
      && self.artifact_properties == other.artifact_properties
  }
}

impl Persistent for Product {
  fn store(&self, pool: &mut PoolWriter) {
    pool.write_bool(self.enabled);
    pool.store_string_set(&self.file_tags);
    pool.store_string_set(&self.additional_file_tags);
    pool.store_string(&self.name);
    pool.store_string(&self.target_name);
    pool.store_path(&self.source_directory);
    pool.store_path(&self.destination_directory);
    self.location.store(pool);
    pool.store_shared(&self.properties);
    pool.store_container(&self.rules);
    pool.store_string_list(&self.dependencies);
    pool.store_values(&self.file_taggers);
    pool.store_container(&self.modules);
    pool.store_values(&self.groups);
    pool.store_values(&self.artifact_properties);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    Ok(Self {
      enabled: pool.read_bool()?,
      file_tags: pool.load_string_set()?,
      additional_file_tags: pool.load_string_set()?,
      name: pool.load_string()?,
      target_name: pool.load_string()?,
      source_directory: pool.load_path()?,
      destination_directory: pool.load_path()?,
      location: CodeLocation::load(pool)?,
      properties: pool.load_shared()?,
      rules: pool.load_container()?,
      dependencies: pool.load_string_list()?,
      file_taggers: pool.load_values()?,
      modules: pool.load_container()?,
      groups: pool.load_values()?,
      artifact_properties: pool.load_values()?,
      build_environment: OnceLock::new(),
      run_environment: OnceLock::new(),
    })
  }
}
