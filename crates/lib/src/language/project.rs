use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use super::location::CodeLocation;
use super::product::Product;
use super::property_map::{PropertyValue, load_value_map, store_value_map};
use crate::consts::CORE_NAMESPACE;
use crate::persist::{PersistError, Persistent, PoolReader, PoolWriter};

/// The root of a resolved configuration.
///
/// The id is derived from the build configuration and recomputed whenever the
/// configuration changes, including on load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Project {
  pub location: CodeLocation,
  build_configuration: BTreeMap<String, PropertyValue>,
  id: String,
  pub platform_environment: BTreeMap<String, String>,
  pub build_directory: PathBuf,
  pub products: Vec<Arc<Product>>,
}

impl Project {
  pub fn new(location: CodeLocation, build_configuration: BTreeMap<String, PropertyValue>) -> Self {
    let id = Self::derive_id(&build_configuration);
    Self {
      location,
      build_configuration,
      id,
      platform_environment: BTreeMap::new(),
      build_directory: PathBuf::new(),
      products: Vec::new(),
    }
  }

  /// `<profile>-<buildVariant>`, either part empty when the configuration lacks it.
  pub fn derive_id(config: &BTreeMap<String, PropertyValue>) -> String {
    let core = config.get(CORE_NAMESPACE).and_then(PropertyValue::as_map);
    let get = |key: &str| {
      core
        .and_then(|core| core.get(key))
        .map(PropertyValue::to_plain_string)
        .unwrap_or_default()
    };
    format!("{}-{}", get("profile"), get("buildVariant"))
  }

  pub fn derive_build_directory(build_root: &Path, id: &str) -> PathBuf {
    build_root.join(id)
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn build_configuration(&self) -> &BTreeMap<String, PropertyValue> {
    &self.build_configuration
  }

  pub fn set_build_configuration(&mut self, config: BTreeMap<String, PropertyValue>) {
    self.id = Self::derive_id(&config);
    self.build_configuration = config;
  }

  pub fn product(&self, name: &str) -> Option<&Arc<Product>> {
    self.products.iter().find(|product| product.name == name)
  }

  pub fn profile(&self) -> String {
    self
      .build_configuration
      .get(CORE_NAMESPACE)
      .and_then(PropertyValue::as_map)
      .and_then(|core| core.get("profile"))
      .map(PropertyValue::to_plain_string)
      .unwrap_or_default()
  }
}

impl Persistent for Project {
  fn store(&self, pool: &mut PoolWriter) {
    self.location.store(pool);
    store_value_map(&self.build_configuration, pool);
    pool.store_string_map(&self.platform_environment);
    pool.store_path(&self.build_directory);
    pool.store_container(&self.products);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    let location = CodeLocation::load(pool)?;
    let build_configuration = load_value_map(pool)?;
    let mut project = Project::new(location, build_configuration);
    project.platform_environment = pool.load_string_map()?;
    project.build_directory = pool.load_path()?;
    project.products = pool.load_container()?;
    Ok(project)
  }
}
