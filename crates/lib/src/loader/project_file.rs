//! Lua project descriptions.
//!
//! A project file returns a table:
//!
//! ```lua
//! return {
//!   platform_environment = { PATH = "/usr/bin" },
//!   modules = {
//!     cc = {
//!       depends = { "toolchain" },
//!       build_environment = [[ putenv("CC", compiler) ]],
//!       imports = { helpers = { "helpers.lua" } },
//!       properties = { compiler = "cc" },
//!       file_taggers = { { pattern = "*.c", tags = { "c" } } },
//!       rules = {
//!         {
//!           inputs = { "c" },
//!           prepare = [[ return { { program = compiler, arguments = { "-c", input.path, "-o", output.path } } } ]],
//!           outputs = { { file_name = [[ input.base .. ".o" ]], tags = { "obj" } } },
//!         },
//!       },
//!     },
//!     toolchain = {},
//!   },
//!   products = {
//!     {
//!       name = "app",
//!       type = "application",
//!       modules = { "cc" },
//!       module_properties = { cc = { compiler = "gcc" } },
//!       groups = { { name = "sources", files = { "main.c", "src/*.c" }, install = true, install_dir = "share" } },
//!     },
//!   },
//! }
//! ```

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use mlua::prelude::*;
use thiserror::Error;
use tracing::{debug, info};

use super::params::SetupProjectParameters;
use crate::cancel::CancelToken;
use crate::consts::{CORE_NAMESPACE, MODULES_KEY};
use crate::language::{
  Binding, CodeLocation, FileTagger, FileTags, Group, Module, PrepareScript, Product, Project, PropertyMap,
  PropertyMapPtr, PropertyValue, Rule, RuleArtifact, ScriptImport, SourceArtifact, SourceWildCards, WildcardError,
  insert_at_path,
};
use crate::script::{ScriptEngine, lua_to_property};

#[derive(Debug, Error)]
pub enum LoadError {
  #[error("failed to read project file '{}': {source}", path.display())]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to evaluate project file: {0}")]
  Script(#[from] LuaError),

  #[error("{location}: {message}")]
  Invalid { location: CodeLocation, message: String },

  #[error("product '{product}' loads unknown module '{module}'")]
  UnknownModule { product: String, module: String },

  #[error("module '{module}' depends on unknown module '{dependency}'")]
  UnknownModuleDependency { module: String, dependency: String },

  #[error("product '{product}' depends on unknown product '{dependency}'")]
  UnknownProduct { product: String, dependency: String },

  #[error("duplicate product name '{0}'")]
  DuplicateProduct(String),

  #[error("{location}: file '{}' does not exist", path.display())]
  MissingFile { location: CodeLocation, path: PathBuf },

  #[error("invalid file tagger pattern '{pattern}': {source}")]
  Pattern {
    pattern: String,
    #[source]
    source: glob::PatternError,
  },

  #[error(transparent)]
  Wildcard(#[from] WildcardError),

  #[error("project loading canceled")]
  Canceled,
}

/// A module as declared, before products pick it up.
struct ModuleDecl {
  module: Arc<Module>,
  properties: BTreeMap<String, PropertyValue>,
  rules: Vec<Arc<Rule>>,
  file_taggers: Vec<FileTagger>,
}

struct Loader<'a> {
  params: &'a SetupProjectParameters,
  project_dir: PathBuf,
  location: CodeLocation,
  modules: BTreeMap<String, ModuleDecl>,
  cancel: &'a CancelToken,
}

/// Evaluates the project file named by `params` and builds the resolved model.
///
/// Wildcards are expanded against the filesystem as it is now; `cancel` is checked
/// before each product and during expansion.
pub fn load_project(params: &SetupProjectParameters, cancel: &CancelToken) -> Result<Project, LoadError> {
  let path = dunce::canonicalize(&params.project_file).map_err(|source| LoadError::Read {
    path: params.project_file.clone(),
    source,
  })?;
  info!(project = %path.display(), "loading project");

  let engine = ScriptEngine::new();
  let root = engine.eval_file(&path)?;
  let location = CodeLocation::file(path.display().to_string());
  let LuaValue::Table(root) = root else {
    return Err(LoadError::Invalid {
      location,
      message: "project file must return a table".to_string(),
    });
  };

  let mut loader = Loader {
    params,
    project_dir: path.parent().unwrap_or(Path::new(".")).to_path_buf(),
    location,
    modules: BTreeMap::new(),
    cancel,
  };

  let mut project = Project::new(loader.location.clone(), params.build_configuration());
  project.build_directory = Project::derive_build_directory(&params.effective_build_root(), project.id());
  project.platform_environment = root
    .get::<Option<BTreeMap<String, String>>>("platform_environment")?
    .unwrap_or_default();

  if let Some(modules) = root.get::<Option<LuaTable>>("modules")? {
    let mut declared = BTreeMap::new();
    for pair in modules.pairs::<String, LuaTable>() {
      let (name, table) = pair?;
      declared.insert(name, table);
    }
    for (name, table) in declared {
      let decl = loader.parse_module(&name, &table)?;
      loader.modules.insert(name, decl);
    }
  }

  let products: LuaTable = root.get::<Option<LuaTable>>("products")?.unwrap_or(engine.lua().create_table()?);
  let mut names = HashSet::new();
  for table in products.sequence_values::<LuaTable>() {
    if cancel.is_canceled() {
      return Err(LoadError::Canceled);
    }
    let product = loader.parse_product(&table?, &project)?;
    if !names.insert(product.name.clone()) {
      return Err(LoadError::DuplicateProduct(product.name));
    }
    debug!(product = %product.name, files = product.all_files().len(), "resolved product");
    project.products.push(Arc::new(product));
  }

  for product in &project.products {
    for dependency in &product.dependencies {
      if !names.contains(dependency) {
        return Err(LoadError::UnknownProduct {
          product: product.name.clone(),
          dependency: dependency.clone(),
        });
      }
    }
  }

  info!(id = project.id(), products = project.products.len(), "project resolved");
  Ok(project)
}

impl Loader<'_> {
  fn invalid(&self, message: impl Into<String>) -> LoadError {
    LoadError::Invalid {
      location: self.location.clone(),
      message: message.into(),
    }
  }

  fn script(&self, source: Option<String>) -> PrepareScript {
    PrepareScript {
      script: source.unwrap_or_default(),
      location: self.location.clone(),
    }
  }

  fn resolve_path(&self, base: &Path, path: &str) -> PathBuf {
    base.join(path)
  }

  fn parse_module(&self, name: &str, table: &LuaTable) -> Result<ModuleDecl, LoadError> {
    let mut imports = Vec::new();
    if let Some(declared) = table.get::<Option<LuaTable>>("imports")? {
      let mut sorted = BTreeMap::new();
      for pair in declared.pairs::<String, Vec<String>>() {
        let (scope_name, files) = pair?;
        sorted.insert(scope_name, files);
      }
      for (scope_name, files) in sorted {
        imports.push(ScriptImport {
          scope_name,
          file_paths: files
            .iter()
            .map(|f| self.resolve_path(&self.project_dir, f).display().to_string())
            .collect(),
          location: self.location.clone(),
        });
      }
    }

    let module = Arc::new(Module {
      name: name.to_string(),
      module_dependencies: strings(table, "depends")?,
      setup_build_environment_script: self.script(table.get("build_environment")?),
      setup_run_environment_script: self.script(table.get("run_environment")?),
      imports,
    });

    let mut rules = Vec::new();
    if let Some(declared) = table.get::<Option<LuaTable>>("rules")? {
      for rule in declared.sequence_values::<LuaTable>() {
        rules.push(Arc::new(self.parse_rule(&rule?, &module)?));
      }
    }

    Ok(ModuleDecl {
      properties: self.property_table(table, "properties")?,
      file_taggers: self.file_taggers(table)?,
      rules,
      module,
    })
  }

  fn parse_rule(&self, table: &LuaTable, module: &Arc<Module>) -> Result<Rule, LoadError> {
    let prepare: Option<String> = table.get("prepare")?;
    if prepare.as_deref().is_none_or(|p| p.trim().is_empty()) {
      return Err(self.invalid(format!("a rule of module '{}' has no prepare script", module.name)));
    }

    let mut artifacts = Vec::new();
    if let Some(outputs) = table.get::<Option<LuaTable>>("outputs")? {
      for output in outputs.sequence_values::<LuaTable>() {
        let output = output?;
        let file_name: String = output
          .get::<Option<String>>("file_name")?
          .ok_or_else(|| self.invalid(format!("a rule output of module '{}' has no file_name", module.name)))?;
        let mut bindings = Vec::new();
        if let Some(declared) = output.get::<Option<LuaTable>>("bindings")? {
          for binding in declared.sequence_values::<LuaTable>() {
            let binding = binding?;
            let name: String = binding.get("name")?;
            bindings.push(Binding {
              name: name.split('.').map(str::to_string).collect(),
              code: binding.get("code")?,
              location: self.location.clone(),
            });
          }
        }
        artifacts.push(RuleArtifact {
          file_name,
          file_tags: tags(&output, "tags")?,
          bindings,
        });
      }
    }

    Ok(Rule {
      script: self.script(prepare),
      module: module.clone(),
      imports: module.imports.clone(),
      inputs: tags(table, "inputs")?,
      usings: tags(table, "usings")?,
      explicitly_depends_on: tags(table, "explicitly_depends_on")?,
      multiplex: table.get::<Option<bool>>("multiplex")?.unwrap_or(false),
      artifacts,
    })
  }

  fn file_taggers(&self, table: &LuaTable) -> Result<Vec<FileTagger>, LoadError> {
    let mut taggers = Vec::new();
    if let Some(declared) = table.get::<Option<LuaTable>>("file_taggers")? {
      for tagger in declared.sequence_values::<LuaTable>() {
        let tagger = tagger?;
        let pattern: String = tagger.get("pattern")?;
        let file_tags = tags(&tagger, "tags")?;
        taggers.push(FileTagger::new(&pattern, file_tags).map_err(|source| LoadError::Pattern { pattern, source })?);
      }
    }
    Ok(taggers)
  }

  fn property_table(&self, table: &LuaTable, key: &str) -> Result<BTreeMap<String, PropertyValue>, LoadError> {
    match table.get::<LuaValue>(key)? {
      LuaValue::Nil => Ok(BTreeMap::new()),
      value => match lua_to_property(value)? {
        PropertyValue::Map(map) => Ok(map),
        _ => Err(self.invalid(format!("'{}' must be a table of named values", key))),
      },
    }
  }

  /// `names` plus everything they transitively depend on, listed modules first.
  fn product_modules(&self, product: &str, names: &[String]) -> Result<Vec<&ModuleDecl>, LoadError> {
    let mut seen = HashSet::new();
    let mut result = Vec::new();
    let mut pending: Vec<(Option<&str>, &str)> = names.iter().rev().map(|n| (None, n.as_str())).collect();
    while let Some((dependent, name)) = pending.pop() {
      if !seen.insert(name) {
        continue;
      }
      let Some(decl) = self.modules.get(name) else {
        return Err(match dependent {
          None => LoadError::UnknownModule {
            product: product.to_string(),
            module: name.to_string(),
          },
          Some(module) => LoadError::UnknownModuleDependency {
            module: module.to_string(),
            dependency: name.to_string(),
          },
        });
      };
      for dependency in decl.module.module_dependencies.iter().rev() {
        pending.push((Some(decl.module.name.as_str()), dependency.as_str()));
      }
      result.push(decl);
    }
    Ok(result)
  }

  fn parse_product(&self, table: &LuaTable, project: &Project) -> Result<Product, LoadError> {
    let name: String = table
      .get::<Option<String>>("name")?
      .ok_or_else(|| self.invalid("every product needs a name"))?;
    let modules = self.product_modules(&name, &strings(table, "modules")?)?;

    // Property map: core namespace, module defaults with per-product values, product
    // properties, then command-line overrides.
    let mut value = BTreeMap::new();
    let mut core = project
      .build_configuration()
      .get(CORE_NAMESPACE)
      .and_then(PropertyValue::as_map)
      .cloned()
      .unwrap_or_default();
    core.entry("install".to_string()).or_insert(PropertyValue::Bool(false));
    core.entry("installDir".to_string()).or_insert(PropertyValue::from(""));
    value.insert(CORE_NAMESPACE.to_string(), PropertyValue::Map(core));

    let module_properties = self.property_table(table, "module_properties")?;
    let mut module_values = BTreeMap::new();
    for decl in &modules {
      let mut properties = decl.properties.clone();
      if let Some(PropertyValue::Map(overrides)) = module_properties.get(&decl.module.name) {
        overlay(&mut properties, overrides, &mut Vec::new());
      }
      module_values.insert(decl.module.name.clone(), PropertyValue::Map(properties));
    }
    value.insert(MODULES_KEY.to_string(), PropertyValue::Map(module_values));
    overlay(&mut value, &self.property_table(table, "properties")?, &mut Vec::new());
    for (path, override_value) in &self.params.overridden_values {
      let path: Vec<&str> = path.split('.').collect();
      insert_at_path(&mut value, &path, override_value.clone());
    }
    let properties = PropertyMap::shared(value);

    let source_directory = match table.get::<Option<String>>("source_directory")? {
      Some(dir) => self.resolve_path(&self.project_dir, &dir),
      None => self.project_dir.clone(),
    };
    let destination_directory = match table.get::<Option<String>>("destination_directory")? {
      Some(dir) => self.resolve_path(&project.build_directory, &dir),
      None => project.build_directory.join(&name),
    };

    let mut product = Product::new(name, properties);
    product.location = self.location.clone();
    if let Some(target_name) = table.get::<Option<String>>("target_name")? {
      product.target_name = target_name;
    }
    product.enabled = table.get::<Option<bool>>("condition")?.unwrap_or(true);
    product.file_tags = tags(table, "type")?;
    product.additional_file_tags = tags(table, "additional_tags")?;
    product.dependencies = strings(table, "depends")?;
    product.source_directory = source_directory;
    product.destination_directory = destination_directory;
    product.modules = modules.iter().map(|decl| decl.module.clone()).collect();
    product.rules = modules.iter().flat_map(|decl| decl.rules.iter().cloned()).collect();
    product.file_taggers = modules.iter().flat_map(|decl| decl.file_taggers.iter().cloned()).collect();
    product.file_taggers.extend(self.file_taggers(table)?);

    if let Some(groups) = table.get::<Option<LuaTable>>("groups")? {
      for (index, group) in groups.sequence_values::<LuaTable>().enumerate() {
        let group = self.parse_group(&group?, index, &product)?;
        product.groups.push(group);
      }
    }
    Ok(product)
  }

  fn parse_group(&self, table: &LuaTable, index: usize, product: &Product) -> Result<Group, LoadError> {
    let name = table
      .get::<Option<String>>("name")?
      .unwrap_or_else(|| format!("{} group {}", product.name, index + 1));
    let enabled = table.get::<Option<bool>>("condition")?.unwrap_or(true);
    let prefix = table.get::<Option<String>>("prefix")?.unwrap_or_default();
    let group_tags = tags(table, "tags")?;

    let mut properties: PropertyMapPtr = product.properties.clone();
    let overrides = self.property_table(table, "properties")?;
    let mut path = Vec::new();
    overlay_shared(&mut properties, &overrides, &mut path);
    if let Some(install) = table.get::<Option<bool>>("install")? {
      PropertyMap::set(&mut properties, &[CORE_NAMESPACE, "install"], install.into());
    }
    if let Some(install_dir) = table.get::<Option<String>>("install_dir")? {
      PropertyMap::set(&mut properties, &[CORE_NAMESPACE, "installDir"], install_dir.into());
    }

    let file_tags_for = |path: &Path| {
      let file_name = path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
      let mut file_tags = group_tags.clone();
      file_tags.extend(product.file_tags_for_file_name(&file_name));
      file_tags
    };

    let mut files = Vec::new();
    let mut patterns = Vec::new();
    for entry in strings(table, "files")? {
      if entry.contains(['*', '?', '[']) {
        patterns.push(entry);
        continue;
      }
      let path = self.resolve_path(&product.source_directory, &format!("{}{}", prefix, entry));
      if enabled && !path.exists() {
        return Err(LoadError::MissingFile {
          location: self.location.clone(),
          path,
        });
      }
      files.push(Arc::new(SourceArtifact {
        file_tags: file_tags_for(&path),
        absolute_file_path: path,
        properties: properties.clone(),
      }));
    }

    let wildcards = (!patterns.is_empty()).then(|| SourceWildCards {
      prefix,
      patterns,
      exclude_patterns: Vec::new(),
      files: Vec::new(),
    });

    let mut group = Group {
      name,
      enabled,
      location: self.location.clone(),
      files,
      wildcards,
      properties,
    };
    if let Some(wildcards) = group.wildcards.as_mut() {
      wildcards.exclude_patterns = strings(table, "exclude_files")?;
    }
    group
      .refresh_wildcards(&product.source_directory, file_tags_for, self.cancel)
      .map_err(|e| match e {
        WildcardError::Canceled => LoadError::Canceled,
        e => LoadError::Wildcard(e),
      })?;
    Ok(group)
  }
}

fn strings(table: &LuaTable, key: &str) -> LuaResult<Vec<String>> {
  match table.get::<LuaValue>(key)? {
    LuaValue::Nil => Ok(Vec::new()),
    LuaValue::String(s) => Ok(vec![s.to_str()?.to_string()]),
    LuaValue::Table(t) => t.sequence_values::<String>().collect(),
    other => Err(LuaError::external(format!(
      "'{}' must be a string or a list of strings, not {}",
      key,
      other.type_name()
    ))),
  }
}

fn tags(table: &LuaTable, key: &str) -> LuaResult<FileTags> {
  Ok(strings(table, key)?.into_iter().collect())
}

/// Writes every leaf of `overrides` into `target`, keeping sibling keys of nested maps.
fn overlay(target: &mut BTreeMap<String, PropertyValue>, overrides: &BTreeMap<String, PropertyValue>, path: &mut Vec<String>) {
  for (key, value) in overrides {
    path.push(key.clone());
    match value {
      PropertyValue::Map(nested) if !nested.is_empty() => overlay(target, nested, path),
      _ => {
        let keys: Vec<&str> = path.iter().map(String::as_str).collect();
        insert_at_path(target, &keys, value.clone());
      }
    }
    path.pop();
  }
}

/// Like [`overlay`], but through [`PropertyMap::set`] so a shared map is copied first.
fn overlay_shared(target: &mut PropertyMapPtr, overrides: &BTreeMap<String, PropertyValue>, path: &mut Vec<String>) {
  for (key, value) in overrides {
    path.push(key.clone());
    match value {
      PropertyValue::Map(nested) if !nested.is_empty() => overlay_shared(target, nested, path),
      _ => {
        let keys: Vec<&str> = path.iter().map(String::as_str).collect();
        PropertyMap::set(target, &keys, value.clone());
      }
    }
    path.pop();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::fs;
  use tempfile::TempDir;

  const PROJECT: &str = r#"
return {
  platform_environment = { PLATFORM = "test" },
  modules = {
    base = {
      build_environment = [[ putenv("X", "1") ]],
      properties = { level = 1 },
    },
    cc = {
      depends = { "base" },
      properties = { compiler = "cc", flags = { "-Wall" } },
      file_taggers = { { pattern = "*.c", tags = { "c" } } },
      rules = {
        {
          inputs = { "c" },
          prepare = [[ return {} ]],
          outputs = { { file_name = [[ input.base .. ".o" ]], tags = { "obj" } } },
        },
      },
    },
  },
  products = {
    {
      name = "app",
      type = "application",
      modules = { "cc" },
      module_properties = { cc = { compiler = "gcc" } },
      groups = {
        { name = "main", files = { "main.c" } },
        { name = "extra", prefix = "src/", files = { "*.c" }, exclude_files = { "skip.c" }, install = true, install_dir = "share" },
      },
    },
    { name = "tool", depends = { "app" } },
  },
}
"#;

  fn write_tree() -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("project.lua"), PROJECT).unwrap();
    fs::write(temp.path().join("main.c"), "").unwrap();
    fs::create_dir_all(temp.path().join("src")).unwrap();
    fs::write(temp.path().join("src/util.c"), "").unwrap();
    fs::write(temp.path().join("src/skip.c"), "").unwrap();
    temp
  }

  fn params(temp: &TempDir) -> SetupProjectParameters {
    let mut params = SetupProjectParameters::new(temp.path().join("project.lua"));
    params.build_root = Some(temp.path().join("out"));
    params
  }

  #[test]
  fn loads_products_modules_and_groups() {
    let temp = write_tree();
    let project = load_project(&params(&temp), &CancelToken::new()).unwrap();

    assert_eq!(project.id(), "default-debug");
    assert!(project.build_directory.ends_with("out/default-debug"));
    assert_eq!(project.platform_environment["PLATFORM"], "test");
    assert_eq!(project.products.len(), 2);

    let app = project.product("app").unwrap();
    let module_names: Vec<_> = app.modules.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(module_names, vec!["cc", "base"]);
    assert_eq!(app.rules.len(), 1);
    assert!(Arc::ptr_eq(&app.rules[0].module, &app.modules[0]));

    let cc = app.properties.module_properties("cc").unwrap();
    assert_eq!(cc["compiler"], PropertyValue::from("gcc"));
    assert_eq!(cc["flags"], PropertyValue::List(vec!["-Wall".into()]));

    let files: Vec<_> = app
      .all_files()
      .iter()
      .map(|a| a.absolute_file_path.file_name().unwrap().to_string_lossy().into_owned())
      .collect();
    assert_eq!(files, vec!["main.c", "util.c"]);
    assert!(app.all_files().iter().all(|a| a.file_tags.contains("c")));
  }

  #[test]
  fn groups_share_or_copy_the_product_map() {
    let temp = write_tree();
    let project = load_project(&params(&temp), &CancelToken::new()).unwrap();
    let app = project.product("app").unwrap();

    assert!(Arc::ptr_eq(&app.groups[0].properties, &app.properties));
    assert!(!Arc::ptr_eq(&app.groups[1].properties, &app.properties));
    assert_eq!(
      app.groups[1].properties.core_property("install"),
      Some(&PropertyValue::Bool(true))
    );
    assert_eq!(app.properties.core_property("install"), Some(&PropertyValue::Bool(false)));
    let util = &app.groups[1].all_files()[0];
    assert!(Arc::ptr_eq(&util.properties, &app.groups[1].properties));
  }

  #[test]
  fn unknown_module_is_reported() {
    let temp = TempDir::new().unwrap();
    fs::write(
      temp.path().join("project.lua"),
      r#"return { products = { { name = "app", modules = { "missing" } } } }"#,
    )
    .unwrap();
    let err = load_project(&params(&temp), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, LoadError::UnknownModule { ref module, .. } if module == "missing"));
  }

  #[test]
  fn unknown_product_dependency_is_reported() {
    let temp = TempDir::new().unwrap();
    fs::write(
      temp.path().join("project.lua"),
      r#"return { products = { { name = "app", depends = { "lib" } } } }"#,
    )
    .unwrap();
    let err = load_project(&params(&temp), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, LoadError::UnknownProduct { ref dependency, .. } if dependency == "lib"));
  }

  #[test]
  fn missing_explicit_file_is_reported() {
    let temp = TempDir::new().unwrap();
    fs::write(
      temp.path().join("project.lua"),
      r#"return { products = { { name = "app", groups = { { files = { "nope.c" } } } } } }"#,
    )
    .unwrap();
    let err = load_project(&params(&temp), &CancelToken::new()).unwrap_err();
    assert!(matches!(err, LoadError::MissingFile { .. }));
  }

  #[test]
  fn canceled_before_products() {
    let temp = write_tree();
    let cancel = CancelToken::new();
    cancel.cancel();
    assert!(matches!(load_project(&params(&temp), &cancel), Err(LoadError::Canceled)));
  }
}
