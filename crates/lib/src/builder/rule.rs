use std::collections::BTreeMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use mlua::prelude::*;
use tracing::{debug, trace};

use super::process::run_process;
use super::{BuildError, BuildRequest, BuiltArtifact, ProductBuildResult, ProductBuilder};
use crate::buildgraph::{Command, FileTime, ProcessCommand, ProductBuildData, ScriptCommand};
use crate::consts::CORE_NAMESPACE;
use crate::environment::{EnvironmentKind, ProcessEnvironment};
use crate::job::JobContext;
use crate::language::{FileTags, Product, Project, PropertyValue, Rule, insert_at_path};
use crate::script::{Scope, ScriptEngine, lua_to_property};

const RULE_LAYER: &str = "rule";
const MODULE_LAYER: &str = "module";
const COMMAND_LAYER: &str = "command";

/// Applies each product rule to the artifacts carrying its input tags.
///
/// Rules run in product order and see the outputs of earlier rules. A multiplex rule
/// gets all matching artifacts in one invocation; any other rule runs once per artifact.
/// Prepare scripts see `input`/`inputs`, `output`/`outputs`, `product`, `project`, the
/// rule's module properties and its imports, and return a list of commands:
///
/// ```lua
/// return {
///   { program = "cc", arguments = { "-c", input.path, "-o", output.path }, description = "compiling" },
///   { script = "print('done')" },
/// }
/// ```
pub struct RuleBuilder {
  base_environment: ProcessEnvironment,
}

impl RuleBuilder {
  /// `base_environment` seeds every product's build environment.
  pub fn new(base_environment: ProcessEnvironment) -> Self {
    Self { base_environment }
  }
}

impl ProductBuilder for RuleBuilder {
  fn build_product(&self, request: BuildRequest<'_>) -> Result<ProductBuildResult, BuildError> {
    let BuildRequest {
      ctx,
      engine,
      project,
      product,
      data,
      options,
      dependency_artifacts,
    } = request;

    let environment = product
      .setup_environment(engine, EnvironmentKind::Build, project, &self.base_environment)?
      .clone();

    let mut available: Vec<BuiltArtifact> = product
      .all_enabled_files()
      .iter()
      .map(|artifact| BuiltArtifact {
        path: artifact.absolute_file_path.clone(),
        file_tags: artifact.file_tags.clone(),
      })
      .collect();
    let mut result = ProductBuildResult::default();

    for rule in &product.rules {
      let mut inputs: Vec<BuiltArtifact> = available
        .iter()
        .filter(|a| !a.file_tags.is_disjoint(&rule.inputs))
        .cloned()
        .collect();
      inputs.extend(
        dependency_artifacts
          .iter()
          .filter(|a| !a.file_tags.is_disjoint(&rule.usings))
          .cloned(),
      );
      if inputs.is_empty() {
        trace!(product = %product.name, rule = %rule, "no inputs for rule");
        continue;
      }
      let extra: Vec<PathBuf> = available
        .iter()
        .filter(|a| !a.file_tags.is_disjoint(&rule.explicitly_depends_on))
        .map(|a| a.path.clone())
        .collect();

      let batches = if rule.multiplex {
        vec![inputs]
      } else {
        inputs.into_iter().map(|input| vec![input]).collect()
      };
      for batch in batches {
        if ctx.is_canceled() {
          return Err(BuildError::Canceled);
        }
        let invocation = Invocation {
          engine: &mut *engine,
          project,
          product,
          rule,
          environment: &environment,
        };
        let prepared = invocation.prepare(&batch)?;

        if prepared.is_up_to_date(data, &batch, &extra) {
          debug!(product = %product.name, rule = %rule, "outputs up to date");
          result.up_to_date += 1;
        } else {
          prepared.execute(ctx, &mut *engine, options.dry_run)?;
          if !options.dry_run {
            prepared.record(data);
          }
          result.executed += 1;
        }
        available.extend(prepared.outputs.iter().cloned());
        result.artifacts.extend(prepared.outputs);
      }
    }
    Ok(result)
  }
}

struct Invocation<'a> {
  engine: &'a mut ScriptEngine,
  project: &'a Project,
  product: &'a Product,
  rule: &'a Rule,
  environment: &'a ProcessEnvironment,
}

/// A rule invocation with its outputs and commands computed.
struct Prepared {
  rule: String,
  outputs: Vec<BuiltArtifact>,
  commands: Vec<Command>,
}

impl Invocation<'_> {
  fn prepare(mut self, inputs: &[BuiltArtifact]) -> Result<Prepared, BuildError> {
    let rule_name = self.rule.to_string();
    let script_error = |source: LuaError| BuildError::Script {
      rule: rule_name.clone(),
      source,
    };

    let mut scope = Scope::new();
    self.engine.import(&self.rule.imports, &mut scope).map_err(script_error)?;

    let module = scope.layer_mut(MODULE_LAYER);
    if let Some(properties) = self.product.properties.module_properties(&self.rule.module.name) {
      for (key, value) in properties {
        module.set(key.clone(), value.clone());
      }
    }
    if let Some(core) = self.product.properties.value().get(CORE_NAMESPACE) {
      module.set(CORE_NAMESPACE, core.clone());
    }
    module.set("product", product_value(self.product));
    module.set("project", project_value(self.project));

    let input_values: Vec<PropertyValue> = inputs.iter().map(artifact_value).collect();
    let layer = scope.layer_mut(RULE_LAYER);
    layer.set("inputs", PropertyValue::List(input_values.clone()));
    if let Some(first) = input_values.first() {
      layer.set("input", first.clone());
    }

    let mut outputs = Vec::new();
    let mut output_values = Vec::new();
    for (index, artifact) in self.rule.artifacts.iter().enumerate() {
      let chunk = format!("{} output {}", rule_name, index + 1);
      let file_name = self
        .engine
        .evaluate(&format!("return {}", artifact.file_name), &chunk, &scope)
        .map_err(script_error)?;
      let file_name = match file_name {
        LuaValue::String(s) => s.to_str().map_err(script_error)?.to_string(),
        other => {
          return Err(BuildError::InvalidCommand {
            rule: rule_name.clone(),
            message: format!("output file name evaluated to {}", other.type_name()),
          });
        }
      };
      let output = BuiltArtifact {
        path: self.product.destination_directory.join(file_name),
        file_tags: artifact.file_tags.clone(),
      };

      let mut value = artifact_map(&output);
      for binding in &artifact.bindings {
        let bound = self
          .engine
          .evaluate(&format!("return {}", binding.code), &chunk, &scope)
          .and_then(lua_to_property)
          .map_err(script_error)?;
        let path: Vec<&str> = binding.name.iter().map(String::as_str).collect();
        insert_at_path(&mut value, &path, bound);
      }
      output_values.push(PropertyValue::Map(value));
      outputs.push(output);
    }

    let layer = scope.layer_mut(RULE_LAYER);
    layer.set("outputs", PropertyValue::List(output_values.clone()));
    if let Some(first) = output_values.first() {
      layer.set("output", first.clone());
    }

    let returned = self
      .engine
      .evaluate(&self.rule.script.script, &format!("{} prepare", rule_name), &scope)
      .map_err(script_error)?;
    let context = BTreeMap::from([
      ("inputs".to_string(), PropertyValue::List(input_values)),
      ("outputs".to_string(), PropertyValue::List(output_values)),
    ]);
    let commands = self.commands(returned, &rule_name, &context)?;

    Ok(Prepared {
      rule: rule_name,
      outputs,
      commands,
    })
  }

  fn commands(
    &self,
    returned: LuaValue,
    rule_name: &str,
    context: &BTreeMap<String, PropertyValue>,
  ) -> Result<Vec<Command>, BuildError> {
    let invalid = |message: String| BuildError::InvalidCommand {
      rule: rule_name.to_string(),
      message,
    };
    let script_error = |source: LuaError| BuildError::Script {
      rule: rule_name.to_string(),
      source,
    };

    let table = match returned {
      LuaValue::Nil => return Ok(Vec::new()),
      LuaValue::Table(t) => t,
      other => return Err(invalid(format!("expected a list of commands, got {}", other.type_name()))),
    };

    let mut commands = Vec::new();
    for entry in table.sequence_values::<LuaTable>() {
      let entry = entry.map_err(script_error)?;
      let description: String = entry.get::<Option<String>>("description").map_err(script_error)?.unwrap_or_default();
      let highlight: String = entry.get::<Option<String>>("highlight").map_err(script_error)?.unwrap_or_default();

      if let Some(source_code) = entry.get::<Option<String>>("script").map_err(script_error)? {
        commands.push(Command::Script(ScriptCommand {
          source_code,
          description,
          highlight,
          location: self.rule.script.location.clone(),
          properties: context.clone(),
        }));
        continue;
      }

      let program: String = entry
        .get::<Option<String>>("program")
        .map_err(script_error)?
        .ok_or_else(|| invalid("a command needs either 'program' or 'script'".to_string()))?;
      let mut environment = self.environment.clone();
      if let Some(extra) = entry
        .get::<Option<BTreeMap<String, String>>>("environment")
        .map_err(script_error)?
      {
        environment.extend(extra);
      }
      let working_directory = match entry.get::<Option<String>>("working_directory").map_err(script_error)? {
        Some(dir) => PathBuf::from(dir),
        None => self.product.destination_directory.clone(),
      };
      commands.push(Command::Process(ProcessCommand {
        program,
        arguments: entry
          .get::<Option<Vec<String>>>("arguments")
          .map_err(script_error)?
          .unwrap_or_default(),
        working_directory,
        environment,
        description,
        highlight,
        silent: entry.get::<Option<bool>>("silent").map_err(script_error)?.unwrap_or(false),
      }));
    }
    Ok(commands)
  }
}

impl Prepared {
  /// True when every output was recorded with the same commands, still has the
  /// recorded time stamp, and is not older than any input.
  fn is_up_to_date(&self, data: &ProductBuildData, inputs: &[BuiltArtifact], extra: &[PathBuf]) -> bool {
    if self.outputs.is_empty() {
      return false;
    }
    self.outputs.iter().all(|output| {
      let Some(recorded) = data.artifacts.get(&output.path) else {
        return false;
      };
      if recorded.commands != self.commands || !recorded.time_stamp.is_known() {
        return false;
      }
      if FileTime::of(&output.path) != Some(recorded.time_stamp) {
        return false;
      }
      inputs
        .iter()
        .map(|input| input.path.as_path())
        .chain(extra.iter().map(PathBuf::as_path))
        .all(|dependency| FileTime::of(dependency).is_some_and(|t| t <= recorded.time_stamp))
    })
  }

  fn execute(&self, ctx: &JobContext, engine: &mut ScriptEngine, dry_run: bool) -> Result<(), BuildError> {
    if !dry_run {
      for output in &self.outputs {
        create_parent(&output.path)?;
      }
    }

    for command in &self.commands {
      if ctx.is_canceled() {
        return Err(BuildError::Canceled);
      }
      let silent = matches!(command, Command::Process(p) if p.silent);
      if !silent {
        let message = match command.description() {
          "" => command.to_string(),
          description => description.to_string(),
        };
        ctx.command_description(command.highlight(), message);
      }
      if dry_run {
        continue;
      }

      match command {
        Command::Process(process) => {
          let result = run_process(process)?;
          let success = result.success;
          let exit_code = result.exit_code;
          ctx.process_result(result);
          if !success {
            return Err(BuildError::CommandFailed {
              command: process.command_line(),
              exit_code,
            });
          }
        }
        Command::Script(script) => {
          let mut scope = Scope::new();
          let layer = scope.layer_mut(COMMAND_LAYER);
          for (key, value) in &script.properties {
            layer.set(key.clone(), value.clone());
          }
          if let Some(PropertyValue::List(inputs)) = script.properties.get("inputs")
            && let Some(first) = inputs.first()
          {
            layer.set("input", first.clone());
          }
          if let Some(PropertyValue::List(outputs)) = script.properties.get("outputs")
            && let Some(first) = outputs.first()
          {
            layer.set("output", first.clone());
          }
          engine
            .evaluate(&script.source_code, &format!("{} script", self.rule), &scope)
            .map_err(|source| BuildError::Script {
              rule: self.rule.clone(),
              source,
            })?;
        }
      }
    }
    Ok(())
  }

  fn record(&self, data: &mut ProductBuildData) {
    for output in &self.outputs {
      let entry = data.artifacts.entry(output.path.clone()).or_default();
      entry.time_stamp = FileTime::of(&output.path).unwrap_or(FileTime::UNKNOWN);
      entry.commands = self.commands.clone();
    }
  }
}

fn create_parent(path: &Path) -> Result<(), BuildError> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(|source| BuildError::Io {
      path: parent.to_path_buf(),
      source,
    })?;
  }
  Ok(())
}

fn artifact_value(artifact: &BuiltArtifact) -> PropertyValue {
  PropertyValue::Map(artifact_map(artifact))
}

fn artifact_map(artifact: &BuiltArtifact) -> BTreeMap<String, PropertyValue> {
  let path = &artifact.path;
  let text = |s: Option<&OsStr>| PropertyValue::from(s.map(|s| s.to_string_lossy().into_owned()).unwrap_or_default());
  BTreeMap::from([
    ("path".to_string(), PropertyValue::from(path.display().to_string())),
    ("file_name".to_string(), text(path.file_name())),
    ("base".to_string(), text(path.file_stem())),
    ("suffix".to_string(), text(path.extension())),
    ("tags".to_string(), tag_list(&artifact.file_tags)),
  ])
}

fn tag_list(tags: &FileTags) -> PropertyValue {
  PropertyValue::List(tags.iter().map(|t| PropertyValue::from(t.as_str())).collect())
}

fn product_value(product: &Product) -> PropertyValue {
  PropertyValue::Map(BTreeMap::from([
    ("name".to_string(), PropertyValue::from(product.name.as_str())),
    ("target_name".to_string(), PropertyValue::from(product.target_name.as_str())),
    ("type".to_string(), tag_list(&product.file_tags)),
    (
      "source_directory".to_string(),
      PropertyValue::from(product.source_directory.display().to_string()),
    ),
    (
      "destination_directory".to_string(),
      PropertyValue::from(product.destination_directory.display().to_string()),
    ),
  ]))
}

fn project_value(project: &Project) -> PropertyValue {
  PropertyValue::Map(BTreeMap::from([
    ("id".to_string(), PropertyValue::from(project.id())),
    ("profile".to_string(), PropertyValue::from(project.profile())),
    (
      "build_directory".to_string(),
      PropertyValue::from(project.build_directory.display().to_string()),
    ),
  ]))
}
