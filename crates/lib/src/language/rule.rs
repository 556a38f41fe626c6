//! Rules, their prepare scripts, output templates and file taggers.

use std::fmt;
use std::sync::Arc;

use glob::Pattern;
use serde::Serialize;

use super::FileTags;
use super::location::CodeLocation;
use super::module::Module;
use crate::persist::{PersistError, Persistent, PoolReader, PoolWriter};

/// A script text plus where it was declared.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PrepareScript {
  pub script: String,
  pub location: CodeLocation,
}

impl Persistent for PrepareScript {
  fn store(&self, pool: &mut PoolWriter) {
    pool.store_string(&self.script);
    self.location.store(pool);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    Ok(Self {
      script: pool.load_string()?,
      location: CodeLocation::load(pool)?,
    })
  }
}

/// Lua files imported into a script scope under one name.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScriptImport {
  pub scope_name: String,
  pub file_paths: Vec<String>,
  pub location: CodeLocation,
}

impl Persistent for ScriptImport {
  fn store(&self, pool: &mut PoolWriter) {
    pool.store_string(&self.scope_name);
    pool.store_string_list(&self.file_paths);
    self.location.store(pool);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    Ok(Self {
      scope_name: pool.load_string()?,
      file_paths: pool.load_string_list()?,
      location: CodeLocation::load(pool)?,
    })
  }
}

/// Assigns `tags` to every file whose name matches `pattern`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileTagger {
  #[serde(serialize_with = "serialize_pattern")]
  pattern: Pattern,
  pub file_tags: FileTags,
}

fn serialize_pattern<S: serde::Serializer>(pattern: &Pattern, serializer: S) -> Result<S::Ok, S::Error> {
  serializer.serialize_str(pattern.as_str())
}

impl FileTagger {
  pub fn new(pattern: &str, file_tags: FileTags) -> Result<Self, glob::PatternError> {
    Ok(Self {
      pattern: Pattern::new(pattern)?,
      file_tags,
    })
  }

  pub fn pattern(&self) -> &str {
    self.pattern.as_str()
  }

  pub fn matches(&self, file_name: &str) -> bool {
    self.pattern.matches(file_name)
  }
}

impl Persistent for FileTagger {
  fn store(&self, pool: &mut PoolWriter) {
    pool.store_string(self.pattern.as_str());
    pool.store_string_set(&self.file_tags);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    let pattern = pool.load_string()?;
    let file_tags = pool.load_string_set()?;
    let pattern = Pattern::new(&pattern).map_err(|_| PersistError::InvalidValue {
      what: "file tagger pattern",
      value: pattern.clone(),
    })?;
    Ok(Self { pattern, file_tags })
  }
}

/// A property assignment attached to a rule artifact; `name` is a dotted path.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Binding {
  pub name: Vec<String>,
  pub code: String,
  pub location: CodeLocation,
}

impl Persistent for Binding {
  fn store(&self, pool: &mut PoolWriter) {
    pool.store_string_list(&self.name);
    pool.store_string(&self.code);
    self.location.store(pool);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    Ok(Self {
      name: pool.load_string_list()?,
      code: pool.load_string()?,
      location: CodeLocation::load(pool)?,
    })
  }
}

/// Template for one output a rule produces.
///
/// `file_name` is a script expression evaluated per invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleArtifact {
  pub file_name: String,
  pub file_tags: FileTags,
  pub bindings: Vec<Binding>,
}

impl Persistent for RuleArtifact {
  fn store(&self, pool: &mut PoolWriter) {
    pool.store_string(&self.file_name);
    pool.store_string_set(&self.file_tags);
    pool.store_values(&self.bindings);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    Ok(Self {
      file_name: pool.load_string()?,
      file_tags: pool.load_string_set()?,
      bindings: pool.load_values()?,
    })
  }
}

/// A transformation from input tags to output artifacts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
  pub script: PrepareScript,
  /// The module that declared the rule; shared with the product's module list.
  pub module: Arc<Module>,
  pub imports: Vec<ScriptImport>,
  pub inputs: FileTags,
  pub usings: FileTags,
  pub explicitly_depends_on: FileTags,
  pub multiplex: bool,
  pub artifacts: Vec<RuleArtifact>,
}

impl Rule {
  /// Union of the tags of every artifact this rule creates.
  pub fn output_file_tags(&self) -> FileTags {
    self
      .artifacts
      .iter()
      .flat_map(|artifact| artifact.file_tags.iter().cloned())
      .collect()
  }
}

// [in1,in2 -> out1,out2]
impl fmt::Display for Rule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let inputs: Vec<&str> = self.inputs.iter().map(String::as_str).collect();
    let outputs: Vec<String> = self.output_file_tags().into_iter().collect();
    write!(f, "[{} -> {}]", inputs.join(","), outputs.join(","))
  }
}

impl Persistent for Rule {
  fn store(&self, pool: &mut PoolWriter) {
    self.script.store(pool);
    pool.store_shared(&self.module);
    pool.store_values(&self.imports);
    pool.store_string_set(&self.inputs);
    pool.store_string_set(&self.usings);
    pool.store_string_set(&self.explicitly_depends_on);
    pool.write_bool(self.multiplex);
    pool.store_values(&self.artifacts);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    Ok(Self {
      script: PrepareScript::load(pool)?,
      module: pool.load_shared()?,
      imports: pool.load_values()?,
      inputs: pool.load_string_set()?,
      usings: pool.load_string_set()?,
      explicitly_depends_on: pool.load_string_set()?,
      multiplex: pool.read_bool()?,
      artifacts: pool.load_values()?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::persist::{decode, encode};
  use std::collections::BTreeSet;

  fn tags(values: &[&str]) -> FileTags {
    values.iter().map(|v| v.to_string()).collect::<BTreeSet<_>>()
  }

  fn compile_rule() -> Rule {
    Rule {
      script: PrepareScript {
        script: "return {}".to_string(),
        location: CodeLocation::new("cpp.lua", 3, 1),
      },
      module: Arc::new(Module::new("cpp")),
      imports: vec![ScriptImport {
        scope_name: "helpers".to_string(),
        file_paths: vec!["/mods/helpers.lua".to_string()],
        location: CodeLocation::file("cpp.lua"),
      }],
      inputs: tags(&["cpp", "c"]),
      usings: tags(&["hpp"]),
      explicitly_depends_on: FileTags::new(),
      multiplex: false,
      artifacts: vec![
        RuleArtifact {
          file_name: "input.base .. '.o'".to_string(),
          file_tags: tags(&["obj"]),
          bindings: vec![
            Binding {
              name: vec!["cpp".to_string(), "flags".to_string()],
              code: "'-O2'".to_string(),
              location: CodeLocation::file("cpp.lua"),
            },
            Binding {
              name: vec!["cpp".to_string(), "defines".to_string()],
              code: "{}".to_string(),
              location: CodeLocation::file("cpp.lua"),
            },
          ],
        },
        RuleArtifact {
          file_name: "input.base .. '.d'".to_string(),
          file_tags: tags(&["dep"]),
          bindings: Vec::new(),
        },
      ],
    }
  }

  #[test]
  fn display_lists_inputs_and_outputs() {
    assert_eq!(compile_rule().to_string(), "[c,cpp -> dep,obj]");
  }

  #[test]
  fn bindings_keep_declaration_order() {
    let rule = compile_rule();
    let loaded: Rule = decode(&encode(&rule)).unwrap();
    assert_eq!(loaded, rule);
    let names: Vec<_> = loaded.artifacts[0].bindings.iter().map(|b| b.name.join(".")).collect();
    assert_eq!(names, vec!["cpp.flags", "cpp.defines"]);
  }

  #[test]
  fn tagger_matches_file_names() {
    let tagger = FileTagger::new("*.cpp", tags(&["cpp"])).unwrap();
    assert!(tagger.matches("main.cpp"));
    assert!(!tagger.matches("main.c"));
    let loaded: FileTagger = decode(&encode(&tagger)).unwrap();
    assert_eq!(loaded.pattern(), "*.cpp");
  }
}
