use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use mlua::prelude::*;
use tracing::trace;

use super::convert::property_to_lua;
use super::scope::{Scope, ScopeValue};
use crate::language::ScriptImport;

/// Name of the scope layer that [`ScriptEngine::import`] binds imports into.
pub const IMPORTS_LAYER: &str = "imports";

/// Embedded Lua state plus the cache of imported files.
///
/// Not `Send`: an engine lives on the thread that created it.
pub struct ScriptEngine {
  lua: Lua,
  import_cache: HashMap<PathBuf, LuaTable>,
}

impl ScriptEngine {
  pub fn new() -> Self {
    Self {
      lua: Lua::new(),
      import_cache: HashMap::new(),
    }
  }

  pub fn lua(&self) -> &Lua {
    &self.lua
  }

  /// Evaluates `source` with the visible bindings of `scope` as its environment.
  ///
  /// Names not bound in the scope resolve to Lua globals. Assignments made by the
  /// script stay in the chunk's own environment.
  pub fn evaluate(&self, source: &str, chunk_name: &str, scope: &Scope) -> LuaResult<LuaValue> {
    let env = self.environment_for(scope)?;
    self
      .lua
      .load(source)
      .set_name(format!("={}", chunk_name))
      .set_environment(env)
      .eval::<LuaValue>()
  }

  /// Like [`evaluate`](Self::evaluate) but also returns the chunk's environment,
  /// so callers can read the names the script assigned.
  pub fn evaluate_with_env(&self, source: &str, chunk_name: &str, scope: &Scope) -> LuaResult<(LuaValue, LuaTable)> {
    let env = self.environment_for(scope)?;
    let value = self
      .lua
      .load(source)
      .set_name(format!("={}", chunk_name))
      .set_environment(env.clone())
      .eval::<LuaValue>()?;
    Ok((value, env))
  }

  /// Runs a Lua file with `__dir` set to its directory and returns what it evaluates to.
  pub fn eval_file(&self, path: &Path) -> LuaResult<LuaValue> {
    let content = fs::read_to_string(path)
      .map_err(|e| LuaError::external(format!("cannot read '{}': {}", path.display(), e)))?;
    let dir = path.parent().unwrap_or(Path::new(".")).to_string_lossy().into_owned();

    let env = self.lua.create_table()?;
    env.set("__dir", dir)?;
    let mt = self.lua.create_table()?;
    mt.set("__index", self.lua.globals())?;
    env.set_metatable(Some(mt))?;

    self
      .lua
      .load(&content)
      .set_name(format!("@{}", path.display()))
      .set_environment(env)
      .eval::<LuaValue>()
  }

  fn environment_for(&self, scope: &Scope) -> LuaResult<LuaTable> {
    let env = self.lua.create_table()?;
    for (key, value) in scope.visible() {
      let value = match value {
        ScopeValue::Property(p) => property_to_lua(&self.lua, p)?,
        ScopeValue::Lua(v) => v.clone(),
      };
      env.raw_set(key, value)?;
    }
    let mt = self.lua.create_table()?;
    mt.set("__index", self.lua.globals())?;
    env.set_metatable(Some(mt))?;
    Ok(env)
  }

  /// Binds each import's files under its scope name in the [`IMPORTS_LAYER`] of `scope`.
  ///
  /// A file contributes the globals it defines and, if it returns a table, that
  /// table's entries. Files of one import are merged in order, later files winning.
  pub fn import(&mut self, imports: &[ScriptImport], scope: &mut Scope) -> LuaResult<()> {
    for import in imports {
      let merged = self.lua.create_table()?;
      for file in &import.file_paths {
        let contents = self.import_file(Path::new(file))?;
        for pair in contents.pairs::<LuaValue, LuaValue>() {
          let (k, v) = pair?;
          merged.raw_set(k, v)?;
        }
      }
      scope
        .layer_mut(IMPORTS_LAYER)
        .set(import.scope_name.clone(), LuaValue::Table(merged));
    }
    Ok(())
  }

  fn import_file(&mut self, path: &Path) -> LuaResult<LuaTable> {
    if let Some(cached) = self.import_cache.get(path) {
      return Ok(cached.clone());
    }
    trace!(file = %path.display(), "importing script file");

    let content = fs::read_to_string(path)
      .map_err(|e| LuaError::external(format!("cannot read '{}': {}", path.display(), e)))?;

    let env = self.lua.create_table()?;
    let mt = self.lua.create_table()?;
    mt.set("__index", self.lua.globals())?;
    env.set_metatable(Some(mt))?;

    let returned = self
      .lua
      .load(&content)
      .set_name(format!("@{}", path.display()))
      .set_environment(env.clone())
      .eval::<LuaValue>()?;

    let contents = self.lua.create_table()?;
    for pair in env.pairs::<LuaValue, LuaValue>() {
      let (k, v) = pair?;
      contents.raw_set(k, v)?;
    }
    if let LuaValue::Table(t) = returned {
      for pair in t.pairs::<LuaValue, LuaValue>() {
        let (k, v) = pair?;
        contents.raw_set(k, v)?;
      }
    }

    self.import_cache.insert(path.to_path_buf(), contents.clone());
    Ok(contents)
  }

  pub fn clear_imports_cache(&mut self) {
    self.import_cache.clear();
  }
}

impl Default for ScriptEngine {
  fn default() -> Self {
    Self::new()
  }
}
