use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use mlua::prelude::*;
use tracing::debug;

use super::{EnvironmentError, EnvironmentKind, ProcessEnvironment, topological_module_order};
use crate::language::{Module, PrepareScript, Product, Project, PropertyMap, PropertyValue};
use crate::script::{IMPORTS_LAYER, Scope, ScriptEngine};

const MODULE_LAYER: &str = "module";
const INTRINSICS_LAYER: &str = "intrinsics";

/// Computes the `kind` environment of a set of modules.
///
/// Starts from `base_env` overlaid with the project's platform environment, then runs
/// each module's setup script in dependency order. A failing script aborts the whole
/// computation.
pub fn resolve_environment(
  engine: &mut ScriptEngine,
  kind: EnvironmentKind,
  modules: &[Arc<Module>],
  product_properties: &PropertyMap,
  project: &Project,
  base_env: &ProcessEnvironment,
) -> Result<ProcessEnvironment, EnvironmentError> {
  let mut seed = base_env.clone();
  seed.extend(project.platform_environment.iter().map(|(k, v)| (k.clone(), v.clone())));
  let env = Rc::new(RefCell::new(seed));

  let order = topological_module_order(modules)?;
  engine.clear_imports_cache();

  let script_error = |e: LuaError| EnvironmentError::Script {
    kind,
    message: e.to_string(),
  };

  let mut scope = Scope::new();
  scope.layer_mut(IMPORTS_LAYER);
  scope.layer_mut(MODULE_LAYER);
  register_intrinsics(engine.lua(), &mut scope, &env).map_err(script_error)?;

  for module in &order {
    let Some(script) = setup_script(module, kind) else {
      continue;
    };
    debug!(module = %module.name, kind = %kind, "running environment setup script");

    engine.import(&module.imports, &mut scope).map_err(script_error)?;

    let layer = scope.layer_mut(MODULE_LAYER);
    layer.clear();
    for dependency in &module.module_dependencies {
      if let Some(properties) = product_properties.module_properties(dependency) {
        layer.set(dependency.clone(), PropertyValue::Map(properties.clone()));
      }
    }
    if let Some(properties) = product_properties.module_properties(&module.name) {
      for (key, value) in properties {
        layer.set(key.clone(), value.clone());
      }
    }

    let chunk_name = if script.location.is_valid() {
      script.location.to_string()
    } else {
      module.name.clone()
    };
    engine
      .evaluate(&script.script, &chunk_name, &scope)
      .map_err(script_error)?;
  }

  let result = env.borrow().clone();
  Ok(result)
}

/// The script to run for `kind`; the run environment falls back to the build script.
fn setup_script(module: &Module, kind: EnvironmentKind) -> Option<&PrepareScript> {
  let defined = |script: &PrepareScript| !script.script.trim().is_empty();
  let build = &module.setup_build_environment_script;
  let run = &module.setup_run_environment_script;
  match kind {
    EnvironmentKind::Build => Some(build).filter(|s| defined(s)),
    EnvironmentKind::Run => Some(run).filter(|s| defined(s)).or(Some(build).filter(|s| defined(s))),
  }
}

fn register_intrinsics(lua: &Lua, scope: &mut Scope, env: &Rc<RefCell<ProcessEnvironment>>) -> LuaResult<()> {
  let getenv = {
    let env = env.clone();
    lua.create_function(move |_, name: String| Ok(env.borrow().get(&name).cloned()))?
  };
  let putenv = {
    let env = env.clone();
    lua.create_function(move |_, (name, value): (String, String)| {
      env.borrow_mut().insert(name, value);
      Ok(())
    })?
  };

  let layer = scope.layer_mut(INTRINSICS_LAYER);
  layer.set("getenv", LuaValue::Function(getenv));
  layer.set("putenv", LuaValue::Function(putenv));
  Ok(())
}

impl Product {
  /// The product's `kind` environment, computed on first use and cached afterwards.
  ///
  /// A failed computation caches nothing.
  pub fn setup_environment(
    &self,
    engine: &mut ScriptEngine,
    kind: EnvironmentKind,
    project: &Project,
    base_env: &ProcessEnvironment,
  ) -> Result<&ProcessEnvironment, EnvironmentError> {
    let cache = self.environment_cache(kind);
    if let Some(env) = cache.get() {
      return Ok(env);
    }
    let env = resolve_environment(engine, kind, &self.modules, &self.properties, project, base_env)?;
    Ok(cache.get_or_init(|| env))
  }

  /// The cached `kind` environment, if it has been computed.
  pub fn environment(&self, kind: EnvironmentKind) -> Option<&ProcessEnvironment> {
    self.environment_cache(kind).get()
  }
}
