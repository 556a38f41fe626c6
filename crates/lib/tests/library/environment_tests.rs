//! Module environment setup through a loaded project.

use std::collections::BTreeMap;

use quarry_lib::cancel::CancelToken;
use quarry_lib::environment::{EnvironmentError, EnvironmentKind, topological_module_order};
use quarry_lib::loader::load_project;
use quarry_lib::script::ScriptEngine;

use super::common::TestProject;

const LAYERED: &str = r#"
return {
  platform_environment = { PLATFORM = "test-os" },
  modules = {
    base = { build_environment = [[ putenv("X", "1") ]] },
    derived = {
      depends = { "base" },
      build_environment = [[ putenv("Y", getenv("X") .. "2") ]],
      run_environment = [[ putenv("RUN", prefix .. getenv("PLATFORM")) ]],
      properties = { prefix = "run-" },
    },
  },
  products = {
    { name = "app", modules = { "derived" } },
  },
}
"#;

#[test]
fn derived_module_sees_base_exports() {
  let project = TestProject::new(LAYERED);
  let resolved = load_project(&project.params(), &CancelToken::new()).unwrap();
  let app = resolved.product("app").unwrap();

  let mut engine = ScriptEngine::new();
  let env = app
    .setup_environment(&mut engine, EnvironmentKind::Build, &resolved, &BTreeMap::new())
    .unwrap();
  assert_eq!(env.get("X").map(String::as_str), Some("1"));
  assert_eq!(env.get("Y").map(String::as_str), Some("12"));
  assert_eq!(env.get("PLATFORM").map(String::as_str), Some("test-os"));
}

#[test]
fn run_environment_uses_module_properties() {
  let project = TestProject::new(LAYERED);
  let resolved = load_project(&project.params(), &CancelToken::new()).unwrap();
  let app = resolved.product("app").unwrap();

  let mut engine = ScriptEngine::new();
  let env = app
    .setup_environment(&mut engine, EnvironmentKind::Run, &resolved, &BTreeMap::new())
    .unwrap();
  assert_eq!(env.get("RUN").map(String::as_str), Some("run-test-os"));
  // base has no run script, so its build script stands in.
  assert_eq!(env.get("X").map(String::as_str), Some("1"));
}

#[test]
fn resolution_is_deterministic_across_engines() {
  let project = TestProject::new(LAYERED);
  let base = BTreeMap::from([("HOME".to_string(), "/home/test".to_string())]);

  let first = load_project(&project.params(), &CancelToken::new()).unwrap();
  let second = load_project(&project.params(), &CancelToken::new()).unwrap();
  let a = first
    .product("app")
    .unwrap()
    .setup_environment(&mut ScriptEngine::new(), EnvironmentKind::Build, &first, &base)
    .unwrap()
    .clone();
  let b = second
    .product("app")
    .unwrap()
    .setup_environment(&mut ScriptEngine::new(), EnvironmentKind::Build, &second, &base)
    .unwrap()
    .clone();
  assert_eq!(a, b);
}

#[test]
fn modules_are_ordered_after_their_dependencies() {
  let project = TestProject::new(
    r#"
return {
  modules = {
    a = { depends = { "b", "c" } },
    b = { depends = { "d" } },
    c = { depends = { "d" } },
    d = {},
  },
  products = { { name = "p", modules = { "a" } } },
}
"#,
  );
  let resolved = load_project(&project.params(), &CancelToken::new()).unwrap();
  let modules = &resolved.product("p").unwrap().modules;
  let order = topological_module_order(modules).unwrap();
  let position = |name: &str| order.iter().position(|m| m.name == name).unwrap();

  for module in &order {
    for dependency in &module.module_dependencies {
      assert!(position(dependency) < position(&module.name), "{} before {}", dependency, module.name);
    }
  }
  assert_eq!(order.len(), 4);
}

#[test]
fn script_errors_name_the_environment_kind() {
  let project = TestProject::new(
    r#"
return {
  modules = { broken = { build_environment = [[ error("no compiler") ]] } },
  products = { { name = "p", modules = { "broken" } } },
}
"#,
  );
  let resolved = load_project(&project.params(), &CancelToken::new()).unwrap();
  let product = resolved.product("p").unwrap();
  let err = product
    .setup_environment(&mut ScriptEngine::new(), EnvironmentKind::Build, &resolved, &BTreeMap::new())
    .unwrap_err();
  assert!(matches!(err, EnvironmentError::Script { .. }));
  let message = err.to_string();
  assert!(message.starts_with("Error while setting up build environment"), "{message}");
  assert!(message.contains("no compiler"), "{message}");
  assert!(product.environment(EnvironmentKind::Build).is_none());
}
