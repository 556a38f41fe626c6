//! Build graph storage of fully loaded projects.

use std::sync::Arc;

use quarry_lib::buildgraph::{BuildGraph, BuildGraphStore, FileTime, ProductBuildData, RescuableArtifactData};
use quarry_lib::buildgraph::{ChildData, rescue_build_data};
use quarry_lib::cancel::CancelToken;
use quarry_lib::language::Project;
use quarry_lib::loader::load_project;

use super::common::TestProject;

const PROJECT: &str = r#"
return {
  modules = {
    cc = { properties = { compiler = "cc" }, build_environment = [[ putenv("CC", compiler) ]] },
  },
  products = {
    {
      name = "app",
      type = "application",
      modules = { "cc" },
      groups = {
        { files = { "main.c", "src/*.c" } },
        { files = { "README" }, install = true },
      },
    },
    { name = "tool", depends = { "app" }, groups = { { files = { "tool.c" } } } },
  },
}
"#;

fn populated() -> TestProject {
  let project = TestProject::new(PROJECT);
  project.write_file("main.c", "");
  project.write_file("src/util.c", "");
  project.write_file("README", "");
  project.write_file("tool.c", "");
  project
}

fn load(project: &TestProject) -> Arc<Project> {
  Arc::new(load_project(&project.params(), &CancelToken::new()).unwrap())
}

#[test]
fn loaded_project_survives_a_store_round_trip() {
  let project = populated();
  let resolved = load(&project);
  let store = BuildGraphStore::for_project(&resolved);
  store.store(&BuildGraph::new(resolved.clone())).unwrap();

  let loaded = store.load().unwrap().unwrap();
  assert_eq!(*loaded.project, *resolved);
  assert_eq!(loaded.project.id(), "default-debug");
}

#[test]
fn shared_property_maps_stay_shared_after_loading() {
  let project = populated();
  let resolved = load(&project);
  let store = BuildGraphStore::for_project(&resolved);
  store.store(&BuildGraph::new(resolved.clone())).unwrap();
  let loaded = store.load().unwrap().unwrap();

  let app = loaded.project.product("app").unwrap();
  let plain = &app.groups[0];
  assert!(Arc::ptr_eq(&plain.properties, &app.properties));
  for artifact in plain.all_files() {
    assert!(Arc::ptr_eq(&artifact.properties, &plain.properties));
  }
  let installed = &app.groups[1];
  assert!(!Arc::ptr_eq(&installed.properties, &app.properties));
  assert!(Arc::ptr_eq(&installed.files[0].properties, &installed.properties));
}

#[test]
fn rescue_keeps_data_of_surviving_products() {
  let project = populated();
  let first = load(&project);
  let app = first.product("app").unwrap();
  let main_c = app.groups[0].files[0].absolute_file_path.clone();
  let object = app.destination_directory.join("main.o");
  let stray = project.root().join("elsewhere.o");

  let mut data = ProductBuildData::default();
  for path in [&main_c, &object, &stray] {
    data.artifacts.insert(
      path.clone(),
      RescuableArtifactData {
        time_stamp: FileTime::from_nanos(1),
        ..Default::default()
      },
    );
  }
  data.artifacts.get_mut(&object).unwrap().children = vec![
    ChildData {
      product_name: "tool".to_string(),
      product_profile: first.profile(),
      child_file_path: main_c.clone(),
      added_by_scanner: false,
    },
    ChildData {
      product_name: "tool".to_string(),
      product_profile: "other".to_string(),
      child_file_path: main_c.clone(),
      added_by_scanner: true,
    },
  ];
  let mut graph = BuildGraph::new(first.clone());
  graph.products.insert("app".to_string(), data);
  graph.products.insert("gone".to_string(), ProductBuildData::default());

  let second = load(&project);
  let rescued = rescue_build_data(&graph, &second);
  assert_eq!(rescued.keys().collect::<Vec<_>>(), ["app"]);
  let app_data = &rescued["app"];
  assert!(app_data.artifacts.contains_key(&main_c));
  assert!(app_data.artifacts.contains_key(&object));
  assert!(!app_data.artifacts.contains_key(&stray));
  assert_eq!(app_data.artifacts[&object].children.len(), 1);
  assert_eq!(app_data.artifacts[&object].children[0].product_profile, second.profile());
}

#[test]
fn rescue_forgets_removed_source_files() {
  let project = populated();
  let first = load(&project);
  let util_c = project.root().join("src/util.c");
  let util_c = dunce::canonicalize(util_c).unwrap();

  let mut data = ProductBuildData::default();
  data.artifacts.insert(util_c.clone(), RescuableArtifactData::default());
  let mut graph = BuildGraph::new(first);
  graph.products.insert("app".to_string(), data);

  std::fs::remove_file(&util_c).unwrap();
  let second = load(&project);
  let rescued = rescue_build_data(&graph, &second);
  assert!(rescued["app"].artifacts.is_empty());
}
