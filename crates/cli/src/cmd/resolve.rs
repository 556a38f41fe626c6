//! `quarry resolve`: resolve the project and store its build graph.

use anyhow::Result;

use quarry_lib::buildgraph::BuildGraphStore;

use crate::ProjectArgs;
use crate::jobs::{resolve, runtime};
use crate::output::{print_json, print_stat, print_success};

pub fn cmd_resolve(args: &ProjectArgs, json: bool) -> Result<()> {
  let project = runtime()?.block_on(resolve(args, json))?;
  let store = BuildGraphStore::for_project(&project);

  if json {
    print_json(&serde_json::json!({
      "id": project.id(),
      "build_directory": project.build_directory,
      "build_graph": store.path(),
      "products": project.products.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
    }))?;
  } else {
    print_success(&format!("Resolved {}", project.id()));
    print_stat("Products", &project.products.len().to_string());
    print_stat("Build directory", &project.build_directory.display().to_string());
    print_stat("Build graph", &store.path().display().to_string());
  }
  Ok(())
}
