//! `quarry products`: list the resolved products.

use anyhow::Result;

use crate::ProjectArgs;
use crate::jobs::{resolve, runtime};
use crate::output::{print_json, print_stat, symbols};

pub fn cmd_products(args: &ProjectArgs, json: bool) -> Result<()> {
  let project = runtime()?.block_on(resolve(args, true))?;

  if json {
    let products: Vec<_> = project
      .products
      .iter()
      .map(|p| {
        serde_json::json!({
          "name": p.name,
          "target_name": p.target_name,
          "type": p.file_tags,
          "enabled": p.enabled,
          "modules": p.modules.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
          "dependencies": p.dependencies,
          "files": p.all_files().iter().map(|f| f.absolute_file_path.clone()).collect::<Vec<_>>(),
          "destination_directory": p.destination_directory,
        })
      })
      .collect();
    return print_json(&products);
  }

  for product in &project.products {
    let state = if product.enabled { "" } else { " (disabled)" };
    println!("{} {}{}", symbols::INFO, product.name, state);
    if !product.file_tags.is_empty() {
      print_stat("type", &product.file_tags.iter().cloned().collect::<Vec<_>>().join(", "));
    }
    if !product.modules.is_empty() {
      let modules: Vec<_> = product.modules.iter().map(|m| m.name.as_str()).collect();
      print_stat("modules", &modules.join(", "));
    }
    if !product.dependencies.is_empty() {
      print_stat("depends", &product.dependencies.join(", "));
    }
    print_stat("files", &product.all_files().len().to_string());
  }
  Ok(())
}
