use std::collections::HashMap;
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use super::JobError;
use crate::language::{Product, Project};

/// Products named in `names` (all enabled products when empty) together with the
/// products they depend on, dependencies first.
///
/// Disabled products are skipped unless named explicitly.
pub fn select_products(project: &Project, names: &[String]) -> Result<Vec<Arc<Product>>, JobError> {
  let mut graph = DiGraph::<usize, ()>::new();
  let mut nodes = HashMap::new();
  let mut pending: Vec<usize> = Vec::new();

  if names.is_empty() {
    pending.extend(
      project
        .products
        .iter()
        .enumerate()
        .filter(|(_, p)| p.enabled)
        .map(|(i, _)| i),
    );
  } else {
    for name in names {
      let index = project
        .products
        .iter()
        .position(|p| &p.name == name)
        .ok_or_else(|| JobError::failed(format!("no such product '{}'", name)))?;
      pending.push(index);
    }
  }

  while let Some(index) = pending.pop() {
    if nodes.contains_key(&index) {
      continue;
    }
    nodes.insert(index, graph.add_node(index));
    for dependency in &project.products[index].dependencies {
      if let Some(dep) = project.products.iter().position(|p| &p.name == dependency) {
        pending.push(dep);
      }
    }
  }

  for (&index, &node) in &nodes {
    for dependency in &project.products[index].dependencies {
      if let Some(dep) = project.products.iter().position(|p| &p.name == dependency)
        && let Some(&dep_node) = nodes.get(&dep)
      {
        graph.add_edge(dep_node, node, ());
      }
    }
  }

  let order = toposort(&graph, None).map_err(|cycle| {
    let name = &project.products[graph[cycle.node_id()]].name;
    JobError::failed(format!("product dependency cycle involving '{}'", name))
  })?;
  Ok(order.into_iter().map(|node| project.products[graph[node]].clone()).collect())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::language::{CodeLocation, PropertyMap};
  use std::collections::BTreeMap;

  fn project(products: &[(&str, &[&str], bool)]) -> Project {
    let mut project = Project::new(CodeLocation::default(), BTreeMap::new());
    for (name, deps, enabled) in products {
      let mut product = Product::new(*name, PropertyMap::shared(BTreeMap::new()));
      product.dependencies = deps.iter().map(|d| d.to_string()).collect();
      product.enabled = *enabled;
      project.products.push(Arc::new(product));
    }
    project
  }

  fn names(products: &[Arc<Product>]) -> Vec<&str> {
    products.iter().map(|p| p.name.as_str()).collect()
  }

  #[test]
  fn dependencies_come_first() {
    let project = project(&[("app", &["lib"], true), ("lib", &["core"], true), ("core", &[], true)]);
    let selected = select_products(&project, &["app".to_string()]).unwrap();
    assert_eq!(names(&selected), vec!["core", "lib", "app"]);
  }

  #[test]
  fn empty_selection_means_enabled_products() {
    let project = project(&[("app", &[], true), ("off", &[], false)]);
    let selected = select_products(&project, &[]).unwrap();
    assert_eq!(names(&selected), vec!["app"]);

    let explicit = select_products(&project, &["off".to_string()]).unwrap();
    assert_eq!(names(&explicit), vec!["off"]);
  }

  #[test]
  fn unknown_names_and_cycles_fail() {
    let project = project(&[("a", &["b"], true), ("b", &["a"], true)]);
    assert!(select_products(&project, &["zzz".to_string()]).is_err());
    assert!(select_products(&project, &[]).is_err());
  }
}
