use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

use super::EnvironmentError;
use crate::language::Module;

/// Orders `modules` so that every module comes after all of its dependencies.
///
/// The walk starts at the modules nothing depends on, in list order, and emits each
/// module's dependencies depth-first in their declared order before the module itself.
pub fn topological_module_order(modules: &[Arc<Module>]) -> Result<Vec<Arc<Module>>, EnvironmentError> {
  let mut index: HashMap<&str, usize> = HashMap::new();
  for (i, module) in modules.iter().enumerate() {
    index.entry(module.name.as_str()).or_insert(i);
  }

  let mut graph = DiGraph::<usize, ()>::new();
  let nodes: Vec<_> = (0..modules.len()).map(|i| graph.add_node(i)).collect();
  let mut has_parent = vec![false; modules.len()];
  let mut children: Vec<Vec<usize>> = vec![Vec::new(); modules.len()];

  for (i, module) in modules.iter().enumerate() {
    for dependency in &module.module_dependencies {
      let Some(&dep) = index.get(dependency.as_str()) else {
        return Err(EnvironmentError::UnknownModule {
          module: module.name.clone(),
          dependency: dependency.clone(),
        });
      };
      graph.add_edge(nodes[dep], nodes[i], ());
      children[i].push(dep);
      has_parent[dep] = true;
    }
  }

  toposort(&graph, None).map_err(|cycle| EnvironmentError::Cycle {
    module: modules[graph[cycle.node_id()]].name.clone(),
  })?;

  let mut emitted = HashSet::new();
  let mut order = Vec::with_capacity(modules.len());
  for root in (0..modules.len()).filter(|&i| !has_parent[i]) {
    visit(root, modules, &children, &mut emitted, &mut order);
  }
  Ok(order)
}

fn visit<'a>(
  i: usize,
  modules: &'a [Arc<Module>],
  children: &[Vec<usize>],
  emitted: &mut HashSet<&'a str>,
  order: &mut Vec<Arc<Module>>,
) {
  if emitted.contains(modules[i].name.as_str()) {
    return;
  }
  for &child in &children[i] {
    visit(child, modules, children, emitted, order);
  }
  emitted.insert(modules[i].name.as_str());
  order.push(modules[i].clone());
}

#[cfg(test)]
mod tests {
  use super::*;

  fn names(order: &[Arc<Module>]) -> Vec<&str> {
    order.iter().map(|m| m.name.as_str()).collect()
  }

  fn position(order: &[Arc<Module>], name: &str) -> usize {
    order.iter().position(|m| m.name == name).unwrap()
  }

  #[test]
  fn dependencies_come_first() {
    let modules = vec![
      Arc::new(Module::new("app").depends_on("cpp").depends_on("qt")),
      Arc::new(Module::new("qt").depends_on("cpp")),
      Arc::new(Module::new("cpp").depends_on("toolchain")),
      Arc::new(Module::new("toolchain")),
    ];
    let order = topological_module_order(&modules).unwrap();
    assert_eq!(names(&order), vec!["toolchain", "cpp", "qt", "app"]);

    for module in &modules {
      for dep in &module.module_dependencies {
        assert!(position(&order, dep) < position(&order, &module.name));
      }
    }
  }

  #[test]
  fn independent_roots_follow_list_order() {
    let modules = vec![Arc::new(Module::new("b")), Arc::new(Module::new("a"))];
    let order = topological_module_order(&modules).unwrap();
    assert_eq!(names(&order), vec!["b", "a"]);
  }

  #[test]
  fn unknown_dependency_is_an_error() {
    let modules = vec![Arc::new(Module::new("derived").depends_on("base"))];
    let err = topological_module_order(&modules).unwrap_err();
    assert!(matches!(
      err,
      EnvironmentError::UnknownModule { ref module, ref dependency } if module == "derived" && dependency == "base"
    ));
  }

  #[test]
  fn cycles_are_rejected() {
    let modules = vec![
      Arc::new(Module::new("a").depends_on("b")),
      Arc::new(Module::new("b").depends_on("a")),
    ];
    assert!(matches!(
      topological_module_order(&modules),
      Err(EnvironmentError::Cycle { .. })
    ));
  }
}
