use std::sync::Arc;

use tracing::info;

use super::{Job, JobContext, JobError, open_build_graph};
use crate::buildgraph::BuildGraphLock;
use crate::language::Project;
use crate::loader::{SetupProjectParameters, load_project};

/// Resolves the project described by `params`, carries over the stored build data and
/// stores the new build graph.
pub fn setup_project(params: SetupProjectParameters) -> Job<Arc<Project>> {
  Job::spawn("resolve", move |ctx| run(ctx, &params))
}

fn run(ctx: &JobContext, params: &SetupProjectParameters) -> Result<Arc<Project>, JobError> {
  ctx.task_started("Resolving project", None);
  let project = Arc::new(load_project(params, ctx.cancel_token())?);
  ctx.checkpoint()?;

  let _lock = BuildGraphLock::acquire(&project.build_directory, "resolve")?;
  let (store, graph) = open_build_graph(&project);
  store.store(&graph)?;

  info!(
    id = project.id(),
    products = project.products.len(),
    graph = %store.path().display(),
    "project set up"
  );
  Ok(project)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::buildgraph::BuildGraphStore;
  use crate::job::JobEvent;
  use std::fs;
  use tempfile::TempDir;

  #[tokio::test]
  async fn resolves_and_stores_the_graph() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("main.c"), "").unwrap();
    fs::write(
      temp.path().join("project.lua"),
      r#"return { products = { { name = "app", groups = { { files = { "main.c" } } } } } }"#,
    )
    .unwrap();
    let mut params = SetupProjectParameters::new(temp.path().join("project.lua"));
    params.build_root = Some(temp.path().join("out"));

    let mut job = setup_project(params);
    let mut events = Vec::new();
    while let Some(event) = job.next_event().await {
      events.push(event);
    }
    assert_eq!(events.last(), Some(&JobEvent::Finished { success: true }));

    let project = job.wait().await.unwrap();
    let stored = BuildGraphStore::for_project(&project).load().unwrap().unwrap();
    assert_eq!(stored.project.products.len(), 1);
    assert_eq!(stored.project.id(), "default-debug");
  }

  #[tokio::test]
  async fn load_errors_fail_the_job() {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("project.lua"), "return 42").unwrap();
    let params = SetupProjectParameters::new(temp.path().join("project.lua"));

    let job = setup_project(params);
    let err = job.wait().await.unwrap_err();
    let JobError::Failed(info) = err else {
      panic!("expected a failure");
    };
    assert!(info.message.contains("must return a table"));
    assert!(info.location.is_some());
  }
}
