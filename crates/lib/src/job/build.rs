use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, warn};

use super::{Job, JobContext, JobError, open_build_graph, select_products};
use crate::builder::{BuildRequest, BuiltArtifact, ProductBuilder};
use crate::buildgraph::BuildGraphLock;
use crate::language::Project;
use crate::script::ScriptEngine;

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
  /// Report the commands without running them or touching the build graph.
  pub dry_run: bool,
  /// Continue with the remaining products after one fails.
  pub keep_going: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuildSummary {
  pub built: Vec<String>,
  pub failed: Vec<String>,
  pub executed: usize,
  pub up_to_date: usize,
}

/// Builds `products` (every enabled product when empty) and their dependencies.
pub fn build(
  project: Arc<Project>,
  products: Vec<String>,
  options: BuildOptions,
  builder: Arc<dyn ProductBuilder>,
) -> Job<BuildSummary> {
  Job::spawn("build", move |ctx| run(ctx, &project, &products, &options, builder.as_ref()))
}

fn run(
  ctx: &JobContext,
  project: &Arc<Project>,
  names: &[String],
  options: &BuildOptions,
  builder: &dyn ProductBuilder,
) -> Result<BuildSummary, JobError> {
  let selected = select_products(project, names)?;
  let _lock = BuildGraphLock::acquire(&project.build_directory, "build")?;
  let (store, mut graph) = open_build_graph(project);

  ctx.task_started("Building", Some(selected.len() as u64));
  let mut engine = ScriptEngine::new();
  let mut summary = BuildSummary::default();
  let mut built: HashMap<String, Vec<BuiltArtifact>> = HashMap::new();
  let mut failure = None;

  for (index, product) in selected.iter().enumerate() {
    if let Err(e) = ctx.checkpoint() {
      failure = Some(e);
      break;
    }
    info!(product = %product.name, "building product");
    let dependency_artifacts: Vec<BuiltArtifact> = product
      .dependencies
      .iter()
      .filter_map(|name| built.get(name))
      .flatten()
      .cloned()
      .collect();

    let request = BuildRequest {
      ctx,
      engine: &mut engine,
      project,
      product,
      data: graph.products.entry(product.name.clone()).or_default(),
      options,
      dependency_artifacts: &dependency_artifacts,
    };
    match builder.build_product(request).map_err(JobError::from) {
      Ok(result) => {
        summary.executed += result.executed;
        summary.up_to_date += result.up_to_date;
        summary.built.push(product.name.clone());
        built.insert(product.name.clone(), result.artifacts);
      }
      Err(JobError::Failed(e)) if options.keep_going => {
        warn!(product = %product.name, error = %e, "product failed, continuing");
        summary.failed.push(product.name.clone());
      }
      Err(e) => {
        failure = Some(e);
        break;
      }
    }
    ctx.task_progress(index as u64 + 1);
  }

  if !options.dry_run {
    let stored = store.store(&graph);
    if let (Some(_), Err(e)) = (&failure, &stored) {
      warn!(error = %e, "failed to store build graph after failed build");
    }
    if failure.is_none() {
      stored?;
    }
  }
  if let Some(e) = failure {
    return Err(e);
  }
  if !summary.failed.is_empty() {
    return Err(JobError::failed(format!("failed to build {}", summary.failed.join(", "))));
  }
  info!(
    products = summary.built.len(),
    executed = summary.executed,
    up_to_date = summary.up_to_date,
    "build finished"
  );
  Ok(summary)
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use crate::builder::RuleBuilder;
  use crate::buildgraph::BuildGraphStore;
  use crate::job::{JobEvent, setup_project};
  use crate::loader::SetupProjectParameters;
  use std::fs;
  use std::path::Path;
  use tempfile::TempDir;

  const PROJECT: &str = r#"
return {
  modules = {
    copy = {
      build_environment = [[ putenv("SUFFIX", "!") ]],
      properties = { marker = "copied" },
      file_taggers = { { pattern = "*.txt", tags = { "text" } } },
      rules = {
        {
          inputs = { "text" },
          prepare = [[
            return {
              {
                program = "/bin/sh",
                arguments = { "-c", "cat \"$1\" > \"$2\"; echo \"$SUFFIX\" >> \"$2\"", "sh", input.path, output.path },
                description = marker .. " " .. input.file_name,
                highlight = "codegen",
              },
            }
          ]],
          outputs = { { file_name = [[ input.base .. ".out" ]], tags = { "out" } } },
        },
        {
          inputs = { "out" },
          multiplex = true,
          prepare = [[
            local args = { "-c", "cat \"$@\" > " .. output.path, "sh" }
            for _, i in ipairs(inputs) do table.insert(args, i.path) end
            return { { program = "/bin/sh", arguments = args, description = "joining" } }
          ]],
          outputs = { { file_name = [[ "all.txt" ]], tags = { "joined" } } },
        },
      },
    },
  },
  products = {
    { name = "docs", modules = { "copy" }, groups = { { files = { "*.txt" } } } },
  },
}
"#;

  fn write_tree(root: &Path) {
    fs::write(root.join("project.lua"), PROJECT).unwrap();
    fs::write(root.join("a.txt"), "alpha\n").unwrap();
    fs::write(root.join("b.txt"), "beta\n").unwrap();
  }

  async fn resolve(root: &Path) -> Arc<Project> {
    let mut params = SetupProjectParameters::new(root.join("project.lua"));
    params.build_root = Some(root.join("out"));
    params.environment.insert("PATH".to_string(), "/usr/bin:/bin".to_string());
    setup_project(params).wait().await.unwrap()
  }

  async fn run_build(project: &Arc<Project>, options: BuildOptions) -> (Vec<JobEvent>, Result<BuildSummary, JobError>) {
    let builder = Arc::new(RuleBuilder::new(
      [("PATH".to_string(), "/usr/bin:/bin".to_string())].into(),
    ));
    let mut job = build(project.clone(), Vec::new(), options, builder);
    let mut events = Vec::new();
    while let Some(event) = job.next_event().await {
      events.push(event);
    }
    (events, job.wait().await)
  }

  #[tokio::test]
  async fn builds_then_skips_up_to_date_outputs() {
    let temp = TempDir::new().unwrap();
    write_tree(temp.path());
    let project = resolve(temp.path()).await;

    let (events, summary) = run_build(&project, BuildOptions::default()).await;
    let summary = summary.unwrap();
    assert_eq!(summary.executed, 3);
    assert_eq!(summary.up_to_date, 0);
    assert!(events.contains(&JobEvent::CommandDescription {
      highlight: "codegen".to_string(),
      message: "copied a.txt".to_string(),
    }));
    assert_eq!(
      events.iter().filter(|e| matches!(e, JobEvent::ProcessResult(_))).count(),
      3
    );
    assert_eq!(events.last(), Some(&JobEvent::Finished { success: true }));

    let dest = project.product("docs").unwrap().destination_directory.clone();
    assert_eq!(fs::read_to_string(dest.join("a.out")).unwrap(), "alpha\n!\n");
    assert_eq!(fs::read_to_string(dest.join("all.txt")).unwrap(), "alpha\n!\nbeta\n!\n");

    let graph = BuildGraphStore::for_project(&project).load().unwrap().unwrap();
    let data = &graph.products["docs"];
    assert_eq!(data.artifacts.len(), 3);
    assert!(data.artifacts[&dest.join("a.out")].time_stamp.is_known());

    let (_, again) = run_build(&project, BuildOptions::default()).await;
    let again = again.unwrap();
    assert_eq!(again.executed, 0);
    assert_eq!(again.up_to_date, 3);
  }

  #[tokio::test]
  async fn dry_run_describes_without_running() {
    let temp = TempDir::new().unwrap();
    write_tree(temp.path());
    let project = resolve(temp.path()).await;

    let options = BuildOptions {
      dry_run: true,
      ..Default::default()
    };
    let (events, summary) = run_build(&project, options).await;
    assert_eq!(summary.unwrap().executed, 3);
    assert!(!events.iter().any(|e| matches!(e, JobEvent::ProcessResult(_))));
    let dest = &project.product("docs").unwrap().destination_directory;
    assert!(!dest.join("a.out").exists());
  }

  #[tokio::test]
  async fn failing_command_fails_the_job() {
    let temp = TempDir::new().unwrap();
    write_tree(temp.path());
    let project = resolve(temp.path()).await;
    let dest = project.product("docs").unwrap().destination_directory.clone();
    fs::create_dir_all(&dest).unwrap();
    // A directory in place of an output makes the redirection fail.
    fs::create_dir_all(dest.join("a.out")).unwrap();

    let (events, summary) = run_build(&project, BuildOptions::default()).await;
    let JobError::Failed(info) = summary.unwrap_err() else {
      panic!("expected a failure");
    };
    assert!(info.message.contains("exit code"), "{}", info.message);
    assert_eq!(events.last(), Some(&JobEvent::Finished { success: false }));
  }
}
