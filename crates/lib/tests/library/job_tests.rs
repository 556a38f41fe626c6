//! Jobs run back to back against one build directory.
#![cfg(unix)]

use std::sync::Arc;

use quarry_lib::builder::RuleBuilder;
use quarry_lib::buildgraph::{BuildGraphLock, BuildGraphStore};
use quarry_lib::job::{BuildOptions, BuildSummary, CleanOptions, JobError, build, clean};
use quarry_lib::language::Project;

use super::common::TestProject;

const PROJECT: &str = r#"
return {
  modules = {
    upper = {
      file_taggers = { { pattern = "*.txt", tags = { "text" } } },
      rules = {
        {
          inputs = { "text" },
          prepare = [[
            return {
              {
                program = "/bin/sh",
                arguments = { "-c", "tr a-z A-Z < \"$1\" > \"$2\"", "sh", input.path, output.path },
                description = "upper " .. input.file_name,
              },
            }
          ]],
          outputs = { { file_name = [[ input.base .. ".up" ]], tags = { "upper" } } },
        },
      },
    },
  },
  products = {
    { name = "docs", modules = { "upper" }, groups = { { files = { "*.txt" } } } },
  },
}
"#;

fn builder() -> Arc<RuleBuilder> {
  Arc::new(RuleBuilder::new(
    [("PATH".to_string(), "/usr/bin:/bin".to_string())].into(),
  ))
}

async fn run_build(project: &Arc<Project>) -> Result<BuildSummary, JobError> {
  build(project.clone(), Vec::new(), BuildOptions::default(), builder()).wait().await
}

fn tree() -> TestProject {
  let project = TestProject::new(PROJECT);
  project.write_file("a.txt", "alpha\n");
  project.write_file("b.txt", "beta\n");
  project
}

#[tokio::test]
async fn build_state_survives_re_resolution() {
  let project = tree();
  let first = project.resolve().await;
  assert_eq!(run_build(&first).await.unwrap().executed, 2);

  let second = project.resolve().await;
  let summary = run_build(&second).await.unwrap();
  assert_eq!(summary.executed, 0);
  assert_eq!(summary.up_to_date, 2);
}

#[tokio::test]
async fn new_inputs_are_built_after_re_resolution() {
  let project = tree();
  let first = project.resolve().await;
  run_build(&first).await.unwrap();

  project.write_file("c.txt", "gamma\n");
  let second = project.resolve().await;
  let summary = run_build(&second).await.unwrap();
  assert_eq!(summary.executed, 1);
  assert_eq!(summary.up_to_date, 2);

  let dest = &second.product("docs").unwrap().destination_directory;
  assert_eq!(std::fs::read_to_string(dest.join("c.up")).unwrap(), "GAMMA\n");
}

#[tokio::test]
async fn clean_then_build_runs_everything_again() {
  let project = tree();
  let resolved = project.resolve().await;
  run_build(&resolved).await.unwrap();
  let dest = resolved.product("docs").unwrap().destination_directory.clone();
  assert!(dest.join("a.up").exists());

  let cleaned = clean(resolved.clone(), Vec::new(), CleanOptions::default())
    .wait()
    .await
    .unwrap();
  assert_eq!(cleaned.removed.len(), 2);
  assert!(!dest.join("a.up").exists());
  assert!(project.root().join("a.txt").exists());

  let graph = BuildGraphStore::for_project(&resolved).load().unwrap().unwrap();
  assert!(!graph.products["docs"].artifacts.contains_key(&dest.join("a.up")));

  assert_eq!(run_build(&resolved).await.unwrap().executed, 2);
}

#[tokio::test]
async fn held_lock_fails_the_job() {
  let project = tree();
  let resolved = project.resolve().await;
  let _held = BuildGraphLock::acquire(&resolved.build_directory, "someone else").unwrap();

  let err = run_build(&resolved).await.unwrap_err();
  let JobError::Failed(info) = err else {
    panic!("expected a failure");
  };
  assert!(info.message.contains("in use"), "{}", info.message);
  assert!(info.message.contains("someone else"), "{}", info.message);
}
