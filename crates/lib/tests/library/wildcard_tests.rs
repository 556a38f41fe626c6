//! Group file lists with wildcards, resolved through the project loader.

use std::path::PathBuf;

use quarry_lib::cancel::CancelToken;
use quarry_lib::loader::load_project;

use super::common::TestProject;

const SOURCES: &str = r#"
return {
  modules = {
    cc = { file_taggers = { { pattern = "*.c", tags = { "c" } } } },
  },
  products = {
    {
      name = "app",
      modules = { "cc" },
      groups = {
        {
          name = "sources",
          tags = { "src" },
          files = { "NOTES", "src/**/*.c" },
          exclude_files = { "src/gen/*" },
        },
      },
    },
  },
}
"#;

fn populate(project: &TestProject) {
  project.write_file("NOTES", "");
  project.write_file("src/main.c", "");
  project.write_file("src/util.c", "");
  project.write_file("src/lib/deep.c", "");
  project.write_file("src/gen/generated.c", "");
  project.write_file("src/.cache/stale.c", "");
  project.write_file("src/header.h", "");
}

fn relative_files(project: &TestProject, files: &[PathBuf]) -> Vec<String> {
  let root = dunce::canonicalize(project.root()).unwrap();
  files
    .iter()
    .map(|path| path.strip_prefix(&root).unwrap().to_string_lossy().replace('\\', "/"))
    .collect()
}

#[test]
fn explicit_files_come_before_wildcard_matches() {
  let project = TestProject::new(SOURCES);
  populate(&project);

  let resolved = load_project(&project.params(), &CancelToken::new()).unwrap();
  let app = resolved.product("app").unwrap();
  let paths: Vec<PathBuf> = app
    .all_files()
    .iter()
    .map(|artifact| artifact.absolute_file_path.clone())
    .collect();

  assert_eq!(
    relative_files(&project, &paths),
    ["NOTES", "src/lib/deep.c", "src/main.c", "src/util.c"]
  );
}

#[test]
fn matched_files_carry_group_and_tagger_tags() {
  let project = TestProject::new(SOURCES);
  populate(&project);

  let resolved = load_project(&project.params(), &CancelToken::new()).unwrap();
  let group = &resolved.product("app").unwrap().groups[0];
  let wildcards = group.wildcards.as_ref().unwrap();
  assert_eq!(wildcards.patterns, ["src/**/*.c"]);
  assert_eq!(wildcards.exclude_patterns, ["src/gen/*"]);

  for artifact in &wildcards.files {
    assert!(artifact.file_tags.contains("c"));
    assert!(artifact.file_tags.contains("src"));
  }
  let notes = &group.files[0];
  assert!(notes.file_tags.contains("src"));
  assert!(!notes.file_tags.contains("c"));
}

#[test]
fn reloading_picks_up_new_files() {
  let project = TestProject::new(SOURCES);
  populate(&project);
  let before = load_project(&project.params(), &CancelToken::new()).unwrap();
  assert_eq!(before.product("app").unwrap().all_files().len(), 4);

  project.write_file("src/added.c", "");
  std::fs::remove_file(project.root().join("src/util.c")).unwrap();
  let after = load_project(&project.params(), &CancelToken::new()).unwrap();
  let names: Vec<String> = after
    .product("app")
    .unwrap()
    .all_files()
    .iter()
    .filter_map(|artifact| artifact.absolute_file_path.file_name())
    .map(|name| name.to_string_lossy().into_owned())
    .collect();
  assert_eq!(names, ["NOTES", "added.c", "deep.c", "main.c"]);
}

#[test]
fn group_prefix_applies_to_patterns_and_files() {
  let project = TestProject::new(
    r#"
return {
  products = {
    { name = "app", groups = { { prefix = "src/", files = { "main.c", "*.h" } } } },
  },
}
"#,
  );
  project.write_file("src/main.c", "");
  project.write_file("src/a.h", "");
  project.write_file("a.h", "");

  let resolved = load_project(&project.params(), &CancelToken::new()).unwrap();
  let paths: Vec<PathBuf> = resolved
    .product("app")
    .unwrap()
    .all_files()
    .iter()
    .map(|artifact| artifact.absolute_file_path.clone())
    .collect();
  assert_eq!(relative_files(&project, &paths), ["src/main.c", "src/a.h"]);
}
