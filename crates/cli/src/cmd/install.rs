//! `quarry install`: copy installable files into the install root.

use std::path::PathBuf;

use anyhow::Result;

use quarry_lib::job::{InstallOptions, install};

use crate::ProjectArgs;
use crate::jobs::{drive, resolve, runtime};
use crate::output::{print_json, print_stat, print_success};

pub fn cmd_install(
  args: &ProjectArgs,
  install_root: Option<PathBuf>,
  remove_existing: bool,
  dry_run: bool,
  keep_going: bool,
  json: bool,
) -> Result<()> {
  let options = InstallOptions {
    install_root,
    remove_existing,
    dry_run,
    keep_going,
  };
  let summary = runtime()?.block_on(async {
    let project = resolve(args, json).await?;
    drive(install(project, args.products.clone(), options), json).await
  })?;

  if json {
    return print_json(&summary);
  }
  let verb = if dry_run { "Would install" } else { "Installed" };
  print_success(&format!("{} {} file(s)", verb, summary.installed.len()));
  print_stat("Install root", &summary.install_root.display().to_string());
  Ok(())
}
