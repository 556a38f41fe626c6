//! `quarry clean`: remove generated files.

use anyhow::Result;

use quarry_lib::job::{CleanOptions, clean};

use crate::ProjectArgs;
use crate::jobs::{drive, resolve, runtime};
use crate::output::{print_json, print_success};

pub fn cmd_clean(args: &ProjectArgs, dry_run: bool, keep_going: bool, json: bool) -> Result<()> {
  let options = CleanOptions { dry_run, keep_going };
  let summary = runtime()?.block_on(async {
    let project = resolve(args, json).await?;
    drive(clean(project, args.products.clone(), options), json).await
  })?;

  if json {
    return print_json(&summary);
  }
  let verb = if dry_run { "Would remove" } else { "Removed" };
  print_success(&format!("{} {} file(s)", verb, summary.removed.len()));
  Ok(())
}
