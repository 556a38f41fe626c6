//! `quarry build`: build the selected products.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

use quarry_lib::builder::RuleBuilder;
use quarry_lib::job::{BuildOptions, build};

use crate::ProjectArgs;
use crate::jobs::{drive, resolve, runtime};
use crate::output::{format_elapsed, print_json, print_stat, print_success};

pub fn cmd_build(args: &ProjectArgs, dry_run: bool, keep_going: bool, json: bool) -> Result<()> {
  let started = Instant::now();
  let builder = Arc::new(RuleBuilder::new(args.parameters()?.environment));
  let options = BuildOptions { dry_run, keep_going };

  let summary = runtime()?.block_on(async {
    let project = resolve(args, json).await?;
    drive(build(project, args.products.clone(), options, builder), json).await
  })?;

  if json {
    return print_json(&summary);
  }
  let verb = if dry_run { "Would build" } else { "Built" };
  print_success(&format!(
    "{} {} product(s) in {}",
    verb,
    summary.built.len(),
    format_elapsed(started.elapsed())
  ));
  print_stat("Commands run", &summary.executed.to_string());
  print_stat("Up to date", &summary.up_to_date.to_string());
  Ok(())
}
