//! `quarry env`: print a product's build or run environment.

use anyhow::{Context, Result, bail};

use quarry_lib::environment::EnvironmentKind;
use quarry_lib::script::ScriptEngine;

use crate::ProjectArgs;
use crate::jobs::{resolve, runtime};
use crate::output::print_json;

pub fn cmd_env(args: &ProjectArgs, run: bool, json: bool) -> Result<()> {
  let project = runtime()?.block_on(resolve(args, true))?;
  let product = match args.products.as_slice() {
    [] if project.products.is_empty() => bail!("The project has no products"),
    [] if project.products.len() == 1 => &project.products[0],
    [] => bail!("The project has several products; choose one with --product"),
    [name] => project
      .product(name)
      .with_context(|| format!("No such product '{}'", name))?,
    _ => bail!("Choose a single product"),
  };

  let kind = if run { EnvironmentKind::Run } else { EnvironmentKind::Build };
  let base = args.parameters()?.environment;
  let mut engine = ScriptEngine::new();
  let environment = product.setup_environment(&mut engine, kind, &project, &base)?;

  if json {
    return print_json(environment);
  }
  for (key, value) in environment {
    println!("{}={}", key, value);
  }
  Ok(())
}
