mod cmd;
mod jobs;
mod output;

use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quarry_lib::language::PropertyValue;
use quarry_lib::loader::SetupProjectParameters;

use crate::cmd::{cmd_build, cmd_clean, cmd_env, cmd_install, cmd_products, cmd_resolve};
use crate::output::print_error;

/// quarry - builds products described by a Lua project file
#[derive(Parser)]
#[command(name = "quarry")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Print machine-readable JSON
  #[arg(long, global = true)]
  json: bool,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Args, Clone)]
pub struct ProjectArgs {
  /// Project file
  #[arg(default_value = "project.lua")]
  pub project: PathBuf,

  /// Configuration profile
  #[arg(long)]
  pub profile: Option<String>,

  /// Build variant
  #[arg(long)]
  pub variant: Option<String>,

  /// Build root (defaults to $QUARRY_BUILD_ROOT, then <project dir>/build)
  #[arg(long)]
  pub build_root: Option<PathBuf>,

  /// Override a property, e.g. `--set modules.cc.compiler=clang`
  #[arg(long = "set", value_name = "PATH=VALUE")]
  pub overrides: Vec<String>,

  /// Restrict the command to these products (and their dependencies)
  #[arg(long = "product")]
  pub products: Vec<String>,
}

impl ProjectArgs {
  pub fn parameters(&self) -> Result<SetupProjectParameters> {
    let mut params = SetupProjectParameters::new(&self.project);
    params.build_root = self.build_root.clone();
    if let Some(profile) = &self.profile {
      params.profile = profile.clone();
    }
    if let Some(variant) = &self.variant {
      params.build_variant = variant.clone();
    }
    params.environment = std::env::vars().collect();
    for entry in &self.overrides {
      let Some((path, value)) = entry.split_once('=') else {
        bail!("invalid override '{}': expected PATH=VALUE", entry);
      };
      params.overridden_values.insert(path.to_string(), parse_value(value));
    }
    Ok(params)
  }
}

fn parse_value(value: &str) -> PropertyValue {
  match value {
    "true" => PropertyValue::Bool(true),
    "false" => PropertyValue::Bool(false),
    _ => match value.parse::<i64>() {
      Ok(i) => PropertyValue::Integer(i),
      Err(_) => PropertyValue::from(value),
    },
  }
}

#[derive(Subcommand)]
enum Commands {
  /// Resolve the project and store its build graph
  Resolve {
    #[command(flatten)]
    project: ProjectArgs,
  },

  /// List the resolved products
  Products {
    #[command(flatten)]
    project: ProjectArgs,
  },

  /// Print a product's build (or run) environment
  Env {
    #[command(flatten)]
    project: ProjectArgs,

    /// Show the run environment instead of the build environment
    #[arg(long)]
    run: bool,
  },

  /// Build products
  Build {
    #[command(flatten)]
    project: ProjectArgs,

    /// Show the commands without running them
    #[arg(long)]
    dry_run: bool,

    /// Continue with other products after a failure
    #[arg(long)]
    keep_going: bool,
  },

  /// Remove generated files
  Clean {
    #[command(flatten)]
    project: ProjectArgs,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    keep_going: bool,
  },

  /// Copy installable files into the install root
  Install {
    #[command(flatten)]
    project: ProjectArgs,

    /// Install root (defaults to <build dir>/install-root)
    #[arg(long)]
    install_root: Option<PathBuf>,

    /// Remove the install root first
    #[arg(long)]
    remove_existing: bool,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    keep_going: bool,
  },
}

fn main() {
  let cli = Cli::parse();

  let default_level = if cli.verbose { "debug" } else { "warn" };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let json = cli.json;
  let result = match cli.command {
    Commands::Resolve { project } => cmd_resolve(&project, json),
    Commands::Products { project } => cmd_products(&project, json),
    Commands::Env { project, run } => cmd_env(&project, run, json),
    Commands::Build {
      project,
      dry_run,
      keep_going,
    } => cmd_build(&project, dry_run, keep_going, json),
    Commands::Clean {
      project,
      dry_run,
      keep_going,
    } => cmd_clean(&project, dry_run, keep_going, json),
    Commands::Install {
      project,
      install_root,
      remove_existing,
      dry_run,
      keep_going,
    } => cmd_install(&project, install_root, remove_existing, dry_run, keep_going, json),
  };

  if let Err(e) = result {
    print_error(&format!("{:#}", e));
    std::process::exit(1);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn override_values_are_typed() {
    assert_eq!(parse_value("true"), PropertyValue::Bool(true));
    assert_eq!(parse_value("42"), PropertyValue::Integer(42));
    assert_eq!(parse_value("clang"), PropertyValue::from("clang"));
  }

  #[test]
  fn malformed_override_is_rejected() {
    let cli = Cli::parse_from(["quarry", "resolve", "--set", "nope"]);
    let Commands::Resolve { project } = cli.command else {
      panic!("expected resolve");
    };
    assert!(project.parameters().is_err());
  }
}
