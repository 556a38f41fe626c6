use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

use crate::language::{CodeLocation, PropertyValue, load_value_map, store_value_map};
use crate::persist::{PersistError, Persistent, PoolReader, PoolWriter};

/// An external program invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessCommand {
  pub program: String,
  pub arguments: Vec<String>,
  pub working_directory: PathBuf,
  pub environment: BTreeMap<String, String>,
  pub description: String,
  pub highlight: String,
  pub silent: bool,
}

impl ProcessCommand {
  pub fn command_line(&self) -> String {
    std::iter::once(self.program.as_str())
      .chain(self.arguments.iter().map(String::as_str))
      .map(quote_argument)
      .collect::<Vec<_>>()
      .join(" ")
  }
}

fn quote_argument(arg: &str) -> String {
  if !arg.is_empty() && !arg.contains([' ', '\t', '"', '\'']) {
    return arg.to_string();
  }
  format!("\"{}\"", arg.replace('"', "\\\""))
}

/// A script run inside the build tool itself.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ScriptCommand {
  pub source_code: String,
  pub description: String,
  pub highlight: String,
  pub location: CodeLocation,
  pub properties: BTreeMap<String, PropertyValue>,
}

/// A command executed for an artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Command {
  Process(ProcessCommand),
  Script(ScriptCommand),
}

impl Command {
  pub fn description(&self) -> &str {
    match self {
      Command::Process(c) => &c.description,
      Command::Script(c) => &c.description,
    }
  }

  pub fn highlight(&self) -> &str {
    match self {
      Command::Process(c) => &c.highlight,
      Command::Script(c) => &c.highlight,
    }
  }
}

impl fmt::Display for Command {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Command::Process(c) => write!(f, "{}", c.command_line()),
      Command::Script(c) if c.location.is_valid() => write!(f, "<script at {}>", c.location),
      Command::Script(_) => write!(f, "<script>"),
    }
  }
}

const TAG_PROCESS: u8 = 0;
const TAG_SCRIPT: u8 = 1;

impl Persistent for Command {
  fn store(&self, pool: &mut PoolWriter) {
    match self {
      Command::Process(c) => {
        pool.write_u8(TAG_PROCESS);
        pool.store_string(&c.program);
        pool.store_string_list(&c.arguments);
        pool.store_path(&c.working_directory);
        pool.store_string_map(&c.environment);
        pool.store_string(&c.description);
        pool.store_string(&c.highlight);
        pool.write_bool(c.silent);
      }
      Command::Script(c) => {
        pool.write_u8(TAG_SCRIPT);
        pool.store_string(&c.source_code);
        pool.store_string(&c.description);
        pool.store_string(&c.highlight);
        c.location.store(pool);
        store_value_map(&c.properties, pool);
      }
    }
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    match pool.read_u8()? {
      TAG_PROCESS => Ok(Command::Process(ProcessCommand {
        program: pool.load_string()?,
        arguments: pool.load_string_list()?,
        working_directory: pool.load_path()?,
        environment: pool.load_string_map()?,
        description: pool.load_string()?,
        highlight: pool.load_string()?,
        silent: pool.read_bool()?,
      })),
      TAG_SCRIPT => Ok(Command::Script(ScriptCommand {
        source_code: pool.load_string()?,
        description: pool.load_string()?,
        highlight: pool.load_string()?,
        location: CodeLocation::load(pool)?,
        properties: load_value_map(pool)?,
      })),
      tag => Err(PersistError::InvalidTag { what: "command", tag }),
    }
  }
}
