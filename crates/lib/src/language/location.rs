use std::fmt;

use serde::Serialize;

use crate::persist::{PersistError, Persistent, PoolReader, PoolWriter};

/// Position of a construct in a project file.
///
/// Lines and columns are 1-based; 0 means the position within the file is unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct CodeLocation {
  pub file_path: String,
  pub line: u32,
  pub column: u32,
}

impl CodeLocation {
  pub fn new(file_path: impl Into<String>, line: u32, column: u32) -> Self {
    Self {
      file_path: file_path.into(),
      line,
      column,
    }
  }

  /// A location naming only the file.
  pub fn file(file_path: impl Into<String>) -> Self {
    Self::new(file_path, 0, 0)
  }

  pub fn is_valid(&self) -> bool {
    !self.file_path.is_empty()
  }
}

impl fmt::Display for CodeLocation {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match (self.line, self.column) {
      (0, _) => write!(f, "{}", self.file_path),
      (line, 0) => write!(f, "{}:{}", self.file_path, line),
      (line, column) => write!(f, "{}:{}:{}", self.file_path, line, column),
    }
  }
}

impl Persistent for CodeLocation {
  fn store(&self, pool: &mut PoolWriter) {
    pool.store_string(&self.file_path);
    pool.write_u32(self.line);
    pool.write_u32(self.column);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    Ok(Self {
      file_path: pool.load_string()?,
      line: pool.read_u32()?,
      column: pool.read_u32()?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_omits_unknown_parts() {
    assert_eq!(CodeLocation::file("p.lua").to_string(), "p.lua");
    assert_eq!(CodeLocation::new("p.lua", 4, 0).to_string(), "p.lua:4");
    assert_eq!(CodeLocation::new("p.lua", 4, 9).to_string(), "p.lua:4:9");
  }
}
