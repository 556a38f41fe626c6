use std::fmt;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use super::command::Command;
use crate::persist::{PersistError, Persistent, PoolReader, PoolWriter};

/// A file modification time in nanoseconds since the Unix epoch; 0 means unknown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct FileTime(i64);

impl FileTime {
  pub const UNKNOWN: FileTime = FileTime(0);

  pub fn from_nanos(nanos: i64) -> Self {
    Self(nanos)
  }

  pub fn as_nanos(self) -> i64 {
    self.0
  }

  pub fn from_system_time(time: SystemTime) -> Self {
    match time.duration_since(UNIX_EPOCH) {
      Ok(d) => Self(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)),
      Err(e) => Self(-i64::try_from(e.duration().as_nanos()).unwrap_or(i64::MAX)),
    }
  }

  /// Modification time of `path`, or `None` if it does not exist.
  pub fn of(path: &Path) -> Option<Self> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    Some(Self::from_system_time(modified))
  }

  pub fn is_known(self) -> bool {
    self != Self::UNKNOWN
  }
}

impl fmt::Display for FileTime {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A dependency edge found while building, typically by a dependency scanner.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChildData {
  pub product_name: String,
  pub product_profile: String,
  pub child_file_path: PathBuf,
  pub added_by_scanner: bool,
}

impl Persistent for ChildData {
  fn store(&self, pool: &mut PoolWriter) {
    pool.store_string(&self.product_name);
    pool.store_string(&self.product_profile);
    pool.store_path(&self.child_file_path);
    pool.write_bool(self.added_by_scanner);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    Ok(Self {
      product_name: pool.load_string()?,
      product_profile: pool.load_string()?,
      child_file_path: pool.load_path()?,
      added_by_scanner: pool.read_bool()?,
    })
  }
}

/// Per-artifact state that re-resolving a project cannot reconstruct.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RescuableArtifactData {
  pub time_stamp: FileTime,
  pub children: Vec<ChildData>,
  pub commands: Vec<Command>,
}

impl Persistent for RescuableArtifactData {
  fn store(&self, pool: &mut PoolWriter) {
    pool.write_i64(self.time_stamp.as_nanos());
    pool.store_values(&self.children);
    pool.store_values(&self.commands);
  }

  fn load(pool: &mut PoolReader<'_>) -> Result<Self, PersistError> {
    Ok(Self {
      time_stamp: FileTime::from_nanos(pool.read_i64()?),
      children: pool.load_values()?,
      commands: pool.load_values()?,
    })
  }
}
