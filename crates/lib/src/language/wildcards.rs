//! Expansion of a group's wildcard patterns against the filesystem.
//!
//! A pattern is split on `/` and matched one path segment at a time. A `**` segment
//! makes the next segment match at any depth below the current directory; a trailing
//! `**` matches every file below it. Segments starting with `.` only match hidden
//! entries when written literally, and `**` never descends into hidden directories.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use glob::{MatchOptions, Pattern};
use thiserror::Error;
use tracing::trace;
use walkdir::WalkDir;

use super::group::SourceWildCards;
use crate::cancel::CancelToken;

#[derive(Debug, Error)]
pub enum WildcardError {
  #[error("'{}' was expected to be a {expected}", path.display())]
  KindMismatch { path: PathBuf, expected: &'static str },

  #[error("invalid wildcard pattern '{pattern}': {source}")]
  InvalidPattern {
    pattern: String,
    #[source]
    source: glob::PatternError,
  },

  #[error("failed to read directory '{}': {source}", path.display())]
  ReadDir {
    path: PathBuf,
    #[source]
    source: walkdir::Error,
  },

  #[error("wildcard expansion canceled")]
  Canceled,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
  case_sensitive: !cfg!(windows),
  require_literal_separator: true,
  require_literal_leading_dot: true,
};

impl SourceWildCards {
  /// Returns every path matched by an include pattern and by no exclude pattern.
  pub fn expand_patterns(&self, base_dir: &Path) -> Result<BTreeSet<PathBuf>, WildcardError> {
    self.expand_patterns_with_cancel(base_dir, &CancelToken::new())
  }

  /// Like [`expand_patterns`](Self::expand_patterns), checking `cancel` once per directory level.
  pub fn expand_patterns_with_cancel(
    &self,
    base_dir: &Path,
    cancel: &CancelToken,
  ) -> Result<BTreeSet<PathBuf>, WildcardError> {
    let mut files = self.expand_list(&self.patterns, base_dir, cancel)?;
    if !files.is_empty() {
      let excluded = self.expand_list(&self.exclude_patterns, base_dir, cancel)?;
      files.retain(|file| !excluded.contains(file));
    }
    Ok(files)
  }

  fn expand_list(
    &self,
    patterns: &[String],
    base_dir: &Path,
    cancel: &CancelToken,
  ) -> Result<BTreeSet<PathBuf>, WildcardError> {
    let mut files = BTreeSet::new();
    for pattern in patterns {
      let pattern = format!("{}{}", self.prefix, pattern).replace('\\', "/");
      let (root, rest) = split_root(&pattern);
      let parts: Vec<&str> = rest.split('/').filter(|part| !part.is_empty()).collect();
      let start = root.as_deref().unwrap_or(base_dir);
      trace!(pattern = %pattern, base = %start.display(), "expanding wildcard pattern");
      expand_parts(&mut files, &parts, start, cancel)?;
    }
    Ok(files)
  }
}

/// Splits an absolute pattern into its filesystem root and the remainder.
fn split_root(pattern: &str) -> (Option<PathBuf>, &str) {
  if cfg!(windows) {
    let bytes = pattern.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
      let rest = pattern[2..].trim_start_matches('/');
      return (Some(PathBuf::from(format!("{}/", &pattern[..2]))), rest);
    }
  }
  if let Some(rest) = pattern.strip_prefix('/') {
    return (Some(PathBuf::from("/")), rest);
  }
  (None, pattern)
}

fn is_wildcard(segment: &str) -> bool {
  segment.contains(['*', '?', '['])
}

fn expand_parts(
  result: &mut BTreeSet<PathBuf>,
  parts: &[&str],
  base_dir: &Path,
  cancel: &CancelToken,
) -> Result<(), WildcardError> {
  if cancel.is_canceled() {
    return Err(WildcardError::Canceled);
  }

  let mut recursive = false;
  let mut rest = parts;
  let part = loop {
    let Some((first, tail)) = rest.split_first() else {
      return Ok(());
    };
    rest = tail;
    if *first != "**" {
      break *first;
    }
    recursive = true;
    if rest.is_empty() {
      break "*";
    }
  };
  let want_dir = !rest.is_empty();

  // Directory iteration never yields these, so they are joined as-is.
  if part == "." || part == ".." {
    if !want_dir {
      return Ok(());
    }
    let next = base_dir.join(part);
    if next.is_dir() {
      expand_parts(result, rest, &next, cancel)?;
    }
    return Ok(());
  }

  if !base_dir.is_dir() {
    return Ok(());
  }

  let literal = !is_wildcard(part);
  let matcher = Pattern::new(part).map_err(|source| WildcardError::InvalidPattern {
    pattern: part.to_string(),
    source,
  })?;

  let mut walker = WalkDir::new(base_dir)
    .min_depth(1)
    .max_depth(if recursive { usize::MAX } else { 1 })
    .sort_by_file_name()
    .into_iter();

  while let Some(entry) = walker.next() {
    let entry = entry.map_err(|source| WildcardError::ReadDir {
      path: base_dir.to_path_buf(),
      source,
    })?;
    let name = entry.file_name().to_string_lossy().into_owned();
    let hidden = name.starts_with('.');

    if entry.file_type().is_dir() {
      if hidden {
        walker.skip_current_dir();
      }
      if recursive && cancel.is_canceled() {
        return Err(WildcardError::Canceled);
      }
    }

    if hidden && !literal {
      continue;
    }
    let entry_is_dir = if entry.path_is_symlink() {
      entry.path().is_dir()
    } else {
      entry.file_type().is_dir()
    };
    if entry_is_dir != want_dir || !matcher.matches_with(&name, MATCH_OPTIONS) {
      continue;
    }

    let path = entry.into_path();
    if path.is_dir() != want_dir {
      return Err(WildcardError::KindMismatch {
        path,
        expected: if want_dir { "directory" } else { "file" },
      });
    }
    if want_dir {
      expand_parts(result, rest, &path, cancel)?;
    } else {
      result.insert(path);
    }
  }
  Ok(())
}
