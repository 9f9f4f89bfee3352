//! Persistence of the last successful selection.
//!
//! The cache is a small key/value YAML file at the path declared by the
//! descriptor's `cache` key. It is loaded before selection resolution and
//! rewritten only after artifacts have been committed, so a failed run never
//! disturbs the previous state.
//!
//! A missing file and a cache with a different format version are both
//! treated as "no prior state".

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, warn};

use crate::consts::CACHE_FORMAT;
use crate::selection::Selection;

/// The prior resolved selection, as persisted on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CachedState {
  pub cache_version: u32,
  pub products: Vec<String>,
  pub mode: String,
  pub site: String,
  /// The selected version, possibly the `default` sentinel.
  pub version: String,
  /// The concrete version the sentinel resolved to.
  pub actual_version: String,
  pub build_dir: PathBuf,
}

impl CachedState {
  /// Capture a resolved selection for persistence.
  pub fn from_selection(selection: &Selection) -> Self {
    Self {
      cache_version: CACHE_FORMAT,
      products: selection.products.clone(),
      mode: selection.mode.clone(),
      site: selection.site.clone(),
      version: selection.version.clone(),
      actual_version: selection.actual_version.clone(),
      build_dir: selection.build_dir.clone(),
    }
  }
}

/// Errors from reading or writing the cache file.
#[derive(Debug, Error)]
pub enum CacheError {
  #[error("failed to read cache '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to write cache '{path}': {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to serialize cache state: {0}")]
  Serialize(#[source] serde_yaml::Error),
}

/// Load the cached selection, if any.
pub fn load(path: &Path) -> Result<Option<CachedState>, CacheError> {
  let text = match std::fs::read_to_string(path) {
    Ok(text) => text,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
    Err(source) => {
      return Err(CacheError::Read {
        path: path.to_path_buf(),
        source,
      });
    }
  };

  let state: CachedState = match serde_yaml::from_str(&text) {
    Ok(state) => state,
    Err(source) => {
      // A cache we cannot parse is a cache from another era. Start fresh
      // rather than refusing to run.
      warn!(path = %path.display(), error = %source, "discarding unreadable cache");
      return Ok(None);
    }
  };

  if state.cache_version != CACHE_FORMAT {
    warn!(
      path = %path.display(),
      found = state.cache_version,
      expected = CACHE_FORMAT,
      "discarding cache with mismatched format version"
    );
    return Ok(None);
  }

  debug!(path = %path.display(), "cache loaded");
  Ok(Some(state))
}

/// Persist the selection atomically (temp file in the target directory,
/// then rename over the destination).
pub fn save(path: &Path, state: &CachedState) -> Result<(), CacheError> {
  let dir = path.parent().unwrap_or_else(|| Path::new("."));
  std::fs::create_dir_all(dir).map_err(|source| CacheError::Write {
    path: path.to_path_buf(),
    source,
  })?;

  let content = serde_yaml::to_string(state).map_err(CacheError::Serialize)?;

  let mut tmp = NamedTempFile::new_in(dir).map_err(|source| CacheError::Write {
    path: path.to_path_buf(),
    source,
  })?;
  tmp
    .write_all(content.as_bytes())
    .map_err(|source| CacheError::Write {
      path: path.to_path_buf(),
      source,
    })?;
  tmp.persist(path).map_err(|e| CacheError::Write {
    path: path.to_path_buf(),
    source: e.error,
  })?;

  debug!(path = %path.display(), "cache saved");
  Ok(())
}
