//! Descriptor loading and validation.
//!
//! Loading is a two-phase parse. The first, lenient pass reads only the
//! schema version and `project_root` so the synthetic project-root variable
//! can be computed. Every string field is then variable-expanded, and the
//! expanded tree is deserialized strictly against the closed schema.
//!
//! Validation here is purely structural: reserved names and dangling
//! intra-descriptor references are rejected, but nothing touches the
//! filesystem and no axis is resolved.

pub mod types;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use thiserror::Error;
use tracing::debug;

use crate::consts::{CORE_NAME, DEFAULT_CACHE_FILE, DEFAULT_VERSION, PROJECT_ROOT_VAR};
use crate::expand::{self, ExpandError};

pub use types::*;

/// Supported descriptor schema versions.
const MIN_SCHEMA: u32 = 1;
const MAX_SCHEMA: u32 = 2;

/// A loaded project: the expanded descriptor plus the paths derived from it.
#[derive(Debug, Clone)]
pub struct Project {
  pub descriptor: Descriptor,
  /// Absolute project root.
  pub root: PathBuf,
  /// Absolute path of the cached-selection file.
  pub cache_path: PathBuf,
}

/// Errors produced while loading or validating a descriptor.
#[derive(Debug, Error)]
pub enum DescriptorError {
  #[error("failed to read descriptor '{path}': {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("failed to parse descriptor: {0}")]
  Parse(#[source] serde_yaml::Error),

  #[error("descriptor is missing the 'version' key")]
  MissingSchemaVersion,

  #[error("unsupported descriptor version {0} (supported: {MIN_SCHEMA} to {MAX_SCHEMA})")]
  UnsupportedSchemaVersion(u64),

  #[error(transparent)]
  Expand(#[from] ExpandError),

  #[error("product name '{CORE_NAME}' is reserved for the global configuration")]
  ReservedProductName,

  #[error("subproduct name '{0}' under product '{1}' is reserved")]
  ReservedSubproductName(String, String),

  #[error("version name '{DEFAULT_VERSION}' is reserved as the default sentinel")]
  ReservedVersionName,

  #[error("product '{product}' declares default_version '{version}' which is not a declared version")]
  UnknownDefaultVersion { product: String, version: String },

  #[error("subproduct '{name}' collides with an existing buildable unit name")]
  DuplicateUnitName { name: String },
}

/// Load, expand, and validate the descriptor at `path`.
///
/// `env` is the enumerated variable set available to `%NAME` references; the
/// loader adds the synthetic project-root variable on top of it. Passing the
/// environment explicitly keeps the whole load a pure function of its
/// arguments.
pub fn load(path: &Path, env: &BTreeMap<String, String>) -> Result<Project, DescriptorError> {
  let text = std::fs::read_to_string(path).map_err(|source| DescriptorError::Read {
    path: path.to_path_buf(),
    source,
  })?;

  let raw: Value = serde_yaml::from_str(&text).map_err(DescriptorError::Parse)?;

  // Phase one: schema version and project root, before any expansion.
  let schema = raw
    .get("version")
    .and_then(Value::as_u64)
    .ok_or(DescriptorError::MissingSchemaVersion)?;
  if schema < u64::from(MIN_SCHEMA) || schema > u64::from(MAX_SCHEMA) {
    return Err(DescriptorError::UnsupportedSchemaVersion(schema));
  }

  let declared_root = raw
    .get("project_root")
    .and_then(Value::as_str)
    .unwrap_or(".");
  let base = path.parent().unwrap_or_else(|| Path::new("."));
  let root = absolute(&base.join(declared_root));

  // Phase two: expand every string field, then parse strictly.
  let mut vars = env.clone();
  vars.insert(PROJECT_ROOT_VAR.to_string(), root.display().to_string());
  let expanded = expand::expand_value(raw, &vars)?;

  let descriptor: Descriptor =
    serde_yaml::from_value(expanded).map_err(DescriptorError::Parse)?;

  validate(&descriptor)?;

  let cache_path = match &descriptor.cache {
    Some(p) => {
      let p = PathBuf::from(p);
      if p.is_absolute() { p } else { root.join(p) }
    }
    None => root.join(DEFAULT_CACHE_FILE),
  };

  debug!(
    root = %root.display(),
    cache = %cache_path.display(),
    products = descriptor.products.len(),
    versions = descriptor.versions.len(),
    "descriptor loaded"
  );

  Ok(Project {
    descriptor,
    root,
    cache_path,
  })
}

fn validate(descriptor: &Descriptor) -> Result<(), DescriptorError> {
  if descriptor.products.contains_key(CORE_NAME) {
    return Err(DescriptorError::ReservedProductName);
  }
  if descriptor.versions.contains_key(DEFAULT_VERSION) {
    return Err(DescriptorError::ReservedVersionName);
  }

  let mut unit_names: Vec<&str> = descriptor.products.keys().map(String::as_str).collect();

  for (name, product) in &descriptor.products {
    if !descriptor.versions.contains_key(&product.default_version) {
      return Err(DescriptorError::UnknownDefaultVersion {
        product: name.clone(),
        version: product.default_version.clone(),
      });
    }
    for sub in product.subproducts.keys() {
      if sub == CORE_NAME {
        return Err(DescriptorError::ReservedSubproductName(
          sub.clone(),
          name.clone(),
        ));
      }
      if unit_names.contains(&sub.as_str()) {
        return Err(DescriptorError::DuplicateUnitName { name: sub.clone() });
      }
      unit_names.push(sub);
    }
  }

  Ok(())
}

fn absolute(path: &Path) -> PathBuf {
  std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
