//! Layer composition.
//!
//! For each buildable unit, computes the ordered, de-duplicated set of layer
//! collections it requires (the global core collections plus the unit's
//! own), resolved to the concrete paths declared under the selection's
//! resolved version. Order follows the declaration order, first occurrence
//! wins, because layer precedence downstream is order-sensitive.
//!
//! # Masking
//!
//! Isolated units additionally get an exclusion list: every path required by
//! some other selected unit but not by this one, plus the mask entries
//! declared on the collections the unit itself uses. Non-isolated units
//! share the plain union of all selected layers with no masking.

use std::collections::BTreeSet;
use thiserror::Error;
use tracing::debug;

use crate::descriptor::{Descriptor, LayerCollectionDef, VersionDef};
use crate::selection::Selection;

/// A layer collection resolved against the selected version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCollection {
  pub name: String,
  pub paths: Vec<String>,
  /// Paths always excluded for units using this collection.
  pub mask: Vec<String>,
  /// This collection's fetch commands, in declared order.
  pub fetch: Vec<String>,
}

/// The layer view of one buildable unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitLayers {
  pub unit: String,
  /// Collection names this unit requires, first occurrence first.
  pub collections: Vec<String>,
  /// Concrete layer paths, in collection order.
  pub paths: Vec<String>,
  /// Paths excluded from this unit's configuration. Empty for non-isolated
  /// units.
  pub mask: Vec<String>,
}

/// Composed layer sets for a whole selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposedLayers {
  /// Every collection required by the selection, in the version's declared
  /// order, each exactly once.
  pub required: Vec<ResolvedCollection>,
  /// Per-unit layer views, in unit order.
  pub units: Vec<UnitLayers>,
}

impl ComposedLayers {
  /// Union of all required layer paths, in version-declared order.
  pub fn all_paths(&self) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for collection in &self.required {
      for path in &collection.paths {
        if seen.insert(path.as_str()) {
          out.push(path.as_str());
        }
      }
    }
    out
  }
}

/// Errors from composing layers.
#[derive(Debug, Error)]
pub enum LayerError {
  #[error(
    "product '{unit}' requires layer collection '{collection}' which is not present in \
     version '{version}'"
  )]
  MissingCollection {
    unit: String,
    collection: String,
    version: String,
  },

  #[error("version '{0}' is not declared in the descriptor")]
  UnknownVersion(String),

  #[error(
    "layer collection '{collection}' resolves to conflicting paths for non-isolated \
     products ({first} vs {second})"
  )]
  PathConflict {
    collection: String,
    first: String,
    second: String,
  },
}

/// Compose layers for every buildable unit in the selection.
pub fn compose(descriptor: &Descriptor, selection: &Selection) -> Result<ComposedLayers, LayerError> {
  let version = descriptor
    .versions
    .get(&selection.actual_version)
    .ok_or_else(|| LayerError::UnknownVersion(selection.actual_version.clone()))?;

  // Per-unit required collection names: core first, then the unit's own,
  // first occurrence wins.
  let mut unit_names: Vec<(String, Vec<String>)> = Vec::new();
  for unit in &selection.units {
    let mut names = Vec::new();
    for name in descriptor.core.layers.iter().chain(unit.layers.iter()) {
      if !names.contains(name) {
        names.push(name.clone());
      }
    }
    for name in &names {
      if version.collection(name).is_none() {
        return Err(LayerError::MissingCollection {
          unit: unit.product.clone(),
          collection: name.clone(),
          version: selection.actual_version.clone(),
        });
      }
    }
    unit_names.push((unit.name.clone(), names));
  }

  let required = required_collections(version, &unit_names);

  check_conflicts(selection, &required)?;

  let mut units = Vec::new();
  for (unit, names) in &unit_names {
    let isolated = selection
      .unit(unit)
      .map(|u| u.isolated)
      .unwrap_or(true);

    let mut paths = Vec::new();
    for name in names {
      // Presence was checked above.
      if let Some(collection) = version.collection(name) {
        for path in &collection.paths {
          if !paths.contains(path) {
            paths.push(path.clone());
          }
        }
      }
    }

    let mask = if isolated {
      unit_mask(version, names, &required)
    } else {
      Vec::new()
    };

    units.push(UnitLayers {
      unit: unit.clone(),
      collections: names.clone(),
      paths,
      mask,
    });
  }

  debug!(
    collections = required.len(),
    units = units.len(),
    "layers composed"
  );

  Ok(ComposedLayers { required, units })
}

/// Collections required by any unit (or core), in the version's declared
/// order, each exactly once.
fn required_collections(
  version: &VersionDef,
  unit_names: &[(String, Vec<String>)],
) -> Vec<ResolvedCollection> {
  let wanted: BTreeSet<&str> = unit_names
    .iter()
    .flat_map(|(_, names)| names.iter().map(String::as_str))
    .collect();

  version
    .layers
    .iter()
    .filter(|l| wanted.contains(l.name.as_str()))
    .map(resolve_collection)
    .collect()
}

fn resolve_collection(def: &LayerCollectionDef) -> ResolvedCollection {
  ResolvedCollection {
    name: def.name.clone(),
    paths: def.paths.clone(),
    mask: def.mask.clone(),
    fetch: def.fetch.commands.clone(),
  }
}

/// Exclusion list for one isolated unit: paths of required collections the
/// unit does not use, plus the declared mask entries of the collections it
/// does use.
fn unit_mask(
  version: &VersionDef,
  names: &[String],
  required: &[ResolvedCollection],
) -> Vec<String> {
  let mut mask = Vec::new();

  for collection in required {
    if !names.iter().any(|n| n == &collection.name) {
      for path in &collection.paths {
        if !mask.contains(path) {
          mask.push(path.clone());
        }
      }
    }
  }

  for name in names {
    if let Some(collection) = version.collection(name) {
      for entry in &collection.mask {
        if !mask.contains(entry) {
          mask.push(entry.clone());
        }
      }
    }
  }

  mask
}

/// Non-isolated units share one unmasked union, so a collection name must
/// resolve to a single concrete path list across the whole selection.
fn check_conflicts(
  selection: &Selection,
  required: &[ResolvedCollection],
) -> Result<(), LayerError> {
  if selection.units.iter().all(|u| u.isolated) {
    return Ok(());
  }

  for (i, a) in required.iter().enumerate() {
    for b in &required[i + 1..] {
      if a.name == b.name && a.paths != b.paths {
        return Err(LayerError::PathConflict {
          collection: a.name.clone(),
          first: a.paths.join(" "),
          second: b.paths.join(" "),
        });
      }
    }
  }

  Ok(())
}
