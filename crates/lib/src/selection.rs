//! Selection resolution.
//!
//! Merges the user's explicit per-axis choices, the cached prior selection,
//! and the descriptor defaults into one concrete [`Selection`]. Resolution is
//! a pure function of its inputs; persisting the result is the caller's
//! explicit follow-up step after emission succeeds.
//!
//! # Merge rules
//!
//! Per axis: explicit value, else cached value, else descriptor default,
//! else a [`SelectionError::MissingAxis`] naming the axis. On reconfigure
//! (a cache exists and `init` is false) the version and the build directory
//! are immutable; the caller must reinitialize to change them.
//!
//! # The `default` version sentinel
//!
//! A selection of version `default` resolves per product through each
//! product's `default_version`. Selected products that disagree on the
//! resolved version cannot share one build, so resolution fails listing the
//! disagreement.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::cache::CachedState;
use crate::consts::{CORE_NAME, DEFAULT_BUILD_DIR, DEFAULT_VERSION};
use crate::descriptor::Descriptor;

/// Explicit user choices, one optional value per axis.
#[derive(Debug, Clone, Default)]
pub struct SelectionRequest {
  /// Selected product names; empty means "not specified".
  pub products: Vec<String>,
  pub mode: Option<String>,
  pub site: Option<String>,
  pub version: Option<String>,
  pub build_dir: Option<PathBuf>,
}

/// One buildable unit: a product, or a subproduct standing in for its
/// parent. Carries everything downstream composition and emission need so
/// the descriptor is not re-consulted per unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildUnit {
  /// Unit name, unique across the selection.
  pub name: String,
  /// Owning product (equals `name` for plain products).
  pub product: String,
  pub description: String,
  /// Layer collection names required by this unit (inherited from the
  /// parent product for subproducts).
  pub layers: Vec<String>,
  pub targets: Vec<String>,
  /// Other units whose deploy output this unit consumes.
  pub uses: Vec<String>,
  /// Whether the unit gets its own isolated namespace and masked layer set.
  pub isolated: bool,
  /// Raw config-fragment text for this unit.
  pub conf: String,
}

/// The resolved choice for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
  /// Selected product names, sorted and de-duplicated.
  pub products: Vec<String>,
  /// Buildable units after subproduct expansion, in product order.
  pub units: Vec<BuildUnit>,
  pub mode: String,
  pub site: String,
  /// The selected version, possibly the `default` sentinel.
  pub version: String,
  /// The concrete version every unit builds against.
  pub actual_version: String,
  /// Absolute build directory.
  pub build_dir: PathBuf,
  /// True on first-time initialization, false on reconfigure.
  pub init: bool,
}

impl Selection {
  /// Central activity predicate: whether a unit participates in the current
  /// selection. Emission includes a unit's fragments only when this holds.
  pub fn is_active(&self, unit: &str) -> bool {
    self.units.iter().any(|u| u.name == unit)
  }

  /// Look up an active unit by name.
  pub fn unit(&self, name: &str) -> Option<&BuildUnit> {
    self.units.iter().find(|u| u.name == name)
  }
}

/// Errors from merging a selection.
#[derive(Debug, Error)]
pub enum SelectionError {
  #[error("no {axis} selected; specify one with {flag}")]
  MissingAxis {
    axis: &'static str,
    flag: &'static str,
  },

  #[error("unknown product '{name}' (choose from: {known})")]
  UnknownProduct { name: String, known: String },

  #[error("product name '{CORE_NAME}' is reserved and cannot be selected")]
  ReservedProduct,

  #[error("unknown mode '{name}' (choose from: {known})")]
  UnknownMode { name: String, known: String },

  #[error("unknown site '{name}' (choose from: {known})")]
  UnknownSite { name: String, known: String },

  #[error("unknown version '{name}' (choose from: {known})")]
  UnknownVersion { name: String, known: String },

  #[error(
    "the version cannot be changed from '{cached}' to '{requested}' after initialization; \
     initialize a new environment instead"
  )]
  ImmutableVersion { cached: String, requested: String },

  #[error(
    "the build directory cannot be changed from '{cached}' to '{requested}' after \
     initialization; initialize a new environment instead"
  )]
  ImmutableBuildDir { cached: String, requested: String },

  #[error("selected products disagree on their default version: {conflicts}")]
  DefaultVersionConflict { conflicts: String },
}

/// Merge `request`, `cache`, and descriptor defaults into a [`Selection`].
///
/// `init` marks first-time initialization; it lifts the immutability rules
/// because there is no prior environment to protect.
pub fn resolve(
  descriptor: &Descriptor,
  root: &Path,
  request: &SelectionRequest,
  cache: Option<&CachedState>,
  init: bool,
) -> Result<Selection, SelectionError> {
  let products = resolve_products(descriptor, request, cache)?;
  let mode = resolve_mode(descriptor, request, cache)?;
  let site = resolve_site(descriptor, request, cache)?;
  let (version, actual_version) = resolve_version(descriptor, request, cache, init, &products)?;
  let build_dir = resolve_build_dir(descriptor, root, request, cache, init)?;

  let units = expand_units(descriptor, &products);

  debug!(
    products = %products.join(" "),
    %mode,
    %site,
    %version,
    %actual_version,
    build_dir = %build_dir.display(),
    "selection resolved"
  );

  Ok(Selection {
    products,
    units,
    mode,
    site,
    version,
    actual_version,
    build_dir,
    init,
  })
}

fn resolve_products(
  descriptor: &Descriptor,
  request: &SelectionRequest,
  cache: Option<&CachedState>,
) -> Result<Vec<String>, SelectionError> {
  let mut products = if !request.products.is_empty() {
    request.products.clone()
  } else if let Some(cache) = cache {
    cache.products.clone()
  } else {
    descriptor.defaults.products.clone()
  };

  if products.is_empty() {
    return Err(SelectionError::MissingAxis {
      axis: "product",
      flag: "--product",
    });
  }

  products.sort();
  products.dedup();

  for name in &products {
    if name == CORE_NAME {
      return Err(SelectionError::ReservedProduct);
    }
    if !descriptor.products.contains_key(name) {
      return Err(SelectionError::UnknownProduct {
        name: name.clone(),
        known: known(descriptor.products.keys()),
      });
    }
  }

  Ok(products)
}

fn resolve_mode(
  descriptor: &Descriptor,
  request: &SelectionRequest,
  cache: Option<&CachedState>,
) -> Result<String, SelectionError> {
  let mode = request
    .mode
    .clone()
    .or_else(|| cache.map(|c| c.mode.clone()))
    .or_else(|| descriptor.defaults.mode.clone())
    .ok_or(SelectionError::MissingAxis {
      axis: "mode",
      flag: "--mode",
    })?;

  if !descriptor.modes.contains_key(&mode) {
    return Err(SelectionError::UnknownMode {
      name: mode,
      known: known(descriptor.modes.keys()),
    });
  }
  Ok(mode)
}

fn resolve_site(
  descriptor: &Descriptor,
  request: &SelectionRequest,
  cache: Option<&CachedState>,
) -> Result<String, SelectionError> {
  let site = request
    .site
    .clone()
    .or_else(|| cache.map(|c| c.site.clone()))
    .or_else(|| descriptor.defaults.site.clone())
    .ok_or(SelectionError::MissingAxis {
      axis: "site",
      flag: "--site",
    })?;

  if !descriptor.sites.contains_key(&site) {
    return Err(SelectionError::UnknownSite {
      name: site,
      known: known(descriptor.sites.keys()),
    });
  }
  Ok(site)
}

fn resolve_version(
  descriptor: &Descriptor,
  request: &SelectionRequest,
  cache: Option<&CachedState>,
  init: bool,
  products: &[String],
) -> Result<(String, String), SelectionError> {
  let version = request
    .version
    .clone()
    .or_else(|| cache.map(|c| c.version.clone()))
    .unwrap_or_else(|| DEFAULT_VERSION.to_string());

  if version != DEFAULT_VERSION && !descriptor.versions.contains_key(&version) {
    return Err(SelectionError::UnknownVersion {
      name: version,
      known: known(descriptor.versions.keys().map(String::as_str).chain([DEFAULT_VERSION])),
    });
  }

  if let Some(cache) = cache
    && !init
    && version != cache.version
  {
    return Err(SelectionError::ImmutableVersion {
      cached: cache.version.clone(),
      requested: version,
    });
  }

  let actual = if version == DEFAULT_VERSION {
    // Group the selected products by their declared default version. More
    // than one group means they cannot share a build.
    let mut groups: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
    for name in products {
      let v = descriptor.products[name].default_version.as_str();
      groups.entry(v).or_default().push(name);
    }

    if groups.len() > 1 {
      let conflicts = groups
        .iter()
        .map(|(v, ps)| format!("{v} ({})", ps.join(" ")))
        .collect::<Vec<_>>()
        .join(", ");
      return Err(SelectionError::DefaultVersionConflict { conflicts });
    }

    let resolved = groups.keys().next().copied().unwrap_or(DEFAULT_VERSION);

    // The sentinel may resolve differently once the product set changes,
    // which would silently retarget an initialized environment.
    if let Some(cache) = cache
      && !init
      && !cache.actual_version.is_empty()
      && resolved != cache.actual_version
    {
      return Err(SelectionError::ImmutableVersion {
        cached: cache.actual_version.clone(),
        requested: resolved.to_string(),
      });
    }

    resolved.to_string()
  } else {
    version.clone()
  };

  Ok((version, actual))
}

fn resolve_build_dir(
  descriptor: &Descriptor,
  root: &Path,
  request: &SelectionRequest,
  cache: Option<&CachedState>,
  init: bool,
) -> Result<PathBuf, SelectionError> {
  let build_dir = request
    .build_dir
    .clone()
    .or_else(|| cache.map(|c| c.build_dir.clone()))
    .or_else(|| descriptor.defaults.build_dir.clone().map(PathBuf::from))
    .unwrap_or_else(|| PathBuf::from(DEFAULT_BUILD_DIR));

  let build_dir = if build_dir.is_absolute() {
    build_dir
  } else {
    root.join(build_dir)
  };

  if let Some(cache) = cache
    && !init
    && build_dir != cache.build_dir
  {
    return Err(SelectionError::ImmutableBuildDir {
      cached: cache.build_dir.display().to_string(),
      requested: build_dir.display().to_string(),
    });
  }

  Ok(build_dir)
}

/// Expand selected products into buildable units. A product with
/// subproducts contributes one unit per subproduct and never itself.
fn expand_units(descriptor: &Descriptor, products: &[String]) -> Vec<BuildUnit> {
  let mut units = Vec::new();

  for name in products {
    let product = &descriptor.products[name];

    if product.subproducts.is_empty() {
      units.push(BuildUnit {
        name: name.clone(),
        product: name.clone(),
        description: product.description.clone(),
        layers: product.layers.clone(),
        targets: product.targets.clone(),
        uses: product.uses.clone(),
        isolated: product.multiconfig,
        conf: product.conf.clone(),
      });
      continue;
    }

    for (sub_name, sub) in &product.subproducts {
      units.push(BuildUnit {
        name: sub_name.clone(),
        product: name.clone(),
        description: sub.description.clone(),
        layers: product.layers.clone(),
        targets: sub.targets.clone(),
        uses: sub.uses.clone(),
        isolated: product.multiconfig,
        conf: sub.conf.clone(),
      });
    }
  }

  units
}

fn known<'a>(names: impl IntoIterator<Item = impl AsRef<str> + 'a>) -> String {
  names
    .into_iter()
    .map(|n| n.as_ref().to_string())
    .collect::<Vec<_>>()
    .join(", ")
}
