//! Descriptor types for strata.
//!
//! The descriptor is the single YAML document declaring everything a project
//! can build: layer/toolchain versions, layer collections, products (with
//! optional subproducts), modes, and sites. The schema is closed: unknown
//! keys at any level are rejected at parse time.
//!
//! # Determinism
//!
//! All name-keyed maps use [`BTreeMap`] so every downstream consumer iterates
//! in a stable order, which is what makes emitted artifacts byte-identical
//! across runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// The parsed, validated, variable-expanded project descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Descriptor {
  /// Descriptor schema version. Only 1 and 2 are supported; 1 keeps the
  /// deprecated per-unit deploy directory alias in emitted fragments.
  pub version: u32,

  /// Project root, relative to the descriptor file. Defaults to the
  /// descriptor's own directory.
  #[serde(default = "default_project_root")]
  pub project_root: String,

  /// Path of the cached-selection file. Variable-expanded like every other
  /// string field. Defaults to `.strata-cache.yml` under the project root.
  #[serde(default)]
  pub cache: Option<String>,

  /// Per-axis defaults applied when neither the user nor the cache has a
  /// value.
  #[serde(default)]
  pub defaults: Defaults,

  /// Shell hooks spliced into the generated environment script.
  #[serde(default)]
  pub hooks: Hooks,

  /// Project-level fetch commands, run before any version- or
  /// collection-level commands.
  #[serde(default)]
  pub fetch: FetchSpec,

  /// Declared versions, keyed by name. The name `default` is reserved.
  pub versions: BTreeMap<String, VersionDef>,

  /// Build-behavior profiles, keyed by name.
  pub modes: BTreeMap<String, AxisProfile>,

  /// Site/location profiles, keyed by name.
  pub sites: BTreeMap<String, AxisProfile>,

  /// Global configuration shared by every buildable unit.
  #[serde(default)]
  pub core: CoreDef,

  /// Buildable products, keyed by name. The name `core` is reserved.
  pub products: BTreeMap<String, ProductDef>,
}

fn default_project_root() -> String {
  ".".to_string()
}

/// Per-axis defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Defaults {
  #[serde(default)]
  pub products: Vec<String>,
  #[serde(default)]
  pub mode: Option<String>,
  #[serde(default)]
  pub site: Option<String>,
  #[serde(default)]
  pub build_dir: Option<String>,
}

/// Shell hooks around environment initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Hooks {
  /// Shell text written before the init-script source line.
  #[serde(default)]
  pub pre_init: Option<String>,

  /// Shell text written after the init-script source line.
  #[serde(default)]
  pub post_init: Option<String>,

  /// Extra environment variable names passed through to the build tool.
  #[serde(default)]
  pub env_passthrough: Vec<String>,
}

/// A list of opaque fetch commands run sequentially through the shell.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchSpec {
  #[serde(default)]
  pub commands: Vec<String>,
}

/// One generation of layers and toolchain.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionDef {
  #[serde(default)]
  pub description: String,

  /// Path of the build tool's environment init script for this version.
  pub init_script: String,

  /// Directory of the build tool checkout for this version. Exported as
  /// `BUILD_TOOL_DIR` on init, before the init script is sourced.
  #[serde(default)]
  pub tool_dir: Option<String>,

  /// Free-form compatibility tag carried through to consumers.
  #[serde(default)]
  pub compat: Option<String>,

  /// Optional containerized-build wrapper configuration. When present the
  /// environment script sources the container wrapper instead of
  /// `init_script` directly.
  #[serde(default)]
  pub container: Option<ContainerDef>,

  #[serde(default)]
  pub fetch: FetchSpec,

  /// Layer collections available in this version, in precedence order.
  /// Collection names recur across versions with different concrete paths.
  #[serde(default)]
  pub layers: Vec<LayerCollectionDef>,
}

/// Containerized-build wrapper settings for a version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerDef {
  /// Root directory of the container wrapper installation.
  pub root: String,
  /// Path of the wrapper's configuration file.
  pub conf: String,
}

/// A named, ordered group of layer paths declared under one version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LayerCollectionDef {
  pub name: String,

  #[serde(default)]
  pub paths: Vec<String>,

  /// Paths inside this collection that are always excluded for any unit
  /// using it.
  #[serde(default)]
  pub mask: Vec<String>,

  #[serde(default)]
  pub fetch: FetchSpec,
}

/// A mode or site profile: a description plus raw config-fragment text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AxisProfile {
  #[serde(default)]
  pub description: String,
  #[serde(default)]
  pub conf: String,
}

/// Global configuration applied to every buildable unit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoreDef {
  /// Layer collections every unit requires.
  #[serde(default)]
  pub layers: Vec<String>,

  /// Raw text appended to the layer fragment.
  #[serde(default)]
  pub layerconf: String,

  /// Raw text appended to the global config fragment.
  #[serde(default)]
  pub conf: String,
}

/// A buildable product.
///
/// A product that declares subproducts is never built directly: selection
/// expands it into its subproducts, each inheriting the parent's layer set
/// and resolved version.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProductDef {
  #[serde(default)]
  pub description: String,

  #[serde(default)]
  pub maintainers: Vec<String>,

  /// Version used when the selection's version is the `default` sentinel.
  pub default_version: String,

  /// Names of the layer collections this product requires.
  #[serde(default)]
  pub layers: Vec<String>,

  /// Default build targets.
  #[serde(default)]
  pub targets: Vec<String>,

  /// Whether this product's units get their own isolated namespace (own
  /// config fragment and masked layer set). Non-isolated units share the
  /// union of all selected layers with no masking.
  #[serde(default = "default_true")]
  pub multiconfig: bool,

  /// Independently isolated build units sharing this product's layers.
  #[serde(default)]
  pub subproducts: BTreeMap<String, SubproductDef>,

  /// Names of other buildable units whose deploy output this product
  /// consumes. Resolved at emission time; every referenced unit must be part
  /// of the same selection.
  #[serde(default)]
  pub uses: Vec<String>,

  #[serde(default)]
  pub conf: String,
}

fn default_true() -> bool {
  true
}

/// An isolated build unit under a product.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubproductDef {
  #[serde(default)]
  pub description: String,

  #[serde(default)]
  pub targets: Vec<String>,

  #[serde(default)]
  pub uses: Vec<String>,

  #[serde(default)]
  pub conf: String,
}

impl VersionDef {
  /// Look up a layer collection by name.
  pub fn collection(&self, name: &str) -> Option<&LayerCollectionDef> {
    self.layers.iter().find(|l| l.name == name)
  }
}
