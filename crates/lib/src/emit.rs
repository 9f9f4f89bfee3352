//! Artifact emission.
//!
//! Renders the build-tool configuration fragments and the shell environment
//! script for a resolved selection, then commits them to disk atomically.
//!
//! Rendering is split from committing: [`render`] is a pure function
//! producing [`Artifact`]s (target path plus content), and [`commit`] writes
//! each one through a scoped temp file in the destination directory followed
//! by an atomic rename. Re-rendering an unchanged selection against an
//! unchanged descriptor yields byte-identical artifacts, which keeps the
//! build tool's configuration cache valid across runs.

use std::fmt::Write as _;
use std::io::{self, Write as _};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::debug;

use crate::descriptor::Descriptor;
use crate::layers::ComposedLayers;
use crate::selection::{BuildUnit, Selection};

const HEADER: &str = "# This file was dynamically generated by strata; do not edit\n";

/// One emitted configuration fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
  pub path: PathBuf,
  pub content: String,
}

/// What to render for this invocation.
#[derive(Debug, Clone)]
pub struct EmitOptions {
  /// Where the shell environment script goes.
  pub env_path: PathBuf,
  /// Whether to (re)write the configuration fragments under the build
  /// directory, not just the environment script.
  pub write_fragments: bool,
}

/// Errors from rendering or committing artifacts.
#[derive(Debug, Error)]
pub enum EmitError {
  #[error(
    "unit '{unit}' uses the deploy output of '{reference}', which is not part of the \
     current selection"
  )]
  InactiveReference { unit: String, reference: String },

  #[error("failed to write artifact '{path}': {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Render every artifact for the selection.
pub fn render(
  descriptor: &Descriptor,
  selection: &Selection,
  layers: &ComposedLayers,
  root: &Path,
  options: &EmitOptions,
) -> Result<Vec<Artifact>, EmitError> {
  check_references(selection)?;

  let mut artifacts = vec![Artifact {
    path: options.env_path.clone(),
    content: render_env_script(descriptor, selection, root),
  }];

  if options.write_fragments {
    let build_dir = &selection.build_dir;
    artifacts.push(Artifact {
      path: build_dir.join("conf/global.conf"),
      content: render_global_conf(descriptor, selection),
    });
    artifacts.push(Artifact {
      path: build_dir.join("conf/layers.conf"),
      content: render_layers_conf(descriptor, layers),
    });
    for unit in &selection.units {
      if unit.isolated {
        artifacts.push(Artifact {
          path: build_dir.join(format!("strata/conf/multiconfig/unit-{}.conf", unit.name)),
          content: render_unit_conf(unit),
        });
      }
    }
  }

  Ok(artifacts)
}

/// Commit artifacts to disk, each through a temp file and atomic rename.
///
/// A failure leaves previously committed artifacts valid and the failing
/// target untouched; the orphaned temp file is cleaned up on drop.
pub fn commit(artifacts: &[Artifact]) -> Result<(), EmitError> {
  for artifact in artifacts {
    write_atomic(&artifact.path, &artifact.content)?;
    debug!(path = %artifact.path.display(), bytes = artifact.content.len(), "artifact written");
  }
  Ok(())
}

/// Every declared inter-unit output reference must point at a unit in the
/// same selection; emitting a deploy path for an absent unit would hand the
/// build tool a directory nothing populates.
fn check_references(selection: &Selection) -> Result<(), EmitError> {
  for unit in &selection.units {
    for reference in &unit.uses {
      if !selection.is_active(reference) {
        return Err(EmitError::InactiveReference {
          unit: unit.name.clone(),
          reference: reference.clone(),
        });
      }
    }
  }
  Ok(())
}

fn render_env_script(descriptor: &Descriptor, selection: &Selection, root: &Path) -> String {
  let mut out = String::new();

  let _ = writeln!(out, "export STRATA_PRODUCTS=\"{}\"", selection.products.join(" "));
  let _ = writeln!(out, "export STRATA_MODE=\"{}\"", selection.mode);
  let _ = writeln!(out, "export STRATA_SITE=\"{}\"", selection.site);
  let _ = writeln!(out, "export STRATA_VERSION=\"{}\"", selection.version);
  let _ = writeln!(out, "export STRATA_ACTUAL_VERSION=\"{}\"", selection.actual_version);
  out.push('\n');
  let _ = writeln!(out, "export STRATA_BUILD_DIR=\"{}\"", selection.build_dir.display());
  let _ = writeln!(
    out,
    "export STRATA_INIT={}",
    if selection.init { "true" } else { "false" }
  );

  if let Some(pre_init) = &descriptor.hooks.pre_init {
    out.push_str(pre_init);
    out.push('\n');
  }

  if selection.init {
    let version = &descriptor.versions[&selection.actual_version];

    let _ = writeln!(out, "export STRATA_PROJECT_ROOT=\"{}\"", root.display());
    if let Some(tool_dir) = &version.tool_dir {
      let _ = writeln!(out, "export BUILD_TOOL_DIR=\"{tool_dir}\"");
    }

    let mut passthrough = vec![
      "STRATA_PROJECT_ROOT",
      "STRATA_PRODUCTS",
      "STRATA_MODE",
      "STRATA_SITE",
      "STRATA_ACTUAL_VERSION",
    ];
    passthrough.extend(descriptor.hooks.env_passthrough.iter().map(String::as_str));
    let _ = writeln!(
      out,
      "export BUILD_ENV_PASSTHROUGH=\"${{BUILD_ENV_PASSTHROUGH}} {}\"",
      passthrough.join(" ")
    );

    if let Some(container) = &version.container {
      let _ = writeln!(out, "CONTAINER_CONFIG_BIND=\"{}\"", root.display());
      let _ = writeln!(out, "CONTAINER_ROOT=\"{}\"", container.root);
      let _ = writeln!(out, "CONTAINER_INIT_SCRIPT=\"{}\"", version.init_script);
      let _ = writeln!(out, "CONTAINER_CONF_FILE=\"{}\"", container.conf);
      let _ = writeln!(
        out,
        ". {}/container-init-build-env $STRATA_BUILD_DIR",
        container.root
      );
    } else {
      let _ = writeln!(out, ". {} $STRATA_BUILD_DIR", version.init_script);
    }
  }

  if let Some(post_init) = &descriptor.hooks.post_init {
    out.push_str(post_init);
    out.push('\n');
  }

  out.push_str("unset STRATA_BUILD_DIR STRATA_INIT\n");
  out
}

fn render_global_conf(descriptor: &Descriptor, selection: &Selection) -> String {
  let mut out = String::from(HEADER);

  let site = &descriptor.sites[&selection.site];
  let mode = &descriptor.modes[&selection.mode];
  out.push_str(&site.conf);
  out.push('\n');
  out.push_str(&mode.conf);
  out.push('\n');

  // Schema v1 consumers still read the unprefixed deploy variables.
  if descriptor.version < 2 {
    out.push_str(
      "DEPLOY_DIR_BASE ?= \"${TOPDIR}/deploy/${STRATA_MODE}/${STRATA_ACTUAL_VERSION}\"\n\
       STRATA_DEPLOY_DIR_BASE ?= \"${DEPLOY_DIR_BASE}\"\n\
       \n\
       STRATA_DEPLOY_DIR_core = \"${STRATA_DEPLOY_DIR_BASE}/core\"\n\
       DEPLOY_DIR_core = \"${STRATA_DEPLOY_DIR_core}\"\n",
    );
  } else {
    out.push_str(
      "STRATA_DEPLOY_DIR_BASE ?= \"${TOPDIR}/deploy/${STRATA_MODE}/${STRATA_ACTUAL_VERSION}\"\n\
       \n\
       STRATA_DEPLOY_DIR_core = \"${STRATA_DEPLOY_DIR_BASE}/core\"\n",
    );
  }

  out.push_str(
    "CFGPATH .= \":${TOPDIR}/strata\"\n\
     \n\
     STRATA_UNIT ?= \"core\"\n\
     \n\
     # Keep each unit's transient output in a version-specific location\n\
     TMPDIR_BASE ?= \"${TOPDIR}/tmp/${STRATA_MODE}/${STRATA_ACTUAL_VERSION}\"\n\
     TMPDIR = \"${TMPDIR_BASE}/${STRATA_UNIT}\"\n\
     \n\
     DEPLOY_DIR = \"${STRATA_DEPLOY_DIR_${STRATA_UNIT}}\"\n\
     DEPLOY_DIR_IMAGE = \"${DEPLOY_DIR}/images\"\n",
  );

  // Unit order follows the product axis (sorted) for plain products, but
  // subproducts follow their parent's declaration order; sort by name so
  // the fragment is stable either way.
  let mut units: Vec<&BuildUnit> = selection.units.iter().collect();
  units.sort_unstable_by(|a, b| a.name.cmp(&b.name));

  let _ = writeln!(
    out,
    "STRATA_TARGETS_core = \"{}\"",
    units
      .iter()
      .map(|u| format!("${{STRATA_TARGETS_{}}}", u.name))
      .collect::<Vec<_>>()
      .join(" ")
  );

  for unit in &units {
    let name = &unit.name;
    if descriptor.version < 2 {
      let _ = writeln!(out, "DEPLOY_DIR_{name} = \"${{STRATA_DEPLOY_DIR_{name}}}\"");
    }
    let _ = writeln!(out, "STRATA_DEPLOY_DIR_{name} = \"${{STRATA_DEPLOY_DIR_BASE}}/{name}\"");
    let mut targets = unit.targets.clone();
    targets.sort_unstable();
    let _ = writeln!(out, "STRATA_TARGETS_{name} = \"{}\"", targets.join(" "));
    for reference in &unit.uses {
      let _ = writeln!(
        out,
        "STRATA_USES_DIR_{name}_{reference} = \"${{STRATA_DEPLOY_DIR_{reference}}}\""
      );
    }
  }
  out.push('\n');

  let mut multiconfigs: Vec<&str> = selection
    .units
    .iter()
    .filter(|u| u.isolated)
    .map(|u| u.name.as_str())
    .collect();
  multiconfigs.sort_unstable();

  let _ = writeln!(
    out,
    "MULTICONFIG = \"{}\"",
    multiconfigs
      .iter()
      .map(|u| format!("unit-{u}"))
      .collect::<Vec<_>>()
      .join(" ")
  );
  out.push_str("LAYERMASK += \"${LAYERMASK_${STRATA_UNIT}}\"\n");
  out.push_str("\nHASH_IGNORE_VARS += \" STRATA_PROJECT_ROOT\"\n");

  out.push_str(&descriptor.core.conf);
  out.push('\n');

  out
}

fn render_unit_conf(unit: &BuildUnit) -> String {
  let mut out = String::from(HEADER);
  let _ = writeln!(out, "STRATA_UNIT = \"{}\"", unit.name);
  let _ = writeln!(out, "STRATA_UNIT_DESCRIPTION = \"{}\"", unit.description);
  out.push('\n');
  out.push_str(&unit.conf);
  out.push('\n');
  out
}

fn render_layers_conf(descriptor: &Descriptor, layers: &ComposedLayers) -> String {
  let mut out = String::from(HEADER);
  out.push_str("CFGPATH = \"${TOPDIR}\"\n\n");

  // Masks come first so a unit's exclusions are in force before any layer
  // is brought in. Core never masks anything of its own; it shares the
  // union like a non-isolated unit.
  for unit in &layers.units {
    for path in &unit.mask {
      let _ = writeln!(out, "LAYERMASK_{} += \"{}\"", unit.unit, path);
    }
    if !unit.mask.is_empty() {
      out.push('\n');
    }
  }

  for path in layers.all_paths() {
    let _ = writeln!(out, "LAYERS += \"{path}\"");
  }
  out.push('\n');

  if !descriptor.core.layerconf.is_empty() {
    out.push_str(&descriptor.core.layerconf);
    out.push('\n');
  }

  // Trailing empty assignment gives tooling a stable anchor for appending
  // scratch layers.
  out.push_str("LAYERS += \"\"\n");

  out
}

fn write_atomic(path: &Path, content: &str) -> Result<(), EmitError> {
  let dir = path.parent().unwrap_or_else(|| Path::new("."));
  let io_err = |source| EmitError::Write {
    path: path.to_path_buf(),
    source,
  };

  std::fs::create_dir_all(dir).map_err(io_err)?;
  let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
  tmp.write_all(content.as_bytes()).map_err(io_err)?;
  tmp.persist(path).map_err(|e| io_err(e.error))?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CachedState;
  use crate::descriptor::types::*;
  use crate::layers;
  use crate::selection::{self, Selection, SelectionRequest};
  use std::collections::BTreeMap;
  use tempfile::TempDir;

  fn descriptor() -> Descriptor {
    Descriptor {
      version: 2,
      project_root: ".".into(),
      cache: None,
      defaults: Defaults {
        products: vec!["alpha".into()],
        mode: Some("dev".into()),
        site: Some("hq".into()),
        build_dir: None,
      },
      hooks: Hooks {
        pre_init: Some("echo pre".into()),
        post_init: Some("echo post".into()),
        env_passthrough: vec!["PROXY".into()],
      },
      fetch: FetchSpec::default(),
      versions: [(
        "v1".to_string(),
        VersionDef {
          description: String::new(),
          init_script: "/proj/scripts/init-env".into(),
          tool_dir: None,
          compat: None,
          container: None,
          fetch: FetchSpec::default(),
          layers: vec![LayerCollectionDef {
            name: "core".into(),
            paths: vec!["/proj/layers/v1/meta".into()],
            mask: Vec::new(),
            fetch: FetchSpec::default(),
          }],
        },
      )]
      .into_iter()
      .collect(),
      modes: [(
        "dev".to_string(),
        AxisProfile {
          description: String::new(),
          conf: "MODE_FLAG = \"1\"".into(),
        },
      )]
      .into_iter()
      .collect(),
      sites: [("hq".to_string(), AxisProfile::default())].into_iter().collect(),
      core: CoreDef::default(),
      products: [
        (
          "alpha".to_string(),
          ProductDef {
            description: "Alpha product".into(),
            maintainers: Vec::new(),
            default_version: "v1".into(),
            layers: vec!["core".into()],
            targets: vec!["alpha-image".into()],
            multiconfig: true,
            subproducts: BTreeMap::new(),
            uses: Vec::new(),
            conf: String::new(),
          },
        ),
        (
          "beta".to_string(),
          ProductDef {
            description: String::new(),
            maintainers: Vec::new(),
            default_version: "v1".into(),
            layers: vec!["core".into()],
            targets: Vec::new(),
            multiconfig: true,
            subproducts: BTreeMap::new(),
            uses: vec!["alpha".into()],
            conf: String::new(),
          },
        ),
      ]
      .into_iter()
      .collect(),
    }
  }

  fn setup(d: &Descriptor, products: &[&str]) -> (Selection, ComposedLayers) {
    let request = SelectionRequest {
      products: products.iter().map(|p| p.to_string()).collect(),
      ..Default::default()
    };
    let s = selection::resolve(d, Path::new("/proj"), &request, None, true).unwrap();
    let l = layers::compose(d, &s).unwrap();
    (s, l)
  }

  fn options() -> EmitOptions {
    EmitOptions {
      env_path: PathBuf::from("/proj/.strata-env"),
      write_fragments: true,
    }
  }

  #[test]
  fn rendering_is_deterministic() {
    let d = descriptor();
    let (s, l) = setup(&d, &["alpha", "beta"]);
    let first = render(&d, &s, &l, Path::new("/proj"), &options()).unwrap();
    let second = render(&d, &s, &l, Path::new("/proj"), &options()).unwrap();
    assert_eq!(first, second);
  }

  #[test]
  fn env_script_reports_the_actual_version() {
    let d = descriptor();
    let (s, l) = setup(&d, &["alpha"]);
    assert_eq!(s.version, "default");
    let artifacts = render(&d, &s, &l, Path::new("/proj"), &options()).unwrap();
    let env = &artifacts[0].content;
    assert!(env.contains("export STRATA_VERSION=\"default\""));
    assert!(env.contains("export STRATA_ACTUAL_VERSION=\"v1\""));
    // The sentinel never leaks into the actual-version export.
    assert!(!env.contains("STRATA_ACTUAL_VERSION=\"default\""));
  }

  #[test]
  fn env_script_carries_hooks_and_passthrough() {
    let d = descriptor();
    let (s, l) = setup(&d, &["alpha"]);
    let artifacts = render(&d, &s, &l, Path::new("/proj"), &options()).unwrap();
    let env = &artifacts[0].content;
    assert!(env.contains("echo pre\n"));
    assert!(env.contains("echo post\n"));
    assert!(env.contains("STRATA_ACTUAL_VERSION PROXY"));
    assert!(env.contains(". /proj/scripts/init-env $STRATA_BUILD_DIR"));
    assert!(env.ends_with("unset STRATA_BUILD_DIR STRATA_INIT\n"));
  }

  #[test]
  fn reconfigure_env_script_skips_init_lines() {
    let d = descriptor();
    let request = SelectionRequest::default();
    let cache = CachedState {
      cache_version: crate::consts::CACHE_FORMAT,
      products: vec!["alpha".into()],
      mode: "dev".into(),
      site: "hq".into(),
      version: "default".into(),
      actual_version: "v1".into(),
      build_dir: PathBuf::from("/proj/build"),
    };
    let s = selection::resolve(&d, Path::new("/proj"), &request, Some(&cache), false).unwrap();
    let l = layers::compose(&d, &s).unwrap();
    let artifacts = render(&d, &s, &l, Path::new("/proj"), &options()).unwrap();
    let env = &artifacts[0].content;
    assert!(env.contains("export STRATA_INIT=false"));
    assert!(!env.contains("init-env"));
    assert!(!env.contains("BUILD_ENV_PASSTHROUGH"));
  }

  #[test]
  fn tool_dir_is_exported_on_init_only() {
    let mut d = descriptor();
    d.versions.get_mut("v1").unwrap().tool_dir = Some("/proj/bitbake".into());
    let (s, l) = setup(&d, &["alpha"]);
    let artifacts = render(&d, &s, &l, Path::new("/proj"), &options()).unwrap();
    assert!(artifacts[0].content.contains("export BUILD_TOOL_DIR=\"/proj/bitbake\""));

    let cache = CachedState::from_selection(&s);
    let reconfigured = selection::resolve(
      &d,
      Path::new("/proj"),
      &SelectionRequest::default(),
      Some(&cache),
      false,
    )
    .unwrap();
    let artifacts = render(&d, &reconfigured, &l, Path::new("/proj"), &options()).unwrap();
    assert!(!artifacts[0].content.contains("BUILD_TOOL_DIR"));
  }

  #[test]
  fn container_versions_source_the_wrapper() {
    let mut d = descriptor();
    d.versions.get_mut("v1").unwrap().container = Some(ContainerDef {
      root: "/proj/container".into(),
      conf: "/proj/container.cfg".into(),
    });
    let (s, l) = setup(&d, &["alpha"]);
    let artifacts = render(&d, &s, &l, Path::new("/proj"), &options()).unwrap();
    let env = &artifacts[0].content;
    assert!(env.contains("CONTAINER_ROOT=\"/proj/container\""));
    assert!(env.contains(". /proj/container/container-init-build-env $STRATA_BUILD_DIR"));
    assert!(!env.contains(". /proj/scripts/init-env"));
  }

  #[test]
  fn global_conf_lists_targets_and_deploy_dirs() {
    let d = descriptor();
    let (s, l) = setup(&d, &["alpha", "beta"]);
    let artifacts = render(&d, &s, &l, Path::new("/proj"), &options()).unwrap();
    let global = &artifacts
      .iter()
      .find(|a| a.path.ends_with("conf/global.conf"))
      .unwrap()
      .content;

    assert!(global.contains(
      "STRATA_TARGETS_core = \"${STRATA_TARGETS_alpha} ${STRATA_TARGETS_beta}\""
    ));
    assert!(global.contains("STRATA_DEPLOY_DIR_alpha = \"${STRATA_DEPLOY_DIR_BASE}/alpha\""));
    assert!(global.contains("STRATA_TARGETS_alpha = \"alpha-image\""));
    assert!(global.contains("MULTICONFIG = \"unit-alpha unit-beta\""));
    assert!(global.contains("MODE_FLAG = \"1\""));
    // beta consumes alpha's deploy output.
    assert!(global.contains("STRATA_USES_DIR_beta_alpha = \"${STRATA_DEPLOY_DIR_alpha}\""));
    // Schema v2 drops the deprecated alias.
    assert!(!global.contains("\nDEPLOY_DIR_alpha ="));
  }

  #[test]
  fn schema_v1_keeps_the_deprecated_deploy_alias() {
    let mut d = descriptor();
    d.version = 1;
    let (s, l) = setup(&d, &["alpha"]);
    let artifacts = render(&d, &s, &l, Path::new("/proj"), &options()).unwrap();
    let global = &artifacts
      .iter()
      .find(|a| a.path.ends_with("conf/global.conf"))
      .unwrap()
      .content;
    assert!(global.contains("DEPLOY_DIR_alpha = \"${STRATA_DEPLOY_DIR_alpha}\""));
    assert!(global.contains("DEPLOY_DIR_core = \"${STRATA_DEPLOY_DIR_core}\""));
  }

  #[test]
  fn unit_fragments_are_emitted_for_active_units_only() {
    let d = descriptor();
    let (s, l) = setup(&d, &["alpha"]);
    let artifacts = render(&d, &s, &l, Path::new("/proj"), &options()).unwrap();
    assert!(
      artifacts
        .iter()
        .any(|a| a.path.ends_with("multiconfig/unit-alpha.conf"))
    );
    // beta is declared but not selected; it gets no fragment.
    assert!(
      !artifacts
        .iter()
        .any(|a| a.path.ends_with("multiconfig/unit-beta.conf"))
    );
  }

  #[test]
  fn dangling_uses_reference_fails_emission() {
    let d = descriptor();
    // beta uses alpha, but only beta is selected.
    let (s, l) = setup(&d, &["beta"]);
    match render(&d, &s, &l, Path::new("/proj"), &options()).unwrap_err() {
      EmitError::InactiveReference { unit, reference } => {
        assert_eq!(unit, "beta");
        assert_eq!(reference, "alpha");
      }
      other => panic!("unexpected: {other:?}"),
    }
  }

  #[test]
  fn layers_conf_lists_paths_once() {
    let d = descriptor();
    let (s, l) = setup(&d, &["alpha", "beta"]);
    let artifacts = render(&d, &s, &l, Path::new("/proj"), &options()).unwrap();
    let conf = &artifacts
      .iter()
      .find(|a| a.path.ends_with("conf/layers.conf"))
      .unwrap()
      .content;
    assert_eq!(
      conf.matches("LAYERS += \"/proj/layers/v1/meta\"").count(),
      1
    );
  }

  #[test]
  fn commit_writes_all_artifacts() {
    let dir = TempDir::new().unwrap();
    let artifacts = vec![
      Artifact {
        path: dir.path().join("conf/global.conf"),
        content: "A = \"1\"\n".into(),
      },
      Artifact {
        path: dir.path().join("env"),
        content: "export X=1\n".into(),
      },
    ];
    commit(&artifacts).unwrap();
    assert_eq!(
      std::fs::read_to_string(dir.path().join("conf/global.conf")).unwrap(),
      "A = \"1\"\n"
    );
    assert_eq!(std::fs::read_to_string(dir.path().join("env")).unwrap(), "export X=1\n");
  }

  #[test]
  fn commit_replaces_existing_content() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("env");
    std::fs::write(&path, "stale").unwrap();
    commit(&[Artifact {
      path: path.clone(),
      content: "fresh\n".into(),
    }])
    .unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh\n");
  }
}
