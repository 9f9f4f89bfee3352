//! Implementation of `strata init` and `strata configure`.
//!
//! Both run the same pipeline; `init` additionally lifts the immutability
//! rules on the version and build-directory axes and makes the generated
//! environment script source the build tool's init script.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::{debug, info};

use strata_lib::cache::{self, CachedState};
use strata_lib::emit::{self, EmitOptions};
use strata_lib::selection::{self, SelectionRequest};
use strata_lib::{descriptor, fetch, layers};

/// Per-axis overrides plus output options, shared by init and configure.
#[derive(Args, Debug)]
pub struct ConfigureArgs {
  /// Project descriptor file
  #[arg(long, default_value = "strata.yml")]
  pub conf: PathBuf,

  /// Path of the generated shell environment script
  #[arg(long, default_value = ".strata-env")]
  pub env: PathBuf,

  /// Select build product(s); repeat or space-separate for several
  #[arg(long = "product", value_name = "NAME")]
  pub products: Vec<String>,

  /// Select the build mode
  #[arg(long)]
  pub mode: Option<String>,

  /// Select the build site
  #[arg(long)]
  pub site: Option<String>,

  /// Select the layer/toolchain version ('default' follows each product)
  #[arg(long)]
  pub version: Option<String>,

  /// Set the build directory
  #[arg(long)]
  pub build_dir: Option<PathBuf>,

  /// Run the fetch commands required by the selection
  #[arg(long)]
  pub fetch: bool,

  /// Ignore cached configuration and do not update it
  #[arg(long, short = 'n')]
  pub no_cache: bool,

  /// Rewrite configuration fragments even if nothing changed
  #[arg(long)]
  pub write: bool,

  /// Suppress the configuration summary
  #[arg(long, short)]
  pub quiet: bool,
}

pub fn cmd_configure(args: &ConfigureArgs, init: bool) -> Result<()> {
  // The expander sees the process environment as an explicit input; nothing
  // below main reads ambient state.
  let env: BTreeMap<String, String> = std::env::vars().collect();

  let project = descriptor::load(&args.conf, &env)
    .with_context(|| format!("failed to load descriptor '{}'", args.conf.display()))?;
  debug!(path = %args.conf.display(), "descriptor loaded");

  let cached = if args.no_cache {
    None
  } else {
    cache::load(&project.cache_path)?
  };

  let request = request_from(args);
  let explicit_change = !request.products.is_empty()
    || request.mode.is_some()
    || request.site.is_some()
    || request.version.is_some();

  let selection = selection::resolve(
    &project.descriptor,
    &project.root,
    &request,
    cached.as_ref(),
    init,
  )?;
  let composed = layers::compose(&project.descriptor, &selection)?;

  if args.fetch {
    let plan = fetch::plan(&project.descriptor, &selection, &composed);
    fetch::run(&plan, &project.root)?;
  }

  let options = EmitOptions {
    env_path: args.env.clone(),
    write_fragments: init || args.write || explicit_change,
  };
  let artifacts = emit::render(
    &project.descriptor,
    &selection,
    &composed,
    &project.root,
    &options,
  )?;
  emit::commit(&artifacts)?;
  info!(env = %args.env.display(), artifacts = artifacts.len(), "environment written");

  // Only a fully emitted selection becomes the new prior state.
  if !args.no_cache {
    cache::save(&project.cache_path, &CachedState::from_selection(&selection))?;
  }

  if !args.quiet {
    print_summary(&selection);
  }

  Ok(())
}

fn request_from(args: &ConfigureArgs) -> SelectionRequest {
  SelectionRequest {
    // Accept both repeated flags and space-separated names in one flag.
    products: args
      .products
      .iter()
      .flat_map(|p| p.split_whitespace())
      .map(str::to_string)
      .collect(),
    mode: args.mode.clone(),
    site: args.site.clone(),
    version: args.version.clone(),
    build_dir: args.build_dir.clone(),
  }
}

fn print_summary(selection: &strata_lib::Selection) {
  println!("PRODUCT    = {}", selection.products.join(" "));
  println!("MODE       = {}", selection.mode);
  println!("SITE       = {}", selection.site);
  if selection.version != selection.actual_version {
    println!(
      "VERSION    = {} ({})",
      selection.version, selection.actual_version
    );
  } else {
    println!("VERSION    = {}", selection.version);
  }
}
