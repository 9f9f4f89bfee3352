//! Implementation of `strata list`.
//!
//! Enumerates the valid values per axis, marking the value the next
//! `configure` would use (cached state first, descriptor defaults
//! otherwise).

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

use strata_lib::cache;
use strata_lib::consts::DEFAULT_VERSION;
use strata_lib::descriptor;

use crate::output::print_axis;

pub fn cmd_list(conf: &Path) -> Result<()> {
  let env: BTreeMap<String, String> = std::env::vars().collect();
  let project = descriptor::load(conf, &env)
    .with_context(|| format!("failed to load descriptor '{}'", conf.display()))?;

  let cached = cache::load(&project.cache_path)?;
  let descriptor = &project.descriptor;
  let defaults = &descriptor.defaults;

  let products = match &cached {
    Some(c) => c.products.clone(),
    None => defaults.products.clone(),
  };
  let mode = cached
    .as_ref()
    .map(|c| c.mode.clone())
    .or_else(|| defaults.mode.clone());
  let site = cached
    .as_ref()
    .map(|c| c.site.clone())
    .or_else(|| defaults.site.clone());
  let version = cached
    .as_ref()
    .map(|c| c.version.clone())
    .unwrap_or_else(|| DEFAULT_VERSION.to_string());

  print_axis(
    "Possible products",
    descriptor
      .products
      .iter()
      .map(|(name, p)| (name.as_str(), p.description.as_str())),
    |name| products.iter().any(|p| p == name),
  );

  print_axis(
    "Possible modes",
    descriptor
      .modes
      .iter()
      .map(|(name, m)| (name.as_str(), m.description.as_str())),
    |name| mode.as_deref() == Some(name),
  );

  print_axis(
    "Possible sites",
    descriptor
      .sites
      .iter()
      .map(|(name, s)| (name.as_str(), s.description.as_str())),
    |name| site.as_deref() == Some(name),
  );

  print_axis(
    "Possible versions",
    descriptor
      .versions
      .iter()
      .map(|(name, v)| (name.as_str(), v.description.as_str()))
      .chain([(DEFAULT_VERSION, "")]),
    |name| version == name,
  );

  Ok(())
}
