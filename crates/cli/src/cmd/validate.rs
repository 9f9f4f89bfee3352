//! Implementation of `strata validate`.
//!
//! Runs the loader and expander only: schema and variable errors are
//! reported, no artifacts are touched, no selection is resolved.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;

use strata_lib::descriptor;

use crate::output::{print_error, print_success};

pub fn cmd_validate(conf: &Path) -> Result<()> {
  let env: BTreeMap<String, String> = std::env::vars().collect();

  match descriptor::load(conf, &env) {
    Ok(project) => {
      print_success(&format!(
        "{} is valid ({} product(s), {} version(s))",
        conf.display(),
        project.descriptor.products.len(),
        project.descriptor.versions.len(),
      ));
      Ok(())
    }
    Err(e) => {
      print_error(&format!("{}: {e}", conf.display()));
      Err(e.into())
    }
  }
}
