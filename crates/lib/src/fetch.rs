//! Fetch command planning and execution.
//!
//! The engine does not understand what a fetch command does; it only decides
//! which commands apply to a selection and in what order. The plan is:
//! project-level commands, then the resolved version's commands, then each
//! required layer collection's commands in the version's declared order. A
//! collection shared by several units contributes its commands once.
//!
//! Execution is strictly sequential through the shell, with the working
//! directory fixed at the project root. The first non-zero exit aborts the
//! rest of the plan; there is no retry and no partial-success notion.

use std::path::Path;
use std::process::Command;

use thiserror::Error;
use tracing::{debug, info};

use crate::consts::PROJECT_ROOT_VAR;
use crate::descriptor::Descriptor;
use crate::layers::ComposedLayers;
use crate::selection::Selection;

/// The ordered command sequence for one fetch run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FetchPlan {
  pub commands: Vec<String>,
}

impl FetchPlan {
  pub fn is_empty(&self) -> bool {
    self.commands.is_empty()
  }
}

/// Errors from executing a fetch plan.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("failed to spawn fetch command '{command}': {source}")]
  Spawn {
    command: String,
    #[source]
    source: std::io::Error,
  },

  #[error("fetch command '{command}' failed{}:\n{output}", exit_suffix(.code))]
  Command {
    command: String,
    code: Option<i32>,
    output: String,
  },
}

fn exit_suffix(code: &Option<i32>) -> String {
  match code {
    Some(code) => format!(" with exit code {code}"),
    None => String::new(),
  }
}

/// Compute the fetch command sequence for a selection.
pub fn plan(descriptor: &Descriptor, selection: &Selection, layers: &ComposedLayers) -> FetchPlan {
  let mut commands = Vec::new();

  commands.extend(descriptor.fetch.commands.iter().cloned());

  if let Some(version) = descriptor.versions.get(&selection.actual_version) {
    commands.extend(version.fetch.commands.iter().cloned());
  }

  // `layers.required` already holds each collection exactly once, in the
  // version's declared order.
  for collection in &layers.required {
    commands.extend(collection.fetch.iter().cloned());
  }

  FetchPlan { commands }
}

/// Run the plan sequentially, stopping at the first failure.
pub fn run(plan: &FetchPlan, root: &Path) -> Result<(), FetchError> {
  for command in &plan.commands {
    info!(%command, "fetching");

    let output = Command::new("sh")
      .arg("-c")
      .arg(command)
      .current_dir(root)
      .env(PROJECT_ROOT_VAR, root)
      .output()
      .map_err(|source| FetchError::Spawn {
        command: command.clone(),
        source,
      })?;

    if !output.status.success() {
      let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
      combined.push_str(&String::from_utf8_lossy(&output.stderr));
      return Err(FetchError::Command {
        command: command.clone(),
        code: output.status.code(),
        output: combined,
      });
    }

    debug!(%command, "fetch command succeeded");
  }

  Ok(())
}
