//! strata: multi-axis build configuration manager.
//!
//! Resolves a per-axis selection (products, mode, site, version) against a
//! project descriptor and generates the configuration fragments and shell
//! environment the external build tool consumes.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod cmd;
mod output;

use cmd::ConfigureArgs;

#[derive(Parser)]
#[command(name = "strata")]
#[command(version, about = "Multi-axis build configuration manager", long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Initialize a new build environment
  Init(ConfigureArgs),

  /// Reconfigure an initialized build environment
  Configure(ConfigureArgs),

  /// List the valid values for every configuration axis
  List {
    /// Project descriptor file
    #[arg(long, default_value = "strata.yml")]
    conf: PathBuf,
  },

  /// Validate a descriptor without emitting anything
  Validate {
    /// Descriptor file to validate
    conf: PathBuf,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .without_time()
    .init();

  let cli = Cli::parse();

  match cli.command {
    Commands::Init(args) => cmd::cmd_configure(&args, true),
    Commands::Configure(args) => cmd::cmd_configure(&args, false),
    Commands::List { conf } => cmd::cmd_list(&conf),
    Commands::Validate { conf } => cmd::cmd_validate(&conf),
  }
}
