//! CLI integration tests for strata.
//!
//! Each test runs the real binary against a descriptor in an isolated
//! temporary directory, so cache state and emitted artifacts never leak
//! between tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn strata_cmd() -> Command {
  cargo_bin_cmd!("strata")
}

fn fixture(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// A project directory seeded with a descriptor fixture.
struct TestProject {
  temp: TempDir,
}

impl TestProject {
  fn new(fixture_name: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let content = std::fs::read_to_string(fixture(fixture_name)).unwrap();
    std::fs::write(temp.path().join("strata.yml"), content).unwrap();
    Self { temp }
  }

  fn conf(&self) -> PathBuf {
    self.temp.path().join("strata.yml")
  }

  fn env_script(&self) -> PathBuf {
    self.temp.path().join(".strata-env")
  }

  fn init(&self) -> Command {
    let mut cmd = strata_cmd();
    cmd
      .arg("init")
      .arg("--conf")
      .arg(self.conf())
      .arg("--env")
      .arg(self.env_script())
      .arg("--quiet");
    cmd
  }

  fn configure(&self) -> Command {
    let mut cmd = strata_cmd();
    cmd
      .arg("configure")
      .arg("--conf")
      .arg(self.conf())
      .arg("--env")
      .arg(self.env_script());
    cmd
  }
}

// =============================================================================
// Help & version
// =============================================================================

#[test]
fn help_flag_works() {
  strata_cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  strata_cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("strata"));
}

#[test]
fn subcommand_help_works() {
  for cmd in &["init", "configure", "list", "validate"] {
    strata_cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// validate
// =============================================================================

#[test]
fn validate_accepts_a_good_descriptor() {
  let project = TestProject::new("basic.yml");
  strata_cmd()
    .arg("validate")
    .arg(project.conf())
    .assert()
    .success()
    .stdout(predicate::str::contains("is valid"));
}

#[test]
fn validate_rejects_unknown_keys() {
  let project = TestProject::new("invalid.yml");
  strata_cmd()
    .arg("validate")
    .arg(project.conf())
    .assert()
    .failure()
    .stderr(predicate::str::contains("not_a_real_key"));
}

#[test]
fn validate_reports_undefined_variables() {
  let temp = TempDir::new().unwrap();
  let conf = temp.path().join("strata.yml");
  let content = std::fs::read_to_string(fixture("basic.yml"))
    .unwrap()
    .replace("STRATA_PROJECT_ROOT}/scripts", "SOME_UNDEFINED_TOOL_DIR}/scripts");
  std::fs::write(&conf, content).unwrap();

  strata_cmd()
    .arg("validate")
    .arg(&conf)
    .env_remove("SOME_UNDEFINED_TOOL_DIR")
    .assert()
    .failure()
    .stderr(predicate::str::contains("SOME_UNDEFINED_TOOL_DIR"));
}

// =============================================================================
// init / configure
// =============================================================================

#[test]
fn init_emits_environment_and_fragments() {
  let project = TestProject::new("basic.yml");
  project.init().assert().success();

  let env = std::fs::read_to_string(project.env_script()).unwrap();
  assert!(env.contains("export STRATA_PRODUCTS=\"alpha\""));
  assert!(env.contains("export STRATA_VERSION=\"default\""));
  assert!(env.contains("export STRATA_ACTUAL_VERSION=\"v1\""));
  assert!(env.contains("export STRATA_INIT=true"));

  let build = project.temp.path().join("build");
  assert!(build.join("conf/global.conf").exists());
  assert!(build.join("conf/layers.conf").exists());
  assert!(build.join("strata/conf/multiconfig/unit-alpha.conf").exists());

  // The selection was persisted for the next run.
  assert!(project.temp.path().join(".strata-cache.yml").exists());
}

#[test]
fn init_is_idempotent() {
  let project = TestProject::new("basic.yml");
  project.init().assert().success();
  let global = project.temp.path().join("build/conf/global.conf");
  let first = std::fs::read_to_string(&global).unwrap();

  project.init().assert().success();
  let second = std::fs::read_to_string(&global).unwrap();
  assert_eq!(first, second);
}

#[test]
fn configure_prints_a_summary() {
  let project = TestProject::new("basic.yml");
  project.init().assert().success();

  project
    .configure()
    .assert()
    .success()
    .stdout(predicate::str::contains("PRODUCT    = alpha"))
    .stdout(predicate::str::contains("VERSION    = default (v1)"));
}

#[test]
fn version_change_on_reconfigure_is_refused() {
  let project = TestProject::new("basic.yml");
  project.init().assert().success();

  project
    .configure()
    .arg("--version")
    .arg("v2")
    .assert()
    .failure()
    .stderr(predicate::str::contains("cannot be changed"));
}

#[test]
fn mode_change_on_reconfigure_is_allowed() {
  let project = TestProject::new("basic.yml");
  project.init().assert().success();

  project
    .configure()
    .arg("--mode")
    .arg("release")
    .assert()
    .success()
    .stdout(predicate::str::contains("MODE       = release"));

  // The change sticks for the next invocation.
  project
    .configure()
    .assert()
    .success()
    .stdout(predicate::str::contains("MODE       = release"));
}

#[test]
fn disagreeing_default_versions_are_refused() {
  let project = TestProject::new("basic.yml");
  project
    .init()
    .arg("--product")
    .arg("alpha beta")
    .assert()
    .failure()
    .stderr(predicate::str::contains("default version"));
}

#[test]
fn unknown_product_is_refused() {
  let project = TestProject::new("basic.yml");
  project
    .init()
    .arg("--product")
    .arg("nope")
    .assert()
    .failure()
    .stderr(predicate::str::contains("unknown product 'nope'"));
}

#[test]
fn no_cache_skips_persistence() {
  let project = TestProject::new("basic.yml");
  project.init().arg("--no-cache").assert().success();
  assert!(!project.temp.path().join(".strata-cache.yml").exists());
}

#[test]
fn fetch_runs_the_selection_commands() {
  let project = TestProject::new("basic.yml");
  let conf = project.conf();
  let content = std::fs::read_to_string(&conf).unwrap().replace(
    "      - name: base\n        paths: [\"%{STRATA_PROJECT_ROOT}/layers/v1/base\"]\n",
    "      - name: base\n        paths: [\"%{STRATA_PROJECT_ROOT}/layers/v1/base\"]\n        fetch:\n          commands: [\"touch fetched-base\"]\n",
  );
  std::fs::write(&conf, content).unwrap();

  project.init().arg("--fetch").assert().success();
  assert!(project.temp.path().join("fetched-base").exists());
}

#[test]
fn failing_fetch_aborts_the_run() {
  let project = TestProject::new("basic.yml");
  let conf = project.conf();
  let content = format!(
    "{}fetch:\n  commands: [\"exit 7\"]\n",
    std::fs::read_to_string(&conf).unwrap()
  );
  std::fs::write(&conf, content).unwrap();

  project
    .init()
    .arg("--fetch")
    .assert()
    .failure()
    .stderr(predicate::str::contains("exit code 7"));

  // Nothing was persisted for a failed run.
  assert!(!project.temp.path().join(".strata-cache.yml").exists());
}

// =============================================================================
// list
// =============================================================================

#[test]
fn list_enumerates_all_axes() {
  let project = TestProject::new("basic.yml");
  strata_cmd()
    .arg("list")
    .arg("--conf")
    .arg(project.conf())
    .assert()
    .success()
    .stdout(predicate::str::contains("Possible products:"))
    .stdout(predicate::str::contains("alpha"))
    .stdout(predicate::str::contains("Possible modes:"))
    .stdout(predicate::str::contains("Release build"))
    .stdout(predicate::str::contains("Possible versions:"))
    .stdout(predicate::str::contains("default"));
}

#[test]
fn list_marks_the_cached_selection() {
  let project = TestProject::new("basic.yml");
  project.init().arg("--mode").arg("release").assert().success();

  strata_cmd()
    .arg("list")
    .arg("--conf")
    .arg(project.conf())
    .assert()
    .success()
    .stdout(predicate::str::contains("* release"));
}
