//! Shared constants for strata.

/// Version sentinel meaning "use each selected product's default version".
pub const DEFAULT_VERSION: &str = "default";

/// Reserved unit name for the global/core configuration. No product or
/// subproduct may claim it.
pub const CORE_NAME: &str = "core";

/// Format version of the cached selection file. Bumped whenever the cache
/// shape changes; a mismatched cache is silently discarded.
pub const CACHE_FORMAT: u32 = 1;

/// Synthetic variable exposing the absolute project root to descriptor
/// expansion, hook scripts, and fetch commands.
pub const PROJECT_ROOT_VAR: &str = "STRATA_PROJECT_ROOT";

/// Maximum variable expansion depth before giving up. Generous enough for
/// any sane descriptor while guaranteeing termination.
pub const MAX_EXPANSION_DEPTH: usize = 32;

/// Fallback build directory when neither the user nor the descriptor names
/// one.
pub const DEFAULT_BUILD_DIR: &str = "build";

/// Fallback cache file name, relative to the project root.
pub const DEFAULT_CACHE_FILE: &str = ".strata-cache.yml";
