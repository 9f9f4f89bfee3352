//! strata-lib: configuration resolution and environment generation for
//! multi-product source trees.
//!
//! The pipeline, in dependency order:
//! - [`descriptor`]: load and validate the project descriptor
//! - [`expand`]: `%NAME` / `%{NAME}` variable expansion
//! - [`cache`]: persistence of the last successful selection
//! - [`selection`]: merge explicit flags, cached state, and defaults
//! - [`layers`]: per-unit layer sets and masking
//! - [`emit`]: deterministic artifact and environment generation
//! - [`fetch`]: fetch command sequencing and execution

pub mod cache;
pub mod consts;
pub mod descriptor;
pub mod emit;
pub mod expand;
pub mod fetch;
pub mod layers;
pub mod selection;

pub use cache::{CacheError, CachedState};
pub use descriptor::{Descriptor, DescriptorError, Project};
pub use emit::{Artifact, EmitError, EmitOptions};
pub use expand::ExpandError;
pub use fetch::{FetchError, FetchPlan};
pub use layers::{ComposedLayers, LayerError};
pub use selection::{BuildUnit, Selection, SelectionError, SelectionRequest};
