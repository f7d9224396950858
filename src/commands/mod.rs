//! CLI command handlers.
//!
//! - `build` - stage fillings, run the pipeline, package the image
//! - `clean` - release mounts and remove staging for a recipe

pub mod build;
pub mod clean;

pub use build::{cmd_build, BuildOptions};
pub use clean::cmd_clean;
