//! Fatal configuration errors.
//!
//! These are the inputs bakeshop refuses to build with. Anything transient
//! (network, mounts, marker files) is logged where it happens instead.

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    /// Recipe failed schema validation.
    #[error("Recipe schema violation at {path}: {message}")]
    Schema { path: String, message: String },

    /// Recipe locator points nowhere.
    #[error("Recipe {} does not exist", .0.display())]
    RecipeMissing(PathBuf),

    /// Repository URL uses a transport bakeshop does not speak.
    #[error("{filling}: url {url} does not start with git@ or https://")]
    UnsupportedScheme { filling: String, url: String },

    /// Filling has no local directory, even after sync.
    #[error("{filling}: filling directory {} does not exist", .path.display())]
    MissingFilling { filling: String, path: PathBuf },

    /// Filling directory does not follow the pipeline naming convention.
    #[error("{filling}: filling directory failed validation: {reason}")]
    InvalidLayout { filling: String, reason: String },

    /// Run priority is not a one or two digit number.
    #[error("{filling}: run priority {priority} is invalid (expected 0-99)")]
    InvalidPriority { filling: String, priority: String },

    /// Two fillings resolve to the same staged directory.
    #[error("{first} and {second} both stage as {staged}")]
    StagedNameCollision {
        first: String,
        second: String,
        staged: String,
    },
}
