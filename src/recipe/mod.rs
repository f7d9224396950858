//! Recipe loading and validation.
//!
//! A recipe is a JSON document naming the image, the fillings to layer
//! onto the pipeline, the stages to skip, and any number of scalar
//! pipeline settings that are passed through to the config file.

pub mod fetch;
pub mod schema;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::{Map, Number, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::error::ConfigError;
use fetch::{Fetch, Locator};

/// Output root used when the recipe does not name one.
pub const DEFAULT_OUTPUT_DIR: &str = "artifacts";

/// Keys that shape the build rather than configure the pipeline.
pub const STRUCTURAL_KEYS: &[&str] = &["fillings", "skip_stage", "skip_image", "skip_noobs"];

/// One entry of the recipe's `fillings` array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FillingSpec {
    pub name: String,
    pub run_priority: Number,
    #[serde(default)]
    pub git_url: Option<String>,
    #[serde(default)]
    pub git_tag: Option<String>,
    #[serde(default)]
    pub ssh_key: Option<String>,
}

#[derive(Deserialize)]
struct RecipeDoc {
    #[serde(rename = "IMG_NAME")]
    img_name: String,
    #[serde(default)]
    output_dir: Option<String>,
    #[serde(default)]
    skip_stage: Vec<String>,
    #[serde(default)]
    skip_image: Vec<String>,
    #[serde(default)]
    skip_noobs: Vec<String>,
    fillings: Vec<FillingSpec>,
}

/// A validated recipe. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Recipe {
    pub img_name: String,
    pub output_dir: PathBuf,
    pub skip_stage: Vec<String>,
    pub skip_image: Vec<String>,
    pub skip_noobs: Vec<String>,
    pub fillings: Vec<FillingSpec>,
    /// Every top-level key in document order.
    fields: Map<String, Value>,
}

impl Recipe {
    /// Validate a parsed document and build the typed recipe.
    pub fn from_value(doc: Value) -> Result<Self> {
        if let Err(violations) = schema::validate(&doc) {
            for v in &violations {
                error!("Schema ValidationError at {}: {}", v.path, v.message);
            }
            let first = violations.into_iter().next().map(|v| ConfigError::Schema {
                path: v.path,
                message: v.message,
            });
            if let Some(err) = first {
                return Err(err.into());
            }
        }

        let fields = doc.as_object().cloned().unwrap_or_default();
        let typed: RecipeDoc =
            serde_json::from_value(doc).context("Recipe does not match its schema")?;

        let output_dir = match typed.output_dir.as_deref() {
            None | Some("") => PathBuf::from(DEFAULT_OUTPUT_DIR),
            Some(dir) => PathBuf::from(dir),
        };

        Ok(Self {
            img_name: typed.img_name,
            output_dir,
            skip_stage: typed.skip_stage,
            skip_image: typed.skip_image,
            skip_noobs: typed.skip_noobs,
            fillings: typed.fillings,
            fields,
        })
    }

    /// Parse and validate recipe JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        let doc: Value = serde_json::from_str(text).context("Recipe is not valid JSON")?;
        Self::from_value(doc)
    }

    /// Top-level fields in document order, structural keys included.
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Whether any filling is synchronized from a repository.
    pub fn uses_git(&self) -> bool {
        self.fillings.iter().any(|f| f.git_url.is_some())
    }
}

/// Load a recipe from a path or URL.
///
/// `recipes_dir` caches remote recipes.
pub fn load(locator: &str, recipes_dir: &Path, fetcher: &dyn Fetch) -> Result<Recipe> {
    let path = fetch::resolve(&Locator::parse(locator), recipes_dir, fetcher)?;
    let text = fs::read_to_string(&path)
        .with_context(|| format!("Failed to read recipe {}", path.display()))?;
    let recipe = Recipe::from_json(&text)
        .with_context(|| format!("Invalid recipe {}", path.display()))?;
    info!("Recipe JSON is valid");
    Ok(recipe)
}
