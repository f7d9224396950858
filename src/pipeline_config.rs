//! Pipeline config file synthesis.
//!
//! The pipeline sources a flat shell-style file: one `KEY=value` line per
//! recipe scalar. Numbers are written bare, strings double-quoted. The
//! structural keys (fillings and skip lists) and empty strings are left
//! out. The file is rewritten from scratch on every run.

use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::Path;
use tracing::{error, info};

use crate::recipe::schema::type_name;
use crate::recipe::{Recipe, STRUCTURAL_KEYS};

/// A recipe field that could not be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedField {
    pub key: String,
    pub kind: &'static str,
}

/// Rendered config text plus the fields left out for having no scalar
/// representation.
#[derive(Debug, Clone, Default)]
pub struct Rendered {
    pub text: String,
    pub skipped: Vec<SkippedField>,
}

/// Render the config file content for a recipe.
pub fn render(recipe: &Recipe) -> Rendered {
    let mut out = Rendered::default();

    for (key, value) in recipe.fields() {
        if STRUCTURAL_KEYS.contains(&key) {
            continue;
        }
        match value {
            Value::String(s) if s.is_empty() => {}
            Value::String(s) => {
                out.text.push_str(&format!("{}=\"{}\"\n", key, quote(s)));
            }
            Value::Number(n) => {
                out.text.push_str(&format!("{}={}\n", key, n));
            }
            other => {
                error!(
                    "Config value {} for key {} is neither a number nor a string",
                    other, key
                );
                out.skipped.push(SkippedField {
                    key: key.to_string(),
                    kind: type_name(other),
                });
            }
        }
    }

    out
}

/// Escape a value for a double-quoted shell string so it is read back
/// literally.
fn quote(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Write the config file for `recipe` to `path`, replacing any prior file.
pub fn write(recipe: &Recipe, path: &Path) -> Result<Rendered> {
    let rendered = render(recipe);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    fs::write(path, &rendered.text)
        .with_context(|| format!("Failed to write pipeline config {}", path.display()))?;
    info!("Wrote pipeline config {}", path.display());
    Ok(rendered)
}
