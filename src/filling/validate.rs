//! Filling directory shape checks.
//!
//! The pipeline only picks up entries named `NN-<suffix>` for a fixed set
//! of suffixes, plus a free-form `files` directory. Anything else in a
//! filling would be silently ignored by the pipeline, so it is rejected.

use anyhow::{Context, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Suffixes the pipeline recognizes after the two-digit prefix.
pub const RECOGNIZED_SUFFIXES: &[&str] = &[
    "run.sh",
    "run-chroot.sh",
    "debconf",
    "packages",
    "packages-nr",
    "patches",
];

/// Free-form directory whose content is not checked.
pub const FILES_DIR: &str = "files";

/// Outcome of checking a filling directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    /// Every entry follows the naming convention.
    Valid,
    /// Every typed entry is valid and a `files` entry is present; its
    /// content is arbitrary and was not inspected.
    ValidWithFiles,
    Invalid(String),
}

fn entry_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        let suffixes: Vec<String> = RECOGNIZED_SUFFIXES.iter().map(|s| regex::escape(s)).collect();
        Regex::new(&format!(r"^[0-9]{{2}}-({})$", suffixes.join("|")))
            .expect("static filling entry pattern")
    })
}

/// Whether a single top-level entry name is a recognized pipeline file.
pub fn is_recognized_entry(name: &str) -> bool {
    entry_pattern().is_match(name)
}

/// Check the top-level entries of a filling directory.
///
/// Hidden entries (`.git`, `.gitignore`) belong to the working copy and
/// are skipped.
pub fn validate_dir(dir: &Path) -> Result<Validation> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("Failed to read {}", dir.display()))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(validate_entries(names.iter().map(String::as_str)))
}

/// Classify a list of top-level entry names.
pub fn validate_entries<'a, I>(names: I) -> Validation
where
    I: IntoIterator<Item = &'a str>,
{
    let mut seen = 0usize;
    let mut has_files = false;

    for name in names {
        if name.starts_with('.') {
            continue;
        }
        seen += 1;
        if name == FILES_DIR {
            has_files = true;
            continue;
        }
        if !is_recognized_entry(name) {
            return Validation::Invalid(format!("{} is not in a recognized pipeline format", name));
        }
    }

    if seen == 0 {
        Validation::Invalid("no pipeline files in directory".to_string())
    } else if has_files {
        Validation::ValidWithFiles
    } else {
        Validation::Valid
    }
}
