//! Shared test utilities for bakeshop tests.

#![allow(dead_code)]

use anyhow::{bail, Result};
use bakeshop::config::Config;
use bakeshop::git::{RepoSync, SyncRequest};
use bakeshop::recipe::Recipe;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Pipeline entry point that records what was staged and writes an image.
pub const FAKE_BUILD: &str = r#"#!/bin/sh
set -e
[ "$1" = "-c" ] || exit 2
. "$2"
ls stage-bakeshop > deploy/staged.txt
echo "$IMG_NAME" > "deploy/$IMG_NAME.img"
echo "build finished"
"#;

/// Pipeline entry point that fails after producing partial output.
pub const FAILING_BUILD: &str = "#!/bin/sh\necho partial > deploy/partial.img\necho 'stage2 failed' >&2\nexit 1\n";

/// A temporary project: pipeline checkout, fillings and output root.
pub struct TestEnv {
    /// Temporary directory (kept alive for lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub base_dir: PathBuf,
    pub config: Config,
}

impl TestEnv {
    /// Project with a fake pipeline whose build succeeds.
    pub fn new() -> Self {
        Self::with_build(FAKE_BUILD)
    }

    pub fn with_build(script: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let base_dir = temp_dir.path().to_path_buf();
        let mut config = Config::rooted_at(&base_dir);
        config.build_sudo = false;

        for stage in ["stage0", "stage1", "stage2", "stage3", "stage4", "stage5"] {
            fs::create_dir_all(config.pipeline_stage(stage)).expect("Failed to create stage");
        }
        let template = config.pipeline_stage("stage4");
        fs::write(template.join("EXPORT_IMAGE"), "IMG_SUFFIX=\"-full\"\n").unwrap();
        fs::write(template.join("prerun.sh"), "#!/bin/bash -e\n").unwrap();
        fs::write(config.pipeline_stage("stage2").join("EXPORT_NOOBS"), "").unwrap();
        write_executable(&config.pipeline_dir.join("build.sh"), script);

        Self {
            _temp_dir: temp_dir,
            base_dir,
            config,
        }
    }

    /// Create a local filling with the given top-level entries. Entries
    /// ending in `/` are directories.
    pub fn filling(&self, name: &str, entries: &[&str]) -> PathBuf {
        let dir = self.config.filling_path(name);
        fs::create_dir_all(&dir).expect("Failed to create filling");
        for entry in entries {
            if let Some(sub) = entry.strip_suffix('/') {
                fs::create_dir_all(dir.join(sub)).unwrap();
            } else {
                fs::write(dir.join(entry), format!("# {}\n", entry)).unwrap();
            }
        }
        dir
    }

    /// Write a recipe file under the project and return its path.
    pub fn recipe_file(&self, json: &str) -> PathBuf {
        let path = self.base_dir.join("recipe.json");
        fs::write(&path, json).unwrap();
        path
    }

    /// Output root recipes in these tests package into.
    pub fn artifacts(&self) -> PathBuf {
        self.base_dir.join("artifacts")
    }

    /// Recipe JSON for `img` with the given fillings array, packaging into
    /// `artifacts()`.
    pub fn recipe(&self, img: &str, fillings: &str) -> Recipe {
        let json = format!(
            r#"{{"IMG_NAME":"{}","output_dir":"{}","ENABLE_SSH":1,"fillings":{}}}"#,
            img,
            self.artifacts().display(),
            fillings
        );
        Recipe::from_json(&json).expect("Invalid test recipe")
    }
}

pub fn write_executable(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// Repository sync that always fails, as when offline.
pub struct Offline;

impl RepoSync for Offline {
    fn sync(&self, request: &SyncRequest<'_>) -> Result<()> {
        bail!("network unreachable: {}", request.url)
    }
}

/// Sorted names of the entries directly under `dir`.
pub fn listing(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap_or_else(|e| panic!("Failed to read {}: {}", dir.display(), e))
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

/// Assert that a file contains expected content.
pub fn assert_file_contains(path: &Path, expected: &str) {
    let content = fs::read_to_string(path)
        .unwrap_or_else(|_| panic!("Failed to read file: {}", path.display()));
    assert!(
        content.contains(expected),
        "File {} does not contain expected content.\nExpected to find: {}\nActual content: {}",
        path.display(),
        expected,
        content
    );
}

/// Assert that a file exists.
pub fn assert_file_exists(path: &Path) {
    assert!(path.exists(), "Expected file to exist: {}", path.display());
}

/// Assert that a path does not exist.
pub fn assert_missing(path: &Path) {
    assert!(!path.exists(), "Expected {} to be absent", path.display());
}
