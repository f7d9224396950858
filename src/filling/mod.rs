//! Filling resolution.
//!
//! For each filling in recipe order: optionally sync it from its
//! repository, check its directory shape, and copy it into the staging
//! root as `{NN}-{name}`.
//!
//! Repository sync is best-effort. If it fails, whatever is already on disk
//! under the fillings directory is used, so a build can still run offline.
//! Everything else (bad URL scheme, missing directory, bad layout, bad
//! priority, name collision) aborts the run.

pub mod stage;
pub mod validate;

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::ConfigError;
use crate::git::{self, RepoSync, SyncRequest};
use crate::markers::MarkersReset;
use crate::recipe::FillingSpec;
use validate::Validation;

/// A filling copied into the staging root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFilling {
    pub name: String,
    /// Directory name under the staging root, e.g. `03-wifi`.
    pub staged_name: String,
    pub path: PathBuf,
}

/// Stages a recipe's fillings into the pipeline.
pub struct Resolver<'a> {
    config: &'a Config,
    repo: &'a dyn RepoSync,
}

impl<'a> Resolver<'a> {
    pub fn new(config: &'a Config, repo: &'a dyn RepoSync) -> Self {
        Self { config, repo }
    }

    /// Stage every filling, in declared order.
    ///
    /// Takes the reset-marker token so staging can only happen between
    /// marker reset and marker apply.
    pub fn resolve_all(
        &self,
        fillings: &[FillingSpec],
        _markers: &MarkersReset,
    ) -> Result<Vec<StagedFilling>> {
        info!("Preheating");
        let stage_dir = self.config.stage_dir();
        let mut staged: Vec<StagedFilling> = Vec::with_capacity(fillings.len());
        let mut by_name: BTreeMap<String, String> = BTreeMap::new();
        let mut by_prefix: BTreeMap<String, String> = BTreeMap::new();

        for filling in fillings {
            let prefix = stage::priority_prefix(&filling.run_priority).ok_or_else(|| {
                ConfigError::InvalidPriority {
                    filling: filling.name.clone(),
                    priority: filling.run_priority.to_string(),
                }
            })?;
            let staged_name = stage::staged_name(&prefix, &filling.name);

            if let Some(first) = by_name.get(&staged_name) {
                return Err(ConfigError::StagedNameCollision {
                    first: first.clone(),
                    second: filling.name.clone(),
                    staged: staged_name,
                }
                .into());
            }
            if let Some(other) = by_prefix.get(&prefix) {
                warn!(
                    "{}: shares run priority {} with {}; the pipeline orders them by name",
                    filling.name, prefix, other
                );
            }

            let source = self.prepare(filling)?;
            let target = stage_dir.join(&staged_name);
            stage::copy_tree(&source, &target)?;
            info!("{}: Copied filling to pipeline stage as {}", filling.name, staged_name);

            by_name.insert(staged_name.clone(), filling.name.clone());
            by_prefix.insert(prefix, filling.name.clone());
            staged.push(StagedFilling {
                name: filling.name.clone(),
                staged_name,
                path: target,
            });
        }

        Ok(staged)
    }

    /// Sync (if remote) and validate one filling, returning its local
    /// directory.
    fn prepare(&self, filling: &FillingSpec) -> Result<PathBuf> {
        let path = self.config.filling_path(&filling.name);

        if let Some(url) = &filling.git_url {
            self.sync(filling, url, &path)?;
        }

        info!("{}: Checking filling directory", filling.name);
        if !path.is_dir() {
            return Err(ConfigError::MissingFilling {
                filling: filling.name.clone(),
                path,
            }
            .into());
        }

        match validate::validate_dir(&path)? {
            Validation::Valid => info!("{}: Filling dir validated", filling.name),
            Validation::ValidWithFiles => info!(
                "{}: Filling dir validated (files/ copied without inspection)",
                filling.name
            ),
            Validation::Invalid(reason) => {
                return Err(ConfigError::InvalidLayout {
                    filling: filling.name.clone(),
                    reason,
                }
                .into())
            }
        }
        Ok(path)
    }

    fn sync(&self, filling: &FillingSpec, url: &str, path: &Path) -> Result<()> {
        if !git::is_supported_url(url) {
            return Err(ConfigError::UnsupportedScheme {
                filling: filling.name.clone(),
                url: url.to_string(),
            }
            .into());
        }

        let key = match filling.ssh_key.as_deref().map(git::resolve_key_path) {
            Some(Ok(key)) => Some(key),
            Some(Err(e)) => {
                warn!("{}: {:#}; syncing without a key", filling.name, e);
                None
            }
            None => None,
        };

        info!("{}: Syncing {} (if this hangs, check connectivity)", filling.name, url);
        let request = SyncRequest {
            url,
            dest: path,
            tag: filling.git_tag.as_deref(),
            ssh_key: key.as_deref(),
        };
        if let Err(e) = self.repo.sync(&request) {
            warn!("{}: Failed to sync repository: {:#}", filling.name, e);
            warn!(
                "{}: Using local copy of filling; it might not be the latest version",
                filling.name
            );
        }
        Ok(())
    }
}
