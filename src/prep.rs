//! Staging root preparation.
//!
//! Every build starts from an empty staging root seeded with the template
//! stage's `EXPORT_IMAGE` and `prerun.sh`, so nothing from a previous run
//! leaks into this one.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::{Config, STAGE_NAME};

/// Files copied from the template stage into the staging root.
pub const TEMPLATE_FILES: &[&str] = &["EXPORT_IMAGE", "prerun.sh"];

/// The pipeline's work directory for this image on `date`.
pub fn image_work_dir(config: &Config, img_name: &str, date: DateTime<Local>) -> PathBuf {
    config
        .work_dir()
        .join(format!("{}-{}", date.format("%Y-%m-%d"), img_name))
        .join(STAGE_NAME)
}

/// Wipe and recreate the staging root.
pub fn prepare_stage(config: &Config, img_name: &str) -> Result<PathBuf> {
    prepare_stage_at(config, img_name, Local::now())
}

pub fn prepare_stage_at(config: &Config, img_name: &str, now: DateTime<Local>) -> Result<PathBuf> {
    info!("Preparing staging root");
    let stage_dir = config.stage_dir();
    let template = config.pipeline_stage(&config.template_stage);

    if !template.is_dir() {
        bail!(
            "Template stage {} not found. Is {} a pipeline checkout?",
            template.display(),
            config.pipeline_dir.display()
        );
    }

    remove_dir_if_present(&stage_dir)?;
    remove_dir_if_present(&image_work_dir(config, img_name, now))?;

    fs::create_dir_all(&stage_dir)
        .with_context(|| format!("Failed to create {}", stage_dir.display()))?;

    for file in TEMPLATE_FILES {
        let src = template.join(file);
        let dst = stage_dir.join(file);
        fs::copy(&src, &dst).with_context(|| {
            format!("Failed to copy {} to {}", src.display(), dst.display())
        })?;
    }

    Ok(stage_dir)
}

fn remove_dir_if_present(path: &Path) -> Result<()> {
    if path.is_dir() {
        info!("Removing {}", path.display());
        fs::remove_dir_all(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    }
    Ok(())
}
