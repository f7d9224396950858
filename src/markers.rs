//! Stage marker files.
//!
//! The pipeline reads marker files in its stage directories: `SKIP` skips
//! a stage, `SKIP_IMAGE` suppresses its image, and `EXPORT_IMAGE` /
//! `EXPORT_NOOBS` request exports. Only the presence and exact name of a
//! marker matter. A hidden marker is the same file renamed with a
//! leading dot.
//!
//! Markers are toggled in two phases. [`StageMarkers::reset`] returns the
//! pipeline to baseline (undoing whatever a previous run applied) and
//! yields a [`MarkersReset`] token. Staging takes that token, and only the
//! token can [`MarkersReset::apply`] this run's markers.
//!
//! Marker failures are logged and never abort the run: a recipe may name
//! stages the pipeline checkout does not have.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::Config;
use crate::recipe::Recipe;

pub const SKIP: &str = "SKIP";
pub const SKIP_IMAGE: &str = "SKIP_IMAGE";
pub const EXPORT_IMAGE: &str = "EXPORT_IMAGE";
pub const EXPORT_NOOBS: &str = "EXPORT_NOOBS";

fn marker_path(pipeline: &Path, stage: &str, file_name: &str) -> PathBuf {
    pipeline.join(stage).join(file_name)
}

fn hidden_path(pipeline: &Path, stage: &str, file_name: &str) -> PathBuf {
    pipeline.join(stage).join(format!(".{}", file_name))
}

fn report(action: &str, path: &Path, err: io::Error) {
    warn!("Could not {} {}: {}", action, path.display(), err);
}

/// Touch `file_name` in each stage. An existing marker is left as is.
pub fn create(pipeline: &Path, stages: &[String], file_name: &str) {
    for stage in stages {
        let path = marker_path(pipeline, stage, file_name);
        let result = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path);
        match result {
            Ok(_) => debug!("Created {}", path.display()),
            Err(e) => report("create", &path, e),
        }
    }
}

/// Delete `file_name` from each stage. A missing marker is fine.
pub fn remove(pipeline: &Path, stages: &[String], file_name: &str) {
    for stage in stages {
        let path = marker_path(pipeline, stage, file_name);
        match fs::remove_file(&path) {
            Ok(()) => debug!("Removed {}", path.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => report("remove", &path, e),
        }
    }
}

/// Rename `file_name` to `.file_name` in each stage, if present.
pub fn hide(pipeline: &Path, stages: &[String], file_name: &str) {
    for stage in stages {
        let visible = marker_path(pipeline, stage, file_name);
        let hidden = hidden_path(pipeline, stage, file_name);
        rename_if_present(&visible, &hidden, "hide");
    }
}

/// Rename `.file_name` back to `file_name` in each stage, if present.
pub fn unhide(pipeline: &Path, stages: &[String], file_name: &str) {
    for stage in stages {
        let visible = marker_path(pipeline, stage, file_name);
        let hidden = hidden_path(pipeline, stage, file_name);
        rename_if_present(&hidden, &visible, "unhide");
    }
}

fn rename_if_present(from: &Path, to: &Path, action: &str) {
    match fs::rename(from, to) {
        Ok(()) => debug!("Renamed {} to {}", from.display(), to.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => report(action, from, e),
    }
}

/// The recipe's skip lists, bound to a pipeline checkout.
pub struct StageMarkers<'a> {
    pipeline: PathBuf,
    recipe: &'a Recipe,
}

impl<'a> StageMarkers<'a> {
    pub fn new(config: &Config, recipe: &'a Recipe) -> Self {
        Self {
            pipeline: config.pipeline_dir.clone(),
            recipe,
        }
    }

    /// Clear markers a previous run of this recipe applied.
    pub fn reset(self) -> MarkersReset<'a> {
        let r = self.recipe;
        remove(&self.pipeline, &r.skip_stage, SKIP);
        remove(&self.pipeline, &r.skip_image, SKIP_IMAGE);
        unhide(&self.pipeline, &r.skip_image, EXPORT_IMAGE);
        unhide(&self.pipeline, &r.skip_noobs, EXPORT_NOOBS);
        MarkersReset { markers: self }
    }
}

/// Proof that markers are at baseline. Consumed by [`MarkersReset::apply`].
pub struct MarkersReset<'a> {
    markers: StageMarkers<'a>,
}

impl MarkersReset<'_> {
    /// Apply this recipe's skip lists.
    pub fn apply(self) {
        let pipeline = &self.markers.pipeline;
        let r = self.markers.recipe;
        create(pipeline, &r.skip_stage, SKIP);
        create(pipeline, &r.skip_image, SKIP_IMAGE);
        hide(pipeline, &r.skip_image, EXPORT_IMAGE);
        hide(pipeline, &r.skip_noobs, EXPORT_NOOBS);
    }
}
