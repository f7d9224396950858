//! Staging cleanup.
//!
//! Releases the bind mounts the pipeline leaves under its work tree,
//! removes this image's staged work directories and the staging and deploy
//! directories, and puts the recipe's stage markers back to baseline.
//! Every step is best effort: failures are logged and cleaning continues.

use glob::Pattern;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::config::{Config, STAGE_NAME};
use crate::markers::StageMarkers;
use crate::process::Cmd;
use crate::recipe::Recipe;

/// Mount table fragments that identify pipeline-internal mounts.
pub const MOUNT_MARKERS: &[&str] = &["devpts", "sysfs", "udev", "proc", "mnt"];

/// What a clean run did.
#[derive(Debug, Default)]
pub struct CleanReport {
    pub unmounted: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
    /// Paths that could not be unmounted or removed.
    pub failed: Vec<PathBuf>,
}

impl CleanReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Decode the octal escapes the kernel uses for whitespace and
/// backslashes in mount table fields.
fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            let octal = field
                .get(i + 1..i + 4)
                .and_then(|digits| u8::from_str_radix(digits, 8).ok());
            if let Some(b) = octal {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Mount points under `work_dir` that carry a pipeline mount marker,
/// deepest first.
pub fn mounts_under(table: &str, work_dir: &Path) -> Vec<PathBuf> {
    let mut targets: Vec<PathBuf> = table
        .lines()
        .filter(|line| MOUNT_MARKERS.iter().any(|m| line.contains(m)))
        .filter_map(|line| line.split_whitespace().nth(1))
        .map(|field| PathBuf::from(unescape_mount_field(field)))
        .filter(|target| target.starts_with(work_dir))
        .collect();

    targets.sort_by(|a, b| {
        b.components()
            .count()
            .cmp(&a.components().count())
            .then_with(|| a.cmp(b))
    });
    targets.dedup();
    targets
}

fn unmount(target: &Path, report: &mut CleanReport) {
    info!("Unmounting {}", target.display());
    match Cmd::new("umount").arg_path(target).allow_fail().run() {
        Ok(result) if result.success() => report.unmounted.push(target.to_path_buf()),
        Ok(result) => {
            warn!(
                "umount {} exited with {}: {}",
                target.display(),
                result.code(),
                result.stderr_trimmed()
            );
            report.failed.push(target.to_path_buf());
        }
        Err(e) => {
            warn!("Could not run umount for {}: {:#}", target.display(), e);
            report.failed.push(target.to_path_buf());
        }
    }
}

/// Remove `path` recursively without descending into other filesystems.
///
/// A mount point left under `path` stops the removal with an error
/// instead of having its content deleted.
fn remove_within_filesystem(path: &Path) -> io::Result<()> {
    if !fs::symlink_metadata(path)?.is_dir() {
        return fs::remove_file(path);
    }
    for entry in WalkDir::new(path).contents_first(true).same_file_system(true) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            fs::remove_dir(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

fn remove_tree(path: &Path, report: &mut CleanReport) {
    if !path.exists() {
        return;
    }
    info!("Cleaning {}", path.display());
    match remove_within_filesystem(path) {
        Ok(()) => report.removed.push(path.to_path_buf()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            error!(
                "Permission denied while cleaning {}. A pipeline mount is probably still busy; try again after a reboot",
                path.display()
            );
            report.failed.push(path.to_path_buf());
        }
        Err(e) => {
            error!("Failed to clean {}: {}", path.display(), e);
            report.failed.push(path.to_path_buf());
        }
    }
}

/// Staged work directories for `img_name` under `work_dir`.
pub fn stale_work_dirs(work_dir: &Path, img_name: &str) -> Vec<PathBuf> {
    let pattern = format!(
        "{}/*{}*/{}",
        Pattern::escape(&work_dir.to_string_lossy()),
        Pattern::escape(img_name),
        STAGE_NAME
    );
    match glob::glob(&pattern) {
        Ok(paths) => paths
            .filter_map(|entry| match entry {
                Ok(path) => Some(path),
                Err(e) => {
                    warn!("Skipping unreadable path while cleaning: {}", e);
                    None
                }
            })
            .filter(|path| path.is_dir())
            .collect(),
        Err(e) => {
            warn!("Bad clean pattern {}: {}", pattern, e);
            Vec::new()
        }
    }
}

/// Clean up after `recipe`, reading mounts from the configured table.
pub fn clean(config: &Config, recipe: &Recipe) -> CleanReport {
    let table = match fs::read_to_string(&config.mount_table) {
        Ok(table) => table,
        Err(e) => {
            warn!("Cannot read {}: {}", config.mount_table.display(), e);
            String::new()
        }
    };
    clean_with_table(config, recipe, &table)
}

/// Clean up after `recipe` given the mount table text.
pub fn clean_with_table(config: &Config, recipe: &Recipe, mount_table: &str) -> CleanReport {
    info!("Cleaning bakeshop stage from the pipeline");
    let mut report = CleanReport::default();

    let work = config.work_dir();
    let work = std::path::absolute(&work).unwrap_or(work);

    for target in mounts_under(mount_table, &work) {
        unmount(&target, &mut report);
    }

    if work.is_dir() {
        for dir in stale_work_dirs(&work, &recipe.img_name) {
            let busy = report.failed.iter().any(|target| target.starts_with(&dir));
            if busy {
                error!(
                    "Not cleaning {}: a mount below it is still active. Try again after a reboot",
                    dir.display()
                );
                report.failed.push(dir);
                continue;
            }
            remove_tree(&dir, &mut report);
        }
    }

    remove_tree(&config.stage_dir(), &mut report);
    remove_tree(&config.deploy_dir(), &mut report);

    let _baseline = StageMarkers::new(config, recipe).reset();

    if report.is_clean() {
        info!("Clean complete");
    } else {
        warn!("Clean finished with {} failure(s)", report.failed.len());
    }
    report
}
