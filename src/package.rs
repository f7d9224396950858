//! Deploy output packaging.
//!
//! Zips the pipeline's deploy directory into
//! `{output_dir}/{img}-deploy-{timestamp}/{img}-deploy-{timestamp}.zip`
//! and removes the deploy directory afterwards.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::Config;
use crate::recipe::Recipe;

/// Files at least this large get zip64 headers. Kept well below 4 GiB so
/// deflate overhead on incompressible data cannot overflow 32-bit sizes.
pub const ZIP64_THRESHOLD: u64 = 1 << 31;

/// Artifact folder (and archive stem) for an image built at `now`.
pub fn folder_name(img_name: &str, now: DateTime<Local>) -> String {
    format!("{}-deploy-{}", img_name, now.format("%Y%m%d-%H%M%S"))
}

/// Package the deploy directory. Returns the archive path.
pub fn package(config: &Config, recipe: &Recipe) -> Result<PathBuf> {
    package_at(config, recipe, Local::now())
}

pub fn package_at(config: &Config, recipe: &Recipe, now: DateTime<Local>) -> Result<PathBuf> {
    let deploy = config.deploy_dir();
    if !deploy.is_dir() {
        bail!("Nothing to package: {} does not exist", deploy.display());
    }

    let folder = folder_name(&recipe.img_name, now);
    fs::create_dir_all(&recipe.output_dir)
        .with_context(|| format!("Failed to create {}", recipe.output_dir.display()))?;

    let run_dir = recipe.output_dir.join(&folder);
    fs::create_dir(&run_dir).with_context(|| {
        format!(
            "Artifact directory {} already exists or cannot be created",
            run_dir.display()
        )
    })?;

    let archive = run_dir.join(format!("{}.zip", folder));
    info!("Packaging {} into {}", deploy.display(), archive.display());
    if let Err(e) = zip_dir(&deploy, &archive) {
        if let Err(rm) = fs::remove_dir_all(&run_dir) {
            warn!("Could not remove partial {}: {}", run_dir.display(), rm);
        }
        return Err(e);
    }

    fs::remove_dir_all(&deploy)
        .with_context(|| format!("Failed to remove {}", deploy.display()))?;

    info!("Image location: {}", run_dir.display());
    Ok(archive)
}

/// Write every entry under `src` into a new zip at `dest`.
///
/// Entries are added in file-name order with a fixed modification time.
pub fn zip_dir(src: &Path, dest: &Path) -> Result<()> {
    let file =
        File::create(dest).with_context(|| format!("Failed to create {}", dest.display()))?;
    let mut zip = ZipWriter::new(file);
    let base = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    for entry in WalkDir::new(src).min_depth(1).sort_by_file_name() {
        let entry = entry.with_context(|| format!("Failed to walk {}", src.display()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .context("Walked outside the deploy directory")?;
        let name = entry_name(rel);
        let meta = entry
            .path()
            .symlink_metadata()
            .with_context(|| format!("Failed to stat {}", entry.path().display()))?;
        let options = base.unix_permissions(meta.permissions().mode() & 0o7777);

        if meta.file_type().is_symlink() {
            let target = fs::read_link(entry.path())
                .with_context(|| format!("Failed to read link {}", entry.path().display()))?;
            zip.add_symlink(name, target.to_string_lossy().into_owned(), options)?;
        } else if meta.is_dir() {
            zip.add_directory(format!("{}/", name), options)?;
        } else {
            debug!("Adding {}", name);
            let options = options.large_file(meta.len() >= ZIP64_THRESHOLD);
            zip.start_file(name, options)?;
            let mut input = File::open(entry.path())
                .with_context(|| format!("Failed to open {}", entry.path().display()))?;
            io::copy(&mut input, &mut zip)
                .with_context(|| format!("Failed to archive {}", entry.path().display()))?;
        }
    }

    zip.finish()
        .with_context(|| format!("Failed to finish {}", dest.display()))?;
    Ok(())
}

fn entry_name(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Config, Recipe) {
        let temp = TempDir::new().unwrap();
        let config = Config::rooted_at(temp.path());
        let deploy = config.deploy_dir();
        fs::create_dir_all(deploy.join("logs")).unwrap();
        fs::write(deploy.join("kiosk.img"), b"image bytes").unwrap();
        fs::write(deploy.join("logs/build.log"), "done\n").unwrap();

        let out = temp.path().join("artifacts");
        let json = format!(
            r#"{{"IMG_NAME":"kiosk","output_dir":"{}","fillings":[]}}"#,
            out.display()
        );
        let recipe = Recipe::from_json(&json).unwrap();
        (temp, config, recipe)
    }

    fn tree(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
        WalkDir::new(root)
            .min_depth(1)
            .into_iter()
            .map(|e| {
                let e = e.unwrap();
                let name = entry_name(e.path().strip_prefix(root).unwrap());
                let content = e.file_type().is_file().then(|| fs::read(e.path()).unwrap());
                (name, content)
            })
            .collect()
    }

    fn now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    #[test]
    fn test_folder_name() {
        assert_eq!(folder_name("kiosk", now()), "kiosk-deploy-20240309-140507");
    }

    #[test]
    fn test_package_round_trip() {
        let (temp, config, recipe) = setup();
        let expected = tree(&config.deploy_dir());

        let archive = package_at(&config, &recipe, now()).unwrap();
        assert_eq!(
            archive,
            recipe
                .output_dir
                .join("kiosk-deploy-20240309-140507/kiosk-deploy-20240309-140507.zip")
        );
        assert!(!config.deploy_dir().exists());

        let extracted = temp.path().join("extracted");
        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        zip.extract(&extracted).unwrap();
        assert_eq!(tree(&extracted), expected);
    }

    #[test]
    fn test_same_tree_same_bytes() {
        let (temp, config, _recipe) = setup();
        let a = temp.path().join("a.zip");
        let b = temp.path().join("b.zip");
        zip_dir(&config.deploy_dir(), &a).unwrap();
        zip_dir(&config.deploy_dir(), &b).unwrap();
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }

    #[test]
    fn test_existing_run_dir_is_fatal() {
        let (_temp, config, recipe) = setup();
        fs::create_dir_all(recipe.output_dir.join("kiosk-deploy-20240309-140507")).unwrap();

        assert!(package_at(&config, &recipe, now()).is_err());
        assert!(config.deploy_dir().join("kiosk.img").exists());
    }

    #[test]
    fn test_failed_archive_removes_run_dir() {
        let (_temp, config, recipe) = setup();
        // Sockets cannot be opened for reading, so archiving fails midway.
        let _listener =
            std::os::unix::net::UnixListener::bind(config.deploy_dir().join("ctl.sock")).unwrap();

        assert!(package_at(&config, &recipe, now()).is_err());
        assert!(!recipe.output_dir.join("kiosk-deploy-20240309-140507").exists());
        assert!(config.deploy_dir().join("kiosk.img").exists());
    }

    // Writes a sparse image past 4 GiB and deflates it; slow in debug builds.
    #[test]
    #[ignore]
    fn test_package_image_over_4gib() {
        let (_temp, config, recipe) = setup();
        let big = File::create(config.deploy_dir().join("big.img")).unwrap();
        big.set_len((4 << 30) + 4096).unwrap();
        drop(big);

        let archive = package_at(&config, &recipe, now()).unwrap();
        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        assert_eq!(zip.by_name("big.img").unwrap().size(), (4 << 30) + 4096);
    }

    #[test]
    fn test_missing_deploy_fails() {
        let temp = TempDir::new().unwrap();
        let config = Config::rooted_at(temp.path());
        let recipe = Recipe::from_json(r#"{"IMG_NAME":"kiosk","fillings":[]}"#).unwrap();
        assert!(package(&config, &recipe).is_err());
    }
}
