//! Build command - bakes a recipe into a packaged image.

use anyhow::Result;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::bake;
use crate::config::Config;
use crate::filling::Resolver;
use crate::git::RepoSync;
use crate::markers::StageMarkers;
use crate::package;
use crate::pipeline_config;
use crate::preflight;
use crate::prep;
use crate::recipe::Recipe;
use crate::timing::Timer;

#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    /// Stop once the pipeline config file is written.
    pub config_only: bool,
}

/// Execute the build command.
///
/// Returns the archive path, or `None` when stopping after the config.
pub fn cmd_build(
    config: &Config,
    recipe: &Recipe,
    repo: &dyn RepoSync,
    options: BuildOptions,
) -> Result<Option<PathBuf>> {
    info!("=== Baking {} ===", recipe.img_name);
    let build_timer = Timer::start("Total");

    // Reset first: a previous run may have hidden the template's markers.
    let baseline = StageMarkers::new(config, recipe).reset();
    preflight::run_preflight_or_fail(config, recipe)?;

    let t = Timer::start("Prep");
    prep::prepare_stage(config, &recipe.img_name)?;
    let staged = Resolver::new(config, repo).resolve_all(&recipe.fillings, &baseline)?;
    baseline.apply();
    info!("Staged {} filling(s)", staged.len());
    for filling in &staged {
        debug!("  {} -> {}", filling.name, filling.path.display());
    }
    t.finish();

    let rendered = pipeline_config::write(recipe, &config.config_file)?;
    if !rendered.skipped.is_empty() {
        let keys: Vec<_> = rendered.skipped.iter().map(|f| f.key.as_str()).collect();
        warn!(
            "{} recipe field(s) left out of the pipeline config: {}",
            keys.len(),
            keys.join(", ")
        );
    }

    if options.config_only {
        info!(
            "Config written to {}; skipping build",
            config.config_file.display()
        );
        build_timer.finish();
        return Ok(None);
    }

    let t = Timer::start("Bake");
    bake::bake(config)?;
    t.finish();

    let t = Timer::start("Package");
    let archive = package::package(config, recipe)?;
    t.finish();

    build_timer.finish();
    Ok(Some(archive))
}
