//! Preflight checks.
//!
//! Verifies the host tools and pipeline checkout a build needs before
//! anything on disk is touched.

mod types;

use anyhow::{bail, Result};
use std::os::unix::fs::PermissionsExt;
use tracing::info;

use crate::config::Config;
use crate::process;
use crate::recipe::Recipe;

pub use types::{CheckResult, CheckStatus, PreflightReport};

/// Whether the process runs with an effective UID of 0.
pub fn is_root() -> bool {
    nix::unistd::geteuid().is_root()
}

fn check_tool(tool: &str, purpose: &str, needed: bool) -> CheckResult {
    if !needed {
        return CheckResult::skip(tool, purpose);
    }
    match process::which(tool) {
        Some(path) => CheckResult::pass_with(tool, &path.display().to_string()),
        None => CheckResult::fail(tool, &format!("Not found in PATH. {}", purpose)),
    }
}

/// Host tools the recipe needs.
pub fn check_host_tools(config: &Config, recipe: &Recipe) -> Vec<CheckResult> {
    vec![
        check_tool(
            "git",
            "Required to sync fillings with a git_url",
            recipe.uses_git(),
        ),
        check_tool(
            "sudo",
            "Required to run the pipeline build with BAKESHOP_BUILD_SUDO on",
            config.build_sudo,
        ),
        match process::which("umount") {
            Some(path) => CheckResult::pass_with("umount", &path.display().to_string()),
            None => CheckResult::warn("umount", "Not found in PATH. `clean` cannot release mounts"),
        },
    ]
}

/// Files the pipeline checkout must provide.
pub fn check_pipeline(config: &Config) -> Vec<CheckResult> {
    let mut results = Vec::new();

    let script = config.pipeline_dir.join(&config.build_script);
    let name = format!("pipeline {}", config.build_script);
    results.push(match script.metadata() {
        Ok(meta) if meta.is_file() && meta.permissions().mode() & 0o111 != 0 => {
            CheckResult::pass_with(&name, &script.display().to_string())
        }
        Ok(_) => CheckResult::fail(&name, &format!("{} is not executable", script.display())),
        Err(_) => CheckResult::fail(
            &name,
            &format!("{} not found. Is the pipeline checked out?", script.display()),
        ),
    });

    let template = config.pipeline_stage(&config.template_stage);
    for file in crate::prep::TEMPLATE_FILES {
        let path = template.join(file);
        let name = format!("{}/{}", config.template_stage, file);
        if path.is_file() {
            results.push(CheckResult::pass(&name));
        } else {
            results.push(CheckResult::fail(
                &name,
                &format!("{} not found", path.display()),
            ));
        }
    }

    results
}

/// Run all preflight checks.
pub fn run_preflight(config: &Config, recipe: &Recipe) -> PreflightReport {
    info!("Running preflight checks");
    let mut checks = check_host_tools(config, recipe);
    checks.extend(check_pipeline(config));
    PreflightReport { checks }
}

/// Run preflight and bail if any checks fail.
pub fn run_preflight_or_fail(config: &Config, recipe: &Recipe) -> Result<()> {
    let report = run_preflight(config, recipe);
    report.log();

    if !report.all_passed() {
        bail!(
            "Preflight failed: {} check(s) failed ({})",
            report.fail_count(),
            report.failures().join(", ")
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn recipe(json: &str) -> Recipe {
        Recipe::from_json(json).unwrap()
    }

    #[test]
    fn test_is_root_matches_id() {
        let out = process::Cmd::new("id").arg("-u").run().unwrap();
        assert_eq!(is_root(), out.stdout_trimmed() == "0");
    }

    #[test]
    fn test_git_only_checked_when_used() {
        let temp = TempDir::new().unwrap();
        let mut config = Config::rooted_at(temp.path());
        config.build_sudo = false;

        let local = recipe(r#"{"IMG_NAME":"x","fillings":[{"name":"a","run_priority":1}]}"#);
        let checks = check_host_tools(&config, &local);
        assert_eq!(checks[0].status, CheckStatus::Skip);
        assert_eq!(checks[1].status, CheckStatus::Skip);
    }

    #[test]
    fn test_missing_pipeline_fails() {
        let temp = TempDir::new().unwrap();
        let config = Config::rooted_at(temp.path());
        let report = PreflightReport {
            checks: check_pipeline(&config),
        };
        assert_eq!(report.fail_count(), 3);
    }

    #[test]
    fn test_complete_pipeline_passes() {
        let temp = TempDir::new().unwrap();
        let config = Config::rooted_at(temp.path());
        let template = config.pipeline_stage("stage4");
        fs::create_dir_all(&template).unwrap();
        fs::write(template.join("EXPORT_IMAGE"), "").unwrap();
        fs::write(template.join("prerun.sh"), "").unwrap();
        let script = config.pipeline_dir.join("build.sh");
        fs::write(&script, "#!/bin/sh\n").unwrap();

        let report = PreflightReport {
            checks: check_pipeline(&config),
        };
        assert_eq!(report.failures(), vec!["pipeline build.sh"]);

        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let report = PreflightReport {
            checks: check_pipeline(&config),
        };
        assert!(report.all_passed());
    }
}
