//! Pipeline build invocation.
//!
//! Runs the pipeline's entry point against the synthesized config file
//! and streams its output into the log line by line. The run blocks until
//! the pipeline exits; there is no timeout.

use anyhow::{Context, Result};
use std::fs;
use tracing::info;

use crate::config::Config;
use crate::process::Cmd;

/// Build the command that runs the pipeline for `config`.
pub fn build_command(config: &Config) -> Result<Cmd> {
    let config_file = std::path::absolute(&config.config_file).with_context(|| {
        format!("Cannot resolve config file {}", config.config_file.display())
    })?;
    let script = std::path::absolute(config.pipeline_dir.join(&config.build_script))
        .context("Cannot resolve pipeline build script")?;

    let cmd = if config.build_sudo {
        Cmd::new("sudo").arg_path(&script)
    } else {
        Cmd::new(script.to_string_lossy())
    };

    Ok(cmd
        .arg("-c")
        .arg_path(&config_file)
        .dir(&config.pipeline_dir)
        .error_msg("Pipeline build failed"))
}

/// Run the pipeline build. Fails if the pipeline exits nonzero.
pub fn bake(config: &Config) -> Result<()> {
    info!("Baking your recipe");

    let deploy = config.deploy_dir();
    fs::create_dir_all(&deploy)
        .with_context(|| format!("Failed to create {}", deploy.display()))?;

    let cmd = build_command(config)?;
    info!("Running {}", cmd.display());
    cmd.run_streaming(|line| {
        info!(target: "bakeshop::bake", "{}", line);
    })?;

    info!("Pipeline build finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::TempDir;

    fn fake_pipeline(script: &str) -> (TempDir, Config) {
        let temp = TempDir::new().unwrap();
        let mut config = Config::rooted_at(temp.path());
        config.build_sudo = false;
        fs::create_dir_all(&config.pipeline_dir).unwrap();
        let path = config.pipeline_dir.join(&config.build_script);
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        fs::write(&config.config_file, "IMG_NAME=\"kiosk\"\n").unwrap();
        (temp, config)
    }

    #[test]
    fn test_bake_runs_in_pipeline_with_config() {
        let (_temp, config) = fake_pipeline(
            "#!/bin/sh\n[ \"$1\" = \"-c\" ] || exit 2\n. \"$2\"\necho \"$IMG_NAME\" > deploy/image.img\n",
        );
        bake(&config).unwrap();
        assert_eq!(
            fs::read_to_string(config.deploy_dir().join("image.img")).unwrap(),
            "kiosk\n"
        );
    }

    #[test]
    fn test_bake_failure_is_reported() {
        let (_temp, config) = fake_pipeline("#!/bin/sh\necho 'stage2 failed' >&2\nexit 1\n");
        let err = bake(&config).unwrap_err();
        assert!(err.to_string().contains("Pipeline build failed"));
        assert!(config.deploy_dir().is_dir());
    }

    #[test]
    fn test_command_line() {
        let mut config = Config::rooted_at(Path::new("/b"));
        assert_eq!(
            build_command(&config).unwrap().display(),
            "sudo /b/pi-gen/build.sh -c /b/pi-gen-config"
        );

        config.build_sudo = false;
        assert_eq!(
            build_command(&config).unwrap().display(),
            "/b/pi-gen/build.sh -c /b/pi-gen-config"
        );
    }
}
