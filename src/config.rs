//! Configuration management for bakeshop.
//!
//! Reads configuration from .env file and environment variables.
//! Environment variables take precedence over .env file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::info;

/// Name of the staging stage bakeshop adds to the pipeline.
pub const STAGE_NAME: &str = "stage-bakeshop";

/// Bakeshop configuration.
///
/// Every path a component touches is derived from here, so tests can root
/// the whole layout inside a temporary directory.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pipeline checkout (default: pi-gen)
    pub pipeline_dir: PathBuf,
    /// Local working copies of fillings (default: fillings)
    pub fillings_dir: PathBuf,
    /// Cache for recipes fetched over HTTP (default: recipes)
    pub recipes_dir: PathBuf,
    /// Synthesized pipeline config (default: pi-gen-config)
    pub config_file: PathBuf,
    /// Stage whose EXPORT_IMAGE and prerun.sh seed the staging root
    pub template_stage: String,
    /// Pipeline entry point, relative to the pipeline checkout
    pub build_script: String,
    /// Run the entry point through sudo
    pub build_sudo: bool,
    /// Mount table scanned by clean
    pub mount_table: PathBuf,
}

impl Config {
    /// Load configuration from .env file and environment.
    ///
    /// Relative paths resolve against `base_dir`.
    pub fn load(base_dir: &Path) -> Self {
        let mut env_vars = HashMap::new();

        let env_path = base_dir.join(".env");
        if env_path.exists() {
            match dotenvy::from_path_iter(&env_path) {
                Ok(iter) => {
                    for (key, value) in iter.flatten() {
                        env_vars.insert(key, value);
                    }
                }
                Err(e) => tracing::warn!("Ignoring unreadable {}: {}", env_path.display(), e),
            }
        }

        for (key, value) in std::env::vars() {
            env_vars.insert(key, value);
        }

        Self::from_vars(base_dir, &env_vars)
    }

    /// Default layout rooted at `base_dir`, ignoring the environment.
    pub fn rooted_at(base_dir: &Path) -> Self {
        Self::from_vars(base_dir, &HashMap::new())
    }

    fn from_vars(base_dir: &Path, vars: &HashMap<String, String>) -> Self {
        let path = |key: &str, default: &str| {
            let path = PathBuf::from(vars.get(key).map(String::as_str).unwrap_or(default));
            if path.is_absolute() {
                path
            } else {
                base_dir.join(path)
            }
        };
        let string = |key: &str, default: &str| {
            vars.get(key)
                .cloned()
                .unwrap_or_else(|| default.to_string())
        };

        let build_sudo = vars
            .get("BAKESHOP_BUILD_SUDO")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true);

        Self {
            pipeline_dir: path("BAKESHOP_PIPELINE_DIR", "pi-gen"),
            fillings_dir: path("BAKESHOP_FILLINGS_DIR", "fillings"),
            recipes_dir: path("BAKESHOP_RECIPES_DIR", "recipes"),
            config_file: path("BAKESHOP_CONFIG_FILE", "pi-gen-config"),
            template_stage: string("BAKESHOP_TEMPLATE_STAGE", "stage4"),
            build_script: string("BAKESHOP_BUILD_SCRIPT", "build.sh"),
            build_sudo,
            mount_table: path("BAKESHOP_MOUNT_TABLE", "/proc/mounts"),
        }
    }

    /// Staging root the fillings are copied into.
    pub fn stage_dir(&self) -> PathBuf {
        self.pipeline_dir.join(STAGE_NAME)
    }

    /// Directory the pipeline writes finished images to.
    pub fn deploy_dir(&self) -> PathBuf {
        self.pipeline_dir.join("deploy")
    }

    /// Pipeline-internal work tree.
    pub fn work_dir(&self) -> PathBuf {
        self.pipeline_dir.join("work")
    }

    /// A stage directory inside the pipeline checkout.
    pub fn pipeline_stage(&self, stage: &str) -> PathBuf {
        self.pipeline_dir.join(stage)
    }

    /// Local working copy of a filling.
    pub fn filling_path(&self, name: &str) -> PathBuf {
        self.fillings_dir.join(name)
    }

    /// Every `BAKESHOP_*` key with its effective value.
    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("BAKESHOP_PIPELINE_DIR", self.pipeline_dir.display().to_string()),
            ("BAKESHOP_FILLINGS_DIR", self.fillings_dir.display().to_string()),
            ("BAKESHOP_RECIPES_DIR", self.recipes_dir.display().to_string()),
            ("BAKESHOP_CONFIG_FILE", self.config_file.display().to_string()),
            ("BAKESHOP_TEMPLATE_STAGE", self.template_stage.clone()),
            ("BAKESHOP_BUILD_SCRIPT", self.build_script.clone()),
            ("BAKESHOP_BUILD_SUDO", self.build_sudo.to_string()),
            ("BAKESHOP_MOUNT_TABLE", self.mount_table.display().to_string()),
        ]
    }

    /// Log configuration for debugging.
    pub fn log(&self) {
        info!("Configuration:");
        for (key, value) in self.entries() {
            info!("  {}: {}", key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_resolve_against_base() {
        let config = Config::rooted_at(Path::new("/srv/bake"));
        assert_eq!(config.pipeline_dir, PathBuf::from("/srv/bake/pi-gen"));
        assert_eq!(config.stage_dir(), PathBuf::from("/srv/bake/pi-gen/stage-bakeshop"));
        assert_eq!(config.deploy_dir(), PathBuf::from("/srv/bake/pi-gen/deploy"));
        assert_eq!(config.work_dir(), PathBuf::from("/srv/bake/pi-gen/work"));
        assert_eq!(config.config_file, PathBuf::from("/srv/bake/pi-gen-config"));
        assert_eq!(config.mount_table, PathBuf::from("/proc/mounts"));
        assert!(config.build_sudo);
    }

    #[test]
    fn test_overrides() {
        let mut vars = HashMap::new();
        vars.insert("BAKESHOP_PIPELINE_DIR".to_string(), "/opt/pi-gen".to_string());
        vars.insert("BAKESHOP_FILLINGS_DIR".to_string(), "my-fillings".to_string());
        vars.insert("BAKESHOP_BUILD_SUDO".to_string(), "false".to_string());
        vars.insert("BAKESHOP_TEMPLATE_STAGE".to_string(), "stage2".to_string());

        let config = Config::from_vars(Path::new("/srv/bake"), &vars);
        assert_eq!(config.pipeline_dir, PathBuf::from("/opt/pi-gen"));
        assert_eq!(config.filling_path("wifi"), PathBuf::from("/srv/bake/my-fillings/wifi"));
        assert_eq!(config.template_stage, "stage2");
        assert!(!config.build_sudo);
    }

    #[test]
    fn test_entries_cover_every_key() {
        let mut vars = HashMap::new();
        vars.insert("BAKESHOP_MOUNT_TABLE".to_string(), "mounts".to_string());
        let config = Config::from_vars(Path::new("/srv/bake"), &vars);

        let entries = config.entries();
        let keys: Vec<_> = entries.iter().map(|(k, _)| *k).collect();
        for key in [
            "BAKESHOP_PIPELINE_DIR",
            "BAKESHOP_FILLINGS_DIR",
            "BAKESHOP_RECIPES_DIR",
            "BAKESHOP_CONFIG_FILE",
            "BAKESHOP_TEMPLATE_STAGE",
            "BAKESHOP_BUILD_SCRIPT",
            "BAKESHOP_BUILD_SUDO",
            "BAKESHOP_MOUNT_TABLE",
        ] {
            assert!(keys.contains(&key), "{} missing from entries", key);
        }
        assert!(entries.contains(&("BAKESHOP_MOUNT_TABLE", "/srv/bake/mounts".to_string())));
    }

    #[test]
    fn test_env_file_is_read() {
        let temp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".env"),
            "# local layout\nBAKESHOP_RECIPES_DIR=\"cached-recipes\"\n",
        )
        .unwrap();

        let config = Config::load(temp.path());
        if std::env::var("BAKESHOP_RECIPES_DIR").is_err() {
            assert_eq!(config.recipes_dir, temp.path().join("cached-recipes"));
        }
    }
}
