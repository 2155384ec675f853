//! Configuration Loader (Figment-based)
//!
//! Loads and merges configuration from multiple sources using Figment:
//! 1. Built-in defaults (Serialized)
//! 2. Global config (<user config dir>/feedlens/config.toml)
//! 3. Project config (.feedlens/config.toml)
//! 4. Explicit file passed on the command line
//! 5. Environment variables (FEEDLENS_* prefix, `__` separates sections)

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::types::Config;
use crate::types::{LensError, Result};

const ENV_PREFIX: &str = "FEEDLENS_";
const PROJECT_DIR: &str = ".feedlens";
const CONFIG_FILE: &str = "config.toml";

/// Configuration loader
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with full resolution chain:
    /// defaults → global → project → explicit file → env vars
    pub fn load(explicit: Option<&Path>) -> Result<Config> {
        let config: Config = Self::figment(explicit)?
            .extract()
            .map_err(|e| LensError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file only (defaults underneath)
    pub fn load_from_file(path: &Path) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(path))
            .extract()
            .map_err(|e| LensError::Config(format!("Configuration error: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn figment(explicit: Option<&Path>) -> Result<Figment> {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global_path) = Self::global_config_path()
            && global_path.exists()
        {
            debug!("Loading global config from: {}", global_path.display());
            figment = figment.merge(Toml::file(&global_path));
        }

        let project_path = Self::project_config_path();
        if project_path.exists() {
            debug!("Loading project config from: {}", project_path.display());
            figment = figment.merge(Toml::file(&project_path));
        }

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(LensError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            debug!("Loading config from: {}", path.display());
            figment = figment.merge(Toml::file(path));
        }

        // FEEDLENS_RATE__TIER=tier1 -> rate.tier
        Ok(figment.merge(Env::prefixed(ENV_PREFIX).split("__").lowercase(true)))
    }

    // =========================================================================
    // Path Management
    // =========================================================================

    /// Global config directory (e.g. ~/.config/feedlens on Linux)
    pub fn global_dir() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "feedlens")
            .map(|dirs| dirs.config_dir().to_path_buf())
    }

    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_dir().map(|dir| dir.join(CONFIG_FILE))
    }

    pub fn project_config_path() -> PathBuf {
        PathBuf::from(PROJECT_DIR).join(CONFIG_FILE)
    }

    // =========================================================================
    // Rendering
    // =========================================================================

    /// Render the effective configuration as TOML or JSON
    pub fn render(config: &Config, format: &str) -> Result<String> {
        match format {
            "json" => Ok(serde_json::to_string_pretty(config)?),
            "toml" | "text" => toml::to_string_pretty(config)
                .map_err(|e| LensError::Config(format!("Failed to render config: {}", e))),
            other => Err(LensError::Config(format!(
                "Unknown config format '{}'. Valid values: toml, json",
                other
            ))),
        }
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Write the default config to the global location
    pub fn init_global(force: bool) -> Result<PathBuf> {
        let dir = Self::global_dir().ok_or_else(|| {
            LensError::config("Cannot determine global config directory")
        })?;
        Self::write_default(&dir, force)
    }

    /// Write the default config to `.feedlens/config.toml` under `root`
    pub fn init_project(root: &Path, force: bool) -> Result<PathBuf> {
        Self::write_default(&root.join(PROJECT_DIR), force)
    }

    fn write_default(dir: &Path, force: bool) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(CONFIG_FILE);
        if path.exists() && !force {
            info!("Config exists: {}", path.display());
            return Ok(path);
        }
        fs::write(&path, Self::default_config_template())?;
        info!("Created config: {}", path.display());
        Ok(path)
    }

    fn default_config_template() -> String {
        r#"# feedlens configuration
# Project settings in .feedlens/config.toml override the user-wide file.
# Environment overrides use FEEDLENS_<SECTION>__<KEY>, e.g. FEEDLENS_RATE__TIER=tier1

version = "1.0"

[llm]
provider = "synthetic"   # synthetic | openai
model = "gpt-4o-mini"
timeout_secs = 60
temperature = 0.1

[rate]
tier = "standard"        # free | standard | tier1 | tier2
max_wait_ms = 2000

[batching]
max_batch_size = 100
max_tokens_per_call = 12000

[retry]
max_attempts = 3
synthetic_fallback = true

[pipeline]
language = "es"          # es | en | gn
sla_target_secs = 10
timeout_secs = 300

[alerts]
warning_threshold = 0.75
critical_threshold = 0.90

[reconcile.churn.weights]
collaborator = 0.30
sentiment = 0.25
keywords = 0.25
nps = 0.15
pain_points = 0.05
"#
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderKind;
    use figment::Jail;
    use tempfile::TempDir;

    fn isolate_home(jail: &mut Jail) {
        let dir = jail.directory().display().to_string();
        jail.set_env("HOME", &dir);
        jail.set_env("XDG_CONFIG_HOME", &dir);
    }

    #[test]
    fn test_load_default_config() {
        Jail::expect_with(|jail| {
            isolate_home(jail);
            let config = ConfigLoader::load(None).expect("defaults load");
            assert_eq!(config.version, "1.0");
            assert_eq!(config.batching.max_batch_size, 100);
            Ok(())
        });
    }

    #[test]
    fn test_project_file_and_env_override() {
        Jail::expect_with(|jail| {
            isolate_home(jail);
            jail.create_dir(".feedlens")?;
            jail.create_file(
                ".feedlens/config.toml",
                r#"
                [rate]
                tier = "tier1"

                [pipeline]
                language = "en"
                "#,
            )?;
            jail.set_env("FEEDLENS_BATCHING__MAX_BATCH_SIZE", "40");
            jail.set_env("FEEDLENS_LLM__PROVIDER", "openai");

            let config = ConfigLoader::load(None).expect("layered load");
            assert_eq!(config.rate.tier, "tier1");
            assert_eq!(config.pipeline.language, "en");
            assert_eq!(config.batching.max_batch_size, 40);
            assert_eq!(config.llm.provider, ProviderKind::OpenAi);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_override_rejected() {
        Jail::expect_with(|jail| {
            isolate_home(jail);
            jail.set_env("FEEDLENS_PIPELINE__LANGUAGE", "fr");
            assert!(ConfigLoader::load(None).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_init_project_writes_loadable_template() {
        let temp_dir = TempDir::new().unwrap();
        let path = ConfigLoader::init_project(temp_dir.path(), false).unwrap();

        assert!(path.ends_with(".feedlens/config.toml"));
        let config = ConfigLoader::load_from_file(&path).unwrap();
        assert_eq!(config.rate.tier, "standard");
        assert_eq!(config.reconcile.churn.weights.collaborator, 0.30);
    }

    #[test]
    fn test_render_formats() {
        let config = Config::default();
        let toml = ConfigLoader::render(&config, "toml").unwrap();
        assert!(toml.contains("[batching]"));
        let json = ConfigLoader::render(&config, "json").unwrap();
        assert!(json.contains("\"max_batch_size\": 100"));
        assert!(ConfigLoader::render(&config, "xml").is_err());
    }
}
