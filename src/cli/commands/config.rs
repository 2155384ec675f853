//! Config Command
//!
//! Manage feedlens configuration.
//!
//! Usage:
//!   feedlens config show [--format toml|json]
//!   feedlens config path
//!   feedlens config init [--global] [--force]

use std::path::Path;

use crate::cli::ui::Output;
use crate::config::ConfigLoader;
use crate::types::Result;

/// Print the effective configuration (all sources merged)
pub fn show(explicit: Option<&Path>, format: &str) -> Result<()> {
    let config = ConfigLoader::load(explicit)?;
    println!("{}", ConfigLoader::render(&config, format)?);
    Ok(())
}

/// Print configuration file locations and whether they exist
pub fn path() -> Result<()> {
    let mark = |p: &Path| if p.exists() { "" } else { " (not found)" };

    match ConfigLoader::global_config_path() {
        Some(global) => println!("Global:  {}{}", global.display(), mark(&global)),
        None => println!("Global:  (cannot determine config directory)"),
    }
    let project = ConfigLoader::project_config_path();
    println!("Project: {}{}", project.display(), mark(&project));
    Ok(())
}

pub fn init(global: bool, force: bool) -> Result<()> {
    let out = Output::new();
    let path = if global {
        ConfigLoader::init_global(force)?
    } else {
        ConfigLoader::init_project(&std::env::current_dir()?, force)?
    };
    out.success(&format!("Configuration at {}", path.display()));
    Ok(())
}
