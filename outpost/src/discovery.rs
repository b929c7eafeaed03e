//! Locating the configuration file.

use std::path::{Path, PathBuf};

use anyhow::bail;

pub const CONFIG_ENV: &str = "OUTPOST_CONFIG";

#[must_use]
pub fn default_paths() -> Vec<PathBuf> {
    vec![
        PathBuf::from("./outpost.config.ron"),
        PathBuf::from("/etc/outpost/outpost.config.ron"),
    ]
}

/// Find the configuration file using the following precedence:
/// 1. `--config` on the command line
/// 2. `OUTPOST_CONFIG` environment variable
/// 3. ./outpost.config.ron (current working directory)
/// 4. /etc/outpost/outpost.config.ron (system-wide config)
pub fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    locate(
        explicit,
        std::env::var(CONFIG_ENV).ok().as_deref(),
        &default_paths(),
    )
}

fn locate(explicit: Option<&Path>, env: Option<&str>, defaults: &[PathBuf]) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(path.to_path_buf());
        }
        bail!("--config points to non-existent file: {}", path.display());
    }

    if let Some(env_path) = env {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return Ok(path);
        }
        bail!("{CONFIG_ENV} points to non-existent file: {}", path.display());
    }

    if let Some(path) = defaults.iter().find(|path| path.exists()) {
        return Ok(path.clone());
    }

    let paths_tried = defaults
        .iter()
        .map(|path| format!("  - {}", path.display()))
        .collect::<Vec<_>>()
        .join("\n");

    bail!("No configuration file found. Tried:\n  - {CONFIG_ENV} environment variable\n{paths_tried}")
}
