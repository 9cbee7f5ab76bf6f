//! Cluster configuration loading.

pub mod schema;

pub use schema::*;

use std::path::Path;

use anyhow::{Context, Result};

/// Default location of the bootstrap config written onto the head node by
/// provisioning. `shutdown` reads this to recover provider identity when no
/// cluster YAML argument is available.
pub const DEFAULT_BOOTSTRAP_CONFIG: &str = "~/ray_bootstrap_config.yaml";

/// Load a cluster configuration from a YAML file.
///
/// A leading `~` in the path is expanded to the user's home directory.
pub fn load_config(path: &Path) -> Result<ClusterConfig> {
    let expanded = shellexpand::tilde(&path.to_string_lossy()).into_owned();

    let content = std::fs::read_to_string(&expanded)
        .with_context(|| format!("Failed to read cluster config: {}", expanded))?;

    load_config_str(&content).with_context(|| format!("Failed to parse cluster config: {}", expanded))
}

/// Load a cluster configuration from a YAML string.
pub fn load_config_str(content: &str) -> Result<ClusterConfig> {
    let config: ClusterConfig =
        serde_yaml::from_str(content).context("Failed to parse cluster config")?;

    Ok(config)
}
