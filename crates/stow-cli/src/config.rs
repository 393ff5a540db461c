//! Conversion of parsed arguments into plugin configuration.

use crate::commands::Cli;
use std::time::Duration;
use stow_core::{BackendConfig, PluginConfig, Result};

impl Cli {
    /// Build the plugin configuration, selecting the backend from whichever
    /// payload was supplied.
    pub fn plugin_config(&self) -> Result<PluginConfig> {
        let backend =
            BackendConfig::select(self.s3.clone(), self.sftp.clone(), self.filesystem.clone())?;

        let mounts: Vec<String> = self
            .mounts
            .iter()
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
            .collect();

        let config = PluginConfig {
            rebuild: self.rebuild,
            restore: self.restore,
            mounts,
            repo: self.repo_name.clone(),
            branch: self.commit_branch.clone(),
            default_branch: self.repo_branch.clone(),
            path: self.path.clone(),
            workspace: self.workspace.clone(),
            ttl: self.ttl.map(Duration::from_secs),
            compression: self.compression,
            backend,
        };
        config.validate()?;
        Ok(config)
    }
}
