//! Plugin configuration handed to the cache engine by the CLI layer.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Archive encoding used for cache entries.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// Plain tar, compatible with entries written by earlier deployments.
    #[default]
    None,
    Gzip,
    Zstd,
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" | "tar" => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "zstd" | "zst" => Ok(Compression::Zstd),
            other => Err(format!("Invalid compression: {}", other)),
        }
    }
}

/// Backend selection together with its raw JSON payload.
///
/// The variant is decided by which payload the operator supplied; the payload
/// itself is decoded by the backend when it connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    S3(String),
    Sftp(String),
    Filesystem(String),
}

impl BackendConfig {
    /// Pick the backend from the optional payloads. Exactly one must be set.
    pub fn select(
        s3: Option<String>,
        sftp: Option<String>,
        filesystem: Option<String>,
    ) -> Result<Self> {
        let mut supplied: Vec<BackendConfig> = [
            s3.map(BackendConfig::S3),
            sftp.map(BackendConfig::Sftp),
            filesystem.map(BackendConfig::Filesystem),
        ]
        .into_iter()
        .flatten()
        .filter(|c| !c.payload().trim().is_empty())
        .collect();

        if supplied.len() > 1 {
            return Err(Error::Config(format!(
                "multiple cache backends configured: {}",
                supplied
                    .iter()
                    .map(|c| c.kind())
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        supplied.pop().ok_or_else(|| {
            Error::Config("no cache backend configured (expected one of s3, sftp, filesystem)".into())
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BackendConfig::S3(_) => "s3",
            BackendConfig::Sftp(_) => "sftp",
            BackendConfig::Filesystem(_) => "filesystem",
        }
    }

    pub fn payload(&self) -> &str {
        match self {
            BackendConfig::S3(raw) | BackendConfig::Sftp(raw) | BackendConfig::Filesystem(raw) => {
                raw
            }
        }
    }
}

/// Fully populated plugin configuration.
#[derive(Debug, Clone)]
pub struct PluginConfig {
    /// Upload the mounts to the remote cache.
    pub rebuild: bool,
    /// Download the mounts from the remote cache.
    pub restore: bool,
    /// Directories to cache, as configured.
    pub mounts: Vec<String>,
    /// Repository identifier, e.g. `org/app`.
    pub repo: String,
    /// Branch of the commit being built.
    pub branch: String,
    /// Repository default branch. Not used for key resolution.
    pub default_branch: String,
    /// Root prefix of every cache key.
    pub path: String,
    /// Base directory for relative mounts.
    pub workspace: PathBuf,
    /// Advisory expiry passed to the backend on upload.
    pub ttl: Option<Duration>,
    /// Archive encoding.
    pub compression: Compression,
    /// Selected backend.
    pub backend: BackendConfig,
}

impl PluginConfig {
    /// Create a config for a repository and branch with no phases enabled.
    pub fn new(repo: impl Into<String>, branch: impl Into<String>, backend: BackendConfig) -> Self {
        Self {
            rebuild: false,
            restore: false,
            mounts: Vec::new(),
            repo: repo.into(),
            branch: branch.into(),
            default_branch: "master".to_string(),
            path: String::new(),
            workspace: PathBuf::from("."),
            ttl: None,
            compression: Compression::default(),
            backend,
        }
    }

    pub fn with_mounts<I, S>(mut self, mounts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.mounts = mounts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_rebuild(mut self, rebuild: bool) -> Self {
        self.rebuild = rebuild;
        self
    }

    pub fn with_restore(mut self, restore: bool) -> Self {
        self.restore = restore;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<PathBuf>) -> Self {
        self.workspace = workspace.into();
        self
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Check the fields every phase depends on.
    pub fn validate(&self) -> Result<()> {
        if self.repo.trim().is_empty() {
            return Err(Error::Config("repository name is required".into()));
        }
        if self.branch.trim().is_empty() {
            return Err(Error::Config("commit branch is required".into()));
        }
        if let Some(empty) = self.mounts.iter().position(|m| m.trim().is_empty()) {
            return Err(Error::Config(format!("mount #{} is empty", empty + 1)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_select_single_backend() {
        let cfg = BackendConfig::select(None, Some(r#"{"host":"cache"}"#.into()), None).unwrap();
        assert_eq!(cfg, BackendConfig::Sftp(r#"{"host":"cache"}"#.into()));
        assert_eq!(cfg.kind(), "sftp");
    }

    #[test]
    fn test_select_requires_a_backend() {
        let err = BackendConfig::select(None, None, Some("  ".into())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_select_rejects_multiple_backends() {
        let err = BackendConfig::select(
            Some(r#"{"bucket":"b"}"#.into()),
            None,
            Some(r#"{"root":"/tmp"}"#.into()),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid configuration: multiple cache backends configured: s3, filesystem"
        );
    }

    #[test]
    fn test_compression_parse() {
        assert_eq!("".parse::<Compression>().unwrap(), Compression::None);
        assert_eq!("GZIP".parse::<Compression>().unwrap(), Compression::Gzip);
        assert_eq!("zstd".parse::<Compression>().unwrap(), Compression::Zstd);
        assert!("lzma".parse::<Compression>().is_err());
    }

    #[test]
    fn test_compression_serde() {
        let json = serde_json::to_string(&Compression::Zstd).unwrap();
        assert_eq!(json, "\"zstd\"");
    }

    #[test]
    fn test_validate() {
        let backend = BackendConfig::Filesystem(r#"{"root":"/tmp"}"#.into());
        let ok = PluginConfig::new("org/app", "main", backend.clone()).with_mounts(["vendor"]);
        assert!(ok.validate().is_ok());

        let no_repo = PluginConfig::new("", "main", backend.clone());
        assert!(no_repo.validate().is_err());

        let blank_mount = PluginConfig::new("org/app", "main", backend).with_mounts(["a", " "]);
        assert_eq!(
            blank_mount.validate().unwrap_err().to_string(),
            "Invalid configuration: mount #2 is empty"
        );
    }
}
