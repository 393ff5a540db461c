//! Local filesystem backend for shared-volume caches.

use crate::backend::Backend;
use crate::types::{ByteReader, EntryInfo};
use async_trait::async_trait;
use serde::Deserialize;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use stow_core::{Error, Result};
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct FilesystemConfig {
    #[serde(alias = "Root")]
    pub root: PathBuf,
}

impl FilesystemConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: FilesystemConfig = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid filesystem configuration: {}", e)))?;
        if config.root.as_os_str().is_empty() {
            return Err(Error::Config("filesystem root is required".into()));
        }
        Ok(config)
    }
}

/// Cache entries stored as files under a root directory.
pub struct FilesystemBackend {
    root_dir: PathBuf,
}

impl FilesystemBackend {
    pub fn new(root_dir: PathBuf) -> Self {
        Self { root_dir }
    }

    pub async fn from_json(raw: &str) -> Result<Self> {
        let config = FilesystemConfig::from_json(raw)?;
        tokio::fs::create_dir_all(&config.root).await.map_err(|e| {
            Error::Connection(format!(
                "cannot prepare cache root {}: {}",
                config.root.display(),
                e
            ))
        })?;
        Ok(Self::new(config.root))
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::Config(format!("invalid cache path: {}", key)));
        }
        Ok(self.root_dir.join(relative))
    }
}

fn not_found_or(e: std::io::Error, key: &str) -> Error {
    if e.kind() == ErrorKind::NotFound {
        Error::NotFound(key.to_string())
    } else {
        Error::Io(e)
    }
}

#[async_trait]
impl Backend for FilesystemBackend {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<EntryInfo>> {
        let search_dir = self.key_path(prefix)?;
        if !search_dir.is_dir() {
            return Ok(vec![]);
        }

        let mut entries = vec![];
        let base = prefix.trim_end_matches('/');

        let mut read_dir = tokio::fs::read_dir(&search_dir).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            // In-flight uploads
            if name.starts_with('.') && name.contains(".partial-") {
                continue;
            }
            let metadata = entry.metadata().await?;
            let path = if base.is_empty() {
                name
            } else {
                format!("{}/{}", base, name)
            };

            entries.push(EntryInfo {
                path,
                size_bytes: metadata.len(),
                modified_at: metadata.modified().ok().map(chrono::DateTime::from),
                is_dir: metadata.is_dir(),
            });
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn get(&self, path: &str) -> Result<ByteReader> {
        let key_path = self.key_path(path)?;
        let file = tokio::fs::File::open(&key_path)
            .await
            .map_err(|e| not_found_or(e, path))?;
        if file.metadata().await?.is_dir() {
            return Err(Error::NotFound(path.to_string()));
        }
        Ok(Box::pin(file))
    }

    async fn put(&self, path: &str, ttl: Option<Duration>, mut src: ByteReader) -> Result<()> {
        let key_path = self.key_path(path)?;
        if let Some(ttl) = ttl {
            debug!(path = %path, ttl_secs = ttl.as_secs(), "filesystem backend ignores ttl");
        }

        let parent = key_path
            .parent()
            .ok_or_else(|| Error::Config(format!("invalid cache path: {}", path)))?;
        tokio::fs::create_dir_all(parent).await?;

        let file_name = key_path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let partial = parent.join(format!(".{}.partial-{}", file_name, uuid::Uuid::new_v4()));

        let written = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let bytes = tokio::io::copy(&mut src, &mut file).await?;
            file.sync_all().await?;
            tokio::fs::rename(&partial, &key_path).await?;
            Ok::<u64, std::io::Error>(bytes)
        }
        .await;

        match written {
            Ok(bytes) => {
                debug!(path = %path, bytes, "cache entry written");
                Ok(())
            }
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                Err(Error::Transport(format!("Failed to write cache {}: {}", path, e)))
            }
        }
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let key_path = self.key_path(path)?;
        if key_path.exists() {
            tokio::fs::remove_file(&key_path).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
