//! Rebuild and restore orchestration over the configured mounts.

use crate::archiver;
use crate::backend::Backend;
use crate::backends;
use crate::keys;
use crate::types::{ExecReport, MountReport, Phase, PhaseReport};
use std::path::{Path, PathBuf};
use std::time::Instant;
use stow_core::{Error, PluginConfig, Result};
use tracing::{error, info, warn};

/// Caches the configured mounts to a backend, keyed by branch.
pub struct Plugin {
    config: PluginConfig,
}

impl Plugin {
    pub fn new(config: PluginConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    /// Open the configured backend and run the requested phases.
    pub async fn exec(&self) -> Result<ExecReport> {
        self.config.validate()?;
        let backend = backends::connect(&self.config.backend).await?;
        self.exec_with(backend).await
    }

    /// Run the requested phases against an open backend, then close it.
    ///
    /// The backend is closed exactly once whatever the phases return. A failed
    /// rebuild does not skip the restore phase; the first phase error is
    /// returned after both have run.
    pub async fn exec_with(&self, backend: Box<dyn Backend>) -> Result<ExecReport> {
        let outcome = self.run_phases(backend.as_ref()).await;

        let closed = backend.close().await;
        if let Err(e) = &closed {
            warn!(backend = backend.name(), error = %e, "Failed to close cache backend");
        }

        let report = outcome?;
        closed?;
        Ok(report)
    }

    async fn run_phases(&self, backend: &dyn Backend) -> Result<ExecReport> {
        self.config.validate()?;

        let mut report = ExecReport::default();
        let mut first_error: Option<Error> = None;

        if self.config.rebuild {
            match self.process_rebuild(backend).await {
                Ok(phase) => {
                    info!("cache built in {}ms", phase.duration_ms);
                    report.rebuild = Some(phase);
                }
                Err(e) => {
                    error!(phase = %Phase::Rebuild, error = %e, "Cache phase failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        if self.config.restore {
            match self.process_restore(backend).await {
                Ok(phase) => {
                    info!("cache restored in {}ms", phase.duration_ms);
                    report.restore = Some(phase);
                }
                Err(e) => {
                    error!(phase = %Phase::Restore, error = %e, "Cache phase failed");
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(report),
        }
    }

    /// Upload every mount to the remote cache, stopping at the first failure.
    pub async fn process_rebuild(&self, backend: &dyn Backend) -> Result<PhaseReport> {
        let start = Instant::now();
        let mut mounts = Vec::with_capacity(self.config.mounts.len());

        for mount in &self.config.mounts {
            let remote_path = self.cache_path(mount);
            info!(
                "archiving directory <{}> to remote cache <{}>",
                mount, remote_path
            );

            let mount_start = Instant::now();
            self.rebuild_mount(backend, mount, &remote_path)
                .await
                .map_err(|e| e.for_mount(mount, &remote_path))?;

            mounts.push(MountReport {
                mount: mount.clone(),
                remote_path,
                duration_ms: mount_start.elapsed().as_millis() as u64,
            });
        }

        Ok(PhaseReport {
            phase: Phase::Rebuild,
            mounts,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Download every mount from the remote cache, stopping at the first failure.
    ///
    /// Only the current branch's key is tried.
    pub async fn process_restore(&self, backend: &dyn Backend) -> Result<PhaseReport> {
        let start = Instant::now();
        let mut mounts = Vec::with_capacity(self.config.mounts.len());

        for mount in &self.config.mounts {
            let remote_path = self.cache_path(mount);
            info!(
                "restoring directory <{}> from remote cache <{}>",
                mount, remote_path
            );

            let mount_start = Instant::now();
            self.restore_mount(backend, mount, &remote_path)
                .await
                .map_err(|e| e.for_mount(mount, &remote_path))?;

            mounts.push(MountReport {
                mount: mount.clone(),
                remote_path,
                duration_ms: mount_start.elapsed().as_millis() as u64,
            });
        }

        Ok(PhaseReport {
            phase: Phase::Restore,
            mounts,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn rebuild_mount(&self, backend: &dyn Backend, mount: &str, remote_path: &str) -> Result<()> {
        let mount_dir = self.mount_dir(mount);
        let is_dir = tokio::fs::metadata(&mount_dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            return Err(Error::Archive(format!(
                "mount directory {} does not exist",
                mount_dir.display()
            )));
        }

        let (reader, archiving) = archiver::spawn_archive(mount_dir, self.config.compression);
        let uploaded = backend.put(remote_path, self.config.ttl, reader).await;
        let archived = archiving
            .await
            .map_err(|e| Error::Internal(format!("Archive task failed: {}", e)))
            .and_then(|res| res);

        match (uploaded, archived) {
            (Err(e), _) => Err(e),
            (Ok(()), Err(e)) => {
                // The backend may hold a truncated archive
                if let Err(rm) = backend.remove(remote_path).await {
                    warn!(path = %remote_path, error = %rm, "Failed to remove partial cache entry");
                }
                Err(e)
            }
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn restore_mount(&self, backend: &dyn Backend, mount: &str, remote_path: &str) -> Result<()> {
        let reader = backend.get(remote_path).await?;

        let mount_dir = self.mount_dir(mount);
        tokio::fs::create_dir_all(&mount_dir).await?;
        archiver::extract_stream(reader, mount_dir, self.config.compression).await
    }

    /// Remote path for a mount on the current branch.
    pub fn cache_path(&self, mount: &str) -> String {
        keys::resolve(&self.config.path, &self.config.repo, mount, &self.config.branch)
    }

    fn mount_dir(&self, mount: &str) -> PathBuf {
        let path = Path::new(mount);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config.workspace.join(path)
        }
    }
}
