//! Storage backend implementations.

pub mod filesystem;
pub mod s3;
pub mod sftp;

pub use filesystem::{FilesystemBackend, FilesystemConfig};
pub use s3::{S3Backend, S3Config};
pub use sftp::{SftpBackend, SftpConfig};

use crate::backend::Backend;
use stow_core::{BackendConfig, Result};
use tracing::info;

/// Open the backend selected by `config`.
///
/// Malformed payloads fail with `Error::Config`, unreachable or rejecting
/// servers with `Error::Connection`.
pub async fn connect(config: &BackendConfig) -> Result<Box<dyn Backend>> {
    info!(backend = config.kind(), "Opening cache backend");
    let backend: Box<dyn Backend> = match config {
        BackendConfig::S3(raw) => Box::new(S3Backend::from_json(raw).await?),
        BackendConfig::Sftp(raw) => Box::new(SftpBackend::from_json(raw).await?),
        BackendConfig::Filesystem(raw) => Box::new(FilesystemBackend::from_json(raw).await?),
    };
    Ok(backend)
}
