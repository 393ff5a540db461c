//! Storage backend trait.

use crate::types::{ByteReader, EntryInfo};
use async_trait::async_trait;
use std::time::Duration;
use stow_core::Result;

/// Trait for remote cache storage backends.
///
/// A backend is opened once per invocation, shared by every mount in turn and
/// closed exactly once by the orchestrator.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &str;

    /// List entries under a path prefix.
    ///
    /// Variants without a directory model return `Error::Unsupported`.
    async fn list(&self, prefix: &str) -> Result<Vec<EntryInfo>>;

    /// Open the entry at `path` for reading.
    ///
    /// Returns `Error::NotFound` when nothing is stored at `path`.
    async fn get(&self, path: &str) -> Result<ByteReader>;

    /// Store the contents of `src` at `path`, replacing any existing entry.
    ///
    /// `ttl` is advisory; backends may ignore it.
    async fn put(&self, path: &str, ttl: Option<Duration>, src: ByteReader) -> Result<()>;

    /// Delete the entry at `path`.
    async fn remove(&self, path: &str) -> Result<()>;

    /// Release the underlying connection.
    async fn close(&self) -> Result<()>;
}
