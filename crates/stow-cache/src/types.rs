//! Cache types and reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio::io::AsyncRead;

/// An in-flight byte stream between the local filesystem and a backend.
pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Metadata for an entry returned by a backend listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntryInfo {
    /// Backend path of the entry.
    pub path: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Last modification time, when the backend reports one.
    pub modified_at: Option<DateTime<Utc>>,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// Direction of a cache phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Rebuild,
    Restore,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Rebuild => write!(f, "rebuild"),
            Phase::Restore => write!(f, "restore"),
        }
    }
}

/// Result of processing one mount.
#[derive(Debug, Clone, Serialize)]
pub struct MountReport {
    /// Mount as configured.
    pub mount: String,
    /// Remote path the mount was stored at or restored from.
    pub remote_path: String,
    /// Time taken in milliseconds.
    pub duration_ms: u64,
}

/// Result of a completed phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub phase: Phase,
    pub mounts: Vec<MountReport>,
    /// Time taken in milliseconds.
    pub duration_ms: u64,
}

/// Result of a full plugin invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecReport {
    pub rebuild: Option<PhaseReport>,
    pub restore: Option<PhaseReport>,
}
