//! Branch-keyed directory cache for CI runners.
//!
//! Mounts are archived to a storage backend under a key derived from the
//! mount path and the commit branch, and restored from the same key on later
//! builds.

pub mod archiver;
pub mod backend;
pub mod backends;
pub mod keys;
pub mod plugin;
pub mod types;

pub use backend::Backend;
pub use keys::{hash_mount, join_remote, resolve};
pub use plugin::Plugin;
pub use types::{ByteReader, EntryInfo, ExecReport, MountReport, Phase, PhaseReport};
