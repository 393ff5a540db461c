//! Stow Core
//!
//! Error taxonomy and plugin configuration shared by the cache engine and the
//! `stow` binary. This crate has minimal dependencies and defines the shared
//! vocabulary used across the other crates.

pub mod config;
pub mod error;

pub use config::{BackendConfig, Compression, PluginConfig};
pub use error::{Error, Result};
