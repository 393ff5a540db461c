//! CLI argument definitions.

use clap::Parser;
use std::path::PathBuf;
use std::sync::LazyLock;
use stow_core::Compression;

static VERSION: LazyLock<String> = LazyLock::new(|| match option_env!("STOW_BUILD") {
    Some(build) => format!("{}+{}", env!("CARGO_PKG_VERSION"), build),
    None => env!("CARGO_PKG_VERSION").to_string(),
});

#[derive(Parser, Debug)]
#[command(name = "stow")]
#[command(author, version = VERSION.as_str(), about = "Cache build directories in remote storage, keyed by branch", long_about = None)]
pub struct Cli {
    /// Repository full name
    #[arg(long = "repo-name", env = "DRONE_REPO", default_value = "")]
    pub repo_name: String,

    /// Repository default branch
    #[arg(long = "repo-branch", env = "DRONE_REPO_BRANCH", default_value = "master")]
    pub repo_branch: String,

    /// Branch of the commit being built
    #[arg(long = "commit-branch", env = "DRONE_COMMIT_BRANCH", default_value = "master")]
    pub commit_branch: String,

    /// Cache directories
    #[arg(long = "mount", env = "PLUGIN_MOUNT", value_delimiter = ',')]
    pub mounts: Vec<String>,

    /// Rebuild the cache directories
    #[arg(long, env = "PLUGIN_REBUILD")]
    pub rebuild: bool,

    /// Restore the cache directories
    #[arg(long, env = "PLUGIN_RESTORE")]
    pub restore: bool,

    /// Root prefix of every cache key
    #[arg(long, env = "PLUGIN_PATH", default_value = "")]
    pub path: String,

    /// Base directory for relative mounts
    #[arg(long, env = "DRONE_WORKSPACE", default_value = ".")]
    pub workspace: PathBuf,

    /// Advisory expiry of uploaded entries, in seconds
    #[arg(long, env = "PLUGIN_TTL")]
    pub ttl: Option<u64>,

    /// Archive encoding: none, gzip or zstd
    #[arg(long, env = "PLUGIN_COMPRESSION", default_value = "none")]
    pub compression: Compression,

    /// S3 configuration (JSON)
    #[arg(long, env = "PLUGIN_S3", hide_env_values = true)]
    pub s3: Option<String>,

    /// SFTP configuration (JSON)
    #[arg(long, env = "PLUGIN_SFTP", hide_env_values = true)]
    pub sftp: Option<String>,

    /// Local filesystem configuration (JSON)
    #[arg(long, env = "PLUGIN_FILESYSTEM")]
    pub filesystem: Option<String>,

    /// Source env file
    #[arg(long = "env-file")]
    pub env_file: Option<PathBuf>,
}
