//! Error types for stow.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Fatal before any mount is processed
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    // Backend errors
    #[error("Cache entry not found: {0}")]
    NotFound(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    // Local errors
    #[error("Archive error: {0}")]
    Archive(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Mount <{mount}> failed at remote cache <{remote_path}>: {source}")]
    Mount {
        mount: String,
        remote_path: String,
        #[source]
        source: Box<Error>,
    },

    // Generic
    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap an error with the mount and remote path it was raised for.
    pub fn for_mount(self, mount: impl Into<String>, remote_path: impl Into<String>) -> Self {
        Error::Mount {
            mount: mount.into(),
            remote_path: remote_path.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, looking through `Mount` wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::Mount { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Error::NotFound(_))
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self.root(), Error::Unsupported(_))
    }

    /// Errors that abort the run before any mount is touched.
    pub fn is_fatal(&self) -> bool {
        matches!(self.root(), Error::Config(_) | Error::Connection(_))
    }

    /// The mount this error was raised for, if any.
    pub fn mount(&self) -> Option<&str> {
        match self {
            Error::Mount { mount, .. } => Some(mount),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Config(err.to_string())
    }
}
