//! SFTP remote-filesystem backend.

use crate::backend::Backend;
use crate::keys::join_remote;
use crate::types::{ByteReader, EntryInfo};
use async_trait::async_trait;
use russh::client;
use russh_keys::key;
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpError;
use russh_sftp::protocol::StatusCode;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use stow_core::{Error, Result};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const DEFAULT_PORT: u16 = 22;

#[derive(Clone, Deserialize)]
pub struct SftpConfig {
    /// Server host, optionally with a `:port` suffix.
    #[serde(alias = "Host", alias = "server", alias = "Server")]
    pub host: String,
    #[serde(default, alias = "Port")]
    pub port: Option<u16>,
    #[serde(alias = "Username", alias = "user", alias = "User")]
    pub username: String,
    #[serde(default, alias = "Password")]
    pub password: Option<String>,
    /// PEM encoded private key.
    #[serde(default, alias = "Key")]
    pub key: Option<String>,
    #[serde(default, alias = "KeyPath")]
    pub key_path: Option<String>,
    /// Directory every cache path is resolved under.
    #[serde(default, alias = "Root", alias = "path", alias = "Path")]
    pub root: Option<String>,
}

// Credentials stay out of logs.
impl std::fmt::Debug for SftpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SftpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("key", &self.key.as_ref().map(|_| "***"))
            .field("key_path", &self.key_path)
            .field("root", &self.root)
            .finish()
    }
}

impl SftpConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: SftpConfig = serde_json::from_str(raw)
            .map_err(|e| Error::Config(format!("invalid sftp configuration: {}", e)))?;
        if config.host.trim().is_empty() {
            return Err(Error::Config("sftp host is required".into()));
        }
        if config.username.trim().is_empty() {
            return Err(Error::Config("sftp username is required".into()));
        }
        if config.password.is_none() && config.key.is_none() && config.key_path.is_none() {
            return Err(Error::Config(
                "sftp requires one of password, key or key_path".into(),
            ));
        }
        config.address()?;
        Ok(config)
    }

    /// Host and port to dial. An explicit `port` wins over a `host:port` suffix.
    pub fn address(&self) -> Result<(String, u16)> {
        let host = self.host.trim();
        let (name, suffix_port) = match host.rsplit_once(':') {
            Some((name, port)) if !name.contains(':') => {
                let port = port
                    .parse::<u16>()
                    .map_err(|_| Error::Config(format!("invalid sftp port in host: {}", host)))?;
                (name, Some(port))
            }
            _ => (host, None),
        };
        Ok((
            name.to_string(),
            self.port.or(suffix_port).unwrap_or(DEFAULT_PORT),
        ))
    }
}

struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    // Cache servers are reached over trusted runner networks.
    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Cache entries stored as files on an SFTP server.
pub struct SftpBackend {
    session: client::Handle<ClientHandler>,
    sftp: SftpSession,
    root: String,
}

impl SftpBackend {
    /// Open an SSH session, authenticate and start the sftp subsystem.
    pub async fn connect(config: SftpConfig) -> Result<Self> {
        let (host, port) = config.address()?;
        let ssh_config = Arc::new(client::Config::default());

        let mut session = client::connect(ssh_config, (host.as_str(), port), ClientHandler)
            .await
            .map_err(|e| Error::Connection(format!("ssh connect {}:{}: {}", host, port, e)))?;

        let authenticated = authenticate(&mut session, &config).await?;
        if !authenticated {
            return Err(Error::Connection(format!(
                "ssh authentication rejected for {}@{}",
                config.username, host
            )));
        }

        let channel = session
            .channel_open_session()
            .await
            .map_err(|e| Error::Connection(format!("ssh channel open: {}", e)))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| Error::Connection(format!("sftp subsystem request: {}", e)))?;
        let sftp = SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| Error::Connection(format!("sftp session: {}", e)))?;

        info!(host = %host, port, user = %config.username, "SFTP session established");
        Ok(Self {
            session,
            sftp,
            root: config.root.unwrap_or_default(),
        })
    }

    pub async fn from_json(raw: &str) -> Result<Self> {
        Self::connect(SftpConfig::from_json(raw)?).await
    }

    fn remote_path(&self, path: &str) -> String {
        join_remote(&[&self.root, path])
    }

    /// Create every missing directory above `path`.
    async fn ensure_parent(&self, path: &str) -> Result<()> {
        let Some((parent, _)) = path.rsplit_once('/') else {
            return Ok(());
        };

        let mut current = String::new();
        for segment in parent.split('/') {
            if segment.is_empty() {
                if current.is_empty() {
                    current.push('/');
                }
                continue;
            }
            if !current.is_empty() && !current.ends_with('/') {
                current.push('/');
            }
            current.push_str(segment);

            let exists = self
                .sftp
                .try_exists(current.as_str())
                .await
                .map_err(|e| sftp_error(e, &current))?;
            if !exists {
                self.sftp
                    .create_dir(current.as_str())
                    .await
                    .map_err(|e| sftp_error(e, &current))?;
            }
        }
        Ok(())
    }

    async fn upload(&self, remote: &str, src: &mut ByteReader) -> Result<u64> {
        let mut file = self
            .sftp
            .create(remote)
            .await
            .map_err(|e| sftp_error(e, remote))?;
        let bytes = tokio::io::copy(src, &mut file)
            .await
            .map_err(|e| Error::Transport(format!("sftp upload {}: {}", remote, e)))?;
        file.shutdown()
            .await
            .map_err(|e| Error::Transport(format!("sftp close {}: {}", remote, e)))?;
        Ok(bytes)
    }
}

/// Temporary sibling an upload is written to before it is renamed into place.
fn partial_path(remote: &str) -> String {
    let (dir, name) = match remote.rsplit_once('/') {
        Some((dir, name)) => (Some(dir), name),
        None => (None, remote),
    };
    let partial = format!(".{}.partial-{}", name, uuid::Uuid::new_v4());
    match dir {
        Some(dir) => format!("{}/{}", dir, partial),
        None => partial,
    }
}

async fn authenticate(
    session: &mut client::Handle<ClientHandler>,
    config: &SftpConfig,
) -> Result<bool> {
    let user = config.username.as_str();

    let key_pair = match (&config.key, &config.key_path) {
        (Some(pem), _) => Some(
            russh_keys::decode_secret_key(pem, None)
                .map_err(|e| Error::Config(format!("invalid sftp private key: {}", e)))?,
        ),
        (None, Some(path)) => Some(
            russh_keys::load_secret_key(path, None)
                .map_err(|e| Error::Config(format!("cannot load sftp key {}: {}", path, e)))?,
        ),
        (None, None) => None,
    };

    if let Some(key_pair) = key_pair {
        let ok = session
            .authenticate_publickey(user, Arc::new(key_pair))
            .await
            .map_err(|e| Error::Connection(format!("ssh public key auth: {}", e)))?;
        if ok {
            return Ok(true);
        }
        debug!(user = %user, "public key rejected");
    }

    match &config.password {
        Some(password) => session
            .authenticate_password(user, password)
            .await
            .map_err(|e| Error::Connection(format!("ssh password auth: {}", e))),
        None => Ok(false),
    }
}

fn sftp_error(err: SftpError, path: &str) -> Error {
    match err {
        SftpError::Status(status) if matches!(status.status_code, StatusCode::NoSuchFile) => {
            Error::NotFound(path.to_string())
        }
        other => Error::Transport(format!("sftp {}: {}", path, other)),
    }
}

#[async_trait]
impl Backend for SftpBackend {
    fn name(&self) -> &str {
        "sftp"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<EntryInfo>> {
        let dir = self.remote_path(prefix);
        let read_dir = self
            .sftp
            .read_dir(dir.as_str())
            .await
            .map_err(|e| sftp_error(e, &dir))?;

        let base = prefix.trim_end_matches('/');
        let mut entries: Vec<EntryInfo> = read_dir
            .filter(|entry| !matches!(entry.file_name().as_str(), "." | ".."))
            .map(|entry| {
                let metadata = entry.metadata();
                let name = entry.file_name();
                EntryInfo {
                    path: if base.is_empty() {
                        name
                    } else {
                        format!("{}/{}", base, name)
                    },
                    size_bytes: metadata.size.unwrap_or(0),
                    modified_at: metadata
                        .mtime
                        .and_then(|t| chrono::DateTime::from_timestamp(i64::from(t), 0)),
                    is_dir: metadata.is_dir(),
                }
            })
            .collect();

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn get(&self, path: &str) -> Result<ByteReader> {
        let remote = self.remote_path(path);
        let file = self
            .sftp
            .open(remote.as_str())
            .await
            .map_err(|e| sftp_error(e, &remote))?;
        Ok(Box::pin(file))
    }

    async fn put(&self, path: &str, ttl: Option<Duration>, mut src: ByteReader) -> Result<()> {
        if let Some(ttl) = ttl {
            debug!(path = %path, ttl_secs = ttl.as_secs(), "sftp backend ignores ttl");
        }

        let remote = self.remote_path(path);
        self.ensure_parent(&remote).await?;
        let partial = partial_path(&remote);

        let uploaded = self.upload(&partial, &mut src).await;
        let bytes = match uploaded {
            Ok(bytes) => bytes,
            Err(e) => {
                if let Err(rm) = self.sftp.remove_file(partial.as_str()).await {
                    debug!(path = %partial, error = %rm, "partial upload not removed");
                }
                return Err(e);
            }
        };

        // SFTPv3 rename refuses to replace an existing file
        match self.sftp.remove_file(remote.as_str()).await {
            Ok(()) => {}
            Err(e) => match sftp_error(e, &remote) {
                Error::NotFound(_) => {}
                other => return Err(other),
            },
        }
        self.sftp
            .rename(partial.as_str(), remote.as_str())
            .await
            .map_err(|e| sftp_error(e, &remote))?;

        debug!(path = %remote, bytes, "file uploaded");
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        let remote = self.remote_path(path);
        self.sftp
            .remove_file(remote.as_str())
            .await
            .map_err(|e| sftp_error(e, &remote))
    }

    async fn close(&self) -> Result<()> {
        if let Err(e) = self.sftp.close().await {
            warn!(error = %e, "sftp session close failed");
        }
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await
            .map_err(|e| Error::Transport(format!("ssh disconnect: {}", e)))
    }
}
