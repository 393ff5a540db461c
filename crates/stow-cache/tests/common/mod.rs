//! Shared helpers for stow-cache integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use stow_cache::{Backend, ByteReader, EntryInfo};
use stow_core::{Error, Result};
use tokio::io::AsyncReadExt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    List(String),
    Get(String),
    Put(String),
    Remove(String),
    Close,
}

#[derive(Default)]
struct State {
    objects: HashMap<String, Vec<u8>>,
    calls: Vec<Call>,
    failing_puts: HashSet<String>,
}

/// In-memory backend that records every call. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every put to `path` fail without reading the stream.
    pub fn fail_put(&self, path: impl Into<String>) {
        self.state.lock().unwrap().failing_puts.insert(path.into());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn puts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Put(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn close_count(&self) -> usize {
        self.calls().iter().filter(|c| **c == Call::Close).count()
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().objects.get(path).cloned()
    }

    pub fn boxed(&self) -> Box<dyn Backend> {
        Box::new(self.clone())
    }

    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn list(&self, prefix: &str) -> Result<Vec<EntryInfo>> {
        self.record(Call::List(prefix.to_string()));
        let state = self.state.lock().unwrap();
        let mut entries: Vec<EntryInfo> = state
            .objects
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, bytes)| EntryInfo {
                path: path.clone(),
                size_bytes: bytes.len() as u64,
                modified_at: None,
                is_dir: false,
            })
            .collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }

    async fn get(&self, path: &str) -> Result<ByteReader> {
        self.record(Call::Get(path.to_string()));
        let bytes = self
            .object(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))?;
        Ok(Box::pin(std::io::Cursor::new(bytes)))
    }

    async fn put(&self, path: &str, _ttl: Option<Duration>, mut src: ByteReader) -> Result<()> {
        self.record(Call::Put(path.to_string()));
        if self.state.lock().unwrap().failing_puts.contains(path) {
            return Err(Error::Transport(format!("injected failure for {}", path)));
        }

        let mut bytes = Vec::new();
        src.read_to_end(&mut bytes).await?;
        self.state
            .lock()
            .unwrap()
            .objects
            .insert(path.to_string(), bytes);
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<()> {
        self.record(Call::Remove(path.to_string()));
        self.state.lock().unwrap().objects.remove(path);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.record(Call::Close);
        Ok(())
    }
}

/// Relative path -> file contents (`None` for directories).
pub fn snapshot(root: &Path) -> BTreeMap<String, Option<Vec<u8>>> {
    fn walk(root: &Path, dir: &Path, out: &mut BTreeMap<String, Option<Vec<u8>>>) {
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            let rel = path.strip_prefix(root).unwrap().to_string_lossy().to_string();
            if path.is_dir() {
                out.insert(rel, None);
                walk(root, &path, out);
            } else {
                out.insert(rel, Some(fs::read(&path).unwrap()));
            }
        }
    }
    let mut out = BTreeMap::new();
    walk(root, root, &mut out);
    out
}

/// Populate a small dependency tree under `root/<mount>`.
pub fn write_mount(root: &Path, mount: &str) {
    let dir = root.join(mount);
    fs::create_dir_all(dir.join("left-pad/lib")).unwrap();
    fs::write(dir.join("left-pad/package.json"), br#"{"name":"left-pad"}"#).unwrap();
    fs::write(dir.join("left-pad/lib/index.js"), b"module.exports = pad;\n").unwrap();
    fs::write(dir.join(".lock"), format!("lock for {}", mount)).unwrap();
}
