//! Bounded, persisted response cache.
//!
//! Entries are grouped by caller identity. Each caller keeps at most
//! [`MAX_ENTRIES_PER_KEY`] recent replies, oldest evicted first. The whole
//! store is written back to the configured file after every [`ResponseCache::set`].

use crate::error::LmError;
use crate::types::ChatMessage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

/// Entries kept per caller key.
pub const MAX_ENTRIES_PER_KEY: usize = 3;

/// One cached reply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    /// Fingerprint of the caller key and message sequence
    pub msg_key: String,
    pub value: serde_json::Value,
}

type CacheStore = BTreeMap<String, Vec<CacheEntry>>;

#[derive(Debug, Default)]
struct CacheState {
    path: Option<PathBuf>,
    loaded: bool,
    store: CacheStore,
}

/// Response cache shared by all invocations of a session.
///
/// All state sits behind one async mutex: the lazy load, lookups and
/// mutate-then-flush sequences never interleave within a process.
#[derive(Debug, Default)]
pub struct ResponseCache {
    state: Mutex<CacheState>,
}

impl ResponseCache {
    /// Create a cache that never touches the filesystem
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Create a cache backed by `path`. Nothing is read until first use.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self {
            state: Mutex::new(CacheState {
                path: Some(path.into()),
                loaded: false,
                store: CacheStore::new(),
            }),
        }
    }

    /// Point the cache at a new backing file.
    ///
    /// In-memory entries are dropped; the next access reloads from `path`.
    pub async fn configure(&self, path: impl Into<PathBuf>) {
        let mut state = self.state.lock().await;
        state.path = Some(path.into());
        state.loaded = false;
        state.store.clear();
    }

    /// Fingerprint identifying a caller key plus message sequence.
    pub fn fingerprint(caller_key: &str, messages: &[ChatMessage]) -> String {
        let parts = messages
            .iter()
            .map(|m| format!("{}:{}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("|");
        format!("{}->{}", caller_key, parts)
    }

    /// Look up a cached reply
    pub async fn get(
        &self,
        caller_key: &str,
        messages: &[ChatMessage],
    ) -> Option<serde_json::Value> {
        let mut state = self.state.lock().await;
        state.ensure_loaded().await;

        let msg_key = Self::fingerprint(caller_key, messages);
        state
            .store
            .get(caller_key)?
            .iter()
            .find(|entry| entry.msg_key == msg_key)
            .map(|entry| entry.value.clone())
    }

    /// Store a reply as the most recent entry of `caller_key` and flush.
    ///
    /// The in-memory update always happens; an error is only returned when
    /// writing the backing file fails.
    pub async fn set(
        &self,
        caller_key: &str,
        messages: &[ChatMessage],
        value: serde_json::Value,
    ) -> Result<(), LmError> {
        let mut state = self.state.lock().await;
        state.ensure_loaded().await;

        let msg_key = Self::fingerprint(caller_key, messages);
        let entries = state.store.entry(caller_key.to_string()).or_default();
        entries.retain(|entry| entry.msg_key != msg_key);
        entries.push(CacheEntry { msg_key, value });
        while entries.len() > MAX_ENTRIES_PER_KEY {
            entries.remove(0);
        }

        state.flush().await
    }

    /// Number of entries held for `caller_key`
    pub async fn len_for(&self, caller_key: &str) -> usize {
        let mut state = self.state.lock().await;
        state.ensure_loaded().await;
        state.store.get(caller_key).map_or(0, Vec::len)
    }
}

impl CacheState {
    async fn ensure_loaded(&mut self) {
        if self.loaded {
            return;
        }
        self.store = match &self.path {
            Some(path) => load_store(path).await,
            None => CacheStore::new(),
        };
        self.loaded = true;
    }

    async fn flush(&self) -> Result<(), LmError> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let text = serde_json::to_string_pretty(&self.store)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, text).await?;
        Ok(())
    }
}

async fn load_store(path: &Path) -> CacheStore {
    let text = match tokio::fs::read_to_string(path).await {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("cache file {} not found, starting empty", path.display());
            return CacheStore::new();
        }
        Err(e) => {
            tracing::warn!("failed to read cache file {}: {}", path.display(), e);
            return CacheStore::new();
        }
    };

    match serde_json::from_str(&text) {
        Ok(store) => store,
        Err(e) => {
            tracing::warn!("ignoring malformed cache file {}: {}", path.display(), e);
            CacheStore::new()
        }
    }
}
