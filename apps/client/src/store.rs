//! Durable client storage: small JSON documents addressed by key.
//!
//! Keys in use: `auth_token`, `user`, and `tracker:{session}` for the
//! persisted generation state.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;

use crate::errors::StoreError;

pub const AUTH_TOKEN_KEY: &str = "auth_token";
pub const USER_KEY: &str = "user";

pub fn tracker_key(session_id: &str) -> String {
    format!("tracker:{session_id}")
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError>;
    async fn save(&self, key: &str, value: &Value) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Loads and deserializes a document. Missing keys yield `None`.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn StateStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.load(key).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

pub async fn save_json<T: Serialize>(
    store: &dyn StateStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let value = serde_json::to_value(value)?;
    store.save(key, &value).await
}

// ────────────────────────────────────────────────────────────────────────────
// FileStore
// ────────────────────────────────────────────────────────────────────────────

/// One JSON file per key under a directory. Writes go through a temp file
/// in the same directory and are renamed into place.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Percent-encodes every byte outside `[A-Za-z0-9_-]`, so distinct keys
    /// never share a file.
    fn path_for(&self, key: &str) -> PathBuf {
        let mut file_name = String::with_capacity(key.len());
        for byte in key.bytes() {
            if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
                file_name.push(char::from(byte));
            } else {
                file_name.push_str(&format!("%{byte:02X}"));
            }
        }
        self.dir.join(format!("{file_name}.json"))
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let bytes = serde_json::to_vec_pretty(value)?;
        let dir = self.dir.clone();
        let path = self.path_for(key);

        tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut tmp = NamedTempFile::new_in(&dir)?;
            tmp.write_all(&bytes)?;
            tmp.as_file().sync_all()?;
            tmp.persist(&path)?;
            Ok(())
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// MemoryStore
// ────────────────────────────────────────────────────────────────────────────

/// In-process store, used for ephemeral sessions and tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn save(&self, key: &str, value: &Value) -> Result<(), StoreError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_file_store_round_trips_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("state"));

        assert!(store.load("tracker:default").await.unwrap().is_none());

        store
            .save("tracker:default", &json!({ "job_id": "abc" }))
            .await
            .unwrap();
        let loaded = store.load("tracker:default").await.unwrap();
        assert_eq!(loaded, Some(json!({ "job_id": "abc" })));
        assert!(dir.path().join("state/tracker%3Adefault.json").exists());

        store.remove("tracker:default").await.unwrap();
        assert!(store.load("tracker:default").await.unwrap().is_none());
        // Removing twice is fine
        store.remove("tracker:default").await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_overwrites_existing_document() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());

        store.save(AUTH_TOKEN_KEY, &json!("first")).await.unwrap();
        store.save(AUTH_TOKEN_KEY, &json!("second")).await.unwrap();

        let token: Option<String> = load_json(&store, AUTH_TOKEN_KEY).await.unwrap();
        assert_eq!(token.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_file_store_keeps_similar_keys_apart() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path());
        store.save("tracker:a", &json!(1)).await.unwrap();
        store.save("tracker_a", &json!(2)).await.unwrap();
        store.save("tracker/a", &json!(3)).await.unwrap();

        assert_eq!(store.load("tracker:a").await.unwrap(), Some(json!(1)));
        assert_eq!(store.load("tracker_a").await.unwrap(), Some(json!(2)));
        assert_eq!(store.load("tracker/a").await.unwrap(), Some(json!(3)));
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_document() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("user.json"), b"{not json").unwrap();
        let store = FileStore::new(dir.path());

        assert!(matches!(
            store.load(USER_KEY).await,
            Err(StoreError::Serde(_))
        ));
    }

    #[tokio::test]
    async fn test_memory_store_typed_helpers() {
        let store = MemoryStore::new();
        save_json(&store, "k", &vec![1, 2, 3]).await.unwrap();
        let loaded: Option<Vec<u32>> = load_json(&store, "k").await.unwrap();
        assert_eq!(loaded, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_tracker_key_is_session_scoped() {
        assert_eq!(tracker_key("abc"), "tracker:abc");
    }
}
