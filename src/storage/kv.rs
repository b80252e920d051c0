use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::Result;
use async_trait::async_trait;
use fs4::tokio::AsyncFileExt;
use serde_json::{Map, Value};
use tokio::{fs::File, io::AsyncWriteExt, sync::Mutex};
use tracing::{debug, warn};

const STORAGE_FILE: &str = "storage.json";
const LOCK_FILE: &str = "storage.lock";

/// Interface for the local key-value persistence the host is given. Mirrors the shape of
/// `chrome.storage.local`: string keys, JSON values, missing keys are not errors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn remove(&self, keys: &[String]) -> Result<()>;

    async fn keys(&self) -> Result<Vec<String>>;
}

/// The main realization of [KeyValueStore]. All keys live in one JSON object on disk that is
/// replaced atomically on every write.
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    /// The file lock only excludes other processes; writers inside this one queue here.
    writer: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(dir: PathBuf) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&dir)?;

        Ok(Self {
            path: dir.join(STORAGE_FILE),
            lock_path: dir.join(LOCK_FILE),
            writer: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_document(&self) -> Result<Map<String, Value>> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => Err(e)?,
        };
        if bytes.is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_slice::<Map<String, Value>>(&bytes) {
            Ok(document) => Ok(document),
            Err(e) => {
                // Keep the broken file around instead of overwriting it on the next write.
                let aside = self.path.with_extension("json.corrupt");
                warn!("Storage file {:?} is corrupted, moving it to {aside:?}: {e}", self.path);
                tokio::fs::rename(&self.path, &aside).await?;
                Ok(Map::new())
            }
        }
    }

    async fn write_document(&self, document: &Map<String, Value>) -> Result<()> {
        let temp = self.path.with_extension("json.tmp");
        let mut file = File::create(&temp).await?;
        file.write_all(&serde_json::to_vec(document)?).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, &self.path).await?;
        Ok(())
    }

    /// Read-modify-write of the whole document under an exclusive advisory lock, so that a
    /// second host instance can't interleave with us.
    async fn modify(&self, change: impl FnOnce(&mut Map<String, Value>) + Send) -> Result<()> {
        let _writer = self.writer.lock().await;
        let lock = File::options()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .await?;
        lock.lock_exclusive()?;

        let result = async {
            let mut document = self.read_document().await?;
            change(&mut document);
            self.write_document(&document).await
        }
        .await;

        lock.unlock_async().await?;
        result
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.read_document().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        debug!("Writing key {key}");
        self.modify(move |document| {
            document.insert(key.to_owned(), value);
        })
        .await
    }

    async fn remove(&self, keys: &[String]) -> Result<()> {
        debug!("Removing keys {keys:?}");
        self.modify(|document| {
            for key in keys {
                document.remove(key);
            }
        })
        .await
    }

    async fn keys(&self) -> Result<Vec<String>> {
        Ok(self.read_document().await?.keys().cloned().collect())
    }
}
