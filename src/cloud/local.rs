//! File-backed cloud for local development.
//!
//! Holds the same resource model as [`MemoryCloud`] and writes a pretty JSON
//! snapshot after every successful mutation, so that successive CLI runs see
//! what earlier runs created. Mutations and their snapshot writes are
//! serialized, so the file on disk always reflects a completed mutation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cloud::{Cloud, CloudResource, CreateRequest, MemoryCloud};
use crate::error::CloudError;

/// Snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

/// On-disk snapshot.
#[derive(Debug, Serialize, Deserialize)]
struct CloudSnapshot {
    version: u32,
    updated_at: DateTime<Utc>,
    resources: Vec<CloudResource>,
}

/// Cloud persisted to a JSON file.
#[derive(Debug)]
pub struct LocalCloud {
    inner: MemoryCloud,
    path: PathBuf,
    /// Held across each mutate-and-persist pair.
    writes: Mutex<()>,
}

impl LocalCloud {
    /// Opens the snapshot at `path`, starting empty if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, CloudError> {
        let path = path.into();
        if !path.exists() {
            debug!("Cloud snapshot does not exist: {}", path.display());
            return Ok(Self {
                inner: MemoryCloud::new(),
                path,
                writes: Mutex::new(()),
            });
        }

        info!("Loading cloud snapshot from: {}", path.display());
        let content = fs::read_to_string(&path)
            .await
            .map_err(|e| CloudError::internal(format!("Failed to read cloud snapshot: {e}")))?;
        let snapshot: CloudSnapshot = serde_json::from_str(&content)
            .map_err(|e| CloudError::internal(format!("Failed to parse cloud snapshot: {e}")))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(CloudError::internal(format!(
                "Unsupported cloud snapshot version {}",
                snapshot.version
            )));
        }

        Ok(Self {
            inner: MemoryCloud::from_resources(snapshot.resources),
            path,
            writes: Mutex::new(()),
        })
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the current resources to disk atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub async fn persist(&self) -> Result<(), CloudError> {
        let _guard = self.writes.lock().await;
        self.write_snapshot().await
    }

    /// Callers hold `writes`.
    async fn write_snapshot(&self) -> Result<(), CloudError> {
        let io_err = |what: &str, e: std::io::Error| CloudError::internal(format!("{what}: {e}"));

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| io_err("Failed to create snapshot directory", e))?;
            }
        }

        let snapshot = CloudSnapshot {
            version: SNAPSHOT_VERSION,
            updated_at: Utc::now(),
            resources: self.inner.resources().await,
        };
        let content = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| CloudError::internal(format!("Failed to serialize cloud snapshot: {e}")))?;

        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(|e| io_err("Failed to create temp snapshot", e))?;
        file.write_all(content.as_bytes())
            .await
            .map_err(|e| io_err("Failed to write snapshot", e))?;
        file.sync_all()
            .await
            .map_err(|e| io_err("Failed to sync snapshot", e))?;
        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_err("Failed to rename snapshot", e));
        }

        debug!("Cloud snapshot saved to {}", self.path.display());
        Ok(())
    }
}

#[async_trait]
impl Cloud for LocalCloud {
    fn provider(&self) -> &'static str {
        "local"
    }

    async fn describe(&self, kind: &str, name: &str) -> Result<Option<CloudResource>, CloudError> {
        self.inner.describe(kind, name).await
    }

    async fn describe_id(&self, id: &str) -> Result<Option<CloudResource>, CloudError> {
        self.inner.describe_id(id).await
    }

    async fn list(&self, kind: &str) -> Result<Vec<CloudResource>, CloudError> {
        self.inner.list(kind).await
    }

    async fn create(&self, request: CreateRequest) -> Result<CloudResource, CloudError> {
        let _guard = self.writes.lock().await;
        let resource = self.inner.create(request).await?;
        self.write_snapshot().await?;
        Ok(resource)
    }

    async fn update(
        &self,
        id: &str,
        attributes: BTreeMap<String, serde_json::Value>,
    ) -> Result<CloudResource, CloudError> {
        let _guard = self.writes.lock().await;
        let resource = self.inner.update(id, attributes).await?;
        self.write_snapshot().await?;
        Ok(resource)
    }

    async fn tag(&self, id: &str, tags: BTreeMap<String, String>) -> Result<(), CloudError> {
        let _guard = self.writes.lock().await;
        self.inner.tag(id, tags).await?;
        self.write_snapshot().await
    }

    async fn delete(&self, id: &str) -> Result<(), CloudError> {
        let _guard = self.writes.lock().await;
        self.inner.delete(id).await?;
        self.write_snapshot().await
    }
}
