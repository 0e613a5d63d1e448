//! Durable record of created volumes.
//!
//! The state file lets a restarted plugin remember which datastores it created
//! and which it had mounted. Every successful mutating registry operation
//! rewrites the file; writes go to a sibling temporary file first and are then
//! renamed over the target so a crash never leaves a torn file behind.
//!
//! # File format
//!
//! ```text
//! {
//!   "version": 1,
//!   "volumes": [
//!     { "name": "v1", "backing_path": "nfs:router:v1",
//!       "mounted_path": "/run/claudefs-docker-volumes/v1",
//!       "size_bytes": 10737418240, "mounted": false }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::volume::Volume;

/// Current on-disk format version.
pub const STATE_FORMAT_VERSION: u32 = 1;

/// Errors reading or writing the state file.
#[derive(Debug, Error)]
pub enum StateError {
    /// Reading, writing or renaming the file failed.
    #[error("state file I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid state JSON.
    #[error("state file {path} is malformed: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Serializing the records failed.
    #[error("state file encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// Written by an incompatible plugin version.
    #[error("state file {path} has unsupported version {found} (expected {expected})")]
    UnsupportedVersion {
        path: String,
        found: u32,
        expected: u32,
    },
}

/// Persisted view of one created volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRecord {
    /// Volume name.
    pub name: String,
    /// NFS export at the time of the write.
    pub backing_path: String,
    /// Mount point at the time of the write.
    pub mounted_path: PathBuf,
    /// Datastore size.
    pub size_bytes: u64,
    /// Last known mount state, rechecked against the host on recovery.
    pub mounted: bool,
}

impl From<&Volume> for VolumeRecord {
    fn from(v: &Volume) -> Self {
        Self {
            name: v.name.clone(),
            backing_path: v.backing_path.clone(),
            mounted_path: v.mounted_path.clone(),
            size_bytes: v.size_bytes,
            mounted: v.mounted,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct StateDocument {
    version: u32,
    #[serde(default)]
    volumes: Vec<VolumeRecord>,
}

/// Serialised writer for the state file.
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    records: Mutex<BTreeMap<String, VolumeRecord>>,
}

impl StateStore {
    /// Opens the store at `path`, loading existing records.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StateError> {
        let path = path.into();
        let records = load_records(&path).await?;
        debug!(path = %path.display(), count = records.len(), "loaded volume state");
        Ok(Self {
            path,
            records: Mutex::new(records.into_iter().map(|r| (r.name.clone(), r)).collect()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of all records, sorted by name.
    pub async fn records(&self) -> Vec<VolumeRecord> {
        self.records.lock().await.values().cloned().collect()
    }

    /// Inserts or replaces the record for `volume` and rewrites the file.
    pub async fn upsert(&self, volume: &Volume) -> Result<(), StateError> {
        let mut records = self.records.lock().await;
        records.insert(volume.name.clone(), VolumeRecord::from(volume));
        self.write(&records).await
    }

    /// Drops the record for `name` and rewrites the file.
    pub async fn delete(&self, name: &str) -> Result<(), StateError> {
        let mut records = self.records.lock().await;
        if records.remove(name).is_none() {
            return Ok(());
        }
        self.write(&records).await
    }

    /// Replaces every record at once, used after startup reconciliation.
    pub async fn replace_all(&self, volumes: &[Volume]) -> Result<(), StateError> {
        let mut records = self.records.lock().await;
        *records = volumes
            .iter()
            .filter(|v| v.created)
            .map(|v| (v.name.clone(), VolumeRecord::from(v)))
            .collect();
        self.write(&records).await
    }

    async fn write(&self, records: &BTreeMap<String, VolumeRecord>) -> Result<(), StateError> {
        let doc = StateDocument {
            version: STATE_FORMAT_VERSION,
            volumes: records.values().cloned().collect(),
        };
        let json = serde_json::to_vec_pretty(&doc)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| self.io_error(e))?;
            }
        }

        let tmp = tmp_path(&self.path);
        tokio::fs::write(&tmp, &json)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        debug!(path = %self.path.display(), count = doc.volumes.len(), "volume state synced");
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> StateError {
        StateError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

async fn load_records(path: &Path) -> Result<Vec<VolumeRecord>, StateError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StateError::Io {
                path: path.display().to_string(),
                source,
            })
        }
    };

    let doc: StateDocument = serde_json::from_slice(&bytes).map_err(|source| StateError::Decode {
        path: path.display().to_string(),
        source,
    })?;

    if doc.version != STATE_FORMAT_VERSION {
        return Err(StateError::UnsupportedVersion {
            path: path.display().to_string(),
            found: doc.version,
            expected: STATE_FORMAT_VERSION,
        });
    }
    Ok(doc.volumes)
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
