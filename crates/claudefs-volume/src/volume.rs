//! Volume records and the naming rules that tie them to the cluster.
//!
//! A volume's backing export and local mount point are never stored as
//! independent facts: both are derived from the volume name, the cluster
//! router host, the NFS export server and the configured mount base. Existing
//! cluster tooling relies on these exact shapes.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, VolumeError};

/// Default datastore size in bytes (10 GiB).
pub const DEFAULT_VOLUME_SIZE_BYTES: u64 = 10 * 1024 * 1024 * 1024;

/// One user-visible volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Docker volume name, unique within the registry.
    pub name: String,
    /// NFS export on the cluster: `<nfs_server>:<router_host>:<name>`.
    pub backing_path: String,
    /// Local mount point: `<mount_base>/<name>`.
    pub mounted_path: PathBuf,
    /// Datastore size requested at creation.
    pub size_bytes: u64,
    /// Cluster-side datastore exists.
    pub created: bool,
    /// Mounted on this host.
    pub mounted: bool,
}

impl Volume {
    /// Lifecycle state derived from the flags.
    pub fn state(&self) -> VolumeState {
        match (self.created, self.mounted) {
            (true, true) => VolumeState::Mounted,
            (true, false) => VolumeState::Created,
            _ => VolumeState::Pending,
        }
    }
}

/// Coarse lifecycle position of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolumeState {
    /// Entry exists but the datastore create has not succeeded.
    Pending,
    /// Datastore exists, not mounted locally.
    Created,
    /// Datastore exists and is mounted locally.
    Mounted,
}

/// Derives volume paths from cluster addressing and the local mount base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeLayout {
    router_host: String,
    nfs_server: String,
    mount_base: PathBuf,
    default_size_bytes: u64,
}

impl VolumeLayout {
    /// Layout with the default volume size.
    pub fn new(
        router_host: impl Into<String>,
        nfs_server: impl Into<String>,
        mount_base: impl Into<PathBuf>,
    ) -> Self {
        Self {
            router_host: router_host.into(),
            nfs_server: nfs_server.into(),
            mount_base: mount_base.into(),
            default_size_bytes: DEFAULT_VOLUME_SIZE_BYTES,
        }
    }

    /// Overrides the size assigned to newly created volumes.
    pub fn with_default_size(mut self, size_bytes: u64) -> Self {
        self.default_size_bytes = size_bytes;
        self
    }

    pub fn router_host(&self) -> &str {
        &self.router_host
    }

    pub fn nfs_server(&self) -> &str {
        &self.nfs_server
    }

    pub fn mount_base(&self) -> &Path {
        &self.mount_base
    }

    pub fn default_size_bytes(&self) -> u64 {
        self.default_size_bytes
    }

    /// `<nfs_server>:<router_host>:<name>`
    pub fn backing_path(&self, name: &str) -> String {
        format!("{}:{}:{}", self.nfs_server, self.router_host, name)
    }

    /// `<mount_base>/<name>`
    pub fn mount_point(&self, name: &str) -> PathBuf {
        self.mount_base.join(name)
    }

    /// Builds a fresh, not yet created entry for `name`.
    pub fn volume(&self, name: &str) -> Volume {
        Volume {
            name: name.to_string(),
            backing_path: self.backing_path(name),
            mounted_path: self.mount_point(name),
            size_bytes: self.default_size_bytes,
            created: false,
            mounted: false,
        }
    }
}

/// Rejects names that would not resolve to a direct child of the mount base.
pub fn validate_name(name: &str) -> Result<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\0');
    if bad {
        return Err(VolumeError::InvalidName {
            name: name.to_string(),
        });
    }
    Ok(())
}
