//! Plugin configuration file and defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::executor::{ClusterTool, DEFAULT_CLUSTER_TOOL, DEFAULT_CLUSTER_TOOL_PORT};
use crate::volume::{VolumeLayout, DEFAULT_VOLUME_SIZE_BYTES};

/// Runtime settings. Missing keys in a config file take the default.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfig {
    /// Unix socket Docker talks to.
    pub sock_path: PathBuf,
    /// Volume metadata file. Empty disables persistence.
    pub state_file: PathBuf,
    /// Address of the cluster I/O router, also the management tool target.
    pub cluster_address: String,
    /// NFS export server for datastore mounts.
    pub nfs_server: String,
    /// Base directory for volume mount points.
    pub mount_base: PathBuf,
    /// Cluster management tool binary.
    pub tool: String,
    /// Port passed to the management tool.
    pub tool_port: u16,
    /// Datastore size for new volumes.
    pub default_size_bytes: u64,
}

impl Default for PluginConfig {
    fn default() -> Self {
        Self {
            sock_path: PathBuf::from("/run/docker/plugins/claudefs.sock"),
            state_file: PathBuf::from("/var/lib/claudefs/volume-driver.json"),
            cluster_address: String::from("localhost"),
            nfs_server: String::from("localhost"),
            mount_base: PathBuf::from("/run/claudefs-docker-volumes"),
            tool: String::from(DEFAULT_CLUSTER_TOOL),
            tool_port: DEFAULT_CLUSTER_TOOL_PORT,
            default_size_bytes: DEFAULT_VOLUME_SIZE_BYTES,
        }
    }
}

impl PluginConfig {
    /// Loads a `.toml` or `.json` file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        match ext.to_lowercase().as_str() {
            "toml" => {
                let config: PluginConfig = toml::from_str(&contents)?;
                Ok(config)
            }
            "json" => {
                let config: PluginConfig = serde_json::from_str(&contents)?;
                Ok(config)
            }
            _ => anyhow::bail!("Unsupported config file extension: {}", ext),
        }
    }

    /// Volume naming rules for this deployment.
    pub fn layout(&self) -> VolumeLayout {
        VolumeLayout::new(&self.cluster_address, &self.nfs_server, &self.mount_base)
            .with_default_size(self.default_size_bytes)
    }

    /// Management tool invocation settings.
    pub fn cluster_tool(&self) -> ClusterTool {
        ClusterTool::new(&self.cluster_address)
            .with_program(&self.tool)
            .with_port(self.tool_port)
    }

    /// False when `state_file` is empty.
    pub fn persistence_enabled(&self) -> bool {
        !self.state_file.as_os_str().is_empty()
    }
}
