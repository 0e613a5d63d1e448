//! Command-line interface for `cfs-volume`.

use crate::config::PluginConfig;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for `cfs-volume`.
#[derive(Parser, Debug, Default)]
#[command(name = "cfs-volume")]
#[command(about = "ClaudeFS Docker volume plugin", long_about = None)]
pub struct Cli {
    /// Config file (.toml or .json). Flags override its values.
    #[arg(short, long, env = "CFS_VOLUME_CONFIG")]
    pub config: Option<PathBuf>,

    /// Unix domain socket Docker talks to.
    #[arg(long = "sockpath", env = "CFS_VOLUME_SOCK")]
    pub sock_path: Option<PathBuf>,

    /// Volume driver metadata file.
    #[arg(long = "statefile", env = "CFS_VOLUME_STATE_FILE")]
    pub state_file: Option<PathBuf>,

    /// Address of the ClaudeFS I/O router.
    #[arg(long = "clusteraddress", env = "CFS_VOLUME_CLUSTER_ADDRESS")]
    pub cluster_address: Option<String>,

    /// NFS export server for datastore mounts.
    #[arg(long = "nfsserver", env = "CFS_VOLUME_NFS_SERVER")]
    pub nfs_server: Option<String>,

    /// Base path for volume mount points.
    #[arg(long = "mountbase", env = "CFS_VOLUME_MOUNT_BASE")]
    pub mount_base: Option<PathBuf>,

    /// Cluster management tool binary.
    #[arg(long, env = "CFS_VOLUME_TOOL")]
    pub tool: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub json_logs: bool,
}

impl Cli {
    /// Defaults, then the config file, then command-line overrides.
    pub fn resolve(&self) -> Result<PluginConfig> {
        let mut config = match &self.config {
            Some(path) => PluginConfig::from_file(path)?,
            None => PluginConfig::default(),
        };

        if let Some(v) = &self.sock_path {
            config.sock_path = v.clone();
        }
        if let Some(v) = &self.state_file {
            config.state_file = v.clone();
        }
        if let Some(v) = &self.cluster_address {
            config.cluster_address = v.clone();
        }
        if let Some(v) = &self.nfs_server {
            config.nfs_server = v.clone();
        }
        if let Some(v) = &self.mount_base {
            config.mount_base = v.clone();
        }
        if let Some(v) = &self.tool {
            config.tool = v.clone();
        }

        Ok(config)
    }
}
