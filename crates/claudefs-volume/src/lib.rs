#![warn(missing_docs)]

//! ClaudeFS volume plugin: Docker volume driver, datastore lifecycle, NFS mounts
//!
//! The container host talks to this plugin over a unix socket using the Docker
//! volume plugin protocol. Each request lands in the [`VolumeRegistry`], which
//! drives the cluster management tool and the host's `mount`/`umount` binaries
//! and keeps an on-disk record of created volumes for restarts.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod mount_table;
pub mod registry;
pub mod server;
pub mod state;
pub mod volume;

pub use api::{Endpoint, NameOp, Operation, PathOp, PluginApi, PluginRequest, PluginResponse};
pub use config::PluginConfig;
pub use error::{Result, VolumeError};
pub use executor::{ClusterTool, CommandExecutor, CommandRunner, CommandSpec, ProcessRunner, RecordingRunner, VolumeOp};
pub use mount_table::MountTable;
pub use registry::{VolumeDriver, VolumeRegistry};
pub use server::PluginServer;
pub use state::{StateError, StateStore, VolumeRecord};
pub use volume::{Volume, VolumeLayout, VolumeState};
