//! Error types for the ClaudeFS volume plugin

use thiserror::Error;

/// Lifecycle failures reported back to the container host.
///
/// The display message of each variant is what travels in the `Err` field of
/// a plugin response, so the host's operators see these strings verbatim.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VolumeError {
    /// No registry entry exists for the name.
    #[error("volume {name} not found")]
    NotFound { name: String },

    /// The datastore was never created, or the create command failed.
    #[error("volume {name} not created")]
    NotCreated { name: String },

    /// The mount or unmount command failed.
    #[error("volume {name} mount failed")]
    NotMounted { name: String },

    /// Unmount was requested for a volume that is not mounted.
    #[error("volume {name} not mounted, cannot unmount")]
    NotUnmounted { name: String },

    /// Remove was requested while the volume is mounted.
    #[error("volume {name} in use")]
    InUse { name: String },

    /// The remove command failed.
    #[error("volume {name} not removed")]
    NotRemoved { name: String },

    /// The name cannot be mapped to a directory under the mount base.
    #[error("invalid volume name {name:?}")]
    InvalidName { name: String },

    /// Local filesystem failure outside of the external commands.
    #[error("volume {name}: I/O error: {reason}")]
    Io { name: String, reason: String },
}

/// Result type alias for volume operations.
pub type Result<T> = std::result::Result<T, VolumeError>;
