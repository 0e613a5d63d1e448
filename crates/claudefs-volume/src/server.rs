//! Unix socket server wiring the registry to the plugin API.

use anyhow::Context;
use axum::Router;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::UnixListener;
use tracing::{info, warn};

use crate::api::PluginApi;
use crate::config::PluginConfig;
use crate::executor::CommandExecutor;
use crate::mount_table::{MountTable, PROC_SELF_MOUNTS};
use crate::registry::VolumeRegistry;
use crate::state::StateStore;

/// A recovered registry plus the socket it will be served on.
pub struct PluginServer {
    sock_path: PathBuf,
    registry: Arc<VolumeRegistry>,
}

impl PluginServer {
    /// Builds the registry from `config` and recovers it against the host
    /// mount table.
    pub async fn build(config: &PluginConfig, executor: CommandExecutor) -> anyhow::Result<Self> {
        let mounts = MountTable::load(Path::new(PROC_SELF_MOUNTS))
            .await
            .context("failed to read mount table")?;
        Self::build_with_mounts(config, executor, &mounts).await
    }

    /// Like [`PluginServer::build`], with an explicit mount table.
    pub async fn build_with_mounts(
        config: &PluginConfig,
        executor: CommandExecutor,
        mounts: &MountTable,
    ) -> anyhow::Result<Self> {
        let mut registry = VolumeRegistry::new(config.layout(), executor);

        if config.persistence_enabled() {
            let store = StateStore::open(&config.state_file)
                .await
                .with_context(|| format!("failed to open state file {}", config.state_file.display()))?;
            registry = registry.with_store(Arc::new(store));
        } else {
            warn!("no state file configured, volume state will not survive restarts");
        }

        let recovered = registry.recover(mounts).await?;
        info!(recovered, mount_base = %config.mount_base.display(), "volume registry ready");

        Ok(Self {
            sock_path: config.sock_path.clone(),
            registry: Arc::new(registry),
        })
    }

    /// The registry behind the endpoints.
    pub fn registry(&self) -> &Arc<VolumeRegistry> {
        &self.registry
    }

    /// Socket path passed to [`bind_socket`] by `run`.
    pub fn sock_path(&self) -> &Path {
        &self.sock_path
    }

    /// Plugin routes bound to this server's registry.
    pub fn router(&self) -> Router {
        Arc::new(PluginApi::new(self.registry.clone())).router()
    }

    /// Serves until `shutdown` resolves, then removes the socket file.
    pub async fn run<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let router = self.router();
        let listener = bind_socket(&self.sock_path)?;
        info!("ClaudeFS volume plugin listening on {}", self.sock_path.display());

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await;

        if let Err(e) = std::fs::remove_file(&self.sock_path) {
            warn!(path = %self.sock_path.display(), error = %e, "failed to remove plugin socket");
        }
        served.context("plugin server failed")?;
        info!("ClaudeFS volume plugin stopped");
        Ok(())
    }
}

/// Binds `path`, replacing a stale socket left by a previous run.
pub fn bind_socket(path: &Path) -> anyhow::Result<UnixListener> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create socket directory {}", parent.display()))?;
    }
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove stale socket {}", path.display()))?;
    }
    UnixListener::bind(path).with_context(|| format!("failed to bind {}", path.display()))
}

/// Resolves on ctrl-c or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown requested");
}
