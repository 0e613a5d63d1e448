//! Volume registry: the lifecycle state machine behind the plugin endpoints.
//!
//! Each volume moves `Absent → Created → Mounted → Created → Absent`. An entry
//! appears on the first Create for a name and disappears only after a
//! successful Remove while unmounted.
//!
//! # Locking
//!
//! Entries live in a [`DashMap`] keyed by name, each behind its own async
//! mutex. An operation holds the volume's mutex for the whole external
//! command, so two operations on one name never interleave, while commands
//! for different names run in parallel. Map shards are only locked for
//! lookups and inserts and are never held across an `.await`.
//!
//! Remove marks the slot dead before unlinking it from the map. Operations
//! that were already queued on the slot's mutex see the mark and treat the
//! name as absent.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::{Result, VolumeError};
use crate::executor::{CommandExecutor, VolumeOp};
use crate::mount_table::MountTable;
use crate::state::{StateError, StateStore, VolumeRecord};
use crate::volume::{validate_name, Volume, VolumeLayout};

/// The operations the plugin protocol exposes.
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Creates the cluster datastore. Idempotent once created.
    async fn create(&self, name: &str) -> Result<()>;
    /// Removes the datastore of an unmounted volume.
    async fn remove(&self, name: &str) -> Result<()>;
    /// Mounts the volume and returns its mount point.
    async fn mount(&self, name: &str) -> Result<PathBuf>;
    /// Unmounts a mounted volume.
    async fn unmount(&self, name: &str) -> Result<()>;
    /// Returns the mount point whether or not the volume is mounted.
    async fn path(&self, name: &str) -> Result<PathBuf>;
}

#[derive(Debug)]
struct Slot {
    volume: Volume,
    live: bool,
}

type SlotRef = Arc<Mutex<Slot>>;

/// In-memory authority on volume existence and mount state.
pub struct VolumeRegistry {
    layout: VolumeLayout,
    executor: CommandExecutor,
    volumes: DashMap<String, SlotRef>,
    store: Option<Arc<StateStore>>,
}

impl VolumeRegistry {
    /// Creates an empty registry without persistence.
    pub fn new(layout: VolumeLayout, executor: CommandExecutor) -> Self {
        Self {
            layout,
            executor,
            volumes: DashMap::new(),
            store: None,
        }
    }

    /// Persists every successful mutation to `store`.
    pub fn with_store(mut self, store: Arc<StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Naming rules used for new entries.
    pub fn layout(&self) -> &VolumeLayout {
        &self.layout
    }

    /// Rebuilds entries from the state store, trusting `mounts` over the
    /// persisted `mounted` flags. Returns the number of restored volumes.
    pub async fn recover(&self, mounts: &MountTable) -> std::result::Result<usize, StateError> {
        let Some(store) = self.store.clone() else {
            return Ok(0);
        };

        // The kernel reports resolved paths, so a symlinked base must be
        // resolved before matching mount targets.
        let resolved_base = match tokio::fs::canonicalize(self.layout.mount_base()).await {
            Ok(base) if base != self.layout.mount_base() => Some(base),
            _ => None,
        };

        let mut restored = Vec::new();
        for record in store.records().await {
            if let Err(e) = validate_name(&record.name) {
                error!(path = %store.path().display(), error = %e, "dropping stored volume with unusable name");
                continue;
            }
            let volume = self.reconcile(record, mounts, resolved_base.as_deref());
            info!(volume = %volume.name, state = ?volume.state(), "restored volume");
            self.volumes.insert(
                volume.name.clone(),
                Arc::new(Mutex::new(Slot {
                    volume: volume.clone(),
                    live: true,
                })),
            );
            restored.push(volume);
        }

        store.replace_all(&restored).await?;
        info!(count = restored.len(), path = %store.path().display(), "recovered volume registry");
        Ok(restored.len())
    }

    fn reconcile(&self, record: VolumeRecord, mounts: &MountTable, resolved_base: Option<&Path>) -> Volume {
        let mut volume = self.layout.volume(&record.name);
        volume.size_bytes = record.size_bytes;
        volume.created = true;

        if record.backing_path != volume.backing_path || record.mounted_path != volume.mounted_path {
            warn!(
                volume = %record.name,
                stored_backing = %record.backing_path,
                stored_mount = %record.mounted_path.display(),
                backing = %volume.backing_path,
                mount = %volume.mounted_path.display(),
                "stored paths differ from current configuration, using current"
            );
        }

        let entry = mounts.find(&volume.mounted_path).or_else(|| {
            resolved_base.and_then(|base| mounts.find(&base.join(&volume.name)))
        });
        if let Some(entry) = entry {
            if entry.source != volume.backing_path {
                warn!(
                    volume = %record.name,
                    source = %entry.source,
                    backing = %volume.backing_path,
                    "mount point is attached to a different export"
                );
            }
        }

        volume.mounted = entry.is_some();
        if volume.mounted != record.mounted {
            warn!(
                volume = %record.name,
                recorded = record.mounted,
                actual = volume.mounted,
                "mount state changed while the plugin was down"
            );
        }
        volume
    }

    /// Snapshot of one entry.
    pub async fn get(&self, name: &str) -> Option<Volume> {
        let slot = self.slot(name)?;
        let guard = slot.lock().await;
        guard.live.then(|| guard.volume.clone())
    }

    /// Snapshots of all entries, sorted by name.
    ///
    /// Each entry is read under its own lock, so the result is not a single
    /// point-in-time view when other operations run concurrently.
    pub async fn list(&self) -> Vec<Volume> {
        let slots: Vec<SlotRef> = self.volumes.iter().map(|e| Arc::clone(e.value())).collect();
        let mut out = Vec::with_capacity(slots.len());
        for slot in slots {
            let guard = slot.lock().await;
            if guard.live {
                out.push(guard.volume.clone());
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Number of entries, including volumes whose create failed.
    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    /// True when no entries exist.
    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    fn slot(&self, name: &str) -> Option<SlotRef> {
        self.volumes.get(name).map(|e| Arc::clone(e.value()))
    }

    fn slot_or_insert(&self, name: &str) -> SlotRef {
        let entry = self.volumes.entry(name.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Slot {
                volume: self.layout.volume(name),
                live: true,
            }))
        });
        Arc::clone(entry.value())
    }

    async fn persist(&self, volume: &Volume) {
        if let Some(store) = &self.store {
            if let Err(e) = store.upsert(volume).await {
                error!(volume = %volume.name, error = %e, "failed to sync volume state");
            }
        }
    }

    async fn forget(&self, name: &str) {
        if let Some(store) = &self.store {
            if let Err(e) = store.delete(name).await {
                error!(volume = %name, error = %e, "failed to sync volume state");
            }
        }
    }

    async fn ensure_mount_dir(volume: &Volume) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&volume.mounted_path).await
    }
}

fn not_found(name: &str) -> VolumeError {
    VolumeError::NotFound {
        name: name.to_string(),
    }
}

#[async_trait]
impl VolumeDriver for VolumeRegistry {
    async fn create(&self, name: &str) -> Result<()> {
        validate_name(name)?;

        loop {
            let slot = self.slot_or_insert(name);
            let mut guard = slot.lock().await;
            if !guard.live {
                // Removed while we waited; the map no longer holds this slot.
                continue;
            }
            if guard.volume.created {
                return Ok(());
            }

            if !self.executor.execute(VolumeOp::Create, &guard.volume).await {
                return Err(VolumeError::NotCreated {
                    name: name.to_string(),
                });
            }

            guard.volume.created = true;
            info!(volume = %name, size_bytes = guard.volume.size_bytes, "volume created");
            self.persist(&guard.volume).await;
            return Ok(());
        }
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let slot = self.slot(name).ok_or_else(|| not_found(name))?;
        let mut guard = slot.lock().await;
        if !guard.live {
            return Err(not_found(name));
        }
        if guard.volume.mounted {
            return Err(VolumeError::InUse {
                name: name.to_string(),
            });
        }

        if !self.executor.execute(VolumeOp::Remove, &guard.volume).await {
            return Err(VolumeError::NotRemoved {
                name: name.to_string(),
            });
        }

        // The stored record must be gone before the slot is unlinked.
        self.forget(name).await;
        guard.live = false;
        self.volumes.remove_if(name, |_, s| Arc::ptr_eq(s, &slot));
        info!(volume = %name, "volume removed");
        Ok(())
    }

    async fn mount(&self, name: &str) -> Result<PathBuf> {
        let slot = self.slot(name).ok_or_else(|| not_found(name))?;
        let mut guard = slot.lock().await;
        if !guard.live {
            return Err(not_found(name));
        }
        if guard.volume.mounted {
            return Ok(guard.volume.mounted_path.clone());
        }
        if !guard.volume.created {
            return Err(VolumeError::NotCreated {
                name: name.to_string(),
            });
        }

        if let Err(e) = Self::ensure_mount_dir(&guard.volume).await {
            warn!(volume = %name, path = %guard.volume.mounted_path.display(), error = %e, "cannot create mount point");
            return Err(VolumeError::NotMounted {
                name: name.to_string(),
            });
        }

        if !self.executor.execute(VolumeOp::Mount, &guard.volume).await {
            return Err(VolumeError::NotMounted {
                name: name.to_string(),
            });
        }

        guard.volume.mounted = true;
        info!(volume = %name, path = %guard.volume.mounted_path.display(), "volume mounted");
        self.persist(&guard.volume).await;
        Ok(guard.volume.mounted_path.clone())
    }

    async fn unmount(&self, name: &str) -> Result<()> {
        let slot = self.slot(name).ok_or_else(|| not_found(name))?;
        let mut guard = slot.lock().await;
        if !guard.live {
            return Err(not_found(name));
        }
        if !guard.volume.mounted {
            return Err(VolumeError::NotUnmounted {
                name: name.to_string(),
            });
        }

        if !self.executor.execute(VolumeOp::Unmount, &guard.volume).await {
            return Err(VolumeError::NotMounted {
                name: name.to_string(),
            });
        }

        guard.volume.mounted = false;
        info!(volume = %name, "volume unmounted");
        self.persist(&guard.volume).await;
        Ok(())
    }

    async fn path(&self, name: &str) -> Result<PathBuf> {
        let slot = self.slot(name).ok_or_else(|| not_found(name))?;
        let guard = slot.lock().await;
        if !guard.live {
            return Err(not_found(name));
        }

        Self::ensure_mount_dir(&guard.volume)
            .await
            .map_err(|e| VolumeError::Io {
                name: name.to_string(),
                reason: e.to_string(),
            })?;
        Ok(guard.volume.mounted_path.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{ClusterTool, RecordingRunner};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        base: PathBuf,
        runner: Arc<RecordingRunner>,
        registry: Arc<VolumeRegistry>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("volumes");
        let runner = Arc::new(RecordingRunner::new());
        let executor = CommandExecutor::new(ClusterTool::new("router1"), runner.clone());
        let registry = VolumeRegistry::new(VolumeLayout::new("router1", "nfs1", &base), executor);
        Fixture {
            _dir: dir,
            base,
            runner,
            registry: Arc::new(registry),
        }
    }

    #[tokio::test]
    async fn test_create_sets_created() {
        let f = fixture();
        f.registry.create("v1").await.unwrap();
        let vol = f.registry.get("v1").await.unwrap();
        assert!(vol.created);
        assert!(!vol.mounted);
        assert_eq!(f.runner.count_mentioning("create"), 1);
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let f = fixture();
        f.registry.create("v1").await.unwrap();
        f.registry.create("v1").await.unwrap();
        assert_eq!(f.runner.count_mentioning("create"), 1);
    }

    #[tokio::test]
    async fn test_create_failure_keeps_entry() {
        let f = fixture();
        f.runner.fail_on("create");
        let err = f.registry.create("v1").await.unwrap_err();
        assert_eq!(err, VolumeError::NotCreated { name: "v1".into() });

        let vol = f.registry.get("v1").await.unwrap();
        assert!(!vol.created);

        let err = f.registry.mount("v1").await.unwrap_err();
        assert_eq!(err, VolumeError::NotCreated { name: "v1".into() });

        f.runner.succeed_all();
        f.registry.create("v1").await.unwrap();
        assert_eq!(f.runner.count_mentioning("create"), 2);
    }

    #[tokio::test]
    async fn test_create_rejects_bad_name() {
        let f = fixture();
        let err = f.registry.create("../etc").await.unwrap_err();
        assert!(matches!(err, VolumeError::InvalidName { .. }));
        assert_eq!(f.runner.call_count(), 0);
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn test_mount_path_consistency() {
        let f = fixture();
        f.registry.create("v1").await.unwrap();
        let mounted = f.registry.mount("v1").await.unwrap();
        let path = f.registry.path("v1").await.unwrap();
        assert_eq!(mounted, f.base.join("v1"));
        assert_eq!(mounted, path);
        assert!(mounted.is_dir());
    }

    #[tokio::test]
    async fn test_mount_uses_backing_export() {
        let f = fixture();
        f.registry.create("v1").await.unwrap();
        f.registry.mount("v1").await.unwrap();
        let mount = f
            .runner
            .calls()
            .into_iter()
            .find(|c| c.program == "mount")
            .unwrap();
        assert!(mount.mentions("nfs1:router1:v1"));
        assert!(mount.mentions("nolock"));
    }

    #[tokio::test]
    async fn test_mount_twice_runs_command_once() {
        let f = fixture();
        f.registry.create("v1").await.unwrap();
        let a = f.registry.mount("v1").await.unwrap();
        let b = f.registry.mount("v1").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(f.runner.count_mentioning("mount"), 1);
    }

    #[tokio::test]
    async fn test_mount_unknown_runs_nothing() {
        let f = fixture();
        let err = f.registry.mount("ghost").await.unwrap_err();
        assert_eq!(err, VolumeError::NotFound { name: "ghost".into() });
        assert_eq!(f.runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_mount_failure_surfaces() {
        let f = fixture();
        f.registry.create("v1").await.unwrap();
        f.runner.fail_on("mount");
        let err = f.registry.mount("v1").await.unwrap_err();
        assert_eq!(err, VolumeError::NotMounted { name: "v1".into() });
        assert!(!f.registry.get("v1").await.unwrap().mounted);
    }

    #[tokio::test]
    async fn test_remove_while_mounted_is_in_use() {
        let f = fixture();
        f.registry.create("v1").await.unwrap();
        f.registry.mount("v1").await.unwrap();
        let err = f.registry.remove("v1").await.unwrap_err();
        assert_eq!(err, VolumeError::InUse { name: "v1".into() });
        let vol = f.registry.get("v1").await.unwrap();
        assert!(vol.created && vol.mounted);
        assert_eq!(f.runner.count_mentioning("remove"), 0);
    }

    #[tokio::test]
    async fn test_unmount_when_not_mounted() {
        let f = fixture();
        f.registry.create("v1").await.unwrap();
        let err = f.registry.unmount("v1").await.unwrap_err();
        assert_eq!(err, VolumeError::NotUnmounted { name: "v1".into() });
    }

    #[tokio::test]
    async fn test_unmount_failure_is_not_mounted() {
        let f = fixture();
        f.registry.create("v1").await.unwrap();
        f.registry.mount("v1").await.unwrap();
        f.runner.fail_on("umount");
        let err = f.registry.unmount("v1").await.unwrap_err();
        assert_eq!(err, VolumeError::NotMounted { name: "v1".into() });
        assert!(f.registry.get("v1").await.unwrap().mounted);
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let f = fixture();
        f.registry.create("v1").await.unwrap();
        f.registry.mount("v1").await.unwrap();
        f.registry.unmount("v1").await.unwrap();
        f.registry.remove("v1").await.unwrap();

        assert!(f.registry.get("v1").await.is_none());
        assert_eq!(
            f.registry.path("v1").await.unwrap_err(),
            VolumeError::NotFound { name: "v1".into() }
        );
        assert_eq!(
            f.registry.mount("v1").await.unwrap_err(),
            VolumeError::NotFound { name: "v1".into() }
        );
    }

    #[tokio::test]
    async fn test_remove_failure_retains_entry() {
        let f = fixture();
        f.registry.create("v1").await.unwrap();
        f.runner.fail_on("remove");
        let err = f.registry.remove("v1").await.unwrap_err();
        assert_eq!(err, VolumeError::NotRemoved { name: "v1".into() });
        assert!(f.registry.get("v1").await.is_some());
    }

    #[tokio::test]
    async fn test_path_before_mount_creates_dir() {
        let f = fixture();
        f.registry.create("v1").await.unwrap();
        let path = f.registry.path("v1").await.unwrap();
        assert!(path.is_dir());
        assert!(!f.registry.get("v1").await.unwrap().mounted);
    }

    #[tokio::test]
    async fn test_recreate_after_remove() {
        let f = fixture();
        f.registry.create("v1").await.unwrap();
        f.registry.remove("v1").await.unwrap();
        f.registry.create("v1").await.unwrap();
        assert!(f.registry.get("v1").await.unwrap().created);
        assert_eq!(f.runner.count_mentioning("create"), 2);
    }

    #[tokio::test]
    async fn test_concurrent_creates_distinct_names() {
        let f = fixture();
        f.runner.set_delay(Duration::from_millis(50));

        let (a, b) = tokio::join!(f.registry.create("a"), f.registry.create("b"));
        a.unwrap();
        b.unwrap();

        assert_eq!(f.runner.count_mentioning("a"), 1);
        assert_eq!(f.runner.count_mentioning("b"), 1);
        assert_eq!(f.registry.list().await.len(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_creates_same_name_run_once() {
        let f = fixture();
        f.runner.set_delay(Duration::from_millis(20));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = f.registry.clone();
            handles.push(tokio::spawn(async move { registry.create("shared").await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(f.runner.count_mentioning("create"), 1);
    }

    #[tokio::test]
    async fn test_remove_and_mount_race_never_mounts_removed() {
        let f = fixture();
        f.registry.create("v1").await.unwrap();
        f.runner.set_delay(Duration::from_millis(20));

        let (removed, mounted) = tokio::join!(f.registry.remove("v1"), f.registry.mount("v1"));
        match (removed, mounted) {
            (Ok(()), Err(VolumeError::NotFound { .. })) => {
                assert!(f.registry.get("v1").await.is_none());
            }
            (Err(VolumeError::InUse { .. }), Ok(_)) => {
                assert!(f.registry.get("v1").await.unwrap().mounted);
            }
            other => panic!("unexpected interleaving: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_sorted() {
        let f = fixture();
        for name in ["c", "a", "b"] {
            f.registry.create(name).await.unwrap();
        }
        let names: Vec<_> = f.registry.list().await.into_iter().map(|v| v.name).collect();
        assert_eq!(names, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_mutations_sync_store() {
        let f = fixture();
        let state = f.base.with_file_name("state.json");
        let store = Arc::new(StateStore::open(&state).await.unwrap());
        let executor = CommandExecutor::new(ClusterTool::new("router1"), f.runner.clone());
        let registry = VolumeRegistry::new(VolumeLayout::new("router1", "nfs1", &f.base), executor)
            .with_store(store.clone());

        registry.create("v1").await.unwrap();
        registry.create("v2").await.unwrap();
        registry.mount("v1").await.unwrap();
        registry.remove("v2").await.unwrap();

        let records = StateStore::open(&state).await.unwrap().records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "v1");
        assert!(records[0].mounted);
    }

    #[tokio::test]
    async fn test_failed_create_not_persisted() {
        let f = fixture();
        let state = f.base.with_file_name("state.json");
        let store = Arc::new(StateStore::open(&state).await.unwrap());
        let executor = CommandExecutor::new(ClusterTool::new("router1"), f.runner.clone());
        let registry = VolumeRegistry::new(VolumeLayout::new("router1", "nfs1", &f.base), executor)
            .with_store(store.clone());

        f.runner.fail_on("create");
        assert!(registry.create("v1").await.is_err());
        assert!(store.records().await.is_empty());
    }

    #[tokio::test]
    async fn test_recover_reconciles_with_mount_table() {
        let f = fixture();
        let state = f.base.with_file_name("state.json");
        let layout = VolumeLayout::new("router1", "nfs1", &f.base);

        {
            let store = Arc::new(StateStore::open(&state).await.unwrap());
            let mut stale = layout.volume("stale");
            stale.created = true;
            stale.mounted = true;
            let mut live = layout.volume("live");
            live.created = true;
            store.upsert(&stale).await.unwrap();
            store.upsert(&live).await.unwrap();
        }

        let mounts = MountTable::parse(&format!(
            "nfs1:router1:live {} nfs rw,nolock 0 0\n",
            f.base.join("live").display()
        ));

        let store = Arc::new(StateStore::open(&state).await.unwrap());
        let executor = CommandExecutor::new(ClusterTool::new("router1"), f.runner.clone());
        let registry = VolumeRegistry::new(layout, executor).with_store(store.clone());
        assert_eq!(registry.recover(&mounts).await.unwrap(), 2);

        let stale = registry.get("stale").await.unwrap();
        assert!(stale.created && !stale.mounted);
        let live = registry.get("live").await.unwrap();
        assert!(live.created && live.mounted);

        let persisted = StateStore::open(&state).await.unwrap().records().await;
        assert!(persisted.iter().all(|r| r.mounted == (r.name == "live")));

        // Recovered volumes answer without re-running create.
        registry.create("live").await.unwrap();
        assert_eq!(f.runner.call_count(), 0);
    }

    #[tokio::test]
    async fn test_recover_drops_names_outside_mount_base() {
        let f = fixture();
        let state = f.base.with_file_name("state.json");
        let layout = VolumeLayout::new("router1", "nfs1", &f.base);
        let mut good = layout.volume("good");
        good.created = true;
        let mut escaped = layout.volume("../escaped");
        escaped.created = true;
        let doc = serde_json::json!({
            "version": 1,
            "volumes": [VolumeRecord::from(&good), VolumeRecord::from(&escaped)],
        });
        std::fs::write(&state, serde_json::to_vec(&doc).unwrap()).unwrap();

        let store = Arc::new(StateStore::open(&state).await.unwrap());
        let executor = CommandExecutor::new(ClusterTool::new("router1"), f.runner.clone());
        let registry = VolumeRegistry::new(layout, executor).with_store(store);
        assert_eq!(registry.recover(&MountTable::default()).await.unwrap(), 1);

        assert_eq!(
            registry.path("../escaped").await.unwrap_err(),
            VolumeError::NotFound { name: "../escaped".into() }
        );
        assert!(!f.base.with_file_name("escaped").exists());

        let persisted = StateStore::open(&state).await.unwrap().records().await;
        let names: Vec<_> = persisted.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["good"]);
    }

    #[tokio::test]
    async fn test_recover_matches_mounts_under_symlinked_base() {
        let f = fixture();
        let real = f.base.with_file_name("real-volumes");
        std::fs::create_dir_all(&real).unwrap();
        std::os::unix::fs::symlink(&real, &f.base).unwrap();

        let state = f.base.with_file_name("state.json");
        let layout = VolumeLayout::new("router1", "nfs1", &f.base);
        {
            let store = StateStore::open(&state).await.unwrap();
            let mut vol = layout.volume("v1");
            vol.created = true;
            vol.mounted = true;
            store.upsert(&vol).await.unwrap();
        }

        let real = std::fs::canonicalize(&real).unwrap();
        let mounts = MountTable::parse(&format!(
            "nfs1:router1:v1 {} nfs rw,nolock 0 0\n",
            real.join("v1").display()
        ));
        let store = Arc::new(StateStore::open(&state).await.unwrap());
        let executor = CommandExecutor::new(ClusterTool::new("router1"), f.runner.clone());
        let registry = VolumeRegistry::new(layout, executor).with_store(store);
        registry.recover(&mounts).await.unwrap();

        assert!(registry.get("v1").await.unwrap().mounted);
        assert_eq!(
            registry.remove("v1").await.unwrap_err(),
            VolumeError::InUse { name: "v1".into() }
        );
    }

    #[tokio::test]
    async fn test_mount_fails_when_mount_dir_cannot_be_created() {
        let f = fixture();
        std::fs::write(&f.base, b"not a directory").unwrap();
        f.registry.create("v1").await.unwrap();

        let err = f.registry.mount("v1").await.unwrap_err();
        assert_eq!(err, VolumeError::NotMounted { name: "v1".into() });
        assert_eq!(f.runner.count_mentioning("mount"), 0);
        assert!(!f.registry.get("v1").await.unwrap().mounted);
    }

    #[tokio::test]
    async fn test_path_reports_io_when_mount_dir_cannot_be_created() {
        let f = fixture();
        std::fs::write(&f.base, b"not a directory").unwrap();
        f.registry.create("v1").await.unwrap();

        let err = f.registry.path("v1").await.unwrap_err();
        assert!(matches!(err, VolumeError::Io { ref name, .. } if name == "v1"), "{err:?}");
    }

    #[tokio::test]
    async fn test_recreate_after_remove_stays_persisted() {
        let f = fixture();
        let state = f.base.with_file_name("state.json");
        let store = Arc::new(StateStore::open(&state).await.unwrap());
        let executor = CommandExecutor::new(ClusterTool::new("router1"), f.runner.clone());
        let registry = Arc::new(
            VolumeRegistry::new(VolumeLayout::new("router1", "nfs1", &f.base), executor)
                .with_store(store),
        );
        registry.create("v1").await.unwrap();
        f.runner.set_delay(Duration::from_millis(10));

        let (removed, created) = tokio::join!(registry.remove("v1"), registry.create("v1"));
        removed.unwrap();
        created.unwrap();

        let in_memory = registry.get("v1").await.unwrap();
        let persisted = StateStore::open(&state).await.unwrap().records().await;
        assert!(in_memory.created);
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].name, "v1");
    }

    #[tokio::test]
    async fn test_recover_without_store_is_noop() {
        let f = fixture();
        assert_eq!(f.registry.recover(&MountTable::default()).await.unwrap(), 0);
    }
}
