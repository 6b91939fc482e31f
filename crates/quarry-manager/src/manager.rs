use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use quarry_config::QuarryConfig;
use quarry_core::{
    ArtifactKey, Console, IndexInfo, IndexKind, IndexRecord, IndexedArtifact, TracingConsole,
    UpdateCommand,
};
use quarry_index::record_for_file;
use quarry_scheduler::{CommandHandler, ProgressReceiver, SchedulerConfig, UpdateScheduler};

use crate::error::{ManagerError, Result};
use crate::events::IndexEventListener;
use crate::executor::{FetchSettings, UpdateExecutor};
use crate::registry::IndexRegistry;
use crate::search::{CompositeIndex, SearchType};

/// Name of the index mirroring the local artifact store.
pub const LOCAL_INDEX: &str = "local";
/// Name of the in-memory index of workspace artifacts.
pub const WORKSPACE_INDEX: &str = "workspace";

/// How long [`IndexManager::reconfigure_local_repository`] waits for the
/// cancelled update to wind down.
const RECONFIGURE_WAIT: Duration = Duration::from_secs(30);

/// The entry point other subsystems use: searches, lookups, update
/// scheduling and index registration.
pub struct IndexManager {
    registry: Arc<IndexRegistry>,
    composite: CompositeIndex,
    executor: Arc<UpdateExecutor>,
    scheduler: UpdateScheduler<UpdateCommand>,
    default_delay: Duration,
}

impl IndexManager {
    /// Opens the registry under the configured index directory and registers
    /// the local, workspace and remote indexes.
    pub fn open(config: &QuarryConfig) -> Result<Self> {
        Self::open_with_console(config, Arc::new(TracingConsole))
    }

    pub fn open_with_console(config: &QuarryConfig, console: Arc<dyn Console>) -> Result<Self> {
        let registry = Arc::new(IndexRegistry::open(config.index_dir()?)?);
        let manager = Self::new(
            registry,
            FetchSettings::from_config(config),
            console,
            config.update.debounce(),
        )?;

        manager.register(IndexInfo::local(LOCAL_INDEX, config.local_repository_dir()?), false)?;
        manager.register(IndexInfo::workspace(WORKSPACE_INDEX), false)?;

        let mut configured = BTreeSet::new();
        for remote in &config.remotes {
            let info = IndexInfo::remote(
                &remote.name,
                &remote.repository_url,
                remote.index_update_url.clone(),
            )
            .minimal(remote.minimal);
            configured.insert(remote.name.clone());
            manager.register(info, false)?;
        }
        for info in manager.registry.known() {
            if info.kind() == IndexKind::Remote && !configured.contains(info.name()) {
                manager.register(info, false)?;
            }
        }

        if config.update.update_on_startup {
            for info in manager.registry.all() {
                if info.kind() == IndexKind::Remote {
                    manager.schedule_update(info.name(), false, manager.default_delay)?;
                }
            }
        }

        tracing::info!(
            target = "quarry.manager",
            indexes = manager.registry.all().len(),
            root = ?manager.registry.root(),
            "index manager ready"
        );
        Ok(manager)
    }

    /// Wires a manager around an existing registry. Nothing is registered.
    pub fn new(
        registry: Arc<IndexRegistry>,
        settings: FetchSettings,
        console: Arc<dyn Console>,
        default_delay: Duration,
    ) -> Result<Self> {
        let executor = Arc::new(UpdateExecutor::new(&registry, settings));
        let handler: Arc<dyn CommandHandler<UpdateCommand>> = executor.clone();
        let scheduler = UpdateScheduler::new(SchedulerConfig::default(), handler)?
            .with_console(Arc::clone(&console));
        Ok(Self {
            composite: CompositeIndex::new(Arc::clone(&registry), console),
            registry,
            executor,
            scheduler,
            default_delay,
        })
    }

    pub fn registry(&self) -> &Arc<IndexRegistry> {
        &self.registry
    }

    pub fn composite(&self) -> &CompositeIndex {
        &self.composite
    }

    pub fn search(&self, search: SearchType, term: &str) -> BTreeMap<String, IndexedArtifact> {
        self.composite.search(search, term)
    }

    /// Looks `key` up with workspace indexes shadowing local ones, and local
    /// ones shadowing remote caches.
    pub fn find_artifact(&self, key: &ArtifactKey) -> Option<IndexRecord> {
        let priority = self.composite.default_priority();
        self.composite.find_artifact(key, priority.as_slice())
    }

    pub fn identify(&self, sha1: &str) -> Option<IndexRecord> {
        let priority = self.composite.default_priority();
        self.composite.identify(sha1, priority.as_slice())
    }

    /// Registers an index and queues the reindex a new local index needs.
    pub fn register(&self, info: IndexInfo, rebuild_if_missing: bool) -> Result<()> {
        let name = info.name().to_string();
        if self.registry.register(info, rebuild_if_missing)? {
            self.enqueue(UpdateCommand::Reindex { target: name }, self.default_delay);
        }
        Ok(())
    }

    pub fn unregister(&self, name: &str, delete_files: bool) -> Result<Option<IndexInfo>> {
        self.registry.unregister(name, delete_files)
    }

    pub fn subscribe(&self, listener: IndexEventListener) {
        self.registry.subscribe(listener);
    }

    /// Queues the update appropriate for `name`: a rescan for local indexes;
    /// for remote ones a full snapshot when forced or never populated, and
    /// an incremental fetch otherwise.
    pub fn schedule_update(&self, name: &str, force: bool, delay: Duration) -> Result<UpdateCommand> {
        let info = self
            .registry
            .info(name)
            .ok_or_else(|| ManagerError::unknown(name))?;
        let target = name.to_string();
        let command = match info.kind() {
            IndexKind::Local => UpdateCommand::Reindex { target },
            IndexKind::Remote if force || info.is_fresh => {
                UpdateCommand::UnpackSnapshot { target, force }
            }
            IndexKind::Remote => UpdateCommand::FetchDelta { target, force },
            IndexKind::Workspace => {
                return Err(ManagerError::NotUpdatable {
                    name: target,
                    reason: "workspace indexes are maintained by the host",
                })
            }
        };
        self.enqueue(command.clone(), delay);
        Ok(command)
    }

    pub fn enqueue(&self, command: UpdateCommand, delay: Duration) {
        self.scheduler.enqueue(command, delay);
    }

    /// Cancels the running update and drops queued ones. Returns how many
    /// queued commands were dropped.
    pub fn cancel_updates(&self) -> usize {
        self.scheduler.cancel()
    }

    pub fn is_idle(&self) -> bool {
        self.scheduler.is_idle()
    }

    pub fn wait_idle(&self, timeout: Duration) -> bool {
        self.scheduler.wait_idle(timeout)
    }

    pub fn subscribe_progress(&self) -> ProgressReceiver {
        self.scheduler.subscribe_progress()
    }

    /// Indexes a freshly installed artifact straight into the local index,
    /// bypassing the update queue. Only `.jar` files are handled; the next
    /// reindex picks up everything else. Returns whether a record was added.
    pub fn artifact_installed(&self, key: &ArtifactKey, path: &Path) -> Result<bool> {
        if path.extension().and_then(|ext| ext.to_str()) != Some("jar") {
            return Ok(false);
        }
        let Some((info, store)) = self.registry.lookup(LOCAL_INDEX) else {
            return Ok(false);
        };
        let Some(root) = info.repository_directory() else {
            return Ok(false);
        };

        match record_for_file(root, path, info.name(), info.is_minimal)? {
            Some(record) if record.matches_key(key) => {
                store.add_record(record)?;
                Ok(true)
            }
            Some(record) => {
                tracing::debug!(
                    target = "quarry.manager",
                    expected = %key,
                    found = %record.key(),
                    path = %path.display(),
                    "installed file does not match its coordinate; leaving it to the next reindex"
                );
                Ok(false)
            }
            None => Ok(false),
        }
    }

    pub fn add_workspace_artifact(&self, mut record: IndexRecord) -> Result<()> {
        let store = self
            .registry
            .store(WORKSPACE_INDEX)
            .ok_or_else(|| ManagerError::unknown(WORKSPACE_INDEX))?;
        if record.repository_id.is_empty() {
            record.repository_id = WORKSPACE_INDEX.to_string();
        }
        store.add_record(record)?;
        Ok(())
    }

    pub fn remove_workspace_artifact(&self, key: &ArtifactKey) -> Result<bool> {
        let store = self
            .registry
            .store(WORKSPACE_INDEX)
            .ok_or_else(|| ManagerError::unknown(WORKSPACE_INDEX))?;
        Ok(store.remove_record(key)?)
    }

    /// Points the local index at a new artifact store root: cancels pending
    /// work, re-creates every local and remote context, and queues a rescan.
    pub fn reconfigure_local_repository(&self, root: impl Into<PathBuf>) -> Result<()> {
        let root = root.into();
        self.scheduler.cancel();
        if !self.scheduler.wait_idle(RECONFIGURE_WAIT) {
            tracing::warn!(
                target = "quarry.manager",
                running = ?self.scheduler.running(),
                "update still running while reconfiguring"
            );
        }

        for name in self.registry.invalidate(Some(&root))? {
            self.enqueue(UpdateCommand::Reindex { target: name }, self.default_delay);
        }
        Ok(())
    }

    /// Replaces the proxy and credentials used by later remote updates.
    pub fn update_fetch_settings(&self, settings: FetchSettings) {
        self.executor.set_fetch_settings(settings);
    }
}

impl std::fmt::Debug for IndexManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("registry", &self.registry)
            .field("default_delay", &self.default_delay)
            .finish_non_exhaustive()
    }
}
