use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use quarry_core::{IndexInfo, IndexKind};
use quarry_index::{ArchiveManifest, IndexError, IndexStore};

use crate::error::{ManagerError, Result};
use crate::events::{IndexEvent, IndexEventListener};
use crate::registry_file::{self, REGISTRY_FILE};

struct Entry {
    info: IndexInfo,
    store: Arc<IndexStore>,
}

/// Maps index names to their [`IndexInfo`] and open [`IndexStore`].
///
/// Local and remote stores live under `<root>/<name>`; workspace stores are
/// always in memory. Every register, unregister and update-time change is
/// written back to `<root>/indexes.properties`.
pub struct IndexRegistry {
    root: Option<PathBuf>,
    entries: RwLock<BTreeMap<String, Entry>>,
    /// Persisted view, including entries loaded from disk that nobody has
    /// registered in this process yet.
    known: Mutex<BTreeMap<String, IndexInfo>>,
    listeners: Mutex<Vec<IndexEventListener>>,
    save_lock: Mutex<()>,
}

impl std::fmt::Debug for IndexRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexRegistry")
            .field("root", &self.root)
            .field("indexes", &self.entries.read().keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl IndexRegistry {
    /// Opens a registry rooted at `root`, loading the persisted index list.
    /// Nothing is registered until [`IndexRegistry::register`] is called.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        let known = registry_file::load(&root.join(REGISTRY_FILE))?
            .into_iter()
            .filter(|info| info.kind() != IndexKind::Workspace)
            .map(|info| (info.name().to_string(), info))
            .collect();
        Ok(Self::with_root(Some(root), known))
    }

    /// A registry whose stores are all in memory and which persists nothing.
    pub fn in_memory() -> Self {
        Self::with_root(None, BTreeMap::new())
    }

    fn with_root(root: Option<PathBuf>, known: BTreeMap<String, IndexInfo>) -> Self {
        Self {
            root,
            entries: RwLock::new(BTreeMap::new()),
            known: Mutex::new(known),
            listeners: Mutex::new(Vec::new()),
            save_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Adds (or reconfigures) an index.
    ///
    /// Returns whether a local index needs a `Reindex` before its contents can
    /// be trusted: always when `rebuild_if_missing` is set, and otherwise when
    /// no store existed on disk. Remote stores are opened, or created empty,
    /// without touching the network.
    ///
    /// Re-registering a name keeps its store and update state; changing its
    /// kind is rejected.
    pub fn register(&self, mut info: IndexInfo, rebuild_if_missing: bool) -> Result<bool> {
        validate_name(info.name())?;
        let name = info.name().to_string();

        let needs_reindex = {
            let mut entries = self.entries.write();
            if let Some(existing) = entries.get_mut(&name) {
                if existing.info.kind() != info.kind() {
                    return Err(ManagerError::KindMismatch {
                        name,
                        existing: existing.info.kind(),
                        requested: info.kind(),
                    });
                }
                info.last_update_time = existing.info.last_update_time;
                info.is_fresh = existing.info.is_fresh;
                existing.info = info.clone();
                info.kind() == IndexKind::Local && rebuild_if_missing
            } else {
                if let Some(persisted) = self.known.lock().get(&name) {
                    if persisted.kind() == info.kind() {
                        info.last_update_time = persisted.last_update_time;
                        info.is_fresh = persisted.is_fresh;
                    }
                }
                let (store, existed) = self.open_store(&info)?;
                if !existed {
                    info.last_update_time = None;
                    info.is_fresh = true;
                }
                entries.insert(
                    name.clone(),
                    Entry {
                        info: info.clone(),
                        store: Arc::new(store),
                    },
                );
                info.kind() == IndexKind::Local && (rebuild_if_missing || !existed)
            }
        };

        tracing::debug!(
            target = "quarry.manager",
            index = %name,
            kind = %info.kind(),
            needs_reindex,
            "registered index"
        );
        if info.kind() != IndexKind::Workspace {
            self.known.lock().insert(name, info.clone());
            self.save()?;
        }
        self.emit(&IndexEvent::Registered(info));
        Ok(needs_reindex)
    }

    /// Removes an index, deleting its store directory when `delete_files` is
    /// set. Unknown names are a no-op.
    pub fn unregister(&self, name: &str, delete_files: bool) -> Result<Option<IndexInfo>> {
        let Some(entry) = self.entries.write().remove(name) else {
            return Ok(None);
        };
        let Entry { info, store } = entry;
        let location = store.location();
        drop(store);

        if info.kind() != IndexKind::Workspace {
            self.known.lock().remove(name);
            self.save()?;
        }
        if delete_files {
            if let Some(location) = location {
                IndexStore::delete_files(&location)?;
            }
        }

        tracing::debug!(
            target = "quarry.manager",
            index = name,
            delete_files,
            "unregistered index"
        );
        self.emit(&IndexEvent::Unregistered(info.clone()));
        Ok(Some(info))
    }

    pub fn lookup(&self, name: &str) -> Option<(IndexInfo, Arc<IndexStore>)> {
        self.entries
            .read()
            .get(name)
            .map(|entry| (entry.info.clone(), Arc::clone(&entry.store)))
    }

    pub fn info(&self, name: &str) -> Option<IndexInfo> {
        self.entries.read().get(name).map(|entry| entry.info.clone())
    }

    pub fn store(&self, name: &str) -> Option<Arc<IndexStore>> {
        self.entries
            .read()
            .get(name)
            .map(|entry| Arc::clone(&entry.store))
    }

    /// Snapshot of every registered index, ordered by name.
    pub fn all(&self) -> Vec<IndexInfo> {
        self.entries
            .read()
            .values()
            .map(|entry| entry.info.clone())
            .collect()
    }

    /// Every persisted index, registered or not.
    pub fn known(&self) -> Vec<IndexInfo> {
        self.known.lock().values().cloned().collect()
    }

    /// Records a completed populate. `replaced` indexes take `timestamp` as
    /// is; merges only ever move the update time forward.
    pub fn record_update(&self, name: &str, timestamp: u64, replaced: bool) -> Result<IndexInfo> {
        let info = {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(name)
                .ok_or_else(|| ManagerError::unknown(name))?;
            if replaced {
                entry.info.reset_update_time(timestamp);
            } else {
                entry.info.mark_updated(timestamp);
            }
            entry.info.clone()
        };

        if info.kind() != IndexKind::Workspace {
            self.known.lock().insert(name.to_string(), info.clone());
            self.save()?;
        }
        self.emit(&IndexEvent::Updated(info.clone()));
        Ok(info)
    }

    pub fn subscribe(&self, listener: IndexEventListener) {
        self.listeners.lock().push(listener);
    }

    /// Registers a listener for [`IndexEvent::Invalidated`] only.
    pub fn on_invalidated<F>(&self, callback: F)
    where
        F: Fn(Option<&Path>) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(move |event| {
            if let IndexEvent::Invalidated { local_repository } = event {
                callback(local_repository.as_deref());
            }
        }));
    }

    /// Tears down every local and remote context and re-creates it, pointing
    /// local indexes at `local_root` when given.
    ///
    /// Remote caches are all copied into memory before any context changes,
    /// then restored into their store. Local indexes are marked fresh and keep
    /// serving their old records until the reindex replaces them. Stores are
    /// re-created in place, so every index stays registered and handles held
    /// by running searches stay valid. Remote contexts go first; if one
    /// fails, the contexts not yet reached keep their previous state.
    /// Returns the names of the local indexes, which must be reindexed by the
    /// caller.
    pub fn invalidate(&self, local_root: Option<&Path>) -> Result<Vec<String>> {
        let mut contexts: Vec<(IndexInfo, Arc<IndexStore>)> = self
            .entries
            .read()
            .values()
            .filter(|entry| entry.info.kind() != IndexKind::Workspace)
            .map(|entry| (entry.info.clone(), Arc::clone(&entry.store)))
            .collect();
        contexts.sort_by_key(|(info, _)| info.kind() != IndexKind::Remote);

        let mut staged = Vec::with_capacity(contexts.len());
        for (info, store) in contexts {
            let cache = match info.kind() {
                IndexKind::Remote => cache_snapshot(&store)?,
                _ => None,
            };
            staged.push((recreated_info(info, local_root), store, cache));
        }

        let mut reindex = Vec::new();
        let mut outcome: Result<()> = Ok(());
        for (info, store, cache) in staged {
            if let Some(Err(err)) = cache.map(|cache| store.replace_from(cache.as_slice())) {
                tracing::warn!(
                    target = "quarry.manager",
                    index = info.name(),
                    error = %err,
                    "failed to re-create index context; keeping its previous state"
                );
                outcome = Err(err.into());
                break;
            }

            let name = info.name().to_string();
            let still_registered = match self.entries.write().get_mut(&name) {
                Some(entry) => {
                    entry.info = info.clone();
                    true
                }
                None => false,
            };
            if still_registered {
                if info.kind() == IndexKind::Local {
                    reindex.push(name.clone());
                }
                self.known.lock().insert(name, info);
            }
        }

        self.save()?;
        outcome?;

        tracing::info!(
            target = "quarry.manager",
            local_repository = ?local_root,
            reindex = reindex.len(),
            "invalidated index contexts"
        );
        self.emit(&IndexEvent::Invalidated {
            local_repository: local_root.map(Path::to_path_buf),
        });
        Ok(reindex)
    }

    /// Opens the backing store for `info`. Returns whether persisted contents
    /// were found.
    fn open_store(&self, info: &IndexInfo) -> Result<(IndexStore, bool)> {
        let Some(root) = self
            .root
            .as_ref()
            .filter(|_| info.kind() != IndexKind::Workspace)
        else {
            return Ok((IndexStore::in_memory(), false));
        };

        let dir = root.join(info.name());
        let existed = IndexStore::exists(&dir);
        match IndexStore::open(&dir) {
            Ok(store) => Ok((store, existed)),
            Err(err @ IndexError::Locked { .. }) => Err(err.into()),
            Err(err) => {
                tracing::warn!(
                    target = "quarry.manager",
                    index = info.name(),
                    dir = %dir.display(),
                    error = %err,
                    "index store is unreadable; recreating it"
                );
                IndexStore::delete_files(&dir)?;
                Ok((IndexStore::open(&dir)?, false))
            }
        }
    }

    fn save(&self) -> Result<()> {
        let Some(root) = &self.root else {
            return Ok(());
        };
        let _guard = self.save_lock.lock();
        let known = self.known.lock().clone();
        registry_file::save(&root.join(REGISTRY_FILE), known.values())
    }

    fn emit(&self, event: &IndexEvent) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener(event);
        }
    }
}

/// The identity an index context is re-created with: local indexes move to
/// `local_root` (when given) and start over, remote ones keep their state.
fn recreated_info(info: IndexInfo, local_root: Option<&Path>) -> IndexInfo {
    if info.kind() != IndexKind::Local {
        return info;
    }
    let mut info = match local_root {
        Some(root) => IndexInfo::local(info.name(), root).minimal(info.is_minimal),
        None => info,
    };
    info.last_update_time = None;
    info.is_fresh = true;
    info
}

/// Copies a remote cache into an archive that reproduces its metadata when
/// replayed through `replace_from`. `None` for a cache that never held data.
fn cache_snapshot(store: &IndexStore) -> Result<Option<Vec<u8>>> {
    let meta = store.meta();
    let Some(timestamp) = meta.timestamp else {
        return Ok(None);
    };
    let mut manifest = ArchiveManifest::new(timestamp);
    if let (Some(chain_id), Some(applied)) = (meta.chain_id, meta.last_incremental) {
        manifest = manifest.with_chain(chain_id, applied);
    }
    let mut buffer = Vec::new();
    store.snapshot_with(&mut buffer, &manifest)?;
    Ok(Some(buffer))
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason| {
        Err(ManagerError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };
    if name.trim().is_empty() {
        return invalid("must not be empty");
    }
    if name
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '.' | '=' | ':' | '/' | '\\'))
    {
        return invalid("must not contain whitespace or any of . = : / \\");
    }
    Ok(())
}
