use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use quarry_config::QuarryConfig;
use quarry_core::{now_millis, IndexInfo, IndexKind, ProgressSink, UpdateCommand};
use quarry_fetch::{Credentials, Endpoint, ProxySettings, ResourceFetcher};
use quarry_index::archive::read_archive;
use quarry_index::remote::{chunk_path, DESCRIPTOR_PATH, SNAPSHOT_PATH};
use quarry_index::{IndexStore, RemoteDescriptor, ScanContext, UpdatePlan};
use quarry_scheduler::{CommandContext, CommandHandler, TaskError};

use crate::error::{ManagerError, Result};
use crate::registry::IndexRegistry;

/// Proxy and per-index credentials used when contacting remote indexes.
#[derive(Clone, Debug, Default)]
pub struct FetchSettings {
    pub proxy: Option<ProxySettings>,
    /// Keyed by index name.
    pub credentials: BTreeMap<String, Credentials>,
}

impl FetchSettings {
    pub fn from_config(config: &QuarryConfig) -> Self {
        let credentials = config
            .remotes
            .iter()
            .filter_map(|remote| {
                remote
                    .credentials
                    .clone()
                    .map(|credentials| (remote.name.clone(), credentials))
            })
            .collect();
        Self {
            proxy: config.proxy.clone(),
            credentials,
        }
    }
}

/// Runs [`UpdateCommand`]s against the stores of an [`IndexRegistry`].
///
/// Commands resolve their target by name when they run; a command for an
/// index that has been unregistered since it was queued does nothing. The
/// executor only holds a weak reference to the registry, so the worker thread
/// never keeps stores (and their locks) alive after the owner drops them.
pub struct UpdateExecutor {
    registry: Weak<IndexRegistry>,
    settings: RwLock<FetchSettings>,
}

impl UpdateExecutor {
    pub fn new(registry: &Arc<IndexRegistry>, settings: FetchSettings) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            settings: RwLock::new(settings),
        }
    }

    pub fn set_fetch_settings(&self, settings: FetchSettings) {
        *self.settings.write() = settings;
    }

    fn run(&self, command: &UpdateCommand, ctx: &CommandContext) -> Result<()> {
        let Some(registry) = self.registry.upgrade() else {
            return Ok(());
        };
        let name = command.target();
        let Some((info, store)) = registry.lookup(name) else {
            tracing::debug!(
                target = "quarry.manager",
                index = name,
                command = command.label(),
                "target index is no longer registered; skipping"
            );
            return Ok(());
        };

        match command {
            UpdateCommand::Reindex { .. } => reindex(&registry, &info, &store, ctx),
            UpdateCommand::FetchDelta { force, .. } => {
                self.fetch_delta(&registry, &info, &store, *force, ctx)
            }
            UpdateCommand::UnpackSnapshot { force, .. } => {
                self.unpack_snapshot(&registry, &info, &store, *force, ctx)
            }
        }
    }

    fn fetch_delta(
        &self,
        registry: &IndexRegistry,
        info: &IndexInfo,
        store: &IndexStore,
        force: bool,
        ctx: &CommandContext,
    ) -> Result<()> {
        let fetcher = self.connect(info)?;
        let text = fetcher.fetch_to_string(DESCRIPTOR_PATH, ctx.token())?;
        let descriptor = RemoteDescriptor::parse(&text)?;

        let never_populated = info.is_fresh || store.meta().timestamp.is_none();
        let newer = info
            .last_update_time
            .map_or(true, |last| descriptor.timestamp > last);
        if !(force || never_populated || newer) {
            ctx.console()
                .info(&format!("index {} is up to date", info.name()));
            return Ok(());
        }

        let mut plan = descriptor.plan_for(&store.meta());
        if plan == UpdatePlan::UpToDate && (force || never_populated) {
            plan = UpdatePlan::Full;
        }

        let (timestamp, replaced) = match plan {
            UpdatePlan::UpToDate => (descriptor.timestamp, false),
            UpdatePlan::Incremental(chunks) => {
                match apply_chunks(&fetcher, store, &chunks, ctx) {
                    Ok(timestamp) => (timestamp, false),
                    Err(err) if err.is_not_found() => {
                        tracing::warn!(
                            target = "quarry.manager",
                            index = info.name(),
                            error = %err,
                            "incremental chunk disappeared; falling back to the full snapshot"
                        );
                        (apply_full(&fetcher, store, ctx)?, true)
                    }
                    Err(err) => return Err(err),
                }
            }
            UpdatePlan::Full => (apply_full(&fetcher, store, ctx)?, true),
        };

        let updated = registry.record_update(info.name(), timestamp, replaced)?;
        ctx.console().info(&format!(
            "updated index {} ({} records)",
            updated.name(),
            store.len()
        ));
        Ok(())
    }

    fn unpack_snapshot(
        &self,
        registry: &IndexRegistry,
        info: &IndexInfo,
        store: &IndexStore,
        force: bool,
        ctx: &CommandContext,
    ) -> Result<()> {
        let fetcher = self.connect(info)?;
        let than = if force || info.is_fresh {
            None
        } else {
            info.last_update_time
        };

        ctx.progress().report("downloading index snapshot");
        let stream = fetcher.fetch(SNAPSHOT_PATH, ctx.token())?;
        match store.replace_from_if_newer(stream, than)? {
            Some(timestamp) => {
                registry.record_update(info.name(), timestamp, true)?;
                ctx.console().info(&format!(
                    "unpacked index snapshot for {} ({} records)",
                    info.name(),
                    store.len()
                ));
            }
            None => ctx
                .console()
                .info(&format!("index {} is up to date", info.name())),
        }
        Ok(())
    }

    fn connect(&self, info: &IndexInfo) -> Result<ResourceFetcher> {
        if info.kind() != IndexKind::Remote {
            return Err(not_updatable(info, "only remote indexes are fetched"));
        }
        let url = info
            .effective_update_url()
            .ok_or_else(|| not_updatable(info, "no repository or update URL is configured"))?;

        let settings = self.settings.read();
        let endpoint = Endpoint::new(url)
            .with_credentials(settings.credentials.get(info.name()).cloned())
            .with_proxy(settings.proxy.clone());
        Ok(ResourceFetcher::connect(&endpoint)?)
    }
}

fn reindex(
    registry: &IndexRegistry,
    info: &IndexInfo,
    store: &IndexStore,
    ctx: &CommandContext,
) -> Result<()> {
    let root = match (info.kind(), info.repository_directory()) {
        (IndexKind::Local, Some(root)) => root,
        (IndexKind::Local, None) => {
            return Err(not_updatable(info, "no repository directory is configured"))
        }
        _ => return Err(not_updatable(info, "only local indexes are rebuilt from disk")),
    };

    let scan = ScanContext {
        repository_id: info.name(),
        minimal: info.is_minimal,
        progress: ctx.progress(),
        console: ctx.console(),
        cancel: ctx.token(),
    };
    let count = store.rebuild_from(root, &scan)?;
    registry.record_update(info.name(), now_millis(), true)?;

    ctx.console().info(&format!(
        "indexed {count} artifacts from {} into {}",
        root.display(),
        info.name()
    ));
    Ok(())
}

/// Downloads and verifies every chunk before touching the store, so a bad
/// chunk leaves the cache exactly as it was.
fn apply_chunks(
    fetcher: &ResourceFetcher,
    store: &IndexStore,
    chunks: &[u32],
    ctx: &CommandContext,
) -> Result<u64> {
    let mut archives = Vec::with_capacity(chunks.len());
    for number in chunks {
        ctx.check()?;
        ctx.progress()
            .report(&format!("downloading incremental update {number}"));
        let stream = fetcher.fetch(&chunk_path(*number), ctx.token())?;
        archives.push(read_archive(stream)?);
    }
    ctx.check()?;
    ctx.progress().report("applying incremental updates");
    Ok(store.merge_archives(archives)?)
}

fn apply_full(fetcher: &ResourceFetcher, store: &IndexStore, ctx: &CommandContext) -> Result<u64> {
    ctx.check()?;
    ctx.progress().report("downloading index snapshot");
    let stream = fetcher.fetch(SNAPSHOT_PATH, ctx.token())?;
    Ok(store.replace_from(stream)?)
}

fn not_updatable(info: &IndexInfo, reason: &'static str) -> ManagerError {
    ManagerError::NotUpdatable {
        name: info.name().to_string(),
        reason,
    }
}

impl CommandHandler<UpdateCommand> for UpdateExecutor {
    fn execute(&self, command: &UpdateCommand, ctx: &CommandContext) -> std::result::Result<(), TaskError> {
        self.run(command, ctx).map_err(|err| {
            // Transports may surface an abort as a plain I/O failure.
            if err.is_cancelled() || ctx.token().is_cancelled() {
                TaskError::Cancelled
            } else {
                TaskError::failed(err)
            }
        })
    }
}
