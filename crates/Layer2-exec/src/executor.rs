//! Executor - the catalog of execs on this machine
//!
//! Features:
//! - Admission against declared capacity
//! - Idempotent submission keyed by content id
//! - Restart recovery from `<dir>/execs`, reconciled against the runtime
//! - Explicit removal

use crate::config::ExecConfig;
use crate::driver::{self, container_name, ExecEnv, Start};
use crate::exec::Exec;
use crate::fileset::ExecResult;
use crate::layout::{ContainerRecord, ExecDir, CONFIG_FILE};
use crate::profile::Profiler;
use crate::resources::{Capacity, Resources};
use crate::runtime::{ContainerRuntime, ContainerStatus};
use crate::state::ExecState;
use crate::store::ContentStore;
use chrono::{DateTime, Utc};
use dockyard_foundation::{ContentId, Error, ExecutorConfig, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How a persisted exec comes back
enum Restore {
    /// Hand it to a driver
    Drive(Start),
    /// Its container is gone; record a reconstruction failure
    Lost(String),
}

/// Lifecycle of the executor-wide token
enum Phase {
    Stopped,
    /// Rebuilding from disk; submissions are refused
    Starting(CancellationToken),
    Started(CancellationToken),
}

impl Phase {
    fn take(&mut self) -> Option<CancellationToken> {
        match std::mem::replace(self, Phase::Stopped) {
            Phase::Starting(root) | Phase::Started(root) => Some(root),
            Phase::Stopped => None,
        }
    }
}

/// Catalog rebuilt by `start`, swapped in once every exec is restored
#[derive(Default)]
struct Restored {
    catalog: HashMap<ContentId, Arc<Exec>>,
    reservations: Vec<(ContentId, Resources)>,
    drivers: Vec<(Arc<Exec>, Start)>,
}

/// Local executor
pub struct Executor {
    config: ExecutorConfig,
    runtime: Arc<dyn ContainerRuntime>,
    store: ContentStore,

    /// Exec catalog; guards membership only
    catalog: Mutex<HashMap<ContentId, Arc<Exec>>>,

    /// Admission bookkeeping
    capacity: Arc<Mutex<Capacity>>,

    /// Executor-wide token, replaced by every `start`
    phase: Mutex<Phase>,
}

impl Executor {
    /// Create an executor; nothing touches disk until [`Executor::start`]
    pub fn new(config: ExecutorConfig, runtime: Arc<dyn ContainerRuntime>) -> Self {
        let total = config
            .resources
            .clone()
            .map(Resources::from)
            .unwrap_or_default();
        let store = ContentStore::new(config.dir.join("objects"));
        Self {
            config,
            runtime,
            store,
            catalog: Mutex::new(HashMap::new()),
            capacity: Arc::new(Mutex::new(Capacity::new(total))),
            phase: Mutex::new(Phase::Stopped),
        }
    }

    /// Declare total capacity
    pub fn set_resources(&self, total: Resources) {
        self.capacity.lock().set_total(total);
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn dir(&self) -> &Path {
        &self.config.dir
    }

    fn execs_dir(&self) -> PathBuf {
        self.config.dir.join("execs")
    }

    /// Content store holding exec outputs and interned files
    pub fn repository(&self) -> &ContentStore {
        &self.store
    }

    /// Total capacity
    pub fn resources(&self) -> Resources {
        self.capacity.lock().total().clone()
    }

    /// Capacity not reserved by any exec
    pub fn available(&self) -> Resources {
        self.capacity.lock().available()
    }

    fn env(&self) -> ExecEnv {
        ExecEnv {
            runtime: self.runtime.clone(),
            store: self.store.clone(),
            capacity: self.capacity.clone(),
            container_prefix: self.config.container_prefix.clone(),
            stats_interval: self.config.stats_interval(),
            disk_interval: self.config.disk_interval(),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// (Re)initialize from durable state.
    ///
    /// Every call discards in-memory bookkeeping and rebuilds the catalog
    /// from `<dir>/execs`, asking the runtime about any exec that has no
    /// result yet. Submissions are refused until the rebuilt catalog is in
    /// place.
    pub async fn start(&self) -> Result<()> {
        let root = CancellationToken::new();
        {
            let mut phase = self.phase.lock();
            if let Some(previous) = phase.take() {
                previous.cancel();
            }
            *phase = Phase::Starting(root.clone());
        }
        self.catalog.lock().clear();

        let restored = match self.rebuild(&root).await {
            Ok(restored) => restored,
            Err(e) => {
                let mut phase = self.phase.lock();
                if !root.is_cancelled() {
                    root.cancel();
                    *phase = Phase::Stopped;
                }
                return Err(e);
            }
        };

        let Restored {
            catalog,
            reservations,
            drivers,
        } = restored;
        let count = catalog.len();
        {
            let mut phase = self.phase.lock();
            // canceled, or superseded by a later start
            if root.is_cancelled() {
                return Err(Error::Canceled("executor start canceled".to_string()));
            }
            *self.catalog.lock() = catalog;
            {
                let mut capacity = self.capacity.lock();
                let total = capacity.total().clone();
                capacity.reset(total);
                for (id, request) in &reservations {
                    capacity.reserve_unchecked(*id, request);
                }
            }
            *phase = Phase::Started(root);
        }
        for (exec, start) in drivers {
            info!("Resuming exec {} ({:?})", exec.id().short(), start);
            driver::spawn(exec, self.env(), start);
        }

        info!(
            "Executor started in {} ({} execs restored, capacity {})",
            self.config.dir.display(),
            count,
            self.resources()
        );
        Ok(())
    }

    async fn rebuild(&self, root: &CancellationToken) -> Result<Restored> {
        let execs_dir = self.execs_dir();
        std::fs::create_dir_all(&execs_dir).map_err(|e| Error::storage(&execs_dir, e))?;
        self.store.ensure_dir()?;

        let mut restored = Restored::default();
        let entries = std::fs::read_dir(&execs_dir).map_err(|e| Error::storage(&execs_dir, e))?;
        for entry in entries {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(e) => {
                    error!("Failed to read {}: {}", execs_dir.display(), e);
                    continue;
                }
            };
            if !path.is_dir() {
                continue;
            }
            let id = match path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.parse::<ContentId>().ok())
            {
                Some(id) => id,
                None => {
                    error!("Skipping unrecognized exec directory {}", path.display());
                    continue;
                }
            };

            if let Err(e) = self
                .restore(id, ExecDir::open(&path), root, &mut restored)
                .await
            {
                error!("Failed to restore exec {}: {}", id.short(), e);
            }
        }
        Ok(restored)
    }

    async fn restore(
        &self,
        id: ContentId,
        dir: ExecDir,
        root: &CancellationToken,
        restored: &mut Restored,
    ) -> Result<()> {
        if restored.catalog.contains_key(&id) {
            return Ok(());
        }
        let config = dir.load_config()?;
        let created = created_at(&dir);
        let container = dir.load_container()?;

        if let Some(result) = dir.load_result()? {
            let profiler = match dir.load_profile() {
                Ok(Some(record)) => Profiler::restore(record.gauges, record.profile),
                Ok(None) => Profiler::restore(Default::default(), Default::default()),
                Err(e) => {
                    warn!("Exec {} has an unreadable profile: {}", id.short(), e);
                    Profiler::restore(Default::default(), Default::default())
                }
            };
            let exec = Exec::restored(id, config, dir, result, profiler, root.child_token())
                .with_created(created);
            if let Some(record) = container {
                exec.set_container(record);
            }
            debug!("Restored exec {} as {}", id.short(), exec.state());
            restored.catalog.entry(id).or_insert_with(|| Arc::new(exec));
            return Ok(());
        }

        let plan = match &config {
            ExecConfig::Intern { .. } => Restore::Drive(Start::Fresh),
            ExecConfig::Exec { .. } => self.reconcile(id, &dir, container).await?,
        };
        let exec = Arc::new(
            Exec::new(
                id,
                config,
                dir,
                ExecState::Created,
                Profiler::new(),
                root.child_token(),
            )
            .with_created(created),
        );

        match plan {
            Restore::Drive(start) => {
                if let Start::Monitor(record) | Start::StartContainer(record) = &start {
                    exec.set_container(record.clone());
                }
                if matches!(start, Start::Monitor(_)) {
                    exec.set_running();
                }
                restored
                    .reservations
                    .push((id, exec.config().resources()));
                restored.catalog.entry(id).or_insert_with(|| exec.clone());
                restored.drivers.push((exec, start));
            }
            Restore::Lost(reason) => {
                warn!("Exec {} cannot be reattached: {}", id.short(), reason);
                let result = ExecResult::failure(format!("reconstruction: {}", reason));
                exec.dir().save_result(&result)?;
                exec.dir().save_state(ExecState::Error)?;
                exec.profiler().stop();
                exec.publish(result);
                restored.catalog.entry(id).or_insert(exec);
            }
        }
        Ok(())
    }

    /// Work out what became of an exec's container while we were down
    async fn reconcile(
        &self,
        id: ContentId,
        dir: &ExecDir,
        record: Option<ContainerRecord>,
    ) -> Result<Restore> {
        let name = container_name(&self.config.container_prefix, &id);
        let lookup = record
            .as_ref()
            .map(|r| r.id.clone())
            .unwrap_or_else(|| name.clone());

        let info = match self.runtime.inspect(&lookup).await {
            Ok(info) => info,
            Err(e) => {
                return Ok(Restore::Lost(format!(
                    "container {} unreachable: {}",
                    lookup, e
                )))
            }
        };

        let plan = match (info, record) {
            // never got as far as creating it
            (None, None) => Restore::Drive(Start::Fresh),
            (None, Some(record)) => {
                Restore::Lost(format!("container {} no longer exists", record.name))
            }
            (Some(info), record) => {
                let record = match record {
                    Some(record) => record,
                    None => {
                        let record = ContainerRecord { id: info.id, name };
                        dir.save_container(&record)?;
                        record
                    }
                };
                match info.status {
                    ContainerStatus::Created => Restore::Drive(Start::StartContainer(record)),
                    ContainerStatus::Running | ContainerStatus::Exited { .. } => {
                        Restore::Drive(Start::Monitor(record))
                    }
                }
            }
        };
        Ok(plan)
    }

    /// Cancel the executor-wide token.
    ///
    /// Waits in flight return `Canceled` and drivers stop where they are.
    /// Containers keep running; a later [`Executor::start`] picks them up.
    pub fn cancel(&self) {
        if let Some(root) = self.phase.lock().take() {
            root.cancel();
            info!("Executor canceled");
        }
    }

    // ========================================================================
    // Catalog
    // ========================================================================

    /// Submit exec `id`.
    ///
    /// An existing exec is returned unchanged, whatever `config` says. A new
    /// one is admitted, persisted and handed to its driver; this returns
    /// without waiting for it.
    pub fn put(&self, id: ContentId, config: ExecConfig) -> Result<Arc<Exec>> {
        // held until the exec is persisted so a concurrent start sees it on disk
        let phase = self.phase.lock();
        let root = match &*phase {
            Phase::Started(root) => root.clone(),
            Phase::Starting(_) => return Err(Error::Config("executor is starting".to_string())),
            Phase::Stopped => return Err(Error::Config("executor not started".to_string())),
        };

        let exec = {
            let mut catalog = self.catalog.lock();
            if let Some(existing) = catalog.get(&id) {
                if existing.config() != &config {
                    debug!(
                        "Exec {} exists with a different config; keeping the first",
                        id.short()
                    );
                } else {
                    debug!("Exec {} exists", id.short());
                }
                return Ok(existing.clone());
            }

            self.capacity.lock().reserve(id, &config.resources())?;
            let exec = Arc::new(Exec::new(
                id,
                config,
                ExecDir::new(&self.execs_dir(), &id),
                ExecState::Created,
                Profiler::new(),
                root.child_token(),
            ));
            catalog.insert(id, exec.clone());
            exec
        };

        let dir = exec.dir();
        if let Err(e) = dir.create().and_then(|_| dir.save_config(exec.config())) {
            self.catalog.lock().remove(&id);
            self.capacity.lock().release(&id);
            if let Err(cleanup) = dir.remove_all() {
                warn!("Failed to clean up {}: {}", dir.root().display(), cleanup);
            }
            exec.stop("exec could not be persisted");
            return Err(e);
        }
        drop(phase);

        info!("Exec {} created: {}", id.short(), exec.config());
        driver::spawn(exec.clone(), self.env(), Start::Fresh);
        Ok(exec)
    }

    /// Look up exec `id`
    pub fn get(&self, id: &ContentId) -> Result<Arc<Exec>> {
        self.catalog
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("exec {}", id)))
    }

    /// All execs, ordered by id
    pub fn execs(&self) -> Vec<Arc<Exec>> {
        let mut execs: Vec<_> = self.catalog.lock().values().cloned().collect();
        execs.sort_by_key(|exec| exec.id());
        execs
    }

    /// Stop exec `id`, release its capacity, remove its container and
    /// directory.
    ///
    /// The exec is gone from the catalog and its capacity is back even when
    /// the runtime fails to remove the container; that error is returned
    /// after the directory is deleted.
    pub async fn remove(&self, id: &ContentId) -> Result<()> {
        let starting = matches!(*self.phase.lock(), Phase::Starting(_));
        if starting {
            return Err(Error::Config("executor is starting".to_string()));
        }
        let exec = self
            .catalog
            .lock()
            .remove(id)
            .ok_or_else(|| Error::NotFound(format!("exec {}", id)))?;
        exec.stop("exec removed");
        self.capacity.lock().release(id);

        let mut removed = Ok(());
        if let ExecConfig::Exec { .. } = exec.config() {
            let target = exec
                .container()
                .map(|record| record.id)
                .unwrap_or_else(|| container_name(&self.config.container_prefix, id));
            removed = self.runtime.remove(&target).await;
            if let Err(e) = &removed {
                warn!(
                    "Exec {}: container {} left behind: {}",
                    id.short(),
                    target,
                    e
                );
            }
        }
        exec.dir().remove_all()?;
        removed?;

        info!("Exec {} removed", id.short());
        Ok(())
    }
}

impl Drop for Executor {
    fn drop(&mut self) {
        if let Some(root) = self.phase.get_mut().take() {
            root.cancel();
        }
    }
}

fn created_at(dir: &ExecDir) -> DateTime<Utc> {
    std::fs::metadata(dir.root().join(CONFIG_FILE))
        .and_then(|meta| meta.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}
