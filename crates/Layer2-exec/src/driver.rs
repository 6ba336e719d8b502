//! Exec driver - takes one exec to a terminal state
//!
//! Container execs: ensure image → create → persist handle → start →
//! `Running` → sample and wait → collect `$out` → persist → publish.
//! Interns: `Running` → walk the source tree → persist → publish.
//!
//! The driver runs under the exec's shutdown token; when it fires the driver
//! stops where it is and writes nothing more. Containers are left alone.

use crate::config::ExecConfig;
use crate::exec::Exec;
use crate::fileset::{ExecResult, Fileset};
use crate::layout::{ContainerRecord, OUT_PATH, RETURN_MOUNT, TMP_MOUNT};
use crate::profile::{sample_filesystem, Sampler};
use crate::resources::{Capacity, Resources, CPU, MEM};
use crate::runtime::{ContainerInfo, ContainerRuntime, ContainerSpec, ContainerStatus, VolumeMount};
use crate::state::ExecState;
use crate::store::ContentStore;
use dockyard_foundation::{ContentId, Error, Result};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use url::Url;

/// Label carrying the exec id on every container
pub const EXEC_LABEL: &str = "dockyard.exec";

/// What a driver needs from its executor
#[derive(Clone)]
pub(crate) struct ExecEnv {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub store: ContentStore,
    pub capacity: Arc<Mutex<Capacity>>,
    pub container_prefix: String,
    pub stats_interval: Duration,
    pub disk_interval: Duration,
}

/// Where a driver picks up
#[derive(Debug, Clone)]
pub(crate) enum Start {
    /// Nothing exists yet
    Fresh,
    /// The container exists but was never started
    StartContainer(ContainerRecord),
    /// The container was started; resume waiting on it
    Monitor(ContainerRecord),
}

/// Deterministic container name of exec `id`
pub fn container_name(prefix: &str, id: &ContentId) -> String {
    format!("{}-{}", prefix, id.to_hex())
}

pub(crate) fn spawn(exec: Arc<Exec>, env: ExecEnv, start: Start) -> JoinHandle<()> {
    tokio::spawn(async move {
        let shutdown = exec.shutdown_token().clone();
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Driver for exec {} stopped before completion", exec.id().short());
            }
            _ = drive(&exec, &env, start) => {}
        }
    })
}

async fn drive(exec: &Arc<Exec>, env: &ExecEnv, start: Start) {
    let result = match exec.config().clone() {
        ExecConfig::Exec {
            image,
            cmd,
            resources,
        } => run_container(exec, env, start, &image, &cmd, &resources).await,
        ExecConfig::Intern { url } => run_intern(exec, env, &url).await,
    };
    let result = result.unwrap_or_else(|e| ExecResult::failure(e.to_string()));
    finish(exec, env, result).await;
}

// ============================================================================
// Container execs
// ============================================================================

async fn run_container(
    exec: &Arc<Exec>,
    env: &ExecEnv,
    start: Start,
    image: &str,
    cmd: &str,
    resources: &Resources,
) -> Result<ExecResult> {
    let (record, needs_start) = match start {
        Start::Fresh => (create_container(exec, env, image, cmd, resources).await?, true),
        Start::StartContainer(record) => (record, true),
        Start::Monitor(record) => (record, false),
    };
    exec.set_container(record.clone());

    if needs_start {
        env.runtime.start(&record.id).await?;
        info!("Exec {} started in container {}", exec.id().short(), record.name);
    }
    mark_running(exec);
    monitor(exec, env, &record).await
}

async fn create_container(
    exec: &Exec,
    env: &ExecEnv,
    image: &str,
    cmd: &str,
    resources: &Resources,
) -> Result<ContainerRecord> {
    env.runtime.ensure_image(image).await?;

    let dir = exec.dir();
    let name = container_name(&env.container_prefix, &exec.id());
    let mem = resources.get(MEM);
    let cpu = resources.get(CPU);
    let spec = ContainerSpec::new(&name, image)
        .with_command(vec![
            "/bin/bash".to_string(),
            "-e".to_string(),
            "-o".to_string(),
            "pipefail".to_string(),
            "-c".to_string(),
            cmd.to_string(),
        ])
        .with_env("tmp", TMP_MOUNT)
        .with_env("out", OUT_PATH)
        .with_volume(VolumeMount::new(dir.tmp_dir(), TMP_MOUNT))
        .with_volume(VolumeMount::new(dir.return_dir(), RETURN_MOUNT))
        .with_memory((mem > 0.0).then_some(mem as u64))
        .with_cpus((cpu > 0.0).then_some(cpu))
        .with_label(EXEC_LABEL, exec.id().to_hex());

    let id = env.runtime.create(&spec).await?;
    let record = ContainerRecord { id, name };
    dir.save_container(&record)?;
    Ok(record)
}

async fn monitor(exec: &Exec, env: &ExecEnv, record: &ContainerRecord) -> Result<ExecResult> {
    let dir = exec.dir();
    let sampling = exec.shutdown_token().child_token();
    let sampler = Sampler {
        profiler: exec.profiler().clone(),
        runtime: env.runtime.clone(),
        container: record.id.clone(),
        tmp_dir: dir.tmp_dir(),
        return_dir: dir.return_dir(),
        stats_interval: env.stats_interval,
        disk_interval: env.disk_interval,
    }
    .spawn(sampling.clone());

    let code = env.runtime.wait(&record.id).await;

    sampling.cancel();
    if let Err(e) = sampler.await {
        warn!("Sampler for exec {} failed: {}", exec.id().short(), e);
    }
    sample_filesystem(exec.profiler(), &dir.tmp_dir(), &dir.return_dir()).await;
    exec.profiler().stop();

    let code = code?;
    if code != 0 {
        let oom = matches!(
            env.runtime.inspect(&record.id).await,
            Ok(Some(ContainerInfo {
                status: ContainerStatus::Exited {
                    oom_killed: true,
                    ..
                },
                ..
            }))
        );
        let mut msg = format!("exited with code {}", code);
        if oom {
            msg.push_str(" (out of memory)");
        }
        return Ok(ExecResult::failure(msg));
    }

    let fileset = install(env, dir.out_path()).await?;
    Ok(ExecResult::success(fileset))
}

// ============================================================================
// Interns
// ============================================================================

async fn run_intern(exec: &Exec, env: &ExecEnv, url: &str) -> Result<ExecResult> {
    mark_running(exec);
    let root = source_path(url)?;
    if !root.exists() {
        return Ok(ExecResult::failure(format!(
            "{}: no such file or directory",
            root.display()
        )));
    }
    let fileset = install(env, root).await?;
    info!(
        "Interned {} files ({} bytes) from {}",
        fileset.n(),
        fileset.size(),
        url
    );
    Ok(ExecResult::success(fileset))
}

/// Local path named by an intern url
pub fn source_path(url: &str) -> Result<PathBuf> {
    if let Some(path) = url.strip_prefix("localfile://") {
        return Ok(PathBuf::from(path));
    }
    if Path::new(url).is_absolute() {
        return Ok(PathBuf::from(url));
    }
    let parsed = Url::parse(url).map_err(|e| Error::InvalidInput(format!("{}: {}", url, e)))?;
    match parsed.scheme() {
        "file" => parsed
            .to_file_path()
            .map_err(|_| Error::InvalidInput(format!("{}: not a local path", url))),
        scheme => Err(Error::InvalidInput(format!(
            "unsupported source url scheme {:?}: {}",
            scheme, url
        ))),
    }
}

// ============================================================================
// Shared
// ============================================================================

fn mark_running(exec: &Exec) {
    if exec.set_running() {
        if let Err(e) = exec.dir().save_state(ExecState::Running) {
            warn!("Failed to record state of exec {}: {}", exec.id().short(), e);
        }
    }
}

async fn install(env: &ExecEnv, root: PathBuf) -> Result<Fileset> {
    let store = env.store.clone();
    tokio::task::spawn_blocking(move || store.install_tree(&root))
        .await
        .map_err(|e| Error::Internal(format!("install task failed: {}", e)))?
}

/// Persist, clean up, then publish
async fn finish(exec: &Exec, env: &ExecEnv, result: ExecResult) {
    let id = exec.id();
    let dir = exec.dir();
    let state = if result.is_success() {
        ExecState::Complete
    } else {
        ExecState::Error
    };

    let (gauges, profile) = exec.profiler().snapshot();
    if let Err(e) = dir.save_profile(&gauges, &profile) {
        warn!("Failed to persist profile of exec {}: {}", id.short(), e);
    }
    let persisted = dir.save_result(&result).and_then(|_| dir.save_state(state));
    if let Err(e) = persisted {
        error!("Failed to persist result of exec {}: {}", id.short(), e);
    }

    if let Some(record) = exec.container() {
        if let Err(e) = env.runtime.remove(&record.id).await {
            warn!("Failed to remove container {}: {}", record.name, e);
        }
    }
    env.capacity.lock().release(&id);

    match &result.err {
        None => info!("Exec {} complete: {}", id.short(), result.fileset),
        Some(err) => info!("Exec {} failed: {}", id.short(), err),
    }
    exec.publish(result);
}
