//! Shared test fixtures: an in-process container runtime and logging setup

#![allow(dead_code)]

use async_trait::async_trait;
use dockyard_exec::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerStats, ContainerStatus, Executor,
};
use dockyard_foundation::{Error, ExecutorConfig, Result};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub const IMAGE: &str = "yikaus/alpine-bash";

/// Install a subscriber once; `RUST_LOG` controls the filter
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

struct FakeContainer {
    id: String,
    spec: ContainerSpec,
    status: watch::Sender<ContainerStatus>,
    kill: CancellationToken,
}

/// Runs container commands as host processes. Bind mounts are emulated by
/// rewriting container paths in the environment to their host paths.
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<String, Arc<FakeContainer>>>,
    missing_images: Mutex<HashSet<String>>,
    creates: AtomicUsize,
    next_id: AtomicUsize,
    image_gate: Mutex<Option<CancellationToken>>,
    start_gate: Mutex<Option<CancellationToken>>,
    inspect_delay: Mutex<Duration>,
    fail_remove: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make `ensure_image` fail for `image`
    pub fn fail_image(&self, image: &str) {
        self.missing_images.lock().unwrap().insert(image.to_string());
    }

    /// Park `ensure_image` until the returned token is canceled
    pub fn hold_images(&self) -> CancellationToken {
        let gate = CancellationToken::new();
        *self.image_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Park `start` until the returned token is canceled
    pub fn hold_starts(&self) -> CancellationToken {
        let gate = CancellationToken::new();
        *self.start_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Delay every `inspect`
    pub fn slow_inspect(&self, delay: Duration) {
        *self.inspect_delay.lock().unwrap() = delay;
    }

    /// Make `remove` fail
    pub fn fail_remove(&self) {
        self.fail_remove.store(true, Ordering::SeqCst);
    }

    /// Number of containers created so far
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Number of containers the runtime still knows about
    pub fn len(&self) -> usize {
        self.containers.lock().unwrap().len()
    }

    /// Kill and drop every container, as if the runtime lost its state
    pub fn forget_all(&self) {
        for (_, container) in self.containers.lock().unwrap().drain() {
            container.kill.cancel();
        }
    }

    fn lookup(&self, id_or_name: &str) -> Option<Arc<FakeContainer>> {
        let containers = self.containers.lock().unwrap();
        containers.get(id_or_name).cloned().or_else(|| {
            containers
                .values()
                .find(|c| c.spec.name == id_or_name)
                .cloned()
        })
    }

    fn host_path(spec: &ContainerSpec, value: &str) -> String {
        for volume in &spec.volumes {
            if let Some(rest) = value.strip_prefix(&volume.container_path) {
                return format!("{}{}", volume.host_path.display(), rest);
            }
        }
        value.to_string()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_image(&self, image: &str) -> Result<()> {
        let gate = self.image_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.cancelled().await;
        }
        if self.missing_images.lock().unwrap().contains(image) {
            return Err(Error::Runtime(format!(
                "Failed to pull image {}: pull access denied",
                image
            )));
        }
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        if self.lookup(&spec.name).is_some() {
            return Err(Error::Runtime(format!(
                "Failed to create container: Conflict. The name {} is already in use",
                spec.name
            )));
        }
        let id = format!("fake{:08}", self.next_id.fetch_add(1, Ordering::SeqCst));
        let (status, _) = watch::channel(ContainerStatus::Created);
        let container = Arc::new(FakeContainer {
            id: id.clone(),
            spec: spec.clone(),
            status,
            kill: CancellationToken::new(),
        });
        self.containers.lock().unwrap().insert(id.clone(), container);
        self.creates.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        let gate = self.start_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.cancelled().await;
        }
        let container = self
            .lookup(id)
            .ok_or_else(|| Error::Runtime(format!("No such container: {}", id)))?;
        let (program, args) = container
            .spec
            .command
            .split_first()
            .ok_or_else(|| Error::Runtime("empty command".to_string()))?;

        let mut command = tokio::process::Command::new(program);
        command
            .args(args)
            .env_clear()
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        for (key, value) in &container.spec.env {
            command.env(key, Self::host_path(&container.spec, value));
        }
        let mut child = command
            .spawn()
            .map_err(|e| Error::Runtime(format!("Failed to start container: {}", e)))?;
        container.status.send_replace(ContainerStatus::Running);

        let container = container.clone();
        tokio::spawn(async move {
            let code = tokio::select! {
                status = child.wait() => status.ok().and_then(|s| s.code()).unwrap_or(-1) as i64,
                _ = container.kill.cancelled() => {
                    let _ = child.kill().await;
                    137
                }
            };
            container.status.send_replace(ContainerStatus::Exited {
                code,
                oom_killed: false,
            });
        });
        Ok(())
    }

    async fn inspect(&self, id_or_name: &str) -> Result<Option<ContainerInfo>> {
        let delay = *self.inspect_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(self.lookup(id_or_name).map(|c| ContainerInfo {
            id: c.id.clone(),
            status: *c.status.borrow(),
        }))
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        let container = self
            .lookup(id)
            .ok_or_else(|| Error::Runtime(format!("No such container: {}", id)))?;
        let mut rx = container.status.subscribe();
        let status = *rx
            .wait_for(|s| s.is_exited())
            .await
            .map_err(|_| Error::Runtime("container vanished".to_string()))?;
        match status {
            ContainerStatus::Exited { code, .. } => Ok(code),
            _ => Err(Error::Runtime("container not exited".to_string())),
        }
    }

    async fn stats(&self, id: &str) -> Result<Option<ContainerStats>> {
        Ok(self.lookup(id).and_then(|c| {
            (*c.status.borrow() == ContainerStatus::Running).then_some(ContainerStats {
                cpu: Some(0.25),
                mem: Some((4u64 << 20) as f64),
            })
        }))
    }

    async fn remove(&self, id: &str) -> Result<()> {
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(Error::Runtime(format!(
                "Failed to remove container {}: daemon unavailable",
                id
            )));
        }
        let removed = {
            let mut containers = self.containers.lock().unwrap();
            let key = containers
                .iter()
                .find(|(key, c)| key.as_str() == id || c.spec.name == id)
                .map(|(key, _)| key.clone());
            key.and_then(|key| containers.remove(&key))
        };
        if let Some(container) = removed {
            container.kill.cancel();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fake"
    }
}

/// Executor over a fresh [`FakeRuntime`], started, with capacity for the
/// usual test execs
pub async fn executor(dir: &Path) -> (Arc<FakeRuntime>, Executor) {
    init_tracing();
    let runtime = FakeRuntime::new();
    let config = ExecutorConfig::new(dir)
        .with_stats_interval(Duration::from_millis(50))
        .with_resource("mem", (1u64 << 30) as f64)
        .with_resource("cpu", 2.0)
        .with_resource("disk", 1e10);
    let executor = Executor::new(config, runtime.clone());
    executor.start().await.expect("start");
    (runtime, executor)
}
