//! Container runtime seam
//!
//! The executor only needs a handful of primitives from the runtime:
//! create/start a container, look it up, wait for it, sample its stats and
//! remove it. [`DockerRuntime`] implements them on top of the Docker API.

pub mod docker;

pub use docker::DockerRuntime;

use async_trait::async_trait;
use dockyard_foundation::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Volume mount configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeMount {
    /// Host path
    pub host_path: PathBuf,
    /// Container path
    pub container_path: String,
}

impl VolumeMount {
    pub fn new(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host_path: host.into(),
            container_path: container.into(),
        }
    }

    /// `host:container` bind string
    pub fn bind(&self) -> String {
        format!("{}:{}", self.host_path.display(), self.container_path)
    }
}

/// What to create
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    /// Container name, unique per runtime
    pub name: String,
    /// Container image
    pub image: String,
    /// Command to run
    pub command: Vec<String>,
    /// Environment variables
    pub env: Vec<(String, String)>,
    /// Volume mounts
    pub volumes: Vec<VolumeMount>,
    /// Memory limit in bytes
    pub memory: Option<u64>,
    /// CPU limit in cores
    pub cpus: Option<f64>,
    /// Labels
    pub labels: HashMap<String, String>,
}

impl ContainerSpec {
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    pub fn with_command(mut self, cmd: Vec<String>) -> Self {
        self.command = cmd;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn with_volume(mut self, mount: VolumeMount) -> Self {
        self.volumes.push(mount);
        self
    }

    pub fn with_memory(mut self, bytes: Option<u64>) -> Self {
        self.memory = bytes;
        self
    }

    pub fn with_cpus(mut self, cpus: Option<f64>) -> Self {
        self.cpus = cpus;
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Lifecycle status as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerStatus {
    Created,
    Running,
    Exited { code: i64, oom_killed: bool },
}

impl ContainerStatus {
    pub fn is_exited(&self) -> bool {
        matches!(self, ContainerStatus::Exited { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub status: ContainerStatus,
}

/// One stats reading. Fields the runtime could not report are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ContainerStats {
    /// Cores in use
    pub cpu: Option<f64>,
    /// Bytes in use
    pub mem: Option<f64>,
}

/// Container runtime trait - implement to add new runtime backends
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Make `image` available locally, pulling it if missing
    async fn ensure_image(&self, image: &str) -> Result<()>;

    /// Create (but do not start) a container; returns its id
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, id: &str) -> Result<()>;

    /// Look up a container by id or name; `None` if the runtime has no record
    async fn inspect(&self, id_or_name: &str) -> Result<Option<ContainerInfo>>;

    /// Block until the container is no longer running; returns the exit code
    async fn wait(&self, id: &str) -> Result<i64>;

    /// Current resource usage; `None` when no reading is available
    async fn stats(&self, id: &str) -> Result<Option<ContainerStats>>;

    /// Force-remove the container and its volumes. Missing containers are not
    /// an error.
    async fn remove(&self, id: &str) -> Result<()>;

    /// Get runtime name
    fn name(&self) -> &'static str;
}
