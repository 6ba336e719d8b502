//! Docker runtime - runs execs in Docker containers through bollard

use super::{ContainerInfo, ContainerRuntime, ContainerSpec, ContainerStats, ContainerStatus};
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StatsOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{ContainerStateStatusEnum, HostConfig};
use bollard::Docker;
use dockyard_foundation::{Error, Result};
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use tracing::{debug, info};

/// Docker-backed [`ContainerRuntime`]
#[derive(Clone)]
pub struct DockerRuntime {
    /// Docker client
    docker: Arc<Docker>,
}

impl DockerRuntime {
    /// Connect with local defaults (unix socket or `DOCKER_HOST`)
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| runtime_error("connect to docker", e))?;
        Ok(Self::with_client(docker))
    }

    pub fn with_client(docker: Docker) -> Self {
        Self {
            docker: Arc::new(docker),
        }
    }

    /// Check that the daemon answers
    pub async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| runtime_error("ping docker", e))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ensure_image(&self, image: &str) -> Result<()> {
        match self.docker.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(e) if is_not_found(&e) => {}
            Err(e) => return Err(runtime_error("inspect image", e)),
        }

        info!("Pulling image {}", image);
        let (from_image, tag) = split_image(image);
        let options = CreateImageOptions {
            from_image,
            tag,
            ..Default::default()
        };
        self.docker
            .create_image(Some(options), None, None)
            .try_collect::<Vec<_>>()
            .await
            .map_err(|e| runtime_error(&format!("pull image {}", image), e))?;
        Ok(())
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        // Convert env to Docker format
        let env: Vec<String> = spec.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let binds: Vec<String> = spec.volumes.iter().map(|v| v.bind()).collect();

        let config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(env),
            labels: Some(spec.labels.clone()),
            host_config: Some(HostConfig {
                binds: if binds.is_empty() { None } else { Some(binds) },
                memory: spec.memory.map(|m| m as i64),
                nano_cpus: spec.cpus.map(|c| (c * 1e9) as i64),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        };
        let options = CreateContainerOptions {
            name: spec.name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), config)
            .await
            .map_err(|e| runtime_error("create container", e))?;
        debug!("Created container {} ({})", spec.name, response.id);
        Ok(response.id)
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| runtime_error("start container", e))
    }

    async fn inspect(&self, id_or_name: &str) -> Result<Option<ContainerInfo>> {
        let response = match self
            .docker
            .inspect_container(id_or_name, None::<InspectContainerOptions>)
            .await
        {
            Ok(response) => response,
            Err(e) if is_not_found(&e) => return Ok(None),
            Err(e) => return Err(runtime_error("inspect container", e)),
        };

        let state = response.state.unwrap_or_default();
        let status = match state.status {
            Some(ContainerStateStatusEnum::CREATED) => ContainerStatus::Created,
            Some(
                ContainerStateStatusEnum::RUNNING
                | ContainerStateStatusEnum::PAUSED
                | ContainerStateStatusEnum::RESTARTING,
            ) => ContainerStatus::Running,
            Some(
                ContainerStateStatusEnum::EXITED
                | ContainerStateStatusEnum::DEAD
                | ContainerStateStatusEnum::REMOVING,
            ) => ContainerStatus::Exited {
                code: state.exit_code.unwrap_or(-1),
                oom_killed: state.oom_killed.unwrap_or(false),
            },
            _ if state.running.unwrap_or(false) => ContainerStatus::Running,
            _ => ContainerStatus::Created,
        };

        Ok(Some(ContainerInfo {
            id: response.id.unwrap_or_else(|| id_or_name.to_string()),
            status,
        }))
    }

    async fn wait(&self, id: &str) -> Result<i64> {
        let options = WaitContainerOptions {
            condition: "not-running",
        };
        let mut stream = Box::pin(self.docker.wait_container(id, Some(options)));
        match stream.next().await {
            Some(Ok(response)) => Ok(response.status_code),
            // bollard reports a non-zero exit as an error
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(runtime_error("wait container", e)),
            None => Err(Error::Runtime(format!(
                "wait container {}: stream ended without status",
                id
            ))),
        }
    }

    async fn stats(&self, id: &str) -> Result<Option<ContainerStats>> {
        let options = StatsOptions {
            stream: false,
            one_shot: false,
        };
        let mut stream = Box::pin(self.docker.stats(id, Some(options)));
        let stats = match stream.next().await {
            Some(Ok(stats)) => stats,
            Some(Err(e)) if is_not_found(&e) => return Ok(None),
            Some(Err(e)) => return Err(runtime_error("container stats", e)),
            None => return Ok(None),
        };

        let cpu_delta = stats
            .cpu_stats
            .cpu_usage
            .total_usage
            .saturating_sub(stats.precpu_stats.cpu_usage.total_usage);
        let sys_delta = stats
            .cpu_stats
            .system_cpu_usage
            .unwrap_or(0)
            .saturating_sub(stats.precpu_stats.system_cpu_usage.unwrap_or(0));
        let online = stats.cpu_stats.online_cpus.unwrap_or(1).max(1);
        let cpu = (sys_delta > 0).then(|| cpu_delta as f64 / sys_delta as f64 * online as f64);
        let mem = stats
            .memory_stats
            .usage
            .filter(|usage| *usage > 0)
            .map(|usage| usage as f64);

        if cpu.is_none() && mem.is_none() {
            return Ok(None);
        }
        Ok(Some(ContainerStats { cpu, mem }))
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };
        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => Ok(()),
            Err(e) => Err(runtime_error("remove container", e)),
        }
    }

    fn name(&self) -> &'static str {
        "docker"
    }
}

fn is_not_found(err: &bollard::errors::Error) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

fn runtime_error(op: &str, err: bollard::errors::Error) -> Error {
    Error::Runtime(format!("Failed to {}: {}", op, err))
}

/// Split `repo[:tag]` for a pull. Untagged images pull `latest`; digests are
/// passed through whole.
fn split_image(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (image, "latest"),
    }
}
