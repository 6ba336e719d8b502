//! # dockyard-exec
//!
//! Local executor: runs content-addressed execs in containers on one machine.
//!
//! ## Features
//!
//! - Exec catalog keyed by `ContentId`, idempotent resubmission
//! - Container-backed execs and tree interns
//! - Resource profiling (gauges plus online statistics)
//! - Content-addressed outputs (`Fileset`, `ContentStore`)
//! - **Crash/restart recovery from durable per-exec state**
//!
//! ```no_run
//! use dockyard_exec::{DockerRuntime, ExecConfig, Executor};
//! use dockyard_foundation::ExecutorConfig;
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> dockyard_foundation::Result<()> {
//! let runtime = Arc::new(DockerRuntime::connect()?);
//! let executor = Executor::new(ExecutorConfig::load()?, runtime);
//! executor.start().await?;
//!
//! let config = ExecConfig::exec("yikaus/alpine-bash", "echo hi > $out");
//! let exec = executor.put(config.digest(), config)?;
//! exec.wait(&CancellationToken::new()).await?;
//! println!("{}", exec.result()?.fileset);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod driver;
pub mod exec;
pub mod executor;
pub mod fileset;
pub mod layout;
pub mod profile;
pub mod resources;
pub mod runtime;
pub mod state;
pub mod store;

// Exec system
pub use config::ExecConfig;
pub use exec::{Exec, ExecInspect};
pub use executor::Executor;
pub use state::ExecState;

// Outputs
pub use fileset::{ExecResult, File, Fileset};
pub use store::ContentStore;

// Resources and profiling
pub use profile::{Gauges, Profile, Profiler, Stats};
pub use resources::{Capacity, Resources, CPU, DISK, MEM};

// Container runtime
pub use runtime::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerStats, ContainerStatus,
    DockerRuntime, VolumeMount,
};
