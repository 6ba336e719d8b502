//! Docker 통합 테스트 - requires a local Docker daemon
//!
//! `cargo test -p dockyard-exec --test docker -- --ignored --nocapture`

mod common;

use common::{init_tracing, IMAGE};
use dockyard_exec::{ContainerRuntime, DockerRuntime, ExecConfig, ExecState, Executor, DISK};
use dockyard_foundation::{ContentId, ExecutorConfig};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn docker_executor(dir: &std::path::Path) -> (Arc<DockerRuntime>, Executor) {
    init_tracing();
    let runtime = Arc::new(DockerRuntime::connect().expect("docker client"));
    runtime.ping().await.expect("docker daemon not reachable");
    let config = ExecutorConfig::new(dir)
        .with_container_prefix(format!("dockyard-test-{}", std::process::id()))
        .with_resource("mem", (1u64 << 30) as f64)
        .with_resource("cpu", 2.0)
        .with_resource("disk", 1e10);
    let executor = Executor::new(config, runtime.clone());
    executor.start().await.expect("start");
    (runtime, executor)
}

#[tokio::test]
#[ignore]
async fn test_docker_exec() {
    let dir = tempfile::tempdir().unwrap();
    let (_runtime, x) = docker_executor(dir.path()).await;

    let config = ExecConfig::exec(IMAGE, "echo foobar > $tmp/x; cat $tmp/x > $out");
    let exec = x.put(config.digest(), config).unwrap();
    tokio::time::timeout(Duration::from_secs(300), exec.wait(&CancellationToken::new()))
        .await
        .expect("timed out")
        .expect("wait failed");

    let result = exec.result().unwrap();
    println!("Result: {:?}", result);
    assert!(result.err.is_none());
    let file = result.fileset.get(".").unwrap();
    assert_eq!(file.id, ContentId::of_str("foobar\n"));
    assert_eq!(file.size, 7);

    let inspect = exec.inspect();
    println!("{}", inspect.summary());
    for name in [DISK, "tmp"] {
        assert!(inspect.gauges[name] > 0.0);
        assert_eq!(inspect.profile[name].n, 1);
        assert_eq!(inspect.profile[name].var, 0.0);
    }
}

#[tokio::test]
#[ignore]
async fn test_docker_restart() {
    let dir = tempfile::tempdir().unwrap();
    let (runtime, x) = docker_executor(dir.path()).await;

    let config = ExecConfig::exec(IMAGE, "sleep 2");
    let id = config.digest();
    let exec = x.put(id, config).unwrap();
    let mut rx = exec.subscribe();
    tokio::time::timeout(Duration::from_secs(300), rx.wait_for(|s| *s == ExecState::Running))
        .await
        .expect("timed out")
        .unwrap();

    x.cancel();
    let err = exec.wait(&CancellationToken::new()).await.unwrap_err();
    assert!(err.to_string().contains("context canceled"));

    x.start().await.unwrap();
    let exec = x.get(&id).unwrap();
    tokio::time::timeout(Duration::from_secs(60), exec.wait(&CancellationToken::new()))
        .await
        .expect("timed out")
        .expect("wait failed");
    assert!(exec.result().unwrap().err.is_none());

    // container removed after completion
    let name = dockyard_exec::driver::container_name(&x.config().container_prefix, &id);
    assert!(runtime.inspect(&name).await.unwrap().is_none());
}
