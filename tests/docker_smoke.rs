//! Smoke tests against a real Docker daemon.
//!
//! Requires: a reachable Docker engine and network access to pull images.
//!   cargo test --test docker_smoke -- --ignored

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use tempsvc::config::EngineConfig;
use tempsvc::launch::{ImageRef, LaunchSpec};
use tempsvc::provisioner::Provisioner;
use tempsvc::runtime::{ContainerRuntime, DockerRuntime};
use tempsvc::services::{Nats, NatsOptions, Redis, RedisOptions};

fn engine() -> EngineConfig {
    EngineConfig {
        default_ttl: Duration::from_secs(60),
        ..Default::default()
    }
}

#[tokio::test]
#[ignore = "needs a Docker daemon"]
async fn test_redis_round_trip() {
    let provisioner = Provisioner::docker(engine()).await.unwrap();
    let redis = provisioner
        .provision(&Redis::from_config(provisioner.config()), &RedisOptions::default())
        .await
        .unwrap();

    let mut stream = TcpStream::connect(redis.addr()).await.unwrap();
    stream.write_all(b"SET k v\r\nGET k\r\n").await.unwrap();
    let mut reader = BufReader::new(stream);
    let mut lines = Vec::new();
    for _ in 0..3 {
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        lines.push(line.trim_end().to_string());
    }
    assert_eq!(lines, ["+OK", "$1", "v"]);

    redis.close().await.unwrap();
}

#[tokio::test]
#[ignore = "needs a Docker daemon"]
async fn test_nats_monitor_published() {
    let provisioner = Provisioner::docker(engine()).await.unwrap();
    let nats = provisioner
        .provision(&Nats::from_config(provisioner.config()), &NatsOptions::default())
        .await
        .unwrap();

    let monitor = nats.monitor_url().unwrap();
    let response = reqwest::get(format!("{monitor}/varz")).await.unwrap();
    assert!(response.status().is_success());

    nats.close().await.unwrap();
}

#[tokio::test]
#[ignore = "needs a Docker daemon"]
async fn test_reap_skips_live_containers() {
    let provisioner = Provisioner::docker(engine()).await.unwrap();
    let redis = provisioner
        .provision(&Redis::new(), &RedisOptions::default())
        .await
        .unwrap();

    let runtime = DockerRuntime::connect(provisioner.config()).await.unwrap();
    let reaped = runtime.reap_expired().await.unwrap();
    assert!(!reaped.iter().any(|name| name == redis.name()));

    redis.close().await.unwrap();
}

#[tokio::test]
#[ignore = "needs a Docker daemon"]
async fn test_expired_nats_removed_when_provisioner_connects() {
    // Started without an expiry timer, as happens for a shell-less image
    // whose owning process died.
    let runtime = DockerRuntime::connect(&engine()).await.unwrap();
    let spec = LaunchSpec::builder("nats", ImageRef::new("nats", "2.0.0-linux"))
        .ttl(Duration::from_secs(1))
        .build()
        .unwrap();
    let orphan = runtime.start(&spec).await.unwrap();

    tokio::time::sleep(Duration::from_secs(3)).await;
    let _provisioner = Provisioner::docker(engine()).await.unwrap();

    let docker = bollard::Docker::connect_with_local_defaults().unwrap();
    let mut gone = false;
    for _ in 0..20 {
        if docker.inspect_container(orphan.id(), None).await.is_err() {
            gone = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(250)).await;
    }
    assert!(gone, "container {} still present", orphan.name());
}
