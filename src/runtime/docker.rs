//! Docker implementation of [`ContainerRuntime`].
//!
//! Expiry is enforced twice over:
//! - every container carries a `<prefix>.expires-at` label, so a later
//!   [`DockerRuntime::reap_expired`] sweep removes anything whose owner
//!   crashed;
//! - [`set_ttl`](ContainerRuntime::set_ttl) starts a detached watchdog inside
//!   the container that signals PID 1 once the TTL passes, and the container
//!   is created with auto-remove so the engine deletes it on exit. Images
//!   without a shell cannot run the watchdog; the label still applies.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecOptions};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding};
use futures::StreamExt;

use crate::config::EngineConfig;
use crate::launch::{ImageRef, LaunchSpec};
use crate::runtime::{ContainerHandle, ContainerRuntime, RuntimeError};

/// Container engine backed by the local Docker daemon.
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
    label_prefix: String,
    auto_pull: bool,
}

impl DockerRuntime {
    /// Connect using `DOCKER_HOST` or the platform's default socket.
    pub async fn connect(config: &EngineConfig) -> Result<Self, RuntimeError> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| RuntimeError::Unavailable {
                reason: e.to_string(),
            })?;

        docker.ping().await.map_err(|e| RuntimeError::Unavailable {
            reason: e.to_string(),
        })?;

        tracing::debug!("Connected to Docker");
        Ok(Self::with_client(docker, config))
    }

    /// Wrap an existing client.
    pub fn with_client(docker: Docker, config: &EngineConfig) -> Self {
        Self {
            docker,
            label_prefix: config.label_prefix.clone(),
            auto_pull: true,
        }
    }

    /// Fail instead of pulling when an image is missing locally.
    pub fn without_auto_pull(mut self) -> Self {
        self.auto_pull = false;
        self
    }

    fn managed_label(&self) -> String {
        format!("{}.managed", self.label_prefix)
    }

    fn service_label(&self) -> String {
        format!("{}.service", self.label_prefix)
    }

    fn expires_label(&self) -> String {
        format!("{}.expires-at", self.label_prefix)
    }

    fn container_name(&self, spec: &LaunchSpec) -> String {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        format!("{}-{}-{}", self.label_prefix, spec.service(), &suffix[..12])
    }

    async fn ensure_image(&self, image: &ImageRef) -> Result<(), RuntimeError> {
        let reference = image.to_string();
        if self.docker.inspect_image(&reference).await.is_ok() {
            tracing::debug!("Image '{}' exists locally", reference);
            return Ok(());
        }

        if !self.auto_pull {
            return Err(RuntimeError::ImagePull {
                image: reference,
                reason: "image not present and auto-pull is disabled".to_string(),
            });
        }

        tracing::info!("Pulling image: {}", reference);

        let options = CreateImageOptions {
            from_image: image.repository.clone(),
            tag: image.tag.clone(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        tracing::trace!("Pull status: {}", status);
                    }
                }
                Err(e) => {
                    return Err(RuntimeError::ImagePull {
                        image: reference,
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!("Pulled image: {}", reference);
        Ok(())
    }

    fn container_config(&self, spec: &LaunchSpec) -> Config<String> {
        let mut port_bindings = HashMap::new();
        let mut exposed_ports = HashMap::new();
        for (container_port, host_port) in spec.port_bindings() {
            let key = format!("{}/tcp", container_port);
            port_bindings.insert(
                key.clone(),
                Some(vec![PortBinding {
                    host_ip: Some(spec.host_ip().to_string()),
                    host_port: Some(host_port.to_string()),
                }]),
            );
            exposed_ports.insert(key, HashMap::new());
        }

        let binds: Vec<String> = spec.mounts().iter().map(|m| m.to_bind_string()).collect();

        let expires_at = chrono::Utc::now().timestamp() + spec.ttl_secs() as i64;
        let labels = HashMap::from([
            (self.managed_label(), "true".to_string()),
            (self.service_label(), spec.service().to_string()),
            (self.expires_label(), expires_at.to_string()),
        ]);

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            binds: if binds.is_empty() { None } else { Some(binds) },
            auto_remove: Some(true),
            ..Default::default()
        };

        Config {
            image: Some(spec.image().to_string()),
            env: if spec.environment().is_empty() {
                None
            } else {
                Some(spec.environment().to_vec())
            },
            cmd: spec.command().map(<[String]>::to_vec),
            exposed_ports: Some(exposed_ports),
            labels: Some(labels),
            host_config: Some(host_config),
            ..Default::default()
        }
    }

    async fn remove(&self, id: &str) -> Result<(), bollard::errors::Error> {
        let result = self
            .docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: true,
                    ..Default::default()
                }),
            )
            .await;

        match result {
            Err(bollard::errors::Error::DockerResponseServerError {
                status_code: 404 | 409,
                ..
            }) => Ok(()),
            other => other,
        }
    }

    /// Remove every managed container whose expiry label has passed.
    ///
    /// Returns the names of the removed containers. Intended to run at
    /// process start-up to sweep up after earlier runs that died without
    /// cleaning up.
    pub async fn reap_expired(&self) -> Result<Vec<String>, RuntimeError> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{}=true", self.managed_label())],
        )]);

        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| RuntimeError::Query {
                reason: e.to_string(),
            })?;

        let now = chrono::Utc::now().timestamp();
        let expires_label = self.expires_label();
        let mut removed = Vec::new();

        for container in containers {
            let Some(id) = container.id else { continue };
            let expired = container
                .labels
                .as_ref()
                .and_then(|labels| labels.get(&expires_label))
                .and_then(|value| value.parse::<i64>().ok())
                .is_none_or(|expires_at| expires_at <= now);
            if !expired {
                continue;
            }

            let name = container
                .names
                .and_then(|names| names.into_iter().next())
                .map(|n| n.trim_start_matches('/').to_string())
                .unwrap_or_else(|| id.clone());

            match self.remove(&id).await {
                Ok(()) => {
                    tracing::info!("Reaped expired container: {}", name);
                    removed.push(name);
                }
                Err(e) => tracing::warn!("Failed to reap container {}: {}", name, e),
            }
        }

        Ok(removed)
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn start(&self, spec: &LaunchSpec) -> Result<ContainerHandle, RuntimeError> {
        self.ensure_image(spec.image()).await?;

        let name = self.container_name(spec);
        let options = CreateContainerOptions {
            name: name.clone(),
            ..Default::default()
        };

        let response = self
            .docker
            .create_container(Some(options), self.container_config(spec))
            .await
            .map_err(|e| RuntimeError::Create {
                name: name.clone(),
                reason: e.to_string(),
            })?;

        if let Err(e) = self
            .docker
            .start_container(&response.id, None::<StartContainerOptions<String>>)
            .await
        {
            if let Err(remove_err) = self.remove(&response.id).await {
                tracing::warn!(
                    "Failed to remove container {} after failed start: {}",
                    name,
                    remove_err
                );
            }
            return Err(RuntimeError::Start {
                name,
                reason: e.to_string(),
            });
        }

        tracing::debug!("Started container {} ({})", name, response.id);
        Ok(ContainerHandle::new(response.id, name))
    }

    async fn stop(&self, handle: &ContainerHandle) -> Result<(), RuntimeError> {
        self.remove(handle.id())
            .await
            .map_err(|e| RuntimeError::Stop {
                id: handle.id().to_string(),
                reason: e.to_string(),
            })
    }

    async fn set_ttl(&self, handle: &ContainerHandle, ttl: Duration) -> Result<(), RuntimeError> {
        let secs = ttl.as_secs().max(1);
        let exec = self
            .docker
            .create_exec(
                handle.id(),
                CreateExecOptions {
                    cmd: Some(vec![
                        "sh".to_string(),
                        "-c".to_string(),
                        format!("sleep {secs}; kill 1"),
                    ]),
                    attach_stdout: Some(false),
                    attach_stderr: Some(false),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| RuntimeError::Expire {
                id: handle.id().to_string(),
                reason: e.to_string(),
            })?;

        self.docker
            .start_exec(
                &exec.id,
                Some(StartExecOptions {
                    detach: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| RuntimeError::Expire {
                id: handle.id().to_string(),
                reason: e.to_string(),
            })?;

        Ok(())
    }
}
