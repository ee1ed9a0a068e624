//! Entry point for provisioning services.
//!
//! A [`Provisioner`] is built once with its container engine and engine-wide
//! settings, then shared by the tests that need services. There is no
//! process-wide state; every dependency is passed in here.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::{ConfigError, ProvisionError};
use crate::launcher::{Launcher, ProvisionRequest};
use crate::ports::PortAllocator;
use crate::resource::{Endpoint, Resource};
use crate::retry::RetryPolicy;
use crate::runtime::{ContainerRuntime, DockerRuntime, RuntimeError};
use crate::services::Service;

/// Provisions service containers on one engine.
#[derive(Clone)]
pub struct Provisioner {
    launcher: Launcher,
    ports: PortAllocator,
    config: EngineConfig,
}

impl Provisioner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>, config: EngineConfig) -> Self {
        Self {
            launcher: Launcher::new(runtime),
            ports: PortAllocator::new(),
            config,
        }
    }

    /// Share a port lease table with other provisioners.
    pub fn with_port_allocator(mut self, ports: PortAllocator) -> Self {
        self.ports = ports;
        self
    }

    /// Provisioner backed by the local Docker daemon.
    ///
    /// Removes expired containers left behind by earlier runs before
    /// returning. Images without a shell never arm the in-container
    /// deadline, so this sweep is what bounds their lifetime. A failed
    /// sweep is logged and does not fail the connect.
    pub async fn docker(config: EngineConfig) -> Result<Self, RuntimeError> {
        let runtime = DockerRuntime::connect(&config).await?;
        match runtime.reap_expired().await {
            Ok(removed) if !removed.is_empty() => {
                tracing::info!("Removed {} expired container(s) on startup", removed.len());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Startup sweep of expired containers failed: {}", e),
        }
        Ok(Self::new(Arc::new(runtime), config))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    pub fn runtime(&self) -> &Arc<dyn ContainerRuntime> {
        self.launcher.runtime()
    }

    /// Start `service` with `options` and wait until it accepts clients.
    ///
    /// Uses the engine's retry policy and cannot be cancelled except by
    /// dropping the future, which leaves any started container to its TTL.
    pub async fn provision<S: Service>(
        &self,
        service: &S,
        options: &S::Options,
    ) -> Result<Resource<S::Settings>, ProvisionError> {
        self.provision_with(
            service,
            options,
            &self.config.retry_policy(),
            &CancellationToken::new(),
        )
        .await
    }

    /// [`provision`](Self::provision) with an explicit retry policy and a
    /// cancellation token.
    pub async fn provision_with<S: Service>(
        &self,
        service: &S,
        options: &S::Options,
        policy: &RetryPolicy,
        cancel: &CancellationToken,
    ) -> Result<Resource<S::Settings>, ProvisionError> {
        tracing::debug!("Building launch spec for {}", service.name());
        let settings = service.resolve(options);

        let choices = service.ports(&settings);
        let primary = service.primary_port();
        let primary_published = choices
            .iter()
            .any(|(port, choice)| *port == primary && choice.is_published());
        if !primary_published {
            return Err(ConfigError::ProbePortUnpublished {
                service: service.name().to_string(),
                port: primary,
            }
            .into());
        }

        let plan = self.ports.plan(&choices)?;
        let spec = service.launch_spec(&settings, plan.ports(), &self.config)?;

        let primary_host_port = plan.ports().get(primary).ok_or_else(|| {
            ConfigError::ProbePortUnpublished {
                service: service.name().to_string(),
                port: primary,
            }
        })?;
        let endpoint = Endpoint::new(
            self.config.host.clone(),
            primary_host_port,
            plan.ports().clone(),
        );
        let probe = service.probe(&settings, &endpoint);

        let request =
            ProvisionRequest::new(spec, settings, endpoint).with_leases(plan.into_leases());
        self.launcher
            .provision(request, probe.as_ref(), policy, cancel)
            .await
    }
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("ports", &self.ports)
            .field("config", &self.config)
            .finish()
    }
}
