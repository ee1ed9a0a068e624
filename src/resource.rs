//! Handles to provisioned containers.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::CleanupError;
use crate::launch::LaunchSpec;
use crate::ports::HostPorts;
use crate::runtime::{ContainerHandle, ContainerRuntime};

/// Where a provisioned service can be reached from the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    primary_port: u16,
    ports: HostPorts,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, primary_port: u16, ports: HostPorts) -> Self {
        Self {
            host: host.into(),
            primary_port,
            ports,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    /// Host port of the service's client port.
    pub fn primary_port(&self) -> u16 {
        self.primary_port
    }

    /// Host port published for `container_port`, if it was published.
    pub fn port(&self, container_port: u16) -> Option<u16> {
        self.ports.get(container_port)
    }

    pub fn ports(&self) -> &HostPorts {
        &self.ports
    }

    /// `host:port` of the client port.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.primary_port)
    }

    /// `host:port` for another published container port.
    pub fn addr_of(&self, container_port: u16) -> Option<String> {
        self.port(container_port)
            .map(|port| format!("{}:{}", self.host, port))
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.primary_port)
    }
}

/// A running, ready service container.
///
/// Owns the container exclusively. [`close`](Self::close) removes it; if the
/// handle is dropped without closing, the container lives until its TTL.
/// Client connections are never cached here; build them from
/// [`endpoint`](Self::endpoint) or with [`connect_with`](Self::connect_with).
pub struct Resource<S> {
    handle: ContainerHandle,
    spec: LaunchSpec,
    settings: S,
    endpoint: Endpoint,
    runtime: Arc<dyn ContainerRuntime>,
    closed: AtomicBool,
}

impl<S> Resource<S> {
    pub(crate) fn new(
        handle: ContainerHandle,
        spec: LaunchSpec,
        settings: S,
        endpoint: Endpoint,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Self {
        Self {
            handle,
            spec,
            settings,
            endpoint,
            runtime,
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> &str {
        self.handle.id()
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    pub fn handle(&self) -> &ContainerHandle {
        &self.handle
    }

    /// The launch description the container was started from.
    pub fn spec(&self) -> &LaunchSpec {
        &self.spec
    }

    /// The effective options after defaults were applied.
    pub fn settings(&self) -> &S {
        &self.settings
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.endpoint.port(container_port)
    }

    /// Build a client with a caller-supplied constructor.
    pub fn connect_with<T>(&self, connect: impl FnOnce(&Endpoint, &S) -> T) -> T {
        connect(&self.endpoint, &self.settings)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop and remove the container.
    ///
    /// Only the first call does anything; later and concurrent calls return
    /// `Ok(())` without touching the engine. A failed removal is reported
    /// once and not retried.
    pub async fn close(&self) -> Result<(), CleanupError> {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        tracing::info!("Stopping container: {}", self.handle);

        self.runtime
            .stop(&self.handle)
            .await
            .map_err(|source| CleanupError {
                id: self.handle.id().to_string(),
                source,
            })?;

        tracing::info!("Stopped container: {}", self.handle);
        Ok(())
    }
}

impl<S> std::fmt::Debug for Resource<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("handle", &self.handle)
            .field("endpoint", &self.endpoint)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl<S> Drop for Resource<S> {
    fn drop(&mut self) {
        if !self.is_closed() {
            tracing::warn!(
                "Resource '{}' dropped without close(), container remains until its {}s expiry",
                self.handle,
                self.spec.ttl_secs()
            );
        }
    }
}
