//! Per-service adapters.
//!
//! Each adapter supplies only what differs between services: image identity,
//! default environment and mount layout, published ports and a readiness
//! probe. Starting, probing and cleanup are shared through the
//! [`Provisioner`](crate::provisioner::Provisioner).

pub mod mysql;
pub mod nats;
pub mod nats_streaming;
pub mod redis;

use crate::config::EngineConfig;
use crate::error::ConfigError;
use crate::launch::{ImageRef, LaunchSpec, LaunchSpecBuilder, Mount};
use crate::ports::HostPorts;
use crate::probe::ReadinessProbe;
use crate::resolve::PortChoice;
use crate::resource::Endpoint;

pub use mysql::{Mysql, MysqlOptions, MysqlSettings};
pub use nats::{Nats, NatsOptions, NatsSettings};
pub use nats_streaming::{NatsStreaming, NatsStreamingOptions, NatsStreamingSettings};
pub use redis::{Redis, RedisOptions, RedisSettings};

/// Capability set of one service type.
pub trait Service: Send + Sync {
    /// Partial, user-supplied options.
    type Options: Default + Send + Sync;
    /// Fully populated options.
    type Settings: Clone + Send + Sync + 'static;

    /// Short name used in container names and logs.
    fn name(&self) -> &'static str;

    /// The settings used for every field the caller leaves unset.
    fn defaults(&self) -> &Self::Settings;

    /// Merge `options` over [`defaults`](Self::defaults). Pure.
    fn resolve(&self, options: &Self::Options) -> Self::Settings;

    /// Container port clients connect to, and which the probe uses.
    fn primary_port(&self) -> u16;

    /// How each container port should be published.
    fn ports(&self, settings: &Self::Settings) -> Vec<(u16, PortChoice)>;

    /// Describe the container for the resolved settings and host ports.
    fn launch_spec(
        &self,
        settings: &Self::Settings,
        ports: &HostPorts,
        engine: &EngineConfig,
    ) -> Result<LaunchSpec, ConfigError>;

    /// Readiness check against the published endpoint.
    fn probe(&self, settings: &Self::Settings, endpoint: &Endpoint) -> Box<dyn ReadinessProbe>;
}

/// Base layer applied before a service's own environment and mounts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LaunchOverrides {
    /// Alternative image repository, e.g. a registry mirror.
    pub repository: Option<String>,
    /// Extra `KEY=value` entries, placed before the service's own.
    pub env: Vec<String>,
    /// Extra mounts, placed before the service's own.
    pub mounts: Vec<Mount>,
}

impl LaunchOverrides {
    pub fn is_empty(&self) -> bool {
        self.repository.is_none() && self.env.is_empty() && self.mounts.is_empty()
    }

    /// Start a builder for `service` with these overrides applied.
    pub(crate) fn builder(
        &self,
        service: &str,
        default_repository: &str,
        tag: &str,
        ttl: std::time::Duration,
        engine: &EngineConfig,
    ) -> LaunchSpecBuilder {
        let repository = self
            .repository
            .as_deref()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or(default_repository);

        let mut builder = LaunchSpec::builder(service, ImageRef::new(repository, tag))
            .env_entries(self.env.iter().cloned())
            .ttl(ttl)
            .host_ip(engine.host.clone());
        for mount in &self.mounts {
            builder = builder.mount(mount.clone());
        }
        builder
    }
}

/// Pick the overrides from `options` unless they are empty.
pub(crate) fn resolve_overrides(
    options: &LaunchOverrides,
    defaults: &LaunchOverrides,
) -> LaunchOverrides {
    if options.is_empty() {
        defaults.clone()
    } else {
        options.clone()
    }
}

/// Bind every published port of `ports` onto `builder`.
pub(crate) fn bind_ports(mut builder: LaunchSpecBuilder, ports: &HostPorts) -> LaunchSpecBuilder {
    for (container_port, host_port) in ports.iter() {
        builder = builder.bind_port(container_port, host_port);
    }
    builder
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_repository_and_order() {
        let overrides = LaunchOverrides {
            repository: Some("mirror.local/redis".to_string()),
            env: vec!["TZ=UTC".to_string()],
            mounts: vec![Mount::bind("/tmp/conf", "/usr/local/etc/redis")],
        };
        let spec = overrides
            .builder(
                "redis",
                "redis",
                "6.0.9-alpine",
                std::time::Duration::from_secs(60),
                &EngineConfig::default(),
            )
            .env("EXTRA", "1")
            .build()
            .unwrap();

        assert_eq!(spec.image().to_string(), "mirror.local/redis:6.0.9-alpine");
        assert_eq!(spec.environment(), ["TZ=UTC", "EXTRA=1"]);
        assert_eq!(spec.mounts().len(), 1);
    }

    #[test]
    fn test_blank_repository_ignored() {
        let overrides = LaunchOverrides {
            repository: Some(String::new()),
            ..Default::default()
        };
        let spec = overrides
            .builder(
                "nats",
                "nats",
                "2.0.0-linux",
                std::time::Duration::from_secs(60),
                &EngineConfig::default(),
            )
            .build()
            .unwrap();
        assert_eq!(spec.image().repository, "nats");
    }

    #[test]
    fn test_resolve_overrides() {
        let defaults = LaunchOverrides {
            env: vec!["A=1".to_string()],
            ..Default::default()
        };
        assert_eq!(
            resolve_overrides(&LaunchOverrides::default(), &defaults),
            defaults
        );
        let mine = LaunchOverrides {
            env: vec!["B=2".to_string()],
            ..Default::default()
        };
        assert_eq!(resolve_overrides(&mine, &defaults), mine);
    }
}
