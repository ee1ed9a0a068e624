//! NATS Streaming test servers.
//!
//! The server keeps its channels in memory unless `file_store` is set, in
//! which case it writes to `/data` and `host_data_path` is mounted there.
//! Without `file_store` a data path is ignored.
//!
//! Like plain NATS the image has no shell, so expiry relies on the label
//! and a later reap rather than the in-container timer.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::{DEFAULT_TTL, EngineConfig};
use crate::error::ConfigError;
use crate::launch::LaunchSpec;
use crate::ports::HostPorts;
use crate::probe::{HttpProbe, ProbeError, ReadinessProbe, probe_fn};
use crate::resolve::{PortChoice, resolve_field, resolve_optional};
use crate::resource::{Endpoint, Resource};
use crate::services::{LaunchOverrides, Service, bind_ports, resolve_overrides};

pub const REPOSITORY: &str = "nats-streaming";
pub const DEFAULT_TAG: &str = "0.15.1-linux";
pub const DEFAULT_CLUSTER_ID: &str = "tststan";
pub const CLIENT_PORT: u16 = 4222;
pub const MONITOR_PORT: u16 = 8222;

const DATA_DIR: &str = "/data";

#[derive(Debug, Clone, Default)]
pub struct NatsStreamingOptions {
    pub tag: Option<String>,
    pub cluster_id: Option<String>,
    /// Persist channels to `/data` instead of memory.
    pub file_store: Option<bool>,
    pub host_data_path: Option<PathBuf>,
    pub client_port: Option<PortChoice>,
    pub monitor_port: Option<PortChoice>,
    pub ttl: Option<Duration>,
    pub overrides: LaunchOverrides,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsStreamingSettings {
    pub tag: String,
    pub cluster_id: String,
    pub file_store: bool,
    pub host_data_path: Option<PathBuf>,
    pub client_port: PortChoice,
    pub monitor_port: PortChoice,
    pub ttl: Duration,
    pub overrides: LaunchOverrides,
}

impl Default for NatsStreamingSettings {
    fn default() -> Self {
        Self {
            tag: DEFAULT_TAG.to_string(),
            cluster_id: DEFAULT_CLUSTER_ID.to_string(),
            file_store: false,
            host_data_path: None,
            client_port: PortChoice::Allocate,
            monitor_port: PortChoice::Allocate,
            ttl: DEFAULT_TTL,
            overrides: LaunchOverrides::default(),
        }
    }
}

impl NatsStreamingOptions {
    pub fn resolve(&self, defaults: &NatsStreamingSettings) -> NatsStreamingSettings {
        NatsStreamingSettings {
            tag: resolve_field(&self.tag, &defaults.tag),
            cluster_id: resolve_field(&self.cluster_id, &defaults.cluster_id),
            file_store: resolve_field(&self.file_store, &defaults.file_store),
            host_data_path: resolve_optional(&self.host_data_path, &defaults.host_data_path),
            client_port: resolve_field(&self.client_port, &defaults.client_port),
            monitor_port: resolve_field(&self.monitor_port, &defaults.monitor_port),
            ttl: resolve_field(&self.ttl, &defaults.ttl),
            overrides: resolve_overrides(&self.overrides, &defaults.overrides),
        }
    }
}

/// NATS Streaming adapter.
#[derive(Debug, Clone, Default)]
pub struct NatsStreaming {
    defaults: NatsStreamingSettings,
}

impl NatsStreaming {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: NatsStreamingSettings) -> Self {
        Self { defaults }
    }

    pub fn from_config(engine: &EngineConfig) -> Self {
        Self::with_defaults(NatsStreamingSettings {
            ttl: engine.default_ttl,
            ..Default::default()
        })
    }
}

impl Service for NatsStreaming {
    type Options = NatsStreamingOptions;
    type Settings = NatsStreamingSettings;

    fn name(&self) -> &'static str {
        "nats-streaming"
    }

    fn defaults(&self) -> &NatsStreamingSettings {
        &self.defaults
    }

    fn resolve(&self, options: &NatsStreamingOptions) -> NatsStreamingSettings {
        options.resolve(&self.defaults)
    }

    fn primary_port(&self) -> u16 {
        CLIENT_PORT
    }

    fn ports(&self, settings: &NatsStreamingSettings) -> Vec<(u16, PortChoice)> {
        vec![
            (CLIENT_PORT, settings.client_port),
            (MONITOR_PORT, settings.monitor_port),
        ]
    }

    fn launch_spec(
        &self,
        settings: &NatsStreamingSettings,
        ports: &HostPorts,
        engine: &EngineConfig,
    ) -> Result<LaunchSpec, ConfigError> {
        // The readiness check goes through the monitor port.
        if !settings.monitor_port.is_published() {
            return Err(ConfigError::ProbePortUnpublished {
                service: self.name().to_string(),
                port: MONITOR_PORT,
            });
        }

        let mut command = vec!["-cid".to_string(), settings.cluster_id.clone()];
        let mut builder =
            settings
                .overrides
                .builder(self.name(), REPOSITORY, &settings.tag, settings.ttl, engine);

        if settings.file_store {
            command.extend(["-st", "FILE", "--dir", DATA_DIR].map(String::from));
            if let Some(data) = &settings.host_data_path {
                builder = builder.mount_dir(data, DATA_DIR);
            }
        } else if let Some(data) = &settings.host_data_path {
            tracing::debug!(
                "Ignoring data path {} for in-memory store",
                data.display()
            );
        }

        bind_ports(builder.command(command), ports).build()
    }

    fn probe(
        &self,
        _settings: &NatsStreamingSettings,
        endpoint: &Endpoint,
    ) -> Box<dyn ReadinessProbe> {
        // Monitor port publication is enforced in `launch_spec`.
        let monitor = endpoint
            .addr_of(MONITOR_PORT)
            .unwrap_or_else(|| endpoint.addr());
        monitor_check(HttpProbe::new(format!(
            "http://{monitor}/streaming/serverz"
        )))
    }
}

impl Resource<NatsStreamingSettings> {
    pub fn nats_url(&self) -> String {
        format!("nats://{}", self.endpoint().addr())
    }

    pub fn cluster_id(&self) -> &str {
        &self.settings().cluster_id
    }
}

/// A client that failed to build keeps failing every check, so the
/// provision call times out with the cause instead of hiding it.
fn monitor_check(built: Result<HttpProbe, ProbeError>) -> Box<dyn ReadinessProbe> {
    match built {
        Ok(probe) => Box::new(probe),
        Err(e) => {
            tracing::error!(error = %e, "Cannot build monitor HTTP client");
            let message = e.to_string();
            Box::new(probe_fn(move || {
                let message = message.clone();
                async move { Err(ProbeError::msg(message)) }
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ports() -> HostPorts {
        [(CLIENT_PORT, 54222), (MONITOR_PORT, 58222)]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_memory_store_command() {
        let stan = NatsStreaming::new();
        let settings = stan.resolve(&NatsStreamingOptions {
            host_data_path: Some(PathBuf::from("/srv/stan")),
            ..Default::default()
        });

        let spec = stan
            .launch_spec(&settings, &ports(), &EngineConfig::default())
            .unwrap();
        assert_eq!(spec.command().unwrap(), ["-cid", "tststan"]);
        assert!(spec.mounts().is_empty());
    }

    #[test]
    fn test_file_store_mounts_data() {
        let stan = NatsStreaming::new();
        let settings = stan.resolve(&NatsStreamingOptions {
            cluster_id: Some("orders".to_string()),
            file_store: Some(true),
            host_data_path: Some(PathBuf::from("/srv/stan")),
            ..Default::default()
        });

        let spec = stan
            .launch_spec(&settings, &ports(), &EngineConfig::default())
            .unwrap();
        assert_eq!(
            spec.command().unwrap(),
            ["-cid", "orders", "-st", "FILE", "--dir", "/data"]
        );
        assert_eq!(spec.mounts()[0].to_bind_string(), "/srv/stan:/data:rw");
    }

    #[test]
    fn test_unpublished_monitor_rejected() {
        let stan = NatsStreaming::new();
        let settings = stan.resolve(&NatsStreamingOptions {
            monitor_port: Some(PortChoice::Unpublished),
            ..Default::default()
        });

        let err = stan
            .launch_spec(&settings, &ports(), &EngineConfig::default())
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::ProbePortUnpublished { port: MONITOR_PORT, .. }
        ));
    }

    #[tokio::test]
    async fn test_client_build_failure_keeps_failing() {
        let check = monitor_check(Err(ProbeError::msg("tls backend unavailable")));
        for _ in 0..2 {
            let err = check.check().await.unwrap_err();
            assert_eq!(err.to_string(), "tls backend unavailable");
        }
    }
}
