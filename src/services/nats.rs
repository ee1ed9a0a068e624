//! NATS test servers.
//!
//! The default image has no shell, so the in-container expiry timer cannot
//! be armed. An orphaned server lives until its expiry label passes and a
//! reap runs, either `tempsvc reap` or the next `Provisioner::docker`.

use std::time::Duration;

use crate::config::{DEFAULT_TTL, EngineConfig};
use crate::error::ConfigError;
use crate::launch::LaunchSpec;
use crate::ports::HostPorts;
use crate::probe::{GreetingProbe, ReadinessProbe};
use crate::resolve::{PortChoice, resolve_field};
use crate::resource::{Endpoint, Resource};
use crate::services::{LaunchOverrides, Service, bind_ports, resolve_overrides};

pub const REPOSITORY: &str = "nats";
pub const DEFAULT_TAG: &str = "2.0.0-linux";
pub const CLIENT_PORT: u16 = 4222;
pub const MONITOR_PORT: u16 = 8222;
pub const CLUSTER_PORT: u16 = 6222;

/// Servers greet every new client with an `INFO {...}` line.
const GREETING: &str = "INFO ";

#[derive(Debug, Clone, Default)]
pub struct NatsOptions {
    pub tag: Option<String>,
    pub client_port: Option<PortChoice>,
    pub monitor_port: Option<PortChoice>,
    pub cluster_port: Option<PortChoice>,
    pub ttl: Option<Duration>,
    pub overrides: LaunchOverrides,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NatsSettings {
    pub tag: String,
    pub client_port: PortChoice,
    pub monitor_port: PortChoice,
    pub cluster_port: PortChoice,
    pub ttl: Duration,
    pub overrides: LaunchOverrides,
}

impl Default for NatsSettings {
    fn default() -> Self {
        Self {
            tag: DEFAULT_TAG.to_string(),
            client_port: PortChoice::Allocate,
            monitor_port: PortChoice::Allocate,
            cluster_port: PortChoice::Allocate,
            ttl: DEFAULT_TTL,
            overrides: LaunchOverrides::default(),
        }
    }
}

impl NatsOptions {
    pub fn resolve(&self, defaults: &NatsSettings) -> NatsSettings {
        NatsSettings {
            tag: resolve_field(&self.tag, &defaults.tag),
            client_port: resolve_field(&self.client_port, &defaults.client_port),
            monitor_port: resolve_field(&self.monitor_port, &defaults.monitor_port),
            cluster_port: resolve_field(&self.cluster_port, &defaults.cluster_port),
            ttl: resolve_field(&self.ttl, &defaults.ttl),
            overrides: resolve_overrides(&self.overrides, &defaults.overrides),
        }
    }
}

/// NATS adapter.
#[derive(Debug, Clone, Default)]
pub struct Nats {
    defaults: NatsSettings,
}

impl Nats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: NatsSettings) -> Self {
        Self { defaults }
    }

    pub fn from_config(engine: &EngineConfig) -> Self {
        Self::with_defaults(NatsSettings {
            ttl: engine.default_ttl,
            ..Default::default()
        })
    }
}

impl Service for Nats {
    type Options = NatsOptions;
    type Settings = NatsSettings;

    fn name(&self) -> &'static str {
        "nats"
    }

    fn defaults(&self) -> &NatsSettings {
        &self.defaults
    }

    fn resolve(&self, options: &NatsOptions) -> NatsSettings {
        options.resolve(&self.defaults)
    }

    fn primary_port(&self) -> u16 {
        CLIENT_PORT
    }

    fn ports(&self, settings: &NatsSettings) -> Vec<(u16, PortChoice)> {
        vec![
            (CLIENT_PORT, settings.client_port),
            (MONITOR_PORT, settings.monitor_port),
            (CLUSTER_PORT, settings.cluster_port),
        ]
    }

    fn launch_spec(
        &self,
        settings: &NatsSettings,
        ports: &HostPorts,
        engine: &EngineConfig,
    ) -> Result<LaunchSpec, ConfigError> {
        let builder =
            settings
                .overrides
                .builder(self.name(), REPOSITORY, &settings.tag, settings.ttl, engine);
        bind_ports(builder, ports).build()
    }

    fn probe(&self, _settings: &NatsSettings, endpoint: &Endpoint) -> Box<dyn ReadinessProbe> {
        Box::new(GreetingProbe::new(endpoint.addr(), GREETING))
    }
}

impl Resource<NatsSettings> {
    pub fn nats_url(&self) -> String {
        format!("nats://{}", self.endpoint().addr())
    }

    /// HTTP monitoring endpoint, if the monitor port was published.
    pub fn monitor_url(&self) -> Option<String> {
        self.endpoint()
            .addr_of(MONITOR_PORT)
            .map(|addr| format!("http://{addr}"))
    }
}
