//! Redis test servers.

use std::path::PathBuf;
use std::time::Duration;

use crate::config::{DEFAULT_TTL, EngineConfig};
use crate::error::ConfigError;
use crate::launch::LaunchSpec;
use crate::ports::HostPorts;
use crate::probe::{ReadinessProbe, RedisPingProbe};
use crate::resolve::{PortChoice, resolve_field, resolve_optional};
use crate::resource::{Endpoint, Resource};
use crate::services::{LaunchOverrides, Service, bind_ports, resolve_overrides};

pub const REPOSITORY: &str = "redis";
pub const DEFAULT_TAG: &str = "6.0.9-alpine";
pub const PORT: u16 = 6379;

const DATA_DIR: &str = "/data";

#[derive(Debug, Clone, Default)]
pub struct RedisOptions {
    pub tag: Option<String>,
    /// Host directory for `/data`.
    pub host_data_path: Option<PathBuf>,
    pub host_port: Option<PortChoice>,
    pub ttl: Option<Duration>,
    pub overrides: LaunchOverrides,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisSettings {
    pub tag: String,
    pub host_data_path: Option<PathBuf>,
    pub host_port: PortChoice,
    pub ttl: Duration,
    pub overrides: LaunchOverrides,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            tag: DEFAULT_TAG.to_string(),
            host_data_path: None,
            host_port: PortChoice::Allocate,
            ttl: DEFAULT_TTL,
            overrides: LaunchOverrides::default(),
        }
    }
}

impl RedisOptions {
    pub fn resolve(&self, defaults: &RedisSettings) -> RedisSettings {
        RedisSettings {
            tag: resolve_field(&self.tag, &defaults.tag),
            host_data_path: resolve_optional(&self.host_data_path, &defaults.host_data_path),
            host_port: resolve_field(&self.host_port, &defaults.host_port),
            ttl: resolve_field(&self.ttl, &defaults.ttl),
            overrides: resolve_overrides(&self.overrides, &defaults.overrides),
        }
    }
}

/// Redis adapter.
#[derive(Debug, Clone, Default)]
pub struct Redis {
    defaults: RedisSettings,
}

impl Redis {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: RedisSettings) -> Self {
        Self { defaults }
    }

    pub fn from_config(engine: &EngineConfig) -> Self {
        Self::with_defaults(RedisSettings {
            ttl: engine.default_ttl,
            ..Default::default()
        })
    }
}

impl Service for Redis {
    type Options = RedisOptions;
    type Settings = RedisSettings;

    fn name(&self) -> &'static str {
        "redis"
    }

    fn defaults(&self) -> &RedisSettings {
        &self.defaults
    }

    fn resolve(&self, options: &RedisOptions) -> RedisSettings {
        options.resolve(&self.defaults)
    }

    fn primary_port(&self) -> u16 {
        PORT
    }

    fn ports(&self, settings: &RedisSettings) -> Vec<(u16, PortChoice)> {
        vec![(PORT, settings.host_port)]
    }

    fn launch_spec(
        &self,
        settings: &RedisSettings,
        ports: &HostPorts,
        engine: &EngineConfig,
    ) -> Result<LaunchSpec, ConfigError> {
        let mut builder =
            settings
                .overrides
                .builder(self.name(), REPOSITORY, &settings.tag, settings.ttl, engine);
        if let Some(data) = &settings.host_data_path {
            builder = builder.mount_dir(data, DATA_DIR);
        }
        bind_ports(builder, ports).build()
    }

    fn probe(&self, _settings: &RedisSettings, endpoint: &Endpoint) -> Box<dyn ReadinessProbe> {
        Box::new(RedisPingProbe::new(endpoint.addr()))
    }
}

impl Resource<RedisSettings> {
    /// `host:port` for client libraries that take an address.
    pub fn addr(&self) -> String {
        self.endpoint().addr()
    }

    pub fn url(&self) -> String {
        format!("redis://{}", self.endpoint().addr())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Redis::new().resolve(&RedisOptions::default());
        assert_eq!(settings, RedisSettings::default());
        assert_eq!(settings.tag, "6.0.9-alpine");
    }

    #[test]
    fn test_from_config_uses_engine_ttl() {
        let engine = EngineConfig {
            default_ttl: Duration::from_secs(15),
            ..Default::default()
        };
        assert_eq!(
            Redis::from_config(&engine).defaults().ttl,
            Duration::from_secs(15)
        );
    }

    #[test]
    fn test_launch_spec_mounts_data() {
        let redis = Redis::new();
        let settings = redis.resolve(&RedisOptions {
            host_data_path: Some(PathBuf::from("/srv/redis")),
            ..Default::default()
        });
        let ports: HostPorts = [(PORT, 56379)].into_iter().collect();

        let spec = redis
            .launch_spec(&settings, &ports, &EngineConfig::default())
            .unwrap();
        assert_eq!(spec.image().to_string(), "redis:6.0.9-alpine");
        assert_eq!(spec.mounts()[0].to_bind_string(), "/srv/redis:/data:rw");
        assert_eq!(spec.host_port(PORT), Some(56379));
        assert!(spec.environment().is_empty());
    }
}
