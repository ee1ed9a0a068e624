//! Engine-wide configuration, read from `TEMPSVC_*` environment variables.

mod helpers;

use std::time::Duration;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

pub(crate) use helpers::{optional_env, parse_optional_env, parse_positive_env};

/// Default interface ports are published on.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default container lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(120);

/// Default readiness deadline.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(60);

/// Default first backoff interval between readiness probes.
pub const DEFAULT_RETRY_INITIAL: Duration = Duration::from_millis(500);

/// Default prefix for container names and labels.
pub const DEFAULT_LABEL_PREFIX: &str = "tempsvc";

/// Settings shared by every provisioning call of one [`Provisioner`](crate::provisioner::Provisioner).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Host interface ports are published on and endpoints point at.
    pub host: String,
    /// Container lifetime used when a service does not override it.
    pub default_ttl: Duration,
    /// Hard deadline for readiness probing.
    pub ready_timeout: Duration,
    /// First backoff interval between probes.
    pub retry_initial: Duration,
    /// Prefix for container names and labels.
    pub label_prefix: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            default_ttl: DEFAULT_TTL,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            retry_initial: DEFAULT_RETRY_INITIAL,
            label_prefix: DEFAULT_LABEL_PREFIX.to_string(),
        }
    }
}

impl EngineConfig {
    /// Build from the environment, falling back to defaults for unset keys.
    pub fn resolve() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let ttl_secs = parse_positive_env("TEMPSVC_TTL_SECS", defaults.default_ttl.as_secs())?;
        let ready_secs = parse_positive_env(
            "TEMPSVC_READY_TIMEOUT_SECS",
            defaults.ready_timeout.as_secs(),
        )?;

        let label_prefix = optional_env("TEMPSVC_LABEL_PREFIX")?.unwrap_or(defaults.label_prefix);
        if !label_prefix
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(ConfigError::InvalidValue {
                key: "TEMPSVC_LABEL_PREFIX".to_string(),
                message: format!("'{label_prefix}' is not a valid container name prefix"),
            });
        }

        Ok(Self {
            host: optional_env("TEMPSVC_HOST")?.unwrap_or(defaults.host),
            default_ttl: Duration::from_secs(ttl_secs),
            ready_timeout: Duration::from_secs(ready_secs),
            retry_initial: Duration::from_millis(parse_optional_env(
                "TEMPSVC_RETRY_INITIAL_MS",
                defaults.retry_initial.as_millis() as u64,
            )?),
            label_prefix,
        })
    }

    /// Readiness policy derived from these settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.retry_initial, self.ready_timeout)
    }
}
