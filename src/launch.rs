//! Immutable container launch descriptions.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Container image identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// A host directory bound into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    /// Read-write bind of `host` onto `container`.
    pub fn bind(host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            container: container.into(),
            read_only: false,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Docker `binds` syntax: `host:container[:ro]`.
    pub fn to_bind_string(&self) -> String {
        let mode = if self.read_only { "ro" } else { "rw" };
        format!("{}:{}:{}", self.host.display(), self.container, mode)
    }
}

/// Fully resolved description of one container start.
///
/// Built once per provisioning call through [`LaunchSpec::builder`] and never
/// mutated afterwards; all fields are read through accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    service: String,
    image: ImageRef,
    environment: Vec<String>,
    mounts: Vec<Mount>,
    port_bindings: BTreeMap<u16, u16>,
    command: Option<Vec<String>>,
    ttl: Duration,
    host_ip: String,
}

impl LaunchSpec {
    pub fn builder(service: impl Into<String>, image: ImageRef) -> LaunchSpecBuilder {
        LaunchSpecBuilder::new(service, image)
    }

    /// Short service name, used for container naming and labels.
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn image(&self) -> &ImageRef {
        &self.image
    }

    /// `KEY=value` entries in the order they were added.
    pub fn environment(&self) -> &[String] {
        &self.environment
    }

    pub fn mounts(&self) -> &[Mount] {
        &self.mounts
    }

    /// Container port to host port.
    pub fn port_bindings(&self) -> &BTreeMap<u16, u16> {
        &self.port_bindings
    }

    pub fn host_port(&self, container_port: u16) -> Option<u16> {
        self.port_bindings.get(&container_port).copied()
    }

    pub fn command(&self) -> Option<&[String]> {
        self.command.as_deref()
    }

    /// Lifetime after which the engine must remove the container.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl.as_secs().max(1)
    }

    /// Host interface the ports are published on.
    pub fn host_ip(&self) -> &str {
        &self.host_ip
    }
}

/// Builder for [`LaunchSpec`]. Validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct LaunchSpecBuilder {
    service: String,
    image: ImageRef,
    environment: Vec<String>,
    mounts: Vec<Mount>,
    port_bindings: Vec<(u16, u16)>,
    command: Option<Vec<String>>,
    ttl: Duration,
    host_ip: String,
}

impl LaunchSpecBuilder {
    fn new(service: impl Into<String>, image: ImageRef) -> Self {
        Self {
            service: service.into(),
            image,
            environment: Vec::new(),
            mounts: Vec::new(),
            port_bindings: Vec::new(),
            command: None,
            ttl: crate::config::DEFAULT_TTL,
            host_ip: crate::config::DEFAULT_HOST.to_string(),
        }
    }

    pub fn env(mut self, key: &str, value: impl std::fmt::Display) -> Self {
        self.environment.push(format!("{key}={value}"));
        self
    }

    /// Append pre-formatted `KEY=value` entries.
    pub fn env_entries<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.environment.extend(entries.into_iter().map(Into::into));
        self
    }

    pub fn mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    pub fn mount_dir(self, host: &Path, container: &str) -> Self {
        self.mount(Mount::bind(host, container))
    }

    pub fn bind_port(mut self, container_port: u16, host_port: u16) -> Self {
        self.port_bindings.push((container_port, host_port));
        self
    }

    pub fn command<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = Some(args.into_iter().map(Into::into).collect());
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn host_ip(mut self, host_ip: impl Into<String>) -> Self {
        self.host_ip = host_ip.into();
        self
    }

    /// Check for conflicts and freeze the description.
    pub fn build(self) -> Result<LaunchSpec, ConfigError> {
        if self.image.repository.trim().is_empty() {
            return Err(ConfigError::EmptyImage);
        }
        if self.ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "ttl".to_string(),
                message: "must be at least one second".to_string(),
            });
        }

        let mut targets = HashSet::new();
        for mount in &self.mounts {
            let target = mount.container.trim_end_matches('/');
            if !targets.insert(target.to_string()) {
                return Err(ConfigError::DuplicateMountTarget {
                    target: mount.container.clone(),
                });
            }
        }

        let mut port_bindings = BTreeMap::new();
        let mut host_ports = HashSet::new();
        for (container_port, host_port) in self.port_bindings {
            if port_bindings.insert(container_port, host_port).is_some() {
                return Err(ConfigError::DuplicateContainerPort {
                    port: container_port,
                });
            }
            if !host_ports.insert(host_port) {
                return Err(ConfigError::DuplicateHostPort { port: host_port });
            }
        }

        Ok(LaunchSpec {
            service: self.service,
            image: self.image,
            environment: self.environment,
            mounts: self.mounts,
            port_bindings,
            command: self.command,
            ttl: self.ttl,
            host_ip: self.host_ip,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder() -> LaunchSpecBuilder {
        LaunchSpec::builder("redis", ImageRef::new("redis", "6.0.9-alpine"))
    }

    #[test]
    fn test_build_preserves_order() {
        let spec = builder()
            .env("A", 1)
            .env_entries(["B=2"])
            .mount_dir(Path::new("/tmp/a"), "/a")
            .mount(Mount::bind("/tmp/b", "/b").read_only())
            .bind_port(6379, 51000)
            .command(["redis-server", "--appendonly", "yes"])
            .ttl(Duration::from_secs(30))
            .build()
            .unwrap();

        assert_eq!(spec.environment(), ["A=1", "B=2"]);
        assert_eq!(spec.mounts()[1].to_bind_string(), "/tmp/b:/b:ro");
        assert_eq!(spec.host_port(6379), Some(51000));
        assert_eq!(spec.command().map(<[String]>::len), Some(3));
        assert_eq!(spec.ttl_secs(), 30);
        assert_eq!(spec.image().to_string(), "redis:6.0.9-alpine");
    }

    #[test]
    fn test_duplicate_mount_target_rejected() {
        let err = builder()
            .mount_dir(Path::new("/tmp/a"), "/data")
            .mount_dir(Path::new("/tmp/b"), "/data/")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateMountTarget { .. }));
    }

    #[test]
    fn test_duplicate_host_port_rejected() {
        let err = builder()
            .bind_port(4222, 50000)
            .bind_port(8222, 50000)
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateHostPort { port: 50000 }));
    }

    #[test]
    fn test_duplicate_container_port_rejected() {
        let err = builder()
            .bind_port(4222, 50000)
            .bind_port(4222, 50001)
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::DuplicateContainerPort { port: 4222 }
        ));
    }

    #[test]
    fn test_empty_image_rejected() {
        let err = LaunchSpec::builder("x", ImageRef::new(" ", "latest"))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::EmptyImage));
    }

    #[test]
    fn test_zero_ttl_rejected() {
        let err = builder().ttl(Duration::ZERO).build().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }
}
