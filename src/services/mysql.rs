//! MySQL test servers.
//!
//! Init-script precedence: SQL files in `host_init_sql_path` are mounted
//! into the image's init directory unless `host_data_path` is set and that
//! directory already holds data. A populated data directory means the server
//! is resuming an existing database, whose schema the scripts would clash
//! with.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{DEFAULT_TTL, EngineConfig};
use crate::error::ConfigError;
use crate::launch::{LaunchSpec, Mount};
use crate::ports::HostPorts;
use crate::probe::{MysqlHandshakeProbe, ReadinessProbe};
use crate::resolve::{PortChoice, resolve_field, resolve_optional};
use crate::resource::{Endpoint, Resource};
use crate::services::{LaunchOverrides, Service, bind_ports, resolve_overrides};

pub const REPOSITORY: &str = "mysql";
pub const DEFAULT_TAG: &str = "8.0.19";
pub const DEFAULT_DATABASE_NAME: &str = "tst";
pub const DEFAULT_ROOT_PASSWORD: &str = "123456";
pub const PORT: u16 = 3306;

const DATA_DIR: &str = "/var/lib/mysql";
const INIT_DIR: &str = "/docker-entrypoint-initdb.d";

/// Caller-supplied MySQL options. `None` means "use the default".
#[derive(Debug, Clone, Default)]
pub struct MysqlOptions {
    pub tag: Option<String>,
    /// Database created at first start.
    pub database_name: Option<String>,
    pub root_password: Option<String>,
    /// Host directory for `/var/lib/mysql`. Must be empty or hold an
    /// existing MySQL data directory.
    pub host_data_path: Option<PathBuf>,
    /// Host directory of `.sql` files loaded at initialisation.
    pub host_init_sql_path: Option<PathBuf>,
    pub host_port: Option<PortChoice>,
    pub ttl: Option<Duration>,
    pub overrides: LaunchOverrides,
}

/// Effective MySQL options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MysqlSettings {
    pub tag: String,
    pub database_name: String,
    pub root_password: String,
    pub host_data_path: Option<PathBuf>,
    pub host_init_sql_path: Option<PathBuf>,
    pub host_port: PortChoice,
    pub ttl: Duration,
    pub overrides: LaunchOverrides,
}

impl Default for MysqlSettings {
    fn default() -> Self {
        Self {
            tag: DEFAULT_TAG.to_string(),
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            root_password: DEFAULT_ROOT_PASSWORD.to_string(),
            host_data_path: None,
            host_init_sql_path: None,
            host_port: PortChoice::Allocate,
            ttl: DEFAULT_TTL,
            overrides: LaunchOverrides::default(),
        }
    }
}

impl MysqlOptions {
    /// Merge over `defaults`.
    pub fn resolve(&self, defaults: &MysqlSettings) -> MysqlSettings {
        MysqlSettings {
            tag: resolve_field(&self.tag, &defaults.tag),
            database_name: resolve_field(&self.database_name, &defaults.database_name),
            root_password: resolve_field(&self.root_password, &defaults.root_password),
            host_data_path: resolve_optional(&self.host_data_path, &defaults.host_data_path),
            host_init_sql_path: resolve_optional(
                &self.host_init_sql_path,
                &defaults.host_init_sql_path,
            ),
            host_port: resolve_field(&self.host_port, &defaults.host_port),
            ttl: resolve_field(&self.ttl, &defaults.ttl),
            overrides: resolve_overrides(&self.overrides, &defaults.overrides),
        }
    }
}

/// Whether init scripts should be mounted given the data directory.
pub fn loads_init_scripts(host_data_path: Option<&Path>) -> bool {
    match host_data_path {
        Some(path) => !dir_has_entries(path),
        None => true,
    }
}

fn dir_has_entries(path: &Path) -> bool {
    std::fs::read_dir(path)
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

/// MySQL adapter.
#[derive(Debug, Clone, Default)]
pub struct Mysql {
    defaults: MysqlSettings,
}

impl Mysql {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_defaults(defaults: MysqlSettings) -> Self {
        Self { defaults }
    }

    /// Defaults with the engine's TTL.
    pub fn from_config(engine: &EngineConfig) -> Self {
        Self::with_defaults(MysqlSettings {
            ttl: engine.default_ttl,
            ..Default::default()
        })
    }
}

impl Service for Mysql {
    type Options = MysqlOptions;
    type Settings = MysqlSettings;

    fn name(&self) -> &'static str {
        "mysql"
    }

    fn defaults(&self) -> &MysqlSettings {
        &self.defaults
    }

    fn resolve(&self, options: &MysqlOptions) -> MysqlSettings {
        options.resolve(&self.defaults)
    }

    fn primary_port(&self) -> u16 {
        PORT
    }

    fn ports(&self, settings: &MysqlSettings) -> Vec<(u16, PortChoice)> {
        vec![(PORT, settings.host_port)]
    }

    fn launch_spec(
        &self,
        settings: &MysqlSettings,
        ports: &HostPorts,
        engine: &EngineConfig,
    ) -> Result<LaunchSpec, ConfigError> {
        let mut builder = settings
            .overrides
            .builder(self.name(), REPOSITORY, &settings.tag, settings.ttl, engine)
            .env("MYSQL_DATABASE", &settings.database_name)
            .env("MYSQL_ROOT_PASSWORD", &settings.root_password);

        if let Some(init) = &settings.host_init_sql_path {
            if loads_init_scripts(settings.host_data_path.as_deref()) {
                builder = builder.mount(Mount::bind(init, INIT_DIR).read_only());
            } else {
                tracing::debug!(
                    "Skipping init scripts in {}: data directory already populated",
                    init.display()
                );
            }
        }

        if let Some(data) = &settings.host_data_path {
            builder = builder.mount_dir(data, DATA_DIR);
        }

        bind_ports(builder, ports).build()
    }

    fn probe(&self, _settings: &MysqlSettings, endpoint: &Endpoint) -> Box<dyn ReadinessProbe> {
        Box::new(MysqlHandshakeProbe::new(endpoint.addr()))
    }
}

impl Resource<MysqlSettings> {
    /// Go-style data source name.
    pub fn dsn(&self) -> String {
        let settings = self.settings();
        format!(
            "root:{}@tcp({})/{}?parseTime=true",
            settings.root_password,
            self.endpoint().addr(),
            settings.database_name
        )
    }

    /// `mysql://` connection URL.
    pub fn url(&self) -> String {
        let settings = self.settings();
        format!(
            "mysql://root:{}@{}/{}",
            settings.root_password,
            self.endpoint().addr(),
            settings.database_name
        )
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn ports() -> HostPorts {
        [(PORT, 53306)].into_iter().collect()
    }

    #[test]
    fn test_blank_options_take_defaults() {
        let defaults = MysqlSettings {
            host_port: PortChoice::Fixed(53306),
            ..Default::default()
        };
        let options = MysqlOptions {
            database_name: Some(String::new()),
            host_port: None,
            ..Default::default()
        };

        let settings = options.resolve(&defaults);
        assert_eq!(settings.database_name, "tst");
        assert_eq!(settings.host_port, PortChoice::Fixed(53306));
    }

    #[test]
    fn test_empty_options_resolve_to_defaults() {
        let defaults = MysqlSettings {
            host_data_path: Some(PathBuf::from("/srv/mysql")),
            ttl: Duration::from_secs(30),
            ..Default::default()
        };
        assert_eq!(MysqlOptions::default().resolve(&defaults), defaults);
    }

    #[test]
    fn test_full_options_kept() {
        let options = MysqlOptions {
            tag: Some("5.7.21".to_string()),
            database_name: Some("app".to_string()),
            root_password: Some("secret".to_string()),
            host_data_path: Some(PathBuf::from("/tmp/data")),
            host_init_sql_path: Some(PathBuf::from("/tmp/init")),
            host_port: Some(PortChoice::Fixed(13306)),
            ttl: Some(Duration::from_secs(10)),
            overrides: LaunchOverrides {
                env: vec!["TZ=UTC".to_string()],
                ..Default::default()
            },
        };

        let settings = options.resolve(&MysqlSettings::default());
        assert_eq!(
            settings,
            MysqlSettings {
                tag: "5.7.21".to_string(),
                database_name: "app".to_string(),
                root_password: "secret".to_string(),
                host_data_path: Some(PathBuf::from("/tmp/data")),
                host_init_sql_path: Some(PathBuf::from("/tmp/init")),
                host_port: PortChoice::Fixed(13306),
                ttl: Duration::from_secs(10),
                overrides: LaunchOverrides {
                    env: vec!["TZ=UTC".to_string()],
                    ..Default::default()
                },
            }
        );
    }

    #[test]
    fn test_launch_spec_layout() {
        let mysql = Mysql::new();
        let settings = mysql.resolve(&MysqlOptions::default());
        let spec = mysql
            .launch_spec(&settings, &ports(), &EngineConfig::default())
            .unwrap();

        assert_eq!(spec.image().to_string(), "mysql:8.0.19");
        assert_eq!(
            spec.environment(),
            ["MYSQL_DATABASE=tst", "MYSQL_ROOT_PASSWORD=123456"]
        );
        assert!(spec.mounts().is_empty());
        assert_eq!(spec.host_port(PORT), Some(53306));
        assert_eq!(spec.ttl(), DEFAULT_TTL);
    }

    #[test]
    fn test_init_scripts_mounted_without_data_dir() {
        let init = tempfile::tempdir().unwrap();
        let mysql = Mysql::new();
        let settings = mysql.resolve(&MysqlOptions {
            host_init_sql_path: Some(init.path().to_path_buf()),
            ..Default::default()
        });

        let spec = mysql
            .launch_spec(&settings, &ports(), &EngineConfig::default())
            .unwrap();
        assert_eq!(spec.mounts().len(), 1);
        assert_eq!(spec.mounts()[0].container, INIT_DIR);
        assert!(spec.mounts()[0].read_only);
    }

    #[test]
    fn test_init_scripts_mounted_with_empty_data_dir() {
        let init = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let mysql = Mysql::new();
        let settings = mysql.resolve(&MysqlOptions {
            host_init_sql_path: Some(init.path().to_path_buf()),
            host_data_path: Some(data.path().to_path_buf()),
            ..Default::default()
        });

        let spec = mysql
            .launch_spec(&settings, &ports(), &EngineConfig::default())
            .unwrap();
        let targets: Vec<&str> = spec.mounts().iter().map(|m| m.container.as_str()).collect();
        assert_eq!(targets, [INIT_DIR, DATA_DIR]);
    }

    #[test]
    fn test_init_scripts_skipped_with_existing_data() {
        let init = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        std::fs::write(data.path().join("ibdata1"), b"existing").unwrap();

        let mysql = Mysql::new();
        let settings = mysql.resolve(&MysqlOptions {
            host_init_sql_path: Some(init.path().to_path_buf()),
            host_data_path: Some(data.path().to_path_buf()),
            ..Default::default()
        });

        let spec = mysql
            .launch_spec(&settings, &ports(), &EngineConfig::default())
            .unwrap();
        let targets: Vec<&str> = spec.mounts().iter().map(|m| m.container.as_str()).collect();
        assert_eq!(targets, [DATA_DIR]);
    }

    #[test]
    fn test_missing_data_dir_counts_as_empty() {
        assert!(loads_init_scripts(Some(Path::new(
            "/nonexistent/tempsvc/mysql-data"
        ))));
        assert!(loads_init_scripts(None));
    }

    #[test]
    fn test_conflicting_override_mount_rejected() {
        let data = tempfile::tempdir().unwrap();
        let mysql = Mysql::new();
        let settings = mysql.resolve(&MysqlOptions {
            host_data_path: Some(data.path().to_path_buf()),
            overrides: LaunchOverrides {
                mounts: vec![Mount::bind("/elsewhere", DATA_DIR)],
                ..Default::default()
            },
            ..Default::default()
        });

        let err = mysql
            .launch_spec(&settings, &ports(), &EngineConfig::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateMountTarget { .. }));
    }
}
