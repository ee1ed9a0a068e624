//! `tempsvc run`: start one service and hold it until interrupted.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::provisioner::Provisioner;
use crate::resolve::PortChoice;
use crate::resource::Resource;
use crate::services::{
    Mysql, MysqlOptions, MysqlSettings, Nats, NatsOptions, NatsSettings, NatsStreaming,
    NatsStreamingOptions, NatsStreamingSettings, Redis, RedisOptions, RedisSettings, Service,
};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    Mysql,
    Redis,
    Nats,
    NatsStreaming,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Service to start
    #[arg(value_enum)]
    pub service: ServiceKind,

    /// Host port for the client port (a free port is picked if omitted)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Container lifetime in seconds
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Image tag
    #[arg(long)]
    pub tag: Option<String>,

    /// Host directory for the service's data
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Directory of .sql files loaded at first start (mysql only)
    #[arg(long)]
    pub init_sql: Option<PathBuf>,

    /// Persist channels to disk (nats-streaming only)
    #[arg(long)]
    pub file_store: bool,

    /// Print a JSON summary instead of plain text
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    fn port_choice(&self) -> Option<PortChoice> {
        self.port.map(PortChoice::Fixed)
    }

    fn ttl(&self) -> Option<Duration> {
        self.ttl.map(Duration::from_secs)
    }

    fn warn_unused_flags(&self) {
        if self.init_sql.is_some() && self.service != ServiceKind::Mysql {
            tracing::warn!("--init-sql only applies to mysql; ignoring it");
        }
        if self.file_store && self.service != ServiceKind::NatsStreaming {
            tracing::warn!("--file-store only applies to nats-streaming; ignoring it");
        }
        if self.data.is_some() && self.service == ServiceKind::Nats {
            tracing::warn!("--data has no effect for nats; ignoring it");
        }
    }
}

/// What `run` prints once the service is ready.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunSummary {
    pub service: String,
    pub container: String,
    pub address: String,
    /// Container port to host port.
    pub ports: BTreeMap<u16, u16>,
    pub url: String,
    pub ttl_secs: u64,
}

impl RunSummary {
    fn from_resource<S>(resource: &Resource<S>, url: String) -> Self {
        Self {
            service: resource.spec().service().to_string(),
            container: resource.name().to_string(),
            address: resource.endpoint().addr(),
            ports: resource.endpoint().ports().iter().collect(),
            url,
            ttl_secs: resource.spec().ttl_secs(),
        }
    }

    fn print(&self, json: bool) -> anyhow::Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(self)?);
            return Ok(());
        }

        println!("{} is ready", self.service);
        println!("  container: {}", self.container);
        println!("  address:   {}", self.address);
        println!("  url:       {}", self.url);
        for (container_port, host_port) in &self.ports {
            println!("  port:      {} -> {}", container_port, host_port);
        }
        println!("  expires:   in {}s", self.ttl_secs);
        println!("Press Ctrl-C to stop.");
        Ok(())
    }
}

/// Run the `run` command.
pub async fn run_service_command(args: RunArgs) -> anyhow::Result<()> {
    let config = EngineConfig::resolve()?;
    let provisioner = Provisioner::docker(config.clone()).await?;
    args.warn_unused_flags();

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted");
            interrupt.cancel();
        }
    });

    let port = args.port_choice();
    let ttl = args.ttl();

    match args.service {
        ServiceKind::Mysql => {
            let options = MysqlOptions {
                tag: args.tag.clone(),
                host_data_path: args.data.clone(),
                host_init_sql_path: args.init_sql.clone(),
                host_port: port,
                ttl,
                ..Default::default()
            };
            hold(
                &provisioner,
                &Mysql::from_config(&config),
                &options,
                &cancel,
                args.json,
                Resource::<MysqlSettings>::url,
            )
            .await
        }
        ServiceKind::Redis => {
            let options = RedisOptions {
                tag: args.tag.clone(),
                host_data_path: args.data.clone(),
                host_port: port,
                ttl,
                ..Default::default()
            };
            hold(
                &provisioner,
                &Redis::from_config(&config),
                &options,
                &cancel,
                args.json,
                Resource::<RedisSettings>::url,
            )
            .await
        }
        ServiceKind::Nats => {
            let options = NatsOptions {
                tag: args.tag.clone(),
                client_port: port,
                ttl,
                ..Default::default()
            };
            hold(
                &provisioner,
                &Nats::from_config(&config),
                &options,
                &cancel,
                args.json,
                Resource::<NatsSettings>::nats_url,
            )
            .await
        }
        ServiceKind::NatsStreaming => {
            let options = NatsStreamingOptions {
                tag: args.tag.clone(),
                file_store: Some(args.file_store),
                host_data_path: args.data.clone(),
                client_port: port,
                ttl,
                ..Default::default()
            };
            hold(
                &provisioner,
                &NatsStreaming::from_config(&config),
                &options,
                &cancel,
                args.json,
                Resource::<NatsStreamingSettings>::nats_url,
            )
            .await
        }
    }
}

/// Provision, print the summary, then wait for `cancel` and close.
async fn hold<S: Service>(
    provisioner: &Provisioner,
    service: &S,
    options: &S::Options,
    cancel: &CancellationToken,
    json: bool,
    url: fn(&Resource<S::Settings>) -> String,
) -> anyhow::Result<()> {
    let resource = provisioner
        .provision_with(
            service,
            options,
            &provisioner.config().retry_policy(),
            cancel,
        )
        .await?;

    let summary = RunSummary::from_resource(&resource, url(&resource));
    if let Err(e) = summary.print(json) {
        resource.close().await?;
        return Err(e);
    }

    // The container removes itself at its TTL; stop waiting then too.
    let expiry = resource.spec().ttl();
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = tokio::time::sleep(expiry) => {
            tracing::info!("{} reached its TTL", resource.name());
        }
    }

    resource.close().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::FakeRuntime;

    #[tokio::test]
    async fn test_summary_from_resource() {
        let runtime = Arc::new(FakeRuntime::new());
        let provisioner = Provisioner::new(runtime, EngineConfig::default());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        // Answer one NATS greeting so the probe passes.
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            if let Ok((mut socket, _)) = listener.accept().await {
                let _ = socket.write_all(b"INFO {\"server_id\":\"x\"}\r\n").await;
            }
        });

        let resource = provisioner
            .provision(
                &Nats::new(),
                &NatsOptions {
                    client_port: Some(PortChoice::Fixed(port)),
                    monitor_port: Some(PortChoice::Unpublished),
                    cluster_port: Some(PortChoice::Unpublished),
                    ttl: Some(Duration::from_secs(45)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let summary = RunSummary::from_resource(&resource, resource.nats_url());
        assert_eq!(summary.service, "nats");
        assert_eq!(summary.address, format!("127.0.0.1:{port}"));
        assert_eq!(summary.url, format!("nats://127.0.0.1:{port}"));
        assert_eq!(summary.ports, BTreeMap::from([(4222, port)]));
        assert_eq!(summary.ttl_secs, 45);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["ports"]["4222"], port);

        resource.close().await.unwrap();
    }
}
