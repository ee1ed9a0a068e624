//! `tempsvc reap`: remove expired containers.

use crate::config::EngineConfig;
use crate::runtime::DockerRuntime;

pub async fn run_reap_command() -> anyhow::Result<()> {
    let config = EngineConfig::resolve()?;
    let runtime = DockerRuntime::connect(&config).await?;

    let removed = runtime.reap_expired().await?;
    if removed.is_empty() {
        println!("No expired containers.");
    } else {
        println!("Removed {} expired container(s):", removed.len());
        for name in removed {
            println!("  {name}");
        }
    }
    Ok(())
}
