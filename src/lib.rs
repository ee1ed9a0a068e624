//! Disposable service containers for integration tests.
//!
//! A [`Provisioner`](provisioner::Provisioner) starts a MySQL, Redis, NATS or
//! NATS Streaming container on free host ports, waits until it accepts
//! clients and hands back a [`Resource`](resource::Resource). Closing the
//! resource removes the container; if the caller never does, the container
//! removes itself when its TTL runs out.
//!
//! ```rust,no_run
//! use tempsvc::config::EngineConfig;
//! use tempsvc::provisioner::Provisioner;
//! use tempsvc::services::{Redis, RedisOptions};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let provisioner = Provisioner::docker(EngineConfig::resolve()?).await?;
//! let redis = provisioner
//!     .provision(&Redis::new(), &RedisOptions::default())
//!     .await?;
//! println!("redis at {}", redis.url());
//! redis.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod launch;
pub mod launcher;
pub mod ports;
pub mod probe;
pub mod provisioner;
pub mod resolve;
pub mod resource;
pub mod retry;
pub mod runtime;
pub mod services;
pub mod testing;
