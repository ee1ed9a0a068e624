//! Readiness probes.
//!
//! A probe answers one question: does the service accept real traffic yet?
//! The launcher calls it repeatedly and never looks at why it failed, so
//! every failure (connection refused, half-written greeting, HTTP 503) is
//! simply "not ready". Probes must not leak connections between calls.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Opaque probe failure.
#[derive(Debug)]
pub struct ProbeError(Box<dyn std::error::Error + Send + Sync + 'static>);

impl ProbeError {
    pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self(err.into())
    }

    pub fn msg(message: impl Into<String>) -> Self {
        Self(message.into().into())
    }
}

impl std::fmt::Display for ProbeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::error::Error for ProbeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.source()
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        Self::new(err)
    }
}

impl From<reqwest::Error> for ProbeError {
    fn from(err: reqwest::Error) -> Self {
        Self::new(err)
    }
}

impl From<tokio::time::error::Elapsed> for ProbeError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::new(err)
    }
}

/// A readiness check supplied per service type.
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn check(&self) -> Result<(), ProbeError>;
}

/// Probe backed by an async closure. See [`probe_fn`].
pub struct FnProbe<F>(F);

/// Wrap an async closure as a [`ReadinessProbe`].
pub fn probe_fn<F, Fut>(f: F) -> FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ProbeError>> + Send,
{
    FnProbe(f)
}

#[async_trait]
impl<F, Fut> ReadinessProbe for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ProbeError>> + Send,
{
    async fn check(&self) -> Result<(), ProbeError> {
        (self.0)().await
    }
}

/// Succeeds once a TCP connection can be opened.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

#[async_trait]
impl ReadinessProbe for TcpProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await??;
        Ok(())
    }
}

/// Succeeds once the server sends a first line starting with a known prefix.
///
/// Used for protocols where the server speaks first (NATS `INFO {...}`).
#[derive(Debug, Clone)]
pub struct GreetingProbe {
    addr: String,
    prefix: String,
    timeout: Duration,
}

impl GreetingProbe {
    pub fn new(addr: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            prefix: prefix.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

#[async_trait]
impl ReadinessProbe for GreetingProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let line = tokio::time::timeout(self.timeout, async {
            let stream = TcpStream::connect(&self.addr).await?;
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            Ok::<_, std::io::Error>(line)
        })
        .await??;

        if line.starts_with(&self.prefix) {
            Ok(())
        } else {
            Err(ProbeError::msg(format!(
                "unexpected greeting from {}: {:?}",
                self.addr,
                line.trim_end()
            )))
        }
    }
}

/// Sends an inline `PING` and expects `+PONG`.
#[derive(Debug, Clone)]
pub struct RedisPingProbe {
    addr: String,
    timeout: Duration,
}

impl RedisPingProbe {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

#[async_trait]
impl ReadinessProbe for RedisPingProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let reply = tokio::time::timeout(self.timeout, async {
            let mut stream = TcpStream::connect(&self.addr).await?;
            stream.write_all(b"PING\r\n").await?;
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            Ok::<_, std::io::Error>(line)
        })
        .await??;

        // A loading dataset answers "-LOADING ..." until it is usable.
        if reply.starts_with("+PONG") {
            Ok(())
        } else {
            Err(ProbeError::msg(format!("redis replied {:?}", reply.trim_end())))
        }
    }
}

/// Reads the MySQL server handshake packet.
///
/// The image's init phase runs with networking disabled, so a protocol-10
/// handshake on the published port means the final server is accepting
/// clients.
#[derive(Debug, Clone)]
pub struct MysqlHandshakeProbe {
    addr: String,
    timeout: Duration,
}

impl MysqlHandshakeProbe {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }
}

const MYSQL_PROTOCOL_V10: u8 = 0x0a;
const MYSQL_ERR_PACKET: u8 = 0xff;

#[async_trait]
impl ReadinessProbe for MysqlHandshakeProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let payload = tokio::time::timeout(self.timeout, async {
            let mut stream = TcpStream::connect(&self.addr).await?;
            let mut header = [0u8; 4];
            stream.read_exact(&mut header).await?;
            let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
            let mut payload = vec![0u8; len.min(1024)];
            stream.read_exact(&mut payload).await?;
            Ok::<_, std::io::Error>(payload)
        })
        .await??;

        match payload.first() {
            Some(&MYSQL_PROTOCOL_V10) => Ok(()),
            Some(&MYSQL_ERR_PACKET) => {
                let message = payload.get(3..).unwrap_or_default();
                Err(ProbeError::msg(format!(
                    "mysql refused connection: {}",
                    String::from_utf8_lossy(message)
                )))
            }
            other => Err(ProbeError::msg(format!(
                "unexpected mysql handshake byte {other:?}"
            ))),
        }
    }
}

/// Succeeds on any 2xx response to a GET.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    /// Fails when the HTTP client cannot be built (no TLS backend, for one).
    pub fn new(url: impl Into<String>) -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_PROBE_TIMEOUT)
            .build()?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ReadinessProbe for HttpProbe {
    async fn check(&self) -> Result<(), ProbeError> {
        let response = self.client.get(&self.url).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ProbeError::msg(format!(
                "GET {} returned {}",
                self.url,
                response.status()
            )))
        }
    }
}
