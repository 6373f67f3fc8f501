//! # Relay verification
//!
//! A SOCKS5 detection only proves that the server accepts "no
//! authentication". The verifier opens a real connection to every such
//! endpoint and asks it to CONNECT to a known host; only endpoints that
//! grant the request are passed on. Detections of other protocols go
//! through untouched.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info};
use uwalker_common::detection::Detection;
use uwalker_plugins::socks5::{self, GREETING, VERSION};

pub const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_WORKERS: usize = 64;
const VERIFIED_QUEUE: usize = 64;

const CMD_CONNECT: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const SUCCEEDED: u8 = 0x00;
/// Version, status, reserved, IPv4 address type, address, port.
const MIN_REPLY_LEN: usize = 10;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("no answer within {0:?}")]
    Timeout(Duration),
    #[error("unexpected SOCKS version {0}")]
    Version(u8),
    #[error("authentication method {0:#04x} required")]
    Auth(u8),
    #[error("CONNECT refused with status {0}")]
    Refused(u8),
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid relay target '{0}' (expected host:port)")]
pub struct InvalidRelayTarget(pub String);

/// The host every candidate is asked to connect to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayTarget {
    host: String,
    port: u16,
}

impl RelayTarget {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, InvalidRelayTarget> {
        let host = host.into();
        if host.is_empty() || host.len() > usize::from(u8::MAX) {
            return Err(InvalidRelayTarget(format!("{host}:{port}")));
        }
        Ok(Self { host, port })
    }

    fn connect_request(&self) -> Vec<u8> {
        let mut req = Vec::with_capacity(7 + self.host.len());
        req.extend_from_slice(&[VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN]);
        // length checked on construction
        req.push(self.host.len() as u8);
        req.extend_from_slice(self.host.as_bytes());
        req.extend_from_slice(&self.port.to_be_bytes());
        req
    }
}

impl FromStr for RelayTarget {
    type Err = InvalidRelayTarget;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| InvalidRelayTarget(s.to_string()))?;
        let port = port.parse().map_err(|_| InvalidRelayTarget(s.to_string()))?;
        Self::new(host, port)
    }
}

impl fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Runs the SOCKS5 handshake and a CONNECT to `target` through `proxy`.
pub async fn socks5_connect(proxy: SocketAddr, target: &RelayTarget, limit: Duration) -> Result<(), VerifyError> {
    tokio::time::timeout(limit, async {
        let mut stream = TcpStream::connect(proxy).await?;

        stream.write_all(&GREETING).await?;
        let mut choice = [0u8; 2];
        stream.read_exact(&mut choice).await?;
        match choice {
            [VERSION, SUCCEEDED] => {}
            [VERSION, method] => return Err(VerifyError::Auth(method)),
            [version, _] => return Err(VerifyError::Version(version)),
        }

        stream.write_all(&target.connect_request()).await?;
        let mut reply = [0u8; MIN_REPLY_LEN];
        stream.read_exact(&mut reply).await?;
        match reply {
            [VERSION, SUCCEEDED, ..] => Ok(()),
            [VERSION, status, ..] => Err(VerifyError::Refused(status)),
            [version, ..] => Err(VerifyError::Version(version)),
        }
    })
    .await
    .map_err(|_| VerifyError::Timeout(limit))?
}

pub struct Verifier {
    target: Arc<RelayTarget>,
    workers: Arc<Semaphore>,
    timeout: Duration,
}

impl Verifier {
    pub fn new(target: RelayTarget, workers: usize, timeout: Duration) -> Self {
        Self {
            target: Arc::new(target),
            workers: Arc::new(Semaphore::new(workers.max(1))),
            timeout,
        }
    }

    /// Forwards the detections that survive verification, in completion
    /// order. At most `workers` checks run at once. The output ends once
    /// the input has ended and every pending check is done.
    pub fn verify(self, mut detections: mpsc::Receiver<Detection>) -> mpsc::Receiver<Detection> {
        let (tx, rx) = mpsc::channel(VERIFIED_QUEUE);
        tokio::spawn(async move {
            let mut checks = JoinSet::new();
            while let Some(detection) = detections.recv().await {
                if detection.protocol != socks5::NAME {
                    if tx.send(detection).await.is_err() {
                        break;
                    }
                    continue;
                }
                let Ok(permit) = Arc::clone(&self.workers).acquire_owned().await else {
                    break;
                };
                let (tx, target, timeout) = (tx.clone(), Arc::clone(&self.target), self.timeout);
                checks.spawn(async move {
                    let _permit = permit;
                    let proxy = SocketAddr::from((detection.addr, detection.port));
                    match socks5_connect(proxy, &target, timeout).await {
                        Ok(()) => {
                            info!(%detection, %target, "relay verified");
                            let _ = tx.send(detection).await;
                        }
                        Err(e) => debug!(%detection, error = %e, "relay verification failed"),
                    }
                });
                // reap finished checks so the set does not grow with the scan
                while checks.try_join_next().is_some() {}
            }
            while checks.join_next().await.is_some() {}
        });
        rx
    }
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
