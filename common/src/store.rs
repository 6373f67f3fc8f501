//! Persistence capability for detections.
//!
//! Persisting is best-effort: callers log a failed `persist` and keep
//! scanning.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
    #[error("store is closed")]
    Closed,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn persist(&self, addr: Ipv4Addr, port: u16, protocol: &str) -> Result<(), StoreError>;
}

/// Writes every detection to the log and nowhere else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogStore;

#[async_trait]
impl Store for LogStore {
    async fn persist(&self, addr: Ipv4Addr, port: u16, protocol: &str) -> Result<(), StoreError> {
        info!(%addr, port, proto = protocol, "{protocol} found at {addr}:{port}");
        Ok(())
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
