use std::net::Ipv4Addr;
use std::time::Duration;

pub const DEFAULT_SOURCE_PORT: u16 = 55_324;
pub const DEFAULT_RATE: u32 = 1_000;

/// Settings shared by every stage of a scan run.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Ports paired with every generated address.
    pub ports: Vec<u16>,
    /// SYNs and session segments allowed per second.
    pub rate: u32,
    /// Inactivity after which an open session is evicted with a RST.
    pub connection_timeout: Duration,
    /// How long the transmitter keeps flushing session traffic once
    /// the address stream is exhausted.
    pub grace: Duration,
    /// How long capture stays open after the transmitter stopped.
    pub linger: Duration,
    /// Bound of the collect -> transmit request channel.
    pub request_queue: usize,
    /// Address used to pick the outbound route.
    pub probe_target: Ipv4Addr,
    /// Fixed local port of all scan traffic.
    pub source_port: u16,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            ports: vec![1080],
            rate: DEFAULT_RATE,
            connection_timeout: Duration::from_secs(20),
            grace: Duration::from_secs(5),
            linger: Duration::from_secs(5),
            request_queue: 64,
            probe_target: Ipv4Addr::new(8, 8, 8, 8),
            source_port: DEFAULT_SOURCE_PORT,
        }
    }
}
