//! # Conductor
//!
//! Owns the per-session state of a scan and runs it as two actors:
//!
//! - the [`Transmitter`] issues SYNs for every address/port pair and all
//!   session traffic, always serving pending session traffic first, and is
//!   the only user of the [`Limiter`] and of the packet sender;
//! - the [`Collector`] owns the [`ConnectionTable`], consumes inbound
//!   packets and eviction deadlines one at a time and feeds the probes.
//!
//! The collector talks to the transmitter through one bounded channel of
//! [`Outbound`] instructions. Nothing else is shared but the counters.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uwalker_common::config::ScanConfig;
use uwalker_plugins::ProbeFactory;

use crate::limiter::Limiter;
use crate::stats::ScanStats;
use crate::transport::PacketSender;

mod collect;
mod connection;
mod transmit;

pub use collect::Collector;
pub use connection::{ConnectionKey, ConnectionTable, Eviction, MAX_OUTSTANDING, Verdict};
pub use transmit::Transmitter;

/// Session bytes to send with explicit sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundRequest {
    pub addr: Ipv4Addr,
    pub port: u16,
    pub seq: u32,
    pub ack: u32,
    pub data: Vec<u8>,
}

/// What the collector asks the transmitter to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Data(OutboundRequest),
    Reset { addr: Ipv4Addr, port: u16, seq: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConductorSettings {
    /// Inactivity after which a session is evicted with a RST.
    pub timeout: Duration,
    /// Drain window of the transmitter after the last address.
    pub grace: Duration,
    pub request_queue: usize,
}

impl Default for ConductorSettings {
    fn default() -> Self {
        Self::from(&ScanConfig::default())
    }
}

impl From<&ScanConfig> for ConductorSettings {
    fn from(config: &ScanConfig) -> Self {
        Self {
            timeout: config.connection_timeout,
            grace: config.grace,
            request_queue: config.request_queue.max(1),
        }
    }
}

pub struct Conductor<S> {
    sender: S,
    limiter: Limiter,
    ports: Vec<u16>,
    factory: ProbeFactory,
    settings: ConductorSettings,
    stats: Arc<ScanStats>,
}

impl<S: PacketSender> Conductor<S> {
    pub fn new(
        sender: S,
        limiter: Limiter,
        ports: Vec<u16>,
        factory: ProbeFactory,
        settings: ConductorSettings,
    ) -> Self {
        Self {
            sender,
            limiter,
            ports,
            factory,
            settings,
            stats: Arc::new(ScanStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<ScanStats> {
        Arc::clone(&self.stats)
    }

    /// Splits the conductor into its two actors, wired to each other.
    pub fn into_actors(self) -> (Transmitter<S>, Collector) {
        let (requests_tx, requests_rx) = mpsc::channel(self.settings.request_queue);
        let table = ConnectionTable::new(self.factory, self.settings.timeout);
        let transmitter = Transmitter::new(
            self.sender,
            self.limiter,
            self.ports,
            requests_rx,
            self.settings.grace,
            Arc::clone(&self.stats),
        );
        let collector = Collector::new(table, requests_tx, self.stats);
        (transmitter, collector)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::net::Ipv4Addr;
    use std::sync::{Arc, Mutex};

    use super::OutboundRequest;
    use crate::transport::{PacketSender, TransportError};

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Sent {
        Syn(Ipv4Addr, u16),
        Data(OutboundRequest),
        Reset(Ipv4Addr, u16, u32),
    }

    /// Records every send attempt; optionally fails all of them.
    #[derive(Debug, Clone, Default)]
    pub struct RecordingSender {
        log: Arc<Mutex<Vec<Sent>>>,
        fail: bool,
    }

    impl RecordingSender {
        pub fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub fn sent(&self) -> Vec<Sent> {
            self.log.lock().unwrap().clone()
        }

        fn record(&mut self, sent: Sent) -> Result<(), TransportError> {
            self.log.lock().unwrap().push(sent);
            if self.fail {
                return Err(TransportError::Send(std::io::Error::other("boom")));
            }
            Ok(())
        }
    }

    impl PacketSender for RecordingSender {
        fn probe(&mut self, dst: Ipv4Addr, port: u16) -> Result<(), TransportError> {
            self.record(Sent::Syn(dst, port))
        }

        fn probe_data(
            &mut self,
            dst: Ipv4Addr,
            port: u16,
            seq: u32,
            ack: u32,
            data: &[u8],
        ) -> Result<(), TransportError> {
            self.record(Sent::Data(OutboundRequest {
                addr: dst,
                port,
                seq,
                ack,
                data: data.to_vec(),
            }))
        }

        fn terminate(&mut self, dst: Ipv4Addr, port: u16, seq: u32) -> Result<(), TransportError> {
            self.record(Sent::Reset(dst, port, seq))
        }
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
