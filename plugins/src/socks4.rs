//! SOCKS4 detection: ask the server to CONNECT to a relay and wait for the
//! "request granted" status.

use std::net::SocketAddrV4;

use tracing::trace;

use crate::{Consumed, Probe};

pub const NAME: &str = "socks4";
const VERSION: u8 = 0x04;
const CMD_CONNECT: u8 = 0x01;
const REPLY_VERSION: u8 = 0x00;
const GRANTED: u8 = 0x5a;

pub const DEFAULT_RELAY: SocketAddrV4 = SocketAddrV4::new(std::net::Ipv4Addr::new(1, 1, 1, 1), 80);

#[derive(Debug, Clone)]
pub struct Socks4Probe {
    relay: SocketAddrV4,
}

impl Socks4Probe {
    pub fn new(relay: SocketAddrV4) -> Self {
        Self { relay }
    }
}

impl Default for Socks4Probe {
    fn default() -> Self {
        Self::new(DEFAULT_RELAY)
    }
}

impl Probe for Socks4Probe {
    fn init(&mut self) -> Vec<u8> {
        let mut request = Vec::with_capacity(9);
        request.extend_from_slice(&[VERSION, CMD_CONNECT]);
        request.extend_from_slice(&self.relay.port().to_be_bytes());
        request.extend_from_slice(&self.relay.ip().octets());
        // empty user id
        request.push(0x00);
        request
    }

    fn consume(&mut self, data: &[u8]) -> Consumed {
        match data {
            [REPLY_VERSION, GRANTED, ..] => Consumed::finished(data.len()),
            _ => {
                trace!(len = data.len(), "not a socks4 grant");
                Consumed::nothing()
            }
        }
    }

    fn name(&self) -> &'static str {
        NAME
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
