//! Outbound route resolution.
//!
//! The scanner crafts its own Ethernet frames, so before the first probe it
//! needs to know which interface to use, which next hop to address frames
//! to and which source address to put in them. [`Router`] is the seam; the
//! [`SystemRouter`] asks the operating system.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use pnet::datalink::{self, NetworkInterface};
use pnet::ipnetwork::IpNetwork;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RouteError {
    #[error("no route to {0}")]
    NoRoute(Ipv4Addr),
    #[error("interface '{0}' not found")]
    NoInterface(String),
    #[error("interface '{0}' has no usable IPv4 address")]
    NoSource(String),
    #[error("route lookup failed: {0}")]
    Lookup(#[from] std::io::Error),
    #[error("route lookup is not supported on this platform")]
    Unsupported,
}

#[derive(Debug, Clone)]
pub struct Route {
    pub interface: NetworkInterface,
    /// `None` when the destination is on-link.
    pub gateway: Option<Ipv4Addr>,
    pub source: Ipv4Addr,
}

impl Route {
    /// The address whose hardware address frames must be sent to.
    pub fn next_hop(&self, destination: Ipv4Addr) -> Ipv4Addr {
        self.gateway.unwrap_or(destination)
    }
}

pub trait Router {
    fn route(&self, destination: Ipv4Addr) -> Result<Route, RouteError>;
}

/// Resolves routes through the host's routing table.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRouter;

impl Router for SystemRouter {
    fn route(&self, destination: Ipv4Addr) -> Result<Route, RouteError> {
        let (if_name, gateway) = platform::lookup(destination)?;
        debug!(%destination, interface = %if_name, ?gateway, "route resolved");

        let interface = datalink::interfaces()
            .into_iter()
            .find(|intf| intf.name == if_name)
            .ok_or_else(|| RouteError::NoInterface(if_name.clone()))?;

        let source = preferred_source(&interface, destination)
            .ok_or_else(|| RouteError::NoSource(if_name.clone()))?;

        Ok(Route {
            interface,
            gateway,
            source,
        })
    }
}

/// The address the kernel would pick for a connected UDP socket, when it
/// belongs to `interface`; otherwise the interface's first IPv4 address.
/// Connecting a UDP socket sends nothing.
fn preferred_source(interface: &NetworkInterface, destination: Ipv4Addr) -> Option<Ipv4Addr> {
    let own: Vec<Ipv4Addr> = interface
        .ips
        .iter()
        .filter_map(|net| match net {
            IpNetwork::V4(v4) => Some(v4.ip()),
            IpNetwork::V6(_) => None,
        })
        .collect();

    let kernel_choice = UdpSocket::bind("0.0.0.0:0")
        .and_then(|socket| {
            socket.connect((destination, 53))?;
            socket.local_addr()
        })
        .ok()
        .and_then(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4),
            IpAddr::V6(_) => None,
        });

    match kernel_choice {
        Some(addr) if own.contains(&addr) => Some(addr),
        _ => own.first().copied(),
    }
}

const RTF_UP: u32 = 0x0001;

/// Longest-prefix match over the text of `/proc/net/route`.
///
/// Returns the interface name and the gateway (`None` for on-link routes).
pub fn parse_proc_route(table: &str, destination: Ipv4Addr) -> Option<(String, Option<Ipv4Addr>)> {
    let dst = u32::from(destination);
    let mut best: Option<(u32, u32, String, Option<Ipv4Addr>)> = None;

    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 8 {
            continue;
        }
        let (Some(net), Some(gw), Some(flags), Some(metric), Some(mask)) = (
            hex_addr(fields[1]),
            hex_addr(fields[2]),
            u32::from_str_radix(fields[3], 16).ok(),
            fields[6].parse::<u32>().ok(),
            hex_addr(fields[7]),
        ) else {
            continue;
        };
        if flags & RTF_UP == 0 {
            continue;
        }
        let (net, mask) = (u32::from(net), u32::from(mask));
        if dst & mask != net & mask {
            continue;
        }

        let specificity = mask.count_ones();
        let better = match &best {
            None => true,
            Some((best_spec, best_metric, ..)) => {
                specificity > *best_spec || (specificity == *best_spec && metric < *best_metric)
            }
        };
        if better {
            let gateway = (!gw.is_unspecified()).then_some(gw);
            best = Some((specificity, metric, fields[0].to_string(), gateway));
        }
    }

    best.map(|(_, _, name, gateway)| (name, gateway))
}

/// `/proc/net/route` stores addresses as host-order hex of network-order bytes.
fn hex_addr(field: &str) -> Option<Ipv4Addr> {
    u32::from_str_radix(field, 16)
        .ok()
        .map(|raw| Ipv4Addr::from(raw.to_le_bytes()))
}

/// Extracts `gateway:` and `interface:` from `route -n get` output.
pub fn parse_route_get(output: &str) -> Option<(String, Option<Ipv4Addr>)> {
    let mut gateway = None;
    let mut if_name = None;

    for line in output.lines() {
        let mut fields = line.split_whitespace();
        let (Some(header), Some(value), None) = (fields.next(), fields.next(), fields.next()) else {
            continue;
        };
        match header {
            "gateway:" => gateway = value.parse::<Ipv4Addr>().ok(),
            "interface:" => if_name = Some(value.to_string()),
            _ => {}
        }
    }

    if_name.map(|name| (name, gateway))
}

#[cfg(target_os = "linux")]
mod platform {
    use super::*;

    pub fn lookup(destination: Ipv4Addr) -> Result<(String, Option<Ipv4Addr>), RouteError> {
        let table = std::fs::read_to_string("/proc/net/route")?;
        parse_proc_route(&table, destination).ok_or(RouteError::NoRoute(destination))
    }
}

#[cfg(target_os = "macos")]
mod platform {
    use super::*;
    use std::process::Command;

    pub fn lookup(destination: Ipv4Addr) -> Result<(String, Option<Ipv4Addr>), RouteError> {
        let output = Command::new("/sbin/route")
            .args(["-n", "get", &destination.to_string()])
            .output()?;
        let text = String::from_utf8_lossy(&output.stdout);
        parse_route_get(&text).ok_or(RouteError::NoRoute(destination))
    }
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
mod platform {
    use super::*;

    pub fn lookup(_destination: Ipv4Addr) -> Result<(String, Option<Ipv4Addr>), RouteError> {
        Err(RouteError::Unsupported)
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
