use std::net::Ipv4Addr;
use std::ops::RangeInclusive;

pub use pnet::ipnetwork::Ipv4Network;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CidrError {
    #[error("invalid address in CIDR '{input}'")]
    Address { input: String },
    #[error("invalid prefix in CIDR '{input}'")]
    Prefix { input: String },
    #[error("'{input}' is not an IPv4 CIDR block")]
    NotIpv4 { input: String },
}

/// An inclusive span of IPv4 addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ipv4Range {
    pub start_addr: Ipv4Addr,
    pub end_addr: Ipv4Addr,
}

impl Ipv4Range {
    pub fn new(start_addr: Ipv4Addr, end_addr: Ipv4Addr) -> Self {
        Self {
            start_addr,
            end_addr,
        }
    }

    pub fn len(&self) -> u64 {
        let start: u32 = self.start_addr.into();
        let end: u32 = self.end_addr.into();
        if end < start {
            return 0;
        }
        u64::from(end - start) + 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The numeric span, suitable for walking addresses by integer increment.
    pub fn as_u32s(&self) -> RangeInclusive<u32> {
        u32::from(self.start_addr)..=u32::from(self.end_addr)
    }
}

impl From<Ipv4Network> for Ipv4Range {
    /// Masked network base through the broadcast address.
    fn from(network: Ipv4Network) -> Self {
        Self::new(network.network(), network.broadcast())
    }
}

/// Parses "a.b.c.d/p" (or a bare address, taken as /32) into a network
/// whose address is the masked base.
pub fn parse_cidr(s: &str) -> Result<Ipv4Network, CidrError> {
    let s = s.trim();
    let (ip_str, prefix_str) = s.split_once('/').unwrap_or((s, "32"));

    if ip_str.contains(':') {
        return Err(CidrError::NotIpv4 { input: s.to_string() });
    }

    let ipv4_addr = ip_str
        .parse::<Ipv4Addr>()
        .map_err(|_| CidrError::Address { input: s.to_string() })?;

    let prefix = prefix_str
        .parse::<u8>()
        .map_err(|_| CidrError::Prefix { input: s.to_string() })?;

    let network = Ipv4Network::new(ipv4_addr, prefix)
        .map_err(|_| CidrError::Prefix { input: s.to_string() })?;

    Ipv4Network::new(network.network(), prefix).map_err(|_| CidrError::Prefix { input: s.to_string() })
}

/// Parses every non-empty, non-comment line of `text` as a CIDR block.
pub fn parse_cidr_list(text: &str) -> Result<Vec<Ipv4Network>, CidrError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(parse_cidr)
        .collect()
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cidr_masks_host_bits() {
        let net = parse_cidr("10.20.30.1/24").unwrap();
        assert_eq!(net.ip(), Ipv4Addr::new(10, 20, 30, 0));
        assert_eq!(net.prefix(), 24);
    }

    #[test]
    fn parse_cidr_bare_address_is_single_host() {
        let net = parse_cidr("1.1.1.1").unwrap();
        let range = Ipv4Range::from(net);
        assert_eq!(range.len(), 1);
        assert_eq!(range.start_addr, Ipv4Addr::new(1, 1, 1, 1));
    }

    #[test]
    fn parse_cidr_rejects_garbage() {
        assert!(matches!(parse_cidr("999.1.2.3/24"), Err(CidrError::Address { .. })));
        assert!(matches!(parse_cidr("192.168.0.1/33"), Err(CidrError::Prefix { .. })));
        assert!(matches!(parse_cidr("192.168.0.1/x"), Err(CidrError::Prefix { .. })));
        assert!(matches!(parse_cidr("::1/64"), Err(CidrError::NotIpv4 { .. })));
    }

    #[test]
    fn range_from_network_spans_base_to_broadcast() {
        let range = Ipv4Range::from(parse_cidr("172.16.5.10/20").unwrap());
        assert_eq!(range.start_addr, Ipv4Addr::new(172, 16, 0, 0));
        assert_eq!(range.end_addr, Ipv4Addr::new(172, 16, 15, 255));
        assert_eq!(range.len(), 4096);
        assert!(!range.is_empty());
        assert!(Ipv4Range::new(range.end_addr, range.start_addr).is_empty());
    }

    #[test]
    fn whole_space_does_not_overflow() {
        let range = Ipv4Range::from(parse_cidr("0.0.0.0/0").unwrap());
        assert_eq!(range.len(), 1 << 32);
        assert_eq!(range.as_u32s(), 0..=u32::MAX);
    }

    #[test]
    fn parse_cidr_list_skips_blank_and_comment_lines() {
        let text = "# targets\n3.83.0.0/16\n\n  1.1.1.1/32  \n";
        let nets = parse_cidr_list(text).unwrap();
        assert_eq!(nets.len(), 2);
        assert_eq!(nets[1].ip(), Ipv4Addr::new(1, 1, 1, 1));
    }
}
