//! # Exclusion Set
//!
//! A sorted, disjoint list of CIDR blocks that must never be probed.
//!
//! Construction normalizes the input once: blocks are ordered by their
//! masked base address (wider blocks first on ties) and any block whose base
//! falls inside an already kept block is absorbed. Because CIDR blocks are
//! either nested or disjoint, the result covers exactly the union of the
//! input, independent of input order, and membership is a single binary
//! search.

use std::net::Ipv4Addr;

use pnet::ipnetwork::Ipv4Network;

use super::range::{self, CidrError};

/// Reserved, private, multicast and otherwise non-routable IPv4 space.
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
    "0.0.0.0/8",
    "10.0.0.0/8",
    "100.64.0.0/10",
    "127.0.0.0/8",
    "169.254.0.0/16",
    "172.16.0.0/12",
    "192.0.0.0/24",
    "192.0.2.0/24",
    "192.88.99.0/24",
    "192.168.0.0/16",
    "192.175.48.0/24",
    "198.18.0.0/15",
    "198.51.100.0/24",
    "203.0.113.0/24",
    "224.0.0.0/4",
    "240.0.0.0/4",
    "255.255.255.255/32",
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExclusionSet {
    blocks: Vec<Ipv4Network>,
}

impl ExclusionSet {
    pub fn new<I>(networks: I) -> Self
    where
        I: IntoIterator<Item = Ipv4Network>,
    {
        let mut sorted: Vec<(u32, u8)> = networks
            .into_iter()
            .map(|net| (u32::from(net.network()), net.prefix()))
            .collect();
        sorted.sort_unstable();

        let mut blocks: Vec<Ipv4Network> = Vec::with_capacity(sorted.len());
        for (base, prefix) in sorted {
            let addr = Ipv4Addr::from(base);
            if blocks.last().is_some_and(|last| last.contains(addr)) {
                continue;
            }
            if let Ok(block) = Ipv4Network::new(addr, prefix) {
                blocks.push(block);
            }
        }

        Self { blocks }
    }

    /// Builds the set from textual CIDR blocks.
    pub fn parse<I, S>(cidrs: I) -> Result<Self, CidrError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let networks = cidrs
            .into_iter()
            .map(|cidr| range::parse_cidr(cidr.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(networks))
    }

    /// The built-in list of non-routable space.
    pub fn reserved() -> Result<Self, CidrError> {
        Self::parse(DEFAULT_EXCLUSIONS)
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let value = u32::from(addr);
        let idx = self
            .blocks
            .partition_point(|block| u32::from(block.network()) <= value);
        idx > 0 && self.blocks[idx - 1].contains(addr)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn blocks(&self) -> &[Ipv4Network] {
        &self.blocks
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
