//! Wire codecs for the scanner: everything between raw frame bytes and the
//! scanner's own types.

pub mod arp;
pub mod ethernet;
pub mod filter;
pub mod ipv4;
pub mod tcp;

pub const ETH_HDR_LEN: usize = 14;
pub const ARP_LEN: usize = 28;
pub const IPV4_HDR_LEN: usize = 20;
pub const TCP_HDR_LEN: usize = 20;
pub const MIN_ETH_FRAME_NO_FCS: usize = 60;
