use std::net::Ipv4Addr;

use anyhow::Context;
use pnet::packet::ip::IpNextHeaderProtocol;
use pnet::packet::ipv4::{self, Ipv4Flags, MutableIpv4Packet};

use crate::IPV4_HDR_LEN;

pub const DEFAULT_TTL: u8 = 64;

/// Writes the fields of an IPv4 header that never change between sends.
pub fn write_static_fields(
    buf: &mut [u8],
    next_protocol: IpNextHeaderProtocol,
    src_addr: Ipv4Addr,
) -> anyhow::Result<()> {
    let header = buf.get_mut(..IPV4_HDR_LEN).context("buffer too short for ipv4 header")?;
    let mut ip = MutableIpv4Packet::new(header).context("creating ipv4 header")?;
    ip.set_version(4);
    ip.set_header_length(5);
    ip.set_dscp(0);
    ip.set_ecn(0);
    ip.set_flags(Ipv4Flags::DontFragment);
    ip.set_fragment_offset(0);
    ip.set_ttl(DEFAULT_TTL);
    ip.set_next_level_protocol(next_protocol);
    ip.set_source(src_addr);
    Ok(())
}

/// Fills the per-send fields and recomputes the header checksum.
pub fn finish_header(buf: &mut [u8], total_length: u16, dst_addr: Ipv4Addr) -> anyhow::Result<()> {
    let header = buf.get_mut(..IPV4_HDR_LEN).context("buffer too short for ipv4 header")?;
    let mut ip = MutableIpv4Packet::new(header).context("creating ipv4 header")?;
    ip.set_total_length(total_length);
    ip.set_identification(rand::random());
    ip.set_destination(dst_addr);
    ip.set_checksum(0);
    let checksum = ipv4::checksum(&ip.to_immutable());
    ip.set_checksum(checksum);
    Ok(())
}

// ╔════════════════════════════════════════════╗
// ║ ████████╗███████╗███████╗████████╗███████╗ ║
// ║ ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝██╔════╝ ║
// ║    ██║   █████╗  ███████╗   ██║   ███████╗ ║
// ║    ██║   ██╔══╝  ╚════██║   ██║   ╚════██║ ║
// ║    ██║   ███████╗███████║   ██║   ███████║ ║
// ║    ╚═╝   ╚══════╝╚══════╝   ╚═╝   ╚══════╝ ║
// ╚════════════════════════════════════════════╝
