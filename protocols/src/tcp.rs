//! # TCP frames
//!
//! Outbound frames are built from a [`FrameTemplate`]: the Ethernet header
//! and the unchanging IPv4 fields are written once, and each send only fills
//! in destination, ports, sequence numbers, flags and payload before both
//! checksums are recomputed.
//!
//! Inbound frames are reduced to a [`Packet`] by [`decode`].

use std::net::Ipv4Addr;

use anyhow::Context;
use pnet::packet::Packet as _;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::{self, MutableTcpPacket, TcpFlags, TcpPacket};
use pnet::util::MacAddr;

use crate::{ETH_HDR_LEN, IPV4_HDR_LEN, MIN_ETH_FRAME_NO_FCS, TCP_HDR_LEN, ethernet, ipv4};

const HEADERS_LEN: usize = ETH_HDR_LEN + IPV4_HDR_LEN + TCP_HDR_LEN;
const WINDOW: u16 = 200;

/// A normalized inbound TCP segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub addr: Ipv4Addr,
    pub port: u16,
    /// RST or FIN was set.
    pub done: bool,
    /// SYN and ACK were both set.
    pub start: bool,
    pub seq: u32,
    pub ack: u32,
    pub payload: Vec<u8>,
}

/// Reduces a captured frame to a [`Packet`].
///
/// Anything that is not Ethernet/IPv4/TCP addressed to `local_port` yields
/// `None`. The payload is copied out of `frame`.
pub fn decode(frame: &[u8], local_port: u16) -> Option<Packet> {
    let eth = EthernetPacket::new(frame)?;
    if eth.get_ethertype() != EtherTypes::Ipv4 {
        return None;
    }
    let ip = Ipv4Packet::new(eth.payload())?;
    if ip.get_version() != 4 || ip.get_next_level_protocol() != IpNextHeaderProtocols::Tcp {
        return None;
    }
    let segment = TcpPacket::new(ip.payload())?;
    if segment.get_destination() != local_port {
        return None;
    }

    let flags = segment.get_flags();
    let has = |flag: u8| flags & flag != 0;

    Some(Packet {
        addr: ip.get_source(),
        port: segment.get_source(),
        done: has(TcpFlags::RST) || has(TcpFlags::FIN),
        start: has(TcpFlags::SYN) && has(TcpFlags::ACK),
        seq: segment.get_sequence(),
        ack: segment.get_acknowledgement(),
        payload: segment.payload().to_vec(),
    })
}

/// A reusable outbound frame with the per-scan fields pre-written.
#[derive(Debug, Clone)]
pub struct FrameTemplate {
    buf: Vec<u8>,
    src_addr: Ipv4Addr,
    src_port: u16,
}

impl FrameTemplate {
    pub fn new(
        src_mac: MacAddr,
        dst_mac: MacAddr,
        src_addr: Ipv4Addr,
        src_port: u16,
    ) -> anyhow::Result<Self> {
        let mut buf = vec![0u8; MIN_ETH_FRAME_NO_FCS];
        ethernet::make_header(&mut buf, src_mac, dst_mac, EtherTypes::Ipv4)?;
        ipv4::write_static_fields(&mut buf[ETH_HDR_LEN..], IpNextHeaderProtocols::Tcp, src_addr)?;
        Ok(Self {
            buf,
            src_addr,
            src_port,
        })
    }

    /// A bare SYN with sequence number 0.
    pub fn syn(&mut self, dst: Ipv4Addr, port: u16) -> anyhow::Result<&[u8]> {
        self.build(dst, port, 0, 0, TcpFlags::SYN, &[])
    }

    /// An ACK+PSH segment carrying `payload`.
    pub fn data(
        &mut self,
        dst: Ipv4Addr,
        port: u16,
        seq: u32,
        ack: u32,
        payload: &[u8],
    ) -> anyhow::Result<&[u8]> {
        self.build(dst, port, seq, ack, TcpFlags::ACK | TcpFlags::PSH, payload)
    }

    pub fn reset(&mut self, dst: Ipv4Addr, port: u16, seq: u32) -> anyhow::Result<&[u8]> {
        self.build(dst, port, seq, 0, TcpFlags::RST, &[])
    }

    fn build(
        &mut self,
        dst: Ipv4Addr,
        port: u16,
        seq: u32,
        ack: u32,
        flags: u8,
        payload: &[u8],
    ) -> anyhow::Result<&[u8]> {
        let frame_len = HEADERS_LEN + payload.len();
        let ip_len = u16::try_from(IPV4_HDR_LEN + TCP_HDR_LEN + payload.len())
            .context("payload does not fit in one ipv4 packet")?;

        self.buf.resize(frame_len.max(MIN_ETH_FRAME_NO_FCS), 0);
        self.buf[frame_len..].fill(0);

        {
            let mut segment = MutableTcpPacket::new(&mut self.buf[ETH_HDR_LEN + IPV4_HDR_LEN..frame_len])
                .context("failed to create mutable TCP packet")?;
            segment.set_source(self.src_port);
            segment.set_destination(port);
            segment.set_sequence(seq);
            segment.set_acknowledgement(ack);
            segment.set_data_offset(5);
            segment.set_reserved(0);
            segment.set_flags(flags);
            segment.set_window(WINDOW);
            segment.set_urgent_ptr(0);
            segment.set_payload(payload);
            segment.set_checksum(0);
            let checksum = tcp::ipv4_checksum(&segment.to_immutable(), &self.src_addr, &dst);
            segment.set_checksum(checksum);
        }

        ipv4::finish_header(&mut self.buf[ETH_HDR_LEN..], ip_len, dst)?;
        Ok(&self.buf)
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

#[cfg(test)]
mod tests {
    use super::*;
    use pnet::packet::ethernet::MutableEthernetPacket;
    use pnet::packet::ipv4::MutableIpv4Packet;

    const LOCAL_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0, 0x01);
    const GW_MAC: MacAddr = MacAddr(0x02, 0, 0, 0, 0, 0xfe);
    const LOCAL: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
    const REMOTE: Ipv4Addr = Ipv4Addr::new(93, 184, 216, 34);
    const LOCAL_PORT: u16 = 55_324;

    fn template() -> FrameTemplate {
        FrameTemplate::new(LOCAL_MAC, GW_MAC, LOCAL, LOCAL_PORT).unwrap()
    }

    /// Builds the frame a remote peer would send back to the scanner.
    fn reply_frame(flags: u8, seq: u32, ack: u32, payload: &[u8]) -> Vec<u8> {
        let mut peer = FrameTemplate::new(GW_MAC, LOCAL_MAC, REMOTE, 1080).unwrap();
        peer.build(LOCAL, LOCAL_PORT, seq, ack, flags, payload)
            .unwrap()
            .to_vec()
    }

    #[test]
    fn syn_frame_is_well_formed() {
        let mut t = template();
        let frame = t.syn(REMOTE, 1080).unwrap().to_vec();

        let eth = EthernetPacket::new(&frame).unwrap();
        assert_eq!(eth.get_source(), LOCAL_MAC);
        assert_eq!(eth.get_destination(), GW_MAC);
        assert_eq!(eth.get_ethertype(), EtherTypes::Ipv4);

        let ip = Ipv4Packet::new(eth.payload()).unwrap();
        assert_eq!(ip.get_source(), LOCAL);
        assert_eq!(ip.get_destination(), REMOTE);
        assert_eq!(ip.get_total_length() as usize, IPV4_HDR_LEN + TCP_HDR_LEN);

        let segment = TcpPacket::new(ip.payload()).unwrap();
        assert_eq!(segment.get_source(), LOCAL_PORT);
        assert_eq!(segment.get_destination(), 1080);
        assert_eq!(segment.get_flags(), TcpFlags::SYN);
        assert_eq!(segment.get_sequence(), 0);
        assert_eq!(segment.get_window(), WINDOW);
        assert_eq!(
            segment.get_checksum(),
            tcp::ipv4_checksum(&segment, &LOCAL, &REMOTE)
        );
    }

    #[test]
    fn data_frame_carries_payload_and_numbers() {
        let mut t = template();
        let frame = t.data(REMOTE, 1080, 1, 101, &[5, 1, 0]).unwrap().to_vec();

        let eth = EthernetPacket::new(&frame).unwrap();
        let ip = Ipv4Packet::new(eth.payload()).unwrap();
        assert_eq!(ip.get_total_length() as usize, IPV4_HDR_LEN + TCP_HDR_LEN + 3);

        let segment = TcpPacket::new(ip.payload()).unwrap();
        assert_eq!(segment.get_flags(), TcpFlags::ACK | TcpFlags::PSH);
        assert_eq!(segment.get_sequence(), 1);
        assert_eq!(segment.get_acknowledgement(), 101);
        assert_eq!(segment.payload(), &[5, 1, 0]);
        assert_eq!(
            segment.get_checksum(),
            tcp::ipv4_checksum(&segment, &LOCAL, &REMOTE)
        );
    }

    #[test]
    fn template_is_reusable_across_sizes() {
        let mut t = template();
        let long = vec![0xab; 100];
        assert_eq!(t.data(REMOTE, 80, 7, 9, &long).unwrap().len(), HEADERS_LEN + 100);

        let frame = t.reset(Ipv4Addr::new(1, 2, 3, 4), 443, 42).unwrap().to_vec();
        assert_eq!(frame.len(), MIN_ETH_FRAME_NO_FCS);
        assert!(frame[HEADERS_LEN..].iter().all(|b| *b == 0));

        let ip = Ipv4Packet::new(&frame[ETH_HDR_LEN..]).unwrap();
        assert_eq!(ip.get_destination(), Ipv4Addr::new(1, 2, 3, 4));
        assert_eq!(ip.get_checksum(), pnet::packet::ipv4::checksum(&ip));
        let segment = TcpPacket::new(ip.payload()).unwrap();
        assert_eq!(segment.get_flags(), TcpFlags::RST);
        assert_eq!(segment.get_sequence(), 42);
        assert!(segment.payload().is_empty());
    }

    #[test]
    fn decode_syn_ack() {
        let frame = reply_frame(TcpFlags::SYN | TcpFlags::ACK, 100, 1, &[]);
        let packet = decode(&frame, LOCAL_PORT).unwrap();

        assert_eq!(packet.addr, REMOTE);
        assert_eq!(packet.port, 1080);
        assert!(packet.start);
        assert!(!packet.done);
        assert_eq!(packet.seq, 100);
        assert_eq!(packet.ack, 1);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn decode_copies_payload() {
        let mut frame = reply_frame(TcpFlags::ACK | TcpFlags::PSH, 101, 4, &[5, 0]);
        let packet = decode(&frame, LOCAL_PORT).unwrap();
        frame.fill(0);

        assert_eq!(packet.payload, vec![5, 0]);
        assert!(!packet.start);
        assert!(!packet.done);
    }

    #[test]
    fn decode_marks_rst_and_fin_as_done() {
        for flags in [TcpFlags::RST, TcpFlags::FIN | TcpFlags::ACK, TcpFlags::RST | TcpFlags::ACK] {
            let packet = decode(&reply_frame(flags, 5, 5, &[]), LOCAL_PORT).unwrap();
            assert!(packet.done, "flags {flags:#04x}");
        }
    }

    #[test]
    fn decode_reads_ports_big_endian() {
        // 0x1f90 must decode to 8080, not 16 * 0x1f + 0x1f.
        let mut peer = FrameTemplate::new(GW_MAC, LOCAL_MAC, REMOTE, 0x1f90).unwrap();
        let frame = peer.syn(LOCAL, LOCAL_PORT).unwrap().to_vec();
        let offset = HEADERS_LEN - TCP_HDR_LEN;
        assert_eq!(&frame[offset..offset + 2], &[0x1f, 0x90]);

        let packet = decode(&frame, LOCAL_PORT).unwrap();
        assert_eq!(packet.port, 8080);
        assert_ne!(packet.port, 16 * 0x1f + 0x1f);
    }

    #[test]
    fn decode_discards_other_ports() {
        let frame = reply_frame(TcpFlags::SYN | TcpFlags::ACK, 1, 1, &[]);
        assert_eq!(decode(&frame, LOCAL_PORT + 1), None);
    }

    #[test]
    fn decode_discards_non_tcp() {
        let mut frame = reply_frame(TcpFlags::ACK, 1, 1, &[]);
        MutableIpv4Packet::new(&mut frame[ETH_HDR_LEN..])
            .unwrap()
            .set_next_level_protocol(IpNextHeaderProtocols::Udp);
        assert_eq!(decode(&frame, LOCAL_PORT), None);

        let mut frame = reply_frame(TcpFlags::ACK, 1, 1, &[]);
        MutableEthernetPacket::new(&mut frame)
            .unwrap()
            .set_ethertype(EtherTypes::Arp);
        assert_eq!(decode(&frame, LOCAL_PORT), None);

        assert_eq!(decode(&frame[..ETH_HDR_LEN + 4], LOCAL_PORT), None);
    }
}
