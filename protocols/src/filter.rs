use pnet::packet::Packet;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use pnet::packet::ip::IpNextHeaderProtocols;
use pnet::packet::ipv4::Ipv4Packet;
use pnet::packet::tcp::TcpPacket;

/// Keeps ARP traffic and TCP segments addressed to the scanner's port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureFilter {
    pub port: u16,
}

impl CaptureFilter {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub fn matches(&self, frame: &[u8]) -> bool {
        let Some(eth) = EthernetPacket::new(frame) else {
            return false;
        };
        match eth.get_ethertype() {
            EtherTypes::Arp => true,
            EtherTypes::Ipv4 => Ipv4Packet::new(eth.payload())
                .filter(|ip| ip.get_next_level_protocol() == IpNextHeaderProtocols::Tcp)
                .and_then(|ip| TcpPacket::new(ip.payload()).map(|tcp| tcp.get_destination()))
                .is_some_and(|dst| dst == self.port),
            _ => false,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{arp, tcp::FrameTemplate};
    use pnet::util::MacAddr;
    use std::net::Ipv4Addr;

    #[test]
    fn accepts_arp_and_own_port_only() {
        let filter = CaptureFilter::new(55_324);
        let mac = MacAddr::new(2, 0, 0, 0, 0, 1);
        let addr = Ipv4Addr::new(10, 0, 0, 1);

        let request = arp::create_request(mac, addr, Ipv4Addr::new(10, 0, 0, 254)).unwrap();
        assert!(filter.matches(&request));

        let mut t = FrameTemplate::new(mac, mac, addr, 1080).unwrap();
        assert!(filter.matches(t.syn(addr, 55_324).unwrap()));
        assert!(!filter.matches(t.syn(addr, 443).unwrap()));
    }

    #[test]
    fn rejects_garbage() {
        let filter = CaptureFilter::new(1);
        assert!(!filter.matches(&[]));
        assert!(!filter.matches(&[0xff; 40]));
    }
}
