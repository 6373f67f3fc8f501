//! # Transport
//!
//! Raw Ethernet/IPv4/TCP plumbing. Construction resolves the route and the
//! next hop's hardware address once; afterwards every SYN, data segment and
//! RST is built from one frame template and written straight to the
//! datalink channel.
//!
//! **Capture** runs on a dedicated OS thread (datalink reads block), filters
//! frames down to ARP and TCP addressed to the scanner's port and forwards
//! decoded [`Packet`]s into a bounded tokio channel. When the capture stops,
//! the datalink receiver is handed back so that capture can be started again
//! on the same transport.

use std::io;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pnet::datalink::{self, Channel, Config, DataLinkReceiver, DataLinkSender, NetworkInterface};
use pnet::util::MacAddr;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uwalker_common::network::route::{Route, RouteError, Router};
use uwalker_protocols::arp;
use uwalker_protocols::filter::CaptureFilter;
use uwalker_protocols::tcp::{self, FrameTemplate, Packet};

pub const ARP_TIMEOUT: Duration = Duration::from_secs(5);
const READ_TIMEOUT: Duration = Duration::from_millis(50);
const PACKET_QUEUE: usize = 256;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("opening datalink channel on {interface}: {source}")]
    Open {
        interface: String,
        #[source]
        source: io::Error,
    },
    #[error("non-ethernet channel for {0}")]
    NotEthernet(String),
    #[error("interface {0} has no hardware address")]
    NoMac(String),
    #[error(transparent)]
    Route(#[from] RouteError),
    #[error("no ARP reply from {0} within {1:?}")]
    ArpTimeout(Ipv4Addr, Duration),
    #[error("building frame: {0:#}")]
    Frame(anyhow::Error),
    #[error("sending frame: {0}")]
    Send(#[from] io::Error),
    #[error("capture is already running")]
    CaptureRunning,
}

/// The outbound half of a transport, as seen by the transmit actor.
pub trait PacketSender: Send {
    /// A bare SYN.
    fn probe(&mut self, dst: Ipv4Addr, port: u16) -> Result<(), TransportError>;
    /// An ACK+PSH segment carrying `data`.
    fn probe_data(
        &mut self,
        dst: Ipv4Addr,
        port: u16,
        seq: u32,
        ack: u32,
        data: &[u8],
    ) -> Result<(), TransportError>;
    fn terminate(&mut self, dst: Ipv4Addr, port: u16, seq: u32) -> Result<(), TransportError>;
}

type SharedReceiver = Arc<Mutex<Option<Box<dyn DataLinkReceiver>>>>;

pub struct Transport {
    tx: Box<dyn DataLinkSender>,
    rx: SharedReceiver,
    template: FrameTemplate,
    route: Route,
    gateway_mac: MacAddr,
    filter: CaptureFilter,
}

impl Transport {
    /// Resolves the route towards `target` and the next hop's hardware
    /// address, then opens the datalink channel for the scan.
    pub fn open<R: Router>(router: &R, target: Ipv4Addr, source_port: u16) -> Result<Self, TransportError> {
        let route = router.route(target)?;
        Self::open_with(route, target, source_port, ARP_TIMEOUT, datalink::channel)
    }

    pub fn open_with<F>(
        route: Route,
        target: Ipv4Addr,
        source_port: u16,
        arp_timeout: Duration,
        channel_opener: F,
    ) -> Result<Self, TransportError>
    where
        F: FnOnce(&NetworkInterface, Config) -> io::Result<Channel>,
    {
        let src_mac = route
            .interface
            .mac
            .ok_or_else(|| TransportError::NoMac(route.interface.name.clone()))?;
        let (mut tx, mut rx) = open_eth_channel(&route.interface, &get_config(), channel_opener)?;

        let next_hop = route.next_hop(target);
        let gateway_mac = resolve_hw_addr(tx.as_mut(), rx.as_mut(), src_mac, route.source, next_hop, arp_timeout)?;
        info!(
            interface = %route.interface.name,
            source = %route.source,
            %next_hop,
            mac = %gateway_mac,
            "next hop resolved"
        );

        let template = FrameTemplate::new(src_mac, gateway_mac, route.source, source_port)
            .map_err(TransportError::Frame)?;

        Ok(Self {
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
            template,
            route,
            gateway_mac,
            filter: CaptureFilter::new(source_port),
        })
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn gateway_mac(&self) -> MacAddr {
        self.gateway_mac
    }

    pub fn source_port(&self) -> u16 {
        self.filter.port
    }

    /// Starts capturing inbound segments.
    ///
    /// The stream ends once `cancel` fires (observed within one read
    /// timeout) or when the returned receiver is dropped. Only one capture
    /// can run at a time.
    pub fn capture(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<Packet>, TransportError> {
        let mut rx = self
            .rx
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or(TransportError::CaptureRunning)?;

        let slot = Arc::clone(&self.rx);
        let filter = self.filter;
        let (queue_tx, queue_rx) = mpsc::channel(PACKET_QUEUE);

        std::thread::spawn(move || {
            debug!(port = filter.port, "capture started");
            let mut forwarded: u64 = 0;
            let mut failing = false;
            while !cancel.is_cancelled() {
                let frame = match rx.next() {
                    Ok(frame) => {
                        failing = false;
                        frame
                    }
                    Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => continue,
                    Err(e) => {
                        if failing {
                            trace!(error = %e, "capture read failed");
                        } else {
                            warn!(error = %e, "capture read failed, retrying");
                            failing = true;
                        }
                        std::thread::sleep(READ_TIMEOUT);
                        continue;
                    }
                };
                if !filter.matches(frame) {
                    continue;
                }
                let Some(packet) = tcp::decode(frame, filter.port) else {
                    continue;
                };
                if queue_tx.blocking_send(packet).is_err() {
                    break;
                }
                forwarded += 1;
            }
            if let Ok(mut guard) = slot.lock() {
                *guard = Some(rx);
            }
            info!(forwarded, "capture stopped");
        });

        Ok(queue_rx)
    }

    fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let bytes = match frame {
            Frame::Syn { dst, port } => self.template.syn(dst, port),
            Frame::Data { dst, port, seq, ack, data } => self.template.data(dst, port, seq, ack, data),
            Frame::Reset { dst, port, seq } => self.template.reset(dst, port, seq),
        }
        .map_err(TransportError::Frame)?;
        send_frame(self.tx.as_mut(), bytes)
    }
}

enum Frame<'a> {
    Syn { dst: Ipv4Addr, port: u16 },
    Data { dst: Ipv4Addr, port: u16, seq: u32, ack: u32, data: &'a [u8] },
    Reset { dst: Ipv4Addr, port: u16, seq: u32 },
}

impl PacketSender for Transport {
    fn probe(&mut self, dst: Ipv4Addr, port: u16) -> Result<(), TransportError> {
        self.send(Frame::Syn { dst, port })
    }

    fn probe_data(
        &mut self,
        dst: Ipv4Addr,
        port: u16,
        seq: u32,
        ack: u32,
        data: &[u8],
    ) -> Result<(), TransportError> {
        self.send(Frame::Data { dst, port, seq, ack, data })
    }

    fn terminate(&mut self, dst: Ipv4Addr, port: u16, seq: u32) -> Result<(), TransportError> {
        self.send(Frame::Reset { dst, port, seq })
    }
}

fn send_frame(tx: &mut dyn DataLinkSender, frame: &[u8]) -> Result<(), TransportError> {
    match tx.send_to(frame, None) {
        Some(res) => res.map_err(TransportError::Send),
        None => Err(TransportError::Send(io::Error::other("datalink send buffer exhausted"))),
    }
}

/// Broadcasts a who-has for `target` and waits for the matching binding.
fn resolve_hw_addr(
    tx: &mut dyn DataLinkSender,
    rx: &mut dyn DataLinkReceiver,
    src_mac: MacAddr,
    src_addr: Ipv4Addr,
    target: Ipv4Addr,
    timeout: Duration,
) -> Result<MacAddr, TransportError> {
    let request = arp::create_request(src_mac, src_addr, target).map_err(TransportError::Frame)?;
    send_frame(tx, &request)?;
    debug!(%target, "ARP request sent");

    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match rx.next() {
            Ok(frame) => {
                if let Some((addr, mac)) = arp::sender_of(frame) {
                    if addr == target {
                        return Ok(mac);
                    }
                }
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) => {}
            Err(e) => warn!(error = %e, "read failed while waiting for ARP reply"),
        }
    }
    Err(TransportError::ArpTimeout(target, timeout))
}

fn open_eth_channel<F>(
    intf: &NetworkInterface,
    cfg: &Config,
    channel_opener: F,
) -> Result<(Box<dyn DataLinkSender>, Box<dyn DataLinkReceiver>), TransportError>
where
    F: FnOnce(&NetworkInterface, Config) -> io::Result<Channel>,
{
    let ch = channel_opener(intf, *cfg).map_err(|source| TransportError::Open {
        interface: intf.name.clone(),
        source,
    })?;
    match ch {
        Channel::Ethernet(tx, rx) => {
            debug!(interface = %intf.name, "datalink channel open");
            Ok((tx, rx))
        }
        _ => Err(TransportError::NotEthernet(intf.name.clone())),
    }
}

fn get_config() -> Config {
    Config {
        read_timeout: Some(READ_TIMEOUT),
        ..Default::default()
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
