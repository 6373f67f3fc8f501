//! The collect actor.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::{debug, info, trace};
use uwalker_common::detection::Detection;
use uwalker_protocols::tcp::Packet;

use super::{ConnectionKey, ConnectionTable, Outbound, Verdict};
use crate::stats::{self, ScanStats};

pub struct Collector {
    table: ConnectionTable,
    requests: mpsc::Sender<Outbound>,
    stats: Arc<ScanStats>,
}

impl Collector {
    pub(crate) fn new(table: ConnectionTable, requests: mpsc::Sender<Outbound>, stats: Arc<ScanStats>) -> Self {
        Self {
            table,
            requests,
            stats,
        }
    }

    /// Processes packets and eviction deadlines until the packet stream
    /// ends, then hands back the table with whatever is still in flight.
    pub async fn run(
        mut self,
        mut packets: mpsc::Receiver<Packet>,
        detections: mpsc::Sender<Detection>,
    ) -> ConnectionTable {
        loop {
            let deadline = self.table.next_deadline();
            tokio::select! {
                packet = packets.recv() => match packet {
                    Some(packet) => self.on_packet(packet, &detections).await,
                    None => break,
                },
                _ = time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_deadline().await;
                }
            }
        }
        info!(in_flight = self.table.len(), "collector stopped");
        self.table
    }

    async fn on_packet(&mut self, packet: Packet, detections: &mpsc::Sender<Detection>) {
        let (addr, port) = (packet.addr, packet.port);
        let opened = packet.start && !packet.done && !self.table.contains(&ConnectionKey::new(addr, port));

        match self.table.handle(packet, Instant::now()) {
            Verdict::Ignore | Verdict::Closed => {}
            Verdict::Reply(req) => {
                if opened {
                    stats::bump(&self.stats.opened);
                }
                self.request(Outbound::Data(req)).await;
            }
            Verdict::Violation => stats::bump(&self.stats.violations),
            Verdict::Rejected { seq } => {
                stats::bump(&self.stats.rejections);
                self.request(Outbound::Reset { addr, port, seq }).await;
            }
            Verdict::Detected(detection) => {
                stats::bump(&self.stats.detections);
                if detections.send(detection).await.is_err() {
                    debug!(%addr, port, "detection dropped, nobody is listening");
                }
            }
        }
    }

    async fn on_deadline(&mut self) {
        for eviction in self.table.expire(Instant::now()) {
            stats::bump(&self.stats.timeouts);
            self.request(Outbound::Reset {
                addr: eviction.addr,
                port: eviction.port,
                seq: eviction.seq,
            })
            .await;
        }
    }

    async fn request(&mut self, out: Outbound) {
        if self.requests.send(out).await.is_err() {
            trace!("transmitter stopped, request dropped");
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
