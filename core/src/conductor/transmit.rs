//! The transmit actor.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::Outbound;
use crate::limiter::Limiter;
use crate::stats::{self, ScanStats};
use crate::transport::{PacketSender, TransportError};

const SEND_FAILURE_PAUSE: Duration = Duration::from_millis(100);

pub struct Transmitter<S> {
    sender: S,
    limiter: Limiter,
    ports: Vec<u16>,
    requests: mpsc::Receiver<Outbound>,
    grace: Duration,
    stats: Arc<ScanStats>,
}

impl<S: PacketSender> Transmitter<S> {
    pub(crate) fn new(
        sender: S,
        limiter: Limiter,
        ports: Vec<u16>,
        requests: mpsc::Receiver<Outbound>,
        grace: Duration,
        stats: Arc<ScanStats>,
    ) -> Self {
        Self {
            sender,
            limiter,
            ports,
            requests,
            grace,
            stats,
        }
    }

    /// Sends a SYN to every port of every address, serving session traffic
    /// first, then drains session traffic for the grace window.
    ///
    /// Returns the sender once done; cancellation ends the run at once.
    pub async fn run(mut self, mut addrs: mpsc::Receiver<Ipv4Addr>, cancel: CancellationToken) -> S {
        let mut current: Option<(Ipv4Addr, usize)> = None;

        loop {
            if cancel.is_cancelled() {
                info!("transmitter cancelled");
                return self.sender;
            }

            if let Some((addr, idx)) = current {
                if let Ok(out) = self.requests.try_recv() {
                    self.dispatch(out).await;
                    continue;
                }
                if let Some(&port) = self.ports.get(idx) {
                    self.syn(addr, port).await;
                }
                current = (idx + 1 < self.ports.len()).then_some((addr, idx + 1));
                continue;
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                Some(out) = self.requests.recv() => self.dispatch(out).await,
                addr = addrs.recv() => match addr {
                    Some(addr) => current = Some((addr, 0)),
                    None => break,
                },
            }
        }

        debug!(grace = ?self.grace, "address stream exhausted, draining session traffic");
        let deadline = Instant::now() + self.grace;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = time::sleep_until(deadline) => break,
                out = self.requests.recv() => match out {
                    Some(out) => self.dispatch(out).await,
                    None => break,
                },
            }
        }

        info!("stopping transmitter");
        self.sender
    }

    async fn syn(&mut self, addr: Ipv4Addr, port: u16) {
        self.pace().await;
        let sent = self.sender.probe(addr, port);
        if self.settle(sent, addr, port).await {
            stats::bump(&self.stats.syns_sent);
        }
    }

    async fn dispatch(&mut self, out: Outbound) {
        self.pace().await;
        match out {
            Outbound::Data(req) => {
                let sent = self
                    .sender
                    .probe_data(req.addr, req.port, req.seq, req.ack, &req.data);
                if self.settle(sent, req.addr, req.port).await {
                    stats::bump(&self.stats.segments_sent);
                }
            }
            Outbound::Reset { addr, port, seq } => {
                let sent = self.sender.terminate(addr, port, seq);
                if self.settle(sent, addr, port).await {
                    stats::bump(&self.stats.resets_sent);
                }
            }
        }
    }

    /// Blocks until the limiter lets one send through.
    async fn pace(&mut self) {
        loop {
            if self.limiter.allow(Instant::now()) {
                return;
            }
            match self.limiter.retry_at() {
                Some(at) => time::sleep_until(at).await,
                None => tokio::task::yield_now().await,
            }
        }
    }

    async fn settle(&mut self, sent: Result<(), TransportError>, addr: Ipv4Addr, port: u16) -> bool {
        match sent {
            Ok(()) => {
                tokio::task::yield_now().await;
                true
            }
            Err(e) => {
                warn!(%addr, port, error = %e, "send failed");
                stats::bump(&self.stats.send_failures);
                time::sleep(SEND_FAILURE_PAUSE).await;
                false
            }
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
    use crate::conductor::OutboundRequest;
    use crate::conductor::testing::{Sent, RecordingSender};

    const A: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 1);
    const B: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 2);

    fn transmitter(
        rate: u32,
        ports: Vec<u16>,
        sender: RecordingSender,
    ) -> (Transmitter<RecordingSender>, mpsc::Sender<Outbound>, Arc<ScanStats>) {
        let (tx, rx) = mpsc::channel(8);
        let stats = Arc::new(ScanStats::default());
        let t = Transmitter::new(
            sender,
            Limiter::new(rate).unwrap(),
            ports,
            rx,
            Duration::from_secs(5),
            Arc::clone(&stats),
        );
        (t, tx, stats)
    }

    fn addresses(list: &[Ipv4Addr]) -> mpsc::Receiver<Ipv4Addr> {
        let (tx, rx) = mpsc::channel(list.len().max(1));
        for addr in list {
            tx.try_send(*addr).unwrap();
        }
        rx
    }

    /// Send but not Sync, like a datalink sender.
    struct Unshared(std::cell::Cell<u32>);

    impl PacketSender for Unshared {
        fn probe(&mut self, _: Ipv4Addr, _: u16) -> Result<(), TransportError> {
            self.0.set(self.0.get() + 1);
            Ok(())
        }

        fn probe_data(&mut self, _: Ipv4Addr, _: u16, _: u32, _: u32, _: &[u8]) -> Result<(), TransportError> {
            Ok(())
        }

        fn terminate(&mut self, _: Ipv4Addr, _: u16, _: u32) -> Result<(), TransportError> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn runs_with_an_unshared_sender() {
        let (_requests, rx) = mpsc::channel(1);
        let t = Transmitter::new(
            Unshared(std::cell::Cell::new(0)),
            Limiter::new(1000).unwrap(),
            vec![1080],
            rx,
            Duration::from_secs(1),
            Arc::new(ScanStats::default()),
        );
        let run = t.run(addresses(&[A, B]), CancellationToken::new());
        let sender = tokio::spawn(run).await.unwrap();
        assert_eq!(sender.0.get(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn every_address_gets_every_port() {
        let sender = RecordingSender::default();
        let (t, _requests, stats) = transmitter(1000, vec![1080, 8080], sender.clone());

        let started = Instant::now();
        t.run(addresses(&[A, B]), CancellationToken::new()).await;

        assert_eq!(
            sender.sent(),
            vec![
                Sent::Syn(A, 1080),
                Sent::Syn(A, 8080),
                Sent::Syn(B, 1080),
                Sent::Syn(B, 8080),
            ]
        );
        assert_eq!(stats.snapshot().syns_sent, 4);
        assert!(Instant::now() - started >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn session_traffic_goes_before_new_syns() {
        let sender = RecordingSender::default();
        let (t, requests, stats) = transmitter(1000, vec![1080], sender.clone());

        let req = OutboundRequest {
            addr: B,
            port: 1080,
            seq: 1,
            ack: 101,
            data: vec![5, 1, 0],
        };
        requests.try_send(Outbound::Data(req.clone())).unwrap();
        requests
            .try_send(Outbound::Reset { addr: B, port: 1080, seq: 4 })
            .unwrap();
        drop(requests);

        let (addr_tx, addr_rx) = mpsc::channel(4);
        addr_tx.try_send(A).unwrap();
        addr_tx.try_send(A).unwrap();
        drop(addr_tx);

        t.run(addr_rx, CancellationToken::new()).await;

        assert_eq!(
            sender.sent(),
            vec![
                Sent::Data(req),
                Sent::Reset(B, 1080, 4),
                Sent::Syn(A, 1080),
                Sent::Syn(A, 1080),
            ]
        );
        assert_eq!(stats.snapshot().segments_sent, 1);
        assert_eq!(stats.snapshot().resets_sent, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_paces_sends() {
        let sender = RecordingSender::default();
        let (t, _requests, _) = transmitter(2, vec![1, 2, 3, 4, 5], sender.clone());

        let started = Instant::now();
        let run = tokio::spawn(t.run(addresses(&[A]), CancellationToken::new()));

        time::sleep(Duration::from_millis(500)).await;
        assert_eq!(sender.sent().len(), 2);
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(sender.sent().len(), 4);

        run.await.unwrap();
        assert_eq!(sender.sent().len(), 5);
        assert!(Instant::now() - started >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn send_failures_are_counted_and_skipped() {
        let sender = RecordingSender::failing();
        let (t, _requests, stats) = transmitter(1000, vec![80, 443], sender.clone());

        t.run(addresses(&[A]), CancellationToken::new()).await;

        let snap = stats.snapshot();
        assert_eq!(snap.send_failures, 2);
        assert_eq!(snap.syns_sent, 0);
        assert_eq!(sender.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn grace_window_flushes_late_session_traffic() {
        let sender = RecordingSender::default();
        let (t, requests, _) = transmitter(1000, vec![1080], sender.clone());
        let run = tokio::spawn(t.run(addresses(&[A]), CancellationToken::new()));

        time::sleep(Duration::from_secs(2)).await;
        requests
            .send(Outbound::Reset { addr: A, port: 1080, seq: 1 })
            .await
            .unwrap();

        run.await.unwrap();
        assert_eq!(sender.sent(), vec![Sent::Syn(A, 1080), Sent::Reset(A, 1080, 1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_without_grace() {
        let sender = RecordingSender::default();
        let (t, _requests, _) = transmitter(1000, vec![1080], sender.clone());
        let cancel = CancellationToken::new();
        let (_addr_tx, addr_rx) = mpsc::channel::<Ipv4Addr>(1);

        let run = tokio::spawn(t.run(addr_rx, cancel.clone()));
        time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let started = Instant::now();
        run.await.unwrap();
        assert!(Instant::now() - started < Duration::from_secs(1));
        assert!(sender.sent().is_empty());
    }
}
