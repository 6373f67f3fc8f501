//! The connection table and the per-session state machine.
//!
//! A session exists from the first SYN-ACK seen for its key until the probe
//! finishes, the peer resets or closes it, the sequence numbers stop making
//! sense, or it stays idle for the timeout. Eviction deadlines live in a
//! min-heap; an entry whose deadline no longer matches its connection is
//! stale and skipped.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, trace};
use uwalker_common::detection::Detection;
use uwalker_plugins::{Probe, ProbeFactory};
use uwalker_protocols::tcp::Packet;

use super::OutboundRequest;

/// Unacknowledged bytes a session may hold before it is dropped.
pub const MAX_OUTSTANDING: usize = 1 << 16;

/// Acknowledgments that appear to move backwards by up to half the sequence
/// space are stale.
const HALF_SPACE: u32 = 1 << 31;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionKey {
    pub addr: Ipv4Addr,
    pub port: u16,
}

impl ConnectionKey {
    pub fn new(addr: Ipv4Addr, port: u16) -> Self {
        Self { addr, port }
    }
}

/// `a` precedes `b` in 32-bit serial arithmetic.
fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

struct Connection {
    /// Sequence number of the first unacknowledged byte.
    seq: u32,
    unacked: Vec<u8>,
    /// Next sequence number expected from the peer.
    remote_next: u32,
    last_activity: Instant,
    deadline: Instant,
    probe: Box<dyn Probe>,
}

enum Step {
    Reply,
    Violation,
    Rejected,
    Finished,
}

impl Connection {
    fn acknowledge(&mut self, ack: u32) {
        let acked = ack.wrapping_sub(self.seq);
        if acked == 0 || acked >= HALF_SPACE {
            return;
        }
        let drained = self.unacked.len().min(acked as usize);
        self.unacked.drain(..drained);
        self.seq = self.seq.wrapping_add(acked);
    }

    fn advance(&mut self, p: &Packet) -> Step {
        self.acknowledge(p.ack);

        if seq_lt(self.remote_next, p.seq) {
            debug!(addr = %p.addr, port = p.port, "reordering detected");
            return Step::Reply;
        }
        if seq_lt(p.seq, self.remote_next) {
            debug!(addr = %p.addr, port = p.port, "unexpected peer sequence, killing the connection");
            return Step::Violation;
        }

        let consumed = if p.start {
            let greeting = self.probe.init();
            self.unacked.extend_from_slice(&greeting);
            // the SYN occupies one sequence number
            1
        } else if p.payload.is_empty() {
            return Step::Reply;
        } else {
            let out = self.probe.consume(&p.payload);
            if out.finished {
                return Step::Finished;
            }
            if out.is_rejection() {
                return Step::Rejected;
            }
            self.unacked.extend_from_slice(&out.reply);
            out.consumed.min(p.payload.len()) as u32
        };

        if self.unacked.len() > MAX_OUTSTANDING {
            debug!(addr = %p.addr, port = p.port, outstanding = self.unacked.len(), "too much unacknowledged data");
            return Step::Violation;
        }
        self.remote_next = p.seq.wrapping_add(consumed);
        Step::Reply
    }

    fn request(&self, key: ConnectionKey) -> OutboundRequest {
        OutboundRequest {
            addr: key.addr,
            port: key.port,
            seq: self.seq,
            ack: self.remote_next,
            data: self.unacked.clone(),
        }
    }
}

/// The outcome of one inbound packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Nothing to do.
    Ignore,
    Reply(OutboundRequest),
    /// The peer reset or closed the session.
    Closed,
    /// Sequence numbers went backwards; the session is gone without a RST.
    Violation,
    /// The probe refused the payload; the session is gone and needs a RST.
    Rejected { seq: u32 },
    Detected(Detection),
}

/// A session evicted for inactivity, to be reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    pub addr: Ipv4Addr,
    pub port: u16,
    pub seq: u32,
}

pub struct ConnectionTable {
    connections: HashMap<ConnectionKey, Connection>,
    timers: BinaryHeap<Reverse<(Instant, ConnectionKey)>>,
    factory: ProbeFactory,
    timeout: Duration,
}

impl ConnectionTable {
    pub fn new(factory: ProbeFactory, timeout: Duration) -> Self {
        Self {
            connections: HashMap::new(),
            timers: BinaryHeap::new(),
            factory,
            timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn contains(&self, key: &ConnectionKey) -> bool {
        self.connections.contains_key(key)
    }

    /// Our next sequence number and the peer's expected one.
    pub fn sequence_of(&self, key: &ConnectionKey) -> Option<(u32, u32)> {
        self.connections.get(key).map(|c| (c.seq, c.remote_next))
    }

    pub fn handle(&mut self, p: Packet, now: Instant) -> Verdict {
        let key = ConnectionKey::new(p.addr, p.port);

        if p.done {
            return match self.connections.remove(&key) {
                Some(_) => {
                    debug!(addr = %p.addr, port = p.port, "closed by peer");
                    Verdict::Closed
                }
                None => Verdict::Ignore,
            };
        }

        let Some(conn) = self.connections.get_mut(&key) else {
            if !p.start {
                trace!(addr = %p.addr, port = p.port, "segment for unknown session");
                return Verdict::Ignore;
            }
            return self.open(key, &p, now);
        };

        if p.start {
            trace!(addr = %p.addr, port = p.port, "duplicate SYN-ACK");
            return Verdict::Reply(conn.request(key));
        }

        conn.last_activity = now;
        let step = conn.advance(&p);
        self.conclude(key, step)
    }

    fn open(&mut self, key: ConnectionKey, p: &Packet, now: Instant) -> Verdict {
        let deadline = now + self.timeout;
        let mut conn = Connection {
            seq: 0,
            unacked: Vec::new(),
            remote_next: p.seq,
            last_activity: now,
            deadline,
            probe: (self.factory)(),
        };
        let step = conn.advance(p);
        self.connections.insert(key, conn);
        self.timers.push(Reverse((deadline, key)));
        trace!(addr = %key.addr, port = key.port, "session opened");
        self.conclude(key, step)
    }

    fn conclude(&mut self, key: ConnectionKey, step: Step) -> Verdict {
        match step {
            Step::Reply => match self.connections.get(&key) {
                Some(conn) => Verdict::Reply(conn.request(key)),
                None => Verdict::Ignore,
            },
            Step::Violation => {
                self.connections.remove(&key);
                Verdict::Violation
            }
            Step::Rejected => match self.connections.remove(&key) {
                Some(conn) => {
                    debug!(addr = %key.addr, port = key.port, proto = conn.probe.name(), "payload rejected by probe");
                    Verdict::Rejected { seq: conn.seq }
                }
                None => Verdict::Ignore,
            },
            Step::Finished => match self.connections.remove(&key) {
                Some(conn) => {
                    let proto = conn.probe.name();
                    info!(addr = %key.addr, port = key.port, proto, "connection finished");
                    Verdict::Detected(Detection::new(key.addr, key.port, proto))
                }
                None => Verdict::Ignore,
            },
        }
    }

    /// The earliest armed eviction deadline, possibly stale.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Fires every deadline up to `now`.
    ///
    /// A session with activity since its deadline was armed is re-armed
    /// for `last_activity + timeout`; the others are removed and returned.
    pub fn expire(&mut self, now: Instant) -> Vec<Eviction> {
        let mut evicted = Vec::new();
        while let Some(Reverse((deadline, key))) = self.timers.peek().copied() {
            if deadline > now {
                break;
            }
            self.timers.pop();

            let Some(conn) = self.connections.get_mut(&key) else {
                continue;
            };
            if conn.deadline != deadline {
                continue;
            }
            let idle_until = conn.last_activity + self.timeout;
            if idle_until <= now {
                let seq = conn.seq;
                self.connections.remove(&key);
                debug!(addr = %key.addr, port = key.port, "closed by timeout");
                evicted.push(Eviction {
                    addr: key.addr,
                    port: key.port,
                    seq,
                });
            } else {
                conn.deadline = idle_until;
                self.timers.push(Reverse((idle_until, key)));
            }
        }
        evicted
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
