use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by the transmit and collect actors.
#[derive(Debug, Default)]
pub struct ScanStats {
    pub syns_sent: AtomicU64,
    pub segments_sent: AtomicU64,
    pub resets_sent: AtomicU64,
    pub send_failures: AtomicU64,
    pub opened: AtomicU64,
    pub detections: AtomicU64,
    pub timeouts: AtomicU64,
    pub violations: AtomicU64,
    pub rejections: AtomicU64,
}

pub(crate) fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

impl ScanStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let get = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            syns_sent: get(&self.syns_sent),
            segments_sent: get(&self.segments_sent),
            resets_sent: get(&self.resets_sent),
            send_failures: get(&self.send_failures),
            opened: get(&self.opened),
            detections: get(&self.detections),
            timeouts: get(&self.timeouts),
            violations: get(&self.violations),
            rejections: get(&self.rejections),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub syns_sent: u64,
    pub segments_sent: u64,
    pub resets_sent: u64,
    pub send_failures: u64,
    pub opened: u64,
    pub detections: u64,
    pub timeouts: u64,
    pub violations: u64,
    pub rejections: u64,
}

impl fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} SYNs, {} session segments, {} RSTs, {} send failures | {} opened, {} detected, {} timed out, {} violations, {} rejected",
            self.syns_sent,
            self.segments_sent,
            self.resets_sent,
            self.send_failures,
            self.opened,
            self.detections,
            self.timeouts,
            self.violations,
            self.rejections,
        )
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
