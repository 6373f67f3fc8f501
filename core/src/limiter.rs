//! # Limiter
//!
//! A sliding-window log of the last `N` accepted send times, `N` being the
//! configured rate rounded up to the next power of two so that slots are
//! addressed by masking. A send is allowed while fewer than `N` sends
//! happened within the last second.
//!
//! Not synchronized: the transmit actor is the only caller.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

const WINDOW: Duration = Duration::from_secs(1);
pub const MAX_RATE: u32 = 1 << 24;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LimiterError {
    #[error("rate must be between 1 and {MAX_RATE}, got {0}")]
    Rate(u32),
}

#[derive(Debug, Clone)]
pub struct Limiter {
    slots: Vec<Instant>,
    mask: usize,
    head: usize,
    tail: usize,
}

impl Limiter {
    pub fn new(rate: u32) -> Result<Self, LimiterError> {
        if rate == 0 || rate > MAX_RATE {
            return Err(LimiterError::Rate(rate));
        }
        let capacity = rate.next_power_of_two() as usize;
        Ok(Self {
            slots: Vec::with_capacity(capacity),
            mask: capacity - 1,
            head: 0,
            tail: 0,
        })
    }

    pub fn capacity(&self) -> usize {
        self.mask + 1
    }

    /// Records `now` and returns `true` when a send is permitted.
    pub fn allow(&mut self, now: Instant) -> bool {
        if self.recorded() < self.capacity() {
            self.record(now);
            return true;
        }
        if now.saturating_duration_since(self.oldest()) >= WINDOW {
            self.head = self.head.wrapping_add(1);
            self.record(now);
            return true;
        }
        false
    }

    /// The earliest instant at which `allow` can succeed again, or `None`
    /// when a slot is free right now.
    pub fn retry_at(&self) -> Option<Instant> {
        (self.recorded() >= self.capacity()).then(|| self.oldest() + WINDOW)
    }

    fn recorded(&self) -> usize {
        self.tail.wrapping_sub(self.head)
    }

    fn oldest(&self) -> Instant {
        self.slots[self.head & self.mask]
    }

    fn record(&mut self, now: Instant) {
        let idx = self.tail & self.mask;
        if idx < self.slots.len() {
            self.slots[idx] = now;
        } else {
            self.slots.push(now);
        }
        self.tail = self.tail.wrapping_add(1);
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
