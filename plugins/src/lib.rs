//! # Probes
//!
//! A probe identifies the service behind an open port by exchanging bytes
//! with it once the handshake has completed. Probes never touch the network:
//! the conductor hands them what the peer sent and transmits whatever they
//! return.
//!
//! **Contract**
//! - `init` is called once, when the handshake completes, and returns the
//!   first bytes to send.
//! - `consume` is called with every in-order payload and reports what to
//!   send next, how many input bytes it used and whether the service has
//!   been identified.
//! - `name` is the protocol name carried by the resulting detection.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;

pub mod socks4;
pub mod socks5;

pub use socks4::Socks4Probe;
pub use socks5::Socks5Probe;

/// The outcome of feeding one payload to a [`Probe`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Consumed {
    pub reply: Vec<u8>,
    pub consumed: usize,
    pub finished: bool,
}

impl Consumed {
    pub fn finished(consumed: usize) -> Self {
        Self {
            reply: Vec::new(),
            consumed,
            finished: true,
        }
    }

    /// Nothing sent, nothing used, not finished.
    pub fn nothing() -> Self {
        Self::default()
    }

    /// The peer sent bytes the probe could not make sense of.
    pub fn is_rejection(&self) -> bool {
        !self.finished && self.consumed == 0 && self.reply.is_empty()
    }
}

pub trait Probe: Send {
    fn init(&mut self) -> Vec<u8>;
    fn consume(&mut self, data: &[u8]) -> Consumed;
    fn name(&self) -> &'static str;
}

/// Creates one fresh probe per connection.
pub type ProbeFactory = Arc<dyn Fn() -> Box<dyn Probe> + Send + Sync>;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown probe '{0}' (expected one of: socks5, socks4)")]
pub struct UnknownProbe(pub String);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ProbeKind {
    #[default]
    Socks5,
    Socks4,
}

impl ProbeKind {
    pub fn factory(self) -> ProbeFactory {
        match self {
            ProbeKind::Socks5 => Arc::new(|| Box::new(Socks5Probe::default()) as Box<dyn Probe>),
            ProbeKind::Socks4 => Arc::new(|| Box::new(Socks4Probe::default()) as Box<dyn Probe>),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProbeKind::Socks5 => socks5::NAME,
            ProbeKind::Socks4 => socks4::NAME,
        }
    }
}

impl FromStr for ProbeKind {
    type Err = UnknownProbe;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "socks5" => Ok(ProbeKind::Socks5),
            "socks4" => Ok(ProbeKind::Socks4),
            other => Err(UnknownProbe(other.to_string())),
        }
    }
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
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
