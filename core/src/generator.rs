//! # Generator
//!
//! Lazily walks every address of the target blocks, from the masked base
//! through the broadcast address, skipping anything in the exclusion set.
//! The exclusion set is always supplied by the caller.

use std::net::Ipv4Addr;
use std::ops::RangeInclusive;

use pnet::ipnetwork::Ipv4Network;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uwalker_common::network::exclusion::ExclusionSet;
use uwalker_common::network::range::{self, CidrError, Ipv4Range};

const ADDRESS_QUEUE: usize = 16;

#[derive(Debug, Clone)]
pub struct Generator {
    targets: Vec<Ipv4Network>,
    exclusions: ExclusionSet,
}

impl Generator {
    /// Parses the target and excluded blocks. Any malformed block fails the
    /// whole construction.
    pub fn new<T, E>(targets: T, exclusions: E) -> Result<Self, CidrError>
    where
        T: IntoIterator,
        T::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let targets = targets
            .into_iter()
            .map(|cidr| range::parse_cidr(cidr.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_networks(targets, ExclusionSet::parse(exclusions)?))
    }

    pub fn from_networks(targets: Vec<Ipv4Network>, exclusions: ExclusionSet) -> Self {
        Self {
            targets,
            exclusions,
        }
    }

    pub fn targets(&self) -> Targets<'_> {
        Targets {
            networks: self.targets.iter(),
            current: None,
            exclusions: &self.exclusions,
        }
    }

    /// Upper bound of the number of addresses, before exclusions.
    pub fn span(&self) -> u64 {
        self.targets.iter().map(|net| Ipv4Range::from(*net).len()).sum()
    }

    /// Streams the targets from a background task.
    ///
    /// The stream ends when every block has been walked or once `cancel`
    /// fires, whichever comes first. It never resumes.
    pub fn produce(self, cancel: CancellationToken) -> mpsc::Receiver<Ipv4Addr> {
        let (tx, rx) = mpsc::channel(ADDRESS_QUEUE);
        tokio::spawn(async move {
            let mut produced: u64 = 0;
            for addr in self.targets() {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        debug!(produced, "address generation cancelled");
                        return;
                    }
                    sent = tx.send(addr) => {
                        if sent.is_err() {
                            debug!(produced, "address consumer went away");
                            return;
                        }
                    }
                }
                produced += 1;
            }
            info!(produced, "address space exhausted");
        });
        rx
    }
}

/// Iterator over the addresses of a [`Generator`].
#[derive(Debug)]
pub struct Targets<'a> {
    networks: std::slice::Iter<'a, Ipv4Network>,
    current: Option<RangeInclusive<u32>>,
    exclusions: &'a ExclusionSet,
}

impl Iterator for Targets<'_> {
    type Item = Ipv4Addr;

    fn next(&mut self) -> Option<Ipv4Addr> {
        loop {
            if let Some(values) = self.current.as_mut() {
                for value in values.by_ref() {
                    let addr = Ipv4Addr::from(value);
                    if !self.exclusions.contains(addr) {
                        return Some(addr);
                    }
                }
            }
            let network = self.networks.next()?;
            self.current = Some(Ipv4Range::from(*network).as_u32s());
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
