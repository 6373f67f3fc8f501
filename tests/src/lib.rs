//! End-to-end runs of the scan pipeline against simulated peers.

mod peer;
mod pipeline;
