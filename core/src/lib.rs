//! The scanning engine.
//!
//! - [`generator`] enumerates target addresses minus the exclusion set.
//! - [`limiter`] paces outbound sends.
//! - [`transport`] crafts, sends and captures raw frames.
//! - [`conductor`] tracks in-flight sessions and drives the probes.
//! - [`verify`] confirms that detected SOCKS5 endpoints relay traffic.

pub mod conductor;
pub mod generator;
pub mod limiter;
pub mod stats;
pub mod transport;
pub mod verify;
