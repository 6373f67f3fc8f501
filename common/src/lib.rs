//! Shared models for the scanner workspace.
//!
//! * **[`network`]**: CIDR parsing, exclusion sets and routing.
//! * **[`detection`]**: the terminal output of a scan.
//! * **[`store`]**: persistence capability for detections.
//! * **[`config`]**: scan-wide settings.

pub mod config;
pub mod detection;
pub mod network;
pub mod store;
