pub mod exclusions;
pub mod scan;

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Args, Parser, Subcommand};
use uwalker_common::config::{DEFAULT_RATE, DEFAULT_SOURCE_PORT, ScanConfig};
use uwalker_core::verify::{DEFAULT_WORKERS, RelayTarget};
use uwalker_plugins::ProbeKind;

use crate::store::StoreTarget;

#[derive(Parser)]
#[command(name = "uwalker")]
#[command(about = "A stateless TCP probe-and-banner scanner.")]
pub struct CommandLine {
    #[command(subcommand)]
    pub command: Commands,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Probe every address of the given CIDR blocks
    #[command(alias = "s")]
    Scan(ScanArgs),
    /// Print the built-in list of skipped address space
    #[command(alias = "x")]
    Exclusions,
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    /// File with one CIDR block per line
    pub targets: PathBuf,

    /// File with extra CIDR blocks to skip
    #[arg(short = 'x', long)]
    pub exclude: Option<PathBuf>,

    /// Do not skip reserved and private address space
    #[arg(long)]
    pub no_default_exclusions: bool,

    /// Ports probed on every address
    #[arg(short, long, value_delimiter = ',', default_value = "1080")]
    pub ports: Vec<u16>,

    /// Packets per second
    #[arg(short, long, default_value_t = DEFAULT_RATE)]
    pub rate: u32,

    /// Seconds of silence before a session is reset
    #[arg(short, long, default_value_t = 20)]
    pub timeout: u64,

    /// Service probe run on open ports
    #[arg(long, default_value_t = ProbeKind::Socks5)]
    pub probe: ProbeKind,

    /// Where detections go: "log" or "sqlite:<path>"
    #[arg(long, default_value = "log")]
    pub store: StoreTarget,

    /// Local port used for all scan traffic
    #[arg(long, default_value_t = DEFAULT_SOURCE_PORT)]
    pub source_port: u16,

    /// Address whose route selects the outgoing interface
    #[arg(long, default_value = "8.8.8.8")]
    pub route_via: Ipv4Addr,

    /// Keep only SOCKS5 servers that relay a CONNECT to this host:port
    #[arg(long)]
    pub verify: Option<RelayTarget>,

    /// Concurrent relay checks
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub verify_workers: usize,
}

impl ScanArgs {
    pub fn to_config(&self) -> ScanConfig {
        ScanConfig {
            ports: self.ports.clone(),
            rate: self.rate,
            connection_timeout: Duration::from_secs(self.timeout),
            probe_target: self.route_via,
            source_port: self.source_port,
            ..ScanConfig::default()
        }
    }
}

impl CommandLine {
    pub fn parse_args() -> Self {
        Self::parse()
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
