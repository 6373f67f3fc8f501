use std::fs;
use std::path::Path;

use anyhow::Context;
use is_root::is_root;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uwalker_common::network::exclusion::ExclusionSet;
use uwalker_common::network::range::{Ipv4Network, parse_cidr_list};
use uwalker_common::network::route::SystemRouter;
use uwalker_core::conductor::{Conductor, ConductorSettings};
use uwalker_core::generator::Generator;
use uwalker_core::limiter::Limiter;
use uwalker_core::transport::Transport;
use uwalker_core::verify::{VERIFY_TIMEOUT, Verifier};

use crate::commands::ScanArgs;
use crate::store;
use crate::terminal::{print, spinner};

const DETECTION_QUEUE: usize = 64;

pub async fn scan(args: ScanArgs) -> anyhow::Result<()> {
    if !is_root() {
        warn!("not running as root, opening the raw channel will most likely fail");
    }

    let config = args.to_config();

    let targets = read_cidrs(&args.targets)?;
    let mut exclusions = Vec::new();
    if !args.no_default_exclusions {
        exclusions.extend_from_slice(ExclusionSet::reserved()?.blocks());
    }
    if let Some(path) = &args.exclude {
        exclusions.extend(read_cidrs(path)?);
    }
    let generator = Generator::from_networks(targets, ExclusionSet::new(exclusions));

    let limiter = Limiter::new(config.rate)?;
    let store = args.store.open()?;
    let transport = Transport::open(&SystemRouter, config.probe_target, config.source_port)
        .context("could not open the scan channel")?;

    print::aligned_line("Interface", &transport.route().interface.name);
    print::aligned_line("Gateway", transport.gateway_mac());
    print::aligned_line("Addresses", generator.span());
    print::aligned_line("Ports", format!("{:?}", config.ports));
    print::aligned_line("Rate", format!("{}/s", config.rate));
    print::aligned_line("Probe", args.probe);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, shutting down");
                cancel.cancel();
            }
        }
    });

    let packets = transport.capture(cancel.clone())?;
    let addrs = generator.produce(cancel.clone());

    let conductor = Conductor::new(
        transport,
        limiter,
        config.ports.clone(),
        args.probe.factory(),
        ConductorSettings::from(&config),
    );
    let stats = conductor.stats();
    let (transmitter, collector) = conductor.into_actors();

    let (detections_tx, mut detections_rx) = mpsc::channel(DETECTION_QUEUE);
    let collect = tokio::spawn(collector.run(packets, detections_tx));
    if let Some(target) = args.verify.clone() {
        info!(%target, workers = args.verify_workers, "verifying SOCKS5 relays");
        detections_rx = Verifier::new(target, args.verify_workers, VERIFY_TIMEOUT).verify(detections_rx);
    }
    let persist = tokio::spawn(store::persist_all(store, detections_rx, spinner::report_detections));

    spinner::start("Scanning...");
    let transport = transmitter.run(addrs, cancel.clone()).await;

    if !cancel.is_cancelled() {
        info!(linger = ?config.linger, "all probes sent, waiting for late replies");
        tokio::select! {
            _ = tokio::time::sleep(config.linger) => {}
            _ = cancel.cancelled() => {}
        }
    }
    cancel.cancel();

    let table = collect.await.context("collector task failed")?;
    let persisted = persist.await.context("persist task failed")?;
    drop(transport);
    spinner::finish();

    print::header("summary");
    print::print_status(stats.snapshot().to_string());
    print::aligned_line("Persisted", persisted);
    print::aligned_line("Unfinished", table.len());
    print::end_of_program();

    Ok(())
}

fn read_cidrs(path: &Path) -> anyhow::Result<Vec<Ipv4Network>> {
    let text = fs::read_to_string(path).with_context(|| format!("could not read {}", path.display()))?;
    parse_cidr_list(&text).with_context(|| format!("malformed CIDR block in {}", path.display()))
}
