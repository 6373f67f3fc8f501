#![cfg(test)]

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uwalker_common::detection::Detection;
use uwalker_core::conductor::{Conductor, ConductorSettings};
use uwalker_core::generator::Generator;
use uwalker_core::limiter::Limiter;
use uwalker_core::stats::StatsSnapshot;
use uwalker_plugins::ProbeKind;

use crate::peer::{Behavior, FakeNetwork, Wire};

struct Outcome {
    detections: Vec<Detection>,
    wire: Vec<Wire>,
    stats: StatsSnapshot,
    in_flight: usize,
}

async fn run_scan(
    targets: &[&str],
    exclusions: &[&str],
    ports: Vec<u16>,
    hosts: &[(Ipv4Addr, Behavior)],
    timeout: Duration,
) -> Outcome {
    let generator = Generator::new(targets, exclusions).unwrap();
    let (network, packets, wire): (FakeNetwork, _, Arc<Mutex<Vec<Wire>>>) = FakeNetwork::new(hosts);
    let settings = ConductorSettings {
        timeout,
        grace: Duration::from_secs(5),
        request_queue: 16,
    };
    let conductor = Conductor::new(
        network,
        Limiter::new(1000).unwrap(),
        ports,
        ProbeKind::Socks5.factory(),
        settings,
    );
    let stats = conductor.stats();
    let (transmitter, collector) = conductor.into_actors();

    let cancel = CancellationToken::new();
    let (detections_tx, mut detections_rx) = mpsc::channel(16);
    let collect = tokio::spawn(collector.run(packets, detections_tx));

    let network = transmitter.run(generator.produce(cancel.clone()), cancel.clone()).await;
    cancel.cancel();
    drop(network);

    let table = collect.await.unwrap();
    let mut detections = Vec::new();
    while let Some(d) = detections_rx.recv().await {
        detections.push(d);
    }
    let wire = wire.lock().unwrap().clone();

    Outcome {
        detections,
        wire,
        stats: stats.snapshot(),
        in_flight: table.len(),
    }
}

const SOCKS: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 1);
const SSH: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 2);
const MUTE: Ipv4Addr = Ipv4Addr::new(198, 51, 100, 3);

#[tokio::test(start_paused = true)]
async fn socks5_server_is_detected() {
    let out = run_scan(
        &["198.51.100.1/32"],
        &[],
        vec![1080],
        &[(SOCKS, Behavior::Socks5)],
        Duration::from_secs(20),
    )
    .await;

    assert_eq!(out.detections, vec![Detection::new(SOCKS, 1080, "socks5")]);
    assert_eq!(
        out.wire,
        vec![
            Wire::Syn(SOCKS, 1080),
            Wire::Data {
                addr: SOCKS,
                port: 1080,
                seq: 1,
                ack: 101,
                data: vec![5, 1, 0],
            },
        ]
    );
    assert_eq!(out.in_flight, 0);
    assert_eq!(out.stats.opened, 1);
    assert_eq!(out.stats.resets_sent, 0);
}

#[tokio::test(start_paused = true)]
async fn mixed_hosts() {
    let out = run_scan(
        &["198.51.100.0/30"],
        &[],
        vec![1080],
        &[
            (SOCKS, Behavior::Socks5),
            (SSH, Behavior::Ssh),
            (MUTE, Behavior::Mute),
        ],
        Duration::from_secs(2),
    )
    .await;

    assert_eq!(out.detections, vec![Detection::new(SOCKS, 1080, "socks5")]);
    assert!(out.wire.contains(&Wire::Reset(SSH, 1080, 4)));
    assert!(out.wire.contains(&Wire::Reset(MUTE, 1080, 1)));
    assert!(!out.wire.iter().any(|w| matches!(w, Wire::Reset(addr, _, _) if *addr == SOCKS)));

    assert_eq!(out.stats.syns_sent, 4);
    assert_eq!(out.stats.opened, 3);
    assert_eq!(out.stats.detections, 1);
    assert_eq!(out.stats.rejections, 1);
    assert_eq!(out.stats.timeouts, 1);
    assert_eq!(out.in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn excluded_space_is_never_probed() {
    let out = run_scan(
        &["198.51.100.0/29"],
        &["198.51.100.4/30"],
        vec![80, 1080],
        &[],
        Duration::from_secs(2),
    )
    .await;

    let expected: Vec<Wire> = (0..4)
        .flat_map(|last| {
            let addr = Ipv4Addr::new(198, 51, 100, last);
            [Wire::Syn(addr, 80), Wire::Syn(addr, 1080)]
        })
        .collect();
    assert_eq!(out.wire, expected);
    assert!(out.detections.is_empty());
}

#[tokio::test(start_paused = true)]
async fn session_outliving_the_grace_window_stays_in_flight() {
    let out = run_scan(
        &["198.51.100.3/32"],
        &[],
        vec![1080],
        &[(MUTE, Behavior::Mute)],
        Duration::from_secs(60),
    )
    .await;

    assert_eq!(out.in_flight, 1);
    assert_eq!(out.stats.timeouts, 0);
    assert!(out.detections.is_empty());
}
