//! Performance benchmarks for `wg show` parsing and connection matching

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use wg_control::wireguard::probe::handshake_age_secs;
use wg_control::{ConnectionProbe, Peer, SystemRunner, WgShow, WgTool};

fn key(tag: &str, i: usize) -> String {
    format!("{:0>43}=", format!("{}{}", tag, i))
}

fn peer_ip(i: usize) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 8, 0, 2)) + i as u32)
}

/// `wg show` output with `count` peers, every other one connected
fn show_output(count: usize) -> String {
    let mut out = String::from(
        "interface: wg_main\n  public key: SERVER\n  private key: (hidden)\n  listening port: 51820\n",
    );
    for i in 0..count {
        out.push_str(&format!("\npeer: {}\n  preshared key: (hidden)\n", key("pubk", i)));
        if i % 2 == 0 {
            out.push_str(&format!("  endpoint: 198.51.100.{}:51820\n", i % 250 + 1));
        }
        out.push_str(&format!("  allowed ips: {}/32\n", peer_ip(i)));
        if i % 2 == 0 {
            out.push_str("  latest handshake: 1 minute, 12 seconds ago\n");
            out.push_str("  transfer: 12.40 KiB received, 1.02 MiB sent\n");
        }
    }
    out
}

fn bench_parse_show(c: &mut Criterion) {
    let mut group = c.benchmark_group("wg_show_parse");

    for count in [1usize, 50, 500] {
        let output = show_output(count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("peers", count), &output, |b, output| {
            b.iter(|| black_box(WgShow::parse(output)));
        });
    }

    group.finish();
}

fn bench_handshake_age(c: &mut Criterion) {
    c.bench_function("handshake_age", |b| {
        b.iter(|| {
            black_box(handshake_age_secs(black_box(
                "1 day, 2 hours, 3 minutes, 4 seconds ago",
            )))
        });
    });
}

/// Join parsed output against the peer store
fn bench_connections(c: &mut Criterion) {
    let mut group = c.benchmark_group("connections_in");
    let tool = WgTool::new(Arc::new(SystemRunner::new()), "wg_main", Duration::from_secs(5));
    let probe = ConnectionProbe::new(tool, Duration::from_secs(180));

    for count in [50usize, 500] {
        let show = WgShow::parse(&show_output(count));
        let peers: Vec<Peer> = (0..count)
            .map(|i| Peer::new(format!("peer{}", i), peer_ip(i), key("priv", i), key("pubk", i), "psk"))
            .collect();
        group.bench_with_input(BenchmarkId::new("peers", count), &peers, |b, peers| {
            b.iter(|| black_box(probe.connections_in(&show, peers)));
        });
    }

    group.finish();
}

criterion_group!(benches, bench_parse_show, bench_handshake_age, bench_connections);
criterion_main!(benches);
