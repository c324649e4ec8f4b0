//! Performance benchmarks for peer address allocation and subnet remapping

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::net::Ipv4Addr;
use tempfile::TempDir;
use wg_control::{IpMapping, Peer, PeerStore, Subnet};

fn peers_in(subnet: &Subnet, count: usize) -> Vec<Peer> {
    subnet
        .assignable_hosts()
        .take(count)
        .enumerate()
        .map(|(i, ip)| Peer::new(format!("peer{}", i), ip, "priv", "pub", "psk"))
        .collect()
}

/// Next free address with the subnet filled to varying levels
fn bench_allocate_next_ip(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_next_ip");
    let subnet = Subnet::parse("10.8.0.0/22").unwrap();

    for filled in [0usize, 250, 1000] {
        let dir = TempDir::new().unwrap();
        let store = PeerStore::open(dir.path().join("peers.json"), subnet).unwrap();
        for peer in peers_in(&subnet, filled) {
            store.insert(peer).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("filled", filled), &filled, |b, _| {
            b.iter(|| black_box(store.allocate_next_ip().unwrap()));
        });
    }

    group.finish();
}

/// Old-to-new address mapping for a subnet change
fn bench_ip_mapping(c: &mut Criterion) {
    let mut group = c.benchmark_group("ip_mapping");
    let old = Subnet::parse("10.8.0.0/20").unwrap();
    let new = Subnet::parse("192.168.0.0/20").unwrap();

    for count in [10usize, 500, 4000] {
        let peers = peers_in(&old, count);
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::new("peers", count), &peers, |b, peers| {
            b.iter(|| black_box(IpMapping::compute(&old, &new, peers).unwrap()));
        });
    }

    group.finish();
}

/// Assignability checks across a /16
fn bench_is_assignable(c: &mut Criterion) {
    let subnet = Subnet::parse("10.8.0.0/16").unwrap();

    c.bench_function("is_assignable_sweep", |b| {
        b.iter(|| {
            (0u32..65536)
                .map(|i| Ipv4Addr::from(u32::from(Ipv4Addr::new(10, 8, 0, 0)) + i))
                .filter(|ip| subnet.is_assignable(*ip))
                .count()
        });
    });
}

criterion_group!(
    benches,
    bench_allocate_next_ip,
    bench_ip_mapping,
    bench_is_assignable
);
criterion_main!(benches);
