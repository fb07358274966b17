//! Per-segment processing benchmarks for ferry-transport.
//!
//! Measures the hot-path components:
//! - Segment encode (header + checksum) and parse
//! - Checksum over IPv4 and IPv6 pseudo-headers
//! - Dispatcher inbound path for in-order data (parse, verify, deliver, ACK)
//! - Dispatcher send path with cumulative ACKs draining the window
//!
//! Run with: cargo bench --package ferry-transport

use bytes::Bytes;
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use quanta::Clock;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ferry_transport::segment::checksum;
use ferry_transport::{
    ConnectionId, Dispatcher, Flags, Network, Segment, SegmentHeader, TransportConfig,
};

const SIZES: [usize; 3] = [64, 512, 1400];

struct Discard;

impl Network for Discard {
    fn send(&mut self, segment: Bytes, _dst: IpAddr) {
        black_box(segment);
    }
}

fn v4(last: u8) -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
}

// ─── Codec ──────────────────────────────────────────────────────────────────

fn bench_segment_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_encode");
    for size in SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        let seg = Segment::new(
            SegmentHeader::new(1, 2, 100, 200, Flags::ACK),
            Bytes::from(vec![0xA5; size]),
        );
        group.bench_function(format!("{size}B"), |b| {
            b.iter(|| black_box(seg.encode(v4(1), v4(2))));
        });
    }
    group.finish();
}

fn bench_segment_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("segment_parse");
    for size in SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        let raw = Segment::new(
            SegmentHeader::new(1, 2, 100, 200, Flags::ACK),
            Bytes::from(vec![0xA5; size]),
        )
        .encode(v4(1), v4(2));
        group.bench_function(format!("{size}B"), |b| {
            b.iter(|| black_box(Segment::parse(black_box(&raw))));
        });
    }
    group.finish();
}

fn bench_checksum(c: &mut Criterion) {
    let mut group = c.benchmark_group("checksum");
    let data = vec![0x5Au8; 1420];
    group.throughput(Throughput::Bytes(data.len() as u64));

    group.bench_function("ipv4", |b| {
        b.iter(|| black_box(checksum(v4(1), v4(2), black_box(&data))));
    });

    let (a, z) = (
        IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 1)),
        IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 2)),
    );
    group.bench_function("ipv6", |b| {
        b.iter(|| black_box(checksum(a, z, black_box(&data))));
    });
    group.finish();
}

// ─── Dispatcher ─────────────────────────────────────────────────────────────

fn established(config: TransportConfig) -> (Dispatcher<Discard>, ConnectionId) {
    let mut server = Dispatcher::new(80, Discard, config).unwrap();
    server.register_accept_callback(|conn| {
        conn.register_receive_callback(|_, data| {
            black_box(data);
        });
    });
    let syn = Segment::new(SegmentHeader::new(5000, 80, 0, 0, Flags::SYN), Bytes::new());
    server.handle_inbound_segment(v4(2), v4(1), syn.encode(v4(2), v4(1)));
    (server, ConnectionId::new(v4(2), 5000, v4(1), 80))
}

fn bench_inbound_in_order(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatcher_inbound");
    for size in SIZES {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_function(format!("{size}B"), |b| {
            let (mut server, _id) = established(TransportConfig::default());
            let payload = Bytes::from(vec![7u8; size]);
            let mut seq: u32 = 1;
            b.iter(|| {
                let hdr = SegmentHeader::new(5000, 80, seq, 0, Flags::ACK);
                let raw = Segment::new(hdr, payload.clone()).encode(v4(2), v4(1));
                server.handle_inbound_segment(v4(2), v4(1), raw);
                seq = seq.wrapping_add(size as u32);
            });
        });
    }
    group.finish();
}

fn bench_send_and_ack(c: &mut Criterion) {
    let mut group = c.benchmark_group("dispatcher_send_ack");
    let size = 1000;
    group.throughput(Throughput::Bytes(size as u64));
    group.bench_function("1000B", |b| {
        let config = TransportConfig::default()
            .with_initial_sequence(0)
            .with_initial_cwnd(16);
        let (mut server, id) = established(config);
        let data = vec![3u8; size];
        let mut acked: u32 = 1;
        b.iter(|| {
            server.send(&id, &data).unwrap();
            acked = acked.wrapping_add(size as u32);
            let hdr = SegmentHeader::new(5000, 80, 1, acked, Flags::ACK);
            let raw = Segment::new(hdr, Bytes::new()).encode(v4(2), v4(1));
            server.handle_inbound_segment(v4(2), v4(1), raw);
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_segment_encode,
    bench_segment_parse,
    bench_checksum,
    bench_inbound_in_order,
    bench_send_and_ack,
);
criterion_main!(benches);
