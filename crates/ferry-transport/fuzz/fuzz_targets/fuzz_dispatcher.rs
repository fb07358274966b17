#![no_main]

use bytes::Bytes;
use ferry_transport::{Dispatcher, Network, TransportConfig};
use libfuzzer_sys::fuzz_target;
use quanta::Clock;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

struct Discard;

impl Network for Discard {
    fn send(&mut self, _segment: Bytes, _dst: IpAddr) {}
}

/// Fuzz the dispatcher and connection state machine.
///
/// The input is split into length-prefixed segments, all from one peer to
/// port 80 with checksum verification off so that the state machine (not
/// the checksum) sees the bytes. Between segments the mock clock advances
/// and timers fire. The dispatcher must never panic.
fuzz_target!(|data: &[u8]| {
    let (clock, mock) = Clock::mock();
    let config = TransportConfig::default()
        .with_checksum_verification(false)
        .with_initial_cwnd(4)
        .with_mss(64);
    let Ok(mut server) = Dispatcher::with_clock(80, Discard, config, clock) else {
        return;
    };
    server.register_accept_callback(|conn| {
        conn.register_receive_callback(|conn, data| {
            // Echo, which drives the send path as well.
            let _ = conn.send(data);
        });
    });

    let peer = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
    let local = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));

    let mut rest = data;
    while let Some((&len, tail)) = rest.split_first() {
        let len = (len as usize).min(tail.len());
        let (segment, tail) = tail.split_at(len);
        server.handle_inbound_segment(peer, local, Bytes::copy_from_slice(segment));
        mock.increment(Duration::from_millis(len as u64 * 10));
        server.handle_timeouts();
        rest = tail;
    }
});
