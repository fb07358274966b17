#![no_main]

use bytes::Bytes;
use ferry_transport::Segment;
use libfuzzer_sys::fuzz_target;
use std::net::{IpAddr, Ipv4Addr};

/// Fuzz the segment parser with arbitrary bytes.
///
/// Anything that parses must re-encode to a segment that parses back to the
/// same header fields and payload.
fuzz_target!(|data: &[u8]| {
    let raw = Bytes::copy_from_slice(data);
    let Ok(seg) = Segment::parse(&raw) else {
        return;
    };
    assert!(seg.header.header_len() <= raw.len());

    let addr = IpAddr::V4(Ipv4Addr::LOCALHOST);
    let reencoded = seg.encode(addr, addr);
    let again = Segment::parse(&reencoded).expect("re-encoded segment must parse");
    assert_eq!(again.header.seq, seg.header.seq);
    assert_eq!(again.header.ack, seg.header.ack);
    assert_eq!(again.header.flags, seg.header.flags);
    assert_eq!(again.payload, seg.payload);
});
