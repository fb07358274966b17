//! # Ferry Wire Format
//!
//! TCP-compatible fixed header followed by the payload. All integers are
//! big-endian.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |          Source Port          |       Destination Port        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                        Sequence Number                        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                    Acknowledgment Number                      |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |  Offset |        Flags (12)       |          Window            |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           Checksum            |         Urgent Pointer        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                      Options / Payload ...                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The payload starts at `4 * data_offset`. Ferry never emits options, so
//! outbound segments always carry an offset of 5 words.
//!
//! The checksum is the RFC 1071 ones'-complement sum over a pseudo-header
//! (addresses, protocol number, segment length) followed by the segment.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::ops::{BitOr, BitOrAssign};

use crate::error::DecodeError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Size of the fixed header without options.
pub const HEADER_LEN: usize = 20;

/// Data offset (in 32-bit words) of a header without options.
pub const MIN_DATA_OFFSET: u8 = 5;

/// IP protocol number used in the checksum pseudo-header.
pub const PROTOCOL_NUMBER: u8 = 6;

const OFF_CHECKSUM: usize = 16;

// ─── Flags ───────────────────────────────────────────────────────────────────

/// The 12-bit flags field packed under the data offset.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Flags(u16);

impl Flags {
    pub const NONE: Flags = Flags(0);
    /// No more data from sender.
    pub const FIN: Flags = Flags(0x001);
    /// Synchronise sequence numbers (handshake initiation).
    pub const SYN: Flags = Flags(0x002);
    /// Reset the connection.
    pub const RST: Flags = Flags(0x004);
    /// Push function.
    pub const PSH: Flags = Flags(0x008);
    /// Acknowledgment field is significant.
    pub const ACK: Flags = Flags(0x010);
    /// Urgent pointer field is significant.
    pub const URG: Flags = Flags(0x020);

    const MASK: u16 = 0x0FFF;

    /// Build from raw bits; anything above the low 12 bits is discarded.
    #[inline]
    pub fn from_bits(bits: u16) -> Self {
        Flags(bits & Self::MASK)
    }

    #[inline]
    pub fn bits(self) -> u16 {
        self.0
    }

    /// Whether every bit of `other` is set in `self`.
    #[inline]
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn is_syn(self) -> bool {
        self.contains(Flags::SYN)
    }

    #[inline]
    pub fn is_ack(self) -> bool {
        self.contains(Flags::ACK)
    }

    #[inline]
    pub fn is_fin(self) -> bool {
        self.contains(Flags::FIN)
    }
}

impl BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl BitOrAssign for Flags {
    fn bitor_assign(&mut self, rhs: Flags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Flags, &str); 6] = [
            (Flags::SYN, "SYN"),
            (Flags::ACK, "ACK"),
            (Flags::FIN, "FIN"),
            (Flags::RST, "RST"),
            (Flags::PSH, "PSH"),
            (Flags::URG, "URG"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("-")?;
        }
        Ok(())
    }
}

impl fmt::Display for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ─── Segment Header ─────────────────────────────────────────────────────────

/// Decoded fixed header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentHeader {
    pub src_port: u16,
    pub dst_port: u16,
    /// Sequence number of the first payload byte (or of the SYN/FIN slot).
    pub seq: u32,
    /// Next sequence number the sender expects to receive.
    pub ack: u32,
    /// Header length in 32-bit words.
    pub data_offset: u8,
    pub flags: Flags,
    /// Advertised receive window.
    pub window: u16,
    pub checksum: u16,
    pub urgent: u16,
}

impl SegmentHeader {
    /// Create a header with no options and a zero checksum.
    pub fn new(src_port: u16, dst_port: u16, seq: u32, ack: u32, flags: Flags) -> Self {
        SegmentHeader {
            src_port,
            dst_port,
            seq,
            ack,
            data_offset: MIN_DATA_OFFSET,
            flags,
            window: 0,
            checksum: 0,
            urgent: 0,
        }
    }

    pub fn with_window(mut self, window: u16) -> Self {
        self.window = window;
        self
    }

    /// Header length in bytes, as declared by the data offset.
    #[inline]
    pub fn header_len(&self) -> usize {
        4 * self.data_offset as usize
    }

    /// Encode the fixed 20-byte header into a buffer.
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u16(self.src_port);
        buf.put_u16(self.dst_port);
        buf.put_u32(self.seq);
        buf.put_u32(self.ack);
        buf.put_u16(((self.data_offset as u16) << 12) | self.flags.bits());
        buf.put_u16(self.window);
        buf.put_u16(self.checksum);
        buf.put_u16(self.urgent);
    }

    /// Decode the fixed header. Does not validate the data offset against
    /// the segment length; see [`Segment::parse`].
    pub fn decode(buf: &mut impl Buf) -> Result<Self, DecodeError> {
        if buf.remaining() < HEADER_LEN {
            return Err(DecodeError::Truncated {
                len: buf.remaining(),
            });
        }

        let src_port = buf.get_u16();
        let dst_port = buf.get_u16();
        let seq = buf.get_u32();
        let ack = buf.get_u32();
        let offset_flags = buf.get_u16();
        let window = buf.get_u16();
        let checksum = buf.get_u16();
        let urgent = buf.get_u16();

        Ok(SegmentHeader {
            src_port,
            dst_port,
            seq,
            ack,
            data_offset: (offset_flags >> 12) as u8,
            flags: Flags::from_bits(offset_flags),
            window,
            checksum,
            urgent,
        })
    }
}

// ─── Segment ────────────────────────────────────────────────────────────────

/// A complete segment: header + payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: SegmentHeader,
    pub payload: Bytes,
}

impl Segment {
    pub fn new(header: SegmentHeader, payload: Bytes) -> Self {
        Segment { header, payload }
    }

    /// Parse a raw segment. The payload is a zero-copy slice of `raw`
    /// starting at `4 * data_offset`.
    pub fn parse(raw: &Bytes) -> Result<Self, DecodeError> {
        let header = SegmentHeader::decode(&mut raw.as_ref())?;
        let header_len = header.header_len();
        // An offset reaching past the end is rejected outright rather than
        // read as an empty payload, so its flags are never acted on.
        if header.data_offset < MIN_DATA_OFFSET || header_len > raw.len() {
            return Err(DecodeError::BadDataOffset {
                offset: header.data_offset,
                len: raw.len(),
            });
        }
        Ok(Segment {
            payload: raw.slice(header_len..),
            header,
        })
    }

    /// Serialize and fill in the checksum for the given address pair
    /// (`src` is the sending host, `dst` the receiving one).
    pub fn encode(&self, src: IpAddr, dst: IpAddr) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        let mut header = self.header.clone();
        header.data_offset = MIN_DATA_OFFSET;
        header.checksum = 0;
        header.encode(&mut buf);
        buf.put_slice(&self.payload);

        let csum = checksum(src, dst, &buf);
        buf[OFF_CHECKSUM..OFF_CHECKSUM + 2].copy_from_slice(&csum.to_be_bytes());
        buf.freeze()
    }

    /// Encoded length in bytes.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }
}

// ─── Checksum ───────────────────────────────────────────────────────────────

/// Compute the checksum for `segment` (with its checksum field zeroed).
pub fn checksum(src: IpAddr, dst: IpAddr, segment: &[u8]) -> u16 {
    !fold(pseudo_header_sum(src, dst, segment.len()) + sum_words(segment))
}

/// Verify a received segment. Summing the pseudo-header and the segment
/// including its checksum field must yield zero after complementing.
pub fn verify_checksum(src: IpAddr, dst: IpAddr, segment: &[u8]) -> bool {
    !fold(pseudo_header_sum(src, dst, segment.len()) + sum_words(segment)) == 0
}

/// [`verify_checksum`] reported as a [`DecodeError`].
pub fn check_checksum(src: IpAddr, dst: IpAddr, segment: &[u8]) -> Result<(), DecodeError> {
    if verify_checksum(src, dst, segment) {
        Ok(())
    } else {
        Err(DecodeError::Checksum)
    }
}

fn pseudo_header_sum(src: IpAddr, dst: IpAddr, len: usize) -> u64 {
    match (src, dst) {
        (IpAddr::V4(s), IpAddr::V4(d)) => {
            sum_words(&s.octets())
                + sum_words(&d.octets())
                + PROTOCOL_NUMBER as u64
                + (len as u64 & 0xFFFF)
        }
        (s, d) => {
            let s = to_v6(s);
            let d = to_v6(d);
            let len = len as u32;
            sum_words(&s.octets())
                + sum_words(&d.octets())
                + (len >> 16) as u64
                + (len & 0xFFFF) as u64
                + PROTOCOL_NUMBER as u64
        }
    }
}

fn to_v6(addr: IpAddr) -> Ipv6Addr {
    match addr {
        IpAddr::V4(v4) => v4.to_ipv6_mapped(),
        IpAddr::V6(v6) => v6,
    }
}

/// Sum consecutive big-endian 16-bit words; an odd trailing byte is padded
/// with zero on the right.
fn sum_words(data: &[u8]) -> u64 {
    let mut chunks = data.chunks_exact(2);
    let mut sum: u64 = chunks
        .by_ref()
        .map(|w| u16::from_be_bytes([w[0], w[1]]) as u64)
        .sum();
    if let [last] = chunks.remainder() {
        sum += (*last as u64) << 8;
    }
    sum
}

fn fold(mut sum: u64) -> u16 {
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    sum as u16
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    const CLIENT: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
    const SERVER: IpAddr = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));

    fn data_segment(payload: &'static [u8]) -> Segment {
        Segment::new(
            SegmentHeader::new(40000, 7000, 1001, 5001, Flags::ACK).with_window(1024),
            Bytes::from_static(payload),
        )
    }

    // ─── Flags ──────────────────────────────────────────────────────────

    #[test]
    fn flags_combine_and_test() {
        let f = Flags::SYN | Flags::ACK;
        assert!(f.is_syn());
        assert!(f.is_ack());
        assert!(!f.is_fin());
        assert_eq!(f.bits(), 0x012);
        assert_eq!(format!("{f:?}"), "SYN|ACK");
        assert_eq!(format!("{:?}", Flags::NONE), "-");
    }

    #[test]
    fn flags_from_bits_masks_offset_nibble() {
        assert_eq!(Flags::from_bits(0x5011), Flags::FIN | Flags::ACK);
    }

    // ─── Header layout ──────────────────────────────────────────────────

    #[test]
    fn header_fields_on_the_wire() {
        let bytes = data_segment(b"").encode(CLIENT, SERVER);
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[0..2], &40000u16.to_be_bytes());
        assert_eq!(&bytes[2..4], &7000u16.to_be_bytes());
        assert_eq!(&bytes[4..8], &1001u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &5001u32.to_be_bytes());
        // Offset 5 in the top nibble, ACK in the flags.
        assert_eq!(&bytes[12..14], &[0x50, 0x10]);
        assert_eq!(&bytes[14..16], &1024u16.to_be_bytes());
    }

    #[test]
    fn parse_recovers_header_and_payload() {
        let bytes = data_segment(b"hello").encode(CLIENT, SERVER);
        let seg = Segment::parse(&bytes).unwrap();
        assert_eq!(seg.header.src_port, 40000);
        assert_eq!(seg.header.dst_port, 7000);
        assert_eq!(seg.header.seq, 1001);
        assert_eq!(seg.header.ack, 5001);
        assert_eq!(seg.header.flags, Flags::ACK);
        assert_eq!(seg.header.data_offset, MIN_DATA_OFFSET);
        assert_eq!(seg.payload, &b"hello"[..]);
    }

    #[test]
    fn parse_honours_data_offset_with_options() {
        let mut buf = BytesMut::new();
        let mut header = SegmentHeader::new(1, 2, 3, 4, Flags::ACK);
        header.data_offset = 6;
        header.encode(&mut buf);
        buf.put_u32(0x0101_0101); // four bytes of NOP options
        buf.put_slice(b"data");
        let seg = Segment::parse(&buf.freeze()).unwrap();
        assert_eq!(seg.payload, &b"data"[..]);
    }

    #[test]
    fn parse_rejects_short_buffer() {
        let raw = Bytes::from_static(&[0u8; HEADER_LEN - 1]);
        assert_eq!(
            Segment::parse(&raw),
            Err(DecodeError::Truncated { len: HEADER_LEN - 1 })
        );
    }

    #[test]
    fn parse_rejects_offset_past_end() {
        let mut buf = BytesMut::new();
        let mut header = SegmentHeader::new(1, 2, 3, 4, Flags::NONE);
        header.data_offset = 15;
        header.encode(&mut buf);
        assert_eq!(
            Segment::parse(&buf.freeze()),
            Err(DecodeError::BadDataOffset {
                offset: 15,
                len: HEADER_LEN
            })
        );
    }

    #[test]
    fn parse_rejects_offset_below_minimum() {
        let mut buf = BytesMut::new();
        let mut header = SegmentHeader::new(1, 2, 3, 4, Flags::NONE);
        header.data_offset = 2;
        header.encode(&mut buf);
        assert!(matches!(
            Segment::parse(&buf.freeze()),
            Err(DecodeError::BadDataOffset { offset: 2, .. })
        ));
    }

    // ─── Checksum ───────────────────────────────────────────────────────

    #[test]
    fn encoded_segment_verifies() {
        let bytes = data_segment(b"odd").encode(CLIENT, SERVER);
        assert!(verify_checksum(CLIENT, SERVER, &bytes));
    }

    #[test]
    fn checksum_covers_addresses() {
        let bytes = data_segment(b"payload").encode(CLIENT, SERVER);
        let other = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 3));
        assert!(!verify_checksum(other, SERVER, &bytes));
    }

    #[test]
    fn corrupt_byte_fails_verification() {
        let mut bytes = data_segment(b"payload").encode(CLIENT, SERVER).to_vec();
        bytes[HEADER_LEN + 2] ^= 0x40;
        assert!(!verify_checksum(CLIENT, SERVER, &bytes));
    }

    #[test]
    fn check_checksum_reports_decode_error() {
        let mut bytes = data_segment(b"payload").encode(CLIENT, SERVER).to_vec();
        assert_eq!(check_checksum(CLIENT, SERVER, &bytes), Ok(()));
        bytes[OFF_CHECKSUM] ^= 0x01;
        assert_eq!(
            check_checksum(CLIENT, SERVER, &bytes),
            Err(DecodeError::Checksum)
        );
    }

    #[test]
    fn ipv6_pseudo_header_verifies() {
        let a: IpAddr = "fd00::1".parse().unwrap();
        let b: IpAddr = "fd00::2".parse().unwrap();
        let bytes = data_segment(b"v6").encode(a, b);
        assert!(verify_checksum(a, b, &bytes));
        assert!(!verify_checksum(b, a, &bytes[..bytes.len() - 1]));
    }

    #[test]
    fn known_ipv4_checksum_vector() {
        // SYN from 192.168.0.1:49152 to 192.168.0.199:80, seq 0, window 8192.
        let src = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 1));
        let dst = IpAddr::V4(Ipv4Addr::new(192, 168, 0, 199));
        let seg = Segment::new(
            SegmentHeader::new(49152, 80, 0, 0, Flags::SYN).with_window(8192),
            Bytes::new(),
        );
        let bytes = seg.encode(src, dst);
        let stored = u16::from_be_bytes([bytes[16], bytes[17]]);

        let mut scratch = bytes.to_vec();
        scratch[16] = 0;
        scratch[17] = 0;
        assert_eq!(checksum(src, dst, &scratch), stored);
        assert!(verify_checksum(src, dst, &bytes));
    }
}
