//! Serial-number comparisons for the 32-bit sequence space.
//!
//! Sequence numbers wrap at 2^32, so plain `<` is wrong once a flow crosses
//! the boundary. Two numbers are compared by the sign of their wrapping
//! difference, which is valid while they are less than 2^31 apart.

/// `a` precedes `b`.
#[inline]
pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// `a` precedes or equals `b`.
#[inline]
pub fn seq_le(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) <= 0
}

/// `a` follows `b`.
#[inline]
pub fn seq_gt(a: u32, b: u32) -> bool {
    seq_lt(b, a)
}

/// Advance `seq` by `len` bytes.
#[inline]
pub fn seq_add(seq: u32, len: usize) -> u32 {
    seq.wrapping_add(len as u32)
}
