//! Packet fingerprint
//!
//! Correlates two probe firings seen for the same packet by hashing the first
//! `PACKET_HASH_SPAN` bytes of its linear data. The hash is the kernel's
//! `jhash` (Bob Jenkins' lookup3), so fingerprints computed here and by other
//! kernel-side tools over the same bytes agree.

use crate::{constants::*, types::PacketBuffer};

const JHASH_INITVAL: u32 = 0xdeadbeef;

/// Access to a packet's bytes from a probe.
pub trait PacketSource {
    /// Number of bytes readable from the packet head (the linear part).
    fn linear_len(&self) -> Option<u32>;

    /// Copy the first `dst.len()` bytes of the packet into `dst`.
    fn read_head(&self, dst: &mut [u8]) -> Result<(), i64>;
}

impl<P: PacketSource + ?Sized> PacketSource for &P {
    #[inline(always)]
    fn linear_len(&self) -> Option<u32> {
        (**self).linear_len()
    }

    #[inline(always)]
    fn read_head(&self, dst: &mut [u8]) -> Result<(), i64> {
        (**self).read_head(dst)
    }
}

/// Fingerprint a packet.
///
/// `buffer` is per-CPU scratch storage receiving the hashed bytes. Returns
/// `None` if the packet has no readable bytes or the read fails.
#[inline(always)]
pub fn hash_packet<P: PacketSource + ?Sized>(buffer: &mut PacketBuffer, packet: &P) -> Option<u32> {
    let len = (packet.linear_len()? as usize).min(PACKET_HASH_SPAN);
    if len == 0 {
        return None;
    }

    let bytes = buffer.data.get_mut(..len)?;
    packet.read_head(bytes).ok()?;

    Some(jhash(bytes, PACKET_HASH_SEED))
}

#[inline(always)]
fn read_word(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[inline(always)]
fn mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(4);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(6);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(8);
    *b = b.wrapping_add(*a);
    *a = a.wrapping_sub(*c);
    *a ^= c.rotate_left(16);
    *c = c.wrapping_add(*b);
    *b = b.wrapping_sub(*a);
    *b ^= a.rotate_left(19);
    *a = a.wrapping_add(*c);
    *c = c.wrapping_sub(*b);
    *c ^= b.rotate_left(4);
    *b = b.wrapping_add(*a);
}

#[inline(always)]
fn final_mix(a: &mut u32, b: &mut u32, c: &mut u32) {
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(14));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(11));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(25));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(16));
    *a ^= *c;
    *a = a.wrapping_sub(c.rotate_left(4));
    *b ^= *a;
    *b = b.wrapping_sub(a.rotate_left(14));
    *c ^= *b;
    *c = c.wrapping_sub(b.rotate_left(24));
}

/// `jhash` over `key`, words read as little-endian.
///
/// Loops run at most `key.len() / 12` and 12 times, keeping the function
/// bounded for the verifier.
#[inline(always)]
pub fn jhash(key: &[u8], initval: u32) -> u32 {
    let mut a = JHASH_INITVAL
        .wrapping_add(key.len() as u32)
        .wrapping_add(initval);
    let mut b = a;
    let mut c = a;

    let mut k = key;
    while k.len() > 12 {
        a = a.wrapping_add(read_word(&k[0..4]));
        b = b.wrapping_add(read_word(&k[4..8]));
        c = c.wrapping_add(read_word(&k[8..12]));
        mix(&mut a, &mut b, &mut c);
        k = &k[12..];
    }

    if k.is_empty() {
        return c;
    }

    for (i, byte) in k.iter().enumerate() {
        let value = (*byte as u32) << ((i % 4) * 8);
        match i / 4 {
            0 => a = a.wrapping_add(value),
            1 => b = b.wrapping_add(value),
            _ => c = c.wrapping_add(value),
        }
    }
    final_mix(&mut a, &mut b, &mut c);

    c
}
