// Rolling checksum for content-defined chunk boundaries.
//
// Adler-style 32-bit checksum over a sliding window, with every input byte
// permuted through a fixed 16-bit table before it is summed (the xdelta3
// "large checksum" scheme).  The window slides one byte at a time, so the
// value at any position depends only on the last `window` bytes seen.
//
// The boundary test mixes the checksum with a multiplicative constant before
// taking the modulus; the raw low half of an Adler sum is too smooth to be
// used directly as a cut predicate.

/// LCG multiplier used to mix the checksum before the boundary test.
pub const HASH_MULT_32: u32 = 1_597_334_677;

/// Permutation table applied to each byte before it enters the sums.
const SINGLE_HASH: [u16; 256] = [
    0xbcd1, 0xbb65, 0x42c2, 0xdffe, 0x9666, 0x431b, 0x8504, 0xeb46, 0x6379, 0xd460, 0xcf14, 0x53cf,
    0xdb51, 0xdb08, 0x12c8, 0xf602, 0xe766, 0x2394, 0x250d, 0xdcbb, 0xa678, 0x02af, 0xa5c6, 0x7ea6,
    0xb645, 0xcb4d, 0xc44b, 0xe5dc, 0x9fe6, 0x5b5c, 0x35f5, 0x701a, 0x220f, 0x6c38, 0x1a56, 0x4ca3,
    0xffc6, 0xb152, 0x8d61, 0x7a58, 0x9025, 0x8b3d, 0xbf0f, 0x95a3, 0xe5f4, 0xc127, 0x3bed, 0x320b,
    0xb7f3, 0x6054, 0x333c, 0xd383, 0x8154, 0x5242, 0x4e0d, 0x0a94, 0x7028, 0x8689, 0x3a22, 0x0980,
    0x1847, 0xb0f1, 0x9b5c, 0x4176, 0xb858, 0xd542, 0x1f6c, 0x2497, 0x6a5a, 0x9fa9, 0x8c5a, 0x7743,
    0xa8a9, 0x9a02, 0x4918, 0x438c, 0xc388, 0x9e2b, 0x4cad, 0x01b6, 0xab19, 0xf777, 0x365f, 0x1eb2,
    0x091e, 0x7bf8, 0x7a8e, 0x5227, 0xeab1, 0x2074, 0x4523, 0xe781, 0x01a3, 0x163d, 0x3b2e, 0x287d,
    0x5e7f, 0xa063, 0xb134, 0x8fae, 0x5e8e, 0xb7b7, 0x4548, 0x1f5a, 0xfa56, 0x7a24, 0x900f, 0x42dc,
    0xcc69, 0x02a0, 0x0b22, 0xdb31, 0x71fe, 0x0c7d, 0x1732, 0x1159, 0xcb09, 0xe1d2, 0x1351, 0x52e9,
    0xf536, 0x5a4f, 0xc316, 0x6bf9, 0x8994, 0xb774, 0x5f3e, 0xf6d6, 0x3a61, 0xf82c, 0xcc22, 0x9d06,
    0x299c, 0x09e5, 0x1eec, 0x514f, 0x8d53, 0xa650, 0x5c6e, 0xc577, 0x7958, 0x71ac, 0x8916, 0x9b4f,
    0x2c09, 0x5211, 0xf6d8, 0xcaaa, 0xf7ef, 0x287f, 0x7a94, 0xab49, 0xfa2c, 0x7222, 0xe457, 0xd71a,
    0x00c3, 0x1a76, 0xe98c, 0xc037, 0x8208, 0x5c2d, 0xdfda, 0xe5f5, 0x0b45, 0x15ce, 0x8a7e, 0xfcad,
    0xaa2d, 0x4b5c, 0xd42e, 0xb251, 0x907e, 0x9a47, 0xc9a6, 0xd93f, 0x085e, 0x35ce, 0xa153, 0x7e7b,
    0x9f0b, 0x25aa, 0x5d9f, 0xc04d, 0x8a0e, 0x2875, 0x4a1c, 0x295f, 0x1393, 0xf760, 0x9178, 0x0f5b,
    0xfa7d, 0x83b4, 0x2082, 0x721d, 0x6462, 0x0368, 0x67e2, 0x8624, 0x194d, 0x22f6, 0x78fb, 0x6791,
    0xb238, 0xb332, 0x7276, 0xf272, 0x47ec, 0x4504, 0xa961, 0x9fc8, 0x3fdc, 0xb413, 0x007a, 0x0806,
    0x7458, 0x95c6, 0xccaa, 0x18d6, 0xe2ae, 0x1b06, 0xf3f6, 0x5050, 0xc8e8, 0xf4ac, 0xc04c, 0xf41c,
    0x992f, 0xae44, 0x5f1b, 0x1113, 0x1738, 0xd9a8, 0x19ea, 0x2d33, 0x9698, 0x2fe9, 0x323f, 0xcde2,
    0x6d71, 0xe37d, 0xb697, 0x2c4f, 0x4373, 0x9102, 0x075d, 0x8e25, 0x1672, 0xec28, 0x6acb, 0x86cc,
    0x186e, 0x9414, 0xd674, 0xd1a5,
];

// ---------------------------------------------------------------------------
// Rolling window checksum
// ---------------------------------------------------------------------------

/// Sliding-window checksum state.
///
/// Until `window` bytes have been pushed the sums cover everything seen so
/// far; afterwards each push evicts the oldest byte.
#[derive(Clone, Debug)]
pub struct RollingChecksum {
    window: usize,
    ring: Vec<u8>,
    head: usize,
    filled: usize,
    low: u32,
    high: u32,
}

impl RollingChecksum {
    /// Create an empty checksum over a window of `window` bytes.
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            ring: vec![0; window],
            head: 0,
            filled: 0,
            low: 0,
            high: 0,
        }
    }

    /// Push one byte, evicting the oldest once the window is full.
    #[inline(always)]
    pub fn roll(&mut self, byte: u8) {
        let new_c = SINGLE_HASH[byte as usize] as u32;
        if self.filled == self.window {
            let old_c = SINGLE_HASH[self.ring[self.head] as usize] as u32;
            self.low = self.low.wrapping_sub(old_c).wrapping_add(new_c);
            self.high = self
                .high
                .wrapping_sub(old_c.wrapping_mul(self.window as u32))
                .wrapping_add(self.low);
        } else {
            self.low = self.low.wrapping_add(new_c);
            self.high = self.high.wrapping_add(self.low);
            self.filled += 1;
        }
        self.ring[self.head] = byte;
        self.head += 1;
        if self.head == self.window {
            self.head = 0;
        }
    }

    /// Current 32-bit checksum: high sum in the upper half, low sum below.
    #[inline(always)]
    pub fn value(&self) -> u32 {
        ((self.high & 0xFFFF) << 16) | (self.low & 0xFFFF)
    }
}

/// Full (non-rolling) checksum of `data`, equal to pushing every byte of a
/// `data.len()`-wide window.
#[cfg(test)]
fn checksum(data: &[u8]) -> u32 {
    let mut low: u32 = 0;
    let mut high: u32 = 0;
    for &b in data {
        low = low.wrapping_add(SINGLE_HASH[b as usize] as u32);
        high = high.wrapping_add(low);
    }
    ((high & 0xFFFF) << 16) | (low & 0xFFFF)
}

/// Boundary predicate: `mix(cksum) % target == target - 1`.
#[inline(always)]
pub fn is_boundary(cksum: u32, target: u32) -> bool {
    debug_assert!(target >= 2);
    let mixed = cksum.wrapping_mul(HASH_MULT_32).rotate_left(16);
    mixed % target == target - 1
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_matches_full_checksum() {
        let data: Vec<u8> = (0..500u32).map(|i| (i * 31 % 251) as u8).collect();
        let window = 16;
        let mut rc = RollingChecksum::new(window);
        for (i, &b) in data.iter().enumerate() {
            rc.roll(b);
            let start = (i + 1).saturating_sub(window);
            assert_eq!(rc.value(), checksum(&data[start..=i]), "mismatch at {i}");
        }
    }

    #[test]
    fn value_depends_only_on_window() {
        let window = 8;
        let tail = b"ABCDEFGH";
        let mut a = RollingChecksum::new(window);
        let mut b = RollingChecksum::new(window);
        for &x in b"some unrelated prefix".iter().chain(tail) {
            a.roll(x);
        }
        for &x in b"xyz".iter().chain(tail) {
            b.roll(x);
        }
        assert_eq!(a.value(), b.value());
    }

    #[test]
    fn boundary_rate_is_roughly_one_in_target() {
        let mut s: u64 = 7;
        let target = 64;
        let mut hits = 0;
        let n = 200_000;
        let mut rc = RollingChecksum::new(32);
        for _ in 0..n {
            s = s.wrapping_mul(6364136223846793005).wrapping_add(1);
            rc.roll((s >> 33) as u8);
            if is_boundary(rc.value(), target) {
                hits += 1;
            }
        }
        let expected = n / target as usize;
        assert!(
            hits > expected / 3 && hits < expected * 3,
            "hits={hits} expected~{expected}"
        );
    }
}
