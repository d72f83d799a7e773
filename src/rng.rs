//! Tiny deterministic RNG for victim selection.
//!
//! XorShift64 is sufficient here: we pick steal victims from a handful of
//! nodes, not doing Monte Carlo. Determinism matters more than statistical
//! quality — same seed, same steal pattern (modulo timing), which keeps
//! failing runs reproducible.
//!
//! No `Copy`: copying an RNG duplicates the stream and makes two managers
//! take identical "random" decisions. Clone explicitly when needed.

/// Deterministic RNG for scheduling decisions.
///
/// Not thread-safe; each steal manager owns one instance forked from the
/// configuration seed.
#[derive(Clone, Debug)]
pub struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    /// Create a new RNG. Seed 0 is remapped to avoid the all-zero lockup
    /// state of the generator.
    #[inline]
    pub fn new(seed: u64) -> Self {
        let seed = if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed };
        Self { state: seed }
    }

    /// Next u64 in the sequence. Shift constants (13, 7, 17) are from
    /// Marsaglia's "Xorshift RNGs" and give the full 2^64 - 1 period.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    /// Random usize in `[0, upper)`.
    ///
    /// Uses the high bits of the generator output (XorShift low bits are
    /// weaker) with a power-of-two bitmask fast path.
    ///
    /// # Panics
    /// Panics in debug builds if `upper` is 0.
    #[inline]
    pub fn next_usize(&mut self, upper: usize) -> usize {
        debug_assert!(upper > 0, "upper bound must be > 0");
        if upper.is_power_of_two() {
            return (self.next_u64() as usize) & (upper - 1);
        }
        // Multiply-high mapping of [0, 2^64) onto [0, upper). The bias for
        // the node counts involved here (tens, not billions) is negligible.
        let wide = (self.next_u64() as u128) * (upper as u128);
        (wide >> 64) as usize
    }

    /// Shuffle the first `k` positions of `slice` (partial Fisher-Yates).
    ///
    /// After the call, `slice[..k]` is a uniform sample without replacement
    /// from the whole slice. Used to draw distinct steal victims.
    pub fn shuffle_prefix<T>(&mut self, slice: &mut [T], k: usize) {
        let n = slice.len();
        let k = k.min(n);
        for i in 0..k {
            let j = i + self.next_usize(n - i);
            slice.swap(i, j);
        }
    }
}
