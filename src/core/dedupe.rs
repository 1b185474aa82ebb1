//! Probabilistic duplicate detection. A scalable Bloom filter: zero
//! false negatives, bounded false-positive rate, capacity grows by
//! adding slices so there is no fixed ceiling on distinct sequences.
//!
//! The capability is optional; built with `no-dedupe` the engine refuses
//! duplicate tracking before processing begins.

#[cfg(not(feature = "no-dedupe"))]
mod real {
    const INITIAL_CAPACITY: usize = 1_000;
    const INITIAL_ERROR: f64 = 0.001;
    // Small-set growth: double capacity per slice, tighten error by 0.9.
    const GROWTH: usize = 2;
    const TIGHTENING: f64 = 0.9;

    #[derive(Clone, Debug)]
    struct Slice {
        bits: Vec<u64>,
        n_bits: u64,
        n_hashes: u32,
        inserted: usize,
        capacity: usize,
    }

    impl Slice {
        fn with_params(capacity: usize, error: f64) -> Self {
            let ln2 = std::f64::consts::LN_2;
            let n_bits = ((capacity as f64) * (1.0 / error).ln() / (ln2 * ln2)).ceil() as u64;
            let n_bits = n_bits.max(64);
            let n_hashes = ((1.0 / error).log2().ceil() as u32).max(1);
            Slice {
                bits: vec![0u64; n_bits.div_ceil(64) as usize],
                n_bits,
                n_hashes,
                inserted: 0,
                capacity,
            }
        }

        fn probe(&self, h1: u64, h2: u64, i: u32) -> (usize, u64) {
            let bit = h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.n_bits;
            ((bit / 64) as usize, 1u64 << (bit % 64))
        }

        fn contains(&self, h1: u64, h2: u64) -> bool {
            (0..self.n_hashes).all(|i| {
                let (word, mask) = self.probe(h1, h2, i);
                self.bits[word] & mask != 0
            })
        }

        fn insert(&mut self, h1: u64, h2: u64) {
            for i in 0..self.n_hashes {
                let (word, mask) = self.probe(h1, h2, i);
                self.bits[word] |= mask;
            }
            self.inserted += 1;
        }

        fn is_full(&self) -> bool {
            self.inserted >= self.capacity
        }
    }

    #[derive(Clone, Debug)]
    pub struct ScalableBloom {
        slices: Vec<Slice>,
        error: f64,
    }

    impl ScalableBloom {
        pub fn new() -> Self {
            Self {
                slices: vec![Slice::with_params(INITIAL_CAPACITY, INITIAL_ERROR)],
                error: INITIAL_ERROR,
            }
        }

        pub fn contains(&self, seq: &[u8]) -> bool {
            let (h1, h2) = hash_pair(seq);
            self.slices.iter().any(|s| s.contains(h1, h2))
        }

        pub fn insert(&mut self, seq: &[u8]) {
            let (h1, h2) = hash_pair(seq);
            if self.slices.last().is_some_and(Slice::is_full) {
                let capacity = self
                    .slices
                    .last()
                    .map(|s| s.capacity * GROWTH)
                    .unwrap_or(INITIAL_CAPACITY);
                self.error *= TIGHTENING;
                self.slices.push(Slice::with_params(capacity, self.error));
            }
            self.slices
                .last_mut()
                .expect("at least one slice")
                .insert(h1, h2);
        }

        #[cfg(test)]
        pub fn slice_count(&self) -> usize {
            self.slices.len()
        }
    }

    pub fn available() -> bool {
        true
    }

    fn hash_pair(seq: &[u8]) -> (u64, u64) {
        const FNV_OFFSET: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x100000001b3;
        let mut h = FNV_OFFSET;
        for &b in seq {
            h ^= b as u64;
            h = h.wrapping_mul(FNV_PRIME);
        }
        (h, mix(h))
    }

    fn mix(mut x: u64) -> u64 {
        x ^= x >> 33;
        x = x.wrapping_mul(0xff51afd7ed558ccd);
        x ^= x >> 33;
        x = x.wrapping_mul(0xc4ceb9fe1a85ec53);
        x ^= x >> 33;
        // An even stride would only probe half the bit positions.
        x | 1
    }
}

#[cfg(not(feature = "no-dedupe"))]
pub use real::*;

#[cfg(feature = "no-dedupe")]
mod stub {
    #[derive(Clone, Debug)]
    pub struct ScalableBloom;

    impl ScalableBloom {
        pub fn new() -> Self {
            Self
        }
        pub fn contains(&self, _seq: &[u8]) -> bool {
            false
        }
        pub fn insert(&mut self, _seq: &[u8]) {}
    }

    pub fn available() -> bool {
        false
    }
}

#[cfg(feature = "no-dedupe")]
pub use stub::*;
