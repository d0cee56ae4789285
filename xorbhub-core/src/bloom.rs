//! In-process bloom filter
//!
//! Backs the probabilistic membership tier when no external cache with a
//! bloom module is configured. No false negatives; the false positive rate
//! is bounded by the sizing chosen in [`BloomFilter::with_rate`].

/// Fixed-size bloom filter using double hashing over a Blake3 digest
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: Vec<u64>,
    num_bits: u64,
    num_hashes: u32,
    items: u64,
}

impl BloomFilter {
    /// Size a filter for `expected_items` at roughly `fp_rate` false positives
    pub fn with_rate(expected_items: usize, fp_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = fp_rate.clamp(1e-9, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let m = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let k = ((m as f64 / n) * ln2).round().clamp(1.0, 16.0) as u32;
        Self::new(m, k)
    }

    /// Create a filter with an explicit bit count and hash count
    pub fn new(num_bits: u64, num_hashes: u32) -> Self {
        let words = num_bits.div_ceil(64).max(1);
        Self {
            bits: vec![0; words as usize],
            num_bits: words * 64,
            num_hashes: num_hashes.max(1),
            items: 0,
        }
    }

    fn indexes(&self, item: &[u8]) -> impl Iterator<Item = u64> + '_ {
        let digest = blake3::hash(item);
        let bytes = digest.as_bytes();
        let mut h1 = [0u8; 8];
        let mut h2 = [0u8; 8];
        h1.copy_from_slice(&bytes[0..8]);
        h2.copy_from_slice(&bytes[8..16]);
        let h1 = u64::from_le_bytes(h1);
        let h2 = u64::from_le_bytes(h2) | 1;
        (0..self.num_hashes as u64)
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % self.num_bits)
    }

    /// Add an item
    pub fn insert(&mut self, item: &[u8]) {
        let idx: Vec<u64> = self.indexes(item).collect();
        for bit in idx {
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
        self.items += 1;
    }

    /// Possibly contains `item`; `false` is always exact
    pub fn contains(&self, item: &[u8]) -> bool {
        self.indexes(item)
            .all(|bit| self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0)
    }

    /// Number of insert calls so far
    pub fn len(&self) -> u64 {
        self.items
    }

    pub fn is_empty(&self) -> bool {
        self.items == 0
    }

    pub fn clear(&mut self) {
        self.bits.iter_mut().for_each(|w| *w = 0);
        self.items = 0;
    }
}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::with_rate(1_000_000, 0.01)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_inserted_items_are_found() {
        let mut bloom = BloomFilter::with_rate(1000, 0.01);
        for i in 0..1000u32 {
            bloom.insert(&i.to_be_bytes());
        }
        for i in 0..1000u32 {
            assert!(bloom.contains(&i.to_be_bytes()));
        }
        assert_eq!(bloom.len(), 1000);
    }

    #[test]
    fn test_false_positive_rate_is_bounded() {
        let mut bloom = BloomFilter::with_rate(1000, 0.01);
        for i in 0..1000u32 {
            bloom.insert(&i.to_be_bytes());
        }
        let fps = (10_000u32..20_000)
            .filter(|i| bloom.contains(&i.to_be_bytes()))
            .count();
        // 1% target; allow generous slack
        assert!(fps < 500, "too many false positives: {}", fps);
    }

    #[test]
    fn test_clear() {
        let mut bloom = BloomFilter::new(128, 3);
        bloom.insert(b"a");
        bloom.clear();
        assert!(bloom.is_empty());
        assert!(!bloom.contains(b"a"));
    }

    proptest! {
        #[test]
        fn prop_no_false_negatives(items in proptest::collection::vec(any::<Vec<u8>>(), 1..200)) {
            let mut bloom = BloomFilter::with_rate(items.len(), 0.05);
            for item in &items {
                bloom.insert(item);
            }
            for item in &items {
                prop_assert!(bloom.contains(item));
            }
        }
    }
}
