//! In-memory Bloom pre-filter over the indexed key set.
//!
//! The filter answers "might this input prevout or output script be
//! subscribed?" before any database lookup. False positives trigger a
//! confirming index read; false negatives cannot occur for inserted items.
//! Entries are never removed individually; the engine rebuilds the filter
//! from the store on open.

use bitvec::prelude::*;
use std::f64::consts::LN_2;
use std::io::Cursor;

/// Default expected item count.
pub const DEFAULT_ITEMS: usize = 20_000;

/// Default target false-positive rate.
pub const DEFAULT_FP_RATE: f64 = 0.001;

/// Sizing parameters for a [`WatchFilter`].
///
/// Above roughly `items` insertions the false-positive rate degrades past
/// `fp_rate`; deployments tracking more subscriptions should raise `items`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
    /// Expected number of inserted items.
    pub items: usize,
    /// Target false-positive rate.
    pub fp_rate: f64,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            items: DEFAULT_ITEMS,
            fp_rate: DEFAULT_FP_RATE,
        }
    }
}

impl FilterParams {
    /// Optimal bit-array size: `m = -n * ln(p) / ln(2)^2`.
    fn size_bits(&self) -> usize {
        let n = self.items.max(1) as f64;
        ((-n * self.fp_rate.ln()) / (LN_2 * LN_2)).ceil().max(1.0) as usize
    }

    /// Optimal hash-function count: `k = (m / n) * ln(2)`, clamped to 1..=32.
    fn hash_count(&self, size_bits: usize) -> usize {
        let n = self.items.max(1) as f64;
        (((size_bits as f64 / n) * LN_2).round() as usize).clamp(1, 32)
    }
}

/// Bloom filter over outpoint keys and raw script bytes.
pub struct WatchFilter {
    bits: BitVec<u8, Lsb0>,
    k: usize,
    m: usize,
    n: usize,
}

impl WatchFilter {
    /// Creates an empty filter sized for `params`.
    pub fn new(params: FilterParams) -> Self {
        let m = params.size_bits();
        let k = params.hash_count(m);
        Self {
            bits: bitvec![u8, Lsb0; 0; m],
            k,
            m,
            n: 0,
        }
    }

    /// Inserts an item. Afterwards `contains(item)` always returns true.
    pub fn insert(&mut self, item: &[u8]) {
        for pos in self.positions(item) {
            self.bits.set(pos, true);
        }
        self.n += 1;
    }

    /// Tests membership: `false` means definitely absent, `true` means
    /// possibly present.
    pub fn contains(&self, item: &[u8]) -> bool {
        self.positions(item).iter().all(|&pos| self.bits[pos])
    }

    /// Resets the filter to empty.
    pub fn clear(&mut self) {
        self.bits.fill(false);
        self.n = 0;
    }

    /// Number of inserted items.
    pub fn len(&self) -> usize {
        self.n
    }

    /// Whether nothing has been inserted.
    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Estimated false-positive rate at the current load:
    /// `(1 - e^(-k*n/m))^k`.
    pub fn estimated_fp_rate(&self) -> f64 {
        let exponent = -(self.k as f64) * (self.n as f64) / (self.m as f64);
        (1.0 - exponent.exp()).powi(self.k as i32)
    }

    /// Double hashing: `h(i) = h1 + i * h2 (mod m)`.
    fn positions(&self, item: &[u8]) -> Vec<usize> {
        let h1 = murmur(item, 0);
        let h2 = murmur(item, 1);
        (0..self.k)
            .map(|i| (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.m as u64) as usize)
            .collect()
    }
}

fn murmur(item: &[u8], seed: u32) -> u64 {
    murmur3::murmur3_x64_128(&mut Cursor::new(item), seed).unwrap_or(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_match_spec() {
        let params = FilterParams::default();
        assert_eq!(params.items, 20_000);
        assert_eq!(params.fp_rate, 0.001);

        // ~14.4 bits per item at p = 0.001, k ≈ 10.
        let m = params.size_bits();
        assert!(m > 270_000 && m < 300_000, "m = {m}");
        let k = params.hash_count(m);
        assert!((9..=11).contains(&k), "k = {k}");
    }

    #[test]
    fn no_false_negatives() {
        let mut filter = WatchFilter::new(FilterParams {
            items: 1_000,
            fp_rate: 0.01,
        });

        let items: Vec<Vec<u8>> = (0..1_000u32)
            .map(|i| i.to_le_bytes().repeat(9))
            .collect();
        for item in &items {
            filter.insert(item);
        }
        for item in &items {
            assert!(filter.contains(item), "false negative");
        }
        assert_eq!(filter.len(), 1_000);
    }

    #[test]
    fn false_positive_rate_is_bounded() {
        let target = 0.01;
        let mut filter = WatchFilter::new(FilterParams {
            items: 500,
            fp_rate: target,
        });

        for i in 0..500u32 {
            filter.insert(format!("inserted-{i}").as_bytes());
        }

        let mut false_positives = 0u32;
        let probes = 50_000u32;
        for i in 0..probes {
            if filter.contains(format!("absent-{i}").as_bytes()) {
                false_positives += 1;
            }
        }
        let observed = f64::from(false_positives) / f64::from(probes);
        assert!(
            observed <= target * 1.5,
            "observed fp rate {observed} above {target}"
        );
    }

    #[test]
    fn clear_empties_the_filter() {
        let mut filter = WatchFilter::new(FilterParams::default());
        filter.insert(b"item");
        assert!(!filter.is_empty());

        filter.clear();
        assert!(filter.is_empty());
        assert!(!filter.contains(b"item"));
    }

    #[test]
    fn estimated_fp_rate_tracks_load() {
        let mut filter = WatchFilter::new(FilterParams {
            items: 100,
            fp_rate: 0.01,
        });
        let empty = filter.estimated_fp_rate();

        for i in 0..100u32 {
            filter.insert(&i.to_le_bytes());
        }
        let loaded = filter.estimated_fp_rate();
        assert!(empty < loaded);
        assert!(loaded < 0.02, "estimate {loaded} drifted past target");
    }
}
