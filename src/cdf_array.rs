//! Cumulative-distribution sampler built on top of [`LocateArray`]'s bin
//! edges.
//!
//! Grounded on `examples/original_source/src/helper/locate_array.cpp`'s use
//! as a running cumulative distribution in `emission.cpp` (`emis[...].sample`
//! style call sites): entries are accumulated as partial sums, normalized,
//! and then sampled by locating a uniform deviate among the normalized
//! partial sums.

use crate::locate_array::LocateArray;

/// A discrete cumulative distribution over the bins of a [`LocateArray`].
///
/// Built by pushing unnormalized weights bin-by-bin, then normalizing once
/// with [`CdfArray::normalize`]. After normalization, [`CdfArray::sample`]
/// draws a bin index in proportion to the pushed weights.
#[derive(Clone, Debug, Default)]
pub struct CdfArray {
    partial_sums: Vec<f64>,
    total: f64,
}

impl CdfArray {
    /// An empty accumulator with capacity for `n` bins.
    #[must_use]
    pub fn with_capacity(n: usize) -> Self {
        Self {
            partial_sums: Vec::with_capacity(n),
            total: 0.0,
        }
    }

    /// Append the next bin's unnormalized weight, accumulating the running
    /// sum. Bins must be pushed in index order.
    pub fn push(&mut self, weight: f64) {
        self.total += weight;
        self.partial_sums.push(self.total);
    }

    /// Total unnormalized weight accumulated so far (the emissivity-integral
    /// total for the source this CDF samples).
    #[must_use]
    pub fn total(&self) -> f64 {
        self.total
    }

    /// Number of bins pushed.
    #[must_use]
    pub fn size(&self) -> usize {
        self.partial_sums.len()
    }

    /// Normalize the partial sums in place so the last entry is exactly
    /// `1.0`. A no-op (leaves zeros) when `total` is zero.
    pub fn normalize(&mut self) {
        if self.total <= 0.0 {
            return;
        }
        for s in &mut self.partial_sums {
            *s /= self.total;
        }
        self.total = 1.0;
    }

    /// Draw a bin index for the uniform deviate `u` in `[0, 1)`, via binary
    /// search over the normalized partial sums.
    ///
    /// # Panics
    ///
    /// Panics if this array is empty.
    #[must_use]
    pub fn sample(&self, u: f64) -> usize {
        assert!(!self.partial_sums.is_empty(), "CdfArray::sample on empty array");
        let idx = self.partial_sums.partition_point(|&s| s <= u);
        idx.min(self.partial_sums.len() - 1)
    }

    /// Draw a bin index and a uniformly sampled value within that bin's
    /// edges, combining [`Self::sample`] with [`LocateArray::sample`].
    /// Convenience for the common "pick a frequency bin, then pick a
    /// frequency within it" pattern used throughout emission sampling.
    #[must_use]
    pub fn sample_with_value(&self, locate: &LocateArray, u_bin: f64, u_value: f64) -> (usize, f64) {
        let i = self.sample(u_bin);
        (i, locate.sample(i, u_value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_makes_last_entry_one() {
        let mut cdf = CdfArray::with_capacity(4);
        for w in [1.0, 2.0, 3.0, 4.0] {
            cdf.push(w);
        }
        cdf.normalize();
        assert!((cdf.partial_sums.last().copied().unwrap() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn sample_respects_weighting() {
        let mut cdf = CdfArray::with_capacity(2);
        cdf.push(0.0);
        cdf.push(1.0);
        cdf.normalize();
        // all weight in bin 1; any u in [0,1) should land there except the
        // degenerate edge case where partial_sums[0] == 0.0 and u == 0.0.
        assert_eq!(cdf.sample(0.5), 1);
        assert_eq!(cdf.sample(0.999), 1);
    }

    #[test]
    fn sample_picks_first_nonzero_bin_for_u_zero() {
        let mut cdf = CdfArray::with_capacity(3);
        cdf.push(0.0);
        cdf.push(5.0);
        cdf.push(5.0);
        cdf.normalize();
        assert_eq!(cdf.sample(0.0), 1);
    }

    #[test]
    fn zero_total_does_not_panic_on_normalize() {
        let mut cdf = CdfArray::with_capacity(2);
        cdf.push(0.0);
        cdf.push(0.0);
        cdf.normalize();
        assert_eq!(cdf.total(), 0.0);
    }

    #[test]
    fn sample_with_value_combines_bin_and_position() {
        let mut cdf = CdfArray::with_capacity(2);
        cdf.push(1.0);
        cdf.push(1.0);
        cdf.normalize();
        let la = LocateArray::linear(0.0, 2.0, 2);
        let (i, v) = cdf.sample_with_value(&la, 0.9, 0.5);
        assert_eq!(i, 1);
        assert!((1.0..2.0).contains(&v));
    }
}
