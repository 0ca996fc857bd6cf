//! Per-thread uniform random source.
//!
//! One independent stream per worker thread; no shared mutable generator.
//! Reproducibility requires seeding from `(base_seed, worker_id,
//! thread_id)` and deterministic packet-to-thread assignment. Wall-clock
//! is one valid input to `base_seed`, but the stream is reproducible for
//! a fixed seed rather than reseeded from wall-clock per rank.

use rand::{Rng, RngCore, SeedableRng};
use rand_pcg::Pcg64Mcg;

/// Mixes three integers into a single 64-bit seed (splitmix64 finalizer,
/// applied twice to fold in all three inputs).
fn fold_seed(base_seed: u64, worker_id: u32, thread_id: u32) -> u64 {
    fn splitmix64(mut x: u64) -> u64 {
        x = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
        x = (x ^ (x >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
        x = (x ^ (x >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
        x ^ (x >> 31)
    }

    let mixed_worker = splitmix64(base_seed ^ (u64::from(worker_id) << 32));
    splitmix64(mixed_worker ^ u64::from(thread_id))
}

/// A packet-transport random-number stream, owned by exactly one worker
/// thread. Never shared or handed across threads.
pub struct PacketRng {
    inner: Pcg64Mcg,
}

impl PacketRng {
    /// Construct a reproducible stream for the given `(base_seed, worker_id,
    /// thread_id)` triple.
    #[must_use]
    pub fn seeded(base_seed: u64, worker_id: u32, thread_id: u32) -> Self {
        let seed = fold_seed(base_seed, worker_id, thread_id);
        Self {
            inner: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    /// Uniform deviate in `[0, 1)`.
    #[must_use]
    pub fn uniform(&mut self) -> f64 {
        self.inner.gen::<f64>()
    }

    /// Uniform deviate in `[lo, hi)`.
    #[must_use]
    pub fn uniform_range(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.uniform()
    }

    /// Raw 64-bit output, for callers that need more entropy than a single
    /// `f64` (e.g. spawning a child stream for a sub-task).
    #[must_use]
    pub fn next_u64(&mut self) -> u64 {
        self.inner.next_u64()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_triple_is_reproducible() {
        let mut a = PacketRng::seeded(42, 0, 3);
        let mut b = PacketRng::seeded(42, 0, 3);
        for _ in 0..64 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn distinct_thread_ids_diverge() {
        let mut a = PacketRng::seeded(42, 0, 0);
        let mut b = PacketRng::seeded(42, 0, 1);
        let draws_a: Vec<u64> = (0..16).map(|_| a.next_u64()).collect();
        let draws_b: Vec<u64> = (0..16).map(|_| b.next_u64()).collect();
        assert_ne!(draws_a, draws_b);
    }

    #[test]
    fn uniform_is_within_unit_interval() {
        let mut rng = PacketRng::seeded(7, 1, 1);
        for _ in 0..10_000 {
            let u = rng.uniform();
            assert!((0.0..1.0).contains(&u));
        }
    }
}
