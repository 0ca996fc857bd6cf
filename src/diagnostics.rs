//! Recoverable-condition counters returned alongside a successful result,
//! rather than logged or printed inside the core: this crate carries no
//! logging dependency, so status propagates through return values instead.
//!
//! Every variant here corresponds to a non-fatal error category: capacity,
//! unphysical state, numerical convergence. Fatal (init-time) conditions
//! are not represented here — they are `Error` (`error.rs`).

use serde::{Deserialize, Serialize};

/// Per-step accumulation of recoverable conditions encountered during
/// `Transport::step`, each contained to the packet/zone that raised it and
/// never fatal.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Diagnostics {
    /// Emission was truncated because the live-packet buffer was full.
    pub particles_truncated: u64,
    /// A line was found in the laser regime (`n_u g_l > n_l g_u`) and its
    /// optical depth was clamped to zero rather than allowed to go
    /// negative.
    pub laser_regime_clamps: u64,
    /// A NaN or Inf was found in a rate matrix entry and clamped to zero
    /// before assembly.
    pub nan_inf_clamps: u64,
    /// Number of zones whose NLTE solve did not converge within the
    /// iteration budget (the last-converged populations are retained).
    pub nlte_nonconvergence: u64,
    /// Number of zones whose Brent electron-density root-find failed to
    /// bracket a root or converge (falls back to the last value).
    pub electron_density_failures: u64,
    /// Number of zones whose radiative-equilibrium temperature solve
    /// failed to bracket a root or converge (falls back to the last
    /// `T_gas`).
    pub temperature_solve_failures: u64,
}

impl Diagnostics {
    /// A fresh, all-zero counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge another shard's counts into this one (per-worker tallies
    /// combined after an all-reduce, matching the additive tally-reduction
    /// convention used for `e_abs`/`j_nu`).
    pub fn merge(&mut self, other: &Diagnostics) {
        self.particles_truncated += other.particles_truncated;
        self.laser_regime_clamps += other.laser_regime_clamps;
        self.nan_inf_clamps += other.nan_inf_clamps;
        self.nlte_nonconvergence += other.nlte_nonconvergence;
        self.electron_density_failures += other.electron_density_failures;
        self.temperature_solve_failures += other.temperature_solve_failures;
    }

    /// `true` if any recoverable condition was hit this step.
    #[must_use]
    pub fn has_any(&self) -> bool {
        *self != Diagnostics::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_diagnostics_has_no_conditions() {
        assert!(!Diagnostics::new().has_any());
    }

    #[test]
    fn merge_sums_fields() {
        let mut a = Diagnostics {
            particles_truncated: 1,
            nlte_nonconvergence: 2,
            ..Default::default()
        };
        let b = Diagnostics {
            particles_truncated: 3,
            laser_regime_clamps: 5,
            ..Default::default()
        };
        a.merge(&b);
        assert_eq!(a.particles_truncated, 4);
        assert_eq!(a.laser_regime_clamps, 5);
        assert_eq!(a.nlte_nonconvergence, 2);
        assert!(a.has_any());
    }
}
