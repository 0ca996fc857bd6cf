//! Radiative-equilibrium temperature solve: after a step's tallies are
//! reduced, find the `T_gas` at which each zone's thermal emission
//! balances its absorbed energy, run only when
//! `config.radiative_equilibrium` is set.
//!
//! A per-zone Brent root-find on the balance residual
//! `emitted(T) - absorbed`, bracketed by `config.temperature_limits`.

use crate::grid::Grid;
use crate::linalg::{self, NumericalError};

use super::Transport;

/// Balance residual `emitted(T) * dt - e_abs` for one zone, using the
/// zone's already-computed Planck-mean opacity as the frequency-integrated
/// emission proxy (`4 * pi * kappa_planck * rho * vol * sigma_SB * T^4 *
/// dt`, the grey-body limit of a frequency-resolved emissivity integral).
fn rad_eq_function(t_gas: f64, e_abs: f64, kappa_planck: f64, rho: f64, vol: f64, dt: f64) -> f64 {
    let emitted = 4.0 * crate::constants::PI * kappa_planck * rho * vol * crate::constants::SB * t_gas.powi(4) * dt;
    emitted - e_abs
}

/// Solve every zone's post-step gas temperature from its absorbed-energy
/// tally. Zones with no absorption this step are left untouched; zones
/// whose Brent solve fails to bracket or converge keep their prior
/// `t_gas` and increment `diagnostics.temperature_solve_failures` rather
/// than propagate a fatal error.
pub fn solve_eq_temperature<G: Grid>(t: &mut Transport<G>, dt: f64) {
    let lo = t.config.temperature_limits.min;
    let hi = t.config.temperature_limits.max;

    for i in 0..t.grid.n_zones() {
        let (e_abs, kappa_planck, rho, vol) = {
            let zone = t.grid.zone(i);
            (zone.e_abs, zone.planck_mean_opacity, zone.rho, t.grid.zone_volume(i))
        };
        if e_abs <= 0.0 || kappa_planck <= 0.0 {
            continue;
        }

        let result = linalg::brent(|temp| rad_eq_function(temp, e_abs, kappa_planck, rho, vol, dt), lo, hi, 1.0, 100);

        match result {
            Ok(t_new) => {
                t.grid.zone_mut(i).t_gas = t_new;
                t.grid.zone_mut(i).t_rad = t_new;
            }
            Err(NumericalError::NotBracketed | NumericalError::MaxIterationsExceeded) => {
                t.diagnostics.temperature_solve_failures += 1;
            }
            Err(NumericalError::SingularMatrix) => unreachable!("radiative equilibrium is a scalar root-find"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rad_eq_function_is_increasing_in_temperature() {
        let lo = rad_eq_function(1000.0, 1.0, 1.0, 1.0, 1.0, 1.0);
        let hi = rad_eq_function(2000.0, 1.0, 1.0, 1.0, 1.0, 1.0);
        assert!(hi > lo);
    }

    #[test]
    fn rad_eq_function_is_negative_below_balance_and_positive_above() {
        let e_abs = 4.0 * crate::constants::PI * crate::constants::SB * 5000f64.powi(4);
        let below = rad_eq_function(100.0, e_abs, 1.0, 1.0, 1.0, 1.0);
        let above = rad_eq_function(50_000.0, e_abs, 1.0, 1.0, 1.0, 1.0);
        assert!(below < 0.0);
        assert!(above > 0.0);
    }
}
