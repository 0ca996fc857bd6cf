//! Radioactive decay energetics: composition evolution, decay-energy
//! deposition rate, and gamma-ray line tables.
//!
//! Tracks the full decay-chain and r-process heating machinery, not just
//! the per-zone `L_decay = rho * eps(composition, t) * V` rate that
//! feeds emission.

use rustc_hash::FxHashMap;

use crate::constants::{
    AVERAGE_48CR_ENERGY, AVERAGE_48V_ENERGY, AVERAGE_56CO_ENERGY, AVERAGE_56NI_ENERGY, CO_POSITRON_FRACTION,
    MEV_TO_ERGS, M_P, TAU_48CR, TAU_48V, TAU_56CO, TAU_56NI,
};

/// Build a `(Z, A) -> composition index` lookup, used by
/// [`decay_composition`] to find each decay chain's tracked isotopes
/// without a linear rescan per species.
fn isotope_index(elems_z: &[i32], elems_a: &[i32]) -> FxHashMap<(i32, i32), usize> {
    elems_z.iter().zip(elems_a).enumerate().map(|(i, (&z, &a))| ((z, a), i)).collect()
}

/// A gamma-ray line: energy (MeV) and relative probability per decay.
#[derive(Clone, Copy, Debug)]
pub struct GammaLine {
    pub energy_mev: f64,
    pub probability: f64,
}

/// ⁵⁶Ni decay gamma lines.
pub const NI56_LINES: &[GammaLine] = &[
    GammaLine { energy_mev: 0.15838, probability: 0.988 },
    GammaLine { energy_mev: 0.2695, probability: 0.365 },
    GammaLine { energy_mev: 0.48044, probability: 0.365 },
    GammaLine { energy_mev: 0.74995, probability: 0.495 },
    GammaLine { energy_mev: 0.81185, probability: 0.86 },
    GammaLine { energy_mev: 1.5618, probability: 0.14 },
];

/// ⁵⁶Co decay gamma lines.
pub const CO56_LINES: &[GammaLine] = &[
    GammaLine { energy_mev: 0.511, probability: 0.360 },
    GammaLine { energy_mev: 0.847, probability: 1.000 },
    GammaLine { energy_mev: 0.980, probability: 0.015 },
    GammaLine { energy_mev: 1.040, probability: 0.137 },
    GammaLine { energy_mev: 1.180, probability: 0.022 },
    GammaLine { energy_mev: 1.240, probability: 0.670 },
    GammaLine { energy_mev: 1.360, probability: 0.043 },
    GammaLine { energy_mev: 1.770, probability: 0.158 },
    GammaLine { energy_mev: 2.015, probability: 0.031 },
    GammaLine { energy_mev: 2.030, probability: 0.079 },
    GammaLine { energy_mev: 2.600, probability: 0.166 },
    GammaLine { energy_mev: 3.010, probability: 0.058 },
    GammaLine { energy_mev: 3.200, probability: 0.030 },
    GammaLine { energy_mev: 3.250, probability: 0.074 },
    GammaLine { energy_mev: 3.270, probability: 0.018 },
    GammaLine { energy_mev: 3.450, probability: 0.009 },
];

/// Polynomial coefficients for the log-log r-process heating-rate fit,
/// applied to compositions with `Z > 57`.
const R_PROC_FIT: &[f64] = &[
    17.608179,
    -2.0442059,
    -0.42565322,
    0.39830095,
    -0.0059089906,
    -0.054805836,
    0.014068697,
    -0.00086706160,
    -5.7056758e-05,
    2.6401842e-06,
    3.7186979e-07,
];

/// Evolve mass fractions `x` (co-indexed with `elems_z`/`elems_a`) forward
/// to time `t` under the ⁵⁶Ni -> ⁵⁶Co -> ⁵⁶Fe and ⁴⁸Cr -> ⁴⁸V -> ⁴⁸Ti decay
/// chains, in place.
///
/// Elements not part of either chain are left untouched. `⁵⁶Fe`/`⁴⁸Ti` mass
/// is accumulated into whatever existing entry matches `(Z, A)`.
pub fn decay_composition(elems_z: &[i32], elems_a: &[i32], x: &mut [f64], t: f64) {
    debug_assert_eq!(elems_z.len(), elems_a.len());
    debug_assert_eq!(elems_z.len(), x.len());

    let index = isotope_index(elems_z, elems_a);
    let find = |z: i32, a: i32| index.get(&(z, a)).copied();

    if let (Some(i_ni), Some(i_co)) = (find(28, 56), find(27, 56)) {
        let x_ni = x[i_ni];
        let x_co = x[i_co];

        let ni_f = (-t / TAU_56NI).exp();
        let co_f = TAU_56CO / (TAU_56NI - TAU_56CO) * ((-t / TAU_56NI).exp() - (-t / TAU_56CO).exp());
        let fe_f = 1.0 - ni_f - co_f;
        let eco = (-t / TAU_56CO).exp();

        x[i_ni] = x_ni * ni_f;
        x[i_co] = x_ni * co_f + x_co * eco;
        if let Some(i_fe) = find(26, 56) {
            x[i_fe] += x_ni * fe_f + x_co * (1.0 - eco);
        }
    }

    if let (Some(i_cr), Some(i_vn)) = (find(24, 48), find(23, 48)) {
        let x_cr = x[i_cr];
        let x_vn = x[i_vn];

        let cr_f = (-t / TAU_48CR).exp();
        let vn_f = TAU_48V / (TAU_48CR - TAU_48V) * ((-t / TAU_48CR).exp() - (-t / TAU_48V).exp());
        let ti_f = 1.0 - cr_f - vn_f;
        let evn = (-t / TAU_48V).exp();

        x[i_cr] = x_cr * cr_f;
        x[i_vn] = x_cr * vn_f + x_vn * evn;
        if let Some(i_ti) = find(22, 48) {
            x[i_ti] += x_cr * ti_f + x_vn * (1.0 - evn);
        }
    }
}

/// r-process heating rate fit (Lippuner & Roberts 2015 for `Ye = 0.13`),
/// thermalization-weighted per Barnes et al. 2016, ergs/s/g.
/// `gamma_fraction` is always `0`: kilonova gamma-ray escape is not
/// modeled by this fit.
#[must_use]
pub fn rprocess_heating_rate(t: f64) -> (f64, f64) {
    let td = t / 3600.0 / 24.0;

    let a1 = 8.4939e9;
    let alpha = 1.3642;
    let b1 = 8.3425e9;
    let beta1 = 3.6280;
    let b2 = 8.8616e8;
    let beta2 = 1.0847e1;
    let eps = a1 * td.powf(-alpha) + b1 * (-td / beta1).exp() + b2 * (-td / beta2).exp();

    let af = 0.56;
    let bf = 0.17;
    let df = 0.74;
    let x = 2.0 * bf * td.powf(df);
    let f = 0.36 * ((-af * td).exp() + (1.0 + x).ln() / x);

    (eps * f, 0.0)
}

/// Decay-energy deposition rate and gamma-ray fraction for a single
/// `(Z, A)` species at time `t` (ergs/s per nucleus; `gfrac` is
/// dimensionless), `radioactive::decay_energy_rate`.
///
/// Returns `(total_rate, gamma_fraction)`. `total_rate` is `0` for species
/// not covered by any tracked chain.
#[must_use]
pub fn decay_energy_rate(z: i32, a: i32, t: f64) -> (f64, f64) {
    let mut total = 0.0;
    let mut gtotal = 0.0;

    if z == 28 && a == 56 {
        let e_ni = (-t / TAU_56NI).exp();
        let e_co = (-t / TAU_56CO).exp();
        let ni56 = e_ni / TAU_56NI;
        let co56 = 1.0 / (TAU_56NI - TAU_56CO) * (e_ni - e_co);
        let ni_e = ni56 * (AVERAGE_56NI_ENERGY * MEV_TO_ERGS);
        let co_e = co56 * (AVERAGE_56CO_ENERGY * MEV_TO_ERGS);

        gtotal = ni_e + (1.0 - CO_POSITRON_FRACTION) * co_e;
        total = ni_e + co_e;
    }

    if z == 27 && a == 56 {
        let e_co = (-t / TAU_56CO).exp();
        let co56 = e_co / TAU_56CO;
        let co_e = co56 * (AVERAGE_56CO_ENERGY * MEV_TO_ERGS);

        gtotal = (1.0 - CO_POSITRON_FRACTION) * co_e;
        total = co_e;
    }

    if z == 24 && a == 48 {
        let e_cr = (-t / TAU_48CR).exp();
        let e_vn = (-t / TAU_48V).exp();
        let cr48 = e_cr / TAU_48CR;
        let vn48 = 1.0 / (TAU_48CR - TAU_48V) * (e_cr - e_vn);
        let cr_e = cr48 * (AVERAGE_48CR_ENERGY * MEV_TO_ERGS);
        let vn_e = vn48 * (AVERAGE_48V_ENERGY * MEV_TO_ERGS);

        gtotal += cr_e + vn_e;
        total += cr_e + vn_e;
    }

    if z >= 58 {
        let at = t.log10();
        let rproc_log: f64 = R_PROC_FIT.iter().enumerate().map(|(j, &c)| c * at.powi(j as i32)).sum();
        let rproc = 10f64.powf(rproc_log) * (a as f64 * M_P);

        let fission_e = 0.1 * rproc;
        let mut beta_e = 0.9 * rproc;
        beta_e *= 0.75;

        total += fission_e + beta_e;
        gtotal += 0.5 * beta_e;
    }

    let gfrac = if total == 0.0 { 0.0 } else { gtotal / total };
    (total, gfrac)
}

/// Total decay-energy deposition rate and gamma-ray fraction for a full
/// composition, ergs/s/cm^3. `x` is mass fraction, co-indexed with
/// `elems_z`/`elems_a`; `rho` is mass density, g/cm^3.
///
/// If any tracked species has `Z > 57`, or `force_rproc` is set, the whole
/// composition is treated as r-process material and
/// [`rprocess_heating_rate`] is used instead of the per-isotope chains.
/// This is a simple bulk-composition test, not a per-isotope classifier.
#[must_use]
pub fn decay(elems_z: &[i32], elems_a: &[i32], x: &[f64], rho: f64, t: f64, force_rproc: bool) -> (f64, f64) {
    debug_assert_eq!(elems_z.len(), elems_a.len());
    debug_assert_eq!(elems_z.len(), x.len());

    let is_rprocess = force_rproc || elems_z.iter().zip(elems_a).any(|(&z, &a)| z > 57 && a > 0);

    if is_rprocess {
        let (eps, gfrac) = rprocess_heating_rate(t);
        return (rho * eps, gfrac);
    }

    let mut total = 0.0;
    let mut gtotal = 0.0;
    for i in 0..elems_z.len() {
        let (rate, gfrac) = decay_energy_rate(elems_z[i], elems_a[i], t);
        let val = rate * x[i] * rho / (elems_a[i] as f64 * M_P);
        total += val;
        gtotal += val * gfrac;
    }
    let gfrac = if total == 0.0 { 0.0 } else { gtotal / total };
    (total, gfrac)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn decay_composition_conserves_mass_ni_chain() {
        let z = vec![28, 27, 26];
        let a = vec![56, 56, 56];
        let mut x = vec![1.0, 0.0, 0.0];
        let total_before: f64 = x.iter().sum();
        decay_composition(&z, &a, &mut x, 1.0e6);
        let total_after: f64 = x.iter().sum();
        assert!(approx_eq!(f64, total_before, total_after, epsilon = 1e-9));
        assert!(x[2] > 0.0, "some mass should have decayed to Fe56");
    }

    #[test]
    fn decay_composition_cr_chain_conserves_mass() {
        let z = vec![24, 23, 22];
        let a = vec![48, 48, 48];
        let mut x = vec![0.5, 0.0, 0.0];
        decay_composition(&z, &a, &mut x, 1.0e5);
        let total: f64 = x.iter().sum();
        assert!(approx_eq!(f64, total, 0.5, epsilon = 1e-9));
    }

    #[test]
    fn decay_composition_leaves_untracked_elements_alone() {
        let z = vec![14];
        let a = vec![28];
        let mut x = vec![0.3];
        decay_composition(&z, &a, &mut x, 1.0e7);
        assert_eq!(x[0], 0.3);
    }

    #[test]
    fn pure_ni56_decay_rate_is_positive_and_decreasing() {
        let (rate_early, _) = decay_energy_rate(28, 56, 1.0e5);
        let (rate_late, _) = decay_energy_rate(28, 56, 1.0e7);
        assert!(rate_early > 0.0);
        assert!(rate_late > 0.0);
        assert!(rate_late < rate_early);
    }

    #[test]
    fn rprocess_heating_rate_is_positive() {
        let (eps, gfrac) = rprocess_heating_rate(1.0 * 86400.0);
        assert!(eps > 0.0);
        assert_eq!(gfrac, 0.0);
    }

    #[test]
    fn decay_detects_rprocess_composition() {
        let z = vec![60, 28];
        let a = vec![150, 56];
        let x = vec![0.9, 0.1];
        let (rate, gfrac) = decay(&z, &a, &x, 1.0, 86400.0, false);
        assert!(rate > 0.0);
        assert_eq!(gfrac, 0.0);
    }

    #[test]
    fn gamma_line_tables_have_matching_lengths() {
        assert_eq!(NI56_LINES.len(), 6);
        assert_eq!(CO56_LINES.len(), 16);
    }
}
