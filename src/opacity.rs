//! Opacity / emissivity composition engine.
//!
//! Terms are additive and gated by [`crate::config::OpacityFlags`]; grey
//! mode (nonzero `grey_opacity`) short-circuits every other term.

use itertools::izip;

use crate::atom::Atom;
use crate::config::{GreyOpacityConfig, OpacityFlags};
use crate::constants::{blackbody_nu, Constants};
use crate::locate_array::LocateArray;

/// Per-zone opacity/emissivity arrays produced by one call to
/// [`compute_opacity`].
#[derive(Clone, Debug)]
pub struct OpacityTables {
    /// Absorption opacity per frequency bin, cm^2/g.
    pub abs_opac: Vec<f64>,
    /// Scattering opacity per frequency bin, cm^2/g.
    pub scat_opac: Vec<f64>,
    /// Emission source function per frequency bin, feeding the local
    /// emissivity CDF used by re-emission/thermal seeding.
    pub emissivity: Vec<f64>,
    /// Planck-mean opacity (absorption + scattering), cm^2/g.
    pub planck_mean_opacity: f64,
    /// Rosseland-mean opacity (absorption + scattering), cm^2/g. Not used
    /// by the transport loop itself, but retained as a companion
    /// diagnostic.
    pub rosseland_mean_opacity: f64,
}

/// Pseudo-Voigt approximation to the Voigt-Hjerting function `H(a, x)`,
/// normalized so `H(0, x) = exp(-x^2)` (pure Gaussian/Doppler core) and
/// `H(a, 0) = 1` for any damping parameter `a`. A cheap blend of Gaussian
/// and Lorentzian cores (Thompson/Cox/Hastings-style mixing, simplified)
/// rather than a tabulated profile lookup, since no tabulated Voigt
/// dependency is used here; applies only to the detailed bound-bound
/// term.
#[must_use]
pub fn voigt_profile(x: f64, a: f64) -> f64 {
    if a <= 0.0 {
        return (-x * x).exp();
    }
    let gaussian = (-x * x).exp();
    let lorentzian = a * a / (x * x + a * a);
    let eta = a / (a + 1.0);
    eta * lorentzian + (1.0 - eta) * gaussian
}

/// Thomson electron-scattering opacity, cm^2/g-equivalent extinction
/// coefficient per unit density is applied by the caller; this returns the
/// extinction coefficient `kappa_es = sigma_T * n_e`, cm^-1
/// (`GasState::electron_scattering_opacity`).
#[must_use]
pub fn electron_scattering_opacity(n_e: f64, thomson_cs: f64) -> f64 {
    thomson_cs * n_e
}

/// Free-free (bremsstrahlung) opacity and emissivity per frequency bin,
/// cm^-1 (`GasState::free_free_opacity`). `ionization_frac(atom_index,
/// stage)` supplies each atom's fractional population in ion stage
/// `stage`.
pub fn free_free_opacity(
    nu_grid: &LocateArray,
    atoms: &[Atom],
    elems_a: &[i32],
    mass_frac: &[f64],
    rho: f64,
    n_e: f64,
    temp: f64,
    c: &Constants,
) -> (Vec<f64>, Vec<f64>) {
    let ns = nu_grid.size();
    let mut opac = vec![0.0; ns];
    let mut emis = vec![0.0; ns];
    if temp <= 0.0 {
        return (opac, emis);
    }

    let mut fac = 0.0;
    for (i, atom) in atoms.iter().enumerate() {
        let z_eff_sq: f64 = atom.ions.iter().map(|ion| ion.frac * (ion.stage * ion.stage) as f64).sum();
        let n_ion = mass_frac[i] * rho / (elems_a[i] as f64 * c.m_p);
        fac += n_ion * z_eff_sq;
    }
    fac *= 3.7e8 * temp.powf(-0.5) * n_e;

    for i in 0..ns {
        let nu = nu_grid.center(i);
        let ezeta = (-c.h * nu / (c.k * temp)).exp();
        let bb = blackbody_nu(temp, nu);
        opac[i] = fac / (nu * nu * nu) * (1.0 - ezeta);
        emis[i] = opac[i] * bb;
    }
    (opac, emis)
}

/// Bound-free (photoionization) opacity and emissivity per frequency bin,
/// cm^-1, summed over all atoms and levels. Emissivity uses the local
/// stimulated-recombination approximation `emis = opac * B_nu(T)`; the
/// `n_e` factor is applied by the caller ([`compute_opacity`]).
pub fn bound_free_opacity(nu_grid: &LocateArray, atoms: &[Atom], temp: f64) -> (Vec<f64>, Vec<f64>) {
    let ns = nu_grid.size();
    let mut opac = vec![0.0; ns];
    let mut emis = vec![0.0; ns];

    for i in 0..ns {
        let nu = nu_grid.center(i);
        let e_ev = crate::constants::H * nu / crate::constants::EV_TO_ERGS;
        let mut k = 0.0;
        for atom in atoms {
            for level in &atom.levels {
                let sigma = level.s_photo.value_at_with_zero_edges(e_ev);
                if sigma > 0.0 {
                    k += atom.n_dens * sigma * level.n;
                }
            }
        }
        opac[i] = k;
        emis[i] = k * blackbody_nu(temp, nu);
    }
    (opac, emis)
}

/// Bound-bound (detailed Voigt-profile) opacity and emissivity per
/// frequency bin, cm^-1, for one atom's lines. `beta_dop` is the Doppler
/// width as a fraction of `c` (`line_velocity_width`); contributions are
/// accumulated over `+/-10` Doppler widths.
pub fn bound_bound_detailed_opacity(nu_grid: &LocateArray, atom: &Atom, beta_dop: f64, sigma_tot: f64) -> Vec<f64> {
    let ns = nu_grid.size();
    let mut opac = vec![0.0; ns];

    for line in &atom.lines {
        let (ll, lu) = (line.lower, line.upper);
        let nl = atom.levels[ll].n;
        let nu_pop = atom.levels[lu].n;
        let gl = atom.levels[ll].g;
        let gu = atom.levels[lu].g;
        let nu0 = line.nu;

        if nl <= 0.0 {
            continue;
        }

        let dnu = beta_dop * nu0;
        if dnu <= 0.0 {
            continue;
        }
        let a_voigt = line.a_ul / (4.0 * crate::constants::PI * dnu);

        let mut alpha0 = nl * atom.n_dens * sigma_tot * line.f_lu;
        alpha0 *= 1.0 - nu_pop * gl / (nl * gu);
        if alpha0 < 0.0 {
            continue;
        }

        let nu_lo = nu0 - dnu * 10.0;
        let nu_hi = nu0 + dnu * 10.0;
        let i1 = nu_grid.locate(nu_lo);
        let i2 = nu_grid.locate(nu_hi).min(ns);

        for (j, opac_j) in opac.iter_mut().enumerate().take(i2).skip(i1) {
            let nu = nu_grid.center(j);
            let x = (nu0 - nu) / dnu;
            let phi = voigt_profile(x, a_voigt) / dnu;
            *opac_j += alpha0 * phi;
        }
    }
    opac
}

/// Sobolev expansion-opacity contribution from one atom's detailed lines,
/// cm^-1. Requires [`Atom::update_sobolev_taus`] to have been called
/// already for `time`.
pub fn line_expansion_opacity(nu_grid: &LocateArray, atoms: &[Atom], time: f64, c: f64) -> Vec<f64> {
    let ns = nu_grid.size();
    let mut opac = vec![0.0; ns];
    for atom in atoms {
        for line in &atom.lines {
            opac[line.bin] += 1.0 - line.etau;
        }
    }
    for (i, opac_i) in opac.iter_mut().enumerate() {
        let delta = nu_grid.delta(i);
        if delta > 0.0 {
            *opac_i = *opac_i * nu_grid.center(i) / delta / c / time;
        }
    }
    opac
}

/// Fuzz-line expansion opacity, split into absorptive and scattering
/// contributions by the shared `epsilon` fraction. `n_l = n_ion *
/// exp(-E_l/kT) / Z(T)`: the fuzz list has no tracked populations, so
/// level occupation is computed on the fly from the ion's Boltzmann
/// factor and partition function.
pub fn fuzz_expansion_opacity(
    nu_grid: &LocateArray,
    atoms: &[Atom],
    elems_a: &[i32],
    mass_frac: &[f64],
    rho: f64,
    temp: f64,
    time: f64,
    epsilon: f64,
    constants: &Constants,
) -> (Vec<f64>, Vec<f64>) {
    const EXP_MIN: f64 = 1e-6;
    const EXP_MAX: f64 = 100.0;

    let ns = nu_grid.size();
    let mut scat = vec![0.0; ns];
    let mut abs = vec![0.0; ns];
    if temp <= 0.0 {
        return (abs, scat);
    }

    for (i, atom) in atoms.iter().enumerate() {
        let n_dens = mass_frac[i] * rho / (elems_a[i] as f64 * constants.m_p);
        for fl in &atom.fuzz_lines {
            let Some(part) = atom.partition(fl.ion) else { continue };
            if part <= 0.0 {
                continue;
            }
            let n_ion = atom.ion_population(fl.ion);
            let nl = n_dens * n_ion * (-fl.e_l / (constants.k_ev * temp)).exp() / part;
            let lam = constants.c / fl.nu;
            let stim_cor = 1.0 - (-constants.h * fl.nu / (constants.k * temp)).exp();
            let tau = constants.sigma_tot * lam * nl * fl.gf * stim_cor * time;

            let etau = if tau < EXP_MIN {
                1.0 - tau
            } else if tau > EXP_MAX {
                0.0
            } else {
                (-tau).exp()
            };

            scat[fl.bin] += (1.0 - epsilon) * (1.0 - etau);
            abs[fl.bin] += epsilon * (1.0 - etau);
        }
    }

    for i in 0..ns {
        let delta = nu_grid.delta(i);
        if delta > 0.0 {
            let norm = nu_grid.center(i) / delta / constants.c / time;
            scat[i] *= norm;
            abs[i] *= norm;
        }
    }
    (abs, scat)
}

/// Planck-mean of `(abs + scat)` over the frequency grid
/// (`GasState::get_planck_mean`).
#[must_use]
pub fn planck_mean(nu_grid: &LocateArray, abs_opac: &[f64], scat_opac: &[f64], temp: f64, c: &Constants) -> f64 {
    if nu_grid.size() == 1 {
        return abs_opac[0] + scat_opac[0];
    }
    let mut mean = 0.0;
    let mut norm = 0.0;
    for i in 0..nu_grid.size() {
        let nu = nu_grid.center(i);
        let bnu = blackbody_nu(temp, nu);
        let w = bnu * nu_grid.delta(i);
        mean += w * (abs_opac[i] + scat_opac[i]);
        norm += w;
    }
    if norm <= 0.0 {
        0.0
    } else {
        mean / norm
    }
}

/// Rosseland-mean of `(abs + scat)` over the frequency grid. Not used
/// by the transport loop itself, retained as a companion diagnostic.
#[must_use]
pub fn rosseland_mean(nu_grid: &LocateArray, abs_opac: &[f64], scat_opac: &[f64], temp: f64, c: &Constants) -> f64 {
    if nu_grid.size() == 1 {
        return abs_opac[0] + scat_opac[0];
    }
    let mut mean = 0.0;
    let mut norm = 0.0;
    for i in 0..nu_grid.size() {
        let nu = nu_grid.center(i);
        let zeta = c.h * nu / (c.k * temp);
        let ezeta = zeta.exp();
        let mut d_b_d_t = nu.powi(4) * ezeta / (ezeta - 1.0).powi(2);
        if !d_b_d_t.is_finite() {
            d_b_d_t = 0.0;
        }
        let w = d_b_d_t * nu_grid.delta(i);
        let kappa = abs_opac[i] + scat_opac[i];
        if kappa > 0.0 {
            mean += w / kappa;
        }
        norm += w;
    }
    if mean <= 0.0 {
        0.0
    } else {
        norm / mean
    }
}

/// Compose the full per-zone opacity/emissivity tables. Grey mode, when
/// `grey.grey_opacity != 0`, short-circuits every other term.
#[allow(clippy::too_many_arguments)]
pub fn compute_opacity(
    nu_grid: &LocateArray,
    atoms: &[Atom],
    elems_a: &[i32],
    mass_frac: &[f64],
    rho: f64,
    n_e: f64,
    temp: f64,
    time: f64,
    flags: OpacityFlags,
    grey: GreyOpacityConfig,
    line_velocity_width: f64,
    constants: &Constants,
) -> OpacityTables {
    let ns = nu_grid.size();
    let mut abs_opac = vec![0.0; ns];
    let mut scat_opac = vec![0.0; ns];
    let mut emissivity = vec![0.0; ns];

    if grey.grey_opacity != 0.0 {
        let gopac = rho * grey.grey_opacity;
        for i in 0..ns {
            let a = gopac * grey.epsilon;
            let s = gopac * (1.0 - grey.epsilon);
            abs_opac[i] = a;
            scat_opac[i] = s;
            let nu = nu_grid.center(i);
            emissivity[i] += blackbody_nu(temp, nu) * a;
        }
    } else {
        if flags.contains(OpacityFlags::ELECTRON_SCATTERING) {
            let es = electron_scattering_opacity(n_e, constants.thomson_cs);
            for s in &mut scat_opac {
                *s += es;
            }
        }

        if flags.contains(OpacityFlags::FREE_FREE) {
            let (opac, emis) = free_free_opacity(nu_grid, atoms, elems_a, mass_frac, rho, n_e, temp, constants);
            for (a, e, op, em) in izip!(&mut abs_opac, &mut emissivity, &opac, &emis) {
                *a += op;
                *e += em;
            }
        }

        if flags.contains(OpacityFlags::BOUND_FREE) {
            let (opac, emis) = bound_free_opacity(nu_grid, atoms, temp);
            for (a, e, op, em) in izip!(&mut abs_opac, &mut emissivity, &opac, &emis) {
                *a += op;
                *e += em * n_e;
            }
        }

        if flags.contains(OpacityFlags::BOUND_BOUND) {
            for atom in atoms {
                let opac = bound_bound_detailed_opacity(nu_grid, atom, line_velocity_width, constants.sigma_tot);
                for i in 0..ns {
                    abs_opac[i] += opac[i];
                    let nu = nu_grid.center(i);
                    emissivity[i] += opac[i] * blackbody_nu(temp, nu);
                }
            }
        }

        if flags.contains(OpacityFlags::LINE_EXPANSION) {
            let opac = line_expansion_opacity(nu_grid, atoms, time, constants.c);
            for i in 0..ns {
                abs_opac[i] += grey.epsilon * opac[i];
                scat_opac[i] += (1.0 - grey.epsilon) * opac[i];
                let nu = nu_grid.center(i);
                emissivity[i] += blackbody_nu(temp, nu) * grey.epsilon * opac[i];
            }
        }

        if flags.contains(OpacityFlags::FUZZ_EXPANSION) {
            let (a, s) = fuzz_expansion_opacity(nu_grid, atoms, elems_a, mass_frac, rho, temp, time, grey.epsilon, constants);
            for i in 0..ns {
                abs_opac[i] += a[i];
                scat_opac[i] += s[i];
                let nu = nu_grid.center(i);
                emissivity[i] += blackbody_nu(temp, nu) * a[i];
            }
        }
    }

    let planck_mean_opacity = planck_mean(nu_grid, &abs_opac, &scat_opac, temp, constants);
    let rosseland_mean_opacity = rosseland_mean(nu_grid, &abs_opac, &scat_opac, temp, constants);

    OpacityTables {
        abs_opac,
        scat_opac,
        emissivity,
        planck_mean_opacity,
        rosseland_mean_opacity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{Ion, Level, XyTable};

    fn trace_atom() -> Atom {
        let ions = vec![Ion {
            stage: 0,
            ground_level_id: 0,
            chi: 13.6,
            part: 1.0,
            frac: 1.0,
        }];
        let levels = vec![Level {
            ion: 0,
            ic: None,
            g: 1.0,
            e: 0.0,
            e_ion: 13.6,
            n: 1.0,
            n_lte: 1.0,
            b: 1.0,
            p_ic: 0.0,
            r_ci: 0.0,
            s_photo: XyTable::default(),
            a_rec: XyTable::default(),
        }];
        let mut atom = Atom::new(1, ions, levels, Vec::new(), Vec::new());
        atom.n_dens = 1.0e6;
        atom
    }

    #[test]
    fn voigt_profile_peaks_at_line_center() {
        let center = voigt_profile(0.0, 0.1);
        let wing = voigt_profile(3.0, 0.1);
        assert!(center > wing);
        assert!((center - 1.0).abs() < 1e-9);
    }

    #[test]
    fn voigt_profile_reduces_to_gaussian_for_zero_damping() {
        let x = 1.5;
        let v = voigt_profile(x, 0.0);
        assert!((v - (-x * x).exp()).abs() < 1e-12);
    }

    #[test]
    fn grey_mode_splits_by_epsilon() {
        let nu_grid = LocateArray::linear(1e14, 1e15, 4);
        let atoms: Vec<Atom> = Vec::new();
        let grey = GreyOpacityConfig { grey_opacity: 0.4, epsilon: 0.25 };
        let tables = compute_opacity(
            &nu_grid,
            &atoms,
            &[],
            &[],
            1.0,
            0.0,
            1.0e4,
            1.0e6,
            OpacityFlags::empty(),
            grey,
            0.01,
            &Constants::default(),
        );
        for i in 0..nu_grid.size() {
            assert!((tables.abs_opac[i] - 0.1).abs() < 1e-12);
            assert!((tables.scat_opac[i] - 0.3).abs() < 1e-12);
        }
    }

    #[test]
    fn opacities_are_nonnegative() {
        let nu_grid = LocateArray::linear(1e13, 1e16, 8);
        let atoms = vec![trace_atom()];
        let tables = compute_opacity(
            &nu_grid,
            &atoms,
            &[1],
            &[1.0],
            1e-10,
            1e4,
            8000.0,
            1.0e6,
            OpacityFlags::ELECTRON_SCATTERING | OpacityFlags::FREE_FREE | OpacityFlags::BOUND_FREE,
            GreyOpacityConfig::default(),
            0.01,
            &Constants::default(),
        );
        assert!(tables.abs_opac.iter().all(|&v| v >= 0.0));
        assert!(tables.scat_opac.iter().all(|&v| v >= 0.0));
        assert!(tables.planck_mean_opacity >= 0.0);
    }

    #[test]
    fn electron_scattering_scales_with_density() {
        let a = electron_scattering_opacity(1e4, crate::constants::THOMSON_CS);
        let b = electron_scattering_opacity(2e4, crate::constants::THOMSON_CS);
        assert!((b - 2.0 * a).abs() / a < 1e-9);
    }

    #[test]
    fn line_expansion_opacity_is_zero_for_untouched_lines() {
        let nu_grid = LocateArray::linear(1e14, 1e15, 4);
        let atoms = vec![trace_atom()];
        let opac = line_expansion_opacity(&nu_grid, &atoms, 1e6, crate::constants::C);
        // trace_atom has no lines, so every bin should be untouched.
        assert!(opac.iter().all(|&v| v == 0.0));
    }
}
