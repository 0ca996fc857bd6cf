//! LTE/NLTE gas-state solver.
//!
//! Per-atom LTE/NLTE solves (`solve_lte`, `calculate_radiative_rates`,
//! `set_rates`, `solve_nlte`), plus an outer electron-density root-find
//! over each atom's charge-conservation equation using
//! [`crate::linalg::brent`].

use ndarray::Array2;

use crate::atom::Atom;
use crate::constants::{self, Constants};
use crate::diagnostics::Diagnostics;
use crate::linalg::{self, NumericalError};
use crate::locate_array::LocateArray;
use crate::opacity::voigt_profile;

/// Outcome of [`Gas::solve_state`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GasSolveStatus {
    Ok,
    ElectronDensityNotBracketed,
    ElectronDensityMaxIterations,
}

/// One zone's composition and thermodynamic state: total density,
/// electron density, temperature, and the per-atom level/ion populations.
#[derive(Clone, Debug)]
pub struct Gas {
    /// Total mass density, g/cm^3.
    pub dens: f64,
    /// Electron number density, cm^-3.
    pub n_e: f64,
    /// Gas temperature, K.
    pub temp: f64,
    /// Time since explosion, s.
    pub time: f64,
    pub elems_a: Vec<i32>,
    pub mass_frac: Vec<f64>,
    pub atoms: Vec<Atom>,
    /// Use the NLTE rate-matrix solver rather than LTE Saha-Boltzmann.
    pub use_nlte: bool,
    /// Sobolev-β convergence tolerance for [`solve_nlte`]:
    /// `max |Δβ|/β < tolerance`.
    pub nlte_beta_tolerance: f64,
    pub nlte_max_iterations: usize,
}

impl Gas {
    #[must_use]
    pub fn new(dens: f64, elems_a: Vec<i32>, mass_frac: Vec<f64>, atoms: Vec<Atom>, use_nlte: bool) -> Self {
        debug_assert_eq!(elems_a.len(), mass_frac.len());
        debug_assert_eq!(elems_a.len(), atoms.len());
        Self {
            dens,
            n_e: 0.0,
            temp: 0.0,
            time: 0.0,
            elems_a,
            mass_frac,
            atoms,
            use_nlte,
            nlte_beta_tolerance: 0.1,
            nlte_max_iterations: 100,
        }
    }

    /// Recompute every atom's Sobolev line taus from the populations left
    /// by the last [`Self::solve_state`] call. [`solve_nlte`] already does
    /// this internally each beta iteration; LTE solves do not, so
    /// `compute_opacity`'s line-expansion term calls this unconditionally
    /// before reading `atom.lines[..].tau`.
    pub fn update_line_opacities(&mut self, sigma_tot: f64, c: f64, diagnostics: &mut Diagnostics) {
        for atom in &mut self.atoms {
            atom.update_sobolev_taus(self.time, sigma_tot, c, diagnostics);
        }
    }

    /// Mean ionization state across all atoms, weighted by number density
    /// (`nlte_gas::get_ionization_state`).
    #[must_use]
    pub fn ionization_state(&self) -> f64 {
        let n_ion: f64 = self.atoms.iter().map(|a| a.n_dens).sum();
        if n_ion <= 0.0 {
            return 0.0;
        }
        self.n_e / n_ion
    }

    /// Solve the gas state (excitation/ionization) at `temp`, given the
    /// mean-intensity array `j_nu` co-indexed with `nu_grid`. Updates
    /// `self.n_e` and every atom's level/ion populations in place.
    pub fn solve_state(&mut self, temp: f64, time: f64, nu_grid: &LocateArray, j_nu: &[f64], constants: &Constants, diagnostics: &mut Diagnostics) -> GasSolveStatus {
        self.temp = temp;
        self.time = time;

        let result = {
            let gas = &mut *self;
            linalg::brent(
                |n_e| charge_conservation(gas, n_e, temp, time, nu_grid, j_nu, constants, diagnostics),
                1.0e-3,
                1.0e20,
                1.0e-3,
                100,
            )
        };

        match result {
            Ok(n_e) => {
                self.n_e = n_e;
                GasSolveStatus::Ok
            }
            Err(NumericalError::NotBracketed) => {
                diagnostics.electron_density_failures += 1;
                GasSolveStatus::ElectronDensityNotBracketed
            }
            Err(NumericalError::MaxIterationsExceeded) => {
                diagnostics.electron_density_failures += 1;
                GasSolveStatus::ElectronDensityMaxIterations
            }
            Err(NumericalError::SingularMatrix) => unreachable!("charge conservation is a scalar root-find"),
        }
    }
}

/// Charge-conservation residual `f(n_e) = Σ_atoms n_atom · ⟨Z⟩(n_e) − n_e`.
/// Resolves each atom's state at the trial `n_e` as a side effect,
/// re-solving the full gas state at every Brent iterate.
fn charge_conservation(gas: &mut Gas, n_e: f64, temp: f64, time: f64, nu_grid: &LocateArray, j_nu: &[f64], constants: &Constants, diagnostics: &mut Diagnostics) -> f64 {
    let mut total = 0.0;
    for (i, atom) in gas.atoms.iter_mut().enumerate() {
        atom.n_dens = gas.mass_frac[i] * gas.dens / (gas.elems_a[i] as f64 * constants.m_p);
        if gas.use_nlte {
            let _ = solve_nlte(atom, temp, n_e, time, nu_grid, j_nu, constants, gas.nlte_max_iterations, gas.nlte_beta_tolerance, diagnostics);
        } else {
            solve_lte(atom, temp, n_e, constants);
        }
        total += atom.n_dens * atom.ion_frac();
    }
    total - n_e
}

/// LTE Saha-Boltzmann solve for one atom (`nlte_atom::solve_lte`).
pub fn solve_lte(atom: &mut Atom, temp: f64, n_e: f64, constants: &Constants) {
    for ion in &mut atom.ions {
        ion.part = 0.0;
    }
    for i in 0..atom.levels.len() {
        let n = atom.levels[i].g * (-atom.levels[i].e / (constants.k_ev * temp)).exp();
        atom.levels[i].n = n;
        let ion_idx = atom.levels[i].ion;
        atom.ions[ion_idx].part += n;
    }

    let lt = constants.h * constants.h / (2.0 * constants::PI * constants.m_e * constants.k * temp);
    let fac = 2.0 / n_e / lt.powf(1.5);

    atom.ions[0].frac = 1.0;
    let mut norm = 1.0;
    for i in 1..atom.ions.len() {
        let saha_base = (-atom.ions[i - 1].chi / (constants.k_ev * temp)).exp();
        let mut saha = saha_base * (atom.ions[i].part / atom.ions[i - 1].part) * fac;
        if n_e < 1e-50 {
            saha = 0.0;
        }
        atom.ions[i].frac = saha * atom.ions[i - 1].frac;
        norm += atom.ions[i].frac;
    }
    for ion in &mut atom.ions {
        ion.frac /= norm;
    }

    for i in 0..atom.levels.len() {
        let ion_idx = atom.levels[i].ion;
        let z = atom.ions[ion_idx].part;
        let f = atom.ions[ion_idx].frac;
        let n = if z > 0.0 {
            f * atom.levels[i].g * (-atom.levels[i].e / (constants.k_ev * temp)).exp() / z
        } else {
            0.0
        };
        atom.levels[i].n = n;
        atom.levels[i].n_lte = n;
        atom.levels[i].b = 1.0;
    }
}

/// Integrate the radiation field over bound-free edges and detailed lines
/// to get photoionization/radiative-recombination rates and line mean
/// intensities (`nlte_atom::calculate_radiative_rates`).
fn calculate_radiative_rates(atom: &mut Atom, nu_grid: &LocateArray, j_nu: &[f64], temp: f64, constants: &Constants) {
    for i in 0..atom.levels.len() {
        let chi = atom.levels[i].e_ion;
        let fac1 = 2.0 / (constants.c * constants.c);
        let mut r_ion = 0.0;
        let mut r_rec = 0.0;

        if let Some(ic) = atom.levels[i].ic {
            let n_edges = atom.levels[i].s_photo.len();
            for j in 1..n_edges {
                let e = atom.levels[i].s_photo.x[j];
                let nu = e * constants::EV_TO_ERGS / constants.h;
                let e0 = atom.levels[i].s_photo.x[j - 1];
                let nu0 = e0 * constants::EV_TO_ERGS / constants.h;
                let dnu = nu - nu0;
                let nu_m = 0.5 * (nu + nu0);
                let j_val = nu_grid.value_at(nu_m, j_nu);
                let sigma = atom.levels[i].s_photo.y[j];

                let jterm = sigma * j_val / (constants.h * nu);
                r_ion += jterm * dnu;
                r_rec += (sigma * fac1 * nu_m * nu_m + jterm) * (-(e - chi) / (constants.k_ev * temp)).exp() * dnu;
            }
            r_ion *= 4.0 * constants::PI;
            let lam_t = (constants.h * constants.h / (2.0 * constants::PI * constants.m_e * constants.k * temp)).sqrt();
            let gl_o_gc = atom.levels[i].g / atom.levels[ic].g;
            let saha_fac = lam_t * lam_t * lam_t * gl_o_gc / 2.0;
            r_rec *= 4.0 * constants::PI * saha_fac;
        }

        // Hui & Gnedin 1997 hydrogenic recombination fit; unconditionally
        // overrides the Milne integral above regardless of species.
        let lam_h = 2.0 * 157_807.0 / temp;
        let fact = (1.0 + (lam_h / 2.740).powf(0.407)).powf(2.242);
        let alpha = 2.753e-14 * lam_h.powf(1.5) / fact;
        r_rec = alpha;

        atom.levels[i].p_ic = r_ion;
        atom.levels[i].r_ci = r_rec;
    }

    // Line mean intensities, Voigt-profile weighted over a fixed +/-5
    // Doppler widths at a hard-coded beta=0.01 line width.
    const LINE_BETA: f64 = 0.01;
    const X_MAX: f64 = 5.0;
    const DX: f64 = 0.05;

    for l in 0..atom.lines.len() {
        let nu0 = atom.lines[l].nu;
        let dnu = nu0 * LINE_BETA;
        let gamma = atom.lines[l].a_ul;
        let a_voigt = gamma / (4.0 * constants::PI * dnu);

        let mut sum = 0.0;
        let mut j0 = 0.0;
        let mut x = -X_MAX;
        while x <= X_MAX {
            let phi = voigt_profile(x, a_voigt);
            let nu = nu0 + x * dnu;
            let j1 = nu_grid.value_at(nu, j_nu) * phi;
            sum += 0.5 * (j1 + j0) * DX;
            j0 = j1;
            x += DX;
        }
        atom.lines[l].j_bar = sum;
    }
}

/// Assemble the NLTE rate matrix for one atom
/// (`nlte_atom::set_rates`): radiative + non-thermal bound-bound,
/// collisional bound-bound, and bound-free contributions, each row
/// rescaled by its LTE population.
fn set_rates(atom: &mut Atom, temp: f64, n_e: f64, nu_grid: &LocateArray, j_nu: &[f64], constants: &Constants, diagnostics: &mut Diagnostics) -> Array2<f64> {
    let n = atom.levels.len();
    let mut rates = Array2::<f64>::zeros((n, n));

    calculate_radiative_rates(atom, nu_grid, j_nu, temp, constants);

    for l in 0..atom.lines.len() {
        let lu = atom.lines[l].upper;
        let ll = atom.lines[l].lower;
        let mut r_ul = atom.lines[l].b_ul * atom.lines[l].j_bar + atom.lines[l].a_ul;
        let mut r_lu = atom.lines[l].b_lu * atom.lines[l].j_bar;
        if atom.use_betas {
            r_ul *= atom.lines[l].beta;
            r_lu *= atom.lines[l].beta;
        }
        rates[[ll, lu]] += r_lu;
        rates[[lu, ll]] += r_ul;
    }

    // Non-thermal (radioactive) bound-bound, driven from the ground level
    // only rather than every lower level.
    for l in 0..atom.lines.len() {
        let lu = atom.lines[l].upper;
        let ll = atom.lines[l].lower;
        let d_e = (atom.levels[lu].e - atom.levels[ll].e) * constants::EV_TO_ERGS;
        let mut r_lu = if atom.n_dens > 0.0 && d_e > 0.0 {
            atom.e_gamma / atom.n_dens / d_e
        } else {
            0.0
        };
        if ll != 0 {
            r_lu = 0.0;
        }
        rates[[ll, lu]] += r_lu;
    }

    // Collisional bound-bound, detailed-balance upward rate from the
    // downward Van Regemorter-style fit.
    for i in 0..n {
        for j in 0..n {
            if i == j || atom.levels[i].ion != atom.levels[j].ion {
                continue;
            }
            let d_e = atom.levels[i].e - atom.levels[j].e;
            let zeta = d_e.abs() / (constants.k_ev * temp);
            let mut c = if zeta == 0.0 { 0.0 } else { 2.16 * zeta.powf(-1.68) * temp.powf(-1.5) };
            if d_e < 0.0 {
                let gl = atom.levels[i].g;
                let gu = atom.levels[j].g;
                c = c * gu / gl * (-zeta).exp();
            }
            rates[[i, j]] += c;
        }
    }

    // Bound-free: collisional ionization/recombination and radiative
    // photoionization/recombination.
    for i in 0..n {
        let Some(ic) = atom.levels[i].ic else { continue };
        let ion_idx = atom.levels[i].ion;
        let chi = atom.ions[ion_idx].chi - atom.levels[i].e;
        let zeta = chi / (constants.k_ev * temp);

        let c_ion = 2.7 / (zeta * zeta) * temp.powf(-1.5) * (-zeta).exp() * n_e;
        rates[[i, ic]] += c_ion;

        let gi = atom.levels[i].g;
        let gc = atom.levels[ic].g;
        let c_rec = 5.590_80e-16 / (zeta * zeta) * temp.powf(-3.0) * gi / gc * n_e * n_e;
        rates[[ic, i]] += c_rec;

        let mut r_rec = atom.levels[i].r_ci;
        if atom.no_ground_recomb && atom.levels[i].e == 0.0 {
            r_rec = 0.0;
        }
        rates[[ic, i]] += r_rec * n_e;
        rates[[i, ic]] += atom.levels[i].p_ic;
    }

    for i in 0..n {
        let n_lte = atom.levels[i].n_lte;
        for j in 0..n {
            let mut v = rates[[i, j]] * n_lte;
            if !v.is_finite() {
                diagnostics.nan_inf_clamps += 1;
                v = 0.0;
            }
            rates[[i, j]] = v;
        }
    }

    rates
}

/// NLTE rate-matrix solve for one atom, iterating Sobolev-β updates to
/// convergence. Returns `Err` only on a genuine linear-algebra failure
/// (singular matrix); non-convergence of the β iteration is recorded in
/// `diagnostics` and the last iterate is kept rather than propagated as
/// an error.
#[allow(clippy::too_many_arguments)]
pub fn solve_nlte(atom: &mut Atom, temp: f64, n_e: f64, time: f64, nu_grid: &LocateArray, j_nu: &[f64], constants: &Constants, max_iter: usize, beta_tol: f64, diagnostics: &mut Diagnostics) -> Result<(), NumericalError> {
    solve_lte(atom, temp, n_e, constants);
    atom.update_sobolev_taus(time, constants.sigma_tot, constants.c, diagnostics);

    let n = atom.levels.len();

    for _ in 0..max_iter {
        let rates = set_rates(atom, temp, n_e, nu_grid, j_nu, constants, diagnostics);

        let mut m = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            let r_out: f64 = (0..n).map(|j| rates[[i, j]]).sum();
            m[[i, i]] = -r_out;
        }
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    m[[i, j]] = rates[[j, i]];
                }
            }
        }
        for i in 0..n {
            m[[n - 1, i]] = atom.levels[i].n_lte;
        }
        let mut b = vec![0.0; n];
        b[n - 1] = 1.0;

        let x = linalg::lu_solve(m, &b)?;

        for i in 0..n {
            atom.levels[i].n = x[i] * atom.levels[i].n_lte;
            atom.levels[i].b = x[i];
        }

        for ion in &mut atom.ions {
            ion.frac = 0.0;
        }
        for i in 0..n {
            let ion_idx = atom.levels[i].ion;
            let pop = atom.levels[i].n;
            atom.ions[ion_idx].frac += pop;
        }

        if !atom.use_betas {
            return Ok(());
        }

        let mut converged = true;
        for l in 0..atom.lines.len() {
            let old_beta = atom.lines[l].beta;
            let (lower, upper) = (atom.lines[l].lower, atom.lines[l].upper);
            let lo = atom.levels[lower].clone();
            let up = atom.levels[upper].clone();
            atom.lines[l].update_sobolev_tau(&lo, &up, atom.n_dens, time, constants.sigma_tot, constants.c, diagnostics);
            let new_beta = atom.lines[l].beta;
            if new_beta.abs() > 0.0 && (old_beta - new_beta).abs() / new_beta > beta_tol {
                converged = false;
            }
        }
        if converged {
            return Ok(());
        }
    }

    diagnostics.nlte_nonconvergence += 1;
    Ok(())
}
