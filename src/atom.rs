//! Per-element atomic data: ions, levels, lines, and fuzz lines.
//!
//! Level/line cross-references are indices into the owning `Atom`'s
//! arrays, never pointers — an arena-and-index pattern that keeps the
//! data free of cycles and lifetimes.

use serde::{Deserialize, Serialize};

/// A tabulated function of one real variable, sampled at increasing `x`,
/// linearly interpolated between samples and clamped (zero) outside the
/// table (photoionization cross-sections, recombination-coefficient fits).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct XyTable {
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl XyTable {
    #[must_use]
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> Self {
        debug_assert_eq!(x.len(), y.len());
        debug_assert!(x.windows(2).all(|w| w[0] <= w[1]));
        Self { x, y }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.x.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Linear interpolation at `xv`, with zero returned outside `[x[0],
    /// x[last]]`.
    #[must_use]
    pub fn value_at_with_zero_edges(&self, xv: f64) -> f64 {
        if self.x.is_empty() || xv < self.x[0] || xv > *self.x.last().unwrap() {
            return 0.0;
        }
        let idx = self.x.partition_point(|&v| v <= xv);
        if idx == 0 {
            return self.y[0];
        }
        if idx >= self.x.len() {
            return *self.y.last().unwrap();
        }
        let (x0, x1) = (self.x[idx - 1], self.x[idx]);
        let (y0, y1) = (self.y[idx - 1], self.y[idx]);
        if (x1 - x0).abs() < f64::EPSILON {
            return y0;
        }
        y0 + (y1 - y0) * (xv - x0) / (x1 - x0)
    }

    /// Linear interpolation at `xv`, clamped to the end values outside the
    /// table's range.
    #[must_use]
    pub fn value_at(&self, xv: f64) -> f64 {
        if self.x.is_empty() {
            return 0.0;
        }
        if xv <= self.x[0] {
            return self.y[0];
        }
        if xv >= *self.x.last().unwrap() {
            return *self.y.last().unwrap();
        }
        self.value_at_with_zero_edges(xv)
    }
}

/// An ionization stage of an atom.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ion {
    /// Ionization stage, `0` = neutral, `1` = singly ionized, etc.
    pub stage: i32,
    /// Index of the ground-state level within the owning atom's `levels`.
    pub ground_level_id: usize,
    /// Ionization energy out of this stage, eV.
    pub chi: f64,
    /// Partition function (recomputed each LTE/NLTE solve).
    pub part: f64,
    /// Fractional abundance among this atom's ionization stages.
    pub frac: f64,
}

/// An energy level within one ionization stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Level {
    /// Index of the owning ion within the atom's `ions`.
    pub ion: usize,
    /// Index of the level this one photoionizes to, or `None` for the
    /// top of the ionization ladder.
    pub ic: Option<usize>,
    /// Statistical weight.
    pub g: f64,
    /// Excitation energy above the ion's ground state, eV.
    pub e: f64,
    /// Ionization energy from this level, eV.
    pub e_ion: f64,
    /// Level population fraction (of the atom's total number density).
    pub n: f64,
    /// LTE level population fraction.
    pub n_lte: f64,
    /// NLTE departure coefficient, `b = n / n_lte`.
    pub b: f64,
    /// Photoionization rate out of this level, 1/s.
    pub p_ic: f64,
    /// Radiative recombination rate coefficient into this level, cm^3/s.
    pub r_ci: f64,
    /// Photoionization cross-section vs. photon energy (eV), cm^2.
    pub s_photo: XyTable,
    /// Recombination coefficient vs. temperature (K), cm^3/s.
    pub a_rec: XyTable,
}

/// A detailed bound-bound radiative transition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Line {
    /// Index of the lower level.
    pub lower: usize,
    /// Index of the upper level.
    pub upper: usize,
    /// Rest wavelength, Angstrom.
    pub lam: f64,
    /// Absorption oscillator strength.
    pub f_lu: f64,
    /// Einstein A coefficient, 1/s.
    pub a_ul: f64,
    /// Einstein B coefficient (stimulated emission), in mean-intensity units.
    pub b_ul: f64,
    /// Einstein B coefficient (absorption).
    pub b_lu: f64,
    /// Rest-frame frequency, Hz (`c / lam`).
    pub nu: f64,
    /// Mean radiation field integrated over the line profile (set by
    /// `calculate_radiative_rates`).
    pub j_bar: f64,
    /// Sobolev optical depth.
    pub tau: f64,
    /// `exp(-tau)`.
    pub etau: f64,
    /// Sobolev escape probability, `(1 - etau) / tau`.
    pub beta: f64,
    /// Index of the frequency bin this line's rest frequency falls in.
    pub bin: usize,
}

impl Line {
    /// Compute the Sobolev optical depth/escape probability for this line
    /// given the current level populations of the owning atom
    /// (`nlte_atom::compute_sobolev_tau`).
    ///
    /// `n_dens` is the atom's total number density (cm^-3); `sigma_tot` and
    /// `c` come from [`crate::constants::Constants`]; `time` is the
    /// simulation time since explosion (s), which sets the homologous
    /// velocity gradient.
    pub fn update_sobolev_tau(
        &mut self,
        lower: &Level,
        upper: &Level,
        n_dens: f64,
        time: f64,
        sigma_tot: f64,
        c: f64,
        diagnostics: &mut crate::diagnostics::Diagnostics,
    ) {
        let nl = lower.n;
        let nu = upper.n;
        let gl = lower.g;
        let gu = upper.g;

        if nl < f64::MIN_POSITIVE {
            self.tau = 0.0;
            self.etau = 1.0;
            self.beta = 1.0;
            return;
        }

        let lam = c / self.nu;
        let mut tau = nl * n_dens * sigma_tot * self.f_lu * time * lam;
        // stimulated-emission correction.
        tau *= 1.0 - nu * gl / (nl * gu);

        if nu * gl > nl * gu {
            // laser regime: clamp rather than produce negative absorption.
            diagnostics.laser_regime_clamps += 1;
            self.tau = 0.0;
            self.etau = 1.0;
            self.beta = 1.0;
            return;
        }

        let etau = (-tau).exp();
        self.etau = etau;
        self.tau = tau;
        self.beta = if tau.abs() < 1e-8 { 1.0 } else { (1.0 - etau) / tau };
        // avoid -0.0 / numerical noise feeding back into the rate matrix.
        if !self.beta.is_finite() {
            self.beta = 1.0;
        }
    }
}

/// A light line-list entry used for the statistical "fuzz" expansion
/// opacity, too numerous to track populations and Sobolev taus for
/// individually.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct FuzzLine {
    /// Rest-frame frequency, Hz.
    pub nu: f64,
    /// Lower-level excitation energy, eV.
    pub e_l: f64,
    /// `g * f` (statistical weight times oscillator strength).
    pub gf: f64,
    /// Ionization stage this line belongs to.
    pub ion: i32,
    /// Index of the frequency bin this line's rest frequency falls in.
    pub bin: usize,
}

/// One chemical element's full level/line/ion data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Atom {
    /// Atomic number.
    pub z: i32,
    /// Number density of this atom, cm^-3 (set by the gas solver from the
    /// zone's density and mass fraction).
    pub n_dens: f64,
    /// Radioactive energy deposition rate into this atom's non-thermal
    /// rates, ergs/s/cm^3.
    pub e_gamma: f64,
    /// Include Sobolev escape-probability suppression in the NLTE rates.
    pub use_betas: bool,
    /// Suppress recombination to the ground level.
    pub no_ground_recomb: bool,

    pub ions: Vec<Ion>,
    pub levels: Vec<Level>,
    pub lines: Vec<Line>,
    pub fuzz_lines: Vec<FuzzLine>,
}

impl Atom {
    #[must_use]
    pub fn new(z: i32, ions: Vec<Ion>, levels: Vec<Level>, lines: Vec<Line>, fuzz_lines: Vec<FuzzLine>) -> Self {
        Self {
            z,
            n_dens: 0.0,
            e_gamma: 0.0,
            use_betas: false,
            no_ground_recomb: false,
            ions,
            levels,
            lines,
            fuzz_lines,
        }
    }

    #[must_use]
    pub fn n_ions(&self) -> usize {
        self.ions.len()
    }

    #[must_use]
    pub fn n_levels(&self) -> usize {
        self.levels.len()
    }

    #[must_use]
    pub fn n_lines(&self) -> usize {
        self.lines.len()
    }

    /// Mean ionization state: `sum_l n_l * ion(l)` (`nlte_atom::get_ion_frac`).
    #[must_use]
    pub fn ion_frac(&self) -> f64 {
        self.levels.iter().map(|l| l.n * l.ion as f64).sum()
    }

    /// Partition function of ionization `stage`, or `None` if not tracked.
    #[must_use]
    pub fn partition(&self, stage: i32) -> Option<f64> {
        self.ions.iter().find(|i| i.stage == stage).map(|i| i.part)
    }

    /// Ionization fraction of `stage`, `0.0` if not tracked.
    #[must_use]
    pub fn ion_population(&self, stage: i32) -> f64 {
        self.ions.iter().find(|i| i.stage == stage).map_or(0.0, |i| i.frac)
    }

    /// Recompute every line's Sobolev tau/beta from the current level
    /// populations (`nlte_atom::compute_sobolev_taus`).
    pub fn update_sobolev_taus(&mut self, time: f64, sigma_tot: f64, c: f64, diagnostics: &mut crate::diagnostics::Diagnostics) {
        for i in 0..self.lines.len() {
            let (lower, upper) = (self.lines[i].lower, self.lines[i].upper);
            let lo = self.levels[lower].clone();
            let up = self.levels[upper].clone();
            self.lines[i].update_sobolev_tau(&lo, &up, self.n_dens, time, sigma_tot, c, diagnostics);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_level_atom() -> Atom {
        let ions = vec![Ion {
            stage: 0,
            ground_level_id: 0,
            chi: 13.6,
            part: 1.0,
            frac: 1.0,
        }];
        let levels = vec![
            Level {
                ion: 0,
                ic: None,
                g: 1.0,
                e: 0.0,
                e_ion: 13.6,
                n: 0.5,
                n_lte: 0.5,
                b: 1.0,
                p_ic: 0.0,
                r_ci: 0.0,
                s_photo: XyTable::default(),
                a_rec: XyTable::default(),
            },
            Level {
                ion: 0,
                ic: None,
                g: 3.0,
                e: 10.2,
                e_ion: 3.4,
                n: 0.5,
                n_lte: 0.5,
                b: 1.0,
                p_ic: 0.0,
                r_ci: 0.0,
                s_photo: XyTable::default(),
                a_rec: XyTable::default(),
            },
        ];
        let lines = vec![Line {
            lower: 0,
            upper: 1,
            lam: 1215.67,
            f_lu: 0.416,
            a_ul: 4.7e8,
            b_ul: 0.0,
            b_lu: 0.0,
            nu: 2.47e15,
            j_bar: 0.0,
            tau: 0.0,
            etau: 1.0,
            beta: 1.0,
            bin: 0,
        }];
        Atom::new(1, ions, levels, lines, Vec::new())
    }

    #[test]
    fn xy_table_interpolates_linearly() {
        let t = XyTable::new(vec![0.0, 1.0, 2.0], vec![0.0, 10.0, 20.0]);
        assert!((t.value_at(0.5) - 5.0).abs() < 1e-9);
        assert_eq!(t.value_at_with_zero_edges(-1.0), 0.0);
        assert_eq!(t.value_at_with_zero_edges(3.0), 0.0);
    }

    #[test]
    fn sobolev_tau_goes_to_zero_for_empty_lower_level() {
        let mut atom = two_level_atom();
        atom.n_dens = 1e8;
        atom.levels[0].n = 0.0;
        atom.update_sobolev_taus(1.0e6, 2.654e-2, 3e10, &mut crate::diagnostics::Diagnostics::new());
        assert_eq!(atom.lines[0].tau, 0.0);
        assert_eq!(atom.lines[0].beta, 1.0);
    }

    #[test]
    fn sobolev_tau_beta_limit_large_tau() {
        let mut atom = two_level_atom();
        atom.n_dens = 1e12;
        atom.levels[0].n = 1.0;
        atom.levels[1].n = 1e-30;
        atom.update_sobolev_taus(1.0e6, 2.654e-2, 3e10, &mut crate::diagnostics::Diagnostics::new());
        let line = &atom.lines[0];
        assert!(line.tau > 100.0);
        assert!((line.beta - 1.0 / line.tau).abs() / (1.0 / line.tau) < 1e-3);
    }

    #[test]
    fn sobolev_tau_beta_limit_small_tau() {
        let mut atom = two_level_atom();
        atom.n_dens = 1.0;
        atom.levels[0].n = 1e-20;
        atom.levels[1].n = 1e-21;
        atom.update_sobolev_taus(1.0e6, 2.654e-2, 3e10, &mut crate::diagnostics::Diagnostics::new());
        let line = &atom.lines[0];
        assert!(line.tau < 1e-6);
        assert!((line.beta - 1.0).abs() < 1e-6);
    }

    #[test]
    fn laser_regime_clamped_to_zero_tau() {
        let mut atom = two_level_atom();
        atom.n_dens = 1e10;
        atom.levels[0].n = 1e-10;
        atom.levels[1].n = 1.0;
        let mut diagnostics = crate::diagnostics::Diagnostics::new();
        atom.update_sobolev_taus(1.0e6, 2.654e-2, 3e10, &mut diagnostics);
        assert_eq!(atom.lines[0].tau, 0.0);
        assert_eq!(atom.lines[0].beta, 1.0);
        assert_eq!(diagnostics.laser_regime_clamps, 1);
    }

    #[test]
    fn ion_frac_weights_by_level_population() {
        let atom = two_level_atom();
        // both levels ion == 0, so ion_frac should be zero.
        assert_eq!(atom.ion_frac(), 0.0);
    }
}
