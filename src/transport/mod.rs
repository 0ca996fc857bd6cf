//! Transport: orchestrates one simulation step across the packet
//! population, grid, gas states, and opacity tables.
//!
//! Submodules follow the natural method-group split (emission,
//! propagation, scattering, diffusion, equilibrium) rather than one
//! monolithic `step`.

pub mod diffusion;
pub mod emission;
pub mod equilibrium;
pub mod propagate;
pub mod scatter;

pub(crate) mod geometry {
    //! Small vector-rotation helpers shared by emission and scattering
    //! direction sampling.

    #[must_use]
    pub fn cross(a: [f64; 3], b: [f64; 3]) -> [f64; 3] {
        [a[1] * b[2] - a[2] * b[1], a[2] * b[0] - a[0] * b[2], a[0] * b[1] - a[1] * b[0]]
    }

    #[must_use]
    pub fn normalize(v: [f64; 3]) -> [f64; 3] {
        let n = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        if n <= 0.0 {
            return [0.0, 0.0, 1.0];
        }
        [v[0] / n, v[1] / n, v[2] / n]
    }

    #[must_use]
    pub fn orthonormal_basis(n: [f64; 3]) -> ([f64; 3], [f64; 3]) {
        let a = if n[0].abs() < 0.9 { [1.0, 0.0, 0.0] } else { [0.0, 1.0, 0.0] };
        let t1 = normalize(cross(n, a));
        let t2 = cross(n, t1);
        (t1, t2)
    }

    /// Build a direction at polar-angle cosine `mu` and azimuth `phi`
    /// relative to `axis`.
    #[must_use]
    pub fn rotate_by_angle(axis: [f64; 3], mu: f64, phi: f64) -> [f64; 3] {
        let sin_theta = (1.0 - mu * mu).max(0.0).sqrt();
        let (t1, t2) = orthonormal_basis(axis);
        let mut out = [0.0; 3];
        for k in 0..3 {
            out[k] = mu * axis[k] + sin_theta * (phi.cos() * t1[k] + phi.sin() * t2[k]);
        }
        out
    }
}

use crate::atom::Atom;
use crate::cdf_array::CdfArray;
use crate::config::{GasConfig, NuGridConfig, OpacityConfig, SpectrumConfig, TransportConfig};
use crate::constants::{blackbody_nu, Constants};
use crate::diagnostics::Diagnostics;
use crate::gas::Gas;
use crate::grid::Grid;
use crate::locate_array::LocateArray;
use crate::packet::{PacketKind, Particle, ParticleFate, ZoneIndex};
use crate::radioactive;
use crate::rng::PacketRng;
use crate::spectrum::Spectrum;

pub use diffusion::DiffusionState;
pub use propagate::{EscapeRecord, PropagateOutcome, TallyDelta};

/// Identifies this process among cooperating workers and provides the
/// all-reduce hook tally reduction needs. MPI bootstrap itself is out of
/// scope; a single-process run uses [`WorkerContext::single`].
pub struct WorkerContext {
    pub rank: u32,
    pub n_ranks: u32,
    reduce_fn: Box<dyn FnMut(&mut [f64]) + Send>,
}

impl WorkerContext {
    /// A lone worker with no cooperating ranks; `all_reduce_sum` is a no-op.
    #[must_use]
    pub fn single() -> Self {
        Self { rank: 0, n_ranks: 1, reduce_fn: Box::new(|_| {}) }
    }

    /// Build a worker context backed by a caller-supplied all-reduce-sum
    /// (e.g. an MPI `Allreduce` wrapper).
    #[must_use]
    pub fn with_reducer(rank: u32, n_ranks: u32, reduce_fn: Box<dyn FnMut(&mut [f64]) + Send>) -> Self {
        Self { rank, n_ranks, reduce_fn }
    }

    /// Sum `values` element-wise across every cooperating rank, in place.
    pub fn all_reduce_sum(&mut self, values: &mut [f64]) {
        (self.reduce_fn)(values);
    }
}

/// The full radiative-transfer engine state for one run.
pub struct Transport<G: Grid> {
    pub grid: G,
    pub gas_states: Vec<Gas>,
    pub nu_grid: LocateArray,
    /// Core emission frequency CDF, built once from a blackbody at
    /// `config.core.temperature`. Tabulated spectrum files (`core_spectrum_file`)
    /// are an I/O concern out of scope, so the core always emits a
    /// blackbody spectrum here.
    pub core_emis: CdfArray,
    pub particles: Vec<Particle>,
    pub optical_spectrum: Spectrum,
    pub gamma_spectrum: Spectrum,
    pub t_now: f64,
    pub first_step: bool,
    pub config: TransportConfig,
    pub opacity_config: OpacityConfig,
    pub gas_config: GasConfig,
    pub constants: Constants,
    pub worker: WorkerContext,
    pub diagnostics: Diagnostics,
    /// Single-stream RNG for emission sampling (core/radioactive/initial
    /// thermal packets), kept separate from the per-packet propagation
    /// streams since emission runs serially before the parallel phase.
    emission_rng: PacketRng,
}

impl<G: Grid> Transport<G> {
    /// Build a transport engine from a grid already populated with
    /// `rho`/`t_gas`/`x_gas`/`e_rad`, one gas state per zone seeded with a
    /// clone of `atoms_template`.
    ///
    /// # Panics
    ///
    /// Panics if any zone's `j_nu`/opacity arrays were not sized to match
    /// `config.nu_grid`.
    #[must_use]
    pub fn new(
        grid: G,
        atoms_template: Vec<Atom>,
        config: TransportConfig,
        opacity_config: OpacityConfig,
        gas_config: GasConfig,
        worker: WorkerContext,
    ) -> Self {
        let constants = Constants::default();
        let nu_grid = build_nu_grid(&config.nu_grid);
        for i in 0..grid.n_zones() {
            assert_eq!(grid.zone(i).j_nu.len(), nu_grid.size(), "zone {i} was not sized for transport_nu_grid");
        }

        let use_nlte = opacity_config.flags.contains(crate::config::OpacityFlags::USE_NLTE);
        let gas_states = (0..grid.n_zones())
            .map(|i| {
                let zone = grid.zone(i);
                let mut gas = Gas::new(zone.rho, grid.elems_a().to_vec(), zone.x_gas.clone(), atoms_template.clone(), use_nlte);
                gas.nlte_beta_tolerance = gas_config.nlte_beta_tolerance;
                gas.nlte_max_iterations = gas_config.nlte_max_iterations;
                gas
            })
            .collect();

        let core_emis = build_core_cdf(&nu_grid, config.core.temperature);
        let optical_spectrum = build_spectrum(&config.spectrum);
        let gamma_spectrum = build_spectrum(&config.spectrum);
        let emission_rng = PacketRng::seeded(config.base_seed, worker.rank, u32::MAX);

        Self {
            grid,
            gas_states,
            nu_grid,
            core_emis,
            particles: Vec::new(),
            optical_spectrum,
            gamma_spectrum,
            t_now: 0.0,
            first_step: true,
            config,
            opacity_config,
            gas_config,
            constants,
            worker,
            diagnostics: Diagnostics::new(),
            emission_rng,
        }
    }

    /// Advance the simulation by `dt` seconds: recompute
    /// composition/opacity, emit new packets, propagate every live
    /// packet, reduce tallies, and (if enabled) solve for radiative
    /// equilibrium.
    pub fn step(&mut self, dt: f64) {
        let t_start = self.t_now;
        self.t_now += dt;
        let t_stop = self.t_now;

        self.wipe_tallies();
        self.decay_composition(dt);
        self.compute_opacity();
        if self.first_step {
            emission::seed_initial_particles(self);
        }
        emission::emit_particles(self, dt, t_start);
        self.propagate_all(t_stop);
        self.reduce_radiation(dt);
        if self.config.radiative_equilibrium {
            equilibrium::solve_eq_temperature(self, dt);
        }
        self.first_step = false;
    }

    fn wipe_tallies(&mut self) {
        for i in 0..self.grid.n_zones() {
            self.grid.zone_mut(i).wipe_tallies();
        }
    }

    /// Evolve each zone's composition under radioactive decay and derive
    /// this step's decay-luminosity tally.
    fn decay_composition(&mut self, dt: f64) {
        let elems_z = self.grid.elems_z().to_vec();
        let elems_a = self.grid.elems_a().to_vec();
        for i in 0..self.grid.n_zones() {
            let vol = self.grid.zone_volume(i);
            let zone = self.grid.zone_mut(i);
            radioactive::decay_composition(&elems_z, &elems_a, &mut zone.x_gas, self.t_now);
            let (l_decay_vol, _gfrac) = radioactive::decay(&elems_z, &elems_a, &zone.x_gas, zone.rho, self.t_now, false);
            zone.l_radio_emit = l_decay_vol * vol;
            let mass_frac = zone.x_gas.clone();
            self.gas_states[i].mass_frac = mass_frac.clone();
            // split the zone's non-thermal deposition among its atoms in
            // proportion to mass fraction; drives `set_rates`'s ground-level
            // radioactive excitation term.
            for (k, atom) in self.gas_states[i].atoms.iter_mut().enumerate() {
                atom.e_gamma = l_decay_vol * mass_frac.get(k).copied().unwrap_or(0.0);
            }
            let _ = dt;
        }
    }

    /// Solve each zone's gas state and recompute its opacity/emissivity
    /// tables.
    fn compute_opacity(&mut self) {
        let elems_a = self.grid.elems_a().to_vec();
        for i in 0..self.grid.n_zones() {
            let t_gas = self.grid.zone(i).t_gas;
            let j_nu = self.grid.zone(i).j_nu.clone();
            let _status = self.gas_states[i].solve_state(t_gas, self.t_now, &self.nu_grid, &j_nu, &self.constants, &mut self.diagnostics);
            self.gas_states[i].update_line_opacities(self.constants.sigma_tot, self.constants.c, &mut self.diagnostics);

            let rho = self.grid.zone(i).rho;
            let n_e = self.gas_states[i].n_e;
            let tables = crate::opacity::compute_opacity(
                &self.nu_grid,
                &self.gas_states[i].atoms,
                &elems_a,
                &self.gas_states[i].mass_frac,
                rho,
                n_e,
                t_gas,
                self.t_now,
                self.opacity_config.flags,
                self.opacity_config.grey,
                self.config.line_velocity_width,
                &self.constants,
            );

            let line_opacity: Vec<f64> = self.gas_states[i].atoms.iter().flat_map(|a| a.lines.iter().map(|l| l.tau)).collect();

            let zone = self.grid.zone_mut(i);
            zone.abs_opac = tables.abs_opac;
            zone.scat_opac = tables.scat_opac;
            zone.emissivity = tables.emissivity;
            zone.planck_mean_opacity = tables.planck_mean_opacity;
            zone.line_opacity = line_opacity;
        }
    }

    /// Run every live packet's flight loop in parallel, then merge tally
    /// deltas, escaped-packet spectra, and diagnostics back sequentially
    /// at a barrier.
    fn propagate_all(&mut self, t_stop: f64) {
        let diffusion_states = diffusion::compute_diffusion_probabilities(&self.grid, self.config.diffusion.tau_ddmc);
        let use_imd = self.config.diffusion.use_imd;
        let radiative_equilibrium = self.config.radiative_equilibrium;
        let base_seed = self.config.base_seed;
        let rank = self.worker.rank;
        let grid = &self.grid;
        let nu_grid = &self.nu_grid;
        let constants = self.constants;

        let outcomes: Vec<PropagateOutcome> = {
            use rayon::prelude::*;
            self.particles
                .par_iter_mut()
                .enumerate()
                .map(|(idx, p)| {
                    let mut rng = PacketRng::seeded(base_seed, rank, idx as u32);
                    propagate::propagate(p, t_stop, grid, nu_grid, &diffusion_states, &constants, radiative_equilibrium, use_imd, &mut rng)
                })
                .collect()
        };

        let mut survivors = Vec::with_capacity(self.particles.len());
        for (p, outcome) in self.particles.drain(..).zip(outcomes.into_iter()) {
            for td in &outcome.tallies {
                let zone = self.grid.zone_mut(td.zone);
                if td.bin < zone.j_nu.len() {
                    zone.j_nu[td.bin] += td.j_nu;
                }
                zone.e_abs += td.e_abs;
            }
            self.diagnostics.merge(&outcome.diagnostics);
            match outcome.fate {
                ParticleFate::Escaped => {
                    if let Some(rec) = outcome.escape {
                        match rec.kind {
                            PacketKind::Photon => self.optical_spectrum.record(rec.t, rec.nu, rec.mu, rec.phi, rec.energy),
                            PacketKind::GammaRay => self.gamma_spectrum.record(rec.t, rec.nu, rec.mu, rec.phi, rec.energy),
                        }
                    }
                }
                ParticleFate::Absorbed => {}
                ParticleFate::Stopped | ParticleFate::Alive | ParticleFate::Scattered => survivors.push(p),
            }
        }
        self.particles = survivors;
    }

    /// Normalize each zone's path-length `J_nu` tally into proper
    /// erg/(s cm^2 Hz sr) units and all-reduce it and `e_abs` across
    /// workers.
    fn reduce_radiation(&mut self, dt: f64) {
        let n_zones = self.grid.n_zones();
        let n_bins = self.nu_grid.size();
        let mut buf = Vec::with_capacity(n_zones * (1 + n_bins));
        for i in 0..n_zones {
            let zone = self.grid.zone(i);
            buf.push(zone.e_abs);
            buf.extend_from_slice(&zone.j_nu);
        }

        self.worker.all_reduce_sum(&mut buf);

        let mut idx = 0;
        for i in 0..n_zones {
            let vol = self.grid.zone_volume(i);
            let zone = self.grid.zone_mut(i);
            zone.e_abs = buf[idx];
            idx += 1;
            for b in 0..n_bins {
                let raw = buf[idx];
                idx += 1;
                let delta_nu = self.nu_grid.delta(b);
                let norm = 4.0 * crate::constants::PI * vol * dt * delta_nu;
                zone.j_nu[b] = if norm > 0.0 { raw / norm } else { 0.0 };
            }
        }
    }
}

fn build_nu_grid(cfg: &NuGridConfig) -> LocateArray {
    if cfg.log {
        LocateArray::log_spaced(cfg.nu_min, cfg.nu_max, cfg.delta_nu)
    } else {
        LocateArray::linear_with_step(cfg.nu_min, cfg.nu_max, cfg.delta_nu)
    }
}

fn build_core_cdf(nu_grid: &LocateArray, temperature: f64) -> CdfArray {
    let mut cdf = CdfArray::with_capacity(nu_grid.size());
    if temperature <= 0.0 {
        return cdf;
    }
    for i in 0..nu_grid.size() {
        let nu = nu_grid.center(i);
        cdf.push(blackbody_nu(temperature, nu) * nu_grid.delta(i));
    }
    cdf.normalize();
    cdf
}

fn build_spectrum(cfg: &SpectrumConfig) -> Spectrum {
    Spectrum::new(cfg.time_grid.clone(), cfg.nu_grid.clone(), cfg.n_mu, cfg.n_phi)
}

/// Sample a frequency from a blackbody at `temp`, built fresh each call
/// since this is only used for one-time first-step thermal seeding.
fn sample_blackbody_frequency(nu_grid: &LocateArray, temp: f64, rng: &mut PacketRng) -> f64 {
    let mut cdf = CdfArray::with_capacity(nu_grid.size());
    for i in 0..nu_grid.size() {
        cdf.push(blackbody_nu(temp, nu_grid.center(i)) * nu_grid.delta(i));
    }
    cdf.normalize();
    if cdf.total() <= 0.0 {
        return nu_grid.center(nu_grid.size() / 2);
    }
    cdf.sample_with_value(nu_grid, rng.uniform(), rng.uniform()).1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoreConfig, DiffusionConfig, NuGridConfig, ParticleConfig, SpectrumConfig, TemperatureLimits};
    use crate::grid::Sphere1D;

    fn small_config() -> TransportConfig {
        TransportConfig {
            radiative_equilibrium: false,
            steady_iterate: 0,
            nu_grid: NuGridConfig { nu_min: 1e14, nu_max: 1e15, delta_nu: 1e14, log: false },
            particles: ParticleConfig { step_size: 0.1, max_total: 10_000, n_initialize: 2, n_emit_radioactive: 4 },
            core: CoreConfig { radius: 0.0, temperature: 0.0, luminosity: 0.0, n_emit: 0, spectrum_file: None },
            spectrum: SpectrumConfig { time_grid: vec![0.0, 1e6, 2e6], nu_grid: vec![1e14, 1e15], n_mu: 2, n_phi: 2 },
            temperature_limits: TemperatureLimits::default(),
            diffusion: DiffusionConfig::default(),
            line_velocity_width: 0.001,
            base_seed: 7,
        }
    }

    fn tiny_grid() -> Sphere1D {
        let mut g = Sphere1D::uniform(1.0e14, 3, 1.0e5, 9, vec![28], vec![56]);
        for i in 0..g.n_zones() {
            let zone = g.zone_mut(i);
            zone.rho = 1e-10;
            zone.t_gas = 5000.0;
            zone.t_rad = 5000.0;
            zone.e_rad = 1.0e-4;
            zone.x_gas = vec![1.0];
        }
        g
    }

    fn dummy_atom() -> Atom {
        use crate::atom::{Ion, Level};
        let ions = vec![Ion { stage: 0, ground_level_id: 0, chi: 7.9, part: 1.0, frac: 1.0 }];
        let levels = vec![Level {
            ion: 0,
            ic: None,
            g: 1.0,
            e: 0.0,
            e_ion: 7.9,
            n: 1.0,
            n_lte: 1.0,
            b: 1.0,
            p_ic: 0.0,
            r_ci: 0.0,
            s_photo: Default::default(),
            a_rec: Default::default(),
        }];
        Atom::new(28, ions, levels, Vec::new(), Vec::new())
    }

    #[test]
    fn step_seeds_and_propagates_without_panicking() {
        let grid = tiny_grid();
        let atoms = vec![dummy_atom()];
        let mut t = Transport::new(grid, atoms, small_config(), OpacityConfig::default(), GasConfig::default(), WorkerContext::single());
        t.step(1.0e4);
        assert!(!t.first_step);
    }

    #[test]
    fn worker_context_single_reduce_is_identity() {
        let mut worker = WorkerContext::single();
        let mut vals = vec![1.0, 2.0, 3.0];
        worker.all_reduce_sum(&mut vals);
        assert_eq!(vals, vec![1.0, 2.0, 3.0]);
    }
}
