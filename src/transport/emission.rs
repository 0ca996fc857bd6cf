//! New-packet emission: the first-step uniform thermal seed, core
//! (photosphere) emission, and radioactive gamma emission.
//!
//! Energy budget first (how many packets, how much energy each), then
//! per-packet position/direction/frequency sampling.

use crate::constants::{PI, SB};
use crate::grid::Grid;
use crate::packet::{PacketKind, Particle};
use crate::rng::PacketRng;

use super::geometry::rotate_by_angle;
use super::{sample_blackbody_frequency, Transport};

/// Push `p` onto the live-packet list, or record a truncation if the
/// configured cap has been reached.
fn try_push<G: Grid>(t: &mut Transport<G>, p: Particle) {
    if t.particles.len() >= t.config.particles.max_total {
        t.diagnostics.particles_truncated += 1;
        return;
    }
    t.particles.push(p);
}

/// Cosine-weighted (Lambertian) direction about outward normal `normal`
/// (`transport::emit_particles`'s core emission angle draw).
pub fn cosine_weighted_direction(normal: [f64; 3], rng: &mut PacketRng) -> [f64; 3] {
    let mu = rng.uniform().sqrt();
    let phi = 2.0 * PI * rng.uniform();
    rotate_by_angle(normal, mu, phi)
}

/// Sample a gamma-ray line energy (MeV) from the combined ⁵⁶Ni/⁵⁶Co line
/// list, weighted by `probability`.
pub fn sample_gamma_line_energy(rng: &mut PacketRng) -> f64 {
    use crate::radioactive::{CO56_LINES, NI56_LINES};

    let total: f64 = NI56_LINES.iter().chain(CO56_LINES.iter()).map(|l| l.probability).sum();
    let mut u = rng.uniform() * total;
    for line in NI56_LINES.iter().chain(CO56_LINES.iter()) {
        if u < line.probability {
            return line.energy_mev;
        }
        u -= line.probability;
    }
    NI56_LINES[0].energy_mev
}

/// Seed a uniform thermal packet population on the first step only:
/// `n_initialize` packets per zone, each carrying an equal share of
/// `e_rad * zone_volume`, frequency sampled from a blackbody at
/// `zone.t_rad`.
pub fn seed_initial_particles<G: Grid>(t: &mut Transport<G>) {
    let n_per_zone = t.config.particles.n_initialize;
    if n_per_zone == 0 {
        return;
    }

    for i in 0..t.grid.n_zones() {
        let (e_rad, t_rad, vol) = {
            let zone = t.grid.zone(i);
            (zone.e_rad, zone.t_rad, t.grid.zone_volume(i))
        };
        if e_rad <= 0.0 || t_rad <= 0.0 {
            continue;
        }
        let e_per_packet = e_rad * vol / n_per_zone as f64;

        for _ in 0..n_per_zone {
            let u = [t.emission_rng.uniform(), t.emission_rng.uniform(), t.emission_rng.uniform()];
            let position = t.grid.sample_in_zone(i, u);
            let mu = 2.0 * t.emission_rng.uniform() - 1.0;
            let phi = 2.0 * PI * t.emission_rng.uniform();
            let direction = rotate_by_angle([0.0, 0.0, 1.0], mu, phi);
            let frequency = sample_blackbody_frequency(&t.nu_grid, t_rad, &mut t.emission_rng);
            let p = Particle::new(position, direction, frequency, e_per_packet, t.t_now, i, PacketKind::Photon);
            try_push(t, p);
        }
    }
}

/// Emit packets from the inner-boundary "core" (photosphere), if
/// configured. Position sampled uniformly on the core sphere, direction
/// Lambertian about the local outward normal, frequency from the core's
/// blackbody CDF.
fn emit_core<G: Grid>(t: &mut Transport<G>, dt: f64, t_start: f64) {
    let core = t.config.core.clone();
    if core.radius <= 0.0 || core.n_emit == 0 {
        return;
    }

    let luminosity = if core.luminosity > 0.0 {
        core.luminosity
    } else {
        4.0 * PI * core.radius * core.radius * SB * core.temperature.powi(4)
    };
    let total_energy = luminosity * dt;
    if total_energy <= 0.0 {
        return;
    }
    let e_per_packet = total_energy / core.n_emit as f64;

    for _ in 0..core.n_emit {
        let mu = 2.0 * t.emission_rng.uniform() - 1.0;
        let phi = 2.0 * PI * t.emission_rng.uniform();
        let sin_theta = (1.0 - mu * mu).max(0.0).sqrt();
        let position = [core.radius * sin_theta * phi.cos(), core.radius * sin_theta * phi.sin(), core.radius * mu];
        let normal = super::geometry::normalize(position);
        let direction = cosine_weighted_direction(normal, &mut t.emission_rng);

        let frequency = if t.core_emis.total() > 0.0 {
            let (bin, nu) = t.core_emis.sample_with_value(&t.nu_grid, t.emission_rng.uniform(), t.emission_rng.uniform());
            let _ = bin;
            nu
        } else {
            sample_blackbody_frequency(&t.nu_grid, core.temperature, &mut t.emission_rng)
        };

        let time = t_start + t.emission_rng.uniform() * dt;
        let zone = match t.grid.get_zone(position) {
            crate::grid::ZoneLookup::Zone(i) => i,
            crate::grid::ZoneLookup::OutOfDomain => 0,
        };
        let p = Particle::new(position, direction, frequency, e_per_packet, time, zone, PacketKind::Photon);
        try_push(t, p);
    }
}

/// Emit radioactive-decay gamma-ray packets per zone, count determined by
/// Bernoulli-rounding each zone's share of the total decay energy against
/// a target total packet count.
fn emit_radioactive<G: Grid>(t: &mut Transport<G>, dt: f64, t_start: f64) {
    let target_total = t.config.particles.n_emit_radioactive;
    if target_total == 0 {
        return;
    }

    let zone_energy: Vec<f64> = (0..t.grid.n_zones()).map(|i| t.grid.zone(i).l_radio_emit * dt).collect();
    let total_energy: f64 = zone_energy.iter().sum();
    if total_energy <= 0.0 {
        return;
    }
    let e_per_packet = total_energy / target_total as f64;

    for i in 0..t.grid.n_zones() {
        if zone_energy[i] <= 0.0 {
            continue;
        }
        let expected = zone_energy[i] / e_per_packet;
        let n_whole = expected.floor() as usize;
        let frac = expected - n_whole as f64;
        let n_this_zone = if t.emission_rng.uniform() < frac { n_whole + 1 } else { n_whole };
        if n_this_zone == 0 {
            continue;
        }

        for _ in 0..n_this_zone {
            let u = [t.emission_rng.uniform(), t.emission_rng.uniform(), t.emission_rng.uniform()];
            let position = t.grid.sample_in_zone(i, u);
            let mu = 2.0 * t.emission_rng.uniform() - 1.0;
            let phi = 2.0 * PI * t.emission_rng.uniform();
            let direction = rotate_by_angle([0.0, 0.0, 1.0], mu, phi);
            let e_mev = sample_gamma_line_energy(&mut t.emission_rng);
            let frequency = e_mev * crate::constants::MEV_TO_ERGS / t.constants.h;
            let time = t_start + t.emission_rng.uniform() * dt;
            let p = Particle::new(position, direction, frequency, e_per_packet, time, i, PacketKind::GammaRay);
            try_push(t, p);
        }
    }
}

/// Emit this step's new packets: core photosphere emission, then
/// radioactive decay emission.
pub fn emit_particles<G: Grid>(t: &mut Transport<G>, dt: f64, t_start: f64) {
    emit_core(t, dt, t_start);
    emit_radioactive(t, dt, t_start);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CoreConfig, ParticleConfig};
    use crate::grid::Sphere1D;

    fn test_transport(n_emit_radioactive: usize) -> Transport<Sphere1D> {
        use crate::config::{DiffusionConfig, NuGridConfig, OpacityConfig, SpectrumConfig, TemperatureLimits, TransportConfig};
        use crate::config::GasConfig;
        use crate::transport::WorkerContext;

        let mut grid = Sphere1D::uniform(1.0e14, 3, 1.0e5, 4, vec![28], vec![56]);
        for i in 0..grid.n_zones() {
            let zone = grid.zone_mut(i);
            zone.rho = 1e-10;
            zone.t_rad = 5000.0;
            zone.e_rad = 1.0e-4;
            zone.x_gas = vec![1.0];
            zone.l_radio_emit = 1.0e30;
        }
        let config = TransportConfig {
            radiative_equilibrium: false,
            steady_iterate: 0,
            nu_grid: NuGridConfig { nu_min: 1e14, nu_max: 1e15, delta_nu: 2.5e14, log: false },
            particles: ParticleConfig { step_size: 0.1, max_total: 1000, n_initialize: 3, n_emit_radioactive },
            core: CoreConfig { radius: 1.0e13, temperature: 5000.0, luminosity: 0.0, n_emit: 5, spectrum_file: None },
            spectrum: SpectrumConfig { time_grid: vec![0.0, 1e6, 2e6], nu_grid: vec![1e14, 1e15], n_mu: 2, n_phi: 2 },
            temperature_limits: TemperatureLimits::default(),
            diffusion: DiffusionConfig::default(),
            line_velocity_width: 0.001,
            base_seed: 5,
        };
        Transport::new(grid, Vec::new(), config, OpacityConfig::default(), GasConfig::default(), WorkerContext::single())
    }

    #[test]
    fn seed_initial_particles_populates_every_zone() {
        let mut t = test_transport(0);
        seed_initial_particles(&mut t);
        assert_eq!(t.particles.len(), 3 * t.grid.n_zones());
    }

    #[test]
    fn emit_core_produces_photons_with_positive_energy() {
        let mut t = test_transport(0);
        emit_core(&mut t, 1.0e4, 0.0);
        assert_eq!(t.particles.len(), 5);
        assert!(t.particles.iter().all(|p| p.energy > 0.0 && p.kind == PacketKind::Photon));
    }

    #[test]
    fn emit_radioactive_produces_gamma_rays() {
        let mut t = test_transport(6);
        emit_radioactive(&mut t, 1.0e4, 0.0);
        assert!(!t.particles.is_empty());
        assert!(t.particles.iter().all(|p| p.kind == PacketKind::GammaRay));
    }

    #[test]
    fn sample_gamma_line_energy_is_one_of_the_tabulated_lines() {
        use crate::radioactive::{CO56_LINES, NI56_LINES};
        let mut rng = PacketRng::seeded(21, 0, 0);
        for _ in 0..20 {
            let e = sample_gamma_line_energy(&mut rng);
            assert!(NI56_LINES.iter().chain(CO56_LINES.iter()).any(|l| (l.energy_mev - e).abs() < 1e-9));
        }
    }
}
