//! Scattering kernels: isotropic Thomson scattering for optical photons,
//! Compton/Klein-Nishina scattering for gamma-rays.
//!
//! A kind-based branch picks an isotropic vs. a Klein-Nishina-weighted
//! direction draw; the latter rejection-samples the Klein-Nishina
//! differential cross section in terms of `mu = cos(theta)`.

use crate::constants::Constants;
use crate::grid::Grid;
use crate::packet::{PacketKind, Particle};
use crate::rng::PacketRng;

use super::geometry::rotate_by_angle;
use super::propagate::{comoving_to_lab_energy, comoving_to_lab_frequency, doppler_factor, lab_to_comoving_energy, lab_to_comoving_frequency};

/// A uniformly distributed direction on the unit sphere.
pub fn isotropic_direction(rng: &mut PacketRng) -> [f64; 3] {
    let mu = 2.0 * rng.uniform() - 1.0;
    let phi = 2.0 * crate::constants::PI * rng.uniform();
    rotate_by_angle([0.0, 0.0, 1.0], mu, phi)
}

/// Klein-Nishina differential cross section shape in `mu`, unnormalized
/// (proportional to `dsigma/dOmega`), for a photon of reduced energy
/// `alpha = h*nu/(m_e c^2)` scattering to angle `mu`.
fn klein_nishina_shape(alpha: f64, mu: f64) -> f64 {
    let ratio = 1.0 / (1.0 + alpha * (1.0 - mu));
    ratio * ratio * (ratio + 1.0 / ratio - (1.0 - mu * mu))
}

/// Rejection-sample `mu = cos(theta)` from the Klein-Nishina differential
/// cross section at reduced energy `alpha`. The envelope `2.0` bounds the
/// unnormalized shape function, which is at most `2` for any `alpha >= 0`
/// (the Thomson limit `alpha -> 0` recovers `1 + mu^2 <= 2`).
pub fn sample_compton_mu(alpha: f64, rng: &mut PacketRng) -> f64 {
    loop {
        let mu = 2.0 * rng.uniform() - 1.0;
        let f = klein_nishina_shape(alpha, mu);
        if rng.uniform() * 2.0 <= f {
            return mu;
        }
    }
}

/// Compton-scatter a gamma-ray packet: draw a new direction via
/// Klein-Nishina rejection sampling, apply the Compton frequency shift,
/// and rescale the comoving-frame energy by the frequency ratio (packet
/// energy represents a fixed photon count at decreasing per-photon
/// energy).
fn compton_scatter(nu_cmf_in: f64, e_cmf_in: f64, direction: [f64; 3], constants: &Constants, rng: &mut PacketRng) -> (f64, f64, [f64; 3]) {
    let alpha = constants.h * nu_cmf_in / (constants.m_e * constants.c * constants.c);
    let mu = sample_compton_mu(alpha, rng);
    let phi = 2.0 * crate::constants::PI * rng.uniform();
    let new_dir = rotate_by_angle(direction, mu, phi);

    let nu_cmf_out = nu_cmf_in / (1.0 + alpha * (1.0 - mu));
    let e_cmf_out = e_cmf_in * (nu_cmf_out / nu_cmf_in);
    (nu_cmf_out, e_cmf_out, new_dir)
}

/// Scatter a packet in place: isotropic for optical photons, Compton for
/// gamma-rays. Converts to the comoving frame under the old direction,
/// applies the scattering kernel, then converts back under the new
/// direction.
pub fn do_scatter<G: Grid>(p: &mut Particle, grid: &G, constants: &Constants, rng: &mut PacketRng) {
    let Some(zone) = p.zone_index.zone() else { return };
    let d_old = doppler_factor(grid, zone, p.position, p.direction, constants.c);
    let nu_cmf = lab_to_comoving_frequency(p.frequency, d_old);
    let e_cmf = lab_to_comoving_energy(p.energy, d_old);

    let (nu_cmf_out, e_cmf_out, new_dir) = match p.kind {
        PacketKind::Photon => {
            let dir = isotropic_direction(rng);
            (nu_cmf, e_cmf, dir)
        }
        PacketKind::GammaRay => compton_scatter(nu_cmf, e_cmf, p.direction, constants, rng),
    };

    p.direction = new_dir;
    let d_new = doppler_factor(grid, zone, p.position, p.direction, constants.c);
    p.frequency = comoving_to_lab_frequency(nu_cmf_out, d_new);
    p.energy = comoving_to_lab_energy(e_cmf_out, d_new);
}
