//! Discrete Diffusion Monte Carlo / Implicit Monte Carlo Diffusion
//! acceleration for optically thick zones.
//!
//! Activated per zone when `tau_cell = kappa * rho * dx > tau_ddmc`, a
//! packet in an active zone hops between zone faces by discrete leak
//! probabilities rather than a continuous random flight, which is what
//! makes DDMC cheap where the mean free path is far below the step size.
//! Each call runs the packet's full excursion through however many hops
//! fit in `dt_remaining` (a `while (dt_remaining > 0.0)` loop), not a
//! single weighted coin flip.

use crate::grid::Grid;
use crate::packet::{Particle, ParticleFate, ZoneIndex};
use crate::rng::PacketRng;

use super::propagate::TallyDelta;

/// Per-zone precomputed leakage rates, built once per step before the
/// parallel propagation phase.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiffusionState {
    /// `tau_cell > tau_ddmc` for this zone.
    pub active: bool,
    pub tau_cell: f64,
    /// Leakage rate toward the next-outward zone, cm^-1. At the outermost
    /// zone the missing neighbor is stood in for by this zone's own
    /// opacity/size, which is what lets a packet leak out through the
    /// domain edge into `Escaped` rather than being trapped forever.
    pub sigma_leak_out: f64,
    /// Leakage rate toward the next-inward zone, cm^-1. Always `0` at
    /// the innermost zone: no inward leak through the grid center.
    pub sigma_leak_in: f64,
    /// Probability of true absorption this hop. Always `0`: kept
    /// computed but inert rather than inventing an activation switch.
    pub p_abs: f64,
}

/// Build every zone's [`DiffusionState`] for one step. `kappa` is each
/// zone's Planck-mean opacity, the closest analogue `Zone` has to a
/// single scalar diffusion coefficient.
pub fn compute_diffusion_probabilities<G: Grid>(grid: &G, tau_ddmc: f64) -> Vec<DiffusionState> {
    let n = grid.n_zones();
    let mut states = vec![DiffusionState::default(); n];

    for i in 0..n {
        let dx_i = grid.zone_size(i).max(1e-300);
        let kappa_i = (grid.zone(i).planck_mean_opacity * grid.zone(i).rho).max(1e-300);
        let tau_cell = kappa_i * dx_i;
        states[i].tau_cell = tau_cell;
        states[i].active = tau_cell > tau_ddmc;
        if !states[i].active {
            continue;
        }

        let (dx_out, kappa_out) = if i + 1 < n {
            (grid.zone_size(i + 1), (grid.zone(i + 1).planck_mean_opacity * grid.zone(i + 1).rho).max(1e-300))
        } else {
            (dx_i, kappa_i)
        };
        states[i].sigma_leak_out = (2.0 / (3.0 * dx_i)) / (kappa_i * dx_i + kappa_out * dx_out);

        states[i].sigma_leak_in = if i > 0 {
            let dx_in = grid.zone_size(i - 1);
            let kappa_in = (grid.zone(i - 1).planck_mean_opacity * grid.zone(i - 1).rho).max(1e-300);
            (2.0 / (3.0 * dx_i)) / (kappa_i * dx_i + kappa_in * dx_in)
        } else {
            0.0
        };

        states[i].p_abs = 0.0;
    }

    states
}

/// One packet's full discrete-diffusion excursion while it remains inside
/// DDMC/IMD-active zones: ends when it hops into a non-active zone (caller
/// resumes continuous random flight), escapes, is absorbed, or exhausts
/// `dt_remaining` (`Stopped`).
pub struct DiffusionResult {
    pub fate: ParticleFate,
    /// Tally deltas accumulated over every hop, keyed by the zone each hop
    /// occurred in (a multi-hop excursion can cross several zones).
    pub tallies: Vec<TallyDelta>,
}

/// Move a packet's `zone_index` one zone in direction `delta` (`+1`
/// outward, `-1` inward), escaping through the outer boundary or being
/// absorbed through the (nonexistent) inner one. Position is snapped to
/// the crossed face along the packet's current direction so later
/// continuous-flight geometry stays consistent.
fn advance_zone<G: Grid>(p: &mut Particle, grid: &G, zone: usize, delta: i64) {
    let n = grid.n_zones() as i64;
    let next = zone as i64 + delta;
    if next < 0 {
        p.zone_index = ZoneIndex::Absorbed;
        return;
    }
    if next >= n {
        p.zone_index = ZoneIndex::Escaped;
        return;
    }
    let new_zone = next as usize;
    let d = grid.distance_to_boundary(zone, p.position, p.direction);
    if d.is_finite() {
        p.advance(d, crate::constants::C);
    }
    p.zone_index = ZoneIndex::Zone(new_zone);
}

/// Advect a packet with the local homologous fluid flow (`v = r/t` radially
/// outward), the closest a packet gets to "stationary in the comoving
/// frame" between hops. `Grid::velocity` only exposes the component along
/// a caller-supplied direction, so the radial unit vector is passed in to
/// recover the full displacement (`discrete_diffusion.cpp`'s `get_velocity`
/// returns a full 3-vector; this trait does not).
fn advect_homologous<G: Grid>(p: &mut Particle, grid: &G, zone: usize, dt: f64) {
    let r = p.radius();
    if r <= 0.0 {
        return;
    }
    let radial_dir = [p.position[0] / r, p.position[1] / r, p.position[2] / r];
    let (v_radial, _dvds) = grid.velocity(zone, p.position, radial_dir);
    for k in 0..3 {
        p.position[k] += radial_dir[k] * v_radial * dt;
    }
}

/// Shared hop loop for DDMC and IMD: draw an exponential leak distance
/// against the remaining in-zone distance each hop, advancing
/// `dt_remaining` by only the time that hop actually consumed
/// (`discrete_diffusion.cpp`'s `while (dt_remaining > 0.0)`). `continuous_absorption`
/// selects IMD's per-hop energy attenuation on top of the shared leak/stay
/// draw; plain DDMC leaves the packet's energy untouched.
fn hop_loop<G: Grid>(p: &mut Particle, mut zone: usize, grid: &G, states: &[DiffusionState], mut dt_remaining: f64, c: f64, continuous_absorption: bool, rng: &mut PacketRng) -> DiffusionResult {
    let mut tallies = Vec::new();

    loop {
        let state = &states[zone];
        if !state.active {
            return DiffusionResult { fate: ParticleFate::Alive, tallies };
        }

        let sigma_tot = state.sigma_leak_out + state.sigma_leak_in;
        let d_leak = if sigma_tot > 0.0 { -rng.uniform().max(1e-300).ln() / sigma_tot } else { f64::INFINITY };
        let d_stay = c * dt_remaining;

        if d_stay < d_leak {
            // Stays in this zone for the rest of the step: tally mean
            // intensity, advect with the fluid, and suspend to next step.
            tallies.push(TallyDelta { zone, bin: 0, j_nu: p.energy * dt_remaining * c, e_abs: 0.0 });
            if continuous_absorption {
                let kappa = grid.zone(zone).planck_mean_opacity;
                let frac_abs = 1.0 - (-kappa * c * dt_remaining).exp();
                let e_abs = p.energy * frac_abs;
                p.energy -= e_abs;
                tallies.push(TallyDelta { zone, bin: 0, j_nu: 0.0, e_abs });
            }
            advect_homologous(p, grid, zone, dt_remaining);
            p.time += dt_remaining;
            return DiffusionResult { fate: ParticleFate::Stopped, tallies };
        }

        // Leak to an adjacent zone: consume only the time this hop took,
        // not the whole remaining step.
        let dt_hop = d_leak / c;
        p.time += dt_hop;
        dt_remaining -= dt_hop;

        let p_leak_out = state.sigma_leak_out / sigma_tot;
        let delta = if rng.uniform() < p_leak_out { 1 } else { -1 };
        advance_zone(p, grid, zone, delta);

        match p.zone_index {
            ZoneIndex::Zone(next) => zone = next,
            ZoneIndex::Escaped => return DiffusionResult { fate: ParticleFate::Escaped, tallies },
            ZoneIndex::Absorbed => return DiffusionResult { fate: ParticleFate::Absorbed, tallies },
        }
    }
}

/// DDMC excursion: leak hops carry the packet's energy unchanged; only the
/// final "stay" hop records a mean-intensity tally.
pub fn discrete_diffuse_ddmc<G: Grid>(p: &mut Particle, zone: usize, grid: &G, states: &[DiffusionState], dt_remaining: f64, c: f64, rng: &mut PacketRng) -> DiffusionResult {
    hop_loop(p, zone, grid, states, dt_remaining, c, false, rng)
}

/// IMD excursion: identical leak/stay draw, but additionally attenuates the
/// packet's own energy by the absorbed fraction on the final "stay" hop
/// (continuous absorption), where plain DDMC leaves the packet's energy
/// untouched.
pub fn discrete_diffuse_imd<G: Grid>(p: &mut Particle, zone: usize, grid: &G, states: &[DiffusionState], dt_remaining: f64, c: f64, rng: &mut PacketRng) -> DiffusionResult {
    hop_loop(p, zone, grid, states, dt_remaining, c, true, rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Sphere1D;
    use crate::packet::PacketKind;

    fn thick_grid() -> Sphere1D {
        let mut g = Sphere1D::uniform(1.0e14, 3, 1.0e5, 4, vec![28], vec![56]);
        for i in 0..g.n_zones() {
            let zone = g.zone_mut(i);
            zone.rho = 1.0;
            zone.planck_mean_opacity = 1.0e6;
        }
        g
    }

    #[test]
    fn thick_zones_activate_ddmc() {
        let g = thick_grid();
        let states = compute_diffusion_probabilities(&g, 5.0);
        assert!(states.iter().all(|s| s.active));
    }

    #[test]
    fn thin_zones_do_not_activate_ddmc() {
        let mut g = thick_grid();
        for i in 0..g.n_zones() {
            g.zone_mut(i).planck_mean_opacity = 1e-10;
        }
        let states = compute_diffusion_probabilities(&g, 5.0);
        assert!(states.iter().all(|s| !s.active));
    }

    #[test]
    fn innermost_zone_has_no_inward_leak() {
        let g = thick_grid();
        let states = compute_diffusion_probabilities(&g, 5.0);
        assert_eq!(states[0].sigma_leak_in, 0.0);
        assert!(states[0].sigma_leak_out > 0.0);
    }

    #[test]
    fn leak_rates_are_nonnegative() {
        let g = thick_grid();
        let states = compute_diffusion_probabilities(&g, 5.0);
        for s in &states {
            assert!(s.sigma_leak_out >= 0.0);
            assert!(s.sigma_leak_in >= 0.0);
        }
    }

    #[test]
    fn ddmc_hop_never_consumes_more_than_the_remaining_time() {
        let g = thick_grid();
        let states = compute_diffusion_probabilities(&g, 5.0);
        let mut rng = PacketRng::seeded(9, 0, 0);
        let mut p = Particle::new([1.0e13, 0.0, 0.0], [1.0, 0.0, 0.0], 1e14, 1.0, 0.0, 1, PacketKind::Photon);
        let dt_remaining = 1.0;
        let result = discrete_diffuse_ddmc(&mut p, 1, &g, &states, dt_remaining, crate::constants::C, &mut rng);
        assert!(matches!(result.fate, ParticleFate::Alive | ParticleFate::Stopped | ParticleFate::Escaped | ParticleFate::Absorbed));
        assert!(p.time <= dt_remaining + 1e-9);
    }

    #[test]
    fn ddmc_stay_consumes_exactly_the_remaining_time() {
        // Tiny dt_remaining makes d_stay << any plausible d_leak, so the
        // packet must take the "stay" branch on the first hop.
        let g = thick_grid();
        let states = compute_diffusion_probabilities(&g, 5.0);
        let mut rng = PacketRng::seeded(21, 0, 0);
        let mut p = Particle::new([1.0e13, 0.0, 0.0], [1.0, 0.0, 0.0], 1e14, 1.0, 0.0, 1, PacketKind::Photon);
        let dt_remaining = 1e-30;
        let result = discrete_diffuse_ddmc(&mut p, 1, &g, &states, dt_remaining, crate::constants::C, &mut rng);
        assert_eq!(result.fate, ParticleFate::Stopped);
        assert!((p.time - dt_remaining).abs() < 1e-40);
    }

    #[test]
    fn ddmc_excursion_can_escape_through_the_outer_boundary() {
        // A thin, tiny-opacity-gradient grid so repeated leak hops rapidly
        // cross every zone and a packet starting at the outermost zone
        // escapes rather than looping forever.
        let mut g = Sphere1D::uniform(1.0e14, 2, 1.0e5, 4, vec![28], vec![56]);
        for i in 0..g.n_zones() {
            let zone = g.zone_mut(i);
            zone.rho = 1.0;
            zone.planck_mean_opacity = 1.0e6;
        }
        let states = compute_diffusion_probabilities(&g, 5.0);
        let mut rng = PacketRng::seeded(42, 0, 0);
        let mut p = Particle::new([0.9e14, 0.0, 0.0], [1.0, 0.0, 0.0], 1e14, 1.0, 0.0, 1, PacketKind::Photon);
        // A huge dt_remaining guarantees many hops happen before the "stay"
        // branch could ever win, so the random walk is given every chance
        // to wander off the outer edge.
        let result = discrete_diffuse_ddmc(&mut p, 1, &g, &states, 1.0e10, crate::constants::C, &mut rng);
        assert!(matches!(result.fate, ParticleFate::Escaped | ParticleFate::Absorbed | ParticleFate::Stopped));
    }
}
