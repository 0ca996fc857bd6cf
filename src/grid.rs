//! The `Grid` collaborator: per-zone geometry and physical fluid fields.
//!
//! The transport and gas solvers depend only on the `Grid` trait's
//! capability surface, never on a concrete geometry. Multi-dimensional
//! grids are out of scope beyond this abstract interface, so only a 1-D
//! homologously expanding spherical grid is provided as a concrete
//! implementation; geometry variants are distinct records selected at
//! construction and dispatched via `enum_dispatch` rather than a trait
//! object, since the variant set is closed.

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};

/// Per-zone physical and tally state.
///
/// Owned by the grid; `Transport` writes only to the tally fields
/// (`e_abs`, `l_radio_emit`, `j_nu`) and the derived opacity/emissivity
/// arrays, never to `rho`/`t_gas`/`x_gas`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Zone {
    /// Mass density, g/cm^3.
    pub rho: f64,
    /// Gas (kinetic) temperature, K.
    pub t_gas: f64,
    /// Radiation temperature, K (updated by the radiative-equilibrium solve).
    pub t_rad: f64,
    /// Mass fraction per chemical element, indexed the same as `Grid::elems_z`.
    pub x_gas: Vec<f64>,

    /// Energy absorbed this step, ergs. Zeroed at the start of each step,
    /// write-accumulated by `propagate`, summed over worker shards after
    /// reduction.
    pub e_abs: f64,
    /// Radioactive decay luminosity deposited this step, ergs/s.
    pub l_radio_emit: f64,
    /// Radiation energy density, ergs/cm^3. An input physical field like
    /// `rho`/`t_gas` (not a transport tally): seeds the initial uniform
    /// thermal packet population on the first step, and is otherwise left
    /// to the caller to set.
    pub e_rad: f64,
    /// Binned mean-intensity tally (path-length estimator), one entry per
    /// frequency bin. Units before `reduce_radiation` normalizes them:
    /// energy times path length. After normalization: erg/(s cm^2 Hz sr).
    pub j_nu: Vec<f64>,

    /// Absorption opacity per frequency bin, cm^2/g (derived, recomputed
    /// each step by `compute_opacity`).
    pub abs_opac: Vec<f64>,
    /// Scattering opacity per frequency bin, cm^2/g.
    pub scat_opac: Vec<f64>,
    /// Emissivity CDF-feeding source function per frequency bin.
    pub emissivity: Vec<f64>,
    /// Planck-mean opacity, cm^2/g.
    pub planck_mean_opacity: f64,
    /// Sobolev line optical depth per line, co-indexed with the gas's
    /// flattened line list.
    pub line_opacity: Vec<f64>,
}

impl Zone {
    /// A zone with `nbins` frequency bins and `n_elems` tracked elements,
    /// all tallies and derived arrays zeroed.
    #[must_use]
    pub fn new(nbins: usize, n_elems: usize) -> Self {
        Self {
            rho: 0.0,
            t_gas: 0.0,
            t_rad: 0.0,
            x_gas: vec![0.0; n_elems],
            e_abs: 0.0,
            l_radio_emit: 0.0,
            e_rad: 0.0,
            j_nu: vec![0.0; nbins],
            abs_opac: vec![0.0; nbins],
            scat_opac: vec![0.0; nbins],
            emissivity: vec![0.0; nbins],
            planck_mean_opacity: 0.0,
            line_opacity: Vec::new(),
        }
    }

    /// Zero the per-step tallies.
    pub fn wipe_tallies(&mut self) {
        self.e_abs = 0.0;
        self.l_radio_emit = 0.0;
        for j in &mut self.j_nu {
            *j = 0.0;
        }
    }
}

/// Either a valid zone index or the reason a position could not be located
/// in any zone.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZoneLookup {
    Zone(usize),
    OutOfDomain,
}

/// Closed set of concrete grid geometries, dispatched without a trait
/// object since the variant set is closed. Only one variant exists today;
/// multi-dimensional grids stay future work rather than something to
/// stub out here.
#[enum_dispatch(Grid)]
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum GridEnum {
    Sphere1D,
}

/// The capability surface transport and the gas solver need from a grid
/// geometry.
#[enum_dispatch]
pub trait Grid {
    /// Number of zones.
    fn n_zones(&self) -> usize;

    /// Volume of zone `i`, cm^3.
    fn zone_volume(&self, i: usize) -> f64;

    /// Characteristic size (`delta x`) of zone `i` along the direction of
    /// travel, cm.
    fn zone_size(&self, i: usize) -> f64;

    /// Local fluid velocity at position `x` within zone `i`, and its
    /// directional derivative `dv/ds` along `direction`, for a homologous
    /// expansion `v = r / t` this is `(r/t, 1/t)` along the radial
    /// direction.
    fn velocity(&self, i: usize, x: [f64; 3], direction: [f64; 3]) -> (f64, f64);

    /// Locate the zone containing `x`, or report that it falls outside the
    /// domain.
    fn get_zone(&self, x: [f64; 3]) -> ZoneLookup;

    /// Distance from `x` along `direction` to the boundary of zone `i`.
    fn distance_to_boundary(&self, i: usize, x: [f64; 3], direction: [f64; 3]) -> f64;

    /// Sample a uniformly distributed position within zone `i` from three
    /// uniform deviates.
    fn sample_in_zone(&self, i: usize, u: [f64; 3]) -> [f64; 3];

    /// Atomic numbers of the tracked elements, co-indexed with
    /// `Zone::x_gas`.
    fn elems_z(&self) -> &[i32];

    /// Mass numbers of the tracked elements, co-indexed with `elems_z`.
    fn elems_a(&self) -> &[i32];

    /// Read-only access to zone `i`'s physical/tally state.
    fn zone(&self, i: usize) -> &Zone;

    /// Mutable access to zone `i`'s physical/tally state, used by
    /// `compute_opacity`/`reduce_radiation`/`solve_eq_temperature`.
    fn zone_mut(&mut self, i: usize) -> &mut Zone;
}

/// A 1-D homologously expanding spherical grid: zones are radial shells,
/// `v(r) = r / t`. The only concrete geometry this crate ships;
/// multi-dimensional grids are out of scope.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Sphere1D {
    /// Outer radius of each zone at the grid's reference time, cm.
    radii: Vec<f64>,
    /// Reference time the radii were tabulated at, s. Zone boundaries move
    /// homologously: `r(t) = r(t_ref) * t / t_ref`.
    t_ref: f64,
    zones: Vec<Zone>,
    elems_z: Vec<i32>,
    elems_a: Vec<i32>,
}

impl Sphere1D {
    /// Build a grid with `n` equal-`delta r` shells out to `r_max` at
    /// reference time `t_ref`, each zone allocated with `nbins` frequency
    /// bins.
    #[must_use]
    pub fn uniform(r_max: f64, n: usize, t_ref: f64, nbins: usize, elems_z: Vec<i32>, elems_a: Vec<i32>) -> Self {
        assert_eq!(elems_z.len(), elems_a.len());
        let dr = r_max / n as f64;
        let radii = (1..=n).map(|i| dr * i as f64).collect();
        let zones = (0..n).map(|_| Zone::new(nbins, elems_z.len())).collect();
        Self {
            radii,
            t_ref,
            zones,
            elems_z,
            elems_a,
        }
    }

    /// Outer radius of zone `i` at time `t` (homologous scaling from
    /// `t_ref`).
    #[must_use]
    pub fn outer_radius_at(&self, i: usize, t: f64) -> f64 {
        self.radii[i] * t / self.t_ref
    }

    /// Inner radius of zone `i` at time `t`.
    #[must_use]
    pub fn inner_radius_at(&self, i: usize, t: f64) -> f64 {
        if i == 0 {
            0.0
        } else {
            self.radii[i - 1] * t / self.t_ref
        }
    }
}

impl Grid for Sphere1D {
    fn n_zones(&self) -> usize {
        self.zones.len()
    }

    fn zone_volume(&self, i: usize) -> f64 {
        let r_out = self.radii[i];
        let r_in = if i == 0 { 0.0 } else { self.radii[i - 1] };
        (4.0 / 3.0) * std::f64::consts::PI * (r_out.powi(3) - r_in.powi(3))
    }

    fn zone_size(&self, i: usize) -> f64 {
        let r_out = self.radii[i];
        let r_in = if i == 0 { 0.0 } else { self.radii[i - 1] };
        r_out - r_in
    }

    fn velocity(&self, _i: usize, x: [f64; 3], direction: [f64; 3]) -> (f64, f64) {
        let [px, py, pz] = x;
        let r = (px * px + py * py + pz * pz).sqrt();
        let t = self.t_ref;
        if r <= 0.0 {
            return (0.0, 1.0 / t);
        }
        let mu = (px * direction[0] + py * direction[1] + pz * direction[2]) / r;
        (r / t * mu, 1.0 / t)
    }

    fn get_zone(&self, x: [f64; 3]) -> ZoneLookup {
        let [px, py, pz] = x;
        let r = (px * px + py * py + pz * pz).sqrt();
        match self.radii.iter().position(|&edge| r <= edge) {
            Some(i) => ZoneLookup::Zone(i),
            None => ZoneLookup::OutOfDomain,
        }
    }

    fn distance_to_boundary(&self, i: usize, x: [f64; 3], direction: [f64; 3]) -> f64 {
        // Solve |x + s*direction|^2 = r_edge^2 for the positive root,
        // trying the outer edge first, then the inner edge (for inward
        // motion crossing into zone i-1).
        let [px, py, pz] = x;
        let [dx, dy, dz] = direction;
        let b = 2.0 * (px * dx + py * dy + pz * dz);
        let c_base = px * px + py * py + pz * pz;

        let solve = |r_edge: f64| -> Option<f64> {
            let c = c_base - r_edge * r_edge;
            let disc = b * b - 4.0 * c;
            if disc < 0.0 {
                return None;
            }
            let sq = disc.sqrt();
            let s1 = (-b + sq) / 2.0;
            let s2 = (-b - sq) / 2.0;
            [s1, s2]
                .into_iter()
                .filter(|&s| s > 1e-10)
                .fold(None, |acc, s| match acc {
                    None => Some(s),
                    Some(a) => Some(a.min(s)),
                })
        };

        let r_out = self.radii[i];
        let r_in = if i == 0 { 0.0 } else { self.radii[i - 1] };
        let d_out = solve(r_out);
        let d_in = if r_in > 0.0 { solve(r_in) } else { None };
        match (d_out, d_in) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => f64::INFINITY,
        }
    }

    fn sample_in_zone(&self, i: usize, u: [f64; 3]) -> [f64; 3] {
        let r_out = self.radii[i];
        let r_in = if i == 0 { 0.0 } else { self.radii[i - 1] };
        let r = (r_in.powi(3) + u[0] * (r_out.powi(3) - r_in.powi(3))).cbrt();
        let mu = 2.0 * u[1] - 1.0;
        let phi = 2.0 * std::f64::consts::PI * u[2];
        let sin_theta = (1.0 - mu * mu).max(0.0).sqrt();
        [r * sin_theta * phi.cos(), r * sin_theta * phi.sin(), r * mu]
    }

    fn elems_z(&self) -> &[i32] {
        &self.elems_z
    }

    fn elems_a(&self) -> &[i32] {
        &self.elems_a
    }

    fn zone(&self, i: usize) -> &Zone {
        &self.zones[i]
    }

    fn zone_mut(&mut self, i: usize) -> &mut Zone {
        &mut self.zones[i]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_grid() -> Sphere1D {
        Sphere1D::uniform(1.0e15, 10, 1.0e6, 4, vec![28, 26], vec![56, 56])
    }

    #[test]
    fn get_zone_locates_innermost_and_outermost() {
        let g = test_grid();
        assert_eq!(g.get_zone([0.0, 0.0, 0.0]), ZoneLookup::Zone(0));
        assert_eq!(g.get_zone([0.0, 0.0, 0.99e15]), ZoneLookup::Zone(9));
        assert_eq!(g.get_zone([0.0, 0.0, 2.0e15]), ZoneLookup::OutOfDomain);
    }

    #[test]
    fn zone_volumes_sum_to_sphere_volume() {
        let g = test_grid();
        let total: f64 = (0..g.n_zones()).map(|i| g.zone_volume(i)).sum();
        let expected = (4.0 / 3.0) * std::f64::consts::PI * 1.0e15_f64.powi(3);
        assert!((total / expected - 1.0).abs() < 1e-9);
    }

    #[test]
    fn velocity_is_homologous() {
        let g = test_grid();
        let x = [1.0e14, 0.0, 0.0];
        let (v, dvds) = g.velocity(0, x, [1.0, 0.0, 0.0]);
        assert!((v - 1.0e14 / 1.0e6).abs() < 1e-6);
        assert!((dvds - 1.0 / 1.0e6).abs() < 1e-12);
    }

    #[test]
    fn distance_to_boundary_outward_matches_edge() {
        let g = test_grid();
        let edge = g.radii[0];
        let x = [0.0, 0.0, 0.0];
        let d = g.distance_to_boundary(0, x, [0.0, 0.0, 1.0]);
        assert!((d - edge).abs() < 1e-3);
    }

    #[test]
    fn sample_in_zone_stays_within_shell() {
        let g = test_grid();
        let i = 3;
        let r_in = g.radii[i - 1];
        let r_out = g.radii[i];
        for _ in 0..50 {
            let p = g.sample_in_zone(i, [0.5, 0.5, 0.5]);
            let r = (p[0] * p[0] + p[1] * p[1] + p[2] * p[2]).sqrt();
            assert!(r >= r_in - 1e-6 && r <= r_out + 1e-6);
        }
    }

    #[test]
    fn wipe_tallies_zeroes_accumulators() {
        let mut z = Zone::new(4, 2);
        z.e_abs = 5.0;
        z.j_nu[1] = 3.0;
        z.wipe_tallies();
        assert_eq!(z.e_abs, 0.0);
        assert!(z.j_nu.iter().all(|&v| v == 0.0));
    }
}
