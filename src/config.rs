//! Typed configuration structs, one field per recognized run parameter.
//!
//! Parameter-file parsing itself is an external collaborator
//! (`ParameterReader`) and stays out of scope; this crate only
//! defines the typed shape a caller is expected to populate (by hand, or
//! from its own `ParameterReader` implementation) and pass into
//! `Transport::init`. Plain `#[derive(Deserialize, Serialize)]` structs,
//! no builder layer.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Opacity composition feature flags
    /// (`opacity_{electron_scattering,line_expansion,fuzz_expansion,
    /// bound_free,bound_bound,free_free,use_nlte}`).
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct OpacityFlags: u32 {
        const ELECTRON_SCATTERING = 1 << 0;
        const FREE_FREE           = 1 << 1;
        const BOUND_FREE          = 1 << 2;
        /// Detailed (Voigt-profile) bound-bound lines, in addition to or
        /// instead of the Sobolev expansion treatment.
        const BOUND_BOUND         = 1 << 3;
        const LINE_EXPANSION      = 1 << 4;
        const FUZZ_EXPANSION      = 1 << 5;
        /// Use the NLTE rate-matrix solver instead of LTE Saha-Boltzmann.
        const USE_NLTE            = 1 << 6;
    }
}

impl Default for OpacityFlags {
    fn default() -> Self {
        Self::ELECTRON_SCATTERING | Self::FREE_FREE | Self::BOUND_FREE | Self::LINE_EXPANSION
    }
}

/// Grey-opacity mode parameters (`opacity_grey_opacity`, `opacity_epsilon`).
/// A nonzero `grey_opacity` short-circuits every other opacity term.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct GreyOpacityConfig {
    /// cm^2/g; `0.0` disables grey mode.
    pub grey_opacity: f64,
    /// Fraction of grey opacity that is absorptive rather than scattering.
    pub epsilon: f64,
}

impl Default for GreyOpacityConfig {
    fn default() -> Self {
        Self { grey_opacity: 0.0, epsilon: 1.0 }
    }
}

/// Frequency-grid layout (`transport_nu_grid`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct NuGridConfig {
    pub nu_min: f64,
    pub nu_max: f64,
    /// Bin width (linear mode) or fractional growth step (log mode).
    pub delta_nu: f64,
    pub log: bool,
}

/// Inner-boundary ("core") emission parameters (`core_radius`,
/// `core_temperature`, `core_luminosity`, `core_n_emit`,
/// `core_spectrum_file`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoreConfig {
    /// cm.
    pub radius: f64,
    /// K; ignored if a tabulated spectrum file is supplied.
    pub temperature: f64,
    /// erg/s; `0.0` derives the luminosity from the blackbody flux at
    /// `temperature`.
    pub luminosity: f64,
    /// Packets emitted from the core per step.
    pub n_emit: usize,
    /// Optional path to a tabulated `(nu, L_nu)` spectrum, overriding the
    /// blackbody spectrum when present.
    pub spectrum_file: Option<String>,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            radius: 0.0,
            temperature: 0.0,
            luminosity: 0.0,
            n_emit: 0,
            spectrum_file: None,
        }
    }
}

/// Output spectrum binning (`spectrum_{time,nu}_grid`,
/// `spectrum_n_mu`, `spectrum_n_phi`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpectrumConfig {
    pub time_grid: Vec<f64>,
    pub nu_grid: Vec<f64>,
    pub n_mu: usize,
    pub n_phi: usize,
}

/// Particle-population limits (`particles_step_size`,
/// `particles_max_total`, `particles_n_initialize`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct ParticleConfig {
    /// Upper bound on a single flight's distance, as a fraction of the
    /// local zone size.
    pub step_size: f64,
    /// Hard cap on the number of live packets.
    pub max_total: usize,
    /// Initial thermal packets seeded per zone on the first step.
    pub n_initialize: usize,
    /// Radioactive-decay packets emitted per step (`n_emit_radioactive`).
    pub n_emit_radioactive: usize,
}

impl Default for ParticleConfig {
    fn default() -> Self {
        Self {
            step_size: 0.1,
            max_total: 1_000_000,
            n_initialize: 0,
            n_emit_radioactive: 0,
        }
    }
}

/// Brent-solver temperature bracket (`limits_temp_{min,max}`).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TemperatureLimits {
    pub min: f64,
    pub max: f64,
}

impl Default for TemperatureLimits {
    fn default() -> Self {
        Self { min: 1.0, max: 1.0e12 }
    }
}

/// DDMC/IMD activation threshold: a zone switches to diffusion when
/// `tau_cell = kappa * rho * dx > tau_ddmc` (typically 5-10).
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct DiffusionConfig {
    pub tau_ddmc: f64,
    /// Use Implicit Monte Carlo Diffusion (continuous energy attenuation
    /// per hop) instead of plain DDMC (discrete leak/stay draws only).
    pub use_imd: bool,
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self { tau_ddmc: 8.0, use_imd: false }
    }
}

/// Top-level transport configuration, aggregating the tables above
/// (`transport_radiative_equilibrium`, `transport_steady_iterate`,
/// `transport_nu_grid`, `line_velocity_width`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransportConfig {
    pub radiative_equilibrium: bool,
    /// `> 0` freezes hydro and iterates to steady state; `0` disables.
    pub steady_iterate: u32,
    pub nu_grid: NuGridConfig,
    pub particles: ParticleConfig,
    pub core: CoreConfig,
    pub spectrum: SpectrumConfig,
    pub temperature_limits: TemperatureLimits,
    pub diffusion: DiffusionConfig,
    /// Doppler width for detailed (Voigt) lines, as a fraction of `c`.
    pub line_velocity_width: f64,
    /// Base RNG seed for this run; combined with
    /// `(worker_id, thread_id)` by `PacketRng::seeded`.
    pub base_seed: u64,
}

/// Opacity-engine configuration (`opacity_*` flags plus the
/// grey-mode parameters).
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct OpacityConfig {
    pub flags: OpacityFlags,
    pub grey: GreyOpacityConfig,
}

/// Gas-solver configuration: which atomic-data sources to use and the
/// NLTE convergence tolerance/iteration cap (`data_atomic_file`,
/// `data_fuzzline_file`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GasConfig {
    pub atomic_file: String,
    pub fuzzline_file: String,
    /// NLTE Sobolev-beta convergence tolerance on `max |delta_beta / beta|`,
    /// checked against `nlte_max_iterations`.
    pub nlte_beta_tolerance: f64,
    pub nlte_max_iterations: usize,
}

impl Default for GasConfig {
    fn default() -> Self {
        Self {
            atomic_file: String::new(),
            fuzzline_file: String::new(),
            nlte_beta_tolerance: 0.1,
            nlte_max_iterations: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_opacity_flags_cover_the_common_terms() {
        let f = OpacityFlags::default();
        assert!(f.contains(OpacityFlags::ELECTRON_SCATTERING));
        assert!(f.contains(OpacityFlags::FREE_FREE));
        assert!(!f.contains(OpacityFlags::FUZZ_EXPANSION));
    }

    #[test]
    fn grey_opacity_default_disables_grey_mode() {
        assert_eq!(GreyOpacityConfig::default().grey_opacity, 0.0);
    }

    #[test]
    fn opacity_flags_round_trip_through_serde() {
        let f = OpacityFlags::BOUND_FREE | OpacityFlags::USE_NLTE;
        let json = serde_json::to_string(&f).unwrap();
        let back: OpacityFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }
}
