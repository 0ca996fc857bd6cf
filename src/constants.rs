//! Physical constants, passed by reference rather than scattered as magic
//! numbers.
//!
//! All values are CGS.

/// Speed of light, cm/s.
pub const C: f64 = 2.997_924_58e10;
/// Planck constant, erg s.
pub const H: f64 = 6.626_070_15e-27;
/// Boltzmann constant, erg/K.
pub const K: f64 = 1.380_649e-16;
/// Boltzmann constant, eV/K.
pub const K_EV: f64 = 8.617_333_262e-5;
/// Electron mass, g.
pub const M_E: f64 = 9.109_383_7015e-28;
/// Proton mass, g.
pub const M_P: f64 = 1.672_621_923_69e-24;
/// Stefan-Boltzmann constant, erg/(cm^2 s K^4).
pub const SB: f64 = 5.670_374_419e-5;
/// Thomson (electron-scattering) cross-section, cm^2.
pub const THOMSON_CS: f64 = 6.652_458_7321e-25;
/// Classical electron radius squared times pi, i.e. the Sobolev/line cross
/// section constant `sigma_tot = pi e^2 / (m_e c)` in CGS, cm^2 Hz.
pub const SIGMA_TOT: f64 = 2.654_008e-2;
/// MeV to ergs.
pub const MEV_TO_ERGS: f64 = 1.602_176_634e-6;
/// eV to ergs.
pub const EV_TO_ERGS: f64 = 1.602_176_634e-12;
/// Archimedes' constant.
pub const PI: f64 = std::f64::consts::PI;

/// ⁵⁶Ni decay timescale (mean lifetime), seconds. 6.075 day half-life.
pub const TAU_56NI: f64 = 8.80e5;
/// ⁵⁶Co decay timescale (mean lifetime), seconds. 77.233 day half-life.
pub const TAU_56CO: f64 = 9.63e6;
/// ⁴⁸Cr decay timescale (mean lifetime), seconds. 21.56 hour half-life.
pub const TAU_48CR: f64 = 1.29e5;
/// ⁴⁸V decay timescale (mean lifetime), seconds. 15.97 day half-life.
pub const TAU_48V: f64 = 1.99e6;

/// Average energy released per ⁵⁶Ni decay, MeV.
pub const AVERAGE_56NI_ENERGY: f64 = 1.75;
/// Average energy released per ⁵⁶Co decay, MeV.
pub const AVERAGE_56CO_ENERGY: f64 = 3.61;
/// Average energy released per ⁴⁸Cr decay, MeV.
pub const AVERAGE_48CR_ENERGY: f64 = 0.0857;
/// Average energy released per ⁴⁸V decay, MeV.
pub const AVERAGE_48V_ENERGY: f64 = 2.9125;
/// Fraction of ⁵⁶Co decay energy carried away as positron kinetic energy
/// (not available as gamma-ray energy).
pub const CO_POSITRON_FRACTION: f64 = 0.0337;

/// Immutable bundle of the constants above, for call sites that prefer to
/// thread a single value rather than `use` the module constants directly.
#[derive(Debug, Clone, Copy)]
pub struct Constants {
    /// Speed of light, cm/s.
    pub c: f64,
    /// Planck constant, erg s.
    pub h: f64,
    /// Boltzmann constant, erg/K.
    pub k: f64,
    /// Boltzmann constant, eV/K.
    pub k_ev: f64,
    /// Electron mass, g.
    pub m_e: f64,
    /// Proton mass, g.
    pub m_p: f64,
    /// Thomson cross-section, cm^2.
    pub thomson_cs: f64,
    /// Sobolev line-strength constant, cm^2 Hz.
    pub sigma_tot: f64,
}

impl Default for Constants {
    fn default() -> Self {
        Self {
            c: C,
            h: H,
            k: K,
            k_ev: K_EV,
            m_e: M_E,
            m_p: M_P,
            thomson_cs: THOMSON_CS,
            sigma_tot: SIGMA_TOT,
        }
    }
}

/// Planck function `B_nu(T)` in erg/(s cm^2 Hz sr).
#[must_use]
pub fn blackbody_nu(temperature: f64, nu: f64) -> f64 {
    let zeta = H * nu / (K * temperature);
    // avoid overflow in exp() for very large zeta; the limit is zero anyway.
    if zeta > 700.0 {
        return 0.0;
    }
    2.0 * H * nu * nu * nu / (C * C) / (zeta.exp() - 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use float_cmp::approx_eq;

    #[test]
    fn blackbody_nu_peaks_near_wien_law() {
        // Wien's law: nu_peak / T = 5.879e10 Hz/K
        let t = 5800.0;
        let nu_peak = 5.879e10 * t;
        let b_peak = blackbody_nu(t, nu_peak);
        let b_half = blackbody_nu(t, nu_peak * 0.5);
        let b_double = blackbody_nu(t, nu_peak * 2.0);
        assert!(b_peak > b_half);
        assert!(b_peak > b_double);
    }

    #[test]
    fn blackbody_nu_zero_at_zero_temperature_limit() {
        assert!(approx_eq!(f64, blackbody_nu(1.0, 1e20), 0.0, epsilon = 1e-300));
    }
}
