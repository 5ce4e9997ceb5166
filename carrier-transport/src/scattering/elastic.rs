//! Elastic scattering mechanisms
//!
//! Acoustic deformation potential, ionized impurity (Brooks-Herring with
//! Thomas-Fermi screening) and piezoelectric scattering. All three conserve
//! the carrier energy, so the golden-rule integral carries a single channel
//! with zero offset.

use super::{golden_rule_integral, Channel, Mechanism};
use crate::bandstructure::Spin;
use crate::constants::{BOLTZMANN, ELECTRON_CHARGE, EPSILON_0, HBAR, PER_CM3_TO_PER_M3};
use crate::error::Result;
use crate::fermi::f0;
use crate::settings::MaterialProperties;
use crate::state::TransportState;
use nalgebra::Vector3;

/// Elastic scattering rate in 1/s of the state at the fractional coordinate
/// `initial_k` with energy `energy`, in cell (id, it)
#[allow(clippy::too_many_arguments)]
pub(super) fn rate(
    state: &TransportState,
    mechanism: Mechanism,
    spin: Spin,
    energy: f64,
    initial_k: &Vector3<f64>,
    id: usize,
    it: usize,
    broadening: f64,
    properties: &MaterialProperties,
) -> Result<f64> {
    let temperature = state.temperatures[it];
    let channel = [Channel {
        offset: 0.,
        weight: 1.,
    }];
    let value = match mechanism {
        Mechanism::AcousticDeformation => {
            let prefactor = acoustic_prefactor(properties, temperature)?;
            prefactor
                * golden_rule_integral(
                    state, spin, energy, initial_k, broadening, &channel, |_| 1.,
                )
        }
        Mechanism::IonizedImpurity => {
            let beta_squared = inverse_screening_length_squared(
                state,
                properties.require(mechanism.name(), "static_dielectric")?,
                id,
                it,
            );
            let prefactor = impurity_prefactor(state, properties, id)?;
            prefactor
                * golden_rule_integral(
                    state,
                    spin,
                    energy,
                    initial_k,
                    broadening,
                    &channel,
                    |q_squared| 1. / (q_squared + beta_squared).powi(2),
                )
        }
        Mechanism::Piezoelectric => {
            let prefactor = piezoelectric_prefactor(properties, temperature)?;
            prefactor
                * golden_rule_integral(
                    state,
                    spin,
                    energy,
                    initial_k,
                    broadening,
                    &channel,
                    |q_squared| 1. / q_squared,
                )
        }
        Mechanism::PolarOptical => unreachable!("polar optical scattering is inelastic"),
    };
    Ok(value)
}

/// `(2π/ħ) E_def² k_B T / c_el`, in J·m³/s: a constant deformation-potential
/// matrix element in the equipartition limit
fn acoustic_prefactor(properties: &MaterialProperties, temperature: f64) -> Result<f64> {
    let name = Mechanism::AcousticDeformation.name();
    let deformation = properties.require(name, "deformation_potential")? * ELECTRON_CHARGE;
    let elastic_constant = properties.require(name, "elastic_constant")?;
    Ok(2. * std::f64::consts::PI / HBAR * deformation.powi(2) * BOLTZMANN * temperature
        / elastic_constant)
}

/// `(2π/ħ) N_ii (Z e² / ε0 ε_s)²`: the screened-Coulomb vertex carries the
/// remaining 1/(q² + β²)² through the factor closure
fn impurity_prefactor(
    state: &TransportState,
    properties: &MaterialProperties,
    id: usize,
) -> Result<f64> {
    let name = Mechanism::IonizedImpurity.name();
    let dielectric = properties.require(name, "static_dielectric")?;
    // n-type doping is compensated by donors, p-type by acceptors
    let charge = if state.doping[id] < 0. {
        properties.require(name, "donor_charge")?
    } else {
        properties.require(name, "acceptor_charge")?
    };
    // Each impurity of charge Z provides Z carriers
    let impurity_concentration = state.doping[id].abs() * PER_CM3_TO_PER_M3 / charge;
    let coulomb = charge * ELECTRON_CHARGE.powi(2) / (EPSILON_0 * dielectric);
    Ok(2. * std::f64::consts::PI / HBAR * impurity_concentration * coulomb.powi(2))
}

/// `(2π/ħ) e² P² k_B T / (ε0 ε_s)`: the unscreened 1/q² piezoelectric vertex
fn piezoelectric_prefactor(properties: &MaterialProperties, temperature: f64) -> Result<f64> {
    let name = Mechanism::Piezoelectric.name();
    let dielectric = properties.require(name, "static_dielectric")?;
    let coefficient = properties.require(name, "piezoelectric_coefficient")?;
    Ok(2. * std::f64::consts::PI / HBAR
        * ELECTRON_CHARGE.powi(2)
        * coefficient.powi(2)
        * BOLTZMANN
        * temperature
        / (EPSILON_0 * dielectric))
}

/// Thomas-Fermi inverse screening length squared, 1/m², from the smeared
/// density of states:
///
/// `β² = e²/(ε0 ε_s k_B T) ∫ D(E) f0 (1 − f0) dE`
///
/// with `D` per unit volume per joule. The f0(1−f0) window picks up only
/// states near the Fermi level, so β follows the free-carrier density.
pub(super) fn inverse_screening_length_squared(
    state: &TransportState,
    static_dielectric: f64,
    id: usize,
    it: usize,
) -> f64 {
    let fermi_level = state.fermi_levels[(id, it)];
    let temperature = state.temperatures[it];
    // states per cell; dividing by the cell volume and the thermal energy in
    // joules gives the per-volume per-joule density the formula expects
    let window = state.dos.integrate(|energy| {
        let occupation = f0(energy, fermi_level, temperature);
        occupation * (1. - occupation)
    });
    let density = window / (state.cell_volume * BOLTZMANN * temperature);
    ELECTRON_CHARGE.powi(2) / (EPSILON_0 * static_dielectric) * density
}

#[cfg(test)]
mod test {
    use super::*;

    fn properties() -> MaterialProperties {
        MaterialProperties {
            static_dielectric: Some(12.9),
            high_frequency_dielectric: Some(10.9),
            deformation_potential: Some(8.6),
            elastic_constant: Some(1.2e11),
            piezoelectric_coefficient: Some(0.052),
            donor_charge: Some(1.),
            acceptor_charge: Some(1.),
            polar_phonon_frequency: Some(8.8),
        }
    }

    #[test]
    fn acoustic_prefactor_scales_linearly_with_temperature() {
        let properties = properties();
        let cold = acoustic_prefactor(&properties, 150.).unwrap();
        let hot = acoustic_prefactor(&properties, 300.).unwrap();
        approx::assert_relative_eq!(hot / cold, 2., max_relative = 1e-12);
    }

    #[test]
    fn acoustic_prefactor_matches_hand_evaluation() {
        let properties = properties();
        let expected = 2. * std::f64::consts::PI / HBAR
            * (8.6 * ELECTRON_CHARGE).powi(2)
            * BOLTZMANN
            * 300.
            / 1.2e11;
        approx::assert_relative_eq!(
            acoustic_prefactor(&properties, 300.).unwrap(),
            expected,
            max_relative = 1e-12
        );
    }

    #[test]
    fn screened_vertex_is_bounded_at_small_transfer() {
        // The Brooks-Herring factor must saturate at 1/β⁴ rather than diverge
        let beta_squared: f64 = 1e16;
        let near = 1. / (1e10 + beta_squared).powi(2);
        let far = 1. / (1e20 + beta_squared).powi(2);
        assert!(near.is_finite());
        assert!(near > far);
        approx::assert_relative_eq!(near, 1. / beta_squared.powi(2), max_relative = 1e-5);
    }
}
