//! Polar optical phonon scattering
//!
//! The Fröhlich interaction couples carriers to the longitudinal optical
//! phonon through a 1/q² vertex weighted by the difference of inverse
//! dielectric constants. Emission and absorption channels sit one phonon
//! quantum apart; the out-scattering rate enters the arena like the elastic
//! rates while the in-scattering operator is applied against the
//! distribution correction during the iterative solve.

use super::{golden_rule_integral, Channel, Mechanism};
use crate::bandstructure::interpolation::gaussian;
use crate::bandstructure::Spin;
use crate::constants::{ELECTRON_CHARGE, EPSILON_0, HBAR};
use crate::error::Result;
use crate::fermi::bose;
use crate::settings::MaterialProperties;
use crate::state::TransportState;
use carrier_mesher::wrap_fractional;
use nalgebra::Vector3;
use ndarray::Array3;

/// The Fröhlich vertex prefactor `π e² ω (1/ε∞ − 1/ε_s) / ε0` and the phonon
/// quantum in eV
fn frohlich(properties: &MaterialProperties) -> Result<(f64, f64)> {
    let name = Mechanism::PolarOptical.name();
    let static_dielectric = properties.require(name, "static_dielectric")?;
    let high_frequency = properties.require(name, "high_frequency_dielectric")?;
    let frequency = properties.require(name, "polar_phonon_frequency")?;
    // THz to angular frequency
    let omega = 2. * std::f64::consts::PI * frequency * 1e12;
    let prefactor = std::f64::consts::PI * ELECTRON_CHARGE.powi(2) * omega / EPSILON_0
        * (1. / high_frequency - 1. / static_dielectric);
    let phonon_energy = HBAR * omega / ELECTRON_CHARGE;
    Ok((prefactor, phonon_energy))
}

/// Out-scattering rate `S_o` in 1/s: the carrier leaves the state by
/// emitting (weight n+1) or absorbing (weight n) one phonon
pub(super) fn out_rate(
    state: &TransportState,
    spin: Spin,
    energy: f64,
    initial_k: &Vector3<f64>,
    temperature: f64,
    broadening: f64,
    properties: &MaterialProperties,
) -> Result<f64> {
    let (prefactor, phonon_energy) = frohlich(properties)?;
    let occupation = bose(phonon_energy, temperature);
    let channels = [
        // emission: the final state sits one quantum below
        Channel {
            offset: phonon_energy,
            weight: occupation + 1.,
        },
        // absorption: one quantum above
        Channel {
            offset: -phonon_energy,
            weight: occupation,
        },
    ];
    Ok(prefactor
        * golden_rule_integral(
            state,
            spin,
            energy,
            initial_k,
            broadening,
            &channels,
            |q_squared| 1. / q_squared,
        ))
}

/// In-scattering operator `S_i[g]` in (units of g)/s: carriers arriving at
/// the state from every other state, weighted by the current distribution
/// correction `g` (`[band, k_full, 3]` for this spin channel).
///
/// The channel weights mirror the out-rate: a carrier arrives here by
/// emission when it starts one quantum above, by absorption when it starts
/// one below.
#[allow(clippy::too_many_arguments)]
pub(crate) fn in_scattering(
    state: &TransportState,
    spin: Spin,
    energy: f64,
    initial_k: &Vector3<f64>,
    temperature: f64,
    broadening: f64,
    properties: &MaterialProperties,
    g: &Array3<f64>,
) -> Result<Vector3<f64>> {
    let (prefactor, phonon_energy) = frohlich(properties)?;
    let occupation = bose(phonon_energy, temperature);
    let energies = &state.bands.energies[&spin];
    let cell = (2. * std::f64::consts::PI).powi(3);

    let lattice = state.mesh.lattice();
    let mut total = Vector3::zeros();
    for ik in 0..state.mesh.num_points() {
        let transfer = wrap_fractional(&(state.mesh.points()[ik].fractional - initial_k));
        let q_squared = lattice.to_cartesian(&transfer).norm_squared();
        if q_squared < 1e-16 {
            continue;
        }
        let volume = state.mesh.volume(ik) / cell;
        let vertex = volume / q_squared;
        for band in 0..energies.nrows() {
            let source_energy = energies[(band, ik)];
            let weight = (occupation + 1.)
                * gaussian(source_energy - energy - phonon_energy, broadening)
                + occupation * gaussian(source_energy - energy + phonon_energy, broadening);
            let g_source = Vector3::new(
                g[(band, ik, 0)],
                g[(band, ik, 1)],
                g[(band, ik, 2)],
            );
            total += g_source * (vertex * weight);
        }
    }
    Ok(total * (prefactor / ELECTRON_CHARGE))
}

#[cfg(test)]
mod test {
    use super::*;

    fn properties() -> MaterialProperties {
        MaterialProperties {
            static_dielectric: Some(12.9),
            high_frequency_dielectric: Some(10.9),
            polar_phonon_frequency: Some(8.8),
            ..MaterialProperties::default()
        }
    }

    #[test]
    fn phonon_quantum_matches_the_frequency() {
        let (_, phonon_energy) = frohlich(&properties()).unwrap();
        let expected = HBAR * 2. * std::f64::consts::PI * 8.8e12 / ELECTRON_CHARGE;
        approx::assert_relative_eq!(phonon_energy, expected, max_relative = 1e-12);
        // GaAs-like: a few tens of meV
        assert!(phonon_energy > 0.03 && phonon_energy < 0.04);
    }

    #[test]
    fn vertex_vanishes_without_ionic_screening_contrast() {
        let properties = MaterialProperties {
            static_dielectric: Some(10.9),
            high_frequency_dielectric: Some(10.9),
            polar_phonon_frequency: Some(8.8),
            ..MaterialProperties::default()
        };
        let (prefactor, _) = frohlich(&properties).unwrap();
        approx::assert_relative_eq!(prefactor, 0.);
    }

    #[test]
    fn emission_outweighs_absorption() {
        let (_, phonon_energy) = frohlich(&properties()).unwrap();
        let occupation = bose(phonon_energy, 300.);
        assert!(occupation > 0.);
        assert!(occupation + 1. > occupation);
    }
}
