//! Relaxation-time tensors and Onsager moments
//!
//! The zeroth distribution correction is `g₀ = τ v (−∂f₀/∂E)`; the Onsager
//! moments
//!
//! `L_n = deg Σ_{s,b,k} V_k/(2π)³ (E − E_F)ⁿ v ⊗ g`
//!
//! give the conductivity (e²L₀), the Seebeck coefficient (−L₁L₀⁻¹/eT) and
//! the electronic thermal conductivity ((L₂ − L₁L₀⁻¹L₁)/T).

use super::{weighted_rate, Distribution};
use crate::constants::ELECTRON_CHARGE;
use crate::error::Result;
use crate::fermi::df0_de;
use crate::settings::TauWeighting;
use crate::state::TransportState;
use nalgebra::{Matrix3, Vector3};
use ndarray::Array3;
use std::collections::BTreeMap;

/// The relaxation-time distribution correction on the full mesh, using the
/// total rate over either all mechanisms or a single selected one
pub fn initial_distribution(
    state: &TransportState,
    id: usize,
    it: usize,
    weighting: TauWeighting,
    mechanism: Option<usize>,
) -> Distribution {
    let fermi_level = state.fermi_levels[(id, it)];
    let temperature = state.temperatures[it];

    let mut distribution = BTreeMap::new();
    for (s, &spin) in state.spins.iter().enumerate() {
        let energies = &state.bands.energies[&spin];
        let velocities = &state.bands.velocities[&spin];
        let num_bands = energies.nrows();
        let num_k = energies.ncols();
        let mut g = Array3::<f64>::zeros((num_bands, num_k, 3));

        for band in 0..num_bands {
            let full_rates = match mechanism {
                Some(m) => state.expand_rate(m, s, band, id, it),
                None => state.expand_total_rate(s, band, id, it),
            };
            for ik in 0..num_k {
                let energy = energies[(band, ik)];
                let rate = weighted_rate(full_rates[ik], energy, state, weighting);
                if rate <= 0. {
                    continue;
                }
                // -df0/dE converted from per eV to per joule
                let thermal = -df0_de(energy, fermi_level, temperature) / ELECTRON_CHARGE;
                for axis in 0..3 {
                    g[(band, ik, axis)] =
                        velocities[(band, ik, axis)] * thermal / rate;
                }
            }
        }
        distribution.insert(spin, g);
    }
    distribution
}

/// Onsager moments L₀, L₁, L₂ of a distribution correction
pub fn moments(
    state: &TransportState,
    distribution: &Distribution,
    id: usize,
    it: usize,
) -> [Matrix3<f64>; 3] {
    let fermi_level = state.fermi_levels[(id, it)];
    let cell = (2. * std::f64::consts::PI).powi(3);
    let degeneracy = state.spin_degeneracy;

    let mut result = [Matrix3::zeros(), Matrix3::zeros(), Matrix3::zeros()];
    for (spin, g) in distribution {
        let energies = &state.bands.energies[spin];
        let velocities = &state.bands.velocities[spin];
        for band in 0..energies.nrows() {
            for ik in 0..energies.ncols() {
                let volume = state.mesh.volume(ik) / cell;
                // (E - E_F) in joules
                let offset = (energies[(band, ik)] - fermi_level) * ELECTRON_CHARGE;
                let velocity = Vector3::new(
                    velocities[(band, ik, 0)],
                    velocities[(band, ik, 1)],
                    velocities[(band, ik, 2)],
                );
                let correction =
                    Vector3::new(g[(band, ik, 0)], g[(band, ik, 1)], g[(band, ik, 2)]);
                let outer = velocity * correction.transpose();
                let weight = degeneracy * volume;
                result[0] += outer * weight;
                result[1] += outer * (weight * offset);
                result[2] += outer * (weight * offset * offset);
            }
        }
    }
    result
}

/// The four transport tensors of one cell from its Onsager moments
pub fn tensors(
    state: &TransportState,
    moments: &[Matrix3<f64>; 3],
    id: usize,
    it: usize,
) -> Result<(Matrix3<f64>, Matrix3<f64>, Matrix3<f64>, Matrix3<f64>)> {
    let temperature = state.temperatures[it];
    let [l0, l1, l2] = *moments;

    let conductivity = l0 * ELECTRON_CHARGE.powi(2);
    let (seebeck, thermal) = match l0.try_inverse() {
        Some(l0_inverse) => {
            let seebeck = -(l1 * l0_inverse) / (ELECTRON_CHARGE * temperature);
            let thermal = (l2 - l1 * l0_inverse * l1) / temperature;
            (seebeck, thermal)
        }
        // No conductive states in the window: every derived tensor is zero
        None => (Matrix3::zeros(), Matrix3::zeros()),
    };

    let dominant = state.electron_concentrations[(id, it)]
        .max(state.hole_concentrations[(id, it)]);
    let mobility = if dominant > 0. {
        conductivity / (ELECTRON_CHARGE * dominant)
    } else {
        Matrix3::zeros()
    };

    Ok((conductivity, mobility, seebeck, thermal))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zero_moments_give_zero_tensors() {
        // A direct check of the singular-moment guard, no state required:
        // the L0 inverse does not exist so derived tensors must be zero
        let l0 = Matrix3::<f64>::zeros();
        assert!(l0.try_inverse().is_none());
    }

    #[test]
    fn seebeck_sign_follows_the_moment_asymmetry() {
        // With L0 positive definite and L1 positive (carriers above the
        // Fermi level), S = -L1 L0^-1 / eT is negative: n-type convention
        let l0 = Matrix3::identity() * 1e30;
        let l1 = Matrix3::identity() * 1e11;
        let seebeck =
            -(l1 * l0.try_inverse().unwrap()) / (ELECTRON_CHARGE * 300.);
        assert!(seebeck[(0, 0)] < 0.);
    }
}
