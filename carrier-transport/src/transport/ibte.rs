//! The iterative Boltzmann solve
//!
//! Fixed-point iteration on the distribution correction,
//!
//! `g ← (S_i[g] + F) / (S_o + ν_elastic)`,   `F = v (−∂f₀/∂E)`
//!
//! starting from the relaxation-time solution. With no inelastic mechanism
//! the in-scattering operator vanishes and the update returns its input, so
//! the iteration is idempotent at iteration zero. Convergence is judged on
//! the conductivity tensor; exhausting the iteration budget returns the last
//! iterate flagged unconverged rather than an error.

use super::{rta, ConvergenceCriterion, Distribution, SolverStage, TransportResult};
use crate::constants::ELECTRON_CHARGE;
use crate::error::Result;
use crate::fermi::df0_de;
use crate::scattering::{inelastic, Mechanism};
use crate::settings::{MaterialProperties, Settings};
use crate::state::TransportState;
use nalgebra::Matrix3;
use ndarray::Array3;
use std::collections::BTreeMap;

/// Solve one (doping, temperature) cell end to end
pub fn solve_cell(
    state: &TransportState,
    settings: &Settings,
    properties: &MaterialProperties,
    id: usize,
    it: usize,
    criterion: &dyn ConvergenceCriterion,
) -> Result<TransportResult> {
    let mut stage = SolverStage::Initialized;
    tracing::debug!(?stage, id, it, "cell solve starting");

    let mut distribution =
        rta::initial_distribution(state, id, it, settings.tau_weighting, None);
    let mut moments = rta::moments(state, &distribution, id, it);
    let (mut conductivity, mut mobility, mut seebeck, mut thermal) =
        rta::tensors(state, &moments, id, it)?;
    stage = SolverStage::RteSolved;
    tracing::debug!(?stage, id, it, "relaxation-time solution assembled");

    let inelastic_index = state
        .mechanisms
        .iter()
        .position(|m| !m.is_elastic());
    let mut iterations = 0;
    let mut converged = true;

    if let Some(pop) = inelastic_index {
        converged = false;
        for iteration in 1..=settings.ibte.maximum_iterations {
            stage = SolverStage::IbteIterating { iteration };
            tracing::debug!(?stage, id, it, "distribution update");
            distribution = update(
                state,
                settings,
                properties,
                id,
                it,
                pop,
                &distribution,
            )?;
            moments = rta::moments(state, &distribution, id, it);
            let previous = conductivity;
            let tensors = rta::tensors(state, &moments, id, it)?;
            conductivity = tensors.0;
            mobility = tensors.1;
            seebeck = tensors.2;
            thermal = tensors.3;
            iterations = iteration;

            if criterion.converged(&previous, &conductivity) {
                stage = SolverStage::Converged { iterations };
                converged = true;
                break;
            }
        }
        if !converged {
            stage = SolverStage::MaxIterationsReached;
            tracing::warn!(
                id,
                it,
                iterations,
                "iterative solve exhausted its budget; returning the last iterate"
            );
        }
    } else {
        stage = SolverStage::Converged { iterations: 0 };
    }
    tracing::info!(?stage, id, it, "transport cell solved");

    let asymmetry = super::tensor_asymmetry(&conductivity);
    if asymmetry > 1e-3 {
        tracing::warn!(id, it, asymmetry, "conductivity tensor is measurably asymmetric");
    }

    let (mechanism_mobilities, mechanism_relaxation_times) =
        if settings.separate_mechanism_mobilities {
            let (mobilities, times) = separated(state, settings, id, it)?;
            (Some(mobilities), Some(times))
        } else {
            (None, None)
        };

    Ok(TransportResult {
        doping: state.doping[id],
        temperature: state.temperatures[it],
        fermi_level: state.fermi_levels[(id, it)],
        conductivity,
        mobility,
        seebeck,
        electronic_thermal_conductivity: thermal,
        mechanism_mobilities,
        mechanism_relaxation_times,
        converged,
        iterations,
    })
}

/// One fixed-point update of the distribution correction
fn update(
    state: &TransportState,
    settings: &Settings,
    properties: &MaterialProperties,
    id: usize,
    it: usize,
    pop: usize,
    distribution: &Distribution,
) -> Result<Distribution> {
    let fermi_level = state.fermi_levels[(id, it)];
    let temperature = state.temperatures[it];

    let mut next = BTreeMap::new();
    for (s, &spin) in state.spins.iter().enumerate() {
        let energies = &state.bands.energies[&spin];
        let velocities = &state.bands.velocities[&spin];
        let num_bands = energies.nrows();
        let num_k = energies.ncols();
        let g = &distribution[&spin];
        let mut updated = Array3::<f64>::zeros((num_bands, num_k, 3));

        for band in 0..num_bands {
            let out_rates = state.expand_rate(pop, s, band, id, it);
            let elastic_rates: Vec<f64> = {
                let irreducible: Vec<f64> = (0..state.irreducible.num_irreducible())
                    .map(|ir| state.elastic_rate(s, band, ir, id, it))
                    .collect();
                state.irreducible.expand(&irreducible)
            };
            for ik in 0..num_k {
                let energy = energies[(band, ik)];
                // The same weighting policy as the relaxation-time stage, so
                // a purely elastic iteration reproduces it exactly
                let denominator = super::weighted_rate(
                    out_rates[ik] + elastic_rates[ik],
                    energy,
                    state,
                    settings.tau_weighting,
                );
                if denominator <= 0. {
                    continue;
                }
                let k_fractional = state.mesh.points()[ik].fractional;
                let incoming = inelastic::in_scattering(
                    state,
                    spin,
                    energy,
                    &k_fractional,
                    temperature,
                    settings.broadening,
                    properties,
                    g,
                )?;
                let thermal = -df0_de(energy, fermi_level, temperature) / ELECTRON_CHARGE;
                for axis in 0..3 {
                    let force = velocities[(band, ik, axis)] * thermal;
                    updated[(band, ik, axis)] = (incoming[axis] + force) / denominator;
                }
            }
        }
        next.insert(spin, updated);
    }
    Ok(next)
}

/// Mobility tensors and thermally averaged relaxation times with each
/// mechanism taken alone, from its own relaxation-time distribution
#[allow(clippy::type_complexity)]
fn separated(
    state: &TransportState,
    settings: &Settings,
    id: usize,
    it: usize,
) -> Result<(
    Vec<(&'static str, Matrix3<f64>)>,
    Vec<(&'static str, f64)>,
)> {
    let mut mobilities = Vec::with_capacity(state.mechanisms.len());
    let mut times = Vec::with_capacity(state.mechanisms.len());
    for (m, mechanism) in state.mechanisms.iter().enumerate() {
        let distribution =
            rta::initial_distribution(state, id, it, settings.tau_weighting, Some(m));
        let moments = rta::moments(state, &distribution, id, it);
        let (_, mobility, _, _) = rta::tensors(state, &moments, id, it)?;
        mobilities.push((mechanism.name(), mobility));
        times.push((mechanism.name(), mean_relaxation_time(state, settings, id, it, m)));
    }
    Ok((mobilities, times))
}

/// Fermi-window average of the single-mechanism relaxation time,
/// `⟨τ⟩ = Σ V (−∂f₀/∂E) / ν  ÷  Σ V (−∂f₀/∂E)`
fn mean_relaxation_time(
    state: &TransportState,
    settings: &Settings,
    id: usize,
    it: usize,
    mechanism: usize,
) -> f64 {
    let fermi_level = state.fermi_levels[(id, it)];
    let temperature = state.temperatures[it];
    let mut numerator = 0.;
    let mut denominator = 0.;
    for (s, &spin) in state.spins.iter().enumerate() {
        let energies = &state.bands.energies[&spin];
        for band in 0..energies.nrows() {
            let rates = state.expand_rate(mechanism, s, band, id, it);
            for ik in 0..energies.ncols() {
                let energy = energies[(band, ik)];
                let rate =
                    super::weighted_rate(rates[ik], energy, state, settings.tau_weighting);
                if rate <= 0. {
                    continue;
                }
                let weight =
                    -df0_de(energy, fermi_level, temperature) * state.mesh.volume(ik);
                numerator += weight / rate;
                denominator += weight;
            }
        }
    }
    if denominator > 0. {
        numerator / denominator
    } else {
        0.
    }
}

/// Convenience check used by the solver driver: a mechanism list with no
/// inelastic member short-circuits the iteration entirely
pub fn is_purely_elastic(mechanisms: &[Mechanism]) -> bool {
    mechanisms.iter().all(Mechanism::is_elastic)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn elastic_only_selections_short_circuit() {
        assert!(is_purely_elastic(&[
            Mechanism::AcousticDeformation,
            Mechanism::IonizedImpurity,
        ]));
        assert!(!is_purely_elastic(&[
            Mechanism::AcousticDeformation,
            Mechanism::PolarOptical,
        ]));
    }
}
