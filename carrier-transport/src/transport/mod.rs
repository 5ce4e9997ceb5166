//! Boltzmann transport solver
//!
//! The relaxation-time solution is the zeroth iterate of the full iterative
//! solve, so both share one representation: the vector distribution
//! correction `g` on the full mesh. Transport tensors are Onsager moments of
//! `v ⊗ g` weighted by powers of `E − E_F`.

pub mod ibte;
pub mod rta;

use crate::bandstructure::Spin;
use crate::error::Result;
use crate::settings::{MaterialProperties, Settings, TauWeighting};
use crate::state::TransportState;
use itertools::Itertools;
use nalgebra::Matrix3;
use ndarray::Array3;
use rayon::prelude::*;
use std::collections::BTreeMap;

/// Distribution corrections per spin channel, `[band, k_full, 3]` in
/// s·m/(J·s) (τ v ∂f/∂E)
pub type Distribution = BTreeMap<Spin, Array3<f64>>;

/// Progress of the solver through one (doping, temperature) cell
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolverStage {
    Initialized,
    RteSolved,
    IbteIterating { iteration: usize },
    Converged { iterations: usize },
    MaxIterationsReached,
}

/// Convergence predicate on successive conductivity tensors. The iterative
/// solve is generic over this so tests can inject exact or pathological
/// criteria.
pub trait ConvergenceCriterion: Sync {
    fn converged(&self, previous: &Matrix3<f64>, current: &Matrix3<f64>) -> bool;
}

/// Relative Frobenius-norm change below a tolerance
pub struct RelativeTensorChange {
    pub tolerance: f64,
}

impl ConvergenceCriterion for RelativeTensorChange {
    fn converged(&self, previous: &Matrix3<f64>, current: &Matrix3<f64>) -> bool {
        let scale = previous.norm().max(f64::MIN_POSITIVE);
        (current - previous).norm() / scale < self.tolerance
    }
}

/// Transport tensors of one (doping, temperature) cell. All tensors are 3×3
/// in SI units: conductivity in S/m, mobility in m²/(V·s), Seebeck in V/K,
/// electronic thermal conductivity in W/(m·K).
#[derive(Clone, Debug)]
pub struct TransportResult {
    pub doping: f64,
    pub temperature: f64,
    pub fermi_level: f64,
    pub conductivity: Matrix3<f64>,
    pub mobility: Matrix3<f64>,
    pub seebeck: Matrix3<f64>,
    pub electronic_thermal_conductivity: Matrix3<f64>,
    /// Mobility with only a single mechanism active, when requested
    pub mechanism_mobilities: Option<Vec<(&'static str, Matrix3<f64>)>>,
    /// Thermally averaged relaxation time per mechanism in s, when requested
    pub mechanism_relaxation_times: Option<Vec<(&'static str, f64)>>,
    pub converged: bool,
    pub iterations: usize,
}

/// Largest relative deviation of a tensor from its transpose. Transport
/// tensors of a crystal are symmetric; this is checked post hoc rather than
/// enforced, since a large asymmetry points at an unconverged distribution.
pub fn tensor_asymmetry(tensor: &Matrix3<f64>) -> f64 {
    let scale = tensor.norm().max(f64::MIN_POSITIVE);
    (tensor - tensor.transpose()).norm() / scale
}

/// Matthiessen combination: mechanism rates add, so the relaxation time is
/// the inverse of the summed rate
pub fn matthiessen(rates: &[f64]) -> f64 {
    let total: f64 = rates.iter().sum();
    if total > 0. {
        1. / total
    } else {
        0.
    }
}

/// Apply the relaxation-time weighting policy to a summed rate.
///
/// `Uniform` leaves it alone; `DosWeighted` scales by the density of states
/// at the state energy normalised to its mean over the grid, so the policy
/// is a dimensionless reweighting.
pub(crate) fn weighted_rate(
    rate: f64,
    energy: f64,
    state: &TransportState,
    weighting: TauWeighting,
) -> f64 {
    match weighting {
        TauWeighting::Uniform => rate,
        TauWeighting::DosWeighted => {
            let occupied: Vec<f64> = state
                .dos
                .values
                .iter()
                .copied()
                .filter(|&d| d > 0.)
                .collect();
            if occupied.is_empty() {
                return rate;
            }
            let mean = occupied.iter().sum::<f64>() / occupied.len() as f64;
            let local = state.dos.at(energy);
            if local > 0. {
                rate * mean / local
            } else {
                rate
            }
        }
    }
}

/// Solve every (doping, temperature) cell. Cells are independent, so they
/// run in parallel over a shared read-only state.
pub fn solve(
    state: &TransportState,
    settings: &Settings,
    properties: &MaterialProperties,
) -> Result<Vec<TransportResult>> {
    let criterion = RelativeTensorChange {
        tolerance: settings.ibte.tolerance,
    };
    let cells: Vec<(usize, usize)> = (0..state.doping.len())
        .cartesian_product(0..state.temperatures.len())
        .collect();
    cells
        .par_iter()
        .map(|&(id, it)| ibte::solve_cell(state, settings, properties, id, it, &criterion))
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn matthiessen_is_the_harmonic_combination() {
        let tau = matthiessen(&[1. / 2e-14, 1. / 3e-14]);
        approx::assert_relative_eq!(1. / tau, 1. / 2e-14 + 1. / 3e-14, max_relative = 1e-12);
    }

    #[test]
    fn matthiessen_of_nothing_is_infinite_lifetime_guarded() {
        assert_eq!(matthiessen(&[]), 0.);
    }

    proptest::proptest! {
        /// The combined relaxation time is harmonic: never longer than the
        /// fastest mechanism alone, and exactly the inverse of the summed
        /// rates
        #[test]
        fn matthiessen_combination_is_harmonic(
            rates in proptest::collection::vec(1e10f64..1e15, 1..6)
        ) {
            let tau = matthiessen(&rates);
            let fastest = rates.iter().copied().fold(f64::MIN, f64::max);
            proptest::prop_assert!(tau <= 1. / fastest);
            let total: f64 = rates.iter().sum();
            proptest::prop_assert!((tau * total - 1.).abs() < 1e-12);
        }
    }

    #[test]
    fn relative_change_criterion_accepts_identical_tensors() {
        let criterion = RelativeTensorChange { tolerance: 1e-6 };
        let tensor = Matrix3::identity() * 3.2;
        assert!(criterion.converged(&tensor, &tensor));
        assert!(!criterion.converged(&tensor, &(tensor * 2.)));
    }

    #[test]
    fn symmetric_tensors_have_zero_asymmetry() {
        let symmetric = Matrix3::new(1., 2., 3., 2., 5., 6., 3., 6., 9.);
        approx::assert_relative_eq!(tensor_asymmetry(&symmetric), 0.);
        let skewed = Matrix3::new(1., 2., 3., -2., 5., 6., 3., 6., 9.);
        assert!(tensor_asymmetry(&skewed) > 0.1);
    }
}
