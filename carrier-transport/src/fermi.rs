//! Equilibrium occupations and the self-consistent Fermi level
//!
//! The Fermi level of every (doping, temperature) cell is the root of the
//! net-charge residual `p(E_F) − n(E_F) − c`, found by bisection on the
//! energy grid of the smeared density of states. Concentrations are signed:
//! negative doping selects electron-dominated cells.

use crate::bandstructure::interpolation::DensityOfStates;
use crate::constants::{BOLTZMANN_EV, PER_CM3_TO_PER_M3};
use crate::error::ConfigurationError;

/// Arguments past which the Fermi factor saturates; avoids overflow in the
/// exponential
const EXPONENT_CLAMP: f64 = 40.;

/// Equilibrium Fermi-Dirac occupation at energy `energy` (eV)
pub fn f0(energy: f64, fermi_level: f64, temperature: f64) -> f64 {
    let x = (energy - fermi_level) / (BOLTZMANN_EV * temperature);
    if x > EXPONENT_CLAMP {
        0.
    } else if x < -EXPONENT_CLAMP {
        1.
    } else {
        1. / (1. + x.exp())
    }
}

/// Energy derivative of the Fermi-Dirac occupation, in 1/eV
pub fn df0_de(energy: f64, fermi_level: f64, temperature: f64) -> f64 {
    let kt = BOLTZMANN_EV * temperature;
    let x = (energy - fermi_level) / kt;
    if x.abs() > EXPONENT_CLAMP {
        0.
    } else {
        let occupation = 1. / (1. + x.exp());
        -occupation * (1. - occupation) / kt
    }
}

/// Bose-Einstein occupation of a mode of energy `energy` (eV)
pub fn bose(energy: f64, temperature: f64) -> f64 {
    let x = energy / (BOLTZMANN_EV * temperature);
    if x > EXPONENT_CLAMP {
        0.
    } else {
        1. / (x.exp() - 1.)
    }
}

/// A solved Fermi level and the carrier concentrations it implies
#[derive(Clone, Copy, Debug)]
pub struct FermiSolution {
    /// eV
    pub fermi_level: f64,
    /// m⁻³
    pub electron_concentration: f64,
    /// m⁻³
    pub hole_concentration: f64,
}

/// Electron and hole concentrations (m⁻³) at a trial Fermi level. States
/// above `divider` count as electrons, states below as holes.
fn concentrations(
    dos: &DensityOfStates,
    cell_volume: f64,
    divider: f64,
    fermi_level: f64,
    temperature: f64,
) -> (f64, f64) {
    let electrons = dos.integrate(|energy| {
        if energy > divider {
            f0(energy, fermi_level, temperature)
        } else {
            0.
        }
    }) / cell_volume;
    let holes = dos.integrate(|energy| {
        if energy <= divider {
            1. - f0(energy, fermi_level, temperature)
        } else {
            0.
        }
    }) / cell_volume;
    (electrons, holes)
}

/// Solve the Fermi level such that `p − n` matches the signed target
/// concentration (cm⁻³; negative selects n-type doping).
///
/// `divider` separates conduction from valence states, normally the middle
/// of the gap. The residual is monotone in the Fermi level so bisection over
/// the DOS energy range always converges when a bracket exists; a missing
/// bracket means the doping is unreachable for this band structure.
pub fn solve_fermi_level(
    dos: &DensityOfStates,
    cell_volume: f64,
    divider: f64,
    concentration: f64,
    temperature: f64,
) -> Result<FermiSolution, ConfigurationError> {
    let target = concentration * PER_CM3_TO_PER_M3;
    let residual = |fermi_level: f64| {
        let (electrons, holes) =
            concentrations(dos, cell_volume, divider, fermi_level, temperature);
        holes - electrons - target
    };

    let (mut lower, mut upper) = (
        dos.energies.first().copied().unwrap_or(divider - 1.) - 1.,
        dos.energies.last().copied().unwrap_or(divider + 1.) + 1.,
    );
    // residual is decreasing in the Fermi level: high E_F floods the
    // conduction bands with electrons
    if residual(lower) < 0. || residual(upper) > 0. {
        return Err(ConfigurationError::FermiLevelNotFound {
            concentration,
            temperature,
            residual: residual(divider),
            iterations: 0,
        });
    }

    let maximum_iterations = 200;
    for iteration in 0..maximum_iterations {
        let midpoint = 0.5 * (lower + upper);
        let value = residual(midpoint);
        if value > 0. {
            lower = midpoint;
        } else {
            upper = midpoint;
        }
        if upper - lower < 1e-12 {
            tracing::debug!(iteration, fermi = midpoint, "fermi level bisection converged");
            break;
        }
    }
    let fermi_level = 0.5 * (lower + upper);
    let (electron_concentration, hole_concentration) =
        concentrations(dos, cell_volume, divider, fermi_level, temperature);

    // Confirm the solve actually hit the target: a coarse DOS grid can leave
    // a residual plateau around the gap
    let achieved = hole_concentration - electron_concentration;
    let relative_error = ((achieved - target) / target).abs();
    if relative_error > 0.05 {
        return Err(ConfigurationError::FermiLevelNotFound {
            concentration,
            temperature,
            residual: achieved - target,
            iterations: maximum_iterations,
        });
    }

    Ok(FermiSolution {
        fermi_level,
        electron_concentration,
        hole_concentration,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bandstructure::interpolation::DensityOfStates;

    #[test]
    fn f0_limits_are_saturated() {
        assert_eq!(f0(10., 0., 300.), 0.);
        assert_eq!(f0(-10., 0., 300.), 1.);
        approx::assert_relative_eq!(f0(0., 0., 300.), 0.5);
    }

    #[test]
    fn df0_de_is_negative_and_peaked_at_the_fermi_level() {
        let at_fermi = df0_de(0., 0., 300.);
        let off_fermi = df0_de(0.1, 0., 300.);
        assert!(at_fermi < 0.);
        assert!(at_fermi.abs() > off_fermi.abs());
        // Peak value is 1/(4 kT)
        approx::assert_relative_eq!(
            at_fermi,
            -1. / (4. * BOLTZMANN_EV * 300.),
            max_relative = 1e-12
        );
    }

    #[test]
    fn bose_occupation_matches_closed_form() {
        let energy = 0.035;
        let temperature = 300.;
        let expected = 1. / ((energy / (BOLTZMANN_EV * temperature)).exp() - 1.);
        approx::assert_relative_eq!(bose(energy, temperature), expected, max_relative = 1e-12);
    }

    /// A gapped model DOS: valence states below -0.5 eV, conduction states
    /// above +0.5 eV, flat within each manifold
    fn gapped_dos() -> DensityOfStates {
        let energies: Vec<f64> = (0..4001).map(|i| -2. + i as f64 * 1e-3).collect();
        let values = energies
            .iter()
            .map(|&e| if e.abs() > 0.5 { 50. } else { 0. })
            .collect();
        DensityOfStates { energies, values }
    }

    #[test]
    fn n_type_doping_places_the_fermi_level_near_the_conduction_edge() {
        let dos = gapped_dos();
        let cell_volume = (5e-10f64).powi(3);
        let solution = solve_fermi_level(&dos, cell_volume, 0., -1e18, 300.).unwrap();
        assert!(solution.fermi_level > 0.);
        assert!(solution.electron_concentration > solution.hole_concentration);
        approx::assert_relative_eq!(
            solution.hole_concentration - solution.electron_concentration,
            -1e18 * PER_CM3_TO_PER_M3,
            max_relative = 0.05
        );
    }

    #[test]
    fn p_type_doping_mirrors_the_n_type_solution() {
        let dos = gapped_dos();
        let cell_volume = (5e-10f64).powi(3);
        let n_type = solve_fermi_level(&dos, cell_volume, 0., -1e18, 300.).unwrap();
        let p_type = solve_fermi_level(&dos, cell_volume, 0., 1e18, 300.).unwrap();
        // The model DOS is symmetric about the gap centre
        approx::assert_relative_eq!(
            n_type.fermi_level,
            -p_type.fermi_level,
            epsilon = 1e-6
        );
    }

    #[test]
    fn unreachable_doping_is_a_configuration_error() {
        let dos = gapped_dos();
        let cell_volume = (5e-10f64).powi(3);
        // More carriers than the model bands hold
        let result = solve_fermi_level(&dos, cell_volume, 0., -1e30, 300.);
        assert!(result.is_err());
    }
}
