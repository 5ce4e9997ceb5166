//! Validated run settings and material properties
//!
//! On-disk loading and validation are performed by an external collaborator;
//! these structs are the interface it hands to the core. Every required
//! material property is an `Option` so a missing value is detected by the
//! mechanism registry before any expensive work starts.

use crate::error::ConfigurationError;
use crate::scattering::Mechanism;
use serde::Deserialize;

/// Numeric material properties required by the scattering mechanisms.
///
/// Units follow the upstream ab-initio conventions: deformation potentials in
/// eV, the elastic constant in Pa, dielectric constants relative to vacuum,
/// the polar phonon frequency in THz.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct MaterialProperties {
    pub static_dielectric: Option<f64>,
    pub high_frequency_dielectric: Option<f64>,
    /// Deformation potential of the band edge in eV; a single value is
    /// applied to both carrier types
    pub deformation_potential: Option<f64>,
    /// Spherically averaged elastic constant in Pa
    pub elastic_constant: Option<f64>,
    /// Dimensionless electromechanical coupling coefficient
    pub piezoelectric_coefficient: Option<f64>,
    pub donor_charge: Option<f64>,
    pub acceptor_charge: Option<f64>,
    /// Polar optical phonon frequency in THz
    pub polar_phonon_frequency: Option<f64>,
}

impl MaterialProperties {
    /// Fetch a property by name, failing with the mechanism that needs it
    pub(crate) fn require(
        &self,
        mechanism: &'static str,
        property: &'static str,
    ) -> Result<f64, ConfigurationError> {
        let value = match property {
            "static_dielectric" => self.static_dielectric,
            "high_frequency_dielectric" => self.high_frequency_dielectric,
            "deformation_potential" => self.deformation_potential,
            "elastic_constant" => self.elastic_constant,
            "piezoelectric_coefficient" => self.piezoelectric_coefficient,
            "donor_charge" => self.donor_charge,
            "acceptor_charge" => self.acceptor_charge,
            "polar_phonon_frequency" => self.polar_phonon_frequency,
            _ => None,
        };
        value.ok_or(ConfigurationError::MissingMaterialProperty {
            mechanism,
            property,
        })
    }
}

/// How the per-state relaxation time entering the transport moments is
/// normalised. `Uniform` inverts the summed rates directly; `DosWeighted`
/// rescales each rate by the grid-mean density of states over the value at
/// the state energy, reproducing the weighted-lambda convention of older
/// codes without changing units.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub enum TauWeighting {
    Uniform,
    DosWeighted,
}

impl Default for TauWeighting {
    fn default() -> Self {
        Self::Uniform
    }
}

/// Convergence controls for the iterative Boltzmann solve
#[derive(Clone, Debug, Deserialize)]
pub struct IbteSettings {
    pub maximum_iterations: usize,
    /// Relative change in the conductivity tensor below which the iteration
    /// is converged
    pub tolerance: f64,
}

impl Default for IbteSettings {
    fn default() -> Self {
        Self {
            maximum_iterations: 50,
            tolerance: 1e-4,
        }
    }
}

/// Controls for adaptive mesh densification
#[derive(Clone, Debug, Deserialize)]
pub struct DensificationSettings {
    /// Hard ceiling on the total number of mesh points
    pub maximum_points: usize,
    /// Relative change of the transport-window DOS between iterations below
    /// which densification stops
    pub tolerance: f64,
    /// Points per Fibonacci shell inserted around each extremum
    pub points_per_shell: usize,
    /// Number of shells per extremum per iteration
    pub shells: usize,
}

impl Default for DensificationSettings {
    fn default() -> Self {
        Self {
            maximum_points: 20_000,
            tolerance: 5e-3,
            points_per_shell: 24,
            shells: 3,
        }
    }
}

/// The complete validated settings object handed to the pipeline
#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// Selected scattering mechanisms
    pub mechanisms: Vec<Mechanism>,
    /// Signed carrier concentrations in cm⁻³; negative selects
    /// electron-dominated doping
    pub doping: Vec<f64>,
    /// Temperatures in K
    pub temperatures: Vec<f64>,
    /// Width of the Gaussian standing in for the energy-conserving delta, eV
    pub broadening: f64,
    /// Ratio of interpolation stars to coarse k-points
    pub interpolation_factor: f64,
    /// Rigid shift opening the band gap, eV
    pub scissor: Option<f64>,
    /// Bands whose interpolated range lies entirely outside
    /// [edge - cutoff, edge + cutoff] are dropped, eV
    pub energy_cutoff: Option<f64>,
    /// Half-width of the transport window around the Fermi level used by the
    /// densifier and the DOS convergence test, eV
    pub transport_window: f64,
    /// Energy step of the density-of-states grid, eV
    pub dos_step: f64,
    pub tau_weighting: TauWeighting,
    pub ibte: IbteSettings,
    pub densification: DensificationSettings,
    /// Also compute per-mechanism separated mobilities
    pub separate_mechanism_mobilities: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mechanisms: vec![Mechanism::AcousticDeformation],
            doping: vec![-1e18],
            temperatures: vec![300.],
            broadening: 0.01,
            interpolation_factor: 5.,
            scissor: None,
            energy_cutoff: Some(1.5),
            transport_window: 0.25,
            dos_step: 0.005,
            tau_weighting: TauWeighting::default(),
            ibte: IbteSettings::default(),
            densification: DensificationSettings::default(),
            separate_mechanism_mobilities: false,
        }
    }
}

impl Settings {
    /// Reject mutually incompatible or empty settings before the pipeline
    /// allocates anything
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.mechanisms.is_empty() {
            return Err(ConfigurationError::IncompatibleSettings(
                "no scattering mechanisms selected".into(),
            ));
        }
        if self.doping.is_empty() || self.temperatures.is_empty() {
            return Err(ConfigurationError::IncompatibleSettings(
                "the doping/temperature grid is empty".into(),
            ));
        }
        if self.doping.iter().any(|c| *c == 0.) {
            return Err(ConfigurationError::IncompatibleSettings(
                "a doping concentration of exactly zero does not select a carrier type".into(),
            ));
        }
        if self.temperatures.iter().any(|t| *t <= 0.) {
            return Err(ConfigurationError::IncompatibleSettings(
                "temperatures must be positive".into(),
            ));
        }
        if self.broadening <= 0. {
            return Err(ConfigurationError::IncompatibleSettings(
                "the Gaussian broadening width must be positive".into(),
            ));
        }
        if self.interpolation_factor < 1. {
            return Err(ConfigurationError::IncompatibleSettings(
                "the interpolation factor must be at least one".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn default_settings_validate() {
        Settings::default().validate().unwrap();
    }

    #[test]
    fn zero_doping_is_rejected() {
        let settings = Settings {
            doping: vec![0.],
            ..Settings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn missing_property_names_the_mechanism() {
        let properties = MaterialProperties::default();
        let error = properties
            .require("ACD", "elastic_constant")
            .unwrap_err();
        let message = format!("{}", error);
        assert!(message.contains("ACD"));
        assert!(message.contains("elastic_constant"));
    }
}
