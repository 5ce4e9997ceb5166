//! Carrier scattering rates
//!
//! The mechanism registry is a closed enum: adding a mechanism means adding a
//! variant and its prefactor/factor pair, so an unknown mechanism cannot reach
//! the dispatch loop. Rates are evaluated on the irreducible wedge only and
//! stored in the shared arena; the full-mesh view is recovered through the
//! symmetry map.
//!
//! Every rate is a Gaussian-broadened golden-rule integral over the
//! tessellated mesh,
//!
//! `ν(k) = P × Σ_{b',k'} V_{k'}/(2π)³ × F(q) × G(E_k − E_{k'} ∓ ħω, η)`
//!
//! with a k-independent prefactor `P` and a wavevector-transfer factor
//! `F(q)`. Elastic mechanisms carry no phonon offset; the polar optical
//! mechanism has emission and absorption channels offset by one quantum.

pub mod elastic;
pub mod inelastic;

use crate::bandstructure::interpolation::gaussian;
use crate::constants::ELECTRON_CHARGE;
use crate::error::{Result, TransportError};
use crate::settings::{MaterialProperties, Settings};
use crate::state::TransportState;
use carrier_mesher::wrap_fractional;
use nalgebra::Vector3;
use rayon::prelude::*;
use serde::Deserialize;

/// Irreducible points handled per dispatch slice. Slices are computed
/// independently and concatenated in index order, so the assembled rates do
/// not depend on the worker count.
const SLICE_LENGTH: usize = 64;

/// The closed registry of scattering mechanisms
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
pub enum Mechanism {
    AcousticDeformation,
    IonizedImpurity,
    Piezoelectric,
    PolarOptical,
}

impl Mechanism {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AcousticDeformation => "ACD",
            Self::IonizedImpurity => "IMP",
            Self::Piezoelectric => "PIE",
            Self::PolarOptical => "POP",
        }
    }

    pub fn is_elastic(&self) -> bool {
        !matches!(self, Self::PolarOptical)
    }

    /// Material properties the mechanism cannot run without
    pub fn required_properties(&self) -> &'static [&'static str] {
        match self {
            Self::AcousticDeformation => &["deformation_potential", "elastic_constant"],
            Self::IonizedImpurity => {
                &["static_dielectric", "donor_charge", "acceptor_charge"]
            }
            Self::Piezoelectric => &["static_dielectric", "piezoelectric_coefficient"],
            Self::PolarOptical => &[
                "static_dielectric",
                "high_frequency_dielectric",
                "polar_phonon_frequency",
            ],
        }
    }
}

/// Check every selected mechanism against the supplied material properties
/// before any expensive work is dispatched
pub fn validate_properties(
    mechanisms: &[Mechanism],
    properties: &MaterialProperties,
) -> Result<()> {
    for mechanism in mechanisms {
        for property in mechanism.required_properties() {
            properties.require(mechanism.name(), property)?;
        }
    }
    Ok(())
}

/// One emission/absorption channel of a golden-rule integral: the energy
/// offset from the initial state and the occupation weight in front of the
/// Gaussian
struct Channel {
    offset: f64,
    weight: f64,
}

/// Gaussian-broadened integral over the full tessellated mesh.
///
/// `factor` receives the squared cartesian wavevector transfer in 1/m²,
/// taken through the nearest periodic image so zone-boundary pairs carry
/// their physical (small) transfer. States with vanishing transfer are
/// skipped so diverging vertices (1/q²) never touch the self term. The
/// Gaussian is evaluated in eV and converted to a per-joule density so SI
/// prefactors come out in 1/s.
fn golden_rule_integral(
    state: &TransportState,
    spin: crate::bandstructure::Spin,
    initial_energy: f64,
    initial_k: &Vector3<f64>,
    broadening: f64,
    channels: &[Channel],
    factor: impl Fn(f64) -> f64,
) -> f64 {
    let energies = &state.bands.energies[&spin];
    let lattice = state.mesh.lattice();
    let cell = (2. * std::f64::consts::PI).powi(3);
    let mut total = 0.;
    for ik in 0..state.mesh.num_points() {
        let transfer =
            wrap_fractional(&(state.mesh.points()[ik].fractional - initial_k));
        let q_squared = lattice.to_cartesian(&transfer).norm_squared();
        if q_squared < 1e-16 {
            continue;
        }
        let vertex = factor(q_squared);
        let volume = state.mesh.volume(ik) / cell;
        for band in 0..energies.nrows() {
            let final_energy = energies[(band, ik)];
            for channel in channels {
                total += channel.weight
                    * volume
                    * vertex
                    * gaussian(initial_energy - final_energy - channel.offset, broadening);
            }
        }
    }
    // gaussian() is per eV; the prefactors are SI
    total / ELECTRON_CHARGE
}

/// Fill the scattering-rate arena for every selected mechanism and every
/// (doping, temperature) cell. Fermi levels must already be solved.
pub fn compute_rates(
    state: &mut TransportState,
    settings: &Settings,
    properties: &MaterialProperties,
) -> Result<()> {
    validate_properties(&state.mechanisms, properties)?;

    let mechanisms = state.mechanisms.clone();
    let spins = state.spins.clone();
    let num_ir = state.irreducible.num_irreducible();

    for (m, mechanism) in mechanisms.iter().enumerate() {
        tracing::info!(mechanism = mechanism.name(), "computing scattering rates");
        for id in 0..state.doping.len() {
            for it in 0..state.temperatures.len() {
                for (s, &spin) in spins.iter().enumerate() {
                    let num_bands = state.num_bands(spin);
                    let rates = dispatch_slices(num_ir, |ir| {
                        per_state_rates(
                            state, *mechanism, spin, ir, id, it, num_bands, settings,
                            properties,
                        )
                    })?;
                    for (ir, band_rates) in rates.into_iter().enumerate() {
                        for (band, rate) in band_rates.into_iter().enumerate() {
                            state.rates[[m, s, band, ir, id, it]] = rate;
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

/// Evaluate `per_point` over the irreducible indices in near-equal contiguous
/// slices, concatenating results in index order. A worker failure aborts the
/// whole stage.
fn dispatch_slices<T: Send>(
    num_ir: usize,
    per_point: impl Fn(usize) -> Result<T> + Sync,
) -> Result<Vec<T>> {
    let slices: Vec<usize> = (0..num_ir).step_by(SLICE_LENGTH).collect();
    let computed: Vec<Vec<T>> = slices
        .par_iter()
        .map(|&start| {
            let end = (start + SLICE_LENGTH).min(num_ir);
            (start..end).map(&per_point).collect::<Result<Vec<T>>>()
        })
        .collect::<Result<Vec<Vec<T>>>>()?;
    Ok(computed.into_iter().flatten().collect())
}

/// Rates of one mechanism for every band at one irreducible point
#[allow(clippy::too_many_arguments)]
fn per_state_rates(
    state: &TransportState,
    mechanism: Mechanism,
    spin: crate::bandstructure::Spin,
    ir: usize,
    id: usize,
    it: usize,
    num_bands: usize,
    settings: &Settings,
    properties: &MaterialProperties,
) -> Result<Vec<f64>> {
    let full = state.irreducible.ir_indices()[ir];
    let k_fractional = state.mesh.points()[full].fractional;
    let temperature = state.temperatures[it];

    let mut rates = Vec::with_capacity(num_bands);
    for band in 0..num_bands {
        let energy = state.bands.energies[&spin][(band, full)];
        let rate = match mechanism {
            Mechanism::AcousticDeformation
            | Mechanism::IonizedImpurity
            | Mechanism::Piezoelectric => elastic::rate(
                state,
                mechanism,
                spin,
                energy,
                &k_fractional,
                id,
                it,
                settings.broadening,
                properties,
            )?,
            Mechanism::PolarOptical => inelastic::out_rate(
                state,
                spin,
                energy,
                &k_fractional,
                temperature,
                settings.broadening,
                properties,
            )?,
        };
        if !rate.is_finite() {
            return Err(TransportError::ScatteringStage {
                slice_start: ir - ir % SLICE_LENGTH,
                message: format!(
                    "{} produced a non-finite rate for band {band}",
                    mechanism.name()
                ),
            });
        }
        rates.push(rate);
    }
    Ok(rates)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn mechanism_names_are_stable() {
        assert_eq!(Mechanism::AcousticDeformation.name(), "ACD");
        assert_eq!(Mechanism::IonizedImpurity.name(), "IMP");
        assert_eq!(Mechanism::Piezoelectric.name(), "PIE");
        assert_eq!(Mechanism::PolarOptical.name(), "POP");
    }

    #[test]
    fn only_polar_optical_is_inelastic() {
        for mechanism in [
            Mechanism::AcousticDeformation,
            Mechanism::IonizedImpurity,
            Mechanism::Piezoelectric,
        ] {
            assert!(mechanism.is_elastic());
        }
        assert!(!Mechanism::PolarOptical.is_elastic());
    }

    #[test]
    fn validation_fails_fast_on_a_missing_property() {
        let properties = MaterialProperties {
            deformation_potential: Some(8.6),
            ..MaterialProperties::default()
        };
        let result = validate_properties(&[Mechanism::AcousticDeformation], &properties);
        assert!(result.is_err());
        let message = format!("{}", result.unwrap_err());
        assert!(message.contains("elastic_constant"));
    }

    #[test]
    fn dispatch_preserves_index_order() {
        let values = dispatch_slices(200, |ir| Ok(ir * 3)).unwrap();
        assert_eq!(values.len(), 200);
        for (ir, &value) in values.iter().enumerate() {
            assert_eq!(value, ir * 3);
        }
    }

    #[test]
    fn dispatch_aborts_on_worker_failure() {
        let result = dispatch_slices(200, |ir| {
            if ir == 150 {
                Err(TransportError::ScatteringStage {
                    slice_start: 128,
                    message: "boom".into(),
                })
            } else {
                Ok(ir)
            }
        });
        assert!(result.is_err());
    }
}
