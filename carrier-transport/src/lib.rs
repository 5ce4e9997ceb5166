//! Carrier transport from first-principles band structures
//!
//! Takes a coarse ab-initio band structure and produces electron and hole
//! transport tensors: conductivity, mobility, Seebeck coefficient and
//! electronic thermal conductivity over a doping × temperature grid. The
//! stages are
//!
//! 1. Fourier interpolation of the coarse bands onto a dense mesh
//!    ([`bandstructure::interpolation`]), with adaptive densification around
//!    the band edges ([`bandstructure::densify`]);
//! 2. periodic Voronoi tessellation and symmetry reduction of the dense mesh
//!    (the `carrier-mesher` crate);
//! 3. self-consistent Fermi levels per (doping, temperature) cell
//!    ([`fermi`]);
//! 4. golden-rule scattering rates for the selected mechanisms
//!    ([`scattering`]);
//! 5. the Boltzmann solve, relaxation-time and iterative ([`transport`]).
//!
//! [`run`] drives the whole pipeline; each stage is public so callers can
//! intercept intermediate results.

pub mod bandstructure;
pub mod constants;
pub mod error;
pub mod fermi;
pub mod scattering;
pub mod settings;
pub mod state;
pub mod transport;

pub use error::{ConfigurationError, Result, TransportError};
pub use settings::{MaterialProperties, Settings};
pub use transport::TransportResult;

use bandstructure::densify::Densifier;
use bandstructure::interpolation::ShanklandInterpolator;
use bandstructure::BandStructure;
use carrier_mesher::{IrreducibleMesh, KMesh};
use state::TransportState;

/// Run the full pipeline: interpolate, densify, tessellate, solve the Fermi
/// levels, compute scattering rates and assemble transport tensors for every
/// (doping, temperature) cell.
///
/// `initial_dimensions` seeds the dense Γ-centred mesh before densification;
/// a few multiples of the coarse mesh along each axis is typical.
pub fn run(
    band_structure: &BandStructure,
    initial_dimensions: [usize; 3],
    settings: &Settings,
    properties: &MaterialProperties,
) -> Result<Vec<TransportResult>> {
    settings.validate()?;
    scattering::validate_properties(&settings.mechanisms, properties)?;

    let interpolator = ShanklandInterpolator::fit(band_structure, settings.interpolation_factor)?;
    let seed = KMesh::gamma_centred(initial_dimensions, band_structure.reciprocal_lattice());
    let densified = Densifier::new(&interpolator, settings).run(seed)?;
    if !densified.converged {
        tracing::warn!(
            iterations = densified.iterations,
            "transport-window DOS not converged; tensors carry densification error"
        );
    }

    let irreducible = IrreducibleMesh::reduce(&densified.mesh, band_structure.symmetry());
    tracing::info!(
        full = densified.mesh.num_points(),
        irreducible = irreducible.num_irreducible(),
        "dense mesh reduced"
    );

    let mut state = TransportState::new(
        densified.mesh,
        irreducible,
        densified.bands,
        densified.dos,
        settings.mechanisms.clone(),
        band_structure.spin_degeneracy(),
        band_structure.cell_volume(),
        settings.doping.clone(),
        settings.temperatures.clone(),
    );
    state.solve_fermi_levels()?;
    scattering::compute_rates(&mut state, settings, properties)?;
    transport::solve(&state, settings, properties)
}
