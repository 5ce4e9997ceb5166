use carrier_mesher::TessellationError;
use miette::Diagnostic;

/// Fatal misconfiguration: the requested calculation cannot be set up.
///
/// These are raised before any expensive work is dispatched.
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum ConfigurationError {
    #[error("mechanism {mechanism} requires the material property `{property}` which is not set")]
    MissingMaterialProperty {
        mechanism: &'static str,
        property: &'static str,
    },
    #[error(
        "the coarse mesh supplies {points} k-points but only {stars} lattice stars: \
         the interpolation problem is underdetermined"
    )]
    InsufficientStars { points: usize, stars: usize },
    #[error("the interpolation normal matrix is not positive definite; the coarse mesh is degenerate")]
    IllConditionedFit,
    #[error("{0}")]
    IncompatibleSettings(String),
    #[error(
        "Fermi level search failed at c = {concentration:.3e} cm⁻³, T = {temperature} K: \
         residual {residual:.3e} after {iterations} iterations"
    )]
    FermiLevelNotFound {
        concentration: f64,
        temperature: f64,
        residual: f64,
        iterations: usize,
    },
}

/// Top level error for the transport pipeline
#[derive(thiserror::Error, Debug, Diagnostic)]
pub enum TransportError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    /// Tessellation volume leaks signal a geometry or periodicity bug; the
    /// downstream integrals would be silently wrong so this is fatal
    #[error("numerical degeneracy in the periodic tessellation: {0}")]
    NumericalDegeneracy(#[from] TessellationError),
    #[error("scattering stage failed at k-point slice starting at index {slice_start}: {message}")]
    ScatteringStage {
        slice_start: usize,
        message: String,
    },
}

pub type Result<T> = std::result::Result<T, TransportError>;
