//! Reciprocal-space meshes for Brillouin-zone integration
//!
//! This crate provides the geometric substrate for carrier transport
//! calculations: k-point meshes in fractional coordinates, reduction to the
//! symmetry-irreducible wedge, and a periodic Voronoi tessellation which
//! assigns an integration volume to every point of a (possibly non-uniform)
//! mesh. The physics lives in the `carrier-transport` crate; nothing here
//! knows about bands or energies.

mod mesh;
mod symmetry;
mod tessellation;

pub use mesh::{wrap_fractional, KMesh, KPoint, ReciprocalLattice};
pub use symmetry::{IrreducibleMesh, SymmetryOperations};
pub use tessellation::{tessellate, TessellationError, VOLUME_TOLERANCE};
