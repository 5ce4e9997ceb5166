//! Coarse electronic structure inputs
//!
//! The upstream ab-initio parser (an external collaborator) hands the core a
//! validated [`BandStructure`]: band energies on a coarse k-mesh, the lattice
//! geometry, the electron count and the crystal symmetry operations.

pub mod densify;
pub mod interpolation;

use carrier_mesher::{ReciprocalLattice, SymmetryOperations};
use nalgebra::{Matrix3, Vector3};
use ndarray::Array2;
use serde::Deserialize;
use std::collections::BTreeMap;

/// Spin channel of a band. Spin-degenerate calculations carry a single `Up`
/// channel and fold the degeneracy of two into the density-of-states
/// prefactors.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Spin {
    Up,
    Down,
}

/// Coarse band structure from the upstream ab-initio calculation
#[derive(Clone, Debug)]
pub struct BandStructure {
    /// Fractional k-points of the coarse mesh
    kpoints: Vec<Vector3<f64>>,
    /// Band energies in eV, one `[n_bands, n_kpoints]` array per spin
    bands: BTreeMap<Spin, Array2<f64>>,
    /// Real-space lattice matrix, rows are the lattice vectors in metres
    real_lattice: Matrix3<f64>,
    num_electrons: f64,
    symmetry: SymmetryOperations,
    /// Index of the highest valence band; `None` for metals
    valence_band_index: Option<usize>,
}

impl BandStructure {
    pub fn new(
        kpoints: Vec<Vector3<f64>>,
        bands: BTreeMap<Spin, Array2<f64>>,
        real_lattice: Matrix3<f64>,
        num_electrons: f64,
        symmetry: SymmetryOperations,
        valence_band_index: Option<usize>,
    ) -> Self {
        for energies in bands.values() {
            assert_eq!(
                energies.ncols(),
                kpoints.len(),
                "one energy per band per coarse k-point"
            );
        }
        Self {
            kpoints,
            bands,
            real_lattice,
            num_electrons,
            symmetry,
            valence_band_index,
        }
    }

    pub fn kpoints(&self) -> &[Vector3<f64>] {
        &self.kpoints
    }

    pub fn bands(&self) -> &BTreeMap<Spin, Array2<f64>> {
        &self.bands
    }

    pub fn spins(&self) -> impl Iterator<Item = Spin> + '_ {
        self.bands.keys().copied()
    }

    /// Spin degeneracy folded into Brillouin-zone sums: two when only a
    /// single channel is carried
    pub fn spin_degeneracy(&self) -> f64 {
        if self.bands.len() == 1 {
            2.
        } else {
            1.
        }
    }

    pub fn real_lattice(&self) -> &Matrix3<f64> {
        &self.real_lattice
    }

    /// Real-space primitive cell volume in m³
    pub fn cell_volume(&self) -> f64 {
        self.real_lattice.determinant().abs()
    }

    pub fn reciprocal_lattice(&self) -> ReciprocalLattice {
        ReciprocalLattice::from_real_lattice(&self.real_lattice)
            .expect("a valid band structure carries a non-singular lattice")
    }

    pub fn num_electrons(&self) -> f64 {
        self.num_electrons
    }

    pub fn symmetry(&self) -> &SymmetryOperations {
        &self.symmetry
    }

    pub fn valence_band_index(&self) -> Option<usize> {
        self.valence_band_index
    }

    pub fn is_metal(&self) -> bool {
        self.valence_band_index.is_none()
    }

    /// Valence band maximum over all spins and coarse points, in eV
    pub fn valence_band_maximum(&self) -> Option<f64> {
        let vb = self.valence_band_index?;
        self.bands
            .values()
            .flat_map(|energies| {
                energies
                    .rows()
                    .into_iter()
                    .take(vb + 1)
                    .flat_map(|row| row.to_vec())
            })
            .fold(None, |max: Option<f64>, e| {
                Some(max.map_or(e, |m| m.max(e)))
            })
    }

    /// Conduction band minimum over all spins and coarse points, in eV
    pub fn conduction_band_minimum(&self) -> Option<f64> {
        let vb = self.valence_band_index?;
        self.bands
            .values()
            .flat_map(|energies| {
                energies
                    .rows()
                    .into_iter()
                    .skip(vb + 1)
                    .flat_map(|row| row.to_vec())
            })
            .fold(None, |min: Option<f64>, e| {
                Some(min.map_or(e, |m| m.min(e)))
            })
    }
}
