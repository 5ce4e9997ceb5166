//! Reduction of a full mesh to the symmetry-irreducible wedge
//!
//! Expensive per-k calculations run on the irreducible set only; the
//! surjective map back onto the full mesh recovers quantities everywhere by
//! symmetry expansion.

use crate::mesh::{wrap_fractional, KMesh};
use nalgebra::{Matrix3, Vector3};
use std::collections::HashMap;

/// The point-group operations of the crystal, as integer rotation matrices
/// acting on fractional reciprocal coordinates.
///
/// Time reversal is always applied: -k is equivalent to k even without an
/// inversion centre.
#[derive(Clone, Debug)]
pub struct SymmetryOperations {
    rotations: Vec<Matrix3<i32>>,
}

impl SymmetryOperations {
    pub fn new(rotations: Vec<Matrix3<i32>>) -> Self {
        let mut rotations = rotations;
        if rotations.is_empty() {
            rotations.push(Matrix3::identity());
        }
        Self { rotations }
    }

    /// The trivial group, containing only the identity
    pub fn identity() -> Self {
        Self::new(vec![Matrix3::identity()])
    }

    pub fn rotations(&self) -> &[Matrix3<i32>] {
        &self.rotations
    }

    /// All images of a fractional k-point under the group and time reversal,
    /// wrapped into the first zone
    pub fn orbit(&self, k: &Vector3<f64>) -> Vec<Vector3<f64>> {
        let mut images = Vec::with_capacity(2 * self.rotations.len());
        for rotation in &self.rotations {
            let rotated = rotation.map(|x| x as f64) * k;
            images.push(wrap_fractional(&rotated));
            images.push(wrap_fractional(&-rotated));
        }
        images
    }
}

/// The irreducible wedge of a full mesh together with the surjective map
/// from full-mesh indices onto irreducible indices.
#[derive(Clone, Debug)]
pub struct IrreducibleMesh {
    /// Indices into the full mesh of the chosen representatives
    ir_indices: Vec<usize>,
    /// For every full-mesh point, the position of its representative in
    /// `ir_indices`
    ir_index_of_full: Vec<usize>,
    /// Number of full-mesh points represented by each irreducible point
    weights: Vec<usize>,
}

impl IrreducibleMesh {
    /// Reduce `mesh` under `symmetry`.
    ///
    /// Points are matched by hashing their wrapped fractional coordinates on
    /// a fine lattice, so meshes whose points are not exactly representable
    /// still reduce deterministically.
    pub fn reduce(mesh: &KMesh, symmetry: &SymmetryOperations) -> Self {
        let index_of_coordinate: HashMap<[i64; 3], usize> = mesh
            .fractional_coordinates()
            .enumerate()
            .map(|(index, k)| (hash_key(k), index))
            .collect();

        let num_full = mesh.num_points();
        let mut ir_indices = Vec::new();
        let mut ir_index_of_full = vec![usize::MAX; num_full];
        let mut weights = Vec::new();

        for (full_index, k) in mesh.fractional_coordinates().enumerate() {
            if ir_index_of_full[full_index] != usize::MAX {
                continue;
            }
            // This point opens a new orbit; it becomes the representative.
            // It always maps to itself, whether or not the identity is among
            // the supplied rotations.
            let ir_index = ir_indices.len();
            ir_indices.push(full_index);
            ir_index_of_full[full_index] = ir_index;
            weights.push(1);
            for image in symmetry.orbit(k) {
                if let Some(&equivalent) = index_of_coordinate.get(&hash_key(&image)) {
                    if equivalent != full_index
                        && ir_index_of_full[equivalent] == usize::MAX
                    {
                        ir_index_of_full[equivalent] = ir_index;
                        weights[ir_index] += 1;
                    }
                }
            }
        }

        Self {
            ir_indices,
            ir_index_of_full,
            weights,
        }
    }

    pub fn num_irreducible(&self) -> usize {
        self.ir_indices.len()
    }

    /// Full-mesh indices of the irreducible representatives
    pub fn ir_indices(&self) -> &[usize] {
        &self.ir_indices
    }

    /// The representative (irreducible index) of full-mesh point `full_index`
    pub fn ir_index_of(&self, full_index: usize) -> usize {
        self.ir_index_of_full[full_index]
    }

    pub fn map(&self) -> &[usize] {
        &self.ir_index_of_full
    }

    /// Multiplicity of each irreducible point
    pub fn weights(&self) -> &[usize] {
        &self.weights
    }

    /// Scatter a per-irreducible array onto the full mesh
    pub fn expand<T: Copy>(&self, irreducible: &[T]) -> Vec<T> {
        assert_eq!(irreducible.len(), self.num_irreducible());
        self.ir_index_of_full
            .iter()
            .map(|&ir| irreducible[ir])
            .collect()
    }
}

fn hash_key(k: &Vector3<f64>) -> [i64; 3] {
    let wrapped = wrap_fractional(k);
    let mut key = [0i64; 3];
    for (slot, component) in key.iter_mut().zip(wrapped.iter()) {
        let scaled = (component * 1e7).round();
        // -0.5 and 0.5 are the same zone-boundary plane
        *slot = if scaled == 5_000_000. {
            -5_000_000
        } else {
            scaled as i64
        };
    }
    key
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::{KMesh, ReciprocalLattice};
    use nalgebra::Matrix3;

    fn cubic_mesh(n: usize) -> KMesh {
        let lattice =
            ReciprocalLattice::from_real_lattice(&(Matrix3::identity() * 5e-10)).unwrap();
        KMesh::gamma_centred([n, n, n], lattice)
    }

    /// The full cubic point group restricted to the generators we need for
    /// the tests: the three axis permutations combined with sign flips come
    /// from orbit() applying time reversal on top of these.
    fn cubic_rotations() -> SymmetryOperations {
        let mut rotations = Vec::new();
        let permutations: [[usize; 3]; 6] = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        for permutation in permutations {
            for signs in 0..8 {
                let mut rotation = Matrix3::zeros();
                for (row, &column) in permutation.iter().enumerate() {
                    let sign = if (signs >> row) & 1 == 1 { -1 } else { 1 };
                    rotation[(row, column)] = sign;
                }
                rotations.push(rotation);
            }
        }
        SymmetryOperations::new(rotations)
    }

    #[test]
    fn identity_reduction_is_trivial() {
        let mesh = cubic_mesh(4);
        let ir = IrreducibleMesh::reduce(&mesh, &SymmetryOperations::identity());
        // Time reversal alone still folds k onto -k
        assert!(ir.num_irreducible() <= mesh.num_points());
        assert_eq!(ir.weights().iter().sum::<usize>(), mesh.num_points());
    }

    #[test]
    fn cubic_reduction_covers_the_full_mesh() {
        let mesh = cubic_mesh(4);
        let ir = IrreducibleMesh::reduce(&mesh, &cubic_rotations());
        assert!(ir.num_irreducible() < mesh.num_points());
        assert_eq!(ir.weights().iter().sum::<usize>(), mesh.num_points());
        // Every full point has a representative
        for &index in ir.map() {
            assert!(index < ir.num_irreducible());
        }
    }

    #[test]
    fn reduction_with_a_bare_rotation_generator_covers_the_mesh() {
        // A generator set without the identity: every point must still be
        // assigned a representative, itself included
        let mesh = cubic_mesh(4);
        let quarter_turn = Matrix3::new(0, -1, 0, 1, 0, 0, 0, 0, 1);
        let ir =
            IrreducibleMesh::reduce(&mesh, &SymmetryOperations::new(vec![quarter_turn]));
        assert_eq!(ir.weights().iter().sum::<usize>(), mesh.num_points());
        for &representative in ir.map() {
            assert!(representative < ir.num_irreducible());
        }
    }

    #[test]
    fn expansion_is_weight_consistent() {
        let mesh = cubic_mesh(4);
        let ir = IrreducibleMesh::reduce(&mesh, &cubic_rotations());
        let irreducible: Vec<f64> = (0..ir.num_irreducible()).map(|i| i as f64 + 1.).collect();
        let full = ir.expand(&irreducible);
        // The weighted average over the full mesh of each orbit recovers the
        // irreducible value exactly
        for (ir_index, &value) in irreducible.iter().enumerate() {
            let orbit: Vec<f64> = full
                .iter()
                .zip(ir.map())
                .filter(|(_, &rep)| rep == ir_index)
                .map(|(&v, _)| v)
                .collect();
            assert_eq!(orbit.len(), ir.weights()[ir_index]);
            let mean = orbit.iter().sum::<f64>() / orbit.len() as f64;
            approx::assert_relative_eq!(mean, value);
        }
    }
}
