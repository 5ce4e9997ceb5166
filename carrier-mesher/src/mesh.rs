use nalgebra::{Matrix3, Vector3};

/// The reciprocal cell of a crystal lattice.
///
/// Constructed from the real-space lattice matrix (rows are the lattice
/// vectors, in metres); the reciprocal vectors carry the conventional 2π
/// factor so the cell volume is `(2π)³ / Ω`.
#[derive(Clone, Debug)]
pub struct ReciprocalLattice {
    /// Rows are the reciprocal lattice vectors b₁, b₂, b₃ in 1/m
    matrix: Matrix3<f64>,
}

impl ReciprocalLattice {
    /// Build from a real-space lattice matrix whose rows are the lattice
    /// vectors in metres.
    ///
    /// Returns `None` when the lattice matrix is singular.
    pub fn from_real_lattice(real: &Matrix3<f64>) -> Option<Self> {
        let inverse = real.try_inverse()?;
        // b_i = 2π (A⁻¹)ᵀ rows
        let matrix = inverse.transpose() * 2. * std::f64::consts::PI;
        Some(Self { matrix })
    }

    /// Build directly from the reciprocal lattice vectors (rows, 1/m)
    pub fn from_reciprocal_vectors(matrix: Matrix3<f64>) -> Self {
        Self { matrix }
    }

    /// The reciprocal lattice vectors as a row matrix
    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.matrix
    }

    /// Volume of the reciprocal primitive cell in 1/m³
    pub fn cell_volume(&self) -> f64 {
        self.matrix.determinant().abs()
    }

    /// Convert a fractional coordinate to a cartesian wavevector in 1/m
    pub fn to_cartesian(&self, fractional: &Vector3<f64>) -> Vector3<f64> {
        self.matrix.transpose() * fractional
    }
}

/// A single point of a reciprocal-space mesh.
///
/// The coordinate is fractional; the multiplicity counts how many points of
/// the full mesh the point stands for after symmetry reduction, and the
/// volume is assigned by the periodic tessellation.
#[derive(Clone, Debug)]
pub struct KPoint {
    pub fractional: Vector3<f64>,
    pub multiplicity: usize,
    pub volume: Option<f64>,
}

impl KPoint {
    pub fn new(fractional: Vector3<f64>) -> Self {
        Self {
            fractional: wrap_fractional(&fractional),
            multiplicity: 1,
            volume: None,
        }
    }
}

/// Wrap a fractional coordinate into the first zone, [-1/2, 1/2)
pub fn wrap_fractional(k: &Vector3<f64>) -> Vector3<f64> {
    k.map(|x| {
        let wrapped = x - x.round();
        // `round` sends 0.5 to 1.0 so the result is already in [-0.5, 0.5]
        if wrapped >= 0.5 {
            wrapped - 1.
        } else {
            wrapped
        }
    })
}

/// A mesh of reciprocal-space points together with its cell metadata
#[derive(Clone, Debug)]
pub struct KMesh {
    points: Vec<KPoint>,
    lattice: ReciprocalLattice,
    /// Dimensions of the regular grid the mesh was seeded from, when it was
    regular_dimensions: Option<[usize; 3]>,
}

impl KMesh {
    /// A Γ-centred regular mesh with the given subdivisions along each
    /// reciprocal axis
    pub fn gamma_centred(dimensions: [usize; 3], lattice: ReciprocalLattice) -> Self {
        let [n1, n2, n3] = dimensions;
        let mut points = Vec::with_capacity(n1 * n2 * n3);
        for i in 0..n1 {
            for j in 0..n2 {
                for k in 0..n3 {
                    let fractional = Vector3::new(
                        i as f64 / n1 as f64,
                        j as f64 / n2 as f64,
                        k as f64 / n3 as f64,
                    );
                    points.push(KPoint::new(fractional));
                }
            }
        }
        Self {
            points,
            lattice,
            regular_dimensions: Some(dimensions),
        }
    }

    /// A mesh from an explicit list of fractional coordinates
    pub fn from_fractional_points(points: Vec<Vector3<f64>>, lattice: ReciprocalLattice) -> Self {
        Self {
            points: points.into_iter().map(KPoint::new).collect(),
            lattice,
            regular_dimensions: None,
        }
    }

    /// Append extra points, as produced by adaptive densification. The mesh
    /// loses its regular provenance and must be re-tessellated.
    pub fn extend(&mut self, extra: impl IntoIterator<Item = Vector3<f64>>) {
        self.regular_dimensions = None;
        for point in extra {
            let point = KPoint::new(point);
            // Densification shells can brush against existing points; a
            // duplicate would give the tessellator a degenerate bisector
            if !self
                .points
                .iter()
                .any(|p| (p.fractional - point.fractional).norm() < 1e-8)
            {
                self.points.push(point);
            }
        }
    }

    pub fn points(&self) -> &[KPoint] {
        &self.points
    }

    pub fn num_points(&self) -> usize {
        self.points.len()
    }

    pub fn lattice(&self) -> &ReciprocalLattice {
        &self.lattice
    }

    pub fn regular_dimensions(&self) -> Option<[usize; 3]> {
        self.regular_dimensions
    }

    pub fn fractional_coordinates(&self) -> impl Iterator<Item = &Vector3<f64>> {
        self.points.iter().map(|p| &p.fractional)
    }

    /// Cartesian coordinate of point `index` in 1/m
    pub fn cartesian(&self, index: usize) -> Vector3<f64> {
        self.lattice.to_cartesian(&self.points[index].fractional)
    }

    /// Attach tessellation volumes to the points. Panics if the length does
    /// not match the mesh, which indicates a caller bug rather than bad data.
    pub fn assign_volumes(&mut self, volumes: &[f64]) {
        assert_eq!(
            volumes.len(),
            self.points.len(),
            "one volume per mesh point"
        );
        for (point, &volume) in self.points.iter_mut().zip(volumes) {
            point.volume = Some(volume);
        }
    }

    /// The integration volume of point `index`, falling back to an equal
    /// share of the cell when the mesh has not been tessellated
    pub fn volume(&self, index: usize) -> f64 {
        self.points[index]
            .volume
            .unwrap_or_else(|| self.lattice.cell_volume() / self.points.len() as f64)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use nalgebra::{Matrix3, Vector3};

    fn cubic_lattice(a: f64) -> ReciprocalLattice {
        ReciprocalLattice::from_real_lattice(&(Matrix3::identity() * a)).unwrap()
    }

    #[test]
    fn gamma_centred_mesh_has_expected_count_and_contains_gamma() {
        let mesh = KMesh::gamma_centred([4, 4, 4], cubic_lattice(5e-10));
        assert_eq!(mesh.num_points(), 64);
        assert!(mesh
            .fractional_coordinates()
            .any(|k| k.norm() < 1e-12));
    }

    #[test]
    fn fractional_coordinates_are_wrapped_to_first_zone() {
        let mesh = KMesh::gamma_centred([5, 5, 5], cubic_lattice(5e-10));
        for k in mesh.fractional_coordinates() {
            for component in k.iter() {
                assert!(*component >= -0.5 && *component < 0.5);
            }
        }
    }

    #[test]
    fn reciprocal_cell_volume_of_cubic_lattice() {
        let a = 5e-10;
        let lattice = cubic_lattice(a);
        let expected = (2. * std::f64::consts::PI / a).powi(3);
        approx::assert_relative_eq!(lattice.cell_volume(), expected, max_relative = 1e-12);
    }

    #[test]
    fn extend_skips_duplicates() {
        let mut mesh = KMesh::gamma_centred([2, 2, 2], cubic_lattice(5e-10));
        let n = mesh.num_points();
        mesh.extend(vec![Vector3::new(0., 0., 0.), Vector3::new(0.1, 0., 0.)]);
        assert_eq!(mesh.num_points(), n + 1);
    }
}
