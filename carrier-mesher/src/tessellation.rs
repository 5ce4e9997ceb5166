//! Periodic Voronoi tessellation of a reciprocal-space point set
//!
//! A densified mesh is not a regular grid, so the integration weight of each
//! point is the volume of its Voronoi cell. Periodicity is handled by
//! replicating the point set across the 26 neighbouring cells: points on the
//! zone boundary are clipped against their own periodic images and no volume
//! leaks outside the primitive cell.

use crate::mesh::KMesh;
use nalgebra::Vector3;
use thiserror::Error;

/// Relative tolerance on the volume-sum invariant
pub const VOLUME_TOLERANCE: f64 = 1e-6;

/// Failure modes of the periodic tessellation.
///
/// A volume leak signals a geometry or periodicity bug and is fatal: every
/// downstream Brillouin-zone integral would be silently wrong.
#[derive(Debug, Error)]
pub enum TessellationError {
    #[error(
        "tessellated volumes sum to {actual:.6e} but the reciprocal cell volume is {expected:.6e}"
    )]
    VolumeLeak { expected: f64, actual: f64 },
    #[error("degenerate point pair at indices {0} and {1}: coincident within tolerance")]
    CoincidentPoints(usize, usize),
    #[error("tessellation requires at least one mesh point")]
    EmptyMesh,
}

/// Compute the Voronoi volume of every point of `mesh`, in cartesian
/// reciprocal units (1/m³).
///
/// The volume-sum invariant is checked before returning: the cell volumes
/// must tile the reciprocal primitive cell to within [`VOLUME_TOLERANCE`].
pub fn tessellate(mesh: &KMesh) -> Result<Vec<f64>, TessellationError> {
    if mesh.num_points() == 0 {
        return Err(TessellationError::EmptyMesh);
    }

    let lattice = mesh.lattice().matrix();
    let cartesian: Vec<Vector3<f64>> = (0..mesh.num_points()).map(|i| mesh.cartesian(i)).collect();

    // Periodic images: every point replicated across the 26 neighbouring
    // cells, tagged with the index of its home point
    let mut sites: Vec<(Vector3<f64>, usize)> =
        Vec::with_capacity(27 * cartesian.len());
    for shift_a in -1i32..=1 {
        for shift_b in -1i32..=1 {
            for shift_c in -1i32..=1 {
                let offset = lattice.transpose()
                    * Vector3::new(shift_a as f64, shift_b as f64, shift_c as f64);
                for (index, point) in cartesian.iter().enumerate() {
                    sites.push((point + offset, index));
                }
            }
        }
    }

    let mut volumes = Vec::with_capacity(cartesian.len());
    for (index, point) in cartesian.iter().enumerate() {
        let volume = voronoi_cell_volume(point, index, &sites)?;
        volumes.push(volume);
    }

    let actual: f64 = volumes.iter().sum();
    let expected = mesh.lattice().cell_volume();
    if ((actual - expected) / expected).abs() > VOLUME_TOLERANCE {
        return Err(TessellationError::VolumeLeak { expected, actual });
    }
    Ok(volumes)
}

/// The Voronoi cell of `point` against all `sites`, by half-space clipping
fn voronoi_cell_volume(
    point: &Vector3<f64>,
    home_index: usize,
    sites: &[(Vector3<f64>, usize)],
) -> Result<f64, TessellationError> {
    // Length scale for degeneracy tests, from the cell size rather than an
    // absolute constant since wavevectors are ~1e10 m⁻¹
    let scale = sites
        .iter()
        .map(|(site, _)| (site - point).norm())
        .fold(0., f64::max);
    let degenerate = (1e-9 * scale).powi(2);

    // Sort neighbours by distance so near bisectors clip first and the
    // far-plane cutoff terminates the loop early. The point's own periodic
    // images are kept: they bound the cell at the zone boundary.
    let mut neighbours: Vec<(f64, Vector3<f64>, usize)> = sites
        .iter()
        .map(|(site, index)| ((site - point).norm_squared(), *site, *index))
        .filter(|(distance_sq, _, _)| *distance_sq > degenerate)
        .collect();
    neighbours.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("distances are finite"));

    // A distinct point collapsing onto this one leaves a zero-volume cell;
    // it was filtered above, so detect it directly from the site list
    if let Some((_, _, index)) = sites
        .iter()
        .map(|(site, index)| ((site - point).norm_squared(), site, *index))
        .find(|(distance_sq, _, index)| *distance_sq <= degenerate && *index != home_index)
    {
        return Err(TessellationError::CoincidentPoints(home_index, index));
    }

    // Seed polyhedron: a cube certain to contain the cell. The cell is
    // bounded by bisectors to the point's own periodic images, whose nearest
    // distance is at most the longest cell edge.
    let half_width = neighbours
        .last()
        .map(|(distance_sq, _, _)| distance_sq.sqrt())
        .unwrap_or(1.);
    let mut cell = Polyhedron::cube(point, half_width);

    for (distance_sq, site, _) in &neighbours {
        let distance = distance_sq.sqrt();
        if distance * 0.5 > cell.max_vertex_distance(point) {
            break;
        }
        let normal = (site - point) / distance;
        let offset = normal.dot(&((site + point) * 0.5));
        cell.clip(&normal, offset);
    }

    Ok(cell.volume(point))
}

/// A convex polyhedron stored as a face list. Only the operations the
/// tessellator needs are implemented: half-space clipping and volume.
struct Polyhedron {
    faces: Vec<Vec<Vector3<f64>>>,
}

impl Polyhedron {
    fn cube(centre: &Vector3<f64>, half_width: f64) -> Self {
        let c = |dx: f64, dy: f64, dz: f64| {
            centre + Vector3::new(dx, dy, dz) * half_width
        };
        // Each face wound counter-clockwise seen from outside
        let faces = vec![
            vec![c(-1., -1., -1.), c(-1., 1., -1.), c(1., 1., -1.), c(1., -1., -1.)],
            vec![c(-1., -1., 1.), c(1., -1., 1.), c(1., 1., 1.), c(-1., 1., 1.)],
            vec![c(-1., -1., -1.), c(1., -1., -1.), c(1., -1., 1.), c(-1., -1., 1.)],
            vec![c(-1., 1., -1.), c(-1., 1., 1.), c(1., 1., 1.), c(1., 1., -1.)],
            vec![c(-1., -1., -1.), c(-1., -1., 1.), c(-1., 1., 1.), c(-1., 1., -1.)],
            vec![c(1., -1., -1.), c(1., 1., -1.), c(1., 1., 1.), c(1., -1., 1.)],
        ];
        Self { faces }
    }

    fn max_vertex_distance(&self, from: &Vector3<f64>) -> f64 {
        self.faces
            .iter()
            .flatten()
            .map(|vertex| (vertex - from).norm())
            .fold(0., f64::max)
    }

    /// Intersect with the half-space `normal · x <= offset`
    fn clip(&mut self, normal: &Vector3<f64>, offset: f64) {
        // Tolerance scaled to the signed-distance range of the current hull
        let epsilon = 1e-12
            * self
                .faces
                .iter()
                .flatten()
                .map(|vertex| (normal.dot(vertex) - offset).abs())
                .fold(0., f64::max)
                .max(f64::MIN_POSITIVE);
        let mut new_faces: Vec<Vec<Vector3<f64>>> = Vec::with_capacity(self.faces.len() + 1);
        let mut cap: Vec<Vector3<f64>> = Vec::new();

        for face in &self.faces {
            let mut clipped: Vec<Vector3<f64>> = Vec::with_capacity(face.len() + 2);
            for (position, vertex) in face.iter().enumerate() {
                let next = &face[(position + 1) % face.len()];
                let inside = normal.dot(vertex) <= offset + epsilon;
                let next_inside = normal.dot(next) <= offset + epsilon;
                if inside {
                    clipped.push(*vertex);
                }
                if inside != next_inside {
                    let depth = normal.dot(vertex) - offset;
                    let next_depth = normal.dot(next) - offset;
                    let t = depth / (depth - next_depth);
                    let crossing = vertex + (next - vertex) * t;
                    clipped.push(crossing);
                    cap.push(crossing);
                }
            }
            if clipped.len() >= 3 {
                new_faces.push(clipped);
            }
        }

        if cap.len() >= 3 {
            new_faces.push(order_cap(cap, normal));
        }
        self.faces = new_faces;
    }

    /// Volume by fanning tetrahedra from an interior apex
    fn volume(&self, apex: &Vector3<f64>) -> f64 {
        let mut total = 0.;
        for face in &self.faces {
            if face.len() < 3 {
                continue;
            }
            let first = face[0] - apex;
            for window in face[1..].windows(2) {
                let edge_a = window[0] - apex;
                let edge_b = window[1] - apex;
                total += first.dot(&edge_a.cross(&edge_b)).abs() / 6.;
            }
        }
        total
    }
}

/// Order the cap vertices into a convex polygon around their centroid
fn order_cap(mut cap: Vec<Vector3<f64>>, normal: &Vector3<f64>) -> Vec<Vector3<f64>> {
    // Deduplicate crossings shared by adjacent edges, at a tolerance scaled
    // to the polygon size
    let rough_centroid = cap.iter().sum::<Vector3<f64>>() / cap.len() as f64;
    let extent = cap
        .iter()
        .map(|vertex| (vertex - rough_centroid).norm())
        .fold(0., f64::max)
        .max(f64::MIN_POSITIVE);
    let tolerance = 1e-9 * extent;
    let mut unique: Vec<Vector3<f64>> = Vec::with_capacity(cap.len());
    for vertex in cap.drain(..) {
        if !unique
            .iter()
            .any(|existing| (existing - vertex).norm() < tolerance)
        {
            unique.push(vertex);
        }
    }
    if unique.len() < 3 {
        return unique;
    }
    let centroid = unique.iter().sum::<Vector3<f64>>() / unique.len() as f64;
    // Build an in-plane basis to measure polar angles
    let tangent = {
        let trial = if normal.x.abs() < 0.9 {
            Vector3::x()
        } else {
            Vector3::y()
        };
        normal.cross(&trial).normalize()
    };
    let bitangent = normal.cross(&tangent);
    unique.sort_by(|a, b| {
        let pa = a - centroid;
        let pb = b - centroid;
        let angle_a = pa.dot(&bitangent).atan2(pa.dot(&tangent));
        let angle_b = pb.dot(&bitangent).atan2(pb.dot(&tangent));
        angle_a.partial_cmp(&angle_b).expect("angles are finite")
    });
    unique
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mesh::{KMesh, ReciprocalLattice};
    use nalgebra::{Matrix3, Vector3};
    use proptest::prelude::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn cubic_lattice(a: f64) -> ReciprocalLattice {
        ReciprocalLattice::from_real_lattice(&(Matrix3::identity() * a)).unwrap()
    }

    #[test]
    fn cube_volume_is_exact() {
        let cube = Polyhedron::cube(&Vector3::zeros(), 0.5);
        approx::assert_relative_eq!(cube.volume(&Vector3::zeros()), 1.0, max_relative = 1e-12);
    }

    #[test]
    fn clipped_cube_loses_half_its_volume() {
        let mut cube = Polyhedron::cube(&Vector3::zeros(), 0.5);
        cube.clip(&Vector3::x(), 0.);
        approx::assert_relative_eq!(cube.volume(&Vector3::new(-0.25, 0., 0.)), 0.5, max_relative = 1e-9);
    }

    #[test]
    fn uniform_mesh_volumes_tile_the_cell() {
        let mesh = KMesh::gamma_centred([4, 4, 4], cubic_lattice(5e-10));
        let volumes = tessellate(&mesh).unwrap();
        let cell = mesh.lattice().cell_volume();
        // A regular mesh tessellates into equal cells
        for volume in &volumes {
            approx::assert_relative_eq!(*volume, cell / 64., max_relative = 1e-6);
        }
    }

    #[test]
    fn densified_mesh_volumes_tile_the_cell() {
        let lattice = cubic_lattice(5e-10);
        let mut mesh = KMesh::gamma_centred([3, 3, 3], lattice);
        let mut rng = StdRng::seed_from_u64(7);
        let extra: Vec<Vector3<f64>> = (0..20)
            .map(|_| {
                Vector3::new(
                    rng.gen_range(-0.08..0.08),
                    rng.gen_range(-0.08..0.08),
                    rng.gen_range(-0.08..0.08),
                )
            })
            .collect();
        mesh.extend(extra);
        let volumes = tessellate(&mesh).unwrap();
        let total: f64 = volumes.iter().sum();
        approx::assert_relative_eq!(
            total,
            mesh.lattice().cell_volume(),
            max_relative = VOLUME_TOLERANCE
        );
        assert!(volumes.iter().all(|v| *v > 0.));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]
        #[test]
        fn volume_sum_invariant_holds_for_random_point_sets(seed in 0u64..1000) {
            let lattice = cubic_lattice(5e-10);
            let mut rng = StdRng::seed_from_u64(seed);
            let points: Vec<Vector3<f64>> = (0..12)
                .map(|_| Vector3::new(
                    rng.gen_range(-0.5..0.5),
                    rng.gen_range(-0.5..0.5),
                    rng.gen_range(-0.5..0.5),
                ))
                .collect();
            let mesh = KMesh::from_fractional_points(points, lattice);
            let volumes = tessellate(&mesh).unwrap();
            let total: f64 = volumes.iter().sum();
            let expected = mesh.lattice().cell_volume();
            prop_assert!(((total - expected) / expected).abs() < VOLUME_TOLERANCE);
        }
    }
}
