//! Adaptive mesh densification around band extrema
//!
//! The density of states changes fastest near band edges, which is exactly
//! where transport integrals are most sensitive. Rather than refining the
//! whole mesh, extra k-points are inserted on deterministic golden-angle
//! (Fibonacci) spheres around the extrema, with shell radii scaled to the
//! local band curvature, until the transport-window DOS stops moving.

use super::interpolation::{
    density_of_states, DensityOfStates, InterpolatedBands, ShanklandInterpolator,
};
use super::Spin;
use crate::error::Result;
use crate::settings::{DensificationSettings, Settings};
use carrier_mesher::{tessellate, KMesh};
use nalgebra::Vector3;

/// Outcome of the densification loop. An unconverged result is still usable;
/// the flag carries the convergence warning to the caller.
pub struct DensifiedMesh {
    pub mesh: KMesh,
    pub bands: InterpolatedBands,
    pub dos: DensityOfStates,
    pub converged: bool,
    pub iterations: usize,
    /// Relative window-DOS change at each comparison, in iteration order
    pub window_dos_changes: Vec<f64>,
}

pub struct Densifier<'a> {
    interpolator: &'a ShanklandInterpolator,
    settings: &'a Settings,
}

impl<'a> Densifier<'a> {
    pub fn new(interpolator: &'a ShanklandInterpolator, settings: &'a Settings) -> Self {
        Self {
            interpolator,
            settings,
        }
    }

    /// Run the interpolate → tessellate → compare-DOS loop starting from
    /// `mesh`, inserting points until the transport-window DOS converges or
    /// the point budget is exhausted.
    pub fn run(&self, mut mesh: KMesh) -> Result<DensifiedMesh> {
        let controls = &self.settings.densification;
        let mut previous_window_dos: Option<f64> = None;
        let mut converged = false;
        let mut iterations = 0;
        let mut window_dos_changes = Vec::new();

        loop {
            iterations += 1;
            let bands = self.interpolator.interpolate_mesh(
                &mesh,
                self.settings.scissor,
                self.settings.energy_cutoff,
            );
            let volumes = tessellate(&mesh)?;
            mesh.assign_volumes(&volumes);

            let dos = density_of_states(
                &bands,
                &mesh,
                self.settings.dos_step,
                self.settings.broadening,
                self.interpolator.spin_degeneracy(),
            );
            let window_dos = self.window_dos(&bands, &dos);

            if let Some(previous) = previous_window_dos {
                let change = ((window_dos - previous) / previous.max(f64::MIN_POSITIVE)).abs();
                window_dos_changes.push(change);
                tracing::info!(
                    iteration = iterations,
                    points = mesh.num_points(),
                    change,
                    "densification step"
                );
                if change < controls.tolerance {
                    converged = true;
                    return Ok(DensifiedMesh {
                        mesh,
                        bands,
                        dos,
                        converged,
                        iterations,
                        window_dos_changes,
                    });
                }
            }
            previous_window_dos = Some(window_dos);

            if mesh.num_points() >= controls.maximum_points {
                tracing::warn!(
                    points = mesh.num_points(),
                    budget = controls.maximum_points,
                    "densification point budget exhausted before DOS convergence"
                );
                return Ok(DensifiedMesh {
                    mesh,
                    bands,
                    dos,
                    converged,
                    iterations,
                    window_dos_changes,
                });
            }

            let extra = self.candidate_points(&mesh, &bands, controls);
            if extra.is_empty() {
                return Ok(DensifiedMesh {
                    mesh,
                    bands,
                    dos,
                    converged,
                    iterations,
                    window_dos_changes,
                });
            }
            mesh.extend(extra);
        }
    }

    /// Integrated DOS inside the transport window around the band edges
    fn window_dos(&self, bands: &InterpolatedBands, dos: &DensityOfStates) -> f64 {
        let window = self.settings.transport_window;
        let edges = band_edges(bands);
        dos.integrate(|energy| {
            let inside = edges
                .iter()
                .any(|edge| (energy - edge).abs() <= window);
            if inside {
                1.
            } else {
                0.
            }
        })
    }

    /// Fibonacci-sphere shells around every band extremum, radii scaled by
    /// the local curvature so flat bands are probed more tightly
    fn candidate_points(
        &self,
        mesh: &KMesh,
        bands: &InterpolatedBands,
        controls: &DensificationSettings,
    ) -> Vec<Vector3<f64>> {
        let reciprocal = mesh.lattice().matrix();
        let inverse = reciprocal
            .transpose()
            .try_inverse()
            .expect("the reciprocal lattice is non-singular");

        let mut candidates = Vec::new();
        for (spin, band, extremum_index) in extremum_states(bands) {
            let k0 = mesh.points()[extremum_index].fractional;
            let curvature = self.interpolator.curvature(spin, band, &k0);
            // Mean absolute curvature sets the radius at which the band has
            // risen by the transport window: E ≈ ½|c|k²
            let mean_curvature = (curvature[(0, 0)].abs()
                + curvature[(1, 1)].abs()
                + curvature[(2, 2)].abs())
                / 3.;
            let radius = if mean_curvature > 0. {
                (2. * self.settings.transport_window / mean_curvature).sqrt()
            } else {
                0.1 * reciprocal.row(0).norm()
            };
            // Never reach beyond a quarter of the zone
            let radius = radius.min(0.25 * reciprocal.row(0).norm());

            let k0_cartesian = mesh.lattice().to_cartesian(&k0);
            for shell in 1..=controls.shells {
                let shell_radius = radius * shell as f64 / controls.shells as f64;
                for offset in fibonacci_sphere(controls.points_per_shell, shell_radius) {
                    let fractional = inverse * (k0_cartesian + offset);
                    candidates.push(fractional);
                }
            }
        }
        candidates
    }
}

/// Band-edge energies: VBM and CBM when a gap exists, else the overall
/// energy centre
fn band_edges(bands: &InterpolatedBands) -> Vec<f64> {
    let mut edges = Vec::new();
    for (spin, energies) in &bands.energies {
        match bands.valence_band_index[spin] {
            Some(vb) => {
                let vbm = (0..=vb)
                    .flat_map(|b| energies.row(b).to_vec())
                    .fold(f64::NEG_INFINITY, f64::max);
                let cbm = (vb + 1..energies.nrows())
                    .flat_map(|b| energies.row(b).to_vec())
                    .fold(f64::INFINITY, f64::min);
                edges.push(vbm);
                edges.push(cbm);
            }
            None => {
                let mean = energies.mean().unwrap_or(0.);
                edges.push(mean);
            }
        }
    }
    edges
}

/// The (spin, band, k-index) of each band extremum adjacent to the gap
fn extremum_states(bands: &InterpolatedBands) -> Vec<(Spin, usize, usize)> {
    let mut states = Vec::new();
    for (&spin, energies) in &bands.energies {
        match bands.valence_band_index[&spin] {
            Some(vb) => {
                // VBM within the valence manifold
                let mut best = (0, 0, f64::NEG_INFINITY);
                for band in 0..=vb {
                    for ik in 0..energies.ncols() {
                        if energies[(band, ik)] > best.2 {
                            best = (band, ik, energies[(band, ik)]);
                        }
                    }
                }
                states.push((spin, best.0, best.1));
                // CBM within the conduction manifold
                if vb + 1 < energies.nrows() {
                    let mut best = (vb + 1, 0, f64::INFINITY);
                    for band in vb + 1..energies.nrows() {
                        for ik in 0..energies.ncols() {
                            if energies[(band, ik)] < best.2 {
                                best = (band, ik, energies[(band, ik)]);
                            }
                        }
                    }
                    states.push((spin, best.0, best.1));
                }
            }
            None => {
                // Metals: densify around the lowest band minimum
                let mut best = (0, 0, f64::INFINITY);
                for band in 0..energies.nrows() {
                    for ik in 0..energies.ncols() {
                        if energies[(band, ik)] < best.2 {
                            best = (band, ik, energies[(band, ik)]);
                        }
                    }
                }
                states.push((spin, best.0, best.1));
            }
        }
    }
    states
}

/// Deterministic near-uniform sampling of a sphere of radius `radius` by the
/// golden-angle spiral
fn fibonacci_sphere(count: usize, radius: f64) -> Vec<Vector3<f64>> {
    let golden_angle = std::f64::consts::PI * (3. - 5f64.sqrt());
    (0..count)
        .map(|i| {
            let z = 1. - 2. * (i as f64 + 0.5) / count as f64;
            let ring = (1. - z * z).sqrt();
            let azimuth = golden_angle * i as f64;
            Vector3::new(ring * azimuth.cos(), ring * azimuth.sin(), z) * radius
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fibonacci_sphere_is_deterministic_and_on_sphere() {
        let first = fibonacci_sphere(32, 2.);
        let second = fibonacci_sphere(32, 2.);
        assert_eq!(first.len(), 32);
        for (a, b) in first.iter().zip(&second) {
            assert_eq!(a, b);
        }
        for point in &first {
            approx::assert_relative_eq!(point.norm(), 2., max_relative = 1e-12);
        }
    }

    #[test]
    fn fibonacci_sphere_is_roughly_centred() {
        let points = fibonacci_sphere(200, 1.);
        let centroid: Vector3<f64> = points.iter().sum::<Vector3<f64>>() / 200.;
        assert!(centroid.norm() < 0.02);
    }
}
