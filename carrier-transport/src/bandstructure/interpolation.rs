//! Fourier interpolation of the coarse band structure
//!
//! Shankland-Koelling-Wood interpolation: each band is expanded in symmetric
//! star functions of real-space lattice vectors, with coefficients chosen to
//! reproduce the coarse energies exactly while minimising a roughness
//! functional. The expansion is smooth everywhere, so group velocities and
//! band curvatures come from analytic derivatives rather than finite
//! differences.

use super::{BandStructure, Spin};
use crate::constants::{ELECTRON_CHARGE, HBAR};
use crate::error::{ConfigurationError, Result, TransportError};
use carrier_mesher::{wrap_fractional, KMesh, SymmetryOperations};
use nalgebra::{DMatrix, DVector, Matrix3, Vector3};
use ndarray::{Array2, Array3, Array4};
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};

const TWO_PI: f64 = 2. * std::f64::consts::PI;

/// Symmetry star storage: integer (fractional-basis) and cartesian members
/// kept side by side, since evaluation uses the integers and derivatives the
/// cartesians. A star function S(k) = (1/|star|) Σ_R cos(2π k·n) is real
/// because time reversal closes every orbit under inversion.
#[derive(Clone, Debug)]
struct StarTable {
    integer_members: Vec<Vec<Vector3<f64>>>,
    cartesian_members: Vec<Vec<Vector3<f64>>>,
    roughness: Vec<f64>,
}

impl StarTable {
    fn num_stars(&self) -> usize {
        self.roughness.len()
    }

    fn value(&self, star: usize, k: &Vector3<f64>) -> f64 {
        let members = &self.integer_members[star];
        members
            .iter()
            .map(|n| (TWO_PI * k.dot(n)).cos())
            .sum::<f64>()
            / members.len() as f64
    }

    /// Cartesian gradient of the star function, in metres (energy per 1/m
    /// once multiplied by a coefficient in eV)
    fn gradient(&self, star: usize, k: &Vector3<f64>) -> Vector3<f64> {
        let integers = &self.integer_members[star];
        let cartesians = &self.cartesian_members[star];
        // The phase satisfies k_cart·R_cart = 2π k_frac·n, so the cartesian
        // derivative carries the cartesian member directly
        let mut gradient = Vector3::zeros();
        for (n, r) in integers.iter().zip(cartesians) {
            gradient -= r * (TWO_PI * k.dot(n)).sin();
        }
        gradient * (1. / integers.len() as f64)
    }

    /// Cartesian second derivative (Hessian) of the star function, in m²
    fn hessian(&self, star: usize, k: &Vector3<f64>) -> Matrix3<f64> {
        let integers = &self.integer_members[star];
        let cartesians = &self.cartesian_members[star];
        let mut hessian = Matrix3::zeros();
        for (n, r) in integers.iter().zip(cartesians) {
            hessian -= (r * r.transpose()) * (TWO_PI * k.dot(n)).cos();
        }
        hessian * (1. / integers.len() as f64)
    }
}

/// Generate symmetry stars of real-space lattice vectors, ordered by length,
/// until at least `target` stars exist. The zeroth star is always the origin.
fn generate_stars(
    real_lattice: &Matrix3<f64>,
    symmetry: &SymmetryOperations,
    target: usize,
) -> StarTable {
    let mut integer_members: Vec<Vec<Vector3<f64>>> = Vec::new();
    let mut cartesian_members: Vec<Vec<Vector3<f64>>> = Vec::new();
    let mut lengths: Vec<f64> = Vec::new();

    let mut reach = 2i32;
    loop {
        integer_members.clear();
        cartesian_members.clear();
        lengths.clear();

        // All lattice vectors in the current reach, sorted by cartesian norm
        let mut candidates: Vec<(f64, Vector3<i32>)> = Vec::new();
        for n1 in -reach..=reach {
            for n2 in -reach..=reach {
                for n3 in -reach..=reach {
                    let n = Vector3::new(n1, n2, n3);
                    let r = real_lattice.transpose() * n.map(|x| x as f64);
                    candidates.push((r.norm(), n));
                }
            }
        }
        candidates.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("norms are finite"));

        let mut assigned: std::collections::HashSet<[i32; 3]> = std::collections::HashSet::new();
        for (length, n) in &candidates {
            if assigned.contains(&[n.x, n.y, n.z]) {
                continue;
            }
            // Orbit under the point group and time reversal
            let mut orbit: Vec<Vector3<i32>> = Vec::new();
            for rotation in symmetry.rotations() {
                for image in [rotation.transpose() * n, -(rotation.transpose() * n)] {
                    if !orbit.contains(&image) {
                        orbit.push(image);
                    }
                }
            }
            for image in &orbit {
                assigned.insert([image.x, image.y, image.z]);
            }
            integer_members.push(orbit.iter().map(|m| m.map(|x| x as f64)).collect());
            cartesian_members.push(
                orbit
                    .iter()
                    .map(|m| real_lattice.transpose() * m.map(|x| x as f64))
                    .collect(),
            );
            lengths.push(*length);
        }

        // Interior stars only: orbits touching the boundary of the search
        // cube may be incomplete, drop them so the count is conservative
        let limit = reach as f64
            * [0, 1, 2]
                .iter()
                .map(|&i| real_lattice.row(i).norm())
                .fold(f64::INFINITY, f64::min);
        let keep: Vec<usize> = (0..lengths.len())
            .filter(|&s| lengths[s] <= limit)
            .collect();
        if keep.len() >= target || reach >= 16 {
            let integer_members = keep.iter().map(|&s| integer_members[s].clone()).collect();
            let cartesian_members = keep
                .iter()
                .map(|&s| cartesian_members[s].clone())
                .collect();
            let kept_lengths: Vec<f64> = keep.iter().map(|&s| lengths[s]).collect();
            let minimum = kept_lengths
                .iter()
                .copied()
                .filter(|l| *l > 0.)
                .fold(f64::INFINITY, f64::min);
            let roughness = kept_lengths
                .iter()
                .map(|&length| {
                    let x = length / minimum;
                    (1. - 0.75 * x * x).powi(2) + 0.75 * x.powi(6)
                })
                .collect();
            return StarTable {
                integer_members,
                cartesian_members,
                roughness,
            };
        }
        reach *= 2;
    }
}

/// Interpolated quantities on a dense mesh, one entry per spin channel
#[derive(Clone, Debug)]
pub struct InterpolatedBands {
    /// Band energies in eV, `[n_bands, n_kpoints]`
    pub energies: BTreeMap<Spin, Array2<f64>>,
    /// Group velocities in m/s, `[n_bands, n_kpoints, 3]`
    pub velocities: BTreeMap<Spin, Array3<f64>>,
    /// Velocity outer products in m²/s², `[n_bands, n_kpoints, 3, 3]`
    pub velocity_products: BTreeMap<Spin, Array4<f64>>,
    /// Indices into the original band list of the bands that survived the
    /// energy cutoff
    pub kept_bands: BTreeMap<Spin, Vec<usize>>,
    /// Valence band index within the kept bands, per spin
    pub valence_band_index: BTreeMap<Spin, Option<usize>>,
}

/// Density of states on a regular energy grid, states per eV per unit cell
#[derive(Clone, Debug)]
pub struct DensityOfStates {
    pub energies: Vec<f64>,
    pub values: Vec<f64>,
}

impl DensityOfStates {
    /// Trapezium integral of `f(E) × dos(E)` over the grid
    pub fn integrate(&self, mut weight: impl FnMut(f64) -> f64) -> f64 {
        let mut total = 0.;
        for window in self.energies.windows(2).zip(self.values.windows(2)) {
            let (energies, values) = window;
            let step = energies[1] - energies[0];
            total += 0.5
                * step
                * (values[0] * weight(energies[0]) + values[1] * weight(energies[1]));
        }
        total
    }

    /// Linear interpolation of the DOS at an arbitrary energy
    pub fn at(&self, energy: f64) -> f64 {
        // A grid with fewer than two samples has no interval to interpolate
        if self.energies.len() < 2 {
            return 0.;
        }
        let step = self.energies[1] - self.energies[0];
        let position = (energy - self.energies[0]) / step;
        if position <= 0. || position >= (self.energies.len() - 1) as f64 {
            return 0.;
        }
        let lower = position.floor() as usize;
        let fraction = position - lower as f64;
        self.values[lower] * (1. - fraction) + self.values[lower + 1] * fraction
    }
}

/// The fitted Shankland interpolator for every spin channel of a coarse band
/// structure
pub struct ShanklandInterpolator {
    stars: StarTable,
    /// Expansion coefficients in eV, `[n_bands, n_stars]` per spin
    coefficients: BTreeMap<Spin, Array2<f64>>,
    valence_band_index: Option<usize>,
    spin_degeneracy: f64,
}

impl ShanklandInterpolator {
    /// Fit the interpolator to a coarse band structure.
    ///
    /// Star functions are even under the point group and time reversal, so
    /// equivalent coarse points carry identical constraint rows; the coarse
    /// mesh is first collapsed onto one representative per orbit (energies
    /// averaged), otherwise any Γ-centred input with its ±k pairs would be
    /// singular. `factor` controls the ratio of stars to representatives;
    /// the fit is exact at every representative, hence at every coarse point
    /// of a symmetric input. Fewer stars than representatives fail with a
    /// configuration error.
    pub fn fit(band_structure: &BandStructure, factor: f64) -> Result<Self> {
        let (kpoints, reduced_bands) = reduce_coarse_points(band_structure);
        let num_points = kpoints.len();
        let target = ((num_points as f64 * factor).ceil() as usize).max(num_points + 1);

        tracing::info!(
            coarse_points = band_structure.kpoints().len(),
            independent_points = num_points,
            target_stars = target,
            "fitting star-function interpolation"
        );
        let stars = generate_stars(
            band_structure.real_lattice(),
            band_structure.symmetry(),
            target,
        );
        if stars.num_stars() < num_points {
            return Err(TransportError::Configuration(
                ConfigurationError::InsufficientStars {
                    points: num_points,
                    stars: stars.num_stars(),
                },
            ));
        }
        let num_stars = stars.num_stars();

        // Star values at the coarse points; the zeroth star is the constant
        let mut star_values = Array2::<f64>::zeros((num_points, num_stars));
        for (i, k) in kpoints.iter().enumerate() {
            for m in 0..num_stars {
                star_values[(i, m)] = stars.value(m, k);
            }
        }

        // Difference rows against the last point eliminate the unpenalised
        // constant term (Shankland's constrained minimisation)
        let reference = num_points - 1;
        let mut normal = DMatrix::<f64>::zeros(num_points - 1, num_points - 1);
        let mut differences = Array2::<f64>::zeros((num_points - 1, num_stars));
        for i in 0..num_points - 1 {
            for m in 1..num_stars {
                differences[(i, m)] = star_values[(i, m)] - star_values[(reference, m)];
            }
        }
        for i in 0..num_points - 1 {
            for j in 0..=i {
                let mut entry = 0.;
                for m in 1..num_stars {
                    entry += differences[(i, m)] * differences[(j, m)] / stars.roughness[m];
                }
                normal[(i, j)] = entry;
                normal[(j, i)] = entry;
            }
        }
        let factorisation = if num_points > 1 {
            Some(normal.cholesky().ok_or(TransportError::Configuration(
                ConfigurationError::IllConditionedFit,
            ))?)
        } else {
            None
        };

        let mut coefficients = BTreeMap::new();
        for (&spin, energies) in &reduced_bands {
            let num_bands = energies.nrows();
            let mut spin_coefficients = Array2::<f64>::zeros((num_bands, num_stars));
            for band in 0..num_bands {
                let mut c_band = vec![0.; num_stars];
                if let Some(factorisation) = &factorisation {
                    let residual = DVector::from_iterator(
                        num_points - 1,
                        (0..num_points - 1)
                            .map(|i| energies[(band, i)] - energies[(band, reference)]),
                    );
                    let multipliers = factorisation.solve(&residual);
                    for m in 1..num_stars {
                        let mut coefficient = 0.;
                        for i in 0..num_points - 1 {
                            coefficient += multipliers[i] * differences[(i, m)];
                        }
                        c_band[m] = coefficient / stars.roughness[m];
                    }
                }
                // Constant term from exactness at the reference point
                let mut tail = 0.;
                for m in 1..num_stars {
                    tail += c_band[m] * star_values[(reference, m)];
                }
                c_band[0] = (energies[(band, reference)] - tail) / star_values[(reference, 0)];
                for m in 0..num_stars {
                    spin_coefficients[(band, m)] = c_band[m];
                }
            }
            coefficients.insert(spin, spin_coefficients);
        }

        Ok(Self {
            stars,
            coefficients,
            valence_band_index: band_structure.valence_band_index(),
            spin_degeneracy: band_structure.spin_degeneracy(),
        })
    }

    pub fn num_bands(&self, spin: Spin) -> usize {
        self.coefficients[&spin].nrows()
    }

    pub fn spins(&self) -> impl Iterator<Item = Spin> + '_ {
        self.coefficients.keys().copied()
    }

    pub fn spin_degeneracy(&self) -> f64 {
        self.spin_degeneracy
    }

    pub fn valence_band_index(&self) -> Option<usize> {
        self.valence_band_index
    }

    /// Interpolated energy in eV at a fractional k-point
    pub fn energy(&self, spin: Spin, band: usize, k: &Vector3<f64>) -> f64 {
        let coefficients = &self.coefficients[&spin];
        (0..self.stars.num_stars())
            .map(|m| coefficients[(band, m)] * self.stars.value(m, k))
            .sum()
    }

    /// Analytic group velocity in m/s at a fractional k-point
    pub fn velocity(&self, spin: Spin, band: usize, k: &Vector3<f64>) -> Vector3<f64> {
        let coefficients = &self.coefficients[&spin];
        let mut gradient = Vector3::zeros();
        for m in 0..self.stars.num_stars() {
            gradient += self.stars.gradient(m, k) * coefficients[(band, m)];
        }
        // Gradient is in eV·m; convert to J·m and divide by ħ
        gradient * (ELECTRON_CHARGE / HBAR)
    }

    /// Analytic band curvature tensor in eV·m² at a fractional k-point.
    /// The inverse effective mass tensor is `e·curvature / ħ²`.
    pub fn curvature(&self, spin: Spin, band: usize, k: &Vector3<f64>) -> Matrix3<f64> {
        let coefficients = &self.coefficients[&spin];
        let mut hessian = Matrix3::zeros();
        for m in 0..self.stars.num_stars() {
            hessian += self.stars.hessian(m, k) * coefficients[(band, m)];
        }
        hessian
    }

    /// Interpolate every band onto a dense mesh, applying the scissor shift
    /// and dropping bands entirely outside the transport window.
    ///
    /// The scissor opens the gap symmetrically: conduction states move up by
    /// half the shift and valence states down by half. The cutoff window is
    /// `[VBM - cutoff, CBM + cutoff]` evaluated on the dense mesh.
    pub fn interpolate_mesh(
        &self,
        mesh: &KMesh,
        scissor: Option<f64>,
        energy_cutoff: Option<f64>,
    ) -> InterpolatedBands {
        let kpoints: Vec<Vector3<f64>> =
            mesh.fractional_coordinates().copied().collect();
        let num_kpoints = kpoints.len();

        let mut energies = BTreeMap::new();
        let mut velocities = BTreeMap::new();
        let mut velocity_products = BTreeMap::new();
        let mut kept_bands = BTreeMap::new();
        let mut valence_index = BTreeMap::new();

        for spin in self.spins() {
            let num_bands = self.num_bands(spin);
            // Parallel over k: each worker fills an independent column range,
            // results concatenated in index order
            let columns: Vec<(Vec<f64>, Vec<Vector3<f64>>)> = kpoints
                .par_iter()
                .map(|k| {
                    let mut column_energies = Vec::with_capacity(num_bands);
                    let mut column_velocities = Vec::with_capacity(num_bands);
                    for band in 0..num_bands {
                        column_energies.push(self.energy(spin, band, k));
                        column_velocities.push(self.velocity(spin, band, k));
                    }
                    (column_energies, column_velocities)
                })
                .collect();

            let mut spin_energies = Array2::<f64>::zeros((num_bands, num_kpoints));
            let mut spin_velocities = Array3::<f64>::zeros((num_bands, num_kpoints, 3));
            for (ik, (column_energies, column_velocities)) in columns.into_iter().enumerate() {
                for band in 0..num_bands {
                    spin_energies[(band, ik)] = column_energies[band];
                    for axis in 0..3 {
                        spin_velocities[(band, ik, axis)] = column_velocities[band][axis];
                    }
                }
            }

            if let (Some(shift), Some(vb)) = (scissor, self.valence_band_index) {
                for band in 0..num_bands {
                    let half = if band > vb { shift / 2. } else { -shift / 2. };
                    spin_energies
                        .row_mut(band)
                        .mapv_inplace(|e| e + half);
                }
            }

            // Band selection against the transport window
            let keep: Vec<usize> = match (energy_cutoff, self.valence_band_index) {
                (Some(cutoff), Some(vb)) => {
                    let vbm = (0..=vb)
                        .flat_map(|b| spin_energies.row(b).to_vec())
                        .fold(f64::NEG_INFINITY, f64::max);
                    let cbm = (vb + 1..num_bands)
                        .flat_map(|b| spin_energies.row(b).to_vec())
                        .fold(f64::INFINITY, f64::min);
                    (0..num_bands)
                        .filter(|&b| {
                            let row = spin_energies.row(b);
                            let minimum = row.fold(f64::INFINITY, |a, &e| a.min(e));
                            let maximum = row.fold(f64::NEG_INFINITY, |a, &e| a.max(e));
                            maximum >= vbm - cutoff && minimum <= cbm + cutoff
                        })
                        .collect()
                }
                _ => (0..num_bands).collect(),
            };

            let new_valence = self.valence_band_index.map(|vb| {
                keep.iter().filter(|&&b| b <= vb).count().saturating_sub(1)
            });

            let mut filtered_energies = Array2::<f64>::zeros((keep.len(), num_kpoints));
            let mut filtered_velocities = Array3::<f64>::zeros((keep.len(), num_kpoints, 3));
            let mut products = Array4::<f64>::zeros((keep.len(), num_kpoints, 3, 3));
            for (new_band, &band) in keep.iter().enumerate() {
                for ik in 0..num_kpoints {
                    filtered_energies[(new_band, ik)] = spin_energies[(band, ik)];
                    for alpha in 0..3 {
                        let v_alpha = spin_velocities[(band, ik, alpha)];
                        filtered_velocities[(new_band, ik, alpha)] = v_alpha;
                        for beta in 0..3 {
                            products[(new_band, ik, alpha, beta)] =
                                v_alpha * spin_velocities[(band, ik, beta)];
                        }
                    }
                }
            }

            energies.insert(spin, filtered_energies);
            velocities.insert(spin, filtered_velocities);
            velocity_products.insert(spin, products);
            kept_bands.insert(spin, keep);
            valence_index.insert(spin, new_valence);
        }

        InterpolatedBands {
            energies,
            velocities,
            velocity_products,
            kept_bands,
            valence_band_index: valence_index,
        }
    }

    /// Band energies along a path of fractional k-points, for diagnostics.
    /// Returns the cumulative cartesian path length and the energies of every
    /// band at each sample.
    pub fn line_mode(
        &self,
        mesh: &KMesh,
        path: &[Vector3<f64>],
        points_per_segment: usize,
    ) -> Vec<(f64, BTreeMap<Spin, Vec<f64>>)> {
        let mut samples = Vec::new();
        let mut distance = 0.;
        for segment in path.windows(2) {
            let start_cartesian = mesh.lattice().to_cartesian(&segment[0]);
            let end_cartesian = mesh.lattice().to_cartesian(&segment[1]);
            let length = (end_cartesian - start_cartesian).norm();
            for step in 0..points_per_segment {
                let fraction = step as f64 / points_per_segment as f64;
                let k = segment[0] + (segment[1] - segment[0]) * fraction;
                let mut energies = BTreeMap::new();
                for spin in self.spins() {
                    energies.insert(
                        spin,
                        (0..self.num_bands(spin))
                            .map(|band| self.energy(spin, band, &k))
                            .collect(),
                    );
                }
                samples.push((distance + length * fraction, energies));
            }
            distance += length;
        }
        samples
    }
}

/// Collapse the coarse mesh onto one representative per point-group /
/// time-reversal orbit, averaging the band energies over each orbit.
/// Equivalent points are matched by hashing their wrapped fractional
/// coordinates on a fine lattice, as in the mesh reduction.
fn reduce_coarse_points(
    band_structure: &BandStructure,
) -> (Vec<Vector3<f64>>, BTreeMap<Spin, Array2<f64>>) {
    let kpoints = band_structure.kpoints();
    let key = |k: &Vector3<f64>| -> [i64; 3] {
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
    };
    let index_of: HashMap<[i64; 3], usize> = kpoints
        .iter()
        .enumerate()
        .map(|(index, k)| (key(k), index))
        .collect();

    let mut grouped = vec![false; kpoints.len()];
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (index, k) in kpoints.iter().enumerate() {
        if grouped[index] {
            continue;
        }
        grouped[index] = true;
        let mut group = vec![index];
        for image in band_structure.symmetry().orbit(k) {
            if let Some(&equivalent) = index_of.get(&key(&image)) {
                if !grouped[equivalent] {
                    grouped[equivalent] = true;
                    group.push(equivalent);
                }
            }
        }
        groups.push(group);
    }

    let representatives: Vec<Vector3<f64>> =
        groups.iter().map(|group| kpoints[group[0]]).collect();
    let mut averaged = BTreeMap::new();
    for (&spin, energies) in band_structure.bands() {
        let mut reduced = Array2::<f64>::zeros((energies.nrows(), groups.len()));
        for (column, group) in groups.iter().enumerate() {
            for band in 0..energies.nrows() {
                let mean = group.iter().map(|&i| energies[(band, i)]).sum::<f64>()
                    / group.len() as f64;
                reduced[(band, column)] = mean;
            }
        }
        averaged.insert(spin, reduced);
    }
    (representatives, averaged)
}

/// Gaussian broadening kernel standing in for the energy-conserving delta
pub fn gaussian(x: f64, width: f64) -> f64 {
    (-(x / width).powi(2)).exp() / (width * std::f64::consts::PI.sqrt())
}

/// Total density of states of interpolated bands on a tessellated mesh, in
/// states per eV per unit cell
pub fn density_of_states(
    bands: &InterpolatedBands,
    mesh: &KMesh,
    energy_step: f64,
    broadening: f64,
    spin_degeneracy: f64,
) -> DensityOfStates {
    let cell_volume = mesh.lattice().cell_volume();
    let mut minimum = f64::INFINITY;
    let mut maximum = f64::NEG_INFINITY;
    for energies in bands.energies.values() {
        minimum = minimum.min(energies.fold(f64::INFINITY, |a, &e| a.min(e)));
        maximum = maximum.max(energies.fold(f64::NEG_INFINITY, |a, &e| a.max(e)));
    }
    let lower = minimum - 5. * broadening;
    let upper = maximum + 5. * broadening;
    let num_steps = ((upper - lower) / energy_step).ceil() as usize + 1;
    let grid: Vec<f64> = (0..num_steps).map(|i| lower + i as f64 * energy_step).collect();

    let values: Vec<f64> = grid
        .par_iter()
        .map(|&energy| {
            let mut total = 0.;
            for energies in bands.energies.values() {
                for band in 0..energies.nrows() {
                    for ik in 0..energies.ncols() {
                        let weight = mesh.volume(ik) / cell_volume;
                        total += spin_degeneracy
                            * weight
                            * gaussian(energy - energies[(band, ik)], broadening);
                    }
                }
            }
            total
        })
        .collect();

    DensityOfStates {
        energies: grid,
        values,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bandstructure::{BandStructure, Spin};
    use carrier_mesher::{wrap_fractional, KMesh, ReciprocalLattice, SymmetryOperations};
    use nalgebra::{Matrix3, Vector3};
    use ndarray::Array2;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::collections::BTreeMap;

    fn coarse_structure(n: usize, seed: u64) -> BandStructure {
        let a = 5e-10;
        let lattice = Matrix3::identity() * a;
        let reciprocal = ReciprocalLattice::from_real_lattice(&lattice).unwrap();
        let mesh = KMesh::gamma_centred([n, n, n], reciprocal);
        let kpoints: Vec<Vector3<f64>> = mesh.fractional_coordinates().copied().collect();
        let mut rng = StdRng::seed_from_u64(seed);
        let mut energies = Array2::<f64>::zeros((2, kpoints.len()));
        for ik in 0..kpoints.len() {
            let k = kpoints[ik];
            // Physical bands are even under time reversal, so k and -k must
            // carry the same energy, noise included
            let minus = wrap_fractional(&-k);
            if let Some(partner) = kpoints[..ik]
                .iter()
                .position(|other| (other - minus).norm() < 1e-9)
            {
                energies[(0, ik)] = energies[(0, partner)];
                energies[(1, ik)] = energies[(1, partner)];
                continue;
            }
            // A smooth periodic valence/conduction pair plus noise so the
            // fit cannot special-case an analytic form
            let base: f64 = k.iter().map(|x| (TWO_PI * x).cos()).sum();
            energies[(0, ik)] = -1. - 0.3 * base + 0.01 * rng.gen_range(-1.0..1.0);
            energies[(1, ik)] = 1.5 + 0.4 * base + 0.01 * rng.gen_range(-1.0..1.0);
        }
        let mut bands = BTreeMap::new();
        bands.insert(Spin::Up, energies);
        BandStructure::new(
            kpoints,
            bands,
            lattice,
            2.,
            SymmetryOperations::identity(),
            Some(0),
        )
    }

    #[test]
    fn interpolation_is_exact_at_coarse_points() {
        let structure = coarse_structure(3, 11);
        let interpolator = ShanklandInterpolator::fit(&structure, 8.).unwrap();
        for (ik, k) in structure.kpoints().iter().enumerate() {
            for band in 0..2 {
                let interpolated = interpolator.energy(Spin::Up, band, k);
                let input = structure.bands()[&Spin::Up][(band, ik)];
                approx::assert_relative_eq!(interpolated, input, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn fit_collapses_time_reversal_pairs() {
        // A Γ-centred mesh pairs every k with -k; the pair carries a single
        // independent constraint, so the fit must stay positive definite and
        // reproduce both partners
        let structure = coarse_structure(4, 29);
        let interpolator = ShanklandInterpolator::fit(&structure, 6.).unwrap();
        for (ik, k) in structure.kpoints().iter().enumerate() {
            let input = structure.bands()[&Spin::Up][(0, ik)];
            approx::assert_relative_eq!(
                interpolator.energy(Spin::Up, 0, k),
                input,
                epsilon = 1e-8
            );
            approx::assert_relative_eq!(
                interpolator.energy(Spin::Up, 0, &-k),
                input,
                epsilon = 1e-8
            );
        }
    }

    #[test]
    fn dos_lookup_handles_degenerate_grids() {
        let single = DensityOfStates {
            energies: vec![1.],
            values: vec![3.],
        };
        assert_eq!(single.at(1.), 0.);
        let empty = DensityOfStates {
            energies: vec![],
            values: vec![],
        };
        assert_eq!(empty.at(0.), 0.);
    }

    #[test]
    fn velocity_matches_finite_difference_of_the_expansion() {
        let structure = coarse_structure(3, 13);
        let interpolator = ShanklandInterpolator::fit(&structure, 8.).unwrap();
        let reciprocal =
            ReciprocalLattice::from_real_lattice(structure.real_lattice()).unwrap();
        let k = Vector3::new(0.137, -0.221, 0.064);
        let delta = 1e-6;
        for band in 0..2 {
            let velocity = interpolator.velocity(Spin::Up, band, &k);
            for axis in 0..3 {
                let mut forward = k;
                let mut backward = k;
                forward[axis] += delta;
                backward[axis] -= delta;
                let slope_fractional = (interpolator.energy(Spin::Up, band, &forward)
                    - interpolator.energy(Spin::Up, band, &backward))
                    / (2. * delta);
                // Convert the fractional-axis derivative to a velocity along
                // the cartesian projection of that axis
                let axis_vector = reciprocal.matrix().row(axis).transpose();
                let expected = slope_fractional * ELECTRON_CHARGE / HBAR;
                let projected = velocity.dot(&axis_vector);
                approx::assert_relative_eq!(projected, expected, max_relative = 1e-4);
            }
        }
    }

    #[test]
    fn too_few_stars_is_a_configuration_error() {
        let structure = coarse_structure(3, 17);
        // Factor below one requests fewer stars than points; generation still
        // pads to points + 1 so force the failure with a huge coarse mesh
        let kpoints: Vec<Vector3<f64>> = {
            let reciprocal = structure.reciprocal_lattice();
            KMesh::gamma_centred([40, 40, 40], reciprocal)
                .fractional_coordinates()
                .copied()
                .collect()
        };
        let mut bands = BTreeMap::new();
        bands.insert(Spin::Up, Array2::<f64>::zeros((1, kpoints.len())));
        let dense_structure = BandStructure::new(
            kpoints,
            bands,
            *structure.real_lattice(),
            2.,
            SymmetryOperations::identity(),
            Some(0),
        );
        let result = ShanklandInterpolator::fit(&dense_structure, 1.);
        assert!(result.is_err());
    }

    #[test]
    fn dos_integrates_to_the_number_of_states() {
        let structure = coarse_structure(3, 19);
        let interpolator = ShanklandInterpolator::fit(&structure, 8.).unwrap();
        let mesh = KMesh::gamma_centred([8, 8, 8], structure.reciprocal_lattice());
        let bands = interpolator.interpolate_mesh(&mesh, None, None);
        let dos = density_of_states(&bands, &mesh, 0.01, 0.05, 2.);
        // Two bands × spin degeneracy of two = four states per cell
        let total = dos.integrate(|_| 1.);
        approx::assert_relative_eq!(total, 4., max_relative = 0.02);
    }

    #[test]
    fn scissor_opens_the_gap_symmetrically() {
        let structure = coarse_structure(3, 23);
        let interpolator = ShanklandInterpolator::fit(&structure, 8.).unwrap();
        let mesh = KMesh::gamma_centred([4, 4, 4], structure.reciprocal_lattice());
        let plain = interpolator.interpolate_mesh(&mesh, None, None);
        let shifted = interpolator.interpolate_mesh(&mesh, Some(0.4), None);
        let gap = |bands: &InterpolatedBands| {
            let energies = &bands.energies[&Spin::Up];
            let vbm = energies.row(0).fold(f64::NEG_INFINITY, |a, &e| a.max(e));
            let cbm = energies.row(1).fold(f64::INFINITY, |a, &e| a.min(e));
            cbm - vbm
        };
        approx::assert_relative_eq!(gap(&shifted) - gap(&plain), 0.4, epsilon = 1e-10);
    }
}
