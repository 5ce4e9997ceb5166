//! Shared per-run transport state
//!
//! Every pipeline stage reads from and writes into one pre-allocated arena so
//! workers can share a `&TransportState` without locking. The scattering rate
//! arena is indexed `[mechanism, spin, band, k_ir, doping, temperature]`;
//! rates are stored on the irreducible wedge only and expanded onto the full
//! mesh through the symmetry map when the transport moments are assembled.

use crate::bandstructure::interpolation::{DensityOfStates, InterpolatedBands};
use crate::bandstructure::Spin;
use crate::error::Result;
use crate::fermi;
use crate::scattering::Mechanism;
use carrier_mesher::{IrreducibleMesh, KMesh};
use ndarray::{Array2, Array6};

pub struct TransportState {
    /// The dense, tessellated mesh
    pub mesh: KMesh,
    pub irreducible: IrreducibleMesh,
    pub bands: InterpolatedBands,
    pub dos: DensityOfStates,
    /// Spin channel order of the rate arena's spin axis
    pub spins: Vec<Spin>,
    /// Mechanism order of the rate arena's mechanism axis
    pub mechanisms: Vec<Mechanism>,
    pub spin_degeneracy: f64,
    /// Real-space primitive cell volume in m³
    pub cell_volume: f64,
    /// Signed concentrations in cm⁻³
    pub doping: Vec<f64>,
    /// K
    pub temperatures: Vec<f64>,
    /// eV, `[doping, temperature]`
    pub fermi_levels: Array2<f64>,
    /// m⁻³, `[doping, temperature]`
    pub electron_concentrations: Array2<f64>,
    /// m⁻³, `[doping, temperature]`
    pub hole_concentrations: Array2<f64>,
    /// 1/s, `[mechanism, spin, band, k_ir, doping, temperature]`
    pub rates: Array6<f64>,
}

impl TransportState {
    pub fn new(
        mesh: KMesh,
        irreducible: IrreducibleMesh,
        bands: InterpolatedBands,
        dos: DensityOfStates,
        mechanisms: Vec<Mechanism>,
        spin_degeneracy: f64,
        cell_volume: f64,
        doping: Vec<f64>,
        temperatures: Vec<f64>,
    ) -> Self {
        let spins: Vec<Spin> = bands.energies.keys().copied().collect();
        let max_bands = bands
            .energies
            .values()
            .map(|e| e.nrows())
            .max()
            .unwrap_or(0);
        let grid = (doping.len(), temperatures.len());
        let rates = Array6::zeros((
            mechanisms.len(),
            spins.len(),
            max_bands,
            irreducible.num_irreducible(),
            grid.0,
            grid.1,
        ));
        Self {
            mesh,
            irreducible,
            bands,
            dos,
            spins,
            mechanisms,
            spin_degeneracy,
            cell_volume,
            doping,
            temperatures,
            fermi_levels: Array2::zeros(grid),
            electron_concentrations: Array2::zeros(grid),
            hole_concentrations: Array2::zeros(grid),
            rates,
        }
    }

    pub fn spin_index(&self, spin: Spin) -> usize {
        self.spins
            .iter()
            .position(|&s| s == spin)
            .expect("spin channels are fixed at construction")
    }

    pub fn num_bands(&self, spin: Spin) -> usize {
        self.bands.energies[&spin].nrows()
    }

    /// Band energy (eV) at an irreducible point, via its full-mesh
    /// representative
    pub fn ir_energy(&self, spin: Spin, band: usize, ir: usize) -> f64 {
        let full = self.irreducible.ir_indices()[ir];
        self.bands.energies[&spin][(band, full)]
    }

    /// The gap-centre energy dividing valence from conduction states when a
    /// gap exists; the DOS mid-point otherwise (metals)
    pub fn divider(&self) -> f64 {
        let mut vbm = f64::NEG_INFINITY;
        let mut cbm = f64::INFINITY;
        for (spin, energies) in &self.bands.energies {
            if let Some(vb) = self.bands.valence_band_index[spin] {
                for band in 0..energies.nrows() {
                    for ik in 0..energies.ncols() {
                        let e = energies[(band, ik)];
                        if band <= vb {
                            vbm = vbm.max(e);
                        } else {
                            cbm = cbm.min(e);
                        }
                    }
                }
            }
        }
        if vbm.is_finite() && cbm.is_finite() {
            0.5 * (vbm + cbm)
        } else {
            let first = self.dos.energies.first().copied().unwrap_or(0.);
            let last = self.dos.energies.last().copied().unwrap_or(0.);
            0.5 * (first + last)
        }
    }

    /// Solve the Fermi level of every (doping, temperature) cell and store
    /// the levels and carrier concentrations in the arena
    pub fn solve_fermi_levels(&mut self) -> Result<()> {
        let divider = self.divider();
        for (id, &concentration) in self.doping.iter().enumerate() {
            for (it, &temperature) in self.temperatures.iter().enumerate() {
                let solution = fermi::solve_fermi_level(
                    &self.dos,
                    self.cell_volume,
                    divider,
                    concentration,
                    temperature,
                )?;
                tracing::info!(
                    concentration,
                    temperature,
                    fermi = solution.fermi_level,
                    "fermi level solved"
                );
                self.fermi_levels[(id, it)] = solution.fermi_level;
                self.electron_concentrations[(id, it)] = solution.electron_concentration;
                self.hole_concentrations[(id, it)] = solution.hole_concentration;
            }
        }
        Ok(())
    }

    /// Total scattering rate (1/s) summed over mechanisms at an irreducible
    /// state in cell (id, it)
    pub fn total_rate(&self, spin: usize, band: usize, ir: usize, id: usize, it: usize) -> f64 {
        (0..self.mechanisms.len())
            .map(|m| self.rates[[m, spin, band, ir, id, it]])
            .sum()
    }

    /// Total elastic rate only, the `ν_elastic` denominator of the iterative
    /// distribution update
    pub fn elastic_rate(&self, spin: usize, band: usize, ir: usize, id: usize, it: usize) -> f64 {
        self.mechanisms
            .iter()
            .enumerate()
            .filter(|(_, mechanism)| mechanism.is_elastic())
            .map(|(m, _)| self.rates[[m, spin, band, ir, id, it]])
            .sum()
    }

    /// Rate of a single mechanism expanded onto the full mesh through the
    /// symmetry map, `[band, k_full]` layout flattened per band
    pub fn expand_rate(
        &self,
        mechanism: usize,
        spin: usize,
        band: usize,
        id: usize,
        it: usize,
    ) -> Vec<f64> {
        let irreducible: Vec<f64> = (0..self.irreducible.num_irreducible())
            .map(|ir| self.rates[[mechanism, spin, band, ir, id, it]])
            .collect();
        self.irreducible.expand(&irreducible)
    }

    /// Total rate over all mechanisms on the full mesh for one band
    pub fn expand_total_rate(&self, spin: usize, band: usize, id: usize, it: usize) -> Vec<f64> {
        let irreducible: Vec<f64> = (0..self.irreducible.num_irreducible())
            .map(|ir| self.total_rate(spin, band, ir, id, it))
            .collect();
        self.irreducible.expand(&irreducible)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bandstructure::interpolation::DensityOfStates;
    use crate::bandstructure::Spin;
    use carrier_mesher::{
        IrreducibleMesh, KMesh, ReciprocalLattice, SymmetryOperations,
    };
    use nalgebra::Matrix3;
    use ndarray::{Array2, Array3, Array4};
    use std::collections::BTreeMap;

    fn toy_state() -> TransportState {
        let lattice =
            ReciprocalLattice::from_real_lattice(&(Matrix3::identity() * 5e-10)).unwrap();
        let mesh = KMesh::gamma_centred([2, 2, 2], lattice);
        let irreducible = IrreducibleMesh::reduce(&mesh, &SymmetryOperations::identity());
        let n = mesh.num_points();

        let mut energies = BTreeMap::new();
        energies.insert(Spin::Up, Array2::from_elem((1, n), 1.0));
        let mut velocities = BTreeMap::new();
        velocities.insert(Spin::Up, Array3::zeros((1, n, 3)));
        let mut products = BTreeMap::new();
        products.insert(Spin::Up, Array4::zeros((1, n, 3, 3)));
        let mut kept = BTreeMap::new();
        kept.insert(Spin::Up, vec![0]);
        let mut valence = BTreeMap::new();
        valence.insert(Spin::Up, None);
        let bands = InterpolatedBands {
            energies,
            velocities,
            velocity_products: products,
            kept_bands: kept,
            valence_band_index: valence,
        };
        let dos = DensityOfStates {
            energies: vec![0., 1., 2.],
            values: vec![0., 1., 0.],
        };
        TransportState::new(
            mesh,
            irreducible,
            bands,
            dos,
            vec![
                Mechanism::AcousticDeformation,
                Mechanism::PolarOptical,
            ],
            2.,
            (5e-10f64).powi(3),
            vec![-1e18],
            vec![300.],
        )
    }

    #[test]
    fn rate_arena_has_one_slot_per_axis_combination() {
        let state = toy_state();
        assert_eq!(
            state.rates.shape(),
            &[2, 1, 1, state.irreducible.num_irreducible(), 1, 1]
        );
    }

    #[test]
    fn elastic_rate_excludes_inelastic_mechanisms() {
        let mut state = toy_state();
        state.rates[[0, 0, 0, 0, 0, 0]] = 3.; // acoustic
        state.rates[[1, 0, 0, 0, 0, 0]] = 5.; // polar optical
        approx::assert_relative_eq!(state.total_rate(0, 0, 0, 0, 0), 8.);
        approx::assert_relative_eq!(state.elastic_rate(0, 0, 0, 0, 0), 3.);
    }

    #[test]
    fn expansion_covers_the_full_mesh() {
        let mut state = toy_state();
        for ir in 0..state.irreducible.num_irreducible() {
            state.rates[[0, 0, 0, ir, 0, 0]] = ir as f64 + 1.;
        }
        let full = state.expand_rate(0, 0, 0, 0, 0);
        assert_eq!(full.len(), state.mesh.num_points());
        assert!(full.iter().all(|&r| r >= 1.));
    }
}
