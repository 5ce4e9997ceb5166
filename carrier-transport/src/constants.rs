//! # Constants
//!
//! Defines physical constants used in the simulation

pub const BOLTZMANN: f64 = 1.38064852e-23; // The Boltzmann constant in m^2 kg / s^2 K
pub const ELECTRON_CHARGE: f64 = 1.60217662e-19; // Single electron charge in C
pub const ELECTRON_MASS: f64 = 9.10938356e-31; // Single electron mass
pub const EPSILON_0: f64 = 8.85418782e-12; // Permitivitty of free space in F / m
pub const HBAR: f64 = 1.0545718e-34; // Reduced Planck constant

/// Boltzmann constant in eV / K, for energies held in electron volts
pub const BOLTZMANN_EV: f64 = BOLTZMANN / ELECTRON_CHARGE;

/// Conversion from cm⁻³ carrier concentrations to m⁻³
pub const PER_CM3_TO_PER_M3: f64 = 1e6;
