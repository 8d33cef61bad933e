#![cfg_attr(not(doctest), doc = include_str!("../README.md"))]

use thiserror::Error;

// Core modules
pub mod eos;
pub mod flash;
pub mod solvers;
pub mod stability;

// Reexport the main entry points and their result types
pub use eos::{
    BrusilovskyComponent, BrusilovskyMixture, BrusilovskyRecord, EosError, EquationOfState,
    PhaseRoot,
};
pub use flash::{FlashResult, PhaseSplit, PhaseState, flash};
pub use solvers::SolverError;
pub use stability::{StabilityReport, StabilityTry, stability};

/// Universal gas constant R [J/(mol·K)].
///
/// The crate works in the thermal parameter RT throughout; this constant
/// is for callers building RT from a temperature and for the
/// critical-point parameterization of components.
pub const GAS_CONSTANT: f64 = 8.31446261815324;

/// Errors of the equilibrium drivers.
///
/// Failures of the collaborating subsystems (EoS evaluations, the
/// minimizer) surface wrapped; the remaining variants are the two ways
/// the drivers themselves can fail.
#[derive(Debug, Clone, Error)]
pub enum EquilibriumError {
    /// The equation of state was evaluated at an infeasible state
    #[error("equation of state error: {0}")]
    Eos(#[from] EosError),
    /// The minimizer could not take an admissible step
    #[error("solver error: {0}")]
    Solver(#[from] SolverError),
    /// Every stability trial diverged; the input is numerically pathological
    #[error("all stability trials diverged")]
    StabilityFailed,
    /// The contracting search exhausted its attempts without finding a
    /// negative-energy starting split
    #[error("no negative-energy starting split found after {attempts} contraction steps")]
    InitialStateNotFound { attempts: usize },
}
