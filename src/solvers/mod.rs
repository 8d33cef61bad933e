//! Numerical minimization for thermodynamic equilibrium calculations.
//!
//! Both equilibrium questions the crate answers — single-phase stability
//! and the two-phase flash — reduce to constrained minimizations of smooth
//! thermodynamic functionals:
//!
//! - the tangent-plane distance over trial-phase concentrations, and
//! - the Helmholtz free-energy difference over the fractional-split vector.
//!
//! Both share one solver: a quasi-Newton (BFGS) descent whose steps are
//! bounded by a per-objective feasibility limiter and whose Hessian
//! approximation can be preloaded with the exact analytic Hessian of the
//! functional. The limiter keeps every iterate strictly inside the open
//! feasible region (positive amounts, covolume bounds), so the objectives
//! never have to evaluate at physically meaningless states.
//!
//! # Submodules
//!
//! - [`bfgs`]: the bounded-step BFGS solver and the [`bfgs::Objective`]
//!   trait implemented by the equilibrium functionals.

pub mod bfgs;

pub use bfgs::{BfgsSolution, BfgsSolver, Objective};

/// Result type for solver operations.
pub type SolverResult<T> = Result<T, SolverError>;

/// Errors that can occur during a minimization.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SolverError {
    /// The step limiter found no admissible step along the search direction
    #[error("no admissible step along the search direction")]
    NoFeasibleStep,
    /// A caller-supplied matrix has the wrong dimension
    #[error("dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
}
