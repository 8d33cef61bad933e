//! Equation-of-state models and the capability surface consumed by the
//! stability and flash drivers.
//!
//! The drivers never talk to a concrete model directly: everything they
//! need — pressure, concentration-based log-activity with and without its
//! Jacobian, pressure gradients, compressibility roots and the Wilson
//! saturation correlation — is expressed through the [`EquationOfState`]
//! trait, so alternative cubic models can be slotted in without touching
//! the equilibrium code.
//!
//! The crate ships one implementation: the Brusilovsky generalized cubic
//! EoS in [`brusilovsky`].

pub mod brusilovsky;
mod cubic;

pub use brusilovsky::{BrusilovskyComponent, BrusilovskyMixture, BrusilovskyRecord};

use nalgebra::{DMatrix, DVector};

/// Result type for equation-of-state evaluations.
pub type EosResult<T> = Result<T, EosError>;

/// Errors raised when an EoS is evaluated outside its domain or built from
/// inconsistent parameters.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EosError {
    /// A molar amount was zero or negative
    #[error("molar amounts must be strictly positive")]
    NonPositiveMoles,
    /// The hard-core (covolume) limit was reached or exceeded
    #[error("hard-core volume {covolume} is not below the total volume {volume}")]
    CovolumeExceeded { covolume: f64, volume: f64 },
    /// A volume-like quantity left the admissible range of the cubic
    #[error("volume {volume} is outside the admissible range of the equation of state")]
    InfeasibleVolume { volume: f64 },
    /// The compressibility cubic has no root above the reduced covolume
    #[error("no physical compressibility root at p = {pressure}")]
    NoPhysicalRoot { pressure: f64 },
    /// Component or mixture parameters are inconsistent
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),
    /// A caller-supplied vector or matrix has the wrong dimension
    #[error("dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },
}

/// Which root of the compressibility cubic to select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseRoot {
    /// The largest physical root (vapor-like molar volume)
    Gas,
    /// The smallest physical root (liquid-like molar volume)
    Liquid,
}

/// Operations an equation of state must provide to the equilibrium
/// drivers. All methods are pure in their inputs; implementations must not
/// keep mutable state across calls.
///
/// Conventions: `moles` is the vector of molar amounts N \[mol\], `volume`
/// the total volume V \[m^3\], and `rt` the thermal parameter R·T \[J/mol\].
/// Log-activity is the *residual* part of the chemical potential per RT in
/// the concentration reference, i.e. the full activity of component `i` is
/// `ln(N_i/V) + log_activity_i`.
///
/// Implementations must not panic on bad inputs: infeasible states and
/// wrongly sized vectors or buffers are reported through [`EosError`]
/// ([`EosError::DimensionMismatch`] for the latter).
pub trait EquationOfState {
    /// Number of components in the mixture.
    fn components(&self) -> usize;

    /// Per-component covolumes b_i \[m^3/mol\]; the feasibility bound is
    /// `sum(N_i * b_i) < V`.
    fn covolumes(&self) -> &DVector<f64>;

    /// Pressure p(N, V, RT) \[Pa\].
    fn pressure(&self, moles: &DVector<f64>, volume: f64, rt: f64) -> EosResult<f64>;

    /// Log-activity coefficients ln φ_i, written into `out`.
    fn log_activity(
        &self,
        moles: &DVector<f64>,
        volume: f64,
        rt: f64,
        out: &mut DVector<f64>,
    ) -> EosResult<()>;

    /// Log-activity coefficients together with their Jacobian
    /// ∂ ln φ_i / ∂ N_j at fixed V, RT. The Jacobian is symmetric.
    fn log_activity_with_jacobian(
        &self,
        moles: &DVector<f64>,
        volume: f64,
        rt: f64,
        out: &mut DVector<f64>,
        jacobian: &mut DMatrix<f64>,
    ) -> EosResult<()>;

    /// Pressure gradient: fills `dp_dn` with ∂p/∂N_i and returns ∂p/∂V.
    fn pressure_gradient(
        &self,
        moles: &DVector<f64>,
        volume: f64,
        rt: f64,
        dp_dn: &mut DVector<f64>,
    ) -> EosResult<f64>;

    /// Compressibility factor Z = pV/(ΣN·RT) for the requested root of the
    /// cubic at the given pressure. When the cubic has a single physical
    /// root it serves both [`PhaseRoot`] requests.
    fn compressibility(
        &self,
        moles: &DVector<f64>,
        pressure: f64,
        rt: f64,
        root: PhaseRoot,
    ) -> EosResult<f64>;

    /// Wilson correlation estimate of the pure-component saturation
    /// pressures at the given RT. Used only to seed stability trials.
    fn wilson_saturation_pressure(&self, rt: f64) -> DVector<f64>;
}
