//! Single-phase stability of a (N, V, RT) state.
//!
//! The test is Michelsen's tangent-plane criterion in the isochoric
//! formulation: the state is unstable whenever the tangent-plane distance
//!
//! ```text
//! D(η) = Σ η_i (μ_i(η, 1, RT) − μ_i(N, V, RT))/RT − (p(η, 1, RT) − p(N, V, RT))/RT
//! ```
//!
//! drops below zero at some trial concentration η (a candidate phase taken
//! at unit volume). D is minimized from four physically motivated starting
//! points — the parent interpreted as gas or liquid, crossed with a gas or
//! liquid trial root of the cubic at the Wilson saturation pressure — and
//! the driver exits early on the first minimum proving instability, which
//! is the common case when a flash is requested.
//!
//! The gradient of D is `ln η + ln φ(η) − ln a_parent` and its Hessian is
//! `∂lnφ/∂N + diag(1/η)`, so every trial starts the descent with the exact
//! curvature preloaded.

use log::debug;
use nalgebra::{DMatrix, DVector};

use crate::EquilibriumError;
use crate::eos::{EosError, EosResult, EquationOfState, PhaseRoot};
use crate::solvers::bfgs::{BfgsSolver, Objective};

/// Tangent-plane distance below which the state is declared unstable.
pub(crate) const INSTABILITY_THRESHOLD: f64 = -1.0e-5;
/// Gradient tolerance of the trial minimizations.
const GRADIENT_TOLERANCE: f64 = 1.0e-3;
/// Iteration cap of the trial minimizations.
const MAX_ITERATIONS: usize = 1000;

/// The tangent-plane distance functional of a fixed parent state.
///
/// Owns the precomputed parent activity and pressure together with the
/// scratch buffers shared by the four trial minimizations.
pub struct StabilityObjective<'a, E: EquationOfState> {
    eos: &'a E,
    rt: f64,
    /// Full parent activity ln(N_i/V) + ln φ_i(N, V)
    activity_parent: DVector<f64>,
    pressure_parent: f64,
    scratch: DVector<f64>,
}

impl<'a, E: EquationOfState> StabilityObjective<'a, E> {
    /// Precomputes the parent activity and pressure.
    pub fn new(eos: &'a E, moles: &DVector<f64>, volume: f64, rt: f64) -> EosResult<Self> {
        let size = moles.len();
        let mut activity_parent = DVector::zeros(size);
        eos.log_activity(moles, volume, rt, &mut activity_parent)?;
        for i in 0..size {
            activity_parent[i] += (moles[i] / volume).ln();
        }
        let pressure_parent = eos.pressure(moles, volume, rt)?;
        Ok(Self { eos, rt, activity_parent, pressure_parent, scratch: DVector::zeros(size) })
    }

    /// Tangent-plane distance and its gradient at the trial concentration.
    pub fn tangent_plane_distance(
        &mut self,
        concentration: &DVector<f64>,
        gradient: &mut DVector<f64>,
    ) -> EosResult<f64> {
        if concentration.iter().any(|&eta| eta <= 0.0) {
            return Err(EosError::NonPositiveMoles);
        }
        self.eos.log_activity(concentration, 1.0, self.rt, &mut self.scratch)?;
        for i in 0..concentration.len() {
            gradient[i] = self.scratch[i] + concentration[i].ln() - self.activity_parent[i];
        }
        let trial_pressure = self.eos.pressure(concentration, 1.0, self.rt)?;
        Ok(gradient.dot(concentration) - (trial_pressure - self.pressure_parent) / self.rt)
    }

    /// Exact Hessian of the distance functional at the trial concentration.
    pub fn distance_hessian(&mut self, concentration: &DVector<f64>) -> EosResult<DMatrix<f64>> {
        let size = concentration.len();
        let mut hessian = DMatrix::zeros(size, size);
        self.eos.log_activity_with_jacobian(
            concentration,
            1.0,
            self.rt,
            &mut self.scratch,
            &mut hessian,
        )?;
        for i in 0..size {
            hessian[(i, i)] += 1.0 / concentration[i];
        }
        Ok(hessian)
    }
}

impl<E: EquationOfState> Objective for StabilityObjective<'_, E> {
    fn evaluate(&mut self, x: &DVector<f64>, gradient: &mut DVector<f64>) -> f64 {
        match self.tangent_plane_distance(x, gradient) {
            Ok(value) => value,
            Err(_) => f64::NAN,
        }
    }

    /// Largest step keeping the trial strictly positive and inside the
    /// unit-volume covolume bound. No safety back-off: boundary-touching
    /// trials evaluate to non-finite D and the line search backtracks.
    fn max_step(&self, x: &DVector<f64>, direction: &DVector<f64>) -> f64 {
        let mut bound = f64::INFINITY;
        for i in 0..x.len() {
            if direction[i] < 0.0 {
                bound = bound.min(-x[i] / direction[i]);
            }
        }
        let covolumes = self.eos.covolumes();
        let growth = direction.dot(covolumes);
        if growth > 0.0 {
            bound = bound.min((1.0 - x.dot(covolumes)) / growth);
        }
        bound
    }
}

/// One trial minimization of the tangent-plane distance.
#[derive(Debug, Clone)]
pub struct StabilityTry {
    /// Trial concentration at the end of the minimization [mol/m^3]
    pub concentration: DVector<f64>,
    /// Tangent-plane distance at that concentration (NaN if the trial failed)
    pub energy_density: f64,
    /// Whether the trial minimization converged
    pub converged: bool,
}

impl StabilityTry {
    /// Whether this trial failed to prove instability.
    pub fn is_locally_stable(&self) -> bool {
        self.energy_density >= INSTABILITY_THRESHOLD
    }
}

/// Outcome of the stability test.
#[derive(Debug, Clone)]
pub struct StabilityReport {
    /// Whether the state is stable as a single phase
    pub stable: bool,
    /// The trials run, in seeding order; on instability the last entry is
    /// the trial that triggered the early exit
    pub tries: Vec<StabilityTry>,
}

impl StabilityReport {
    /// The trial with the lowest finite tangent-plane distance, which
    /// seeds the flash initializer.
    pub fn best_try(&self) -> Option<&StabilityTry> {
        self.tries
            .iter()
            .filter(|t| t.energy_density.is_finite())
            .min_by(|a, b| a.energy_density.total_cmp(&b.energy_density))
    }
}

/// How the parent state is interpreted when building a trial seed.
#[derive(Debug, Clone, Copy)]
enum ParentGuess {
    Gas,
    Liquid,
}

/// Tests the stability of (N, V, RT) as a single phase.
///
/// Runs up to four trial minimizations and exits early on the first one
/// proving instability. A trial whose seed construction or minimization
/// fails is recorded with a NaN distance; the test only errors out when
/// the parent state itself is infeasible or every trial failed.
pub fn stability<E: EquationOfState>(
    eos: &E,
    moles: &DVector<f64>,
    volume: f64,
    rt: f64,
) -> Result<StabilityReport, EquilibriumError> {
    let mut objective = StabilityObjective::new(eos, moles, volume, rt)?;
    let saturation = eos.wilson_saturation_pressure(rt);
    let solver = BfgsSolver::new(GRADIENT_TOLERANCE, MAX_ITERATIONS);

    let mut tries = Vec::with_capacity(4);
    for guess in [ParentGuess::Gas, ParentGuess::Liquid] {
        let (base, pressure_init) = seed_concentration(moles, &saturation, guess);
        for root in [PhaseRoot::Gas, PhaseRoot::Liquid] {
            let current = run_trial(eos, &mut objective, &solver, &base, pressure_init, rt, root);
            let distance = current.energy_density;
            tries.push(current);
            if distance < INSTABILITY_THRESHOLD {
                debug!("stability: trial {} proves instability (D = {distance:.3e})", tries.len());
                return Ok(StabilityReport { stable: false, tries });
            }
        }
    }

    if tries.iter().all(|t| t.energy_density.is_nan()) {
        return Err(EquilibriumError::StabilityFailed);
    }
    Ok(StabilityReport { stable: true, tries })
}

/// Wilson-based seed: composition weighted towards the volatile components
/// for a gas-like parent, towards the heavy ones for a liquid-like parent,
/// together with the pressure at which the trial root is taken.
fn seed_concentration(
    moles: &DVector<f64>,
    saturation: &DVector<f64>,
    guess: ParentGuess,
) -> (DVector<f64>, f64) {
    let total = moles.sum();
    match guess {
        ParentGuess::Gas => {
            let pressure = moles.dot(saturation) / total;
            let base = moles.component_mul(saturation).scale(1.0 / pressure);
            (base, pressure)
        }
        ParentGuess::Liquid => {
            let weights = moles.component_div(saturation);
            let base = weights.scale(1.0 / weights.sum());
            let pressure = base.dot(saturation);
            (base, pressure)
        }
    }
}

fn run_trial<E: EquationOfState>(
    eos: &E,
    objective: &mut StabilityObjective<'_, E>,
    solver: &BfgsSolver,
    base: &DVector<f64>,
    pressure_init: f64,
    rt: f64,
    root: PhaseRoot,
) -> StabilityTry {
    let failed = |concentration: DVector<f64>| StabilityTry {
        concentration,
        energy_density: f64::NAN,
        converged: false,
    };
    let z = match eos.compressibility(base, pressure_init, rt, root) {
        Ok(z) => z,
        Err(_) => return failed(base.clone()),
    };
    // Scale the seed composition to the trial-root molar density.
    let start = base.scale(pressure_init / (z * rt * base.sum()));
    let hessian = match objective.distance_hessian(&start) {
        Ok(hessian) => hessian,
        Err(_) => return failed(start),
    };
    match solver.minimize(objective, start.clone(), Some(hessian)) {
        Ok(solution) => StabilityTry {
            concentration: solution.argument,
            energy_density: solution.value,
            converged: solution.converged,
        },
        Err(_) => failed(start),
    }
}
