//! Bounded-step BFGS minimization with modified-Cholesky step solves.
//!
//! The solver maintains an approximation `B` of the objective Hessian and
//! advances by `d = −B⁻¹ g`, where the solve goes through a Cholesky
//! factorization. When an update has made `B` indefinite, an escalating
//! diagonal ridge is added until the factorization succeeds, so the step
//! stays a descent direction; the ultimate fallback is steepest descent.
//!
//! Steps are bounded: before the line search the objective is asked for
//! the largest admissible step along the direction, and the backtracking
//! Armijo search starts from `min(1, bound)`. Non-finite objective values
//! mark a trial point as inadmissible and simply shorten the step, which
//! lets objectives with open-domain constraints (logarithms of amounts,
//! covolume denominators) report the boundary by returning NaN.
//!
//! An exact Hessian may be supplied for the first iterate; it is used as
//! the initial `B` and never reset afterwards, so the quasi-Newton updates
//! refine rather than discard the analytic curvature.

use log::trace;
use nalgebra::{Cholesky, DMatrix, DVector};

use super::{SolverError, SolverResult};

/// Armijo sufficient-decrease coefficient.
const ARMIJO: f64 = 1.0e-4;
/// Step halvings before the line search gives up.
const MAX_BACKTRACKS: usize = 48;
/// Relative curvature floor below which the BFGS update is skipped.
const CURVATURE_FLOOR: f64 = 1.0e-10;
/// Ridge escalations before the factorization falls back to steepest descent.
const MAX_RIDGE_ATTEMPTS: usize = 12;

/// A smooth function minimized by [`BfgsSolver`].
pub trait Objective {
    /// Evaluates the objective at `x`, filling `gradient` in place.
    ///
    /// A non-finite return value marks `x` as inadmissible; the line
    /// search treats it as "too far" and backtracks.
    fn evaluate(&mut self, x: &DVector<f64>, gradient: &mut DVector<f64>) -> f64;

    /// Largest admissible step length along `direction` from `x`.
    ///
    /// `+∞` means unconstrained. Returning NaN or a non-positive value
    /// signals that no admissible step exists, which aborts the
    /// minimization with [`SolverError::NoFeasibleStep`].
    fn max_step(&self, _x: &DVector<f64>, _direction: &DVector<f64>) -> f64 {
        f64::INFINITY
    }
}

/// Summary of a minimization run.
#[derive(Debug, Clone)]
pub struct BfgsSolution {
    /// The final iterate
    pub argument: DVector<f64>,
    /// Objective value at the final iterate
    pub value: f64,
    /// Euclidean norm of the gradient at the final iterate
    pub gradient_norm: f64,
    /// Number of iterations performed
    pub iterations: usize,
    /// Whether the gradient norm dropped below the tolerance
    pub converged: bool,
}

/// Quasi-Newton minimizer with feasibility-bounded steps.
#[derive(Debug, Clone)]
pub struct BfgsSolver {
    /// Convergence tolerance on the Euclidean gradient norm
    pub gradient_tolerance: f64,
    /// Maximum number of iterations
    pub max_iterations: usize,
}

impl BfgsSolver {
    /// Creates a solver with the given gradient tolerance and iteration cap.
    pub fn new(gradient_tolerance: f64, max_iterations: usize) -> Self {
        BfgsSolver { gradient_tolerance, max_iterations }
    }

    /// Minimizes `objective` starting from `x0`.
    ///
    /// `initial_hessian`, when given, preloads the Hessian approximation
    /// (it is factorized with a ridge if indefinite, never rebuilt from
    /// scratch). Without it the identity is used.
    ///
    /// A run that stops on the iteration cap, on a stalled line search or
    /// on a non-finite starting value still returns the best iterate with
    /// `converged = false`.
    ///
    /// # Errors
    ///
    /// [`SolverError::NoFeasibleStep`] when the objective reports an
    /// inadmissible step bound, [`SolverError::DimensionMismatch`] when the
    /// supplied initial Hessian is not square of the size of `x0`.
    pub fn minimize<O: Objective>(
        &self,
        objective: &mut O,
        x0: DVector<f64>,
        initial_hessian: Option<DMatrix<f64>>,
    ) -> SolverResult<BfgsSolution> {
        let size = x0.len();
        let mut hessian = initial_hessian.unwrap_or_else(|| DMatrix::identity(size, size));
        if hessian.nrows() != size || hessian.ncols() != size {
            return Err(SolverError::DimensionMismatch {
                expected: size,
                found: hessian.nrows().max(hessian.ncols()),
            });
        }

        let mut x = x0;
        let mut gradient = DVector::zeros(size);
        let mut value = objective.evaluate(&x, &mut gradient);
        if !value.is_finite() {
            return Ok(BfgsSolution {
                argument: x,
                value,
                gradient_norm: f64::NAN,
                iterations: 0,
                converged: false,
            });
        }

        let mut trial = DVector::zeros(size);
        let mut trial_gradient = DVector::zeros(size);

        for iteration in 0..self.max_iterations {
            let gradient_norm = gradient.norm();
            if !gradient_norm.is_finite() {
                return Ok(BfgsSolution {
                    argument: x,
                    value,
                    gradient_norm,
                    iterations: iteration,
                    converged: false,
                });
            }
            if gradient_norm < self.gradient_tolerance {
                return Ok(BfgsSolution {
                    argument: x,
                    value,
                    gradient_norm,
                    iterations: iteration,
                    converged: true,
                });
            }

            let mut direction = match newton_direction(&hessian, &gradient) {
                Some(direction) => direction,
                None => gradient.scale(-1.0),
            };
            if direction.dot(&gradient) >= 0.0 {
                direction = gradient.scale(-1.0);
            }

            let bound = objective.max_step(&x, &direction);
            if bound.is_nan() || bound <= 0.0 {
                return Err(SolverError::NoFeasibleStep);
            }

            let slope = gradient.dot(&direction);
            let mut step = bound.min(1.0);
            let mut trial_value = f64::NAN;
            let mut accepted = false;
            for _ in 0..MAX_BACKTRACKS {
                trial.copy_from(&x);
                trial.axpy(step, &direction, 1.0);
                trial_value = objective.evaluate(&trial, &mut trial_gradient);
                if trial_value.is_finite() && trial_value <= value + ARMIJO * step * slope {
                    accepted = true;
                    break;
                }
                step *= 0.5;
            }
            if !accepted {
                trace!("line search stalled at iteration {iteration} (|g| = {gradient_norm:.3e})");
                return Ok(BfgsSolution {
                    argument: x,
                    value,
                    gradient_norm,
                    iterations: iteration,
                    converged: false,
                });
            }

            // Quasi-Newton update; skipped when the curvature condition fails,
            // which keeps B symmetric positive semi-definite candidates only.
            let displacement = &trial - &x;
            let gradient_change = &trial_gradient - &gradient;
            let curvature = displacement.dot(&gradient_change);
            if curvature > CURVATURE_FLOOR * displacement.norm() * gradient_change.norm() {
                let projected = &hessian * &displacement;
                let weight = displacement.dot(&projected);
                if weight > 0.0 {
                    hessian.ger(-1.0 / weight, &projected, &projected, 1.0);
                }
                hessian.ger(1.0 / curvature, &gradient_change, &gradient_change, 1.0);
            }

            x.copy_from(&trial);
            gradient.copy_from(&trial_gradient);
            value = trial_value;
            trace!(
                "iteration {iteration}: f = {value:.6e}, |g| = {:.3e}, step = {step:.3e}",
                gradient.norm()
            );
        }

        let gradient_norm = gradient.norm();
        Ok(BfgsSolution {
            argument: x,
            value,
            gradient_norm,
            iterations: self.max_iterations,
            converged: gradient_norm < self.gradient_tolerance,
        })
    }
}

/// Solves `B d = −g` through a Cholesky factorization, adding an
/// escalating diagonal ridge when `B` is not positive definite.
fn newton_direction(hessian: &DMatrix<f64>, gradient: &DVector<f64>) -> Option<DVector<f64>> {
    let size = hessian.nrows();
    let mean_diagonal =
        hessian.diagonal().iter().map(|entry| entry.abs()).sum::<f64>() / size as f64;
    let mut ridge = 0.0;
    for _ in 0..MAX_RIDGE_ATTEMPTS {
        let mut candidate = hessian.clone();
        if ridge > 0.0 {
            for i in 0..size {
                candidate[(i, i)] += ridge;
            }
        }
        if let Some(factorization) = Cholesky::new(candidate) {
            return Some(factorization.solve(&gradient.scale(-1.0)));
        }
        ridge = if ridge == 0.0 { (1.0e-10 * mean_diagonal).max(1.0e-16) } else { ridge * 100.0 };
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// f(x) = (x1 + 2x2 − 7)^2 + (2x1 + x2 − 5)^2, minimum 0 at (1, 3).
    struct Booth;

    impl Objective for Booth {
        fn evaluate(&mut self, x: &DVector<f64>, gradient: &mut DVector<f64>) -> f64 {
            let first = x[0] + 2.0 * x[1] - 7.0;
            let second = 2.0 * x[0] + x[1] - 5.0;
            gradient[0] = 2.0 * first + 4.0 * second;
            gradient[1] = 4.0 * first + 2.0 * second;
            first * first + second * second
        }
    }

    struct Rosenbrock;

    impl Objective for Rosenbrock {
        fn evaluate(&mut self, x: &DVector<f64>, gradient: &mut DVector<f64>) -> f64 {
            let residual = x[1] - x[0] * x[0];
            gradient[0] = -2.0 * (1.0 - x[0]) - 400.0 * residual * x[0];
            gradient[1] = 200.0 * residual;
            (1.0 - x[0]).powi(2) + 100.0 * residual * residual
        }
    }

    /// f(x) = (x − 2)^2 restricted to x < 1 by the step limiter.
    struct BoundedParabola;

    impl Objective for BoundedParabola {
        fn evaluate(&mut self, x: &DVector<f64>, gradient: &mut DVector<f64>) -> f64 {
            gradient[0] = 2.0 * (x[0] - 2.0);
            (x[0] - 2.0) * (x[0] - 2.0)
        }

        fn max_step(&self, x: &DVector<f64>, direction: &DVector<f64>) -> f64 {
            if direction[0] > 0.0 { 0.9 * (1.0 - x[0]) / direction[0] } else { f64::INFINITY }
        }
    }

    struct NoStep;

    impl Objective for NoStep {
        fn evaluate(&mut self, x: &DVector<f64>, gradient: &mut DVector<f64>) -> f64 {
            gradient[0] = 1.0;
            x[0]
        }

        fn max_step(&self, _x: &DVector<f64>, _direction: &DVector<f64>) -> f64 {
            f64::NAN
        }
    }

    #[test]
    fn booth_with_exact_hessian_converges_in_one_step() {
        let hessian = DMatrix::from_row_slice(2, 2, &[10.0, 8.0, 8.0, 10.0]);
        let solver = BfgsSolver::new(1.0e-8, 50);
        let solution = solver
            .minimize(&mut Booth, DVector::from_vec(vec![4.0, 2.0]), Some(hessian))
            .expect("unconstrained problem");
        assert!(solution.converged);
        assert_eq!(solution.iterations, 1);
        assert!(solution.value < 1.0e-10, "f = {}", solution.value);
        assert_relative_eq!(solution.argument[0], 1.0, epsilon = 1e-8);
        assert_relative_eq!(solution.argument[1], 3.0, epsilon = 1e-8);
    }

    #[test]
    fn booth_without_preconditioner_still_converges() {
        let solver = BfgsSolver::new(1.0e-8, 200);
        let solution = solver
            .minimize(&mut Booth, DVector::from_vec(vec![4.0, 2.0]), None)
            .expect("unconstrained problem");
        assert!(solution.converged);
        assert!(solution.value < 1.0e-10, "f = {}", solution.value);
    }

    #[test]
    fn rosenbrock_converges() {
        let solver = BfgsSolver::new(1.0e-5, 500);
        let solution = solver
            .minimize(&mut Rosenbrock, DVector::from_vec(vec![-1.2, 1.0]), None)
            .expect("unconstrained problem");
        assert!(solution.converged, "stopped after {} iterations", solution.iterations);
        assert_relative_eq!(solution.argument[0], 1.0, epsilon = 1e-3);
        assert_relative_eq!(solution.argument[1], 1.0, epsilon = 1e-3);
    }

    #[test]
    fn bounded_steps_stay_inside_the_feasible_region() {
        let solver = BfgsSolver::new(1.0e-8, 10);
        let solution = solver
            .minimize(&mut BoundedParabola, DVector::from_vec(vec![0.0]), None)
            .expect("limiter always returns a positive bound");
        assert!(!solution.converged);
        assert!(solution.argument[0] < 1.0, "x = {}", solution.argument[0]);
        assert!(solution.argument[0] > 0.9, "x = {}", solution.argument[0]);
    }

    #[test]
    fn inadmissible_step_bound_is_fatal() {
        let solver = BfgsSolver::new(1.0e-8, 10);
        let result = solver.minimize(&mut NoStep, DVector::from_vec(vec![0.0]), None);
        assert!(matches!(result, Err(SolverError::NoFeasibleStep)));
    }

    #[test]
    fn wrongly_sized_initial_hessian_is_an_error() {
        let solver = BfgsSolver::new(1.0e-8, 10);
        let result = solver.minimize(
            &mut Booth,
            DVector::from_vec(vec![4.0, 2.0]),
            Some(DMatrix::identity(3, 3)),
        );
        assert!(matches!(result, Err(SolverError::DimensionMismatch { expected: 2, found: 3 })));
    }

    #[test]
    fn non_finite_start_reports_non_convergence() {
        struct Undefined;
        impl Objective for Undefined {
            fn evaluate(&mut self, _x: &DVector<f64>, gradient: &mut DVector<f64>) -> f64 {
                gradient[0] = f64::NAN;
                f64::NAN
            }
        }
        let solver = BfgsSolver::new(1.0e-8, 10);
        let solution = solver
            .minimize(&mut Undefined, DVector::from_vec(vec![0.0]), None)
            .expect("a NaN objective is not a step failure");
        assert!(!solution.converged);
        assert!(solution.value.is_nan());
    }
}
