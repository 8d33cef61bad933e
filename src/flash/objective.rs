//! The Helmholtz free-energy difference minimized by the flash.
//!
//! The two-phase configuration is parameterized by the fractional split
//! vector `x`: `x_i = N′_i/N_i` for the components and `x_{c+1} = V′/V`
//! for the volume, all confined to the open interval (0, 1). The objective
//! is `ΔA(x) = A(N′, V′) + A(N″, V″) − A(N, V)`; its gradient is assembled
//! from the chemical-potential differences between the phases and the
//! energy value follows from Euler homogeneity of A, which reuses all the
//! gradient work:
//!
//! ```text
//! ΔA = ⟨g, x⟩ + (p_base − p″)·V − Σ N_i·(μ_base,i − μ″_i)
//! ```

use nalgebra::DVector;

use crate::eos::{EosError, EosResult, EquationOfState};
use crate::solvers::bfgs::Objective;

/// Safety back-off keeping the iterates strictly interior.
const STEP_BACKOFF: f64 = 0.9;

/// The two-phase Helmholtz difference of a fixed base state.
///
/// Owns the precomputed base activity/pressure, the covolume weights of
/// the split constraint and the scratch buffers reused across evaluations.
pub struct FlashObjective<'a, E: EquationOfState> {
    eos: &'a E,
    moles: DVector<f64>,
    volume: f64,
    rt: f64,
    /// Full base activity ln(N_i/V) + ln φ_i(N, V)
    activity_base: DVector<f64>,
    pressure_base: f64,
    /// Constraint weights (N_1 b_1, …, N_c b_c, −V): feasibility of the
    /// first phase is x·w < 0
    covolume_weights: DVector<f64>,
    moles_one: DVector<f64>,
    moles_two: DVector<f64>,
    activity_one: DVector<f64>,
    activity_two: DVector<f64>,
}

impl<'a, E: EquationOfState> FlashObjective<'a, E> {
    /// Precomputes the base state. Fails if the base state itself is
    /// infeasible for the EoS.
    pub fn new(eos: &'a E, moles: &DVector<f64>, volume: f64, rt: f64) -> EosResult<Self> {
        let size = moles.len();
        let mut activity_base = DVector::zeros(size);
        eos.log_activity(moles, volume, rt, &mut activity_base)?;
        for i in 0..size {
            activity_base[i] += (moles[i] / volume).ln();
        }
        let pressure_base = eos.pressure(moles, volume, rt)?;
        let covolumes = eos.covolumes();
        let mut covolume_weights = DVector::zeros(size + 1);
        for i in 0..size {
            covolume_weights[i] = moles[i] * covolumes[i];
        }
        covolume_weights[size] = -volume;
        Ok(Self {
            eos,
            moles: moles.clone(),
            volume,
            rt,
            activity_base,
            pressure_base,
            covolume_weights,
            moles_one: DVector::zeros(size),
            moles_two: DVector::zeros(size),
            activity_one: DVector::zeros(size),
            activity_two: DVector::zeros(size),
        })
    }

    /// Splits the state vector into the two phases, filling the mole
    /// buffers and returning the phase volumes.
    fn split(&mut self, x: &DVector<f64>) -> EosResult<(f64, f64)> {
        let size = self.moles.len();
        if x.len() != size + 1 {
            return Err(EosError::DimensionMismatch { expected: size + 1, found: x.len() });
        }
        for i in 0..size {
            if !(x[i] > 0.0 && x[i] < 1.0) {
                return Err(EosError::NonPositiveMoles);
            }
            self.moles_one[i] = x[i] * self.moles[i];
            self.moles_two[i] = self.moles[i] - self.moles_one[i];
        }
        if !(x[size] > 0.0 && x[size] < 1.0) {
            return Err(EosError::InfeasibleVolume { volume: x[size] * self.volume });
        }
        let volume_one = x[size] * self.volume;
        Ok((volume_one, self.volume - volume_one))
    }

    /// ΔA and its gradient at the state vector.
    pub fn helmholtz_difference(
        &mut self,
        x: &DVector<f64>,
        gradient: &mut DVector<f64>,
    ) -> EosResult<f64> {
        let (volume_one, volume_two) = self.split(x)?;
        let size = self.moles.len();
        self.eos.log_activity(&self.moles_one, volume_one, self.rt, &mut self.activity_one)?;
        self.eos.log_activity(&self.moles_two, volume_two, self.rt, &mut self.activity_two)?;
        let pressure_one = self.eos.pressure(&self.moles_one, volume_one, self.rt)?;
        let pressure_two = self.eos.pressure(&self.moles_two, volume_two, self.rt)?;

        let mut base_tail = 0.0;
        for i in 0..size {
            let activity_one = self.activity_one[i] + (self.moles_one[i] / volume_one).ln();
            let activity_two = self.activity_two[i] + (self.moles_two[i] / volume_two).ln();
            gradient[i] = self.moles[i] * self.rt * (activity_one - activity_two);
            base_tail -= self.moles[i] * self.rt * (self.activity_base[i] - activity_two);
        }
        gradient[size] = self.volume * (pressure_two - pressure_one);
        Ok(gradient.dot(x) + (self.pressure_base - pressure_two) * self.volume + base_tail)
    }

    /// ΔA alone; used by the initial-state search.
    pub fn energy(&mut self, x: &DVector<f64>) -> EosResult<f64> {
        let mut gradient = DVector::zeros(x.len());
        self.helmholtz_difference(x, &mut gradient)
    }

    pub(crate) fn base_moles(&self) -> &DVector<f64> {
        &self.moles
    }

    pub(crate) fn base_volume(&self) -> f64 {
        self.volume
    }
}

impl<E: EquationOfState> Objective for FlashObjective<'_, E> {
    fn evaluate(&mut self, x: &DVector<f64>, gradient: &mut DVector<f64>) -> f64 {
        match self.helmholtz_difference(x, gradient) {
            Ok(value) => value,
            Err(_) => f64::NAN,
        }
    }

    /// Largest admissible step times the safety back-off. Every coordinate
    /// is confined to (0, 1) and the first-phase covolume inequality
    /// `x·w < 0` is tracked; the second phase's inequality is implied by
    /// feasibility of the base state. NaN (no finite bound) is fatal.
    fn max_step(&self, x: &DVector<f64>, direction: &DVector<f64>) -> f64 {
        let mut bound = f64::INFINITY;
        for i in 0..x.len() {
            if direction[i] > 0.0 {
                bound = bound.min((1.0 - x[i]) / direction[i]);
            } else if direction[i] < 0.0 {
                bound = bound.min(-x[i] / direction[i]);
            }
        }
        let growth = direction.dot(&self.covolume_weights);
        if growth > 0.0 {
            bound = bound.min(-x.dot(&self.covolume_weights) / growth);
        }
        if !bound.is_finite() {
            return f64::NAN;
        }
        STEP_BACKOFF * bound
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GAS_CONSTANT;
    use crate::eos::{BrusilovskyComponent, BrusilovskyMixture};
    use approx::assert_relative_eq;

    fn mixture() -> BrusilovskyMixture {
        let methane = BrusilovskyComponent::from_critical_point(
            "methane", 0.016043, 4.5992e6, 190.564, 0.01142, 0.7563, 0.33294, 0.37447,
        )
        .expect("methane parameters are valid");
        let decane = BrusilovskyComponent::from_critical_point(
            "n-decane", 0.142285, 2.103e6, 617.7, 0.4884, 0.75001, 0.31, 1.07,
        )
        .expect("n-decane parameters are valid");
        BrusilovskyMixture::new(vec![methane, decane]).expect("mixture is non-empty")
    }

    fn objective(mixture: &BrusilovskyMixture) -> FlashObjective<'_, BrusilovskyMixture> {
        let moles = DVector::from_vec(vec![0.6, 0.4]);
        FlashObjective::new(mixture, &moles, 5.0e-4, GAS_CONSTANT * 300.0)
            .expect("base state is feasible")
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let mixture = mixture();
        let mut objective = objective(&mixture);
        let x = DVector::from_vec(vec![0.5, 0.1, 0.3]);
        let mut gradient = DVector::zeros(3);
        let value = objective.helmholtz_difference(&x, &mut gradient).expect("state is feasible");
        assert!(value.is_finite());

        for i in 0..3 {
            let step = 1.0e-7;
            let mut forward = x.clone();
            forward[i] += step;
            let plus = objective.energy(&forward).expect("state is feasible");
            let mut backward = x.clone();
            backward[i] -= step;
            let minus = objective.energy(&backward).expect("state is feasible");
            let numeric = (plus - minus) / (2.0 * step);
            assert_relative_eq!(gradient[i], numeric, max_relative = 1e-4, epsilon = 1e-6);
        }
    }

    #[test]
    fn energy_vanishes_towards_the_trivial_split() {
        // As the split fractions collapse onto a common value the two
        // phases coincide with the base state and ΔA tends to zero.
        let mixture = mixture();
        let mut objective = objective(&mixture);
        let near = objective
            .energy(&DVector::from_vec(vec![0.5000001, 0.5, 0.4999999]))
            .expect("state is feasible");
        // Equal fractions reproduce the base state split in two halves.
        let exact = objective
            .energy(&DVector::from_vec(vec![0.5, 0.5, 0.5]))
            .expect("state is feasible");
        assert!(exact.abs() < 1.0e-9, "ΔA at the homogeneous split is {exact}");
        assert!(near.abs() < 1.0e-6, "ΔA near the homogeneous split is {near}");
    }

    #[test]
    fn out_of_range_fractions_are_domain_errors() {
        let mixture = mixture();
        let mut objective = objective(&mixture);
        assert!(objective.energy(&DVector::from_vec(vec![1.2, 0.5, 0.5])).is_err());
        assert!(objective.energy(&DVector::from_vec(vec![0.5, 0.5, -0.1])).is_err());
    }

    #[test]
    fn step_limiter_applies_the_safety_backoff() {
        let mixture = mixture();
        let objective = objective(&mixture);
        let x = DVector::from_vec(vec![0.5, 0.5, 0.5]);
        // Only the volume coordinate moves; the (0, 1) bound at 0.5
        // allows a step of 0.5/0.25 = 2 before the back-off.
        let direction = DVector::from_vec(vec![0.0, 0.0, -0.25]);
        let bound = objective.max_step(&x, &direction);
        assert_relative_eq!(bound, 0.9 * 2.0, max_relative = 1e-12);
    }

    #[test]
    fn step_limiter_tracks_the_covolume_constraint() {
        let mixture = mixture();
        let objective = objective(&mixture);
        // Shrink the phase-one volume towards the phase-one covolume.
        let x = DVector::from_vec(vec![0.9, 0.9, 0.2]);
        let direction = DVector::from_vec(vec![0.0, 0.0, -1.0]);
        let covolumes = mixture.covolumes();
        let hard_core = 0.9 * (0.6 * covolumes[0] + 0.4 * covolumes[1]);
        let slack = 0.2 * 5.0e-4 - hard_core;
        // Positivity allows 0.2, the covolume bound slack/V is tighter.
        let expected = 0.9 * (slack / 5.0e-4);
        let bound = objective.max_step(&x, &direction);
        assert_relative_eq!(bound, expected, max_relative = 1e-10);
    }

    #[test]
    fn zero_direction_has_no_finite_bound() {
        let mixture = mixture();
        let objective = objective(&mixture);
        let x = DVector::from_vec(vec![0.5, 0.5, 0.5]);
        let bound = objective.max_step(&x, &DVector::zeros(3));
        assert!(bound.is_nan());
    }
}
