//! Isochoric (VT) flash: the two-phase split minimizing the Helmholtz
//! free energy.
//!
//! The driver walks a fixed sequence: the stability test first (a stable
//! state short-circuits into a single-phase result), then the contracting
//! search for a starting split seeded by the trial that proved the state
//! unstable, then the BFGS descent on the Helmholtz difference preloaded
//! with the exact analytic Hessian, and finally gas/liquid classification
//! of the converged phases by compressibility factor.
//!
//! Mass and volume conservation are built into the parameterization: the
//! split vector stores phase-one fractions and phase two is always the
//! complement, so the balances hold to roundoff by construction.

mod hessian;
mod initial;
mod objective;

pub use objective::FlashObjective;

use log::debug;
use nalgebra::DVector;

use crate::EquilibriumError;
use crate::eos::EquationOfState;
use crate::solvers::bfgs::BfgsSolver;
use crate::stability::stability;

/// Gradient tolerance of the flash minimization.
const GRADIENT_TOLERANCE: f64 = 1.0e-3;
/// Iteration cap of the flash minimization.
const MAX_ITERATIONS: usize = 100;

/// One phase of a flash result.
#[derive(Debug, Clone)]
pub struct PhaseState {
    /// Molar amounts [mol]
    pub moles: DVector<f64>,
    /// Phase volume [m^3]
    pub volume: f64,
    /// Compressibility factor pV/(ΣN·RT)
    pub z_factor: f64,
}

/// The phase configuration a flash ends in.
#[derive(Debug, Clone)]
pub enum PhaseSplit {
    /// The state is stable; the single phase carries the full input
    Single {
        phase: PhaseState,
    },
    /// Two coexisting phases; the gas is the one with the higher
    /// compressibility factor
    Split {
        gas: PhaseState,
        liquid: PhaseState,
    },
}

impl PhaseSplit {
    /// Whether the flash ended single-phase.
    pub fn is_single_phase(&self) -> bool {
        matches!(self, PhaseSplit::Single { .. })
    }

    /// The gas and liquid phases of a two-phase result.
    pub fn phases(&self) -> Option<(&PhaseState, &PhaseState)> {
        match self {
            PhaseSplit::Single { .. } => None,
            PhaseSplit::Split { gas, liquid } => Some((gas, liquid)),
        }
    }
}

/// Outcome of a flash calculation.
#[derive(Debug, Clone)]
pub struct FlashResult {
    /// Thermal parameter the flash ran at [J/mol]
    pub rt: f64,
    /// Whether the minimization met the gradient tolerance (single-phase
    /// results are converged by definition)
    pub converged: bool,
    /// Iterations spent in the split minimization
    pub iterations: usize,
    /// The resulting phase configuration
    pub split: PhaseSplit,
}

/// Flashes the state (N, V, RT) into its equilibrium phase configuration.
///
/// # Example
///
/// ```
/// use nalgebra::DVector;
/// use vtflash::{BrusilovskyComponent, BrusilovskyMixture, GAS_CONSTANT, flash};
///
/// let methane = BrusilovskyComponent::from_critical_point(
///     "methane", 0.016043, 4.5992e6, 190.564, 0.01142, 0.7563, 0.33294, 0.37447,
/// )?;
/// let mixture = BrusilovskyMixture::new(vec![methane])?;
/// let moles = DVector::from_vec(vec![1.0]);
///
/// // One mole of methane in 0.1 m^3 at 300 K is a supercritical gas.
/// let result = flash(&mixture, &moles, 0.1, GAS_CONSTANT * 300.0)?;
/// assert!(result.split.is_single_phase());
/// # Ok::<(), vtflash::EquilibriumError>(())
/// ```
///
/// # Errors
///
/// Fails when the input state is infeasible for the EoS, when every
/// stability trial diverges, when no negative-energy starting split
/// exists, or when the minimization cannot make an admissible step. A
/// minimization that merely stops on its iteration cap is not an error;
/// the result is returned with `converged = false`.
pub fn flash<E: EquationOfState>(
    eos: &E,
    moles: &DVector<f64>,
    volume: f64,
    rt: f64,
) -> Result<FlashResult, EquilibriumError> {
    let report = stability(eos, moles, volume, rt)?;
    if report.stable {
        let pressure = eos.pressure(moles, volume, rt)?;
        let phase = PhaseState {
            moles: moles.clone(),
            volume,
            z_factor: pressure * volume / (moles.sum() * rt),
        };
        return Ok(FlashResult {
            rt,
            converged: true,
            iterations: 0,
            split: PhaseSplit::Single { phase },
        });
    }

    let best = report.best_try().ok_or(EquilibriumError::StabilityFailed)?;
    let mut objective = FlashObjective::new(eos, moles, volume, rt)?;
    let start = initial::initial_state(&mut objective, &best.concentration)?;
    let preconditioner = hessian::helmholtz_hessian(eos, moles, volume, rt, &start)?;
    let solver = BfgsSolver::new(GRADIENT_TOLERANCE, MAX_ITERATIONS);
    let solution = solver.minimize(&mut objective, start, Some(preconditioner))?;

    let size = moles.len();
    let x = &solution.argument;
    let mut moles_one = DVector::zeros(size);
    let mut moles_two = DVector::zeros(size);
    for i in 0..size {
        moles_one[i] = x[i] * moles[i];
        moles_two[i] = moles[i] - moles_one[i];
    }
    let volume_one = x[size] * volume;
    let volume_two = volume - volume_one;

    let pressure_one = eos.pressure(&moles_one, volume_one, rt)?;
    let pressure_two = eos.pressure(&moles_two, volume_two, rt)?;
    let phase_one = PhaseState {
        z_factor: pressure_one * volume_one / (moles_one.sum() * rt),
        moles: moles_one,
        volume: volume_one,
    };
    let phase_two = PhaseState {
        z_factor: pressure_two * volume_two / (moles_two.sum() * rt),
        moles: moles_two,
        volume: volume_two,
    };
    let (gas, liquid) =
        if phase_one.z_factor >= phase_two.z_factor { (phase_one, phase_two) } else { (phase_two, phase_one) };
    debug!(
        "flash: split in {} iterations (converged = {}), Z_gas = {:.5}, Z_liquid = {:.5}",
        solution.iterations, solution.converged, gas.z_factor, liquid.z_factor
    );
    Ok(FlashResult {
        rt,
        converged: solution.converged,
        iterations: solution.iterations,
        split: PhaseSplit::Split { gas, liquid },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GAS_CONSTANT;
    use crate::eos::{BrusilovskyComponent, BrusilovskyMixture};
    use approx::assert_relative_eq;

    fn methane() -> BrusilovskyComponent {
        BrusilovskyComponent::from_critical_point(
            "methane", 0.016043, 4.5992e6, 190.564, 0.01142, 0.7563, 0.33294, 0.37447,
        )
        .expect("methane parameters are valid")
    }

    fn decane() -> BrusilovskyComponent {
        BrusilovskyComponent::from_critical_point(
            "n-decane", 0.142285, 2.103e6, 617.7, 0.4884, 0.75001, 0.31, 1.07,
        )
        .expect("n-decane parameters are valid")
    }

    fn binary() -> BrusilovskyMixture {
        BrusilovskyMixture::new(vec![methane(), decane()]).expect("mixture is non-empty")
    }

    fn pure(component: BrusilovskyComponent) -> BrusilovskyMixture {
        BrusilovskyMixture::new(vec![component]).expect("mixture is non-empty")
    }

    /// Two-phase result with the invariants every split must satisfy
    /// checked on construction.
    fn checked_split(
        result: &FlashResult,
        moles: &DVector<f64>,
        volume: f64,
    ) -> (PhaseState, PhaseState) {
        let (gas, liquid) = result.split.phases().expect("two-phase result expected");
        // Mass balance.
        for i in 0..moles.len() {
            let reconstructed = gas.moles[i] + liquid.moles[i];
            assert!(
                (reconstructed - moles[i]).abs() <= 1.0e-9 * moles.amax(),
                "mass balance violated for component {i}"
            );
            assert!(gas.moles[i] > 0.0 && liquid.moles[i] > 0.0);
        }
        // Volume balance and positivity.
        assert!((gas.volume + liquid.volume - volume).abs() <= 1.0e-9 * volume);
        assert!(gas.volume > 0.0 && gas.volume < volume);
        assert!(liquid.volume > 0.0 && liquid.volume < volume);
        // Classification.
        assert!(gas.z_factor > liquid.z_factor);
        (gas.clone(), liquid.clone())
    }

    #[test]
    fn supercritical_methane_stays_single_phase() {
        let mixture = pure(methane());
        let moles = DVector::from_vec(vec![1.0]);
        let rt = GAS_CONSTANT * 300.0;
        let result = flash(&mixture, &moles, 0.1, rt).expect("flash completes");
        assert!(result.converged);
        assert_eq!(result.iterations, 0);
        assert!(result.split.is_single_phase());
        match &result.split {
            PhaseSplit::Single { phase } => {
                assert_relative_eq!(phase.moles[0], 1.0, max_relative = 1e-12);
                assert_relative_eq!(phase.volume, 0.1, max_relative = 1e-12);
                assert!(phase.z_factor > 0.0);
            }
            PhaseSplit::Split { .. } => unreachable!(),
        }
    }

    #[test]
    fn methane_decane_mixture_splits_into_gas_and_liquid() {
        let mixture = binary();
        let moles = DVector::from_vec(vec![0.6, 0.4]);
        let volume = 5.0e-4;
        let rt = GAS_CONSTANT * 300.0;
        let result = flash(&mixture, &moles, volume, rt).expect("flash completes");
        assert!(result.converged, "stopped after {} iterations", result.iterations);
        let (gas, liquid) = checked_split(&result, &moles, volume);

        // Pressure equality at convergence: the volume component of the
        // gradient bounds |Δp| by tolerance/V.
        let p_gas = mixture.pressure(&gas.moles, gas.volume, rt).expect("gas phase is feasible");
        let p_liquid = mixture
            .pressure(&liquid.moles, liquid.volume, rt)
            .expect("liquid phase is feasible");
        assert!((p_gas - p_liquid).abs() < 1.0e-3 / volume, "Δp = {}", p_gas - p_liquid);
        assert_relative_eq!(p_gas, p_liquid, max_relative = 1e-5);

        // The split is not a pseudo-split of identical phases.
        let volume_fraction = gas.volume / volume;
        let mole_fraction = gas.moles.sum() / moles.sum();
        assert!((volume_fraction - mole_fraction).abs() > 1.0e-3);

        // The gas concentrates the volatile component.
        let gas_methane = gas.moles[0] / gas.moles.sum();
        let liquid_methane = liquid.moles[0] / liquid.moles.sum();
        assert!(gas_methane > liquid_methane);
    }

    #[test]
    fn subcritical_decane_condenses() {
        let mixture = pure(decane());
        let moles = DVector::from_vec(vec![1.0]);
        let volume = 0.01;
        let rt = GAS_CONSTANT * 300.0;
        let result = flash(&mixture, &moles, volume, rt).expect("flash completes");
        assert!(result.converged, "stopped after {} iterations", result.iterations);
        let (gas, liquid) = checked_split(&result, &moles, volume);
        // The liquid holds most of the material in a sliver of the volume.
        assert!(liquid.moles[0] > 0.9);
        assert!(liquid.volume < 0.1 * volume);
        assert!(gas.z_factor > 10.0 * liquid.z_factor);
    }

    #[test]
    fn flash_respects_the_stability_verdict() {
        let mixture = binary();
        let rt = GAS_CONSTANT * 300.0;
        // Dilute enough that even the heavy component stays far below its
        // saturation concentration.
        let moles = DVector::from_vec(vec![0.6, 0.4]);
        let report =
            crate::stability::stability(&mixture, &moles, 100.0, rt).expect("stability completes");
        assert!(report.stable);
        let result = flash(&mixture, &moles, 100.0, rt).expect("flash completes");
        assert!(result.split.is_single_phase());
    }

    #[test]
    fn flash_is_scale_invariant() {
        let mixture = binary();
        let rt = GAS_CONSTANT * 300.0;
        let moles = DVector::from_vec(vec![0.6, 0.4]);
        let scaled_moles = moles.scale(2.0);
        let base = flash(&mixture, &moles, 5.0e-4, rt).expect("flash completes");
        let scaled = flash(&mixture, &scaled_moles, 1.0e-3, rt).expect("flash completes");
        let (gas, liquid) = base.split.phases().expect("two-phase result expected");
        let (scaled_gas, scaled_liquid) = scaled.split.phases().expect("two-phase result expected");
        for i in 0..2 {
            assert_relative_eq!(scaled_gas.moles[i], 2.0 * gas.moles[i], max_relative = 1e-3);
            assert_relative_eq!(scaled_liquid.moles[i], 2.0 * liquid.moles[i], max_relative = 1e-3);
        }
        assert_relative_eq!(scaled_gas.volume, 2.0 * gas.volume, max_relative = 1e-3);
        assert_relative_eq!(scaled_liquid.volume, 2.0 * liquid.volume, max_relative = 1e-3);
    }

    #[test]
    fn flash_is_permutation_equivariant() {
        let rt = GAS_CONSTANT * 300.0;
        let forward = flash(
            &binary(),
            &DVector::from_vec(vec![0.6, 0.4]),
            5.0e-4,
            rt,
        )
        .expect("flash completes");
        let reversed = flash(
            &BrusilovskyMixture::new(vec![decane(), methane()]).expect("mixture is non-empty"),
            &DVector::from_vec(vec![0.4, 0.6]),
            5.0e-4,
            rt,
        )
        .expect("flash completes");
        let (gas, liquid) = forward.split.phases().expect("two-phase result expected");
        let (gas_rev, liquid_rev) = reversed.split.phases().expect("two-phase result expected");
        for (original, swapped) in [(gas, gas_rev), (liquid, liquid_rev)] {
            assert_relative_eq!(original.moles[0], swapped.moles[1], max_relative = 1e-3);
            assert_relative_eq!(original.moles[1], swapped.moles[0], max_relative = 1e-3);
            assert_relative_eq!(original.volume, swapped.volume, max_relative = 1e-3);
        }
    }

    #[test]
    fn product_phases_show_no_deep_instability() {
        let mixture = binary();
        let rt = GAS_CONSTANT * 300.0;
        let moles = DVector::from_vec(vec![0.6, 0.4]);
        let result = flash(&mixture, &moles, 5.0e-4, rt).expect("flash completes");
        let (gas, liquid) = result.split.phases().expect("two-phase result expected");
        for phase in [gas, liquid] {
            let report = crate::stability::stability(&mixture, &phase.moles, phase.volume, rt)
                .expect("stability completes");
            let worst = report
                .tries
                .iter()
                .map(|t| t.energy_density)
                .filter(|d| d.is_finite())
                .fold(f64::INFINITY, f64::min);
            // At exact equilibrium each product phase sits on a zero
            // tangent plane. The converged split misses equilibrium by the
            // optimizer tolerance, which the trial concentrations amplify,
            // so a small residual distance is admissible; a genuinely
            // unstable phase would show D orders of magnitude lower.
            assert!(worst > -5.0e-2, "product phase carries D = {worst}");
        }
    }
}
