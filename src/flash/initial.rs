//! Starting-split search for the flash minimization.
//!
//! The stability test hands over the trial concentration that proved the
//! parent unstable. Extracting a small phase with exactly that composition
//! lowers the Helmholtz energy to first order, so a feasible descent start
//! is found by contracting the extracted fraction geometrically until the
//! energy difference turns decisively negative.

use nalgebra::DVector;

use crate::EquilibriumError;
use crate::eos::{EosResult, EquationOfState};

use super::objective::FlashObjective;

/// Largest volume fraction tried for the extracted phase.
const SATURATION_MAX: f64 = 0.25;
/// Number of geometric contractions before giving up.
const SEARCH_STEPS: usize = 200;
/// Contraction factor per attempt.
const CONTRACTION: f64 = 0.5;
/// Energy threshold a candidate must undercut to be accepted.
const ENERGY_THRESHOLD: f64 = -1.0e-7;

/// Finds a state vector with decisively negative Helmholtz difference on
/// the ray defined by the unstable trial concentration.
pub(super) fn initial_state<E: EquationOfState>(
    objective: &mut FlashObjective<'_, E>,
    trial_concentration: &DVector<f64>,
) -> Result<DVector<f64>, EquilibriumError> {
    let moles = objective.base_moles().clone();
    let volume = objective.base_volume();
    contracting_search(trial_concentration, &moles, volume, |x| objective.energy(x))
}

/// The search itself, over a plain energy closure.
///
/// For contraction step k the candidate extracts the volume fraction
/// `s = SATURATION_MAX · CONTRACTION^k` at the trial concentration:
/// `x_i = η_i · s·V / N_i`, `x_{c+1} = s`. Candidates outside the open
/// unit box and candidates the energy evaluation rejects are skipped.
fn contracting_search<F>(
    trial_concentration: &DVector<f64>,
    moles: &DVector<f64>,
    volume: f64,
    mut energy: F,
) -> Result<DVector<f64>, EquilibriumError>
where
    F: FnMut(&DVector<f64>) -> EosResult<f64>,
{
    let size = moles.len();
    let mut x = DVector::zeros(size + 1);
    let mut saturation = SATURATION_MAX;
    for _ in 0..SEARCH_STEPS {
        for i in 0..size {
            x[i] = trial_concentration[i] * saturation * volume / moles[i];
        }
        x[size] = saturation;
        if x.iter().all(|&fraction| fraction > 0.0 && fraction < 1.0) {
            if let Ok(value) = energy(&x) {
                if value.is_finite() && value < ENERGY_THRESHOLD {
                    return Ok(x);
                }
            }
        }
        saturation *= CONTRACTION;
    }
    Err(EquilibriumError::InitialStateNotFound { attempts: SEARCH_STEPS })
}
