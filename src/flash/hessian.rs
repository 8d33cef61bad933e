//! Exact Hessian of the two-phase Helmholtz difference.
//!
//! BFGS accepts near-Newton steps from the very first iteration when its
//! Hessian approximation starts from the exact curvature, which matters
//! close to phase boundaries where the curvature of ΔA varies over orders
//! of magnitude. The Hessian is assembled from the activity Jacobians and
//! pressure gradients of both phases:
//!
//! ```text
//! H_ij      = RT·N_i·N_j·(J′_ij + J″_ij) + δ_ij·RT·N_i²·(1/N′_i + 1/N″_i)
//! H_i,c+1   = −V·N_i·(∂p/∂N_i|′ + ∂p/∂N_i|″)
//! H_c+1,c+1 = −V²·(∂p/∂V|′ + ∂p/∂V|″)
//! ```
//!
//! where J is the Jacobian of the residual log-activity and the diagonal
//! term carries the ideal-mixing contribution. The result is symmetric by
//! construction; the composition block is symmetrized against roundoff.

use nalgebra::{DMatrix, DVector};

use crate::eos::{EosResult, EquationOfState};

/// Assembles the exact Hessian of ΔA at the state vector `x`.
pub(super) fn helmholtz_hessian<E: EquationOfState>(
    eos: &E,
    moles: &DVector<f64>,
    volume: f64,
    rt: f64,
    x: &DVector<f64>,
) -> EosResult<DMatrix<f64>> {
    let size = moles.len();
    let mut moles_one = DVector::zeros(size);
    let mut moles_two = DVector::zeros(size);
    for i in 0..size {
        moles_one[i] = x[i] * moles[i];
        moles_two[i] = moles[i] - moles_one[i];
    }
    let volume_one = x[size] * volume;
    let volume_two = volume - volume_one;

    let mut activity = DVector::zeros(size);
    let mut jacobian_one = DMatrix::zeros(size, size);
    let mut jacobian_two = DMatrix::zeros(size, size);
    eos.log_activity_with_jacobian(&moles_one, volume_one, rt, &mut activity, &mut jacobian_one)?;
    eos.log_activity_with_jacobian(&moles_two, volume_two, rt, &mut activity, &mut jacobian_two)?;

    let mut dp_dn_one = DVector::zeros(size);
    let mut dp_dn_two = DVector::zeros(size);
    let dp_dv_one = eos.pressure_gradient(&moles_one, volume_one, rt, &mut dp_dn_one)?;
    let dp_dv_two = eos.pressure_gradient(&moles_two, volume_two, rt, &mut dp_dn_two)?;

    let mut hessian = DMatrix::zeros(size + 1, size + 1);
    for i in 0..size {
        for j in 0..=i {
            let residual = 0.5
                * (jacobian_one[(i, j)] + jacobian_one[(j, i)] + jacobian_two[(i, j)]
                    + jacobian_two[(j, i)]);
            let entry = rt * moles[i] * moles[j] * residual;
            hessian[(i, j)] = entry;
            hessian[(j, i)] = entry;
        }
        hessian[(i, i)] +=
            rt * moles[i] * moles[i] * (1.0 / moles_one[i] + 1.0 / moles_two[i]);
        let cross = -volume * moles[i] * (dp_dn_one[i] + dp_dn_two[i]);
        hessian[(i, size)] = cross;
        hessian[(size, i)] = cross;
    }
    hessian[(size, size)] = -volume * volume * (dp_dv_one + dp_dv_two);
    Ok(hessian)
}
