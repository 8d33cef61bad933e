//! Real roots of monic cubic polynomials.
//!
//! The compressibility-factor equation of a cubic EoS reduces to a monic
//! cubic in Z. This module solves it in closed form: Cardano's formula when
//! a single real root exists, the trigonometric method when all three roots
//! are real.

use std::f64::consts::PI;

/// Real roots of `z^3 + p*z^2 + q*z + r`, in ascending order.
///
/// A double root is reported twice, a triple root three times, so the
/// returned vector always has one or three entries.
pub(crate) fn real_roots(p: f64, q: f64, r: f64) -> Vec<f64> {
    // Depressed form t^3 + a*t + b with z = t - p/3.
    let shift = p / 3.0;
    let a = q - p * p / 3.0;
    let b = 2.0 * p * p * p / 27.0 - p * q / 3.0 + r;

    let half_b = 0.5 * b;
    let third_a = a / 3.0;
    let discriminant = half_b * half_b + third_a * third_a * third_a;

    if discriminant > 0.0 {
        // One real root.
        let s = discriminant.sqrt();
        let t = (-half_b + s).cbrt() + (-half_b - s).cbrt();
        return vec![t - shift];
    }

    // Three real roots (counted with multiplicity); requires a <= 0.
    let m = 2.0 * (-third_a).max(0.0).sqrt();
    if m == 0.0 {
        // a == 0 and discriminant <= 0 force b == 0: triple root.
        return vec![-shift; 3];
    }
    let cos_arg = (3.0 * b / (a * m)).clamp(-1.0, 1.0);
    let theta = cos_arg.acos() / 3.0;
    let mut roots: Vec<f64> = (0..3)
        .map(|k| m * (theta - 2.0 * PI * k as f64 / 3.0).cos() - shift)
        .collect();
    roots.sort_by(f64::total_cmp);
    roots
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn three_distinct_roots() {
        // (z - 1)(z - 2)(z - 3) = z^3 - 6z^2 + 11z - 6
        let roots = real_roots(-6.0, 11.0, -6.0);
        assert_eq!(roots.len(), 3);
        assert_relative_eq!(roots[0], 1.0, max_relative = 1e-12);
        assert_relative_eq!(roots[1], 2.0, max_relative = 1e-12);
        assert_relative_eq!(roots[2], 3.0, max_relative = 1e-12);
    }

    #[test]
    fn single_real_root() {
        // (z - 1)(z^2 + z + 2) = z^3 + z + ... expanded: z^3 + 0z^2 + z - 2
        let roots = real_roots(0.0, 1.0, -2.0);
        assert_eq!(roots.len(), 1);
        assert_relative_eq!(roots[0], 1.0, max_relative = 1e-12);
    }

    #[test]
    fn double_root() {
        // (z - 1)^2 (z - 2) = z^3 - 4z^2 + 5z - 2
        let roots = real_roots(-4.0, 5.0, -2.0);
        assert_eq!(roots.len(), 3);
        assert_relative_eq!(roots[0], 1.0, epsilon = 1e-6);
        assert_relative_eq!(roots[1], 1.0, epsilon = 1e-6);
        assert_relative_eq!(roots[2], 2.0, epsilon = 1e-6);
    }

    #[test]
    fn triple_root() {
        // (z + 1)^3 = z^3 + 3z^2 + 3z + 1
        let roots = real_roots(3.0, 3.0, 1.0);
        assert_eq!(roots.len(), 3);
        for root in roots {
            assert_relative_eq!(root, -1.0, epsilon = 1e-6);
        }
    }

    #[test]
    fn roots_satisfy_polynomial() {
        let (p, q, r) = (-0.8, 0.05, -0.001);
        for z in real_roots(p, q, r) {
            let residual = z * z * z + p * z * z + q * z + r;
            assert!(residual.abs() < 1e-12, "residual {residual} at z = {z}");
        }
    }
}
