//! Brusilovsky generalized cubic equation of state.
//!
//! The model describes a mixture through the pressure equation
//!
//! ```text
//! p = n·RT/(V − B) − A/((V + C)(V + D))
//! ```
//!
//! with mixture aggregates `B = Σ N_i b_i`, `C = Σ N_i c_i`,
//! `D = Σ N_i d_i` and `A = Σ_ij a_ij(RT) N_i N_j`. Each component carries
//! four substance coefficients (ac, b, c, d) and a primary coefficient Ψ
//! entering the temperature function
//! `a_i(RT) = ac_i · (1 + Ψ_i (1 − sqrt(RT/RTc_i)))^2`. Binary interaction
//! is quadratic in temperature: `k_ij(T) = k0 + k1·T + k2·T^2` and
//! `a_ij = (1 − k_ij) sqrt(a_i a_j)`.
//!
//! All residual properties derive from one expression of the residual
//! Helmholtz energy,
//!
//! ```text
//! A_res = n·RT·ln(V/(V − B)) + A·S(V, C, D),
//! S = ln((V + C)/(V + D)) / (D − C),
//! ```
//!
//! evaluated through the kernel `S = −g(u)/(V + D)` with
//! `u = (C − D)/(V + D)` and `g(u) = ln(1 + u)/u`. The kernel and its two
//! derivatives switch to a Maclaurin expansion for small `|u|`, which keeps
//! the `C → D` limit exact; fitted parameter sets with `omega_c` close to
//! 0.75 land there.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::cubic;
use super::{EosError, EosResult, EquationOfState, PhaseRoot};
use crate::GAS_CONSTANT;

/// Wilson correlation slope constant.
const WILSON_SLOPE: f64 = 5.373;

/// Serializable pure-component parameter record.
///
/// Records hold the critical-point description of a substance; the EoS
/// coefficients are derived when the record is turned into a
/// [`BrusilovskyComponent`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrusilovskyRecord {
    /// Substance name
    pub name: String,
    /// Molar mass [kg/mol]
    pub molar_mass: f64,
    /// Critical temperature [K]
    pub critical_temperature: f64,
    /// Critical pressure [Pa]
    pub critical_pressure: f64,
    /// Acentric factor
    pub acentric_factor: f64,
    /// Critical covolume parameter Ω_c (must be at least 0.75)
    pub omega_c: f64,
    /// Model critical compressibility Z_c
    pub z_c: f64,
    /// Primary coefficient Ψ of the temperature function
    pub psi: f64,
}

/// A pure component with its Brusilovsky EoS coefficients.
#[derive(Debug, Clone)]
pub struct BrusilovskyComponent {
    name: String,
    molar_mass: f64,
    critical_pressure: f64,
    critical_rt: f64,
    acentric_factor: f64,
    ac: f64,
    b: f64,
    c: f64,
    d: f64,
    psi: f64,
}

impl BrusilovskyComponent {
    /// Derives the EoS coefficients from the critical-point conditions of
    /// the generalized cubic.
    ///
    /// With `alpha = omega_c^3`, `beta = z_c + omega_c − 1` and
    /// `ds = sqrt(omega_c − 0.75)`:
    ///
    /// ```text
    /// ac = alpha (R·Tc)^2 / Pc        b = beta R·Tc / Pc
    /// c  = (−z_c + omega_c (0.5 + ds)) R·Tc / Pc
    /// d  = (−z_c + omega_c (0.5 − ds)) R·Tc / Pc
    /// ```
    ///
    /// # Errors
    ///
    /// Rejects `omega_c < 0.75` (the square root above turns complex), a
    /// non-positive critical point, and a non-positive covolume.
    #[allow(clippy::too_many_arguments)]
    pub fn from_critical_point(
        name: &str,
        molar_mass: f64,
        critical_pressure: f64,
        critical_temperature: f64,
        acentric_factor: f64,
        omega_c: f64,
        z_c: f64,
        psi: f64,
    ) -> EosResult<Self> {
        if !(critical_pressure > 0.0 && critical_temperature > 0.0) {
            return Err(EosError::InvalidParameters(format!(
                "critical point of {name} must be positive (got Pc = {critical_pressure}, Tc = {critical_temperature})"
            )));
        }
        if omega_c < 0.75 {
            return Err(EosError::InvalidParameters(format!(
                "omega_c of {name} must be at least 0.75 (got {omega_c})"
            )));
        }
        let critical_rt = GAS_CONSTANT * critical_temperature;
        let reduced = critical_rt / critical_pressure;
        let ds = (omega_c - 0.75).sqrt();
        let ac = omega_c.powi(3) * critical_rt * reduced;
        let b = (z_c + omega_c - 1.0) * reduced;
        let c = (-z_c + omega_c * (0.5 + ds)) * reduced;
        let d = (-z_c + omega_c * (0.5 - ds)) * reduced;
        if b <= 0.0 {
            return Err(EosError::InvalidParameters(format!(
                "covolume of {name} must be positive (z_c + omega_c must exceed 1)"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            molar_mass,
            critical_pressure,
            critical_rt,
            acentric_factor,
            ac,
            b,
            c,
            d,
            psi,
        })
    }

    /// Builds a component from a deserialized parameter record.
    pub fn from_record(record: &BrusilovskyRecord) -> EosResult<Self> {
        Self::from_critical_point(
            &record.name,
            record.molar_mass,
            record.critical_pressure,
            record.critical_temperature,
            record.acentric_factor,
            record.omega_c,
            record.z_c,
            record.psi,
        )
    }

    /// Substance name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Molar mass [kg/mol].
    pub fn molar_mass(&self) -> f64 {
        self.molar_mass
    }

    /// Critical pressure [Pa].
    pub fn critical_pressure(&self) -> f64 {
        self.critical_pressure
    }

    /// Critical temperature [K].
    pub fn critical_temperature(&self) -> f64 {
        self.critical_rt / GAS_CONSTANT
    }

    /// Acentric factor.
    pub fn acentric_factor(&self) -> f64 {
        self.acentric_factor
    }

    /// Covolume b [m^3/mol].
    pub fn covolume(&self) -> f64 {
        self.b
    }

    /// Attraction coefficient a_i(RT) [Pa·m^6/mol^2].
    fn attraction(&self, rt: f64) -> f64 {
        let scale = 1.0 + self.psi * (1.0 - (rt / self.critical_rt).sqrt());
        self.ac * scale * scale
    }

    /// Wilson correlation estimate of the saturation pressure [Pa].
    fn wilson_saturation(&self, rt: f64) -> f64 {
        self.critical_pressure
            * (WILSON_SLOPE * (1.0 + self.acentric_factor) * (1.0 - self.critical_rt / rt)).exp()
    }
}

/// A multicomponent mixture under the Brusilovsky EoS.
///
/// Owns the ordered component list, the per-component coefficient vectors
/// and the three symmetric binary-interaction matrices (constant, linear
/// and quadratic in temperature).
#[derive(Debug, Clone)]
pub struct BrusilovskyMixture {
    components: Vec<BrusilovskyComponent>,
    covolumes: DVector<f64>,
    offsets_c: DVector<f64>,
    offsets_d: DVector<f64>,
    k_const: DMatrix<f64>,
    k_linear: DMatrix<f64>,
    k_quadratic: DMatrix<f64>,
}

/// Mixture aggregates at a fixed composition and RT.
struct Aggregates {
    /// Total moles ΣN_i
    total: f64,
    /// Attraction A = Σ a_ij N_i N_j
    a: f64,
    /// Covolume B = Σ N_i b_i
    b: f64,
    /// Offset C = Σ N_i c_i
    c: f64,
    /// Offset D = Σ N_i d_i
    d: f64,
    /// Partial attraction A_i = ∂A/∂N_i = 2 Σ_j a_ij N_j
    a_partial: DVector<f64>,
}

impl BrusilovskyMixture {
    /// Creates a mixture with zero binary interaction.
    ///
    /// # Errors
    ///
    /// Rejects an empty component list.
    pub fn new(components: Vec<BrusilovskyComponent>) -> EosResult<Self> {
        let size = components.len();
        if size == 0 {
            return Err(EosError::InvalidParameters(
                "a mixture needs at least one component".to_string(),
            ));
        }
        let covolumes = DVector::from_iterator(size, components.iter().map(|comp| comp.b));
        let offsets_c = DVector::from_iterator(size, components.iter().map(|comp| comp.c));
        let offsets_d = DVector::from_iterator(size, components.iter().map(|comp| comp.d));
        Ok(Self {
            components,
            covolumes,
            offsets_c,
            offsets_d,
            k_const: DMatrix::zeros(size, size),
            k_linear: DMatrix::zeros(size, size),
            k_quadratic: DMatrix::zeros(size, size),
        })
    }

    /// Builds a mixture directly from parameter records.
    pub fn from_records(records: &[BrusilovskyRecord]) -> EosResult<Self> {
        let components = records
            .iter()
            .map(BrusilovskyComponent::from_record)
            .collect::<EosResult<Vec<_>>>()?;
        Self::new(components)
    }

    /// Installs the binary-interaction matrices
    /// `k_ij(T) = k0_ij + k1_ij·T + k2_ij·T^2`.
    ///
    /// # Errors
    ///
    /// All three matrices must be square of the mixture size and symmetric.
    pub fn with_interaction(
        mut self,
        k_const: DMatrix<f64>,
        k_linear: DMatrix<f64>,
        k_quadratic: DMatrix<f64>,
    ) -> EosResult<Self> {
        let size = self.components.len();
        for (label, matrix) in [
            ("constant", &k_const),
            ("linear", &k_linear),
            ("quadratic", &k_quadratic),
        ] {
            if matrix.nrows() != size || matrix.ncols() != size {
                return Err(EosError::InvalidParameters(format!(
                    "{label} interaction matrix must be {size}x{size}"
                )));
            }
            for i in 0..size {
                for j in 0..i {
                    if matrix[(i, j)] != matrix[(j, i)] {
                        return Err(EosError::InvalidParameters(format!(
                            "{label} interaction matrix must be symmetric"
                        )));
                    }
                }
            }
        }
        self.k_const = k_const;
        self.k_linear = k_linear;
        self.k_quadratic = k_quadratic;
        Ok(self)
    }

    /// The ordered component list.
    pub fn component_list(&self) -> &[BrusilovskyComponent] {
        &self.components
    }

    /// Pair attraction a_ij(RT) including binary interaction.
    fn pair_attraction(&self, i: usize, j: usize, rt: f64, attraction: &DVector<f64>) -> f64 {
        let t = rt / GAS_CONSTANT;
        let k = self.k_const[(i, j)] + t * (self.k_linear[(i, j)] + t * self.k_quadratic[(i, j)]);
        (1.0 - k) * (attraction[i] * attraction[j]).sqrt()
    }

    fn aggregates(&self, moles: &DVector<f64>, rt: f64) -> EosResult<Aggregates> {
        let size = self.components.len();
        if moles.len() != size {
            return Err(EosError::DimensionMismatch { expected: size, found: moles.len() });
        }
        if moles.iter().any(|&n| n <= 0.0) {
            return Err(EosError::NonPositiveMoles);
        }
        let attraction =
            DVector::from_iterator(size, self.components.iter().map(|comp| comp.attraction(rt)));
        let mut a = 0.0;
        let mut a_partial = DVector::zeros(size);
        for i in 0..size {
            let mut row = 0.0;
            for j in 0..size {
                row += self.pair_attraction(i, j, rt, &attraction) * moles[j];
            }
            a += moles[i] * row;
            a_partial[i] = 2.0 * row;
        }
        Ok(Aggregates {
            total: moles.sum(),
            a,
            b: moles.dot(&self.covolumes),
            c: moles.dot(&self.offsets_c),
            d: moles.dot(&self.offsets_d),
            a_partial,
        })
    }

    /// Checks the volume against the aggregate bounds and returns the three
    /// positive denominators (V − B, V + C, V + D).
    fn denominators(aggregates: &Aggregates, volume: f64) -> EosResult<(f64, f64, f64)> {
        let free = volume - aggregates.b;
        if free <= 0.0 {
            return Err(EosError::CovolumeExceeded { covolume: aggregates.b, volume });
        }
        let shifted_c = volume + aggregates.c;
        let shifted_d = volume + aggregates.d;
        if shifted_c <= 0.0 || shifted_d <= 0.0 {
            return Err(EosError::InfeasibleVolume { volume });
        }
        Ok((free, shifted_c, shifted_d))
    }
}

/// Kernel `g(u) = ln(1 + u)/u` with its first two derivatives.
///
/// Switches to a Maclaurin expansion for small `|u|`, where the closed
/// forms lose all significance.
fn log_ratio_kernel(u: f64) -> (f64, f64, f64) {
    if u.abs() < 1.0e-4 {
        let g = 1.0 + u * (-0.5 + u * (1.0 / 3.0 + u * (-0.25 + u * 0.2)));
        let gp = -0.5 + u * (2.0 / 3.0 + u * (-0.75 + u * (0.8 - u * 5.0 / 6.0)));
        let gpp = 2.0 / 3.0 + u * (-1.5 + u * (2.4 - u * 10.0 / 3.0));
        (g, gp, gpp)
    } else {
        let g = u.ln_1p() / u;
        let h = 1.0 / (1.0 + u);
        let gp = (h - g) / u;
        let gpp = (-h * h - 2.0 * gp) / u;
        (g, gp, gpp)
    }
}

impl EquationOfState for BrusilovskyMixture {
    fn components(&self) -> usize {
        self.components.len()
    }

    fn covolumes(&self) -> &DVector<f64> {
        &self.covolumes
    }

    fn pressure(&self, moles: &DVector<f64>, volume: f64, rt: f64) -> EosResult<f64> {
        let aggregates = self.aggregates(moles, rt)?;
        let (free, shifted_c, shifted_d) = Self::denominators(&aggregates, volume)?;
        Ok(aggregates.total * rt / free - aggregates.a / (shifted_c * shifted_d))
    }

    fn log_activity(
        &self,
        moles: &DVector<f64>,
        volume: f64,
        rt: f64,
        out: &mut DVector<f64>,
    ) -> EosResult<()> {
        let size = self.components.len();
        if out.len() != size {
            return Err(EosError::DimensionMismatch { expected: size, found: out.len() });
        }
        let aggregates = self.aggregates(moles, rt)?;
        let (free, _, shifted_d) = Self::denominators(&aggregates, volume)?;

        let u = (aggregates.c - aggregates.d) / shifted_d;
        let (g, gp, _) = log_ratio_kernel(u);
        let s = -g / shifted_d;
        let s_c = -gp / (shifted_d * shifted_d);
        let s_d = (gp * (1.0 + u) + g) / (shifted_d * shifted_d);

        let repulsion = (volume / free).ln();
        for i in 0..size {
            let s_i = s_c * self.offsets_c[i] + s_d * self.offsets_d[i];
            out[i] = repulsion
                + aggregates.total * self.covolumes[i] / free
                + (aggregates.a_partial[i] * s + aggregates.a * s_i) / rt;
        }
        Ok(())
    }

    fn log_activity_with_jacobian(
        &self,
        moles: &DVector<f64>,
        volume: f64,
        rt: f64,
        out: &mut DVector<f64>,
        jacobian: &mut DMatrix<f64>,
    ) -> EosResult<()> {
        let size = self.components.len();
        if out.len() != size {
            return Err(EosError::DimensionMismatch { expected: size, found: out.len() });
        }
        if jacobian.nrows() != size || jacobian.ncols() != size {
            return Err(EosError::DimensionMismatch {
                expected: size,
                found: jacobian.nrows().max(jacobian.ncols()),
            });
        }
        let aggregates = self.aggregates(moles, rt)?;
        let (free, _, shifted_d) = Self::denominators(&aggregates, volume)?;

        let u = (aggregates.c - aggregates.d) / shifted_d;
        let (g, gp, gpp) = log_ratio_kernel(u);
        let w2 = shifted_d * shifted_d;
        let w3 = w2 * shifted_d;
        let s = -g / shifted_d;
        let s_c = -gp / w2;
        let s_d = (gp * (1.0 + u) + g) / w2;
        let s_cc = -gpp / w3;
        let s_cd = (gpp * (1.0 + u) + 2.0 * gp) / w3;
        let s_dd = -(gpp * (1.0 + u) * (1.0 + u) + 4.0 * gp * (1.0 + u) + 2.0 * g) / w3;

        let attraction =
            DVector::from_iterator(size, self.components.iter().map(|comp| comp.attraction(rt)));
        let repulsion = (volume / free).ln();
        let free2 = free * free;
        for i in 0..size {
            let s_i = s_c * self.offsets_c[i] + s_d * self.offsets_d[i];
            out[i] = repulsion
                + aggregates.total * self.covolumes[i] / free
                + (aggregates.a_partial[i] * s + aggregates.a * s_i) / rt;
            for j in 0..=i {
                let s_j = s_c * self.offsets_c[j] + s_d * self.offsets_d[j];
                let s_ij = s_cc * self.offsets_c[i] * self.offsets_c[j]
                    + s_cd
                        * (self.offsets_c[i] * self.offsets_d[j]
                            + self.offsets_d[i] * self.offsets_c[j])
                    + s_dd * self.offsets_d[i] * self.offsets_d[j];
                let pair = self.pair_attraction(i, j, rt, &attraction);
                let entry = (self.covolumes[i] + self.covolumes[j]) / free
                    + aggregates.total * self.covolumes[i] * self.covolumes[j] / free2
                    + (2.0 * pair * s
                        + aggregates.a_partial[i] * s_j
                        + aggregates.a_partial[j] * s_i
                        + aggregates.a * s_ij)
                        / rt;
                jacobian[(i, j)] = entry;
                jacobian[(j, i)] = entry;
            }
        }
        Ok(())
    }

    fn pressure_gradient(
        &self,
        moles: &DVector<f64>,
        volume: f64,
        rt: f64,
        dp_dn: &mut DVector<f64>,
    ) -> EosResult<f64> {
        let size = self.components.len();
        if dp_dn.len() != size {
            return Err(EosError::DimensionMismatch { expected: size, found: dp_dn.len() });
        }
        let aggregates = self.aggregates(moles, rt)?;
        let (free, shifted_c, shifted_d) = Self::denominators(&aggregates, volume)?;
        let pair_volume = shifted_c * shifted_d;
        for i in 0..size {
            dp_dn[i] = rt / free + aggregates.total * rt * self.covolumes[i] / (free * free)
                - aggregates.a_partial[i] / pair_volume
                + aggregates.a * (self.offsets_c[i] / shifted_c + self.offsets_d[i] / shifted_d)
                    / pair_volume;
        }
        Ok(-aggregates.total * rt / (free * free)
            + aggregates.a * (1.0 / shifted_c + 1.0 / shifted_d) / pair_volume)
    }

    fn compressibility(
        &self,
        moles: &DVector<f64>,
        pressure: f64,
        rt: f64,
        root: PhaseRoot,
    ) -> EosResult<f64> {
        if pressure <= 0.0 {
            return Err(EosError::NoPhysicalRoot { pressure });
        }
        let aggregates = self.aggregates(moles, rt)?;
        let total = aggregates.total;

        // Reduced (dimensionless) coefficients at the molar scale.
        let beta = aggregates.b / total * pressure / rt;
        let gamma = aggregates.c / total * pressure / rt;
        let delta = aggregates.d / total * pressure / rt;
        let alpha = aggregates.a / (total * total) * pressure / (rt * rt);

        let p2 = gamma + delta - beta - 1.0;
        let p1 = gamma * delta - beta * gamma - beta * delta - gamma - delta + alpha;
        let p0 = -(beta * gamma * delta + gamma * delta + alpha * beta);

        let physical = cubic::real_roots(p2, p1, p0)
            .into_iter()
            .filter(|&z| z > beta)
            .fold(None, |acc: Option<(f64, f64)>, z| match acc {
                None => Some((z, z)),
                Some((min, max)) => Some((min.min(z), max.max(z))),
            });
        match physical {
            Some((min, max)) => Ok(match root {
                PhaseRoot::Gas => max,
                PhaseRoot::Liquid => min,
            }),
            None => Err(EosError::NoPhysicalRoot { pressure }),
        }
    }

    fn wilson_saturation_pressure(&self, rt: f64) -> DVector<f64> {
        DVector::from_iterator(
            self.components.len(),
            self.components.iter().map(|comp| comp.wilson_saturation(rt)),
        )
    }
}
