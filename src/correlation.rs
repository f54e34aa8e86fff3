use crate::error::{NumericalError, Result, SimError};
use nalgebra::{Cholesky, DMatrix};
use tracing::{debug, warn};

/// Relative tolerance for symmetry of the input matrix.
const SYMMETRY_TOLERANCE: f64 = 1e-9;
/// Pivots within this fraction of the largest diagonal entry count as zero.
const PIVOT_TOLERANCE: f64 = 1e-10;

/// Lower-triangular `L` with `L·Lᵗ = Σ` (or the corrected Σ).
#[derive(Clone, Debug, PartialEq)]
pub struct CorrelationFactor {
    lower: DMatrix<f64>,
    corrected: bool,
    clamped_eigenvalues: usize,
}

impl CorrelationFactor {
    pub fn lower(&self) -> &DMatrix<f64> {
        &self.lower
    }

    pub fn dim(&self) -> usize {
        self.lower.nrows()
    }

    /// True when the eigenvalue correction was needed.
    pub fn corrected(&self) -> bool {
        self.corrected
    }

    pub fn clamped_eigenvalues(&self) -> usize {
        self.clamped_eigenvalues
    }

    /// `out = L · z` for one vector of independent standard normals.
    #[inline]
    pub fn correlate(&self, z: &[f64], out: &mut [f64]) {
        let n = self.dim();
        for i in 0..n {
            let mut acc = 0.0;
            for j in 0..=i {
                acc += self.lower[(i, j)] * z[j];
            }
            out[i] = acc;
        }
    }

    /// `L·Lᵗ`, the covariance the factor actually reproduces.
    pub fn reconstruct(&self) -> DMatrix<f64> {
        &self.lower * self.lower.transpose()
    }
}

/// Factorizes a covariance matrix, falling back to the nearest
/// positive-semidefinite matrix when strict Cholesky fails.
pub fn factorize(covariance: &DMatrix<f64>) -> Result<CorrelationFactor> {
    validate_covariance(covariance)?;

    if let Some(chol) = Cholesky::new(covariance.clone()) {
        debug!("Covariance is positive-definite; strict Cholesky succeeded");
        return Ok(CorrelationFactor {
            lower: chol.l(),
            corrected: false,
            clamped_eigenvalues: 0,
        });
    }

    let (corrected, clamped) = nearest_psd(covariance);
    warn!(
        "Covariance matrix is not positive-definite; clamped {} negative eigenvalue(s) to zero",
        clamped
    );

    let lower = match Cholesky::new(corrected.clone()) {
        Some(chol) => chol.l(),
        None => semidefinite_cholesky(&corrected)?,
    };

    Ok(CorrelationFactor {
        lower,
        corrected: true,
        clamped_eigenvalues: clamped,
    })
}

/// Projects a symmetric matrix onto the positive-semidefinite cone by
/// clamping negative eigenvalues to zero. Returns the rebuilt matrix and the
/// number of eigenvalues clamped.
pub fn nearest_psd(matrix: &DMatrix<f64>) -> (DMatrix<f64>, usize) {
    let eigen = matrix.clone().symmetric_eigen();
    let mut values = eigen.eigenvalues.clone();
    let mut clamped = 0;
    for v in values.iter_mut() {
        if *v < 0.0 {
            *v = 0.0;
            clamped += 1;
        }
    }
    let rebuilt = &eigen.eigenvectors * DMatrix::from_diagonal(&values) * eigen.eigenvectors.transpose();
    ((&rebuilt + rebuilt.transpose()) * 0.5, clamped)
}

/// Cholesky–Banachiewicz with zero pivots allowed: a pivot within tolerance
/// of zero gets a zero column. Anything more negative is an internal error.
fn semidefinite_cholesky(matrix: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = matrix.nrows();
    let scale = matrix.diagonal().iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
    let tol = PIVOT_TOLERANCE * scale.max(f64::MIN_POSITIVE);
    let mut l = DMatrix::<f64>::zeros(n, n);

    for j in 0..n {
        let mut diag = matrix[(j, j)];
        for k in 0..j {
            diag -= l[(j, k)] * l[(j, k)];
        }
        if diag < -tol || !diag.is_finite() {
            return Err(NumericalError::FactorizationFailed { pivot: j, value: diag }.into());
        }
        if diag <= tol {
            continue;
        }
        let pivot = diag.sqrt();
        l[(j, j)] = pivot;
        for i in (j + 1)..n {
            let mut acc = matrix[(i, j)];
            for k in 0..j {
                acc -= l[(i, k)] * l[(j, k)];
            }
            l[(i, j)] = acc / pivot;
        }
    }

    Ok(l)
}

fn validate_covariance(covariance: &DMatrix<f64>) -> Result<()> {
    let n = covariance.nrows();
    if n == 0 {
        return Err(SimError::invalid_parameter("covariance", "matrix is empty"));
    }
    if covariance.ncols() != n {
        return Err(SimError::dimension_mismatch("covariance columns", n, covariance.ncols()));
    }
    if let Some(index) = covariance.iter().position(|v| !v.is_finite()) {
        return Err(SimError::non_finite_value("covariance matrix", index));
    }
    let scale = covariance.iter().fold(0.0_f64, |acc, v| acc.max(v.abs())).max(f64::MIN_POSITIVE);
    for i in 0..n {
        for j in (i + 1)..n {
            let diff = (covariance[(i, j)] - covariance[(j, i)]).abs();
            if diff > SYMMETRY_TOLERANCE * scale {
                return Err(SimError::invalid_parameter(
                    "covariance",
                    format!("matrix is not symmetric at ({}, {}): difference {}", i, j, diff),
                ));
            }
        }
    }
    Ok(())
}
