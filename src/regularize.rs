//! Ridge regularisation of the within-class scatter matrix.

use log::{debug, info};
use ndarray::Array2;

use crate::config::SingularityCheck;
use crate::error::{KfdaError, Result};
use crate::linalg_backends::{BackendDeterminant, BackendSVD, LinAlgBackendProvider};

/// Within-class scatter after the singularity test.
#[derive(Debug, Clone)]
pub struct Regularized {
    /// `N` unchanged, or `N + alpha * I` when `applied`.
    pub matrix: Array2<f64>,
    pub applied: bool,
}

/// Decides whether `matrix` is too close to singular to invert.
///
/// * `Determinant`: `|det| < tol`, computed as `sign == 0 || ln|det| < ln(tol)`
///   so large matrices cannot overflow or underflow the determinant itself.
/// * `ReciprocalCondition`: `sigma_min / sigma_max < tol`.
pub fn is_near_singular(matrix: &Array2<f64>, check: SingularityCheck, tol: f64) -> Result<bool> {
    let backend = LinAlgBackendProvider::<f64>::new();
    match check {
        SingularityCheck::Determinant => {
            let det = backend
                .sln_det(matrix)
                .map_err(|e| KfdaError::backend("determinant of within-class scatter failed", e))?;
            debug!("Within-class scatter log-determinant: sign {}, ln|det| {}.", det.sign, det.ln_abs);
            Ok(det.sign == 0.0 || det.ln_abs.is_nan() || det.ln_abs < tol.ln())
        }
        SingularityCheck::ReciprocalCondition => {
            let svd = backend
                .svd_into(matrix.clone(), false, false)
                .map_err(|e| KfdaError::backend("singular values of within-class scatter failed", e))?;
            let s_max = svd.s.iter().cloned().fold(0.0_f64, f64::max);
            let s_min = svd.s.iter().cloned().fold(f64::INFINITY, f64::min);
            let rcond = if s_max > 0.0 && s_min.is_finite() { s_min / s_max } else { 0.0 };
            debug!("Within-class scatter reciprocal condition number: {:e}.", rcond);
            Ok(rcond.is_nan() || rcond < tol)
        }
    }
}

/// Adds `alpha * I` to `within` when [`is_near_singular`] says so.
pub fn regularize_within_scatter(
    mut within: Array2<f64>,
    alpha: f64,
    tol: f64,
    check: SingularityCheck,
) -> Result<Regularized> {
    let applied = is_near_singular(&within, check, tol)?;
    if applied {
        info!(
            "Within-class scatter ({}x{}) is near-singular; adding ridge alpha = {}.",
            within.nrows(),
            within.ncols(),
            alpha
        );
        within.diag_mut().mapv_inplace(|v| v + alpha);
    }
    Ok(Regularized { matrix: within, applied })
}
