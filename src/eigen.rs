//! Fisher discriminant directions from the eigenpairs of `inverse(N) * M`.

use std::cmp::Ordering;

use float_cmp::approx_eq;
use log::{debug, warn};
use ndarray::{Array1, Array2, Axis};

use crate::config::EigenSolverKind;
use crate::error::{KfdaError, Result};
use crate::linalg_backends::{
    BackendCholesky, BackendEigh, BackendInverse, EighOutput, LinAlgBackendProvider, Triangle,
};

/// Selected eigenpairs, largest eigenvalue first.
#[derive(Debug, Clone)]
pub struct DiscriminantDirections {
    /// Shape `(k,)`, descending.
    pub eigenvalues: Array1<f64>,
    /// Shape `(k, N)`; row `r` is the eigenvector for `eigenvalues[r]`.
    pub weights: Array2<f64>,
    /// Strategy that produced the eigenpairs. `SymmetricProduct` after a
    /// `Generalized` request means the Cholesky factorisation failed.
    pub solver: EigenSolverKind,
}

/// Indices that sort `values` in descending order.
///
/// The sort is stable: equal eigenvalues keep the order the solver returned them in.
pub fn descending_order(values: &Array1<f64>) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[b].partial_cmp(&values[a]).unwrap_or(Ordering::Equal));
    order
}

/// Computes all eigenpairs of `inverse(within) * between` and keeps the top `n_components`.
///
/// `within` must already be regularised. See [`EigenSolverKind`] for the two strategies.
///
/// A regularised `within` can still fail to be positive definite: a rank-deficient
/// scatter whose rounding noise keeps `|det|` above `tol` skips the ridge. When the
/// Cholesky factorisation fails, the `Generalized` strategy falls back to the
/// explicit `inverse(N) * M` product and logs a warning.
///
/// # Errors
/// [`KfdaError::Numerical`] if inversion or the eigensolver fails, or if it
/// produces non-finite eigenvalues.
pub fn solve_discriminant_directions(
    between: &Array2<f64>,
    within: &Array2<f64>,
    n_components: usize,
    kind: EigenSolverKind,
) -> Result<DiscriminantDirections> {
    let n = within.nrows();
    if between.dim() != (n, n) || within.ncols() != n {
        return Err(KfdaError::Validation(format!(
            "scatter matrices must be square and equal in size, got {:?} and {:?}",
            between.dim(),
            within.dim()
        )));
    }

    let backend = LinAlgBackendProvider::<f64>::new();
    let (EighOutput { eigenvalues, eigenvectors }, solver) = match kind {
        EigenSolverKind::Generalized => match backend.cholesky_lower(within) {
            Ok(lower) => (generalized_eigenpairs(between, &lower)?, EigenSolverKind::Generalized),
            Err(e) => {
                warn!(
                    "Within-class scatter is not positive definite ({}); falling back to inverse(N) * M.",
                    e
                );
                (
                    symmetric_product_eigenpairs(between, within)?,
                    EigenSolverKind::SymmetricProduct,
                )
            }
        },
        EigenSolverKind::SymmetricProduct => (
            symmetric_product_eigenpairs(between, within)?,
            EigenSolverKind::SymmetricProduct,
        ),
    };
    if let Some(bad) = eigenvalues.iter().find(|v| !v.is_finite()) {
        return Err(KfdaError::numerical(format!("eigensolver returned non-finite eigenvalue {}", bad)));
    }

    let order = descending_order(&eigenvalues);
    let k = n_components.min(order.len());
    let selected = &order[..k];

    for pair in selected.windows(2) {
        let (a, b) = (eigenvalues[pair[0]], eigenvalues[pair[1]]);
        if approx_eq!(f64, a, b, epsilon = 1e-10, ulps = 8) {
            debug!("Near-equal eigenvalues {} and {}; keeping solver order.", a, b);
        }
    }

    let weights = Array2::from_shape_fn((k, n), |(r, i)| eigenvectors[[i, selected[r]]]);
    let eigenvalues = selected.iter().map(|&idx| eigenvalues[idx]).collect::<Array1<f64>>();
    debug!("Selected {} discriminant direction(s); eigenvalues {:?}.", k, eigenvalues.to_vec());

    Ok(DiscriminantDirections {
        eigenvalues,
        weights,
        solver,
    })
}

/// Reduces `M v = λ N v` with `N = L Lᵀ` to the symmetric problem
/// `L⁻¹ M L⁻ᵀ u = λ u`, then maps back with `v = L⁻ᵀ u`.
fn generalized_eigenpairs(between: &Array2<f64>, lower: &Array2<f64>) -> Result<EighOutput<f64>> {
    let backend = LinAlgBackendProvider::<f64>::new();
    let half = backend
        .solve_lower_triangular(lower, between)
        .map_err(|e| KfdaError::backend("triangular solve against within-class factor failed", e))?;
    let mut reduced = backend
        .solve_lower_triangular(lower, &half.t().to_owned())
        .map_err(|e| KfdaError::backend("triangular solve against within-class factor failed", e))?;
    let transposed = reduced.t().to_owned();
    reduced += &transposed;
    reduced *= 0.5;

    let EighOutput { eigenvalues, eigenvectors } = backend
        .eigh(&reduced, Triangle::Upper)
        .map_err(|e| KfdaError::backend("eigendecomposition of reduced scatter failed", e))?;

    let mut directions = backend
        .solve_upper_triangular(&lower.t().to_owned(), &eigenvectors)
        .map_err(|e| KfdaError::backend("back-substitution of eigenvectors failed", e))?;
    for mut column in directions.axis_iter_mut(Axis(1)) {
        let norm = column.dot(&column).sqrt();
        if norm > f64::MIN_POSITIVE {
            column.mapv_inplace(|v| v / norm);
        }
    }

    Ok(EighOutput { eigenvalues, eigenvectors: directions })
}

/// Symmetric eigensolver applied to the explicit product `inverse(N) * M`,
/// reading its lower triangle only.
fn symmetric_product_eigenpairs(between: &Array2<f64>, within: &Array2<f64>) -> Result<EighOutput<f64>> {
    let backend = LinAlgBackendProvider::<f64>::new();
    let within_inv = backend
        .inverse(within)
        .map_err(|e| KfdaError::backend("inversion of within-class scatter failed", e))?;
    let product = within_inv.dot(between);
    backend
        .eigh(&product, Triangle::Lower)
        .map_err(|e| KfdaError::backend("eigendecomposition of inverse(N) * M failed", e))
}
