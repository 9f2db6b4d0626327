use serde::{Deserialize, Serialize};

use crate::error::{KfdaError, Result};
use crate::kernel::{Kernel, KernelParams};

/// How the eigenpairs of `inverse(N) * M` are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EigenSolverKind {
    /// Cholesky-reduce the symmetric-definite pencil (M, N) to a symmetric
    /// problem. Real eigenvalues, eigenvectors scaled to unit length.
    #[default]
    Generalized,
    /// Form `inverse(N) * M` explicitly and feed it to a symmetric solver
    /// that reads only its lower triangle. Kept for output compatibility with
    /// existing KFDA implementations; the product is not symmetric in general.
    SymmetricProduct,
}

/// Test deciding whether the within-class scatter needs the ridge term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingularityCheck {
    /// `|det N| < tol`, evaluated in log space.
    #[default]
    Determinant,
    /// `sigma_min(N) / sigma_max(N) < tol`.
    ReciprocalCondition,
}

/// Configuration for [`KernelFda`](crate::KernelFda).
///
/// Fixed once the estimator is built; a fit never changes it.
#[derive(Debug, Clone)]
pub struct KfdaConfig {
    /// Requested number of discriminant directions. `None` means the number of
    /// training features. The effective count is capped at `n_classes - 1`.
    pub n_components: Option<usize>,
    /// Kernel used for training and projection Gram matrices.
    pub kernel: Kernel,
    /// Ridge added to the diagonal of a singular within-class scatter.
    pub alpha: f64,
    /// Singularity threshold used by `singularity_check`.
    pub tol: f64,
    pub eigen_solver: EigenSolverKind,
    pub singularity_check: SingularityCheck,
}

impl Default for KfdaConfig {
    fn default() -> Self {
        KfdaConfig {
            n_components: Some(2),
            kernel: Kernel::default(),
            alpha: 1e-3,
            tol: 1e-4,
            eigen_solver: EigenSolverKind::default(),
            singularity_check: SingularityCheck::default(),
        }
    }
}

impl KfdaConfig {
    pub fn with_n_components(mut self, n_components: Option<usize>) -> Self {
        self.n_components = n_components;
        self
    }

    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = kernel;
        self
    }

    /// Selects a kernel by name (`linear`, `poly`, `rbf`, `sigmoid`, `cosine`,
    /// `precomputed`) with its parameters.
    ///
    /// # Errors
    /// [`KfdaError::Configuration`] for an unknown name or an invalid parameter.
    pub fn with_named_kernel(mut self, name: &str, params: &KernelParams) -> Result<Self> {
        self.kernel = Kernel::from_name(name, params)?;
        Ok(self)
    }

    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_tol(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn with_eigen_solver(mut self, eigen_solver: EigenSolverKind) -> Self {
        self.eigen_solver = eigen_solver;
        self
    }

    pub fn with_singularity_check(mut self, singularity_check: SingularityCheck) -> Self {
        self.singularity_check = singularity_check;
        self
    }

    /// Checks the values that do not depend on training data.
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha.is_finite() && self.alpha > 0.0) {
            return Err(KfdaError::Configuration(format!(
                "alpha must be finite and positive, got {}",
                self.alpha
            )));
        }
        if !(self.tol.is_finite() && self.tol > 0.0) {
            return Err(KfdaError::Configuration(format!(
                "tol must be finite and positive, got {}",
                self.tol
            )));
        }
        self.kernel.validate()
    }

    /// Effective number of discriminant directions for a training set with
    /// `n_features` columns and `n_classes` distinct labels.
    ///
    /// # Errors
    /// [`KfdaError::Configuration`] when fewer than one direction remains.
    pub fn effective_components(&self, n_features: usize, n_classes: usize) -> Result<usize> {
        let requested = self.n_components.unwrap_or(n_features);
        let k = requested.min(n_classes.saturating_sub(1));
        if k < 1 {
            return Err(KfdaError::Configuration(format!(
                "no discriminant direction available: requested {} component(s) with {} class(es); \
                 at least two classes and one component are required",
                requested, n_classes
            )));
        }
        Ok(k)
    }
}
