// Kernel Fisher discriminant analysis (KFDA)

use std::time::Instant;

use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::config::{EigenSolverKind, KfdaConfig};
use crate::eigen::solve_discriminant_directions;
use crate::error::{KfdaError, Result};
use crate::kernel::is_symmetric;
use crate::regularize::regularize_within_scatter;
use crate::scatter::{build_from_partition, ClassPartition};

/// Summary of a successful fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitDiagnostics {
    pub n_samples: usize,
    /// Width of the training matrix (equals `n_samples` for precomputed kernels).
    pub n_features: usize,
    pub n_classes: usize,
    /// Effective number of discriminant directions.
    pub n_components: usize,
    pub kernel: String,
    /// Whether `alpha * I` was added to the within-class scatter.
    pub regularized: bool,
    /// Strategy that produced the directions. Differs from the configured one
    /// when the `Generalized` solver fell back to the explicit product.
    pub eigen_solver: EigenSolverKind,
    /// Eigenvalues of the kept directions, descending.
    pub eigenvalues: Vec<f64>,
}

/// Everything produced by `fit`; replaced as a whole on every successful fit.
#[derive(Debug, Clone)]
struct FittedState<L> {
    /// Training samples (N×d), or the training Gram matrix (N×N) for precomputed kernels.
    training_samples: Array2<f64>,
    training_labels: Vec<L>,
    classes: Vec<L>,
    class_counts: Vec<usize>,
    /// Shape (k, N).
    weights: Array2<f64>,
    eigenvalues: Array1<f64>,
    diagnostics: FitDiagnostics,
}

/// Kernel Fisher discriminant analysis estimator.
///
/// Holds an immutable [`KfdaConfig`] and, after a successful [`fit`](Self::fit),
/// the training data and the projection weights. Labels can be any ordered type.
#[derive(Debug, Clone)]
pub struct KernelFda<L = usize> {
    config: KfdaConfig,
    state: Option<FittedState<L>>,
}

impl<L> Default for KernelFda<L> {
    fn default() -> Self {
        Self {
            config: KfdaConfig::default(),
            state: None,
        }
    }
}

impl<L: Ord + Clone> KernelFda<L> {
    /// Creates an unfitted estimator.
    ///
    /// # Errors
    /// [`KfdaError::Configuration`] if `alpha` or `tol` is not a finite positive
    /// number, or the kernel parameters are invalid.
    ///
    /// # Examples
    ///
    /// ```
    /// use kernel_fda::{KernelFda, KfdaConfig};
    /// let kfda: KernelFda<u8> = KernelFda::new(KfdaConfig::default()).unwrap();
    /// assert!(!kfda.is_fitted());
    /// ```
    pub fn new(config: KfdaConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, state: None })
    }

    pub fn config(&self) -> &KfdaConfig {
        &self.config
    }

    pub fn is_fitted(&self) -> bool {
        self.state.is_some()
    }

    /// Fits the discriminant directions to labelled samples.
    ///
    /// * `x` - Training samples, shape (n_samples, n_features). For a precomputed
    ///   kernel this is the (n_samples, n_samples) training Gram matrix.
    /// * `y` - One label per sample; at least two distinct labels are needed.
    ///
    /// On error the previously fitted state, if any, is left untouched.
    ///
    /// # Errors
    /// * [`KfdaError::Validation`] for empty or non-finite input, or a label count
    ///   that does not match the sample count.
    /// * [`KfdaError::Configuration`] if no discriminant direction is available
    ///   (fewer than two classes, or zero components requested).
    /// * [`KfdaError::Numerical`] if the kernel or a linear-algebra step fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use ndarray::array;
    /// use kernel_fda::{KernelFda, KfdaConfig};
    ///
    /// let x = array![[0.0, 0.1], [0.2, 0.0], [3.0, 3.1], [3.2, 2.9]];
    /// let y = ["a", "a", "b", "b"];
    ///
    /// let mut kfda: KernelFda<&str> = KernelFda::new(KfdaConfig::default()).unwrap();
    /// kfda.fit(x.view(), &y).unwrap();
    /// assert_eq!(kfda.transform(None).unwrap().dim(), (4, 1));
    /// ```
    pub fn fit(&mut self, x: ArrayView2<'_, f64>, y: &[L]) -> Result<&mut Self> {
        let fit_start_time = Instant::now();
        let (n_samples, n_features) = x.dim();
        self.validate_training_input(x, y)?;

        let partition = ClassPartition::from_labels(y);
        let n_components = self
            .config
            .effective_components(n_features, partition.n_classes())?;
        info!(
            "Fitting KFDA: {} samples, {} features, {} classes, {} component(s), {} kernel.",
            n_samples,
            n_features,
            partition.n_classes(),
            n_components,
            self.config.kernel.name()
        );

        let gram = self.config.kernel.gram_matrix(x, None)?;
        if self.config.kernel.is_precomputed() && !is_symmetric(gram.view()) {
            warn!("Precomputed training Gram matrix is not symmetric; scatter matrices will not be either.");
        }
        debug!("Computed training Gram matrix {:?} in {:?}.", gram.dim(), fit_start_time.elapsed());

        let scatter = build_from_partition(gram.view(), &partition)?;
        let within = regularize_within_scatter(
            scatter.within,
            self.config.alpha,
            self.config.tol,
            self.config.singularity_check,
        )?;
        let directions = solve_discriminant_directions(
            &scatter.between,
            &within.matrix,
            n_components,
            self.config.eigen_solver,
        )?;

        let diagnostics = FitDiagnostics {
            n_samples,
            n_features,
            n_classes: partition.n_classes(),
            n_components,
            kernel: self.config.kernel.name().to_string(),
            regularized: within.applied,
            eigen_solver: directions.solver,
            eigenvalues: directions.eigenvalues.to_vec(),
        };
        self.state = Some(FittedState {
            training_samples: x.to_owned(),
            training_labels: y.to_vec(),
            classes: scatter.classes,
            class_counts: scatter.class_counts,
            weights: directions.weights,
            eigenvalues: directions.eigenvalues,
            diagnostics,
        });
        info!("KFDA fit completed in {:?}.", fit_start_time.elapsed());
        Ok(self)
    }

    /// Projects samples onto the fitted discriminant directions.
    ///
    /// * `x` - Samples to project, shape (n_queries, n_features). `None` projects
    ///   the training samples. For a precomputed kernel this is the
    ///   (n_queries, n_training_samples) cross Gram matrix.
    ///
    /// Returns an array of shape (n_queries, n_components).
    ///
    /// # Errors
    /// [`KfdaError::Unfitted`] before a successful fit; [`KfdaError::Validation`]
    /// if `x` has the wrong width or non-finite values.
    pub fn transform(&self, x: Option<ArrayView2<'_, f64>>) -> Result<Array2<f64>> {
        let state = self.state.as_ref().ok_or(KfdaError::Unfitted)?;
        let training = state.training_samples.view();

        let query = match x {
            None => training.reborrow(),
            Some(query) => {
                if query.ncols() != training.ncols() {
                    return Err(KfdaError::Validation(format!(
                        "expected {} columns to match the training data, got {}",
                        training.ncols(),
                        query.ncols()
                    )));
                }
                ensure_finite(query, "transform input")?;
                query.reborrow()
            }
        };

        let cross_gram = self.config.kernel.gram_matrix(query, Some(training.reborrow()))?;
        Ok(cross_gram.dot(&state.weights.t()))
    }

    /// Fits on `x`/`y` and returns the projection of the training samples.
    pub fn fit_transform(&mut self, x: ArrayView2<'_, f64>, y: &[L]) -> Result<Array2<f64>> {
        self.fit(x, y)?.transform(None)
    }

    /// Projection weights, shape (n_components, n_training_samples).
    pub fn weights(&self) -> Option<&Array2<f64>> {
        self.state.as_ref().map(|s| &s.weights)
    }

    /// Eigenvalues of the kept directions, largest first.
    pub fn eigenvalues(&self) -> Option<&Array1<f64>> {
        self.state.as_ref().map(|s| &s.eigenvalues)
    }

    /// Distinct training labels in ascending order.
    pub fn classes(&self) -> Option<&[L]> {
        self.state.as_ref().map(|s| s.classes.as_slice())
    }

    /// Number of training samples per class, aligned with [`classes`](Self::classes).
    pub fn class_counts(&self) -> Option<&[usize]> {
        self.state.as_ref().map(|s| s.class_counts.as_slice())
    }

    /// Effective number of discriminant directions.
    pub fn n_components(&self) -> Option<usize> {
        self.state.as_ref().map(|s| s.weights.nrows())
    }

    pub fn training_samples(&self) -> Option<ArrayView2<'_, f64>> {
        self.state.as_ref().map(|s| s.training_samples.view())
    }

    pub fn training_labels(&self) -> Option<&[L]> {
        self.state.as_ref().map(|s| s.training_labels.as_slice())
    }

    pub fn diagnostics(&self) -> Option<&FitDiagnostics> {
        self.state.as_ref().map(|s| &s.diagnostics)
    }

    fn validate_training_input(&self, x: ArrayView2<'_, f64>, y: &[L]) -> Result<()> {
        let (n_samples, n_features) = x.dim();
        if n_samples == 0 || n_features == 0 {
            return Err(KfdaError::Validation(format!(
                "training data must be non-empty, got shape {}x{}",
                n_samples, n_features
            )));
        }
        if y.len() != n_samples {
            return Err(KfdaError::Validation(format!(
                "found {} samples but {} labels",
                n_samples,
                y.len()
            )));
        }
        if self.config.kernel.is_precomputed() && n_samples != n_features {
            return Err(KfdaError::Validation(format!(
                "precomputed kernel expects a square training Gram matrix, got {}x{}",
                n_samples, n_features
            )));
        }
        ensure_finite(x, "training data")
    }
}

fn ensure_finite(x: ArrayView2<'_, f64>, what: &str) -> Result<()> {
    match x.indexed_iter().find(|(_, v)| !v.is_finite()) {
        Some(((row, col), v)) => Err(KfdaError::Validation(format!(
            "{} contains non-finite value {} at ({}, {})",
            what, v, row, col
        ))),
        None => Ok(()),
    }
}
