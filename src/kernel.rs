//! Kernel (Gram) matrix evaluation.
//!
//! A [`Kernel`] is resolved once when the model is configured: a named kernel
//! carries its parameters already parsed, a custom kernel carries the
//! similarity function, and a precomputed kernel carries nothing because the
//! caller hands over the Gram matrix itself.
//!
//! Named kernels follow the usual conventions:
//!
//! | name                     | k(x, y)                         | parameters (default)                 |
//! |--------------------------|---------------------------------|--------------------------------------|
//! | `linear`                 | ⟨x, y⟩                          | –                                    |
//! | `poly`, `polynomial`     | (γ⟨x, y⟩ + coef0)^degree        | gamma (1/d), coef0 (1), degree (3)   |
//! | `rbf`, `radial-basis`    | exp(−γ‖x − y‖²)                 | gamma (1/d)                          |
//! | `sigmoid`                | tanh(γ⟨x, y⟩ + coef0)           | gamma (1/d), coef0 (1)               |
//! | `cosine`                 | ⟨x, y⟩ / (‖x‖‖y‖)               | –                                    |

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use float_cmp::approx_eq;
use log::debug;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, CowArray, Ix2};
use serde::{Deserialize, Serialize};

use crate::error::{KfdaError, Result};

/// Kernel parameters keyed by name (`gamma`, `coef0`, `degree`).
pub type KernelParams = BTreeMap<String, f64>;

/// Pairwise similarity function used by [`Kernel::Custom`].
pub type SimilarityFn = dyn Fn(ArrayView1<'_, f64>, ArrayView1<'_, f64>) -> f64 + Send + Sync;

/// Built-in kernels with their parameters resolved.
///
/// A `gamma` of `None` means `1 / n_features`, decided when the Gram matrix is built.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NamedKernel {
    Linear,
    Polynomial { degree: f64, gamma: Option<f64>, coef0: f64 },
    Rbf { gamma: Option<f64> },
    Sigmoid { gamma: Option<f64>, coef0: f64 },
    Cosine,
}

impl NamedKernel {
    /// Parses a kernel name and its parameter mapping.
    ///
    /// Parameters the kernel does not use are ignored. `precomputed` is not a
    /// named kernel; use [`Kernel::from_name`] to accept it as well.
    pub fn from_name(name: &str, params: &KernelParams) -> Result<Self> {
        let lowered = name.trim().to_ascii_lowercase();
        let kernel = match lowered.as_str() {
            "linear" => NamedKernel::Linear,
            "poly" | "polynomial" => NamedKernel::Polynomial {
                degree: params.get("degree").copied().unwrap_or(3.0),
                gamma: params.get("gamma").copied(),
                coef0: params.get("coef0").copied().unwrap_or(1.0),
            },
            "rbf" | "radial-basis" | "radial_basis" => NamedKernel::Rbf {
                gamma: params.get("gamma").copied(),
            },
            "sigmoid" => NamedKernel::Sigmoid {
                gamma: params.get("gamma").copied(),
                coef0: params.get("coef0").copied().unwrap_or(1.0),
            },
            "cosine" => NamedKernel::Cosine,
            _ => {
                return Err(KfdaError::Configuration(format!(
                    "unknown kernel '{}'; expected one of linear, poly, rbf, sigmoid, cosine, precomputed",
                    name
                )))
            }
        };

        let accepted = kernel.parameter_names();
        for key in params.keys().filter(|k| !accepted.contains(&k.as_str())) {
            debug!("Ignoring parameter '{}' not used by the {} kernel.", key, kernel.name());
        }

        kernel.validate()?;
        Ok(kernel)
    }

    /// Canonical kernel name.
    pub fn name(&self) -> &'static str {
        match self {
            NamedKernel::Linear => "linear",
            NamedKernel::Polynomial { .. } => "polynomial",
            NamedKernel::Rbf { .. } => "rbf",
            NamedKernel::Sigmoid { .. } => "sigmoid",
            NamedKernel::Cosine => "cosine",
        }
    }

    /// Parameter names this kernel reads from a [`KernelParams`] mapping.
    pub fn parameter_names(&self) -> &'static [&'static str] {
        match self {
            NamedKernel::Linear | NamedKernel::Cosine => &[],
            NamedKernel::Polynomial { .. } => &["degree", "gamma", "coef0"],
            NamedKernel::Rbf { .. } => &["gamma"],
            NamedKernel::Sigmoid { .. } => &["gamma", "coef0"],
        }
    }

    /// Checks that every parameter is finite and in range.
    pub fn validate(&self) -> Result<()> {
        let check_gamma = |gamma: Option<f64>| match gamma {
            Some(g) if !(g.is_finite() && g > 0.0) => Err(KfdaError::Configuration(format!(
                "kernel parameter gamma must be finite and positive, got {}",
                g
            ))),
            _ => Ok(()),
        };
        let check_finite = |label: &str, value: f64| {
            if value.is_finite() {
                Ok(())
            } else {
                Err(KfdaError::Configuration(format!(
                    "kernel parameter {} must be finite, got {}",
                    label, value
                )))
            }
        };
        match *self {
            NamedKernel::Linear | NamedKernel::Cosine => Ok(()),
            NamedKernel::Polynomial { degree, gamma, coef0 } => {
                check_finite("degree", degree)?;
                if degree < 0.0 {
                    return Err(KfdaError::Configuration(format!(
                        "kernel parameter degree must be non-negative, got {}",
                        degree
                    )));
                }
                check_finite("coef0", coef0)?;
                check_gamma(gamma)
            }
            NamedKernel::Rbf { gamma } => check_gamma(gamma),
            NamedKernel::Sigmoid { gamma, coef0 } => {
                check_finite("coef0", coef0)?;
                check_gamma(gamma)
            }
        }
    }

    /// Evaluates the kernel between the rows of `x` and the rows of `y`.
    /// With `same_set` the result is made exactly symmetric.
    fn evaluate(&self, x: ArrayView2<'_, f64>, y: ArrayView2<'_, f64>, same_set: bool) -> Array2<f64> {
        let n_features = x.ncols();
        let default_gamma = if n_features > 0 { 1.0 / n_features as f64 } else { 1.0 };
        let mut gram = x.dot(&y.t());

        match *self {
            NamedKernel::Linear => {}
            NamedKernel::Polynomial { degree, gamma, coef0 } => {
                let gamma = gamma.unwrap_or(default_gamma);
                gram.mapv_inplace(|v| (gamma * v + coef0).powf(degree));
            }
            NamedKernel::Sigmoid { gamma, coef0 } => {
                let gamma = gamma.unwrap_or(default_gamma);
                gram.mapv_inplace(|v| (gamma * v + coef0).tanh());
            }
            NamedKernel::Rbf { gamma } => {
                let gamma = gamma.unwrap_or(default_gamma);
                let x_sq = squared_row_norms(x);
                let y_sq = squared_row_norms(y);
                for ((i, j), v) in gram.indexed_iter_mut() {
                    let dist = if same_set && i == j {
                        0.0
                    } else {
                        (x_sq[i] + y_sq[j] - 2.0 * *v).max(0.0)
                    };
                    *v = (-gamma * dist).exp();
                }
            }
            NamedKernel::Cosine => {
                let x_norm = squared_row_norms(x).mapv(f64::sqrt);
                let y_norm = squared_row_norms(y).mapv(f64::sqrt);
                for ((i, j), v) in gram.indexed_iter_mut() {
                    let denom = x_norm[i] * y_norm[j];
                    *v = if denom > 0.0 { *v / denom } else { 0.0 };
                }
            }
        }

        if same_set {
            mirror_upper_triangle(&mut gram);
        }
        gram
    }
}

/// Kernel selector.
#[derive(Clone)]
pub enum Kernel {
    /// One of the built-in kernels.
    Named(NamedKernel),
    /// A caller-supplied similarity, evaluated for every pair of rows.
    Custom(Arc<SimilarityFn>),
    /// The input matrices already are Gram matrices and are used verbatim.
    Precomputed,
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::Named(NamedKernel::Linear)
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Kernel::Named(named) => f.debug_tuple("Named").field(named).finish(),
            Kernel::Custom(_) => f.write_str("Custom(<fn>)"),
            Kernel::Precomputed => f.write_str("Precomputed"),
        }
    }
}

impl From<NamedKernel> for Kernel {
    fn from(named: NamedKernel) -> Self {
        Kernel::Named(named)
    }
}

impl Kernel {
    /// Resolves a kernel by name; accepts `precomputed` in addition to the named kernels.
    pub fn from_name(name: &str, params: &KernelParams) -> Result<Self> {
        if name.trim().eq_ignore_ascii_case("precomputed") {
            if !params.is_empty() {
                debug!("Ignoring {} kernel parameter(s) for a precomputed kernel.", params.len());
            }
            return Ok(Kernel::Precomputed);
        }
        NamedKernel::from_name(name, params).map(Kernel::Named)
    }

    /// Wraps a custom similarity function.
    ///
    /// No [`KernelParams`] mapping is passed to it; the closure captures any parameters it needs.
    pub fn custom<F>(similarity: F) -> Self
    where
        F: Fn(ArrayView1<'_, f64>, ArrayView1<'_, f64>) -> f64 + Send + Sync + 'static,
    {
        Kernel::Custom(Arc::new(similarity))
    }

    pub fn is_precomputed(&self) -> bool {
        matches!(self, Kernel::Precomputed)
    }

    /// Short name used in log messages.
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Named(named) => named.name(),
            Kernel::Custom(_) => "custom",
            Kernel::Precomputed => "precomputed",
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            Kernel::Named(named) => named.validate(),
            Kernel::Custom(_) | Kernel::Precomputed => Ok(()),
        }
    }

    /// Builds the Gram matrix between the rows of `x` and the rows of `y`
    /// (`y = None` means `x` against itself).
    ///
    /// For [`Kernel::Precomputed`] `x` is returned as given, borrowed, and `y` is ignored.
    /// Inputs are never modified.
    ///
    /// # Errors
    /// Returns [`KfdaError::Validation`] if `x` and `y` have different widths, and
    /// [`KfdaError::Numerical`] if the kernel produces a non-finite value.
    pub fn gram_matrix<'a>(
        &self,
        x: ArrayView2<'a, f64>,
        y: Option<ArrayView2<'a, f64>>,
    ) -> Result<CowArray<'a, f64, Ix2>> {
        if let Kernel::Precomputed = self {
            return Ok(CowArray::from(x));
        }

        let same_set = y.is_none();
        let y = y.unwrap_or(x);
        if x.ncols() != y.ncols() {
            return Err(KfdaError::Validation(format!(
                "kernel inputs have different feature counts: {} vs {}",
                x.ncols(),
                y.ncols()
            )));
        }

        let gram = match self {
            Kernel::Named(named) => named.evaluate(x, y, same_set),
            Kernel::Custom(similarity) => {
                Array2::from_shape_fn((x.nrows(), y.nrows()), |(i, j)| similarity(x.row(i), y.row(j)))
            }
            Kernel::Precomputed => unreachable!("handled above"),
        };

        if let Some(((i, j), v)) = gram.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(KfdaError::numerical(format!(
                "{} kernel produced a non-finite value {} at ({}, {})",
                self.name(),
                v,
                i,
                j
            )));
        }
        Ok(CowArray::from(gram))
    }
}

fn squared_row_norms(m: ArrayView2<'_, f64>) -> Array1<f64> {
    m.map_axis(Axis(1), |row| row.dot(&row))
}

fn mirror_upper_triangle(m: &mut Array2<f64>) {
    let n = m.nrows().min(m.ncols());
    for i in 0..n {
        for j in 0..i {
            m[[i, j]] = m[[j, i]];
        }
    }
}

/// Whether a square matrix is symmetric up to a small absolute/ulps tolerance.
pub(crate) fn is_symmetric(m: ArrayView2<'_, f64>) -> bool {
    if m.nrows() != m.ncols() {
        return false;
    }
    let n = m.nrows();
    (0..n).all(|i| (0..i).all(|j| approx_eq!(f64, m[[i, j]], m[[j, i]], epsilon = 1e-9, ulps = 4)))
}
