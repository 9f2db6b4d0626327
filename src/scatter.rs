//! Between-class (M) and within-class (N) scatter in the kernel basis.
//!
//! Both matrices are N×N and indexed by training sample, not by feature:
//!
//! * `M = Σ_c n_c (m_c − m)(m_c − m)ᵀ` where `m` is the row mean of K and
//!   `m_c` the row mean of the columns of K belonging to class c.
//! * `N = Σ_c K_c (I − J/n_c) K_cᵀ` where `K_c` holds the columns of class c.

use std::collections::BTreeMap;

use log::{debug, trace};
use ndarray::linalg::general_mat_mul;
use ndarray::{Array2, ArrayView2, Axis};

use crate::error::{KfdaError, Result};

/// Training labels grouped by class, in ascending label order.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassPartition<L> {
    /// Distinct labels, sorted.
    pub classes: Vec<L>,
    /// Sample indices for each entry of `classes`, in input order.
    pub members: Vec<Vec<usize>>,
}

impl<L: Ord + Clone> ClassPartition<L> {
    pub fn from_labels(labels: &[L]) -> Self {
        let mut grouped: BTreeMap<&L, Vec<usize>> = BTreeMap::new();
        for (idx, label) in labels.iter().enumerate() {
            grouped.entry(label).or_default().push(idx);
        }
        let (classes, members) = grouped
            .into_iter()
            .map(|(label, idx)| (label.clone(), idx))
            .unzip();
        ClassPartition { classes, members }
    }
}

impl<L> ClassPartition<L> {
    pub fn n_classes(&self) -> usize {
        self.classes.len()
    }

    pub fn class_counts(&self) -> Vec<usize> {
        self.members.iter().map(Vec::len).collect()
    }
}

/// Output of [`build_scatter_matrices`].
#[derive(Debug, Clone)]
pub struct ScatterMatrices<L> {
    /// Between-class scatter M (N×N).
    pub between: Array2<f64>,
    /// Within-class scatter N (N×N).
    pub within: Array2<f64>,
    pub classes: Vec<L>,
    /// Samples per class, aligned with `classes`; sums to N.
    pub class_counts: Vec<usize>,
}

/// Builds M and N from the training Gram matrix and labels.
///
/// # Errors
/// [`KfdaError::Validation`] if `gram` is not square, is empty, or its size does
/// not match `labels.len()`.
pub fn build_scatter_matrices<L: Ord + Clone>(
    gram: ArrayView2<'_, f64>,
    labels: &[L],
) -> Result<ScatterMatrices<L>> {
    let partition = ClassPartition::from_labels(labels);
    build_from_partition(gram, &partition)
}

pub(crate) fn build_from_partition<L: Clone>(
    gram: ArrayView2<'_, f64>,
    partition: &ClassPartition<L>,
) -> Result<ScatterMatrices<L>> {
    let (n_rows, n_cols) = gram.dim();
    if n_rows != n_cols {
        return Err(KfdaError::Validation(format!(
            "training Gram matrix must be square, got {}x{}",
            n_rows, n_cols
        )));
    }
    let n_samples = n_rows;
    let class_counts = partition.class_counts();
    let n_labelled: usize = class_counts.iter().sum();
    if n_samples == 0 || n_labelled != n_samples {
        return Err(KfdaError::Validation(format!(
            "Gram matrix has {} rows but {} labels were given",
            n_samples, n_labelled
        )));
    }
    if let Some(empty) = class_counts.iter().position(|&c| c == 0) {
        return Err(KfdaError::Validation(format!("class #{} has no samples", empty)));
    }

    debug!(
        "Building scatter matrices for {} samples in {} classes.",
        n_samples,
        partition.n_classes()
    );

    let overall_mean = gram
        .mean_axis(Axis(1))
        .ok_or_else(|| KfdaError::Validation("cannot average an empty Gram matrix".to_string()))?;

    let mut between = Array2::<f64>::zeros((n_samples, n_samples));
    let mut within = Array2::<f64>::zeros((n_samples, n_samples));

    for (class_idx, members) in partition.members.iter().enumerate() {
        let n_c = members.len();
        let class_columns = gram.select(Axis(1), members);
        let class_mean = class_columns
            .mean_axis(Axis(1))
            .ok_or_else(|| KfdaError::Validation(format!("class #{} has no samples", class_idx)))?;

        let offset = (&class_mean - &overall_mean).insert_axis(Axis(1));
        general_mat_mul(n_c as f64, &offset, &offset.t(), 1.0, &mut between);

        // K_c (I - J/n_c) K_c^T == (K_c H)(K_c H)^T because H is a symmetric projection,
        // and K_c H is K_c with each row's class mean removed.
        let centered = &class_columns - &class_mean.insert_axis(Axis(1));
        general_mat_mul(1.0, &centered, &centered.t(), 1.0, &mut within);

        trace!("Accumulated scatter for class #{} ({} samples).", class_idx, n_c);
    }

    Ok(ScatterMatrices {
        between,
        within,
        classes: partition.classes.clone(),
        class_counts,
    })
}
