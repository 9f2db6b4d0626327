use crate::config::{EigenSolverKind, KfdaConfig, SingularityCheck};
use crate::eigen::solve_discriminant_directions;
use crate::error::KfdaError;
use crate::kernel::{Kernel, KernelParams};
use crate::kfda::KernelFda;
use crate::regularize::regularize_within_scatter;
use crate::scatter::build_scatter_matrices;

use approx::assert_abs_diff_eq;
use ndarray::{array, s, Array1, Array2, ArrayView1, Axis};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// Gaussian blobs around `centers`, `n_per_class` samples each, labelled by center index.
fn generate_blobs(centers: &[&[f64]], n_per_class: usize, spread: f64, seed: u64) -> (Array2<f64>, Vec<usize>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let noise = Normal::new(0.0, spread).unwrap();
    let n_features = centers[0].len();
    let n_samples = centers.len() * n_per_class;
    let mut x = Array2::<f64>::zeros((n_samples, n_features));
    let mut y = Vec::with_capacity(n_samples);
    for (class_idx, center) in centers.iter().enumerate() {
        for i in 0..n_per_class {
            let row = class_idx * n_per_class + i;
            for j in 0..n_features {
                x[[row, j]] = center[j] + noise.sample(&mut rng);
            }
            y.push(class_idx);
        }
    }
    (x, y)
}

/// Whether some threshold puts every class-0 projection on one side and every class-1 projection on the other.
fn is_threshold_separable(projection: ArrayView1<f64>, labels: &[usize]) -> bool {
    let class_values = |c: usize| -> Vec<f64> {
        projection
            .iter()
            .zip(labels)
            .filter(|(_, &l)| l == c)
            .map(|(&v, _)| v)
            .collect()
    };
    let (a, b) = (class_values(0), class_values(1));
    let max = |v: &[f64]| v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let min = |v: &[f64]| v.iter().cloned().fold(f64::INFINITY, f64::min);
    max(&a) < min(&b) || max(&b) < min(&a)
}

fn assert_same_direction(a: ArrayView1<f64>, b: ArrayView1<f64>, tolerance: f64) {
    let cosine = a.dot(&b) / (a.dot(&a).sqrt() * b.dot(&b).sqrt());
    assert!(
        (cosine.abs() - 1.0).abs() < tolerance,
        "directions differ: |cos| = {}",
        cosine.abs()
    );
}

#[cfg(test)]
mod kfda_tests {
    use super::*;

    #[test]
    fn test_linear_kernel_separates_two_blobs() {
        let (x, y) = generate_blobs(&[&[0.0, 0.0], &[5.0, 5.0]], 20, 0.5, 42);
        let mut kfda = KernelFda::new(KfdaConfig::default()).unwrap();
        let projected = kfda.fit_transform(x.view(), &y).unwrap();

        assert_eq!(projected.dim(), (40, 1));
        assert!(is_threshold_separable(projected.column(0), &y));
    }

    #[test]
    fn test_rbf_kernel_separates_ring_from_center() {
        // Class 1 sits on a ring around class 0; no linear threshold in input space works.
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let noise = Normal::new(0.0, 0.1).unwrap();
        let n_per_class = 15;
        let mut x = Array2::<f64>::zeros((2 * n_per_class, 2));
        let mut y = vec![0usize; n_per_class];
        y.extend(std::iter::repeat(1).take(n_per_class));
        for i in 0..n_per_class {
            x[[i, 0]] = noise.sample(&mut rng);
            x[[i, 1]] = noise.sample(&mut rng);
            let angle = 2.0 * std::f64::consts::PI * i as f64 / n_per_class as f64;
            x[[n_per_class + i, 0]] = 3.0 * angle.cos() + noise.sample(&mut rng);
            x[[n_per_class + i, 1]] = 3.0 * angle.sin() + noise.sample(&mut rng);
        }

        let mut params = KernelParams::new();
        params.insert("gamma".to_string(), 0.5);
        let config = KfdaConfig::default().with_named_kernel("rbf", &params).unwrap();
        let mut kfda = KernelFda::new(config).unwrap();
        let projected = kfda.fit_transform(x.view(), &y).unwrap();
        assert!(is_threshold_separable(projected.column(0), &y));
    }

    #[test]
    fn test_transform_without_argument_equals_transform_of_training_samples() {
        let (x, y) = generate_blobs(&[&[0.0, 1.0, 0.0], &[2.0, 0.0, 1.0], &[0.0, -2.0, 2.0]], 8, 0.4, 7);
        let mut kfda = KernelFda::new(KfdaConfig::default()).unwrap();
        kfda.fit(x.view(), &y).unwrap();

        let implicit = kfda.transform(None).unwrap();
        let explicit = kfda.transform(Some(x.view())).unwrap();
        assert_eq!(implicit, explicit);
    }

    #[test]
    fn test_shape_law_with_clamped_components() {
        let (x, y) = generate_blobs(&[&[0.0, 0.0, 0.0], &[3.0, 0.0, 0.0], &[0.0, 3.0, 0.0]], 6, 0.3, 11);
        let config = KfdaConfig::default().with_n_components(Some(5));
        let mut kfda = KernelFda::new(config).unwrap();
        kfda.fit(x.view(), &y).unwrap();

        // 3 classes allow at most 2 directions, even though 5 were requested.
        assert_eq!(kfda.n_components(), Some(2));
        assert_eq!(kfda.weights().unwrap().dim(), (2, 18));
        assert_eq!(kfda.eigenvalues().unwrap().len(), 2);

        let queries = x.slice(s![..4, ..]).to_owned();
        assert_eq!(kfda.transform(Some(queries.view())).unwrap().dim(), (4, 2));
    }

    #[test]
    fn test_n_components_none_uses_feature_count() {
        let (x, y) = generate_blobs(&[&[0.0, 0.0], &[2.0, 0.0], &[0.0, 2.0], &[2.0, 2.0]], 5, 0.2, 5);
        let config = KfdaConfig::default().with_n_components(None);
        let mut kfda = KernelFda::new(config).unwrap();
        kfda.fit(x.view(), &y).unwrap();
        // min(d = 2, C - 1 = 3)
        assert_eq!(kfda.n_components(), Some(2));
    }

    #[test]
    fn test_eigenvalues_are_descending() {
        let (x, y) = generate_blobs(&[&[0.0, 0.0], &[4.0, 0.0], &[0.0, 1.0], &[3.0, 3.0]], 6, 0.5, 9);
        let config = KfdaConfig::default().with_n_components(Some(3));
        let mut kfda = KernelFda::new(config).unwrap();
        kfda.fit(x.view(), &y).unwrap();
        let eigenvalues = kfda.eigenvalues().unwrap();
        for pair in eigenvalues.windows(2) {
            assert!(pair[0] >= pair[1], "eigenvalues not descending: {:?}", eigenvalues);
        }
    }

    #[test]
    fn test_duplicated_class_vectors_trigger_regularization() {
        // Every class is one feature vector repeated, so the within-class scatter is exactly zero.
        let x = array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [0.0, 2.0], [0.0, 2.0], [0.0, 2.0]];
        let y = [0usize, 0, 0, 1, 1, 1];
        let alpha = 0.25;

        let gram = Kernel::default().gram_matrix(x.view(), None).unwrap();
        let scatter = build_scatter_matrices(gram.view(), &y).unwrap();
        let regularized =
            regularize_within_scatter(scatter.within.clone(), alpha, 1e-4, SingularityCheck::Determinant).unwrap();
        assert!(regularized.applied);
        let expected = &scatter.within + &(Array2::<f64>::eye(6) * alpha);
        assert_abs_diff_eq!(regularized.matrix, expected, epsilon = 1e-15);

        let config = KfdaConfig::default().with_alpha(alpha);
        let mut kfda = KernelFda::new(config).unwrap();
        kfda.fit(x.view(), &y).unwrap();
        assert!(kfda.diagnostics().unwrap().regularized);

        // The fitted weights are the directions of (M, N + alpha * I).
        let reference =
            solve_discriminant_directions(&scatter.between, &expected, 1, EigenSolverKind::Generalized).unwrap();
        assert_abs_diff_eq!(kfda.weights().unwrap().view(), reference.weights.view(), epsilon = 1e-10);
    }

    #[test]
    fn test_reciprocal_condition_check_flags_rank_deficient_within_scatter() {
        let gram = Array2::<f64>::eye(4) * 10.0 + Array2::<f64>::from_elem((4, 4), 0.1);
        let y = [0usize, 1, 0, 1];
        let config = KfdaConfig::default()
            .with_kernel(Kernel::Precomputed)
            .with_singularity_check(SingularityCheck::ReciprocalCondition);
        let mut kfda = KernelFda::new(config).unwrap();
        kfda.fit(gram.view(), &y).unwrap();
        // N = K_0 H K_0^T + K_1 H K_1^T has rank 2 of 4, so it is still singular.
        assert!(kfda.diagnostics().unwrap().regularized);
    }

    #[test]
    fn test_linear_and_rbf_gram_matrices_are_symmetric() {
        let (x, _) = generate_blobs(&[&[0.0, 1.0, 2.0], &[1.0, -1.0, 0.5]], 10, 1.0, 21);
        let mut params = KernelParams::new();
        params.insert("gamma".to_string(), 0.3);
        for kernel in [Kernel::default(), Kernel::from_name("rbf", &params).unwrap()] {
            let gram = kernel.gram_matrix(x.view(), None).unwrap();
            for i in 0..gram.nrows() {
                for j in 0..gram.ncols() {
                    assert_abs_diff_eq!(gram[[i, j]], gram[[j, i]], epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_precomputed_gram_reproduces_linear_fit() {
        let (x, y) = generate_blobs(&[&[0.0, 0.0], &[3.0, 1.0]], 10, 0.5, 13);
        let queries = array![[0.5, 0.0], [2.5, 1.5], [1.0, 1.0]];

        let mut linear = KernelFda::new(KfdaConfig::default()).unwrap();
        linear.fit(x.view(), &y).unwrap();

        let train_gram = Kernel::default().gram_matrix(x.view(), None).unwrap().into_owned();
        let query_gram = Kernel::default()
            .gram_matrix(queries.view(), Some(x.view()))
            .unwrap()
            .into_owned();
        let mut precomputed = KernelFda::new(KfdaConfig::default().with_kernel(Kernel::Precomputed)).unwrap();
        precomputed.fit(train_gram.view(), &y).unwrap();

        // The Gram matrix is stored exactly as given.
        assert_eq!(precomputed.training_samples().unwrap(), train_gram.view());
        assert_abs_diff_eq!(
            precomputed.weights().unwrap().view(),
            linear.weights().unwrap().view(),
            epsilon = 1e-12
        );
        assert_abs_diff_eq!(
            precomputed.transform(Some(query_gram.view())).unwrap(),
            linear.transform(Some(queries.view())).unwrap(),
            epsilon = 1e-9
        );
    }

    #[test]
    fn test_precomputed_requires_square_training_matrix() {
        let x = Array2::<f64>::zeros((4, 3));
        let mut kfda = KernelFda::new(KfdaConfig::default().with_kernel(Kernel::Precomputed)).unwrap();
        let err = kfda.fit(x.view(), &[0usize, 0, 1, 1]).unwrap_err();
        assert!(matches!(err, KfdaError::Validation(_)));
    }

    #[test]
    fn test_asymmetric_precomputed_gram_is_used_verbatim() {
        let mut gram = Array2::<f64>::eye(4) * 10.0 + Array2::<f64>::from_elem((4, 4), 0.5);
        gram[[0, 1]] += 0.25;
        gram[[3, 2]] -= 0.4;
        let y = [0usize, 1, 0, 1];

        let mut kfda = KernelFda::new(KfdaConfig::default().with_kernel(Kernel::Precomputed)).unwrap();
        kfda.fit(gram.view(), &y).unwrap();

        assert_eq!(kfda.training_samples().unwrap(), gram.view());
        assert_eq!(kfda.weights().unwrap().dim(), (1, 4));
        assert!(kfda.transform(None).unwrap().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_large_magnitude_features_still_fit() {
        // Feature values around 1e6 with a spread of 10: the within-class scatter is
        // rank-deficient, yet its rounded determinant can stay above `tol`, so the ridge
        // may be skipped and Cholesky may fail. The fit must still produce directions.
        let (x, y) = generate_blobs(&[&[1.0e6, 1.0e6], &[1.0e6 + 100.0, 1.0e6 - 100.0]], 10, 10.0, 47);
        let mut kfda = KernelFda::new(KfdaConfig::default()).unwrap();
        let projected = kfda.fit_transform(x.view(), &y).unwrap();

        assert_eq!(projected.dim(), (20, 1));
        assert!(projected.iter().all(|v| v.is_finite()));
        assert!(kfda.eigenvalues().unwrap().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_custom_dot_product_matches_linear_kernel() {
        let (x, y) = generate_blobs(&[&[0.0, 0.0, 1.0], &[2.0, 2.0, 0.0]], 8, 0.5, 17);
        let mut linear = KernelFda::new(KfdaConfig::default()).unwrap();
        linear.fit(x.view(), &y).unwrap();

        let custom_kernel = Kernel::custom(|a, b| a.dot(&b));
        let mut custom = KernelFda::new(KfdaConfig::default().with_kernel(custom_kernel)).unwrap();
        custom.fit(x.view(), &y).unwrap();

        assert_same_direction(
            linear.weights().unwrap().row(0),
            custom.weights().unwrap().row(0),
            1e-6,
        );
    }

    #[test]
    fn test_symmetric_product_solver_produces_directions() {
        let (x, y) = generate_blobs(&[&[0.0, 0.0], &[4.0, 4.0], &[-4.0, 4.0]], 6, 0.5, 19);
        let config = KfdaConfig::default().with_eigen_solver(EigenSolverKind::SymmetricProduct);
        let mut kfda = KernelFda::new(config).unwrap();
        let projected = kfda.fit_transform(x.view(), &y).unwrap();
        assert_eq!(projected.dim(), (18, 2));
        assert!(projected.iter().all(|v| v.is_finite()));
        assert_eq!(kfda.diagnostics().unwrap().eigen_solver, EigenSolverKind::SymmetricProduct);
    }

    #[test]
    fn test_transform_before_fit_is_unfitted_error() {
        let kfda: KernelFda<usize> = KernelFda::new(KfdaConfig::default()).unwrap();
        let err = kfda.transform(None).unwrap_err();
        assert!(matches!(err, KfdaError::Unfitted));
        let err = kfda.transform(Some(array![[1.0, 2.0]].view())).unwrap_err();
        assert!(matches!(err, KfdaError::Unfitted));
        assert!(!kfda.is_fitted());
        assert!(kfda.weights().is_none());
        assert!(kfda.classes().is_none());
    }

    #[test]
    fn test_single_class_is_configuration_error() {
        let x = array![[1.0, 2.0], [2.0, 1.0], [3.0, 3.0]];
        let mut kfda = KernelFda::new(KfdaConfig::default()).unwrap();
        let err = kfda.fit(x.view(), &["only"; 3]).unwrap_err();
        assert!(matches!(err, KfdaError::Configuration(_)));
        assert!(!kfda.is_fitted());
    }

    #[test]
    fn test_invalid_inputs_are_validation_errors() {
        let mut kfda = KernelFda::new(KfdaConfig::default()).unwrap();

        let with_nan = array![[1.0, f64::NAN], [2.0, 1.0]];
        assert!(matches!(kfda.fit(with_nan.view(), &[0, 1]), Err(KfdaError::Validation(_))));

        let x = array![[1.0, 0.0], [2.0, 1.0], [0.0, 1.0]];
        assert!(matches!(kfda.fit(x.view(), &[0, 1]), Err(KfdaError::Validation(_))));

        let empty = Array2::<f64>::zeros((0, 2));
        assert!(matches!(kfda.fit(empty.view(), &[]), Err(KfdaError::Validation(_))));
    }

    #[test]
    fn test_transform_rejects_wrong_width_and_non_finite_queries() {
        let (x, y) = generate_blobs(&[&[0.0, 0.0], &[3.0, 3.0]], 5, 0.3, 23);
        let mut kfda = KernelFda::new(KfdaConfig::default()).unwrap();
        kfda.fit(x.view(), &y).unwrap();

        let too_wide = Array2::<f64>::zeros((2, 3));
        assert!(matches!(kfda.transform(Some(too_wide.view())), Err(KfdaError::Validation(_))));
        let infinite = array![[f64::INFINITY, 0.0]];
        assert!(matches!(kfda.transform(Some(infinite.view())), Err(KfdaError::Validation(_))));
    }

    #[test]
    fn test_failed_fit_keeps_previous_state() {
        let (x, y) = generate_blobs(&[&[0.0, 0.0], &[3.0, 3.0]], 6, 0.3, 29);
        let mut kfda = KernelFda::new(KfdaConfig::default()).unwrap();
        kfda.fit(x.view(), &y).unwrap();
        let weights_before = kfda.weights().unwrap().clone();
        let projection_before = kfda.transform(None).unwrap();

        let single_class = vec![0usize; x.nrows()];
        assert!(kfda.fit(x.view(), &single_class).is_err());

        assert_eq!(kfda.weights().unwrap(), &weights_before);
        assert_eq!(kfda.transform(None).unwrap(), projection_before);
    }

    #[test]
    fn test_refit_replaces_all_state() {
        let (x2, y2) = generate_blobs(&[&[0.0, 0.0], &[3.0, 3.0]], 5, 0.3, 31);
        let (x3, y3) = generate_blobs(&[&[0.0, 0.0], &[3.0, 3.0], &[-3.0, 3.0]], 4, 0.3, 37);
        let mut kfda = KernelFda::new(KfdaConfig::default()).unwrap();

        kfda.fit(x2.view(), &y2).unwrap();
        assert_eq!(kfda.weights().unwrap().dim(), (1, 10));

        kfda.fit(x3.view(), &y3).unwrap();
        assert_eq!(kfda.weights().unwrap().dim(), (2, 12));
        assert_eq!(kfda.classes().unwrap(), &[0, 1, 2]);
        assert_eq!(kfda.class_counts().unwrap(), &[4, 4, 4]);
        assert_eq!(kfda.training_labels().unwrap(), y3.as_slice());
        assert_eq!(kfda.training_samples().unwrap(), x3.view());
    }

    #[test]
    fn test_string_labels_are_sorted() {
        let x = array![[0.0], [0.1], [5.0], [5.2], [9.0], [9.1]];
        let y = ["cherry", "cherry", "apple", "apple", "banana", "banana"];
        let mut kfda: KernelFda<&str> = KernelFda::new(KfdaConfig::default()).unwrap();
        kfda.fit(x.view(), &y).unwrap();
        assert_eq!(kfda.classes().unwrap(), &["apple", "banana", "cherry"]);
        assert_eq!(kfda.class_counts().unwrap(), &[2, 2, 2]);
        // d = 1 but n_components defaults to 2, and C - 1 = 2.
        assert_eq!(kfda.n_components(), Some(2));
    }

    #[test]
    fn test_training_projection_class_means_are_spread() {
        let (x, y) = generate_blobs(&[&[0.0, 0.0], &[6.0, 0.0]], 12, 0.5, 41);
        let mut kfda = KernelFda::new(KfdaConfig::default()).unwrap();
        let projected = kfda.fit_transform(x.view(), &y).unwrap();

        let class_mean = |c: usize| -> f64 {
            let idx: Vec<usize> = (0..y.len()).filter(|&i| y[i] == c).collect();
            projected.select(Axis(0), &idx).column(0).mean().unwrap()
        };
        let spread: Array1<f64> = projected.column(0).to_owned() - projected.column(0).mean().unwrap();
        let total_sd = spread.mapv(|v| v * v).mean().unwrap().sqrt();
        assert!((class_mean(0) - class_mean(1)).abs() > total_sd);
    }

    #[test]
    fn test_diagnostics_serialize_to_json() {
        let (x, y) = generate_blobs(&[&[0.0, 0.0], &[3.0, 3.0]], 4, 0.3, 43);
        let mut kfda = KernelFda::new(KfdaConfig::default()).unwrap();
        kfda.fit(x.view(), &y).unwrap();

        let diagnostics = kfda.diagnostics().unwrap();
        assert_eq!(diagnostics.n_samples, 8);
        assert_eq!(diagnostics.n_classes, 2);
        assert_eq!(diagnostics.kernel, "linear");

        let json = serde_json::to_string(diagnostics).unwrap();
        assert!(json.contains("\"eigen_solver\":\"generalized\""));
        let back: crate::FitDiagnostics = serde_json::from_str(&json).unwrap();
        assert_eq!(&back, diagnostics);
    }
}
