use ndarray::{Array1, Array2, ArrayView1, Axis};
use std::collections::BTreeSet;
use std::f64::consts::PI;
use thiserror::Error;

/// A comprehensive error type for all operations within the basis module.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BasisError {
    #[error(
        "Not enough knots for the given degree: {num_knots} knots with degree {degree} gives {num_basis} basis functions. Need len(knots) > degree + 1."
    )]
    DegenerateBasis {
        num_knots: usize,
        degree: usize,
        num_basis: i64,
    },

    #[error("Knot positions must be finite, but found {0}.")]
    NonFiniteKnot(f64),

    #[error("Cyclic period must be finite and positive, but was {0}.")]
    InvalidPeriod(f64),

    #[error(
        "The {what} of this spline has not been resolved. Configure it explicitly or initialize the spline with training data first."
    )]
    Uninitialized { what: &'static str },

    #[error("Cannot infer {what} from an empty sample.")]
    EmptySample { what: &'static str },
}

/// Number of B-spline basis functions for a knot vector and degree, `m - k - 1`.
/// Returns an error when the combination does not yield at least one function.
pub fn bspline_dimension(num_knots: usize, degree: usize) -> Result<usize, BasisError> {
    let num_basis = num_knots as i64 - degree as i64 - 1;
    if num_basis <= 0 {
        return Err(BasisError::DegenerateBasis {
            num_knots,
            degree,
            num_basis,
        });
    }
    Ok(num_basis as usize)
}

/// A single column of ones.
pub fn constant_basis(data: ArrayView1<f64>) -> Array2<f64> {
    Array2::ones((data.len(), 1))
}

/// `[x, 1]` when `bias` is set, otherwise just `[x]`.
pub fn linear_basis(data: ArrayView1<f64>, bias: bool) -> Array2<f64> {
    let ncols = if bias { 2 } else { 1 };
    let mut basis = Array2::ones((data.len(), ncols));
    basis.column_mut(0).assign(&data);
    basis
}

/// Creates the truncated-power basis of a continuous piecewise-linear function.
///
/// Columns are `1, x, (x - k_1)+, ..., (x - k_m)+`. With this parameterization the
/// coefficient of column `i + 2` is the change in slope at knot `i`, which is what the
/// shape constraints operate on.
///
/// `knots` must already be sorted.
pub fn piecewise_linear_basis(data: ArrayView1<f64>, knots: &[f64]) -> Array2<f64> {
    let mut basis = Array2::zeros((data.len(), 2 + knots.len()));
    for (mut row, &x) in basis.axis_iter_mut(Axis(0)).zip(data.iter()) {
        row[0] = 1.0;
        row[1] = x;
        for (j, &knot) in knots.iter().enumerate() {
            row[j + 2] = (x - knot).max(0.0);
        }
    }
    basis
}

/// Creates a B-spline basis expansion matrix for a sorted knot vector.
///
/// This is the primary workhorse function, implementing the Cox-de Boor recursion
/// column by column: degree-0 function `i` is the indicator of `[t_i, t_{i+1})` and
/// each higher degree blends two neighbours of the previous degree.
///
/// # Arguments
///
/// * `data`: A 1D view of the data points to be transformed.
/// * `knots`: The full knot vector, sorted in non-decreasing order. Boundary knots are
///   not added automatically; repeat them explicitly for a clamped basis.
/// * `degree`: The degree of the B-spline polynomials (e.g., 3 for cubic).
///
/// # Returns
///
/// The basis matrix with shape `[data.len(), knots.len() - degree - 1]`. Points outside
/// the half-open span `[t_0, t_{m-1})` produce all-zero rows.
pub fn bspline_basis(
    data: ArrayView1<f64>,
    knots: &[f64],
    degree: usize,
) -> Result<Array2<f64>, BasisError> {
    let num_basis = bspline_dimension(knots.len(), degree)?;

    let mut basis_matrix = Array2::zeros((data.len(), num_basis));
    for (i, &x) in data.iter().enumerate() {
        let basis_row = internal::evaluate_splines_at_point(x, degree, knots);
        basis_matrix.row_mut(i).assign(&basis_row);
    }
    debug_assert_eq!(basis_matrix.ncols(), num_basis);

    Ok(basis_matrix)
}

/// Real Fourier expansion up to harmonic `order` for the given `period`.
///
/// Columns are `1, sin(w x), cos(w x), sin(2 w x), cos(2 w x), ...` with
/// `w = 2 pi / period`.
pub fn cyclic_basis(
    data: ArrayView1<f64>,
    order: usize,
    period: f64,
) -> Result<Array2<f64>, BasisError> {
    if !period.is_finite() || period <= 0.0 {
        return Err(BasisError::InvalidPeriod(period));
    }

    let mut basis = Array2::zeros((data.len(), 1 + 2 * order));
    basis.column_mut(0).fill(1.0);
    for k in 1..=order {
        let omega = 2.0 * PI * k as f64 / period;
        let sin_col = 2 * k - 1;
        basis
            .column_mut(sin_col)
            .assign(&data.mapv(|x| (omega * x).sin()));
        basis
            .column_mut(sin_col + 1)
            .assign(&data.mapv(|x| (omega * x).cos()));
    }
    Ok(basis)
}

/// One-hot encoding on `round(x)`.
///
/// The matrix always has `n_classes` columns. Values that round outside
/// `[0, n_classes)`, and NaN, produce an all-zero row rather than an error.
pub fn factor_basis(data: ArrayView1<f64>, n_classes: usize) -> Array2<f64> {
    let mut basis = Array2::zeros((data.len(), n_classes));
    for (i, &x) in data.iter().enumerate() {
        let level = x.round();
        if level >= 0.0 && level < n_classes as f64 {
            basis[[i, level as usize]] = 1.0;
        }
    }
    basis
}

/// The period of a cyclic term inferred from its fitting sample, `max(x) - min(x)`.
pub fn infer_period(data: ArrayView1<f64>) -> Result<f64, BasisError> {
    if data.is_empty() {
        return Err(BasisError::EmptySample { what: "period" });
    }
    let min_val = data.iter().fold(f64::INFINITY, |a, &b| a.min(b));
    let max_val = data.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let period = max_val - min_val;
    if !period.is_finite() || period <= 0.0 {
        return Err(BasisError::InvalidPeriod(period));
    }
    Ok(period)
}

/// The class count of a factor term inferred from its fitting sample: the number of
/// distinct rounded values.
pub fn infer_class_count(data: ArrayView1<f64>) -> Result<usize, BasisError> {
    if data.is_empty() {
        return Err(BasisError::EmptySample {
            what: "class count",
        });
    }
    let levels: BTreeSet<i64> = data
        .iter()
        .filter(|x| x.is_finite())
        .map(|&x| x.round() as i64)
        .collect();
    if levels.is_empty() {
        return Err(BasisError::EmptySample {
            what: "class count",
        });
    }
    Ok(levels.len())
}

/// Sorts knot positions once, rejecting non-finite entries.
pub fn sorted_knots(knots: &[f64]) -> Result<Vec<f64>, BasisError> {
    if let Some(&bad) = knots.iter().find(|k| !k.is_finite()) {
        return Err(BasisError::NonFiniteKnot(bad));
    }
    let mut sorted = knots.to_vec();
    sorted.sort_by(f64::total_cmp);
    Ok(sorted)
}

/// Internal module for implementation details not exposed in the public API.
mod internal {
    use super::*;

    /// Evaluates all B-spline basis functions at a single point `x` with the textbook
    /// Cox-de Boor recursion. A zero denominator (repeated knots) contributes zero.
    pub(super) fn evaluate_splines_at_point(x: f64, degree: usize, knots: &[f64]) -> Array1<f64> {
        let num_knots = knots.len();

        // Degree 0: indicators of the half-open knot intervals.
        let mut b: Array1<f64> = (0..num_knots - 1)
            .map(|i| {
                if knots[i] <= x && x < knots[i + 1] {
                    1.0
                } else {
                    0.0
                }
            })
            .collect();

        for p in 1..=degree {
            let mut next = Array1::zeros(num_knots - p - 1);
            for i in 0..num_knots - p - 1 {
                let mut value = 0.0;

                // Left parent spline contribution
                let left_denom = knots[i + p] - knots[i];
                if left_denom != 0.0 {
                    value += (x - knots[i]) / left_denom * b[i];
                }

                // Right parent spline contribution
                let right_denom = knots[i + p + 1] - knots[i + 1];
                if right_denom != 0.0 {
                    value += (knots[i + p + 1] - x) / right_denom * b[i + 1];
                }

                next[i] = value;
            }
            b = next;
        }

        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array, array};

    #[test]
    fn test_bspline_basis_sums_to_one() {
        // Clamped cubic knot vector over [0, 10].
        let knots = [0.0, 0.0, 0.0, 0.0, 2.5, 5.0, 7.5, 10.0, 10.0, 10.0, 10.0];
        let data = Array::linspace(0.1, 9.9, 100);
        let basis = bspline_basis(data.view(), &knots, 3).unwrap();

        assert_eq!(basis.ncols(), knots.len() - 3 - 1);
        let sums = basis.sum_axis(Axis(1));

        // Every row should sum to 1.0 (with floating point tolerance)
        for &sum in sums.iter() {
            assert!(
                (sum - 1.0).abs() < 1e-9,
                "Basis did not sum to 1, got {}",
                sum
            );
        }
    }

    #[test]
    fn test_unclamped_bspline_partition_of_unity_inside_support() {
        // Uniform knots without repetition: unity holds on [t_k, t_{m-k-1}).
        let knots = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0];
        let data = Array::linspace(3.01, 3.99, 25);
        let basis = bspline_basis(data.view(), &knots, 3).unwrap();
        assert_eq!(basis.ncols(), 4);
        for sum in basis.sum_axis(Axis(1)).iter() {
            assert_abs_diff_eq!(*sum, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_single_point_evaluation_degree_one() {
        // Degree 1 (linear) splines with knots t = [0,0,1,2,2].
        // This gives 3 basis functions (n = k-d-1 = 5-1-1 = 3), B_{0,1}, B_{1,1}, B_{2,1}.
        let knots = [0.0, 0.0, 1.0, 2.0, 2.0];
        let values = internal::evaluate_splines_at_point(0.5, 1, &knots);
        assert_eq!(values.len(), 3);

        // B_{0,1}(0.5) = (1-0.5)/(1-0) * B_{1,0} = 0.5 (the 0/0 left term is dropped)
        // B_{1,1}(0.5) = (0.5-0)/(1-0) * B_{1,0} = 0.5
        // B_{2,1}(0.5) = 0
        assert!((values[0] - 0.5).abs() < 1e-9, "Expected B_0,1 to be 0.5, got {}", values[0]);
        assert!((values[1] - 0.5).abs() < 1e-9, "Expected B_1,1 to be 0.5, got {}", values[1]);
        assert!((values[2] - 0.0).abs() < 1e-9, "Expected B_2,1 to be 0.0, got {}", values[2]);
    }

    #[test]
    fn test_bspline_outside_span_is_zero() {
        let knots = [0.0, 1.0, 2.0, 3.0];
        let basis = bspline_basis(array![-1.0, 3.0, 4.5].view(), &knots, 1).unwrap();
        assert_eq!(basis.shape(), &[3, 2]);
        assert!(basis.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_degenerate_bspline_rejected() {
        match bspline_basis(array![0.5].view(), &[0.0, 1.0, 2.0, 3.0], 3).unwrap_err() {
            BasisError::DegenerateBasis {
                num_knots,
                degree,
                num_basis,
            } => {
                assert_eq!(num_knots, 4);
                assert_eq!(degree, 3);
                assert_eq!(num_basis, 0);
            }
            other => panic!("Expected DegenerateBasis error, got {other:?}"),
        }
    }

    #[test]
    fn test_piecewise_linear_rows() {
        let knots = [1.0, 2.0];
        let basis = piecewise_linear_basis(array![0.5, 1.5, 3.0].view(), &knots);
        assert_eq!(basis.row(0), array![1.0, 0.5, 0.0, 0.0]);
        assert_eq!(basis.row(1), array![1.0, 1.5, 0.5, 0.0]);
        assert_eq!(basis.row(2), array![1.0, 3.0, 2.0, 1.0]);
    }

    #[test]
    fn test_linear_basis_bias_column() {
        let with_bias = linear_basis(array![2.0, 3.0].view(), true);
        assert_eq!(with_bias, array![[2.0, 1.0], [3.0, 1.0]]);
        let without_bias = linear_basis(array![2.0, 3.0].view(), false);
        assert_eq!(without_bias, array![[2.0], [3.0]]);
    }

    #[test]
    fn test_cyclic_basis_layout() {
        let basis = cyclic_basis(array![0.0, 6.0].view(), 2, 24.0).unwrap();
        assert_eq!(basis.ncols(), 5);
        assert_abs_diff_eq!(basis[[0, 0]], 1.0);
        assert_abs_diff_eq!(basis[[0, 1]], 0.0);
        assert_abs_diff_eq!(basis[[0, 2]], 1.0);
        // A quarter period: sin = 1, cos = 0; second harmonic: sin = 0, cos = -1.
        assert_abs_diff_eq!(basis[[1, 1]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(basis[[1, 2]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(basis[[1, 3]], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(basis[[1, 4]], -1.0, epsilon = 1e-12);

        assert_eq!(
            cyclic_basis(array![0.0].view(), 1, 0.0).unwrap_err(),
            BasisError::InvalidPeriod(0.0)
        );
    }

    #[test]
    fn test_factor_basis_out_of_range_rows() {
        let basis = factor_basis(array![0.0, 2.0, 3.0, -1.0, f64::NAN, 1.2].view(), 3);
        assert_eq!(basis.ncols(), 3);
        assert_eq!(basis.row(0), array![1.0, 0.0, 0.0]);
        assert_eq!(basis.row(1), array![0.0, 0.0, 1.0]);
        assert_eq!(basis.row(2), array![0.0, 0.0, 0.0]);
        assert_eq!(basis.row(3), array![0.0, 0.0, 0.0]);
        assert_eq!(basis.row(4), array![0.0, 0.0, 0.0]);
        assert_eq!(basis.row(5), array![0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_inference_helpers() {
        assert_abs_diff_eq!(infer_period(array![3.0, 27.0, 10.0].view()).unwrap(), 24.0);
        assert!(matches!(
            infer_period(array![1.0, 1.0].view()),
            Err(BasisError::InvalidPeriod(_))
        ));
        assert_eq!(infer_class_count(array![0.0, 1.0, 1.0, 2.0].view()).unwrap(), 3);
        assert!(matches!(
            infer_class_count(Array1::<f64>::zeros(0).view()),
            Err(BasisError::EmptySample { .. })
        ));
    }

    #[test]
    fn test_sorted_knots() {
        assert_eq!(sorted_knots(&[3.0, 1.0, 2.0]).unwrap(), vec![1.0, 2.0, 3.0]);
        assert_eq!(
            sorted_knots(&[1.0, f64::NAN]).unwrap_err().to_string(),
            "Knot positions must be finite, but found NaN."
        );
    }
}
