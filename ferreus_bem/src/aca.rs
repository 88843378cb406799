/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements Adaptive Cross Approximation (ACA) and truncation of low-rank factor pairs.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    config::{TruncationMode, TruncationNorm},
    error::BemError,
};
use faer::{
    linalg::triangular_solve::solve_unit_upper_triangular_in_place, ColRef, Mat, MatRef, Par,
};

/// Result of a cross approximation: `M ≈ A * B^T` together with the pivots
/// that were chosen, in the order they were chosen.
#[derive(Debug, Clone)]
pub struct CrossApproximation {
    /// Left factor (rows × rank).
    pub a: Mat<f64>,
    /// Right factor (columns × rank).
    pub b: Mat<f64>,
    /// Row pivot of every rank-1 term.
    pub row_pivots: Vec<usize>,
    /// Column pivot of every rank-1 term.
    pub col_pivots: Vec<usize>,
}

impl CrossApproximation {
    /// Number of rank-1 terms.
    pub fn rank(&self) -> usize {
        self.row_pivots.len()
    }
}

/// Adaptive Cross Approximation (ACA) with full pivoting
///
/// Every step searches the whole residual for the entry of largest magnitude.
/// The column of the chosen pivot, divided by the pivot value, becomes the new
/// column of `A`, so `A` restricted to the row pivots is unit lower triangular.
/// The scan runs column by column with a strict comparison, so ties resolve to
/// the lowest column index and then the lowest row index.
///
/// # Arguments
/// * `matrix` - The fully materialised matrix to approximate
/// * `epsilon` - Relative accuracy: iteration stops once the Frobenius norm of
///   the residual is at most `epsilon` times that of the approximation
///
/// # Returns
/// The factors and pivots. A matrix that is zero returns rank 0.
pub fn aca_full_pivoting(matrix: MatRef<f64>, epsilon: &f64) -> CrossApproximation {
    let num_rows = matrix.nrows();
    let num_columns = matrix.ncols();
    let max_rank = num_rows.min(num_columns);

    let mut residual = matrix.to_owned();
    let mut a = Mat::<f64>::zeros(num_rows, max_rank);
    let mut b = Mat::<f64>::zeros(num_columns, max_rank);
    let mut row_pivots = Vec::with_capacity(max_rank);
    let mut col_pivots = Vec::with_capacity(max_rank);

    // Squared Frobenius norm of the running approximation
    let mut approximation_norm: f64 = 0.0;
    let mut initial_max: f64 = 0.0;

    let mut k = 0;
    while k < max_rank {
        let (i, j, max_value, residual_norm) = find_full_pivot(residual.as_ref());

        if k == 0 {
            initial_max = max_value;
        }

        if max_value == 0.0 || max_value <= initial_max * f64::EPSILON {
            break;
        }

        if k > 0 && residual_norm <= *epsilon * approximation_norm.sqrt() {
            break;
        }

        let pivot = residual[(i, j)];

        for r in 0..num_rows {
            a[(r, k)] = residual[(r, j)] / pivot;
        }
        for c in 0..num_columns {
            b[(c, k)] = residual[(i, c)];
        }

        // Remove the new cross from the residual
        for c in 0..num_columns {
            let bc = b[(c, k)];
            if bc != 0.0 {
                for r in 0..num_rows {
                    residual[(r, c)] -= a[(r, k)] * bc;
                }
            }
        }

        approximation_norm += approximation_norm_increment(&a, &b, k);

        row_pivots.push(i);
        col_pivots.push(j);
        k += 1;
    }

    CrossApproximation {
        a: a.subcols(0, k).to_owned(),
        b: b.subcols(0, k).to_owned(),
        row_pivots,
        col_pivots,
    }
}

/// Scans the residual column by column and returns the pivot position, its
/// magnitude and the Frobenius norm of the residual.
fn find_full_pivot(residual: MatRef<f64>) -> (usize, usize, f64, f64) {
    let mut pivot = (0, 0);
    let mut max_value = 0.0;
    let mut norm_sqr = 0.0;

    for j in 0..residual.ncols() {
        for i in 0..residual.nrows() {
            let value = residual[(i, j)].abs();
            norm_sqr += value * value;
            if value > max_value {
                max_value = value;
                pivot = (i, j);
            }
        }
    }

    (pivot.0, pivot.1, max_value, norm_sqr.sqrt())
}

/// Change of `||A_k B_k^T||_F^2` caused by appending column `k`:
/// `|a_k|^2 |b_k|^2 + 2 * sum_{l<k} <a_l, a_k> <b_l, b_k>`.
fn approximation_norm_increment(a: &Mat<f64>, b: &Mat<f64>, k: usize) -> f64 {
    let cross: f64 = (0..k)
        .map(|l| dot(a.col(l), a.col(k)) * dot(b.col(l), b.col(k)))
        .sum();

    dot(a.col(k), a.col(k)) * dot(b.col(k), b.col(k)) + 2.0 * cross
}

#[inline(always)]
fn dot(x: ColRef<f64>, y: ColRef<f64>) -> f64 {
    x.iter().zip(y.iter()).map(|(a, b)| a * b).sum()
}

/// Adaptive Cross Approximation (ACA) with partial pivoting
///
/// # Arguments
/// * `num_rows` - Number of rows in the target matrix
/// * `num_columns` - Number of columns in the target matrix
/// * `matrix_subset_generator` - Closure returning the sub-matrix for a set of
///   local row and column positions
/// * `epsilon` - Desired accuracy (Frobenius norm relative tolerance)
///
/// # Returns
/// The factors `A`, `B` with `M ≈ A * B^T` and the pivots. `A` is scaled so
/// that it equals one at each row pivot.
pub fn aca_partial_pivoting<F>(
    num_rows: usize,
    num_columns: usize,
    matrix_subset_generator: F,
    epsilon: &f64,
) -> CrossApproximation
where
    F: Fn(&[usize], &[usize]) -> Mat<f64>,
{
    let mut unused_rows = vec![true; num_rows];
    let mut unused_columns = vec![true; num_columns];

    let all_rows: Vec<usize> = (0..num_rows).collect();
    let all_columns: Vec<usize> = (0..num_columns).collect();

    let max_rank = num_rows.min(num_columns);

    // Relative tolerance on squared norms
    let tolerance = epsilon.powi(2);

    let mut a = Mat::<f64>::zeros(num_rows, max_rank);
    let mut b = Mat::<f64>::zeros(num_columns, max_rank);
    let mut row_pivots = Vec::with_capacity(max_rank);
    let mut col_pivots = Vec::with_capacity(max_rank);

    // Running estimate of ||A_k B_k^T||_F^2
    let mut approximation_norm = 0.0;

    let mut next_row = if num_rows > 0 { Some(0) } else { None };
    let mut converged = false;
    let mut k = 0;

    while k < max_rank {
        let Some(i) = next_row else {
            break;
        };
        unused_rows[i] = false;

        // Residual of row i
        let mut row = generator_row(&matrix_subset_generator, i, &all_columns);
        for l in 0..k {
            let ail = a[(i, l)];
            if ail != 0.0 {
                for c in 0..num_columns {
                    row[c] -= ail * b[(c, l)];
                }
            }
        }

        let Some(j) = argmax_masked(&row, &unused_columns) else {
            // The residual vanishes on this row, try the next untouched one
            next_row = unused_rows.iter().position(|&unused| unused);
            continue;
        };
        let pivot = row[j];
        unused_columns[j] = false;

        // Residual of column j, scaled so that it is one at row i
        let mut column = generator_column(&matrix_subset_generator, &all_rows, j);
        for l in 0..k {
            let bjl = b[(j, l)];
            if bjl != 0.0 {
                for r in 0..num_rows {
                    column[r] -= a[(r, l)] * bjl;
                }
            }
        }

        for r in 0..num_rows {
            a[(r, k)] = column[r] / pivot;
        }
        for c in 0..num_columns {
            b[(c, k)] = row[c];
        }

        let norm_a_b_2 = dot(a.col(k), a.col(k)) * dot(b.col(k), b.col(k));
        approximation_norm += approximation_norm_increment(&a, &b, k);

        row_pivots.push(i);
        col_pivots.push(j);
        k += 1;

        // Stopping criteria is:
        //   ||a_k||2 ||b_k||2 <= epsilon ||A_k B_k^T||F
        if norm_a_b_2 <= tolerance * approximation_norm {
            converged = true;
            break;
        }

        let scaled: Vec<f64> = (0..num_rows).map(|r| a[(r, k - 1)]).collect();
        next_row = argmax_masked(&scaled, &unused_rows)
            .or_else(|| unused_rows.iter().position(|&unused| unused));
    }

    if !converged && k == max_rank && max_rank > 1 {
        log::warn!(
            "partial ACA stopped at the rank cap {max_rank} of a {num_rows}x{num_columns} block before reaching {epsilon:e}"
        );
    }

    CrossApproximation {
        a: a.subcols(0, k).to_owned(),
        b: b.subcols(0, k).to_owned(),
        row_pivots,
        col_pivots,
    }
}

fn generator_row<F>(generator: &F, i: usize, columns: &[usize]) -> Vec<f64>
where
    F: Fn(&[usize], &[usize]) -> Mat<f64>,
{
    let values = generator(&[i], columns);
    (0..columns.len()).map(|c| values[(0, c)]).collect()
}

fn generator_column<F>(generator: &F, rows: &[usize], j: usize) -> Vec<f64>
where
    F: Fn(&[usize], &[usize]) -> Mat<f64>,
{
    let values = generator(rows, &[j]);
    (0..rows.len()).map(|r| values[(r, 0)]).collect()
}

/// Find the index of the maximum absolute value among the entries still
/// flagged in `mask`. Returns `None` when every candidate is zero or masked.
/// Ties resolve to the lowest index.
fn argmax_masked(data: &[f64], mask: &[bool]) -> Option<usize> {
    let mut max_index = None;
    let mut max_value = 0.0;

    for (idx, &value) in data.iter().enumerate() {
        if mask[idx] && value.abs() > max_value {
            max_value = value.abs();
            max_index = Some(idx);
        }
    }

    max_index
}

/// Replaces `A` by `A * RC^-1` where `RC = A[pivots, :]` is unit lower triangular.
///
/// After the solve `A[pivots, :]` is the identity, which turns the factor of
/// a full-pivoting ACA into an interpolation operator for its pivot rows.
pub fn normalize_at_pivots(a: &mut Mat<f64>, pivots: &[usize]) {
    let rank = pivots.len();
    if rank == 0 {
        return;
    }
    debug_assert_eq!(a.ncols(), rank);

    let rc = Mat::from_fn(rank, rank, |i, j| a[(pivots[i], j)]);

    // A RC^-1 = (RC^-T A^T)^T and RC^T is unit upper triangular
    solve_unit_upper_triangular_in_place(rc.transpose(), a.as_mut().transpose_mut(), Par::Seq);
}

/// Recompress a pair of low-rank factors using QR + SVD.
///
/// # Arguments
/// * `a` - Left factor (m × k)
/// * `b` - Right factor (n × k)
/// * `mode` - How the kept rank is chosen from the singular values
/// * `epsilon` - Truncation tolerance
///
/// # Returns
/// Factors `(A, B)` of the truncated approximation `A * B^T`. The left
/// factor carries the singular values.
pub fn truncate_factors(
    a: MatRef<f64>,
    b: MatRef<f64>,
    mode: &TruncationMode,
    epsilon: &f64,
) -> Result<(Mat<f64>, Mat<f64>), BemError> {
    let rank = a.ncols();
    if rank == 0 || a.nrows() == 0 || b.nrows() == 0 {
        return Ok((Mat::zeros(a.nrows(), 0), Mat::zeros(b.nrows(), 0)));
    }

    let a_qr = a.qr();
    let qa = a_qr.compute_thin_Q();
    let ra = a_qr.thin_R().to_owned();

    let b_qr = b.qr();
    let qb = b_qr.compute_thin_Q();
    let rb = b_qr.thin_R().to_owned();

    // SVD of the small core R_a * R_b^T
    let core = &ra * rb.transpose();
    let svd = core.svd().map_err(|_| BemError::SvdFailed)?;
    let u = svd.U();
    let s = svd.S().column_vector();
    let v = svd.V();

    let sigma: Vec<f64> = s.iter().cloned().collect();
    let new_rank = find_rank(&sigma, mode, epsilon);

    let new_a = &qa * (u.subcols(0, new_rank) * s.subrows(0, new_rank).as_diagonal());
    let new_b = &qb * v.subcols(0, new_rank);

    Ok((new_a, new_b))
}

/// Determines the rank kept from descending singular values.
///
/// * Euclidean, relative: the number of `sigma_i > epsilon * sigma_0`.
/// * Euclidean, absolute: the number of `sigma_i > epsilon`.
/// * Frobenius: the smallest `r` whose discarded tail satisfies
///   `sum_{i>=r} sigma_i^2 <= epsilon^2 * sum sigma_i^2` (relative) or
///   `<= epsilon^2` (absolute).
pub fn find_rank(sigma: &[f64], mode: &TruncationMode, epsilon: &f64) -> usize {
    if sigma.is_empty() {
        return 0;
    }

    match mode.norm {
        TruncationNorm::Euclidean => {
            let threshold = if mode.absolute {
                *epsilon
            } else {
                *epsilon * sigma[0]
            };
            sigma.iter().take_while(|&&s| s > threshold).count()
        }
        TruncationNorm::Frobenius => {
            let tail = inverse_cumulative_sum_of_squares(sigma);
            let threshold = if mode.absolute {
                epsilon * epsilon
            } else {
                tail[0] * epsilon * epsilon
            };
            tail.iter()
                .position(|&x| x <= threshold)
                .unwrap_or(sigma.len())
        }
    }
}

/// Compute reverse cumulative sum of squared singular values.
/// i.e., result[i] = sum_{j=i}^{n-1} sigma[j]^2
fn inverse_cumulative_sum_of_squares(sigma: &[f64]) -> Vec<f64> {
    let cumulative_sum_squared: Vec<f64> = sigma
        .iter()
        .rev()
        .scan(0.0, |acc, &x| {
            *acc += x * x;
            Some(*acc)
        })
        .collect();

    cumulative_sum_squared.into_iter().rev().collect()
}
