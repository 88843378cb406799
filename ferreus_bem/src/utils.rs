/////////////////////////////////////////////////////////////////////////////////////////////
//
// Provides utility routines for row selection, block concatenation and index permutation.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use faer::{Mat, MatRef};

#[inline(always)]
pub fn select_mat_rows(existing_mat: MatRef<f64>, row_indices: &[usize]) -> Mat<f64> {
    Mat::from_fn(row_indices.len(), existing_mat.ncols(), |i, j| {
        existing_mat[(row_indices[i], j)]
    })
}

/// `[left | right]`. Both sides must have the same number of rows.
pub fn hcat(left: MatRef<f64>, right: MatRef<f64>) -> Mat<f64> {
    debug_assert_eq!(left.nrows(), right.nrows());
    let split = left.ncols();
    Mat::from_fn(left.nrows(), split + right.ncols(), |i, j| {
        if j < split {
            left[(i, j)]
        } else {
            right[(i, j - split)]
        }
    })
}

/// `-m`
pub fn negated(m: MatRef<f64>) -> Mat<f64> {
    Mat::from_fn(m.nrows(), m.ncols(), |i, j| -m[(i, j)])
}

/// Stacks equally wide blocks on top of each other.
pub fn vcat(blocks: &[MatRef<f64>], ncols: usize) -> Mat<f64> {
    let nrows: usize = blocks.iter().map(|b| b.nrows()).sum();
    let mut result = Mat::<f64>::zeros(nrows, ncols);
    let mut offset = 0;
    for block in blocks {
        debug_assert_eq!(block.ncols(), ncols);
        result
            .as_mut()
            .submatrix_mut(offset, 0, block.nrows(), ncols)
            .copy_from(*block);
        offset += block.nrows();
    }
    result
}

/// Gathers `x` into cluster tree order: `result[k] = x[idx[k]]`.
pub fn permute_forward(x: &[f64], idx: &[usize]) -> Vec<f64> {
    idx.iter().map(|&i| x[i]).collect()
}

/// Scatters a vector in cluster tree order back to global order.
pub fn permute_backward(y: &[f64], idx: &[usize]) -> Vec<f64> {
    let mut result = vec![0.0; y.len()];
    for (k, &i) in idx.iter().enumerate() {
        result[i] = y[k];
    }
    result
}

/// `y += m * x`
#[inline(always)]
pub fn gemv_add(m: MatRef<f64>, x: &[f64], y: &mut [f64]) {
    for j in 0..m.ncols() {
        let xj = x[j];
        if xj != 0.0 {
            for i in 0..m.nrows() {
                y[i] += m[(i, j)] * xj;
            }
        }
    }
}

/// `y += m^T * x`
#[inline(always)]
pub fn gemv_transposed_add(m: MatRef<f64>, x: &[f64], y: &mut [f64]) {
    for j in 0..m.ncols() {
        y[j] += (0..m.nrows()).map(|i| m[(i, j)] * x[i]).sum::<f64>();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::mat;

    #[test]
    fn concatenation_keeps_block_layout() {
        let a = mat![[1.0], [2.0]];
        let b = mat![[3.0, 4.0], [5.0, 6.0]];
        let c = hcat(a.as_ref(), b.as_ref());
        assert_eq!(c, mat![[1.0, 3.0, 4.0], [2.0, 5.0, 6.0]]);

        let d = vcat(&[b.as_ref(), c.as_ref().subcols(0, 2)], 2);
        assert_eq!(d, mat![[3.0, 4.0], [5.0, 6.0], [1.0, 3.0], [2.0, 5.0]]);
    }

    #[test]
    fn permutations_are_inverse() {
        let idx = [2, 0, 3, 1];
        let x = [10.0, 11.0, 12.0, 13.0];
        let forward = permute_forward(&x, &idx);
        assert_eq!(forward, vec![12.0, 10.0, 13.0, 11.0]);
        assert_eq!(permute_backward(&forward, &idx), x.to_vec());
    }

    #[test]
    fn matrix_vector_helpers() {
        let m = mat![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let mut y = vec![1.0; 3];
        gemv_add(m.as_ref(), &[1.0, -1.0], &mut y);
        assert_eq!(y, vec![0.0, 0.0, 0.0]);

        let mut z = vec![0.0; 2];
        gemv_transposed_add(m.as_ref(), &[1.0, 0.0, 1.0], &mut z);
        assert_eq!(z, vec![6.0, 8.0]);
    }
}
