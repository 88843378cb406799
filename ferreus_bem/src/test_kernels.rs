/////////////////////////////////////////////////////////////////////////////////////////////
//
// Point evaluation Laplace kernel used by the unit tests.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    cluster::{ClusterGeometry, ClusterTree},
    quadrature::lagrange_matrix,
    traits::{Capability, KernelCapability, NearfieldProvider},
    utils::select_mat_rows,
};
use faer::{Mat, MatRef};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::f64::consts::PI;

/// `1 / (4π|x - y|)` sampled at row and column points. Coinciding points give zero.
pub struct PointKernel {
    pub rows: Mat<f64>,
    pub cols: Mat<f64>,
}

fn laplace(x: MatRef<f64>, i: usize, y: MatRef<f64>, j: usize) -> f64 {
    let r2: f64 = (0..3).map(|d| (x[(i, d)] - y[(j, d)]).powi(2)).sum();
    if r2 == 0.0 {
        0.0
    } else {
        1.0 / (4.0 * PI * r2.sqrt())
    }
}

/// `n_j · ∇_z g(x_i, z_j)`
fn laplace_dn(x: MatRef<f64>, i: usize, z: MatRef<f64>, n: MatRef<f64>, j: usize) -> f64 {
    let d: [f64; 3] = std::array::from_fn(|k| x[(i, k)] - z[(j, k)]);
    let r2: f64 = d.iter().map(|v| v * v).sum();
    if r2 == 0.0 {
        return 0.0;
    }
    let dot: f64 = (0..3).map(|k| d[k] * n[(j, k)]).sum();
    dot / (4.0 * PI * r2 * r2.sqrt())
}

impl PointKernel {
    pub fn random_cube(n: usize, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let points = Mat::from_fn(n, 3, |_, _| rng.random_range(0.0..1.0));
        PointKernel {
            rows: points.clone(),
            cols: points,
        }
    }

    /// Row points in the unit cube, column points in a unit cube shifted by `1 + gap` along x.
    pub fn two_cubes(n_rows: usize, n_cols: usize, gap: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let rows = Mat::from_fn(n_rows, 3, |_, _| rng.random_range(0.0..1.0));
        let cols = Mat::from_fn(n_cols, 3, |_, d| {
            rng.random_range(0.0..1.0) + if d == 0 { 1.0 + gap } else { 0.0 }
        });
        PointKernel { rows, cols }
    }

    pub fn trees(&self, leaf_size: usize) -> (ClusterTree, ClusterTree) {
        (
            ClusterTree::build_adaptive(&ClusterGeometry::from_points(self.rows.clone()), leaf_size),
            ClusterTree::build_adaptive(&ClusterGeometry::from_points(self.cols.clone()), leaf_size),
        )
    }

    pub fn dense(&self) -> Mat<f64> {
        let ridx: Vec<usize> = (0..self.rows.nrows()).collect();
        let cidx: Vec<usize> = (0..self.cols.nrows()).collect();
        self.nearfield(&ridx, &cidx)
    }
}

impl KernelCapability for PointKernel {
    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    fn fundamental(&self, x: MatRef<f64>, y: MatRef<f64>) -> Mat<f64> {
        Mat::from_fn(x.nrows(), y.nrows(), |i, j| laplace(x, i, y, j))
    }

    fn fundamental_row(&self, idx: &[usize], z: MatRef<f64>) -> Mat<f64> {
        let x = select_mat_rows(self.rows.as_ref(), idx);
        self.fundamental(x.as_ref(), z)
    }

    fn dnz_fundamental_row(&self, idx: &[usize], z: MatRef<f64>, n: MatRef<f64>) -> Mat<f64> {
        let x = select_mat_rows(self.rows.as_ref(), idx);
        Mat::from_fn(idx.len(), z.nrows(), |i, j| laplace_dn(x.as_ref(), i, z, n, j))
    }

    fn kernel_row(&self, idx: &[usize], z: MatRef<f64>) -> Mat<f64> {
        self.fundamental_row(idx, z)
    }

    fn kernel_col(&self, idx: &[usize], z: MatRef<f64>) -> Mat<f64> {
        let y = select_mat_rows(self.cols.as_ref(), idx);
        self.fundamental(y.as_ref(), z)
    }

    fn dnz_kernel_col(&self, idx: &[usize], z: MatRef<f64>, n: MatRef<f64>) -> Mat<f64> {
        let y = select_mat_rows(self.cols.as_ref(), idx);
        Mat::from_fn(idx.len(), z.nrows(), |i, j| laplace_dn(y.as_ref(), i, z, n, j))
    }

    fn lagrange_row(&self, idx: &[usize], px: &[f64], py: &[f64], pz: &[f64]) -> Mat<f64> {
        lagrange_matrix(select_mat_rows(self.rows.as_ref(), idx).as_ref(), px, py, pz)
    }

    fn lagrange_col(&self, idx: &[usize], px: &[f64], py: &[f64], pz: &[f64]) -> Mat<f64> {
        lagrange_matrix(select_mat_rows(self.cols.as_ref(), idx).as_ref(), px, py, pz)
    }
}

impl NearfieldProvider for PointKernel {
    fn nearfield(&self, ridx: &[usize], cidx: &[usize]) -> Mat<f64> {
        Mat::from_fn(ridx.len(), cidx.len(), |i, j| {
            laplace(self.rows.as_ref(), ridx[i], self.cols.as_ref(), cidx[j])
        })
    }
}
