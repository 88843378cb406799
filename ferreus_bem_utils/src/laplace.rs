/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements collocation Laplace single and double layer kernels on a triangulated surface.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::surface::Surface;
use faer::{Mat, MatRef};
use ferreus_bem::{
    quadrature::{lagrange_derivative_matrix, lagrange_matrix},
    Capability, KernelCapability, NearfieldProvider,
};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

const KERNEL_CONST: f64 = 0.25 / PI;

/// The boundary integral operator a [`LaplaceKernel`] discretises.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LayerPotential {
    /// `∫ g(x, y) u(y) dy`
    SingleLayer,
    /// `∫ ∂/∂n_y g(x, y) u(y) dy`
    DoubleLayer,
}

/// Laplace layer potential with piecewise constant trial functions and
/// collocation in the triangle centroids.
///
/// Every integral over a triangle uses the one-point centroid rule. The
/// singular single layer self term integrates over the disc of equal area,
/// the double layer self term vanishes on flat triangles.
#[derive(Debug, Clone)]
pub struct LaplaceKernel {
    pub potential: LayerPotential,
    centroids: Mat<f64>,
    normals: Mat<f64>,
    areas: Vec<f64>,
}

#[inline(always)]
fn distance_vector(x: MatRef<f64>, i: usize, z: MatRef<f64>, j: usize) -> ([f64; 3], f64) {
    let d = [x[(i, 0)] - z[(j, 0)], x[(i, 1)] - z[(j, 1)], x[(i, 2)] - z[(j, 2)]];
    let r2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
    (d, r2)
}

/// `g(x, z) = 1 / (4π |x - z|)`
#[inline(always)]
fn slp(x: MatRef<f64>, i: usize, z: MatRef<f64>, j: usize) -> f64 {
    let (_, r2) = distance_vector(x, i, z, j);
    KERNEL_CONST / r2.sqrt()
}

/// `n · ∇_z g(x, z) = n · (x - z) / (4π |x - z|^3)`
#[inline(always)]
fn dlp(x: MatRef<f64>, i: usize, z: MatRef<f64>, n: MatRef<f64>, j: usize) -> f64 {
    let (d, r2) = distance_vector(x, i, z, j);
    let dot = d[0] * n[(j, 0)] + d[1] * n[(j, 1)] + d[2] * n[(j, 2)];
    KERNEL_CONST * dot / (r2 * r2.sqrt())
}

/// `m · ∇_x (n · ∇_y g(x, y))` with the normal `n` at `y` and `m` at `x`.
#[inline(always)]
fn hypersingular(x: MatRef<f64>, i: usize, m: MatRef<f64>, y: MatRef<f64>, n: MatRef<f64>, j: usize) -> f64 {
    let (d, r2) = distance_vector(x, i, y, j);
    let r3 = r2 * r2.sqrt();
    let nd = d[0] * n[(j, 0)] + d[1] * n[(j, 1)] + d[2] * n[(j, 2)];
    let md = d[0] * m[(i, 0)] + d[1] * m[(i, 1)] + d[2] * m[(i, 2)];
    let mn = (0..3).map(|k| m[(i, k)] * n[(j, k)]).sum::<f64>();
    KERNEL_CONST * (mn / r3 - 3.0 * nd * md / (r3 * r2))
}

impl LaplaceKernel {
    pub fn new(surface: &Surface, potential: LayerPotential) -> Self {
        LaplaceKernel {
            potential,
            centroids: surface.centroid_matrix(),
            normals: surface.normal_matrix(),
            areas: surface.areas.clone(),
        }
    }

    pub fn single_layer(surface: &Surface) -> Self {
        Self::new(surface, LayerPotential::SingleLayer)
    }

    pub fn double_layer(surface: &Surface) -> Self {
        Self::new(surface, LayerPotential::DoubleLayer)
    }

    /// Number of degrees of freedom (triangles).
    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    fn entry(&self, i: usize, j: usize) -> f64 {
        let c = self.centroids.as_ref();
        match (self.potential, i == j) {
            (LayerPotential::SingleLayer, true) => 0.5 * (self.areas[j] / PI).sqrt(),
            (LayerPotential::SingleLayer, false) => self.areas[j] * slp(c, i, c, j),
            (LayerPotential::DoubleLayer, true) => 0.0,
            // ∂/∂n_y g(x, y) = n_y · ∇_y g(x, y)
            (LayerPotential::DoubleLayer, false) => self.areas[j] * dlp(c, i, c, self.normals.as_ref(), j),
        }
    }

    fn select(&self, m: &Mat<f64>, idx: &[usize]) -> Mat<f64> {
        Mat::from_fn(idx.len(), 3, |r, d| m[(idx[r], d)])
    }

    /// Column side weights: the triangle area times the normal derivative
    /// the operator applies to its trial functions.
    fn column_integral<F>(&self, idx: &[usize], z: MatRef<f64>, f: F) -> Mat<f64>
    where
        F: Fn(MatRef<f64>, usize, MatRef<f64>, MatRef<f64>, usize) -> f64,
    {
        let y = self.select(&self.centroids, idx);
        let n = self.select(&self.normals, idx);
        Mat::from_fn(idx.len(), z.nrows(), |r, j| {
            self.areas[idx[r]] * f(y.as_ref(), r, n.as_ref(), z, j)
        })
    }
}

impl KernelCapability for LaplaceKernel {
    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    fn fundamental(&self, x: MatRef<f64>, y: MatRef<f64>) -> Mat<f64> {
        Mat::from_fn(x.nrows(), y.nrows(), |i, j| slp(x, i, y, j))
    }

    fn fundamental_row(&self, idx: &[usize], z: MatRef<f64>) -> Mat<f64> {
        let x = self.select(&self.centroids, idx);
        self.fundamental(x.as_ref(), z)
    }

    fn dnz_fundamental_row(&self, idx: &[usize], z: MatRef<f64>, n: MatRef<f64>) -> Mat<f64> {
        let x = self.select(&self.centroids, idx);
        Mat::from_fn(idx.len(), z.nrows(), |i, j| dlp(x.as_ref(), i, z, n, j))
    }

    fn kernel_row(&self, idx: &[usize], z: MatRef<f64>) -> Mat<f64> {
        // Collocation rows carry no derivative for either potential
        self.fundamental_row(idx, z)
    }

    fn kernel_col(&self, idx: &[usize], z: MatRef<f64>) -> Mat<f64> {
        match self.potential {
            LayerPotential::SingleLayer => self.column_integral(idx, z, |y, r, _, z, j| slp(z, j, y, r)),
            // n_y · ∇_y g(z, y) = n_y · (z - y) / (4π |z - y|^3)
            LayerPotential::DoubleLayer => self.column_integral(idx, z, |y, r, n, z, j| {
                let (d, r2) = distance_vector(z, j, y, r);
                let dot = d[0] * n[(r, 0)] + d[1] * n[(r, 1)] + d[2] * n[(r, 2)];
                KERNEL_CONST * dot / (r2 * r2.sqrt())
            }),
        }
    }

    fn dnz_kernel_col(&self, idx: &[usize], z: MatRef<f64>, n: MatRef<f64>) -> Mat<f64> {
        match self.potential {
            LayerPotential::SingleLayer => self.column_integral(idx, z, |y, r, _, z, j| dlp(y, r, z, n, j)),
            LayerPotential::DoubleLayer => {
                self.column_integral(idx, z, |y, r, ny, z, j| hypersingular(z, j, n, y, ny, r))
            }
        }
    }

    fn lagrange_row(&self, idx: &[usize], px: &[f64], py: &[f64], pz: &[f64]) -> Mat<f64> {
        lagrange_matrix(self.select(&self.centroids, idx).as_ref(), px, py, pz)
    }

    fn lagrange_col(&self, idx: &[usize], px: &[f64], py: &[f64], pz: &[f64]) -> Mat<f64> {
        let y = self.select(&self.centroids, idx);
        let mut l = match self.potential {
            LayerPotential::SingleLayer => lagrange_matrix(y.as_ref(), px, py, pz),
            LayerPotential::DoubleLayer => {
                let n = self.select(&self.normals, idx);
                lagrange_derivative_matrix(y.as_ref(), n.as_ref(), px, py, pz)
            }
        };
        for (r, &i) in idx.iter().enumerate() {
            for c in 0..l.ncols() {
                l[(r, c)] *= self.areas[i];
            }
        }
        l
    }
}

impl NearfieldProvider for LaplaceKernel {
    fn nearfield(&self, ridx: &[usize], cidx: &[usize]) -> Mat<f64> {
        let rows: Vec<Vec<f64>> = ridx
            .par_iter()
            .map(|&i| cidx.iter().map(|&j| self.entry(i, j)).collect())
            .collect();
        Mat::from_fn(ridx.len(), cidx.len(), |r, c| rows[r][c])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn single_layer_of_constant_density_is_one_on_the_sphere() {
        // ∫ g(x, y) dy = 1 for |x| = 1
        let sphere = Surface::unit_sphere(3);
        let kernel = LaplaceKernel::single_layer(&sphere);
        let idx: Vec<usize> = (0..kernel.len()).collect();
        let m = kernel.nearfield(&idx, &idx);
        for i in (0..kernel.len()).step_by(29) {
            assert!(m[(i, i)] > 0.0);
            let row_sum: f64 = (0..kernel.len()).map(|j| m[(i, j)]).sum();
            assert!((row_sum - 1.0).abs() < 0.1, "{row_sum}");
        }
    }

    #[test]
    fn double_layer_reproduces_gauss_integral() {
        // ∫ ∂/∂n_y g(x, y) dy = -1/2 for x on a smooth closed surface; the
        // centroid rule recovers it only approximately on a coarse mesh
        let sphere = Surface::unit_sphere(3);
        let kernel = LaplaceKernel::double_layer(&sphere);
        let idx: Vec<usize> = (0..kernel.len()).collect();
        let m = kernel.nearfield(&idx, &idx);
        for i in (0..kernel.len()).step_by(37) {
            let row_sum: f64 = (0..kernel.len()).map(|j| m[(i, j)]).sum();
            assert!((row_sum + 0.5).abs() < 0.1, "{row_sum}");
        }
    }

    #[test]
    fn column_evaluations_match_entries() {
        let sphere = Surface::unit_sphere(2);
        let far = faer::mat![[3.0, 0.5, -0.2], [0.1, -4.0, 1.0]];
        let normals = faer::mat![[0.0, 0.6, 0.8], [1.0, 0.0, 0.0]];
        let idx = [0, 7, 31];

        for kernel in [LaplaceKernel::single_layer(&sphere), LaplaceKernel::double_layer(&sphere)] {
            let col = kernel.kernel_col(&idx, far.as_ref());

            // Finite differences of kernel_col along the normals give dnz_kernel_col
            let h = 1e-5;
            let shifted = Mat::from_fn(2, 3, |j, d| far[(j, d)] + h * normals[(j, d)]);
            let col_shifted = kernel.kernel_col(&idx, shifted.as_ref());
            let derivative = kernel.dnz_kernel_col(&idx, far.as_ref(), normals.as_ref());
            for r in 0..idx.len() {
                for j in 0..2 {
                    let fd = (col_shifted[(r, j)] - col[(r, j)]) / h;
                    assert_relative_eq!(fd, derivative[(r, j)], max_relative = 1e-3, epsilon = 1e-9);
                }
            }
        }
    }

    #[test]
    fn row_derivative_matches_finite_difference() {
        let sphere = Surface::unit_sphere(1);
        let kernel = LaplaceKernel::single_layer(&sphere);
        let idx = [2, 5];
        let z = faer::mat![[2.0, 1.0, 0.5]];
        let n = faer::mat![[0.0, 0.0, 1.0]];
        let h = 1e-6;
        let z_shifted = faer::mat![[2.0, 1.0, 0.5 + h]];

        let base = kernel.fundamental_row(&idx, z.as_ref());
        let shifted = kernel.fundamental_row(&idx, z_shifted.as_ref());
        let derivative = kernel.dnz_fundamental_row(&idx, z.as_ref(), n.as_ref());
        for r in 0..idx.len() {
            assert_relative_eq!((shifted[(r, 0)] - base[(r, 0)]) / h, derivative[(r, 0)], max_relative = 1e-4);
        }
    }
}
