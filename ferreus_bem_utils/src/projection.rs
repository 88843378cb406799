/////////////////////////////////////////////////////////////////////////////////////////////
//
// L2 projections of boundary data onto piecewise constant and piecewise linear functions.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::surface::Surface;
use faer::{Mat, MatRef};
use rayon::prelude::*;

/// Function on the surface, evaluated at a point with the unit normal of the
/// triangle containing it.
pub trait BoundaryFunction: Fn(&[f64; 3], &[f64; 3]) -> f64 + Sync {}

impl<F: Fn(&[f64; 3], &[f64; 3]) -> f64 + Sync> BoundaryFunction for F {}

/// Edge midpoints of a triangle; the rule with weights `area / 3` is exact
/// for quadratic polynomials.
fn edge_midpoints(surface: &Surface, t: usize) -> [[f64; 3]; 3] {
    let [a, b, c] = surface.triangles[t].map(|v| surface.vertices[v]);
    let mid = |p: &[f64; 3], q: &[f64; 3]| -> [f64; 3] { std::array::from_fn(|d| 0.5 * (p[d] + q[d])) };
    [mid(&a, &b), mid(&b, &c), mid(&c, &a)]
}

/// L2 projection onto piecewise constants: the mean of `f` on every triangle.
pub fn projectl2_const<F: BoundaryFunction>(surface: &Surface, f: F) -> Vec<f64> {
    (0..surface.num_triangles())
        .into_par_iter()
        .map(|t| {
            let n = &surface.normals[t];
            edge_midpoints(surface, t)
                .iter()
                .map(|x| f(x, n))
                .sum::<f64>()
                / 3.0
        })
        .collect()
}

/// Applies the mass matrix of the piecewise linear (vertex) basis:
/// `area / 6` on the diagonal and `area / 12` between the corners of a triangle.
pub fn mass_linear(surface: &Surface, v2t: &[Vec<usize>], x: MatRef<f64>) -> Mat<f64> {
    let values: Vec<f64> = (0..surface.num_vertices())
        .into_par_iter()
        .map(|i| {
            v2t[i]
                .iter()
                .map(|&t| {
                    let area = surface.areas[t];
                    surface.triangles[t]
                        .iter()
                        .map(|&j| (if j == i { area / 6.0 } else { area / 12.0 }) * x[(j, 0)])
                        .sum::<f64>()
                })
                .sum()
        })
        .collect();
    Mat::from_fn(values.len(), 1, |i, _| values[i])
}

/// L2 projection onto piecewise linears.
///
/// The right-hand side `∫ f φ_i` is integrated with the edge midpoint rule,
/// the mass matrix system is solved with conjugate gradients down to the
/// relative residual `tolerance`.
pub fn projectl2_linear<F: BoundaryFunction>(
    surface: &Surface,
    v2t: &[Vec<usize>],
    f: F,
    tolerance: f64,
) -> Vec<f64> {
    let mut rhs = Mat::<f64>::zeros(surface.num_vertices(), 1);
    for t in 0..surface.num_triangles() {
        let n = &surface.normals[t];
        let [fab, fbc, fca] = edge_midpoints(surface, t).map(|x| f(&x, n));
        let [a, b, c] = surface.triangles[t];
        let w = surface.areas[t] / 3.0;
        // φ_a is 1/2 at the midpoints of ab and ca and zero at bc
        rhs[(a, 0)] += w * 0.5 * (fab + fca);
        rhs[(b, 0)] += w * 0.5 * (fab + fbc);
        rhs[(c, 0)] += w * 0.5 * (fbc + fca);
    }

    let mass = |x: &MatRef<f64>| mass_linear(surface, v2t, *x);
    let solution = conjugate_gradient(&mass, rhs.as_ref(), None, surface.num_vertices().max(1) * 4, tolerance);
    (0..solution.nrows()).map(|i| solution[(i, 0)]).collect()
}

fn squared_norm(v: &Mat<f64>) -> f64 {
    let norm = v.norm_l2();
    norm * norm
}

/// Conjugate gradient method for symmetric positive definite operators.
///
/// # Parameters
/// - `a`: Operator function A(x)
/// - `b`: Right-hand side vector
/// - `x0`: Optional initial guess
/// - `max_iterations`: Iteration limit
/// - `tolerance`: Stopping criterion on `||r|| / ||b||`
///
/// # Returns
/// - `x`: Approximate solution
pub fn conjugate_gradient<A>(
    a: &A,
    b: MatRef<f64>,
    x0: Option<&Mat<f64>>,
    max_iterations: usize,
    tolerance: f64,
) -> Mat<f64>
where
    A: Fn(&MatRef<f64>) -> Mat<f64>,
{
    let n = b.nrows();
    let mut x = x0.cloned().unwrap_or_else(|| Mat::zeros(n, 1));

    let beta = b.norm_l2();
    if beta == 0.0 {
        return Mat::zeros(n, 1);
    }

    let mut r = b - &a(&x.as_ref());
    let mut p = r.clone();
    let mut rr = squared_norm(&r);

    for iteration in 0..max_iterations {
        if rr.sqrt() <= tolerance * beta {
            log::debug!("conjugate gradient converged after {iteration} iterations");
            return x;
        }

        let ap = a(&p.as_ref());
        let pap: f64 = (0..n).map(|i| p[(i, 0)] * ap[(i, 0)]).sum();
        let alpha = rr / pap;

        x += &(p.clone() * alpha);
        r -= &(ap * alpha);

        let rr_next = squared_norm(&r);
        p = &r + &(p * (rr_next / rr));
        rr = rr_next;
    }

    log::warn!(
        "conjugate gradient stopped after {max_iterations} iterations at relative residual {:e}",
        rr.sqrt() / beta
    );
    x
}
