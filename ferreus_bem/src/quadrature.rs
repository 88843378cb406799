/////////////////////////////////////////////////////////////////////////////////////////////
//
// Gauss-Legendre rules, the cube surface parameterization and tensor Chebyshev interpolation.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::traits::Parameterization;
use faer::{Mat, MatRef};
use itertools::iproduct;
use std::f64::consts::PI;

/// Boxes thinner than this are widened before interpolation points are placed.
const MIN_BOX_WIDTH: f64 = 1e-12;

/// Computes the `order` point Gauss-Legendre rule on [-1, 1].
///
/// Nodes are returned in ascending order.
pub fn gauss_legendre(order: usize) -> (Vec<f64>, Vec<f64>) {
    let mut nodes = vec![0.0; order];
    let mut weights = vec![0.0; order];
    let n = order as f64;

    for i in 0..order {
        // Initial guess from the asymptotic root location
        let mut x = (PI * (i as f64 + 0.75) / (n + 0.5)).cos();

        for _ in 0..100 {
            let (p, dp) = legendre_with_derivative(order, x);
            let step = p / dp;
            x -= step;
            if step.abs() <= 1e-15 {
                break;
            }
        }
        let derivative = legendre_with_derivative(order, x).1;

        nodes[order - 1 - i] = x;
        weights[order - 1 - i] = 2.0 / ((1.0 - x * x) * derivative * derivative);
    }

    (nodes, weights)
}

/// Evaluates `P_n(x)` and `P_n'(x)` with the three term recurrence.
fn legendre_with_derivative(order: usize, x: f64) -> (f64, f64) {
    let mut p0 = 1.0;
    let mut p1 = x;
    if order == 0 {
        return (1.0, 0.0);
    }
    for k in 2..=order {
        let k = k as f64;
        let p2 = ((2.0 * k - 1.0) * x * p1 - (k - 1.0) * p0) / k;
        p0 = p1;
        p1 = p2;
    }
    let dp = order as f64 * (x * p1 - p0) / (x * x - 1.0);
    (p1, dp)
}

/// Composite Gauss rule used on each face direction of Green's quadrature surface.
///
/// `[-1, 1]` is split into `segments` equal parts with an `order` point rule on each.
#[derive(Debug, Clone)]
pub struct GreenQuadrature {
    pub order: usize,
    pub segments: usize,
    /// Nodes in [-1, 1].
    pub t: Vec<f64>,
    /// Weights, summing to 2.
    pub w: Vec<f64>,
}

impl GreenQuadrature {
    pub fn new(order: usize, segments: usize) -> Self {
        let (ht, hw) = gauss_legendre(order);
        let h = 1.0 / segments as f64;

        let mut t = Vec::with_capacity(order * segments);
        let mut w = Vec::with_capacity(order * segments);
        for s in 0..segments {
            let mid = -1.0 + (2 * s + 1) as f64 * h;
            for (x, weight) in ht.iter().zip(hw.iter()) {
                t.push(h * x + mid);
                w.push(h * weight);
            }
        }

        GreenQuadrature {
            order,
            segments,
            t,
            w,
        }
    }

    /// Number of points in one direction.
    pub fn len(&self) -> usize {
        self.t.len()
    }

    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Upper bound of the rank of Green's formula on the cube: both the single
    /// and double layer part contribute `6 * (order * segments)^2` columns.
    pub fn rank_bound(&self) -> usize {
        12 * self.len() * self.len()
    }
}

/// The boundary of the cluster box enlarged by the offset on every side.
#[derive(Debug, Copy, Clone, Default)]
pub struct CubeParameterization;

/// One face of the cube: the fixed axis, its outward sign and the two tangent axes.
struct CubeFace {
    axis: usize,
    outward: f64,
    tangents: [usize; 2],
}

const CUBE_FACES: [CubeFace; 6] = [
    CubeFace { axis: 2, outward: -1.0, tangents: [0, 1] },
    CubeFace { axis: 0, outward: 1.0, tangents: [1, 2] },
    CubeFace { axis: 2, outward: 1.0, tangents: [0, 1] },
    CubeFace { axis: 0, outward: -1.0, tangents: [1, 2] },
    CubeFace { axis: 1, outward: -1.0, tangents: [0, 2] },
    CubeFace { axis: 1, outward: 1.0, tangents: [0, 2] },
];

impl Parameterization for CubeParameterization {
    fn quadpoints(
        &self,
        rule: &GreenQuadrature,
        bmin: &[f64; 3],
        bmax: &[f64; 3],
        offset: f64,
    ) -> (Mat<f64>, Mat<f64>) {
        let n = rule.len();
        let num_points = 6 * n * n;
        let mut points = Mat::<f64>::zeros(num_points, 3);
        let mut normals = Mat::<f64>::zeros(num_points, 3);

        let center: [f64; 3] = std::array::from_fn(|d| 0.5 * (bmin[d] + bmax[d]));
        let extent: [f64; 3] = std::array::from_fn(|d| bmax[d] - bmin[d] + 2.0 * offset);

        let mut row = 0;
        for face in CUBE_FACES.iter() {
            let [t1, t2] = face.tangents;
            let velo = extent[t1] * extent[t2] / 4.0;
            let position = if face.outward < 0.0 {
                bmin[face.axis] - offset
            } else {
                bmax[face.axis] + offset
            };

            for (mu1, mu2) in iproduct!(0..n, 0..n) {
                points[(row, face.axis)] = position;
                points[(row, t1)] = center[t1] + extent[t1] * rule.t[mu1] * 0.5;
                points[(row, t2)] = center[t2] + extent[t2] * rule.t[mu2] * 0.5;
                normals[(row, face.axis)] = face.outward * velo * rule.w[mu1] * rule.w[mu2];
                row += 1;
            }
        }

        (points, normals)
    }

    fn scales_with_max_side(&self) -> bool {
        true
    }
}

/// Chebyshev nodes `cos(π(2i+1)/(2m))` on [-1, 1].
pub fn chebyshev_nodes(order: usize) -> Vec<f64> {
    (0..order)
        .map(|i| (PI * (2 * i + 1) as f64 / (2 * order) as f64).cos())
        .collect()
}

/// Tensor Chebyshev grid of a box, stored as its three axes.
#[derive(Debug, Clone)]
pub struct InterpolationGrid {
    pub px: Vec<f64>,
    pub py: Vec<f64>,
    pub pz: Vec<f64>,
}

impl InterpolationGrid {
    /// Maps the Chebyshev nodes of the given order onto `[bmin, bmax]`.
    pub fn new(order: usize, bmin: &[f64; 3], bmax: &[f64; 3]) -> Self {
        let nodes = chebyshev_nodes(order);
        let axis = |d: usize| -> Vec<f64> {
            let (mut lo, mut hi) = (bmin[d], bmax[d]);
            if hi - lo < MIN_BOX_WIDTH {
                lo -= MIN_BOX_WIDTH;
                hi += MIN_BOX_WIDTH;
            }
            let mid = 0.5 * (lo + hi);
            let half = 0.5 * (hi - lo);
            nodes.iter().map(|x| mid + half * x).collect()
        };

        InterpolationGrid {
            px: axis(0),
            py: axis(1),
            pz: axis(2),
        }
    }

    /// Number of tensor points.
    pub fn len(&self) -> usize {
        self.px.len() * self.py.len() * self.pz.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The tensor points as an `m^3 × 3` matrix, `x` outermost and `z` fastest.
    pub fn points(&self) -> Mat<f64> {
        let mut points = Mat::<f64>::zeros(self.len(), 3);
        for (row, (x, y, z)) in iproduct!(self.px.iter(), self.py.iter(), self.pz.iter()).enumerate() {
            points[(row, 0)] = *x;
            points[(row, 1)] = *y;
            points[(row, 2)] = *z;
        }
        points
    }

    /// Tensor Lagrange polynomials of this grid evaluated at `points`.
    pub fn lagrange(&self, points: MatRef<f64>) -> Mat<f64> {
        lagrange_matrix(points, &self.px, &self.py, &self.pz)
    }
}

/// Weights `1 / Π_{b≠a} (p_a - p_b)` of the one dimensional Lagrange basis.
fn lagrange_denominators(axis: &[f64]) -> Vec<f64> {
    axis.iter()
        .enumerate()
        .map(|(a, pa)| {
            let product: f64 = axis
                .iter()
                .enumerate()
                .filter(|(b, _)| *b != a)
                .map(|(_, pb)| pa - pb)
                .product();
            1.0 / product
        })
        .collect()
}

fn lagrange_1d(axis: &[f64], denominators: &[f64], x: f64) -> Vec<f64> {
    (0..axis.len())
        .map(|a| {
            let numerator: f64 = axis
                .iter()
                .enumerate()
                .filter(|(b, _)| *b != a)
                .map(|(_, pb)| x - pb)
                .product();
            numerator * denominators[a]
        })
        .collect()
}

/// Evaluates the tensor Lagrange polynomials on the axes `px`, `py`, `pz` at
/// every row of `points` (`n × 3`). Column `ν = i·m_y·m_z + j·m_z + l`.
pub fn lagrange_matrix(points: MatRef<f64>, px: &[f64], py: &[f64], pz: &[f64]) -> Mat<f64> {
    let (dx, dy, dz) = (
        lagrange_denominators(px),
        lagrange_denominators(py),
        lagrange_denominators(pz),
    );
    let mut result = Mat::<f64>::zeros(points.nrows(), px.len() * py.len() * pz.len());

    for r in 0..points.nrows() {
        let lx = lagrange_1d(px, &dx, points[(r, 0)]);
        let ly = lagrange_1d(py, &dy, points[(r, 1)]);
        let lz = lagrange_1d(pz, &dz, points[(r, 2)]);
        for (col, (a, b, c)) in iproduct!(lx.iter(), ly.iter(), lz.iter()).enumerate() {
            result[(r, col)] = a * b * c;
        }
    }

    result
}

fn lagrange_1d_derivative(axis: &[f64], denominators: &[f64], x: f64) -> Vec<f64> {
    (0..axis.len())
        .map(|a| {
            let sum: f64 = (0..axis.len())
                .filter(|&c| c != a)
                .map(|c| {
                    axis.iter()
                        .enumerate()
                        .filter(|(b, _)| *b != a && *b != c)
                        .map(|(_, pb)| x - pb)
                        .product::<f64>()
                })
                .sum();
            sum * denominators[a]
        })
        .collect()
}

/// Directional derivatives `d_r · ∇L_ν(x_r)` of the tensor Lagrange
/// polynomials, with one direction per row of `directions`.
pub fn lagrange_derivative_matrix(
    points: MatRef<f64>,
    directions: MatRef<f64>,
    px: &[f64],
    py: &[f64],
    pz: &[f64],
) -> Mat<f64> {
    let (dx, dy, dz) = (
        lagrange_denominators(px),
        lagrange_denominators(py),
        lagrange_denominators(pz),
    );
    let mut result = Mat::<f64>::zeros(points.nrows(), px.len() * py.len() * pz.len());

    for r in 0..points.nrows() {
        let (x, y, z) = (points[(r, 0)], points[(r, 1)], points[(r, 2)]);
        let (lx, ly, lz) = (lagrange_1d(px, &dx, x), lagrange_1d(py, &dy, y), lagrange_1d(pz, &dz, z));
        let (gx, gy, gz) = (
            lagrange_1d_derivative(px, &dx, x),
            lagrange_1d_derivative(py, &dy, y),
            lagrange_1d_derivative(pz, &dz, z),
        );
        let d = [directions[(r, 0)], directions[(r, 1)], directions[(r, 2)]];

        for (col, (a, b, c)) in iproduct!(0..px.len(), 0..py.len(), 0..pz.len()).enumerate() {
            result[(r, col)] = d[0] * gx[a] * ly[b] * lz[c]
                + d[1] * lx[a] * gy[b] * lz[c]
                + d[2] * lx[a] * ly[b] * gz[c];
        }
    }

    result
}
