/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares the kernel, near-field and parameterization capability traits.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::quadrature::GreenQuadrature;
use faer::{Mat, MatRef};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Individual kernel evaluations a far-field scheme may rely on.
///
/// Schemes declare which of these they need and [`crate::BemAssembler::setup`]
/// rejects a configuration whose kernel does not report support for all of them.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    /// Kernel between two point sets.
    Fundamental,
    /// Kernel between row basis functions and a point set.
    FundamentalRow,
    /// Normal derivative (at the points) of [`Capability::FundamentalRow`].
    DnzFundamentalRow,
    /// Operator kernel between row basis functions and a point set.
    KernelRow,
    /// Operator kernel between a point set and column basis functions.
    KernelCol,
    /// Normal derivative (at the points) of [`Capability::KernelCol`].
    DnzKernelCol,
    /// Row basis functions tested against tensor Lagrange polynomials.
    LagrangeRow,
    /// Column basis functions tested against tensor Lagrange polynomials.
    LagrangeCol,
}

fn missing(capability: Capability) -> ! {
    panic!("kernel does not provide {capability:?}; the scheme should have been rejected at setup")
}

/// Evaluates the analytic kernel of a boundary integral operator.
///
/// Point sets and normals are `n × 3` matrices. Index slices refer to the
/// global degrees of freedom of the discretisation. All returned matrices have
/// one row per index (or per point of the first argument) and one column per
/// point of the second argument.
///
/// Only [`KernelCapability::supports`] is mandatory; every evaluation a
/// kernel does not implement keeps its default body, which panics.
pub trait KernelCapability: Send + Sync {
    /// Reports whether the kernel implements the given evaluation.
    fn supports(&self, capability: Capability) -> bool;

    /// `g(x_i, y_j)` for two point sets.
    fn fundamental(&self, x: MatRef<f64>, y: MatRef<f64>) -> Mat<f64> {
        let _ = (x, y);
        missing(Capability::Fundamental)
    }

    /// `∫ φ_i(x) g(x, z_j) dx` for row basis functions `φ_i`.
    fn fundamental_row(&self, idx: &[usize], z: MatRef<f64>) -> Mat<f64> {
        let _ = (idx, z);
        missing(Capability::FundamentalRow)
    }

    /// `∫ φ_i(x) ∂/∂n_j g(x, z_j) dx`; the normals carry the quadrature weights.
    fn dnz_fundamental_row(&self, idx: &[usize], z: MatRef<f64>, n: MatRef<f64>) -> Mat<f64> {
        let _ = (idx, z, n);
        missing(Capability::DnzFundamentalRow)
    }

    /// `∫ φ_i(x) k(x, z_j) dx` with the operator kernel `k`.
    fn kernel_row(&self, idx: &[usize], z: MatRef<f64>) -> Mat<f64> {
        let _ = (idx, z);
        missing(Capability::KernelRow)
    }

    /// `∫ ψ_i(y) k(z_j, y) dy` for column basis functions `ψ_i`.
    fn kernel_col(&self, idx: &[usize], z: MatRef<f64>) -> Mat<f64> {
        let _ = (idx, z);
        missing(Capability::KernelCol)
    }

    /// `∫ ψ_i(y) ∂/∂n_j k(z_j, y) dy`; the normals carry the quadrature weights.
    fn dnz_kernel_col(&self, idx: &[usize], z: MatRef<f64>, n: MatRef<f64>) -> Mat<f64> {
        let _ = (idx, z, n);
        missing(Capability::DnzKernelCol)
    }

    /// `∫ φ_i(x) L_ν(x) dx` for the tensor Lagrange polynomials on the axes
    /// `px`, `py`, `pz`. Column `ν` is ordered with `z` varying fastest.
    fn lagrange_row(&self, idx: &[usize], px: &[f64], py: &[f64], pz: &[f64]) -> Mat<f64> {
        let _ = (idx, px, py, pz);
        missing(Capability::LagrangeRow)
    }

    /// Column counterpart of [`KernelCapability::lagrange_row`], including any
    /// derivative the operator applies to its column basis.
    fn lagrange_col(&self, idx: &[usize], px: &[f64], py: &[f64], pz: &[f64]) -> Mat<f64> {
        let _ = (idx, px, py, pz);
        missing(Capability::LagrangeCol)
    }
}

/// Provides exact (singularity corrected) matrix entries.
///
/// Used for inadmissible blocks and as the entry oracle of the ACA based schemes.
pub trait NearfieldProvider: Send + Sync {
    /// Dense block with one row per `ridx` entry and one column per `cidx` entry.
    fn nearfield(&self, ridx: &[usize], cidx: &[usize]) -> Mat<f64>;

    /// The same block stored transposed (`|cidx| × |ridx|`).
    fn nearfield_transposed(&self, ridx: &[usize], cidx: &[usize]) -> Mat<f64> {
        self.nearfield(ridx, cidx).transpose().to_owned()
    }
}

/// Everything an assembler needs from a discretised operator.
pub trait BemKernel: KernelCapability + NearfieldProvider {}

impl<T: KernelCapability + NearfieldProvider> BemKernel for T {}

/// Builds the closed quadrature surface enclosing a cluster for Green's representation formula.
pub trait Parameterization: Send + Sync + Debug {
    /// Returns the quadrature points and the outward normals scaled by the
    /// quadrature weights of the surface enclosing the box `[bmin, bmax]`
    /// at distance `offset`.
    fn quadpoints(
        &self,
        rule: &GreenQuadrature,
        bmin: &[f64; 3],
        bmax: &[f64; 3],
        offset: f64,
    ) -> (Mat<f64>, Mat<f64>);

    /// Whether the offset is proportional to the largest box side (`true`)
    /// or to the box diagonal (`false`).
    fn scales_with_max_side(&self) -> bool {
        false
    }
}
