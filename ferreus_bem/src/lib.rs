/////////////////////////////////////////////////////////////////////////////////////////////
//
// Exposes the public API for the hierarchical boundary element matrix compression crate.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Hierarchical matrices for boundary element methods
//!
//! This crate assembles data-sparse approximations of the dense matrices that
//! arise from Galerkin and collocation discretisations of boundary integral
//! operators. Blocks of the matrix that describe interactions between
//! well-separated clusters of degrees of freedom are replaced by low-rank
//! factorisations; the remaining near-field blocks are stored densely.
//!
//! Two representations are supported:
//! - [`HMatrix`]: every admissible block stores its own factors `A B^T`.
//! - [`H2Matrix`]: admissible blocks share nested row and column cluster
//!   bases and only store a small coupling matrix.
//!
//! # Far-field schemes
//! - Tensor Chebyshev interpolation of the kernel
//! - Adaptive cross approximation with full or partial pivoting
//! - Hybrid cross approximation
//! - Green's representation formula on a quadrature surface around each
//!   cluster, optionally compressed by ACA ("greenhybrid") with nested and
//!   orthonormalised nested bases
//!
//! Flat matrices can be recompressed, coarsened, and converted into nested
//! ones by hierarchical compression.
//!
//! # Example
//!
//! ```ignore
//! use ferreus_bem::{
//!     ApproximationConfig, ApproximationScheme, BasisSide, BemAssembler, Block,
//!     ClusterGeometry, ClusterTree, GreenParams, HMatrix,
//! };
//!
//! // `kernel` implements `KernelCapability` and `NearfieldProvider`
//! let tree = ClusterTree::build_adaptive(&ClusterGeometry::from_points(centroids), 32);
//! let block = Block::build(&tree, &tree, 2.0);
//!
//! let mut assembler = BemAssembler::new(&kernel, &tree, &tree);
//! assembler.setup(
//!     ApproximationConfig::builder(ApproximationScheme::GreenHybrid {
//!         params: GreenParams::default(),
//!         accuracy: 1e-6,
//!         side: BasisSide::Mixed,
//!     })
//!     .build(),
//! )?;
//!
//! let mut h = HMatrix::from_block(&block, &tree, &tree);
//! assembler.fill_hmatrix(&mut h)?;
//! let y = h.apply(&tree, &tree, &x)?;
//! ```
//!
//! # References
//! 1. Börm, S., Christophersen, S. (2016). Approximation of integral operators
//!    by Green quadrature and nested cross approximation. *Numerische Mathematik*, **133**, 409–442.
//! 2. Bebendorf, M. (2000). Approximation of boundary element matrices.
//!    *Numerische Mathematik*, **86**, 565–589.
//! 3. Börm, S., Grasedyck, L. (2005). Hybrid cross approximation of integral operators.
//!    *Numerische Mathematik*, **101**, 221–249.

pub mod aca;

mod assemble;

pub mod block;

pub mod cluster;

pub mod config;

mod error;

pub mod green;

pub mod hiercomp;

pub mod matrices;

pub mod nested;

pub mod progress;

pub mod quadrature;

pub mod schemes;

pub mod traits;

mod utils;

#[cfg(test)]
mod test_kernels;

#[doc(inline)]
pub use {
    assemble::BemAssembler,
    block::{Block, BlockKind},
    cluster::{Cluster, ClusterGeometry, ClusterTree},
    config::{
        ApproximationConfig, ApproximationConfigBuilder, ApproximationScheme, BasisSide,
        GreenParams, HierarchicalCompression, SurfaceParameterization, TruncationMode,
        TruncationNorm,
    },
    error::BemError,
    hiercomp::convert_hmatrix,
    matrices::{ClusterBasis, H2Matrix, HMatrix, RkMatrix},
    progress::{closure_sink, AssemblyProgress, ProgressSink},
    quadrature::{CubeParameterization, GreenQuadrature},
    traits::{BemKernel, Capability, KernelCapability, NearfieldProvider, Parameterization},
    utils::{permute_backward, permute_forward},
};
