/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares the error type shared by configuration, assembly and conversion routines.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::traits::Capability;
use thiserror::Error;

/// Errors that can occur while configuring or running an assembly.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BemError {
    /// An accuracy parameter was zero, negative or not finite.
    #[error("accuracy parameter `{name}` must be positive, got {value}")]
    NonPositiveAccuracy { name: &'static str, value: f64 },

    /// An interpolation or quadrature order of zero was requested.
    #[error("order parameter `{name}` must be at least 1")]
    InvalidOrder { name: &'static str },

    /// The Green quadrature was asked for zero segments.
    #[error("the Green quadrature needs at least one segment per face direction")]
    InvalidSegments,

    /// The Green offset factor must be positive and finite.
    #[error("the Green offset factor must be positive, got {0}")]
    InvalidOffset(f64),

    /// The kernel does not provide an evaluation the selected scheme relies on.
    #[error("scheme `{scheme}` requires the kernel capability {capability:?}")]
    MissingCapability {
        scheme: &'static str,
        capability: Capability,
    },

    /// The active scheme cannot fill the requested matrix representation.
    #[error("scheme `{scheme}` cannot assemble a {representation}")]
    UnsupportedAssembly {
        scheme: &'static str,
        representation: &'static str,
    },

    /// An optional assembly step was requested without its accuracy.
    #[error("the assembly requires the `{0}` parameter")]
    MissingParameter(&'static str),

    /// An assembly routine was called before `setup`.
    #[error("no approximation scheme has been configured")]
    NotConfigured,

    /// Vector or matrix dimensions do not fit the cluster trees.
    #[error("dimension mismatch: expected {expected}, got {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// The singular value decomposition did not converge.
    #[error("singular value decomposition failed to converge")]
    SvdFailed,
}
