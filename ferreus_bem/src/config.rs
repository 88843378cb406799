/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares the approximation scheme selection, scheme parameters and truncation options.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Declares the approximation scheme selection, scheme parameters and truncation options.
use crate::{error::BemError, quadrature::CubeParameterization, traits::Parameterization};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Which cluster of a block provides the expansion of a row/column scheme.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum BasisSide {
    /// Expand around the row cluster.
    Row,

    /// Expand around the column cluster.
    Column,

    /// Decide per block, see [`crate::green::BasisSelector`].
    #[default]
    Mixed,
}

/// Norm used to decide how many singular values are kept.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TruncationNorm {
    /// Spectral norm: compare each singular value with the threshold.
    #[default]
    Euclidean,

    /// Frobenius norm: compare the discarded tail with the threshold.
    Frobenius,
}

/// Controls the rank chosen when a low-rank representation is truncated.
///
/// ### Default Values
/// - `norm`: `Euclidean`
/// - `absolute`: `false`
/// - `zeta_level`: `1.0`
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq)]
pub struct TruncationMode {
    /// The norm the truncation error is measured in.
    pub norm: TruncationNorm,

    /// Use `epsilon` as an absolute rather than a relative bound.
    pub absolute: bool,

    /// Per-level factor of the hierarchical compression. A cluster on level
    /// `l` of a tree of depth `d` is truncated with `epsilon * zeta_level^(l - d)`.
    pub zeta_level: f64,
}

impl Default for TruncationMode {
    fn default() -> Self {
        TruncationMode {
            norm: TruncationNorm::Euclidean,
            absolute: false,
            zeta_level: 1.0,
        }
    }
}

/// Quadrature surface used by the Green based schemes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub enum SurfaceParameterization {
    /// Axis aligned box around the cluster, six faces.
    #[default]
    Cube,

    /// User supplied surface.
    #[serde(skip)]
    Custom(Arc<dyn Parameterization>),
}

impl SurfaceParameterization {
    /// Returns the parameterization as a trait object.
    pub fn resolve(&self) -> Arc<dyn Parameterization> {
        match self {
            SurfaceParameterization::Cube => Arc::new(CubeParameterization),
            SurfaceParameterization::Custom(p) => p.clone(),
        }
    }
}

/// Parameters of Green's representation formula on the enclosing surface.
///
/// ### Default Values
/// - `order`: `4`
/// - `segments`: `1`
/// - `delta`: `0.5`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GreenParams {
    /// Gauss points per segment and face direction.
    pub order: usize,

    /// Number of segments each face direction is split into.
    pub segments: usize,

    /// Offset of the quadrature surface relative to the cluster diameter.
    pub delta: f64,

    /// The enclosing surface.
    pub parameterization: SurfaceParameterization,
}

impl Default for GreenParams {
    fn default() -> Self {
        GreenParams {
            order: 4,
            segments: 1,
            delta: 0.5,
            parameterization: SurfaceParameterization::Cube,
        }
    }
}

impl GreenParams {
    fn validate(&self) -> Result<(), BemError> {
        if self.order == 0 {
            return Err(BemError::InvalidOrder { name: "green order" });
        }
        if self.segments == 0 {
            return Err(BemError::InvalidSegments);
        }
        if !(self.delta.is_finite() && self.delta > 0.0) {
            return Err(BemError::InvalidOffset(self.delta));
        }
        Ok(())
    }
}

/// The far-field approximation scheme. Exactly one is active per assembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ApproximationScheme {
    /// Tensor Chebyshev interpolation of order `order` per direction.
    Interpolation { order: usize, side: BasisSide },

    /// Green's representation formula without further compression.
    Green { params: GreenParams, side: BasisSide },

    /// Full-pivoting ACA of the dense near-field block.
    Aca { accuracy: f64 },

    /// Partial-pivoting ACA driven by the near-field entry oracle.
    PartialAca { accuracy: f64 },

    /// Hybrid cross approximation on Chebyshev points.
    HybridCross { order: usize, accuracy: f64 },

    /// ACA on Green's formula to pick pivot indices, then exact entries.
    GreenHybrid {
        params: GreenParams,
        accuracy: f64,
        side: BasisSide,
    },

    /// Nested greenhybrid bases with orthonormalised transfer matrices.
    GreenHybridOrtho { params: GreenParams, accuracy: f64 },
}

impl ApproximationScheme {
    /// Short name used in log messages and errors.
    pub fn name(&self) -> &'static str {
        match self {
            ApproximationScheme::Interpolation { .. } => "interpolation",
            ApproximationScheme::Green { .. } => "green",
            ApproximationScheme::Aca { .. } => "aca",
            ApproximationScheme::PartialAca { .. } => "partial-aca",
            ApproximationScheme::HybridCross { .. } => "hybrid-cross",
            ApproximationScheme::GreenHybrid { .. } => "greenhybrid",
            ApproximationScheme::GreenHybridOrtho { .. } => "greenhybrid-ortho",
        }
    }

    fn validate(&self) -> Result<(), BemError> {
        match self {
            ApproximationScheme::Interpolation { order, .. } => validate_order(*order),
            ApproximationScheme::Green { params, .. } => params.validate(),
            ApproximationScheme::Aca { accuracy } | ApproximationScheme::PartialAca { accuracy } => {
                validate_accuracy("aca accuracy", *accuracy)
            }
            ApproximationScheme::HybridCross { order, accuracy } => {
                validate_order(*order)?;
                validate_accuracy("aca accuracy", *accuracy)
            }
            ApproximationScheme::GreenHybrid {
                params, accuracy, ..
            }
            | ApproximationScheme::GreenHybridOrtho { params, accuracy } => {
                params.validate()?;
                validate_accuracy("aca accuracy", *accuracy)
            }
        }
    }
}

fn validate_order(order: usize) -> Result<(), BemError> {
    if order == 0 {
        return Err(BemError::InvalidOrder {
            name: "interpolation order",
        });
    }
    Ok(())
}

fn validate_accuracy(name: &'static str, value: f64) -> Result<(), BemError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(BemError::NonPositiveAccuracy { name, value });
    }
    Ok(())
}

/// Settings of the conversion of a flat low-rank tree into a nested one.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq)]
pub struct HierarchicalCompression {
    /// Truncation accuracy before the level scaling.
    pub accuracy: f64,

    /// How ranks are chosen.
    pub mode: TruncationMode,
}

/// Complete configuration of an assembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApproximationConfig {
    /// The active far-field scheme.
    pub scheme: ApproximationScheme,

    /// Truncate every admissible block right after it has been filled.
    pub recompression: Option<f64>,

    /// Merge son blocks whose combined low-rank form is cheaper.
    pub coarsening: Option<f64>,

    /// Convert flat trees to nested ones with this accuracy and mode.
    pub hierarchical_compression: Option<HierarchicalCompression>,
}

impl ApproximationConfig {
    /// Returns a new [`ApproximationConfigBuilder`] for the given scheme.
    pub fn builder(scheme: ApproximationScheme) -> ApproximationConfigBuilder {
        ApproximationConfigBuilder::new(scheme)
    }

    /// Checks every numerical parameter.
    pub fn validate(&self) -> Result<(), BemError> {
        self.scheme.validate()?;
        if let Some(accuracy) = self.recompression {
            validate_accuracy("recompression accuracy", accuracy)?;
        }
        if let Some(accuracy) = self.coarsening {
            validate_accuracy("coarsening accuracy", accuracy)?;
        }
        if let Some(hiercomp) = &self.hierarchical_compression {
            validate_accuracy("hierarchical compression accuracy", hiercomp.accuracy)?;
            validate_accuracy("zeta level", hiercomp.mode.zeta_level)?;
        }
        Ok(())
    }
}

/// A convenience builder for constructing an [`ApproximationConfig`].
///
/// The builder should be called via the [`ApproximationConfig::builder`] method.
#[derive(Debug, Clone)]
pub struct ApproximationConfigBuilder {
    pub scheme: ApproximationScheme,
    pub recompression: Option<f64>,
    pub coarsening: Option<f64>,
    pub hierarchical_compression: Option<HierarchicalCompression>,
}

impl ApproximationConfigBuilder {
    fn new(scheme: ApproximationScheme) -> Self {
        Self {
            scheme,
            recompression: None,
            coarsening: None,
            hierarchical_compression: None,
        }
    }

    /// Truncates each far-field block at `accuracy` after assembly.
    pub fn recompression(mut self, accuracy: f64) -> Self {
        self.recompression = Some(accuracy);
        self
    }

    /// Enables coarsening at `accuracy`.
    pub fn coarsening(mut self, accuracy: f64) -> Self {
        self.coarsening = Some(accuracy);
        self
    }

    /// Enables hierarchical compression.
    pub fn hierarchical_compression(mut self, accuracy: f64, mode: TruncationMode) -> Self {
        self.hierarchical_compression = Some(HierarchicalCompression { accuracy, mode });
        self
    }

    /// Builds and returns an [`ApproximationConfig`] instance.
    pub fn build(self) -> ApproximationConfig {
        ApproximationConfig {
            scheme: self.scheme,
            recompression: self.recompression,
            coarsening: self.coarsening,
            hierarchical_compression: self.hierarchical_compression,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_positive_accuracy() {
        let config = ApproximationConfig::builder(ApproximationScheme::Aca { accuracy: 0.0 }).build();
        assert!(matches!(
            config.validate(),
            Err(BemError::NonPositiveAccuracy { .. })
        ));

        let config = ApproximationConfig::builder(ApproximationScheme::PartialAca { accuracy: 1e-4 })
            .recompression(-1.0)
            .build();
        assert!(matches!(
            config.validate(),
            Err(BemError::NonPositiveAccuracy {
                name: "recompression accuracy",
                ..
            })
        ));
    }

    #[test]
    fn rejects_invalid_green_parameters() {
        let mut params = GreenParams::default();
        params.segments = 0;
        let config = ApproximationConfig::builder(ApproximationScheme::GreenHybrid {
            params,
            accuracy: 1e-4,
            side: BasisSide::Row,
        })
        .build();
        assert_eq!(config.validate(), Err(BemError::InvalidSegments));

        let mut params = GreenParams::default();
        params.delta = f64::NAN;
        let config = ApproximationConfig::builder(ApproximationScheme::Green {
            params,
            side: BasisSide::Mixed,
        })
        .build();
        assert!(matches!(config.validate(), Err(BemError::InvalidOffset(_))));
    }

    #[test]
    fn accepts_defaults() {
        let config = ApproximationConfig::builder(ApproximationScheme::GreenHybridOrtho {
            params: GreenParams::default(),
            accuracy: 1e-6,
        })
        .coarsening(1e-6)
        .hierarchical_compression(1e-6, TruncationMode::default())
        .build();
        assert!(config.validate().is_ok());
        assert_eq!(config.scheme.name(), "greenhybrid-ortho");
    }
}
