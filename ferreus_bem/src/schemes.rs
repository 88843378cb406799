/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares the far-field scheme interface and dispatches to the configured approximation.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    aca::{aca_full_pivoting, aca_partial_pivoting},
    cluster::ClusterTree,
    config::{ApproximationScheme, BasisSide},
    error::BemError,
    green::{ClusterRole, Green, GreenHybrid, GreenSurface},
    matrices::{BasisNode, RkMatrix},
    nested::{NestedGreen, NestedInterpolation},
    quadrature::InterpolationGrid,
    traits::{BemKernel, Capability},
    utils::select_mat_rows,
};
use faer::{
    linalg::triangular_solve::{
        solve_lower_triangular_in_place, solve_unit_lower_triangular_in_place,
        solve_unit_upper_triangular_in_place, solve_upper_triangular_in_place,
    },
    Mat, Par,
};

/// Everything a scheme needs to evaluate a block.
#[derive(Clone, Copy)]
pub struct FarfieldContext<'a> {
    pub kernel: &'a dyn BemKernel,
    pub rtree: &'a ClusterTree,
    pub ctree: &'a ClusterTree,
}

impl<'a> FarfieldContext<'a> {
    pub fn tree(&self, role: ClusterRole) -> &'a ClusterTree {
        match role {
            ClusterRole::Row => self.rtree,
            ClusterRole::Column => self.ctree,
        }
    }
}

/// A far-field approximation scheme.
///
/// Flat schemes implement [`Farfield::build_farfield_block`]; schemes that
/// can fill H2 matrices also implement the three basis and coupling methods.
pub trait Farfield: Send + Sync {
    fn name(&self) -> &'static str;

    /// Kernel evaluations used by [`Farfield::build_farfield_block`].
    fn required_capabilities(&self) -> Vec<Capability>;

    /// Kernel evaluations used by the nested basis and coupling methods.
    fn nested_capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }

    fn supports_flat(&self) -> bool {
        true
    }

    fn supports_nested(&self) -> bool {
        false
    }

    /// Low-rank approximation of the admissible block `(row, col)`.
    fn build_farfield_block(&self, ctx: &FarfieldContext, row: usize, col: usize) -> Result<RkMatrix, BemError>;

    fn build_leaf_basis(&self, ctx: &FarfieldContext, role: ClusterRole, id: usize) -> Result<BasisNode, BemError> {
        let _ = (ctx, role, id);
        Err(self.unsupported("nested cluster basis"))
    }

    /// Builds the basis of an inner cluster. `sons` holds the finished bases
    /// of its sons in son order.
    fn build_transfer_basis(
        &self,
        ctx: &FarfieldContext,
        role: ClusterRole,
        id: usize,
        sons: &[&BasisNode],
    ) -> Result<BasisNode, BemError> {
        let _ = (ctx, role, id, sons);
        Err(self.unsupported("nested cluster basis"))
    }

    /// Coupling matrix of the admissible block `(row, col)` between finished bases.
    fn build_coupling(&self, ctx: &FarfieldContext, row: usize, col: usize) -> Result<Mat<f64>, BemError> {
        let _ = (ctx, row, col);
        Err(self.unsupported("H2 coupling matrix"))
    }

    fn unsupported(&self, representation: &'static str) -> BemError {
        BemError::UnsupportedAssembly {
            scheme: self.name(),
            representation,
        }
    }
}

/// Tensor Chebyshev interpolation around the row or the column cluster.
#[derive(Debug, Clone)]
pub struct Interpolation {
    pub nested: NestedInterpolation,
    pub side: BasisSide,
}

impl Farfield for Interpolation {
    fn name(&self) -> &'static str {
        "interpolation"
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        match self.side {
            BasisSide::Row => vec![Capability::LagrangeRow, Capability::KernelCol],
            BasisSide::Column => vec![Capability::FundamentalRow, Capability::LagrangeCol],
            BasisSide::Mixed => vec![
                Capability::LagrangeRow,
                Capability::KernelCol,
                Capability::FundamentalRow,
                Capability::LagrangeCol,
            ],
        }
    }

    fn nested_capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::LagrangeRow,
            Capability::LagrangeCol,
            Capability::Fundamental,
        ]
    }

    fn supports_nested(&self) -> bool {
        true
    }

    fn build_farfield_block(&self, ctx: &FarfieldContext, row: usize, col: usize) -> Result<RkMatrix, BemError> {
        let t = ctx.rtree.cluster(row);
        let s = ctx.ctree.cluster(col);
        let ridx = ctx.rtree.indices(row);
        let cidx = ctx.ctree.indices(col);

        let side = match self.side {
            BasisSide::Mixed if s.diam_2() < t.diam_2() => BasisSide::Column,
            BasisSide::Mixed => BasisSide::Row,
            side => side,
        };

        Ok(if side == BasisSide::Row {
            let grid = self.nested.grid(ctx.rtree, row);
            RkMatrix::new(
                ctx.kernel.lagrange_row(ridx, &grid.px, &grid.py, &grid.pz),
                ctx.kernel.kernel_col(cidx, grid.points().as_ref()),
            )
        } else {
            let grid = self.nested.grid(ctx.ctree, col);
            RkMatrix::new(
                ctx.kernel.fundamental_row(ridx, grid.points().as_ref()),
                ctx.kernel.lagrange_col(cidx, &grid.px, &grid.py, &grid.pz),
            )
        })
    }

    fn build_leaf_basis(&self, ctx: &FarfieldContext, role: ClusterRole, id: usize) -> Result<BasisNode, BemError> {
        Ok(self.nested.leaf_basis(ctx.kernel, role, ctx.tree(role), id))
    }

    fn build_transfer_basis(
        &self,
        ctx: &FarfieldContext,
        role: ClusterRole,
        id: usize,
        _sons: &[&BasisNode],
    ) -> Result<BasisNode, BemError> {
        Ok(self.nested.transfer_basis(ctx.tree(role), id))
    }

    fn build_coupling(&self, ctx: &FarfieldContext, row: usize, col: usize) -> Result<Mat<f64>, BemError> {
        Ok(self
            .nested
            .coupling(ctx.kernel, ctx.rtree, ctx.ctree, row, col))
    }
}

impl Farfield for Green {
    fn name(&self) -> &'static str {
        "green"
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        vec![
            Capability::FundamentalRow,
            Capability::DnzFundamentalRow,
            Capability::KernelCol,
            Capability::DnzKernelCol,
        ]
    }

    fn build_farfield_block(&self, ctx: &FarfieldContext, row: usize, col: usize) -> Result<RkMatrix, BemError> {
        Ok(self.farfield_block(ctx.kernel, ctx.rtree, ctx.ctree, row, col))
    }
}

/// Full-pivoting ACA of the dense block.
#[derive(Debug, Clone)]
pub struct AcaScheme {
    pub accuracy: f64,
}

impl Farfield for AcaScheme {
    fn name(&self) -> &'static str {
        "aca"
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }

    fn build_farfield_block(&self, ctx: &FarfieldContext, row: usize, col: usize) -> Result<RkMatrix, BemError> {
        let block = ctx
            .kernel
            .nearfield(ctx.rtree.indices(row), ctx.ctree.indices(col));
        let aca = aca_full_pivoting(block.as_ref(), &self.accuracy);
        Ok(RkMatrix::new(aca.a, aca.b))
    }
}

/// Partial-pivoting ACA evaluating single rows and columns of the block.
#[derive(Debug, Clone)]
pub struct PartialAca {
    pub accuracy: f64,
}

impl Farfield for PartialAca {
    fn name(&self) -> &'static str {
        "partial-aca"
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        Vec::new()
    }

    fn build_farfield_block(&self, ctx: &FarfieldContext, row: usize, col: usize) -> Result<RkMatrix, BemError> {
        let ridx = ctx.rtree.indices(row);
        let cidx = ctx.ctree.indices(col);

        let entries = |rows: &[usize], cols: &[usize]| {
            let r: Vec<usize> = rows.iter().map(|&i| ridx[i]).collect();
            let c: Vec<usize> = cols.iter().map(|&j| cidx[j]).collect();
            ctx.kernel.nearfield(&r, &c)
        };
        let aca = aca_partial_pivoting(ridx.len(), cidx.len(), entries, &self.accuracy);
        Ok(RkMatrix::new(aca.a, aca.b))
    }
}

/// Hybrid cross approximation: ACA on the kernel at Chebyshev points picks
/// pivot points, which are then used with the exact operator kernel.
#[derive(Debug, Clone)]
pub struct HybridCross {
    pub order: usize,
    pub accuracy: f64,
}

impl Farfield for HybridCross {
    fn name(&self) -> &'static str {
        "hybrid-cross"
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        vec![Capability::Fundamental, Capability::KernelRow, Capability::KernelCol]
    }

    fn build_farfield_block(&self, ctx: &FarfieldContext, row: usize, col: usize) -> Result<RkMatrix, BemError> {
        let t = ctx.rtree.cluster(row);
        let s = ctx.ctree.cluster(col);
        let ridx = ctx.rtree.indices(row);
        let cidx = ctx.ctree.indices(col);

        let xt = InterpolationGrid::new(self.order, &t.bmin, &t.bmax).points();
        let xs = InterpolationGrid::new(self.order, &s.bmin, &s.bmax).points();

        let core = ctx.kernel.fundamental(xt.as_ref(), xs.as_ref());
        let aca = aca_full_pivoting(core.as_ref(), &self.accuracy);
        let rank = aca.rank();
        if rank == 0 {
            return Ok(RkMatrix::zeros(ridx.len(), cidx.len()));
        }

        // core[I, J] = L U with L unit lower and U upper triangular
        let l = Mat::from_fn(rank, rank, |i, j| aca.a[(aca.row_pivots[i], j)]);
        let u = Mat::from_fn(rank, rank, |i, j| aca.b[(aca.col_pivots[j], i)]);

        let mut a = ctx
            .kernel
            .kernel_row(ridx, select_mat_rows(xs.as_ref(), &aca.col_pivots).as_ref());
        let mut b = ctx
            .kernel
            .kernel_col(cidx, select_mat_rows(xt.as_ref(), &aca.row_pivots).as_ref());

        if ridx.len() < cidx.len() {
            // A <- A U^-1 L^-1
            solve_lower_triangular_in_place(u.transpose(), a.as_mut().transpose_mut(), Par::Seq);
            solve_unit_upper_triangular_in_place(l.transpose(), a.as_mut().transpose_mut(), Par::Seq);
        } else {
            // B <- B L^-T U^-T
            solve_unit_lower_triangular_in_place(l.as_ref(), b.as_mut().transpose_mut(), Par::Seq);
            solve_upper_triangular_in_place(u.as_ref(), b.as_mut().transpose_mut(), Par::Seq);
        }

        Ok(RkMatrix::new(a, b))
    }
}

fn green_capabilities(side: BasisSide) -> Vec<Capability> {
    let row = [Capability::FundamentalRow, Capability::DnzFundamentalRow];
    let col = [Capability::KernelCol, Capability::DnzKernelCol];
    match side {
        BasisSide::Row => row.to_vec(),
        BasisSide::Column => col.to_vec(),
        BasisSide::Mixed => row.iter().chain(col.iter()).copied().collect(),
    }
}

/// Greenhybrid for flat matrices together with its nested counterpart.
#[derive(Debug)]
pub struct GreenHybridScheme {
    pub flat: GreenHybrid,
    pub nested: NestedGreen,
}

impl Farfield for GreenHybridScheme {
    fn name(&self) -> &'static str {
        "greenhybrid"
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        green_capabilities(self.flat.side)
    }

    fn nested_capabilities(&self) -> Vec<Capability> {
        green_capabilities(BasisSide::Mixed)
    }

    fn supports_nested(&self) -> bool {
        true
    }

    fn build_farfield_block(&self, ctx: &FarfieldContext, row: usize, col: usize) -> Result<RkMatrix, BemError> {
        Ok(self
            .flat
            .farfield_block(ctx.kernel, ctx.rtree, ctx.ctree, row, col))
    }

    fn build_leaf_basis(&self, ctx: &FarfieldContext, role: ClusterRole, id: usize) -> Result<BasisNode, BemError> {
        Ok(self.nested.leaf_basis(ctx.kernel, role, ctx.tree(role), id))
    }

    fn build_transfer_basis(
        &self,
        ctx: &FarfieldContext,
        role: ClusterRole,
        id: usize,
        sons: &[&BasisNode],
    ) -> Result<BasisNode, BemError> {
        Ok(self
            .nested
            .transfer_basis(ctx.kernel, role, ctx.tree(role), id, sons))
    }

    fn build_coupling(&self, ctx: &FarfieldContext, row: usize, col: usize) -> Result<Mat<f64>, BemError> {
        Ok(self.nested.coupling(ctx.kernel, row, col))
    }
}

/// Greenhybrid with orthonormal nested bases. Only fills H2 matrices.
#[derive(Debug)]
pub struct GreenHybridOrtho {
    pub nested: NestedGreen,
}

impl Farfield for GreenHybridOrtho {
    fn name(&self) -> &'static str {
        "greenhybrid-ortho"
    }

    fn required_capabilities(&self) -> Vec<Capability> {
        green_capabilities(BasisSide::Mixed)
    }

    fn nested_capabilities(&self) -> Vec<Capability> {
        green_capabilities(BasisSide::Mixed)
    }

    fn supports_flat(&self) -> bool {
        false
    }

    fn supports_nested(&self) -> bool {
        true
    }

    fn build_farfield_block(&self, _ctx: &FarfieldContext, _row: usize, _col: usize) -> Result<RkMatrix, BemError> {
        Err(self.unsupported("hierarchical matrix"))
    }

    fn build_leaf_basis(&self, ctx: &FarfieldContext, role: ClusterRole, id: usize) -> Result<BasisNode, BemError> {
        Ok(self.nested.leaf_basis(ctx.kernel, role, ctx.tree(role), id))
    }

    fn build_transfer_basis(
        &self,
        ctx: &FarfieldContext,
        role: ClusterRole,
        id: usize,
        sons: &[&BasisNode],
    ) -> Result<BasisNode, BemError> {
        Ok(self
            .nested
            .transfer_basis(ctx.kernel, role, ctx.tree(role), id, sons))
    }

    fn build_coupling(&self, ctx: &FarfieldContext, row: usize, col: usize) -> Result<Mat<f64>, BemError> {
        Ok(self.nested.coupling(ctx.kernel, row, col))
    }
}

/// The active far-field scheme together with its caches.
#[derive(Debug)]
pub enum FarfieldScheme {
    Interpolation(Interpolation),
    Green(Green),
    Aca(AcaScheme),
    PartialAca(PartialAca),
    HybridCross(HybridCross),
    GreenHybrid(GreenHybridScheme),
    GreenHybridOrtho(GreenHybridOrtho),
}

impl FarfieldScheme {
    /// Creates the scheme payload with empty caches sized for the trees.
    pub fn new(scheme: &ApproximationScheme, rtree: &ClusterTree, ctree: &ClusterTree) -> Self {
        match scheme {
            ApproximationScheme::Interpolation { order, side } => {
                FarfieldScheme::Interpolation(Interpolation {
                    nested: NestedInterpolation { order: *order },
                    side: *side,
                })
            }
            ApproximationScheme::Green { params, side } => FarfieldScheme::Green(Green::new(params, *side)),
            ApproximationScheme::Aca { accuracy } => FarfieldScheme::Aca(AcaScheme { accuracy: *accuracy }),
            ApproximationScheme::PartialAca { accuracy } => {
                FarfieldScheme::PartialAca(PartialAca { accuracy: *accuracy })
            }
            ApproximationScheme::HybridCross { order, accuracy } => FarfieldScheme::HybridCross(HybridCross {
                order: *order,
                accuracy: *accuracy,
            }),
            ApproximationScheme::GreenHybrid {
                params,
                accuracy,
                side,
            } => FarfieldScheme::GreenHybrid(GreenHybridScheme {
                flat: GreenHybrid::new(params, *accuracy, *side, rtree, ctree),
                nested: NestedGreen::new(GreenSurface::new(params), *accuracy, false, rtree, ctree),
            }),
            ApproximationScheme::GreenHybridOrtho { params, accuracy } => {
                FarfieldScheme::GreenHybridOrtho(GreenHybridOrtho {
                    nested: NestedGreen::new(GreenSurface::new(params), *accuracy, true, rtree, ctree),
                })
            }
        }
    }

    /// The scheme behind the enum as a trait object.
    pub fn as_farfield(&self) -> &dyn Farfield {
        match self {
            FarfieldScheme::Interpolation(s) => s,
            FarfieldScheme::Green(s) => s,
            FarfieldScheme::Aca(s) => s,
            FarfieldScheme::PartialAca(s) => s,
            FarfieldScheme::HybridCross(s) => s,
            FarfieldScheme::GreenHybrid(s) => s,
            FarfieldScheme::GreenHybridOrtho(s) => s,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::GreenParams, test_kernels::PointKernel, traits::NearfieldProvider};

    fn relative_error(rk: &RkMatrix, exact: &Mat<f64>) -> f64 {
        (&rk.to_dense() - exact).norm_l2() / exact.norm_l2()
    }

    #[test]
    fn every_flat_scheme_approximates_a_separated_block() {
        let kernel = PointKernel::two_cubes(150, 120, 3.0, 17);
        let (rtree, ctree) = kernel.trees(32);
        let ctx = FarfieldContext {
            kernel: &kernel,
            rtree: &rtree,
            ctree: &ctree,
        };
        let exact = kernel.nearfield(rtree.indices(0), ctree.indices(0));

        let schemes = [
            ApproximationScheme::Interpolation {
                order: 5,
                side: BasisSide::Mixed,
            },
            ApproximationScheme::Aca { accuracy: 1e-6 },
            ApproximationScheme::PartialAca { accuracy: 1e-6 },
            ApproximationScheme::HybridCross {
                order: 5,
                accuracy: 1e-8,
            },
            ApproximationScheme::GreenHybrid {
                params: GreenParams::default(),
                accuracy: 1e-6,
                side: BasisSide::Mixed,
            },
        ];

        for scheme in &schemes {
            let farfield = FarfieldScheme::new(scheme, &rtree, &ctree);
            let rk = farfield.as_farfield().build_farfield_block(&ctx, 0, 0).unwrap();
            let err = relative_error(&rk, &exact);
            assert!(err < 1e-4, "{}: {err}", scheme.name());
            assert_eq!(rk.rows(), 150);
            assert_eq!(rk.cols(), 120);
        }
    }

    #[test]
    fn hybrid_cross_handles_both_orientations() {
        let kernel = PointKernel::two_cubes(40, 90, 2.5, 23);
        let (rtree, ctree) = kernel.trees(64);
        let scheme = HybridCross {
            order: 4,
            accuracy: 1e-8,
        };

        let ctx = FarfieldContext {
            kernel: &kernel,
            rtree: &rtree,
            ctree: &ctree,
        };
        let exact = kernel.nearfield(rtree.indices(0), ctree.indices(0));
        assert!(relative_error(&scheme.build_farfield_block(&ctx, 0, 0).unwrap(), &exact) < 1e-3);

        let transposed = PointKernel {
            rows: kernel.cols.clone(),
            cols: kernel.rows.clone(),
        };
        let ctx = FarfieldContext {
            kernel: &transposed,
            rtree: &ctree,
            ctree: &rtree,
        };
        let exact = transposed.nearfield(ctree.indices(0), rtree.indices(0));
        assert!(relative_error(&scheme.build_farfield_block(&ctx, 0, 0).unwrap(), &exact) < 1e-3);
    }

    #[test]
    fn orthogonal_scheme_rejects_flat_assembly() {
        let kernel = PointKernel::random_cube(20, 1);
        let (tree, _) = kernel.trees(8);
        let scheme = FarfieldScheme::new(
            &ApproximationScheme::GreenHybridOrtho {
                params: GreenParams::default(),
                accuracy: 1e-4,
            },
            &tree,
            &tree,
        );
        let ctx = FarfieldContext {
            kernel: &kernel,
            rtree: &tree,
            ctree: &tree,
        };
        assert!(!scheme.as_farfield().supports_flat());
        assert!(matches!(
            scheme.as_farfield().build_farfield_block(&ctx, 0, 0),
            Err(BemError::UnsupportedAssembly { .. })
        ));

        let aca = FarfieldScheme::new(&ApproximationScheme::Aca { accuracy: 1e-4 }, &tree, &tree);
        assert!(matches!(
            aca.as_farfield().build_coupling(&ctx, 0, 0),
            Err(BemError::UnsupportedAssembly { scheme: "aca", .. })
        ));
    }
}
