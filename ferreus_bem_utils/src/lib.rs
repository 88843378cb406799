/////////////////////////////////////////////////////////////////////////////////////////////
//
// Exposes the surface meshes, Laplace kernels and projections used with ferreus_bem.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Boundary element helpers
//!
//! Small building blocks for exercising [`ferreus_bem`] on a concrete problem:
//! - [`Surface`]: triangulated surfaces, including a refined octahedron
//!   approximating the unit sphere.
//! - [`LaplaceKernel`]: single and double layer potentials of the Laplace
//!   equation, discretised with piecewise constants and collocation at the
//!   triangle centroids.
//! - L2 projections of boundary data onto piecewise constant and piecewise
//!   linear functions.

pub mod laplace;

pub mod projection;

pub mod surface;

#[doc(inline)]
pub use {
    laplace::{LaplaceKernel, LayerPotential},
    projection::{conjugate_gradient, mass_linear, projectl2_const, projectl2_linear, BoundaryFunction},
    surface::Surface,
};

#[cfg(test)]
mod tests {
    use super::*;
    use faer::{Mat, MatRef};
    use ferreus_bem::{
        schemes::FarfieldScheme, ApproximationConfig, ApproximationScheme, BasisSide, BemAssembler,
        Block, Capability, ClusterBasis, ClusterTree, GreenParams, H2Matrix, HMatrix,
        KernelCapability, NearfieldProvider, TruncationMode,
    };
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    struct Problem {
        kernel: LaplaceKernel,
        tree: ClusterTree,
        block: Block,
        dense: Mat<f64>,
        x: Vec<f64>,
    }

    fn sphere_problem(potential: LayerPotential, eta: f64) -> Problem {
        let sphere = Surface::unit_sphere(3);
        let kernel = LaplaceKernel::new(&sphere, potential);
        let tree = ClusterTree::build_adaptive(&sphere.triangle_geometry(), 8);
        let block = Block::build(&tree, &tree, eta);
        let idx: Vec<usize> = (0..kernel.len()).collect();
        let dense = kernel.nearfield(&idx, &idx);
        let mut rng = StdRng::seed_from_u64(2025);
        let x = (0..kernel.len()).map(|_| rng.random_range(-1.0..1.0)).collect();
        Problem {
            kernel,
            tree,
            block,
            dense,
            x,
        }
    }

    impl Problem {
        fn relative_error(&self, y: &[f64]) -> f64 {
            let n = self.x.len();
            let mut err = 0.0;
            let mut norm = 0.0;
            for i in 0..n {
                let exact: f64 = (0..n).map(|j| self.dense[(i, j)] * self.x[j]).sum();
                err += (y[i] - exact).powi(2);
                norm += exact * exact;
            }
            (err / norm).sqrt()
        }
    }

    fn greenhybrid(accuracy: f64) -> ApproximationScheme {
        ApproximationScheme::GreenHybrid {
            params: GreenParams::default(),
            accuracy,
            side: BasisSide::Mixed,
        }
    }

    #[test]
    fn single_layer_hmatrix_matches_dense_operator() {
        let p = sphere_problem(LayerPotential::SingleLayer, 0.7);
        let mut assembler = BemAssembler::new(&p.kernel, &p.tree, &p.tree);
        assembler.setup(ApproximationConfig::builder(greenhybrid(1e-6)).build()).unwrap();

        let mut h = HMatrix::from_block(&p.block, &p.tree, &p.tree);
        assembler.fill_hmatrix(&mut h).unwrap();
        let y = h.apply(&p.tree, &p.tree, &p.x).unwrap();

        let err = p.relative_error(&y);
        assert!(err < 1e-3, "{err}");
        assert!(h.count_low_rank() > 0);
    }

    /// Delegates to a [`LaplaceKernel`], sleeping inside every Green matrix
    /// evaluation so that concurrent blocks race for the same cache slot.
    struct SlowKernel {
        inner: LaplaceKernel,
        row_evaluations: AtomicUsize,
        col_evaluations: AtomicUsize,
    }

    impl KernelCapability for SlowKernel {
        fn supports(&self, capability: Capability) -> bool {
            self.inner.supports(capability)
        }

        fn fundamental_row(&self, idx: &[usize], z: MatRef<f64>) -> Mat<f64> {
            self.row_evaluations.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            self.inner.fundamental_row(idx, z)
        }

        fn dnz_fundamental_row(&self, idx: &[usize], z: MatRef<f64>, n: MatRef<f64>) -> Mat<f64> {
            self.inner.dnz_fundamental_row(idx, z, n)
        }

        fn kernel_col(&self, idx: &[usize], z: MatRef<f64>) -> Mat<f64> {
            self.col_evaluations.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            self.inner.kernel_col(idx, z)
        }

        fn dnz_kernel_col(&self, idx: &[usize], z: MatRef<f64>, n: MatRef<f64>) -> Mat<f64> {
            self.inner.dnz_kernel_col(idx, z, n)
        }
    }

    impl NearfieldProvider for SlowKernel {
        fn nearfield(&self, ridx: &[usize], cidx: &[usize]) -> Mat<f64> {
            self.inner.nearfield(ridx, cidx)
        }
    }

    #[test]
    fn greenhybrid_builds_each_cluster_at_most_once_under_contention() {
        let p = sphere_problem(LayerPotential::SingleLayer, 0.7);
        let kernel = SlowKernel {
            inner: p.kernel.clone(),
            row_evaluations: AtomicUsize::new(0),
            col_evaluations: AtomicUsize::new(0),
        };
        let mut assembler = BemAssembler::new(&kernel, &p.tree, &p.tree);
        assembler.setup(ApproximationConfig::builder(greenhybrid(1e-5)).build()).unwrap();

        let mut h = HMatrix::from_block(&p.block, &p.tree, &p.tree);
        assembler.fill_hmatrix(&mut h).unwrap();
        let mut again = HMatrix::from_block(&p.block, &p.tree, &p.tree);
        assembler.fill_hmatrix(&mut again).unwrap();

        let Some(FarfieldScheme::GreenHybrid(scheme)) = assembler.scheme() else {
            panic!("greenhybrid scheme expected");
        };
        let evaluations = [&kernel.row_evaluations, &kernel.col_evaluations];
        for (cache, calls) in [&scheme.flat.row_cache, &scheme.flat.col_cache].into_iter().zip(evaluations) {
            let cached = (0..p.tree.len()).filter(|&id| cache.get(id).is_some()).count();
            assert_eq!(cache.builds(), cached);
            assert_eq!(calls.load(Ordering::SeqCst), cached);
            assert!(cached <= p.tree.len());
        }
        assert!(scheme.flat.row_cache.builds() + scheme.flat.col_cache.builds() > 0);
        assert_eq!(h.to_dense(&p.tree, &p.tree), again.to_dense(&p.tree, &p.tree));
    }

    #[test]
    fn single_layer_of_constant_density_matches_dense_product() {
        let p = sphere_problem(LayerPotential::SingleLayer, 0.7);
        assert_eq!(p.kernel.len(), 512);
        let mut assembler = BemAssembler::new(&p.kernel, &p.tree, &p.tree);
        assembler
            .setup(
                ApproximationConfig::builder(ApproximationScheme::GreenHybrid {
                    params: GreenParams {
                        order: 4,
                        segments: 1,
                        ..GreenParams::default()
                    },
                    accuracy: 1e-6,
                    side: BasisSide::Mixed,
                })
                .build(),
            )
            .unwrap();

        let mut h = HMatrix::from_block(&p.block, &p.tree, &p.tree);
        assembler.fill_hmatrix(&mut h).unwrap();

        let ones = vec![1.0; p.kernel.len()];
        let y = h.apply(&p.tree, &p.tree, &ones).unwrap();
        let mut err = 0.0;
        let mut norm = 0.0;
        for (i, yi) in y.iter().enumerate() {
            let exact: f64 = (0..p.kernel.len()).map(|j| p.dense[(i, j)]).sum();
            err += (yi - exact).powi(2);
            norm += exact * exact;
        }
        let relative = (err / norm).sqrt();
        assert!(relative < 1e-5, "{relative}");
    }

    #[test]
    fn nested_schemes_match_dense_operator() {
        let p = sphere_problem(LayerPotential::SingleLayer, 0.7);
        let schemes = [
            greenhybrid(1e-6),
            ApproximationScheme::GreenHybridOrtho {
                params: GreenParams::default(),
                accuracy: 1e-6,
            },
            ApproximationScheme::Interpolation {
                order: 6,
                side: BasisSide::Mixed,
            },
        ];

        for scheme in schemes {
            let name = scheme.name();
            let mut assembler = BemAssembler::new(&p.kernel, &p.tree, &p.tree);
            assembler.setup(ApproximationConfig::builder(scheme).build()).unwrap();

            let mut h2 = H2Matrix::from_block(&p.block, &p.tree, &p.tree);
            assembler.fill_h2matrix(&mut h2).unwrap();
            let y = h2.apply(&p.tree, &p.tree, &p.x).unwrap();
            let err = p.relative_error(&y);
            assert!(err < 1e-3, "{name}: {err}");
        }
    }

    #[test]
    fn double_layer_supports_every_flat_scheme() {
        let p = sphere_problem(LayerPotential::DoubleLayer, 0.7);
        let schemes = [
            ApproximationScheme::Aca { accuracy: 1e-6 },
            ApproximationScheme::PartialAca { accuracy: 1e-6 },
            ApproximationScheme::HybridCross {
                order: 6,
                accuracy: 1e-6,
            },
            ApproximationScheme::Green {
                params: GreenParams {
                    order: 6,
                    ..GreenParams::default()
                },
                side: BasisSide::Row,
            },
            greenhybrid(1e-6),
        ];

        for scheme in schemes {
            let name = scheme.name();
            let mut assembler = BemAssembler::new(&p.kernel, &p.tree, &p.tree);
            assembler.setup(ApproximationConfig::builder(scheme).build()).unwrap();

            let mut h = HMatrix::from_block(&p.block, &p.tree, &p.tree);
            assembler.fill_hmatrix(&mut h).unwrap();
            let err = p.relative_error(&h.apply(&p.tree, &p.tree, &p.x).unwrap());
            assert!(err < 1e-3, "{name}: {err}");
        }
    }

    /// The column expansion carries the normal derivative of the double layer,
    /// so it needs a higher quadrature order than the row expansion.
    #[test]
    fn double_layer_column_expansions_converge_with_order() {
        let p = sphere_problem(LayerPotential::DoubleLayer, 0.7);
        let green_error = |order: usize, side: BasisSide| {
            let scheme = ApproximationScheme::Green {
                params: GreenParams {
                    order,
                    ..GreenParams::default()
                },
                side,
            };
            let mut assembler = BemAssembler::new(&p.kernel, &p.tree, &p.tree);
            assembler.setup(ApproximationConfig::builder(scheme).build()).unwrap();
            let mut h = HMatrix::from_block(&p.block, &p.tree, &p.tree);
            assembler.fill_hmatrix(&mut h).unwrap();
            p.relative_error(&h.apply(&p.tree, &p.tree, &p.x).unwrap())
        };

        for side in [BasisSide::Column, BasisSide::Mixed] {
            let coarse = green_error(4, side);
            let fine = green_error(8, side);
            assert!(fine < coarse / 10.0, "{side:?}: {coarse} -> {fine}");
            assert!(fine < 5e-3, "{side:?}: {fine}");
        }
    }

    #[test]
    fn hierarchical_compression_of_sphere_operator() {
        let p = sphere_problem(LayerPotential::SingleLayer, 0.7);
        let mut assembler = BemAssembler::new(&p.kernel, &p.tree, &p.tree);
        assembler
            .setup(
                ApproximationConfig::builder(ApproximationScheme::PartialAca { accuracy: 1e-8 })
                    .hierarchical_compression(1e-7, TruncationMode::default())
                    .build(),
            )
            .unwrap();

        let mut h = HMatrix::from_block(&p.block, &p.tree, &p.tree);
        let h2 = assembler.fill_h2matrix_hiercomp(&mut h).unwrap();
        let err = p.relative_error(&h2.apply(&p.tree, &p.tree, &p.x).unwrap());
        assert!(err < 1e-5, "{err}");

        let mut rows = ClusterBasis::new(&p.tree);
        assert!(assembler.assemble_row_basis(&mut rows).is_err());
    }
}
