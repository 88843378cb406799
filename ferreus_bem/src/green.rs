/////////////////////////////////////////////////////////////////////////////////////////////
//
// Green's representation formula based far-field approximations and their cluster caches.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Far-field approximations based on Green's representation formula.
//!
//! The kernel is represented on a closed surface enclosing a cluster, which
//! yields a separable expansion of rank `2 * #quadrature points`. The
//! greenhybrid variant compresses this expansion with a full-pivoting ACA and
//! keeps only the chosen pivot rows, so every far-field block reduces to an
//! interpolation operator of one cluster times a small set of exact matrix entries.

use crate::{
    aca::{aca_full_pivoting, normalize_at_pivots},
    cluster::{Cluster, ClusterTree},
    config::{BasisSide, GreenParams},
    matrices::RkMatrix,
    quadrature::GreenQuadrature,
    traits::{BemKernel, Parameterization},
    utils::{hcat, negated},
};
use faer::{Mat, MatRef};
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, OnceLock,
};

/// Whether a cluster acts as the row or the column cluster of a block.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ClusterRole {
    Row,
    Column,
}

/// One lazily filled slot per cluster id.
///
/// A slot is written at most once. Concurrent callers of
/// [`ClusterCache::get_or_build`] for the same empty slot block until the
/// first caller has finished building and then all read the same entry.
///
/// Builds run on a private thread pool rather than on the calling rayon
/// worker. A worker blocked on a slot therefore never steals the task that
/// is building it, even when the kernel evaluations inside a build use rayon.
#[derive(Debug)]
pub struct ClusterCache<T> {
    slots: Vec<OnceLock<T>>,
    builds: AtomicUsize,
}

impl<T: Send> ClusterCache<T> {
    pub fn new(num_clusters: usize) -> Self {
        ClusterCache {
            slots: (0..num_clusters).map(|_| OnceLock::new()).collect(),
            builds: AtomicUsize::new(0),
        }
    }

    /// Returns the entry of cluster `id`, building it with `build` if the slot is empty.
    pub fn get_or_build<F>(&self, id: usize, build: F) -> &T
    where
        F: FnOnce() -> T + Send,
    {
        self.slots[id].get_or_init(|| {
            self.builds.fetch_add(1, Ordering::Relaxed);
            build_isolated(build)
        })
    }

    pub fn get(&self, id: usize) -> Option<&T> {
        self.slots[id].get()
    }

    /// Number of entries built so far.
    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

fn cache_build_pool() -> Option<&'static ThreadPool> {
    static POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();
    POOL.get_or_init(|| {
        ThreadPoolBuilder::new()
            .thread_name(|i| format!("ferreus-bem-cache-{i}"))
            .build()
            .map_err(|e| log::warn!("cache build pool unavailable, building on the caller: {e}"))
            .ok()
    })
    .as_ref()
}

/// Runs a cache build on [`cache_build_pool`].
///
/// A global rayon worker hands the build to a plain scoped thread first, so it
/// waits at the OS level instead of stealing unrelated fill tasks.
fn build_isolated<T, F>(build: F) -> T
where
    F: FnOnce() -> T + Send,
    T: Send,
{
    let Some(pool) = cache_build_pool() else {
        return build();
    };
    if pool.current_thread_index().is_some() || rayon::current_thread_index().is_none() {
        return pool.install(build);
    }
    std::thread::scope(|scope| match scope.spawn(|| pool.install(build)).join() {
        Ok(value) => value,
        Err(payload) => std::panic::resume_unwind(payload),
    })
}

/// Quadrature surface and rule shared by all Green based schemes.
#[derive(Debug, Clone)]
pub struct GreenSurface {
    pub rule: GreenQuadrature,
    pub delta: f64,
    pub parameterization: Arc<dyn Parameterization>,
}

impl GreenSurface {
    pub fn new(params: &GreenParams) -> Self {
        GreenSurface {
            rule: GreenQuadrature::new(params.order, params.segments),
            delta: params.delta,
            parameterization: params.parameterization.resolve(),
        }
    }

    /// Diameter measure the offset is proportional to.
    pub fn diameter(&self, cluster: &Cluster) -> f64 {
        if self.parameterization.scales_with_max_side() {
            cluster.diam_max()
        } else {
            cluster.diam_2()
        }
    }

    /// Quadrature points and weighted outward normals around `cluster`.
    pub fn quadpoints(&self, cluster: &Cluster) -> (Mat<f64>, Mat<f64>) {
        let offset = self.delta * self.diameter(cluster);
        self.parameterization
            .quadpoints(&self.rule, &cluster.bmin, &cluster.bmax, offset)
    }
}

/// `[fundamental_row | dnz_fundamental_row]` for row clusters and
/// `[kernel_col | dnz_kernel_col]` for column clusters.
pub fn green_matrix(
    kernel: &dyn BemKernel,
    role: ClusterRole,
    idx: &[usize],
    z: MatRef<f64>,
    n: MatRef<f64>,
) -> Mat<f64> {
    match role {
        ClusterRole::Row => hcat(
            kernel.fundamental_row(idx, z).as_ref(),
            kernel.dnz_fundamental_row(idx, z, n).as_ref(),
        ),
        ClusterRole::Column => hcat(
            kernel.kernel_col(idx, z).as_ref(),
            kernel.dnz_kernel_col(idx, z, n).as_ref(),
        ),
    }
}

/// Pivot data of one cluster for the greenhybrid scheme.
#[derive(Debug, Clone)]
pub struct GreenCluster {
    /// Pivots as positions within the cluster.
    pub xi: Vec<usize>,
    /// Pivots as global indices, `xihat[j] = idx[xi[j]]`.
    pub xihat: Vec<usize>,
    /// Interpolation operator (cluster size × rank), the identity on the pivot rows.
    pub v: Mat<f64>,
    pub sons: usize,
}

impl GreenCluster {
    pub fn rank(&self) -> usize {
        self.xi.len()
    }
}

pub type GreenClusterCache = ClusterCache<GreenCluster>;

/// Compresses the Green matrix of cluster `id` by full-pivoting ACA.
pub fn build_green_cluster(
    kernel: &dyn BemKernel,
    surface: &GreenSurface,
    role: ClusterRole,
    tree: &ClusterTree,
    id: usize,
    accuracy: f64,
) -> GreenCluster {
    let cluster = tree.cluster(id);
    let idx = tree.indices(id);
    let (z, n) = surface.quadpoints(cluster);

    let g = green_matrix(kernel, role, idx, z.as_ref(), n.as_ref());
    let aca = aca_full_pivoting(g.as_ref(), &accuracy);

    let mut v = aca.a;
    normalize_at_pivots(&mut v, &aca.row_pivots);

    let xihat = aca.row_pivots.iter().map(|&i| idx[i]).collect();
    log::debug!(
        "green cluster {id} ({role:?}): {} of {} quadrature columns kept",
        aca.row_pivots.len(),
        g.ncols()
    );

    GreenCluster {
        xi: aca.row_pivots,
        xihat,
        v,
        sons: cluster.sons.len(),
    }
}

/// Chooses the cluster whose basis represents a far-field block.
///
/// Arguments are the block's rows and columns and the ranks of the row and
/// column cluster bases. Must return [`BasisSide::Row`] or [`BasisSide::Column`].
pub type BasisSelector = fn(usize, usize, usize, usize) -> BasisSide;

/// Picks the side with the smaller number of exact entries to evaluate.
pub fn cheaper_side(rows: usize, cols: usize, row_rank: usize, col_rank: usize) -> BasisSide {
    if cols * row_rank <= rows * col_rank {
        BasisSide::Row
    } else {
        BasisSide::Column
    }
}

/// Picks the side whose cluster has the smaller diameter; ties go to the column cluster.
fn smaller_side(surface_diam_row: f64, surface_diam_col: f64) -> BasisSide {
    if surface_diam_row < surface_diam_col {
        BasisSide::Row
    } else {
        BasisSide::Column
    }
}

/// Green's formula without further compression.
#[derive(Debug, Clone)]
pub struct Green {
    pub surface: GreenSurface,
    pub side: BasisSide,
}

impl Green {
    pub fn new(params: &GreenParams, side: BasisSide) -> Self {
        Green {
            surface: GreenSurface::new(params),
            side,
        }
    }

    pub fn farfield_block(
        &self,
        kernel: &dyn BemKernel,
        rtree: &ClusterTree,
        ctree: &ClusterTree,
        row: usize,
        col: usize,
    ) -> RkMatrix {
        let t = rtree.cluster(row);
        let s = ctree.cluster(col);
        let ridx = rtree.indices(row);
        let cidx = ctree.indices(col);

        let side = match self.side {
            BasisSide::Mixed => smaller_side(self.surface.diameter(t), self.surface.diameter(s)),
            side => side,
        };

        if side == BasisSide::Row {
            let (z, n) = self.surface.quadpoints(t);
            let minus_n = negated(n.as_ref());
            let a = hcat(
                kernel.fundamental_row(ridx, z.as_ref()).as_ref(),
                kernel
                    .dnz_fundamental_row(ridx, z.as_ref(), minus_n.as_ref())
                    .as_ref(),
            );
            let b = hcat(
                kernel.dnz_kernel_col(cidx, z.as_ref(), n.as_ref()).as_ref(),
                kernel.kernel_col(cidx, z.as_ref()).as_ref(),
            );
            RkMatrix::new(a, b)
        } else {
            let (z, n) = self.surface.quadpoints(s);
            let minus_n = negated(n.as_ref());
            let a = hcat(
                kernel.dnz_fundamental_row(ridx, z.as_ref(), n.as_ref()).as_ref(),
                kernel.fundamental_row(ridx, z.as_ref()).as_ref(),
            );
            let b = hcat(
                kernel.kernel_col(cidx, z.as_ref()).as_ref(),
                kernel
                    .dnz_kernel_col(cidx, z.as_ref(), minus_n.as_ref())
                    .as_ref(),
            );
            RkMatrix::new(a, b)
        }
    }
}

/// Green's formula compressed by ACA, exact entries on the pivots.
#[derive(Debug)]
pub struct GreenHybrid {
    pub surface: GreenSurface,
    pub accuracy: f64,
    pub side: BasisSide,
    pub selector: BasisSelector,
    pub row_cache: GreenClusterCache,
    pub col_cache: GreenClusterCache,
}

impl GreenHybrid {
    pub fn new(
        params: &GreenParams,
        accuracy: f64,
        side: BasisSide,
        rtree: &ClusterTree,
        ctree: &ClusterTree,
    ) -> Self {
        GreenHybrid {
            surface: GreenSurface::new(params),
            accuracy,
            side,
            selector: cheaper_side,
            row_cache: GreenClusterCache::new(rtree.len()),
            col_cache: GreenClusterCache::new(ctree.len()),
        }
    }

    /// Replaces the rule deciding between row and column basis in mixed mode.
    pub fn with_selector(mut self, selector: BasisSelector) -> Self {
        self.selector = selector;
        self
    }

    pub fn row_cluster(&self, kernel: &dyn BemKernel, rtree: &ClusterTree, id: usize) -> &GreenCluster {
        self.row_cache.get_or_build(id, || {
            build_green_cluster(kernel, &self.surface, ClusterRole::Row, rtree, id, self.accuracy)
        })
    }

    pub fn col_cluster(&self, kernel: &dyn BemKernel, ctree: &ClusterTree, id: usize) -> &GreenCluster {
        self.col_cache.get_or_build(id, || {
            build_green_cluster(kernel, &self.surface, ClusterRole::Column, ctree, id, self.accuracy)
        })
    }

    pub fn farfield_block(
        &self,
        kernel: &dyn BemKernel,
        rtree: &ClusterTree,
        ctree: &ClusterTree,
        row: usize,
        col: usize,
    ) -> RkMatrix {
        let ridx = rtree.indices(row);
        let cidx = ctree.indices(col);

        let side = match self.side {
            BasisSide::Mixed => {
                let row_rank = self.row_cluster(kernel, rtree, row).rank();
                let col_rank = self.col_cluster(kernel, ctree, col).rank();
                (self.selector)(ridx.len(), cidx.len(), row_rank, col_rank)
            }
            side => side,
        };

        match side {
            BasisSide::Column => {
                let gc = self.col_cluster(kernel, ctree, col);
                RkMatrix::new(kernel.nearfield(ridx, &gc.xihat), gc.v.clone())
            }
            _ => {
                let gc = self.row_cluster(kernel, rtree, row);
                RkMatrix::new(gc.v.clone(), kernel.nearfield_transposed(&gc.xihat, cidx))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{test_kernels::PointKernel, traits::NearfieldProvider};
    use rayon::prelude::*;

    #[test]
    fn cache_builds_each_slot_once_under_contention() {
        let cache = ClusterCache::<usize>::new(4);
        let calls = AtomicUsize::new(0);

        (0..64).into_par_iter().for_each(|i| {
            let value = cache.get_or_build(i % 4, || {
                calls.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(std::time::Duration::from_millis(5));
                (i % 4) * 10
            });
            assert_eq!(*value, (i % 4) * 10);
        });

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(cache.builds(), 4);
        assert!(cache.get(2).is_some());
    }

    #[test]
    fn green_cluster_is_identity_on_pivots() {
        let kernel = PointKernel::random_cube(200, 21);
        let (tree, _) = kernel.trees(32);
        let surface = GreenSurface::new(&GreenParams::default());

        for id in [1, 2, tree.len() - 1] {
            let gc = build_green_cluster(&kernel, &surface, ClusterRole::Row, &tree, id, 1e-6);
            assert_eq!(gc.xi.len(), gc.xihat.len());
            assert!(gc.rank() <= tree.cluster(id).size);
            for (i, &p) in gc.xi.iter().enumerate() {
                assert_eq!(gc.xihat[i], tree.indices(id)[p]);
                for j in 0..gc.rank() {
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert!((gc.v[(p, j)] - expected).abs() < 1e-10);
                }
            }
        }
    }

    #[test]
    fn green_and_greenhybrid_blocks_approximate_the_kernel() {
        let kernel = PointKernel::two_cubes(250, 200, 3.0, 4);
        let (rtree, ctree) = kernel.trees(16);
        let exact = kernel.nearfield(rtree.indices(0), ctree.indices(0));

        let fine = GreenParams {
            order: 8,
            delta: 1.0,
            ..GreenParams::default()
        };
        for side in [BasisSide::Row, BasisSide::Column, BasisSide::Mixed] {
            let green = Green::new(&fine, side);
            let rk = green.farfield_block(&kernel, &rtree, &ctree, 0, 0);
            assert_eq!(rk.rank(), 2 * 6 * 64);
            let err = (&rk.to_dense() - &exact).norm_l2() / exact.norm_l2();
            assert!(err < 1e-3, "green {side:?}: {err}");

            let hybrid = GreenHybrid::new(&GreenParams::default(), 1e-8, side, &rtree, &ctree);
            let rk = hybrid.farfield_block(&kernel, &rtree, &ctree, 0, 0);
            let err = (&rk.to_dense() - &exact).norm_l2() / exact.norm_l2();
            assert!(err < 1e-4, "greenhybrid {side:?}: {err}");
            assert!(rk.rank() < 200);
        }
    }

    #[test]
    fn mixed_green_expands_around_smaller_cluster() {
        assert_eq!(smaller_side(1.0, 2.0), BasisSide::Row);
        assert_eq!(smaller_side(2.0, 1.0), BasisSide::Column);
        assert_eq!(smaller_side(1.5, 1.5), BasisSide::Column);
    }

    #[test]
    fn selector_prefers_fewer_entries() {
        assert_eq!(cheaper_side(100, 10, 5, 5), BasisSide::Row);
        assert_eq!(cheaper_side(10, 100, 5, 5), BasisSide::Column);
        assert_eq!(cheaper_side(10, 10, 5, 5), BasisSide::Row);

        let kernel = PointKernel::two_cubes(60, 60, 3.0, 8);
        let (rtree, ctree) = kernel.trees(16);
        let always_column: BasisSelector = |_, _, _, _| BasisSide::Column;
        let hybrid = GreenHybrid::new(&GreenParams::default(), 1e-6, BasisSide::Mixed, &rtree, &ctree)
            .with_selector(always_column);
        let rk = hybrid.farfield_block(&kernel, &rtree, &ctree, 0, 0);
        assert_eq!(rk.b, hybrid.col_cluster(&kernel, &ctree, 0).v);
    }
}
