/////////////////////////////////////////////////////////////////////////////////////////////
//
// Builds nested cluster bases and coupling matrices for H2 matrices.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    aca::{aca_full_pivoting, normalize_at_pivots},
    cluster::ClusterTree,
    green::{build_green_cluster, green_matrix, ClusterCache, ClusterRole, GreenSurface},
    matrices::BasisNode,
    quadrature::InterpolationGrid,
    traits::BemKernel,
};
use faer::Mat;

/// Pivot data of a nested greenhybrid basis.
#[derive(Debug, Clone)]
pub struct GreenBasisEntry {
    /// Pivots as positions within the cluster.
    pub xi: Vec<usize>,
    /// Pivots as global indices.
    pub xihat: Vec<usize>,
    /// Triangular factor `R` of the orthogonalisation `V = Q R`, orthogonal variant only.
    pub qinv: Option<Mat<f64>>,
    pub rank: usize,
    pub sons: usize,
    /// The basis data handed out to the assembler.
    pub node: BasisNode,
}

pub type GreenBasisCache = ClusterCache<GreenBasisEntry>;

/// Nested greenhybrid bases, optionally with orthonormal columns.
#[derive(Debug)]
pub struct NestedGreen {
    pub surface: GreenSurface,
    pub accuracy: f64,
    pub orthogonal: bool,
    pub row_cache: GreenBasisCache,
    pub col_cache: GreenBasisCache,
}

impl NestedGreen {
    pub fn new(surface: GreenSurface, accuracy: f64, orthogonal: bool, rtree: &ClusterTree, ctree: &ClusterTree) -> Self {
        NestedGreen {
            surface,
            accuracy,
            orthogonal,
            row_cache: GreenBasisCache::new(rtree.len()),
            col_cache: GreenBasisCache::new(ctree.len()),
        }
    }

    fn cache(&self, role: ClusterRole) -> &GreenBasisCache {
        match role {
            ClusterRole::Row => &self.row_cache,
            ClusterRole::Column => &self.col_cache,
        }
    }

    pub fn leaf_basis(&self, kernel: &dyn BemKernel, role: ClusterRole, tree: &ClusterTree, id: usize) -> BasisNode {
        let entry = self.cache(role).get_or_build(id, || {
            let gc = build_green_cluster(kernel, &self.surface, role, tree, id, self.accuracy);
            let rank = gc.rank();

            let (v, qinv) = if self.orthogonal {
                let (q, r) = thin_qr(&gc.v);
                (q, Some(r))
            } else {
                (gc.v, None)
            };

            GreenBasisEntry {
                xi: gc.xi,
                xihat: gc.xihat,
                qinv,
                rank,
                sons: 0,
                node: BasisNode {
                    k: rank,
                    v,
                    transfers: Vec::new(),
                },
            }
        });
        entry.node.clone()
    }

    /// Builds the transfer matrices of cluster `id` from the bases of its sons.
    ///
    /// # Panics
    /// If a son has not been built yet, or if an orthogonal son lacks its triangular factor.
    pub fn transfer_basis(
        &self,
        kernel: &dyn BemKernel,
        role: ClusterRole,
        tree: &ClusterTree,
        id: usize,
        sons: &[&BasisNode],
    ) -> BasisNode {
        let cache = self.cache(role);
        let entry = cache.get_or_build(id, || {
            let cluster = tree.cluster(id);
            assert_eq!(sons.len(), cluster.sons.len());

            let son_entries: Vec<&GreenBasisEntry> = cluster
                .sons
                .iter()
                .zip(sons)
                .map(|(&son, node)| {
                    let entry = cache
                        .get(son)
                        .unwrap_or_else(|| panic!("basis of cluster {son} requested before it was built"));
                    assert_eq!(entry.rank, node.k);
                    entry
                })
                .collect();

            // Candidate rows: the pivots of all sons, in son order
            let candidates: Vec<usize> = son_entries
                .iter()
                .flat_map(|e| e.xihat.iter().copied())
                .collect();

            let (z, n) = self.surface.quadpoints(cluster);
            let g = green_matrix(kernel, role, &candidates, z.as_ref(), n.as_ref());
            let aca = aca_full_pivoting(g.as_ref(), &self.accuracy);
            let rank = aca.rank();
            assert!(rank <= cluster.size, "more pivots than indices in cluster {id}");

            let mut v = aca.a;
            normalize_at_pivots(&mut v, &aca.row_pivots);

            let mut xi = Vec::with_capacity(rank);
            for &pivot in &aca.row_pivots {
                let mut rank_offset = 0;
                for (&son, entry) in cluster.sons.iter().zip(&son_entries) {
                    if pivot < rank_offset + entry.rank {
                        let size_offset = tree.cluster(son).offset - cluster.offset;
                        xi.push(entry.xi[pivot - rank_offset] + size_offset);
                        break;
                    }
                    rank_offset += entry.rank;
                }
            }
            let idx = tree.indices(id);
            let xihat: Vec<usize> = xi.iter().map(|&i| idx[i]).collect();

            let (stacked, qinv) = if self.orthogonal {
                let mut weighted = Mat::<f64>::zeros(v.nrows(), rank);
                let mut rank_offset = 0;
                for (&son, entry) in cluster.sons.iter().zip(&son_entries) {
                    let r = entry
                        .qinv
                        .as_ref()
                        .unwrap_or_else(|| panic!("orthogonal basis of cluster {son} has no triangular factor"));
                    let block = v.as_ref().subrows(rank_offset, entry.rank);
                    weighted
                        .as_mut()
                        .subrows_mut(rank_offset, entry.rank)
                        .copy_from((r * block).as_ref());
                    rank_offset += entry.rank;
                }
                let (q, r) = thin_qr(&weighted);
                (q, Some(r))
            } else {
                (v, None)
            };

            let mut transfers = Vec::with_capacity(son_entries.len());
            let mut rank_offset = 0;
            for entry in &son_entries {
                transfers.push(stacked.as_ref().subrows(rank_offset, entry.rank).to_owned());
                rank_offset += entry.rank;
            }

            log::debug!(
                "nested basis {id} ({role:?}): rank {rank} from {} candidates",
                candidates.len()
            );

            GreenBasisEntry {
                xi,
                xihat,
                qinv,
                rank,
                sons: cluster.sons.len(),
                node: BasisNode {
                    k: rank,
                    v: Mat::zeros(0, rank),
                    transfers,
                },
            }
        });
        entry.node.clone()
    }

    /// Coupling `S = M[xihat_r, xihat_c]`, or `R_r S R_c^T` for orthonormal bases.
    ///
    /// # Panics
    /// If either basis has not been built.
    pub fn coupling(&self, kernel: &dyn BemKernel, row: usize, col: usize) -> Mat<f64> {
        let r = self
            .row_cache
            .get(row)
            .unwrap_or_else(|| panic!("row basis {row} has not been built"));
        let c = self
            .col_cache
            .get(col)
            .unwrap_or_else(|| panic!("column basis {col} has not been built"));

        let s = kernel.nearfield(&r.xihat, &c.xihat);
        match (&r.qinv, &c.qinv) {
            (Some(rr), Some(rc)) => rr * s * rc.transpose(),
            _ => s,
        }
    }
}

/// Thin QR decomposition `m = Q R`.
fn thin_qr(m: &Mat<f64>) -> (Mat<f64>, Mat<f64>) {
    if m.ncols() == 0 || m.nrows() == 0 {
        return (Mat::zeros(m.nrows(), m.ncols()), Mat::zeros(m.ncols(), m.ncols()));
    }
    let qr = m.qr();
    (qr.compute_thin_Q(), qr.thin_R().to_owned())
}

/// Tensor Chebyshev interpolation bases.
#[derive(Debug, Clone)]
pub struct NestedInterpolation {
    pub order: usize,
}

impl NestedInterpolation {
    pub fn grid(&self, tree: &ClusterTree, id: usize) -> InterpolationGrid {
        let c = tree.cluster(id);
        InterpolationGrid::new(self.order, &c.bmin, &c.bmax)
    }

    pub fn leaf_basis(&self, kernel: &dyn BemKernel, role: ClusterRole, tree: &ClusterTree, id: usize) -> BasisNode {
        let grid = self.grid(tree, id);
        let idx = tree.indices(id);
        let v = match role {
            ClusterRole::Row => kernel.lagrange_row(idx, &grid.px, &grid.py, &grid.pz),
            ClusterRole::Column => kernel.lagrange_col(idx, &grid.px, &grid.py, &grid.pz),
        };
        BasisNode {
            k: grid.len(),
            v,
            transfers: Vec::new(),
        }
    }

    /// `E_s[μ, ν] = L^t_ν(x^s_μ)`: the father's Lagrange polynomials at the son's nodes.
    pub fn transfer_basis(&self, tree: &ClusterTree, id: usize) -> BasisNode {
        let grid = self.grid(tree, id);
        let transfers = tree
            .cluster(id)
            .sons
            .iter()
            .map(|&son| grid.lagrange(self.grid(tree, son).points().as_ref()))
            .collect();
        BasisNode {
            k: grid.len(),
            v: Mat::zeros(0, grid.len()),
            transfers,
        }
    }

    pub fn coupling(&self, kernel: &dyn BemKernel, rtree: &ClusterTree, ctree: &ClusterTree, row: usize, col: usize) -> Mat<f64> {
        let xr = self.grid(rtree, row).points();
        let xc = self.grid(ctree, col).points();
        kernel.fundamental(xr.as_ref(), xc.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::GreenParams, matrices::ClusterBasis, test_kernels::PointKernel, traits::NearfieldProvider,
    };
    use approx::assert_relative_eq;

    fn build_basis(
        nested: &NestedGreen,
        kernel: &PointKernel,
        role: ClusterRole,
        tree: &ClusterTree,
    ) -> ClusterBasis {
        build_nodes(nested, kernel, role, tree, tree.post_order())
    }

    /// Builds the given clusters in order; sons must precede their father.
    fn build_nodes(
        nested: &NestedGreen,
        kernel: &PointKernel,
        role: ClusterRole,
        tree: &ClusterTree,
        ids: Vec<usize>,
    ) -> ClusterBasis {
        let mut basis = ClusterBasis::new(tree);
        for id in ids {
            let c = tree.cluster(id);
            basis.nodes[id] = if c.is_leaf() {
                nested.leaf_basis(kernel, role, tree, id)
            } else {
                let sons: Vec<BasisNode> = c.sons.iter().map(|&s| basis.nodes[s].clone()).collect();
                let refs: Vec<&BasisNode> = sons.iter().collect();
                nested.transfer_basis(kernel, role, tree, id, &refs)
            };
        }
        basis
    }

    #[test]
    fn nested_pivots_are_consistent() {
        let kernel = PointKernel::random_cube(300, 2);
        let (tree, _) = kernel.trees(24);
        let nested = NestedGreen::new(GreenSurface::new(&GreenParams::default()), 1e-6, false, &tree, &tree);
        let basis = build_basis(&nested, &kernel, ClusterRole::Row, &tree);

        for id in 0..tree.len() {
            let entry = nested.row_cache.get(id).unwrap();
            assert_eq!(entry.xi.len(), entry.rank);
            assert_eq!(entry.xihat.len(), entry.rank);
            assert_eq!(basis.rank(id), entry.rank);
            assert!(entry.rank <= tree.cluster(id).size);

            // The expanded basis interpolates at its pivots
            let v = basis.expand(&tree, id);
            for (i, &p) in entry.xi.iter().enumerate() {
                assert_eq!(tree.indices(id)[p], entry.xihat[i]);
                for j in 0..entry.rank {
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert!((v[(p, j)] - expected).abs() < 1e-8);
                }
            }
        }
        assert_eq!(nested.row_cache.builds(), tree.len());
    }

    #[test]
    fn orthogonal_bases_have_orthonormal_columns() {
        let kernel = PointKernel::random_cube(300, 12);
        let (tree, _) = kernel.trees(24);
        let nested = NestedGreen::new(GreenSurface::new(&GreenParams::default()), 1e-6, true, &tree, &tree);
        let basis = build_basis(&nested, &kernel, ClusterRole::Column, &tree);

        for id in 0..tree.len() {
            let v = basis.expand(&tree, id);
            let gram = v.transpose() * &v;
            for i in 0..gram.nrows() {
                for j in 0..gram.ncols() {
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert_relative_eq!(gram[(i, j)], expected, epsilon = 1e-10);
                }
            }
            let entry = nested.col_cache.get(id).unwrap();
            let r = entry.qinv.as_ref().unwrap();
            assert_eq!(r.nrows(), entry.rank);
        }
    }

    #[test]
    fn orthogonal_bases_span_the_interpolation_bases() {
        let kernel = PointKernel::random_cube(400, 14);
        let (tree, _) = kernel.trees(20);
        let surface = GreenSurface::new(&GreenParams::default());
        let plain = NestedGreen::new(surface.clone(), 1e-6, false, &tree, &tree);
        let ortho = NestedGreen::new(surface, 1e-6, true, &tree, &tree);
        let plain_basis = build_basis(&plain, &kernel, ClusterRole::Row, &tree);
        let ortho_basis = build_basis(&ortho, &kernel, ClusterRole::Row, &tree);

        // Q_t R_t reproduces the pivot interpolation operator V_t at every level
        for id in 0..tree.len() {
            let p = plain.row_cache.get(id).unwrap();
            let o = ortho.row_cache.get(id).unwrap();
            assert_eq!(p.xihat, o.xihat);

            let r = o.qinv.as_ref().unwrap();
            let q = ortho_basis.expand(&tree, id);
            let v = plain_basis.expand(&tree, id);
            let diff = (&q * r - &v).norm_l2();
            assert!(diff < 1e-9 * v.norm_l2(), "cluster {id}: {diff}");

            let gram = q.transpose() * &q;
            for i in 0..gram.nrows() {
                for j in 0..gram.ncols() {
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert_relative_eq!(gram[(i, j)], expected, epsilon = 1e-10);
                }
            }
        }

        // A son's expanded basis times its transfer gives the parent restricted to the son
        let root = tree.root();
        let q_root = ortho_basis.expand(&tree, 0);
        for (k, &son) in root.sons.iter().enumerate() {
            let sc = tree.cluster(son);
            let nested = ortho_basis.expand(&tree, son) * &ortho_basis.nodes[0].transfers[k];
            let direct = q_root.as_ref().subrows(sc.offset, sc.size);
            assert!((&nested - direct).norm_l2() < 1e-12 * direct.norm_l2().max(1.0));
        }
    }

    #[test]
    #[should_panic(expected = "has no triangular factor")]
    fn orthogonal_transfer_requires_son_factors() {
        let kernel = PointKernel::random_cube(200, 15);
        let (tree, _) = kernel.trees(24);
        let mut nested = NestedGreen::new(GreenSurface::new(&GreenParams::default()), 1e-6, false, &tree, &tree);
        let below_root: Vec<usize> = tree.post_order().into_iter().filter(|&id| id != 0).collect();
        let basis = build_nodes(&nested, &kernel, ClusterRole::Row, &tree, below_root);
        let sons: Vec<BasisNode> = tree.root().sons.iter().map(|&s| basis.nodes[s].clone()).collect();
        let refs: Vec<&BasisNode> = sons.iter().collect();

        nested.orthogonal = true;
        nested.transfer_basis(&kernel, ClusterRole::Row, &tree, 0, &refs);
    }

    #[test]
    fn orthogonal_coupling_reproduces_far_field_block() {
        let kernel = PointKernel::two_cubes(200, 200, 3.0, 6);
        let (rtree, ctree) = kernel.trees(32);
        let surface = GreenSurface::new(&GreenParams::default());

        for orthogonal in [false, true] {
            let nested = NestedGreen::new(surface.clone(), 1e-8, orthogonal, &rtree, &ctree);
            let rows = build_basis(&nested, &kernel, ClusterRole::Row, &rtree);
            let cols = build_basis(&nested, &kernel, ClusterRole::Column, &ctree);

            let s = nested.coupling(&kernel, 0, 0);
            let approx = rows.expand(&rtree, 0) * &s * cols.expand(&ctree, 0).transpose();
            let exact = kernel.nearfield(rtree.indices(0), ctree.indices(0));
            let err = (&approx - &exact).norm_l2() / exact.norm_l2();
            assert!(err < 1e-4, "orthogonal = {orthogonal}: {err}");
        }
    }

    #[test]
    fn interpolation_transfers_are_nested() {
        let kernel = PointKernel::random_cube(150, 30);
        let (tree, _) = kernel.trees(20);
        let interpolation = NestedInterpolation { order: 3 };

        // V_t restricted to a son equals V_s E_s for polynomial-exact transfers
        let root = tree.root();
        let parent = interpolation.leaf_basis(&kernel, ClusterRole::Row, &tree, 0);
        let transfer = interpolation.transfer_basis(&tree, 0);
        for (k, &son) in root.sons.iter().enumerate() {
            let vs = interpolation.leaf_basis(&kernel, ClusterRole::Row, &tree, son);
            let nested = &vs.v * &transfer.transfers[k];
            let offset = tree.cluster(son).offset;
            let direct = parent.v.as_ref().subrows(offset, tree.cluster(son).size);
            let diff = (&nested - direct).norm_l2();
            assert!(diff < 1e-10 * direct.norm_l2());
        }
    }
}
