/////////////////////////////////////////////////////////////////////////////////////////////
//
// Low-rank, hierarchical and nested (H2) matrix containers with matrix-vector products.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    aca::{find_rank, truncate_factors},
    block::{Block, BlockKind},
    cluster::ClusterTree,
    config::TruncationMode,
    error::BemError,
    utils::{gemv_add, gemv_transposed_add, permute_backward, permute_forward},
};
use faer::{Mat, MatRef};
use rayon::prelude::*;

/// Low-rank matrix `A * B^T`.
#[derive(Debug, Clone)]
pub struct RkMatrix {
    /// Left factor (rows × rank).
    pub a: Mat<f64>,
    /// Right factor (columns × rank).
    pub b: Mat<f64>,
}

impl RkMatrix {
    pub fn new(a: Mat<f64>, b: Mat<f64>) -> Self {
        debug_assert_eq!(a.ncols(), b.ncols());
        RkMatrix { a, b }
    }

    /// Rank zero matrix of the given shape.
    pub fn zeros(rows: usize, cols: usize) -> Self {
        RkMatrix {
            a: Mat::zeros(rows, 0),
            b: Mat::zeros(cols, 0),
        }
    }

    /// Best approximation of a dense matrix, truncated by SVD.
    pub fn from_dense(m: MatRef<f64>, mode: &TruncationMode, epsilon: f64) -> Result<Self, BemError> {
        if m.nrows() == 0 || m.ncols() == 0 {
            return Ok(RkMatrix::zeros(m.nrows(), m.ncols()));
        }
        let svd = m.svd().map_err(|_| BemError::SvdFailed)?;
        let s = svd.S().column_vector();
        let sigma: Vec<f64> = s.iter().cloned().collect();
        let k = find_rank(&sigma, mode, &epsilon);

        let a = svd.U().subcols(0, k) * s.subrows(0, k).as_diagonal();
        let b = svd.V().subcols(0, k).to_owned();
        Ok(RkMatrix { a, b })
    }

    pub fn rank(&self) -> usize {
        self.a.ncols()
    }

    pub fn rows(&self) -> usize {
        self.a.nrows()
    }

    pub fn cols(&self) -> usize {
        self.b.nrows()
    }

    /// Number of stored coefficients.
    pub fn storage(&self) -> usize {
        (self.rows() + self.cols()) * self.rank()
    }

    pub fn to_dense(&self) -> Mat<f64> {
        if self.rank() == 0 {
            return Mat::zeros(self.rows(), self.cols());
        }
        &self.a * self.b.transpose()
    }

    /// Recompresses the factors in place, see [`truncate_factors`].
    pub fn truncate(&mut self, mode: &TruncationMode, epsilon: f64) -> Result<(), BemError> {
        let (a, b) = truncate_factors(self.a.as_ref(), self.b.as_ref(), mode, &epsilon)?;
        self.a = a;
        self.b = b;
        Ok(())
    }

    /// `y += A (B^T x)`
    pub fn mvm_add(&self, x: &[f64], y: &mut [f64]) {
        let mut t = vec![0.0; self.rank()];
        gemv_transposed_add(self.b.as_ref(), x, &mut t);
        gemv_add(self.a.as_ref(), &t, y);
    }
}

/// Content of an [`HMatrix`] node.
#[derive(Debug, Clone)]
pub enum HData {
    LowRank(RkMatrix),
    Full(Mat<f64>),
    /// `sons[i * csons + j]` is the block of row son `i` and column son `j`.
    Sons {
        rsons: usize,
        csons: usize,
        sons: Vec<HMatrix>,
    },
}

/// Hierarchical matrix following the structure of a [`Block`] tree.
///
/// Offsets refer to positions in the index permutations of the row and
/// column cluster trees.
#[derive(Debug, Clone)]
pub struct HMatrix {
    pub row: usize,
    pub col: usize,
    pub row_offset: usize,
    pub col_offset: usize,
    pub rows: usize,
    pub cols: usize,
    pub data: HData,
}

impl HMatrix {
    /// Allocates an empty matrix: rank zero far-field blocks and zero near-field blocks.
    pub fn from_block(block: &Block, rtree: &ClusterTree, ctree: &ClusterTree) -> Self {
        let t = rtree.cluster(block.row);
        let s = ctree.cluster(block.col);
        let data = match &block.kind {
            BlockKind::Admissible => HData::LowRank(RkMatrix::zeros(t.size, s.size)),
            BlockKind::Inadmissible => HData::Full(Mat::zeros(t.size, s.size)),
            BlockKind::Sons { rsons, csons, sons } => HData::Sons {
                rsons: *rsons,
                csons: *csons,
                sons: sons
                    .iter()
                    .map(|b| HMatrix::from_block(b, rtree, ctree))
                    .collect(),
            },
        };

        HMatrix {
            row: block.row,
            col: block.col,
            row_offset: t.offset,
            col_offset: s.offset,
            rows: t.size,
            cols: s.size,
            data,
        }
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self.data, HData::Sons { .. })
    }

    /// `y += M x` with `x` and `y` in cluster tree order.
    pub fn mvm_add(&self, x: &[f64], y: &mut [f64]) {
        let xs = &x[self.col_offset..self.col_offset + self.cols];
        match &self.data {
            HData::LowRank(rk) => {
                rk.mvm_add(xs, &mut y[self.row_offset..self.row_offset + self.rows])
            }
            HData::Full(m) => gemv_add(
                m.as_ref(),
                xs,
                &mut y[self.row_offset..self.row_offset + self.rows],
            ),
            HData::Sons { sons, .. } => sons.iter().for_each(|son| son.mvm_add(x, y)),
        }
    }

    /// Computes `M x` for `x` in global index order.
    pub fn apply(&self, rtree: &ClusterTree, ctree: &ClusterTree, x: &[f64]) -> Result<Vec<f64>, BemError> {
        if x.len() != ctree.idx.len() {
            return Err(BemError::DimensionMismatch {
                expected: ctree.idx.len(),
                found: x.len(),
            });
        }
        let xp = permute_forward(x, &ctree.idx);
        let mut yp = vec![0.0; rtree.idx.len()];
        self.mvm_add(&xp, &mut yp);
        Ok(permute_backward(&yp, &rtree.idx))
    }

    /// Dense matrix in global index order.
    pub fn to_dense(&self, rtree: &ClusterTree, ctree: &ClusterTree) -> Mat<f64> {
        let mut permuted = Mat::<f64>::zeros(rtree.idx.len(), ctree.idx.len());
        self.write_dense(&mut permuted);
        unpermute(&permuted, rtree, ctree)
    }

    fn write_dense(&self, out: &mut Mat<f64>) {
        let block = match &self.data {
            HData::LowRank(rk) => rk.to_dense(),
            HData::Full(m) => m.clone(),
            HData::Sons { sons, .. } => {
                sons.iter().for_each(|son| son.write_dense(out));
                return;
            }
        };
        out.as_mut()
            .submatrix_mut(self.row_offset, self.col_offset, self.rows, self.cols)
            .copy_from(block.as_ref());
    }

    /// Number of stored coefficients.
    pub fn storage(&self) -> usize {
        match &self.data {
            HData::LowRank(rk) => rk.storage(),
            HData::Full(m) => m.nrows() * m.ncols(),
            HData::Sons { sons, .. } => sons.iter().map(HMatrix::storage).sum(),
        }
    }

    /// Largest rank of any low-rank block.
    pub fn max_rank(&self) -> usize {
        match &self.data {
            HData::LowRank(rk) => rk.rank(),
            HData::Full(_) => 0,
            HData::Sons { sons, .. } => sons.iter().map(HMatrix::max_rank).max().unwrap_or(0),
        }
    }

    /// Number of low-rank leaves.
    pub fn count_low_rank(&self) -> usize {
        match &self.data {
            HData::LowRank(_) => 1,
            HData::Full(_) => 0,
            HData::Sons { sons, .. } => sons.iter().map(HMatrix::count_low_rank).sum(),
        }
    }

    /// Truncates every low-rank leaf in parallel.
    pub fn truncate_low_rank(&mut self, mode: &TruncationMode, epsilon: f64) -> Result<(), BemError> {
        match &mut self.data {
            HData::LowRank(rk) => rk.truncate(mode, epsilon),
            HData::Full(_) => Ok(()),
            HData::Sons { sons, .. } => sons
                .par_iter_mut()
                .try_for_each(|son| son.truncate_low_rank(mode, epsilon)),
        }
    }

    /// Bottom-up coarsening.
    ///
    /// A block whose sons are all leaves is replaced by one low-rank block if
    /// the merged factors, truncated at `epsilon`, need no more storage than
    /// the sons. `on_merge` receives the shape and rank of each merged block.
    pub fn coarsen<F>(&mut self, mode: &TruncationMode, epsilon: f64, on_merge: &F) -> Result<(), BemError>
    where
        F: Fn(usize, usize, usize) + Sync,
    {
        let merged = {
            let HData::Sons { sons, .. } = &mut self.data else {
                return Ok(());
            };
            sons.par_iter_mut()
                .try_for_each(|son| son.coarsen(mode, epsilon, on_merge))?;

            if !sons.iter().all(HMatrix::is_leaf) {
                return Ok(());
            }

            let sons_storage: usize = sons.iter().map(HMatrix::storage).sum();
            let mut factors = Vec::with_capacity(sons.len());
            for son in sons.iter() {
                let rk = match &son.data {
                    HData::LowRank(rk) => rk.clone(),
                    HData::Full(m) => RkMatrix::from_dense(m.as_ref(), mode, epsilon)?,
                    HData::Sons { .. } => unreachable!("sons were checked to be leaves"),
                };
                factors.push((son.row_offset - self.row_offset, son.col_offset - self.col_offset, rk));
            }

            let total_rank: usize = factors.iter().map(|(_, _, rk)| rk.rank()).sum();
            let mut a = Mat::<f64>::zeros(self.rows, total_rank);
            let mut b = Mat::<f64>::zeros(self.cols, total_rank);
            let mut k = 0;
            for (ro, co, rk) in &factors {
                a.as_mut()
                    .submatrix_mut(*ro, k, rk.rows(), rk.rank())
                    .copy_from(rk.a.as_ref());
                b.as_mut()
                    .submatrix_mut(*co, k, rk.cols(), rk.rank())
                    .copy_from(rk.b.as_ref());
                k += rk.rank();
            }

            let mut merged = RkMatrix::new(a, b);
            merged.truncate(mode, epsilon)?;
            if merged.storage() > sons_storage {
                return Ok(());
            }
            merged
        };

        on_merge(self.rows, self.cols, merged.rank());
        self.data = HData::LowRank(merged);
        Ok(())
    }
}

/// Scatters a matrix in cluster tree order back to global order.
fn unpermute(permuted: &Mat<f64>, rtree: &ClusterTree, ctree: &ClusterTree) -> Mat<f64> {
    let mut result = Mat::<f64>::zeros(permuted.nrows(), permuted.ncols());
    for (pj, &j) in ctree.idx.iter().enumerate() {
        for (pi, &i) in rtree.idx.iter().enumerate() {
            result[(i, j)] = permuted[(pi, pj)];
        }
    }
    result
}

/// Basis data of a single cluster.
///
/// Leaves store `v` (cluster size × k). Inner clusters store one transfer
/// matrix `E_s` (k_s × k) per son with `V_t|_s = V_s E_s`.
#[derive(Debug, Clone)]
pub struct BasisNode {
    pub k: usize,
    pub v: Mat<f64>,
    pub transfers: Vec<Mat<f64>>,
}

/// Nested cluster basis, indexed by cluster id.
#[derive(Debug, Clone)]
pub struct ClusterBasis {
    pub nodes: Vec<BasisNode>,
}

impl ClusterBasis {
    /// Rank zero basis for every cluster of `tree`.
    pub fn new(tree: &ClusterTree) -> Self {
        let nodes = tree
            .clusters
            .iter()
            .map(|c| BasisNode {
                k: 0,
                v: Mat::zeros(if c.is_leaf() { c.size } else { 0 }, 0),
                transfers: c
                    .sons
                    .iter()
                    .map(|_| Mat::zeros(0, 0))
                    .collect(),
            })
            .collect();
        ClusterBasis { nodes }
    }

    pub fn rank(&self, id: usize) -> usize {
        self.nodes[id].k
    }

    /// Number of stored coefficients.
    pub fn storage(&self) -> usize {
        self.nodes
            .iter()
            .map(|n| {
                n.v.nrows() * n.v.ncols()
                    + n.transfers.iter().map(|e| e.nrows() * e.ncols()).sum::<usize>()
            })
            .sum()
    }

    /// Coefficients `V_t^T x|_t` for every cluster, `x` in tree order.
    pub fn forward(&self, tree: &ClusterTree, x: &[f64]) -> Vec<Vec<f64>> {
        let mut xhat: Vec<Vec<f64>> = self.nodes.iter().map(|n| vec![0.0; n.k]).collect();
        for id in tree.post_order() {
            let c = tree.cluster(id);
            let node = &self.nodes[id];
            let mut coeffs = vec![0.0; node.k];
            if c.is_leaf() {
                gemv_transposed_add(node.v.as_ref(), &x[c.offset..c.offset + c.size], &mut coeffs);
            } else {
                for (e, &son) in node.transfers.iter().zip(&c.sons) {
                    gemv_transposed_add(e.as_ref(), &xhat[son], &mut coeffs);
                }
            }
            xhat[id] = coeffs;
        }
        xhat
    }

    /// Adds `V_t yhat_t` of every cluster to `y`, `y` in tree order.
    pub fn backward(&self, tree: &ClusterTree, mut yhat: Vec<Vec<f64>>, y: &mut [f64]) {
        // Pre-order ids visit every father before its sons
        for id in 0..tree.len() {
            let c = tree.cluster(id);
            let node = &self.nodes[id];
            let coeffs = std::mem::take(&mut yhat[id]);
            if c.is_leaf() {
                gemv_add(node.v.as_ref(), &coeffs, &mut y[c.offset..c.offset + c.size]);
            } else {
                for (e, &son) in node.transfers.iter().zip(&c.sons) {
                    gemv_add(e.as_ref(), &coeffs, &mut yhat[son]);
                }
            }
        }
    }

    /// The full basis matrix `V_t` (cluster size × k).
    pub fn expand(&self, tree: &ClusterTree, id: usize) -> Mat<f64> {
        let c = tree.cluster(id);
        let node = &self.nodes[id];
        if c.is_leaf() {
            return node.v.clone();
        }
        let mut v = Mat::<f64>::zeros(c.size, node.k);
        for (e, &son) in node.transfers.iter().zip(&c.sons) {
            let sc = tree.cluster(son);
            let vs = self.expand(tree, son);
            v.as_mut()
                .submatrix_mut(sc.offset - c.offset, 0, sc.size, node.k)
                .copy_from((&vs * e).as_ref());
        }
        v
    }

    /// `V_t^T m` for a matrix `m` with one row per index of cluster `id`.
    pub fn project(&self, tree: &ClusterTree, id: usize, m: MatRef<f64>) -> Mat<f64> {
        let c = tree.cluster(id);
        let node = &self.nodes[id];
        if c.is_leaf() {
            return node.v.transpose() * m;
        }
        let mut result = Mat::<f64>::zeros(node.k, m.ncols());
        for (e, &son) in node.transfers.iter().zip(&c.sons) {
            let sc = tree.cluster(son);
            let rows = m.subrows(sc.offset - c.offset, sc.size);
            let projected = self.project(tree, son, rows);
            result += e.transpose() * &projected;
        }
        result
    }
}

/// Content of an [`H2Block`].
#[derive(Debug, Clone)]
pub enum H2Data {
    /// Coupling matrix `S` (k_row × k_col) of the block `V_r S W_c^T`.
    Uniform(Mat<f64>),
    Full(Mat<f64>),
    Sons {
        rsons: usize,
        csons: usize,
        sons: Vec<H2Block>,
    },
}

#[derive(Debug, Clone)]
pub struct H2Block {
    pub row: usize,
    pub col: usize,
    pub row_offset: usize,
    pub col_offset: usize,
    pub rows: usize,
    pub cols: usize,
    pub data: H2Data,
}

impl H2Block {
    pub fn from_block(block: &Block, rtree: &ClusterTree, ctree: &ClusterTree) -> Self {
        let t = rtree.cluster(block.row);
        let s = ctree.cluster(block.col);
        let data = match &block.kind {
            BlockKind::Admissible => H2Data::Uniform(Mat::zeros(0, 0)),
            BlockKind::Inadmissible => H2Data::Full(Mat::zeros(t.size, s.size)),
            BlockKind::Sons { rsons, csons, sons } => H2Data::Sons {
                rsons: *rsons,
                csons: *csons,
                sons: sons
                    .iter()
                    .map(|b| H2Block::from_block(b, rtree, ctree))
                    .collect(),
            },
        };

        H2Block {
            row: block.row,
            col: block.col,
            row_offset: t.offset,
            col_offset: s.offset,
            rows: t.size,
            cols: s.size,
            data,
        }
    }

    fn mvm_add(&self, xhat: &[Vec<f64>], yhat: &mut [Vec<f64>], x: &[f64], y: &mut [f64]) {
        match &self.data {
            H2Data::Uniform(s) => gemv_add(s.as_ref(), &xhat[self.col], &mut yhat[self.row]),
            H2Data::Full(m) => gemv_add(
                m.as_ref(),
                &x[self.col_offset..self.col_offset + self.cols],
                &mut y[self.row_offset..self.row_offset + self.rows],
            ),
            H2Data::Sons { sons, .. } => {
                sons.iter().for_each(|son| son.mvm_add(xhat, yhat, x, y))
            }
        }
    }

    fn storage(&self) -> usize {
        match &self.data {
            H2Data::Uniform(s) | H2Data::Full(s) => s.nrows() * s.ncols(),
            H2Data::Sons { sons, .. } => sons.iter().map(H2Block::storage).sum(),
        }
    }

    fn write_dense(&self, rows: &ClusterBasis, cols: &ClusterBasis, rtree: &ClusterTree, ctree: &ClusterTree, out: &mut Mat<f64>) {
        let block = match &self.data {
            H2Data::Uniform(s) => {
                let v = rows.expand(rtree, self.row);
                let w = cols.expand(ctree, self.col);
                &v * s * w.transpose()
            }
            H2Data::Full(m) => m.clone(),
            H2Data::Sons { sons, .. } => {
                sons.iter()
                    .for_each(|son| son.write_dense(rows, cols, rtree, ctree, out));
                return;
            }
        };
        out.as_mut()
            .submatrix_mut(self.row_offset, self.col_offset, self.rows, self.cols)
            .copy_from(block.as_ref());
    }
}

/// Nested hierarchical matrix: row and column cluster bases plus the block tree.
#[derive(Debug, Clone)]
pub struct H2Matrix {
    pub row_basis: ClusterBasis,
    pub col_basis: ClusterBasis,
    pub root: H2Block,
}

impl H2Matrix {
    pub fn from_block(block: &Block, rtree: &ClusterTree, ctree: &ClusterTree) -> Self {
        H2Matrix {
            row_basis: ClusterBasis::new(rtree),
            col_basis: ClusterBasis::new(ctree),
            root: H2Block::from_block(block, rtree, ctree),
        }
    }

    /// Computes `M x` for `x` in global index order.
    pub fn apply(&self, rtree: &ClusterTree, ctree: &ClusterTree, x: &[f64]) -> Result<Vec<f64>, BemError> {
        if x.len() != ctree.idx.len() {
            return Err(BemError::DimensionMismatch {
                expected: ctree.idx.len(),
                found: x.len(),
            });
        }
        let xp = permute_forward(x, &ctree.idx);
        let xhat = self.col_basis.forward(ctree, &xp);
        let mut yhat: Vec<Vec<f64>> = self
            .row_basis
            .nodes
            .iter()
            .map(|n| vec![0.0; n.k])
            .collect();
        let mut yp = vec![0.0; rtree.idx.len()];

        self.root.mvm_add(&xhat, &mut yhat, &xp, &mut yp);
        self.row_basis.backward(rtree, yhat, &mut yp);

        Ok(permute_backward(&yp, &rtree.idx))
    }

    /// Dense matrix in global index order.
    pub fn to_dense(&self, rtree: &ClusterTree, ctree: &ClusterTree) -> Mat<f64> {
        let mut permuted = Mat::<f64>::zeros(rtree.idx.len(), ctree.idx.len());
        self.root
            .write_dense(&self.row_basis, &self.col_basis, rtree, ctree, &mut permuted);
        unpermute(&permuted, rtree, ctree)
    }

    /// Number of stored coefficients in bases and blocks.
    pub fn storage(&self) -> usize {
        self.row_basis.storage() + self.col_basis.storage() + self.root.storage()
    }
}
