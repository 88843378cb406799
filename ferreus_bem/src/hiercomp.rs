/////////////////////////////////////////////////////////////////////////////////////////////
//
// Converts a flat hierarchical matrix into a nested one by hierarchical compression.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Bottom-up construction of orthonormal nested bases from the far-field
//! blocks of an [`HMatrix`].
//!
//! Every row cluster `t` collects the weighted factors `A R_B^T` of all
//! low-rank blocks whose row cluster is `t` or one of its ancestors. The
//! column side works the same way with `B R_A^T`. Leaves compress this
//! matrix by a truncated SVD; inner clusters compress the stacked son
//! coefficients instead, which yields the transfer matrices.

use crate::{
    aca::find_rank,
    cluster::ClusterTree,
    config::TruncationMode,
    error::BemError,
    matrices::{BasisNode, ClusterBasis, H2Block, H2Data, H2Matrix, HData, HMatrix},
    progress::{report, AssemblyProgress, ProgressSink},
    utils::vcat,
};
use faer::{Mat, MatRef};
use rayon::prelude::*;
use std::sync::Arc;

/// Converts `h` into an H2 matrix with orthonormal nested bases.
///
/// # Arguments
/// * `h` - Filled flat matrix
/// * `rtree`, `ctree` - The cluster trees `h` was built on
/// * `accuracy` - Truncation accuracy at the leaf level
/// * `mode` - Truncation norm, absolute or relative, and the level factor `ζ`.
///   Clusters on level `ℓ` of a tree of depth `d` use `accuracy * ζ^(ℓ - d)`.
pub fn convert_hmatrix(
    h: &HMatrix,
    rtree: &ClusterTree,
    ctree: &ClusterTree,
    accuracy: f64,
    mode: &TruncationMode,
) -> Result<H2Matrix, BemError> {
    convert_with_progress(h, rtree, ctree, accuracy, mode, &None)
}

pub(crate) fn convert_with_progress(
    h: &HMatrix,
    rtree: &ClusterTree,
    ctree: &ClusterTree,
    accuracy: f64,
    mode: &TruncationMode,
    progress: &Option<Arc<dyn ProgressSink>>,
) -> Result<H2Matrix, BemError> {
    let mut row_factors = vec![Vec::new(); rtree.len()];
    let mut col_factors = vec![Vec::new(); ctree.len()];
    collect_weighted_factors(h, &mut row_factors, &mut col_factors);

    let (row_basis, col_basis) = rayon::join(
        || compress_tree(rtree, &row_factors, accuracy, mode),
        || compress_tree(ctree, &col_factors, accuracy, mode),
    );
    let row_basis = row_basis?;
    let col_basis = col_basis?;
    report(progress, || AssemblyProgress::HierarchicalCompression { progress: 0.5 });

    log::debug!(
        "hierarchical compression: row basis rank {} / column basis rank {} at the roots",
        row_basis.rank(0),
        col_basis.rank(0)
    );

    let root = couple(h, &row_basis, &col_basis, rtree, ctree);
    report(progress, || AssemblyProgress::HierarchicalCompression { progress: 1.0 });

    Ok(H2Matrix {
        row_basis,
        col_basis,
        root,
    })
}

/// Sorts `A R_B^T` into the row cluster and `B R_A^T` into the column cluster of each block.
fn collect_weighted_factors(h: &HMatrix, rows: &mut [Vec<Mat<f64>>], cols: &mut [Vec<Mat<f64>>]) {
    match &h.data {
        HData::LowRank(rk) => {
            if rk.rank() == 0 {
                return;
            }
            let ra = rk.a.qr().thin_R().to_owned();
            let rb = rk.b.qr().thin_R().to_owned();
            rows[h.row].push(&rk.a * rb.transpose());
            cols[h.col].push(&rk.b * ra.transpose());
        }
        HData::Full(_) => {}
        HData::Sons { sons, .. } => sons
            .iter()
            .for_each(|son| collect_weighted_factors(son, rows, cols)),
    }
}

fn compress_tree(
    tree: &ClusterTree,
    factors: &[Vec<Mat<f64>>],
    accuracy: f64,
    mode: &TruncationMode,
) -> Result<ClusterBasis, BemError> {
    let depth = tree.depth();
    let level_accuracy = |level: usize| accuracy * mode.zeta_level.powi(level as i32 - depth as i32);

    let root_size = tree.root().size;
    let (nodes, _) = compress_cluster(
        tree,
        0,
        Mat::zeros(root_size, 0).as_ref(),
        factors,
        mode,
        &level_accuracy,
    )?;
    Ok(ClusterBasis { nodes })
}

/// Returns the basis nodes of the subtree of `id` in pre-order together with
/// the coefficients `C_t` of the cluster's total far-field matrix `M_t ≈ V_t C_t`.
///
/// The first columns of `M_t` are the rows of `inherited`, so that a father
/// can read its own part of the son's coefficients as a column prefix.
fn compress_cluster<L>(
    tree: &ClusterTree,
    id: usize,
    inherited: MatRef<f64>,
    factors: &[Vec<Mat<f64>>],
    mode: &TruncationMode,
    level_accuracy: &L,
) -> Result<(Vec<BasisNode>, Mat<f64>), BemError>
where
    L: Fn(usize) -> f64 + Sync,
{
    let cluster = tree.cluster(id);
    let inherited_cols = inherited.ncols();
    let total: Mat<f64> = {
        let width = inherited_cols + factors[id].iter().map(|f| f.ncols()).sum::<usize>();
        let mut m = Mat::<f64>::zeros(cluster.size, width);
        m.as_mut()
            .subcols_mut(0, inherited_cols)
            .copy_from(inherited);
        let mut offset = inherited_cols;
        for f in &factors[id] {
            m.as_mut()
                .subcols_mut(offset, f.ncols())
                .copy_from(f.as_ref());
            offset += f.ncols();
        }
        m
    };
    let eps = level_accuracy(cluster.level);

    if cluster.is_leaf() {
        let (v, coeffs) = truncated_svd(total.as_ref(), mode, eps)?;
        let node = BasisNode {
            k: v.ncols(),
            v,
            transfers: Vec::new(),
        };
        return Ok((vec![node], coeffs));
    }

    let results = cluster
        .sons
        .par_iter()
        .map(|&son| {
            let sc = tree.cluster(son);
            compress_cluster(
                tree,
                son,
                total.as_ref().subrows(sc.offset - cluster.offset, sc.size),
                factors,
                mode,
                level_accuracy,
            )
        })
        .collect::<Result<Vec<_>, BemError>>()?;

    let width = total.ncols();
    let prefixes: Vec<MatRef<f64>> = results
        .iter()
        .map(|(_, coeffs)| coeffs.as_ref().subcols(0, width))
        .collect();
    let stacked = vcat(&prefixes, width);
    let (u, coeffs) = truncated_svd(stacked.as_ref(), mode, eps)?;

    let k = u.ncols();
    let mut transfers = Vec::with_capacity(results.len());
    let mut offset = 0;
    for prefix in &prefixes {
        transfers.push(u.as_ref().subrows(offset, prefix.nrows()).to_owned());
        offset += prefix.nrows();
    }

    let mut nodes = Vec::with_capacity(cluster.desc);
    nodes.push(BasisNode {
        k,
        v: Mat::zeros(0, k),
        transfers,
    });
    for (son_nodes, _) in results {
        nodes.extend(son_nodes);
    }
    debug_assert_eq!(nodes.len(), cluster.desc);
    Ok((nodes, coeffs))
}

/// `m ≈ U C` with orthonormal `U` and `C = Σ V^T`, truncated at `eps`.
fn truncated_svd(m: MatRef<f64>, mode: &TruncationMode, eps: f64) -> Result<(Mat<f64>, Mat<f64>), BemError> {
    if m.nrows() == 0 || m.ncols() == 0 {
        return Ok((Mat::zeros(m.nrows(), 0), Mat::zeros(0, m.ncols())));
    }
    let svd = m.thin_svd().map_err(|_| BemError::SvdFailed)?;
    let sigma: Vec<f64> = svd.S().column_vector().iter().copied().collect();
    let rank = find_rank(&sigma, mode, &eps);

    let u = svd.U().subcols(0, rank).to_owned();
    let v = svd.V();
    let coeffs = Mat::from_fn(rank, m.ncols(), |i, j| sigma[i] * v[(j, i)]);
    Ok((u, coeffs))
}

/// Projects every low-rank block onto the new bases and copies the near field.
fn couple(
    h: &HMatrix,
    row_basis: &ClusterBasis,
    col_basis: &ClusterBasis,
    rtree: &ClusterTree,
    ctree: &ClusterTree,
) -> H2Block {
    let data = match &h.data {
        HData::LowRank(rk) => {
            let a = row_basis.project(rtree, h.row, rk.a.as_ref());
            let b = col_basis.project(ctree, h.col, rk.b.as_ref());
            H2Data::Uniform(&a * b.transpose())
        }
        HData::Full(m) => H2Data::Full(m.clone()),
        HData::Sons { rsons, csons, sons } => H2Data::Sons {
            rsons: *rsons,
            csons: *csons,
            sons: sons
                .par_iter()
                .map(|son| couple(son, row_basis, col_basis, rtree, ctree))
                .collect(),
        },
    };

    H2Block {
        row: h.row,
        col: h.col,
        row_offset: h.row_offset,
        col_offset: h.col_offset,
        rows: h.rows,
        cols: h.cols,
        data,
    }
}
