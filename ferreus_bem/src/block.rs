/////////////////////////////////////////////////////////////////////////////////////////////
//
// Builds the admissibility block tree of a pair of cluster trees.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::cluster::ClusterTree;

/// Classification of a block in the admissibility tree.
#[derive(Debug, Clone)]
pub enum BlockKind {
    /// Far field, compressible.
    Admissible,
    /// Near field between two leaves, stored dense.
    Inadmissible,
    /// Subdivided block. `sons[i * csons + j]` pairs row son `i` with column son `j`.
    Sons {
        rsons: usize,
        csons: usize,
        sons: Vec<Block>,
    },
}

/// A node of the block tree, pairing row cluster `row` with column cluster `col`.
#[derive(Debug, Clone)]
pub struct Block {
    pub row: usize,
    pub col: usize,
    pub kind: BlockKind,
}

impl Block {
    /// Builds the block tree of `rtree × ctree`.
    ///
    /// A block is admissible if `max(diam_2(t), diam_2(s)) <= eta * dist_2(t, s)`.
    /// Otherwise both clusters are subdivided; a leaf cluster is paired with
    /// the sons of the other cluster until both are leaves.
    pub fn build(rtree: &ClusterTree, ctree: &ClusterTree, eta: f64) -> Block {
        build_block(rtree, ctree, 0, 0, eta)
    }

    pub fn is_leaf(&self) -> bool {
        !matches!(self.kind, BlockKind::Sons { .. })
    }

    /// Number of admissible and inadmissible leaves.
    pub fn count_leaves(&self) -> (usize, usize) {
        match &self.kind {
            BlockKind::Admissible => (1, 0),
            BlockKind::Inadmissible => (0, 1),
            BlockKind::Sons { sons, .. } => sons.iter().fold((0, 0), |acc, son| {
                let (a, i) = son.count_leaves();
                (acc.0 + a, acc.1 + i)
            }),
        }
    }
}

fn build_block(rtree: &ClusterTree, ctree: &ClusterTree, row: usize, col: usize, eta: f64) -> Block {
    let t = rtree.cluster(row);
    let s = ctree.cluster(col);

    if t.diam_2().max(s.diam_2()) <= eta * t.dist_2(s) {
        return Block {
            row,
            col,
            kind: BlockKind::Admissible,
        };
    }

    if t.is_leaf() && s.is_leaf() {
        return Block {
            row,
            col,
            kind: BlockKind::Inadmissible,
        };
    }

    let row_sons = if t.is_leaf() { vec![row] } else { t.sons.clone() };
    let col_sons = if s.is_leaf() { vec![col] } else { s.sons.clone() };

    let mut sons = Vec::with_capacity(row_sons.len() * col_sons.len());
    for &rs in &row_sons {
        for &cs in &col_sons {
            sons.push(build_block(rtree, ctree, rs, cs, eta));
        }
    }

    Block {
        row,
        col,
        kind: BlockKind::Sons {
            rsons: row_sons.len(),
            csons: col_sons.len(),
            sons,
        },
    }
}
