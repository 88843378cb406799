/////////////////////////////////////////////////////////////////////////////////////////////
//
// Builds adaptive cluster trees over the degrees of freedom of a discretisation.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use faer::Mat;

/// Geometric description of the degrees of freedom.
///
/// Every row holds one degree of freedom: `x` is its characteristic point and
/// `[smin, smax]` the bounding box of its support.
#[derive(Debug, Clone)]
pub struct ClusterGeometry {
    pub x: Mat<f64>,
    pub smin: Mat<f64>,
    pub smax: Mat<f64>,
}

impl ClusterGeometry {
    /// Point-like degrees of freedom whose support is the point itself.
    pub fn from_points(x: Mat<f64>) -> Self {
        let smin = x.clone();
        let smax = x.clone();
        ClusterGeometry { x, smin, smax }
    }

    pub fn len(&self) -> usize {
        self.x.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.x.nrows() == 0
    }
}

/// A node of a [`ClusterTree`].
#[derive(Debug, Clone)]
pub struct Cluster {
    /// First position of the cluster in the tree's index permutation.
    pub offset: usize,
    /// Number of degrees of freedom.
    pub size: usize,
    pub bmin: [f64; 3],
    pub bmax: [f64; 3],
    /// Ids of the sons, empty for leaves.
    pub sons: Vec<usize>,
    pub parent: Option<usize>,
    /// Number of clusters in the subtree, including this one.
    pub desc: usize,
    /// Distance from the root.
    pub level: usize,
}

impl Cluster {
    pub fn is_leaf(&self) -> bool {
        self.sons.is_empty()
    }

    /// Largest side length of the bounding box.
    pub fn diam_max(&self) -> f64 {
        (0..3)
            .map(|d| self.bmax[d] - self.bmin[d])
            .fold(0.0_f64, f64::max)
    }

    /// Euclidean diagonal of the bounding box.
    pub fn diam_2(&self) -> f64 {
        (0..3)
            .map(|d| (self.bmax[d] - self.bmin[d]).powi(2))
            .sum::<f64>()
            .sqrt()
    }

    /// Euclidean distance between two bounding boxes.
    pub fn dist_2(&self, other: &Cluster) -> f64 {
        (0..3)
            .map(|d| {
                let gap = (other.bmin[d] - self.bmax[d])
                    .max(self.bmin[d] - other.bmax[d])
                    .max(0.0);
                gap * gap
            })
            .sum::<f64>()
            .sqrt()
    }
}

/// Hierarchical partition of the index set `0..n`.
///
/// Clusters are stored in pre-order: the root has id 0 and every cluster's
/// subtree occupies the ids `id..id + desc`. Each cluster owns the contiguous
/// range `idx[offset..offset + size]` of the index permutation.
#[derive(Debug, Clone)]
pub struct ClusterTree {
    pub idx: Vec<usize>,
    pub clusters: Vec<Cluster>,
}

impl ClusterTree {
    /// Builds a tree by bisecting the bounding box of the characteristic
    /// points along its longest side until at most `leaf_size` points remain.
    pub fn build_adaptive(geometry: &ClusterGeometry, leaf_size: usize) -> Self {
        let leaf_size = leaf_size.max(1);
        let mut idx: Vec<usize> = (0..geometry.len()).collect();
        let mut clusters = Vec::new();

        build_node(geometry, &mut idx, 0, leaf_size, None, 0, &mut clusters);

        ClusterTree { idx, clusters }
    }

    pub fn root(&self) -> &Cluster {
        &self.clusters[0]
    }

    pub fn cluster(&self, id: usize) -> &Cluster {
        &self.clusters[id]
    }

    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }

    /// Global indices of the cluster.
    pub fn indices(&self, id: usize) -> &[usize] {
        let c = &self.clusters[id];
        &self.idx[c.offset..c.offset + c.size]
    }

    /// Number of levels below the root.
    pub fn depth(&self) -> usize {
        self.clusters.iter().map(|c| c.level).max().unwrap_or(0)
    }

    /// Cluster ids with every son listed before its father.
    pub fn post_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.clusters.len());
        if !self.clusters.is_empty() {
            self.push_post_order(0, &mut order);
        }
        order
    }

    fn push_post_order(&self, id: usize, order: &mut Vec<usize>) {
        for &son in &self.clusters[id].sons {
            self.push_post_order(son, order);
        }
        order.push(id);
    }

    /// Cluster ids grouped by level, root level first.
    pub fn levels(&self) -> Vec<Vec<usize>> {
        let mut levels = vec![Vec::new(); self.depth() + 1];
        for (id, c) in self.clusters.iter().enumerate() {
            levels[c.level].push(id);
        }
        levels
    }
}

fn build_node(
    geometry: &ClusterGeometry,
    idx: &mut [usize],
    offset: usize,
    leaf_size: usize,
    parent: Option<usize>,
    level: usize,
    clusters: &mut Vec<Cluster>,
) -> usize {
    let id = clusters.len();
    let (bmin, bmax) = support_box(geometry, idx);
    clusters.push(Cluster {
        offset,
        size: idx.len(),
        bmin,
        bmax,
        sons: Vec::new(),
        parent,
        desc: 1,
        level,
    });

    if idx.len() > leaf_size {
        if let Some(split) = bisect(geometry, idx) {
            let (left, right) = idx.split_at_mut(split);
            let first = build_node(geometry, left, offset, leaf_size, Some(id), level + 1, clusters);
            let second = build_node(
                geometry,
                right,
                offset + split,
                leaf_size,
                Some(id),
                level + 1,
                clusters,
            );
            clusters[id].sons = vec![first, second];
        }
    }

    clusters[id].desc = clusters.len() - id;
    id
}

/// Reorders `idx` so that the points below the midpoint of the longest side
/// come first and returns the split position, or `None` if all points coincide.
fn bisect(geometry: &ClusterGeometry, idx: &mut [usize]) -> Option<usize> {
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for &i in idx.iter() {
        for d in 0..3 {
            lo[d] = lo[d].min(geometry.x[(i, d)]);
            hi[d] = hi[d].max(geometry.x[(i, d)]);
        }
    }

    let axis = (0..3)
        .max_by(|&a, &b| (hi[a] - lo[a]).total_cmp(&(hi[b] - lo[b])))
        .unwrap_or(0);
    if hi[axis] - lo[axis] <= 0.0 {
        return None;
    }
    let mid = 0.5 * (lo[axis] + hi[axis]);

    let (left, right): (Vec<usize>, Vec<usize>) =
        idx.iter().partition(|&&i| geometry.x[(i, axis)] < mid);
    let split = left.len();
    idx[..split].copy_from_slice(&left);
    idx[split..].copy_from_slice(&right);

    if split == 0 || split == idx.len() {
        None
    } else {
        Some(split)
    }
}

fn support_box(geometry: &ClusterGeometry, idx: &[usize]) -> ([f64; 3], [f64; 3]) {
    let mut bmin = [f64::INFINITY; 3];
    let mut bmax = [f64::NEG_INFINITY; 3];
    for &i in idx {
        for d in 0..3 {
            bmin[d] = bmin[d].min(geometry.smin[(i, d)]);
            bmax[d] = bmax[d].max(geometry.smax[(i, d)]);
        }
    }
    if idx.is_empty() {
        return ([0.0; 3], [0.0; 3]);
    }
    (bmin, bmax)
}
