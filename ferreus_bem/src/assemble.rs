/////////////////////////////////////////////////////////////////////////////////////////////
//
// Fills hierarchical and nested hierarchical matrices with the configured far-field scheme.
//
// Created on: 15 Nov 2025     Author: Daniel Owen
//
// Copyright (c) 2025, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::{
    cluster::ClusterTree,
    config::{ApproximationConfig, TruncationMode},
    error::BemError,
    green::ClusterRole,
    hiercomp::convert_with_progress,
    matrices::{BasisNode, ClusterBasis, H2Block, H2Data, H2Matrix, HData, HMatrix},
    progress::{report, AssemblyProgress, ProgressSink},
    schemes::{Farfield, FarfieldContext, FarfieldScheme},
    traits::{BemKernel, Capability},
};
use rayon::prelude::*;
use std::sync::Arc;

/// Fills block trees of a discretised boundary integral operator.
///
/// The assembler borrows the kernel and both cluster trees. A call to
/// [`BemAssembler::setup`] selects the far-field scheme and creates its
/// per-cluster caches, which then live until the next `setup`.
///
/// # Example
/// ```ignore
/// let mut assembler = BemAssembler::new(&kernel, &rtree, &ctree);
/// assembler.setup(ApproximationConfig::builder(scheme).recompression(1e-6).build())?;
///
/// let block = Block::build(&rtree, &ctree, 2.0);
/// let mut h = HMatrix::from_block(&block, &rtree, &ctree);
/// assembler.fill_hmatrix(&mut h)?;
/// ```
pub struct BemAssembler<'a, K: BemKernel> {
    kernel: &'a K,
    row_tree: &'a ClusterTree,
    col_tree: &'a ClusterTree,
    config: Option<ApproximationConfig>,
    scheme: Option<FarfieldScheme>,
    progress: Option<Arc<dyn ProgressSink>>,
}

impl<'a, K: BemKernel> BemAssembler<'a, K> {
    pub fn new(kernel: &'a K, row_tree: &'a ClusterTree, col_tree: &'a ClusterTree) -> Self {
        BemAssembler {
            kernel,
            row_tree,
            col_tree,
            config: None,
            scheme: None,
            progress: None,
        }
    }

    /// Reports assembly events to `sink`.
    pub fn with_progress(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn config(&self) -> Option<&ApproximationConfig> {
        self.config.as_ref()
    }

    /// The active scheme and its caches, if configured.
    pub fn scheme(&self) -> Option<&FarfieldScheme> {
        self.scheme.as_ref()
    }

    /// Validates `config` against the kernel and builds the scheme state.
    ///
    /// Any previous configuration is dropped first, so a failed call leaves
    /// the assembler unconfigured.
    pub fn setup(&mut self, config: ApproximationConfig) -> Result<(), BemError> {
        self.config = None;
        self.scheme = None;

        config.validate()?;
        let scheme = FarfieldScheme::new(&config.scheme, self.row_tree, self.col_tree);
        {
            let farfield = scheme.as_farfield();
            let required = if farfield.supports_flat() {
                farfield.required_capabilities()
            } else {
                farfield.nested_capabilities()
            };
            self.check_capabilities(farfield, &required)?;
        }

        log::info!(
            "configured the {} scheme for a {}x{} operator ({} row / {} column clusters)",
            config.scheme.name(),
            self.row_tree.idx.len(),
            self.col_tree.idx.len(),
            self.row_tree.len(),
            self.col_tree.len()
        );

        self.config = Some(config);
        self.scheme = Some(scheme);
        Ok(())
    }

    /// Fills every leaf of `h`: far-field blocks by the active scheme and
    /// near-field blocks by the kernel's exact entries.
    ///
    /// Admissible blocks are truncated at the recompression accuracy if one is configured.
    pub fn fill_hmatrix(&self, h: &mut HMatrix) -> Result<(), BemError> {
        let (config, farfield) = self.active()?;
        if !farfield.supports_flat() {
            return Err(farfield.unsupported("hierarchical matrix"));
        }

        log::info!("filling a hierarchical matrix with the {} scheme", farfield.name());
        let ctx = self.context();
        self.fill_hblock(&ctx, farfield, config.recompression, h)?;
        log::info!(
            "hierarchical matrix filled: {} low-rank blocks, max rank {}, {} coefficients",
            h.count_low_rank(),
            h.max_rank(),
            h.storage()
        );
        Ok(())
    }

    /// [`BemAssembler::fill_hmatrix`] followed by coarsening at the configured accuracy.
    pub fn fill_hmatrix_coarsen(&self, h: &mut HMatrix) -> Result<(), BemError> {
        let (config, _) = self.active()?;
        let epsilon = config
            .coarsening
            .ok_or(BemError::MissingParameter("coarsening"))?;

        self.fill_hmatrix(h)?;

        let before = h.storage();
        let progress = &self.progress;
        h.coarsen(&TruncationMode::default(), epsilon, &|rows, cols, rank| {
            report(progress, || AssemblyProgress::BlockCoarsened { rows, cols, rank })
        })?;
        log::info!("coarsening reduced the storage from {before} to {} coefficients", h.storage());
        Ok(())
    }

    /// Truncates every low-rank block of `h` to relative accuracy `epsilon`.
    pub fn recompress_hmatrix(&self, h: &mut HMatrix, epsilon: f64) -> Result<(), BemError> {
        if !(epsilon.is_finite() && epsilon > 0.0) {
            return Err(BemError::NonPositiveAccuracy {
                name: "recompression accuracy",
                value: epsilon,
            });
        }
        h.truncate_low_rank(&TruncationMode::default(), epsilon)
    }

    /// Builds the nested row cluster basis with the active scheme.
    pub fn assemble_row_basis(&self, basis: &mut ClusterBasis) -> Result<(), BemError> {
        self.assemble_basis(ClusterRole::Row, basis)
    }

    /// Builds the nested column cluster basis with the active scheme.
    pub fn assemble_col_basis(&self, basis: &mut ClusterBasis) -> Result<(), BemError> {
        self.assemble_basis(ClusterRole::Column, basis)
    }

    /// Builds both cluster bases, then fills the coupling matrices of the
    /// admissible blocks and the near-field blocks of `h2`.
    pub fn fill_h2matrix(&self, h2: &mut H2Matrix) -> Result<(), BemError> {
        let (_, farfield) = self.active()?;
        self.check_nested(farfield)?;

        log::info!("filling an H2 matrix with the {} scheme", farfield.name());
        let (rows, cols) = rayon::join(
            || self.assemble_row_basis(&mut h2.row_basis),
            || self.assemble_col_basis(&mut h2.col_basis),
        );
        rows?;
        cols?;

        let ctx = self.context();
        self.fill_h2block(&ctx, farfield, &mut h2.root)?;
        log::info!("H2 matrix filled: {} coefficients", h2.storage());
        Ok(())
    }

    /// Fills `h` with the active scheme and converts it into an H2 matrix
    /// with the configured hierarchical compression settings.
    pub fn fill_h2matrix_hiercomp(&self, h: &mut HMatrix) -> Result<H2Matrix, BemError> {
        let (config, _) = self.active()?;
        let settings = config
            .hierarchical_compression
            .ok_or(BemError::MissingParameter("hierarchical_compression"))?;

        self.fill_hmatrix(h)?;
        report(&self.progress, || AssemblyProgress::HierarchicalCompression { progress: 0.0 });

        let h2 = convert_with_progress(
            h,
            self.row_tree,
            self.col_tree,
            settings.accuracy,
            &settings.mode,
            &self.progress,
        )?;
        log::info!(
            "hierarchical compression: {} flat / {} nested coefficients",
            h.storage(),
            h2.storage()
        );
        Ok(h2)
    }

    fn active(&self) -> Result<(&ApproximationConfig, &dyn Farfield), BemError> {
        match (&self.config, &self.scheme) {
            (Some(config), Some(scheme)) => Ok((config, scheme.as_farfield())),
            _ => Err(BemError::NotConfigured),
        }
    }

    fn context(&self) -> FarfieldContext<'a> {
        FarfieldContext {
            kernel: self.kernel,
            rtree: self.row_tree,
            ctree: self.col_tree,
        }
    }

    fn check_capabilities(&self, farfield: &dyn Farfield, required: &[Capability]) -> Result<(), BemError> {
        match required.iter().find(|&&c| !self.kernel.supports(c)) {
            Some(&capability) => Err(BemError::MissingCapability {
                scheme: farfield.name(),
                capability,
            }),
            None => Ok(()),
        }
    }

    fn check_nested(&self, farfield: &dyn Farfield) -> Result<(), BemError> {
        if !farfield.supports_nested() {
            return Err(farfield.unsupported("H2 matrix"));
        }
        self.check_capabilities(farfield, &farfield.nested_capabilities())
    }

    fn fill_hblock(
        &self,
        ctx: &FarfieldContext,
        farfield: &dyn Farfield,
        recompression: Option<f64>,
        h: &mut HMatrix,
    ) -> Result<(), BemError> {
        match &mut h.data {
            HData::LowRank(rk) => {
                let mut block = farfield.build_farfield_block(ctx, h.row, h.col)?;
                if let Some(epsilon) = recompression {
                    block.truncate(&TruncationMode::default(), epsilon)?;
                }
                report(&self.progress, || AssemblyProgress::BlockFilled {
                    admissible: true,
                    rank: block.rank(),
                });
                *rk = block;
            }
            HData::Full(m) => {
                *m = self
                    .kernel
                    .nearfield(self.row_tree.indices(h.row), self.col_tree.indices(h.col));
                report(&self.progress, || AssemblyProgress::BlockFilled {
                    admissible: false,
                    rank: 0,
                });
            }
            HData::Sons { sons, .. } => {
                sons.par_iter_mut()
                    .try_for_each(|son| self.fill_hblock(ctx, farfield, recompression, son))?;
            }
        }
        Ok(())
    }

    fn fill_h2block(&self, ctx: &FarfieldContext, farfield: &dyn Farfield, h: &mut H2Block) -> Result<(), BemError> {
        match &mut h.data {
            H2Data::Uniform(s) => {
                *s = farfield.build_coupling(ctx, h.row, h.col)?;
                report(&self.progress, || AssemblyProgress::BlockFilled {
                    admissible: true,
                    rank: s.nrows().max(s.ncols()),
                });
            }
            H2Data::Full(m) => {
                *m = self
                    .kernel
                    .nearfield(self.row_tree.indices(h.row), self.col_tree.indices(h.col));
                report(&self.progress, || AssemblyProgress::BlockFilled {
                    admissible: false,
                    rank: 0,
                });
            }
            H2Data::Sons { sons, .. } => {
                sons.par_iter_mut()
                    .try_for_each(|son| self.fill_h2block(ctx, farfield, son))?;
            }
        }
        Ok(())
    }

    fn assemble_basis(&self, role: ClusterRole, basis: &mut ClusterBasis) -> Result<(), BemError> {
        let (_, farfield) = self.active()?;
        self.check_nested(farfield)?;

        let ctx = self.context();
        let tree = ctx.tree(role);
        if tree.is_empty() {
            basis.nodes.clear();
            return Ok(());
        }
        basis.nodes = self.build_subtree(&ctx, farfield, role, 0)?;
        log::debug!("{role:?} basis built: rank {} at the root, {} coefficients", basis.rank(0), basis.storage());
        Ok(())
    }

    /// Bases of the subtree of `id` in pre-order. Sons are finished before
    /// their father's transfer matrices are built.
    fn build_subtree(
        &self,
        ctx: &FarfieldContext,
        farfield: &dyn Farfield,
        role: ClusterRole,
        id: usize,
    ) -> Result<Vec<BasisNode>, BemError> {
        let cluster = ctx.tree(role).cluster(id);
        if cluster.is_leaf() {
            let node = farfield.build_leaf_basis(ctx, role, id)?;
            report(&self.progress, || AssemblyProgress::BasisBuilt { cluster: id, rank: node.k });
            return Ok(vec![node]);
        }

        let subtrees = cluster
            .sons
            .par_iter()
            .map(|&son| self.build_subtree(ctx, farfield, role, son))
            .collect::<Result<Vec<_>, BemError>>()?;

        let sons: Vec<&BasisNode> = subtrees.iter().map(|nodes| &nodes[0]).collect();
        let node = farfield.build_transfer_basis(ctx, role, id, &sons)?;
        report(&self.progress, || AssemblyProgress::BasisBuilt { cluster: id, rank: node.k });

        let mut nodes = Vec::with_capacity(cluster.desc);
        nodes.push(node);
        subtrees.into_iter().for_each(|subtree| nodes.extend(subtree));
        Ok(nodes)
    }
}
