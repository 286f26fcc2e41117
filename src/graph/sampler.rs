//! Neighbor sampling for mini-batch propagation.
//!
//! # Key Types
//!
//! - [`SampledBlock`] - One hop of a sampled computation graph
//! - [`NeighborSampler`] - Multi-hop, fan-out limited sampler
//!
//! Sampling starts from the batch (target) nodes and walks outward one hop
//! per fan-out entry. Blocks are returned outermost first, so propagating
//! through them in order shrinks the node set back down to the batch.

use std::collections::HashMap;

use rand::prelude::*;
use rand::rngs::StdRng;

use super::SparseAdjacency;
use crate::{Result, EvalError};

/// One hop of a sampled computation graph.
///
/// `adj` has shape `(n_dst, n_src)`. The destination nodes are the first
/// `n_dst` entries of `n_id`, so each block's output rows line up with the
/// next block's input rows.
#[derive(Debug, Clone)]
pub struct SampledBlock {
    /// Edges from source (column) to destination (row), local indices
    pub adj: SparseAdjacency,
    /// Global ids of this block's source nodes
    pub n_id: Vec<u32>,
    /// `(n_src, n_dst)`
    pub size: (usize, usize),
}

/// Fan-out limited multi-hop sampler over a sparse graph
#[derive(Debug, Clone)]
pub struct NeighborSampler {
    indptr: Vec<usize>,
    entries: Vec<(u32, f32)>,
    sizes: Vec<usize>,
    rng: StdRng,
}

impl NeighborSampler {
    /// `sizes[h]` caps the neighbors sampled per node at hop `h` (0 = all).
    pub fn new(adj: &SparseAdjacency, sizes: Vec<usize>, seed: u64) -> Result<Self> {
        let (n, m) = adj.shape();
        if n != m {
            return Err(EvalError::DataShape(format!(
                "neighbor sampling needs a square adjacency, got ({}, {})",
                n, m
            )));
        }
        if sizes.is_empty() {
            return Err(EvalError::Config("neighbor sampler needs at least one hop".into()));
        }
        let (indptr, entries) = adj.to_csr();
        Ok(Self {
            indptr,
            entries,
            sizes,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    /// Sample the computation graph of `batch`.
    ///
    /// Returns the global ids of the input nodes (features to gather) and the
    /// blocks, outermost first.
    pub fn sample(&mut self, batch: &[u32]) -> Result<(Vec<u32>, Vec<SampledBlock>)> {
        let num_nodes = self.indptr.len() - 1;
        if let Some(&bad) = batch.iter().find(|&&b| b as usize >= num_nodes) {
            return Err(EvalError::DataShape(format!(
                "batch node {} out of bounds for {} nodes",
                bad, num_nodes
            )));
        }

        let mut n_id: Vec<u32> = batch.to_vec();
        let mut blocks = Vec::with_capacity(self.sizes.len());

        for hop in 0..self.sizes.len() {
            let k = self.sizes[hop];
            let n_dst = n_id.len();
            let mut local: HashMap<u32, u32> = n_id
                .iter()
                .enumerate()
                .map(|(i, &g)| (g, i as u32))
                .collect();

            let mut rows = Vec::new();
            let mut cols = Vec::new();
            let mut values = Vec::new();

            for dst in 0..n_dst {
                let node = n_id[dst] as usize;
                let neighbors = &self.entries[self.indptr[node]..self.indptr[node + 1]];
                let picked: Vec<(u32, f32)> = if k == 0 || neighbors.len() <= k {
                    neighbors.to_vec()
                } else {
                    neighbors.choose_multiple(&mut self.rng, k).cloned().collect()
                };

                for (src, weight) in picked {
                    let next = local.len() as u32;
                    let src_local = *local.entry(src).or_insert_with(|| {
                        n_id.push(src);
                        next
                    });
                    rows.push(dst as u32);
                    cols.push(src_local);
                    values.push(weight);
                }
            }

            let n_src = n_id.len();
            let adj = SparseAdjacency::from_coo(rows, cols, Some(values), (n_dst, n_src))?;
            blocks.push(SampledBlock {
                adj,
                n_id: n_id.clone(),
                size: (n_src, n_dst),
            });
        }

        blocks.reverse();
        Ok((n_id, blocks))
    }
}
