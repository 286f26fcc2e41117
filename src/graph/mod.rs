//! Graph representation
//!
//! Adjacency operators (dense, sparse and batched), neighbor-sampled blocks,
//! and the node-feature/label snapshots the evaluator trains and scores on.

mod adjacency;
mod dataset;
mod sampler;
mod sparse;

pub use adjacency::{density, sparsify, Adjacency};
pub use dataset::{GraphDataset, GraphSnapshot, Labels};
pub use sampler::{NeighborSampler, SampledBlock};
pub use sparse::SparseAdjacency;
