//! # graph-condense-eval
//!
//! Evaluation harness for graph condensation: train SGC-family models on a
//! small synthetic graph and measure how well they generalize to the full
//! benchmark graph.
//!
//! ## Overview
//!
//! A condensation procedure (not part of this crate) produces a synthetic
//! adjacency matrix and feature matrix for a dataset at a given reduction
//! rate. This crate:
//!
//! - **Labels**: derives the synthetic label vector from the real training
//!   label distribution ([`labels::LabelBudget`])
//! - **Graph**: represents adjacency as an explicit tagged union
//!   ([`graph::Adjacency`]) with dense, sparse and batched variants, plus
//!   neighbor-sampled blocks for mini-batch propagation
//! - **Models**: SGC and the multi-transform SGC variant ([`models`])
//! - **Training**: fixed-iteration AdamW loop with midpoint learning-rate decay
//!   and optional best-validation checkpointing ([`training::fit_with_val`])
//! - **Evaluation**: loads persisted synthetic graphs, trains, and scores on the
//!   real test/train splits across repeated runs ([`evaluation::Evaluator`])
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use graph_condense_eval::prelude::*;
//!
//! let device = best_device();
//! let dataset = GraphDataset::load("cora", "data/cora.safetensors", &device)?;
//! let config = EvalConfig::from_json_file("configs/cora.json")?;
//!
//! let evaluator = Evaluator::new(dataset, config, device)?;
//! let outcome = evaluator.evaluate(ModelFamily::Sgc, true)?;
//! println!("test accuracy: {:.4}", outcome.test_accuracy);
//! ```
//!
//! ## Feature Flags
//!
//! - `metal`: Apple Metal GPU acceleration
//! - `cuda`: NVIDIA CUDA GPU acceleration

pub mod primitives;
pub mod labels;
pub mod graph;
pub mod models;
pub mod training;
pub mod storage;
pub mod evaluation;

// Re-export candle types for convenience
pub use candle_core::{DType, Device, Tensor, Var};

/// Error types for evaluation harness operations
#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("Tensor operation failed: {0}")]
    Tensor(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Shape mismatch: {0}")]
    DataShape(String),

    #[error("Missing synthetic graph artifact: {}", path.display())]
    MissingArtifact { path: std::path::PathBuf },

    #[error("Unsupported adjacency format: {0}")]
    UnsupportedAdjacency(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Candle error: {0}")]
    Candle(#[from] candle_core::Error),
}

/// Result type alias for evaluation harness operations
pub type Result<T> = std::result::Result<T, EvalError>;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{DType, Device, Tensor, Var};
    pub use crate::{EvalError, Result};

    // Primitives
    pub use crate::primitives::{
        // Device selection
        best_device, cpu_device, gpu_available, gpu_disabled,
        // Activations and losses
        log_softmax, sigmoid, relu, dropout, Activation,
        nll_loss, binary_cross_entropy,
        // Metrics
        accuracy,
    };

    // Labels
    pub use crate::labels::LabelBudget;

    // Graph
    pub use crate::graph::{
        Adjacency, SparseAdjacency, SampledBlock, NeighborSampler,
        GraphSnapshot, GraphDataset, Labels,
    };

    // Models
    pub use crate::models::{
        build_model, GraphModel, ModelFamily, ModelHyper, Sgc, SgcRich,
    };

    // Training
    pub use crate::training::{
        fit_with_val, predict, FitOptions, FitReport, ValidationContext,
    };

    // Storage
    pub use crate::storage::SyntheticStore;

    // Evaluation
    pub use crate::evaluation::{
        AccuracyStats, EvalConfig, EvalOutcome, Evaluator, SyntheticGraph,
    };
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_prelude_imports() {
        use crate::prelude::*;

        let device = best_device();
        assert!(matches!(device, Device::Cpu) || matches!(device, Device::Metal(_)) || matches!(device, Device::Cuda(_)));
    }

    #[test]
    fn test_missing_artifact_display() {
        let err = crate::EvalError::MissingArtifact {
            path: std::path::PathBuf::from("out/adj_cora_0.5_1.safetensors"),
        };
        assert!(err.to_string().contains("adj_cora_0.5_1"));
    }
}
