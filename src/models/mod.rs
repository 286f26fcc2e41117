//! SGC-family models
//!
//! Simplified graph convolution: learned transforms followed by `nlayers`
//! parameter-free propagation steps.
//!
//! ## Variants
//!
//! - [`Sgc`]: one transform `X W`, propagation, then bias
//! - [`SgcRich`]: a stack of `ntrans` transforms with activation, optional
//!   batch norm and dropout between them, then propagation
//!
//! ## Input regimes
//!
//! | Method | Adjacency |
//! |---|---|
//! | [`GraphModel::forward`] | one [`Adjacency`] applied `nlayers` times |
//! | [`GraphModel::forward_sampler`] | one [`SampledBlock`] per hop |
//! | [`GraphModel::forward_syn`] | one [`Adjacency`] per hop |

mod layer;
mod sgc;
mod sgc_rich;

pub use layer::{BatchNorm1d, GraphConvolution, Linear};
pub use sgc::Sgc;
pub use sgc_rich::SgcRich;

use std::fmt;
use std::str::FromStr;

use candle_core::{Device, Tensor, Var};
use serde::{Deserialize, Serialize};

use crate::graph::{Adjacency, SampledBlock};
use crate::primitives::{log_softmax, sigmoid, Activation};
use crate::{EvalError, Result};

// =============================================================================
// Hyper-parameters
// =============================================================================

/// Model construction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelHyper {
    pub nfeat: usize,
    pub nhid: usize,
    pub nclass: usize,
    /// Propagation steps
    pub nlayers: usize,
    /// Transform layers (rich variant only)
    pub ntrans: usize,
    pub dropout: f64,
    pub lr: f64,
    pub weight_decay: f64,
    pub with_relu: bool,
    pub with_bias: bool,
    pub with_bn: bool,
    pub activation: Activation,
}

impl ModelHyper {
    pub fn new(nfeat: usize, nhid: usize, nclass: usize) -> Self {
        Self {
            nfeat,
            nhid,
            nclass,
            nlayers: 2,
            ntrans: 2,
            dropout: 0.5,
            lr: 0.01,
            weight_decay: 5e-4,
            with_relu: true,
            with_bias: true,
            with_bn: false,
            activation: Activation::Relu,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.nfeat == 0 || self.nclass == 0 {
            return Err(EvalError::Config(format!(
                "nfeat and nclass must be positive (nfeat={}, nclass={})",
                self.nfeat, self.nclass
            )));
        }
        if self.ntrans == 0 {
            return Err(EvalError::Config("ntrans must be at least 1".into()));
        }
        if self.ntrans > 1 && self.nhid == 0 {
            return Err(EvalError::Config("nhid must be positive when ntrans > 1".into()));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(EvalError::Config(format!("dropout must be in [0, 1), got {}", self.dropout)));
        }
        if self.lr.is_nan() || self.lr <= 0.0 || self.weight_decay < 0.0 {
            return Err(EvalError::Config(format!(
                "lr must be positive and weight_decay non-negative (lr={}, weight_decay={})",
                self.lr, self.weight_decay
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Model trait
// =============================================================================

/// A trainable node classifier over graph-structured input
pub trait GraphModel {
    /// Full-graph forward with `nlayers` propagations through `adj`
    fn forward(&self, x: &Tensor, adj: &Adjacency, train: bool) -> Result<Tensor>;

    /// Mini-batch forward through sampled blocks, outermost first
    fn forward_sampler(&self, x: &Tensor, blocks: &[SampledBlock], train: bool) -> Result<Tensor>;

    /// Forward with one explicit operator per propagation step
    fn forward_syn(&self, x: &Tensor, adjs: &[Adjacency], train: bool) -> Result<Tensor>;

    /// Redraw all parameters from `seed`
    fn initialize(&mut self, seed: u64) -> Result<()>;

    /// Trainable parameters
    fn vars(&self) -> Vec<Var>;

    /// All state tensors (parameters and running statistics)
    fn state(&self) -> Vec<Var>;

    fn hyper(&self) -> &ModelHyper;

    /// Effective weight decay for the optimizer
    fn weight_decay(&self) -> f64 {
        self.hyper().weight_decay
    }

    fn set_multi_label(&mut self, multi_label: bool);

    fn is_multi_label(&self) -> bool;

    fn device(&self) -> &Device;

    /// Detached copy of every state tensor
    fn snapshot(&self) -> Result<Vec<Tensor>> {
        self.state()
            .iter()
            .map(|v| v.as_tensor().copy().map_err(EvalError::from))
            .collect()
    }

    /// Write a [`GraphModel::snapshot`] back into the live state
    fn restore(&self, snapshot: &[Tensor]) -> Result<()> {
        let state = self.state();
        if state.len() != snapshot.len() {
            return Err(EvalError::Training(format!(
                "snapshot holds {} tensors, model has {}",
                snapshot.len(),
                state.len()
            )));
        }
        for (var, saved) in state.iter().zip(snapshot) {
            var.set(saved)
                .map_err(|e| EvalError::Training(format!("restore failed: {}", e)))?;
        }
        Ok(())
    }
}

/// Flatten batched `[b, n, c]` output to `[b*n, c]`, then apply sigmoid
/// (multi-label) or log-softmax over classes
pub(crate) fn output_activation(h: &Tensor, multi_label: bool) -> Result<Tensor> {
    let h = if h.rank() == 3 {
        let c = h.dim(2)?;
        h.reshape(((), c))?
    } else {
        h.clone()
    };
    if multi_label {
        sigmoid(&h)
    } else {
        log_softmax(&h)
    }
}

/// Apply each sampled block in turn
pub(crate) fn propagate_blocks(x: &Tensor, blocks: &[SampledBlock]) -> Result<Tensor> {
    let mut h = x.clone();
    for block in blocks {
        let rows = h.dim(0)?;
        if rows != block.size.0 {
            return Err(EvalError::DataShape(format!(
                "sampled block expects {} source rows, got {}",
                block.size.0, rows
            )));
        }
        h = block.adj.matmul(&h)?;
    }
    Ok(h)
}

/// Apply each operator in turn
pub(crate) fn propagate_each(x: &Tensor, adjs: &[Adjacency]) -> Result<Tensor> {
    let mut h = x.clone();
    for adj in adjs {
        h = adj.propagate(&h)?;
    }
    Ok(h)
}

// =============================================================================
// Families
// =============================================================================

/// Model families scored by the evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelFamily {
    /// Single-transform SGC
    Sgc,
    /// Multi-transform SGC
    SgcRich,
    /// Feature-only baseline: the rich architecture trained on an empty graph
    Mlp,
}

impl ModelFamily {
    /// Families run by cross-evaluation, in order
    pub fn roster() -> &'static [ModelFamily] {
        &[Self::Sgc, Self::SgcRich, Self::Mlp]
    }

    /// Whether the family ignores graph structure
    pub fn is_structure_free(&self) -> bool {
        matches!(self, Self::Mlp)
    }
}

impl FromStr for ModelFamily {
    type Err = EvalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "SGC" | "SGC1" => Ok(Self::Sgc),
            "SGCRich" => Ok(Self::SgcRich),
            "MLP" => Ok(Self::Mlp),
            other => Err(EvalError::Config(format!(
                "unknown model family '{}' (expected SGC, SGC1, SGCRich or MLP)",
                other
            ))),
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sgc => write!(f, "SGC"),
            Self::SgcRich => write!(f, "SGCRich"),
            Self::Mlp => write!(f, "MLP"),
        }
    }
}

/// Construct an uninitialized model of `family`
///
/// Call [`GraphModel::initialize`] (or train with `initialize` set) before use.
pub fn build_model(family: ModelFamily, hyper: ModelHyper, device: &Device) -> Result<Box<dyn GraphModel>> {
    hyper.validate()?;
    match family {
        ModelFamily::Sgc => Ok(Box::new(Sgc::new(hyper, device)?)),
        ModelFamily::SgcRich | ModelFamily::Mlp => Ok(Box::new(SgcRich::new(hyper, device)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SparseAdjacency;
    use candle_core::DType;

    fn hyper() -> ModelHyper {
        let mut h = ModelHyper::new(4, 8, 3);
        h.dropout = 0.0;
        h
    }

    #[test]
    fn test_family_parse_and_display() {
        assert_eq!("SGC".parse::<ModelFamily>().unwrap(), ModelFamily::Sgc);
        assert_eq!("SGC1".parse::<ModelFamily>().unwrap(), ModelFamily::Sgc);
        assert_eq!("SGCRich".parse::<ModelFamily>().unwrap(), ModelFamily::SgcRich);
        assert_eq!("MLP".parse::<ModelFamily>().unwrap(), ModelFamily::Mlp);
        assert!(matches!("GAT".parse::<ModelFamily>(), Err(EvalError::Config(_))));
        for family in ModelFamily::roster() {
            assert_eq!(family.to_string().parse::<ModelFamily>().unwrap(), *family);
        }
    }

    #[test]
    fn test_hyper_validation() {
        assert!(hyper().validate().is_ok());
        let mut bad = hyper();
        bad.ntrans = 0;
        assert!(bad.validate().is_err());
        let mut bad = hyper();
        bad.dropout = 1.0;
        assert!(bad.validate().is_err());
        let mut bad = hyper();
        bad.nclass = 0;
        assert!(matches!(build_model(ModelFamily::Sgc, bad, &Device::Cpu), Err(EvalError::Config(_))));
    }

    #[test]
    fn test_build_every_family() {
        let x = Tensor::ones((5, 4), DType::F32, &Device::Cpu).unwrap();
        let adj = Adjacency::Sparse(SparseAdjacency::identity(5));
        for family in ModelFamily::roster() {
            let mut model = build_model(*family, hyper(), &Device::Cpu).unwrap();
            model.initialize(0).unwrap();
            let out = model.forward(&x, &adj, false).unwrap();
            assert_eq!(out.dims(), &[5, 3], "{}", family);
        }
    }

    #[test]
    fn test_snapshot_restore() {
        let mut model = build_model(ModelFamily::SgcRich, hyper(), &Device::Cpu).unwrap();
        model.initialize(1).unwrap();
        let saved = model.snapshot().unwrap();
        let before: Vec<f32> = saved[0].flatten_all().unwrap().to_vec1().unwrap();

        model.initialize(2).unwrap();
        let changed: Vec<f32> = model.vars()[0].as_tensor().flatten_all().unwrap().to_vec1().unwrap();
        assert_ne!(before, changed);

        model.restore(&saved).unwrap();
        let restored: Vec<f32> = model.vars()[0].as_tensor().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(before, restored);
    }

    #[test]
    fn test_output_activation_flattens_batches() {
        let h = Tensor::zeros((2, 3, 4), DType::F32, &Device::Cpu).unwrap();
        let out = output_activation(&h, false).unwrap();
        assert_eq!(out.dims(), &[6, 4]);
        let probs: Vec<f32> = out.exp().unwrap().sum(1).unwrap().to_vec1().unwrap();
        assert!(probs.iter().all(|p| (p - 1.0).abs() < 1e-5));

        let multi = output_activation(&h, true).unwrap();
        let vals: Vec<f32> = multi.flatten_all().unwrap().to_vec1().unwrap();
        assert!(vals.iter().all(|v| (v - 0.5).abs() < 1e-6));
    }
}
