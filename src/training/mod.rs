//! Training Infrastructure
//!
//! Fixed-iteration optimization of a [`GraphModel`] on one graph, with
//! optional best-validation checkpointing.
//!
//! ## Overview
//!
//! - **Optimizer**: wrapped candle-nn Adam with an L2 penalty folded into the loss
//! - **Loop**: [`fit_with_val`] runs `train_iters` steps, decays the learning
//!   rate ×0.1 once at the midpoint, and can keep the parameters that scored
//!   best on a validation split
//! - **Inference**: [`predict`] runs a forward pass without recording gradients
//! - **Metrics**: loss tracking
//!
//! ## Example
//!
//! ```ignore
//! use graph_condense_eval::prelude::*;
//!
//! let mut model = build_model(ModelFamily::Sgc, hyper, &device)?;
//! let opts = FitOptions { train_iters: 600, ..Default::default() };
//! let report = fit_with_val(model.as_mut(), &feat_syn, &adj_syn, &labels_syn, None, &opts)?;
//! let output = predict(model.as_ref(), &feat_full, &adj_full, true)?;
//! ```

use candle_core::backprop::GradStore;
use candle_core::{Tensor, Var};
use candle_nn::optim::Optimizer as CandleOptimizer;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::graph::{Adjacency, GraphDataset, Labels};
use crate::models::GraphModel;
use crate::primitives::{accuracy, binary_cross_entropy, nll_loss};
use crate::{EvalError, Result};

// =============================================================================
// Optimizer
// =============================================================================

/// Wrapper around candle-nn's Adam(W) optimizer
///
/// The inner optimizer runs with zero decoupled decay. Weight decay is an L2
/// term added through [`Optimizer::penalize`], whose gradient `wd · p` reaches
/// the moment estimates.
pub struct Optimizer {
    inner: candle_nn::optim::AdamW,
    vars: Vec<Var>,
    weight_decay: f64,
}

impl Optimizer {
    /// Create an Adam optimizer over `vars` with L2 weight decay
    pub fn adam(vars: Vec<Var>, learning_rate: f64, weight_decay: f64) -> Result<Self> {
        let params = candle_nn::optim::ParamsAdamW {
            lr: learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };

        let inner = <candle_nn::optim::AdamW as CandleOptimizer>::new(vars.clone(), params)
            .map_err(|e| EvalError::Training(format!("Adam init failed: {}", e)))?;

        Ok(Self {
            inner,
            vars,
            weight_decay,
        })
    }

    /// `loss + 0.5 · wd · Σ‖p‖²` over the optimized parameters
    pub fn penalize(&self, loss: &Tensor) -> Result<Tensor> {
        if self.weight_decay == 0.0 {
            return Ok(loss.clone());
        }
        let mut penalty: Option<Tensor> = None;
        for var in &self.vars {
            let sq = var.as_tensor().sqr()?.sum_all()?.to_dtype(loss.dtype())?;
            penalty = Some(match penalty {
                Some(acc) => (acc + sq)?,
                None => sq,
            });
        }
        match penalty {
            Some(p) => Ok((loss + p.affine(0.5 * self.weight_decay, 0.0)?)?),
            None => Ok(loss.clone()),
        }
    }

    /// Take a gradient step
    pub fn step(&mut self, grads: &GradStore) -> Result<()> {
        CandleOptimizer::step(&mut self.inner, grads)
            .map_err(|e| EvalError::Training(format!("Adam step failed: {}", e)))
    }

    /// Get the learning rate
    pub fn learning_rate(&self) -> f64 {
        CandleOptimizer::learning_rate(&self.inner)
    }

    /// Set the learning rate
    pub fn set_learning_rate(&mut self, lr: f64) {
        CandleOptimizer::set_learning_rate(&mut self.inner, lr)
    }

    pub fn weight_decay(&self) -> f64 {
        self.weight_decay
    }
}

// =============================================================================
// Options and reports
// =============================================================================

/// Options for [`fit_with_val`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitOptions {
    /// Optimization steps
    pub train_iters: usize,

    /// Symmetric-normalize the training adjacency (with self-loops)
    pub normalize: bool,

    /// Raise per-iteration logging from debug to info
    pub verbose: bool,

    /// Keep the parameters with the best validation accuracy
    pub val: bool,

    /// Re-draw parameters before training
    pub initialize: bool,

    /// Seed for initialization
    pub seed: u64,
}

impl Default for FitOptions {
    fn default() -> Self {
        Self {
            train_iters: 600,
            normalize: true,
            verbose: false,
            val: false,
            initialize: true,
            seed: 0,
        }
    }
}

/// Summary of one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitReport {
    /// Training loss per iteration
    pub losses: Vec<f32>,

    /// Best validation accuracy (when validating)
    pub best_val_accuracy: Option<f64>,

    /// Learning rate after the midpoint decay
    pub final_lr: f64,

    pub iterations: usize,
}

impl FitReport {
    pub fn final_loss(&self) -> Option<f32> {
        self.losses.last().copied()
    }
}

/// Training metrics tracker
#[derive(Debug, Default)]
pub struct MetricsTracker {
    /// Loss history
    losses: Vec<f32>,

    /// Best loss seen
    best_loss: Option<f32>,
}

impl MetricsTracker {
    /// Create a new metrics tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one iteration's loss
    pub fn record(&mut self, loss: f32) {
        self.losses.push(loss);
        if self.best_loss.map_or(true, |best| loss < best) {
            self.best_loss = Some(loss);
        }
    }

    /// Get average loss over last N steps
    pub fn average_loss(&self, n: usize) -> Option<f32> {
        if self.losses.is_empty() || n == 0 {
            return None;
        }

        let start = self.losses.len().saturating_sub(n);
        let slice = &self.losses[start..];
        Some(slice.iter().sum::<f32>() / slice.len() as f32)
    }

    /// Get best loss
    pub fn best_loss(&self) -> Option<f32> {
        self.best_loss
    }

    /// Get total training steps
    pub fn total_steps(&self) -> usize {
        self.losses.len()
    }

    pub fn into_losses(self) -> Vec<f32> {
        self.losses
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Graph and labels used to pick the best checkpoint
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub features: Tensor,
    /// Already normalized
    pub adjacency: Adjacency,
    /// Labels of the scored nodes (`indices` order when set)
    pub labels: Labels,
    /// Rows of the forward output to score; all rows when `None`
    pub indices: Option<Vec<u32>>,
}

impl ValidationContext {
    /// Inductive datasets validate on their own val graph; transductive ones
    /// on the full graph restricted to `idx_val`
    pub fn from_dataset(dataset: &GraphDataset, inductive: bool) -> Result<Self> {
        if inductive {
            Ok(Self {
                features: dataset.val.features.clone(),
                adjacency: dataset.val.adjacency.normalize()?,
                labels: dataset.val.labels.clone(),
                indices: None,
            })
        } else {
            Ok(Self {
                features: dataset.full.features.clone(),
                adjacency: dataset.full.adjacency.normalize()?,
                labels: dataset.full.labels.index_select(&dataset.idx_val)?,
                indices: Some(dataset.idx_val.clone()),
            })
        }
    }

    /// Accuracy of `model` on the validation nodes, without gradients
    pub fn score(&self, model: &dyn GraphModel) -> Result<f64> {
        let output = model
            .forward(&self.features, &self.adjacency, false)?
            .detach();
        let output = match &self.indices {
            Some(idx) => {
                let idx = Tensor::from_vec(idx.clone(), idx.len(), output.device())?;
                output.index_select(&idx, 0)?
            }
            None => output,
        };
        accuracy(&output, self.labels.as_tensor())
    }

    fn to_device(&self, device: &candle_core::Device) -> Result<Self> {
        Ok(Self {
            features: self.features.to_device(device)?,
            adjacency: self.adjacency.to_device(device)?,
            labels: self.labels.to_device(device)?,
            indices: self.indices.clone(),
        })
    }
}

/// Best-so-far parameter copy
#[derive(Debug, Clone)]
pub struct BestSnapshot {
    pub accuracy: f64,
    pub iteration: usize,
    pub tensors: Vec<Tensor>,
}

impl BestSnapshot {
    /// Replace the held snapshot only on strict improvement
    fn offer(current: &mut Option<Self>, accuracy: f64, iteration: usize, model: &dyn GraphModel) -> Result<bool> {
        let best = current.as_ref().map(|b| b.accuracy).unwrap_or(0.0);
        if accuracy > best {
            *current = Some(Self {
                accuracy,
                iteration,
                tensors: model.snapshot()?,
            });
            return Ok(true);
        }
        Ok(false)
    }
}

// =============================================================================
// Training loop
// =============================================================================

/// Train `model` on one graph
///
/// 1. Initialize parameters when `opts.initialize` is set
/// 2. Move inputs to the model's device; normalize the adjacency if requested
/// 3. Pick NLL (single-label) or BCE (multi-label) from the label shape
/// 4. Run `train_iters` steps; at `train_iters / 2` the optimizer is rebuilt
///    with `lr × 0.1`
/// 5. With `opts.val`, score `val_ctx` after every step and restore the best
///    parameters once at the end
///
/// Fails with [`EvalError::Training`] on a NaN loss.
pub fn fit_with_val(
    model: &mut dyn GraphModel,
    features: &Tensor,
    adjacency: &Adjacency,
    labels: &Labels,
    val_ctx: Option<&ValidationContext>,
    opts: &FitOptions,
) -> Result<FitReport> {
    if opts.initialize {
        model.initialize(opts.seed)?;
    }

    let device = model.device().clone();
    let features = features.to_device(&device)?;
    let adjacency = adjacency.to_device(&device)?;
    let adjacency = if opts.normalize {
        adjacency.normalize()?
    } else {
        adjacency
    };
    let labels = labels.to_device(&device)?;

    // Batched operators emit one row per (slice, node)
    let output_rows = match &adjacency {
        Adjacency::Batched(t) => t.dim(0)? * features.dim(0)?,
        _ => features.dim(0)?,
    };
    if output_rows != labels.len() {
        return Err(EvalError::DataShape(format!(
            "model emits {} rows but {} labels were given",
            output_rows,
            labels.len()
        )));
    }

    let multi_label = labels.is_multi_label();
    model.set_multi_label(multi_label);

    let val_ctx = match (opts.val, val_ctx) {
        (true, Some(ctx)) => Some(ctx.to_device(&device)?),
        (true, None) => {
            return Err(EvalError::Config(
                "validation checkpointing needs a validation context".into(),
            ))
        }
        (false, _) => None,
    };

    let base_lr = model.hyper().lr;
    let weight_decay = model.weight_decay();
    let mut optimizer = Optimizer::adam(model.vars(), base_lr, weight_decay)?;
    let mut tracker = MetricsTracker::new();
    let mut best: Option<BestSnapshot> = None;

    if opts.verbose {
        info!(iters = opts.train_iters, lr = base_lr, weight_decay, multi_label, "training model");
    }

    for i in 0..opts.train_iters {
        if i == opts.train_iters / 2 {
            optimizer = Optimizer::adam(model.vars(), base_lr * 0.1, weight_decay)?;
        }

        let output = model.forward(&features, &adjacency, true)?;
        let loss = match &labels {
            Labels::Single(t) => nll_loss(&output, t)?,
            Labels::Multi(t) => binary_cross_entropy(&output, t)?,
        };
        let loss_value = loss.to_scalar::<f32>()?;
        if loss_value.is_nan() {
            return Err(EvalError::Training(format!("loss became NaN at iteration {}", i)));
        }

        let grads = optimizer.penalize(&loss)?.backward()?;
        optimizer.step(&grads)?;
        tracker.record(loss_value);

        if i % 100 == 0 {
            let grad_norm = compute_grad_norm(&grads, &model.vars())?;
            if opts.verbose {
                info!(iteration = i, loss = loss_value, grad_norm, "training loss");
            } else {
                debug!(iteration = i, loss = loss_value, grad_norm, "training loss");
            }
        }

        if let Some(ctx) = &val_ctx {
            let acc = ctx.score(&*model)?;
            if BestSnapshot::offer(&mut best, acc, i, &*model)? {
                debug!(iteration = i, val_accuracy = acc, "new best validation accuracy");
            }
        }
    }

    if opts.verbose {
        info!(
            best_loss = ?tracker.best_loss(),
            recent_loss = ?tracker.average_loss(10),
            "training finished"
        );
    }

    let best_val_accuracy = best.as_ref().map(|b| b.accuracy);
    if let Some(best) = best {
        if opts.verbose {
            info!(
                iteration = best.iteration,
                val_accuracy = best.accuracy,
                "restoring best model by validation accuracy"
            );
        }
        model.restore(&best.tensors)?;
    }

    Ok(FitReport {
        iterations: tracker.total_steps(),
        final_lr: optimizer.learning_rate(),
        best_val_accuracy,
        losses: tracker.into_losses(),
    })
}

/// Inference forward pass; `normalize` applies symmetric normalization first
pub fn predict(
    model: &dyn GraphModel,
    features: &Tensor,
    adjacency: &Adjacency,
    normalize: bool,
) -> Result<Tensor> {
    let device = model.device();
    let features = features.to_device(device)?;
    let adjacency = adjacency.to_device(device)?;
    let adjacency = if normalize {
        adjacency.normalize()?
    } else {
        adjacency
    };
    Ok(model.forward(&features, &adjacency, false)?.detach())
}

// =============================================================================
// Gradient Utilities
// =============================================================================

/// Compute the total L2 norm of all gradients
///
/// Useful for monitoring gradient explosion during training.
pub fn compute_grad_norm(grads: &GradStore, vars: &[Var]) -> Result<f32> {
    let mut total_sq_norm = 0.0f32;

    for var in vars {
        if let Some(grad) = grads.get(var.as_tensor()) {
            total_sq_norm += grad.sqr()?.sum_all()?.to_scalar::<f32>()?;
        }
    }

    Ok(total_sq_norm.sqrt())
}
