//! Condensed-graph evaluation
//!
//! Trains a model on a persisted synthetic graph and scores it on the real
//! benchmark graph.
//!
//! ## Flow
//!
//! ```text
//! adj_/feat_ files ──load──▶ sparsify(ε) ──▶ fit_with_val (synthetic graph)
//!                                                   │
//!            real test graph / full graph ◀──predict┘
//! ```
//!
//! Separate-test datasets report `[test]`; every other dataset reports
//! `[test, train]`, with test scored on the full graph at `idx_test`.

mod config;

pub use config::EvalConfig;

use std::collections::BTreeMap;

use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::graph::{density, sparsify, Adjacency, GraphDataset, GraphSnapshot, Labels, SparseAdjacency};
use crate::labels::LabelBudget;
use crate::models::{build_model, GraphModel, ModelFamily, ModelHyper};
use crate::primitives::{accuracy, nll_loss};
use crate::storage::SyntheticStore;
use crate::training::{fit_with_val, predict, FitOptions};
use crate::{EvalError, Result};

// =============================================================================
// Results
// =============================================================================

/// Accuracies from one evaluation run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub test_accuracy: f64,
    /// Absent for separate-test datasets
    pub train_accuracy: Option<f64>,
}

impl EvalOutcome {
    /// `[test]` or `[test, train]`
    pub fn to_vec(&self) -> Vec<f64> {
        let mut v = vec![self.test_accuracy];
        v.extend(self.train_accuracy);
        v
    }
}

/// Column-wise mean and population standard deviation over runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyStats {
    pub mean: Vec<f64>,
    pub std: Vec<f64>,
    pub runs: usize,
}

impl AccuracyStats {
    pub fn from_runs(runs: &[Vec<f64>]) -> Result<Self> {
        let width = match runs.first() {
            Some(first) => first.len(),
            None => return Err(EvalError::DataShape("no runs to aggregate".into())),
        };
        if runs.iter().any(|r| r.len() != width) {
            return Err(EvalError::DataShape("runs report different metric counts".into()));
        }

        let n = runs.len() as f64;
        let mean: Vec<f64> = (0..width)
            .map(|c| runs.iter().map(|r| r[c]).sum::<f64>() / n)
            .collect();
        let std: Vec<f64> = (0..width)
            .map(|c| {
                let var = runs.iter().map(|r| (r[c] - mean[c]).powi(2)).sum::<f64>() / n;
                var.sqrt()
            })
            .collect();

        Ok(Self {
            mean,
            std,
            runs: runs.len(),
        })
    }
}

/// A loaded synthetic graph with its allocated labels
#[derive(Debug, Clone)]
pub struct SyntheticGraph {
    /// `[n, d]`
    pub features: Tensor,
    /// Raw dense `[n, n]` (or batched `[b, n, n]`) adjacency after truncation
    pub adjacency: Tensor,
    /// One label per output row
    pub labels: Labels,
    /// Fraction of non-zero entries as loaded
    pub density_before: f64,
    /// Fraction of non-zero entries after ε truncation
    pub density_after: f64,
}

impl SyntheticGraph {
    pub fn num_nodes(&self) -> usize {
        self.features.dims().first().copied().unwrap_or(0)
    }

    /// Propagation operator for training
    pub fn operator(&self) -> Result<Adjacency> {
        Adjacency::from_tensor(self.adjacency.clone())
    }
}

// =============================================================================
// Evaluator
// =============================================================================

/// Scores synthetic graphs against a real dataset
pub struct Evaluator {
    dataset: GraphDataset,
    config: EvalConfig,
    device: Device,
    store: SyntheticStore,
    budget: LabelBudget,
}

impl Evaluator {
    /// Validate inputs and allocate the synthetic label budget from the real
    /// training labels
    pub fn new(dataset: GraphDataset, config: EvalConfig, device: Device) -> Result<Self> {
        config.validate()?;
        dataset.validate()?;
        if dataset.is_multi_label() {
            return Err(EvalError::Config(format!(
                "{}: synthetic label allocation needs single-label targets",
                dataset.name
            )));
        }
        if dataset.name != config.dataset {
            debug!(dataset = %dataset.name, config = %config.dataset, "dataset name differs from config");
        }

        let budget = LabelBudget::allocate(&dataset.train_labels()?, config.reduction_rate)?;
        let store = SyntheticStore::new(&config.synthetic_dir, device.clone());

        info!(
            dataset = %config.dataset,
            reduction_rate = config.reduction_rate,
            nnodes_syn = budget.total(),
            classes = budget.num_classes(),
            device = ?device,
            "evaluator ready"
        );

        Ok(Self {
            dataset,
            config,
            device,
            store,
            budget,
        })
    }

    pub fn config(&self) -> &EvalConfig {
        &self.config
    }

    pub fn dataset(&self) -> &GraphDataset {
        &self.dataset
    }

    pub fn budget(&self) -> &LabelBudget {
        &self.budget
    }

    pub fn store(&self) -> &SyntheticStore {
        &self.store
    }

    /// Synthetic node count, `floor(train nodes × rate)`
    pub fn nnodes_syn(&self) -> usize {
        self.budget.total()
    }

    /// Load the synthetic graph for `family`
    ///
    /// `Mlp` gets an all-zero adjacency of the stored shape. Otherwise edges
    /// below the effective ε are zeroed when ε > 0.
    pub fn load_synthetic_graph(&self, family: ModelFamily, verbose: bool) -> Result<SyntheticGraph> {
        let cfg = &self.config;
        let mut adj = self
            .store
            .load_adjacency(&cfg.dataset, cfg.reduction_rate, cfg.seed)?;
        let features = self
            .store
            .load_features(&cfg.dataset, cfg.reduction_rate, cfg.seed)?;

        if family.is_structure_free() {
            adj = adj.zeros_like()?;
        }

        let n = self.budget.total();
        let rows = features.dims2().map(|(r, _)| r).map_err(|e| {
            EvalError::DataShape(format!("synthetic features must be [n, d]: {}", e))
        })?;
        if rows != n {
            return Err(EvalError::DataShape(format!(
                "synthetic features have {} rows but the label budget allocates {}",
                rows, n
            )));
        }
        let dims = adj.dims();
        let square = dims.len() >= 2 && dims[dims.len() - 1] == n && dims[dims.len() - 2] == n;
        if !square {
            return Err(EvalError::DataShape(format!(
                "synthetic adjacency {:?} does not match {} synthetic nodes",
                dims, n
            )));
        }

        let density_before = density(&adj)?;
        let epsilon = cfg.effective_epsilon();
        if epsilon > 0.0 {
            adj = sparsify(&adj, epsilon)?;
        }
        let density_after = density(&adj)?;
        if verbose {
            info!(density_before, density_after, epsilon, "synthetic graph sparsity");
        } else {
            debug!(density_before, density_after, epsilon, "synthetic graph sparsity");
        }

        // Batched operators produce one output block per slice
        let repeats = if adj.rank() == 3 { adj.dim(0)? } else { 1 };
        let labels: Vec<u32> = self
            .budget
            .labels
            .iter()
            .copied()
            .cycle()
            .take(n * repeats)
            .collect();
        let labels = Labels::Single(Tensor::from_vec(labels, n * repeats, &self.device)?);

        Ok(SyntheticGraph {
            features,
            adjacency: adj,
            labels,
            density_before,
            density_after,
        })
    }

    /// One evaluation run (seed offset 0)
    pub fn evaluate(&self, family: ModelFamily, verbose: bool) -> Result<EvalOutcome> {
        self.evaluate_run(family, 0, verbose)
    }

    /// Train on the synthetic graph and score on the real one; `run` offsets
    /// the initialization seed
    pub fn evaluate_run(&self, family: ModelFamily, run: usize, verbose: bool) -> Result<EvalOutcome> {
        let syn = self.load_synthetic_graph(family, verbose)?;
        if verbose {
            info!(family = %family, run, nodes = syn.num_nodes(), "testing model");
        }

        let mut model = build_model(family, self.model_hyper(&syn)?, &self.device)?;
        let opts = FitOptions {
            train_iters: self.config.train_iters,
            normalize: true,
            verbose,
            val: false,
            initialize: true,
            seed: self.config.seed.wrapping_add(run as u64),
        };
        let report = fit_with_val(model.as_mut(), &syn.features, &syn.operator()?, &syn.labels, None, &opts)?;
        debug!(family = %family, run, final_loss = ?report.final_loss(), "finished training");

        if self.config.uses_separate_test_graph() {
            let test_acc = self.score_snapshot(model.as_ref(), family, &self.dataset.test, "test", verbose)?;
            return Ok(EvalOutcome {
                test_accuracy: test_acc,
                train_accuracy: None,
            });
        }

        let full = &self.dataset.full;
        let (operator, normalize) = self.scoring_operator(family, full)?;
        let output = predict(model.as_ref(), &full.features, &operator, normalize)?;
        let idx = Tensor::from_vec(
            self.dataset.idx_test.clone(),
            self.dataset.idx_test.len(),
            output.device(),
        )?;
        let output_test = output.index_select(&idx, 0)?;
        let labels_test = full.labels.index_select(&self.dataset.idx_test)?;
        let test_acc = self.report_split(&output_test, &labels_test, "full test", verbose)?;

        let train_acc = self.score_snapshot(model.as_ref(), family, &self.dataset.train, "train", verbose)?;

        Ok(EvalOutcome {
            test_accuracy: test_acc,
            train_accuracy: Some(train_acc),
        })
    }

    /// Every roster family × `runs`, aggregated per metric column
    pub fn evaluate_cross(&self, runs: usize) -> Result<BTreeMap<ModelFamily, AccuracyStats>> {
        if runs == 0 {
            return Err(EvalError::Config("evaluate_cross needs at least one run".into()));
        }
        let mut results = BTreeMap::new();
        for &family in ModelFamily::roster() {
            let per_run = (0..runs)
                .map(|run| self.evaluate_run(family, run, false).map(|o| o.to_vec()))
                .collect::<Result<Vec<_>>>()?;
            let stats = AccuracyStats::from_runs(&per_run)?;
            info!(
                family = %family,
                mean = ?stats.mean,
                std = ?stats.std,
                "test/train mean accuracy"
            );
            results.insert(family, stats);
        }
        Ok(results)
    }

    /// Quick evaluation over `config.runs` seeds; returns each run's test accuracy
    pub fn train(&self, family: ModelFamily) -> Result<Vec<f64>> {
        (0..self.config.runs)
            .map(|run| self.evaluate_run(family, run, false).map(|o| o.test_accuracy))
            .collect()
    }

    fn model_hyper(&self, syn: &SyntheticGraph) -> Result<ModelHyper> {
        let cfg = &self.config;
        let nfeat = syn.features.dim(1)?;
        let mut hyper = ModelHyper::new(nfeat, cfg.hidden, self.dataset.nclass);
        hyper.nlayers = cfg.nlayers;
        hyper.ntrans = cfg.ntrans;
        hyper.dropout = cfg.dropout();
        hyper.lr = cfg.lr;
        hyper.weight_decay = cfg.weight_decay;
        hyper.activation = cfg.activation;
        hyper.with_bn = false;
        Ok(hyper)
    }

    /// Structure-free families scored on a separate test graph see an
    /// unnormalized identity operator; everything else propagates over the
    /// snapshot's normalized adjacency
    fn scoring_operator(&self, family: ModelFamily, snapshot: &GraphSnapshot) -> Result<(Adjacency, bool)> {
        if family.is_structure_free() && self.config.uses_separate_test_graph() {
            Ok((Adjacency::Sparse(SparseAdjacency::identity(snapshot.num_nodes())), false))
        } else {
            Ok((snapshot.adjacency.clone(), true))
        }
    }

    fn score_snapshot(
        &self,
        model: &dyn GraphModel,
        family: ModelFamily,
        snapshot: &GraphSnapshot,
        split: &str,
        verbose: bool,
    ) -> Result<f64> {
        let (operator, normalize) = self.scoring_operator(family, snapshot)?;
        let output = predict(model, &snapshot.features, &operator, normalize)?;
        self.report_split(&output, &snapshot.labels, split, verbose)
    }

    fn report_split(&self, output: &Tensor, labels: &Labels, split: &str, verbose: bool) -> Result<f64> {
        let labels = labels.to_device(output.device())?;
        let acc = accuracy(output, labels.as_tensor())?;
        let loss = nll_loss(output, labels.as_tensor())?.to_scalar::<f32>()?;
        if verbose {
            info!(split, loss, accuracy = acc, "set results");
        } else {
            debug!(split, loss, accuracy = acc, "set results");
        }
        Ok(acc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_outcome_to_vec() {
        let both = EvalOutcome {
            test_accuracy: 0.8,
            train_accuracy: Some(0.9),
        };
        assert_eq!(both.to_vec(), vec![0.8, 0.9]);
        let test_only = EvalOutcome {
            test_accuracy: 0.7,
            train_accuracy: None,
        };
        assert_eq!(test_only.to_vec(), vec![0.7]);
    }

    #[test]
    fn test_population_std() {
        let stats = AccuracyStats::from_runs(&[vec![0.8, 0.9], vec![0.6, 0.9]]).unwrap();
        assert_abs_diff_eq!(stats.mean[0], 0.7, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.std[0], 0.1, epsilon = 1e-12);
        assert_abs_diff_eq!(stats.std[1], 0.0, epsilon = 1e-12);
        assert_eq!(stats.runs, 2);
    }

    #[test]
    fn test_stats_reject_ragged_runs() {
        assert!(AccuracyStats::from_runs(&[]).is_err());
        assert!(AccuracyStats::from_runs(&[vec![0.5], vec![0.5, 0.5]]).is_err());
    }
}
