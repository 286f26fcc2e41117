//! Simplified graph convolution
//!
//! ```text
//! out = act(A^K (X W) + b)
//! ```
//!
//! A single weight matrix maps features straight to classes; the `K`
//! propagation steps carry no parameters.

use candle_core::{Device, Tensor, Var};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::warn;

use super::layer::GraphConvolution;
use super::{output_activation, propagate_blocks, propagate_each, GraphModel, ModelHyper};
use crate::graph::{Adjacency, SampledBlock};
use crate::Result;

/// Single-transform SGC
#[derive(Debug, Clone)]
pub struct Sgc {
    conv: GraphConvolution,
    hyper: ModelHyper,
    weight_decay: f64,
    multi_label: bool,
    device: Device,
}

impl Sgc {
    pub fn new(hyper: ModelHyper, device: &Device) -> Result<Self> {
        hyper.validate()?;
        if hyper.with_bn {
            warn!("SGC has no batch norm layers; ignoring with_bn");
        }
        let conv = GraphConvolution::new(hyper.nfeat, hyper.nclass, hyper.with_bias, device)?;
        let weight_decay = if hyper.with_relu { hyper.weight_decay } else { 0.0 };
        Ok(Self {
            conv,
            hyper,
            weight_decay,
            multi_label: false,
            device: device.clone(),
        })
    }

    pub fn conv(&self) -> &GraphConvolution {
        &self.conv
    }
}

impl GraphModel for Sgc {
    fn forward(&self, x: &Tensor, adj: &Adjacency, _train: bool) -> Result<Tensor> {
        let h = self.conv.transform(x)?;
        let h = adj.propagate_n(&h, self.hyper.nlayers)?;
        output_activation(&self.conv.add_bias(&h)?, self.multi_label)
    }

    fn forward_sampler(&self, x: &Tensor, blocks: &[SampledBlock], _train: bool) -> Result<Tensor> {
        let h = propagate_blocks(&self.conv.transform(x)?, blocks)?;
        output_activation(&self.conv.add_bias(&h)?, self.multi_label)
    }

    fn forward_syn(&self, x: &Tensor, adjs: &[Adjacency], _train: bool) -> Result<Tensor> {
        let h = propagate_each(&self.conv.transform(x)?, adjs)?;
        output_activation(&self.conv.add_bias(&h)?, self.multi_label)
    }

    fn initialize(&mut self, seed: u64) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(seed);
        self.conv.reset_parameters(&mut rng)
    }

    fn vars(&self) -> Vec<Var> {
        self.conv.vars()
    }

    fn state(&self) -> Vec<Var> {
        self.conv.vars()
    }

    fn hyper(&self) -> &ModelHyper {
        &self.hyper
    }

    fn weight_decay(&self) -> f64 {
        self.weight_decay
    }

    fn set_multi_label(&mut self, multi_label: bool) {
        self.multi_label = multi_label;
    }

    fn is_multi_label(&self) -> bool {
        self.multi_label
    }

    fn device(&self) -> &Device {
        &self.device
    }
}
