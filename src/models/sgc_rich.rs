//! SGC with a stack of transform layers
//!
//! ```text
//! h_0 = X
//! h_i = dropout(act(bn(h_{i-1} W_i + b_i)))   for all but the last layer
//! h_T = h_{T-1} W_T + b_T
//! out = act_out(A^K h_T)
//! ```

use candle_core::{Device, Tensor, Var};
use rand::rngs::StdRng;
use rand::SeedableRng;

use super::layer::{BatchNorm1d, Linear};
use super::{output_activation, propagate_blocks, propagate_each, GraphModel, ModelHyper};
use crate::graph::{Adjacency, SampledBlock};
use crate::primitives::dropout;
use crate::Result;

/// Multi-transform SGC
#[derive(Debug, Clone)]
pub struct SgcRich {
    layers: Vec<Linear>,
    bns: Vec<BatchNorm1d>,
    hyper: ModelHyper,
    multi_label: bool,
    device: Device,
}

impl SgcRich {
    pub fn new(hyper: ModelHyper, device: &Device) -> Result<Self> {
        hyper.validate()?;
        let mut layers = Vec::with_capacity(hyper.ntrans);
        let mut bns = Vec::new();

        if hyper.ntrans == 1 {
            layers.push(Linear::new(hyper.nfeat, hyper.nclass, hyper.with_bias, device)?);
        } else {
            layers.push(Linear::new(hyper.nfeat, hyper.nhid, hyper.with_bias, device)?);
            for _ in 0..hyper.ntrans - 2 {
                layers.push(Linear::new(hyper.nhid, hyper.nhid, hyper.with_bias, device)?);
            }
            layers.push(Linear::new(hyper.nhid, hyper.nclass, hyper.with_bias, device)?);
            if hyper.with_bn {
                for _ in 0..hyper.ntrans - 1 {
                    bns.push(BatchNorm1d::new(hyper.nhid, device)?);
                }
            }
        }

        Ok(Self {
            layers,
            bns,
            hyper,
            multi_label: false,
            device: device.clone(),
        })
    }

    pub fn num_transforms(&self) -> usize {
        self.layers.len()
    }

    fn transform(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let last = self.layers.len() - 1;
        let mut h = x.clone();
        for (ix, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h)?;
            if ix != last {
                if let Some(bn) = self.bns.get(ix) {
                    h = bn.forward(&h, train)?;
                }
                h = self.hyper.activation.apply(&h)?;
                h = dropout(&h, self.hyper.dropout as f32, train)?;
            }
        }
        Ok(h)
    }
}

impl GraphModel for SgcRich {
    fn forward(&self, x: &Tensor, adj: &Adjacency, train: bool) -> Result<Tensor> {
        let h = adj.propagate_n(&self.transform(x, train)?, self.hyper.nlayers)?;
        output_activation(&h, self.multi_label)
    }

    fn forward_sampler(&self, x: &Tensor, blocks: &[SampledBlock], train: bool) -> Result<Tensor> {
        let h = propagate_blocks(&self.transform(x, train)?, blocks)?;
        output_activation(&h, self.multi_label)
    }

    fn forward_syn(&self, x: &Tensor, adjs: &[Adjacency], train: bool) -> Result<Tensor> {
        let h = propagate_each(&self.transform(x, train)?, adjs)?;
        output_activation(&h, self.multi_label)
    }

    fn initialize(&mut self, seed: u64) -> Result<()> {
        let mut rng = StdRng::seed_from_u64(seed);
        for layer in &self.layers {
            layer.reset_parameters(&mut rng)?;
        }
        for bn in &self.bns {
            bn.reset_parameters()?;
        }
        Ok(())
    }

    fn vars(&self) -> Vec<Var> {
        let mut vars: Vec<Var> = self.layers.iter().flat_map(Linear::vars).collect();
        vars.extend(self.bns.iter().flat_map(BatchNorm1d::vars));
        vars
    }

    fn state(&self) -> Vec<Var> {
        let mut state = self.vars();
        state.extend(self.bns.iter().flat_map(BatchNorm1d::buffers));
        state
    }

    fn hyper(&self) -> &ModelHyper {
        &self.hyper
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::SparseAdjacency;
    use crate::primitives::{log_softmax, relu};
    use candle_core::DType;

    fn device() -> Device {
        Device::Cpu
    }

    fn hyper(ntrans: usize, with_bn: bool) -> ModelHyper {
        let mut h = ModelHyper::new(4, 6, 3);
        h.ntrans = ntrans;
        h.with_bn = with_bn;
        h.dropout = 0.0;
        h.nlayers = 1;
        h
    }

    #[test]
    fn test_layer_stack_shapes() {
        assert_eq!(SgcRich::new(hyper(1, false), &device()).unwrap().num_transforms(), 1);
        assert_eq!(SgcRich::new(hyper(3, false), &device()).unwrap().num_transforms(), 3);

        let with_bn = SgcRich::new(hyper(3, true), &device()).unwrap();
        // 3 linears with bias + 2 batch norms with scale and shift
        assert_eq!(with_bn.vars().len(), 6 + 4);
        assert_eq!(with_bn.state().len(), 6 + 4 + 4);
    }

    #[test]
    fn test_two_layer_forward_matches_manual() {
        let mut m = SgcRich::new(hyper(2, false), &device()).unwrap();
        m.initialize(11).unwrap();
        let x = Tensor::from_vec((0..12).map(|v| v as f32 / 12.0).collect::<Vec<_>>(), (3, 4), &device())
            .unwrap();
        let adj = Adjacency::Sparse(SparseAdjacency::identity(3));
        let out = m.forward(&x, &adj, false).unwrap();

        let vars = m.vars();
        let h = x
            .matmul(vars[0].as_tensor())
            .unwrap()
            .broadcast_add(vars[1].as_tensor())
            .unwrap();
        let h = relu(&h).unwrap();
        let h = h
            .matmul(vars[2].as_tensor())
            .unwrap()
            .broadcast_add(vars[3].as_tensor())
            .unwrap();
        let expected = log_softmax(&h).unwrap();
        let diff = (out - expected)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar::<f32>()
            .unwrap();
        assert!(diff < 1e-6);
    }

    #[test]
    fn test_multi_label_outputs_probabilities() {
        let mut m = SgcRich::new(hyper(2, true), &device()).unwrap();
        m.initialize(0).unwrap();
        m.set_multi_label(true);
        let x = Tensor::randn(0f32, 1.0, (5, 4), &device()).unwrap();
        let adj = Adjacency::Sparse(SparseAdjacency::identity(5));
        let out: Vec<f32> = m
            .forward(&x, &adj, true)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert!(out.iter().all(|p| (0.0..=1.0).contains(p)));
    }

    #[test]
    fn test_batched_adjacency_flattens() {
        let mut m = SgcRich::new(hyper(2, false), &device()).unwrap();
        m.initialize(0).unwrap();
        let eye = Tensor::eye(4, DType::F32, &device()).unwrap();
        let adj = Adjacency::Batched(Tensor::stack(&[&eye, &eye], 0).unwrap());
        let x = Tensor::ones((4, 4), DType::F32, &device()).unwrap();
        assert_eq!(m.forward(&x, &adj, false).unwrap().dims(), &[8, 3]);
    }
}
