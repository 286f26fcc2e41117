//! Learnable layers
//!
//! Parameters are [`Var`]s so the optimizer updates them in place. Resets
//! draw from an explicit seeded generator so repeated runs are reproducible
//! on every device.

use candle_core::{DType, Device, Tensor, Var};
use rand::rngs::StdRng;
use rand::Rng;

use crate::graph::Adjacency;
use crate::{EvalError, Result};

/// Uniform `U(-bound, bound)` tensor drawn from `rng`
pub(crate) fn uniform(rng: &mut StdRng, shape: &[usize], bound: f64, device: &Device) -> Result<Tensor> {
    let n: usize = shape.iter().product();
    let bound = bound as f32;
    let data: Vec<f32> = (0..n).map(|_| rng.gen_range(-bound..=bound)).collect();
    Tensor::from_vec(data, shape, device)
        .map_err(|e| EvalError::Tensor(format!("uniform init failed: {}", e)))
}

/// `x @ W` for `[n, in]` or `[b, n, in]` inputs
fn project(x: &Tensor, weight: &Var) -> Result<Tensor> {
    let out = if x.rank() == 3 {
        x.broadcast_matmul(weight.as_tensor())
    } else {
        x.matmul(weight.as_tensor())
    };
    out.map_err(|e| EvalError::Tensor(format!("weight matmul failed: {}", e)))
}

// =============================================================================
// Graph convolution
// =============================================================================

/// Graph convolution `A (X W) + b`
#[derive(Debug, Clone)]
pub struct GraphConvolution {
    weight: Var,
    bias: Option<Var>,
    in_features: usize,
    out_features: usize,
}

impl GraphConvolution {
    pub fn new(in_features: usize, out_features: usize, with_bias: bool, device: &Device) -> Result<Self> {
        let weight = Var::zeros((in_features, out_features), DType::F32, device)?;
        let bias = if with_bias {
            Some(Var::zeros(out_features, DType::F32, device)?)
        } else {
            None
        };
        Ok(Self {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    /// Redraw weight and bias from `U(-1/√in, 1/√in)`
    pub fn reset_parameters(&self, rng: &mut StdRng) -> Result<()> {
        let stdv = 1.0 / (self.in_features as f64).sqrt();
        let device = self.weight.device();
        self.weight
            .set(&uniform(rng, &[self.in_features, self.out_features], stdv, device)?)?;
        if let Some(bias) = &self.bias {
            bias.set(&uniform(rng, &[self.out_features], stdv, device)?)?;
        }
        Ok(())
    }

    /// `X W`
    pub fn transform(&self, x: &Tensor) -> Result<Tensor> {
        project(x, &self.weight)
    }

    /// `H + b` (no-op without bias)
    pub fn add_bias(&self, h: &Tensor) -> Result<Tensor> {
        match &self.bias {
            Some(b) => h
                .broadcast_add(b.as_tensor())
                .map_err(|e| EvalError::Tensor(format!("add bias failed: {}", e))),
            None => Ok(h.clone()),
        }
    }

    /// Single convolution: `A (X W) + b`
    pub fn forward(&self, x: &Tensor, adj: &Adjacency) -> Result<Tensor> {
        self.add_bias(&adj.propagate(&self.transform(x)?)?)
    }

    pub fn weight(&self) -> &Var {
        &self.weight
    }

    pub fn bias(&self) -> Option<&Var> {
        self.bias.as_ref()
    }

    pub fn vars(&self) -> Vec<Var> {
        let mut vars = vec![self.weight.clone()];
        vars.extend(self.bias.clone());
        vars
    }
}

// =============================================================================
// Linear
// =============================================================================

/// Dense transform `X W + b`
#[derive(Debug, Clone)]
pub struct Linear {
    weight: Var,
    bias: Option<Var>,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    pub fn new(in_features: usize, out_features: usize, with_bias: bool, device: &Device) -> Result<Self> {
        Ok(Self {
            weight: Var::zeros((in_features, out_features), DType::F32, device)?,
            bias: if with_bias {
                Some(Var::zeros(out_features, DType::F32, device)?)
            } else {
                None
            },
            in_features,
            out_features,
        })
    }

    pub fn reset_parameters(&self, rng: &mut StdRng) -> Result<()> {
        let stdv = 1.0 / (self.in_features as f64).sqrt();
        let device = self.weight.device();
        self.weight
            .set(&uniform(rng, &[self.in_features, self.out_features], stdv, device)?)?;
        if let Some(bias) = &self.bias {
            bias.set(&uniform(rng, &[self.out_features], stdv, device)?)?;
        }
        Ok(())
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = project(x, &self.weight)?;
        match &self.bias {
            Some(b) => h
                .broadcast_add(b.as_tensor())
                .map_err(|e| EvalError::Tensor(format!("linear bias failed: {}", e))),
            None => Ok(h),
        }
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    pub fn vars(&self) -> Vec<Var> {
        let mut vars = vec![self.weight.clone()];
        vars.extend(self.bias.clone());
        vars
    }
}

// =============================================================================
// Batch normalization
// =============================================================================

/// Batch normalization over the node dimension of `[n, features]`
///
/// Running statistics are updated in training mode with momentum 0.1 and
/// used in evaluation mode. They are state, not trainable parameters.
#[derive(Debug, Clone)]
pub struct BatchNorm1d {
    gamma: Var,
    beta: Var,
    running_mean: Var,
    running_var: Var,
    eps: f64,
    momentum: f64,
}

impl BatchNorm1d {
    pub fn new(num_features: usize, device: &Device) -> Result<Self> {
        Ok(Self {
            gamma: Var::ones(num_features, DType::F32, device)?,
            beta: Var::zeros(num_features, DType::F32, device)?,
            running_mean: Var::zeros(num_features, DType::F32, device)?,
            running_var: Var::ones(num_features, DType::F32, device)?,
            eps: 1e-5,
            momentum: 0.1,
        })
    }

    pub fn reset_parameters(&self) -> Result<()> {
        self.gamma.set(&Tensor::ones_like(self.gamma.as_tensor())?)?;
        self.beta.set(&Tensor::zeros_like(self.beta.as_tensor())?)?;
        self.running_mean
            .set(&Tensor::zeros_like(self.running_mean.as_tensor())?)?;
        self.running_var
            .set(&Tensor::ones_like(self.running_var.as_tensor())?)?;
        Ok(())
    }

    pub fn forward(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let (mean, var) = if train {
            let n = x.dim(0)?;
            let mean = x.mean_keepdim(0)?;
            let centered = x.broadcast_sub(&mean)?;
            let var = centered.sqr()?.mean_keepdim(0)?;

            // Running variance tracks the unbiased estimate
            let unbiased = if n > 1 {
                var.affine(n as f64 / (n - 1) as f64, 0.0)?
            } else {
                var.clone()
            };
            let m = self.momentum;
            let new_mean = ((self.running_mean.as_tensor() * (1.0 - m))?
                + (mean.squeeze(0)?.detach() * m)?)?;
            let new_var = ((self.running_var.as_tensor() * (1.0 - m))?
                + (unbiased.squeeze(0)?.detach() * m)?)?;
            self.running_mean.set(&new_mean)?;
            self.running_var.set(&new_var)?;
            (mean, var)
        } else {
            (
                self.running_mean.as_tensor().unsqueeze(0)?,
                self.running_var.as_tensor().unsqueeze(0)?,
            )
        };

        let normed = x
            .broadcast_sub(&mean)?
            .broadcast_div(&(var + self.eps)?.sqrt()?)
            .map_err(|e| EvalError::Tensor(format!("batch norm scale failed: {}", e)))?;
        normed
            .broadcast_mul(self.gamma.as_tensor())?
            .broadcast_add(self.beta.as_tensor())
            .map_err(|e| EvalError::Tensor(format!("batch norm affine failed: {}", e)))
    }

    /// Learnable scale and shift
    pub fn vars(&self) -> Vec<Var> {
        vec![self.gamma.clone(), self.beta.clone()]
    }

    /// Running mean and variance
    pub fn buffers(&self) -> Vec<Var> {
        vec![self.running_mean.clone(), self.running_var.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    fn device() -> Device {
        Device::Cpu
    }

    #[test]
    fn test_reset_is_bounded_and_seeded() {
        let gc = GraphConvolution::new(16, 3, true, &device()).unwrap();
        gc.reset_parameters(&mut StdRng::seed_from_u64(5)).unwrap();
        let bound = 1.0 / 4.0;
        let w: Vec<f32> = gc.weight().as_tensor().flatten_all().unwrap().to_vec1().unwrap();
        assert!(w.iter().all(|v| v.abs() <= bound));
        assert!(w.iter().any(|v| *v != 0.0));

        let other = GraphConvolution::new(16, 3, true, &device()).unwrap();
        other.reset_parameters(&mut StdRng::seed_from_u64(5)).unwrap();
        let w2: Vec<f32> = other.weight().as_tensor().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(w, w2);
    }

    #[test]
    fn test_graph_convolution_forward_identity() {
        let gc = GraphConvolution::new(2, 2, true, &device()).unwrap();
        gc.weight()
            .set(&Tensor::from_vec(vec![1.0f32, 0.0, 0.0, 1.0], (2, 2), &device()).unwrap())
            .unwrap();
        gc.bias()
            .unwrap()
            .set(&Tensor::from_vec(vec![0.5f32, -0.5], 2, &device()).unwrap())
            .unwrap();
        let x = Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], (2, 2), &device()).unwrap();
        let adj = Adjacency::Sparse(crate::graph::SparseAdjacency::identity(2));
        let out: Vec<Vec<f32>> = gc.forward(&x, &adj).unwrap().to_vec2().unwrap();
        assert_eq!(out, vec![vec![1.5, 1.5], vec![3.5, 3.5]]);
    }

    #[test]
    fn test_linear_without_bias() {
        let lin = Linear::new(3, 2, false, &device()).unwrap();
        assert_eq!(lin.vars().len(), 1);
        let out = lin.forward(&Tensor::ones((4, 3), DType::F32, &device()).unwrap()).unwrap();
        assert_eq!(out.dims(), &[4, 2]);
    }

    #[test]
    fn test_batch_norm_train_and_eval() {
        let bn = BatchNorm1d::new(2, &device()).unwrap();
        let x = Tensor::from_vec(vec![1.0f32, 10.0, 3.0, 30.0], (2, 2), &device()).unwrap();

        let out: Vec<Vec<f32>> = bn.forward(&x, true).unwrap().to_vec2().unwrap();
        assert_abs_diff_eq!(out[0][0], -1.0, epsilon = 1e-3);
        assert_abs_diff_eq!(out[1][1], 1.0, epsilon = 1e-3);

        // Running mean moved 10% toward the batch mean [2, 20]
        let rm: Vec<f32> = bn.buffers()[0].as_tensor().to_vec1().unwrap();
        assert_abs_diff_eq!(rm[0], 0.2, epsilon = 1e-6);
        assert_abs_diff_eq!(rm[1], 2.0, epsilon = 1e-5);

        let eval = bn.forward(&x, false).unwrap();
        assert_eq!(eval.dims(), &[2, 2]);

        bn.reset_parameters().unwrap();
        let rm: Vec<f32> = bn.buffers()[0].as_tensor().to_vec1().unwrap();
        assert_eq!(rm, vec![0.0, 0.0]);
    }
}
